//! Workspace user export: the member directory plus avatar images.

use anyhow::{Context, Result};
use std::fs;

use crate::logging;
use crate::slack::api::SlackClient;
use crate::slack::fetch::Fetcher;
use crate::slack::types::UserInfo;
use crate::vault::files::FileFetcher;
use crate::vault::paths::VaultPaths;

#[derive(Debug, Clone, Copy, Default)]
pub struct UserExportOutcome {
    pub users: usize,
    pub avatars: usize,
}

fn avatar_url(user: &UserInfo) -> Option<&str> {
    let profile = user.profile.as_ref()?;
    profile
        .image_512
        .as_deref()
        .filter(|u| !u.is_empty())
        .or_else(|| profile.image_192.as_deref().filter(|u| !u.is_empty()))
}

pub fn export_users<C: SlackClient>(
    fetcher: &Fetcher<C>,
    files: &dyn FileFetcher,
    paths: &VaultPaths,
    dry_run: bool,
) -> Result<UserExportOutcome> {
    let users = fetcher.list_all_users();
    logging::info("users_fetched", &[("count", users.len().to_string())]);

    if dry_run {
        logging::info(
            "dry_run_skip_users_write",
            &[("path", paths.users_file().display().to_string())],
        );
        return Ok(UserExportOutcome {
            users: users.len(),
            avatars: 0,
        });
    }

    let users_file = paths.users_file();
    if let Some(parent) = users_file.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    let data = serde_json::to_string_pretty(&users)?;
    fs::write(&users_file, format!("{data}\n"))
        .with_context(|| format!("failed to write {}", users_file.display()))?;

    let avatars_dir = paths.avatars_dir();
    fs::create_dir_all(&avatars_dir)
        .with_context(|| format!("failed to create {}", avatars_dir.display()))?;

    let mut avatars = 0usize;
    for user in &users {
        let Some(url) = avatar_url(user) else {
            continue;
        };
        let avatar_path = avatars_dir.join(format!("{}.jpg", user.id));
        match files.fetch_bytes(url, false) {
            Ok(bytes) => {
                fs::write(&avatar_path, bytes)
                    .with_context(|| format!("failed to write {}", avatar_path.display()))?;
                avatars += 1;
            }
            Err(err) => {
                logging::error(
                    "avatar_download_failed",
                    &[("user", user.id.clone()), ("reason", format!("{err:#}"))],
                );
            }
        }
    }

    Ok(UserExportOutcome {
        users: users.len(),
        avatars,
    })
}
