use anyhow::{Context, Result};
use fs2::FileExt;
use std::fs;
use std::time::Duration;

use crate::cli::ExportArgs;
use crate::commands::CommandReport;
use crate::error::VaultError;
use crate::logging;
use crate::slack::fetch::{Fetcher, SystemClock};
use crate::slack::http::HttpSlackClient;
use crate::slack::types::ChannelInfo;
use crate::vault::checkpoint;
use crate::vault::config;
use crate::vault::corpus::MessageStore;
use crate::vault::files;
use crate::vault::paths::{self, VaultPaths};
use crate::vault::sync;
use crate::vault::users;

/// Breather between channels, on top of the per-page throttle.
const CHANNEL_PAUSE: Duration = Duration::from_secs(1);

pub fn run(args: &ExportArgs) -> Result<CommandReport> {
    let mut report = CommandReport::new("export");

    let paths = paths::resolve_paths(args.root_dir.as_deref())?;
    fs::create_dir_all(&paths.root_dir)
        .with_context(|| format!("failed to create {}", paths.root_dir.display()))?;
    report.detail(format!("root_dir={}", paths.root_dir.display()));
    if args.dry_run {
        report.detail("dry_run=true (no corpus, ledger, or file writes)");
        logging::info("dry_run_enabled", &[]);
    }

    // held until process exit; two exporters on one root would interleave
    // full-file rewrites
    let _lock = acquire_run_lock(&paths)?;

    let token = config::resolve_token()?;
    let client = HttpSlackClient::new(&token)?;
    let fetcher = Fetcher::new(client, Box::new(SystemClock::new()));

    if !args.skip_users {
        let outcome = users::export_users(&fetcher, fetcher.client(), &paths, args.dry_run)?;
        report.detail(format!(
            "users={} avatars={}",
            outcome.users, outcome.avatars
        ));
    }

    let channels = fetcher.list_all_channels();
    logging::info("channels_listed", &[("count", channels.len().to_string())]);

    let allow = config::load_channel_allow_set(&paths.export_config_file())?;
    if allow.is_some() {
        report.detail("channel filter: export_config.json");
    }
    let selected: Vec<ChannelInfo> = channels
        .into_iter()
        .filter(|c| c.is_member)
        .filter(|c| allow.as_ref().is_none_or(|set| set.contains(&c.id)))
        .collect();
    report.detail(format!("channels_selected={}", selected.len()));

    let mut ledger = checkpoint::load(&paths.checkpoint_file())?;

    for channel in &selected {
        let entry = ledger.get(&channel.id).cloned().unwrap_or_default();
        logging::info(
            "channel_sync",
            &[
                ("channel", channel.name.clone()),
                ("id", channel.id.clone()),
                ("backfilled", entry.backfilled.to_string()),
            ],
        );

        let store = MessageStore::new(paths.messages_file(&channel.name), args.dry_run);
        let outcome = sync::sync_channel(&fetcher, &store, channel, &entry)?;

        let downloads = files::download_all(
            fetcher.client(),
            &paths.channel_dir(&channel.name),
            &paths.files_dir(&channel.name),
            &outcome.new_files,
            args.dry_run,
        )?;

        // corpus was persisted inside the synchronizer; only now may the
        // checkpoint advance
        if outcome.checkpoint != entry {
            ledger.insert(channel.id.clone(), outcome.checkpoint.clone());
            if !args.dry_run {
                checkpoint::save(&paths.checkpoint_file(), &ledger)?;
            }
        }

        report.detail(format!(
            "channel={} mode={} messages={} added={} files_saved={} files_skipped={}",
            channel.name,
            outcome.mode.as_str(),
            outcome.messages_total,
            outcome.messages_added,
            downloads.saved,
            downloads.skipped,
        ));
        fetcher.clock().sleep(CHANNEL_PAUSE);
    }

    Ok(report)
}

fn acquire_run_lock(paths: &VaultPaths) -> Result<fs::File> {
    let path = paths.lock_file();
    let file = fs::OpenOptions::new()
        .create(true)
        .write(true)
        .open(&path)
        .with_context(|| format!("failed to open {}", path.display()))?;
    file.try_lock_exclusive()
        .map_err(|_| VaultError::RootLocked(path.display().to_string()))?;
    Ok(file)
}
