use anyhow::Result;
use std::env;
use std::path::{Path, PathBuf};

/// Every on-disk location derives from one root directory, threaded
/// explicitly through the engine so multiple roots can coexist in one
/// process.
#[derive(Debug, Clone)]
pub struct VaultPaths {
    pub root_dir: PathBuf,
}

impl VaultPaths {
    pub fn checkpoint_file(&self) -> PathBuf {
        self.root_dir.join("exported_channels.json")
    }

    pub fn export_config_file(&self) -> PathBuf {
        self.root_dir.join("export_config.json")
    }

    pub fn lock_file(&self) -> PathBuf {
        self.root_dir.join(".chanvault.lock")
    }

    pub fn users_file(&self) -> PathBuf {
        self.root_dir.join("users.json")
    }

    pub fn avatars_dir(&self) -> PathBuf {
        self.root_dir.join("avatars")
    }

    pub fn channel_dir(&self, channel_name: &str) -> PathBuf {
        self.root_dir.join(channel_name)
    }

    pub fn messages_file(&self, channel_name: &str) -> PathBuf {
        self.channel_dir(channel_name).join("messages.json")
    }

    pub fn files_dir(&self, channel_name: &str) -> PathBuf {
        self.channel_dir(channel_name).join("files")
    }
}

fn env_or_default_path(var: &str, fallback: PathBuf) -> PathBuf {
    match env::var(var) {
        Ok(v) if !v.trim().is_empty() => PathBuf::from(v.trim()),
        _ => fallback,
    }
}

pub fn resolve_paths(root_override: Option<&Path>) -> Result<VaultPaths> {
    let root_dir = match root_override {
        Some(dir) => dir.to_path_buf(),
        None => env_or_default_path("CHANVAULT_ROOT", env::current_dir()?),
    };
    Ok(VaultPaths { root_dir })
}
