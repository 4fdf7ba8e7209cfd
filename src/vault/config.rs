use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::BTreeSet;
use std::env;
use std::fs;
use std::path::Path;

use crate::error::VaultError;

#[derive(Debug, Clone, Default, Deserialize)]
struct ExportConfig {
    #[serde(default)]
    channel_ids: Vec<String>,
}

/// Optional allow-set of channel ids from `export_config.json`. Absent file
/// or empty list means "every channel the credential is a member of".
pub fn load_channel_allow_set(path: &Path) -> Result<Option<BTreeSet<String>>> {
    if !path.exists() {
        return Ok(None);
    }
    let raw =
        fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
    let parsed: ExportConfig = serde_json::from_str(&raw)
        .with_context(|| format!("failed to parse {}", path.display()))?;
    let set: BTreeSet<String> = parsed.channel_ids.into_iter().collect();
    if set.is_empty() {
        Ok(None)
    } else {
        Ok(Some(set))
    }
}

pub fn resolve_token() -> Result<String> {
    match env::var("SLACK_BOT_TOKEN") {
        Ok(v) if !v.trim().is_empty() => Ok(v.trim().to_string()),
        _ => Err(VaultError::MissingToken.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::load_channel_allow_set;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn missing_config_means_no_restriction() {
        let tmp = tempdir().expect("tempdir");
        let got = load_channel_allow_set(&tmp.path().join("export_config.json")).expect("load");
        assert!(got.is_none());
    }

    #[test]
    fn empty_channel_list_means_no_restriction() {
        let tmp = tempdir().expect("tempdir");
        let path = tmp.path().join("export_config.json");
        fs::write(&path, r#"{"channel_ids": []}"#).expect("write");
        let got = load_channel_allow_set(&path).expect("load");
        assert!(got.is_none());
    }

    #[test]
    fn listed_ids_restrict_the_export() {
        let tmp = tempdir().expect("tempdir");
        let path = tmp.path().join("export_config.json");
        fs::write(&path, r#"{"channel_ids": ["C01", "C02"]}"#).expect("write");
        let got = load_channel_allow_set(&path).expect("load").expect("some");
        assert!(got.contains("C01"));
        assert!(got.contains("C02"));
        assert_eq!(got.len(), 2);
    }

    #[test]
    fn malformed_config_is_an_error() {
        let tmp = tempdir().expect("tempdir");
        let path = tmp.path().join("export_config.json");
        fs::write(&path, "not json").expect("write");
        assert!(load_channel_allow_set(&path).is_err());
    }
}
