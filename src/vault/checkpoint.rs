//! Checkpoint Ledger: the process-wide record of per-channel sync state.
//!
//! The file has shipped in three shapes over its life. Load attempts the
//! canonical one first and falls back through the legacy decoders, always
//! normalizing in memory; the canonical shape is only written on the next
//! save.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use crate::error::VaultError;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    /// True once the channel's full history has been fetched at least once.
    /// `complete` is the historical key for the same flag.
    #[serde(default, alias = "complete")]
    pub backfilled: bool,
    /// Maximum position key among persisted messages; absent until the first
    /// successful backfill of a non-empty channel.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latest_ts: Option<String>,
}

pub type Ledger = BTreeMap<String, Checkpoint>;

pub fn load(path: &Path) -> Result<Ledger> {
    if !path.exists() {
        return Ok(Ledger::new());
    }
    let raw =
        fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
    let value: Value = serde_json::from_str(&raw)
        .map_err(|err| VaultError::CorruptLedger(format!("{}: {err}", path.display())))?;
    decode(value).map_err(|reason| VaultError::CorruptLedger(format!("{}: {reason}", path.display())).into())
}

/// Ordered decoder chain: canonical map, then bare id list, then a map of
/// id to arbitrary scalar. Pure; never touches the file.
fn decode(value: Value) -> Result<Ledger, String> {
    if let Ok(ledger) = serde_json::from_value::<Ledger>(value.clone()) {
        return Ok(ledger);
    }

    match value {
        Value::Array(ids) => {
            let mut ledger = Ledger::new();
            for id in ids {
                let Value::String(id) = id else {
                    return Err("legacy id list contains a non-string entry".to_string());
                };
                ledger.insert(
                    id,
                    Checkpoint {
                        backfilled: true,
                        latest_ts: None,
                    },
                );
            }
            Ok(ledger)
        }
        Value::Object(map) => {
            let mut ledger = Ledger::new();
            for (id, entry) in map {
                ledger.insert(id, decode_entry(entry)?);
            }
            Ok(ledger)
        }
        other => Err(format!(
            "expected an object or array at the top level, found {other}"
        )),
    }
}

fn decode_entry(entry: Value) -> Result<Checkpoint, String> {
    match entry {
        Value::Object(obj) => {
            let backfilled = obj
                .get("backfilled")
                .or_else(|| obj.get("complete"))
                .and_then(Value::as_bool)
                .unwrap_or(false);
            let latest_ts = match obj.get("latest_ts") {
                Some(Value::String(s)) => Some(s.clone()),
                Some(Value::Number(n)) => Some(n.to_string()),
                _ => None,
            };
            Ok(Checkpoint {
                backfilled,
                latest_ts,
            })
        }
        // legacy scalar values carried only the done/not-done bit
        Value::Bool(b) => Ok(Checkpoint {
            backfilled: b,
            latest_ts: None,
        }),
        Value::Number(n) => Ok(Checkpoint {
            backfilled: n.as_f64().is_some_and(|v| v != 0.0),
            latest_ts: None,
        }),
        Value::String(s) => Ok(Checkpoint {
            backfilled: !s.is_empty(),
            latest_ts: None,
        }),
        Value::Null => Ok(Checkpoint::default()),
        other => Err(format!("unsupported ledger entry: {other}")),
    }
}

/// Full-file rewrite. Call only after the corresponding channel's message
/// file has been durably written.
pub fn save(path: &Path, ledger: &Ledger) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    let data = serde_json::to_string_pretty(ledger)?;
    fs::write(path, format!("{data}\n"))
        .with_context(|| format!("failed to write {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn missing_file_is_an_empty_ledger() {
        let tmp = tempdir().expect("tempdir");
        let ledger = load(&tmp.path().join("exported_channels.json")).expect("load");
        assert!(ledger.is_empty());
    }

    #[test]
    fn canonical_shape_roundtrips() {
        let tmp = tempdir().expect("tempdir");
        let path = tmp.path().join("exported_channels.json");

        let mut ledger = Ledger::new();
        ledger.insert(
            "C01".to_string(),
            Checkpoint {
                backfilled: true,
                latest_ts: Some("1700000000.000100".to_string()),
            },
        );
        ledger.insert("C02".to_string(), Checkpoint::default());
        save(&path, &ledger).expect("save");

        let got = load(&path).expect("load");
        assert_eq!(got, ledger);
    }

    #[test]
    fn legacy_bare_id_list_upgrades_to_backfilled() {
        let tmp = tempdir().expect("tempdir");
        let path = tmp.path().join("exported_channels.json");
        fs::write(&path, r#"["C0X", "C0Y"]"#).expect("write");

        let ledger = load(&path).expect("load");
        assert_eq!(ledger.len(), 2);
        for id in ["C0X", "C0Y"] {
            let entry = ledger.get(id).expect("entry");
            assert!(entry.backfilled);
            assert!(entry.latest_ts.is_none());
        }
    }

    #[test]
    fn legacy_scalar_values_carry_only_the_done_bit() {
        let tmp = tempdir().expect("tempdir");
        let path = tmp.path().join("exported_channels.json");
        fs::write(
            &path,
            r#"{"C01": true, "C02": false, "C03": "1699990000.000200", "C04": 1}"#,
        )
        .expect("write");

        let ledger = load(&path).expect("load");
        assert!(ledger["C01"].backfilled);
        assert!(!ledger["C02"].backfilled);
        // a bare ts string meant "done"; the position itself was not trusted
        assert!(ledger["C03"].backfilled);
        assert!(ledger["C03"].latest_ts.is_none());
        assert!(ledger["C04"].backfilled);
    }

    #[test]
    fn complete_key_and_numeric_latest_are_normalized() {
        let tmp = tempdir().expect("tempdir");
        let path = tmp.path().join("exported_channels.json");
        fs::write(
            &path,
            r#"{"C01": {"complete": true, "latest_ts": 1700000000.0002}}"#,
        )
        .expect("write");

        let ledger = load(&path).expect("load");
        let entry = ledger.get("C01").expect("entry");
        assert!(entry.backfilled);
        assert_eq!(entry.latest_ts.as_deref(), Some("1700000000.0002"));
    }

    #[test]
    fn load_never_writes_the_upgrade_back() {
        let tmp = tempdir().expect("tempdir");
        let path = tmp.path().join("exported_channels.json");
        fs::write(&path, r#"["C0X"]"#).expect("write");

        load(&path).expect("load");
        let raw = fs::read_to_string(&path).expect("read");
        assert_eq!(raw, r#"["C0X"]"#);
    }

    #[test]
    fn unreadable_top_level_shape_is_an_error() {
        let tmp = tempdir().expect("tempdir");
        let path = tmp.path().join("exported_channels.json");
        fs::write(&path, r#""just a string""#).expect("write");
        assert!(load(&path).is_err());
    }
}
