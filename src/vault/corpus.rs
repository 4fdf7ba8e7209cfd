//! Merge/dedup store for one channel's message corpus.
//!
//! Messages are keyed by their position key (`ts`) and kept sorted by its
//! numeric value. `merge` is pure and idempotent: re-merging any batch, in
//! any page split, yields the same corpus. Every change is serialized
//! wholesale — durability over write amplification.

use anyhow::{Context, Result};
use chrono::{Local, TimeZone};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::PathBuf;

use crate::logging;
use crate::slack::types::Message;

/// Numeric value of a position key. Keys compare by number, not by string:
/// `"9.5"` sorts before `"10.0"`.
pub fn ts_value(ts: &str) -> f64 {
    ts.trim().parse::<f64>().unwrap_or(0.0)
}

/// Human rendering of a position key, local time. Stamped once at first
/// local sight of a message and retained on every later merge.
pub fn render_ts_human(ts: &str) -> Option<String> {
    let seconds = ts_value(ts);
    let dt = Local.timestamp_opt(seconds as i64, 0).earliest()?;
    Some(dt.format("%Y-%m-%d %H:%M:%S").to_string())
}

#[derive(Debug, Clone, Default)]
pub struct MergeReport {
    /// The reconciled corpus, ascending by numeric position key.
    pub merged: Vec<Message>,
    /// Position keys first seen in this merge.
    pub added: BTreeSet<String>,
    /// Incoming messages that re-fetched an already-known key.
    pub duplicates: usize,
}

/// Reconcile `incoming` into `existing` by position key. Pure and
/// idempotent: `merge(merge(A,B).merged, B).merged == merge(A,B).merged`,
/// and the result does not depend on how the union was split into pages.
pub fn merge(existing: &[Message], incoming: &[Message]) -> MergeReport {
    let mut by_ts: BTreeMap<String, Message> = BTreeMap::new();
    for msg in existing {
        let mut msg = msg.clone();
        if msg.ts_human.is_none() {
            msg.ts_human = render_ts_human(&msg.ts);
        }
        by_ts.insert(msg.ts.clone(), msg);
    }

    let mut added = BTreeSet::new();
    let mut duplicates = 0usize;
    for msg in incoming {
        let mut msg = msg.clone();
        match by_ts.get(&msg.ts) {
            Some(prior) => {
                duplicates += 1;
                // first-sight rendering wins over anything fetched later
                msg.ts_human = prior
                    .ts_human
                    .clone()
                    .or_else(|| render_ts_human(&msg.ts));
            }
            None => {
                added.insert(msg.ts.clone());
                if msg.ts_human.is_none() {
                    msg.ts_human = render_ts_human(&msg.ts);
                }
            }
        }
        by_ts.insert(msg.ts.clone(), msg);
    }

    let mut merged: Vec<Message> = by_ts.into_values().collect();
    merged.sort_by(|a, b| ts_value(&a.ts).total_cmp(&ts_value(&b.ts)));
    MergeReport {
        merged,
        added,
        duplicates,
    }
}

/// One channel's `messages.json`, plus the dry-run switch that turns every
/// write into a logged intent.
#[derive(Debug, Clone)]
pub struct MessageStore {
    path: PathBuf,
    dry_run: bool,
}

impl MessageStore {
    pub fn new(path: PathBuf, dry_run: bool) -> Self {
        Self { path, dry_run }
    }

    pub fn load(&self) -> Result<Vec<Message>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let raw = fs::read_to_string(&self.path)
            .with_context(|| format!("failed to read {}", self.path.display()))?;
        let messages: Vec<Message> = serde_json::from_str(&raw)
            .with_context(|| format!("failed to parse {}", self.path.display()))?;
        Ok(messages)
    }

    pub fn save(&self, messages: &[Message]) -> Result<()> {
        if self.dry_run {
            logging::info(
                "dry_run_skip_save",
                &[
                    ("path", self.path.display().to_string()),
                    ("messages", messages.len().to_string()),
                ],
            );
            return Ok(());
        }
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        let data = serde_json::to_string_pretty(messages)?;
        fs::write(&self.path, format!("{data}\n"))
            .with_context(|| format!("failed to write {}", self.path.display()))?;
        logging::info(
            "corpus_saved",
            &[
                ("path", self.path.display().to_string()),
                ("messages", messages.len().to_string()),
            ],
        );
        Ok(())
    }

    /// Reconcile a fetched batch and persist the result in one step.
    pub fn merge_and_save(
        &self,
        existing: &[Message],
        incoming: &[Message],
    ) -> Result<MergeReport> {
        let report = merge(existing, incoming);
        self.save(&report.merged)?;
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    fn msg(ts: &str, text: &str) -> Message {
        serde_json::from_value(json!({"ts": ts, "text": text, "user": "U01"})).expect("msg")
    }

    #[test]
    fn merge_is_idempotent() {
        let a = vec![msg("100.000001", "one"), msg("101.000001", "two")];
        let b = vec![msg("101.000001", "two"), msg("102.000001", "three")];

        let once = merge(&a, &b).merged;
        let twice = merge(&once, &b).merged;
        assert_eq!(once, twice);
        assert_eq!(once.len(), 3);
    }

    #[test]
    fn merge_sorts_by_numeric_key_not_lexically() {
        let merged = merge(&[msg("10.0", "ten")], &[msg("9.5", "nine and a half")]).merged;
        let keys: Vec<&str> = merged.iter().map(|m| m.ts.as_str()).collect();
        assert_eq!(keys, vec!["9.5", "10.0"]);
    }

    #[test]
    fn merge_result_is_page_split_insensitive() {
        let existing: Vec<Message> = Vec::new();
        let batch: Vec<Message> = (0..6)
            .map(|i| msg(&format!("{}.000000", 100 + i), "m"))
            .collect();

        let one_page = merge(&existing, &batch).merged;
        let page_a = merge(&existing, &batch[3..]).merged;
        let two_pages = merge(&page_a, &batch[..3]).merged;
        assert_eq!(one_page, two_pages);
    }

    #[test]
    fn first_sight_rendering_survives_refetch() {
        let mut first = msg("1700000000.000100", "original");
        first.ts_human = Some("stamped-at-first-sight".to_string());

        let refetched = msg("1700000000.000100", "refetched payload");
        let merged = merge(&[first], &[refetched]).merged;

        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].text.as_deref(), Some("refetched payload"));
        assert_eq!(
            merged[0].ts_human.as_deref(),
            Some("stamped-at-first-sight")
        );
    }

    #[test]
    fn new_messages_get_a_rendering_stamped() {
        let merged = merge(&[], &[msg("1700000000.000100", "hello")]).merged;
        let ts_human = merged[0].ts_human.as_deref().expect("stamped");
        assert_eq!(ts_human.len(), "2023-11-14 22:13:20".len());
    }

    #[test]
    fn report_counts_added_and_duplicates() {
        let existing = vec![msg("100.0", "old")];
        let incoming = vec![msg("100.0", "old again"), msg("105.5", "new")];

        let report = merge(&existing, &incoming);
        assert_eq!(report.added.len(), 1);
        assert!(report.added.contains("105.5"));
        assert_eq!(report.duplicates, 1);
        assert_eq!(report.merged.len(), 2);
    }

    #[test]
    fn store_roundtrips_messages() {
        let tmp = tempdir().expect("tempdir");
        let store = MessageStore::new(tmp.path().join("general/messages.json"), false);

        let report = store
            .merge_and_save(&[], &[msg("2.0", "b"), msg("1.0", "a")])
            .expect("merge and save");
        assert_eq!(report.merged.len(), 2);

        let loaded = store.load().expect("load");
        assert_eq!(loaded, report.merged);
        assert_eq!(loaded[0].ts, "1.0");
    }

    #[test]
    fn dry_run_store_never_writes() {
        let tmp = tempdir().expect("tempdir");
        let path = tmp.path().join("general/messages.json");
        let store = MessageStore::new(path.clone(), true);

        let report = store
            .merge_and_save(&[], &[msg("1.0", "a")])
            .expect("merge and save");
        assert_eq!(report.merged.len(), 1);
        assert!(!path.exists());
    }
}
