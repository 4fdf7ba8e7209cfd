//! History synchronizer: one channel, one mode per run.
//!
//! Backfill pages backward through the whole history and persists after
//! every page, so a killed process leaves a partially but correctly merged
//! corpus and the next run re-fetches idempotently. Incremental sync pages
//! forward from the checkpointed position. Both modes stay under the
//! platform's implicit rate budget by stretching each page round-trip to at
//! least 1.2 seconds.

use anyhow::Result;
use std::time::Duration;

use crate::logging;
use crate::slack::api::{HistoryRequest, SlackClient};
use crate::slack::fetch::{Clock, Fetcher};
use crate::slack::types::{ChannelInfo, FileRef, Message};
use crate::vault::checkpoint::Checkpoint;
use crate::vault::corpus::{self, MessageStore};
use crate::vault::util::text_preview;

pub const HISTORY_PAGE_LIMIT: u32 = 1000;
const PAGE_THROTTLE: Duration = Duration::from_millis(1200);
const LOG_PREVIEW_WORDS: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncMode {
    Backfill,
    Incremental,
}

impl SyncMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Backfill => "backfill",
            Self::Incremental => "incremental",
        }
    }
}

#[derive(Debug, Clone)]
pub struct SyncOutcome {
    pub mode: SyncMode,
    pub messages_total: usize,
    pub messages_added: usize,
    /// Attachments of newly merged messages, ascending by position key.
    /// Files seen in prior runs never reappear here.
    pub new_files: Vec<FileRef>,
    pub checkpoint: Checkpoint,
}

pub fn sync_channel<C: SlackClient>(
    fetcher: &Fetcher<C>,
    store: &MessageStore,
    channel: &ChannelInfo,
    checkpoint: &Checkpoint,
) -> Result<SyncOutcome> {
    if checkpoint.backfilled {
        incremental_sync(fetcher, store, channel, checkpoint)
    } else {
        full_backfill(fetcher, store, channel)
    }
}

fn throttle(clock: &dyn Clock, started: Duration) {
    let elapsed = clock.monotonic().saturating_sub(started);
    if elapsed < PAGE_THROTTLE {
        clock.sleep(PAGE_THROTTLE - elapsed);
    }
}

fn log_batch(channel: &ChannelInfo, batch: &[Message], report: &corpus::MergeReport) {
    if let (Some(newest), Some(oldest)) = (batch.first(), batch.last()) {
        logging::info(
            "batch_fetched",
            &[
                ("channel", channel.name.clone()),
                ("messages", batch.len().to_string()),
                ("duplicates", report.duplicates.to_string()),
                ("ts_from", oldest.ts.clone()),
                ("ts_to", newest.ts.clone()),
            ],
        );
    }
    for msg in batch {
        let event = if report.added.contains(&msg.ts) {
            "message_saved"
        } else {
            "message_deduplicated"
        };
        logging::info(
            event,
            &[
                ("channel", channel.name.clone()),
                ("ts", msg.ts.clone()),
                (
                    "preview",
                    text_preview(msg.text.as_deref().unwrap_or(""), LOG_PREVIEW_WORDS),
                ),
            ],
        );
    }
}

/// Fetch the entire history, newest first, merging and persisting page by
/// page. The backfilled flag flips only after the final merge-and-save, so
/// an interrupted run retries from scratch and re-merges idempotently.
fn full_backfill<C: SlackClient>(
    fetcher: &Fetcher<C>,
    store: &MessageStore,
    channel: &ChannelInfo,
) -> Result<SyncOutcome> {
    let mut messages = store.load()?;
    let mut cursor: Option<String> = None;
    let mut added_messages: Vec<Message> = Vec::new();

    loop {
        logging::info(
            "backfill_page",
            &[
                ("channel", channel.name.clone()),
                ("cursor", cursor.clone().unwrap_or_else(|| "start".to_string())),
            ],
        );
        let started = fetcher.clock().monotonic();
        let request = HistoryRequest {
            channel: channel.id.clone(),
            cursor: cursor.clone(),
            oldest: None,
            latest: None,
            limit: HISTORY_PAGE_LIMIT,
        };
        let Some(page) = fetcher.history_page(&request) else {
            break;
        };
        if page.messages.is_empty() {
            logging::info("backfill_exhausted", &[("channel", channel.name.clone())]);
            break;
        }

        let report = store.merge_and_save(&messages, &page.messages)?;
        log_batch(channel, &page.messages, &report);
        added_messages.extend(
            page.messages
                .iter()
                .filter(|m| report.added.contains(&m.ts))
                .cloned(),
        );
        messages = report.merged;

        cursor = page.next_cursor;
        throttle(fetcher.clock(), started);
        if cursor.is_none() {
            break;
        }
    }

    // merge keeps the corpus ordered; re-sort anyway before trusting the tail
    messages.sort_by(|a, b| corpus::ts_value(&a.ts).total_cmp(&corpus::ts_value(&b.ts)));
    let latest_ts = messages.last().map(|m| m.ts.clone());

    logging::info(
        "backfill_complete",
        &[
            ("channel", channel.name.clone()),
            ("messages", messages.len().to_string()),
            ("added", added_messages.len().to_string()),
        ],
    );
    Ok(SyncOutcome {
        mode: SyncMode::Backfill,
        messages_total: messages.len(),
        messages_added: added_messages.len(),
        new_files: collect_new_files(added_messages),
        checkpoint: Checkpoint {
            backfilled: true,
            latest_ts,
        },
    })
}

/// Fetch only messages strictly newer than the checkpointed position. An
/// empty result leaves the checkpoint untouched.
fn incremental_sync<C: SlackClient>(
    fetcher: &Fetcher<C>,
    store: &MessageStore,
    channel: &ChannelInfo,
    checkpoint: &Checkpoint,
) -> Result<SyncOutcome> {
    let mut messages = store.load()?;
    let anchor = checkpoint
        .latest_ts
        .clone()
        .or_else(|| messages.last().map(|m| m.ts.clone()));
    let Some(oldest) = anchor else {
        // backfilled with no position on record and an empty corpus: nothing
        // to anchor a forward fetch on
        logging::info("incremental_no_anchor", &[("channel", channel.name.clone())]);
        return Ok(SyncOutcome {
            mode: SyncMode::Incremental,
            messages_total: messages.len(),
            messages_added: 0,
            new_files: Vec::new(),
            checkpoint: checkpoint.clone(),
        });
    };

    let mut cursor: Option<String> = None;
    let mut added_messages: Vec<Message> = Vec::new();
    let mut fetched_any = false;

    loop {
        logging::info(
            "incremental_page",
            &[
                ("channel", channel.name.clone()),
                ("newer_than", oldest.clone()),
            ],
        );
        let started = fetcher.clock().monotonic();
        let request = HistoryRequest {
            channel: channel.id.clone(),
            cursor: cursor.clone(),
            oldest: Some(oldest.clone()),
            latest: None,
            limit: HISTORY_PAGE_LIMIT,
        };
        let Some(page) = fetcher.history_page(&request) else {
            break;
        };
        if page.messages.is_empty() {
            break;
        }
        fetched_any = true;

        let report = store.merge_and_save(&messages, &page.messages)?;
        log_batch(channel, &page.messages, &report);
        added_messages.extend(
            page.messages
                .iter()
                .filter(|m| report.added.contains(&m.ts))
                .cloned(),
        );
        messages = report.merged;

        cursor = page.next_cursor;
        throttle(fetcher.clock(), started);
        if cursor.is_none() {
            break;
        }
    }

    let checkpoint = if fetched_any {
        Checkpoint {
            backfilled: true,
            latest_ts: messages.last().map(|m| m.ts.clone()).or_else(|| checkpoint.latest_ts.clone()),
        }
    } else {
        logging::info("no_new_messages", &[("channel", channel.name.clone())]);
        checkpoint.clone()
    };

    Ok(SyncOutcome {
        mode: SyncMode::Incremental,
        messages_total: messages.len(),
        messages_added: added_messages.len(),
        new_files: collect_new_files(added_messages),
        checkpoint,
    })
}

fn collect_new_files(mut added_messages: Vec<Message>) -> Vec<FileRef> {
    added_messages.sort_by(|a, b| corpus::ts_value(&a.ts).total_cmp(&corpus::ts_value(&b.ts)));
    added_messages
        .into_iter()
        .flat_map(|m| m.files)
        .collect()
}
