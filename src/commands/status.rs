use anyhow::Result;
use std::fs;

use crate::cli::StatusArgs;
use crate::commands::CommandReport;
use crate::vault::checkpoint;
use crate::vault::corpus::MessageStore;
use crate::vault::paths;

pub fn run(args: &StatusArgs) -> Result<CommandReport> {
    let paths = paths::resolve_paths(args.root_dir.as_deref())?;
    let mut report = CommandReport::new("status");

    report.detail(format!("root_dir={}", paths.root_dir.display()));
    report.detail(format!("build={}", env!("BUILD_UUID")));

    let ledger_file = paths.checkpoint_file();
    if !ledger_file.exists() {
        report.detail("ledger=absent");
        return Ok(report);
    }

    let ledger = checkpoint::load(&ledger_file)?;
    report.detail(format!("channels_tracked={}", ledger.len()));
    for (id, entry) in &ledger {
        report.detail(format!(
            "channel={id} backfilled={} latest_ts={}",
            entry.backfilled,
            entry.latest_ts.as_deref().unwrap_or("-")
        ));
    }

    for entry in fs::read_dir(&paths.root_dir)? {
        let dir = entry?.path();
        if !dir.is_dir() {
            continue;
        }
        let messages_file = dir.join("messages.json");
        if !messages_file.exists() {
            continue;
        }
        let name = dir
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("?")
            .to_string();
        match MessageStore::new(messages_file, true).load() {
            Ok(messages) => {
                report.detail(format!("corpus={name} messages={}", messages.len()));
            }
            Err(err) => {
                report.issue(format!("corpus={name} unreadable: {err:#}"));
            }
        }
    }

    Ok(report)
}
