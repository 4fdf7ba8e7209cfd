use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use crate::commands::{self, CommandReport};

#[derive(Debug, Parser)]
#[command(
    name = "chanvault",
    version,
    about = "Archive a chat workspace's channels, messages, and files to local storage"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run one full export pass over all selected channels, then exit.
    Export(ExportArgs),
    /// Report ledger and corpus state without touching the network.
    Status(StatusArgs),
}

#[derive(Debug, Clone, Args)]
pub struct ExportArgs {
    /// Root directory where export data is written (default: CHANVAULT_ROOT or cwd).
    #[arg(long)]
    pub root_dir: Option<PathBuf>,
    /// Fetch and log, but write no messages, files, or checkpoints.
    #[arg(long)]
    pub dry_run: bool,
    /// Skip fetching users and avatars.
    #[arg(long)]
    pub skip_users: bool,
}

#[derive(Debug, Clone, Args)]
pub struct StatusArgs {
    /// Root directory to inspect (default: CHANVAULT_ROOT or cwd).
    #[arg(long)]
    pub root_dir: Option<PathBuf>,
}

pub fn run() -> Result<()> {
    let cli = Cli::parse();
    let report = match cli.command {
        Command::Export(args) => commands::export::run(&args)?,
        Command::Status(args) => commands::status::run(&args)?,
    };
    print_report(&report)
}

fn print_report(report: &CommandReport) -> Result<()> {
    for line in &report.details {
        println!("{}: {line}", report.command);
    }
    for line in &report.issues {
        eprintln!("{}: issue: {line}", report.command);
    }
    if report.ok {
        Ok(())
    } else {
        anyhow::bail!("{} completed with issues", report.command)
    }
}
