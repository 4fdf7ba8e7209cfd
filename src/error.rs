use thiserror::Error;

#[derive(Debug, Error)]
pub enum VaultError {
    #[error("missing credential: set SLACK_BOT_TOKEN in the environment or .env")]
    MissingToken,
    #[error("another export already holds the lock on this root: {0}")]
    RootLocked(String),
    #[error("checkpoint ledger unreadable: {0}")]
    CorruptLedger(String),
}
