//! Abstract API surface consumed by the engine.
//!
//! A [`SlackClient`] performs exactly one attempt per call and classifies
//! failures into the three kinds the retry layer distinguishes. The HTTP
//! implementation lives in [`crate::slack::http`]; tests substitute scripted
//! clients.

use thiserror::Error;

use super::types::{ChannelInfo, Message, UserInfo};

#[derive(Debug, Clone, Error)]
pub enum ApiError {
    /// Server asked us to back off; retried indefinitely with the advertised
    /// delay.
    #[error("rate limited (retry after {retry_after_secs:?}s)")]
    RateLimited { retry_after_secs: Option<u64> },
    /// Transient transport fault; retried indefinitely with capped linear
    /// backoff.
    #[error("transport failure: {0}")]
    Transport(String),
    /// Any other API-level error; the call is abandoned and the caller treats
    /// it as end-of-data.
    #[error("api error: {0}")]
    Api(String),
}

#[derive(Debug, Clone, Default)]
pub struct ChannelPage {
    pub channels: Vec<ChannelInfo>,
    pub next_cursor: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct HistoryPage {
    pub messages: Vec<Message>,
    pub next_cursor: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct UserPage {
    pub members: Vec<UserInfo>,
    pub next_cursor: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct HistoryRequest {
    pub channel: String,
    pub cursor: Option<String>,
    /// Lower position bound: only messages newer than this key are returned.
    pub oldest: Option<String>,
    /// Upper position bound: only messages older than this key are returned.
    pub latest: Option<String>,
    pub limit: u32,
}

pub trait SlackClient {
    fn list_channels(&self, cursor: Option<&str>, limit: u32) -> Result<ChannelPage, ApiError>;
    fn history(&self, request: &HistoryRequest) -> Result<HistoryPage, ApiError>;
    fn list_users(&self, cursor: Option<&str>, limit: u32) -> Result<UserPage, ApiError>;
}
