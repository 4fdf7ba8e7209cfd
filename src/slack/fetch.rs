//! Retrying fetch layer.
//!
//! One retry loop serves every API call. The shape of the wait is selected
//! by error classification: rate limits sleep the server-advised delay and
//! retry forever, transport faults sleep a capped linear backoff and retry
//! forever, anything else abandons the call. "Abandoned" surfaces as `None`,
//! which pagination loops treat as end-of-data.

use std::time::{Duration, Instant};

use super::api::{ApiError, ChannelPage, HistoryPage, HistoryRequest, SlackClient, UserPage};
use crate::logging;
use crate::slack::types::{ChannelInfo, UserInfo};

pub const DEFAULT_RATE_LIMIT_DELAY_SECS: u64 = 30;
const TRANSPORT_BACKOFF_STEP_SECS: u64 = 5;
const TRANSPORT_BACKOFF_CAP_SECS: u64 = 60;

const CHANNEL_PAGE_LIMIT: u32 = 100;
const USER_PAGE_LIMIT: u32 = 200;

/// Time source for retry delays and page throttling. Injected so tests run
/// the full retry schedule without real sleeping.
pub trait Clock {
    /// Monotonic reading used for round-trip accounting.
    fn monotonic(&self) -> Duration;
    fn sleep(&self, delay: Duration);
}

#[derive(Debug)]
pub struct SystemClock {
    started: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn monotonic(&self) -> Duration {
        self.started.elapsed()
    }

    fn sleep(&self, delay: Duration) {
        std::thread::sleep(delay);
    }
}

fn retry_delay(error: &ApiError, transport_attempts: u64) -> Option<Duration> {
    match error {
        ApiError::RateLimited { retry_after_secs } => Some(Duration::from_secs(
            retry_after_secs.unwrap_or(DEFAULT_RATE_LIMIT_DELAY_SECS),
        )),
        ApiError::Transport(_) => Some(Duration::from_secs(
            (TRANSPORT_BACKOFF_STEP_SECS * transport_attempts).min(TRANSPORT_BACKOFF_CAP_SECS),
        )),
        ApiError::Api(_) => None,
    }
}

pub struct Fetcher<C> {
    client: C,
    clock: Box<dyn Clock>,
}

impl<C: SlackClient> Fetcher<C> {
    pub fn new(client: C, clock: Box<dyn Clock>) -> Self {
        Self { client, clock }
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    pub fn clock(&self) -> &dyn Clock {
        self.clock.as_ref()
    }

    /// Run one API call to completion: retry through rate limits and
    /// transport faults, give up only on a non-retryable API error.
    fn robust<T>(
        &self,
        call: &str,
        channel: &str,
        attempt: impl Fn(&C) -> Result<T, ApiError>,
    ) -> Option<T> {
        let mut transport_attempts = 0u64;
        loop {
            logging::info(
                "api_call",
                &[("call", call.to_string()), ("channel", channel.to_string())],
            );
            match attempt(&self.client) {
                Ok(value) => {
                    logging::info(
                        "api_call_ok",
                        &[("call", call.to_string()), ("channel", channel.to_string())],
                    );
                    return Some(value);
                }
                Err(err) => {
                    if matches!(err, ApiError::Transport(_)) {
                        transport_attempts += 1;
                    }
                    match retry_delay(&err, transport_attempts) {
                        Some(delay) => {
                            logging::warn(
                                "api_call_retry",
                                &[
                                    ("call", call.to_string()),
                                    ("channel", channel.to_string()),
                                    ("delay_secs", delay.as_secs().to_string()),
                                    ("reason", err.to_string()),
                                ],
                            );
                            self.clock.sleep(delay);
                        }
                        None => {
                            logging::error(
                                "api_call_unavailable",
                                &[
                                    ("call", call.to_string()),
                                    ("channel", channel.to_string()),
                                    ("reason", err.to_string()),
                                ],
                            );
                            return None;
                        }
                    }
                }
            }
        }
    }

    pub fn channels_page(&self, cursor: Option<&str>) -> Option<ChannelPage> {
        self.robust("conversations.list", "", |client| {
            client.list_channels(cursor, CHANNEL_PAGE_LIMIT)
        })
    }

    pub fn history_page(&self, request: &HistoryRequest) -> Option<HistoryPage> {
        self.robust("conversations.history", &request.channel, |client| {
            client.history(request)
        })
    }

    pub fn users_page(&self, cursor: Option<&str>) -> Option<UserPage> {
        self.robust("users.list", "", |client| {
            client.list_users(cursor, USER_PAGE_LIMIT)
        })
    }

    /// Page through every channel visible to the credential. Order is
    /// API-defined and not significant.
    pub fn list_all_channels(&self) -> Vec<ChannelInfo> {
        let mut channels = Vec::new();
        let mut cursor: Option<String> = None;
        loop {
            let Some(page) = self.channels_page(cursor.as_deref()) else {
                break;
            };
            channels.extend(page.channels);
            match page.next_cursor {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }
        channels
    }

    pub fn list_all_users(&self) -> Vec<UserInfo> {
        let mut members = Vec::new();
        let mut cursor: Option<String> = None;
        loop {
            let Some(page) = self.users_page(cursor.as_deref()) else {
                break;
            };
            members.extend(page.members);
            match page.next_cursor {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }
        members
    }
}
