use anyhow::{Context, Result};
use reqwest::blocking::Client;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::time::Duration;

use super::api::{ApiError, ChannelPage, HistoryPage, HistoryRequest, SlackClient, UserPage};
use crate::vault::files::FileFetcher;

pub const DEFAULT_BASE_URL: &str = "https://slack.com/api";
const REQUEST_TIMEOUT_SECS: u64 = 30;

// no Debug derive: the struct holds the bearer token
pub struct HttpSlackClient {
    client: Client,
    base_url: String,
    token: String,
}

impl HttpSlackClient {
    pub fn new(token: &str) -> Result<Self> {
        Self::with_base_url(token, DEFAULT_BASE_URL)
    }

    pub fn with_base_url(token: &str, base_url: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .context("failed to build http client")?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.to_string(),
        })
    }

    fn call(&self, method: &str, params: &[(&str, String)]) -> Result<Value, ApiError> {
        let url = format!("{}/{}", self.base_url, method);
        let response = self
            .client
            .get(&url)
            .bearer_auth(&self.token)
            .query(params)
            .send()
            .map_err(|err| ApiError::Transport(err.to_string()))?;

        let status = response.status();
        if status.as_u16() == 429 {
            let retry_after_secs = response
                .headers()
                .get("Retry-After")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<u64>().ok());
            return Err(ApiError::RateLimited { retry_after_secs });
        }
        if !status.is_success() {
            return Err(ApiError::Api(format!("http status {status}")));
        }

        let body: Value = response
            .json()
            .map_err(|err| ApiError::Transport(err.to_string()))?;
        if body.get("ok").and_then(Value::as_bool) != Some(true) {
            let kind = body
                .get("error")
                .and_then(Value::as_str)
                .unwrap_or("unknown_error");
            if kind == "ratelimited" {
                return Err(ApiError::RateLimited {
                    retry_after_secs: None,
                });
            }
            return Err(ApiError::Api(kind.to_string()));
        }
        Ok(body)
    }
}

fn next_cursor(body: &Value) -> Option<String> {
    let cursor = body.get("response_metadata")?.get("next_cursor")?.as_str()?;
    let trimmed = cursor.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

fn decode_list<T: DeserializeOwned>(body: &Value, key: &str) -> Result<Vec<T>, ApiError> {
    let Some(items) = body.get(key) else {
        return Err(ApiError::Api(format!("response missing `{key}` array")));
    };
    serde_json::from_value(items.clone())
        .map_err(|err| ApiError::Api(format!("failed to decode `{key}`: {err}")))
}

impl SlackClient for HttpSlackClient {
    fn list_channels(&self, cursor: Option<&str>, limit: u32) -> Result<ChannelPage, ApiError> {
        let mut params = vec![
            ("types", "public_channel,private_channel".to_string()),
            ("limit", limit.to_string()),
        ];
        if let Some(cursor) = cursor {
            params.push(("cursor", cursor.to_string()));
        }
        let body = self.call("conversations.list", &params)?;
        Ok(ChannelPage {
            channels: decode_list(&body, "channels")?,
            next_cursor: next_cursor(&body),
        })
    }

    fn history(&self, request: &HistoryRequest) -> Result<HistoryPage, ApiError> {
        let mut params = vec![
            ("channel", request.channel.clone()),
            ("limit", request.limit.to_string()),
        ];
        if let Some(cursor) = &request.cursor {
            params.push(("cursor", cursor.clone()));
        }
        if let Some(oldest) = &request.oldest {
            params.push(("oldest", oldest.clone()));
        }
        if let Some(latest) = &request.latest {
            params.push(("latest", latest.clone()));
        }
        let body = self.call("conversations.history", &params)?;
        Ok(HistoryPage {
            messages: decode_list(&body, "messages")?,
            next_cursor: next_cursor(&body),
        })
    }

    fn list_users(&self, cursor: Option<&str>, limit: u32) -> Result<UserPage, ApiError> {
        let mut params = vec![("limit", limit.to_string())];
        if let Some(cursor) = cursor {
            params.push(("cursor", cursor.to_string()));
        }
        let body = self.call("users.list", &params)?;
        Ok(UserPage {
            members: decode_list(&body, "members")?,
            next_cursor: next_cursor(&body),
        })
    }
}

impl FileFetcher for HttpSlackClient {
    fn fetch_bytes(&self, url: &str, authenticated: bool) -> Result<Vec<u8>> {
        let mut request = self.client.get(url);
        if authenticated {
            request = request.bearer_auth(&self.token);
        }
        let response = request
            .send()
            .with_context(|| format!("request to {url} failed"))?;
        if !response.status().is_success() {
            anyhow::bail!("http status {} for {url}", response.status());
        }
        let bytes = response
            .bytes()
            .with_context(|| format!("failed to read body from {url}"))?;
        Ok(bytes.to_vec())
    }
}
