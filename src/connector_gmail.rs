//! Gmail REST connector.
//!
//! Implements [`MessageSource`] against the Gmail v1 API:
//!
//! | Call | Endpoint |
//! |------|----------|
//! | `list_messages` | `GET {api_base}/messages?q=..&maxResults=..&pageToken=..` |
//! | `get_message` | `GET {api_base}/messages/{id}?format=full` |
//!
//! # Configuration
//!
//! ```toml
//! [source]
//! provider = "gmail"
//! api_base = "https://gmail.googleapis.com/gmail/v1/users/me"
//! token_env = "GMAIL_ACCESS_TOKEN"
//! ```
//!
//! # Authentication
//!
//! An OAuth access token with the `gmail.readonly` scope is read from the
//! environment variable named by `token_env` and sent as a bearer token.
//! HTTP 401 and 403 map to [`SourceError::Unauthorized`]; any other non-2xx
//! status maps to [`SourceError::Http`]. Nothing is retried.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;

use billcast_core::models::{ListPage, MessageRef, RawMessage};
use billcast_core::source::MessageSource;

use crate::config::SourceConfig;
use crate::error::SourceError;

/// A Gmail mailbox reached over HTTPS.
pub struct GmailSource {
    client: reqwest::Client,
    api_base: String,
    token: String,
}

impl GmailSource {
    pub fn new(api_base: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_base: api_base.into().trim_end_matches('/').to_string(),
            token: token.into(),
        }
    }

    /// Build a source from `[source]`, reading the token from the
    /// configured environment variable.
    pub fn from_config(config: &SourceConfig) -> Result<Self> {
        let token = std::env::var(&config.token_env)
            .with_context(|| format!("{} environment variable not set", config.token_env))?;
        Ok(Self::new(config.api_base.clone(), token))
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, String)],
    ) -> Result<T, SourceError> {
        let resp = self
            .client
            .get(url)
            .bearer_auth(&self.token)
            .query(query)
            .send()
            .await?;

        let status = resp.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN
        {
            return Err(SourceError::Unauthorized);
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(SourceError::Http {
                status: status.as_u16(),
                body: body.chars().take(500).collect(),
            });
        }

        let text = resp.text().await?;
        serde_json::from_str(&text).map_err(|e| SourceError::Decode(e.to_string()))
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListResponse {
    #[serde(default)]
    messages: Vec<MessageRef>,
    #[serde(default)]
    next_page_token: Option<String>,
    #[serde(default)]
    result_size_estimate: u64,
}

#[async_trait]
impl MessageSource for GmailSource {
    fn name(&self) -> &str {
        "gmail"
    }

    async fn list_messages(
        &self,
        query: &str,
        page_size: u32,
        cursor: Option<&str>,
    ) -> Result<ListPage> {
        let url = format!("{}/messages", self.api_base);
        let mut params = vec![("q", query.to_string()), ("maxResults", page_size.to_string())];
        if let Some(token) = cursor {
            params.push(("pageToken", token.to_string()));
        }

        let resp: ListResponse = self.get_json(&url, &params).await?;
        Ok(ListPage {
            messages: resp.messages,
            next_cursor: resp.next_page_token.filter(|t| !t.is_empty()),
            result_size_estimate: resp.result_size_estimate,
        })
    }

    async fn get_message(&self, id: &str) -> Result<RawMessage> {
        let url = format!("{}/messages/{}", self.api_base, id);
        let message: RawMessage = self
            .get_json(&url, &[("format", "full".to_string())])
            .await?;
        Ok(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_list_response_shape() {
        let json = r#"{
            "messages": [{"id": "18c1", "threadId": "18c1"}],
            "nextPageToken": "0123",
            "resultSizeEstimate": 201
        }"#;
        let resp: ListResponse = serde_json::from_str(json).unwrap();
        assert_eq!(resp.messages[0].id, "18c1");
        assert_eq!(resp.next_page_token.as_deref(), Some("0123"));
        assert_eq!(resp.result_size_estimate, 201);
    }

    #[test]
    fn test_empty_list_response() {
        let resp: ListResponse = serde_json::from_str(r#"{"resultSizeEstimate": 0}"#).unwrap();
        assert!(resp.messages.is_empty());
        assert!(resp.next_page_token.is_none());
    }

    #[test]
    fn test_full_message_shape() {
        let json = r#"{
            "id": "18c1",
            "threadId": "18c1",
            "payload": {
                "mimeType": "multipart/alternative",
                "headers": [{"name": "Subject", "value": "Your bill"}],
                "body": {"size": 0},
                "parts": [
                    {"mimeType": "text/plain", "body": {"size": 9, "data": "VG90YWw6ICQ1"}}
                ]
            }
        }"#;
        let msg: RawMessage = serde_json::from_str(json).unwrap();
        assert_eq!(msg.header("subject"), Some("Your bill"));
        assert_eq!(msg.payload.parts[0].inline_data(), Some("VG90YWw6ICQ1"));
    }

    #[test]
    fn test_trailing_slash_trimmed() {
        let source = GmailSource::new("http://localhost:1/users/me/", "t");
        assert_eq!(source.api_base, "http://localhost:1/users/me");
    }
}
