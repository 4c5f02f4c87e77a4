//! services/api/src/adapters/mail_bridge.rs
//!
//! `ItemSource` backed by the mail bridge HTTP service, which owns the actual
//! mailbox connection and performs unsubscribes.
//!
//! Endpoints:
//! - `GET  {base}/items?limit=N` returns a JSON array of items.
//! - `POST {base}/items/{id}/decision` with `{ "action": ... }`.

use std::time::Duration;

use async_trait::async_trait;
use inbox_triage_core::domain::{DecisionAction, Item};
use inbox_triage_core::ports::{ItemSource, PortError, PortResult};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use reqwest::{Client, StatusCode};
use serde::Serialize;
use tracing::debug;

use crate::error::ApiError;

#[derive(Serialize)]
struct DecisionPayload<'a> {
    action: &'a DecisionAction,
}

#[derive(Debug, Clone)]
pub struct MailBridgeSource {
    client: Client,
    base_url: String,
}

impl MailBridgeSource {
    pub fn new(base_url: &str, token: Option<&str>) -> Result<Self, ApiError> {
        let mut headers = HeaderMap::new();
        if let Some(token) = token {
            let value = HeaderValue::from_str(&format!("Bearer {token}"))
                .map_err(|e| ApiError::Internal(format!("invalid MAIL_BRIDGE_TOKEN: {e}")))?;
            headers.insert(AUTHORIZATION, value);
        }
        let client = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(15))
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

fn map_status(status: StatusCode, what: &str) -> PortError {
    match status {
        StatusCode::NOT_FOUND => PortError::NotFound(what.to_string()),
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => PortError::Unauthorized,
        _ => PortError::Unexpected(format!("mail bridge returned {status} for {what}")),
    }
}

fn transport(e: reqwest::Error) -> PortError {
    PortError::Unexpected(format!("mail bridge request failed: {e}"))
}

#[async_trait]
impl ItemSource for MailBridgeSource {
    async fn fetch_batch(&self, limit: usize) -> PortResult<Vec<Item>> {
        let response = self
            .client
            .get(self.url("/items"))
            .query(&[("limit", limit)])
            .send()
            .await
            .map_err(transport)?;
        let status = response.status();
        if !status.is_success() {
            return Err(map_status(status, "item batch"));
        }
        let mut items: Vec<Item> = response.json().await.map_err(transport)?;
        items.truncate(limit);
        debug!(count = items.len(), "Fetched item batch.");
        Ok(items)
    }

    async fn send_decision(&self, item_id: &str, action: &DecisionAction) -> PortResult<()> {
        let response = self
            .client
            .post(self.url(&format!("/items/{item_id}/decision")))
            .json(&DecisionPayload { action })
            .send()
            .await
            .map_err(transport)?;
        let status = response.status();
        if !status.is_success() {
            return Err(map_status(status, &format!("item {item_id}")));
        }
        Ok(())
    }
}
