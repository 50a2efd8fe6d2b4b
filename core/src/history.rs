/// Message history: one read request per conversation, no pagination
use crate::config::Config;
use crate::error::{ChatError, Result};
use crate::message::Message;
use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;
use tracing::{debug, warn};

#[async_trait]
pub trait HistoryLoader: Send + Sync {
    /// Server-side message set for the conversation with `recipient`
    async fn load_history(&self, recipient: &str) -> Result<Vec<Message>>;
}

/// `GET {api}/api/chat-rooms?{recipient}`, JSON array of messages
#[derive(Clone)]
pub struct HttpHistoryLoader {
    client: Client,
    config: Config,
    timeout: Duration,
}

impl HttpHistoryLoader {
    pub fn new(client: Client, config: &Config) -> Self {
        Self {
            client,
            config: config.clone(),
            timeout: config.request_timeout,
        }
    }
}

#[async_trait]
impl HistoryLoader for HttpHistoryLoader {
    async fn load_history(&self, recipient: &str) -> Result<Vec<Message>> {
        let url = self.config.history_url(recipient);
        debug!("Loading history from {}", url);

        let response = self
            .client
            .get(&url)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| ChatError::History(format!("request to {} failed: {}", url, e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(ChatError::History(format!(
                "history API error ({}): {}",
                status, body
            )));
        }

        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| ChatError::History(format!("unreadable history body: {}", e)))?;

        parse_history(body)
    }
}

/// Keep every valid record in server order; drop the rest
pub fn parse_history(body: serde_json::Value) -> Result<Vec<Message>> {
    let records = match body {
        serde_json::Value::Array(records) => records,
        other => {
            return Err(ChatError::History(format!(
                "expected a JSON array, got {}",
                json_kind(&other)
            )))
        }
    };

    let total = records.len();
    let messages: Vec<Message> = records
        .into_iter()
        .filter_map(|record| match serde_json::from_value::<Message>(record) {
            Ok(message) => Some(message),
            Err(e) => {
                warn!("Dropping invalid history record: {}", e);
                None
            }
        })
        .collect();

    debug!("History: {}/{} records usable", messages.len(), total);
    Ok(messages)
}

fn json_kind(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "a boolean",
        serde_json::Value::Number(_) => "a number",
        serde_json::Value::String(_) => "a string",
        serde_json::Value::Array(_) => "an array",
        serde_json::Value::Object(_) => "an object",
    }
}
