/// Message and draft types shared by the history, streaming and translation layers
use crate::error::{ChatError, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

/// One direct message. Validated on construction and on decode, immutable afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawMessage")]
pub struct Message {
    sender: String,
    recipient: String,
    content: String,
    /// RFC3339 timestamp as received or produced
    timestamp: String,
}

/// Wire shape before validation
#[derive(Deserialize)]
struct RawMessage {
    #[serde(default)]
    sender: String,
    #[serde(default)]
    recipient: String,
    content: String,
    timestamp: String,
}

impl TryFrom<RawMessage> for Message {
    type Error = ChatError;

    fn try_from(raw: RawMessage) -> Result<Self> {
        Message::new(raw.sender, raw.recipient, raw.content, raw.timestamp)
    }
}

impl Message {
    pub fn new(
        sender: impl Into<String>,
        recipient: impl Into<String>,
        content: impl Into<String>,
        timestamp: impl Into<String>,
    ) -> Result<Self> {
        let content = content.into();
        let timestamp = timestamp.into();

        if content.trim().is_empty() {
            return Err(ChatError::InvalidMessage("content is empty".to_string()));
        }
        DateTime::parse_from_rfc3339(&timestamp).map_err(|e| {
            ChatError::InvalidMessage(format!("malformed timestamp {:?}: {}", timestamp, e))
        })?;

        Ok(Self {
            sender: sender.into(),
            recipient: recipient.into(),
            content,
            timestamp,
        })
    }

    /// Build a message stamped with the current time
    pub fn now(
        sender: impl Into<String>,
        recipient: impl Into<String>,
        content: impl Into<String>,
    ) -> Result<Self> {
        Self::new(sender, recipient, content, now_timestamp())
    }

    pub fn sender(&self) -> &str {
        &self.sender
    }

    pub fn recipient(&self) -> &str {
        &self.recipient
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn timestamp(&self) -> &str {
        &self.timestamp
    }

    /// Identity used to recognise the server echo of a local send
    pub(crate) fn echo_key(&self) -> (String, String, String) {
        (
            self.sender.clone(),
            self.timestamp.clone(),
            self.content.clone(),
        )
    }
}

/// UTC, millisecond precision, `Z` suffix
pub fn now_timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Composition state of the input box
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Draft {
    text: String,
    translated: Option<String>,
}

impl Draft {
    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn translated(&self) -> Option<&str> {
        self.translated.as_deref()
    }

    /// Replace the raw text. A translation of different text is discarded.
    pub fn set_text(&mut self, text: impl Into<String>) {
        let text = text.into();
        if text != self.text {
            self.translated = None;
        }
        self.text = text;
    }

    pub fn set_translation(&mut self, translated: impl Into<String>) {
        self.translated = Some(translated.into());
    }

    /// Translated text if present, else the raw text
    pub fn effective_content(&self) -> &str {
        match self.translated.as_deref() {
            Some(t) if !t.trim().is_empty() => t,
            _ => &self.text,
        }
    }

    pub fn is_blank(&self) -> bool {
        self.effective_content().trim().is_empty()
    }

    pub fn clear(&mut self) {
        self.text.clear();
        self.translated = None;
    }
}
