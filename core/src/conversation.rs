/// In-memory message sequence of one conversation.
/// Frugal: append-only vector, nothing is persisted past the session.
use crate::message::Message;
use std::collections::HashMap;

/// Outcome of appending an inbound message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Appended {
    Added,
    /// Server echo of one of our optimistic sends
    EchoSuppressed,
}

#[derive(Debug, Clone)]
pub struct Conversation {
    local: String,
    recipient: String,
    messages: Vec<Message>,
    /// Optimistic sends not yet seen again on the stream, keyed by (sender, timestamp, content)
    pending_echoes: HashMap<(String, String, String), usize>,
}

impl Conversation {
    pub fn new(local: impl Into<String>, recipient: impl Into<String>) -> Self {
        Self {
            local: local.into(),
            recipient: recipient.into(),
            messages: Vec::new(),
            pending_echoes: HashMap::new(),
        }
    }

    pub fn local(&self) -> &str {
        &self.local
    }

    pub fn recipient(&self) -> &str {
        &self.recipient
    }

    /// Merge fetched history. Appended after whatever is already present.
    pub fn extend_history(&mut self, history: impl IntoIterator<Item = Message>) -> usize {
        let before = self.messages.len();
        self.messages.extend(history);
        self.messages.len() - before
    }

    /// Append a message received on the stream
    pub fn append_inbound(&mut self, message: Message) -> Appended {
        if message.sender() == self.local {
            let key = message.echo_key();
            if let Some(count) = self.pending_echoes.get_mut(&key) {
                *count -= 1;
                if *count == 0 {
                    self.pending_echoes.remove(&key);
                }
                return Appended::EchoSuppressed;
            }
        }
        self.messages.push(message);
        Appended::Added
    }

    /// Optimistic append of a message we are about to send
    pub fn append_local(&mut self, message: Message) {
        *self.pending_echoes.entry(message.echo_key()).or_insert(0) += 1;
        self.messages.push(message);
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}
