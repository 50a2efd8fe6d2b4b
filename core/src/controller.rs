/// Conversation controller: ties identity, history, streaming and translation
/// into one direct-message session.
///
/// States: `Idle -> Loading -> Active -> Closed`. Every mutation of the
/// conversation happens under one write lock, so inbound appends and local
/// optimistic appends never interleave.
use crate::config::Config;
use crate::conversation::{Appended, Conversation};
use crate::error::{ChatError, Result};
use crate::history::{HistoryLoader, HttpHistoryLoader};
use crate::identity::Identity;
use crate::message::{Draft, Message};
use crate::realtime::{Connection, ConnectionManager, Inbound, RetryingConnector, WsConnector};
use crate::session_store::SessionStore;
use crate::translation::{HttpTranslator, Translator};
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::{broadcast, watch, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Lifecycle of a conversation screen
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationState {
    /// No identity/recipient resolved yet
    Idle,
    /// History fetch and connection open in flight
    Loading,
    /// Receiving and sending (possibly degraded)
    Active,
    /// Torn down, connection released
    Closed,
}

/// Why an active conversation is degraded
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationHealth {
    pub history_error: Option<String>,
    pub connection_error: Option<String>,
}

impl ConversationHealth {
    pub fn is_degraded(&self) -> bool {
        self.history_error.is_some() || self.connection_error.is_some()
    }
}

/// Events for whatever renders the conversation
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ConversationEvent {
    StateChanged { state: ConversationState },
    /// A message was added to the sequence (history, inbound or local)
    MessageAppended { message: Message },
    HistoryFailed { error: String },
    ConnectionFailed { error: String },
    /// The stream ended without us closing it
    ConnectionLost,
    SendFailed { error: String },
    TranslationFailed { error: String },
    /// Server echo of our own send, not appended twice
    EchoSuppressed { message: Message },
}

/// Collaborators injected into every conversation
#[derive(Clone)]
pub struct ChatContext {
    pub session: Arc<dyn SessionStore>,
    pub connections: ConnectionManager,
    pub history: Arc<dyn HistoryLoader>,
    pub translator: Arc<dyn Translator>,
    pub target_lang: String,
    pub event_buffer: usize,
}

impl ChatContext {
    /// Wire the HTTP and websocket implementations from configuration
    pub fn from_config(config: &Config, session: Arc<dyn SessionStore>) -> Result<Self> {
        config.validate()?;

        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| ChatError::Config(format!("HTTP client: {}", e)))?;

        let connector = RetryingConnector::new(WsConnector::new(config), config.reconnect.clone());
        let connections =
            ConnectionManager::new(Arc::new(connector)).with_inbound_buffer(config.inbound_buffer);

        Ok(Self {
            session: session.clone(),
            connections,
            history: Arc::new(HttpHistoryLoader::new(client.clone(), config)),
            translator: Arc::new(HttpTranslator::new(client, config, session)),
            target_lang: config.target_lang.clone(),
            event_buffer: config.event_buffer,
        })
    }
}

struct Session {
    state: ConversationState,
    identity: Option<Identity>,
    conversation: Option<Conversation>,
    draft: Draft,
    connection: Option<Connection>,
    pump: Option<JoinHandle<()>>,
    health: ConversationHealth,
}

/// One direct-message conversation with `recipient`
pub struct ConversationController {
    ctx: ChatContext,
    recipient: String,
    session: Arc<RwLock<Session>>,
    events: broadcast::Sender<ConversationEvent>,
    shutdown: watch::Sender<bool>,
}

impl ConversationController {
    pub fn new(ctx: ChatContext, recipient: impl Into<String>) -> Self {
        let (events, _) = broadcast::channel(ctx.event_buffer.max(1));
        let (shutdown, _) = watch::channel(false);
        Self {
            ctx,
            recipient: recipient.into(),
            session: Arc::new(RwLock::new(Session {
                state: ConversationState::Idle,
                identity: None,
                conversation: None,
                draft: Draft::default(),
                connection: None,
                pump: None,
                health: ConversationHealth::default(),
            })),
            events,
            shutdown,
        }
    }

    pub fn recipient(&self) -> &str {
        &self.recipient
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ConversationEvent> {
        self.events.subscribe()
    }

    /// Resolve the identity, then load history and open the stream concurrently.
    ///
    /// Only a missing identity or recipient is fatal. History and connection
    /// failures leave the conversation `Active` but degraded.
    pub async fn open(&self) -> Result<()> {
        let mut shutdown = self.shutdown.subscribe();

        if self.recipient.trim().is_empty() {
            return Err(ChatError::RecipientMissing);
        }

        let identity = {
            let mut session = self.session.write().await;
            if session.state != ConversationState::Idle {
                return Err(ChatError::InvalidState(format!(
                    "open called while {:?}",
                    session.state
                )));
            }
            let identity = Identity::load(self.ctx.session.as_ref()).map_err(|e| {
                warn!("Cannot open conversation with {}: {}", self.recipient, e);
                match e {
                    ChatError::AuthMissing(_) => e,
                    other => ChatError::AuthMissing(other.to_string()),
                }
            })?;
            session.identity = Some(identity.clone());
            session.conversation = Some(Conversation::new(identity.nickname(), &self.recipient));
            self.set_state(&mut session, ConversationState::Loading);
            identity
        };

        info!(
            "Opening conversation {} -> {}",
            identity.nickname(),
            self.recipient
        );

        // Both requests run concurrently; each result is kept as it lands so a
        // close mid-load can still release a connection that already opened.
        let history_fut = self.ctx.history.load_history(&self.recipient);
        let connect_fut = self.ctx.connections.open(&identity);
        tokio::pin!(history_fut, connect_fut);

        let mut history = None;
        let mut connection = None;
        while history.is_none() || connection.is_none() {
            tokio::select! {
                result = &mut history_fut, if history.is_none() => history = Some(result),
                result = &mut connect_fut, if connection.is_none() => connection = Some(result),
                _ = shutdown.changed() => {
                    debug!("Conversation with {} closed while loading", self.recipient);
                    if let Some(Ok(connection)) = connection {
                        self.ctx.connections.close(&connection).await;
                    }
                    return Ok(());
                }
            }
        }
        let (Some(history), Some(connection)) = (history, connection) else {
            return Err(ChatError::InvalidState("loading did not finish".to_string()));
        };

        let mut session = self.session.write().await;
        if session.state == ConversationState::Closed {
            // Closed while the results were in flight: release what arrived
            if let Ok(connection) = connection {
                self.ctx.connections.close(&connection).await;
            }
            return Ok(());
        }

        match history {
            Ok(messages) => {
                let conversation = session
                    .conversation
                    .as_mut()
                    .ok_or_else(|| ChatError::InvalidState("no conversation".to_string()))?;
                conversation.extend_history(messages.iter().cloned());
                debug!("Merged {} history messages", messages.len());
                for message in messages {
                    self.emit(ConversationEvent::MessageAppended { message });
                }
            }
            Err(e) => {
                error!("History for {} failed to load: {}", self.recipient, e);
                session.health.history_error = Some(e.to_string());
                self.emit(ConversationEvent::HistoryFailed {
                    error: e.to_string(),
                });
            }
        }

        match connection.and_then(|c| c.subscribe().map(|inbound| (c, inbound))) {
            Ok((connection, inbound)) => {
                session.pump = Some(self.spawn_pump(inbound));
                session.connection = Some(connection);
            }
            Err(e) => {
                error!("Streaming connection for {} failed: {}", identity.nickname(), e);
                session.health.connection_error = Some(e.to_string());
                self.emit(ConversationEvent::ConnectionFailed {
                    error: e.to_string(),
                });
            }
        }

        self.set_state(&mut session, ConversationState::Active);
        if session.health.is_degraded() {
            warn!("Conversation with {} is active but degraded", self.recipient);
        }
        Ok(())
    }

    /// Replace the raw draft text
    pub async fn set_draft(&self, text: impl Into<String>) {
        self.session.write().await.draft.set_text(text);
    }

    /// Translate the draft into the configured language.
    ///
    /// Blank drafts are a no-op (`Ok(None)`). On failure the draft is left
    /// unchanged and the error is returned; the conversation carries on.
    pub async fn translate_draft(&self) -> Result<Option<String>> {
        let text = {
            let session = self.session.read().await;
            if session.state == ConversationState::Closed {
                return Err(ChatError::InvalidState("conversation is closed".to_string()));
            }
            session.draft.text().to_string()
        };
        if text.trim().is_empty() {
            return Ok(None);
        }

        match self
            .ctx
            .translator
            .translate(&text, &self.ctx.target_lang)
            .await
        {
            Ok(translated) => {
                let mut session = self.session.write().await;
                // The user may have kept typing meanwhile
                if session.draft.text() == text {
                    session.draft.set_translation(translated.clone());
                } else {
                    debug!("Draft changed during translation, result discarded");
                }
                Ok(Some(translated))
            }
            Err(e) => {
                warn!("Translation failed, keeping original text: {}", e);
                self.emit(ConversationEvent::TranslationFailed {
                    error: e.to_string(),
                });
                Err(e)
            }
        }
    }

    /// Send the draft: translated text if present, else the raw text.
    ///
    /// The message is appended locally before dispatch (optimistic). A blank
    /// draft is a no-op and returns `Ok(None)`.
    pub async fn send_draft(&self) -> Result<Option<Message>> {
        let mut session = self.session.write().await;
        if session.state != ConversationState::Active {
            return Err(ChatError::InvalidState(format!(
                "cannot send while {:?}",
                session.state
            )));
        }
        if session.draft.is_blank() {
            return Ok(None);
        }

        let sender = session
            .identity
            .as_ref()
            .map(|i| i.nickname().to_string())
            .ok_or_else(|| ChatError::InvalidState("no identity".to_string()))?;
        let message = Message::now(
            sender,
            self.recipient.clone(),
            session.draft.effective_content(),
        )?;

        session
            .conversation
            .as_mut()
            .ok_or_else(|| ChatError::InvalidState("no conversation".to_string()))?
            .append_local(message.clone());
        self.emit(ConversationEvent::MessageAppended {
            message: message.clone(),
        });

        let dispatched = match session.connection.as_ref() {
            Some(connection) => self.ctx.connections.send(connection, message.clone()),
            None => Err(ChatError::Connection("no streaming connection".to_string())),
        };
        if let Err(e) = dispatched {
            warn!("Message to {} kept locally only: {}", self.recipient, e);
            self.emit(ConversationEvent::SendFailed {
                error: e.to_string(),
            });
        }

        session.draft.clear();
        Ok(Some(message))
    }

    /// Tear down. Safe in every state, including mid-`Loading`; idempotent.
    pub async fn close(&self) {
        self.shutdown.send_replace(true);

        let mut session = self.session.write().await;
        if session.state == ConversationState::Closed {
            return;
        }
        if let Some(pump) = session.pump.take() {
            pump.abort();
        }
        if let Some(connection) = session.connection.take() {
            self.ctx.connections.close(&connection).await;
        }
        session.draft.clear();
        self.set_state(&mut session, ConversationState::Closed);
        info!("Conversation with {} closed", self.recipient);
    }

    pub async fn state(&self) -> ConversationState {
        self.session.read().await.state
    }

    /// Snapshot of the message sequence
    pub async fn messages(&self) -> Vec<Message> {
        self.session
            .read()
            .await
            .conversation
            .as_ref()
            .map(|c| c.messages().to_vec())
            .unwrap_or_default()
    }

    pub async fn draft(&self) -> Draft {
        self.session.read().await.draft.clone()
    }

    pub async fn health(&self) -> ConversationHealth {
        self.session.read().await.health.clone()
    }

    pub async fn identity(&self) -> Option<Identity> {
        self.session.read().await.identity.clone()
    }

    fn set_state(&self, session: &mut Session, state: ConversationState) {
        if session.state != state {
            debug!("Conversation {:?} -> {:?}", session.state, state);
            session.state = state;
            self.emit(ConversationEvent::StateChanged { state });
        }
    }

    fn emit(&self, event: ConversationEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    /// Single consumer of the inbound stream
    fn spawn_pump(&self, mut inbound: Inbound) -> JoinHandle<()> {
        let session = self.session.clone();
        let events = self.events.clone();
        let recipient = self.recipient.clone();

        tokio::spawn(async move {
            while let Some(message) = inbound.next().await {
                let mut guard = session.write().await;
                if guard.state != ConversationState::Active {
                    break;
                }
                let Some(conversation) = guard.conversation.as_mut() else {
                    break;
                };
                match conversation.append_inbound(message.clone()) {
                    Appended::Added => {
                        let _ = events.send(ConversationEvent::MessageAppended { message });
                    }
                    Appended::EchoSuppressed => {
                        debug!("Suppressed echo of own message");
                        let _ = events.send(ConversationEvent::EchoSuppressed { message });
                    }
                }
            }

            let mut guard = session.write().await;
            if guard.state == ConversationState::Active {
                warn!("Stream for conversation with {} ended", recipient);
                guard.health.connection_error = Some("stream ended".to_string());
                let _ = events.send(ConversationEvent::ConnectionLost);
            }
        })
    }
}

impl Drop for ConversationController {
    fn drop(&mut self) {
        self.shutdown.send_replace(true);
        // Best effort: a held lock means close() or the pump is mid-flight
        if let Ok(mut session) = self.session.try_write() {
            if let Some(pump) = session.pump.take() {
                pump.abort();
            }
            if let Some(connection) = session.connection.take() {
                self.ctx.connections.release(&connection);
            }
        }
    }
}
