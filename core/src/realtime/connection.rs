/// Connection handles and the per-user connection manager
use crate::error::{ChatError, Result};
use crate::identity::Identity;
use crate::message::Message;
use async_trait::async_trait;
use futures_util::Stream;
use std::collections::HashMap;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use tokio::sync::{mpsc, watch, RwLock};
use tracing::{debug, info};
use uuid::Uuid;

pub const DEFAULT_INBOUND_BUFFER: usize = 256;

/// Channels a connector hands over once its transport is up
pub struct Transport {
    /// Messages to write to the wire
    pub outbound: mpsc::UnboundedSender<Message>,
    /// Messages read from the wire
    pub inbound: mpsc::Receiver<Message>,
}

/// The wire-facing end of a [`Transport`]
pub struct TransportPeer {
    /// Everything the client enqueued for sending
    pub sent: mpsc::UnboundedReceiver<Message>,
    /// Push received messages to the client
    pub deliver: mpsc::Sender<Message>,
}

impl Transport {
    /// Create a connected transport / peer pair
    pub fn pair(buffer: usize) -> (Transport, TransportPeer) {
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (in_tx, in_rx) = mpsc::channel(buffer.max(1));
        (
            Transport {
                outbound: out_tx,
                inbound: in_rx,
            },
            TransportPeer {
                sent: out_rx,
                deliver: in_tx,
            },
        )
    }
}

/// Establishes a streaming transport for a user
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, identity: &Identity) -> Result<Transport>;
}

#[async_trait]
impl<C: Connector + ?Sized> Connector for Arc<C> {
    async fn connect(&self, identity: &Identity) -> Result<Transport> {
        (**self).connect(identity).await
    }
}

/// Handle to one open streaming connection. Clones share the same connection.
#[derive(Clone)]
pub struct Connection {
    inner: Arc<ConnectionInner>,
}

struct ConnectionInner {
    id: Uuid,
    nickname: String,
    outbound: Mutex<Option<mpsc::UnboundedSender<Message>>>,
    inbound: Mutex<Option<mpsc::Receiver<Message>>>,
    closed: watch::Sender<bool>,
}

impl Connection {
    /// Wrap a transport. Spawns the forwarding task feeding the inbound stream.
    pub fn attach(nickname: impl Into<String>, transport: Transport, buffer: usize) -> Self {
        let id = Uuid::new_v4();
        let (tx, rx) = mpsc::channel(buffer.max(1));
        let (closed, mut closed_rx) = watch::channel(false);
        let Transport {
            outbound,
            inbound: mut wire,
        } = transport;

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    changed = closed_rx.changed() => {
                        if changed.is_err() || *closed_rx.borrow() {
                            break;
                        }
                    }
                    frame = wire.recv() => match frame {
                        Some(message) => {
                            if tx.send(message).await.is_err() {
                                // Inbound side dropped
                                break;
                            }
                        }
                        None => {
                            debug!("Transport of connection {} ended", id);
                            break;
                        }
                    }
                }
            }
        });

        Self {
            inner: Arc::new(ConnectionInner {
                id,
                nickname: nickname.into(),
                outbound: Mutex::new(Some(outbound)),
                inbound: Mutex::new(Some(rx)),
                closed,
            }),
        }
    }

    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    pub fn nickname(&self) -> &str {
        &self.inner.nickname
    }

    /// Take the inbound message stream. Only one subscriber per connection.
    pub fn subscribe(&self) -> Result<Inbound> {
        let rx = self
            .inner
            .inbound
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
            .ok_or_else(|| {
                ChatError::Connection(format!(
                    "inbound stream of connection {} already taken",
                    self.inner.id
                ))
            })?;
        Ok(Inbound {
            rx,
            closed: self.inner.closed.subscribe(),
        })
    }

    /// Enqueue a message. Fire-and-forget: no acknowledgement, no retry.
    pub fn send(&self, message: Message) -> Result<()> {
        let outbound = self.inner.outbound.lock().unwrap_or_else(|e| e.into_inner());
        match outbound.as_ref() {
            Some(tx) => tx.send(message).map_err(|_| {
                ChatError::Connection(format!("transport of connection {} is gone", self.inner.id))
            }),
            None => Err(ChatError::Connection(format!(
                "connection {} is closed",
                self.inner.id
            ))),
        }
    }

    /// Release the transport. Returns false if it was already closed.
    pub fn close(&self) -> bool {
        let was_open = !self.inner.closed.send_replace(true);
        self.inner
            .outbound
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        self.inner
            .inbound
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if was_open {
            debug!("Connection {} closed", self.inner.id);
        }
        was_open
    }

    pub fn is_open(&self) -> bool {
        if *self.inner.closed.borrow() {
            return false;
        }
        self.inner
            .outbound
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .map(|tx| !tx.is_closed())
            .unwrap_or(false)
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.inner.id)
            .field("nickname", &self.inner.nickname)
            .field("open", &self.is_open())
            .finish()
    }
}

/// Inbound messages of one connection, in arrival order.
/// Ends when the connection is closed or the transport fails.
pub struct Inbound {
    rx: mpsc::Receiver<Message>,
    closed: watch::Receiver<bool>,
}

impl Inbound {
    pub async fn next_message(&mut self) -> Option<Message> {
        if *self.closed.borrow() {
            return None;
        }
        self.rx.recv().await
    }
}

impl Stream for Inbound {
    type Item = Message;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Message>> {
        if *self.closed.borrow() {
            return Poll::Ready(None);
        }
        self.rx.poll_recv(cx)
    }
}

/// Owns at most one live connection per local user
#[derive(Clone)]
pub struct ConnectionManager {
    connector: Arc<dyn Connector>,
    active: Arc<RwLock<HashMap<String, Connection>>>,
    inbound_buffer: usize,
}

impl ConnectionManager {
    pub fn new(connector: Arc<dyn Connector>) -> Self {
        Self {
            connector,
            active: Arc::new(RwLock::new(HashMap::new())),
            inbound_buffer: DEFAULT_INBOUND_BUFFER,
        }
    }

    pub fn with_inbound_buffer(mut self, buffer: usize) -> Self {
        self.inbound_buffer = buffer.max(1);
        self
    }

    /// Open the streaming connection for `identity`, replacing any previous one
    pub async fn open(&self, identity: &Identity) -> Result<Connection> {
        let nickname = identity.nickname();
        if nickname.trim().is_empty() {
            return Err(ChatError::Connection(
                "cannot open a connection without a nickname".to_string(),
            ));
        }

        let transport = self.connector.connect(identity).await?;
        let connection = Connection::attach(nickname, transport, self.inbound_buffer);

        let previous = self
            .active
            .write()
            .await
            .insert(nickname.to_string(), connection.clone());
        if let Some(previous) = previous {
            if previous.close() {
                info!(
                    "Replaced connection {} for {} with {}",
                    previous.id(),
                    nickname,
                    connection.id()
                );
            }
        }

        info!("Connection {} open for {}", connection.id(), nickname);
        Ok(connection)
    }

    pub fn send(&self, connection: &Connection, message: Message) -> Result<()> {
        connection.send(message)
    }

    /// Close and forget a connection. Idempotent.
    pub async fn close(&self, connection: &Connection) {
        connection.close();
        forget(&mut *self.active.write().await, connection);
    }

    /// Synchronous close for drop paths. Returns false if the table was busy
    /// and the (already closed) entry could not be removed.
    pub fn release(&self, connection: &Connection) -> bool {
        connection.close();
        match self.active.try_write() {
            Ok(mut active) => {
                forget(&mut active, connection);
                true
            }
            Err(_) => {
                debug!("Connection table busy, {} left for the next open", connection.id());
                false
            }
        }
    }

    pub async fn get(&self, nickname: &str) -> Option<Connection> {
        self.active.read().await.get(nickname).cloned()
    }

    /// Number of tracked connections whose transport is still up
    pub async fn active_count(&self) -> usize {
        self.active
            .read()
            .await
            .values()
            .filter(|c| c.is_open())
            .count()
    }
}

/// Remove `connection` only if it is still the current one for its nickname
fn forget(active: &mut HashMap<String, Connection>, connection: &Connection) {
    let is_current = active
        .get(connection.nickname())
        .map(|c| c.id() == connection.id())
        .unwrap_or(false);
    if is_current {
        active.remove(connection.nickname());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;
    use std::time::Duration;
    use tokio::time::timeout;

    fn msg(content: &str) -> Message {
        Message::new("bob", "alice", content, "2024-01-01T00:00:00Z").unwrap()
    }

    #[tokio::test]
    async fn forwards_inbound_in_order_and_sends_outbound() {
        let (transport, mut peer) = Transport::pair(8);
        let connection = Connection::attach("alice", transport, 8);
        let mut inbound = connection.subscribe().unwrap();

        peer.deliver.send(msg("one")).await.unwrap();
        peer.deliver.send(msg("two")).await.unwrap();
        assert_eq!(inbound.next().await.unwrap().content(), "one");
        assert_eq!(inbound.next().await.unwrap().content(), "two");

        connection.send(msg("out")).unwrap();
        assert_eq!(peer.sent.recv().await.unwrap().content(), "out");
    }

    #[tokio::test]
    async fn subscribe_is_not_restartable() {
        let (transport, _peer) = Transport::pair(8);
        let connection = Connection::attach("alice", transport, 8);
        let _first = connection.subscribe().unwrap();
        assert!(matches!(connection.subscribe(), Err(ChatError::Connection(_))));
    }

    #[tokio::test]
    async fn close_is_idempotent_and_ends_everything() {
        let (transport, mut peer) = Transport::pair(8);
        let connection = Connection::attach("alice", transport, 8);
        let mut inbound = connection.subscribe().unwrap();

        assert!(connection.is_open());
        assert!(connection.close());
        assert!(!connection.close());
        assert!(!connection.is_open());

        assert!(connection.send(msg("late")).is_err());
        assert!(timeout(Duration::from_secs(1), inbound.next())
            .await
            .unwrap()
            .is_none());
        // Outbound side of the wire sees the release
        assert!(timeout(Duration::from_secs(1), peer.sent.recv())
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn transport_failure_ends_inbound() {
        let (transport, peer) = Transport::pair(8);
        let connection = Connection::attach("alice", transport, 8);
        let mut inbound = connection.subscribe().unwrap();

        drop(peer);
        assert!(timeout(Duration::from_secs(1), inbound.next())
            .await
            .unwrap()
            .is_none());
        assert!(!connection.is_open());
    }

    #[derive(Default)]
    struct PairConnector {
        peers: Mutex<Vec<TransportPeer>>,
    }

    #[async_trait]
    impl Connector for PairConnector {
        async fn connect(&self, _identity: &Identity) -> Result<Transport> {
            let (transport, peer) = Transport::pair(8);
            self.peers.lock().unwrap().push(peer);
            Ok(transport)
        }
    }

    #[tokio::test]
    async fn release_forgets_without_awaiting() {
        let manager = ConnectionManager::new(Arc::new(PairConnector::default()));
        let identity = Identity::new("alice", None).unwrap();
        let connection = manager.open(&identity).await.unwrap();

        assert!(manager.release(&connection));
        assert!(!connection.is_open());
        assert!(manager.get("alice").await.is_none());

        // Busy table: still closes, entry removal is skipped
        let second = manager.open(&identity).await.unwrap();
        let guard = manager.active.read().await;
        assert!(!manager.release(&second));
        assert!(!second.is_open());
        drop(guard);
        assert_eq!(manager.active_count().await, 0);
    }
}
