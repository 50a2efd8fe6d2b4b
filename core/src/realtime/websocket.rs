/// Streaming endpoint over WebSocket: one JSON message per frame
use super::connection::{Connector, Transport, TransportPeer, DEFAULT_INBOUND_BUFFER};
use crate::config::Config;
use crate::error::{ChatError, Result};
use crate::identity::Identity;
use crate::message::Message;
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message as Frame;
use tokio_tungstenite::{connect_async, WebSocketStream};
use tracing::{debug, error, info, warn};

/// Opens `{ws_url}?userId={nickname}` and bridges it to a [`Transport`]
#[derive(Debug, Clone)]
pub struct WsConnector {
    config: Config,
    connect_timeout: Duration,
    inbound_buffer: usize,
}

impl WsConnector {
    pub fn new(config: &Config) -> Self {
        Self {
            config: config.clone(),
            connect_timeout: config.connect_timeout,
            inbound_buffer: config.inbound_buffer.max(1),
        }
    }
}

impl Default for WsConnector {
    fn default() -> Self {
        Self {
            config: Config::default(),
            connect_timeout: Duration::from_secs(10),
            inbound_buffer: DEFAULT_INBOUND_BUFFER,
        }
    }
}

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self, identity: &Identity) -> Result<Transport> {
        let url = self.config.stream_url(identity.nickname());
        debug!("Opening stream {}", url);

        let (ws, response) = match timeout(self.connect_timeout, connect_async(url.as_str())).await
        {
            Ok(Ok(pair)) => pair,
            Ok(Err(e)) => {
                return Err(ChatError::Connection(format!(
                    "failed to open {}: {}",
                    url, e
                )))
            }
            Err(_) => {
                return Err(ChatError::Connection(format!(
                    "timed out opening {} after {:?}",
                    url, self.connect_timeout
                )))
            }
        };
        info!(
            "Stream open for {} (HTTP {})",
            identity.nickname(),
            response.status()
        );

        let (transport, peer) = Transport::pair(self.inbound_buffer);
        tokio::spawn(run_socket(ws, peer, identity.nickname().to_string()));
        Ok(transport)
    }
}

/// Pump frames between a websocket and the client side of a transport until either ends
pub async fn run_socket<S>(ws: WebSocketStream<S>, peer: TransportPeer, nickname: String)
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let TransportPeer { mut sent, deliver } = peer;
    let (mut sink, mut stream) = ws.split();

    loop {
        tokio::select! {
            frame = stream.next() => match frame {
                Some(Ok(Frame::Text(text))) => {
                    if !forward_frame(&deliver, &text, &nickname).await {
                        break;
                    }
                }
                Some(Ok(Frame::Binary(bytes))) => match String::from_utf8(bytes) {
                    Ok(text) => {
                        if !forward_frame(&deliver, &text, &nickname).await {
                            break;
                        }
                    }
                    Err(_) => warn!("Dropping non UTF-8 binary frame for {}", nickname),
                },
                Some(Ok(Frame::Close(reason))) => {
                    info!("Server closed stream for {}: {:?}", nickname, reason);
                    break;
                }
                Some(Ok(_)) => {
                    // Ping/pong are answered by tungstenite
                }
                Some(Err(e)) => {
                    warn!("Stream read error for {}: {}", nickname, e);
                    break;
                }
                None => {
                    debug!("Stream for {} ended", nickname);
                    break;
                }
            },
            next = sent.recv() => match next {
                Some(message) => {
                    let json = match serde_json::to_string(&message) {
                        Ok(json) => json,
                        Err(e) => {
                            error!("Failed to encode outbound message: {}", e);
                            continue;
                        }
                    };
                    if let Err(e) = sink.send(Frame::Text(json)).await {
                        warn!("Stream write error for {}: {}", nickname, e);
                        break;
                    }
                }
                None => {
                    debug!("Connection for {} released", nickname);
                    break;
                }
            }
        }
    }

    // Best-effort close frame
    let _ = sink.close().await;
}

/// Decode and hand over one frame. Returns false once the client side is gone.
async fn forward_frame(deliver: &mpsc::Sender<Message>, text: &str, nickname: &str) -> bool {
    match serde_json::from_str::<Message>(text) {
        Ok(message) => deliver.send(message).await.is_ok(),
        Err(e) => {
            warn!("Skipping invalid frame for {}: {}", nickname, e);
            true
        }
    }
}
