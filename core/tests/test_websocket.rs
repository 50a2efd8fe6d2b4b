/// Streaming connection against a local websocket server
extern crate mixchat_core;

use futures_util::{SinkExt, StreamExt};
use mixchat_core::identity::Identity;
use mixchat_core::realtime::{ConnectionManager, ReconnectPolicy, WsConnector};
use mixchat_core::session_store::{MemorySessionStore, CREDENTIAL_KEY, USER_INFO_KEY};
use mixchat_core::{
    ChatContext, ChatError, Config, ConversationController, ConversationState, Message,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::Message as Frame;
use tokio_tungstenite::{accept_hdr_async, WebSocketStream};

const WAIT: Duration = Duration::from_secs(5);

/// Accept exactly one websocket client; yields the request URI and the socket
async fn start_server() -> (
    String,
    oneshot::Receiver<(String, WebSocketStream<TcpStream>)>,
) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (tx, rx) = oneshot::channel();

    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let (uri_tx, uri_rx) = oneshot::channel();
        let callback = move |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
            let _ = uri_tx.send(req.uri().to_string());
            Ok(resp)
        };
        let ws = accept_hdr_async(stream, callback).await.unwrap();
        let uri = uri_rx.await.unwrap_or_default();
        let _ = tx.send((uri, ws));
    });

    (format!("ws://{}/ws/chat", addr), rx)
}

fn stream_config(ws_url: &str) -> Config {
    Config {
        ws_url: ws_url.to_string(),
        connect_timeout: Duration::from_secs(2),
        reconnect: ReconnectPolicy::disabled(),
        ..Default::default()
    }
}

fn msg(sender: &str, recipient: &str, content: &str, ts: &str) -> Message {
    Message::new(sender, recipient, content, ts).unwrap()
}

async fn next_text(ws: &mut WebSocketStream<TcpStream>) -> Option<String> {
    loop {
        match timeout(WAIT, ws.next()).await.ok()?? {
            Ok(Frame::Text(text)) => return Some(text),
            Ok(Frame::Close(_)) | Err(_) => return None,
            Ok(_) => continue,
        }
    }
}

#[tokio::test]
async fn test_stream_routes_by_nickname_and_skips_invalid_frames() {
    let (url, server) = start_server().await;
    let connections = ConnectionManager::new(Arc::new(WsConnector::new(&stream_config(&url))));
    let alice = Identity::new("alice", None).unwrap();

    let connection = connections.open(&alice).await.unwrap();
    let mut inbound = connection.subscribe().unwrap();
    let (uri, mut ws) = timeout(WAIT, server).await.unwrap().unwrap();
    assert_eq!(uri, "/ws/chat?userId=alice");

    let first = msg("bob", "alice", "hi", "2024-01-01T00:00:00Z");
    let second = msg("bob", "alice", "still there?", "2024-01-01T00:00:05Z");
    ws.send(Frame::Text(serde_json::to_string(&first).unwrap()))
        .await
        .unwrap();
    ws.send(Frame::Text("not json".to_string())).await.unwrap();
    ws.send(Frame::Text(
        r#"{"sender":"bob","recipient":"alice","content":"","timestamp":"2024-01-01T00:00:01Z"}"#
            .to_string(),
    ))
    .await
    .unwrap();
    ws.send(Frame::Binary(serde_json::to_vec(&second).unwrap()))
        .await
        .unwrap();

    assert_eq!(timeout(WAIT, inbound.next()).await.unwrap(), Some(first));
    assert_eq!(timeout(WAIT, inbound.next()).await.unwrap(), Some(second));
}

#[tokio::test]
async fn test_outbound_messages_are_json_text_frames() {
    let (url, server) = start_server().await;
    let connections = ConnectionManager::new(Arc::new(WsConnector::new(&stream_config(&url))));
    let alice = Identity::new("alice", None).unwrap();

    let connection = connections.open(&alice).await.unwrap();
    let (_uri, mut ws) = timeout(WAIT, server).await.unwrap().unwrap();

    let outgoing = msg("alice", "bob", "こんにちは", "2024-01-01T00:00:00.000Z");
    connections.send(&connection, outgoing.clone()).unwrap();

    let text = next_text(&mut ws).await.expect("no frame received");
    let decoded: Message = serde_json::from_str(&text).unwrap();
    assert_eq!(decoded, outgoing);
}

#[tokio::test]
async fn test_close_sends_close_frame() {
    let (url, server) = start_server().await;
    let connections = ConnectionManager::new(Arc::new(WsConnector::new(&stream_config(&url))));
    let alice = Identity::new("alice", None).unwrap();

    let connection = connections.open(&alice).await.unwrap();
    let (_uri, mut ws) = timeout(WAIT, server).await.unwrap().unwrap();

    connections.close(&connection).await;
    assert!(!connection.is_open());
    assert_eq!(connections.active_count().await, 0);

    // The server sees the socket wind down
    assert_eq!(next_text(&mut ws).await, None);
}

#[tokio::test]
async fn test_server_close_ends_inbound_stream() {
    let (url, server) = start_server().await;
    let connections = ConnectionManager::new(Arc::new(WsConnector::new(&stream_config(&url))));
    let alice = Identity::new("alice", None).unwrap();

    let connection = connections.open(&alice).await.unwrap();
    let mut inbound = connection.subscribe().unwrap();
    let (_uri, mut ws) = timeout(WAIT, server).await.unwrap().unwrap();

    ws.close(None).await.unwrap();
    assert_eq!(timeout(WAIT, inbound.next()).await.unwrap(), None);
}

#[tokio::test]
async fn test_unreachable_endpoint_is_a_connection_error() {
    // Bind then drop to get a port nobody listens on
    let addr = {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap()
    };
    let config = stream_config(&format!("ws://{}/ws/chat", addr));
    let connections = ConnectionManager::new(Arc::new(WsConnector::new(&config)));
    let alice = Identity::new("alice", None).unwrap();

    let err = connections.open(&alice).await.unwrap_err();
    assert!(matches!(err, ChatError::Connection(_)));
    assert_eq!(connections.active_count().await, 0);
}

#[tokio::test]
async fn test_conversation_streams_with_history_down() {
    let (url, server) = start_server().await;

    // History endpoint refuses connections; the stream still works
    let dead_api = {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap()
    };
    let config = Config {
        api_base_url: format!("http://{}", dead_api),
        request_timeout: Duration::from_secs(2),
        ..stream_config(&url)
    };
    let session = Arc::new(MemorySessionStore::with_entries([
        (USER_INFO_KEY, r#"{"nickname":"alice","email":"a@example.com"}"#),
        (CREDENTIAL_KEY, "token-abc"),
    ]));
    let ctx = ChatContext::from_config(&config, session).unwrap();
    let controller = ConversationController::new(ctx, "bob");
    let mut events = controller.subscribe();

    controller.open().await.unwrap();
    assert_eq!(controller.state().await, ConversationState::Active);
    let health = controller.health().await;
    assert!(health.history_error.is_some());
    assert!(health.connection_error.is_none());

    let (uri, mut ws) = timeout(WAIT, server).await.unwrap().unwrap();
    assert_eq!(uri, "/ws/chat?userId=alice");

    // Local send goes out over the socket
    controller.set_draft("hello bob").await;
    let sent = controller.send_draft().await.unwrap().unwrap();
    let text = next_text(&mut ws).await.expect("no frame received");
    let on_wire: Message = serde_json::from_str(&text).unwrap();
    assert_eq!(on_wire, sent);
    assert_eq!(on_wire.sender(), "alice");
    assert_eq!(on_wire.recipient(), "bob");

    // Server echo of the same message is not appended twice
    ws.send(Frame::Text(text)).await.unwrap();
    let reply = msg("bob", "alice", "hey alice", "2024-01-01T00:00:09Z");
    ws.send(Frame::Text(serde_json::to_string(&reply).unwrap()))
        .await
        .unwrap();

    let deadline = tokio::time::Instant::now() + WAIT;
    while controller.messages().await.len() < 2 {
        assert!(tokio::time::Instant::now() < deadline, "reply never appended");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    let contents: Vec<_> = controller
        .messages()
        .await
        .iter()
        .map(|m| m.content().to_string())
        .collect();
    assert_eq!(contents, vec!["hello bob", "hey alice"]);

    controller.close().await;
    assert_eq!(controller.state().await, ConversationState::Closed);
    assert_eq!(next_text(&mut ws).await, None);

    // Drain: the history failure was reported as an event
    let mut saw_history_failed = false;
    while let Ok(event) = events.try_recv() {
        if matches!(
            event,
            mixchat_core::ConversationEvent::HistoryFailed { .. }
        ) {
            saw_history_failed = true;
        }
    }
    assert!(saw_history_failed);
}
