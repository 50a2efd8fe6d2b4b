/// Real-time streaming: connection handles, websocket transport, reconnect policy
pub mod connection;
pub mod reconnect;
pub mod websocket;

pub use connection::{Connection, ConnectionManager, Connector, Inbound, Transport, TransportPeer};
pub use reconnect::{ReconnectPolicy, RetryingConnector};
pub use websocket::WsConnector;
