//! Relay peer connections.

pub mod websocket;

pub use websocket::WebSocketPeerConnector;
