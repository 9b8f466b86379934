//! HTTP and WebSocket handlers.

mod gateway;
mod http;
mod websocket;

pub use gateway::gateway_handler;
pub use http::health_check;
pub use websocket::websocket_handler;
