//! WebSocket IM server: client and relay endpoints.

mod handler;
mod server;
mod signal;
pub mod state;

pub use server::{Server, router};
pub use state::{AppState, ConnectionSettings, RelayAuth};
