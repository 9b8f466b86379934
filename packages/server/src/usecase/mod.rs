//! UseCase layer: connection nodes, rooms, dispatch and the cluster relay.

pub mod dispatcher;
pub mod error;
pub mod handler;
pub mod hub;
pub mod node;
pub mod node_registry;
pub mod proxy;
pub mod room_registry;

#[cfg(test)]
pub(crate) mod testing;

pub use dispatcher::{Dispatcher, MessageHandler};
pub use error::{NodeError, RegisterError};
pub use hub::{Hub, HubSettings, SIGNED_IN_ELSEWHERE};
pub use node::{Node, NodeQueues};
pub use node_registry::NodeRegistry;
pub use proxy::{BroadcastProxy, ProxyHandle, ProxySettings};
pub use room_registry::{Room, RoomRegistry};
