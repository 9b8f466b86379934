//! Domain layer: protocol envelopes, value objects and the contracts the core
//! depends on (membership store, directory, authentication, display names).

pub mod error;
pub mod protocol;
pub mod repository;
pub mod value_object;

pub use error::{AuthError, DirectoryError, NameError, RelayError, RoomError, StoreError};
pub use protocol::{Code, Input, Method, Output, RoomInfo, UserItem};
pub use repository::{
    Authenticator, Directory, MembershipStore, NameResolver, PeerConnector, PeerLink,
};
#[cfg(test)]
pub use repository::MockNameResolver;
pub use value_object::{InstanceId, RoomId, ServiceInstance, UserId};
