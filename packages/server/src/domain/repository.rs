//! Contracts of the external collaborators the core depends on.
//!
//! The domain layer defines the traits; the infrastructure layer implements
//! them (Redis / Consul / JWT, plus in-memory variants).

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::{sync::mpsc, task::JoinHandle};

use super::{
    error::{AuthError, DirectoryError, NameError, RelayError, StoreError},
    value_object::{InstanceId, ServiceInstance, UserId},
};

/// Shared key-value store holding room existence and membership records.
#[async_trait]
pub trait MembershipStore: Send + Sync {
    async fn hash_exists(&self, key: &str, field: &str) -> Result<bool, StoreError>;

    async fn hash_get(&self, key: &str, field: &str) -> Result<Option<String>, StoreError>;

    /// Upsert a hash field.
    async fn hash_set(&self, key: &str, field: &str, value: &str) -> Result<(), StoreError>;

    /// Atomically set a hash field only if it does not exist yet.
    ///
    /// Returns `true` when this call created the field.
    async fn hash_set_if_absent(
        &self,
        key: &str,
        field: &str,
        value: &str,
    ) -> Result<bool, StoreError>;

    async fn hash_get_all(&self, key: &str) -> Result<HashMap<String, String>, StoreError>;

    async fn hash_delete(&self, key: &str, field: &str) -> Result<(), StoreError>;

    /// Atomically delete `field` from `guard_key` and every hash in `others`,
    /// but only while `guard_key[field]` equals `expected`.
    ///
    /// Returns `true` when the fields were deleted.
    async fn hash_delete_if_eq(
        &self,
        guard_key: &str,
        field: &str,
        expected: &str,
        others: &[&str],
    ) -> Result<bool, StoreError>;

    async fn delete_key(&self, key: &str) -> Result<(), StoreError>;
}

/// Service-discovery registry.
#[async_trait]
pub trait Directory: Send + Sync {
    async fn register(&self, instance: &ServiceInstance) -> Result<(), DirectoryError>;

    async fn deregister(&self, instance_id: &InstanceId) -> Result<(), DirectoryError>;

    async fn healthy_instances(&self) -> Result<Vec<ServiceInstance>, DirectoryError>;

    /// Deliver the healthy instance list on `on_change` every time it changes.
    fn watch(&self, on_change: mpsc::Sender<Vec<ServiceInstance>>) -> JoinHandle<()>;
}

/// Resolves the display name of a user.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait NameResolver: Send + Sync {
    async fn display_name(&self, user_id: UserId) -> Result<String, NameError>;
}

/// Maps a bearer token onto a user id.
pub trait Authenticator: Send + Sync {
    fn authenticate(&self, token: &str) -> Result<UserId, AuthError>;
}

/// One outbound connection to a relay peer.
#[async_trait]
pub trait PeerLink: Send {
    async fn send_text(&mut self, frame: String) -> Result<(), RelayError>;

    async fn ping(&mut self) -> Result<(), RelayError>;

    async fn close(&mut self);
}

/// Opens relay connections to peer instances.
#[async_trait]
pub trait PeerConnector: Send + Sync {
    async fn connect(&self, peer: &ServiceInstance) -> Result<Box<dyn PeerLink>, RelayError>;
}
