//! Domain error types.

use thiserror::Error;

/// Membership store failures.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("membership store backend error: {0}")]
    Backend(String),
}

/// Room registry failures.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RoomError {
    #[error("room not found")]
    NotFound,

    /// The room id is already registered cluster-wide.
    #[error("room already created")]
    AlreadyCreated,

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Service directory failures.
#[derive(Debug, Error)]
pub enum DirectoryError {
    #[error("directory request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("directory responded with status {status}: {body}")]
    Status { status: u16, body: String },
}

/// Relay (inter-instance) failures.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RelayError {
    #[error("failed to connect to peer {peer}: {reason}")]
    Connect { peer: String, reason: String },

    #[error("failed to write to relay: {0}")]
    Write(String),

    #[error("relay channel closed")]
    Closed,
}

/// Authentication failures on the client handshake.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AuthError {
    #[error("missing token")]
    MissingToken,

    #[error("malformed token")]
    Malformed,

    #[error("invalid token signature")]
    InvalidSignature,

    #[error("token expired")]
    Expired,

    #[error("token carries no user id")]
    MissingUserId,
}

/// Display-name resolution failures. Always retryable from the client's view.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum NameError {
    #[error("no display name for user {0}")]
    Unknown(u64),

    #[error(transparent)]
    Store(#[from] StoreError),
}
