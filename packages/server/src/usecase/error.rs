//! UseCase layer error types.

use thiserror::Error;

use crate::domain::Method;

/// Node queue errors
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum NodeError {
    /// The node has been closed and its queues dropped.
    #[error("node is closed")]
    Closed,

    /// The queue stayed full for the whole send timeout.
    #[error("node queue is full")]
    Timeout,
}

/// Dispatcher table construction errors
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RegisterError {
    #[error("handler for method {0:?} registered twice")]
    Duplicate(Method),
}
