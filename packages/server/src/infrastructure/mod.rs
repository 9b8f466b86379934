//! Infrastructure layer: concrete implementations of the domain contracts.

pub mod auth;
pub mod directory;
pub mod names;
pub mod relay;
pub mod repository;
pub mod store;
