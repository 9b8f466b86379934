//! Directory (service discovery) implementations.

pub mod consul;
pub mod inmemory;

pub use consul::{ConsulDirectory, ConsulSettings};
pub use inmemory::InMemoryDirectory;
