//! Membership store implementations.
//!
//! - `redis`: the shared store used by a real cluster
//! - `inmemory`: process-local store for tests and single-instance runs

pub mod inmemory;
pub mod redis;

pub use inmemory::InMemoryMembershipStore;
pub use redis::RedisMembershipStore;
