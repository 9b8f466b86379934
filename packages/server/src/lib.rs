//! Hiroba IM server library.
//!
//! One instance of a horizontally scaled IM cluster: client connections,
//! rooms, method dispatch and the relay mesh that fans broadcasts out to
//! every other healthy instance.

// layers
pub mod domain;
pub mod infrastructure;
pub mod ui;
pub mod usecase;

pub mod config;
