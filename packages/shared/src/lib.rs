//! Shared utilities for the Hiroba IM service.

pub mod logger;
pub mod time;
