//! Time-related utilities with clock abstraction for testability.

use chrono::{DateTime, TimeZone, Utc};

/// Clock trait for dependency injection and testing
pub trait Clock: Send + Sync {
    /// Current Unix timestamp (seconds)
    fn now_unix(&self) -> i64;
}

/// System clock implementation (uses actual system time)
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_unix(&self) -> i64 {
        unix_now()
    }
}

/// Fixed clock implementation for testing (returns a fixed time)
#[derive(Debug, Clone, Copy)]
pub struct FixedClock {
    fixed_time: i64,
}

impl FixedClock {
    /// Create a new fixed clock with the given Unix timestamp (seconds)
    pub fn new(fixed_time_secs: i64) -> Self {
        Self {
            fixed_time: fixed_time_secs,
        }
    }
}

impl Clock for FixedClock {
    fn now_unix(&self) -> i64 {
        self.fixed_time
    }
}

/// Current Unix timestamp (seconds)
pub fn unix_now() -> i64 {
    Utc::now().timestamp()
}

/// Convert a Unix timestamp (seconds) to RFC 3339 in UTC.
///
/// Out-of-range values fall back to the epoch.
pub fn unix_to_rfc3339(timestamp_secs: i64) -> String {
    let dt: DateTime<Utc> = Utc
        .timestamp_opt(timestamp_secs, 0)
        .single()
        .unwrap_or_default();
    dt.to_rfc3339()
}
