//! Wall-clock time for the runtime.
//!
//! Epoch milliseconds are derived from a wall-clock origin plus elapsed
//! [`tokio::time::Instant`], so tests running on a paused tokio clock see
//! timestamps advance exactly with `tokio::time::advance`.

use std::time::{SystemTime, UNIX_EPOCH};
use tether_engine::Timestamp;
use tokio::time::Instant;

/// Monotonic epoch-millisecond clock.
#[derive(Debug, Clone, Copy)]
pub struct Clock {
    origin_wall: Timestamp,
    origin: Instant,
}

impl Clock {
    /// Clock anchored at the current system time.
    pub fn system() -> Self {
        let origin_wall = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as Timestamp)
            .unwrap_or_default();
        Self::starting_at(origin_wall)
    }

    /// Clock whose current time is `origin_wall`.
    pub fn starting_at(origin_wall: Timestamp) -> Self {
        Self {
            origin_wall,
            origin: Instant::now(),
        }
    }

    /// Current time in epoch milliseconds.
    pub fn now(&self) -> Timestamp {
        self.origin_wall + self.origin.elapsed().as_millis() as Timestamp
    }
}

impl Default for Clock {
    fn default() -> Self {
        Self::system()
    }
}
