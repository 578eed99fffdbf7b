//! Randomized TTLs.
//!
//! Every cache entry (and every replica) draws its TTL uniformly from
//! `[ttl_min, ttl_max]` so entries populated together do not all expire on
//! the same tick.

use std::time::Duration;

use rand::Rng;
use tokio::time::Instant;

use crate::error::{Error, Result};

/// Produces jittered TTLs within a configured window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExpirationPolicy {
    ttl_min: Duration,
    ttl_max: Duration,
}

impl ExpirationPolicy {
    /// Create a policy. Fails if `ttl_min > ttl_max`.
    pub fn new(ttl_min: Duration, ttl_max: Duration) -> Result<Self> {
        if ttl_min > ttl_max {
            return Err(Error::invalid_config(format!(
                "ttl_min ({}s) must be <= ttl_max ({}s)",
                ttl_min.as_secs_f64(),
                ttl_max.as_secs_f64()
            )));
        }
        Ok(Self { ttl_min, ttl_max })
    }

    /// Policy with no jitter.
    pub fn fixed(ttl: Duration) -> Self {
        Self {
            ttl_min: ttl,
            ttl_max: ttl,
        }
    }

    pub fn ttl_min(&self) -> Duration {
        self.ttl_min
    }

    pub fn ttl_max(&self) -> Duration {
        self.ttl_max
    }

    /// Draw a TTL uniformly from `[ttl_min, ttl_max]` at millisecond resolution.
    pub fn next_ttl(&self) -> Duration {
        if self.ttl_min == self.ttl_max {
            return self.ttl_min;
        }
        let min = self.ttl_min.as_millis() as u64;
        let max = self.ttl_max.as_millis() as u64;
        Duration::from_millis(rand::thread_rng().gen_range(min..=max))
    }

    /// Absolute expiry for an entry stored at `now`.
    pub fn expires_at(&self, now: Instant) -> Instant {
        now + self.next_ttl()
    }
}

impl Default for ExpirationPolicy {
    fn default() -> Self {
        Self {
            ttl_min: Duration::from_secs(50),
            ttl_max: Duration::from_secs(70),
        }
    }
}
