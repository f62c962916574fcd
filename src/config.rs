//! # Global runtime configuration.
//!
//! Provides [`RetryConfig`], the manager-wide settings that apply across all
//! sessions. Per-operation behavior lives in [`RetryPolicy`](crate::RetryPolicy);
//! this struct only covers the runtime surrounding the attempt loop.
//!
//! ## Sentinel values
//! - `attempt_timeout = 0s` → no per-attempt deadline (treated as `None`)
//! - `bus_capacity` is clamped to a minimum of 1 by the bus

use std::time::Duration;

/// Global configuration for a [`RetryManager`](crate::RetryManager).
///
/// ## Field semantics
/// - `bus_capacity`: event bus ring buffer size (min 1; clamped by Bus)
/// - `attempt_timeout`: optional deadline around each operation invocation
///   (`0s` = none); a hit deadline is reported as a transient timeout error
/// - `default_policy_id`: policy used by [`execute`](crate::RetryManager::execute)
///   callers that pass an empty policy id
#[derive(Clone, Debug)]
pub struct RetryConfig {
    /// Capacity of the event bus broadcast channel ring buffer.
    ///
    /// Slow subscribers that lag behind more than `bus_capacity` events will
    /// observe `Lagged` and skip older items.
    pub bus_capacity: usize,

    /// Default per-attempt deadline.
    ///
    /// - `Duration::ZERO` = no deadline (operation runs until completion)
    /// - `> 0` = each attempt is wrapped in `tokio::time::timeout`
    pub attempt_timeout: Duration,

    /// Policy id substituted when a caller passes an empty id.
    pub default_policy_id: String,
}

impl RetryConfig {
    /// Returns the per-attempt deadline as an `Option`.
    ///
    /// - `None` → no deadline
    /// - `Some(d)` → deadline applied per attempt
    #[inline]
    pub fn attempt_deadline(&self) -> Option<Duration> {
        if self.attempt_timeout == Duration::ZERO {
            None
        } else {
            Some(self.attempt_timeout)
        }
    }

    /// Returns a bus capacity clamped to a minimum of 1.
    #[inline]
    pub fn bus_capacity_clamped(&self) -> usize {
        self.bus_capacity.max(1)
    }
}

impl Default for RetryConfig {
    /// Default configuration:
    ///
    /// - `bus_capacity = 1024`
    /// - `attempt_timeout = 0s` (no deadline)
    /// - `default_policy_id = "standard"`
    fn default() -> Self {
        Self {
            bus_capacity: 1024,
            attempt_timeout: Duration::ZERO,
            default_policy_id: "standard".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_timeout_is_none() {
        let cfg = RetryConfig::default();
        assert_eq!(cfg.attempt_deadline(), None);

        let cfg = RetryConfig {
            attempt_timeout: Duration::from_secs(2),
            ..RetryConfig::default()
        };
        assert_eq!(cfg.attempt_deadline(), Some(Duration::from_secs(2)));
    }

    #[test]
    fn bus_capacity_clamps_to_one() {
        let cfg = RetryConfig {
            bus_capacity: 0,
            ..RetryConfig::default()
        };
        assert_eq!(cfg.bus_capacity_clamped(), 1);
    }
}
