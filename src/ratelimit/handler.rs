//! # Rate-limit handling: keyed cache + synthesized policies.
//!
//! [`RateLimitHandler`] wraps the detector with a per-key cache
//! (`client:service:endpoint`, fields taken from the execution context) and
//! turns each detection into a tuned [`RetryPolicy`] sized off the detected
//! wait. The cache is a synchronized check-then-write: two sessions hitting
//! the same limit concurrently agree on one occurrence instead of
//! overwriting each other. Stale entries are evicted lazily on next lookup.

use std::time::Duration;

use dashmap::DashMap;

use crate::error::{ExecContext, OpError};
use crate::policy::{BackoffKind, JitterKind, RetryCondition, RetryPolicy};

use super::detector::{RateLimitDetector, RateLimitInfo, RateLimitKind};

/// Detector + occurrence cache + policy synthesis.
#[derive(Debug, Default)]
pub struct RateLimitHandler {
    detector: RateLimitDetector,
    cache: DashMap<String, RateLimitInfo>,
}

impl RateLimitHandler {
    pub fn new() -> Self {
        Self {
            detector: RateLimitDetector::new(),
            cache: DashMap::new(),
        }
    }

    /// Checks a failure for rate-limit signals.
    ///
    /// On detection returns the (possibly cached) occurrence plus a policy
    /// tuned to it; the retry loop substitutes that policy for the remaining
    /// attempts. Returns `None` when the failure is not a rate limit.
    pub fn handle(
        &self,
        error: &OpError,
        ctx: Option<&ExecContext>,
    ) -> Option<(RateLimitInfo, RetryPolicy)> {
        let key = Self::cache_key(ctx);

        if let Some(entry) = self.cache.get(&key) {
            if !entry.is_expired() {
                let info = entry.value().clone();
                drop(entry);
                let policy = self.synthesize(&info);
                return Some((info, policy));
            }
        }
        self.cache.remove_if(&key, |_, v| v.is_expired());

        let detected = self.detector.detect(error, ctx)?;
        // First writer wins; a racing detection reuses the stored occurrence.
        let info = self.cache.entry(key).or_insert(detected).value().clone();
        let policy = self.synthesize(&info);
        Some((info, policy))
    }

    /// Direct detector access (no caching, no policy synthesis).
    pub fn detect(&self, error: &OpError, ctx: Option<&ExecContext>) -> Option<RateLimitInfo> {
        self.detector.detect(error, ctx)
    }

    /// Number of live cached occurrences.
    pub fn cached(&self) -> usize {
        self.cache.len()
    }

    /// Builds a retry policy sized off the detected wait.
    ///
    /// The base/max delays scale with `wait_time()` so the first scheduled
    /// retry lands around when the limit is expected to lift.
    pub fn synthesize(&self, info: &RateLimitInfo) -> RetryPolicy {
        let wait = info.wait_time().max(Duration::from_secs(1));
        let id = format!("rate-limit:{}", info.kind.as_str());
        let name = format!("Rate limit ({})", info.kind.as_str());

        let policy = match info.suggested_backoff {
            BackoffKind::Fixed => RetryPolicy::new(id, name)
                .with_max_attempts(5)
                .with_delays(wait, wait)
                .with_backoff(BackoffKind::Fixed, 1.0),
            BackoffKind::Linear => RetryPolicy::new(id, name)
                .with_max_attempts(4)
                .with_delays(div_duration(wait, 4).max(Duration::from_secs(1)), wait)
                .with_backoff(BackoffKind::Linear, 1.0),
            BackoffKind::ExponentialWithJitter => RetryPolicy::new(id, name)
                .with_max_attempts(5)
                .with_delays(
                    div_duration(wait, 4).max(Duration::from_secs(1)),
                    wait.saturating_mul(2),
                )
                .with_backoff(BackoffKind::ExponentialWithJitter, 2.0)
                .with_jitter(JitterKind::Equal, 0.2),
            _ => RetryPolicy::new(id, name)
                .with_max_attempts(5)
                .with_delays(
                    div_duration(wait, 4).max(Duration::from_secs(1)),
                    wait.saturating_mul(2),
                )
                .with_backoff(BackoffKind::Exponential, 2.0),
        };

        policy
            .with_condition(RetryCondition::TransientFailure)
            .with_condition(RetryCondition::SpecificErrorCodes)
            .with_retryable_codes([429, 503])
            .with_transient_patterns(["rate limit", "too many requests", "quota", "throttle"])
    }

    /// `client:service:endpoint`, each falling back to `default`.
    fn cache_key(ctx: Option<&ExecContext>) -> String {
        let part = |key: &str| -> String {
            ctx.and_then(|c| c.field(key))
                .unwrap_or("default")
                .to_string()
        };
        format!(
            "{}:{}:{}",
            part("client_id"),
            part("service"),
            part("endpoint")
        )
    }
}

fn div_duration(d: Duration, by: u32) -> Duration {
    d / by.max(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detection_synthesizes_a_valid_policy() {
        let handler = RateLimitHandler::new();
        let err = OpError::new("429 too many requests, retry after 30 seconds");
        let (info, policy) = handler.handle(&err, None).unwrap();

        assert_eq!(info.kind, RateLimitKind::Http429);
        assert!(policy.id.starts_with("rate-limit:"));
        assert!(policy.validate().is_ok());
        // short 429 wait: fixed delay at the wait itself
        assert_eq!(policy.backoff, BackoffKind::Fixed);
        assert!(policy.base_delay <= Duration::from_secs(30));
    }

    #[test]
    fn occurrences_are_cached_per_key() {
        let handler = RateLimitHandler::new();
        let err = OpError::new("quota exceeded");

        let (first, _) = handler.handle(&err, None).unwrap();
        let (second, _) = handler.handle(&err, None).unwrap();
        assert_eq!(handler.cached(), 1);
        assert_eq!(first.detected_at, second.detected_at);
    }

    #[test]
    fn expired_entries_are_evicted_on_next_lookup() {
        let handler = RateLimitHandler::new();
        let err = OpError::new("429 too many requests, retry after 0 seconds");

        let (first, _) = handler.handle(&err, None).unwrap();
        assert!(first.is_expired());

        std::thread::sleep(Duration::from_millis(2));
        let (second, _) = handler.handle(&err, None).unwrap();
        assert_eq!(handler.cached(), 1);
        assert!(second.detected_at > first.detected_at);
    }

    #[test]
    fn distinct_context_keys_do_not_share_entries() {
        let handler = RateLimitHandler::new();
        let err = OpError::new("rate limit");
        let a = ExecContext::default().with_field("client_id", "a");
        let b = ExecContext::default().with_field("client_id", "b");

        handler.handle(&err, Some(&a)).unwrap();
        handler.handle(&err, Some(&b)).unwrap();
        assert_eq!(handler.cached(), 2);
    }

    #[test]
    fn non_limit_errors_pass_through() {
        let handler = RateLimitHandler::new();
        assert!(handler.handle(&OpError::new("segfault"), None).is_none());
        assert_eq!(handler.cached(), 0);
    }

    #[test]
    fn quota_synthesis_uses_linear_backoff() {
        let handler = RateLimitHandler::new();
        let (_, policy) = handler
            .handle(&OpError::new("monthly quota exceeded"), None)
            .unwrap();
        assert_eq!(policy.backoff, BackoffKind::Linear);
        assert!(policy.validate().is_ok());
    }
}
