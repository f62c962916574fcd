//! # Runtime events emitted by the retry engine.
//!
//! The [`EventKind`] enum classifies events across the session lifecycle
//! (opened/closed), the attempt flow (started / succeeded / failed /
//! scheduled), terminal outcomes (exhausted, permanent), and the adaptive
//! machinery (rate-limit detection, circuit transitions).
//!
//! The [`Event`] struct carries the metadata the observability pipeline
//! consumes: operation name, policy id/name, attempt counters, delays,
//! durations, reasons, backoff/jitter names, and the caller's correlation id
//! (propagated, never generated).
//!
//! ## Ordering guarantees
//! Each event has a globally unique sequence number (`seq`) that increases
//! monotonically. Use `seq` to restore the exact order when events are
//! delivered out of order.
//!
//! ## Example
//! ```rust
//! use std::time::Duration;
//! use retryvisor::{Event, EventKind};
//!
//! let ev = Event::now(EventKind::RetryScheduled)
//!     .with_operation("fetch-profile")
//!     .with_policy("standard", "Standard")
//!     .with_attempt(2)
//!     .with_delay(Duration::from_millis(400));
//!
//! assert_eq!(ev.kind, EventKind::RetryScheduled);
//! assert_eq!(ev.operation.as_deref(), Some("fetch-profile"));
//! ```

use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

/// Global sequence counter for event ordering.
static EVENT_SEQ: AtomicU64 = AtomicU64::new(0);

/// Classification of runtime events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    // === Session lifecycle ===
    /// A session was opened by `execute()`.
    ///
    /// Sets: `operation`, `policy_id`, `policy_name`, `max_attempts`,
    /// `correlation_id`.
    SessionOpened,

    /// A session ended (success, terminal error, or cancellation).
    ///
    /// Sets: `operation`, `policy_id`, `attempt` (total attempts),
    /// `duration_ms`, `reason` (terminal label when unsuccessful).
    SessionClosed,

    // === Attempt flow ===
    /// An attempt is starting.
    ///
    /// Sets: `operation`, `attempt`, `max_attempts`.
    AttemptStarted,

    /// The operation succeeded on this attempt.
    ///
    /// Sets: `operation`, `attempt`, `max_attempts`, `duration_ms`
    /// (session total).
    AttemptSucceeded,

    /// The operation failed on this attempt (non-terminal).
    ///
    /// Sets: `operation`, `attempt`, `reason`, `duration_ms` (attempt).
    AttemptFailed,

    /// The next attempt was scheduled after a backoff computation.
    ///
    /// Sets: `operation`, `attempt` (upcoming), `max_attempts`, `delay_ms`,
    /// `policy_id`, `policy_name`, `backoff`, `jitter`, `correlation_id`.
    RetryScheduled,

    // === Terminal outcomes ===
    /// The attempt budget was exhausted.
    ///
    /// Sets: `operation`, `max_attempts`, `duration_ms`, `reason` (last error).
    RetriesExhausted,

    /// The failure was judged permanent.
    ///
    /// Sets: `operation`, `attempt`, `reason` (classification + error).
    PermanentFailure,

    // === Adaptive machinery ===
    /// A rate-limit signal was recognized.
    ///
    /// Sets: `operation`, `reason` (limit type), `delay_ms` (tuned wait),
    /// `policy_id` (synthesized policy).
    RateLimitDetected,

    /// A policy's circuit breaker tripped open.
    ///
    /// Sets: `policy_id`, `reason` (failure count).
    CircuitOpened,

    /// A breaker entered half-open and admitted a probe.
    ///
    /// Sets: `policy_id`.
    CircuitHalfOpen,

    /// A breaker closed after a successful probe.
    ///
    /// Sets: `policy_id`.
    CircuitClosed,
}

impl EventKind {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            EventKind::SessionOpened => "session_opened",
            EventKind::SessionClosed => "session_closed",
            EventKind::AttemptStarted => "attempt_started",
            EventKind::AttemptSucceeded => "attempt_succeeded",
            EventKind::AttemptFailed => "attempt_failed",
            EventKind::RetryScheduled => "retry_scheduled",
            EventKind::RetriesExhausted => "retries_exhausted",
            EventKind::PermanentFailure => "permanent_failure",
            EventKind::RateLimitDetected => "rate_limit_detected",
            EventKind::CircuitOpened => "circuit_opened",
            EventKind::CircuitHalfOpen => "circuit_half_open",
            EventKind::CircuitClosed => "circuit_closed",
        }
    }
}

/// Runtime event with optional metadata.
///
/// - `seq`: monotonic global sequence for ordering
/// - `at`: wall-clock timestamp (for logs)
/// - other optional fields are set depending on the [`EventKind`]
#[derive(Clone, Debug)]
pub struct Event {
    /// Globally unique, monotonically increasing sequence number.
    pub seq: u64,
    /// Wall-clock timestamp.
    pub at: SystemTime,
    /// Event classification.
    pub kind: EventKind,

    /// Logical operation name.
    pub operation: Option<Arc<str>>,
    /// Policy id, if applicable.
    pub policy_id: Option<Arc<str>>,
    /// Policy display name, if applicable.
    pub policy_name: Option<Arc<str>>,
    /// Attempt count (starting from 1).
    pub attempt: Option<u32>,
    /// Attempt budget of the governing policy.
    pub max_attempts: Option<u32>,
    /// Backoff delay in milliseconds (compact).
    pub delay_ms: Option<u64>,
    /// Duration in milliseconds (attempt or session, per kind).
    pub duration_ms: Option<u64>,
    /// Human-readable reason (errors, denial labels, limit types).
    pub reason: Option<Arc<str>>,
    /// Backoff formula name (camelCase).
    pub backoff: Option<&'static str>,
    /// Jitter strategy name (camelCase).
    pub jitter: Option<&'static str>,
    /// Caller-provided correlation id, propagated verbatim.
    pub correlation_id: Option<Arc<str>>,
}

impl Event {
    /// Creates a new event of the given kind with the current timestamp and
    /// next sequence number.
    pub fn now(kind: EventKind) -> Self {
        Self {
            seq: EVENT_SEQ.fetch_add(1, AtomicOrdering::Relaxed),
            at: SystemTime::now(),
            kind,
            operation: None,
            policy_id: None,
            policy_name: None,
            attempt: None,
            max_attempts: None,
            delay_ms: None,
            duration_ms: None,
            reason: None,
            backoff: None,
            jitter: None,
            correlation_id: None,
        }
    }

    /// Attaches the operation name.
    #[inline]
    pub fn with_operation(mut self, operation: impl Into<Arc<str>>) -> Self {
        self.operation = Some(operation.into());
        self
    }

    /// Attaches the policy id and display name.
    #[inline]
    pub fn with_policy(
        mut self,
        id: impl Into<Arc<str>>,
        name: impl Into<Arc<str>>,
    ) -> Self {
        self.policy_id = Some(id.into());
        self.policy_name = Some(name.into());
        self
    }

    /// Attaches a policy id only.
    #[inline]
    pub fn with_policy_id(mut self, id: impl Into<Arc<str>>) -> Self {
        self.policy_id = Some(id.into());
        self
    }

    /// Attaches an attempt count.
    #[inline]
    pub fn with_attempt(mut self, attempt: u32) -> Self {
        self.attempt = Some(attempt);
        self
    }

    /// Attaches the attempt budget.
    #[inline]
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }

    /// Attaches a backoff delay (stored as milliseconds).
    #[inline]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay_ms = Some(delay.as_millis().min(u128::from(u64::MAX)) as u64);
        self
    }

    /// Attaches a duration (stored as milliseconds).
    #[inline]
    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration_ms = Some(duration.as_millis().min(u128::from(u64::MAX)) as u64);
        self
    }

    /// Attaches a human-readable reason.
    #[inline]
    pub fn with_reason(mut self, reason: impl Into<Arc<str>>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    /// Attaches the backoff and jitter strategy names.
    #[inline]
    pub fn with_strategies(mut self, backoff: &'static str, jitter: &'static str) -> Self {
        self.backoff = Some(backoff);
        self.jitter = Some(jitter);
        self
    }

    /// Attaches the caller's correlation id, if any.
    #[inline]
    pub fn with_correlation_id(mut self, id: Option<&str>) -> Self {
        self.correlation_id = id.map(Arc::from);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sequence_numbers_are_monotonic() {
        let a = Event::now(EventKind::AttemptStarted);
        let b = Event::now(EventKind::AttemptFailed);
        assert!(b.seq > a.seq);
    }

    #[test]
    fn builders_populate_fields() {
        let ev = Event::now(EventKind::RetryScheduled)
            .with_operation("op")
            .with_policy("standard", "Standard")
            .with_attempt(2)
            .with_max_attempts(3)
            .with_delay(Duration::from_millis(250))
            .with_strategies("exponential", "equal")
            .with_correlation_id(Some("corr-1"));
        assert_eq!(ev.policy_id.as_deref(), Some("standard"));
        assert_eq!(ev.delay_ms, Some(250));
        assert_eq!(ev.backoff, Some("exponential"));
        assert_eq!(ev.correlation_id.as_deref(), Some("corr-1"));
    }

    #[test]
    fn labels_are_stable() {
        assert_eq!(EventKind::RetriesExhausted.as_label(), "retries_exhausted");
        assert_eq!(EventKind::CircuitHalfOpen.as_label(), "circuit_half_open");
    }
}
