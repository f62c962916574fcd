//! # Structured logging subscriber.
//!
//! [`LogWriter`] renders every event through `tracing` with the event label
//! as the message and the populated metadata as fields. Severity follows the
//! event: terminal failures are `warn`, circuit trips are `warn`, everything
//! else is `info`/`debug`.
//!
//! ## Example
//! ```no_run
//! use std::sync::Arc;
//! use retryvisor::{LogWriter, RetryConfig, RetryManager, Subscribe};
//!
//! let manager = RetryManager::new(
//!     RetryConfig::default(),
//!     vec![Arc::new(LogWriter) as Arc<dyn Subscribe>],
//! );
//! ```

use async_trait::async_trait;

use crate::events::{Event, EventKind};

use super::Subscribe;

/// Subscriber that emits one `tracing` record per event.
pub struct LogWriter;

#[async_trait]
impl Subscribe for LogWriter {
    async fn on_event(&self, e: &Event) {
        let label = e.kind.as_label();
        match e.kind {
            EventKind::SessionOpened => {
                tracing::info!(
                    operation = e.operation.as_deref(),
                    policy = e.policy_id.as_deref(),
                    max_attempts = e.max_attempts,
                    correlation_id = e.correlation_id.as_deref(),
                    "{label}"
                );
            }
            EventKind::SessionClosed => {
                tracing::info!(
                    operation = e.operation.as_deref(),
                    policy = e.policy_id.as_deref(),
                    attempts = e.attempt,
                    duration_ms = e.duration_ms,
                    reason = e.reason.as_deref(),
                    "{label}"
                );
            }
            EventKind::AttemptStarted => {
                tracing::debug!(
                    operation = e.operation.as_deref(),
                    attempt = e.attempt,
                    max_attempts = e.max_attempts,
                    "{label}"
                );
            }
            EventKind::AttemptSucceeded => {
                tracing::info!(
                    operation = e.operation.as_deref(),
                    attempt = e.attempt,
                    duration_ms = e.duration_ms,
                    "{label}"
                );
            }
            EventKind::AttemptFailed => {
                tracing::debug!(
                    operation = e.operation.as_deref(),
                    attempt = e.attempt,
                    reason = e.reason.as_deref(),
                    duration_ms = e.duration_ms,
                    "{label}"
                );
            }
            EventKind::RetryScheduled => {
                tracing::info!(
                    operation = e.operation.as_deref(),
                    next_attempt = e.attempt,
                    max_attempts = e.max_attempts,
                    delay_ms = e.delay_ms,
                    policy = e.policy_id.as_deref(),
                    backoff = e.backoff,
                    jitter = e.jitter,
                    "{label}"
                );
            }
            EventKind::RetriesExhausted => {
                tracing::warn!(
                    operation = e.operation.as_deref(),
                    max_attempts = e.max_attempts,
                    duration_ms = e.duration_ms,
                    reason = e.reason.as_deref(),
                    "{label}"
                );
            }
            EventKind::PermanentFailure => {
                tracing::warn!(
                    operation = e.operation.as_deref(),
                    attempt = e.attempt,
                    reason = e.reason.as_deref(),
                    "{label}"
                );
            }
            EventKind::RateLimitDetected => {
                tracing::warn!(
                    operation = e.operation.as_deref(),
                    reason = e.reason.as_deref(),
                    wait_ms = e.delay_ms,
                    policy = e.policy_id.as_deref(),
                    "{label}"
                );
            }
            EventKind::CircuitOpened => {
                tracing::warn!(
                    policy = e.policy_id.as_deref(),
                    reason = e.reason.as_deref(),
                    "{label}"
                );
            }
            EventKind::CircuitHalfOpen | EventKind::CircuitClosed => {
                tracing::info!(policy = e.policy_id.as_deref(), "{label}");
            }
        }
    }

    fn name(&self) -> &'static str {
        "log-writer"
    }
}
