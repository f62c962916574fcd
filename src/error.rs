//! Error types used by the retry engine and the operations it drives.
//!
//! This module defines three things:
//!
//! - [`RetryError`] — the terminal errors an [`execute`](crate::RetryManager::execute)
//!   call can produce. Callers branch on the variant, never on message text.
//! - [`OpError`] — the classifiable error an operation reports for one attempt.
//! - [`ExecContext`] — per-execution context (correlation id, cancellation,
//!   free-form fields consumed by the classifier and rate-limit detector).
//!
//! [`RetryError`] provides `as_label()` for logs/metrics, mirroring the label
//! helpers on the rest of the event surface.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::classify::Classification;

/// # Terminal errors of a retry session.
///
/// Every `execute()` call returns either the operation's value or exactly one
/// of these, with structured context (policy id, attempt counts, last error).
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum RetryError {
    /// The requested policy is missing, disabled, or otherwise unusable.
    #[error("policy '{policy_id}' unusable: {reason}")]
    Configuration {
        /// Id of the policy that was requested.
        policy_id: String,
        /// Why the policy cannot be used.
        reason: String,
    },

    /// A policy field failed validation.
    #[error("invalid policy field '{field}': {reason}")]
    Validation {
        /// Name of the offending field.
        field: &'static str,
        /// What constraint was violated.
        reason: String,
    },

    /// The attempt budget was exhausted without success.
    #[error("'{operation}' failed after {attempts} attempts over {elapsed:?}: {last_error}")]
    MaxRetriesExceeded {
        /// Logical operation name.
        operation: String,
        /// Number of attempts made (equals the policy budget).
        attempts: u32,
        /// Wall-clock duration of the whole session.
        elapsed: Duration,
        /// The error from the final attempt.
        last_error: OpError,
    },

    /// The failure was judged permanent; retrying will not help.
    #[error("'{operation}' failed permanently on attempt {attempt}: {source}")]
    Permanent {
        /// Logical operation name.
        operation: String,
        /// Attempt on which the permanent failure was observed (1-based).
        attempt: u32,
        /// The classifier's verdict for the failure.
        classification: Classification,
        /// The error that was classified.
        source: OpError,
    },

    /// The policy's circuit breaker is open; the attempt was denied.
    #[error("circuit open for policy '{policy_id}'; retry in {retry_in:?}")]
    CircuitOpen {
        /// Policy whose breaker denied the attempt.
        policy_id: String,
        /// Remaining cooldown before a half-open probe is admitted.
        retry_in: Duration,
    },

    /// An external collaborator failed while the engine was using it.
    #[error("integration '{collaborator}' failed: {reason}")]
    Integration {
        /// Name of the collaborator (persistence, sink, ...).
        collaborator: &'static str,
        /// Failure description.
        reason: String,
    },

    /// The session was cancelled during a backoff wait.
    #[error("'{operation}' cancelled during backoff")]
    Canceled {
        /// Logical operation name.
        operation: String,
    },
}

impl RetryError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    ///
    /// # Example
    /// ```
    /// use retryvisor::RetryError;
    ///
    /// let err = RetryError::Canceled { operation: "sync".into() };
    /// assert_eq!(err.as_label(), "retry_canceled");
    /// ```
    pub fn as_label(&self) -> &'static str {
        match self {
            RetryError::Configuration { .. } => "retry_configuration",
            RetryError::Validation { .. } => "retry_validation",
            RetryError::MaxRetriesExceeded { .. } => "retry_exhausted",
            RetryError::Permanent { .. } => "retry_permanent",
            RetryError::CircuitOpen { .. } => "retry_circuit_open",
            RetryError::Integration { .. } => "retry_integration",
            RetryError::Canceled { .. } => "retry_canceled",
        }
    }
}

/// # Classifiable error reported by one attempt of an operation.
///
/// `OpError` carries the signals the [`FailureClassifier`](crate::FailureClassifier)
/// and [`RateLimitDetector`](crate::RateLimitDetector) read: the message, an
/// optional error type name, an explicit status-code accessor (instead of
/// duck-typing a `code` attribute), an optional retry-after hint, and an
/// optional source error.
///
/// # Example
/// ```
/// use retryvisor::OpError;
///
/// let err = OpError::new("503 service unavailable")
///     .with_status(503)
///     .with_type_name("ConnectionError");
/// assert_eq!(err.status(), Some(503));
/// ```
#[derive(Clone, Debug)]
pub struct OpError {
    message: String,
    type_name: Option<String>,
    status: Option<u16>,
    retry_after: Option<Duration>,
    source: Option<Arc<dyn std::error::Error + Send + Sync + 'static>>,
}

impl OpError {
    /// Creates an operation error with the given message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            type_name: None,
            status: None,
            retry_after: None,
            source: None,
        }
    }

    /// Attaches the error's type name (e.g. `"TimeoutError"`).
    ///
    /// Used by the classifier's type-name pattern checks and family fallback.
    pub fn with_type_name(mut self, name: impl Into<String>) -> Self {
        self.type_name = Some(name.into());
        self
    }

    /// Attaches an explicit status code (HTTP or protocol-level).
    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    /// Attaches a server-provided retry-after hint.
    pub fn with_retry_after(mut self, after: Duration) -> Self {
        self.retry_after = Some(after);
        self
    }

    /// Attaches the underlying source error.
    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Arc::new(source));
        self
    }

    /// The error message.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// The error type name, if any.
    pub fn type_name(&self) -> Option<&str> {
        self.type_name.as_deref()
    }

    /// The explicit status code, if any.
    pub fn status(&self) -> Option<u16> {
        self.status
    }

    /// The server-provided retry-after hint, if any.
    pub fn retry_after(&self) -> Option<Duration> {
        self.retry_after
    }
}

impl fmt::Display for OpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.type_name {
            Some(name) => write!(f, "{name}: {}", self.message),
            None => f.write_str(&self.message),
        }
    }
}

impl std::error::Error for OpError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_deref()
            .map(|e| e as &(dyn std::error::Error + 'static))
    }
}

impl From<&str> for OpError {
    fn from(message: &str) -> Self {
        OpError::new(message)
    }
}

impl From<String> for OpError {
    fn from(message: String) -> Self {
        OpError::new(message)
    }
}

/// # Per-execution context.
///
/// Carries the correlation id (accepted and propagated, never generated), the
/// cancellation token observed during backoff waits, and free-form string
/// fields that the classifier and rate-limit detector consult:
///
/// - `"status_code"` — explicit status for classification
/// - `"retry_after"` — seconds until the caller may retry
/// - `"client_id"`, `"service"`, `"endpoint"` — rate-limit cache key parts
#[derive(Clone, Debug, Default)]
pub struct ExecContext {
    /// Correlation id propagated into every emitted event.
    pub correlation_id: Option<String>,
    /// Cancellation token; cancelling it aborts the session at the next backoff wait.
    pub cancel: CancellationToken,
    /// Free-form context fields, snapshotted into each attempt record.
    pub fields: BTreeMap<String, String>,
}

impl ExecContext {
    /// Creates an empty context with a fresh (never-cancelled) token.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the correlation id.
    pub fn with_correlation_id(mut self, id: impl Into<String>) -> Self {
        self.correlation_id = Some(id.into());
        self
    }

    /// Sets the cancellation token.
    pub fn with_cancel(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Adds a context field.
    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    /// Looks up a context field.
    pub fn field(&self, key: &str) -> Option<&str> {
        self.fields.get(key).map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn labels_are_stable() {
        let err = RetryError::Configuration {
            policy_id: "p".into(),
            reason: "missing".into(),
        };
        assert_eq!(err.as_label(), "retry_configuration");

        let err = RetryError::CircuitOpen {
            policy_id: "p".into(),
            retry_in: Duration::from_secs(3),
        };
        assert_eq!(err.as_label(), "retry_circuit_open");
    }

    #[test]
    fn op_error_display_includes_type_name() {
        let plain = OpError::new("boom");
        assert_eq!(plain.to_string(), "boom");

        let typed = OpError::new("boom").with_type_name("IoError");
        assert_eq!(typed.to_string(), "IoError: boom");
    }

    #[test]
    fn op_error_source_chain() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset");
        let err = OpError::new("connection reset").with_source(io);
        let source = std::error::Error::source(&err).expect("source");
        assert!(source.to_string().contains("reset"));
    }

    #[test]
    fn context_fields_round_trip() {
        let ctx = ExecContext::new()
            .with_correlation_id("abc-123")
            .with_field("service", "billing");
        assert_eq!(ctx.correlation_id.as_deref(), Some("abc-123"));
        assert_eq!(ctx.field("service"), Some("billing"));
        assert_eq!(ctx.field("missing"), None);
    }
}
