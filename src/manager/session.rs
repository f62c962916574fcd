//! # Retry sessions and the active-session registry.
//!
//! A [`RetrySession`] is the record of one `execute()` call: which policy
//! governed it, every [`RetryAttempt`] in order, and how it ended. The
//! session is owned exclusively by the loop driving it; only a lightweight
//! [`SessionHandle`] is visible to the outside through [`ActiveSessions`].
//!
//! Registration returns a [`SessionGuard`] that removes the handle on drop,
//! so every exit path (success, terminal error, cancellation mid-sleep)
//! releases the session without cooperation from the loop.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use dashmap::DashMap;
use uuid::Uuid;

use crate::error::{ExecContext, OpError};

/// One loop iteration, immutable after creation.
#[derive(Debug, Clone)]
pub struct RetryAttempt {
    /// 1-based attempt number.
    pub number: u32,
    /// When the attempt started.
    pub at: SystemTime,
    /// Backoff delay applied before this attempt (zero for the first).
    pub delay: Duration,
    /// The failure, when the attempt did not succeed.
    pub error: Option<OpError>,
    /// Whether the operation returned `Ok`.
    pub success: bool,
    /// How long the operation ran.
    pub duration: Duration,
    /// Snapshot of the execution context's fields at attempt time.
    pub context: BTreeMap<String, String>,
}

impl RetryAttempt {
    /// Records a successful attempt.
    pub fn succeeded(number: u32, delay: Duration, duration: Duration, ctx: &ExecContext) -> Self {
        Self {
            number,
            at: SystemTime::now(),
            delay,
            error: None,
            success: true,
            duration,
            context: ctx.fields.clone(),
        }
    }

    /// Records a failed attempt with its error.
    pub fn failed(
        number: u32,
        delay: Duration,
        duration: Duration,
        error: OpError,
        ctx: &ExecContext,
    ) -> Self {
        Self {
            number,
            at: SystemTime::now(),
            delay,
            error: Some(error),
            success: false,
            duration,
            context: ctx.fields.clone(),
        }
    }
}

/// The full record of one `execute()` call.
#[derive(Debug, Clone)]
pub struct RetrySession {
    /// Unique session id.
    pub id: Uuid,
    /// Governing policy at session start.
    pub policy_id: String,
    /// Logical operation name.
    pub operation: String,
    /// When `execute()` was entered.
    pub started_at: SystemTime,
    /// When the session closed, if it has.
    pub ended_at: Option<SystemTime>,
    /// Attempts in order.
    pub attempts: Vec<RetryAttempt>,
    /// Whether the session ended with a successful attempt.
    pub success: bool,
    /// Terminal error, when unsuccessful.
    pub final_error: Option<OpError>,
}

impl RetrySession {
    pub fn new(policy_id: impl Into<String>, operation: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            policy_id: policy_id.into(),
            operation: operation.into(),
            started_at: SystemTime::now(),
            ended_at: None,
            attempts: Vec::new(),
            success: false,
            final_error: None,
        }
    }

    /// Appends an attempt record.
    pub fn record(&mut self, attempt: RetryAttempt) {
        self.attempts.push(attempt);
    }

    /// Closes the session as successful.
    pub fn close_success(&mut self) {
        self.success = true;
        self.ended_at = Some(SystemTime::now());
    }

    /// Closes the session as failed with its terminal error.
    pub fn close_failed(&mut self, error: Option<OpError>) {
        self.success = false;
        self.final_error = error;
        self.ended_at = Some(SystemTime::now());
    }

    /// Total attempts so far.
    pub fn attempt_count(&self) -> u32 {
        self.attempts.len() as u32
    }

    /// Wall time since the session opened (or its full span once closed).
    pub fn elapsed(&self) -> Duration {
        let end = self.ended_at.unwrap_or_else(SystemTime::now);
        end.duration_since(self.started_at).unwrap_or(Duration::ZERO)
    }
}

/// What the registry exposes about a running session.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    pub id: Uuid,
    pub operation: Arc<str>,
    pub policy_id: Arc<str>,
    pub started_at: SystemTime,
}

/// Concurrent registry of in-flight sessions.
///
/// Cheap to clone; all clones share the same map.
#[derive(Debug, Clone, Default)]
pub struct ActiveSessions {
    inner: Arc<DashMap<Uuid, SessionHandle>>,
}

impl ActiveSessions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a session and returns the guard that will release it.
    #[must_use]
    pub fn register(&self, session: &RetrySession) -> SessionGuard {
        let handle = SessionHandle {
            id: session.id,
            operation: Arc::from(session.operation.as_str()),
            policy_id: Arc::from(session.policy_id.as_str()),
            started_at: session.started_at,
        };
        self.inner.insert(session.id, handle);
        SessionGuard {
            id: session.id,
            map: Arc::clone(&self.inner),
        }
    }

    /// Number of in-flight sessions.
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Point-in-time copy of all live handles.
    pub fn snapshot(&self) -> Vec<SessionHandle> {
        self.inner.iter().map(|e| e.value().clone()).collect()
    }
}

/// Removes its session from the registry on drop.
#[derive(Debug)]
pub struct SessionGuard {
    id: Uuid,
    map: Arc<DashMap<Uuid, SessionHandle>>,
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.map.remove(&self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_records_attempts_in_order() {
        let ctx = ExecContext::default();
        let mut session = RetrySession::new("standard", "fetch");
        session.record(RetryAttempt::failed(
            1,
            Duration::ZERO,
            Duration::from_millis(5),
            OpError::new("timeout"),
            &ctx,
        ));
        session.record(RetryAttempt::succeeded(
            2,
            Duration::from_millis(100),
            Duration::from_millis(3),
            &ctx,
        ));
        session.close_success();

        assert_eq!(session.attempt_count(), 2);
        assert!(!session.attempts[0].success);
        assert!(session.attempts[1].success);
        assert!(session.success);
        assert!(session.ended_at.is_some());
    }

    #[test]
    fn failed_session_keeps_terminal_error() {
        let mut session = RetrySession::new("standard", "fetch");
        session.close_failed(Some(OpError::new("boom")));
        assert!(!session.success);
        assert_eq!(session.final_error.as_ref().unwrap().message(), "boom");
    }

    #[test]
    fn guard_releases_handle_on_drop() {
        let registry = ActiveSessions::new();
        let session = RetrySession::new("standard", "fetch");
        {
            let _guard = registry.register(&session);
            assert_eq!(registry.len(), 1);
            assert_eq!(registry.snapshot()[0].operation.as_ref(), "fetch");
        }
        assert!(registry.is_empty());
    }

    #[test]
    fn concurrent_registrations_are_independent() {
        let registry = ActiveSessions::new();
        let a = RetrySession::new("standard", "a");
        let b = RetrySession::new("standard", "b");
        let ga = registry.register(&a);
        let gb = registry.register(&b);
        assert_eq!(registry.len(), 2);
        drop(ga);
        assert_eq!(registry.len(), 1);
        drop(gb);
        assert!(registry.is_empty());
    }

    #[test]
    fn attempt_snapshot_captures_context_fields() {
        let ctx = ExecContext::default().with_field("endpoint", "/users");
        let attempt = RetryAttempt::failed(
            1,
            Duration::ZERO,
            Duration::ZERO,
            OpError::new("x"),
            &ctx,
        );
        assert_eq!(attempt.context.get("endpoint").map(String::as_str), Some("/users"));
    }
}
