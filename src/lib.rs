//! # retryvisor
//!
//! **Retryvisor** is a resilience library for Rust: retry policies, backoff
//! and jitter math, failure classification, rate-limit handling, and
//! per-policy circuit breakers, orchestrated by a single [`RetryManager`].
//!
//! ## Architecture
//! ### Overview
//! ```text
//!     execute("fetch-user", "standard", ctx, op)
//!            │
//! ┌──────────▼────────────────────────────────────────────────────────┐
//! │  RetryManager                                                     │
//! │  - policy registry (RwLock, seeded with 5 built-in defaults)      │
//! │  - Bus (broadcast events) + SubscriberSet (per-sub queues)        │
//! │  - circuit breakers (per policy id)                               │
//! │  - ActiveSessions (in-flight handles, drop-guard release)         │
//! │  - FailureClassifier + RateLimitHandler                           │
//! └──────────┬────────────────────────────────────────────────────────┘
//!            ▼
//!     RetrySession (one per execute() call)
//!            │ publishes Events:
//!            │ - SessionOpened / SessionClosed
//!            │ - AttemptStarted / AttemptSucceeded / AttemptFailed
//!            │ - RetryScheduled / RetriesExhausted / PermanentFailure
//!            │ - RateLimitDetected / CircuitOpened|HalfOpen|Closed
//!            ▼
//! ┌───────────────────────────────────────────────────────────────────┐
//! │                      Bus (broadcast channel)                      │
//! └─────────────────────────────────┬─────────────────────────────────┘
//!                                   ▼
//!                         manager listener ──► SubscriberSet
//!                                            ┌─────────┼─────────┐
//!                                            ▼         ▼         ▼
//!                                        LogWriter  metrics   custom
//! ```
//!
//! ### Attempt loop
//! ```text
//! loop attempt = 1..=policy.max_attempts {
//!   ├─► attempt > 1:
//!   │     ├─ deny_reason (disabled / over budget / no condition / window)
//!   │     ├─ breaker.admit() ─► CircuitOpen error | half-open probe
//!   │     ├─ delay = backoff(attempt) ∘ jitter ∘ extra_jitter
//!   │     ├─ publish RetryScheduled{ delay, policy, strategies }
//!   │     └─ sleep(delay) (cancellable ─► Canceled)
//!   ├─► run op (optional per-attempt deadline from RetryConfig)
//!   │     ├─ Ok  ──► record, breaker.on_success, return value
//!   │     └─ Err ──► record, classify
//!   │            ├─ permanent ─► PermanentFailure error
//!   │            └─ breaker.on_failure; rate-limit check may substitute
//!   │               a tuned policy for the remaining attempts
//!   └─► budget exhausted ─► MaxRetriesExceeded
//! }
//! ```
//!
//! ## Features
//! | Area               | Description                                                   | Key types / traits                         |
//! |--------------------|---------------------------------------------------------------|--------------------------------------------|
//! | **Policies**       | Retry budgets, backoff formulas, jitter, breaker settings.    | [`RetryPolicy`], [`BackoffKind`], [`JitterKind`] |
//! | **Classification** | Transient/permanent verdicts from errors and status codes.    | [`FailureClassifier`], [`Classification`]  |
//! | **Rate limits**    | Detect throttling and synthesize tuned policies.              | [`RateLimitDetector`], [`RateLimitHandler`] |
//! | **Orchestration**  | The attempt loop, sessions, circuit breakers.                 | [`RetryManager`], [`RetrySession`]         |
//! | **Subscriber API** | Hook into session lifecycle events (logging, metrics).        | [`Subscribe`], [`LogWriter`]               |
//! | **Errors**         | Typed terminal errors callers can branch on.                  | [`RetryError`], [`OpError`]                |
//! | **Configuration**  | Engine settings and the persisted policy document.            | [`RetryConfig`], [`PolicyFile`]            |
//!
//! ## Example
//! ```rust
//! use std::sync::Arc;
//! use retryvisor::{LogWriter, OpError, RetryConfig, RetryManager, Subscribe};
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let subs: Vec<Arc<dyn Subscribe>> = vec![Arc::new(LogWriter)];
//!     let manager = RetryManager::new(RetryConfig::default(), subs);
//!
//!     let mut calls = 0u32;
//!     let value = manager
//!         .execute("fetch-greeting", "quick", || {
//!             calls += 1;
//!             let n = calls;
//!             async move {
//!                 if n < 2 {
//!                     Err(OpError::new("connection timeout"))
//!                 } else {
//!                     Ok("hello")
//!                 }
//!             }
//!         })
//!         .await?;
//!
//!     assert_eq!(value, "hello");
//!     manager.shutdown().await;
//!     Ok(())
//! }
//! ```

mod classify;
mod config;
mod error;
mod events;
mod manager;
mod policy;
mod ratelimit;
mod subscribers;

// ---- Public re-exports ----

pub use classify::{
    status_from_error, Classification, FailureCategory, FailureClassifier, FailureKind,
    RetryRecommendation, Severity, NON_RETRYABLE_STATUS, RETRYABLE_STATUS,
};
pub use config::RetryConfig;
pub use error::{ExecContext, OpError, RetryError};
pub use events::{Bus, Event, EventKind};
pub use manager::{
    ActiveSessions, Admission, Breaker, CircuitState, RetryAttempt, RetryManager, RetrySession,
    SessionGuard, SessionHandle, Transition,
};
pub use policy::{
    BackoffArgs, BackoffKind, BreakerConfig, CustomBackoff, DenyReason, ExtraJitter, JitterKind,
    PolicyFile, RetryCondition, RetryPolicy,
};
pub use ratelimit::{RateLimitDetector, RateLimitHandler, RateLimitInfo, RateLimitKind};
pub use subscribers::{LogWriter, Subscribe, SubscriberSet};
