//! Session orchestration.
//!
//! The [`RetryManager`] drives the attempt loop described at the crate root;
//! this module also holds its supporting state machines and records:
//!
//! - [`Breaker`] per-policy circuit breaker (closed / open / half-open)
//! - [`RetrySession`] / [`RetryAttempt`] the record of one `execute()` call
//! - [`ActiveSessions`] in-flight session registry with drop-guard release

mod breaker;
#[allow(clippy::module_inception)]
mod manager;
mod session;

pub use breaker::{Admission, Breaker, CircuitState, Transition};
pub use manager::RetryManager;
pub use session::{ActiveSessions, RetryAttempt, RetrySession, SessionGuard, SessionHandle};
