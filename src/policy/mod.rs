//! Retry policies.
//!
//! This module groups the knobs that control **if/when** an operation is
//! retried and **how long** to wait between attempts.
//!
//! ## Contents
//! - [`RetryPolicy`] the full retry plan (budget, patterns, breaker settings)
//! - [`BackoffKind`] how delays grow (fixed / linear / exponential / custom)
//! - [`JitterKind`]  randomization to avoid thundering herd
//! - [`ExtraJitter`] optional additive jitter variants
//! - [`PolicyFile`]  the persisted-configuration document
//!
//! ## Quick wiring
//! ```text
//! RetryPolicy { backoff, jitter, max_attempts, ... }
//!      └─► manager::RetryManager uses:
//!           - deny_reason(...) to decide continue/abort
//!           - calculate_delay(attempt) to schedule the next attempt
//! ```
//!
//! ## Defaults
//! - `BackoffKind::Exponential` with multiplier 2.0
//! - `JitterKind::None`; consider `Equal` for balanced randomness
//! - Retry conditions default to `{TransientFailure}` after normalization

mod backoff;
mod file;
mod jitter;
#[allow(clippy::module_inception)]
mod policy;

pub use backoff::{BackoffArgs, BackoffKind, CustomBackoff};
pub use file::PolicyFile;
pub use jitter::{ExtraJitter, JitterKind};
pub use policy::{BreakerConfig, DenyReason, RetryCondition, RetryPolicy};
