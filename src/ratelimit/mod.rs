//! Rate-limit detection and handling.
//!
//! When a failure looks like throttling, retrying on the caller's own policy
//! wastes the budget. [`RateLimitDetector`] recognizes the signal (HTTP 429,
//! explicit wait hints, quota, concurrency, bandwidth), and
//! [`RateLimitHandler`] caches the occurrence per `client:service:endpoint`
//! key and synthesizes a [`RetryPolicy`](crate::RetryPolicy) tuned to the
//! detected wait for the remaining attempts.

mod detector;
mod handler;

pub use detector::{RateLimitDetector, RateLimitInfo, RateLimitKind};
pub use handler::RateLimitHandler;
