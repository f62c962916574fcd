//! Failure classification.
//!
//! Decides whether a failure is worth retrying before any policy math runs:
//! [`FailureClassifier`] produces a [`Classification`] (kind × category ×
//! severity) from an [`OpError`](crate::OpError), and
//! [`status_from_error`] implements the shared status-code extraction order
//! (context field → message scan → accessor) that the policy layer reuses.

mod classifier;

pub use classifier::{
    status_from_error, Classification, FailureCategory, FailureClassifier, FailureKind,
    RetryRecommendation, Severity, NON_RETRYABLE_STATUS, RETRYABLE_STATUS,
};
