//! # Backoff computation for retry delays.
//!
//! [`BackoffKind`] selects the formula that turns an attempt number and the
//! policy parameters into a base delay:
//!
//! - [`BackoffKind::Fixed`] — `base`
//! - [`BackoffKind::Linear`] — `base × attempt`
//! - [`BackoffKind::Exponential`] — `base × multiplier^(attempt − 1)`
//! - [`BackoffKind::ExponentialWithJitter`] — exponential, perturbed by
//!   `±jitter_factor × delay`
//! - [`BackoffKind::Custom`] — caller-supplied function; any failure of that
//!   function falls back to [`BackoffKind::Exponential`]
//!
//! Every output is clamped to the policy's `max_delay`. The base delay is
//! derived purely from the attempt number, so jitter output never feeds back
//! into subsequent calculations — this prevents the negative feedback loop
//! that causes delays to shrink over time.
//!
//! # Example
//! ```rust
//! use std::time::Duration;
//! use retryvisor::{BackoffArgs, BackoffKind};
//!
//! let args = BackoffArgs {
//!     attempt: 3,
//!     base: Duration::from_millis(100),
//!     max: Duration::from_secs(10),
//!     multiplier: 2.0,
//!     jitter_factor: 0.0,
//! };
//! // 100ms × 2^(3−1) = 400ms
//! assert_eq!(BackoffKind::Exponential.base_delay(&args, None), Duration::from_millis(400));
//! ```

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

/// Inputs to a backoff computation for one attempt.
#[derive(Clone, Copy, Debug)]
pub struct BackoffArgs {
    /// Attempt number (1-based). Values below 1 are treated as 1.
    pub attempt: u32,
    /// Initial delay before the first retry.
    pub base: Duration,
    /// Maximum delay cap.
    pub max: Duration,
    /// Multiplicative growth factor for exponential backoff (`> 0`).
    pub multiplier: f64,
    /// Jitter amplitude in `[0, 1]`, used by [`BackoffKind::ExponentialWithJitter`].
    pub jitter_factor: f64,
}

/// Caller-supplied backoff function.
///
/// Receives the full argument set and returns the computed delay, or an error
/// message when it cannot. A failing function never aborts a session; the
/// engine degrades to exponential backoff instead.
pub type CustomBackoff = Arc<dyn Fn(&BackoffArgs) -> Result<Duration, String> + Send + Sync>;

/// Formula selecting how retry delays grow with the attempt number.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum BackoffKind {
    /// Constant delay: `base`.
    Fixed,
    /// Linear growth: `base × attempt`.
    Linear,
    /// Exponential growth: `base × multiplier^(attempt − 1)` (default).
    #[default]
    Exponential,
    /// Exponential growth with a built-in symmetric perturbation of
    /// `±jitter_factor × delay`, clamped to `[0, max]`.
    ExponentialWithJitter,
    /// Caller-supplied function; falls back to exponential on failure.
    Custom,
}

impl BackoffKind {
    /// Returns the camelCase name used in events and serialized policies.
    pub fn as_str(&self) -> &'static str {
        match self {
            BackoffKind::Fixed => "fixed",
            BackoffKind::Linear => "linear",
            BackoffKind::Exponential => "exponential",
            BackoffKind::ExponentialWithJitter => "exponentialWithJitter",
            BackoffKind::Custom => "custom",
        }
    }

    /// Computes the base delay for the given attempt, clamped to `args.max`.
    ///
    /// `custom` is consulted only for [`BackoffKind::Custom`]; a missing or
    /// failing function degrades to the exponential formula rather than
    /// aborting the session.
    pub fn base_delay(&self, args: &BackoffArgs, custom: Option<&CustomBackoff>) -> Duration {
        let attempt = args.attempt.max(1);
        match self {
            BackoffKind::Fixed => args.base.min(args.max),
            BackoffKind::Linear => {
                clamp_secs(args.base.as_secs_f64() * f64::from(attempt), args.max)
            }
            BackoffKind::Exponential => exponential(attempt, args),
            BackoffKind::ExponentialWithJitter => {
                let delay = exponential(attempt, args);
                let amplitude = delay.as_secs_f64() * args.jitter_factor.clamp(0.0, 1.0);
                let offset = if amplitude > 0.0 {
                    rand::rng().random_range(-amplitude..=amplitude)
                } else {
                    0.0
                };
                clamp_secs((delay.as_secs_f64() + offset).max(0.0), args.max)
            }
            BackoffKind::Custom => match custom.map(|f| f(args)) {
                Some(Ok(delay)) => delay.min(args.max),
                Some(Err(_)) | None => exponential(attempt, args),
            },
        }
    }
}

/// `base × multiplier^(attempt − 1)`, clamped to `max`.
///
/// Non-finite or negative intermediate values (overflow at huge attempt
/// numbers) clamp to `max`.
fn exponential(attempt: u32, args: &BackoffArgs) -> Duration {
    let exp = (attempt - 1).min(i32::MAX as u32) as i32;
    clamp_secs(args.base.as_secs_f64() * args.multiplier.powi(exp), args.max)
}

fn clamp_secs(secs: f64, max: Duration) -> Duration {
    if !secs.is_finite() || secs < 0.0 || secs > max.as_secs_f64() {
        max
    } else {
        Duration::from_secs_f64(secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(attempt: u32) -> BackoffArgs {
        BackoffArgs {
            attempt,
            base: Duration::from_millis(100),
            max: Duration::from_secs(30),
            multiplier: 2.0,
            jitter_factor: 0.0,
        }
    }

    #[test]
    fn fixed_is_constant() {
        for attempt in 1..20 {
            assert_eq!(
                BackoffKind::Fixed.base_delay(&args(attempt), None),
                Duration::from_millis(100),
                "attempt {} should be constant",
                attempt
            );
        }
    }

    #[test]
    fn linear_grows_by_attempt() {
        assert_eq!(
            BackoffKind::Linear.base_delay(&args(1), None),
            Duration::from_millis(100)
        );
        assert_eq!(
            BackoffKind::Linear.base_delay(&args(4), None),
            Duration::from_millis(400)
        );
    }

    #[test]
    fn exponential_law_with_idempotent_cap() {
        let mut prev = Duration::ZERO;
        for attempt in 1..=20 {
            let delay = BackoffKind::Exponential.base_delay(&args(attempt), None);
            let expected =
                Duration::from_secs_f64((0.1 * 2f64.powi(attempt as i32 - 1)).min(30.0));
            assert_eq!(delay, expected, "attempt {}", attempt);
            assert!(delay >= prev, "delay must be non-decreasing");
            prev = delay;
        }
        // Once capped, further attempts stay at the cap.
        assert_eq!(
            BackoffKind::Exponential.base_delay(&args(20), None),
            Duration::from_secs(30)
        );
        assert_eq!(
            BackoffKind::Exponential.base_delay(&args(21), None),
            Duration::from_secs(30)
        );
    }

    #[test]
    fn huge_attempt_clamps_to_max() {
        assert_eq!(
            BackoffKind::Exponential.base_delay(&args(u32::MAX), None),
            Duration::from_secs(30)
        );
    }

    #[test]
    fn attempt_zero_is_treated_as_one() {
        assert_eq!(
            BackoffKind::Exponential.base_delay(&args(0), None),
            Duration::from_millis(100)
        );
    }

    #[test]
    fn exponential_with_jitter_stays_in_bounds() {
        let mut a = args(5);
        a.jitter_factor = 0.5;
        for _ in 0..100 {
            let delay = BackoffKind::ExponentialWithJitter.base_delay(&a, None);
            // base value is 1.6s; ±50% keeps it within [0.8s, 2.4s]
            assert!(delay >= Duration::from_millis(800), "delay {:?}", delay);
            assert!(delay <= Duration::from_millis(2400), "delay {:?}", delay);
        }
    }

    #[test]
    fn exponential_with_zero_jitter_is_deterministic() {
        let delay = BackoffKind::ExponentialWithJitter.base_delay(&args(3), None);
        assert_eq!(delay, Duration::from_millis(400));
    }

    #[test]
    fn custom_function_is_used_and_clamped() {
        let custom: CustomBackoff = Arc::new(|a: &BackoffArgs| {
            Ok(Duration::from_secs(u64::from(a.attempt) * 60))
        });
        assert_eq!(
            BackoffKind::Custom.base_delay(&args(1), Some(&custom)),
            Duration::from_secs(30),
            "custom result is clamped to max"
        );
    }

    #[test]
    fn failing_custom_falls_back_to_exponential() {
        let failing: CustomBackoff = Arc::new(|_: &BackoffArgs| Err("broken".to_string()));
        assert_eq!(
            BackoffKind::Custom.base_delay(&args(3), Some(&failing)),
            Duration::from_millis(400)
        );
        // Missing function behaves the same.
        assert_eq!(
            BackoffKind::Custom.base_delay(&args(3), None),
            Duration::from_millis(400)
        );
    }

    #[test]
    fn serde_tags_are_camel_case() {
        let json = serde_json::to_string(&BackoffKind::ExponentialWithJitter).unwrap();
        assert_eq!(json, "\"exponentialWithJitter\"");
        let back: BackoffKind = serde_json::from_str(&json).unwrap();
        assert_eq!(back, BackoffKind::ExponentialWithJitter);
    }
}
