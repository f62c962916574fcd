//! # Jitter for retry delays.
//!
//! [`JitterKind`] randomizes a computed backoff delay to prevent thundering
//! herd effects when many sessions retry simultaneously:
//!
//! - [`JitterKind::None`] — no randomization, predictable delays
//! - [`JitterKind::Full`] — random delay in `[0, delay]` (most aggressive)
//! - [`JitterKind::Equal`] — `delay/2 ± delay/2 × jitter_factor` (balanced)
//! - [`JitterKind::Decorrelated`] — `random[base, delay × 3]`, capped at max
//!
//! [`ExtraJitter`] holds the optional additive variants: instead of replacing
//! the delay they add an offset on top of it (exponential-distributed,
//! Gaussian, bounded, adaptive-by-attempt, per-client spread).
//!
//! Edge behavior worth relying on: `jitter_factor = 0` makes
//! [`JitterKind::Equal`] deterministic, and the decorrelated sampling range
//! never shrinks as the attempt number (and therefore the base delay) grows.

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

/// Strategy randomizing a backoff delay.
///
/// ## Trade-offs
/// - **None**: predictable, but risks thundering herd
/// - **Full**: maximum randomness, aggressive load spreading
/// - **Equal**: balanced (recommended for most policies)
/// - **Decorrelated**: widens with the delay, strongest decorrelation
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum JitterKind {
    /// No jitter: use the exact backoff delay.
    #[default]
    None,
    /// Full jitter: random delay in `[0, delay]`.
    Full,
    /// Equal jitter: `delay/2 ± delay/2 × jitter_factor × U(−1, 1)`.
    ///
    /// With `jitter_factor = 0` this is deterministic at `delay/2`.
    Equal,
    /// Decorrelated jitter: `random[base, delay × 3]`, capped at max.
    ///
    /// Requires context (base, max) via [`apply_decorrelated`](Self::apply_decorrelated).
    Decorrelated,
}

impl JitterKind {
    /// Returns the camelCase name used in events and serialized policies.
    pub fn as_str(&self) -> &'static str {
        match self {
            JitterKind::None => "none",
            JitterKind::Full => "full",
            JitterKind::Equal => "equal",
            JitterKind::Decorrelated => "decorrelated",
        }
    }

    /// Applies jitter to the given delay.
    ///
    /// ### Note
    /// For `Decorrelated`, this method returns the input unchanged; use
    /// [`apply_decorrelated`](Self::apply_decorrelated), which takes the
    /// extra context it needs (base delay, cap).
    pub fn apply(&self, delay: Duration, jitter_factor: f64) -> Duration {
        match self {
            JitterKind::None => delay,
            JitterKind::Full => full_jitter(delay),
            JitterKind::Equal => equal_jitter(delay, jitter_factor),
            JitterKind::Decorrelated => delay,
        }
    }

    /// Applies decorrelated jitter with full context.
    ///
    /// Samples uniformly from `[base, delay × 3]`, clamped to `max`. For
    /// non-decorrelated kinds this falls back to `apply(delay, jitter_factor)`.
    pub fn apply_decorrelated(
        &self,
        base: Duration,
        delay: Duration,
        max: Duration,
        jitter_factor: f64,
    ) -> Duration {
        if !matches!(self, JitterKind::Decorrelated) {
            return self.apply(delay, jitter_factor);
        }

        let base_ms = base.as_millis() as u64;
        let delay_ms = delay.as_millis() as u64;
        let max_ms = max.as_millis() as u64;

        let upper = delay_ms.saturating_mul(3).min(max_ms).max(base_ms);
        if base_ms >= upper {
            return base.min(max);
        }
        Duration::from_millis(rand::rng().random_range(base_ms..=upper))
    }
}

/// Full jitter: `random[0, delay]`.
fn full_jitter(delay: Duration) -> Duration {
    let ms = delay.as_millis() as u64;
    if ms == 0 {
        return Duration::ZERO;
    }
    Duration::from_millis(rand::rng().random_range(0..=ms))
}

/// Equal jitter: `delay/2 ± delay/2 × jitter_factor × U(−1, 1)`.
fn equal_jitter(delay: Duration, jitter_factor: f64) -> Duration {
    let half = delay.as_secs_f64() / 2.0;
    let amplitude = half * jitter_factor.clamp(0.0, 1.0);
    if amplitude == 0.0 {
        return Duration::from_secs_f64(half);
    }
    let offset: f64 = rand::rng().random_range(-amplitude..=amplitude);
    Duration::from_secs_f64((half + offset).max(0.0))
}

/// Optional additive jitter: adds an offset to the delay rather than
/// replacing it.
///
/// Useful for smearing herds that survive the multiplicative jitter kinds,
/// e.g. many clients that share the same policy and failure moment.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "kind")]
pub enum ExtraJitter {
    /// Exponentially distributed offset with the given mean.
    Exponential {
        /// Mean of the sampled offset.
        mean: Duration,
    },
    /// Gaussian offset (negative samples clamp to zero).
    Gaussian {
        /// Standard deviation of the sampled offset.
        std_dev: Duration,
    },
    /// Uniform offset in `[0, bound]`.
    Bounded {
        /// Upper bound of the sampled offset.
        bound: Duration,
    },
    /// Uniform offset in `[0, step × attempt]` — widens with every attempt.
    AdaptiveByAttempt {
        /// Per-attempt widening step.
        step: Duration,
    },
    /// Deterministic per-client offset in `[0, window)`, derived from the
    /// client key. Spreads clients sharing a policy across the window.
    PerClient {
        /// Stable client identity.
        client: String,
        /// Spread window.
        window: Duration,
    },
}

impl ExtraJitter {
    /// Computes the additive offset for the given attempt.
    pub fn offset(&self, attempt: u32) -> Duration {
        match self {
            ExtraJitter::Exponential { mean } => {
                let u: f64 = rand::rng().random_range(0.0..1.0);
                Duration::from_secs_f64(-mean.as_secs_f64() * (1.0 - u).ln())
            }
            ExtraJitter::Gaussian { std_dev } => {
                // Box-Muller transform over two uniforms.
                let mut rng = rand::rng();
                let u1: f64 = rng.random_range(f64::EPSILON..1.0);
                let u2: f64 = rng.random_range(0.0..1.0);
                let z = (-2.0 * u1.ln()).sqrt() * (std::f64::consts::TAU * u2).cos();
                Duration::from_secs_f64((z * std_dev.as_secs_f64()).max(0.0))
            }
            ExtraJitter::Bounded { bound } => {
                let ms = bound.as_millis() as u64;
                if ms == 0 {
                    Duration::ZERO
                } else {
                    Duration::from_millis(rand::rng().random_range(0..=ms))
                }
            }
            ExtraJitter::AdaptiveByAttempt { step } => {
                let upper = (step.as_millis() as u64).saturating_mul(u64::from(attempt.max(1)));
                if upper == 0 {
                    Duration::ZERO
                } else {
                    Duration::from_millis(rand::rng().random_range(0..=upper))
                }
            }
            ExtraJitter::PerClient { client, window } => {
                let window_ms = window.as_millis() as u64;
                if window_ms == 0 {
                    Duration::ZERO
                } else {
                    Duration::from_millis(fnv1a(client.as_bytes()) % window_ms)
                }
            }
        }
    }

    /// Adds this variant's offset to the given delay.
    pub fn apply(&self, delay: Duration, attempt: u32) -> Duration {
        delay.saturating_add(self.offset(attempt))
    }
}

/// FNV-1a over the client key: stable across runs, no dependency.
fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for b in bytes {
        hash ^= u64::from(*b);
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    hash
}
