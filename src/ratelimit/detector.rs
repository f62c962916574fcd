//! # Rate-limit signal detection.
//!
//! [`RateLimitDetector`] inspects a failed operation's error (and optional
//! execution context) for rate-limiting signals: HTTP 429 phrasing, "try
//! again in N seconds" hints, quota exhaustion, concurrency caps, and
//! bandwidth/payload limits. A hit produces a [`RateLimitInfo`] describing
//! what was detected and how long to wait.
//!
//! Detection is purely textual plus the explicit status / retry-after
//! channels; it never blocks and never consults the network.

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::classify::status_from_error;
use crate::error::{ExecContext, OpError};
use crate::policy::BackoffKind;

/// What kind of limit was recognized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RateLimitKind {
    /// HTTP 429 / "too many requests" phrasing.
    Http429,
    /// An explicit "try again in N seconds/minutes" hint.
    TimeBased,
    /// Quota or usage-allowance exhaustion.
    QuotaExceeded,
    /// Concurrency / connection-count cap.
    ConcurrentLimit,
    /// Bandwidth or payload-size limit.
    BandwidthLimit,
    /// Generic API limit phrasing without a clearer signal.
    ApiLimit,
    /// Caller-tagged limit (context field `rate_limit_kind`).
    Custom,
}

impl RateLimitKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RateLimitKind::Http429 => "http429",
            RateLimitKind::TimeBased => "timeBased",
            RateLimitKind::QuotaExceeded => "quotaExceeded",
            RateLimitKind::ConcurrentLimit => "concurrentLimit",
            RateLimitKind::BandwidthLimit => "bandwidthLimit",
            RateLimitKind::ApiLimit => "apiLimit",
            RateLimitKind::Custom => "custom",
        }
    }

    /// Default wait when neither retry-after nor a reset hint is available.
    pub fn default_wait(&self) -> Duration {
        match self {
            RateLimitKind::Http429 => Duration::from_secs(60),
            RateLimitKind::QuotaExceeded => Duration::from_secs(300),
            RateLimitKind::ConcurrentLimit => Duration::from_secs(5),
            _ => Duration::from_secs(30),
        }
    }
}

/// A recognized rate-limit occurrence.
///
/// Cached by the handler per logical key until it self-expires; all waits are
/// computed relative to `detected_at`.
#[derive(Debug, Clone)]
pub struct RateLimitInfo {
    /// The limit family that matched.
    pub kind: RateLimitKind,
    /// Backoff the synthesized policy should use.
    pub suggested_backoff: BackoffKind,
    /// Numeric limit value, when the message stated one ("limit: 100").
    pub limit_value: Option<u64>,
    /// Limit window, when the message stated one ("per hour").
    pub window: Option<Duration>,
    /// Server-provided retry-after, when present.
    pub retry_after: Option<Duration>,
    /// Time until the limit resets, when the message stated one.
    pub reset_after: Option<Duration>,
    /// When this occurrence was detected.
    pub detected_at: Instant,
}

impl RateLimitInfo {
    /// How long to wait before the next attempt.
    ///
    /// Retry-after and reset hints are remainders measured from
    /// `detected_at`; without either, the per-kind default applies flat.
    pub fn wait_time(&self) -> Duration {
        match self.retry_after.or(self.reset_after) {
            Some(budget) => budget.saturating_sub(self.detected_at.elapsed()),
            None => self.kind.default_wait(),
        }
    }

    /// True once the occurrence's wait window has fully elapsed.
    pub fn is_expired(&self) -> bool {
        let budget = self
            .retry_after
            .or(self.reset_after)
            .unwrap_or_else(|| self.kind.default_wait());
        self.detected_at.elapsed() >= budget
    }
}

/// Textual + structural rate-limit detector.
#[derive(Debug, Default, Clone)]
pub struct RateLimitDetector;

impl RateLimitDetector {
    pub fn new() -> Self {
        Self
    }

    /// Inspects an error for rate-limit signals.
    ///
    /// Returns `None` when nothing rate-limit-shaped is found; the retry loop
    /// then proceeds with the caller's own policy.
    pub fn detect(&self, error: &OpError, ctx: Option<&ExecContext>) -> Option<RateLimitInfo> {
        let message = error.message().to_lowercase();

        let kind = self.match_kind(&message, error, ctx)?;

        let retry_after = error
            .retry_after()
            .or_else(|| ctx.and_then(|c| c.field("retry_after")?.parse().ok().map(Duration::from_secs)))
            .or_else(|| wait_hint(&message));

        Some(RateLimitInfo {
            kind,
            suggested_backoff: suggest_backoff(kind, retry_after),
            limit_value: limit_value(&message),
            window: limit_window(&message),
            retry_after,
            reset_after: reset_hint(&message),
            detected_at: Instant::now(),
        })
    }

    fn match_kind(
        &self,
        message: &str,
        error: &OpError,
        ctx: Option<&ExecContext>,
    ) -> Option<RateLimitKind> {
        if ctx.is_some_and(|c| c.field("rate_limit_kind").is_some()) {
            return Some(RateLimitKind::Custom);
        }
        if status_from_error(error, ctx) == Some(429)
            || message.contains("too many requests")
            || message.contains("rate limit")
            || message.contains("rate-limit")
        {
            return Some(RateLimitKind::Http429);
        }
        if message.contains("quota")
            || message.contains("usage limit")
            || message.contains("allowance exceeded")
        {
            return Some(RateLimitKind::QuotaExceeded);
        }
        if message.contains("concurrent")
            || message.contains("too many connections")
            || message.contains("connection limit")
        {
            return Some(RateLimitKind::ConcurrentLimit);
        }
        if message.contains("bandwidth")
            || message.contains("payload too large")
            || message.contains("request entity too large")
        {
            return Some(RateLimitKind::BandwidthLimit);
        }
        if message.contains("try again in") || message.contains("retry in") {
            return Some(RateLimitKind::TimeBased);
        }
        if message.contains("api limit") || message.contains("throttle") {
            return Some(RateLimitKind::ApiLimit);
        }
        None
    }
}

/// Strategy choice is rule-based, sized off the detected wait.
fn suggest_backoff(kind: RateLimitKind, retry_after: Option<Duration>) -> BackoffKind {
    let wait = retry_after.unwrap_or_else(|| kind.default_wait());
    match kind {
        RateLimitKind::Http429 if wait >= Duration::from_secs(60) => BackoffKind::Exponential,
        RateLimitKind::Http429 => BackoffKind::Fixed,
        RateLimitKind::QuotaExceeded => BackoffKind::Linear,
        RateLimitKind::ConcurrentLimit => BackoffKind::Fixed,
        RateLimitKind::BandwidthLimit => BackoffKind::Exponential,
        _ => BackoffKind::ExponentialWithJitter,
    }
}

/// Parses "retry after 30 seconds" / "try again in 2 minutes" style hints.
fn wait_hint(message: &str) -> Option<Duration> {
    for marker in ["retry after", "try again in", "retry in", "wait"] {
        if let Some(secs) = duration_after(message, marker) {
            return Some(secs);
        }
    }
    None
}

/// Parses "resets in 300 seconds" style hints.
fn reset_hint(message: &str) -> Option<Duration> {
    for marker in ["resets in", "reset in", "resets after"] {
        if let Some(d) = duration_after(message, marker) {
            return Some(d);
        }
    }
    None
}

/// Parses "limit: 100" / "limit of 100".
fn limit_value(message: &str) -> Option<u64> {
    for marker in ["limit:", "limit of", "limit is"] {
        if let Some(n) = number_after(message, marker) {
            return Some(n);
        }
    }
    None
}

/// Parses "per hour|day|month|minute|second" window phrasing.
fn limit_window(message: &str) -> Option<Duration> {
    const DAY: u64 = 86_400;
    if message.contains("per second") {
        Some(Duration::from_secs(1))
    } else if message.contains("per minute") {
        Some(Duration::from_secs(60))
    } else if message.contains("per hour") {
        Some(Duration::from_secs(3_600))
    } else if message.contains("per day") {
        Some(Duration::from_secs(DAY))
    } else if message.contains("per month") {
        Some(Duration::from_secs(30 * DAY))
    } else {
        None
    }
}

/// Reads the first integer after `marker`, scaled by a trailing unit word.
fn duration_after(message: &str, marker: &str) -> Option<Duration> {
    let pos = message.find(marker)?;
    let rest = &message[pos + marker.len()..];
    let n = leading_number(rest)?;
    let tail = rest.trim_start().trim_start_matches(|c: char| c.is_ascii_digit());
    let secs = if tail.trim_start().starts_with("minute") || tail.trim_start().starts_with("min") {
        n * 60
    } else if tail.trim_start().starts_with("hour") {
        n * 3_600
    } else {
        n
    };
    Some(Duration::from_secs(secs))
}

fn number_after(message: &str, marker: &str) -> Option<u64> {
    let pos = message.find(marker)?;
    leading_number(&message[pos + marker.len()..])
}

/// First integer in `s`, skipping leading whitespace. Rejects non-digit lead-ins.
fn leading_number(s: &str) -> Option<u64> {
    let s = s.trim_start();
    let digits: String = s.chars().take_while(|c| c.is_ascii_digit()).collect();
    if digits.is_empty() {
        return None;
    }
    digits.parse().ok()
}
