//! # Rule-based failure classification.
//!
//! [`FailureClassifier`] maps an [`OpError`] (plus optional execution
//! context) to a [`Classification`]: transient/permanent/unknown, a failure
//! category, and a severity. The rules run in a fixed order so the verdict is
//! deterministic for a given (error, context) pair:
//!
//! 1. permanent patterns against the lower-cased message AND type name —
//!    checked first because they are the more specific signal;
//! 2. transient patterns, same haystacks;
//! 3. status-code extraction (explicit context field → `[4-5]dd` message
//!    scan → the error's status accessor) against the fixed tables below;
//! 4. type-name family fallback (network / browser / system families);
//! 5. default: unknown / application / medium.
//!
//! HTTP 429 is retryable by default; a policy can override that through its
//! own pattern/code sets.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ExecContext, OpError};
use crate::policy::BackoffKind;

/// Status codes worth retrying.
pub const RETRYABLE_STATUS: [u16; 13] = [
    408, 429, 500, 502, 503, 504, 507, 509, 520, 521, 522, 523, 524,
];

/// Status codes that will not improve on retry.
pub const NON_RETRYABLE_STATUS: [u16; 20] = [
    400, 401, 403, 404, 405, 406, 409, 410, 413, 414, 415, 416, 417, 422, 423,
    425, 426, 428, 431, 451,
];

/// Is the failure likely to succeed on retry?
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FailureKind {
    /// Likely to succeed on retry.
    Transient,
    /// Will not succeed on retry.
    Permanent,
    /// Not enough signal to decide.
    Unknown,
}

/// Broad source of the failure.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FailureCategory {
    Network,
    Browser,
    System,
    External,
    Application,
}

/// How serious the failure is.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

/// Verdict of a classification run.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Classification {
    /// Transient, permanent, or unknown.
    pub kind: FailureKind,
    /// Broad source of the failure.
    pub category: FailureCategory,
    /// How serious the failure is.
    pub severity: Severity,
}

impl Classification {
    fn new(kind: FailureKind, category: FailureCategory, severity: Severity) -> Self {
        Self {
            kind,
            category,
            severity,
        }
    }
}

impl FailureKind {
    /// Returns a short stable label for logs/events.
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::Transient => "transient",
            FailureKind::Permanent => "permanent",
            FailureKind::Unknown => "unknown",
        }
    }
}

impl FailureCategory {
    /// Returns a short stable label for logs/events.
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureCategory::Network => "network",
            FailureCategory::Browser => "browser",
            FailureCategory::System => "system",
            FailureCategory::External => "external",
            FailureCategory::Application => "application",
        }
    }
}

impl Severity {
    /// Returns a short stable label for logs/events.
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }
}

/// Heuristic retry advice, used only when no explicit policy applies.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RetryRecommendation {
    /// Whether a retry is worth attempting at all.
    pub should_retry: bool,
    /// Default delay before the next attempt.
    pub suggested_delay: Duration,
    /// Default attempt budget.
    pub max_retries: u32,
    /// Suggested backoff formula.
    pub backoff: BackoffKind,
}

/// Extracts a status code in precedence order: explicit context field →
/// `[4-5]dd` message scan → the error's status accessor.
pub fn status_from_error(error: &OpError, ctx: Option<&ExecContext>) -> Option<u16> {
    if let Some(raw) = ctx.and_then(|c| c.field("status_code")) {
        if let Ok(status) = raw.trim().parse::<u16>() {
            return Some(status);
        }
    }
    if let Some(status) = scan_status(error.message()) {
        return Some(status);
    }
    error.status()
}

/// Scans a message for a standalone 4xx/5xx code (three digits, first 4 or 5,
/// not embedded in a longer number).
fn scan_status(message: &str) -> Option<u16> {
    let bytes = message.as_bytes();
    for i in 0..bytes.len().saturating_sub(2) {
        let window = &bytes[i..i + 3];
        if !(window[0] == b'4' || window[0] == b'5') {
            continue;
        }
        if !window.iter().all(u8::is_ascii_digit) {
            continue;
        }
        let before_ok = i == 0 || !bytes[i - 1].is_ascii_digit();
        let after_ok = i + 3 >= bytes.len() || !bytes[i + 3].is_ascii_digit();
        if before_ok && after_ok {
            // Window is three ascii digits, so the parse cannot fail.
            return message[i..i + 3].parse().ok();
        }
    }
    None
}

/// Rule engine mapping operation errors to classifications.
///
/// The default rule set covers common network / HTTP / browser-automation /
/// system failure phrasing; callers can extend the pattern lists before
/// first use.
#[derive(Clone, Debug)]
pub struct FailureClassifier {
    /// Case-insensitive substrings marking a failure permanent (stored lower-cased).
    pub permanent_patterns: Vec<String>,
    /// Case-insensitive substrings marking a failure transient (stored lower-cased).
    pub transient_patterns: Vec<String>,
    network_families: Vec<&'static str>,
    browser_families: Vec<&'static str>,
    system_families: Vec<&'static str>,
}

impl Default for FailureClassifier {
    fn default() -> Self {
        Self {
            permanent_patterns: [
                "not found",
                "unauthorized",
                "forbidden",
                "invalid credentials",
                "authentication failed",
                "permission denied",
                "bad request",
                "validation error",
                "malformed",
                "unsupported",
                "conflict",
            ]
            .map(str::to_string)
            .to_vec(),
            transient_patterns: [
                "timeout",
                "timed out",
                "connection reset",
                "connection refused",
                "connection aborted",
                "temporarily unavailable",
                "service unavailable",
                "rate limit",
                "too many requests",
                "network unreachable",
                "dns",
                "try again",
            ]
            .map(str::to_string)
            .to_vec(),
            network_families: vec![
                "connectionerror",
                "timeouterror",
                "dnserror",
                "socketerror",
                "tlserror",
            ],
            browser_families: vec![
                "navigationerror",
                "pagecrash",
                "targetclosed",
                "browsererror",
            ],
            system_families: vec![
                "ioerror",
                "oserror",
                "memoryerror",
                "resourceexhausted",
            ],
        }
    }
}

impl FailureClassifier {
    /// Creates a classifier with the default rule set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Classifies an error. Deterministic for a fixed (error, context) pair;
    /// permanent patterns take precedence over transient ones when both match.
    pub fn classify(&self, error: &OpError, ctx: Option<&ExecContext>) -> Classification {
        let message = error.message().to_lowercase();
        let type_name = error.type_name().map(str::to_lowercase).unwrap_or_default();
        let haystacks = [message.as_str(), type_name.as_str()];

        if let Some(pattern) = first_match(&self.permanent_patterns, &haystacks) {
            let severity = if is_auth_pattern(pattern) {
                Severity::Critical
            } else {
                Severity::High
            };
            return Classification::new(
                FailureKind::Permanent,
                category_of(&haystacks),
                severity,
            );
        }

        if let Some(pattern) = first_match(&self.transient_patterns, &haystacks) {
            let severity = if pattern.contains("rate limit") || pattern.contains("too many") {
                Severity::Low
            } else {
                Severity::Medium
            };
            return Classification::new(
                FailureKind::Transient,
                category_of(&haystacks),
                severity,
            );
        }

        if let Some(status) = status_from_error(error, ctx) {
            if RETRYABLE_STATUS.contains(&status) {
                return Classification::new(
                    FailureKind::Transient,
                    FailureCategory::External,
                    Severity::Medium,
                );
            }
            if NON_RETRYABLE_STATUS.contains(&status) {
                return Classification::new(
                    FailureKind::Permanent,
                    FailureCategory::External,
                    Severity::High,
                );
            }
        }

        if family_match(&self.network_families, &type_name) {
            return Classification::new(
                FailureKind::Transient,
                FailureCategory::Network,
                Severity::Medium,
            );
        }
        if family_match(&self.browser_families, &type_name) {
            return Classification::new(
                FailureKind::Transient,
                FailureCategory::Browser,
                Severity::Medium,
            );
        }
        if family_match(&self.system_families, &type_name) {
            return Classification::new(
                FailureKind::Transient,
                FailureCategory::System,
                Severity::High,
            );
        }

        Classification::new(
            FailureKind::Unknown,
            FailureCategory::Application,
            Severity::Medium,
        )
    }

    /// Derives heuristic retry advice from the error alone. Used only when no
    /// explicit policy applies.
    pub fn recommendation(&self, error: &OpError) -> RetryRecommendation {
        let message = error.message().to_lowercase();
        let verdict = self.classify(error, None);
        let rate_limited = message.contains("rate limit") || message.contains("too many requests");

        let suggested_delay = if rate_limited {
            Duration::from_secs(60)
        } else if message.contains("timeout") || message.contains("timed out") {
            Duration::from_secs(5)
        } else {
            Duration::from_secs(1)
        };

        RetryRecommendation {
            should_retry: verdict.kind != FailureKind::Permanent,
            suggested_delay,
            max_retries: if rate_limited { 10 } else { 5 },
            backoff: if rate_limited {
                BackoffKind::ExponentialWithJitter
            } else {
                BackoffKind::Exponential
            },
        }
    }
}

fn first_match<'a>(patterns: &'a [String], haystacks: &[&str]) -> Option<&'a str> {
    patterns
        .iter()
        .find(|p| haystacks.iter().any(|h| h.contains(p.as_str())))
        .map(String::as_str)
}

fn family_match(families: &[&'static str], type_name: &str) -> bool {
    !type_name.is_empty() && families.iter().any(|f| type_name.contains(f))
}

fn is_auth_pattern(pattern: &str) -> bool {
    matches!(
        pattern,
        "unauthorized" | "forbidden" | "invalid credentials" | "authentication failed"
            | "permission denied"
    )
}

/// Infers a category from the matched haystacks (message + type name).
fn category_of(haystacks: &[&str]) -> FailureCategory {
    let hit = |needle: &str| haystacks.iter().any(|h| h.contains(needle));
    if hit("connection") || hit("network") || hit("dns") || hit("socket") || hit("tls")
        || hit("timeout")
    {
        FailureCategory::Network
    } else if hit("browser") || hit("page") || hit("navigation") {
        FailureCategory::Browser
    } else if hit("memory") || hit("disk") || hit("resource") || hit("os error")
        || hit("io error")
    {
        FailureCategory::System
    } else if scan_status(haystacks[0]).is_some() {
        FailureCategory::External
    } else {
        FailureCategory::Application
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classifier() -> FailureClassifier {
        FailureClassifier::new()
    }

    #[test]
    fn classify_is_deterministic() {
        let error = OpError::new("connection reset by peer").with_type_name("ConnectionError");
        let first = classifier().classify(&error, None);
        for _ in 0..10 {
            assert_eq!(classifier().classify(&error, None), first);
        }
        assert_eq!(first.kind, FailureKind::Transient);
        assert_eq!(first.category, FailureCategory::Network);
    }

    #[test]
    fn permanent_patterns_take_precedence_over_transient() {
        // Message matches both "not found" (permanent) and "timeout" (transient).
        let error = OpError::new("resource not found while waiting for timeout");
        let verdict = classifier().classify(&error, None);
        assert_eq!(verdict.kind, FailureKind::Permanent);
    }

    #[test]
    fn auth_failures_are_critical() {
        let verdict = classifier().classify(&OpError::new("invalid credentials supplied"), None);
        assert_eq!(verdict.kind, FailureKind::Permanent);
        assert_eq!(verdict.severity, Severity::Critical);
    }

    #[test]
    fn status_precedence_context_then_message_then_accessor() {
        let error = OpError::new("upstream said 503").with_status(404);
        // Context wins over everything.
        let ctx = ExecContext::new().with_field("status_code", "429");
        assert_eq!(status_from_error(&error, Some(&ctx)), Some(429));
        // Then the message scan.
        assert_eq!(status_from_error(&error, None), Some(503));
        // Then the accessor.
        let quiet = OpError::new("upstream unhappy").with_status(404);
        assert_eq!(status_from_error(&quiet, None), Some(404));
        assert_eq!(status_from_error(&OpError::new("all fine"), None), None);
    }

    #[test]
    fn status_scan_ignores_embedded_digits() {
        assert_eq!(scan_status("id 123456 failed"), None);
        assert_eq!(scan_status("got 502 from gateway"), Some(502));
        assert_eq!(scan_status("port 8503 unreachable"), None);
    }

    #[test]
    fn retryable_status_maps_to_transient_external() {
        let verdict = classifier().classify(&OpError::new("boom").with_status(502), None);
        assert_eq!(verdict.kind, FailureKind::Transient);
        assert_eq!(verdict.category, FailureCategory::External);
    }

    #[test]
    fn http_429_is_retryable_by_default() {
        let verdict = classifier().classify(&OpError::new("boom").with_status(429), None);
        assert_eq!(verdict.kind, FailureKind::Transient);
    }

    #[test]
    fn non_retryable_status_maps_to_permanent() {
        let verdict = classifier().classify(&OpError::new("boom").with_status(422), None);
        assert_eq!(verdict.kind, FailureKind::Permanent);
        assert_eq!(verdict.severity, Severity::High);
    }

    #[test]
    fn type_name_family_fallback() {
        let browser = OpError::new("tab went away").with_type_name("TargetClosed");
        let verdict = classifier().classify(&browser, None);
        assert_eq!(verdict.kind, FailureKind::Transient);
        assert_eq!(verdict.category, FailureCategory::Browser);

        let system = OpError::new("boom").with_type_name("ResourceExhausted");
        assert_eq!(
            classifier().classify(&system, None).category,
            FailureCategory::System
        );
    }

    #[test]
    fn unknown_default() {
        let verdict = classifier().classify(&OpError::new("something odd happened"), None);
        assert_eq!(verdict.kind, FailureKind::Unknown);
        assert_eq!(verdict.category, FailureCategory::Application);
        assert_eq!(verdict.severity, Severity::Medium);
    }

    #[test]
    fn recommendation_heuristics() {
        let c = classifier();

        let rate = c.recommendation(&OpError::new("rate limit exceeded"));
        assert!(rate.should_retry);
        assert_eq!(rate.suggested_delay, Duration::from_secs(60));
        assert_eq!(rate.max_retries, 10);

        let timeout = c.recommendation(&OpError::new("request timed out"));
        assert_eq!(timeout.suggested_delay, Duration::from_secs(5));
        assert_eq!(timeout.max_retries, 5);

        let plain = c.recommendation(&OpError::new("weird failure"));
        assert_eq!(plain.suggested_delay, Duration::from_secs(1));

        let permanent = c.recommendation(&OpError::new("404 not found"));
        assert!(!permanent.should_retry);
    }
}
