//! # The retry policy record.
//!
//! [`RetryPolicy`] bundles every knob that controls one retry plan: the
//! attempt budget, backoff/jitter parameters, retry conditions, error-pattern
//! lists, error-code sets, and circuit-breaker settings. Policies are plain
//! data — serializable, comparable, cloneable — so the persistence
//! collaborator can round trip them losslessly. Custom backoff *functions*
//! are deliberately not part of the record; they are registered on the
//! [`RetryManager`](crate::RetryManager) per policy id.
//!
//! A policy goes through [`RetryPolicy::normalized`] before entering the
//! registry: validation plus pattern normalization (lower-cased once, so
//! matching never re-lowers the pattern side) and the default retry
//! condition (`TransientFailure` when the set is empty).
//!
//! Five built-in default policies exist (`standard`, `aggressive`,
//! `conservative`, `rate-limit`, `quick`); the registry treats them as
//! immutable.

use std::collections::{BTreeMap, BTreeSet};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::classify::status_from_error;
use crate::error::{OpError, RetryError};
use crate::policy::backoff::{BackoffArgs, BackoffKind, CustomBackoff};
use crate::policy::jitter::{ExtraJitter, JitterKind};

/// Condition under which a policy admits a retry.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "camelCase")]
pub enum RetryCondition {
    /// Retry when the failure looks transient (pattern/classifier driven).
    TransientFailure,
    /// Retry when the status code is in the policy's retryable set.
    SpecificErrorCodes,
    /// Retry while the session is inside the policy's retry window.
    TimeBased,
    /// Caller-managed condition; admits by default.
    Custom,
}

impl RetryCondition {
    /// Returns the camelCase name used in serialized policies.
    pub fn as_str(&self) -> &'static str {
        match self {
            RetryCondition::TransientFailure => "transientFailure",
            RetryCondition::SpecificErrorCodes => "specificErrorCodes",
            RetryCondition::TimeBased => "timeBased",
            RetryCondition::Custom => "custom",
        }
    }
}

/// Circuit-breaker settings embedded in a policy.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BreakerConfig {
    /// Whether breaker bookkeeping runs for this policy.
    pub enabled: bool,
    /// Consecutive failures that trip the breaker open.
    pub threshold: u32,
    /// Cooldown before a half-open probe is admitted.
    #[serde(rename = "timeoutMs", with = "duration_ms")]
    pub timeout: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            threshold: 5,
            timeout: Duration::from_secs(60),
        }
    }
}

/// Why a retry was denied by the policy (the circuit breaker has its own
/// denial path through [`RetryError::CircuitOpen`]).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DenyReason {
    /// The policy is disabled.
    Disabled,
    /// The attempt budget is spent.
    OverBudget,
    /// No retry condition admitted the failure.
    NoConditionMet,
    /// The time-based retry window was exceeded.
    WindowExceeded,
}

impl DenyReason {
    /// Returns a short stable label (snake_case) for use in logs/events.
    pub fn as_str(&self) -> &'static str {
        match self {
            DenyReason::Disabled => "policy_disabled",
            DenyReason::OverBudget => "over_budget",
            DenyReason::NoConditionMet => "no_condition_met",
            DenyReason::WindowExceeded => "window_exceeded",
        }
    }
}

/// Retry plan: budget, backoff/jitter parameters, retry conditions, and
/// circuit-breaker settings.
///
/// # Example
/// ```rust
/// use std::time::Duration;
/// use retryvisor::{BackoffKind, JitterKind, RetryPolicy};
///
/// let policy = RetryPolicy::new("api-read", "API reads")
///     .with_max_attempts(5)
///     .with_delays(Duration::from_millis(200), Duration::from_secs(10))
///     .with_backoff(BackoffKind::Exponential, 2.0)
///     .with_jitter(JitterKind::Equal, 0.2)
///     .normalized()
///     .unwrap();
/// assert_eq!(policy.calculate_delay(1, None), policy.calculate_delay(1, None).min(Duration::from_secs(10)));
/// ```
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryPolicy {
    /// Unique policy id.
    pub id: String,
    /// Human-readable name.
    pub name: String,
    /// Free-form description.
    #[serde(default)]
    pub description: String,

    /// Total attempt budget, including the first attempt (`>= 1`).
    #[serde(default = "defaults::max_attempts")]
    pub max_attempts: u32,
    /// Initial delay before the first retry.
    #[serde(rename = "baseDelayMs", with = "duration_ms", default = "defaults::base_delay")]
    pub base_delay: Duration,
    /// Maximum delay cap for retries.
    #[serde(rename = "maxDelayMs", with = "duration_ms", default = "defaults::max_delay")]
    pub max_delay: Duration,
    /// Multiplicative growth factor for exponential backoff (`> 0`).
    #[serde(default = "defaults::multiplier")]
    pub multiplier: f64,
    /// Backoff formula.
    #[serde(default)]
    pub backoff: BackoffKind,
    /// Jitter strategy applied to the backoff result.
    #[serde(default)]
    pub jitter: JitterKind,
    /// Jitter amplitude in `[0, 1]`.
    #[serde(default = "defaults::jitter_factor")]
    pub jitter_factor: f64,
    /// Optional additive jitter on top of the strategy above.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extra_jitter: Option<ExtraJitter>,

    /// Conditions under which a retry is admitted.
    ///
    /// Defaults to `{TransientFailure}` when left empty (applied by
    /// [`normalized`](Self::normalized)).
    #[serde(default)]
    pub retry_conditions: BTreeSet<RetryCondition>,
    /// Status codes the policy considers retryable.
    #[serde(default)]
    pub retryable_error_codes: BTreeSet<u16>,
    /// Case-insensitive substrings marking a failure transient.
    #[serde(default)]
    pub transient_patterns: Vec<String>,
    /// Case-insensitive substrings marking a failure permanent.
    #[serde(default)]
    pub permanent_patterns: Vec<String>,
    /// Case-insensitive substrings marking a failure retryable.
    #[serde(default)]
    pub retryable_patterns: Vec<String>,

    /// Circuit-breaker settings.
    #[serde(default)]
    pub circuit_breaker: BreakerConfig,
    /// Disabled policies reject execution with a configuration error.
    #[serde(default = "defaults::enabled")]
    pub enabled: bool,
    /// Retry window for the `TimeBased` condition (session elapsed time).
    #[serde(
        rename = "retryWindowMs",
        with = "opt_duration_ms",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub retry_window: Option<Duration>,

    /// Free-form metadata.
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
    /// Creation timestamp (epoch milliseconds on the wire).
    #[serde(rename = "createdAtMs", with = "epoch_ms", default = "now_ms")]
    pub created_at: SystemTime,
    /// Last-update timestamp (epoch milliseconds on the wire).
    #[serde(rename = "updatedAtMs", with = "epoch_ms", default = "now_ms")]
    pub updated_at: SystemTime,
}

mod defaults {
    use std::time::Duration;

    pub(super) fn max_attempts() -> u32 {
        3
    }
    pub(super) fn base_delay() -> Duration {
        Duration::from_secs(1)
    }
    pub(super) fn max_delay() -> Duration {
        Duration::from_secs(30)
    }
    pub(super) fn multiplier() -> f64 {
        2.0
    }
    pub(super) fn jitter_factor() -> f64 {
        0.1
    }
    pub(super) fn enabled() -> bool {
        true
    }
}

/// Current time truncated to millisecond precision, so timestamps survive
/// the epoch-milliseconds wire format unchanged.
fn now_ms() -> SystemTime {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_millis() as u64;
    UNIX_EPOCH + Duration::from_millis(millis)
}

impl RetryPolicy {
    /// Creates a policy with the given id/name and the standard defaults.
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        let now = now_ms();
        Self {
            id: id.into(),
            name: name.into(),
            description: String::new(),
            max_attempts: defaults::max_attempts(),
            base_delay: defaults::base_delay(),
            max_delay: defaults::max_delay(),
            multiplier: defaults::multiplier(),
            backoff: BackoffKind::default(),
            jitter: JitterKind::default(),
            jitter_factor: defaults::jitter_factor(),
            extra_jitter: None,
            retry_conditions: BTreeSet::new(),
            retryable_error_codes: BTreeSet::new(),
            transient_patterns: Vec::new(),
            permanent_patterns: Vec::new(),
            retryable_patterns: Vec::new(),
            circuit_breaker: BreakerConfig::default(),
            enabled: true,
            retry_window: None,
            metadata: BTreeMap::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Sets the attempt budget.
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Sets base and maximum delay.
    pub fn with_delays(mut self, base: Duration, max: Duration) -> Self {
        self.base_delay = base;
        self.max_delay = max;
        self
    }

    /// Sets the backoff formula and multiplier.
    pub fn with_backoff(mut self, backoff: BackoffKind, multiplier: f64) -> Self {
        self.backoff = backoff;
        self.multiplier = multiplier;
        self
    }

    /// Sets the jitter strategy and amplitude.
    pub fn with_jitter(mut self, jitter: JitterKind, jitter_factor: f64) -> Self {
        self.jitter = jitter;
        self.jitter_factor = jitter_factor;
        self
    }

    /// Adds a retry condition.
    pub fn with_condition(mut self, condition: RetryCondition) -> Self {
        self.retry_conditions.insert(condition);
        self
    }

    /// Sets the retryable status-code set.
    pub fn with_retryable_codes(mut self, codes: impl IntoIterator<Item = u16>) -> Self {
        self.retryable_error_codes = codes.into_iter().collect();
        self
    }

    /// Adds transient error patterns.
    pub fn with_transient_patterns<I, S>(mut self, patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.transient_patterns.extend(patterns.into_iter().map(Into::into));
        self
    }

    /// Adds permanent error patterns.
    pub fn with_permanent_patterns<I, S>(mut self, patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.permanent_patterns.extend(patterns.into_iter().map(Into::into));
        self
    }

    /// Enables the circuit breaker with the given threshold and cooldown.
    pub fn with_circuit_breaker(mut self, threshold: u32, timeout: Duration) -> Self {
        self.circuit_breaker = BreakerConfig {
            enabled: true,
            threshold,
            timeout,
        };
        self
    }

    /// Sets the time-based retry window.
    pub fn with_retry_window(mut self, window: Duration) -> Self {
        self.retry_window = Some(window);
        self
    }

    /// Enables or disables the policy.
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Validates every field constraint.
    pub fn validate(&self) -> Result<(), RetryError> {
        if self.id.trim().is_empty() {
            return Err(RetryError::Validation {
                field: "id",
                reason: "must not be empty".into(),
            });
        }
        if self.name.trim().is_empty() {
            return Err(RetryError::Validation {
                field: "name",
                reason: "must not be empty".into(),
            });
        }
        if self.max_attempts < 1 {
            return Err(RetryError::Validation {
                field: "maxAttempts",
                reason: "must be at least 1".into(),
            });
        }
        if !(self.multiplier.is_finite() && self.multiplier > 0.0) {
            return Err(RetryError::Validation {
                field: "multiplier",
                reason: format!("must be finite and > 0, got {}", self.multiplier),
            });
        }
        if !(0.0..=1.0).contains(&self.jitter_factor) {
            return Err(RetryError::Validation {
                field: "jitterFactor",
                reason: format!("must be within [0, 1], got {}", self.jitter_factor),
            });
        }
        if self.circuit_breaker.enabled && self.circuit_breaker.threshold < 1 {
            return Err(RetryError::Validation {
                field: "circuitBreaker.threshold",
                reason: "must be at least 1 when the breaker is enabled".into(),
            });
        }
        Ok(())
    }

    /// Validates the policy and returns it normalized: pattern lists
    /// lower-cased once (matching never re-lowers the pattern side) and
    /// `retry_conditions` defaulted to `{TransientFailure}` when empty.
    pub fn normalized(mut self) -> Result<Self, RetryError> {
        self.validate()?;
        for list in [
            &mut self.transient_patterns,
            &mut self.permanent_patterns,
            &mut self.retryable_patterns,
        ] {
            for pattern in list.iter_mut() {
                *pattern = pattern.to_lowercase();
            }
        }
        if self.retry_conditions.is_empty() {
            self.retry_conditions.insert(RetryCondition::TransientFailure);
        }
        Ok(self)
    }

    /// Computes the delay before the given attempt (1-based): backoff first,
    /// then the jitter strategy, then the optional additive jitter.
    ///
    /// `custom` is the function registered for this policy when
    /// `backoff == Custom`; a missing or failing function degrades to
    /// exponential.
    pub fn calculate_delay(&self, attempt: u32, custom: Option<&CustomBackoff>) -> Duration {
        let args = BackoffArgs {
            attempt,
            base: self.base_delay,
            max: self.max_delay,
            multiplier: self.multiplier,
            jitter_factor: self.jitter_factor,
        };
        let base = self.backoff.base_delay(&args, custom);
        let jittered = match self.jitter {
            JitterKind::Decorrelated => self.jitter.apply_decorrelated(
                self.base_delay.min(self.max_delay),
                base,
                self.max_delay,
                self.jitter_factor,
            ),
            _ => self.jitter.apply(base, self.jitter_factor),
        };
        match &self.extra_jitter {
            Some(extra) => extra.apply(jittered, attempt),
            None => jittered,
        }
    }

    /// Policy-scoped retryability check, in fixed order: transient patterns
    /// (match ⇒ retryable), permanent patterns (match ⇒ not retryable),
    /// retryable status codes, retryable patterns, defaulting to retryable.
    ///
    /// This can disagree with the generic classifier; the manager treats a
    /// generic `Permanent` verdict as decisive regardless.
    pub fn is_retryable(&self, error: &OpError) -> bool {
        let message = error.message().to_lowercase();
        let type_name = error.type_name().map(str::to_lowercase);
        let haystacks: [&str; 2] = [&message, type_name.as_deref().unwrap_or("")];

        if matches_any(&self.transient_patterns, &haystacks) {
            return true;
        }
        if matches_any(&self.permanent_patterns, &haystacks) {
            return false;
        }
        if let Some(status) = status_from_error(error, None) {
            if self.retryable_error_codes.contains(&status) {
                return true;
            }
        }
        if matches_any(&self.retryable_patterns, &haystacks) {
            return true;
        }
        true
    }

    /// Decides whether a retry is admitted for `attempt` (1-based, > 1),
    /// returning the denial reason when it is not.
    ///
    /// The circuit breaker is consulted separately by the manager; it has a
    /// distinct error path.
    pub fn deny_reason(
        &self,
        attempt: u32,
        elapsed: Duration,
        last_error: &OpError,
    ) -> Option<DenyReason> {
        if !self.enabled {
            return Some(DenyReason::Disabled);
        }
        if attempt > self.max_attempts {
            return Some(DenyReason::OverBudget);
        }
        if self.retry_conditions.contains(&RetryCondition::TimeBased) {
            if let Some(window) = self.retry_window {
                if elapsed > window {
                    return Some(DenyReason::WindowExceeded);
                }
            }
        }

        let admitted = self.retry_conditions.iter().any(|cond| match cond {
            RetryCondition::TransientFailure => self.is_retryable(last_error),
            RetryCondition::SpecificErrorCodes => status_from_error(last_error, None)
                .is_some_and(|s| self.retryable_error_codes.contains(&s)),
            RetryCondition::TimeBased => self
                .retry_window
                .is_none_or(|window| elapsed <= window),
            RetryCondition::Custom => true,
        });
        if admitted {
            None
        } else {
            Some(DenyReason::NoConditionMet)
        }
    }

    /// Touches the update timestamp (millisecond precision).
    pub fn touch(&mut self) {
        self.updated_at = now_ms();
    }

    /// Ids of the five built-in default policies.
    pub const BUILTIN_IDS: [&'static str; 5] =
        ["standard", "aggressive", "conservative", "rate-limit", "quick"];

    /// Returns true for a built-in default policy id.
    pub fn is_builtin(id: &str) -> bool {
        Self::BUILTIN_IDS.contains(&id)
    }

    /// The five built-in default policies, already normalized.
    ///
    /// The registry seeds itself with these and refuses to update or delete
    /// them.
    pub fn builtin_defaults() -> Vec<RetryPolicy> {
        let standard = RetryPolicy::new("standard", "Standard")
            .with_max_attempts(3)
            .with_delays(Duration::from_secs(1), Duration::from_secs(30))
            .with_backoff(BackoffKind::Exponential, 2.0)
            .with_jitter(JitterKind::Equal, 0.1);

        let aggressive = RetryPolicy::new("aggressive", "Aggressive")
            .with_max_attempts(10)
            .with_delays(Duration::from_millis(100), Duration::from_secs(10))
            .with_backoff(BackoffKind::ExponentialWithJitter, 1.5)
            .with_jitter(JitterKind::Full, 0.3);

        let conservative = RetryPolicy::new("conservative", "Conservative")
            .with_max_attempts(2)
            .with_delays(Duration::from_secs(5), Duration::from_secs(60))
            .with_backoff(BackoffKind::Exponential, 3.0)
            .with_jitter(JitterKind::None, 0.0)
            .with_circuit_breaker(3, Duration::from_secs(60));

        let rate_limit = RetryPolicy::new("rate-limit", "Rate limited")
            .with_max_attempts(10)
            .with_delays(Duration::from_secs(60), Duration::from_secs(900))
            .with_backoff(BackoffKind::Exponential, 2.0)
            .with_jitter(JitterKind::Decorrelated, 0.2)
            .with_condition(RetryCondition::TransientFailure)
            .with_condition(RetryCondition::SpecificErrorCodes)
            .with_retryable_codes([429, 503])
            .with_transient_patterns(["rate limit", "too many requests"]);

        let quick = RetryPolicy::new("quick", "Quick")
            .with_max_attempts(5)
            .with_delays(Duration::from_millis(50), Duration::from_secs(1))
            .with_backoff(BackoffKind::Exponential, 2.0)
            .with_jitter(JitterKind::Full, 0.5);

        [standard, aggressive, conservative, rate_limit, quick]
            .into_iter()
            .map(|p| {
                let mut p = p;
                p.description = format!("built-in '{}' policy", p.id);
                p.normalized().expect("built-in policies are valid")
            })
            .collect()
    }
}

/// True when any (already lower-cased) pattern occurs in any haystack.
fn matches_any(patterns: &[String], haystacks: &[&str]) -> bool {
    patterns
        .iter()
        .any(|p| haystacks.iter().any(|h| !p.is_empty() && h.contains(p.as_str())))
}

/// Duration ↔ integer milliseconds on the wire.
pub(crate) mod duration_ms {
    use super::*;
    use serde::{Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let ms = u64::deserialize(d)?;
        Ok(Duration::from_millis(ms))
    }
}

/// `Option<Duration>` ↔ optional integer milliseconds on the wire.
pub(crate) mod opt_duration_ms {
    use super::*;
    use serde::{Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        match d {
            Some(d) => s.serialize_some(&(d.as_millis() as u64)),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        Ok(Option::<u64>::deserialize(d)?.map(Duration::from_millis))
    }
}

/// SystemTime ↔ epoch milliseconds on the wire.
pub(crate) mod epoch_ms {
    use super::*;
    use serde::{Deserializer, Serializer};

    pub fn serialize<S: Serializer>(t: &SystemTime, s: S) -> Result<S::Ok, S::Error> {
        let ms = t
            .duration_since(UNIX_EPOCH)
            .unwrap_or(Duration::ZERO)
            .as_millis() as u64;
        s.serialize_u64(ms)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<SystemTime, D::Error> {
        let ms = u64::deserialize(d)?;
        Ok(UNIX_EPOCH + Duration::from_millis(ms))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_rejects_bad_fields() {
        let err = RetryPolicy::new("", "x").validate().unwrap_err();
        assert!(matches!(err, RetryError::Validation { field: "id", .. }));

        let err = RetryPolicy::new("p", "x")
            .with_max_attempts(0)
            .validate()
            .unwrap_err();
        assert!(matches!(err, RetryError::Validation { field: "maxAttempts", .. }));

        let err = RetryPolicy::new("p", "x")
            .with_backoff(BackoffKind::Exponential, 0.0)
            .validate()
            .unwrap_err();
        assert!(matches!(err, RetryError::Validation { field: "multiplier", .. }));

        let err = RetryPolicy::new("p", "x")
            .with_jitter(JitterKind::Full, 1.5)
            .validate()
            .unwrap_err();
        assert!(matches!(err, RetryError::Validation { field: "jitterFactor", .. }));
    }

    #[test]
    fn normalized_defaults_conditions_and_lowers_patterns() {
        let policy = RetryPolicy::new("p", "x")
            .with_transient_patterns(["Connection RESET"])
            .normalized()
            .unwrap();
        assert!(policy.retry_conditions.contains(&RetryCondition::TransientFailure));
        assert_eq!(policy.transient_patterns, vec!["connection reset"]);
    }

    #[test]
    fn builtin_defaults_are_five_and_valid() {
        let defaults = RetryPolicy::builtin_defaults();
        assert_eq!(defaults.len(), 5);
        for policy in &defaults {
            assert!(RetryPolicy::is_builtin(&policy.id), "{}", policy.id);
            policy.validate().unwrap();
            assert!(!policy.retry_conditions.is_empty());
        }
        assert!(!RetryPolicy::is_builtin("my-policy"));
    }

    #[test]
    fn round_trip_reproduces_equal_policy() {
        for policy in RetryPolicy::builtin_defaults() {
            let json = serde_json::to_string(&policy).unwrap();
            let back: RetryPolicy = serde_json::from_str(&json).unwrap();
            assert_eq!(policy, back, "round trip of '{}'", policy.id);
        }
    }

    #[test]
    fn round_trip_covers_every_field() {
        let policy = RetryPolicy::new("full", "Everything set")
            .with_max_attempts(7)
            .with_delays(Duration::from_millis(250), Duration::from_secs(45))
            .with_backoff(BackoffKind::Linear, 1.7)
            .with_jitter(JitterKind::Decorrelated, 0.35)
            .with_condition(RetryCondition::TimeBased)
            .with_condition(RetryCondition::SpecificErrorCodes)
            .with_retryable_codes([408, 429, 503])
            .with_transient_patterns(["timeout", "reset"])
            .with_permanent_patterns(["not found"])
            .with_circuit_breaker(4, Duration::from_secs(30))
            .with_retry_window(Duration::from_secs(120))
            .with_enabled(false);
        let mut policy = policy.normalized().unwrap();
        policy.retryable_patterns = vec!["maybe".into()];
        policy.extra_jitter = Some(ExtraJitter::Bounded {
            bound: Duration::from_millis(40),
        });
        policy.metadata.insert("team".into(), "payments".into());

        let json = serde_json::to_string_pretty(&policy).unwrap();
        let back: RetryPolicy = serde_json::from_str(&json).unwrap();
        assert_eq!(policy, back);
        assert!(json.contains("\"baseDelayMs\": 250"));
        assert!(json.contains("\"backoff\": \"linear\""));
    }

    #[test]
    fn partial_json_uses_field_defaults() {
        let policy: RetryPolicy =
            serde_json::from_str(r#"{"id":"min","name":"Minimal"}"#).unwrap();
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.base_delay, Duration::from_secs(1));
        assert!(policy.enabled);
        assert_eq!(policy.backoff, BackoffKind::Exponential);
    }

    #[test]
    fn is_retryable_transient_beats_permanent() {
        let policy = RetryPolicy::new("p", "x")
            .with_transient_patterns(["gateway timeout"])
            .with_permanent_patterns(["timeout"])
            .normalized()
            .unwrap();
        // Transient patterns are checked first by design.
        assert!(policy.is_retryable(&OpError::new("504 Gateway Timeout")));
        // Only the permanent pattern matches here.
        assert!(!policy.is_retryable(&OpError::new("read timeout on socket")));
    }

    #[test]
    fn is_retryable_consults_codes_and_defaults_to_retryable() {
        let policy = RetryPolicy::new("p", "x")
            .with_permanent_patterns(["unauthorized"])
            .with_retryable_codes([503])
            .normalized()
            .unwrap();
        assert!(policy.is_retryable(&OpError::new("upstream sad").with_status(503)));
        assert!(!policy.is_retryable(&OpError::new("401 unauthorized")));
        assert!(policy.is_retryable(&OpError::new("something odd")));
    }

    #[test]
    fn deny_reasons() {
        let policy = RetryPolicy::new("p", "x")
            .with_max_attempts(3)
            .with_permanent_patterns(["fatal"])
            .normalized()
            .unwrap();
        let transient = OpError::new("connection reset");

        assert_eq!(policy.deny_reason(2, Duration::ZERO, &transient), None);
        assert_eq!(
            policy.deny_reason(4, Duration::ZERO, &transient),
            Some(DenyReason::OverBudget)
        );
        assert_eq!(
            policy.deny_reason(2, Duration::ZERO, &OpError::new("fatal corruption")),
            Some(DenyReason::NoConditionMet)
        );

        let disabled = policy.clone().with_enabled(false);
        assert_eq!(
            disabled.deny_reason(2, Duration::ZERO, &transient),
            Some(DenyReason::Disabled)
        );

        let windowed = RetryPolicy::new("w", "x")
            .with_condition(RetryCondition::TimeBased)
            .with_retry_window(Duration::from_secs(10))
            .normalized()
            .unwrap();
        assert_eq!(
            windowed.deny_reason(2, Duration::from_secs(11), &transient),
            Some(DenyReason::WindowExceeded)
        );
        assert_eq!(windowed.deny_reason(2, Duration::from_secs(5), &transient), None);
    }

    #[test]
    fn calculate_delay_composes_backoff_and_jitter() {
        let policy = RetryPolicy::new("p", "x")
            .with_delays(Duration::from_millis(100), Duration::from_secs(5))
            .with_backoff(BackoffKind::Fixed, 2.0)
            .with_jitter(JitterKind::None, 0.0)
            .normalized()
            .unwrap();
        assert_eq!(policy.calculate_delay(1, None), Duration::from_millis(100));
        assert_eq!(policy.calculate_delay(9, None), Duration::from_millis(100));

        let decorrelated = RetryPolicy::new("d", "x")
            .with_delays(Duration::from_millis(100), Duration::from_secs(2))
            .with_backoff(BackoffKind::Exponential, 2.0)
            .with_jitter(JitterKind::Decorrelated, 0.0)
            .normalized()
            .unwrap();
        for _ in 0..100 {
            let d = decorrelated.calculate_delay(6, None);
            assert!(d >= Duration::from_millis(100) && d <= Duration::from_secs(2), "{d:?}");
        }
    }
}
