//! # Per-policy circuit breaker.
//!
//! One [`Breaker`] guards one policy id. It counts consecutive failures and,
//! once the threshold is crossed, denies attempts until the configured
//! timeout elapses. After the timeout the breaker goes half-open and admits
//! exactly one probe: a successful probe closes the breaker, a failed probe
//! reopens it and restamps the timer.
//!
//! ## State machine
//! ```text
//!            failures >= threshold
//!   Closed ───────────────────────► Open
//!     ▲                              │ timeout elapsed
//!     │ probe succeeded              ▼
//!     └────────────────────────── HalfOpen ──► Open (probe failed)
//! ```
//!
//! The breaker itself is plain data; the manager stores breakers in a
//! concurrent map and mutates them through atomic per-entry access, so
//! failure counts are never lost across interleaving sessions.

use std::time::{Duration, Instant};

/// Breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Normal operation, attempts flow through.
    Closed,
    /// Tripped, attempts are denied until the timeout elapses.
    Open,
    /// Timeout elapsed, one probe is in flight.
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "halfOpen",
        }
    }
}

/// Verdict for one attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Closed breaker, attempt proceeds normally.
    Allow,
    /// Half-open trial: this attempt is the single probe.
    Probe,
    /// Open breaker, attempt denied.
    Deny {
        /// Time until the breaker will consider a probe.
        retry_in: Duration,
    },
}

/// Observable state transition, for event publication.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Opened,
    HalfOpened,
    Closed,
}

/// Failure-counting breaker for a single policy.
#[derive(Debug, Clone)]
pub struct Breaker {
    threshold: u32,
    timeout: Duration,
    state: CircuitState,
    failures: u32,
    last_failure: Option<Instant>,
    opened_at: Option<Instant>,
}

impl Breaker {
    /// Creates a closed breaker. `threshold` is clamped to at least 1.
    pub fn new(threshold: u32, timeout: Duration) -> Self {
        Self {
            threshold: threshold.max(1),
            timeout,
            state: CircuitState::Closed,
            failures: 0,
            last_failure: None,
            opened_at: None,
        }
    }

    pub fn state(&self) -> CircuitState {
        self.state
    }

    pub fn failures(&self) -> u32 {
        self.failures
    }

    pub fn last_failure(&self) -> Option<Instant> {
        self.last_failure
    }

    /// Decides whether the next attempt may proceed.
    ///
    /// Transitions Open → HalfOpen when the timeout has elapsed; the attempt
    /// that observes that transition becomes the probe. While a probe is in
    /// flight, further attempts are denied.
    pub fn admit(&mut self) -> (Admission, Option<Transition>) {
        match self.state {
            CircuitState::Closed => (Admission::Allow, None),
            CircuitState::HalfOpen => {
                let retry_in = self.remaining();
                (Admission::Deny { retry_in }, None)
            }
            CircuitState::Open => {
                let remaining = self.remaining();
                if remaining == Duration::ZERO {
                    self.state = CircuitState::HalfOpen;
                    (Admission::Probe, Some(Transition::HalfOpened))
                } else {
                    (Admission::Deny { retry_in: remaining }, None)
                }
            }
        }
    }

    /// Records a successful attempt.
    ///
    /// A successful probe closes the breaker (single-trial-closes); in the
    /// closed state success clears the failure streak.
    pub fn on_success(&mut self) -> Option<Transition> {
        match self.state {
            CircuitState::HalfOpen => {
                self.state = CircuitState::Closed;
                self.failures = 0;
                self.opened_at = None;
                Some(Transition::Closed)
            }
            _ => {
                self.failures = 0;
                None
            }
        }
    }

    /// Records a failed attempt.
    ///
    /// A failed probe reopens immediately and restamps the timer; in the
    /// closed state the streak grows and trips at the threshold.
    pub fn on_failure(&mut self) -> Option<Transition> {
        let now = Instant::now();
        self.failures = self.failures.saturating_add(1);
        self.last_failure = Some(now);
        match self.state {
            CircuitState::HalfOpen => {
                self.state = CircuitState::Open;
                self.opened_at = Some(now);
                Some(Transition::Opened)
            }
            CircuitState::Closed if self.failures >= self.threshold => {
                self.state = CircuitState::Open;
                self.opened_at = Some(now);
                Some(Transition::Opened)
            }
            _ => None,
        }
    }

    /// Time left before an open breaker will admit a probe.
    fn remaining(&self) -> Duration {
        match self.opened_at {
            Some(at) => self.timeout.saturating_sub(at.elapsed()),
            None => Duration::ZERO,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tripped(threshold: u32, timeout: Duration) -> Breaker {
        let mut b = Breaker::new(threshold, timeout);
        for _ in 0..threshold {
            b.on_failure();
        }
        b
    }

    #[test]
    fn trips_at_threshold() {
        let mut b = Breaker::new(3, Duration::from_secs(60));
        assert_eq!(b.on_failure(), None);
        assert_eq!(b.on_failure(), None);
        assert_eq!(b.on_failure(), Some(Transition::Opened));
        assert_eq!(b.state(), CircuitState::Open);
        assert_eq!(b.failures(), 3);
    }

    #[test]
    fn open_breaker_denies_with_remaining_time() {
        let mut b = tripped(1, Duration::from_secs(60));
        let (admission, transition) = b.admit();
        assert!(matches!(admission, Admission::Deny { retry_in } if retry_in > Duration::ZERO));
        assert_eq!(transition, None);
    }

    #[test]
    fn timeout_elapsed_admits_single_probe() {
        let mut b = tripped(1, Duration::ZERO);
        let (admission, transition) = b.admit();
        assert_eq!(admission, Admission::Probe);
        assert_eq!(transition, Some(Transition::HalfOpened));
        // a second caller during the probe is denied
        let (second, _) = b.admit();
        assert!(matches!(second, Admission::Deny { .. }));
    }

    #[test]
    fn successful_probe_closes() {
        let mut b = tripped(1, Duration::ZERO);
        let _ = b.admit();
        assert_eq!(b.on_success(), Some(Transition::Closed));
        assert_eq!(b.state(), CircuitState::Closed);
        assert_eq!(b.failures(), 0);
        assert_eq!(b.admit().0, Admission::Allow);
    }

    #[test]
    fn failed_probe_reopens_and_restamps() {
        let mut b = tripped(1, Duration::from_millis(0));
        let _ = b.admit();
        assert_eq!(b.on_failure(), Some(Transition::Opened));
        assert_eq!(b.state(), CircuitState::Open);
    }

    #[test]
    fn success_resets_streak_while_closed() {
        let mut b = Breaker::new(3, Duration::from_secs(60));
        b.on_failure();
        b.on_failure();
        assert_eq!(b.on_success(), None);
        assert_eq!(b.failures(), 0);
        assert_eq!(b.on_failure(), None);
        assert_eq!(b.state(), CircuitState::Closed);
    }

    #[test]
    fn threshold_is_clamped_to_one() {
        let mut b = Breaker::new(0, Duration::from_secs(60));
        assert_eq!(b.on_failure(), Some(Transition::Opened));
    }
}
