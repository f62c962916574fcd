//! # RetryManager: policy registry + attempt loop + session tracking.
//!
//! The [`RetryManager`] owns the policy registry, the event bus, the
//! subscriber fan-out, the per-policy circuit breakers, the active-session
//! registry, the failure classifier, and the rate-limit handler. One manager
//! per process (or per test) — all state is instance-owned, nothing global.
//!
//! ## Execution flow
//! ```text
//! execute(operation, policy_id, ctx, op)
//!   │ resolve policy (Configuration error if missing/disabled)
//!   │ open RetrySession, register handle (released on every exit path)
//!   ▼
//!   loop attempt = 1..=max_attempts:
//!     attempt > 1 ─► deny_reason?          ──► stop (exhausted)
//!                 ─► breaker.admit()?      ──► CircuitOpen error / probe
//!                 ─► calculate_delay ─► cancellable sleep ─► RetryScheduled
//!     run op (optional per-attempt deadline)
//!     ├─ Ok  ─► record, breaker.on_success, AttemptSucceeded, return value
//!     └─ Err ─► record, classify
//!               ├─ permanent / policy-non-retryable ─► Permanent error
//!               └─ breaker.on_failure, rate-limit check (may substitute a
//!                  tuned policy for the remaining attempts), continue
//! ```
//!
//! Every observable step is published on the [`Bus`]; a background listener
//! forwards events to the [`SubscriberSet`].

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use dashmap::DashMap;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;

use crate::classify::{FailureClassifier, FailureKind};
use crate::config::RetryConfig;
use crate::error::{ExecContext, OpError, RetryError};
use crate::events::{Bus, Event, EventKind};
use crate::policy::{CustomBackoff, PolicyFile, RetryPolicy};
use crate::ratelimit::RateLimitHandler;
use crate::subscribers::{Subscribe, SubscriberSet};

use super::breaker::{Admission, Breaker, Transition};
use super::session::{ActiveSessions, RetryAttempt, RetrySession};

/// Orchestrates retry sessions against a shared policy registry.
pub struct RetryManager {
    /// Engine configuration.
    pub cfg: RetryConfig,
    bus: Bus,
    subs: Arc<SubscriberSet>,
    policies: RwLock<HashMap<String, RetryPolicy>>,
    custom_backoffs: DashMap<String, CustomBackoff>,
    breakers: DashMap<String, Breaker>,
    sessions: ActiveSessions,
    classifier: FailureClassifier,
    rate_limits: RateLimitHandler,
    listener: JoinHandle<()>,
}

impl RetryManager {
    /// Creates a manager seeded with the built-in default policies.
    ///
    /// Spawns the listener that forwards bus events to `subscribers`, so this
    /// must be called within a Tokio runtime.
    pub fn new(cfg: RetryConfig, subscribers: Vec<Arc<dyn Subscribe>>) -> Self {
        let bus = Bus::new(cfg.bus_capacity_clamped());
        let subs = Arc::new(SubscriberSet::new(subscribers));

        let seeded = RetryPolicy::builtin_defaults()
            .into_iter()
            .map(|p| (p.id.clone(), p))
            .collect();

        // Forwards bus events to the subscriber set; exits once the last
        // bus sender is dropped and the backlog is drained.
        let listener = {
            let mut rx = bus.subscribe();
            let set = Arc::clone(&subs);
            tokio::spawn(async move {
                while let Ok(ev) = rx.recv().await {
                    set.emit(&ev);
                }
            })
        };

        Self {
            cfg,
            bus,
            subs,
            policies: RwLock::new(seeded),
            custom_backoffs: DashMap::new(),
            breakers: DashMap::new(),
            sessions: ActiveSessions::new(),
            classifier: FailureClassifier::new(),
            rate_limits: RateLimitHandler::new(),
            listener,
        }
    }

    /// The event bus; subscribe here for ad-hoc observation.
    pub fn bus(&self) -> &Bus {
        &self.bus
    }

    /// The in-flight session registry.
    pub fn sessions(&self) -> &ActiveSessions {
        &self.sessions
    }

    /// Point-in-time copy of a policy's circuit breaker, if one exists.
    ///
    /// Breakers are created lazily on the first failure of a
    /// breaker-enabled policy.
    pub fn breaker(&self, policy_id: &str) -> Option<Breaker> {
        self.breakers.get(policy_id).map(|b| b.value().clone())
    }

    /// Closes the subscriber queues and waits for their workers to drain.
    ///
    /// Drops the bus so the listener forwards every queued event and exits,
    /// awaits it (releasing its handle on the set), then drains the set.
    pub async fn shutdown(self) {
        let Self {
            bus,
            subs,
            listener,
            ..
        } = self;
        drop(bus);
        let _ = listener.await;
        if let Ok(set) = Arc::try_unwrap(subs) {
            set.shutdown().await;
        }
    }

    // === Custom backoff functions ===
    //
    // Policies stay plain serializable data; the function a `Custom` backoff
    // runs is registered here, keyed by policy id.

    /// Registers the backoff function used when the policy's backoff is
    /// `Custom`. Replaces any previous function for that id.
    pub fn register_custom_backoff(&self, policy_id: impl Into<String>, f: CustomBackoff) {
        self.custom_backoffs.insert(policy_id.into(), f);
    }

    /// Removes the custom backoff function for a policy id.
    pub fn unregister_custom_backoff(&self, policy_id: &str) {
        self.custom_backoffs.remove(policy_id);
    }

    fn custom_for(&self, policy_id: &str) -> Option<CustomBackoff> {
        self.custom_backoffs.get(policy_id).map(|e| e.value().clone())
    }

    // === Policy registry ===

    /// Adds a new policy (validated and normalized).
    ///
    /// Rejects built-in ids and duplicates.
    pub async fn add_policy(&self, policy: RetryPolicy) -> Result<(), RetryError> {
        let policy = policy.normalized()?;
        if RetryPolicy::is_builtin(&policy.id) {
            return Err(RetryError::Configuration {
                policy_id: policy.id,
                reason: "built-in policies cannot be replaced".into(),
            });
        }
        let mut map = self.policies.write().await;
        if map.contains_key(&policy.id) {
            return Err(RetryError::Configuration {
                policy_id: policy.id,
                reason: "a policy with this id already exists".into(),
            });
        }
        map.insert(policy.id.clone(), policy);
        Ok(())
    }

    /// Replaces an existing non-built-in policy.
    pub async fn update_policy(&self, policy: RetryPolicy) -> Result<(), RetryError> {
        let mut policy = policy.normalized()?;
        if RetryPolicy::is_builtin(&policy.id) {
            return Err(RetryError::Configuration {
                policy_id: policy.id,
                reason: "built-in policies are immutable".into(),
            });
        }
        let mut map = self.policies.write().await;
        if !map.contains_key(&policy.id) {
            return Err(RetryError::Configuration {
                policy_id: policy.id,
                reason: "no such policy".into(),
            });
        }
        policy.touch();
        map.insert(policy.id.clone(), policy);
        Ok(())
    }

    /// Removes a non-built-in policy.
    pub async fn remove_policy(&self, id: &str) -> Result<RetryPolicy, RetryError> {
        if RetryPolicy::is_builtin(id) {
            return Err(RetryError::Configuration {
                policy_id: id.into(),
                reason: "built-in policies cannot be removed".into(),
            });
        }
        let mut map = self.policies.write().await;
        map.remove(id).ok_or_else(|| RetryError::Configuration {
            policy_id: id.into(),
            reason: "no such policy".into(),
        })
    }

    /// Looks up a policy by id.
    pub async fn policy(&self, id: &str) -> Option<RetryPolicy> {
        self.policies.read().await.get(id).cloned()
    }

    /// All registered policies, unordered.
    pub async fn list_policies(&self) -> Vec<RetryPolicy> {
        self.policies.read().await.values().cloned().collect()
    }

    /// Enables or disables a non-built-in policy.
    pub async fn set_policy_enabled(&self, id: &str, enabled: bool) -> Result<(), RetryError> {
        if RetryPolicy::is_builtin(id) {
            return Err(RetryError::Configuration {
                policy_id: id.into(),
                reason: "built-in policies are immutable".into(),
            });
        }
        let mut map = self.policies.write().await;
        match map.get_mut(id) {
            Some(policy) => {
                policy.enabled = enabled;
                policy.touch();
                Ok(())
            }
            None => Err(RetryError::Configuration {
                policy_id: id.into(),
                reason: "no such policy".into(),
            }),
        }
    }

    /// Copies an existing policy under a new id/name and registers the copy.
    pub async fn clone_policy(
        &self,
        source_id: &str,
        new_id: impl Into<String>,
        new_name: impl Into<String>,
    ) -> Result<RetryPolicy, RetryError> {
        let mut copy = self.policy(source_id).await.ok_or_else(|| {
            RetryError::Configuration {
                policy_id: source_id.into(),
                reason: "no such policy".into(),
            }
        })?;
        copy.id = new_id.into();
        copy.name = new_name.into();
        copy.touch();
        self.add_policy(copy.clone()).await?;
        Ok(copy)
    }

    /// Merges a persisted policy document into the registry.
    ///
    /// File entries may override non-built-in ids; built-in ids in the file
    /// are ignored.
    pub async fn load_policies(&self, file: PolicyFile) -> usize {
        let mut map = self.policies.write().await;
        let mut loaded = 0;
        for policy in file.policies {
            if RetryPolicy::is_builtin(&policy.id) {
                continue;
            }
            map.insert(policy.id.clone(), policy);
            loaded += 1;
        }
        loaded
    }

    // === Execution ===

    /// Runs `op` under the given policy with an empty execution context.
    pub async fn execute<T, F, Fut>(
        &self,
        operation: &str,
        policy_id: &str,
        op: F,
    ) -> Result<T, RetryError>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T, OpError>>,
    {
        self.execute_with(operation, policy_id, ExecContext::default(), op)
            .await
    }

    /// Runs `op` under the given policy until it succeeds, the budget runs
    /// out, the failure is judged permanent, the breaker denies, or the
    /// context is cancelled during a backoff wait.
    pub async fn execute_with<T, F, Fut>(
        &self,
        operation: &str,
        policy_id: &str,
        ctx: ExecContext,
        mut op: F,
    ) -> Result<T, RetryError>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T, OpError>>,
    {
        let policy = self.resolve_policy(policy_id).await?;
        let mut session = RetrySession::new(&policy.id, operation);
        let _guard = self.sessions.register(&session);

        self.bus.publish(
            Event::now(EventKind::SessionOpened)
                .with_operation(operation)
                .with_policy(policy.id.as_str(), policy.name.as_str())
                .with_max_attempts(policy.max_attempts)
                .with_correlation_id(ctx.correlation_id.as_deref()),
        );

        // May be swapped for a rate-limit-tuned policy mid-session.
        let mut active = policy;
        let mut last_error: Option<OpError> = None;
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;
            if attempt > active.max_attempts {
                break;
            }

            let mut delay = std::time::Duration::ZERO;
            if attempt > 1 {
                let last = match &last_error {
                    Some(e) => e.clone(),
                    None => break,
                };
                if let Some(reason) = active.deny_reason(attempt, session.elapsed(), &last) {
                    session.close_failed(Some(last));
                    self.close_event(&session, Some(reason.as_str()));
                    break;
                }
                if let Some(err) = self.admit_through_breaker(&active) {
                    session.close_failed(Some(last));
                    self.close_event(&session, Some("circuit_open"));
                    return Err(err);
                }

                let custom = self.custom_for(&active.id);
                delay = active.calculate_delay(attempt, custom.as_ref());
                self.bus.publish(
                    Event::now(EventKind::RetryScheduled)
                        .with_operation(operation)
                        .with_policy(active.id.as_str(), active.name.as_str())
                        .with_attempt(attempt)
                        .with_max_attempts(active.max_attempts)
                        .with_delay(delay)
                        .with_strategies(active.backoff.as_str(), active.jitter.as_str())
                        .with_correlation_id(ctx.correlation_id.as_deref()),
                );

                tokio::select! {
                    _ = ctx.cancel.cancelled() => {
                        session.close_failed(last_error);
                        self.close_event(&session, Some("canceled"));
                        return Err(RetryError::Canceled {
                            operation: operation.into(),
                        });
                    }
                    _ = tokio::time::sleep(delay) => {}
                }
            }

            self.bus.publish(
                Event::now(EventKind::AttemptStarted)
                    .with_operation(operation)
                    .with_attempt(attempt)
                    .with_max_attempts(active.max_attempts),
            );

            let attempt_started = Instant::now();
            let outcome = match self.cfg.attempt_deadline() {
                Some(deadline) => match tokio::time::timeout(deadline, op()).await {
                    Ok(result) => result,
                    Err(_) => Err(OpError::new(format!(
                        "attempt timed out after {deadline:?}"
                    ))
                    .with_type_name("TimeoutError")),
                },
                None => op().await,
            };
            let took = attempt_started.elapsed();

            match outcome {
                Ok(value) => {
                    session.record(RetryAttempt::succeeded(attempt, delay, took, &ctx));
                    self.breaker_success(&active);
                    session.close_success();
                    self.bus.publish(
                        Event::now(EventKind::AttemptSucceeded)
                            .with_operation(operation)
                            .with_attempt(attempt)
                            .with_max_attempts(active.max_attempts)
                            .with_duration(session.elapsed()),
                    );
                    self.close_event(&session, None);
                    return Ok(value);
                }
                Err(err) => {
                    session.record(RetryAttempt::failed(
                        attempt,
                        delay,
                        took,
                        err.clone(),
                        &ctx,
                    ));
                    self.bus.publish(
                        Event::now(EventKind::AttemptFailed)
                            .with_operation(operation)
                            .with_attempt(attempt)
                            .with_reason(err.to_string())
                            .with_duration(took),
                    );

                    let classification = self.classifier.classify(&err, Some(&ctx));
                    if classification.kind == FailureKind::Permanent || !active.is_retryable(&err)
                    {
                        session.close_failed(Some(err.clone()));
                        self.bus.publish(
                            Event::now(EventKind::PermanentFailure)
                                .with_operation(operation)
                                .with_attempt(attempt)
                                .with_reason(format!(
                                    "{}/{}: {err}",
                                    classification.kind.as_str(),
                                    classification.category.as_str()
                                )),
                        );
                        self.close_event(&session, Some("permanent"));
                        return Err(RetryError::Permanent {
                            operation: operation.into(),
                            attempt,
                            classification,
                            source: err,
                        });
                    }

                    self.breaker_failure(&active);

                    if let Some((info, tuned)) = self.rate_limits.handle(&err, Some(&ctx)) {
                        self.bus.publish(
                            Event::now(EventKind::RateLimitDetected)
                                .with_operation(operation)
                                .with_reason(info.kind.as_str())
                                .with_delay(info.wait_time())
                                .with_policy_id(tuned.id.as_str()),
                        );
                        active = tuned;
                    }

                    last_error = Some(err);
                }
            }
        }

        let last_error = last_error.unwrap_or_else(|| OpError::new("no attempt was admitted"));
        self.bus.publish(
            Event::now(EventKind::RetriesExhausted)
                .with_operation(operation)
                .with_max_attempts(active.max_attempts)
                .with_duration(session.elapsed())
                .with_reason(last_error.to_string()),
        );
        if session.ended_at.is_none() {
            session.close_failed(Some(last_error.clone()));
            self.close_event(&session, Some("exhausted"));
        }
        Err(RetryError::MaxRetriesExceeded {
            operation: operation.into(),
            attempts: session.attempt_count(),
            elapsed: session.elapsed(),
            last_error,
        })
    }

    /// Resolves a policy id, substituting the configured default for an
    /// empty id.
    async fn resolve_policy(&self, policy_id: &str) -> Result<RetryPolicy, RetryError> {
        let policy_id = if policy_id.is_empty() {
            self.cfg.default_policy_id.as_str()
        } else {
            policy_id
        };
        let policy = self.policy(policy_id).await.ok_or_else(|| {
            RetryError::Configuration {
                policy_id: policy_id.into(),
                reason: "no such policy".into(),
            }
        })?;
        if !policy.enabled {
            return Err(RetryError::Configuration {
                policy_id: policy_id.into(),
                reason: "policy is disabled".into(),
            });
        }
        Ok(policy)
    }

    /// Consults the policy's breaker before a retry; `Some(err)` denies.
    ///
    /// The map entry is mutated under the shard lock and released before any
    /// await point.
    fn admit_through_breaker(&self, policy: &RetryPolicy) -> Option<RetryError> {
        if !policy.circuit_breaker.enabled {
            return None;
        }
        let mut entry = self
            .breakers
            .entry(policy.id.clone())
            .or_insert_with(|| {
                Breaker::new(policy.circuit_breaker.threshold, policy.circuit_breaker.timeout)
            });
        let (admission, transition) = entry.admit();
        drop(entry);

        if transition == Some(Transition::HalfOpened) {
            self.bus
                .publish(Event::now(EventKind::CircuitHalfOpen).with_policy_id(policy.id.as_str()));
        }
        match admission {
            Admission::Allow | Admission::Probe => None,
            Admission::Deny { retry_in } => Some(RetryError::CircuitOpen {
                policy_id: policy.id.clone(),
                retry_in,
            }),
        }
    }

    fn breaker_success(&self, policy: &RetryPolicy) {
        if !policy.circuit_breaker.enabled {
            return;
        }
        let transition = self
            .breakers
            .get_mut(&policy.id)
            .and_then(|mut b| b.on_success());
        if transition == Some(Transition::Closed) {
            self.bus
                .publish(Event::now(EventKind::CircuitClosed).with_policy_id(policy.id.as_str()));
        }
    }

    fn breaker_failure(&self, policy: &RetryPolicy) {
        if !policy.circuit_breaker.enabled {
            return;
        }
        let mut entry = self
            .breakers
            .entry(policy.id.clone())
            .or_insert_with(|| {
                Breaker::new(policy.circuit_breaker.threshold, policy.circuit_breaker.timeout)
            });
        let transition = entry.on_failure();
        let failures = entry.failures();
        drop(entry);

        if transition == Some(Transition::Opened) {
            self.bus.publish(
                Event::now(EventKind::CircuitOpened)
                    .with_policy_id(policy.id.as_str())
                    .with_reason(format!("{failures} consecutive failures")),
            );
        }
    }

    fn close_event(&self, session: &RetrySession, reason: Option<&str>) {
        let mut ev = Event::now(EventKind::SessionClosed)
            .with_operation(session.operation.as_str())
            .with_policy_id(session.policy_id.as_str())
            .with_attempt(session.attempt_count())
            .with_duration(session.elapsed());
        if let Some(reason) = reason {
            ev = ev.with_reason(reason.to_string());
        }
        self.bus.publish(ev);
    }
}
