//! Circuit breaker for upstream protection.
//!
//! # States
//! - Closed: normal operation, requests pass through
//! - Open: upstream assumed down, requests fail fast
//! - Half-Open: one trial request decides whether the upstream recovered
//!
//! # State Transitions
//! ```text
//! Closed → Open: consecutive failures >= threshold
//! Open → Half-Open: first call after the cooldown (becomes the trial)
//! Half-Open → Closed: trial succeeds
//! Half-Open → Open: trial fails
//! ```
//!
//! # Design Decisions
//! - One breaker per upstream target, shared by all callers
//! - All transitions happen under the breaker's own mutex
//! - Callers arriving while a trial is pending are rejected as if Open
//! - A trial abandoned by a cancelled caller frees the slot for the next caller

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use dashmap::DashMap;
use serde::Serialize;
use thiserror::Error;
use tokio::time::Instant;

use crate::config::CircuitBreakerConfig;
use crate::observability::metrics;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BreakerSettings {
    pub enabled: bool,
    pub failure_threshold: u32,
    pub cooldown: Duration,
}

impl From<&CircuitBreakerConfig> for BreakerSettings {
    fn from(config: &CircuitBreakerConfig) -> Self {
        Self {
            enabled: config.enabled,
            failure_threshold: config.failure_threshold,
            cooldown: Duration::from_millis(config.cooldown_ms),
        }
    }
}

/// Returned when the breaker refuses a call.
#[derive(Debug, Clone, Error)]
#[error("circuit for '{target}' is open")]
pub struct CircuitOpen {
    pub target: String,
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
    trial_in_flight: bool,
}

/// Point-in-time view of a breaker, for the admin API.
#[derive(Debug, Clone, Serialize)]
pub struct BreakerSnapshot {
    pub target: String,
    pub state: CircuitState,
    pub consecutive_failures: u32,
    pub open_for_ms: Option<u64>,
}

#[derive(Debug)]
pub struct CircuitBreaker {
    target: String,
    settings: BreakerSettings,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    pub fn new(target: impl Into<String>, settings: BreakerSettings) -> Self {
        Self {
            target: target.into(),
            settings,
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                opened_at: None,
                trial_in_flight: false,
            }),
        }
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    fn lock(&self) -> MutexGuard<'_, BreakerInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    /// Ask for permission to call the upstream now.
    pub fn try_acquire(self: &Arc<Self>) -> Result<CallPermit, CircuitOpen> {
        self.try_acquire_at(Instant::now())
    }

    pub fn try_acquire_at(self: &Arc<Self>, now: Instant) -> Result<CallPermit, CircuitOpen> {
        if !self.settings.enabled {
            return Ok(CallPermit::new(self.clone(), false));
        }

        let mut inner = self.lock();
        let state = inner.state;
        match state {
            CircuitState::Closed => Ok(CallPermit::new(self.clone(), false)),
            CircuitState::Open => {
                let cooled_down = inner
                    .opened_at
                    .map(|opened| now.saturating_duration_since(opened) >= self.settings.cooldown)
                    .unwrap_or(true);
                if !cooled_down {
                    return Err(self.rejection());
                }
                inner.state = CircuitState::HalfOpen;
                inner.trial_in_flight = true;
                drop(inner);
                tracing::info!(upstream = %self.target, "Circuit half-open, admitting trial request");
                metrics::record_circuit_state(&self.target, CircuitState::HalfOpen);
                Ok(CallPermit::new(self.clone(), true))
            }
            CircuitState::HalfOpen => {
                if inner.trial_in_flight {
                    return Err(self.rejection());
                }
                inner.trial_in_flight = true;
                Ok(CallPermit::new(self.clone(), true))
            }
        }
    }

    fn rejection(&self) -> CircuitOpen {
        CircuitOpen {
            target: self.target.clone(),
        }
    }

    fn on_success(&self, trial: bool) {
        if !self.settings.enabled {
            return;
        }
        let mut inner = self.lock();
        match (inner.state, trial) {
            (CircuitState::HalfOpen, true) => {
                inner.state = CircuitState::Closed;
                inner.consecutive_failures = 0;
                inner.opened_at = None;
                inner.trial_in_flight = false;
                drop(inner);
                tracing::info!(upstream = %self.target, "Circuit closed after successful trial");
                metrics::record_circuit_state(&self.target, CircuitState::Closed);
            }
            (CircuitState::Closed, _) => inner.consecutive_failures = 0,
            // Outcome of a call admitted before the breaker opened.
            _ => {}
        }
    }

    fn on_failure(&self, trial: bool, now: Instant) {
        if !self.settings.enabled {
            return;
        }
        let mut inner = self.lock();
        match (inner.state, trial) {
            (CircuitState::Closed, _) => {
                inner.consecutive_failures = inner.consecutive_failures.saturating_add(1);
                if inner.consecutive_failures >= self.settings.failure_threshold {
                    inner.state = CircuitState::Open;
                    inner.opened_at = Some(now);
                    let failures = inner.consecutive_failures;
                    drop(inner);
                    tracing::warn!(
                        upstream = %self.target,
                        failures,
                        threshold = self.settings.failure_threshold,
                        "Circuit opened"
                    );
                    metrics::record_circuit_state(&self.target, CircuitState::Open);
                }
            }
            (CircuitState::HalfOpen, true) => {
                inner.state = CircuitState::Open;
                inner.opened_at = Some(now);
                inner.trial_in_flight = false;
                drop(inner);
                tracing::warn!(upstream = %self.target, "Trial request failed, circuit reopened");
                metrics::record_circuit_state(&self.target, CircuitState::Open);
            }
            _ => {}
        }
    }

    fn release_trial(&self) {
        let mut inner = self.lock();
        if inner.state == CircuitState::HalfOpen && inner.trial_in_flight {
            inner.trial_in_flight = false;
            tracing::debug!(upstream = %self.target, "Trial request abandoned, slot released");
        }
    }

    pub fn snapshot(&self) -> BreakerSnapshot {
        let inner = self.lock();
        BreakerSnapshot {
            target: self.target.clone(),
            state: inner.state,
            consecutive_failures: inner.consecutive_failures,
            open_for_ms: match inner.state {
                CircuitState::Open => inner
                    .opened_at
                    .map(|opened| opened.elapsed().as_millis() as u64),
                _ => None,
            },
        }
    }
}

/// Admission to call the upstream once; report the outcome through it.
///
/// Dropping an unsettled trial permit frees the half-open slot.
#[derive(Debug)]
pub struct CallPermit {
    breaker: Arc<CircuitBreaker>,
    trial: bool,
    settled: bool,
}

impl CallPermit {
    fn new(breaker: Arc<CircuitBreaker>, trial: bool) -> Self {
        Self {
            breaker,
            trial,
            settled: false,
        }
    }

    pub fn is_trial(&self) -> bool {
        self.trial
    }

    /// The upstream answered in a way that says it is healthy (2xx-4xx).
    pub fn record_success(mut self) {
        self.settled = true;
        self.breaker.on_success(self.trial);
    }

    /// Network error, timeout or 5xx.
    pub fn record_failure(self) {
        self.record_failure_at(Instant::now());
    }

    pub fn record_failure_at(mut self, now: Instant) {
        self.settled = true;
        self.breaker.on_failure(self.trial, now);
    }
}

impl Drop for CallPermit {
    fn drop(&mut self) {
        if self.trial && !self.settled {
            self.breaker.release_trial();
        }
    }
}

/// Breakers keyed by upstream target, created on first use.
#[derive(Debug)]
pub struct BreakerRegistry {
    breakers: DashMap<String, Arc<CircuitBreaker>>,
    settings: BreakerSettings,
}

impl BreakerRegistry {
    pub fn new(settings: BreakerSettings) -> Self {
        Self {
            breakers: DashMap::new(),
            settings,
        }
    }

    pub fn get(&self, target: &str) -> Arc<CircuitBreaker> {
        if let Some(existing) = self.breakers.get(target) {
            return existing.value().clone();
        }
        self.breakers
            .entry(target.to_owned())
            .or_insert_with(|| Arc::new(CircuitBreaker::new(target, self.settings)))
            .value()
            .clone()
    }

    pub fn snapshots(&self) -> Vec<BreakerSnapshot> {
        let mut snapshots: Vec<_> = self.breakers.iter().map(|b| b.value().snapshot()).collect();
        snapshots.sort_by(|a, b| a.target.cmp(&b.target));
        snapshots
    }
}
