//! Per-provider circuit breaker
//!
//! CLOSED counts consecutive failures inside a rolling window and opens at
//! the threshold. OPEN rejects until the cooldown elapses, then the next
//! admission becomes the single HALF_OPEN probe. A successful probe closes
//! the circuit and resets the cooldown; a failed probe re-opens it with the
//! cooldown multiplied, capped at `max_cooldown_ms`.

use crate::metrics::ResilienceMetrics;
use chrono::{DateTime, Utc};
use common::ConfigError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, RwLock};
use tokio::time::Instant;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitStatus {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            CircuitStatus::Closed => "closed",
            CircuitStatus::Open => "open",
            CircuitStatus::HalfOpen => "half_open",
        }
    }
}

impl fmt::Display for CircuitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    pub failure_window_ms: u64,
    pub initial_cooldown_ms: u64,
    pub cooldown_multiplier: f64,
    pub max_cooldown_ms: u64,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            failure_window_ms: 60_000,
            initial_cooldown_ms: 30_000,
            cooldown_multiplier: 2.0,
            max_cooldown_ms: 300_000,
        }
    }
}

impl CircuitBreakerConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.failure_threshold == 0 {
            return Err(ConfigError::invalid(
                "circuit_breaker.failure_threshold",
                "must be at least 1",
            ));
        }
        if self.failure_window_ms == 0 {
            return Err(ConfigError::invalid(
                "circuit_breaker.failure_window_ms",
                "must be greater than zero",
            ));
        }
        if self.initial_cooldown_ms == 0 {
            return Err(ConfigError::invalid(
                "circuit_breaker.initial_cooldown_ms",
                "must be greater than zero",
            ));
        }
        if !self.cooldown_multiplier.is_finite() || self.cooldown_multiplier < 1.0 {
            return Err(ConfigError::invalid(
                "circuit_breaker.cooldown_multiplier",
                "must be a finite number >= 1.0",
            ));
        }
        if self.max_cooldown_ms < self.initial_cooldown_ms {
            return Err(ConfigError::invalid(
                "circuit_breaker.max_cooldown_ms",
                "must not be smaller than initial_cooldown_ms",
            ));
        }
        Ok(())
    }

    pub fn failure_window(&self) -> Duration {
        Duration::from_millis(self.failure_window_ms)
    }

    pub fn initial_cooldown(&self) -> Duration {
        Duration::from_millis(self.initial_cooldown_ms)
    }

    pub fn max_cooldown(&self) -> Duration {
        Duration::from_millis(self.max_cooldown_ms)
    }
}

/// Snapshot of a breaker
#[derive(Debug, Clone, PartialEq)]
pub struct CircuitState {
    pub status: CircuitStatus,
    pub consecutive_failures: u32,
    pub opened_at: Option<Instant>,
    pub next_probe_at: Option<Instant>,
    pub current_cooldown: Duration,
    pub open_cycles: u32,
    pub last_transition_at: Instant,
}

/// Broadcast on every status change
#[derive(Debug, Clone)]
pub struct CircuitTransition {
    pub name: String,
    pub from: CircuitStatus,
    pub to: CircuitStatus,
    pub at: DateTime<Utc>,
}

/// How a call was let through
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Normal,
    Probe,
}

#[derive(Debug)]
struct Inner {
    state: CircuitState,
    last_failure_at: Option<Instant>,
    probe_in_flight: bool,
}

#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    inner: RwLock<Inner>,
    transitions: broadcast::Sender<CircuitTransition>,
    metrics: Option<Arc<ResilienceMetrics>>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        let (transitions, _) = broadcast::channel(64);
        let now = Instant::now();
        Self {
            name: name.into(),
            inner: RwLock::new(Inner {
                state: CircuitState {
                    status: CircuitStatus::Closed,
                    consecutive_failures: 0,
                    opened_at: None,
                    next_probe_at: None,
                    current_cooldown: config.initial_cooldown(),
                    open_cycles: 0,
                    last_transition_at: now,
                },
                last_failure_at: None,
                probe_in_flight: false,
            }),
            config,
            transitions,
            metrics: None,
        }
    }

    #[must_use]
    pub fn with_metrics(mut self, metrics: Arc<ResilienceMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CircuitTransition> {
        self.transitions.subscribe()
    }

    pub async fn allow(&self) -> bool {
        self.admit().await.is_some()
    }

    /// Decide whether a call may proceed. At most one probe is admitted
    /// while HALF_OPEN.
    pub async fn admit(&self) -> Option<Admission> {
        let mut inner = self.inner.write().await;
        let now = Instant::now();
        match inner.state.status {
            CircuitStatus::Closed => Some(Admission::Normal),
            CircuitStatus::Open => {
                let due = inner.state.next_probe_at.map_or(true, |at| now >= at);
                if !due {
                    return None;
                }
                self.transition(&mut inner, CircuitStatus::HalfOpen, now);
                inner.probe_in_flight = true;
                Some(Admission::Probe)
            }
            CircuitStatus::HalfOpen => {
                if inner.probe_in_flight {
                    None
                } else {
                    inner.probe_in_flight = true;
                    Some(Admission::Probe)
                }
            }
        }
    }

    /// Release the probe slot when a probe call ended without an outcome
    pub async fn abandon_probe(&self) {
        let mut inner = self.inner.write().await;
        if inner.state.status == CircuitStatus::HalfOpen {
            inner.probe_in_flight = false;
        }
    }

    pub async fn on_success(&self) {
        let mut inner = self.inner.write().await;
        match inner.state.status {
            CircuitStatus::Closed => {
                inner.state.consecutive_failures = 0;
                inner.last_failure_at = None;
            }
            CircuitStatus::HalfOpen => {
                let now = Instant::now();
                inner.state.consecutive_failures = 0;
                inner.state.current_cooldown = self.config.initial_cooldown();
                inner.state.open_cycles = 0;
                inner.state.opened_at = None;
                inner.state.next_probe_at = None;
                inner.last_failure_at = None;
                inner.probe_in_flight = false;
                self.transition(&mut inner, CircuitStatus::Closed, now);
            }
            CircuitStatus::Open => {
                debug!(circuit = %self.name, "Ignoring late success while open");
            }
        }
    }

    pub async fn on_failure(&self) {
        let mut inner = self.inner.write().await;
        let now = Instant::now();
        match inner.state.status {
            CircuitStatus::Closed => {
                let window = self.config.failure_window();
                if let Some(last) = inner.last_failure_at {
                    if now.saturating_duration_since(last) > window {
                        inner.state.consecutive_failures = 0;
                    }
                }
                inner.state.consecutive_failures += 1;
                inner.last_failure_at = Some(now);
                if inner.state.consecutive_failures >= self.config.failure_threshold {
                    warn!(
                        circuit = %self.name,
                        failure_count = inner.state.consecutive_failures,
                        threshold = self.config.failure_threshold,
                        "Circuit breaker opened due to failures"
                    );
                    self.open(&mut inner, now);
                }
            }
            CircuitStatus::HalfOpen => {
                let escalated = inner
                    .state
                    .current_cooldown
                    .mul_f64(self.config.cooldown_multiplier)
                    .min(self.config.max_cooldown());
                inner.state.current_cooldown = escalated;
                inner.state.open_cycles += 1;
                inner.state.consecutive_failures += 1;
                inner.last_failure_at = Some(now);
                inner.probe_in_flight = false;
                warn!(
                    circuit = %self.name,
                    cooldown_ms = escalated.as_millis() as u64,
                    open_cycles = inner.state.open_cycles,
                    "Circuit breaker reopened after failed probe"
                );
                self.open(&mut inner, now);
            }
            CircuitStatus::Open => {
                inner.state.consecutive_failures += 1;
                inner.last_failure_at = Some(now);
            }
        }
    }

    pub async fn snapshot(&self) -> CircuitState {
        self.inner.read().await.state.clone()
    }

    pub async fn status(&self) -> CircuitStatus {
        self.inner.read().await.state.status
    }

    pub async fn consecutive_failures(&self) -> u32 {
        self.inner.read().await.state.consecutive_failures
    }

    /// True while OPEN and the probe time has not been reached
    pub async fn is_rejecting(&self) -> bool {
        let inner = self.inner.read().await;
        inner.state.status == CircuitStatus::Open
            && inner
                .state
                .next_probe_at
                .is_some_and(|at| Instant::now() < at)
    }

    fn open(&self, inner: &mut Inner, now: Instant) {
        inner.state.opened_at = Some(now);
        inner.state.next_probe_at = Some(now + inner.state.current_cooldown);
        self.transition(inner, CircuitStatus::Open, now);
    }

    fn transition(&self, inner: &mut Inner, to: CircuitStatus, now: Instant) {
        let from = inner.state.status;
        inner.state.status = to;
        inner.state.last_transition_at = now;
        info!(circuit = %self.name, from = %from, to = %to, "Circuit breaker transition");
        if let Some(metrics) = &self.metrics {
            metrics.record_transition(&self.name, to);
        }
        // No subscribers is fine
        let _ = self.transitions.send(CircuitTransition {
            name: self.name.clone(),
            from,
            to,
            at: Utc::now(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::advance;

    fn config(threshold: u32) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: threshold,
            failure_window_ms: 10_000,
            initial_cooldown_ms: 1_000,
            cooldown_multiplier: 2.0,
            max_cooldown_ms: 3_000,
        }
    }

    async fn trip(cb: &CircuitBreaker) {
        for _ in 0..cb.config().failure_threshold {
            cb.on_failure().await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_circuit_breaker_closed_state() {
        let cb = CircuitBreaker::new("alpha", config(3));
        for _ in 0..5 {
            assert_eq!(cb.admit().await, Some(Admission::Normal));
            cb.on_success().await;
            assert_eq!(cb.status().await, CircuitStatus::Closed);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_circuit_breaker_opens_on_failures() {
        let cb = CircuitBreaker::new("alpha", config(3));
        for _ in 0..2 {
            assert!(cb.allow().await);
            cb.on_failure().await;
            assert_eq!(cb.status().await, CircuitStatus::Closed);
        }

        cb.on_failure().await;
        assert_eq!(cb.status().await, CircuitStatus::Open);
        assert!(cb.is_rejecting().await);
        assert_eq!(cb.admit().await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_resets_consecutive_count() {
        let cb = CircuitBreaker::new("alpha", config(3));
        cb.on_failure().await;
        cb.on_failure().await;
        cb.on_success().await;
        cb.on_failure().await;
        cb.on_failure().await;
        assert_eq!(cb.status().await, CircuitStatus::Closed);
        assert_eq!(cb.consecutive_failures().await, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failures_outside_window_do_not_accumulate() {
        let cb = CircuitBreaker::new("alpha", config(3));
        cb.on_failure().await;
        cb.on_failure().await;
        advance(Duration::from_millis(10_001)).await;
        cb.on_failure().await;
        assert_eq!(cb.status().await, CircuitStatus::Closed);
        assert_eq!(cb.consecutive_failures().await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_admits_single_probe() {
        let cb = CircuitBreaker::new("alpha", config(1));
        trip(&cb).await;
        assert_eq!(cb.admit().await, None);

        advance(Duration::from_millis(1_000)).await;
        assert!(!cb.is_rejecting().await);
        assert_eq!(cb.admit().await, Some(Admission::Probe));
        assert_eq!(cb.status().await, CircuitStatus::HalfOpen);
        assert_eq!(cb.admit().await, None);

        cb.abandon_probe().await;
        assert_eq!(cb.admit().await, Some(Admission::Probe));
    }

    #[tokio::test(start_paused = true)]
    async fn test_successful_probe_closes_and_resets_cooldown() {
        let cb = CircuitBreaker::new("alpha", config(1));
        trip(&cb).await;
        advance(Duration::from_millis(1_000)).await;
        assert_eq!(cb.admit().await, Some(Admission::Probe));
        cb.on_failure().await;
        assert_eq!(cb.snapshot().await.current_cooldown, Duration::from_millis(2_000));

        advance(Duration::from_millis(2_000)).await;
        assert_eq!(cb.admit().await, Some(Admission::Probe));
        cb.on_success().await;
        let state = cb.snapshot().await;
        assert_eq!(state.status, CircuitStatus::Closed);
        assert_eq!(state.consecutive_failures, 0);
        assert_eq!(state.current_cooldown, Duration::from_millis(1_000));
        assert_eq!(state.open_cycles, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cooldown_escalates_up_to_cap() {
        let cb = CircuitBreaker::new("alpha", config(1));
        trip(&cb).await;
        let expected = [2_000, 3_000, 3_000];
        let mut cooldown = 1_000;
        for next in expected {
            advance(Duration::from_millis(cooldown)).await;
            assert_eq!(cb.admit().await, Some(Admission::Probe));
            cb.on_failure().await;
            let state = cb.snapshot().await;
            assert_eq!(state.status, CircuitStatus::Open);
            assert_eq!(state.current_cooldown, Duration::from_millis(next));
            cooldown = next;
        }
        assert_eq!(cb.snapshot().await.open_cycles, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transitions_are_broadcast() {
        let cb = CircuitBreaker::new("alpha", config(1));
        let mut rx = cb.subscribe();
        trip(&cb).await;
        advance(Duration::from_millis(1_000)).await;
        assert_eq!(cb.admit().await, Some(Admission::Probe));
        cb.on_success().await;

        let seen: Vec<(CircuitStatus, CircuitStatus)> = std::iter::from_fn(|| rx.try_recv().ok())
            .map(|t| (t.from, t.to))
            .collect();
        assert_eq!(
            seen,
            vec![
                (CircuitStatus::Closed, CircuitStatus::Open),
                (CircuitStatus::Open, CircuitStatus::HalfOpen),
                (CircuitStatus::HalfOpen, CircuitStatus::Closed),
            ]
        );
    }

    #[test]
    fn test_config_validation() {
        assert!(CircuitBreakerConfig::default().validate().is_ok());
        let mut config = CircuitBreakerConfig::default();
        config.failure_threshold = 0;
        assert!(config.validate().is_err());

        let mut config = CircuitBreakerConfig::default();
        config.cooldown_multiplier = 0.5;
        assert!(config.validate().is_err());

        let mut config = CircuitBreakerConfig::default();
        config.max_cooldown_ms = 10;
        assert!(config.validate().is_err());
    }
}
