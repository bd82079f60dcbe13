//! Recovery strategies and their coordinator
//!
//! The coordinator picks the single best matching strategy for a record
//! (lowest priority value, then registration order) and runs its action if
//! the global cooldown, the strategy's own cooldown and its concurrency
//! limit all allow it. The three gates are checked and claimed under one
//! lock. Every dispatch, including skipped ones, is appended to a bounded
//! history and reported to listeners. Retry strategies are only eligible
//! when the record comes with the call that produced it.

use crate::alerting::{notify_isolated, Notification, Notifier};
use crate::classifier::{ErrorKind, ErrorRecord, Severity};
use crate::errors::ResilienceError;
use crate::metrics::ResilienceMetrics;
use crate::provider::CapabilityType;
use crate::registry::{ExecuteOptions, ProviderRegistry};
use crate::retry::RetryPolicyConfig;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::ConfigError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex as SyncMutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio::time::Instant;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryAction {
    /// Re-issue the originating call through the registry
    Retry,
    /// Push the failing provider behind its peers for a while
    Failover,
    /// Hand the record to the notifier
    Notify,
    /// Record the attempt and do nothing else
    Suppress,
}

impl RecoveryAction {
    pub fn as_str(self) -> &'static str {
        match self {
            RecoveryAction::Retry => "retry",
            RecoveryAction::Failover => "failover",
            RecoveryAction::Notify => "notify",
            RecoveryAction::Suppress => "suppress",
        }
    }
}

impl fmt::Display for RecoveryAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

type RecordPredicate = Arc<dyn Fn(&ErrorRecord) -> bool + Send + Sync>;

/// Which records a strategy applies to. Empty criteria match everything.
#[derive(Clone, Default)]
pub struct ErrorMatcher {
    kinds: Vec<ErrorKind>,
    min_severity: Option<Severity>,
    component: Option<String>,
    provider_id: Option<String>,
    predicate: Option<RecordPredicate>,
}

impl fmt::Debug for ErrorMatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ErrorMatcher")
            .field("kinds", &self.kinds)
            .field("min_severity", &self.min_severity)
            .field("component", &self.component)
            .field("provider_id", &self.provider_id)
            .field("predicate", &self.predicate.is_some())
            .finish()
    }
}

impl ErrorMatcher {
    pub fn any() -> Self {
        Self::default()
    }

    pub fn kinds(kinds: impl IntoIterator<Item = ErrorKind>) -> Self {
        Self {
            kinds: kinds.into_iter().collect(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_min_severity(mut self, severity: Severity) -> Self {
        self.min_severity = Some(severity);
        self
    }

    #[must_use]
    pub fn with_component(mut self, component: impl Into<String>) -> Self {
        self.component = Some(component.into());
        self
    }

    #[must_use]
    pub fn with_provider(mut self, provider_id: impl Into<String>) -> Self {
        self.provider_id = Some(provider_id.into());
        self
    }

    #[must_use]
    pub fn with_predicate<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&ErrorRecord) -> bool + Send + Sync + 'static,
    {
        self.predicate = Some(Arc::new(predicate));
        self
    }

    pub fn matches(&self, record: &ErrorRecord) -> bool {
        if !self.kinds.is_empty() && !self.kinds.contains(&record.kind) {
            return false;
        }
        if self.min_severity.is_some_and(|min| record.severity < min) {
            return false;
        }
        if let Some(component) = &self.component {
            if record.context.component.as_ref() != Some(component) {
                return false;
            }
        }
        if let Some(provider_id) = &self.provider_id {
            if record.context.provider_id.as_ref() != Some(provider_id) {
                return false;
            }
        }
        let Some(predicate) = &self.predicate else {
            return true;
        };
        panic::catch_unwind(AssertUnwindSafe(|| predicate(record))).unwrap_or_else(|_| {
            warn!(error_id = %record.id, "Matcher predicate panicked, treating as no match");
            false
        })
    }
}

#[derive(Debug, Clone)]
pub struct RecoveryStrategy {
    pub id: String,
    pub matcher: ErrorMatcher,
    /// Lower values are preferred
    pub priority: i32,
    pub max_concurrent: u32,
    pub cooldown_ms: u64,
    pub action: RecoveryAction,
    pub enabled: bool,
}

impl RecoveryStrategy {
    pub fn new(id: impl Into<String>, matcher: ErrorMatcher, action: RecoveryAction) -> Self {
        Self {
            id: id.into(),
            matcher,
            priority: 100,
            max_concurrent: 1,
            cooldown_ms: 0,
            action,
            enabled: true,
        }
    }

    #[must_use]
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    #[must_use]
    pub fn with_max_concurrent(mut self, max_concurrent: u32) -> Self {
        self.max_concurrent = max_concurrent;
        self
    }

    #[must_use]
    pub fn with_cooldown(mut self, cooldown: Duration) -> Self {
        self.cooldown_ms = cooldown.as_millis() as u64;
        self
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_millis(self.cooldown_ms)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.id.trim().is_empty() {
            return Err(ConfigError::invalid("recovery_strategy.id", "cannot be empty"));
        }
        if self.max_concurrent == 0 {
            return Err(ConfigError::invalid(
                format!("recovery_strategy.{}.max_concurrent", self.id),
                "must be at least 1",
            ));
        }
        Ok(())
    }
}

/// Ordered set of strategies
#[derive(Debug, Default)]
pub struct RecoveryStrategyRegistry {
    strategies: RwLock<Vec<RecoveryStrategy>>,
}

impl RecoveryStrategyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The built-in strategy set
    pub fn with_defaults() -> Self {
        Self {
            strategies: RwLock::new(default_strategies()),
        }
    }

    pub async fn register(&self, strategy: RecoveryStrategy) -> Result<(), ResilienceError> {
        strategy.validate()?;
        let mut strategies = self.strategies.write().await;
        if strategies.iter().any(|s| s.id == strategy.id) {
            return Err(ResilienceError::DuplicateStrategy { id: strategy.id });
        }
        info!(strategy = %strategy.id, action = %strategy.action, "Recovery strategy registered");
        strategies.push(strategy);
        Ok(())
    }

    pub async fn remove(&self, id: &str) -> Result<RecoveryStrategy, ResilienceError> {
        let mut strategies = self.strategies.write().await;
        let index = strategies
            .iter()
            .position(|s| s.id == id)
            .ok_or_else(|| ResilienceError::UnknownStrategy { id: id.to_string() })?;
        Ok(strategies.remove(index))
    }

    pub async fn set_enabled(&self, id: &str, enabled: bool) -> Result<(), ResilienceError> {
        let mut strategies = self.strategies.write().await;
        let strategy = strategies
            .iter_mut()
            .find(|s| s.id == id)
            .ok_or_else(|| ResilienceError::UnknownStrategy { id: id.to_string() })?;
        strategy.enabled = enabled;
        Ok(())
    }

    /// Best enabled match: lowest priority value, earliest registration on ties
    pub async fn select(&self, record: &ErrorRecord) -> Option<RecoveryStrategy> {
        self.select_for(record, true).await
    }

    /// Like [`select`](Self::select), leaving out Retry strategies unless
    /// `retryable_call` is set
    pub async fn select_for(
        &self,
        record: &ErrorRecord,
        retryable_call: bool,
    ) -> Option<RecoveryStrategy> {
        self.strategies
            .read()
            .await
            .iter()
            .filter(|s| s.enabled && (retryable_call || s.action != RecoveryAction::Retry))
            .filter(|s| s.matcher.matches(record))
            .min_by_key(|s| s.priority)
            .cloned()
    }

    pub async fn strategies(&self) -> Vec<RecoveryStrategy> {
        self.strategies.read().await.clone()
    }

    pub async fn len(&self) -> usize {
        self.strategies.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.strategies.read().await.is_empty()
    }
}

fn default_strategies() -> Vec<RecoveryStrategy> {
    vec![
        RecoveryStrategy::new(
            "failover-rate-limited",
            ErrorMatcher::kinds([ErrorKind::RateLimit]),
            RecoveryAction::Failover,
        )
        .with_priority(10)
        .with_cooldown(Duration::from_secs(10)),
        RecoveryStrategy::new(
            "retry-transient",
            ErrorMatcher::kinds([ErrorKind::Network, ErrorKind::Server]),
            RecoveryAction::Retry,
        )
        .with_priority(20)
        .with_max_concurrent(4),
        RecoveryStrategy::new(
            "notify-access-denied",
            ErrorMatcher::kinds([ErrorKind::Auth, ErrorKind::Authorization]),
            RecoveryAction::Notify,
        )
        .with_priority(30)
        .with_cooldown(Duration::from_secs(60)),
        RecoveryStrategy::new(
            "notify-critical",
            ErrorMatcher::any().with_min_severity(Severity::Critical),
            RecoveryAction::Notify,
        )
        .with_priority(50),
        RecoveryStrategy::new(
            "suppress-validation",
            ErrorMatcher::kinds([ErrorKind::Validation]),
            RecoveryAction::Suppress,
        )
        .with_priority(90),
    ]
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryOutcome {
    Succeeded,
    Failed,
    SkippedCooldownActive,
    SkippedConcurrencyLimit,
}

impl RecoveryOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            RecoveryOutcome::Succeeded => "succeeded",
            RecoveryOutcome::Failed => "failed",
            RecoveryOutcome::SkippedCooldownActive => "skipped_cooldown_active",
            RecoveryOutcome::SkippedConcurrencyLimit => "skipped_concurrency_limit",
        }
    }

    pub fn is_skipped(self) -> bool {
        matches!(
            self,
            RecoveryOutcome::SkippedCooldownActive | RecoveryOutcome::SkippedConcurrencyLimit
        )
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RecoveryAttempt {
    pub strategy_id: String,
    pub error_id: String,
    pub action: RecoveryAction,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub outcome: RecoveryOutcome,
    pub detail: Option<String>,
}

/// The call a record came from, kept so a Retry action can re-issue it
#[derive(Debug, Clone)]
pub struct OriginCall {
    pub capability: CapabilityType,
    pub request: Value,
    pub retry: Option<RetryPolicyConfig>,
}

/// Result of one dispatch
#[derive(Debug, Clone)]
pub struct RecoveryDispatch {
    pub attempt: RecoveryAttempt,
    /// Response produced by a successful Retry
    pub response: Option<Value>,
    /// Records produced by the action itself. Observe them, never re-dispatch.
    pub follow_up: Vec<ErrorRecord>,
}

#[async_trait]
pub trait RecoveryListener: Send + Sync {
    async fn on_attempt(&self, attempt: &RecoveryAttempt);
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecoveryConfig {
    pub global_cooldown_ms: u64,
    pub failover_penalty_ms: u64,
    pub retry_timeout_ms: u64,
    pub history_limit: usize,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            global_cooldown_ms: 5_000,
            failover_penalty_ms: 60_000,
            retry_timeout_ms: 30_000,
            history_limit: 500,
        }
    }
}

impl RecoveryConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.history_limit == 0 {
            return Err(ConfigError::invalid(
                "recovery.history_limit",
                "must be at least 1",
            ));
        }
        if self.retry_timeout_ms == 0 {
            return Err(ConfigError::invalid(
                "recovery.retry_timeout_ms",
                "must be greater than zero",
            ));
        }
        Ok(())
    }

    pub fn global_cooldown(&self) -> Duration {
        Duration::from_millis(self.global_cooldown_ms)
    }

    pub fn failover_penalty(&self) -> Duration {
        Duration::from_millis(self.failover_penalty_ms)
    }

    pub fn retry_timeout(&self) -> Duration {
        Duration::from_millis(self.retry_timeout_ms)
    }
}

#[derive(Debug, Default)]
struct StrategyGate {
    in_flight: u32,
    last_executed: Option<Instant>,
}

#[derive(Debug, Default)]
struct Gates {
    last_global: Option<Instant>,
    strategies: HashMap<String, StrategyGate>,
}

fn lock_gates(gates: &SyncMutex<Gates>) -> MutexGuard<'_, Gates> {
    gates.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A claimed concurrency slot. Dropping it releases the slot and refreshes
/// both cooldowns, so an abandoned action cannot leak it.
struct StrategyPermit<'a> {
    gates: &'a SyncMutex<Gates>,
    strategy_id: String,
}

impl Drop for StrategyPermit<'_> {
    fn drop(&mut self) {
        let mut gates = lock_gates(self.gates);
        let now = Instant::now();
        if let Some(gate) = gates.strategies.get_mut(&self.strategy_id) {
            gate.in_flight = gate.in_flight.saturating_sub(1);
            gate.last_executed = Some(now);
        }
        gates.last_global = Some(now);
    }
}

struct ActionResult {
    outcome: RecoveryOutcome,
    detail: Option<String>,
    response: Option<Value>,
    follow_up: Vec<ErrorRecord>,
}

impl ActionResult {
    fn succeeded(detail: Option<String>) -> Self {
        Self {
            outcome: RecoveryOutcome::Succeeded,
            detail,
            response: None,
            follow_up: Vec::new(),
        }
    }

    fn failed(detail: impl Into<String>) -> Self {
        Self {
            outcome: RecoveryOutcome::Failed,
            detail: Some(detail.into()),
            response: None,
            follow_up: Vec::new(),
        }
    }
}

pub struct RecoveryCoordinator {
    config: RecoveryConfig,
    strategies: Arc<RecoveryStrategyRegistry>,
    registry: Arc<ProviderRegistry>,
    notifier: Arc<dyn Notifier>,
    gates: SyncMutex<Gates>,
    history: Mutex<VecDeque<RecoveryAttempt>>,
    listeners: RwLock<Vec<Arc<dyn RecoveryListener>>>,
    metrics: Option<Arc<ResilienceMetrics>>,
}

impl fmt::Debug for RecoveryCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecoveryCoordinator")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl RecoveryCoordinator {
    pub fn new(
        config: RecoveryConfig,
        strategies: Arc<RecoveryStrategyRegistry>,
        registry: Arc<ProviderRegistry>,
        notifier: Arc<dyn Notifier>,
        metrics: Option<Arc<ResilienceMetrics>>,
    ) -> Self {
        Self {
            config,
            strategies,
            registry,
            notifier,
            gates: SyncMutex::new(Gates::default()),
            history: Mutex::new(VecDeque::new()),
            listeners: RwLock::new(Vec::new()),
            metrics,
        }
    }

    pub fn strategies(&self) -> &Arc<RecoveryStrategyRegistry> {
        &self.strategies
    }

    pub async fn add_listener(&self, listener: Arc<dyn RecoveryListener>) {
        self.listeners.write().await.push(listener);
    }

    /// Attempts, oldest first
    pub async fn history(&self) -> Vec<RecoveryAttempt> {
        self.history.lock().await.iter().cloned().collect()
    }

    /// Run the best matching strategy for `record`. `None` when nothing matches.
    pub async fn dispatch(
        &self,
        record: &ErrorRecord,
        origin: Option<OriginCall>,
    ) -> Option<RecoveryDispatch> {
        let strategy = self
            .strategies
            .select_for(record, origin.is_some())
            .await?;
        let started_at = Utc::now();

        let result = match self.claim(&strategy) {
            Err(skipped) => {
                debug!(
                    strategy = %strategy.id,
                    error_id = %record.id,
                    outcome = skipped.as_str(),
                    "Recovery skipped"
                );
                ActionResult {
                    outcome: skipped,
                    detail: None,
                    response: None,
                    follow_up: Vec::new(),
                }
            }
            Ok(permit) => {
                let result = self.run(&strategy, record, origin).await;
                drop(permit);
                result
            }
        };

        let attempt = RecoveryAttempt {
            strategy_id: strategy.id.clone(),
            error_id: record.id.clone(),
            action: strategy.action,
            started_at,
            finished_at: Utc::now(),
            outcome: result.outcome,
            detail: result.detail,
        };
        if !attempt.outcome.is_skipped() {
            info!(
                strategy = %attempt.strategy_id,
                action = %attempt.action,
                error_id = %attempt.error_id,
                outcome = attempt.outcome.as_str(),
                "Recovery attempt finished"
            );
        }
        if let Some(metrics) = &self.metrics {
            metrics.record_recovery(&attempt.strategy_id, attempt.outcome.as_str());
        }
        self.remember(attempt.clone()).await;
        self.announce(&attempt).await;

        Some(RecoveryDispatch {
            attempt,
            response: result.response,
            follow_up: result.follow_up,
        })
    }

    /// Check and claim all three gates atomically
    fn claim(&self, strategy: &RecoveryStrategy) -> Result<StrategyPermit<'_>, RecoveryOutcome> {
        let mut gates = lock_gates(&self.gates);
        let now = Instant::now();
        if gates
            .last_global
            .is_some_and(|at| now.saturating_duration_since(at) < self.config.global_cooldown())
        {
            return Err(RecoveryOutcome::SkippedCooldownActive);
        }
        let gate = gates.strategies.entry(strategy.id.clone()).or_default();
        if gate
            .last_executed
            .is_some_and(|at| now.saturating_duration_since(at) < strategy.cooldown())
        {
            return Err(RecoveryOutcome::SkippedCooldownActive);
        }
        if gate.in_flight >= strategy.max_concurrent {
            return Err(RecoveryOutcome::SkippedConcurrencyLimit);
        }
        gate.in_flight += 1;
        gate.last_executed = Some(now);
        gates.last_global = Some(now);
        Ok(StrategyPermit {
            gates: &self.gates,
            strategy_id: strategy.id.clone(),
        })
    }

    async fn run(
        &self,
        strategy: &RecoveryStrategy,
        record: &ErrorRecord,
        origin: Option<OriginCall>,
    ) -> ActionResult {
        match strategy.action {
            RecoveryAction::Retry => {
                let Some(origin) = origin else {
                    return ActionResult::failed("no originating call to retry");
                };
                let mut options = ExecuteOptions::default()
                    .with_timeout(self.config.retry_timeout())
                    .from_recovery();
                options.retry = origin.retry;
                let execution = self
                    .registry
                    .execute_traced(origin.capability, origin.request, options)
                    .await;
                match execution.result {
                    Ok(response) => ActionResult {
                        outcome: RecoveryOutcome::Succeeded,
                        detail: execution.served_by.map(|id| format!("served by {id}")),
                        response: Some(response),
                        follow_up: execution.failures,
                    },
                    Err(error) => ActionResult {
                        outcome: RecoveryOutcome::Failed,
                        detail: Some(error.to_string()),
                        response: None,
                        follow_up: execution.failures,
                    },
                }
            }
            RecoveryAction::Failover => {
                let Some(provider_id) = record.provider_id() else {
                    return ActionResult::failed("record does not name a provider");
                };
                let penalty = self.config.failover_penalty();
                match self.registry.deprioritize(provider_id, penalty).await {
                    Ok(()) => ActionResult::succeeded(Some(format!(
                        "provider '{provider_id}' deprioritized for {}ms",
                        penalty.as_millis()
                    ))),
                    Err(error) => ActionResult::failed(error.to_string()),
                }
            }
            RecoveryAction::Notify => {
                let notification = Notification::Recovery {
                    strategy_id: strategy.id.clone(),
                    record: record.clone(),
                };
                match notify_isolated(&self.notifier, notification).await {
                    Ok(()) => ActionResult::succeeded(None),
                    Err(error) => {
                        warn!(strategy = %strategy.id, error = %error, "Recovery notification failed");
                        ActionResult::failed(error.to_string())
                    }
                }
            }
            RecoveryAction::Suppress => ActionResult::succeeded(Some("suppressed".to_string())),
        }
    }

    async fn remember(&self, attempt: RecoveryAttempt) {
        let mut history = self.history.lock().await;
        history.push_back(attempt);
        while history.len() > self.config.history_limit {
            history.pop_front();
        }
    }

    async fn announce(&self, attempt: &RecoveryAttempt) {
        let listeners = self.listeners.read().await.clone();
        for listener in listeners {
            let attempt = attempt.clone();
            let delivery = tokio::spawn(async move { listener.on_attempt(&attempt).await });
            if let Err(e) = delivery.await {
                warn!(error = %e, "Recovery listener panicked");
            }
        }
    }
}
