//! Threshold alerting over the error stream
//!
//! Every observed [`ErrorRecord`] is counted against the rules whose metric
//! it matches. A rule whose windowed value reaches its threshold opens an
//! incident (at most one open incident per rule, and never within the
//! rule's cooldown of the previous one). An incident closes on operator
//! request or automatically once the value stayed below the threshold for a
//! full window. Incident notifications are delivered on detached tasks.

use crate::classifier::{ErrorKind, ErrorRecord, Severity};
use crate::errors::ResilienceError;
use crate::metrics::ResilienceMetrics;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::ConfigError;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// What a rule counts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "metric", content = "kind", rename_all = "snake_case")]
pub enum AlertMetric {
    /// Matching records inside the window
    ErrorCount,
    /// Matching records per minute, averaged over the window
    ErrorRatePerMinute,
    /// Critical records inside the window
    CriticalCount,
    /// Records of one kind inside the window
    KindCount(ErrorKind),
}

impl AlertMetric {
    pub fn matches(&self, record: &ErrorRecord) -> bool {
        match self {
            AlertMetric::ErrorCount | AlertMetric::ErrorRatePerMinute => true,
            AlertMetric::CriticalCount => record.severity == Severity::Critical,
            AlertMetric::KindCount(kind) => record.kind == *kind,
        }
    }

    fn value(&self, hits: usize, window: Duration) -> f64 {
        match self {
            AlertMetric::ErrorRatePerMinute => {
                let minutes = window.as_secs_f64() / 60.0;
                if minutes > 0.0 {
                    hits as f64 / minutes
                } else {
                    0.0
                }
            }
            _ => hits as f64,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertRule {
    pub id: String,
    pub metric: AlertMetric,
    pub threshold_value: f64,
    pub window_ms: u64,
    pub cooldown_ms: u64,
    pub severity: Severity,
}

impl AlertRule {
    pub fn new(id: impl Into<String>, metric: AlertMetric, threshold_value: f64) -> Self {
        Self {
            id: id.into(),
            metric,
            threshold_value,
            window_ms: 60_000,
            cooldown_ms: 300_000,
            severity: Severity::Error,
        }
    }

    #[must_use]
    pub fn with_window(mut self, window: Duration) -> Self {
        self.window_ms = window.as_millis() as u64;
        self
    }

    #[must_use]
    pub fn with_cooldown(mut self, cooldown: Duration) -> Self {
        self.cooldown_ms = cooldown.as_millis() as u64;
        self
    }

    #[must_use]
    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }

    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_millis(self.cooldown_ms)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.id.trim().is_empty() {
            return Err(ConfigError::invalid("alert_rule.id", "cannot be empty"));
        }
        if !self.threshold_value.is_finite() || self.threshold_value <= 0.0 {
            return Err(ConfigError::invalid(
                format!("alert_rule.{}.threshold_value", self.id),
                "must be a finite number greater than zero",
            ));
        }
        if self.window_ms == 0 {
            return Err(ConfigError::invalid(
                format!("alert_rule.{}.window_ms", self.id),
                "must be greater than zero",
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertConfig {
    pub rules: Vec<AlertRule>,
    pub evaluation_interval_ms: u64,
    /// Evaluate touched rules as records arrive instead of waiting for the tick
    pub inline_evaluation: bool,
    pub incident_history_limit: usize,
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            rules: vec![
                AlertRule::new("error-burst", AlertMetric::ErrorCount, 50.0)
                    .with_window(Duration::from_secs(60))
                    .with_cooldown(Duration::from_secs(300)),
                AlertRule::new("critical-errors", AlertMetric::CriticalCount, 3.0)
                    .with_window(Duration::from_secs(300))
                    .with_cooldown(Duration::from_secs(600))
                    .with_severity(Severity::Critical),
            ],
            evaluation_interval_ms: 1_000,
            inline_evaluation: true,
            incident_history_limit: 200,
        }
    }
}

impl AlertConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (index, rule) in self.rules.iter().enumerate() {
            rule.validate()?;
            if self.rules[..index].iter().any(|other| other.id == rule.id) {
                return Err(ConfigError::Conflict {
                    conflict: format!("alert rule '{}' is defined twice", rule.id),
                });
            }
        }
        if self.evaluation_interval_ms == 0 {
            return Err(ConfigError::invalid(
                "alerts.evaluation_interval_ms",
                "must be greater than zero",
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IncidentResolution {
    AutoResolved,
    Operator,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Incident {
    pub id: String,
    pub triggered_by_rule_id: String,
    pub severity: Severity,
    pub trigger_value: f64,
    pub opened_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
    pub resolution: Option<IncidentResolution>,
}

impl Incident {
    pub fn is_open(&self) -> bool {
        self.closed_at.is_none()
    }
}

/// Delivered to the [`Notifier`]
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Notification {
    IncidentOpened { incident: Incident },
    IncidentResolved { incident: Incident },
    Recovery { strategy_id: String, record: ErrorRecord },
}

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("Notification delivery failed: {0}")]
    Delivery(String),
    #[error("Notifier panicked: {0}")]
    Panicked(String),
}

/// Outbound channel for incidents and recovery notifications
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, notification: &Notification) -> Result<(), NotifyError>;
}

/// Writes notifications to the tracing pipeline
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, notification: &Notification) -> Result<(), NotifyError> {
        match notification {
            Notification::IncidentOpened { incident } => warn!(
                incident_id = %incident.id,
                rule = %incident.triggered_by_rule_id,
                severity = %incident.severity,
                value = incident.trigger_value,
                "Incident opened"
            ),
            Notification::IncidentResolved { incident } => info!(
                incident_id = %incident.id,
                rule = %incident.triggered_by_rule_id,
                "Incident resolved"
            ),
            Notification::Recovery {
                strategy_id,
                record,
            } => warn!(
                strategy = %strategy_id,
                error_id = %record.id,
                kind = %record.kind,
                severity = %record.severity,
                "Recovery notification"
            ),
        }
        Ok(())
    }
}

/// Deliver without waiting. A slow or panicking notifier never holds up the caller.
pub fn notify_detached(notifier: &Arc<dyn Notifier>, notification: Notification) {
    let notifier = Arc::clone(notifier);
    tokio::spawn(async move {
        if let Err(e) = notifier.notify(&notification).await {
            error!(error = %e, "Failed to deliver alert notification");
        }
    });
}

/// Deliver on a separate task so a panicking notifier cannot take the caller down
pub async fn notify_isolated(
    notifier: &Arc<dyn Notifier>,
    notification: Notification,
) -> Result<(), NotifyError> {
    let notifier = Arc::clone(notifier);
    match tokio::spawn(async move { notifier.notify(&notification).await }).await {
        Ok(result) => result,
        Err(join_error) => Err(NotifyError::Panicked(join_error.to_string())),
    }
}

#[derive(Debug)]
struct RuleState {
    rule: AlertRule,
    hits: VecDeque<Instant>,
    open_incident: Option<Incident>,
    below_since: Option<Instant>,
    last_opened: Option<Instant>,
}

impl RuleState {
    fn new(rule: AlertRule) -> Self {
        Self {
            rule,
            hits: VecDeque::new(),
            open_incident: None,
            below_since: None,
            last_opened: None,
        }
    }

    fn prune(&mut self, now: Instant) {
        let window = self.rule.window();
        while self
            .hits
            .front()
            .is_some_and(|hit| now.saturating_duration_since(*hit) > window)
        {
            self.hits.pop_front();
        }
    }

    fn evaluate(&mut self, now: Instant) -> Option<Notification> {
        self.prune(now);
        let value = self.rule.metric.value(self.hits.len(), self.rule.window());

        if value >= self.rule.threshold_value {
            self.below_since = None;
            if self.open_incident.is_some() {
                return None;
            }
            let cooling = self
                .last_opened
                .is_some_and(|at| now.saturating_duration_since(at) < self.rule.cooldown());
            if cooling {
                debug!(rule = %self.rule.id, value, "Threshold reached during cooldown");
                return None;
            }
            let incident = Incident {
                id: Uuid::new_v4().to_string(),
                triggered_by_rule_id: self.rule.id.clone(),
                severity: self.rule.severity,
                trigger_value: value,
                opened_at: Utc::now(),
                closed_at: None,
                resolution: None,
            };
            self.open_incident = Some(incident.clone());
            self.last_opened = Some(now);
            return Some(Notification::IncidentOpened { incident });
        }

        if self.open_incident.is_none() {
            self.below_since = None;
            return None;
        }
        let since = *self.below_since.get_or_insert(now);
        if now.saturating_duration_since(since) < self.rule.window() {
            return None;
        }
        self.below_since = None;
        self.open_incident.take().map(|mut incident| {
            incident.closed_at = Some(Utc::now());
            incident.resolution = Some(IncidentResolution::AutoResolved);
            Notification::IncidentResolved { incident }
        })
    }
}

/// Incidents opened and resolved by one evaluation pass
#[derive(Debug, Clone, Default)]
pub struct AlertEvaluation {
    pub opened: Vec<Incident>,
    pub resolved: Vec<Incident>,
}

pub struct AlertEngine {
    config: AlertConfig,
    rules: Mutex<Vec<RuleState>>,
    history: Mutex<VecDeque<Incident>>,
    notifier: Arc<dyn Notifier>,
    metrics: Option<Arc<ResilienceMetrics>>,
}

impl std::fmt::Debug for AlertEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AlertEngine")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl AlertEngine {
    pub fn new(
        config: AlertConfig,
        notifier: Arc<dyn Notifier>,
        metrics: Option<Arc<ResilienceMetrics>>,
    ) -> Self {
        let rules = config.rules.iter().cloned().map(RuleState::new).collect();
        Self {
            config,
            rules: Mutex::new(rules),
            history: Mutex::new(VecDeque::new()),
            notifier,
            metrics,
        }
    }

    pub async fn add_rule(&self, rule: AlertRule) -> Result<(), ConfigError> {
        rule.validate()?;
        let mut rules = self.rules.lock().await;
        if rules.iter().any(|state| state.rule.id == rule.id) {
            return Err(ConfigError::Conflict {
                conflict: format!("alert rule '{}' already exists", rule.id),
            });
        }
        info!(rule = %rule.id, "Alert rule added");
        rules.push(RuleState::new(rule));
        Ok(())
    }

    pub async fn remove_rule(&self, id: &str) -> bool {
        let mut rules = self.rules.lock().await;
        let before = rules.len();
        rules.retain(|state| state.rule.id != id);
        rules.len() != before
    }

    pub async fn rules(&self) -> Vec<AlertRule> {
        self.rules
            .lock()
            .await
            .iter()
            .map(|state| state.rule.clone())
            .collect()
    }

    /// Count `record` against matching rules. Returns incidents it opened.
    pub async fn record(&self, record: &ErrorRecord) -> Vec<Incident> {
        let now = Instant::now();
        let mut notifications = Vec::new();
        {
            let mut rules = self.rules.lock().await;
            for state in rules.iter_mut().filter(|s| s.rule.metric.matches(record)) {
                state.hits.push_back(now);
                if self.config.inline_evaluation {
                    notifications.extend(state.evaluate(now));
                } else {
                    state.prune(now);
                }
            }
        }
        self.publish(notifications).await.opened
    }

    /// Evaluate every rule, opening and auto-resolving incidents
    pub async fn evaluate(&self) -> AlertEvaluation {
        let now = Instant::now();
        let notifications: Vec<Notification> = {
            let mut rules = self.rules.lock().await;
            rules.iter_mut().filter_map(|state| state.evaluate(now)).collect()
        };
        self.publish(notifications).await
    }

    /// Close an open incident on operator request
    pub async fn close_incident(&self, incident_id: &str) -> Result<Incident, ResilienceError> {
        let closed = {
            let mut rules = self.rules.lock().await;
            rules
                .iter_mut()
                .find(|state| {
                    state
                        .open_incident
                        .as_ref()
                        .is_some_and(|incident| incident.id == incident_id)
                })
                .and_then(|state| {
                    state.below_since = None;
                    state.open_incident.take()
                })
        };
        let mut incident = closed.ok_or_else(|| ResilienceError::UnknownIncident {
            id: incident_id.to_string(),
        })?;
        incident.closed_at = Some(Utc::now());
        incident.resolution = Some(IncidentResolution::Operator);
        self.publish(vec![Notification::IncidentResolved {
            incident: incident.clone(),
        }])
        .await;
        Ok(incident)
    }

    pub async fn open_incidents(&self) -> Vec<Incident> {
        self.rules
            .lock()
            .await
            .iter()
            .filter_map(|state| state.open_incident.clone())
            .collect()
    }

    /// Closed incidents, oldest first
    pub async fn incident_history(&self) -> Vec<Incident> {
        self.history.lock().await.iter().cloned().collect()
    }

    pub fn spawn_evaluator(self: &Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        let engine = Arc::clone(self);
        let period = Duration::from_millis(self.config.evaluation_interval_ms);
        tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        let evaluation = engine.evaluate().await;
                        if !evaluation.opened.is_empty() || !evaluation.resolved.is_empty() {
                            debug!(
                                opened = evaluation.opened.len(),
                                resolved = evaluation.resolved.len(),
                                "Alert evaluation changed incidents"
                            );
                        }
                    }
                }
            }
            debug!("Alert evaluator stopped");
        })
    }

    async fn publish(&self, notifications: Vec<Notification>) -> AlertEvaluation {
        let mut evaluation = AlertEvaluation::default();
        for notification in notifications {
            match &notification {
                Notification::IncidentOpened { incident } => {
                    if let Some(metrics) = &self.metrics {
                        metrics.record_incident_opened(&incident.triggered_by_rule_id);
                    }
                    evaluation.opened.push(incident.clone());
                }
                Notification::IncidentResolved { incident } => {
                    if let Some(metrics) = &self.metrics {
                        metrics.record_incident_closed();
                    }
                    let mut history = self.history.lock().await;
                    history.push_back(incident.clone());
                    while history.len() > self.config.incident_history_limit {
                        history.pop_front();
                    }
                    evaluation.resolved.push(incident.clone());
                }
                Notification::Recovery { .. } => {}
            }
            notify_detached(&self.notifier, notification);
        }
        evaluation
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::ErrorContext;
    use std::sync::Mutex as StdMutex;
    use tokio::time::advance;

    async fn settle() {
        for _ in 0..8 {
            tokio::task::yield_now().await;
        }
    }

    #[derive(Default)]
    struct Recording {
        seen: StdMutex<Vec<Notification>>,
    }

    #[async_trait]
    impl Notifier for Recording {
        async fn notify(&self, notification: &Notification) -> Result<(), NotifyError> {
            self.seen.lock().expect("lock").push(notification.clone());
            Ok(())
        }
    }

    struct Panicking;

    #[async_trait]
    impl Notifier for Panicking {
        async fn notify(&self, _notification: &Notification) -> Result<(), NotifyError> {
            panic!("notifier exploded");
        }
    }

    fn rule() -> AlertRule {
        AlertRule::new("burst", AlertMetric::ErrorCount, 3.0)
            .with_window(Duration::from_millis(1_000))
            .with_cooldown(Duration::from_millis(5_000))
    }

    fn engine(notifier: Arc<dyn Notifier>) -> AlertEngine {
        AlertEngine::new(
            AlertConfig {
                rules: vec![rule()],
                ..AlertConfig::default()
            },
            notifier,
            None,
        )
    }

    fn record(kind: ErrorKind) -> ErrorRecord {
        ErrorRecord::new(kind, "failure", ErrorContext::new())
    }

    #[tokio::test(start_paused = true)]
    async fn test_threshold_opens_single_incident() {
        let notifier = Arc::new(Recording::default());
        let engine = engine(notifier.clone());
        assert!(engine.record(&record(ErrorKind::Server)).await.is_empty());
        assert!(engine.record(&record(ErrorKind::Server)).await.is_empty());
        let opened = engine.record(&record(ErrorKind::Server)).await;
        assert_eq!(opened.len(), 1);
        assert_eq!(opened[0].triggered_by_rule_id, "burst");

        for _ in 0..5 {
            assert!(engine.record(&record(ErrorKind::Server)).await.is_empty());
        }
        assert_eq!(engine.open_incidents().await.len(), 1);
        settle().await;
        assert_eq!(notifier.seen.lock().expect("lock").len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_auto_resolve_after_quiet_window() {
        let engine = engine(Arc::new(Recording::default()));
        for _ in 0..3 {
            engine.record(&record(ErrorKind::Network)).await;
        }
        advance(Duration::from_millis(1_001)).await;
        assert!(engine.evaluate().await.resolved.is_empty());
        advance(Duration::from_millis(999)).await;
        assert!(engine.evaluate().await.resolved.is_empty());
        advance(Duration::from_millis(1)).await;
        let evaluation = engine.evaluate().await;
        assert_eq!(evaluation.resolved.len(), 1);
        assert_eq!(
            evaluation.resolved[0].resolution,
            Some(IncidentResolution::AutoResolved)
        );
        assert!(engine.open_incidents().await.is_empty());
        assert_eq!(engine.incident_history().await.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cooldown_blocks_reopen() {
        let engine = engine(Arc::new(Recording::default()));
        for _ in 0..3 {
            engine.record(&record(ErrorKind::Server)).await;
        }
        let open = engine.open_incidents().await;
        engine
            .close_incident(&open[0].id)
            .await
            .expect("incident is open");

        for _ in 0..3 {
            assert!(engine.record(&record(ErrorKind::Server)).await.is_empty());
        }
        advance(Duration::from_millis(5_000)).await;
        let mut opened = Vec::new();
        for _ in 0..3 {
            opened.extend(engine.record(&record(ErrorKind::Server)).await);
        }
        assert_eq!(opened.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_operator_close() {
        let engine = engine(Arc::new(Recording::default()));
        for _ in 0..3 {
            engine.record(&record(ErrorKind::Server)).await;
        }
        let id = engine.open_incidents().await[0].id.clone();
        let closed = engine.close_incident(&id).await.expect("incident is open");
        assert_eq!(closed.resolution, Some(IncidentResolution::Operator));
        assert!(closed.closed_at.is_some());
        assert!(matches!(
            engine.close_incident(&id).await,
            Err(ResilienceError::UnknownIncident { .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_kind_and_critical_metrics_filter_records() {
        let engine = AlertEngine::new(
            AlertConfig {
                rules: vec![
                    AlertRule::new("auth", AlertMetric::KindCount(ErrorKind::Auth), 1.0),
                    AlertRule::new("critical", AlertMetric::CriticalCount, 1.0),
                ],
                ..AlertConfig::default()
            },
            Arc::new(Recording::default()),
            None,
        );
        assert!(engine.record(&record(ErrorKind::Server)).await.is_empty());
        let opened = engine.record(&record(ErrorKind::Auth)).await;
        assert_eq!(opened[0].triggered_by_rule_id, "auth");
        let opened = engine
            .record(&record(ErrorKind::Server).escalated("exhausted"))
            .await;
        assert_eq!(opened[0].triggered_by_rule_id, "critical");
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_metric() {
        let engine = AlertEngine::new(
            AlertConfig {
                rules: vec![AlertRule::new("rate", AlertMetric::ErrorRatePerMinute, 4.0)
                    .with_window(Duration::from_secs(30))],
                ..AlertConfig::default()
            },
            Arc::new(Recording::default()),
            None,
        );
        // 2 records in a 30s window is 4 per minute
        assert!(engine.record(&record(ErrorKind::Server)).await.is_empty());
        assert_eq!(engine.record(&record(ErrorKind::Server)).await.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deferred_evaluation() {
        let engine = AlertEngine::new(
            AlertConfig {
                rules: vec![rule()],
                inline_evaluation: false,
                ..AlertConfig::default()
            },
            Arc::new(Recording::default()),
            None,
        );
        for _ in 0..3 {
            assert!(engine.record(&record(ErrorKind::Server)).await.is_empty());
        }
        assert_eq!(engine.evaluate().await.opened.len(), 1);
    }

    #[tokio::test]
    async fn test_panicking_notifier_is_contained() {
        let engine = engine(Arc::new(Panicking));
        for _ in 0..3 {
            engine.record(&record(ErrorKind::Server)).await;
        }
        assert_eq!(engine.open_incidents().await.len(), 1);
    }

    struct Stuck;

    #[async_trait]
    impl Notifier for Stuck {
        async fn notify(&self, _notification: &Notification) -> Result<(), NotifyError> {
            std::future::pending::<()>().await;
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_record_does_not_wait_for_delivery() {
        let engine = engine(Arc::new(Stuck));
        let opened = tokio::time::timeout(Duration::from_secs(5), async {
            let mut opened = Vec::new();
            for _ in 0..3 {
                opened.extend(engine.record(&record(ErrorKind::Server)).await);
            }
            opened
        })
        .await
        .expect("record returns while delivery is pending");
        assert_eq!(opened.len(), 1);
    }

    #[tokio::test]
    async fn test_add_rule_rejects_duplicates() {
        let engine = engine(Arc::new(LogNotifier));
        assert!(engine.add_rule(rule()).await.is_err());
        let extra = AlertRule::new("extra", AlertMetric::ErrorCount, 10.0);
        engine.add_rule(extra).await.expect("new rule");
        assert_eq!(engine.rules().await.len(), 2);
        assert!(engine.remove_rule("extra").await);
        assert!(!engine.remove_rule("extra").await);
    }

    #[test]
    fn test_config_validation() {
        assert!(AlertConfig::default().validate().is_ok());
        let duplicated = AlertConfig {
            rules: vec![rule(), rule()],
            ..AlertConfig::default()
        };
        assert!(matches!(duplicated.validate(), Err(ConfigError::Conflict { .. })));
        let zero = AlertConfig {
            rules: vec![AlertRule::new("zero", AlertMetric::ErrorCount, 0.0)],
            ..AlertConfig::default()
        };
        assert!(zero.validate().is_err());
    }
}
