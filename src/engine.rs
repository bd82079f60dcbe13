//! The resilience engine
//!
//! Wires the registry, classifier, recovery coordinator, alerting and error
//! log together. Every classified failure is observed (logged, counted and
//! fed to alerting) and dispatched to recovery. A call that no provider
//! could serve is first dispatched as a single escalated record carrying the
//! original call, so a Retry strategy can re-issue it. Calls issued by
//! recovery itself are observed only.

use crate::alerting::{AlertEngine, LogNotifier, Notifier};
use crate::classifier::{ErrorClassifier, ErrorContext, ErrorRecord};
use crate::error_log::ErrorLog;
use crate::errors::ResilienceError;
use crate::health::HealthMonitor;
use crate::metrics::ResilienceMetrics;
use crate::persistence::ErrorPersistence;
use crate::provider::{CapabilityType, Provider, ProviderDescriptor, ProviderFailure};
use crate::recovery::{
    OriginCall, RecoveryCoordinator, RecoveryDispatch, RecoveryStrategy, RecoveryStrategyRegistry,
};
use crate::registry::{CallOrigin, ExecuteOptions, ProviderRegistry, ProviderStatus};
use crate::resilience_config::ResilienceConfig;
use common::ConfigError;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Builder for [`ResilienceEngine`]
#[derive(Default)]
pub struct ResilienceEngineBuilder {
    config: ResilienceConfig,
    classifier: Option<ErrorClassifier>,
    strategies: Option<RecoveryStrategyRegistry>,
    notifier: Option<Arc<dyn Notifier>>,
    persistence: Option<Arc<dyn ErrorPersistence>>,
    metrics: Option<Arc<ResilienceMetrics>>,
}

impl ResilienceEngineBuilder {
    pub fn new(config: ResilienceConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn classifier(mut self, classifier: ErrorClassifier) -> Self {
        self.classifier = Some(classifier);
        self
    }

    /// Replace the built-in strategy set
    #[must_use]
    pub fn strategies(mut self, strategies: RecoveryStrategyRegistry) -> Self {
        self.strategies = Some(strategies);
        self
    }

    #[must_use]
    pub fn notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    #[must_use]
    pub fn persistence(mut self, persistence: Arc<dyn ErrorPersistence>) -> Self {
        self.persistence = Some(persistence);
        self
    }

    #[must_use]
    pub fn metrics(mut self, metrics: Arc<ResilienceMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn build(self) -> Result<ResilienceEngine, ResilienceError> {
        self.config.validate()?;
        let metrics = match self.metrics {
            Some(metrics) => metrics,
            None => Arc::new(ResilienceMetrics::new().map_err(|e| ConfigError::Conflict {
                conflict: format!("metrics registration failed: {e}"),
            })?),
        };
        let notifier = self.notifier.unwrap_or_else(|| Arc::new(LogNotifier));
        let classifier = Arc::new(self.classifier.unwrap_or_default());
        let health = Arc::new(HealthMonitor::new(self.config.health.clone()));
        let registry = Arc::new(ProviderRegistry::new(
            self.config.registry.clone(),
            Arc::clone(&classifier),
            Arc::clone(&health),
            Some(Arc::clone(&metrics)),
        ));
        let strategies = Arc::new(
            self.strategies
                .unwrap_or_else(RecoveryStrategyRegistry::with_defaults),
        );
        let coordinator = Arc::new(RecoveryCoordinator::new(
            self.config.recovery.clone(),
            Arc::clone(&strategies),
            Arc::clone(&registry),
            Arc::clone(&notifier),
            Some(Arc::clone(&metrics)),
        ));
        let alerts = Arc::new(AlertEngine::new(
            self.config.alerts.clone(),
            notifier,
            Some(Arc::clone(&metrics)),
        ));
        let error_log = Arc::new(ErrorLog::new(
            self.config.error_log.clone(),
            self.persistence,
            Some(Arc::clone(&metrics)),
        ));

        Ok(ResilienceEngine {
            config: self.config,
            classifier,
            health,
            registry,
            coordinator,
            alerts,
            error_log,
            metrics,
            started: AtomicBool::new(false),
            shutdown: CancellationToken::new(),
            background: Mutex::new(Vec::new()),
        })
    }
}

pub struct ResilienceEngine {
    config: ResilienceConfig,
    classifier: Arc<ErrorClassifier>,
    health: Arc<HealthMonitor>,
    registry: Arc<ProviderRegistry>,
    coordinator: Arc<RecoveryCoordinator>,
    alerts: Arc<AlertEngine>,
    error_log: Arc<ErrorLog>,
    metrics: Arc<ResilienceMetrics>,
    started: AtomicBool,
    shutdown: CancellationToken,
    background: Mutex<Vec<JoinHandle<()>>>,
}

impl std::fmt::Debug for ResilienceEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResilienceEngine")
            .field("started", &self.started.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl ResilienceEngine {
    pub fn builder(config: ResilienceConfig) -> ResilienceEngineBuilder {
        ResilienceEngineBuilder::new(config)
    }

    pub fn config(&self) -> &ResilienceConfig {
        &self.config
    }

    pub fn classifier(&self) -> &Arc<ErrorClassifier> {
        &self.classifier
    }

    pub fn registry(&self) -> &Arc<ProviderRegistry> {
        &self.registry
    }

    pub fn coordinator(&self) -> &Arc<RecoveryCoordinator> {
        &self.coordinator
    }

    pub fn alerts(&self) -> &Arc<AlertEngine> {
        &self.alerts
    }

    pub fn error_log(&self) -> &Arc<ErrorLog> {
        &self.error_log
    }

    pub fn health(&self) -> &Arc<HealthMonitor> {
        &self.health
    }

    pub fn metrics(&self) -> &Arc<ResilienceMetrics> {
        &self.metrics
    }

    /// A descriptor carrying the configured provider defaults
    pub fn descriptor(
        &self,
        id: impl Into<String>,
        capability: CapabilityType,
        priority: i32,
    ) -> ProviderDescriptor {
        ProviderDescriptor::new(id, capability, priority)
            .with_config(self.config.provider_defaults.clone())
    }

    pub async fn register_provider(
        &self,
        descriptor: ProviderDescriptor,
        provider: Arc<dyn Provider>,
    ) -> Result<(), ResilienceError> {
        self.registry.register(descriptor, provider).await.map(|_| ())
    }

    pub async fn deregister_provider(&self, id: &str) -> Result<(), ResilienceError> {
        self.registry.deregister(id).await.map(|_| ())
    }

    pub async fn register_strategy(&self, strategy: RecoveryStrategy) -> Result<(), ResilienceError> {
        self.coordinator.strategies().register(strategy).await
    }

    pub async fn execute(
        &self,
        capability: CapabilityType,
        request: Value,
    ) -> Result<Value, ResilienceError> {
        self.execute_with(capability, request, ExecuteOptions::default())
            .await
    }

    /// Run a call through the registry, then recovery if nothing could serve it
    pub async fn execute_with(
        &self,
        capability: CapabilityType,
        request: Value,
        options: ExecuteOptions,
    ) -> Result<Value, ResilienceError> {
        let from_recovery = options.origin == CallOrigin::Recovery;
        let origin = OriginCall {
            capability,
            request: request.clone(),
            retry: options.retry.clone(),
        };
        let execution = self
            .registry
            .execute_traced(capability, request, options)
            .await;
        for record in &execution.failures {
            self.observe(record).await;
        }
        if from_recovery {
            return execution.result;
        }

        let error = match execution.result {
            Err(error) if error.is_exhaustion() => error,
            result => {
                self.dispatch_each(&execution.failures).await;
                return result;
            }
        };

        let record = self.escalate(&error, capability);
        self.observe(&record).await;
        let recovered = self
            .dispatch(&record, Some(origin))
            .await
            .and_then(|dispatch| dispatch.response.map(|r| (dispatch.attempt.strategy_id, r)));
        self.dispatch_each(&execution.failures).await;
        match recovered {
            Some((strategy, response)) => {
                info!(capability = %capability, strategy = %strategy, "Call recovered");
                Ok(response)
            }
            None => Err(error),
        }
    }

    /// Classify, record and dispatch a failure raised outside the registry
    pub async fn report(&self, failure: &ProviderFailure, context: ErrorContext) -> ErrorRecord {
        let record = self.classifier.classify(failure, context);
        self.observe(&record).await;
        self.dispatch(&record, None).await;
        record
    }

    /// Record an already classified failure without dispatching it
    pub async fn observe(&self, record: &ErrorRecord) {
        self.metrics.record_error(record.kind, record.severity);
        self.error_log.append(record.clone()).await;
        self.alerts.record(record).await;
    }

    async fn dispatch(
        &self,
        record: &ErrorRecord,
        origin: Option<OriginCall>,
    ) -> Option<RecoveryDispatch> {
        let dispatch = self.coordinator.dispatch(record, origin).await?;
        for follow_up in &dispatch.follow_up {
            self.observe(follow_up).await;
        }
        Some(dispatch)
    }

    async fn dispatch_each(&self, records: &[ErrorRecord]) {
        for record in records {
            self.dispatch(record, None).await;
        }
    }

    fn escalate(&self, error: &ResilienceError, capability: CapabilityType) -> ErrorRecord {
        let attempted: Vec<&str> = error
            .failures()
            .iter()
            .map(|failure| failure.provider_id.as_str())
            .collect();
        let base = match error.primary_error() {
            Some(primary) => primary.clone(),
            None => self.classifier.classify(
                &ProviderFailure::Unavailable {
                    message: "no healthy provider".to_string(),
                },
                ErrorContext::new().with_capability(capability),
            ),
        };
        let mut record = base.escalated(error.to_string());
        record.context = record
            .context
            .with_component("registry")
            .with_operation("execute")
            .with_detail("attempted", attempted.join(","));
        record
    }

    pub async fn provider_statuses(&self) -> Vec<ProviderStatus> {
        self.registry.statuses().await
    }

    pub async fn provider_status(&self, id: &str) -> Option<ProviderStatus> {
        self.registry.provider_status(id).await
    }

    /// Start health probes, alert evaluation and error log flushing
    pub async fn start(&self) {
        if self.started.swap(true, Ordering::AcqRel) {
            warn!("Resilience engine already started");
            return;
        }
        self.health.start(self.registry.providers().await);
        let mut background = self.background.lock().await;
        background.push(self.alerts.spawn_evaluator(self.shutdown.child_token()));
        background.push(self.error_log.spawn_flusher(self.shutdown.child_token()));
        info!("Resilience engine started");
    }

    /// Stop background work and flush the error log
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        self.health.shutdown();
        let handles: Vec<JoinHandle<()>> = self.background.lock().await.drain(..).collect();
        for handle in handles {
            if let Err(e) = handle.await {
                warn!(error = %e, "Background task ended abnormally");
            }
        }
        if let Err(e) = self.error_log.flush().await {
            warn!(error = %e, "Final error log flush failed");
        }
        info!("Resilience engine stopped");
    }
}
