//! Capability-indexed provider registry
//!
//! `execute` snapshots the enabled providers for a capability, orders them by
//! (deprioritized, priority, registration order), drops unhealthy ones and
//! tries the rest in turn. Each candidate's failures are classified by the
//! provider wrapper; retries follow the configured [`RetryScope`].

use crate::circuit_breaker::CircuitStatus;
use crate::classifier::{ErrorClassifier, ErrorRecord};
use crate::errors::{CandidateFailure, ResilienceError, SkipReason};
use crate::health::HealthMonitor;
use crate::metrics::ResilienceMetrics;
use crate::provider::{BaseProvider, CallError, CapabilityType, Provider, ProviderDescriptor};
use crate::retry::{RetryPolicy, RetryPolicyConfig};
use common::ConfigError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Where retries are spent during a registry call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryScope {
    /// Fail over first; retry only the last healthy candidate
    #[default]
    LastCandidate,
    /// Retry every candidate before moving on
    EveryCandidate,
}

impl FromStr for RetryScope {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('-', "_").as_str() {
            "last_candidate" => Ok(RetryScope::LastCandidate),
            "every_candidate" => Ok(RetryScope::EveryCandidate),
            other => Err(ConfigError::invalid(
                "registry.retry_scope",
                format!("unknown retry scope '{other}'"),
            )),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    pub default_retry: RetryPolicyConfig,
    pub retry_scope: RetryScope,
}

impl RegistryConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.default_retry.validate()
    }
}

/// Who issued a registry call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CallOrigin {
    #[default]
    Caller,
    /// A recovery action re-issuing a failed call
    Recovery,
}

#[derive(Debug, Clone, Default)]
pub struct ExecuteOptions {
    pub deadline: Option<Instant>,
    pub cancel: Option<CancellationToken>,
    /// Overrides both the provider and registry retry policies
    pub retry: Option<RetryPolicyConfig>,
    pub origin: CallOrigin,
}

impl ExecuteOptions {
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.deadline = Some(Instant::now() + timeout);
        self
    }

    #[must_use]
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    #[must_use]
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = Some(cancel);
        self
    }

    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicyConfig) -> Self {
        self.retry = Some(retry);
        self
    }

    #[must_use]
    pub fn from_recovery(mut self) -> Self {
        self.origin = CallOrigin::Recovery;
        self
    }

    fn deadline_passed(&self) -> bool {
        self.deadline.is_some_and(|deadline| Instant::now() >= deadline)
    }
}

/// A registry call together with every classified failure it produced
#[derive(Debug)]
pub struct Execution {
    pub result: Result<Value, ResilienceError>,
    pub failures: Vec<ErrorRecord>,
    pub served_by: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProviderStatus {
    pub id: String,
    pub capability: CapabilityType,
    pub priority: i32,
    pub enabled: bool,
    pub deprioritized: bool,
    pub circuit: CircuitStatus,
    pub consecutive_failures: u32,
    pub healthy: bool,
    pub live_samples: usize,
    pub success_ratio: Option<f64>,
    pub available_tokens: f64,
}

enum Halt {
    Cancelled,
    Deadline,
}

pub struct ProviderRegistry {
    config: RegistryConfig,
    providers: RwLock<Vec<Arc<BaseProvider>>>,
    next_seq: AtomicU64,
    classifier: Arc<ErrorClassifier>,
    health: Arc<HealthMonitor>,
    metrics: Option<Arc<ResilienceMetrics>>,
}

impl std::fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl ProviderRegistry {
    pub fn new(
        config: RegistryConfig,
        classifier: Arc<ErrorClassifier>,
        health: Arc<HealthMonitor>,
        metrics: Option<Arc<ResilienceMetrics>>,
    ) -> Self {
        Self {
            config,
            providers: RwLock::new(Vec::new()),
            next_seq: AtomicU64::new(0),
            classifier,
            health,
            metrics,
        }
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    pub async fn register(
        &self,
        descriptor: ProviderDescriptor,
        provider: Arc<dyn Provider>,
    ) -> Result<Arc<BaseProvider>, ResilienceError> {
        let mut providers = self.providers.write().await;
        if providers.iter().any(|p| p.id() == descriptor.id) {
            return Err(ResilienceError::DuplicateProvider { id: descriptor.id });
        }
        let base = Arc::new(BaseProvider::new(
            descriptor,
            provider,
            Arc::clone(&self.classifier),
            self.health.config(),
            self.next_seq.fetch_add(1, Ordering::Relaxed),
            self.metrics.clone(),
        )?);
        providers.push(Arc::clone(&base));
        drop(providers);

        if self.health.is_running() {
            self.health.watch(Arc::clone(&base));
        }
        info!(
            provider = %base.id(),
            capability = %base.capability(),
            priority = base.priority(),
            "Provider registered"
        );
        Ok(base)
    }

    pub async fn deregister(&self, id: &str) -> Result<Arc<BaseProvider>, ResilienceError> {
        let mut providers = self.providers.write().await;
        let index = providers
            .iter()
            .position(|p| p.id() == id)
            .ok_or_else(|| ResilienceError::UnknownProvider { id: id.to_string() })?;
        let removed = providers.remove(index);
        drop(providers);
        self.health.unwatch(id);
        info!(provider = %id, "Provider deregistered");
        Ok(removed)
    }

    pub async fn get(&self, id: &str) -> Option<Arc<BaseProvider>> {
        self.providers
            .read()
            .await
            .iter()
            .find(|p| p.id() == id)
            .cloned()
    }

    async fn require(&self, id: &str) -> Result<Arc<BaseProvider>, ResilienceError> {
        self.get(id)
            .await
            .ok_or_else(|| ResilienceError::UnknownProvider { id: id.to_string() })
    }

    pub async fn providers(&self) -> Vec<Arc<BaseProvider>> {
        self.providers.read().await.clone()
    }

    pub async fn set_priority(&self, id: &str, priority: i32) -> Result<(), ResilienceError> {
        self.require(id).await?.set_priority(priority);
        info!(provider = %id, priority, "Provider priority changed");
        Ok(())
    }

    pub async fn set_enabled(&self, id: &str, enabled: bool) -> Result<(), ResilienceError> {
        self.require(id).await?.set_enabled(enabled);
        info!(provider = %id, enabled, "Provider availability changed");
        Ok(())
    }

    /// Push a provider behind its peers for `duration`
    pub async fn deprioritize(&self, id: &str, duration: Duration) -> Result<(), ResilienceError> {
        self.require(id).await?.deprioritize(duration).await;
        info!(provider = %id, duration_ms = duration.as_millis() as u64, "Provider deprioritized");
        Ok(())
    }

    /// Enabled providers for `capability` in the order they will be tried
    pub async fn candidates(&self, capability: CapabilityType) -> Vec<Arc<BaseProvider>> {
        let snapshot: Vec<Arc<BaseProvider>> = self
            .providers
            .read()
            .await
            .iter()
            .filter(|p| p.capability() == capability && p.is_enabled())
            .cloned()
            .collect();

        let mut keyed = Vec::with_capacity(snapshot.len());
        for provider in snapshot {
            let deprioritized = provider.is_deprioritized().await;
            keyed.push(((deprioritized, provider.priority(), provider.registration_seq()), provider));
        }
        keyed.sort_by_key(|(key, _)| *key);
        keyed.into_iter().map(|(_, provider)| provider).collect()
    }

    pub async fn execute(
        &self,
        capability: CapabilityType,
        request: Value,
    ) -> Result<Value, ResilienceError> {
        self.execute_with(capability, request, ExecuteOptions::default())
            .await
    }

    pub async fn execute_with(
        &self,
        capability: CapabilityType,
        request: Value,
        options: ExecuteOptions,
    ) -> Result<Value, ResilienceError> {
        self.execute_traced(capability, request, options).await.result
    }

    /// Run a call and return every classified failure alongside the result
    pub async fn execute_traced(
        &self,
        capability: CapabilityType,
        request: Value,
        options: ExecuteOptions,
    ) -> Execution {
        let candidates = self.candidates(capability).await;
        if candidates.is_empty() {
            warn!(capability = %capability, "No provider registered for capability");
            return Execution {
                result: Err(ResilienceError::NoProviders { capability }),
                failures: Vec::new(),
                served_by: None,
            };
        }

        let cancel = options.cancel.clone().unwrap_or_default();
        let mut outcomes = Vec::with_capacity(candidates.len());
        let mut failures = Vec::new();

        let mut healthy = Vec::with_capacity(candidates.len());
        for candidate in candidates {
            if self.health.is_healthy(&candidate).await {
                healthy.push(candidate);
            } else {
                debug!(provider = %candidate.id(), "Skipping unhealthy provider");
                outcomes.push(CandidateFailure::skipped(candidate.id(), SkipReason::Unhealthy));
            }
        }

        let total = healthy.len();
        let mut halt = None;
        'candidates: for (index, provider) in healthy.iter().enumerate() {
            let policy = RetryPolicy::new(
                options
                    .retry
                    .clone()
                    .or_else(|| provider.retry_config().cloned())
                    .unwrap_or_else(|| self.config.default_retry.clone()),
            );
            let retries_allowed =
                index + 1 == total || self.config.retry_scope == RetryScope::EveryCandidate;

            let mut attempt = 0u32;
            let mut last_error: Option<ErrorRecord> = None;
            loop {
                if cancel.is_cancelled() {
                    halt = Some(Halt::Cancelled);
                } else if options.deadline_passed() {
                    halt = Some(Halt::Deadline);
                }
                if halt.is_some() {
                    if let Some(record) = last_error.take() {
                        outcomes.push(CandidateFailure::attempted(provider.id(), attempt, record));
                    }
                    break 'candidates;
                }

                match provider.execute(request.clone(), options.deadline, &cancel).await {
                    Ok(response) => {
                        debug!(
                            provider = %provider.id(),
                            capability = %capability,
                            attempts = attempt + 1,
                            "Call served"
                        );
                        return Execution {
                            result: Ok(response),
                            failures,
                            served_by: Some(provider.id().to_string()),
                        };
                    }
                    Err(CallError::Cancelled) => {
                        halt = Some(Halt::Cancelled);
                        if let Some(record) = last_error.take() {
                            outcomes.push(CandidateFailure::attempted(provider.id(), attempt, record));
                        }
                        break 'candidates;
                    }
                    Err(CallError::Rejected { record }) | Err(CallError::Failed { record }) => {
                        failures.push(record.clone());
                        let retry = retries_allowed && policy.should_retry(attempt, &record);
                        last_error = Some(record);
                        if !retry {
                            break;
                        }
                        let delay = policy.next_delay(attempt);
                        if options
                            .deadline
                            .is_some_and(|deadline| Instant::now() + delay >= deadline)
                        {
                            debug!(provider = %provider.id(), "Backoff would overrun deadline");
                            break;
                        }
                        debug!(
                            provider = %provider.id(),
                            attempt = attempt + 1,
                            delay_ms = delay.as_millis() as u64,
                            "Retrying provider"
                        );
                        tokio::select! {
                            _ = cancel.cancelled() => {}
                            _ = tokio::time::sleep(delay) => {}
                        }
                        attempt += 1;
                    }
                }
            }

            if let Some(record) = last_error {
                outcomes.push(CandidateFailure::attempted(provider.id(), attempt + 1, record));
            }
        }

        let result = match halt {
            Some(Halt::Cancelled) => {
                info!(capability = %capability, "Call cancelled");
                Err(ResilienceError::Cancelled { capability })
            }
            Some(Halt::Deadline) => {
                warn!(capability = %capability, "Call deadline exceeded");
                Err(ResilienceError::DeadlineExceeded {
                    capability,
                    failures: outcomes,
                })
            }
            None if options.deadline_passed() => Err(ResilienceError::DeadlineExceeded {
                capability,
                failures: outcomes,
            }),
            None => {
                error!(
                    capability = %capability,
                    candidates = outcomes.len(),
                    "All candidate providers failed"
                );
                Err(ResilienceError::AllProvidersFailed {
                    capability,
                    failures: outcomes,
                })
            }
        };
        Execution {
            result,
            failures,
            served_by: None,
        }
    }

    pub async fn provider_status(&self, id: &str) -> Option<ProviderStatus> {
        let provider = self.get(id).await?;
        Some(self.status_of(&provider).await)
    }

    pub async fn statuses(&self) -> Vec<ProviderStatus> {
        let providers = self.providers().await;
        let mut statuses = Vec::with_capacity(providers.len());
        for provider in providers {
            statuses.push(self.status_of(&provider).await);
        }
        statuses
    }

    async fn status_of(&self, provider: &BaseProvider) -> ProviderStatus {
        let circuit = provider.circuit().snapshot().await;
        let summary = provider.health().summary().await;
        ProviderStatus {
            id: provider.id().to_string(),
            capability: provider.capability(),
            priority: provider.priority(),
            enabled: provider.is_enabled(),
            deprioritized: provider.is_deprioritized().await,
            circuit: circuit.status,
            consecutive_failures: circuit.consecutive_failures,
            healthy: self.health.is_healthy(provider).await,
            live_samples: summary.live_samples,
            success_ratio: summary.success_ratio,
            available_tokens: provider.rate_limiter().available().await,
        }
    }
}
