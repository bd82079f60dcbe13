//! Provider contract and the resilient wrapper around it
//!
//! Implementations of [`Provider`] only talk to their upstream. Every call
//! goes through [`BaseProvider::execute`], which applies the local rate
//! limit, the circuit breaker and the call timeout, classifies failures and
//! feeds the provider's health window.

use crate::circuit_breaker::{Admission, CircuitBreaker, CircuitBreakerConfig};
use crate::classifier::{ErrorClassifier, ErrorContext, ErrorRecord};
use crate::health::{HealthMonitorConfig, HealthWindow, SampleSource};
use crate::metrics::ResilienceMetrics;
use crate::rate_limiter::{RateLimitConfig, RateLimiter};
use crate::retry::RetryPolicyConfig;
use async_trait::async_trait;
use common::ConfigError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Kind of work a provider performs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CapabilityType {
    Inference,
    Storage,
    Identity,
    Knowledge,
}

impl CapabilityType {
    pub fn as_str(self) -> &'static str {
        match self {
            CapabilityType::Inference => "inference",
            CapabilityType::Storage => "storage",
            CapabilityType::Identity => "identity",
            CapabilityType::Knowledge => "knowledge",
        }
    }
}

impl fmt::Display for CapabilityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CapabilityType {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "inference" => Ok(CapabilityType::Inference),
            "storage" => Ok(CapabilityType::Storage),
            "identity" => Ok(CapabilityType::Identity),
            "knowledge" => Ok(CapabilityType::Knowledge),
            other => Err(ConfigError::invalid(
                "capability",
                format!("unknown capability '{other}'"),
            )),
        }
    }
}

/// Raw failure reported by a provider implementation
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProviderFailure {
    #[error("Upstream returned status {status}: {message}")]
    Status { status: u16, message: String },

    #[error("Upstream rate limited the request: {message}")]
    RateLimited {
        message: String,
        retry_after_ms: Option<u64>,
    },

    #[error("Timed out: {message}")]
    Timeout { message: String },

    #[error("Connection failed: {message}")]
    Connection { message: String },

    #[error("Service unavailable: {message}")]
    Unavailable { message: String },

    #[error("{message}")]
    Other { message: String },
}

impl ProviderFailure {
    pub fn status(status: u16, message: impl Into<String>) -> Self {
        Self::Status {
            status,
            message: message.into(),
        }
    }

    pub fn other(message: impl Into<String>) -> Self {
        Self::Other {
            message: message.into(),
        }
    }

    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            Self::RateLimited { .. } => Some(429),
            _ => None,
        }
    }
}

/// A concrete upstream integration
#[async_trait]
pub trait Provider: Send + Sync {
    async fn execute(&self, request: Value) -> Result<Value, ProviderFailure>;

    /// Lightweight liveness check. `None` means probing is not supported.
    async fn health_probe(&self) -> Option<bool> {
        None
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    pub circuit_breaker: CircuitBreakerConfig,
    pub rate_limit: RateLimitConfig,
    /// Overrides the registry's default retry policy for this provider
    pub retry: Option<RetryPolicyConfig>,
    pub call_timeout_ms: u64,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            circuit_breaker: CircuitBreakerConfig::default(),
            rate_limit: RateLimitConfig::default(),
            retry: None,
            call_timeout_ms: 30_000,
        }
    }
}

impl ProviderConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.circuit_breaker.validate()?;
        self.rate_limit.validate()?;
        if let Some(retry) = &self.retry {
            retry.validate()?;
        }
        if self.call_timeout_ms == 0 {
            return Err(ConfigError::invalid(
                "provider.call_timeout_ms",
                "must be greater than zero",
            ));
        }
        Ok(())
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }
}

/// Static registration data for a provider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderDescriptor {
    pub id: String,
    pub capability: CapabilityType,
    /// Lower values are tried first
    pub priority: i32,
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
    #[serde(default)]
    pub config: ProviderConfig,
}

fn enabled_by_default() -> bool {
    true
}

impl ProviderDescriptor {
    pub fn new(id: impl Into<String>, capability: CapabilityType, priority: i32) -> Self {
        Self {
            id: id.into(),
            capability,
            priority,
            enabled: true,
            config: ProviderConfig::default(),
        }
    }

    #[must_use]
    pub fn with_config(mut self, config: ProviderConfig) -> Self {
        self.config = config;
        self
    }

    #[must_use]
    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.id.trim().is_empty() {
            return Err(ConfigError::invalid("provider.id", "cannot be empty"));
        }
        self.config.validate()
    }
}

/// Outcome of a single wrapped call that did not produce a response
#[derive(Debug, Clone)]
pub enum CallError {
    /// Refused locally by the rate limiter or an open circuit
    Rejected { record: ErrorRecord },
    /// The upstream call failed or timed out
    Failed { record: ErrorRecord },
    Cancelled,
}

impl CallError {
    pub fn record(&self) -> Option<&ErrorRecord> {
        match self {
            CallError::Rejected { record } | CallError::Failed { record } => Some(record),
            CallError::Cancelled => None,
        }
    }
}

/// A registered provider with its breaker, bucket and health window
pub struct BaseProvider {
    descriptor: ProviderDescriptor,
    registration_seq: u64,
    priority: AtomicI32,
    enabled: AtomicBool,
    deprioritized_until: RwLock<Option<Instant>>,
    inner: Arc<dyn Provider>,
    circuit: CircuitBreaker,
    limiter: RateLimiter,
    health: HealthWindow,
    classifier: Arc<ErrorClassifier>,
    metrics: Option<Arc<ResilienceMetrics>>,
}

impl fmt::Debug for BaseProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BaseProvider")
            .field("id", &self.descriptor.id)
            .field("capability", &self.descriptor.capability)
            .field("priority", &self.priority())
            .field("enabled", &self.is_enabled())
            .finish()
    }
}

impl BaseProvider {
    pub fn new(
        descriptor: ProviderDescriptor,
        inner: Arc<dyn Provider>,
        classifier: Arc<ErrorClassifier>,
        health_config: &HealthMonitorConfig,
        registration_seq: u64,
        metrics: Option<Arc<ResilienceMetrics>>,
    ) -> Result<Self, ConfigError> {
        descriptor.validate()?;
        let mut circuit =
            CircuitBreaker::new(descriptor.id.clone(), descriptor.config.circuit_breaker.clone());
        if let Some(metrics) = &metrics {
            circuit = circuit.with_metrics(Arc::clone(metrics));
        }
        Ok(Self {
            registration_seq,
            priority: AtomicI32::new(descriptor.priority),
            enabled: AtomicBool::new(descriptor.enabled),
            deprioritized_until: RwLock::new(None),
            inner,
            limiter: RateLimiter::new(descriptor.id.clone(), &descriptor.config.rate_limit),
            health: HealthWindow::new(descriptor.id.clone(), health_config),
            circuit,
            classifier,
            metrics,
            descriptor,
        })
    }

    pub fn id(&self) -> &str {
        &self.descriptor.id
    }

    pub fn capability(&self) -> CapabilityType {
        self.descriptor.capability
    }

    pub fn descriptor(&self) -> &ProviderDescriptor {
        &self.descriptor
    }

    pub fn registration_seq(&self) -> u64 {
        self.registration_seq
    }

    pub fn priority(&self) -> i32 {
        self.priority.load(Ordering::Acquire)
    }

    pub fn set_priority(&self, priority: i32) {
        self.priority.store(priority, Ordering::Release);
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Release);
    }

    /// Push this provider behind its peers until `now + duration`
    pub async fn deprioritize(&self, duration: Duration) {
        let until = Instant::now() + duration;
        let mut slot = self.deprioritized_until.write().await;
        *slot = Some(slot.map_or(until, |current| current.max(until)));
    }

    pub async fn is_deprioritized(&self) -> bool {
        self.deprioritized_until
            .read()
            .await
            .is_some_and(|until| Instant::now() < until)
    }

    pub fn circuit(&self) -> &CircuitBreaker {
        &self.circuit
    }

    pub fn rate_limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    pub fn health(&self) -> &HealthWindow {
        &self.health
    }

    pub fn retry_config(&self) -> Option<&RetryPolicyConfig> {
        self.descriptor.config.retry.as_ref()
    }

    fn context(&self, operation: &str) -> ErrorContext {
        ErrorContext::new()
            .with_component("provider")
            .with_operation(operation)
            .with_provider(self.id())
            .with_capability(self.capability())
    }

    fn reject(&self, failure: ProviderFailure, operation: &str) -> CallError {
        let record = self.classifier.classify(&failure, self.context(operation));
        if let Some(metrics) = &self.metrics {
            metrics.record_call(self.id(), "rejected", Duration::ZERO);
        }
        CallError::Rejected { record }
    }

    /// Run one call through rate limit, circuit and timeout
    pub async fn execute(
        &self,
        request: Value,
        deadline: Option<Instant>,
        cancel: &CancellationToken,
    ) -> Result<Value, CallError> {
        if cancel.is_cancelled() {
            return Err(CallError::Cancelled);
        }

        if !self.limiter.try_acquire(1.0).await {
            let retry_after = self.limiter.time_until_available(1.0).await;
            warn!(provider = %self.id(), "Local rate limit exhausted");
            return Err(self.reject(
                ProviderFailure::RateLimited {
                    message: format!("local rate limit exhausted for provider '{}'", self.id()),
                    retry_after_ms: retry_after.map(|d| d.as_millis() as u64),
                },
                "rate_limit",
            ));
        }

        let Some(admission) = self.circuit.admit().await else {
            debug!(provider = %self.id(), "Circuit open, rejecting call");
            return Err(self.reject(
                ProviderFailure::Unavailable {
                    message: format!("circuit open for provider '{}'", self.id()),
                },
                "circuit_breaker",
            ));
        };

        let timeout = self.descriptor.config.call_timeout();
        let budget = deadline
            .map(|d| d.saturating_duration_since(Instant::now()).min(timeout))
            .unwrap_or(timeout);

        let started = Instant::now();
        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            result = tokio::time::timeout(budget, self.inner.execute(request)) => Some(result),
        };
        let latency = started.elapsed();

        match outcome {
            None => {
                if admission == Admission::Probe {
                    self.circuit.abandon_probe().await;
                }
                debug!(provider = %self.id(), "Call cancelled in flight");
                Err(CallError::Cancelled)
            }
            Some(Ok(Ok(response))) => {
                self.circuit.on_success().await;
                self.health.record(latency, true, SampleSource::Call).await;
                if let Some(metrics) = &self.metrics {
                    metrics.record_call(self.id(), "success", latency);
                }
                Ok(response)
            }
            Some(Ok(Err(failure))) => Err(self.fail(failure, latency).await),
            Some(Err(_elapsed)) => {
                let failure = ProviderFailure::Timeout {
                    message: format!("no response within {}ms", budget.as_millis()),
                };
                Err(self.fail(failure, latency).await)
            }
        }
    }

    async fn fail(&self, failure: ProviderFailure, latency: Duration) -> CallError {
        let record = self.classifier.classify(&failure, self.context("execute"));
        let counts = record.kind.counts_against_circuit();
        if counts {
            self.circuit.on_failure().await;
        } else {
            self.circuit.on_success().await;
        }
        self.health.record(latency, !counts, SampleSource::Call).await;
        if let Some(metrics) = &self.metrics {
            metrics.record_call(self.id(), "failure", latency);
        }
        warn!(
            provider = %self.id(),
            kind = %record.kind,
            latency_ms = latency.as_millis() as u64,
            error = %record.message,
            "Provider call failed"
        );
        CallError::Failed { record }
    }

    /// Run the provider's health probe, recording the outcome as a sample
    pub async fn probe(&self, timeout: Duration) -> Option<bool> {
        let started = Instant::now();
        let healthy = match tokio::time::timeout(timeout, self.inner.health_probe()).await {
            Ok(None) => return None,
            Ok(Some(healthy)) => healthy,
            Err(_) => false,
        };
        self.health
            .record(started.elapsed(), healthy, SampleSource::Probe)
            .await;
        Some(healthy)
    }
}
