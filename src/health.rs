//! Provider health tracking
//!
//! Each provider keeps a bounded window of recent call and probe samples.
//! Samples older than `sample_ttl_ms` no longer count. A provider is healthy
//! when its circuit is not rejecting and either it has too few live samples
//! to judge or its success ratio meets `healthy_ratio`.

use crate::circuit_breaker::CircuitStatus;
use crate::provider::BaseProvider;
use chrono::{DateTime, Utc};
use common::ConfigError;
use dashmap::DashMap;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Configuration for health windows and background probing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthMonitorConfig {
    /// Maximum samples kept per provider
    pub window_size: usize,
    /// Fewer live samples than this means "not enough data", treated as healthy
    pub min_samples: usize,
    /// Minimum success ratio to be considered healthy
    pub healthy_ratio: f64,
    /// Samples older than this are ignored
    pub sample_ttl_ms: u64,
    /// Interval between background probes
    pub probe_interval_ms: u64,
    /// Budget for a single probe
    pub probe_timeout_ms: u64,
    /// Random spread applied to the first probe so providers do not probe in lockstep
    pub probe_jitter_ratio: f64,
}

impl Default for HealthMonitorConfig {
    fn default() -> Self {
        Self {
            window_size: 20,
            min_samples: 5,
            healthy_ratio: 0.5,
            sample_ttl_ms: 300_000,
            probe_interval_ms: 15_000,
            probe_timeout_ms: 5_000,
            probe_jitter_ratio: 0.1,
        }
    }
}

impl HealthMonitorConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.window_size == 0 {
            return Err(ConfigError::invalid("health.window_size", "must be at least 1"));
        }
        if self.min_samples > self.window_size {
            return Err(ConfigError::invalid(
                "health.min_samples",
                "must not exceed window_size",
            ));
        }
        if !(0.0..=1.0).contains(&self.healthy_ratio) {
            return Err(ConfigError::invalid(
                "health.healthy_ratio",
                "must be between 0.0 and 1.0",
            ));
        }
        if self.sample_ttl_ms == 0 || self.probe_interval_ms == 0 || self.probe_timeout_ms == 0 {
            return Err(ConfigError::invalid(
                "health",
                "sample_ttl_ms, probe_interval_ms and probe_timeout_ms must be greater than zero",
            ));
        }
        if !(0.0..=1.0).contains(&self.probe_jitter_ratio) {
            return Err(ConfigError::invalid(
                "health.probe_jitter_ratio",
                "must be between 0.0 and 1.0",
            ));
        }
        Ok(())
    }

    pub fn sample_ttl(&self) -> Duration {
        Duration::from_millis(self.sample_ttl_ms)
    }

    pub fn probe_interval(&self) -> Duration {
        Duration::from_millis(self.probe_interval_ms)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SampleSource {
    Call,
    Probe,
}

#[derive(Debug, Clone, PartialEq)]
pub struct HealthSample {
    pub provider_id: String,
    pub timestamp: DateTime<Utc>,
    pub recorded_at: Instant,
    pub latency: Duration,
    pub success: bool,
    pub source: SampleSource,
}

/// Aggregate over the live samples of a window
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HealthSummary {
    pub live_samples: usize,
    pub successes: usize,
    pub success_ratio: Option<f64>,
    pub average_latency: Option<Duration>,
}

/// Bounded sample window for one provider
#[derive(Debug)]
pub struct HealthWindow {
    provider_id: String,
    capacity: usize,
    min_samples: usize,
    healthy_ratio: f64,
    ttl: Duration,
    samples: Mutex<VecDeque<HealthSample>>,
}

impl HealthWindow {
    pub fn new(provider_id: impl Into<String>, config: &HealthMonitorConfig) -> Self {
        Self {
            provider_id: provider_id.into(),
            capacity: config.window_size.max(1),
            min_samples: config.min_samples,
            healthy_ratio: config.healthy_ratio,
            ttl: config.sample_ttl(),
            samples: Mutex::new(VecDeque::with_capacity(config.window_size)),
        }
    }

    pub async fn record(&self, latency: Duration, success: bool, source: SampleSource) {
        let mut samples = self.samples.lock().await;
        if samples.len() == self.capacity {
            samples.pop_front();
        }
        samples.push_back(HealthSample {
            provider_id: self.provider_id.clone(),
            timestamp: Utc::now(),
            recorded_at: Instant::now(),
            latency,
            success,
            source,
        });
    }

    pub async fn summary(&self) -> HealthSummary {
        let mut samples = self.samples.lock().await;
        let now = Instant::now();
        while samples
            .front()
            .is_some_and(|s| now.saturating_duration_since(s.recorded_at) > self.ttl)
        {
            samples.pop_front();
        }
        if samples.is_empty() {
            return HealthSummary::default();
        }
        let live_samples = samples.len();
        let successes = samples.iter().filter(|s| s.success).count();
        let total_latency: Duration = samples.iter().map(|s| s.latency).sum();
        HealthSummary {
            live_samples,
            successes,
            success_ratio: Some(successes as f64 / live_samples as f64),
            average_latency: Some(total_latency / live_samples as u32),
        }
    }

    /// Window-only part of the health rule
    pub async fn meets_threshold(&self) -> bool {
        let summary = self.summary().await;
        if summary.live_samples < self.min_samples {
            return true;
        }
        summary
            .success_ratio
            .map_or(true, |ratio| ratio >= self.healthy_ratio)
    }

    pub async fn samples(&self) -> Vec<HealthSample> {
        self.samples.lock().await.iter().cloned().collect()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub provider_id: String,
    pub healthy: bool,
    pub circuit: CircuitStatus,
    pub live_samples: usize,
    pub success_ratio: Option<f64>,
    pub average_latency_ms: Option<u64>,
}

/// Evaluates provider health and drives background probes
#[derive(Debug)]
pub struct HealthMonitor {
    config: HealthMonitorConfig,
    probes: DashMap<String, CancellationToken>,
    running: AtomicBool,
    shutdown: CancellationToken,
}

impl HealthMonitor {
    pub fn new(config: HealthMonitorConfig) -> Self {
        Self {
            config,
            probes: DashMap::new(),
            running: AtomicBool::new(false),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn config(&self) -> &HealthMonitorConfig {
        &self.config
    }

    pub async fn is_healthy(&self, provider: &BaseProvider) -> bool {
        !provider.circuit().is_rejecting().await && provider.health().meets_threshold().await
    }

    pub async fn report(&self, provider: &BaseProvider) -> HealthReport {
        let summary = provider.health().summary().await;
        HealthReport {
            provider_id: provider.id().to_string(),
            healthy: self.is_healthy(provider).await,
            circuit: provider.circuit().status().await,
            live_samples: summary.live_samples,
            success_ratio: summary.success_ratio,
            average_latency_ms: summary.average_latency.map(|d| d.as_millis() as u64),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire) && !self.shutdown.is_cancelled()
    }

    /// Start probing the given providers and any watched later
    pub fn start(&self, providers: impl IntoIterator<Item = Arc<BaseProvider>>) {
        self.running.store(true, Ordering::Release);
        for provider in providers {
            self.watch(provider);
        }
    }

    /// Spawn the probe loop for `provider`. Returns false if it is already watched.
    pub fn watch(&self, provider: Arc<BaseProvider>) -> bool {
        if self.shutdown.is_cancelled() {
            return false;
        }
        let token = self.shutdown.child_token();
        match self.probes.entry(provider.id().to_string()) {
            dashmap::mapref::entry::Entry::Occupied(_) => return false,
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(token.clone());
            }
        }

        let period = self.config.probe_interval();
        let timeout = self.config.probe_timeout();
        let jitter = period.mul_f64(rand::thread_rng().gen_range(0.0..=self.config.probe_jitter_ratio));
        tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period + jitter, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            debug!(provider = %provider.id(), "Health probe loop started");
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        match provider.probe(timeout).await {
                            None => {
                                debug!(provider = %provider.id(), "Provider does not support health probes");
                                break;
                            }
                            Some(true) => debug!(provider = %provider.id(), "Health probe succeeded"),
                            Some(false) => warn!(provider = %provider.id(), "Health probe failed"),
                        }
                    }
                }
            }
            debug!(provider = %provider.id(), "Health probe loop stopped");
        });
        true
    }

    pub fn unwatch(&self, provider_id: &str) {
        if let Some((_, token)) = self.probes.remove(provider_id) {
            token.cancel();
        }
    }

    pub fn watched(&self) -> Vec<String> {
        self.probes.iter().map(|entry| entry.key().clone()).collect()
    }

    pub fn shutdown(&self) {
        self.shutdown.cancel();
        self.probes.clear();
        info!("Health monitor stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::ErrorClassifier;
    use crate::provider::{CapabilityType, Provider, ProviderDescriptor, ProviderFailure};
    use async_trait::async_trait;
    use serde_json::Value;
    use std::sync::atomic::AtomicUsize;
    use tokio::time::advance;

    fn config() -> HealthMonitorConfig {
        HealthMonitorConfig {
            window_size: 4,
            min_samples: 2,
            healthy_ratio: 0.5,
            sample_ttl_ms: 1_000,
            probe_interval_ms: 100,
            probe_timeout_ms: 50,
            probe_jitter_ratio: 0.0,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_window_is_bounded() {
        let window = HealthWindow::new("a", &config());
        for _ in 0..10 {
            window.record(Duration::from_millis(5), true, SampleSource::Call).await;
        }
        assert_eq!(window.samples().await.len(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_insufficient_samples_count_as_healthy() {
        let window = HealthWindow::new("a", &config());
        window.record(Duration::ZERO, false, SampleSource::Call).await;
        assert!(window.meets_threshold().await);
        window.record(Duration::ZERO, false, SampleSource::Call).await;
        assert!(!window.meets_threshold().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ratio_threshold() {
        let window = HealthWindow::new("a", &config());
        window.record(Duration::ZERO, true, SampleSource::Call).await;
        window.record(Duration::ZERO, false, SampleSource::Call).await;
        assert!(window.meets_threshold().await);
        window.record(Duration::ZERO, false, SampleSource::Call).await;
        assert!(!window.meets_threshold().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_samples_expire() {
        let window = HealthWindow::new("a", &config());
        window.record(Duration::from_millis(10), false, SampleSource::Call).await;
        window.record(Duration::from_millis(30), false, SampleSource::Call).await;
        let summary = window.summary().await;
        assert_eq!(summary.live_samples, 2);
        assert_eq!(summary.average_latency, Some(Duration::from_millis(20)));
        assert!(!window.meets_threshold().await);

        advance(Duration::from_millis(1_001)).await;
        assert_eq!(window.summary().await, HealthSummary::default());
        assert!(window.meets_threshold().await);
    }

    struct Probed {
        probes: AtomicUsize,
        healthy: bool,
    }

    #[async_trait]
    impl Provider for Probed {
        async fn execute(&self, request: Value) -> Result<Value, ProviderFailure> {
            Ok(request)
        }

        async fn health_probe(&self) -> Option<bool> {
            self.probes.fetch_add(1, Ordering::SeqCst);
            Some(self.healthy)
        }
    }

    fn base(inner: Arc<dyn Provider>) -> Arc<BaseProvider> {
        Arc::new(
            BaseProvider::new(
                ProviderDescriptor::new("probed", CapabilityType::Knowledge, 0),
                inner,
                Arc::new(ErrorClassifier::default()),
                &config(),
                0,
                None,
            )
            .expect("valid descriptor"),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_probe_loop_records_samples_until_unwatched() {
        let inner = Arc::new(Probed {
            probes: AtomicUsize::new(0),
            healthy: false,
        });
        let provider = base(inner.clone());
        let monitor = HealthMonitor::new(config());
        monitor.start([Arc::clone(&provider)]);
        assert!(!monitor.watch(Arc::clone(&provider)));
        assert_eq!(monitor.watched(), vec!["probed".to_string()]);

        for _ in 0..5 {
            advance(Duration::from_millis(100)).await;
            tokio::task::yield_now().await;
        }
        assert!(inner.probes.load(Ordering::SeqCst) >= 2);
        assert!(!monitor.is_healthy(&provider).await);

        monitor.unwatch("probed");
        tokio::task::yield_now().await;
        let seen = inner.probes.load(Ordering::SeqCst);
        advance(Duration::from_millis(500)).await;
        tokio::task::yield_now().await;
        assert_eq!(inner.probes.load(Ordering::SeqCst), seen);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_stops_watching() {
        let provider = base(Arc::new(Probed {
            probes: AtomicUsize::new(0),
            healthy: true,
        }));
        let monitor = HealthMonitor::new(config());
        monitor.start(Vec::new());
        assert!(monitor.is_running());
        monitor.shutdown();
        assert!(!monitor.is_running());
        assert!(!monitor.watch(provider));
        assert!(monitor.watched().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_report() {
        let provider = base(Arc::new(Probed {
            probes: AtomicUsize::new(0),
            healthy: true,
        }));
        provider.health().record(Duration::from_millis(8), true, SampleSource::Call).await;
        let monitor = HealthMonitor::new(config());
        let report = monitor.report(&provider).await;
        assert!(report.healthy);
        assert_eq!(report.circuit, CircuitStatus::Closed);
        assert_eq!(report.live_samples, 1);
        assert_eq!(report.average_latency_ms, Some(8));
    }

    #[test]
    fn test_config_validation() {
        assert!(HealthMonitorConfig::default().validate().is_ok());
        let bad = HealthMonitorConfig {
            min_samples: 50,
            ..HealthMonitorConfig::default()
        };
        assert!(bad.validate().is_err());
    }
}
