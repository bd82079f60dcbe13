//! Prometheus metrics for the resilience layer.
//!
//! Each [`ResilienceMetrics`] owns its registry so several engines (and
//! tests) can coexist in one process.

use crate::circuit_breaker::CircuitStatus;
use crate::classifier::{ErrorKind, Severity};
use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};
use std::time::Duration;

/// Collectors for provider calls, circuits, recovery, alerting and the error log
pub struct ResilienceMetrics {
    /// Prometheus registry for all metrics
    pub registry: Registry,

    // === Provider Metrics ===
    /// Provider calls by provider and outcome (success, failure, rejected)
    pub provider_calls_total: IntCounterVec,
    /// Provider call latency
    pub provider_call_duration: HistogramVec,
    /// Circuit transitions by provider and target state
    pub circuit_transitions_total: IntCounterVec,

    // === Error Metrics ===
    /// Classified error records by kind and severity
    pub error_records_total: IntCounterVec,
    /// Records evicted from the in-memory error log
    pub error_log_evictions_total: IntCounter,

    // === Recovery and Alerting ===
    /// Recovery attempts by strategy and outcome
    pub recovery_attempts_total: IntCounterVec,
    /// Incidents opened by rule
    pub incidents_opened_total: IntCounterVec,
    /// Currently open incidents
    pub open_incidents: IntGauge,
}

impl ResilienceMetrics {
    /// Create the collectors and register them with a fresh registry
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let provider_calls_total = IntCounterVec::new(
            Opts::new("resilience_provider_calls_total", "Total provider calls"),
            &["provider", "outcome"],
        )?;
        let provider_call_duration = HistogramVec::new(
            HistogramOpts::new(
                "resilience_provider_call_duration_seconds",
                "Duration of provider calls in seconds",
            )
            .buckets(vec![0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]),
            &["provider"],
        )?;
        let circuit_transitions_total = IntCounterVec::new(
            Opts::new(
                "resilience_circuit_transitions_total",
                "Circuit breaker state transitions",
            ),
            &["provider", "state"],
        )?;
        let error_records_total = IntCounterVec::new(
            Opts::new("resilience_error_records_total", "Classified error records"),
            &["kind", "severity"],
        )?;
        let error_log_evictions_total = IntCounter::new(
            "resilience_error_log_evictions_total",
            "Error records evicted from the in-memory log",
        )?;
        let recovery_attempts_total = IntCounterVec::new(
            Opts::new("resilience_recovery_attempts_total", "Recovery attempts"),
            &["strategy", "outcome"],
        )?;
        let incidents_opened_total = IntCounterVec::new(
            Opts::new("resilience_incidents_opened_total", "Incidents opened"),
            &["rule"],
        )?;
        let open_incidents = IntGauge::new("resilience_open_incidents", "Currently open incidents")?;

        registry.register(Box::new(provider_calls_total.clone()))?;
        registry.register(Box::new(provider_call_duration.clone()))?;
        registry.register(Box::new(circuit_transitions_total.clone()))?;
        registry.register(Box::new(error_records_total.clone()))?;
        registry.register(Box::new(error_log_evictions_total.clone()))?;
        registry.register(Box::new(recovery_attempts_total.clone()))?;
        registry.register(Box::new(incidents_opened_total.clone()))?;
        registry.register(Box::new(open_incidents.clone()))?;

        Ok(Self {
            registry,
            provider_calls_total,
            provider_call_duration,
            circuit_transitions_total,
            error_records_total,
            error_log_evictions_total,
            recovery_attempts_total,
            incidents_opened_total,
            open_incidents,
        })
    }

    pub fn record_call(&self, provider: &str, outcome: &str, duration: Duration) {
        self.provider_calls_total
            .with_label_values(&[provider, outcome])
            .inc();
        if outcome != "rejected" {
            self.provider_call_duration
                .with_label_values(&[provider])
                .observe(duration.as_secs_f64());
        }
    }

    pub fn record_transition(&self, provider: &str, state: CircuitStatus) {
        self.circuit_transitions_total
            .with_label_values(&[provider, state.as_str()])
            .inc();
    }

    pub fn record_error(&self, kind: ErrorKind, severity: Severity) {
        self.error_records_total
            .with_label_values(&[kind.as_str(), severity.as_str()])
            .inc();
    }

    pub fn record_eviction(&self) {
        self.error_log_evictions_total.inc();
    }

    pub fn record_recovery(&self, strategy: &str, outcome: &str) {
        self.recovery_attempts_total
            .with_label_values(&[strategy, outcome])
            .inc();
    }

    pub fn record_incident_opened(&self, rule: &str) {
        self.incidents_opened_total.with_label_values(&[rule]).inc();
        self.open_incidents.inc();
    }

    pub fn record_incident_closed(&self) {
        self.open_incidents.dec();
    }

    /// Generate Prometheus metrics output
    pub fn gather_metrics(&self) -> Result<String, Box<dyn std::error::Error + Send + Sync>> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }
}

impl std::fmt::Debug for ResilienceMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResilienceMetrics").finish_non_exhaustive()
    }
}
