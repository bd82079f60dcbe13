use anyhow::{Context, Result};
use async_trait::async_trait;
use common::{init_tracing, ServiceSettings};
use provider_resilience::{
    CapabilityType, ErrorContext, Provider, ProviderFailure, ResilienceConfig, ResilienceEngine,
};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Fails its first `failures` calls, then answers
struct FlakyProvider {
    name: &'static str,
    failures: u32,
    calls: AtomicU32,
}

impl FlakyProvider {
    fn new(name: &'static str, failures: u32) -> Self {
        Self {
            name,
            failures,
            calls: AtomicU32::new(0),
        }
    }
}

#[async_trait]
impl Provider for FlakyProvider {
    async fn execute(&self, request: Value) -> Result<Value, ProviderFailure> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(20)).await;
        if call < self.failures {
            return Err(ProviderFailure::status(503, format!("{} is overloaded", self.name)));
        }
        Ok(json!({ "served_by": self.name, "echo": request }))
    }

    async fn health_probe(&self) -> Option<bool> {
        Some(true)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let settings = ServiceSettings::from_env().context("invalid service settings")?;
    init_tracing(&settings).context("failed to initialise tracing")?;

    let mut config = ResilienceConfig::from_env().context("invalid resilience settings")?;
    config.registry.default_retry.max_retries = 1;
    config.registry.default_retry.base_delay_ms = 50;

    let engine = ResilienceEngine::builder(config)
        .build()
        .context("failed to build resilience engine")?;

    let primary = engine.descriptor("primary", CapabilityType::Inference, 1);
    let secondary = engine.descriptor("secondary", CapabilityType::Inference, 2);
    engine
        .register_provider(primary, Arc::new(FlakyProvider::new("primary", 3)))
        .await?;
    engine
        .register_provider(secondary, Arc::new(FlakyProvider::new("secondary", 0)))
        .await?;
    engine.start().await;

    for round in 0..3 {
        match engine
            .execute(CapabilityType::Inference, json!({ "prompt": "ping", "round": round }))
            .await
        {
            Ok(response) => info!(round, response = %response, "Call served"),
            Err(e) => warn!(round, error = %e, "Call failed"),
        }
    }

    let record = engine
        .report(
            &ProviderFailure::status(401, "token expired"),
            ErrorContext::new().with_component("demo").with_operation("refresh"),
        )
        .await;
    info!(error_id = %record.id, kind = %record.kind, "Reported out-of-band failure");

    for status in engine.provider_statuses().await {
        info!(
            provider = %status.id,
            circuit = status.circuit.as_str(),
            healthy = status.healthy,
            success_ratio = ?status.success_ratio,
            "Provider status"
        );
    }

    engine.shutdown().await;
    match engine.metrics().gather_metrics() {
        Ok(text) => println!("{text}"),
        Err(e) => warn!(error = %e, "Failed to gather metrics"),
    }
    Ok(())
}
