#![allow(dead_code)]
//! Scripted providers shared by the integration tests

use async_trait::async_trait;
use provider_resilience::{
    CapabilityType, ErrorRecord, Provider, ProviderFailure, RecoveryAttempt, ResilienceConfig,
    ResilienceEngine,
};
use provider_resilience::alerting::{Notification, Notifier, NotifyError};
use provider_resilience::recovery::RecoveryListener;
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

type Outcome = Result<Value, ProviderFailure>;

/// Replays scripted outcomes, then repeats `fallback` forever
pub struct ScriptedProvider {
    script: Mutex<VecDeque<Outcome>>,
    fallback: Outcome,
    latency: Duration,
    probe: Mutex<Option<bool>>,
    calls: AtomicU32,
}

impl ScriptedProvider {
    pub fn new(fallback: Outcome) -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            fallback,
            latency: Duration::ZERO,
            probe: Mutex::new(None),
            calls: AtomicU32::new(0),
        }
    }

    pub fn succeeding(body: Value) -> Self {
        Self::new(Ok(body))
    }

    pub fn failing(failure: ProviderFailure) -> Self {
        Self::new(Err(failure))
    }

    pub fn with_script(self, outcomes: impl IntoIterator<Item = Outcome>) -> Self {
        Self {
            script: Mutex::new(outcomes.into_iter().collect()),
            ..self
        }
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn with_probe(self, healthy: bool) -> Self {
        Self {
            probe: Mutex::new(Some(healthy)),
            ..self
        }
    }

    pub async fn set_probe(&self, healthy: bool) {
        *self.probe.lock().await = Some(healthy);
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Provider for ScriptedProvider {
    async fn execute(&self, _request: Value) -> Result<Value, ProviderFailure> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        match self.script.lock().await.pop_front() {
            Some(outcome) => outcome,
            None => self.fallback.clone(),
        }
    }

    async fn health_probe(&self) -> Option<bool> {
        *self.probe.lock().await
    }
}

pub fn server_error() -> ProviderFailure {
    ProviderFailure::status(500, "internal server error")
}

pub fn ok_body() -> Value {
    json!({ "ok": true })
}

/// Notifier that remembers every notification
#[derive(Default)]
pub struct RecordingNotifier {
    pub sent: Mutex<Vec<Notification>>,
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, notification: &Notification) -> Result<(), NotifyError> {
        self.sent.lock().await.push(notification.clone());
        Ok(())
    }
}

/// Listener that remembers every recovery attempt
#[derive(Default)]
pub struct RecordingListener {
    pub attempts: Mutex<Vec<RecoveryAttempt>>,
}

#[async_trait]
impl RecoveryListener for RecordingListener {
    async fn on_attempt(&self, attempt: &RecoveryAttempt) {
        self.attempts.lock().await.push(attempt.clone());
    }
}

/// Let detached notification tasks run
pub async fn settle() {
    for _ in 0..8 {
        tokio::task::yield_now().await;
    }
}

/// Defaults with no caller-side retries and a disabled global cooldown
pub fn test_config() -> ResilienceConfig {
    let mut config = ResilienceConfig::default();
    config.registry.default_retry.max_retries = 0;
    config.recovery.global_cooldown_ms = 0;
    config
}

pub async fn register(
    engine: &ResilienceEngine,
    id: &str,
    priority: i32,
    provider: Arc<ScriptedProvider>,
) {
    engine
        .register_provider(engine.descriptor(id, CapabilityType::Inference, priority), provider)
        .await
        .expect("register provider");
}

pub fn kinds(records: &[ErrorRecord]) -> Vec<String> {
    records.iter().map(|r| r.kind.to_string()).collect()
}
