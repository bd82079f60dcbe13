use crate::alerting::AlertConfig;
use crate::error_log::ErrorLogConfig;
use crate::health::HealthMonitorConfig;
use crate::provider::ProviderConfig;
use crate::recovery::RecoveryConfig;
use crate::registry::{RegistryConfig, RetryScope};
use common::{parse_env_var, ConfigError};
use serde::{Deserialize, Serialize};

/// Configuration for every resilience component
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResilienceConfig {
    /// Applied to providers registered through the engine's descriptor helper
    pub provider_defaults: ProviderConfig,
    pub registry: RegistryConfig,
    pub health: HealthMonitorConfig,
    pub recovery: RecoveryConfig,
    pub alerts: AlertConfig,
    pub error_log: ErrorLogConfig,
}

impl ResilienceConfig {
    /// Defaults overridden by `RESILIENCE_*` environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.apply_env()?;
        config.validate()?;
        Ok(config)
    }

    /// Parse a JSON document; missing fields take their defaults
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json).map_err(|e| ConfigError::Parse {
            message: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    fn apply_env(&mut self) -> Result<(), ConfigError> {
        let circuit = &mut self.provider_defaults.circuit_breaker;
        if let Some(threshold) = parse_env_var::<u32>("RESILIENCE_FAILURE_THRESHOLD")? {
            circuit.failure_threshold = threshold;
        }
        if let Some(window) = parse_env_var::<u64>("RESILIENCE_FAILURE_WINDOW_MS")? {
            circuit.failure_window_ms = window;
        }
        if let Some(cooldown) = parse_env_var::<u64>("RESILIENCE_CIRCUIT_COOLDOWN_MS")? {
            circuit.initial_cooldown_ms = cooldown;
        }
        if let Some(cap) = parse_env_var::<u64>("RESILIENCE_CIRCUIT_MAX_COOLDOWN_MS")? {
            circuit.max_cooldown_ms = cap;
        }
        if let Some(timeout) = parse_env_var::<u64>("RESILIENCE_CALL_TIMEOUT_MS")? {
            self.provider_defaults.call_timeout_ms = timeout;
        }

        let retry = &mut self.registry.default_retry;
        if let Some(retries) = parse_env_var::<u32>("RESILIENCE_MAX_RETRIES")? {
            retry.max_retries = retries;
        }
        if let Some(delay) = parse_env_var::<u64>("RESILIENCE_RETRY_BASE_DELAY_MS")? {
            retry.base_delay_ms = delay;
        }
        if let Some(delay) = parse_env_var::<u64>("RESILIENCE_RETRY_MAX_DELAY_MS")? {
            retry.max_delay_ms = delay;
        }
        if let Some(scope) = parse_env_var::<RetryScope>("RESILIENCE_RETRY_SCOPE")? {
            self.registry.retry_scope = scope;
        }

        if let Some(interval) = parse_env_var::<u64>("RESILIENCE_HEALTH_PROBE_INTERVAL_MS")? {
            self.health.probe_interval_ms = interval;
        }
        if let Some(cooldown) = parse_env_var::<u64>("RESILIENCE_GLOBAL_COOLDOWN_MS")? {
            self.recovery.global_cooldown_ms = cooldown;
        }
        if let Some(capacity) = parse_env_var::<usize>("RESILIENCE_ERROR_LOG_CAPACITY")? {
            self.error_log.capacity = capacity;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.provider_defaults.validate()?;
        self.registry.validate()?;
        self.health.validate()?;
        self.recovery.validate()?;
        self.alerts.validate()?;
        self.error_log.validate()?;
        Ok(())
    }
}
