//! Retry policy with exponential backoff and jitter

use crate::classifier::ErrorRecord;
use common::ConfigError;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicyConfig {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub backoff_factor: f64,
    pub max_delay_ms: u64,
    /// Fraction of the computed delay applied as symmetric random jitter
    pub jitter_ratio: f64,
}

impl Default for RetryPolicyConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 100,
            backoff_factor: 2.0,
            max_delay_ms: 10_000,
            jitter_ratio: 0.2,
        }
    }
}

impl RetryPolicyConfig {
    /// A policy that never retries
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_retries > 20 {
            return Err(ConfigError::invalid("retry.max_retries", "must not exceed 20"));
        }
        if !self.backoff_factor.is_finite() || self.backoff_factor < 1.0 {
            return Err(ConfigError::invalid(
                "retry.backoff_factor",
                "must be a finite number >= 1.0",
            ));
        }
        if !(0.0..=1.0).contains(&self.jitter_ratio) {
            return Err(ConfigError::invalid(
                "retry.jitter_ratio",
                "must be between 0.0 and 1.0",
            ));
        }
        if self.max_delay_ms < self.base_delay_ms {
            return Err(ConfigError::invalid(
                "retry.max_delay_ms",
                "must not be smaller than base_delay_ms",
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    config: RetryPolicyConfig,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(RetryPolicyConfig::default())
    }
}

impl RetryPolicy {
    pub fn new(config: RetryPolicyConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RetryPolicyConfig {
        &self.config
    }

    /// `attempt` counts retries already performed for this candidate
    pub fn should_retry(&self, attempt: u32, record: &ErrorRecord) -> bool {
        record.retryable && attempt < self.config.max_retries
    }

    /// `min(max_delay, base_delay * backoff_factor^attempt)` without jitter
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let millis = self.config.base_delay_ms as f64 * self.config.backoff_factor.powi(exponent);
        let capped = if millis.is_finite() {
            millis.min(self.config.max_delay_ms as f64)
        } else {
            self.config.max_delay_ms as f64
        };
        Duration::from_secs_f64(capped.max(0.0) / 1000.0)
    }

    pub fn next_delay(&self, attempt: u32) -> Duration {
        self.next_delay_with(attempt, &mut rand::thread_rng())
    }

    /// Delay with jitter drawn from `rng`, clamped to `[0, max_delay]`
    pub fn next_delay_with<R: Rng + ?Sized>(&self, attempt: u32, rng: &mut R) -> Duration {
        let base = self.base_delay(attempt);
        if self.config.jitter_ratio <= 0.0 || base.is_zero() {
            return base;
        }
        let offset = rng.gen_range(-self.config.jitter_ratio..=self.config.jitter_ratio);
        let millis = base.as_secs_f64() * 1000.0 * (1.0 + offset);
        let clamped = millis.clamp(0.0, self.config.max_delay_ms as f64);
        Duration::from_secs_f64(clamped / 1000.0)
    }
}
