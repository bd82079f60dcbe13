//! Service settings shared by every binary in the workspace

use crate::errors::ConfigError;
use serde::{Deserialize, Serialize};
use std::env;
use std::str::FromStr;

const ENVIRONMENTS: [&str; 4] = ["development", "test", "staging", "production"];
const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Pretty,
    Json,
}

impl FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_lowercase().as_str() {
            "pretty" | "text" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::invalid(
                "log_format",
                format!("unknown format '{other}'"),
            )),
        }
    }
}

/// Process-level settings for a service
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceSettings {
    /// Environment (development, test, staging, production)
    pub environment: String,
    /// Service name, attached to every log line
    pub service_name: String,
    /// Default log level when `RUST_LOG` is not set
    pub log_level: String,
    /// Log output format
    pub log_format: LogFormat,
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            environment: "development".to_string(),
            service_name: "provider-resilience".to_string(),
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
        }
    }
}

impl ServiceSettings {
    /// Load settings from `ENVIRONMENT`, `SERVICE_NAME`, `LOG_LEVEL` and `LOG_FORMAT`
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut settings = Self::default();
        if let Ok(environment) = env::var("ENVIRONMENT") {
            settings.environment = environment;
        }
        if let Ok(service_name) = env::var("SERVICE_NAME") {
            settings.service_name = service_name;
        }
        if let Ok(log_level) = env::var("LOG_LEVEL") {
            settings.log_level = log_level.to_ascii_lowercase();
        }
        if let Some(format) = parse_env_var::<LogFormat>("LOG_FORMAT")? {
            settings.log_format = format;
        }
        settings.validate()?;
        Ok(settings)
    }

    /// Validate the settings
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !ENVIRONMENTS.contains(&self.environment.as_str()) {
            return Err(ConfigError::invalid(
                "environment",
                format!("'{}' is not one of {:?}", self.environment, ENVIRONMENTS),
            ));
        }
        if self.service_name.trim().is_empty() {
            return Err(ConfigError::invalid("service_name", "cannot be empty"));
        }
        if self.service_name.len() > 50 {
            return Err(ConfigError::invalid(
                "service_name",
                "too long (max 50 characters)",
            ));
        }
        if !LOG_LEVELS.contains(&self.log_level.as_str()) {
            return Err(ConfigError::invalid(
                "log_level",
                format!("'{}' is not one of {:?}", self.log_level, LOG_LEVELS),
            ));
        }
        Ok(())
    }

    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }
}

/// Read and parse an optional environment variable.
///
/// Returns `Ok(None)` when the variable is unset and an
/// [`ConfigError::InvalidVariable`] when it is set but does not parse.
pub fn parse_env_var<T>(variable: &str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(variable) {
        Ok(value) => value
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| ConfigError::InvalidVariable {
                variable: variable.to_string(),
                value,
                reason: e.to_string(),
            }),
        Err(_) => Ok(None),
    }
}
