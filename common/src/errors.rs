//! Configuration error types shared across crates

use thiserror::Error;

/// Configuration validation errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required environment variable: {variable}")]
    MissingVariable { variable: String },

    #[error("Invalid environment variable value for {variable}: {value} - {reason}")]
    InvalidVariable {
        variable: String,
        value: String,
        reason: String,
    },

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("Configuration conflict: {conflict}")]
    Conflict { conflict: String },

    #[error("Failed to parse configuration: {message}")]
    Parse { message: String },
}

impl ConfigError {
    /// Shorthand for a field-level validation failure
    pub fn invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidValue {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Whether the error came from reading the process environment
    pub fn is_environment_error(&self) -> bool {
        matches!(
            self,
            Self::MissingVariable { .. } | Self::InvalidVariable { .. }
        )
    }
}
