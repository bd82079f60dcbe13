//! Error types surfaced to callers of the resilience layer

use crate::classifier::ErrorRecord;
use crate::provider::CapabilityType;
use common::ConfigError;
use serde::Serialize;
use thiserror::Error;

/// Why a candidate was passed over without being called
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    Unhealthy,
}

/// What happened to one candidate during a registry call
#[derive(Debug, Clone, Serialize)]
pub struct CandidateFailure {
    pub provider_id: String,
    pub attempts: u32,
    pub last_error: Option<ErrorRecord>,
    pub skipped: Option<SkipReason>,
}

impl CandidateFailure {
    pub fn skipped(provider_id: impl Into<String>, reason: SkipReason) -> Self {
        Self {
            provider_id: provider_id.into(),
            attempts: 0,
            last_error: None,
            skipped: Some(reason),
        }
    }

    pub fn attempted(provider_id: impl Into<String>, attempts: u32, last_error: ErrorRecord) -> Self {
        Self {
            provider_id: provider_id.into(),
            attempts,
            last_error: Some(last_error),
            skipped: None,
        }
    }

    fn summary(&self) -> String {
        match (&self.skipped, &self.last_error) {
            (Some(SkipReason::Unhealthy), _) => format!("{} (unhealthy)", self.provider_id),
            (None, Some(record)) => format!("{} ({})", self.provider_id, record.kind),
            (None, None) => self.provider_id.clone(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ResilienceError {
    #[error("No provider registered for capability '{capability}'")]
    NoProviders { capability: CapabilityType },

    #[error("All {} candidate providers failed for capability '{capability}'", .failures.len())]
    AllProvidersFailed {
        capability: CapabilityType,
        failures: Vec<CandidateFailure>,
    },

    #[error("Deadline exceeded for capability '{capability}'")]
    DeadlineExceeded {
        capability: CapabilityType,
        failures: Vec<CandidateFailure>,
    },

    #[error("Call for capability '{capability}' was cancelled")]
    Cancelled { capability: CapabilityType },

    #[error("Provider '{id}' is already registered")]
    DuplicateProvider { id: String },

    #[error("Provider '{id}' is not registered")]
    UnknownProvider { id: String },

    #[error("Recovery strategy '{id}' is already registered")]
    DuplicateStrategy { id: String },

    #[error("Recovery strategy '{id}' is not registered")]
    UnknownStrategy { id: String },

    #[error("Incident '{id}' is not open")]
    UnknownIncident { id: String },

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl ResilienceError {
    pub fn capability(&self) -> Option<CapabilityType> {
        match self {
            Self::NoProviders { capability }
            | Self::AllProvidersFailed { capability, .. }
            | Self::DeadlineExceeded { capability, .. }
            | Self::Cancelled { capability } => Some(*capability),
            _ => None,
        }
    }

    /// Per-candidate outcomes, empty for errors that never reached a provider
    pub fn failures(&self) -> &[CandidateFailure] {
        match self {
            Self::AllProvidersFailed { failures, .. } | Self::DeadlineExceeded { failures, .. } => {
                failures
            }
            _ => &[],
        }
    }

    /// The classified error of the first candidate that was actually called
    pub fn primary_error(&self) -> Option<&ErrorRecord> {
        self.failures()
            .iter()
            .find_map(|failure| failure.last_error.as_ref())
    }

    /// Errors that describe a call which providers could not serve
    pub fn is_exhaustion(&self) -> bool {
        matches!(
            self,
            Self::AllProvidersFailed { .. } | Self::DeadlineExceeded { .. }
        )
    }

    /// Message safe to show to an end user
    pub fn user_message(&self) -> String {
        match self {
            Self::NoProviders { capability } => {
                format!("No {capability} provider is configured")
            }
            Self::AllProvidersFailed { capability, failures }
            | Self::DeadlineExceeded { capability, failures } => {
                let tried: Vec<String> = failures.iter().map(CandidateFailure::summary).collect();
                format!(
                    "The {capability} service is temporarily unavailable (tried: {})",
                    tried.join(", ")
                )
            }
            Self::Cancelled { .. } => "The request was cancelled".to_string(),
            other => other.to_string(),
        }
    }
}

pub type Result<T, E = ResilienceError> = std::result::Result<T, E>;
