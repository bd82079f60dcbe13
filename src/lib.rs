//! Provider resilience
//!
//! Routes capability calls across redundant providers with per-provider
//! circuit breakers, rate limits, retries and health windows. Failures are
//! classified into [`ErrorRecord`]s, logged, fed to alert rules and handed to
//! recovery strategies. [`ResilienceEngine`] wires the pieces together.

pub mod alerting;
pub mod circuit_breaker;
pub mod classifier;
pub mod engine;
pub mod error_log;
pub mod errors;
pub mod health;
pub mod metrics;
pub mod persistence;
pub mod provider;
pub mod rate_limiter;
pub mod recovery;
pub mod registry;
pub mod resilience_config;
pub mod retry;

pub use alerting::{
    AlertConfig, AlertEngine, AlertMetric, AlertRule, Incident, LogNotifier, Notification,
    Notifier, NotifyError,
};
pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitStatus};
pub use classifier::{ErrorClassifier, ErrorContext, ErrorKind, ErrorRecord, Severity};
pub use engine::{ResilienceEngine, ResilienceEngineBuilder};
pub use error_log::{ErrorLog, ErrorLogConfig};
pub use errors::{CandidateFailure, ResilienceError, Result};
pub use health::{HealthMonitor, HealthMonitorConfig};
pub use metrics::ResilienceMetrics;
pub use persistence::{ErrorPersistence, InMemoryPersistence, JsonLinesPersistence};
pub use provider::{
    BaseProvider, CapabilityType, Provider, ProviderConfig, ProviderDescriptor, ProviderFailure,
};
pub use rate_limiter::{RateLimitConfig, RateLimiter};
pub use recovery::{
    ErrorMatcher, RecoveryAction, RecoveryAttempt, RecoveryCoordinator, RecoveryOutcome,
    RecoveryStrategy, RecoveryStrategyRegistry,
};
pub use registry::{ExecuteOptions, ProviderRegistry, ProviderStatus, RetryScope};
pub use resilience_config::ResilienceConfig;
pub use retry::{RetryPolicy, RetryPolicyConfig};
