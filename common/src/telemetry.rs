//! Tracing subscriber setup for service binaries
//!
//! Libraries in this workspace only emit `tracing` events; installing a
//! subscriber is left to the binary entry point.

use crate::config::{LogFormat, ServiceSettings};
use crate::errors::ConfigError;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Install the global tracing subscriber.
///
/// `RUST_LOG` takes precedence; otherwise the configured log level is used.
pub fn init_tracing(settings: &ServiceSettings) -> Result<(), ConfigError> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&settings.log_level))
        .map_err(|e| ConfigError::invalid("log_level", e.to_string()))?;

    let registry = tracing_subscriber::registry().with(filter);
    let result = match settings.log_format {
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json().with_target(true))
            .try_init(),
        LogFormat::Pretty => registry
            .with(tracing_subscriber::fmt::layer().with_target(true))
            .try_init(),
    };

    result.map_err(|e| ConfigError::Conflict {
        conflict: format!("tracing subscriber already installed: {e}"),
    })?;

    tracing::info!(
        service = %settings.service_name,
        environment = %settings.environment,
        "Tracing initialized"
    );
    Ok(())
}
