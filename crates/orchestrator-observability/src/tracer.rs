//! Subscriber initialization from a [`TracingConfig`].

use crate::config::{SamplingStrategy, TracingConfig};
use crate::error::{Error, Result};
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Installs the global `tracing` subscriber. A no-op when sampling is
/// `Never`, so call sites don't need to special-case "tracing disabled"
/// themselves.
pub fn init_tracing(config: TracingConfig) -> Result<()> {
    if config.sampling == SamplingStrategy::Never {
        return Ok(());
    }

    let env_filter = EnvFilter::try_new(&config.log_level)
        .map_err(|e| Error::Configuration(format!("invalid log level {:?}: {e}", config.log_level)))?;

    let registry = tracing_subscriber::registry().with(env_filter);

    if config.json_output {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_target(true))
            .try_init()
            .map_err(|e| Error::Configuration(e.to_string()))?;
    } else {
        registry
            .with(tracing_subscriber::fmt::layer())
            .try_init()
            .map_err(|e| Error::Configuration(e.to_string()))?;
    }

    tracing::info!(service = %config.service_name, "tracing initialized");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn never_sampling_is_a_noop() {
        let config = TracingConfig::new("svc").with_sampling(SamplingStrategy::Never);
        assert!(init_tracing(config).is_ok());
    }
}
