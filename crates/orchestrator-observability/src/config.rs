//! Builder for local tracing configuration.
//!
//! This is a deliberately smaller surface than a full OTLP exporter config:
//! no endpoint, no propagator, no resource-attribute baggage. It configures
//! a `tracing-subscriber` registry writing to stdout, which is all this
//! deployment needs until a collector is actually stood up.

/// How much of the span volume to keep once tracing is enabled at all.
///
/// Without an OTLP exporter there's no sampler to hook a trace-id ratio
/// into, so `Probabilistic` only distinguishes itself from `Always` by
/// being a signal callers can branch on (e.g. to skip verbose per-row
/// spans in hot loops); both currently initialize the same subscriber.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SamplingStrategy {
    Always,
    Never,
    Probabilistic(f64),
}

#[derive(Debug, Clone)]
pub struct TracingConfig {
    pub service_name: String,
    pub log_level: String,
    pub json_output: bool,
    pub sampling: SamplingStrategy,
}

impl TracingConfig {
    #[must_use]
    pub fn new(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            log_level: "info".to_string(),
            json_output: false,
            sampling: SamplingStrategy::Always,
        }
    }

    #[must_use]
    pub fn with_log_level(mut self, level: impl Into<String>) -> Self {
        self.log_level = level.into();
        self
    }

    #[must_use]
    pub fn with_json_output(mut self, enabled: bool) -> Self {
        self.json_output = enabled;
        self
    }

    #[must_use]
    pub fn with_sampling(mut self, sampling: SamplingStrategy) -> Self {
        self.sampling = sampling;
        self
    }

    /// Clamps a 0.0-1.0 rate into the nearest `SamplingStrategy` variant.
    #[must_use]
    pub fn with_sampling_rate(mut self, rate: f64) -> Self {
        self.sampling = if rate <= 0.0 {
            SamplingStrategy::Never
        } else if rate >= 1.0 {
            SamplingStrategy::Always
        } else {
            SamplingStrategy::Probabilistic(rate)
        };
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sampling_rate_clamps_to_never() {
        let config = TracingConfig::new("svc").with_sampling_rate(0.0);
        assert_eq!(config.sampling, SamplingStrategy::Never);
    }

    #[test]
    fn sampling_rate_clamps_to_always() {
        let config = TracingConfig::new("svc").with_sampling_rate(1.0);
        assert_eq!(config.sampling, SamplingStrategy::Always);
    }

    #[test]
    fn sampling_rate_keeps_probabilistic_midpoint() {
        let config = TracingConfig::new("svc").with_sampling_rate(0.5);
        assert_eq!(config.sampling, SamplingStrategy::Probabilistic(0.5));
    }
}
