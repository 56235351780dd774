//! Error types for observability operations.

use thiserror::Error;

#[non_exhaustive]
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid tracing configuration: {0}")]
    Configuration(String),

    #[error("metrics operation failed: {0}")]
    Metrics(String),
}

pub type Result<T> = std::result::Result<T, Error>;
