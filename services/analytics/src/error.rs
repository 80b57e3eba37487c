//! Error types for the analytics engine
//!
//! Propagation policy: pure indicator/statistics functions fail fast with
//! `InvalidInput`; an invariant violation inside a computation is
//! `Computation` and kills that computation; upstream fetch problems are
//! `UpstreamData` and degrade a single symbol; `Configuration` is fatal at
//! construction and is the only variant the batch orchestrator does not
//! absorb.

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum AnalyticsError {
    #[error("invalid input: {message}")]
    InvalidInput { message: String },

    #[error("computation invariant violated: {message}")]
    Computation { message: String },

    #[error("upstream data error: {message}")]
    UpstreamData { message: String },

    #[error("configuration error: {message}")]
    Configuration { message: String },
}

impl AnalyticsError {
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }

    pub fn computation(message: impl Into<String>) -> Self {
        Self::Computation {
            message: message.into(),
        }
    }

    pub fn upstream(message: impl Into<String>) -> Self {
        Self::UpstreamData {
            message: message.into(),
        }
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Whether the batch orchestrator may absorb this error into a
    /// per-symbol "unavailable" outcome.
    pub fn is_isolatable(&self) -> bool {
        !matches!(self, AnalyticsError::Configuration { .. })
    }
}

impl From<types::MarketDataError> for AnalyticsError {
    fn from(err: types::MarketDataError) -> Self {
        AnalyticsError::UpstreamData {
            message: err.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, AnalyticsError>;
