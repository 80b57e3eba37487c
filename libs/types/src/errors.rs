//! Error types for market-data validation
//!
//! Upstream exchange payloads arrive untrusted; everything the engine
//! consumes passes through these validators exactly once, so downstream
//! computation can assume finite, ordered, well-formed input.

use thiserror::Error;

/// Errors raised while validating upstream market data
#[derive(Debug, Error, Clone, PartialEq)]
pub enum MarketDataError {
    /// A numeric field is NaN or infinite
    #[error("field '{field}' is not finite: {value}")]
    NotFinite { field: &'static str, value: f64 },

    /// Candle high is below its low
    #[error("candle high {high} is below low {low}")]
    HighBelowLow { high: f64, low: f64 },

    /// Price fields must be strictly positive
    #[error("field '{field}' must be positive, got {value}")]
    NonPositive { field: &'static str, value: f64 },

    /// Volume may be zero but never negative
    #[error("volume is negative: {value}")]
    NegativeVolume { value: f64 },

    /// An empty series where at least one candle is required
    #[error("candle series is empty")]
    Empty,

    /// Series timestamps must be strictly ascending
    #[error("candle series out of order at index {index}")]
    OutOfOrder { index: usize },

    /// Unknown interval string from configuration or the data source
    #[error("unrecognized interval: '{input}'")]
    UnknownInterval { input: String },
}
