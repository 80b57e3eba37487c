//! Exchange data-source boundary
//!
//! The engine consumes candles and funding rates through this trait; it
//! never talks to an exchange directly. Implementations live with the wire
//! client, outside this crate.

use crate::error::Result;
use async_trait::async_trait;
use types::{Candle, Interval};

/// Read-only market-data access.
#[async_trait]
pub trait MarketDataSource: Send + Sync {
    /// Fetch up to `limit` candles, timestamp-ascending.
    async fn get_candles(&self, symbol: &str, interval: Interval, limit: usize)
        -> Result<Vec<Candle>>;

    /// Latest funding rate for a perpetual symbol, as a decimal fraction
    /// per settlement cycle.
    async fn get_funding_rate(&self, symbol: &str) -> Result<f64>;
}
