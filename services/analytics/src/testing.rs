//! Testing utilities for the analytics engine
//!
//! A call-counting mock data source plus deterministic synthetic candle
//! generation, shared between unit and integration tests.

use crate::error::{AnalyticsError, Result};
use crate::provider::MarketDataSource;
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::time::Duration;
use types::{Candle, Interval};

/// Deterministic synthetic candle series: a seeded pseudo-random walk with
/// mild drift, suitable for exercising the full pipeline.
pub fn synthetic_candles(seed: u64, interval: Interval, n: usize) -> Vec<Candle> {
    let mut state = seed.wrapping_mul(0x9E37_79B9_7F4A_7C15).max(1);
    let mut next = move || {
        // xorshift64*
        state ^= state >> 12;
        state ^= state << 25;
        state ^= state >> 27;
        (state.wrapping_mul(0x2545_F491_4F6C_DD1D) >> 11) as f64 / (1u64 << 53) as f64
    };

    let mut price = 100.0 + (seed % 900) as f64;
    let start_ms = 1_700_000_000_000u64;
    let mut candles = Vec::with_capacity(n);
    for i in 0..n {
        let drift = 0.0005;
        let shock = (next() - 0.5) * 0.02;
        let open = price;
        price *= 1.0 + drift + shock;
        let close = price;
        let high = open.max(close) * (1.0 + next() * 0.004);
        let low = open.min(close) * (1.0 - next() * 0.004);
        let volume = 800.0 + next() * 600.0;
        candles.push(Candle::new(
            start_ms + i as u64 * interval.millis(),
            open,
            high,
            low,
            close,
            volume,
        ));
    }
    candles
}

/// Mock exchange data source with per-endpoint call counters.
pub struct MockDataSource {
    candle_calls: AtomicUsize,
    funding_calls: AtomicUsize,
    canned_candles: RwLock<HashMap<(String, Interval), Vec<Candle>>>,
    funding_rates: RwLock<HashMap<String, f64>>,
    failing_symbols: RwLock<HashSet<String>>,
    /// Artificial latency, to hold a suspension point open in races
    delay: RwLock<Option<Duration>>,
}

impl Default for MockDataSource {
    fn default() -> Self {
        Self::new()
    }
}

impl MockDataSource {
    pub fn new() -> Self {
        Self {
            candle_calls: AtomicUsize::new(0),
            funding_calls: AtomicUsize::new(0),
            canned_candles: RwLock::new(HashMap::new()),
            funding_rates: RwLock::new(HashMap::new()),
            failing_symbols: RwLock::new(HashSet::new()),
            delay: RwLock::new(None),
        }
    }

    /// Pin an exact candle series for a symbol/interval.
    pub fn set_candles(&self, symbol: &str, interval: Interval, candles: Vec<Candle>) {
        self.canned_candles
            .write()
            .insert((symbol.to_string(), interval), candles);
    }

    pub fn set_funding_rate(&self, symbol: &str, rate: f64) {
        self.funding_rates.write().insert(symbol.to_string(), rate);
    }

    /// Make every fetch for this symbol fail with an upstream error.
    pub fn set_failing(&self, symbol: &str) {
        self.failing_symbols.write().insert(symbol.to_string());
    }

    /// Heal a previously failing symbol.
    pub fn clear_failing(&self, symbol: &str) {
        self.failing_symbols.write().remove(symbol);
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.write() = Some(delay);
    }

    pub fn candle_calls(&self) -> usize {
        self.candle_calls.load(Ordering::SeqCst)
    }

    pub fn funding_calls(&self) -> usize {
        self.funding_calls.load(Ordering::SeqCst)
    }

    async fn apply_delay(&self) {
        let delay = *self.delay.read();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
    }

    fn check_failing(&self, symbol: &str) -> Result<()> {
        if self.failing_symbols.read().contains(symbol) {
            return Err(AnalyticsError::upstream(format!(
                "mock: fetch failed for {}",
                symbol
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl MarketDataSource for MockDataSource {
    async fn get_candles(
        &self,
        symbol: &str,
        interval: Interval,
        limit: usize,
    ) -> Result<Vec<Candle>> {
        self.candle_calls.fetch_add(1, Ordering::SeqCst);
        self.apply_delay().await;
        self.check_failing(symbol)?;

        if let Some(candles) = self
            .canned_candles
            .read()
            .get(&(symbol.to_string(), interval))
        {
            return Ok(candles.clone());
        }

        let seed = symbol.bytes().fold(7u64, |acc, b| acc.wrapping_mul(31).wrapping_add(b as u64));
        Ok(synthetic_candles(seed, interval, limit))
    }

    async fn get_funding_rate(&self, symbol: &str) -> Result<f64> {
        self.funding_calls.fetch_add(1, Ordering::SeqCst);
        self.apply_delay().await;
        self.check_failing(symbol)?;

        Ok(self
            .funding_rates
            .read()
            .get(symbol)
            .copied()
            .unwrap_or(0.0001))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_synthetic_candles_are_valid_and_deterministic() {
        let a = synthetic_candles(3, Interval::Hour1, 100);
        let b = synthetic_candles(3, Interval::Hour1, 100);
        assert_eq!(a.len(), 100);
        assert_eq!(a, b);
        types::validate_series(&a).unwrap();
    }

    #[tokio::test]
    async fn test_mock_counts_calls() {
        let mock = MockDataSource::new();
        mock.get_candles("BTC", Interval::Hour1, 50).await.unwrap();
        mock.get_candles("BTC", Interval::Hour1, 50).await.unwrap();
        mock.get_funding_rate("BTC").await.unwrap();
        assert_eq!(mock.candle_calls(), 2);
        assert_eq!(mock.funding_calls(), 1);
    }

    #[tokio::test]
    async fn test_mock_failure_injection() {
        let mock = MockDataSource::new();
        mock.set_failing("DOGE");
        let err = mock.get_candles("DOGE", Interval::Hour1, 50).await.unwrap_err();
        assert!(matches!(err, AnalyticsError::UpstreamData { .. }));
    }
}
