//! OHLCV candle primitives
//!
//! The engine never re-checks finiteness downstream: `Candle::validate` and
//! `validate_series` are the single boundary where untrusted exchange data
//! becomes trusted numeric input.

use crate::errors::MarketDataError;
use serde::{Deserialize, Serialize};

/// One OHLCV bar. Timestamps are Unix milliseconds (open time).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub timestamp_ms: u64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl Candle {
    pub fn new(timestamp_ms: u64, open: f64, high: f64, low: f64, close: f64, volume: f64) -> Self {
        Self {
            timestamp_ms,
            open,
            high,
            low,
            close,
            volume,
        }
    }

    /// Validate a single candle: finite fields, positive prices,
    /// `high >= low`, non-negative volume.
    pub fn validate(&self) -> Result<(), MarketDataError> {
        for (field, value) in [
            ("open", self.open),
            ("high", self.high),
            ("low", self.low),
            ("close", self.close),
            ("volume", self.volume),
        ] {
            if !value.is_finite() {
                return Err(MarketDataError::NotFinite { field, value });
            }
        }
        for (field, value) in [
            ("open", self.open),
            ("high", self.high),
            ("low", self.low),
            ("close", self.close),
        ] {
            if value <= 0.0 {
                return Err(MarketDataError::NonPositive { field, value });
            }
        }
        if self.high < self.low {
            return Err(MarketDataError::HighBelowLow {
                high: self.high,
                low: self.low,
            });
        }
        if self.volume < 0.0 {
            return Err(MarketDataError::NegativeVolume { value: self.volume });
        }
        Ok(())
    }

    /// Bar direction: close above open.
    pub fn is_bullish(&self) -> bool {
        self.close > self.open
    }
}

/// Validate a full series: every candle valid, timestamps strictly ascending.
pub fn validate_series(candles: &[Candle]) -> Result<(), MarketDataError> {
    if candles.is_empty() {
        return Err(MarketDataError::Empty);
    }
    for candle in candles {
        candle.validate()?;
    }
    for (i, window) in candles.windows(2).enumerate() {
        if window[1].timestamp_ms <= window[0].timestamp_ms {
            return Err(MarketDataError::OutOfOrder { index: i + 1 });
        }
    }
    Ok(())
}

/// Extract close prices.
pub fn closes(candles: &[Candle]) -> Vec<f64> {
    candles.iter().map(|c| c.close).collect()
}

/// Extract highs.
pub fn highs(candles: &[Candle]) -> Vec<f64> {
    candles.iter().map(|c| c.high).collect()
}

/// Extract lows.
pub fn lows(candles: &[Candle]) -> Vec<f64> {
    candles.iter().map(|c| c.low).collect()
}

/// Extract volumes.
pub fn volumes(candles: &[Candle]) -> Vec<f64> {
    candles.iter().map(|c| c.volume).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candle(high: f64, low: f64) -> Candle {
        Candle::new(1_700_000_000_000, (high + low) / 2.0, high, low, (high + low) / 2.0, 100.0)
    }

    #[test]
    fn test_valid_candle() {
        assert!(candle(105.0, 95.0).validate().is_ok());
    }

    #[test]
    fn test_high_below_low_rejected() {
        let err = candle(95.0, 105.0).validate().unwrap_err();
        assert!(matches!(err, MarketDataError::HighBelowLow { .. }));
    }

    #[test]
    fn test_nan_rejected() {
        let mut c = candle(105.0, 95.0);
        c.close = f64::NAN;
        let err = c.validate().unwrap_err();
        assert!(matches!(err, MarketDataError::NotFinite { field: "close", .. }));
    }

    #[test]
    fn test_zero_price_rejected() {
        let mut c = candle(105.0, 95.0);
        c.open = 0.0;
        assert!(matches!(
            c.validate().unwrap_err(),
            MarketDataError::NonPositive { field: "open", .. }
        ));
    }

    #[test]
    fn test_series_order_enforced() {
        let a = candle(105.0, 95.0);
        let mut b = candle(106.0, 96.0);
        b.timestamp_ms = a.timestamp_ms; // duplicate timestamp
        let err = validate_series(&[a, b]).unwrap_err();
        assert_eq!(err, MarketDataError::OutOfOrder { index: 1 });
    }

    #[test]
    fn test_empty_series_rejected() {
        assert_eq!(validate_series(&[]).unwrap_err(), MarketDataError::Empty);
    }
}
