//! Candle interval definitions

use crate::errors::MarketDataError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Supported candle intervals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Interval {
    #[serde(rename = "1m")]
    Min1,
    #[serde(rename = "5m")]
    Min5,
    #[serde(rename = "15m")]
    Min15,
    #[serde(rename = "1h")]
    Hour1,
    #[serde(rename = "4h")]
    Hour4,
    #[serde(rename = "1d")]
    Day1,
}

impl Interval {
    /// Duration of one bar in milliseconds.
    pub fn millis(&self) -> u64 {
        match self {
            Interval::Min1 => 60_000,
            Interval::Min5 => 300_000,
            Interval::Min15 => 900_000,
            Interval::Hour1 => 3_600_000,
            Interval::Hour4 => 14_400_000,
            Interval::Day1 => 86_400_000,
        }
    }

    /// Bars per year, the annualization factor for volatility.
    pub fn periods_per_year(&self) -> f64 {
        match self {
            Interval::Min1 => 525_600.0,
            Interval::Min5 => 105_120.0,
            Interval::Min15 => 35_040.0,
            Interval::Hour1 => 8_760.0,
            Interval::Hour4 => 2_190.0,
            Interval::Day1 => 365.0,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Interval::Min1 => "1m",
            Interval::Min5 => "5m",
            Interval::Min15 => "15m",
            Interval::Hour1 => "1h",
            Interval::Hour4 => "4h",
            Interval::Day1 => "1d",
        }
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Interval {
    type Err = MarketDataError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "1m" => Ok(Interval::Min1),
            "5m" => Ok(Interval::Min5),
            "15m" => Ok(Interval::Min15),
            "1h" => Ok(Interval::Hour1),
            "4h" => Ok(Interval::Hour4),
            "1d" => Ok(Interval::Day1),
            other => Err(MarketDataError::UnknownInterval {
                input: other.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip() {
        for interval in [
            Interval::Min1,
            Interval::Min5,
            Interval::Min15,
            Interval::Hour1,
            Interval::Hour4,
            Interval::Day1,
        ] {
            assert_eq!(interval.as_str().parse::<Interval>().unwrap(), interval);
        }
    }

    #[test]
    fn test_hourly_annualization() {
        assert_eq!(Interval::Hour1.periods_per_year(), 8_760.0);
    }

    #[test]
    fn test_unknown_interval() {
        assert!("3w".parse::<Interval>().is_err());
    }
}
