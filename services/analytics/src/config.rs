//! Engine configuration
//!
//! All parameters are validated once at engine construction; invalid values
//! fail construction with `AnalyticsError::Configuration` instead of
//! propagating NaN through the numeric pipeline.

use crate::error::{AnalyticsError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use types::Interval;

/// Complete configuration for the analytics engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Symbol universe to analyze (e.g. "BTC", "ETH"). First entry is the
    /// reference symbol for cross-asset correlation.
    pub symbols: Vec<String>,

    /// Primary candle interval for the analysis window
    pub interval: Interval,

    /// Secondary, slower interval used for regime context
    pub long_interval: Interval,

    /// Number of candles pulled per analysis window
    pub candle_limit: usize,

    /// Cache tuning
    pub cache: CacheConfig,

    /// Monte Carlo simulation parameters
    pub monte_carlo: MonteCarloConfig,

    /// Regime classification thresholds
    pub regime: RegimeConfig,

    /// Funding-rate tracker parameters
    pub funding: FundingConfig,
}

/// TTL and capacity settings for the coalescing caches.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// TTL for candle-window / indicator results (seconds)
    pub indicator_ttl_secs: u64,
    /// TTL for the assembled per-symbol quant context (seconds)
    pub context_ttl_secs: u64,
    /// TTL for long-timeframe indicator results (seconds)
    pub long_interval_ttl_secs: u64,
    /// Maximum entries per cache before LRU eviction
    pub max_entries: usize,
    /// Background sweep period for expired entries (seconds)
    pub sweep_interval_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            indicator_ttl_secs: 60,
            context_ttl_secs: 300,
            long_interval_ttl_secs: 900,
            max_entries: 100,
            sweep_interval_secs: 60,
        }
    }
}

impl CacheConfig {
    pub fn indicator_ttl(&self) -> Duration {
        Duration::from_secs(self.indicator_ttl_secs)
    }

    pub fn context_ttl(&self) -> Duration {
        Duration::from_secs(self.context_ttl_secs)
    }

    pub fn long_interval_ttl(&self) -> Duration {
        Duration::from_secs(self.long_interval_ttl_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

/// Monte Carlo simulation parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonteCarloConfig {
    /// Number of simulated paths (clamped to [100, 1000] at run time)
    pub simulations: usize,
    /// Horizon in hourly steps (clamped to [1, 48] at run time)
    pub horizon_steps: usize,
    /// Student's-t degrees of freedom for the shock distribution
    pub degrees_of_freedom: u32,
    /// GARCH(1,1) ARCH coefficient
    pub garch_alpha: f64,
    /// GARCH(1,1) persistence coefficient
    pub garch_beta: f64,
    /// One-way trading cost in percent (applied twice per round trip)
    pub fee_pct: f64,
}

impl Default for MonteCarloConfig {
    fn default() -> Self {
        Self {
            simulations: 500,
            horizon_steps: 24,
            degrees_of_freedom: 3,
            garch_alpha: 0.1,
            garch_beta: 0.85,
            fee_pct: 0.06,
        }
    }
}

/// Regime classification thresholds. The default values are the tuned
/// production constants; they are configurable but not re-derived.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegimeConfig {
    /// ATR percentile / ratio gates for the volatility sub-regime
    pub vol_extreme_percentile: f64,
    pub vol_extreme_ratio: f64,
    pub vol_high_percentile: f64,
    pub vol_high_ratio: f64,
    pub vol_low_percentile: f64,
    pub vol_low_ratio: f64,
    /// Minimum ADX for any non-ranging trend label
    pub adx_trend_gate: f64,
    /// ADX for the strong trend label (with a stacked EMA ladder)
    pub adx_strong_gate: f64,
    /// Volume ratio gates for the liquidity sub-regime
    pub liquidity_high_ratio: f64,
    pub liquidity_low_ratio: f64,
    /// Bollinger width below which the market counts as quiet
    pub quiet_band_width: f64,
    /// History bounds
    pub max_history_per_symbol: usize,
    pub max_symbols: usize,
    /// Entries older than this are purged by the sweep (seconds)
    pub history_max_age_secs: u64,
}

impl Default for RegimeConfig {
    fn default() -> Self {
        Self {
            vol_extreme_percentile: 90.0,
            vol_extreme_ratio: 2.0,
            vol_high_percentile: 70.0,
            vol_high_ratio: 1.5,
            vol_low_percentile: 20.0,
            vol_low_ratio: 0.5,
            adx_trend_gate: 25.0,
            adx_strong_gate: 40.0,
            liquidity_high_ratio: 1.5,
            liquidity_low_ratio: 0.5,
            quiet_band_width: 0.02,
            max_history_per_symbol: 20,
            max_symbols: 50,
            history_max_age_secs: 24 * 3600,
        }
    }
}

/// Funding-rate tracker parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FundingConfig {
    /// Rolling window length (21 ≈ 7 days at 3 settlements/day)
    pub max_entries_per_symbol: usize,
    pub max_symbols: usize,
    /// Observations within this window update the latest entry in place
    pub dedup_window_secs: u64,
    /// Entries older than this are purged by the sweep (seconds)
    pub history_max_age_secs: u64,
}

impl Default for FundingConfig {
    fn default() -> Self {
        Self {
            max_entries_per_symbol: 21,
            max_symbols: 50,
            dedup_window_secs: 4 * 3600,
            history_max_age_secs: 7 * 24 * 3600,
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            symbols: vec![
                "BTC".to_string(),
                "ETH".to_string(),
                "SOL".to_string(),
            ],
            interval: Interval::Hour1,
            long_interval: Interval::Hour4,
            candle_limit: 100,
            cache: CacheConfig::default(),
            monte_carlo: MonteCarloConfig::default(),
            regime: RegimeConfig::default(),
            funding: FundingConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Load configuration from a TOML file.
    pub fn from_toml(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            AnalyticsError::configuration(format!("failed to read config file: {}", e))
        })?;
        let config: Self = toml::from_str(&content).map_err(|e| {
            AnalyticsError::configuration(format!("failed to parse config file: {}", e))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Validate all parameters. Called once at engine construction.
    pub fn validate(&self) -> Result<()> {
        if self.symbols.is_empty() {
            return Err(AnalyticsError::configuration("symbol universe is empty"));
        }
        if self.symbols.len() > 10 {
            return Err(AnalyticsError::configuration(format!(
                "symbol universe too large: {} (max 10)",
                self.symbols.len()
            )));
        }
        // The slow EMA needs 50 bars and the MACD signal chain 35; anything
        // under 60 starves the indicator warm-up.
        if self.candle_limit < 60 {
            return Err(AnalyticsError::configuration(format!(
                "candle_limit {} too small for indicator warm-up (min 60)",
                self.candle_limit
            )));
        }
        if self.cache.max_entries == 0 {
            return Err(AnalyticsError::configuration("cache max_entries must be > 0"));
        }
        if self.cache.sweep_interval_secs == 0 {
            return Err(AnalyticsError::configuration(
                "cache sweep_interval_secs must be > 0",
            ));
        }

        let mc = &self.monte_carlo;
        for (name, value) in [
            ("garch_alpha", mc.garch_alpha),
            ("garch_beta", mc.garch_beta),
            ("fee_pct", mc.fee_pct),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(AnalyticsError::configuration(format!(
                    "monte_carlo.{} must be finite and non-negative, got {}",
                    name, value
                )));
            }
        }
        if mc.garch_alpha + mc.garch_beta >= 1.0 {
            return Err(AnalyticsError::configuration(format!(
                "GARCH stationarity requires alpha + beta < 1, got {}",
                mc.garch_alpha + mc.garch_beta
            )));
        }
        if mc.degrees_of_freedom == 0 {
            return Err(AnalyticsError::configuration(
                "monte_carlo.degrees_of_freedom must be >= 1",
            ));
        }

        let r = &self.regime;
        for (name, value) in [
            ("vol_extreme_percentile", r.vol_extreme_percentile),
            ("vol_extreme_ratio", r.vol_extreme_ratio),
            ("vol_high_percentile", r.vol_high_percentile),
            ("vol_high_ratio", r.vol_high_ratio),
            ("vol_low_percentile", r.vol_low_percentile),
            ("vol_low_ratio", r.vol_low_ratio),
            ("adx_trend_gate", r.adx_trend_gate),
            ("adx_strong_gate", r.adx_strong_gate),
            ("liquidity_high_ratio", r.liquidity_high_ratio),
            ("liquidity_low_ratio", r.liquidity_low_ratio),
            ("quiet_band_width", r.quiet_band_width),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(AnalyticsError::configuration(format!(
                    "regime.{} must be finite and non-negative, got {}",
                    name, value
                )));
            }
        }
        if r.max_history_per_symbol == 0 || r.max_symbols == 0 {
            return Err(AnalyticsError::configuration(
                "regime history bounds must be > 0",
            ));
        }

        let f = &self.funding;
        if f.max_entries_per_symbol == 0 || f.max_symbols == 0 {
            return Err(AnalyticsError::configuration(
                "funding history bounds must be > 0",
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(EngineConfig::default().validate().is_ok());
    }

    #[test]
    fn test_empty_universe_rejected() {
        let config = EngineConfig {
            symbols: vec![],
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_nonstationary_garch_rejected() {
        let mut config = EngineConfig::default();
        config.monte_carlo.garch_alpha = 0.3;
        config.monte_carlo.garch_beta = 0.8;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("stationarity"));
    }

    #[test]
    fn test_oversized_universe_rejected() {
        let config = EngineConfig {
            symbols: (0..11).map(|i| format!("SYM{}", i)).collect(),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
