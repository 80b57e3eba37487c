//! Market-regime classification
//!
//! Threshold rules over an indicator snapshot; every call re-evaluates from
//! scratch. The only state is the bounded per-symbol history that supplies
//! regime duration. The transition-probability weights are tuned production
//! constants, preserved as-is.

use crate::config::RegimeConfig;
use crate::error::{AnalyticsError, Result};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};

/// Base confidence before alignment adjustments.
const CONFIDENCE_BASE: f64 = 70.0;
const CONFIDENCE_MIN: f64 = 30.0;
const CONFIDENCE_MAX: f64 = 95.0;

/// Base transition probability before risk adders.
const TRANSITION_BASE: f64 = 20.0;
/// A regime younger than this is still unconfirmed.
const YOUNG_REGIME_PERIODS: usize = 3;
/// A regime older than this is exhaustion-prone.
const OLD_REGIME_PERIODS: usize = 10;
const TRANSITION_YOUNG_ADD: f64 = 20.0;
const TRANSITION_OLD_ADD: f64 = 15.0;
const TRANSITION_EXPANDING_ADD: f64 = 15.0;
const TRANSITION_WEAK_TREND_ADD: f64 = 20.0;
const TRANSITION_MIN: f64 = 5.0;
const TRANSITION_MAX: f64 = 90.0;
/// Warning thresholds for the transition probability.
const WARNING_GATE: f64 = 50.0;
const WARNING_GATE_EXPANDING: f64 = 40.0;
/// Trend strength below this while trending counts as weakening.
const WEAK_TREND_STRENGTH: f64 = 40.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VolatilityRegime {
    Low,
    Normal,
    High,
    Extreme,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrendRegime {
    StrongBull,
    WeakBull,
    StrongBear,
    WeakBear,
    Ranging,
}

impl TrendRegime {
    pub fn is_ranging(&self) -> bool {
        matches!(self, TrendRegime::Ranging)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TrendRegime::StrongBull => "strong_bull",
            TrendRegime::WeakBull => "weak_bull",
            TrendRegime::StrongBear => "strong_bear",
            TrendRegime::WeakBear => "weak_bear",
            TrendRegime::Ranging => "ranging",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LiquidityRegime {
    Low,
    Normal,
    High,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OverallRegime {
    Trending,
    Ranging,
    Volatile,
    Quiet,
}

impl OverallRegime {
    pub fn as_str(&self) -> &'static str {
        match self {
            OverallRegime::Trending => "trending",
            OverallRegime::Ranging => "ranging",
            OverallRegime::Volatile => "volatile",
            OverallRegime::Quiet => "quiet",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradingDifficulty {
    Easy,
    Moderate,
    Hard,
    Extreme,
}

impl TradingDifficulty {
    pub fn as_str(&self) -> &'static str {
        match self {
            TradingDifficulty::Easy => "easy",
            TradingDifficulty::Moderate => "moderate",
            TradingDifficulty::Hard => "hard",
            TradingDifficulty::Extreme => "extreme",
        }
    }
}

/// Indicator snapshot feeding one classification call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegimeInputs {
    pub atr: f64,
    pub avg_atr: f64,
    pub atr_percentile: f64,
    pub adx: f64,
    pub plus_di: f64,
    pub minus_di: f64,
    pub ema_fast: f64,
    pub ema_mid: f64,
    pub ema_slow: f64,
    pub volume: f64,
    pub avg_volume: f64,
    pub bollinger_width: f64,
    pub volatility_expanding: bool,
}

impl RegimeInputs {
    fn validate(&self) -> Result<()> {
        for (field, value) in [
            ("atr", self.atr),
            ("avg_atr", self.avg_atr),
            ("atr_percentile", self.atr_percentile),
            ("adx", self.adx),
            ("plus_di", self.plus_di),
            ("minus_di", self.minus_di),
            ("ema_fast", self.ema_fast),
            ("ema_mid", self.ema_mid),
            ("ema_slow", self.ema_slow),
            ("volume", self.volume),
            ("avg_volume", self.avg_volume),
            ("bollinger_width", self.bollinger_width),
        ] {
            if !value.is_finite() {
                return Err(AnalyticsError::invalid_input(format!(
                    "regime inputs: {} is not finite ({})",
                    field, value
                )));
            }
        }
        Ok(())
    }

    fn ema_stacked_bull(&self) -> bool {
        self.ema_fast > self.ema_mid && self.ema_mid > self.ema_slow
    }

    fn ema_stacked_bear(&self) -> bool {
        self.ema_fast < self.ema_mid && self.ema_mid < self.ema_slow
    }

    fn ema_tangled(&self) -> bool {
        !self.ema_stacked_bull() && !self.ema_stacked_bear()
    }
}

/// Strategy guidance from the (difficulty, regime) lookup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategyGuidance {
    pub strategy: String,
    pub leverage_min: u32,
    pub leverage_max: u32,
    pub stop_multiplier: f64,
}

/// Full classification result for one symbol.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegimeState {
    pub volatility: VolatilityRegime,
    pub trend: TrendRegime,
    pub trend_strength: f64,
    pub liquidity: LiquidityRegime,
    pub overall: OverallRegime,
    pub difficulty: TradingDifficulty,
    pub guidance: StrategyGuidance,
    /// Confidence that the classification is correct (30-95)
    pub regime_confidence: f64,
    /// Probability the regime flips soon (5-90)
    pub transition_probability: f64,
    /// Consecutive history entries in the current overall regime
    pub duration: usize,
    pub warning: Option<String>,
}

#[derive(Debug, Clone, Copy)]
struct HistoryEntry {
    regime: OverallRegime,
    timestamp_ms: u64,
}

#[derive(Debug, Default)]
struct SymbolHistory {
    entries: VecDeque<HistoryEntry>,
    last_updated_ms: u64,
}

/// Bounded per-symbol regime history: ring of `max_entries` per symbol,
/// `max_symbols` symbols with oldest-updated eviction, age-based pruning by
/// the periodic sweep.
pub struct RegimeHistory {
    inner: RwLock<HashMap<String, SymbolHistory>>,
    max_entries: usize,
    max_symbols: usize,
    max_age_ms: u64,
}

impl RegimeHistory {
    pub fn new(max_entries: usize, max_symbols: usize, max_age_ms: u64) -> Self {
        Self {
            inner: RwLock::new(HashMap::new()),
            max_entries,
            max_symbols,
            max_age_ms,
        }
    }

    /// Append an observation and return the current regime duration
    /// (consecutive trailing entries in `regime`, including this one).
    pub fn record(&self, symbol: &str, regime: OverallRegime, now_ms: u64) -> usize {
        let mut map = self.inner.write();

        if !map.contains_key(symbol) && map.len() >= self.max_symbols {
            // Evict the symbol that has gone longest without an update.
            if let Some(oldest) = map
                .iter()
                .min_by_key(|(_, h)| h.last_updated_ms)
                .map(|(s, _)| s.clone())
            {
                tracing::debug!(symbol = %oldest, "regime history symbol cap hit, evicting");
                map.remove(&oldest);
            }
        }

        let history = map.entry(symbol.to_string()).or_default();
        history.entries.push_back(HistoryEntry {
            regime,
            timestamp_ms: now_ms,
        });
        while history.entries.len() > self.max_entries {
            history.entries.pop_front();
        }
        history.last_updated_ms = now_ms;

        history
            .entries
            .iter()
            .rev()
            .take_while(|e| e.regime == regime)
            .count()
    }

    /// Drop entries older than the configured age; idempotent.
    pub fn prune(&self, now_ms: u64) {
        let cutoff = now_ms.saturating_sub(self.max_age_ms);
        let mut map = self.inner.write();
        for history in map.values_mut() {
            while history
                .entries
                .front()
                .is_some_and(|e| e.timestamp_ms < cutoff)
            {
                history.entries.pop_front();
            }
        }
        map.retain(|_, history| !history.entries.is_empty());
    }

    pub fn symbol_count(&self) -> usize {
        self.inner.read().len()
    }

    pub fn entry_count(&self, symbol: &str) -> usize {
        self.inner
            .read()
            .get(symbol)
            .map(|h| h.entries.len())
            .unwrap_or(0)
    }

    pub fn tracked_symbols(&self) -> Vec<String> {
        self.inner.read().keys().cloned().collect()
    }
}

/// Threshold-rule regime classifier with bounded history.
pub struct RegimeDetector {
    config: RegimeConfig,
    history: RegimeHistory,
}

impl RegimeDetector {
    pub fn new(config: RegimeConfig) -> Self {
        let history = RegimeHistory::new(
            config.max_history_per_symbol,
            config.max_symbols,
            config.history_max_age_secs * 1000,
        );
        Self { config, history }
    }

    pub fn history(&self) -> &RegimeHistory {
        &self.history
    }

    /// Classify one symbol from an indicator snapshot.
    pub fn classify(&self, symbol: &str, inputs: &RegimeInputs, now_ms: u64) -> Result<RegimeState> {
        inputs.validate()?;

        let volatility = self.classify_volatility(inputs);
        let (trend, trend_strength) = self.classify_trend(inputs);
        let liquidity = self.classify_liquidity(inputs);
        let overall = self.classify_overall(volatility, trend, trend_strength, liquidity, inputs);
        let difficulty = self.classify_difficulty(volatility, overall, trend_strength, inputs);
        let guidance = guidance_for(difficulty, overall);

        let duration = self.history.record(symbol, overall, now_ms);

        let regime_confidence = alignment_confidence(inputs, volatility, trend, overall);
        let transition_probability =
            transition_probability(duration, trend_strength, overall, inputs);

        let warning = if transition_probability >= WARNING_GATE
            || (transition_probability >= WARNING_GATE_EXPANDING && inputs.volatility_expanding)
        {
            Some(format!(
                "elevated transition risk: {:.0}% out of {} regime after {} periods",
                transition_probability,
                overall.as_str(),
                duration
            ))
        } else {
            None
        };

        if warning.is_some() {
            tracing::warn!(
                symbol,
                regime = overall.as_str(),
                probability = transition_probability,
                "regime transition risk"
            );
        }

        Ok(RegimeState {
            volatility,
            trend,
            trend_strength,
            liquidity,
            overall,
            difficulty,
            guidance,
            regime_confidence,
            transition_probability,
            duration,
            warning,
        })
    }

    /// Age-based sweep of the history store; idempotent.
    pub fn prune(&self, now_ms: u64) {
        self.history.prune(now_ms);
    }

    fn classify_volatility(&self, inputs: &RegimeInputs) -> VolatilityRegime {
        let ratio = if inputs.avg_atr > 0.0 {
            inputs.atr / inputs.avg_atr
        } else {
            1.0
        };
        let pct = inputs.atr_percentile;
        let c = &self.config;

        if pct >= c.vol_extreme_percentile || ratio >= c.vol_extreme_ratio {
            VolatilityRegime::Extreme
        } else if pct >= c.vol_high_percentile || ratio >= c.vol_high_ratio {
            VolatilityRegime::High
        } else if pct <= c.vol_low_percentile || ratio <= c.vol_low_ratio {
            VolatilityRegime::Low
        } else {
            VolatilityRegime::Normal
        }
    }

    fn classify_trend(&self, inputs: &RegimeInputs) -> (TrendRegime, f64) {
        let c = &self.config;
        if inputs.adx < c.adx_trend_gate {
            return (TrendRegime::Ranging, (50.0 - inputs.adx).max(0.0));
        }

        if inputs.plus_di > inputs.minus_di {
            if inputs.adx >= c.adx_strong_gate && inputs.ema_stacked_bull() {
                (TrendRegime::StrongBull, (inputs.adx + 20.0).min(100.0))
            } else {
                (TrendRegime::WeakBull, inputs.adx.min(80.0))
            }
        } else if inputs.adx >= c.adx_strong_gate && inputs.ema_stacked_bear() {
            (TrendRegime::StrongBear, (inputs.adx + 20.0).min(100.0))
        } else {
            (TrendRegime::WeakBear, inputs.adx.min(80.0))
        }
    }

    fn classify_liquidity(&self, inputs: &RegimeInputs) -> LiquidityRegime {
        let ratio = if inputs.avg_volume > 0.0 {
            inputs.volume / inputs.avg_volume
        } else {
            1.0
        };
        if ratio >= self.config.liquidity_high_ratio {
            LiquidityRegime::High
        } else if ratio <= self.config.liquidity_low_ratio {
            LiquidityRegime::Low
        } else {
            LiquidityRegime::Normal
        }
    }

    fn classify_overall(
        &self,
        volatility: VolatilityRegime,
        trend: TrendRegime,
        trend_strength: f64,
        liquidity: LiquidityRegime,
        inputs: &RegimeInputs,
    ) -> OverallRegime {
        if volatility == VolatilityRegime::Extreme
            || (volatility == VolatilityRegime::High && inputs.volatility_expanding)
        {
            return OverallRegime::Volatile;
        }
        if !trend.is_ranging() && trend_strength >= 50.0 {
            return OverallRegime::Trending;
        }
        if (volatility == VolatilityRegime::Low && liquidity == LiquidityRegime::Low)
            || inputs.bollinger_width < self.config.quiet_band_width
        {
            return OverallRegime::Quiet;
        }
        OverallRegime::Ranging
    }

    fn classify_difficulty(
        &self,
        volatility: VolatilityRegime,
        overall: OverallRegime,
        trend_strength: f64,
        inputs: &RegimeInputs,
    ) -> TradingDifficulty {
        if volatility == VolatilityRegime::Extreme
            || (volatility == VolatilityRegime::High && inputs.ema_tangled())
        {
            return TradingDifficulty::Extreme;
        }
        if volatility == VolatilityRegime::High
            || (overall == OverallRegime::Ranging && inputs.volatility_expanding)
        {
            return TradingDifficulty::Hard;
        }
        if overall == OverallRegime::Trending
            && volatility == VolatilityRegime::Normal
            && trend_strength >= 60.0
        {
            return TradingDifficulty::Easy;
        }
        TradingDifficulty::Moderate
    }
}

/// Fixed (difficulty, regime) lookup for strategy, leverage band and stop
/// multiplier.
fn guidance_for(difficulty: TradingDifficulty, regime: OverallRegime) -> StrategyGuidance {
    use OverallRegime::*;
    use TradingDifficulty::*;

    let (strategy, leverage_min, leverage_max, stop_multiplier) = match (difficulty, regime) {
        (Easy, Trending) => ("trend_following", 3, 5, 1.0),
        (Easy, Ranging) => ("range_scalping", 2, 4, 0.8),
        (Easy, Volatile) => ("breakout_momentum", 2, 3, 1.2),
        (Easy, Quiet) => ("patient_accumulation", 2, 4, 0.8),
        (Moderate, Trending) => ("trend_following_reduced", 2, 4, 1.2),
        (Moderate, Ranging) => ("mean_reversion", 2, 3, 1.0),
        (Moderate, Volatile) => ("momentum_reduced_size", 1, 2, 1.5),
        (Moderate, Quiet) => ("await_breakout", 1, 3, 1.0),
        (Hard, Trending) => ("pullback_entries_only", 1, 3, 1.5),
        (Hard, Ranging) => ("fade_extremes_small", 1, 2, 1.5),
        (Hard, Volatile) => ("defensive_scalping", 1, 2, 2.0),
        (Hard, Quiet) => ("stand_aside", 1, 1, 1.5),
        (Extreme, Volatile) => ("no_new_positions", 1, 1, 3.0),
        (Extreme, _) => ("capital_preservation", 1, 1, 2.5),
    };

    StrategyGuidance {
        strategy: strategy.to_string(),
        leverage_min,
        leverage_max,
        stop_multiplier,
    }
}

/// Confidence in the classification from indicator agreement, clamped to
/// [30, 95].
fn alignment_confidence(
    inputs: &RegimeInputs,
    volatility: VolatilityRegime,
    trend: TrendRegime,
    overall: OverallRegime,
) -> f64 {
    let mut confidence = CONFIDENCE_BASE;

    // DI direction and EMA ladder telling the same story.
    let di_bull = inputs.plus_di > inputs.minus_di;
    if (di_bull && inputs.ema_stacked_bull()) || (!di_bull && inputs.ema_stacked_bear()) {
        confidence += 10.0;
    } else if inputs.ema_tangled() {
        confidence -= 5.0;
    }

    // A trending verdict backed by a strong trend label.
    if overall == OverallRegime::Trending
        && matches!(trend, TrendRegime::StrongBull | TrendRegime::StrongBear)
    {
        confidence += 5.0;
    }

    // Expanding volatility undermines a calm classification.
    if inputs.volatility_expanding
        && matches!(volatility, VolatilityRegime::Low | VolatilityRegime::Normal)
    {
        confidence -= 10.0;
    }

    // Near-tied directional indicators blur everything.
    if (inputs.plus_di - inputs.minus_di).abs() < 5.0 && !trend.is_ranging() {
        confidence -= 5.0;
    }

    confidence.clamp(CONFIDENCE_MIN, CONFIDENCE_MAX)
}

/// Transition probability from duration, strength and volatility structure,
/// clamped to [5, 90].
fn transition_probability(
    duration: usize,
    trend_strength: f64,
    overall: OverallRegime,
    inputs: &RegimeInputs,
) -> f64 {
    let mut probability = TRANSITION_BASE;

    if duration < YOUNG_REGIME_PERIODS {
        probability += TRANSITION_YOUNG_ADD;
    }
    if duration > OLD_REGIME_PERIODS {
        probability += TRANSITION_OLD_ADD;
    }
    if inputs.volatility_expanding && overall != OverallRegime::Volatile {
        probability += TRANSITION_EXPANDING_ADD;
    }
    if overall == OverallRegime::Trending && trend_strength < WEAK_TREND_STRENGTH {
        probability += TRANSITION_WEAK_TREND_ADD;
    }

    probability.clamp(TRANSITION_MIN, TRANSITION_MAX)
}
