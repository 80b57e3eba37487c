//! Price-structure analysis: trend, support/resistance, volume, patterns
//!
//! Highs/lows/volumes are taken from the same validated candle window as the
//! closes, so indices never desynchronize across the arrays.

use crate::error::{AnalyticsError, Result};
use crate::stats;
use serde::{Deserialize, Serialize};
use types::Candle;

/// Bars on each side of a pivot candidate.
const PIVOT_WING: usize = 2;
/// Levels within this percentage of each other merge into one.
const CLUSTER_TOLERANCE_PCT: f64 = 0.5;
/// Strength contributed by each touch of a level.
const TOUCH_STRENGTH: f64 = 25.0;
/// Price within this percentage of a level counts as testing it.
const LEVEL_TEST_TOLERANCE_PCT: f64 = 0.5;
/// Pivot extremes within this percentage of the window extreme qualify for
/// double-top/bottom detection.
const DOUBLE_EXTREME_TOLERANCE_PCT: f64 = 1.0;
const DOUBLE_MIN_GAP: usize = 5;
const DOUBLE_MAX_GAP: usize = 25;
/// Per-bar normalized slope beyond which a trend is directional (0.1%).
const TREND_SLOPE_GATE: f64 = 0.001;
const CONSOLIDATION_WINDOW: usize = 10;
const CONSOLIDATION_RATIO: f64 = 0.5;
const DIVERGENCE_PRICE_PCT: f64 = 2.0;
const DIVERGENCE_VOLUME_RATIO: f64 = 0.8;
const VOLUME_WINDOW: usize = 10;
const VOLUME_SCORE_GATE: i32 = 2;
const VOLUME_ANOMALY_RATIO: f64 = 2.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrendDirection {
    Up,
    Down,
    Sideways,
}

impl TrendDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            TrendDirection::Up => "up",
            TrendDirection::Down => "down",
            TrendDirection::Sideways => "sideways",
        }
    }
}

/// OLS trend over the window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrendAnalysis {
    pub direction: TrendDirection,
    /// R-squared of the regression scaled to 0-100
    pub strength: f64,
    /// Regression slope normalized by the mean price, per bar
    pub slope_pct: f64,
    /// Consecutive trailing candles moving with the trend
    pub duration: usize,
}

/// A clustered support/resistance level.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PriceLevel {
    pub price: f64,
    pub touches: usize,
    /// `min(100, touches * 25)`
    pub strength: f64,
}

/// Nearest levels on each side of the current price.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupportResistance {
    pub support: Option<PriceLevel>,
    pub resistance: Option<PriceLevel>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VolumeProfile {
    Accumulation,
    Distribution,
    Neutral,
}

impl VolumeProfile {
    pub fn as_str(&self) -> &'static str {
        match self {
            VolumeProfile::Accumulation => "accumulation",
            VolumeProfile::Distribution => "distribution",
            VolumeProfile::Neutral => "neutral",
        }
    }
}

/// Volume structure over the recent window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VolumeAnalysis {
    pub profile: VolumeProfile,
    pub score: i32,
    /// Recent volume more than twice the trailing average
    pub anomaly: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatternTag {
    DoubleTop,
    DoubleBottom,
    ResistanceTest,
    SupportTest,
    Consolidation,
    BullishDivergence,
    BearishDivergence,
}

impl PatternTag {
    pub fn as_str(&self) -> &'static str {
        match self {
            PatternTag::DoubleTop => "double_top",
            PatternTag::DoubleBottom => "double_bottom",
            PatternTag::ResistanceTest => "resistance_test",
            PatternTag::SupportTest => "support_test",
            PatternTag::Consolidation => "consolidation",
            PatternTag::BullishDivergence => "bullish_divergence",
            PatternTag::BearishDivergence => "bearish_divergence",
        }
    }
}

/// Everything the pattern analyzer produces for one window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatternFindings {
    pub trend: TrendAnalysis,
    pub levels: SupportResistance,
    pub volume: VolumeAnalysis,
    pub patterns: Vec<PatternTag>,
}

impl PatternFindings {
    pub fn compute(candles: &[Candle]) -> Result<Self> {
        if candles.len() < 30 {
            return Err(AnalyticsError::invalid_input(format!(
                "pattern analysis: need at least 30 candles, got {}",
                candles.len()
            )));
        }
        let closes = types::closes(candles);
        let trend = analyze_trend(&closes);
        let levels = support_resistance(candles);
        let volume = volume_profile(candles);
        let patterns = detect_patterns(candles, &levels);
        Ok(Self {
            trend,
            levels,
            volume,
            patterns,
        })
    }
}

/// Ordinary least squares over (index, value); returns (slope, r_squared).
pub fn linear_regression(values: &[f64]) -> (f64, f64) {
    let n = values.len() as f64;
    if values.len() < 2 {
        return (0.0, 0.0);
    }
    let x_mean = (n - 1.0) / 2.0;
    let y_mean = stats::mean(values);

    let mut num = 0.0;
    let mut den = 0.0;
    for (i, &y) in values.iter().enumerate() {
        let dx = i as f64 - x_mean;
        num += dx * (y - y_mean);
        den += dx * dx;
    }
    if den == 0.0 {
        return (0.0, 0.0);
    }
    let slope = num / den;

    let ss_tot: f64 = values.iter().map(|&y| (y - y_mean).powi(2)).sum();
    if ss_tot == 0.0 {
        return (slope, 0.0);
    }
    let ss_res: f64 = values
        .iter()
        .enumerate()
        .map(|(i, &y)| {
            let fitted = y_mean + slope * (i as f64 - x_mean);
            (y - fitted).powi(2)
        })
        .sum();
    (slope, (1.0 - ss_res / ss_tot).clamp(0.0, 1.0))
}

/// Trend via OLS; slope is normalized by the mean price so the ±0.1%
/// per-bar gate is scale-free.
pub fn analyze_trend(closes: &[f64]) -> TrendAnalysis {
    let (slope, r_squared) = linear_regression(closes);
    let mean_price = stats::mean(closes);
    let slope_norm = if mean_price.abs() < 1e-9 {
        0.0
    } else {
        slope / mean_price
    };

    let direction = if slope_norm > TREND_SLOPE_GATE {
        TrendDirection::Up
    } else if slope_norm < -TREND_SLOPE_GATE {
        TrendDirection::Down
    } else {
        TrendDirection::Sideways
    };

    let duration = match direction {
        TrendDirection::Sideways => 0,
        _ => {
            let mut count = 0;
            for w in closes.windows(2).rev() {
                let delta = w[1] - w[0];
                let with_trend = match direction {
                    TrendDirection::Up => delta > 0.0,
                    TrendDirection::Down => delta < 0.0,
                    TrendDirection::Sideways => false,
                };
                if with_trend {
                    count += 1;
                } else {
                    break;
                }
            }
            count
        }
    };

    TrendAnalysis {
        direction,
        strength: r_squared * 100.0,
        slope_pct: slope_norm * 100.0,
        duration,
    }
}

/// Local extremes with a ±2-bar wing: returns (pivot highs, pivot lows) as
/// (index, price) pairs.
fn find_pivots(candles: &[Candle]) -> (Vec<(usize, f64)>, Vec<(usize, f64)>) {
    let mut pivot_highs = Vec::new();
    let mut pivot_lows = Vec::new();
    if candles.len() < 2 * PIVOT_WING + 1 {
        return (pivot_highs, pivot_lows);
    }
    for i in PIVOT_WING..candles.len() - PIVOT_WING {
        let high = candles[i].high;
        let low = candles[i].low;
        let mut is_high = true;
        let mut is_low = true;
        for j in i - PIVOT_WING..=i + PIVOT_WING {
            if j == i {
                continue;
            }
            if candles[j].high >= high {
                is_high = false;
            }
            if candles[j].low <= low {
                is_low = false;
            }
        }
        if is_high {
            pivot_highs.push((i, high));
        }
        if is_low {
            pivot_lows.push((i, low));
        }
    }
    (pivot_highs, pivot_lows)
}

/// Merge sorted level prices lying within `CLUSTER_TOLERANCE_PCT` of each
/// other into single touch-counted levels.
fn cluster_levels(mut prices: Vec<f64>) -> Vec<PriceLevel> {
    if prices.is_empty() {
        return Vec::new();
    }
    prices.sort_by(|a, b| a.partial_cmp(b).expect("finite by boundary validation"));

    let mut clusters: Vec<Vec<f64>> = vec![vec![prices[0]]];
    for &price in &prices[1..] {
        let current = clusters.last_mut().expect("seeded above");
        let anchor = current[0];
        if (price - anchor) / anchor * 100.0 <= CLUSTER_TOLERANCE_PCT {
            current.push(price);
        } else {
            clusters.push(vec![price]);
        }
    }

    clusters
        .into_iter()
        .map(|members| {
            let touches = members.len();
            PriceLevel {
                price: stats::mean(&members),
                touches,
                strength: (touches as f64 * TOUCH_STRENGTH).min(100.0),
            }
        })
        .collect()
}

/// Nearest clustered pivot level below and above the current price.
pub fn support_resistance(candles: &[Candle]) -> SupportResistance {
    let (pivot_highs, pivot_lows) = find_pivots(candles);
    let mut levels: Vec<f64> = pivot_highs.iter().map(|&(_, p)| p).collect();
    levels.extend(pivot_lows.iter().map(|&(_, p)| p));
    let clustered = cluster_levels(levels);

    let current = candles.last().map(|c| c.close).unwrap_or(0.0);
    let support = clustered
        .iter()
        .filter(|level| level.price < current)
        .max_by(|a, b| a.price.partial_cmp(&b.price).expect("finite"))
        .copied();
    let resistance = clustered
        .iter()
        .filter(|level| level.price > current)
        .min_by(|a, b| a.price.partial_cmp(&b.price).expect("finite"))
        .copied();

    SupportResistance {
        support,
        resistance,
    }
}

/// Accumulation/distribution over the last 10 candles.
///
/// An up-move on above-average volume or a down-move on below-average volume
/// reads as accumulation; the reverse as distribution.
pub fn volume_profile(candles: &[Candle]) -> VolumeAnalysis {
    let volumes = types::volumes(candles);
    let avg_volume = stats::mean(&volumes);

    let window_start = candles.len().saturating_sub(VOLUME_WINDOW);
    let mut score = 0;
    for candle in &candles[window_start..] {
        let above_average = candle.volume > avg_volume;
        let up_move = candle.is_bullish();
        let down_move = candle.close < candle.open;
        if (up_move && above_average) || (down_move && !above_average) {
            score += 1;
        } else if (down_move && above_average) || (up_move && !above_average) {
            score -= 1;
        }
    }

    let profile = if score >= VOLUME_SCORE_GATE {
        VolumeProfile::Accumulation
    } else if score <= -VOLUME_SCORE_GATE {
        VolumeProfile::Distribution
    } else {
        VolumeProfile::Neutral
    };

    let anomaly = if candles.len() > 5 {
        let recent = stats::mean(&volumes[volumes.len() - 5..]);
        let trailing = stats::mean(&volumes[..volumes.len() - 5]);
        trailing > 0.0 && recent > VOLUME_ANOMALY_RATIO * trailing
    } else {
        false
    };

    VolumeAnalysis {
        profile,
        score,
        anomaly,
    }
}

/// Chart-pattern tags for the window.
pub fn detect_patterns(candles: &[Candle], levels: &SupportResistance) -> Vec<PatternTag> {
    let mut tags = Vec::new();
    let (pivot_highs, pivot_lows) = find_pivots(candles);
    let current = candles.last().map(|c| c.close).unwrap_or(0.0);

    // Double top: two pivot highs within 1% of the window maximum, 5-25
    // bars apart.
    let window_max = candles.iter().map(|c| c.high).fold(f64::NEG_INFINITY, f64::max);
    if has_double_extreme(&pivot_highs, window_max) {
        tags.push(PatternTag::DoubleTop);
    }
    let window_min = candles.iter().map(|c| c.low).fold(f64::INFINITY, f64::min);
    if has_double_extreme(&pivot_lows, window_min) {
        tags.push(PatternTag::DoubleBottom);
    }

    // Level tests: price within 0.5% of the nearest level.
    if let Some(resistance) = &levels.resistance {
        if (resistance.price - current).abs() / current * 100.0 <= LEVEL_TEST_TOLERANCE_PCT {
            tags.push(PatternTag::ResistanceTest);
        }
    }
    if let Some(support) = &levels.support {
        if (current - support.price).abs() / current * 100.0 <= LEVEL_TEST_TOLERANCE_PCT {
            tags.push(PatternTag::SupportTest);
        }
    }

    // Consolidation: recent 10-bar range under half of the prior 10-bar range.
    if candles.len() >= 2 * CONSOLIDATION_WINDOW {
        let recent = &candles[candles.len() - CONSOLIDATION_WINDOW..];
        let prior =
            &candles[candles.len() - 2 * CONSOLIDATION_WINDOW..candles.len() - CONSOLIDATION_WINDOW];
        let recent_range = bar_range(recent);
        let prior_range = bar_range(prior);
        if prior_range > 0.0 && recent_range < CONSOLIDATION_RATIO * prior_range {
            tags.push(PatternTag::Consolidation);
        }
    }

    // Divergence: a >2% move over the last 10 bars on fading volume.
    if candles.len() >= CONSOLIDATION_WINDOW {
        let closes = types::closes(candles);
        let volumes = types::volumes(candles);
        let start = closes[closes.len() - CONSOLIDATION_WINDOW];
        let price_change_pct = (current - start) / start * 100.0;
        if volumes.len() >= 10 {
            let recent_vol = stats::mean(&volumes[volumes.len() - 5..]);
            let prior_vol = stats::mean(&volumes[volumes.len() - 10..volumes.len() - 5]);
            if prior_vol > 0.0 {
                let volume_ratio = recent_vol / prior_vol;
                if price_change_pct > DIVERGENCE_PRICE_PCT && volume_ratio < DIVERGENCE_VOLUME_RATIO
                {
                    tags.push(PatternTag::BearishDivergence);
                } else if price_change_pct < -DIVERGENCE_PRICE_PCT
                    && volume_ratio < DIVERGENCE_VOLUME_RATIO
                {
                    tags.push(PatternTag::BullishDivergence);
                }
            }
        }
    }

    tags
}

fn has_double_extreme(pivots: &[(usize, f64)], extreme: f64) -> bool {
    if extreme == 0.0 {
        return false;
    }
    let near: Vec<usize> = pivots
        .iter()
        .filter(|&&(_, price)| ((price - extreme) / extreme * 100.0).abs() <= DOUBLE_EXTREME_TOLERANCE_PCT)
        .map(|&(i, _)| i)
        .collect();
    for (a, &first) in near.iter().enumerate() {
        for &second in &near[a + 1..] {
            let gap = second.abs_diff(first);
            if (DOUBLE_MIN_GAP..=DOUBLE_MAX_GAP).contains(&gap) {
                return true;
            }
        }
    }
    false
}

fn bar_range(candles: &[Candle]) -> f64 {
    let high = candles.iter().map(|c| c.high).fold(f64::NEG_INFINITY, f64::max);
    let low = candles.iter().map(|c| c.low).fold(f64::INFINITY, f64::min);
    high - low
}
