//! Historical win-rate estimation and entry quality scoring
//!
//! The 0.5%-in-5-bars profit definition and the scoring weights are tuned
//! production constants, kept configurable here but not re-derived.

use crate::error::Result;
use crate::patterns::{PatternFindings, PatternTag, VolumeProfile};
use crate::stats;
use serde::{Deserialize, Serialize};

/// Trailing bars used for the local z-score at each backtest index.
const LOCAL_Z_WINDOW: usize = 20;
/// Bars held after a hypothetical entry.
const HOLD_BARS: usize = 5;
/// Z-scores within this distance of the current one count as similar setups.
const Z_SIMILARITY: f64 = 0.5;
/// Profit threshold for a win, in percent.
const WIN_THRESHOLD_PCT: f64 = 0.5;
/// Minimum window for a meaningful backtest.
const MIN_BACKTEST_CANDLES: usize = 50;

const STOP_ATR_MULTIPLIER: f64 = 1.5;
const STOP_FLOOR_PCT: f64 = 0.5;
const STOP_CEILING_PCT: f64 = 5.0;
/// Fixed 2:1 reward-to-risk.
const TARGET_RR: f64 = 2.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryBucket {
    Excellent,
    Good,
    Fair,
    Poor,
}

impl EntryBucket {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryBucket::Excellent => "excellent",
            EntryBucket::Good => "good",
            EntryBucket::Fair => "fair",
            EntryBucket::Poor => "poor",
        }
    }

    fn from_score(score: f64) -> Self {
        if score >= 75.0 {
            EntryBucket::Excellent
        } else if score >= 60.0 {
            EntryBucket::Good
        } else if score >= 40.0 {
            EntryBucket::Fair
        } else {
            EntryBucket::Poor
        }
    }
}

/// Win-rate and trade-sizing estimates for the current setup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbabilityMetrics {
    /// Historical hit rate of long entries from similar z-scores (0-100)
    pub long_win_rate: f64,
    /// Historical hit rate of short entries from similar z-scores (0-100)
    pub short_win_rate: f64,
    /// Number of similar historical setups found
    pub sample_count: usize,
    pub optimal_stop_pct: f64,
    pub optimal_target_pct: f64,
    pub risk_reward: f64,
    pub entry_quality: f64,
    pub entry_bucket: EntryBucket,
}

/// Backtest outcome before scoring.
#[derive(Debug, Clone, Copy)]
pub struct WinRates {
    pub long: f64,
    pub short: f64,
    pub samples: usize,
}

/// Scan history for bars whose local z-score resembled the current one and
/// check what price did `HOLD_BARS` later. Falls back to 50/50 when the
/// window is too short or no similar setup exists.
pub fn win_rate_backtest(closes: &[f64], current_z: f64) -> WinRates {
    let neutral = WinRates {
        long: 50.0,
        short: 50.0,
        samples: 0,
    };
    if closes.len() < MIN_BACKTEST_CANDLES {
        return neutral;
    }

    let mut samples = 0usize;
    let mut long_wins = 0usize;
    let mut short_wins = 0usize;

    for i in LOCAL_Z_WINDOW..closes.len() - HOLD_BARS {
        let window = &closes[i + 1 - LOCAL_Z_WINDOW..=i];
        let mean = stats::mean(window);
        let std_dev = stats::sample_std_dev(window);
        if std_dev < 1e-9 {
            continue;
        }
        let local_z = (closes[i] - mean) / std_dev;
        if (local_z - current_z).abs() > Z_SIMILARITY {
            continue;
        }

        samples += 1;
        let entry = closes[i];
        let exit = closes[i + HOLD_BARS];
        if exit >= entry * (1.0 + WIN_THRESHOLD_PCT / 100.0) {
            long_wins += 1;
        }
        if exit <= entry * (1.0 - WIN_THRESHOLD_PCT / 100.0) {
            short_wins += 1;
        }
    }

    if samples == 0 {
        return neutral;
    }
    WinRates {
        long: long_wins as f64 / samples as f64 * 100.0,
        short: short_wins as f64 / samples as f64 * 100.0,
        samples,
    }
}

/// ATR-based stop with a fixed 2:1 target.
pub fn optimal_stop_target(atr: f64, price: f64) -> (f64, f64) {
    let atr_pct = if price > 0.0 { atr / price * 100.0 } else { 0.0 };
    let stop = (STOP_ATR_MULTIPLIER * atr_pct).clamp(STOP_FLOOR_PCT, STOP_CEILING_PCT);
    (stop, TARGET_RR * stop)
}

/// Entry-quality score: base 50, up to +15 for z-score stretch, up to +15
/// for trend strength, ±10 for the volume profile, +5..10 pattern bonuses,
/// -5 per level test.
pub fn entry_quality(z: f64, findings: &PatternFindings) -> f64 {
    let mut score = 50.0;

    score += (z.abs() / 2.0).min(1.0) * 15.0;
    score += findings.trend.strength / 100.0 * 15.0;

    score += match findings.volume.profile {
        VolumeProfile::Accumulation => 10.0,
        VolumeProfile::Distribution => -10.0,
        VolumeProfile::Neutral => 0.0,
    };

    for tag in &findings.patterns {
        score += match tag {
            PatternTag::DoubleTop | PatternTag::DoubleBottom => 10.0,
            PatternTag::Consolidation => 5.0,
            PatternTag::BullishDivergence | PatternTag::BearishDivergence => 5.0,
            PatternTag::ResistanceTest | PatternTag::SupportTest => -5.0,
        };
    }

    score.clamp(0.0, 100.0)
}

impl ProbabilityMetrics {
    pub fn compute(
        closes: &[f64],
        current_z: f64,
        atr: f64,
        findings: &PatternFindings,
    ) -> Result<Self> {
        let rates = win_rate_backtest(closes, current_z);
        let price = closes.last().copied().unwrap_or(0.0);
        let (stop, target) = optimal_stop_target(atr, price);
        let quality = entry_quality(current_z, findings);

        Ok(Self {
            long_win_rate: rates.long,
            short_win_rate: rates.short,
            sample_count: rates.samples,
            optimal_stop_pct: stop,
            optimal_target_pct: target,
            risk_reward: TARGET_RR,
            entry_quality: quality,
            entry_bucket: EntryBucket::from_score(quality),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::patterns::{
        SupportResistance, TrendAnalysis, TrendDirection, VolumeAnalysis,
    };

    fn findings(
        strength: f64,
        profile: VolumeProfile,
        patterns: Vec<PatternTag>,
    ) -> PatternFindings {
        PatternFindings {
            trend: TrendAnalysis {
                direction: TrendDirection::Up,
                strength,
                slope_pct: 0.2,
                duration: 3,
            },
            levels: SupportResistance {
                support: None,
                resistance: None,
            },
            volume: VolumeAnalysis {
                profile,
                score: 0,
                anomaly: false,
            },
            patterns,
        }
    }

    #[test]
    fn test_backtest_short_window_is_neutral() {
        let closes = vec![100.0; 30];
        let rates = win_rate_backtest(&closes, 0.0);
        assert_eq!(rates.long, 50.0);
        assert_eq!(rates.short, 50.0);
        assert_eq!(rates.samples, 0);
    }

    #[test]
    fn test_backtest_finds_similar_setups_in_uptrend() {
        // Monotonic ramp: local z-scores sit near the top of each window,
        // and every 5-bar hold gains well over 0.5%.
        let closes: Vec<f64> = (0..80).map(|i| 100.0 * 1.01f64.powi(i)).collect();
        let current_z = {
            let window = &closes[closes.len() - LOCAL_Z_WINDOW..];
            let mean = stats::mean(window);
            let sd = stats::sample_std_dev(window);
            (closes[closes.len() - 1] - mean) / sd
        };
        let rates = win_rate_backtest(&closes, current_z);
        assert!(rates.samples > 0);
        assert!(rates.long > 90.0, "ramp should win long: {:?}", rates);
        assert!(rates.short < 10.0);
    }

    #[test]
    fn test_stop_clamps() {
        // Tiny ATR hits the floor.
        let (stop, target) = optimal_stop_target(0.01, 100.0);
        assert_eq!(stop, 0.5);
        assert_eq!(target, 1.0);
        // Huge ATR hits the ceiling.
        let (stop, target) = optimal_stop_target(20.0, 100.0);
        assert_eq!(stop, 5.0);
        assert_eq!(target, 10.0);
        // Mid-range scales 1.5x.
        let (stop, _) = optimal_stop_target(2.0, 100.0);
        assert!((stop - 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_entry_quality_components() {
        // Strong stretch + strong trend + accumulation + double bottom.
        let best = findings(100.0, VolumeProfile::Accumulation, vec![PatternTag::DoubleBottom]);
        let score = entry_quality(2.5, &best);
        assert_eq!(score, 100.0);
        assert_eq!(EntryBucket::from_score(score), EntryBucket::Excellent);

        // Weak everything with a distribution profile and level test.
        let worst = findings(0.0, VolumeProfile::Distribution, vec![PatternTag::ResistanceTest]);
        let score = entry_quality(0.0, &worst);
        assert_eq!(score, 35.0);
        assert_eq!(EntryBucket::from_score(score), EntryBucket::Poor);
    }

    #[test]
    fn test_bucket_edges() {
        assert_eq!(EntryBucket::from_score(75.0), EntryBucket::Excellent);
        assert_eq!(EntryBucket::from_score(74.9), EntryBucket::Good);
        assert_eq!(EntryBucket::from_score(60.0), EntryBucket::Good);
        assert_eq!(EntryBucket::from_score(40.0), EntryBucket::Fair);
        assert_eq!(EntryBucket::from_score(39.9), EntryBucket::Poor);
    }
}
