//! Funding-rate persistence tracking
//!
//! A crowded perp market pays funding to the other side; rates pinned in
//! their own extreme tail for consecutive settlements mark a stretched crowd
//! worth fading. The store keeps a 7-day window per symbol with the same
//! bounded-map discipline as the regime history.

use crate::config::FundingConfig;
use crate::error::{AnalyticsError, Result};
use crate::stats::{self, SignalDirection};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};

/// Minimum samples before percentile analysis means anything.
const MIN_SAMPLES: usize = 3;
/// Extremity tail thresholds.
const EXTREME_LOW_Q: f64 = 0.05;
const EXTREME_HIGH_Q: f64 = 0.95;
/// Consecutive extreme settlements before the signal is actionable.
const PERSISTENCE_GATE: usize = 2;
/// Weak (non-persistent) signal parameters.
const WEAK_STRENGTH: f64 = 30.0;
const WEAK_CONFIDENCE: f64 = 55.0;
/// Persistent contrarian signal parameters.
const PERSISTENT_STRENGTH_BASE: f64 = 40.0;
const PERSISTENT_STRENGTH_SPAN: f64 = 0.6;
const PERSISTENT_CONFIDENCE: f64 = 70.0;
/// Per-cycle carry estimate clamp, in percent.
const CARRY_FLOOR_PCT: f64 = 0.05;
const CARRY_CEILING_PCT: f64 = 0.3;

/// Which tail an observation sits in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Extremity {
    None,
    /// Rate in the high tail: longs pay, crowd is long
    High,
    /// Rate in the low tail: shorts pay, crowd is short
    Low,
}

/// One stored funding observation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct FundingEntry {
    pub timestamp_ms: u64,
    pub rate: f64,
    pub extremity: Extremity,
}

/// Contrarian signal derived from funding persistence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FundingSignal {
    pub direction: SignalDirection,
    pub strength: f64,
    pub confidence: f64,
    /// Estimated per-cycle carry capture, in percent
    pub expected_carry_pct: f64,
}

impl FundingSignal {
    fn neutral() -> Self {
        Self {
            direction: SignalDirection::Neutral,
            strength: 0.0,
            confidence: 0.0,
            expected_carry_pct: 0.0,
        }
    }
}

/// Full funding verdict for one symbol.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FundingAnalysis {
    pub current_rate: f64,
    /// Percentile of the current rate within history; 50 when history is
    /// too short
    pub percentile: f64,
    pub is_extreme: bool,
    /// Consecutive trailing same-side extreme settlements
    pub persistence: usize,
    pub is_persistent: bool,
    pub sample_count: usize,
    pub signal: FundingSignal,
}

#[derive(Debug, Default)]
struct SymbolFunding {
    entries: VecDeque<FundingEntry>,
    last_updated_ms: u64,
}

/// Bounded per-symbol funding store with rolling-window analysis.
pub struct FundingTracker {
    config: FundingConfig,
    inner: RwLock<HashMap<String, SymbolFunding>>,
}

impl FundingTracker {
    pub fn new(config: FundingConfig) -> Self {
        Self {
            config,
            inner: RwLock::new(HashMap::new()),
        }
    }

    /// Record an observation and return the updated analysis.
    pub fn observe(&self, symbol: &str, rate: f64, now_ms: u64) -> Result<FundingAnalysis> {
        if !rate.is_finite() {
            return Err(AnalyticsError::upstream(format!(
                "funding rate for {} is not finite: {}",
                symbol, rate
            )));
        }

        let mut map = self.inner.write();

        if !map.contains_key(symbol) && map.len() >= self.config.max_symbols {
            if let Some(oldest) = map
                .iter()
                .min_by_key(|(_, h)| h.last_updated_ms)
                .map(|(s, _)| s.clone())
            {
                tracing::debug!(symbol = %oldest, "funding store symbol cap hit, evicting");
                map.remove(&oldest);
            }
        }

        let history = map.entry(symbol.to_string()).or_default();
        let dedup_window_ms = self.config.dedup_window_secs * 1000;

        // Near-duplicate observations refresh the latest entry in place.
        let updated_in_place = match history.entries.back_mut() {
            Some(last) if now_ms.saturating_sub(last.timestamp_ms) < dedup_window_ms => {
                last.rate = rate;
                last.timestamp_ms = now_ms;
                true
            }
            _ => false,
        };
        if !updated_in_place {
            history.entries.push_back(FundingEntry {
                timestamp_ms: now_ms,
                rate,
                extremity: Extremity::None,
            });
            while history.entries.len() > self.config.max_entries_per_symbol {
                history.entries.pop_front();
            }
        }
        history.last_updated_ms = now_ms;

        // Re-flag the freshest entry against the window it now sits in.
        let rates: Vec<f64> = history.entries.iter().map(|e| e.rate).collect();
        let extremity = classify_extremity(&rates, rate);
        if let Some(last) = history.entries.back_mut() {
            last.extremity = extremity;
        }

        Ok(analyze_history(&history.entries, rate))
    }

    /// Read-only analysis of the stored history against `current_rate`.
    pub fn analyze(&self, symbol: &str, current_rate: f64) -> FundingAnalysis {
        let map = self.inner.read();
        match map.get(symbol) {
            Some(history) => analyze_history(&history.entries, current_rate),
            None => FundingAnalysis {
                current_rate,
                percentile: 50.0,
                is_extreme: false,
                persistence: 0,
                is_persistent: false,
                sample_count: 0,
                signal: FundingSignal::neutral(),
            },
        }
    }

    /// Age-based sweep; idempotent.
    pub fn prune(&self, now_ms: u64) {
        let cutoff = now_ms.saturating_sub(self.config.history_max_age_secs * 1000);
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
}

/// Tail classification against the 5th/95th percentile of the window. When
/// the window is so small or flat that the thresholds coincide, only the
/// literal minimum and maximum count as extreme.
fn classify_extremity(rates: &[f64], rate: f64) -> Extremity {
    if rates.len() < MIN_SAMPLES {
        return Extremity::None;
    }
    let mut sorted = rates.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).expect("finite rates"));
    let low = stats::quantile(&sorted, EXTREME_LOW_Q);
    let high = stats::quantile(&sorted, EXTREME_HIGH_Q);

    if low == high {
        let min = sorted[0];
        let max = sorted[sorted.len() - 1];
        if max > min && rate == max {
            return Extremity::High;
        }
        if max > min && rate == min {
            return Extremity::Low;
        }
        return Extremity::None;
    }

    if rate >= high {
        Extremity::High
    } else if rate <= low {
        Extremity::Low
    } else {
        Extremity::None
    }
}

fn analyze_history(entries: &VecDeque<FundingEntry>, current_rate: f64) -> FundingAnalysis {
    let rates: Vec<f64> = entries.iter().map(|e| e.rate).collect();
    let sample_count = rates.len();

    if sample_count < MIN_SAMPLES {
        return FundingAnalysis {
            current_rate,
            percentile: 50.0,
            is_extreme: false,
            persistence: 0,
            is_persistent: false,
            sample_count,
            signal: FundingSignal::neutral(),
        };
    }

    let percentile = stats::percentile_rank(&rates, current_rate);
    let current_extremity = entries
        .back()
        .map(|e| e.extremity)
        .unwrap_or(Extremity::None);

    let persistence = match current_extremity {
        Extremity::None => 0,
        side => entries
            .iter()
            .rev()
            .take_while(|e| e.extremity == side)
            .count(),
    };
    let is_persistent = persistence >= PERSISTENCE_GATE;

    let signal = match current_extremity {
        Extremity::None => FundingSignal::neutral(),
        side => {
            // Fade the crowd: high funding means a long crowd, so the
            // contrarian side is short, and vice versa.
            let direction = match side {
                Extremity::High => SignalDirection::Short,
                Extremity::Low => SignalDirection::Long,
                Extremity::None => unreachable!("matched above"),
            };
            let carry = (current_rate.abs() * 100.0).clamp(CARRY_FLOOR_PCT, CARRY_CEILING_PCT);
            if is_persistent {
                FundingSignal {
                    direction,
                    strength: (PERSISTENT_STRENGTH_BASE
                        + (percentile - 50.0).abs() * PERSISTENT_STRENGTH_SPAN)
                        .min(70.0),
                    confidence: PERSISTENT_CONFIDENCE,
                    expected_carry_pct: carry,
                }
            } else {
                FundingSignal {
                    direction,
                    strength: WEAK_STRENGTH,
                    confidence: WEAK_CONFIDENCE,
                    expected_carry_pct: carry,
                }
            }
        }
    };

    FundingAnalysis {
        current_rate,
        percentile,
        is_extreme: current_extremity != Extremity::None,
        persistence,
        is_persistent,
        sample_count,
        signal,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NOW: u64 = 1_700_000_000_000;
    const EIGHT_HOURS: u64 = 8 * 3600 * 1000;

    fn tracker() -> FundingTracker {
        FundingTracker::new(FundingConfig::default())
    }

    /// Seed 21 near-neutral settlements 8h apart, returning the timestamp
    /// after the last one.
    fn seed_neutral(t: &FundingTracker, symbol: &str) -> u64 {
        let mut ts = NOW;
        for i in 0..21 {
            // Small alternating rates around zero.
            let rate = 0.0001 + (i % 5) as f64 * 0.00002;
            t.observe(symbol, rate, ts).unwrap();
            ts += EIGHT_HOURS;
        }
        ts
    }

    #[test]
    fn test_short_history_is_neutral() {
        let t = tracker();
        let analysis = t.observe("BTC", 0.01, NOW).unwrap();
        assert_eq!(analysis.percentile, 50.0);
        assert_eq!(analysis.signal.direction, SignalDirection::Neutral);
        assert_eq!(analysis.sample_count, 1);
    }

    #[test]
    fn test_persistent_high_funding_fires_short() {
        let t = tracker();
        let mut ts = seed_neutral(&t, "BTC");

        // Two consecutive settlements pinned far above the window.
        let first = t.observe("BTC", 0.002, ts).unwrap();
        assert!(first.is_extreme);
        assert!(!first.is_persistent, "single extreme is not yet persistent");
        assert_eq!(first.signal.direction, SignalDirection::Short);
        assert_eq!(first.signal.strength, WEAK_STRENGTH);
        assert_eq!(first.signal.confidence, WEAK_CONFIDENCE);

        ts += EIGHT_HOURS;
        let second = t.observe("BTC", 0.0021, ts).unwrap();
        assert!(second.is_persistent);
        assert_eq!(second.persistence, 2);
        // Long-crowded market: contrarian signal is short.
        assert_eq!(second.signal.direction, SignalDirection::Short);
    }

    #[test]
    fn test_persistent_signal_parameters() {
        let t = tracker();
        let mut ts = seed_neutral(&t, "ETH");
        t.observe("ETH", 0.002, ts).unwrap();
        ts += EIGHT_HOURS;
        let analysis = t.observe("ETH", 0.0021, ts).unwrap();

        assert_eq!(analysis.signal.confidence, PERSISTENT_CONFIDENCE);
        assert!(analysis.signal.strength >= PERSISTENT_STRENGTH_BASE);
        assert!(analysis.signal.strength <= 70.0);
        // 0.21% per cycle clamps into [0.05, 0.3].
        assert!((analysis.signal.expected_carry_pct - 0.21).abs() < 1e-9);
    }

    #[test]
    fn test_low_extreme_fires_long() {
        let t = tracker();
        let mut ts = seed_neutral(&t, "SOL");
        t.observe("SOL", -0.002, ts).unwrap();
        ts += EIGHT_HOURS;
        let analysis = t.observe("SOL", -0.0021, ts).unwrap();
        assert!(analysis.is_persistent);
        assert_eq!(analysis.signal.direction, SignalDirection::Long);
    }

    #[test]
    fn test_in_place_update_within_dedup_window() {
        let t = tracker();
        t.observe("BTC", 0.0001, NOW).unwrap();
        // One hour later: same settlement cycle, update in place.
        t.observe("BTC", 0.0002, NOW + 3600 * 1000).unwrap();
        assert_eq!(t.entry_count("BTC"), 1);
        // Nine hours later: a fresh settlement appends.
        t.observe("BTC", 0.0003, NOW + 9 * 3600 * 1000).unwrap();
        assert_eq!(t.entry_count("BTC"), 2);
    }

    #[test]
    fn test_entry_cap_rolls_window() {
        let t = tracker();
        let mut ts = NOW;
        for i in 0..30 {
            t.observe("BTC", 0.0001 * (i % 7) as f64, ts).unwrap();
            ts += EIGHT_HOURS;
        }
        assert_eq!(t.entry_count("BTC"), 21);
    }

    #[test]
    fn test_symbol_cap_evicts_oldest() {
        let config = FundingConfig {
            max_symbols: 2,
            ..Default::default()
        };
        let t = FundingTracker::new(config);
        t.observe("A", 0.0001, NOW).unwrap();
        t.observe("B", 0.0001, NOW + 1000).unwrap();
        t.observe("C", 0.0001, NOW + 2000).unwrap();
        assert_eq!(t.symbol_count(), 2);
        assert_eq!(t.entry_count("A"), 0);
    }

    #[test]
    fn test_prune_expires_old_entries() {
        let t = tracker();
        let last = seed_neutral(&t, "BTC");
        // Everything is older than 7 days relative to this instant except
        // the final few settlements.
        let cutoff_now = NOW + 8 * 24 * 3600 * 1000;
        t.prune(cutoff_now);
        assert!(t.entry_count("BTC") < 21);
        // Sweeping twice at the same instant changes nothing further.
        let after_first = t.entry_count("BTC");
        t.prune(cutoff_now);
        assert_eq!(t.entry_count("BTC"), after_first);
        let _ = last;
    }

    #[test]
    fn test_non_finite_rate_rejected() {
        let t = tracker();
        assert!(t.observe("BTC", f64::NAN, NOW).is_err());
    }

    #[test]
    fn test_readonly_analyze_matches_observe() {
        let t = tracker();
        let mut ts = seed_neutral(&t, "BTC");
        t.observe("BTC", 0.002, ts).unwrap();
        ts += EIGHT_HOURS;
        let observed = t.observe("BTC", 0.0021, ts).unwrap();

        let read_back = t.analyze("BTC", 0.0021);
        assert_eq!(read_back.persistence, observed.persistence);
        assert_eq!(read_back.signal.direction, observed.signal.direction);

        // Unknown symbols read as neutral.
        let unknown = t.analyze("XRP", 0.01);
        assert_eq!(unknown.percentile, 50.0);
        assert_eq!(unknown.sample_count, 0);
    }
}
