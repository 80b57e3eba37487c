//! Statistical profile of a price window
//!
//! Mean/dispersion/z-score measures plus the volatility structure used by
//! the regime detector and the mean-reversion signal. Recomputed fresh every
//! analysis cycle; nothing here is persisted.

use crate::error::{AnalyticsError, Result};
use serde::{Deserialize, Serialize};

/// Rolling window length for the realized-volatility series.
pub const VOLATILITY_WINDOW: usize = 24;
/// Recent-vs-prior mean ratio above which volatility counts as expanding.
pub const EXPANSION_RATIO: f64 = 1.2;
/// |z| beyond which the mean-reversion signal fires.
pub const Z_SCORE_SIGNAL_GATE: f64 = 2.0;
/// Confidence attached to a mean-reversion signal.
pub const MEAN_REVERSION_CONFIDENCE: f64 = 70.0;

/// Direction of a trading signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignalDirection {
    Long,
    Short,
    Neutral,
}

impl SignalDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            SignalDirection::Long => "long",
            SignalDirection::Short => "short",
            SignalDirection::Neutral => "neutral",
        }
    }
}

/// Statistical snapshot of one close-price window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatisticalProfile {
    pub mean: f64,
    pub std_dev: f64,
    pub z_score: f64,
    /// Percentile rank of the latest price within the window (0-100)
    pub percentile: f64,
    /// Annualized volatility from log returns, in percent
    pub annualized_volatility: f64,
    /// Percentile of the latest rolling volatility vs. its own history
    pub volatility_percentile: f64,
    pub volatility_expanding: bool,
    /// Signed distance of the latest price from the mean, in percent
    pub distance_from_mean_pct: f64,
}

/// Mean-reversion verdict derived from the z-score.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MeanReversionSignal {
    pub direction: SignalDirection,
    pub z_score: f64,
    pub confidence: f64,
}

pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Sample standard deviation (n - 1 denominator).
pub fn sample_std_dev(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let m = mean(values);
    let variance =
        values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / (values.len() as f64 - 1.0);
    variance.sqrt()
}

pub fn z_score(value: f64, mean: f64, std_dev: f64) -> f64 {
    if std_dev < 1e-9 {
        0.0
    } else {
        (value - mean) / std_dev
    }
}

/// Percentile rank: share of values strictly below `value`, in [0, 100].
pub fn percentile_rank(values: &[f64], value: f64) -> f64 {
    if values.is_empty() {
        return 50.0;
    }
    let below = values.iter().filter(|&&v| v < value).count();
    below as f64 / values.len() as f64 * 100.0
}

/// Order-statistic quantile with the `(n - 1) * p` index convention and
/// linear interpolation; stable for a single sample.
pub fn quantile(sorted: &[f64], p: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let idx = (sorted.len() as f64 - 1.0) * p;
    let lo = idx.floor() as usize;
    let hi = idx.ceil() as usize;
    if lo == hi {
        sorted[lo]
    } else {
        let frac = idx - lo as f64;
        sorted[lo] * (1.0 - frac) + sorted[hi] * frac
    }
}

/// Log returns of a close series. Inputs are boundary-validated positives.
pub fn log_returns(closes: &[f64]) -> Vec<f64> {
    closes.windows(2).map(|w| (w[1] / w[0]).ln()).collect()
}

/// Annualized volatility in percent from log returns.
pub fn annualized_volatility(closes: &[f64], periods_per_year: f64) -> Result<f64> {
    if closes.len() < 2 {
        return Err(AnalyticsError::invalid_input(
            "annualized_volatility: need at least 2 closes",
        ));
    }
    let returns = log_returns(closes);
    Ok(sample_std_dev(&returns) * periods_per_year.sqrt() * 100.0)
}

/// Rolling realized volatilities: sample std-dev of log returns over each
/// trailing `window`-sample slice, oldest first.
pub fn rolling_volatilities(closes: &[f64], window: usize) -> Vec<f64> {
    let returns = log_returns(closes);
    if returns.len() < window {
        return Vec::new();
    }
    returns
        .windows(window)
        .map(|slice| sample_std_dev(slice))
        .collect()
}

/// Pearson correlation over the trailing overlap of two series. Returns 0
/// when either side is too short or degenerate.
pub fn pearson_correlation(a: &[f64], b: &[f64]) -> f64 {
    let n = a.len().min(b.len());
    if n < 2 {
        return 0.0;
    }
    let a = &a[a.len() - n..];
    let b = &b[b.len() - n..];
    let mean_a = mean(a);
    let mean_b = mean(b);

    let mut cov = 0.0;
    let mut var_a = 0.0;
    let mut var_b = 0.0;
    for i in 0..n {
        let da = a[i] - mean_a;
        let db = b[i] - mean_b;
        cov += da * db;
        var_a += da * da;
        var_b += db * db;
    }
    if var_a < 1e-18 || var_b < 1e-18 {
        return 0.0;
    }
    cov / (var_a.sqrt() * var_b.sqrt())
}

/// Volatility expansion: mean of the most recent 5 samples exceeds
/// `EXPANSION_RATIO` times the mean of the prior 5.
pub fn is_volatility_expanding(volatilities: &[f64]) -> bool {
    if volatilities.len() < 10 {
        return false;
    }
    let recent = mean(&volatilities[volatilities.len() - 5..]);
    let prior = mean(&volatilities[volatilities.len() - 10..volatilities.len() - 5]);
    prior > 0.0 && recent > EXPANSION_RATIO * prior
}

impl StatisticalProfile {
    /// Compute the profile for a validated close window.
    pub fn compute(closes: &[f64], periods_per_year: f64) -> Result<Self> {
        if closes.len() < 2 {
            return Err(AnalyticsError::invalid_input(
                "statistical profile: need at least 2 closes",
            ));
        }
        if !periods_per_year.is_finite() || periods_per_year <= 0.0 {
            return Err(AnalyticsError::invalid_input(format!(
                "statistical profile: bad annualization factor {}",
                periods_per_year
            )));
        }

        let latest = *closes.last().expect("non-empty checked above");
        let m = mean(closes);
        let sd = sample_std_dev(closes);

        let vols = rolling_volatilities(closes, VOLATILITY_WINDOW);
        let (vol_percentile, expanding) = match vols.last() {
            Some(&current) => (percentile_rank(&vols, current), is_volatility_expanding(&vols)),
            None => (50.0, false),
        };

        Ok(Self {
            mean: m,
            std_dev: sd,
            z_score: z_score(latest, m, sd),
            percentile: percentile_rank(closes, latest),
            annualized_volatility: annualized_volatility(closes, periods_per_year)?,
            volatility_percentile: vol_percentile,
            volatility_expanding: expanding,
            distance_from_mean_pct: if m.abs() < 1e-9 {
                0.0
            } else {
                (latest - m) / m * 100.0
            },
        })
    }

    /// Mean-reversion signal: |z| > 2 fires opposite the stretch.
    pub fn mean_reversion_signal(&self) -> MeanReversionSignal {
        let direction = if self.z_score > Z_SCORE_SIGNAL_GATE {
            SignalDirection::Short
        } else if self.z_score < -Z_SCORE_SIGNAL_GATE {
            SignalDirection::Long
        } else {
            SignalDirection::Neutral
        };
        let confidence = if direction == SignalDirection::Neutral {
            0.0
        } else {
            MEAN_REVERSION_CONFIDENCE
        };
        MeanReversionSignal {
            direction,
            z_score: self.z_score,
            confidence,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mean_and_sample_std() {
        let values = [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0];
        assert!((mean(&values) - 5.0).abs() < 1e-12);
        // Sample variance of this classic set is 32/7.
        assert!((sample_std_dev(&values) - (32.0f64 / 7.0).sqrt()).abs() < 1e-12);
    }

    #[test]
    fn test_z_score_flat_series_is_zero() {
        assert_eq!(z_score(10.0, 10.0, 0.0), 0.0);
    }

    #[test]
    fn test_percentile_rank_counts_strictly_below() {
        let values = [1.0, 2.0, 3.0, 4.0, 5.0];
        assert_eq!(percentile_rank(&values, 5.0), 80.0);
        assert_eq!(percentile_rank(&values, 0.5), 0.0);
        assert_eq!(percentile_rank(&values, 6.0), 100.0);
    }

    #[test]
    fn test_profile_extreme_high_fires_short() {
        // Window hugging 100 with a final spike far above the mean.
        let mut closes: Vec<f64> = (0..60).map(|i| 100.0 + ((i % 5) as f64 - 2.0) * 0.2).collect();
        closes.push(110.0);
        let profile = StatisticalProfile::compute(&closes, 8_760.0).unwrap();
        assert!(profile.z_score > Z_SCORE_SIGNAL_GATE);
        let signal = profile.mean_reversion_signal();
        assert_eq!(signal.direction, SignalDirection::Short);
        assert_eq!(signal.confidence, MEAN_REVERSION_CONFIDENCE);
    }

    #[test]
    fn test_profile_neutral_inside_band() {
        let closes: Vec<f64> = (0..60).map(|i| 100.0 + ((i % 7) as f64 - 3.0) * 0.5).collect();
        let profile = StatisticalProfile::compute(&closes, 8_760.0).unwrap();
        let signal = profile.mean_reversion_signal();
        assert_eq!(signal.direction, SignalDirection::Neutral);
        assert_eq!(signal.confidence, 0.0);
    }

    #[test]
    fn test_volatility_expansion_flag() {
        // Five quiet samples then five loud ones.
        let vols = [0.01, 0.01, 0.01, 0.01, 0.01, 0.03, 0.03, 0.03, 0.03, 0.03];
        assert!(is_volatility_expanding(&vols));
        let flat = [0.01; 10];
        assert!(!is_volatility_expanding(&flat));
    }

    #[test]
    fn test_annualized_volatility_zero_for_flat() {
        let closes = vec![100.0; 30];
        let vol = annualized_volatility(&closes, 8_760.0).unwrap();
        assert_eq!(vol, 0.0);
    }

    #[test]
    fn test_profile_rejects_single_point() {
        assert!(StatisticalProfile::compute(&[100.0], 8_760.0).is_err());
    }
}
