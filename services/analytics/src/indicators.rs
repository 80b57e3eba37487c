//! Technical indicators for the analysis pipeline
//!
//! Pure functions over validated numeric sequences. Every function rejects
//! insufficient or non-finite input with `InvalidInput` instead of returning
//! NaN; an out-of-bounds result (e.g. RSI outside [0,100]) is a
//! `Computation` error, never silently clamped. Callers rely on this
//! fail-fast contract to keep NaN out of the downstream pipeline.

use crate::error::{AnalyticsError, Result};
use serde::{Deserialize, Serialize};
use types::Candle;

/// EMA ladder periods used across the engine.
pub const EMA_FAST: usize = 9;
pub const EMA_MID: usize = 20;
pub const EMA_SLOW: usize = 50;

pub const RSI_PERIOD: usize = 14;
pub const ATR_PERIOD: usize = 14;
pub const ADX_PERIOD: usize = 14;
pub const MACD_FAST: usize = 12;
pub const MACD_SLOW: usize = 26;
pub const MACD_SIGNAL: usize = 9;
pub const BOLLINGER_PERIOD: usize = 20;
pub const BOLLINGER_K: f64 = 2.0;
pub const DONCHIAN_PERIOD: usize = 20;

/// MACD line, signal line and histogram for the latest bar.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MacdTriple {
    pub macd: f64,
    pub signal: f64,
    pub histogram: f64,
}

/// Bollinger band triple. `upper >= middle >= lower` always holds; a
/// negative lower band is valid output.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BollingerBands {
    pub upper: f64,
    pub middle: f64,
    pub lower: f64,
}

impl BollingerBands {
    /// Band width relative to the middle band.
    pub fn width(&self) -> f64 {
        if self.middle.abs() < f64::EPSILON {
            0.0
        } else {
            (self.upper - self.lower) / self.middle
        }
    }
}

/// Donchian channel over the trailing window.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DonchianChannel {
    pub upper: f64,
    pub lower: f64,
    pub middle: f64,
}

/// ADX with its directional components.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AdxReading {
    pub adx: f64,
    pub plus_di: f64,
    pub minus_di: f64,
}

/// Full indicator bundle for one symbol/timeframe.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndicatorSet {
    pub ema_fast: Vec<f64>,
    pub ema_mid: Vec<f64>,
    pub ema_slow: Vec<f64>,
    pub rsi: Vec<f64>,
    pub macd: MacdTriple,
    pub atr: f64,
    pub bollinger: BollingerBands,
    pub donchian: DonchianChannel,
    pub adx: AdxReading,
}

impl IndicatorSet {
    /// Compute the standard bundle from a validated candle window.
    pub fn compute(candles: &[Candle]) -> Result<Self> {
        let closes = types::closes(candles);
        Ok(Self {
            ema_fast: ema(&closes, EMA_FAST)?,
            ema_mid: ema(&closes, EMA_MID)?,
            ema_slow: ema(&closes, EMA_SLOW)?,
            rsi: rsi(&closes, RSI_PERIOD)?,
            macd: macd(&closes, MACD_FAST, MACD_SLOW, MACD_SIGNAL)?,
            atr: atr(candles, ATR_PERIOD)?,
            bollinger: bollinger_bands(&closes, BOLLINGER_PERIOD, BOLLINGER_K)?,
            donchian: donchian_channel(candles, DONCHIAN_PERIOD)?,
            adx: adx(candles, ADX_PERIOD)?,
        })
    }

    pub fn latest_rsi(&self) -> f64 {
        self.rsi.last().copied().unwrap_or(50.0)
    }
}

fn ensure_finite(prices: &[f64], context: &str) -> Result<()> {
    if let Some(value) = prices.iter().find(|v| !v.is_finite()) {
        return Err(AnalyticsError::invalid_input(format!(
            "{}: non-finite value {} in input",
            context, value
        )));
    }
    Ok(())
}

fn ensure_length(len: usize, required: usize, context: &str) -> Result<()> {
    if len < required {
        return Err(AnalyticsError::invalid_input(format!(
            "{}: need at least {} values, got {}",
            context, required, len
        )));
    }
    Ok(())
}

fn ensure_period(period: usize, context: &str) -> Result<()> {
    if period == 0 {
        return Err(AnalyticsError::invalid_input(format!(
            "{}: period must be a positive integer",
            context
        )));
    }
    Ok(())
}

/// Simple moving average of the trailing `period` values.
pub fn sma(prices: &[f64], period: usize) -> Result<f64> {
    ensure_period(period, "sma")?;
    ensure_length(prices.len(), period, "sma")?;
    ensure_finite(prices, "sma")?;
    let window = &prices[prices.len() - period..];
    Ok(window.iter().sum::<f64>() / period as f64)
}

/// Population standard deviation of the full slice.
pub fn population_std_dev(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    variance.sqrt()
}

/// Exponential moving average.
///
/// Seeded with the SMA of the first `period` values, then
/// `price * k + prev * (1 - k)` with `k = 2 / (period + 1)`. The returned
/// sequence starts at price index `period - 1`.
pub fn ema(prices: &[f64], period: usize) -> Result<Vec<f64>> {
    ensure_period(period, "ema")?;
    if prices.is_empty() {
        return Err(AnalyticsError::invalid_input("ema: empty input"));
    }
    ensure_length(prices.len(), period, "ema")?;
    ensure_finite(prices, "ema")?;

    let k = 2.0 / (period as f64 + 1.0);
    let seed = prices[..period].iter().sum::<f64>() / period as f64;

    let mut result = Vec::with_capacity(prices.len() - period + 1);
    result.push(seed);
    for &price in &prices[period..] {
        let prev = *result.last().expect("seeded above");
        result.push(price * k + prev * (1.0 - k));
    }
    Ok(result)
}

/// Relative Strength Index (Wilder smoothing).
///
/// Seed average gain/loss is the simple mean of the first `period` deltas;
/// subsequent values use `avg = (avg * (period - 1) + new) / period`. A
/// zero average loss maps to 100 (50 when the average gain is also zero).
/// The returned sequence starts at price index `period`.
pub fn rsi(prices: &[f64], period: usize) -> Result<Vec<f64>> {
    ensure_period(period, "rsi")?;
    ensure_length(prices.len(), period + 1, "rsi")?;
    ensure_finite(prices, "rsi")?;

    let deltas: Vec<f64> = prices.windows(2).map(|w| w[1] - w[0]).collect();

    let mut avg_gain = deltas[..period]
        .iter()
        .map(|&d| if d > 0.0 { d } else { 0.0 })
        .sum::<f64>()
        / period as f64;
    let mut avg_loss = deltas[..period]
        .iter()
        .map(|&d| if d < 0.0 { -d } else { 0.0 })
        .sum::<f64>()
        / period as f64;

    let mut result = Vec::with_capacity(deltas.len() - period + 1);
    result.push(rsi_value(avg_gain, avg_loss)?);

    for &delta in &deltas[period..] {
        let gain = if delta > 0.0 { delta } else { 0.0 };
        let loss = if delta < 0.0 { -delta } else { 0.0 };
        avg_gain = (avg_gain * (period as f64 - 1.0) + gain) / period as f64;
        avg_loss = (avg_loss * (period as f64 - 1.0) + loss) / period as f64;
        result.push(rsi_value(avg_gain, avg_loss)?);
    }
    Ok(result)
}

fn rsi_value(avg_gain: f64, avg_loss: f64) -> Result<f64> {
    let value = if avg_loss == 0.0 {
        if avg_gain == 0.0 {
            50.0
        } else {
            100.0
        }
    } else {
        let rs = avg_gain / avg_loss;
        100.0 - 100.0 / (1.0 + rs)
    };
    if !(0.0..=100.0).contains(&value) {
        return Err(AnalyticsError::computation(format!(
            "rsi outside [0, 100]: {}",
            value
        )));
    }
    Ok(value)
}

/// Moving Average Convergence Divergence for the latest bar.
///
/// The fast and slow EMA sequences are aligned by trimming the longer one
/// from the front; the signal line is an EMA of the MACD line.
pub fn macd(prices: &[f64], fast: usize, slow: usize, signal: usize) -> Result<MacdTriple> {
    ensure_period(fast, "macd")?;
    ensure_period(signal, "macd")?;
    if fast >= slow {
        return Err(AnalyticsError::invalid_input(format!(
            "macd: fast period {} must be shorter than slow period {}",
            fast, slow
        )));
    }
    ensure_length(prices.len(), slow + signal, "macd")?;

    let fast_ema = ema(prices, fast)?;
    let slow_ema = ema(prices, slow)?;

    let offset = slow - fast;
    let macd_line: Vec<f64> = (0..slow_ema.len())
        .map(|i| fast_ema[i + offset] - slow_ema[i])
        .collect();

    let signal_ema = ema(&macd_line, signal)?;

    let macd_value = *macd_line.last().expect("macd line non-empty");
    let signal_value = *signal_ema.last().expect("signal line non-empty");
    Ok(MacdTriple {
        macd: macd_value,
        signal: signal_value,
        histogram: macd_value - signal_value,
    })
}

/// Average True Range (Wilder RMA) for the latest bar.
///
/// `TR = max(high - low, |high - prev close|, |low - prev close|)`; the seed
/// is the simple mean of the first `period` true ranges.
pub fn atr(candles: &[Candle], period: usize) -> Result<f64> {
    let series = atr_series(candles, period)?;
    Ok(*series.last().expect("atr series is non-empty"))
}

/// Full Wilder-smoothed ATR sequence, seed first. The regime detector ranks
/// the latest reading against this series.
pub fn atr_series(candles: &[Candle], period: usize) -> Result<Vec<f64>> {
    ensure_period(period, "atr")?;
    ensure_length(candles.len(), period + 1, "atr")?;

    for (i, candle) in candles.iter().enumerate() {
        if !(candle.high.is_finite() && candle.low.is_finite() && candle.close.is_finite()) {
            return Err(AnalyticsError::invalid_input(format!(
                "atr: non-finite candle at index {}",
                i
            )));
        }
        if candle.high < candle.low {
            return Err(AnalyticsError::invalid_input(format!(
                "atr: high {} below low {} at index {}",
                candle.high, candle.low, i
            )));
        }
        if candle.high <= 0.0 || candle.low <= 0.0 || candle.close <= 0.0 {
            return Err(AnalyticsError::invalid_input(format!(
                "atr: non-positive price at index {}",
                i
            )));
        }
    }

    let true_ranges: Vec<f64> = candles
        .windows(2)
        .map(|w| {
            let hl = w[1].high - w[1].low;
            let hc = (w[1].high - w[0].close).abs();
            let lc = (w[1].low - w[0].close).abs();
            hl.max(hc).max(lc)
        })
        .collect();

    let mut series = Vec::with_capacity(true_ranges.len() - period + 1);
    let seed = true_ranges[..period].iter().sum::<f64>() / period as f64;
    series.push(seed);
    for &tr in &true_ranges[period..] {
        let prev = *series.last().expect("seeded above");
        series.push((prev * (period as f64 - 1.0) + tr) / period as f64);
    }

    if series.iter().any(|&v| v < 0.0) {
        return Err(AnalyticsError::computation("atr went negative".to_string()));
    }
    Ok(series)
}

/// Bollinger Bands over the trailing window.
///
/// Middle band is the SMA; the envelope is `middle ± k * sigma` with the
/// population standard deviation. A negative lower band is valid output.
pub fn bollinger_bands(prices: &[f64], period: usize, k: f64) -> Result<BollingerBands> {
    ensure_period(period, "bollinger_bands")?;
    ensure_length(prices.len(), period, "bollinger_bands")?;
    ensure_finite(prices, "bollinger_bands")?;
    if !k.is_finite() || k < 0.0 {
        return Err(AnalyticsError::invalid_input(format!(
            "bollinger_bands: multiplier must be finite and non-negative, got {}",
            k
        )));
    }

    let window = &prices[prices.len() - period..];
    let middle = window.iter().sum::<f64>() / period as f64;
    let sigma = population_std_dev(window);
    let bands = BollingerBands {
        upper: middle + k * sigma,
        middle,
        lower: middle - k * sigma,
    };

    if !(bands.upper >= bands.middle && bands.middle >= bands.lower) {
        return Err(AnalyticsError::computation(format!(
            "bollinger band ordering violated: {:?}",
            bands
        )));
    }
    Ok(bands)
}

/// Donchian channel: max high / min low / midpoint over the trailing window.
pub fn donchian_channel(candles: &[Candle], period: usize) -> Result<DonchianChannel> {
    ensure_period(period, "donchian_channel")?;
    ensure_length(candles.len(), period, "donchian_channel")?;

    let window = &candles[candles.len() - period..];
    let mut upper = f64::NEG_INFINITY;
    let mut lower = f64::INFINITY;
    for candle in window {
        if !candle.high.is_finite() || !candle.low.is_finite() {
            return Err(AnalyticsError::invalid_input(
                "donchian_channel: non-finite candle",
            ));
        }
        upper = upper.max(candle.high);
        lower = lower.min(candle.low);
    }
    Ok(DonchianChannel {
        upper,
        lower,
        middle: (upper + lower) / 2.0,
    })
}

/// ADX with +DI / -DI (Wilder smoothing throughout).
///
/// Needs `2 * period + 1` candles: one period to seed the smoothed DM/TR
/// sums, another to seed the ADX average of DX values.
pub fn adx(candles: &[Candle], period: usize) -> Result<AdxReading> {
    ensure_period(period, "adx")?;
    ensure_length(candles.len(), 2 * period + 1, "adx")?;

    let n = candles.len();
    let mut plus_dm = Vec::with_capacity(n - 1);
    let mut minus_dm = Vec::with_capacity(n - 1);
    let mut tr = Vec::with_capacity(n - 1);

    for w in candles.windows(2) {
        let (prev, cur) = (&w[0], &w[1]);
        if !(cur.high.is_finite() && cur.low.is_finite() && prev.close.is_finite()) {
            return Err(AnalyticsError::invalid_input("adx: non-finite candle"));
        }
        let up_move = cur.high - prev.high;
        let down_move = prev.low - cur.low;
        plus_dm.push(if up_move > down_move && up_move > 0.0 {
            up_move
        } else {
            0.0
        });
        minus_dm.push(if down_move > up_move && down_move > 0.0 {
            down_move
        } else {
            0.0
        });
        let range = (cur.high - cur.low)
            .max((cur.high - prev.close).abs())
            .max((cur.low - prev.close).abs());
        tr.push(range);
    }

    // Wilder-smoothed running sums, seeded with plain sums of the first period.
    let mut smooth_plus: f64 = plus_dm[..period].iter().sum();
    let mut smooth_minus: f64 = minus_dm[..period].iter().sum();
    let mut smooth_tr: f64 = tr[..period].iter().sum();

    let mut dx_values = Vec::new();
    let mut plus_di = 0.0;
    let mut minus_di = 0.0;

    for i in period..tr.len() {
        smooth_plus = smooth_plus - smooth_plus / period as f64 + plus_dm[i];
        smooth_minus = smooth_minus - smooth_minus / period as f64 + minus_dm[i];
        smooth_tr = smooth_tr - smooth_tr / period as f64 + tr[i];

        if smooth_tr <= 0.0 {
            plus_di = 0.0;
            minus_di = 0.0;
            dx_values.push(0.0);
            continue;
        }
        plus_di = 100.0 * smooth_plus / smooth_tr;
        minus_di = 100.0 * smooth_minus / smooth_tr;
        let di_sum = plus_di + minus_di;
        dx_values.push(if di_sum == 0.0 {
            0.0
        } else {
            100.0 * (plus_di - minus_di).abs() / di_sum
        });
    }

    // ADX: simple mean of the first `period` DX values, then Wilder RMA.
    let mut adx_value = dx_values[..period].iter().sum::<f64>() / period as f64;
    for &dx in &dx_values[period..] {
        adx_value = (adx_value * (period as f64 - 1.0) + dx) / period as f64;
    }

    Ok(AdxReading {
        adx: adx_value,
        plus_di,
        minus_di,
    })
}
