//! Analysis orchestrator
//!
//! One engine instance owns every piece of mutable state: the coalescing
//! caches, the regime history, the funding store, and the background sweep
//! task. Construction validates configuration; `shutdown` stops every timer.
//! Per-symbol failures degrade that symbol and never abort a batch.

use crate::cache::CoalescingCache;
use crate::config::EngineConfig;
use crate::error::{AnalyticsError, Result};
use crate::funding::{FundingAnalysis, FundingTracker};
use crate::indicators::{self, IndicatorSet};
use crate::monte_carlo::{DirectionalEdge, MonteCarloSimulator};
use crate::patterns::PatternFindings;
use crate::probability::ProbabilityMetrics;
use crate::provider::MarketDataSource;
use crate::regime::{OverallRegime, RegimeDetector, RegimeInputs, RegimeState};
use crate::stats::{self, MeanReversionSignal, StatisticalProfile};
use futures::future::join_all;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};
use types::{Candle, Interval};

/// Trailing bars for the average-volume liquidity baseline.
const AVG_VOLUME_WINDOW: usize = 20;

/// Complete per-symbol analysis bundle handed to the AI consumer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SymbolAnalysis {
    pub symbol: String,
    pub price: f64,
    pub analyzed_at_ms: u64,
    pub indicators: IndicatorSet,
    pub statistics: StatisticalProfile,
    pub mean_reversion: MeanReversionSignal,
    pub patterns: PatternFindings,
    pub probability: ProbabilityMetrics,
    pub regime: RegimeState,
    pub funding: FundingAnalysis,
    pub monte_carlo: DirectionalEdge,
    /// Close window kept for cross-asset correlation; not part of the
    /// serialized consumer payload.
    #[serde(skip)]
    pub closes: Vec<f64>,
}

/// Cross-asset rollup over the analyzed universe.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrossAssetSummary {
    pub reference_symbol: String,
    /// Log-return correlation of each symbol against the reference
    pub correlations: Vec<(String, f64)>,
    /// Mean of the non-reference correlations
    pub avg_correlation: f64,
    pub dominant_regime: OverallRegime,
    pub regime_counts: Vec<(OverallRegime, usize)>,
}

/// One batch result. Always produced, even when every symbol degraded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketSnapshot {
    pub timestamp_ms: u64,
    pub symbols: Vec<SymbolAnalysis>,
    pub excluded: Vec<String>,
    pub summary: Option<CrossAssetSummary>,
}

/// Shared innards reachable from cache-computation futures.
struct EngineCore {
    config: EngineConfig,
    source: Arc<dyn MarketDataSource>,
    candle_cache: Arc<CoalescingCache<Vec<Candle>>>,
    long_candle_cache: Arc<CoalescingCache<Vec<Candle>>>,
    regime: RegimeDetector,
    funding: FundingTracker,
    simulator: MonteCarloSimulator,
}

/// The quantitative analysis engine. Construct once, share by reference;
/// tests build fresh instances instead of resetting globals.
pub struct AnalyticsEngine {
    core: Arc<EngineCore>,
    context_cache: Arc<CoalescingCache<SymbolAnalysis>>,
    history_sweep: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for AnalyticsEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnalyticsEngine").finish_non_exhaustive()
    }
}

impl AnalyticsEngine {
    /// Validate configuration and assemble the engine. Must run inside a
    /// tokio runtime: the expiry sweeps are spawned here.
    pub fn new(config: EngineConfig, source: Arc<dyn MarketDataSource>) -> Result<Self> {
        config.validate()?;

        let candle_cache = Arc::new(CoalescingCache::new(
            "candles",
            config.cache.indicator_ttl(),
            config.cache.max_entries,
        ));
        let long_candle_cache = Arc::new(CoalescingCache::new(
            "candles_long",
            config.cache.long_interval_ttl(),
            config.cache.max_entries,
        ));
        let context_cache = Arc::new(CoalescingCache::new(
            "context",
            config.cache.context_ttl(),
            config.cache.max_entries,
        ));

        let sweep_interval = config.cache.sweep_interval();
        candle_cache.start_sweep(sweep_interval);
        long_candle_cache.start_sweep(sweep_interval);
        context_cache.start_sweep(sweep_interval);

        let core = Arc::new(EngineCore {
            regime: RegimeDetector::new(config.regime.clone()),
            funding: FundingTracker::new(config.funding.clone()),
            simulator: MonteCarloSimulator::new(config.monte_carlo.clone()),
            candle_cache,
            long_candle_cache,
            source,
            config,
        });

        let history_sweep = Mutex::new(Some(Self::spawn_history_sweep(
            Arc::downgrade(&core),
            sweep_interval,
        )));

        info!(
            symbols = core.config.symbols.len(),
            interval = %core.config.interval,
            "analytics engine initialized"
        );

        Ok(Self {
            core,
            context_cache,
            history_sweep,
        })
    }

    fn spawn_history_sweep(
        core: Weak<EngineCore>,
        interval: tokio::time::Duration,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                match core.upgrade() {
                    Some(core) => {
                        let now = now_ms();
                        core.regime.prune(now);
                        core.funding.prune(now);
                    }
                    None => break,
                }
            }
        })
    }

    /// Stop every background sweep. Idempotent; required before dropping the
    /// runtime in tests.
    pub fn shutdown(&self) {
        if let Some(handle) = self.history_sweep.lock().take() {
            handle.abort();
        }
        self.core.candle_cache.shutdown();
        self.core.long_candle_cache.shutdown();
        self.context_cache.shutdown();
        debug!("analytics engine shut down");
    }

    pub fn config(&self) -> &EngineConfig {
        &self.core.config
    }

    /// Analyze one symbol through the context cache; concurrent callers for
    /// the same symbol share a single computation.
    pub async fn analyze_symbol(&self, symbol: &str) -> Result<SymbolAnalysis> {
        let key = format!("{}:{}", symbol, self.core.config.interval);
        let core = self.core.clone();
        let owned = symbol.to_string();
        self.context_cache
            .get_or_compute(&key, move || core.analyze_symbol_uncached(owned))
            .await
    }

    /// Analyze the configured universe concurrently. Failing symbols are
    /// logged and excluded; the batch always returns a snapshot.
    pub async fn analyze_all(&self) -> MarketSnapshot {
        let symbols = self.core.config.symbols.clone();
        let results = join_all(symbols.iter().map(|symbol| async {
            (symbol.clone(), self.analyze_symbol(symbol).await)
        }))
        .await;

        let mut analyzed = Vec::new();
        let mut excluded = Vec::new();
        for (symbol, result) in results {
            match result {
                Ok(analysis) => analyzed.push(analysis),
                Err(error) if error.is_isolatable() => {
                    warn!(symbol = %symbol, %error, "symbol degraded, excluding from batch");
                    excluded.push(symbol);
                }
                Err(error) => {
                    // Configuration problems cannot appear this late; treat
                    // defensively as a degraded symbol rather than a panic.
                    warn!(symbol = %symbol, %error, "unexpected fatal error for symbol");
                    excluded.push(symbol);
                }
            }
        }

        let summary = cross_asset_summary(&analyzed);
        MarketSnapshot {
            timestamp_ms: now_ms(),
            symbols: analyzed,
            excluded,
            summary,
        }
    }
}

impl Drop for AnalyticsEngine {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl EngineCore {
    /// Fetch-and-compute pipeline for one symbol; runs at most once per
    /// cache window thanks to the context cache's single-flight map.
    async fn analyze_symbol_uncached(self: Arc<Self>, symbol: String) -> Result<SymbolAnalysis> {
        let interval = self.config.interval;
        let long_interval = self.config.long_interval;
        let limit = self.config.candle_limit;

        let candle_cache = self.candle_cache.clone();
        let long_cache = self.long_candle_cache.clone();
        let candles = self
            .fetch_candles(&candle_cache, &symbol, interval, limit)
            .await?;
        let long_candles = self
            .fetch_candles(&long_cache, &symbol, long_interval, limit)
            .await?;

        let closes = types::closes(&candles);
        let price = *closes.last().expect("validated non-empty");
        let now = now_ms();

        let set = IndicatorSet::compute(&candles)?;
        let long_set = IndicatorSet::compute(&long_candles)?;

        let statistics = StatisticalProfile::compute(&closes, interval.periods_per_year())?;
        let mean_reversion = statistics.mean_reversion_signal();
        let patterns = PatternFindings::compute(&candles)?;
        let probability =
            ProbabilityMetrics::compute(&closes, statistics.z_score, set.atr, &patterns)?;

        let regime_state = self.regime.classify(
            &symbol,
            &self.regime_inputs(&candles, &set, &long_set, &statistics)?,
            now,
        )?;

        let funding_rate = self.source.get_funding_rate(&symbol).await?;
        let funding = self.funding.observe(&symbol, funding_rate, now)?;

        // Per-step volatility backs out the annualization; drift comes from
        // the regression slope (percent per bar, signed).
        let step_volatility_pct =
            statistics.annualized_volatility / interval.periods_per_year().sqrt();
        let mut rng = StdRng::from_entropy();
        let monte_carlo = self.simulator.directional_edge(
            step_volatility_pct,
            patterns.trend.slope_pct,
            probability.optimal_stop_pct,
            probability.optimal_target_pct,
            &mut rng,
        )?;

        debug!(
            symbol = %symbol,
            price,
            regime = regime_state.overall.as_str(),
            quality = probability.entry_quality,
            "symbol analysis complete"
        );

        Ok(SymbolAnalysis {
            symbol,
            price,
            analyzed_at_ms: now,
            indicators: set,
            statistics,
            mean_reversion,
            patterns,
            probability,
            regime: regime_state,
            funding,
            monte_carlo,
            closes,
        })
    }

    /// Pull a candle window through a coalescing cache and validate it at
    /// the boundary. Invalid candles are filtered as whole bars so the
    /// OHLCV arrays never desynchronize.
    async fn fetch_candles(
        self: &Arc<Self>,
        cache: &Arc<CoalescingCache<Vec<Candle>>>,
        symbol: &str,
        interval: Interval,
        limit: usize,
    ) -> Result<Vec<Candle>> {
        let key = format!("{}:{}", symbol, interval);
        let source = self.source.clone();
        let owned = symbol.to_string();
        let candles = cache
            .get_or_compute(&key, move || async move {
                let mut candles = source.get_candles(&owned, interval, limit).await?;
                let before = candles.len();
                candles.retain(|candle| candle.validate().is_ok());
                if candles.len() < before {
                    warn!(
                        symbol = %owned,
                        dropped = before - candles.len(),
                        "dropped malformed candles from upstream window"
                    );
                }
                types::validate_series(&candles)?;
                Ok(candles)
            })
            .await?;

        if candles.len() < 60 {
            return Err(AnalyticsError::upstream(format!(
                "{}: insufficient candles ({}) for analysis window",
                symbol,
                candles.len()
            )));
        }
        Ok(candles)
    }

    /// Build the regime snapshot: primary-window volatility and liquidity,
    /// long-window trend structure.
    fn regime_inputs(
        &self,
        candles: &[Candle],
        set: &IndicatorSet,
        long_set: &IndicatorSet,
        statistics: &StatisticalProfile,
    ) -> Result<RegimeInputs> {
        let atr_values = indicators::atr_series(candles, indicators::ATR_PERIOD)?;
        let current_atr = *atr_values.last().expect("non-empty by contract");
        let volumes = types::volumes(candles);
        let avg_volume = stats::mean(&volumes[volumes.len().saturating_sub(AVG_VOLUME_WINDOW)..]);

        Ok(RegimeInputs {
            atr: current_atr,
            avg_atr: stats::mean(&atr_values),
            atr_percentile: stats::percentile_rank(&atr_values, current_atr),
            adx: long_set.adx.adx,
            plus_di: long_set.adx.plus_di,
            minus_di: long_set.adx.minus_di,
            ema_fast: *long_set.ema_fast.last().expect("warm-up enforced"),
            ema_mid: *long_set.ema_mid.last().expect("warm-up enforced"),
            ema_slow: *long_set.ema_slow.last().expect("warm-up enforced"),
            volume: volumes.last().copied().unwrap_or(0.0),
            avg_volume,
            bollinger_width: set.bollinger.width(),
            volatility_expanding: statistics.volatility_expanding,
        })
    }
}

/// Correlations against the reference symbol plus regime dominance.
fn cross_asset_summary(analyzed: &[SymbolAnalysis]) -> Option<CrossAssetSummary> {
    let reference = analyzed.first()?;
    let reference_returns = stats::log_returns(&reference.closes);

    let mut correlations = Vec::with_capacity(analyzed.len());
    let mut sum = 0.0;
    let mut counted = 0usize;
    for analysis in analyzed {
        let correlation = if analysis.symbol == reference.symbol {
            1.0
        } else {
            let returns = stats::log_returns(&analysis.closes);
            let c = stats::pearson_correlation(&reference_returns, &returns);
            sum += c;
            counted += 1;
            c
        };
        correlations.push((analysis.symbol.clone(), correlation));
    }

    let mut counts: HashMap<OverallRegime, usize> = HashMap::new();
    for analysis in analyzed {
        *counts.entry(analysis.regime.overall).or_insert(0) += 1;
    }
    let mut regime_counts: Vec<(OverallRegime, usize)> = counts.into_iter().collect();
    // Ties break on the regime name so the rollup is deterministic.
    regime_counts.sort_by_key(|&(regime, count)| (std::cmp::Reverse(count), regime.as_str()));
    let dominant_regime = regime_counts.first().map(|&(regime, _)| regime)?;

    Some(CrossAssetSummary {
        reference_symbol: reference.symbol.clone(),
        correlations,
        avg_correlation: if counted == 0 { 0.0 } else { sum / counted as f64 },
        dominant_regime,
        regime_counts,
    })
}

/// Wall-clock milliseconds.
pub(crate) fn now_ms() -> u64 {
    chrono::Utc::now().timestamp_millis().max(0) as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockDataSource;

    fn engine_with(source: Arc<MockDataSource>) -> AnalyticsEngine {
        AnalyticsEngine::new(EngineConfig::default(), source).unwrap()
    }

    #[tokio::test]
    async fn test_single_symbol_analysis_bundle() {
        let source = Arc::new(MockDataSource::new());
        let engine = engine_with(source.clone());

        let analysis = engine.analyze_symbol("BTC").await.unwrap();
        assert_eq!(analysis.symbol, "BTC");
        assert!(analysis.price > 0.0);
        assert!(analysis
            .indicators
            .rsi
            .iter()
            .all(|&v| (0.0..=100.0).contains(&v)));
        assert!(analysis.probability.optimal_stop_pct >= 0.5);
        assert!(analysis.probability.optimal_stop_pct <= 5.0);
        assert_eq!(analysis.regime.duration, 1);
        engine.shutdown();
    }

    #[tokio::test]
    async fn test_context_cache_reuses_analysis() {
        let source = Arc::new(MockDataSource::new());
        let engine = engine_with(source.clone());

        engine.analyze_symbol("BTC").await.unwrap();
        engine.analyze_symbol("BTC").await.unwrap();
        // Primary + long interval fetches happen exactly once each.
        assert_eq!(source.candle_calls(), 2);
        assert_eq!(source.funding_calls(), 1);
        engine.shutdown();
    }

    #[tokio::test]
    async fn test_batch_isolates_failing_symbol() {
        let source = Arc::new(MockDataSource::new());
        source.set_failing("ETH");
        let engine = engine_with(source.clone());

        let snapshot = engine.analyze_all().await;
        assert_eq!(snapshot.excluded, vec!["ETH".to_string()]);
        assert_eq!(snapshot.symbols.len(), 2);
        let summary = snapshot.summary.unwrap();
        assert_eq!(summary.reference_symbol, "BTC");
        assert_eq!(summary.correlations.len(), 2);
        engine.shutdown();
    }

    #[tokio::test]
    async fn test_batch_survives_total_failure() {
        let source = Arc::new(MockDataSource::new());
        for symbol in ["BTC", "ETH", "SOL"] {
            source.set_failing(symbol);
        }
        let engine = engine_with(source);

        let snapshot = engine.analyze_all().await;
        assert!(snapshot.symbols.is_empty());
        assert_eq!(snapshot.excluded.len(), 3);
        assert!(snapshot.summary.is_none());
        engine.shutdown();
    }

    #[tokio::test]
    async fn test_invalid_config_fails_construction() {
        let source = Arc::new(MockDataSource::new());
        let config = EngineConfig {
            symbols: vec![],
            ..Default::default()
        };
        let err = AnalyticsEngine::new(config, source).unwrap_err();
        assert!(matches!(err, AnalyticsError::Configuration { .. }));
    }

    #[tokio::test]
    async fn test_insufficient_candles_degrade_symbol() {
        let source = Arc::new(MockDataSource::new());
        source.set_candles(
            "BTC",
            Interval::Hour1,
            crate::testing::synthetic_candles(1, Interval::Hour1, 10),
        );
        let engine = engine_with(source);
        let err = engine.analyze_symbol("BTC").await.unwrap_err();
        assert!(matches!(err, AnalyticsError::UpstreamData { .. }));
        engine.shutdown();
    }

    #[tokio::test]
    async fn test_consumer_payload_serializes_without_raw_closes() {
        let source = Arc::new(MockDataSource::new());
        let engine = engine_with(source);
        let analysis = engine.analyze_symbol("BTC").await.unwrap();

        let payload = serde_json::to_value(&analysis).unwrap();
        assert!(payload.get("indicators").is_some());
        assert!(payload.get("regime").is_some());
        assert!(payload.get("monte_carlo").is_some());
        // The close window is engine-internal, not consumer payload.
        assert!(payload.get("closes").is_none());
        engine.shutdown();
    }

    #[tokio::test]
    async fn test_shutdown_is_idempotent() {
        let source = Arc::new(MockDataSource::new());
        let engine = engine_with(source);
        engine.shutdown();
        engine.shutdown();
    }
}
