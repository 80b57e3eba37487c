//! # Quantitative Analysis Engine
//!
//! Decision-support core for the perp trading bot: turns OHLCV candles and
//! funding observations into indicators, statistical profiles, regime
//! classifications, win-rate estimates and Monte Carlo risk verdicts, then
//! rolls everything into per-symbol bundles plus a deterministic text block
//! for the AI context layer.
//!
//! Component order, leaves first: `indicators` (pure calculators), `stats` /
//! `patterns` / `probability` (the analyzer), `regime`, `funding`,
//! `monte_carlo`, `cache` (TTL+LRU with single-flight), and `engine`, which
//! owns all mutable state and the background sweeps.
//!
//! Out of scope, consumed through [`provider::MarketDataSource`]: the
//! exchange wire client, persistence, AI prompt text, execution.

pub mod cache;
pub mod config;
pub mod engine;
pub mod error;
pub mod funding;
pub mod indicators;
pub mod monte_carlo;
pub mod patterns;
pub mod probability;
pub mod provider;
pub mod regime;
pub mod stats;
pub mod summary;
pub mod testing;

pub use cache::{CacheStats, CoalescingCache};
pub use config::{CacheConfig, EngineConfig, FundingConfig, MonteCarloConfig, RegimeConfig};
pub use engine::{AnalyticsEngine, CrossAssetSummary, MarketSnapshot, SymbolAnalysis};
pub use error::{AnalyticsError, Result};
pub use funding::{FundingAnalysis, FundingSignal, FundingTracker};
pub use indicators::IndicatorSet;
pub use monte_carlo::{
    DirectionalEdge, MonteCarloResult, MonteCarloSimulator, Recommendation, TradeDirection,
    TradeScenario,
};
pub use patterns::{PatternFindings, PatternTag, TrendDirection, VolumeProfile};
pub use probability::{EntryBucket, ProbabilityMetrics};
pub use provider::MarketDataSource;
pub use regime::{
    OverallRegime, RegimeDetector, RegimeInputs, RegimeState, TradingDifficulty, TrendRegime,
    VolatilityRegime,
};
pub use stats::{MeanReversionSignal, SignalDirection, StatisticalProfile};
pub use summary::render_snapshot;
