//! Engine-level concurrency and caching behavior
//!
//! Exercises the single-flight guarantee end to end: concurrent analyses of
//! the same symbol must share one upstream fetch, and cache/batch behavior
//! must hold through the public engine surface.

use analytics::testing::MockDataSource;
use analytics::{AnalyticsEngine, EngineConfig};
use std::sync::Arc;
use tokio::time::Duration;

fn engine(source: Arc<MockDataSource>) -> AnalyticsEngine {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    AnalyticsEngine::new(EngineConfig::default(), source).unwrap()
}

#[tokio::test]
async fn concurrent_same_symbol_analyses_share_one_fetch() {
    let source = Arc::new(MockDataSource::new());
    // Hold the upstream fetch open long enough for every caller to race
    // past the cache check.
    source.set_delay(Duration::from_millis(50));
    let engine = Arc::new(engine(source.clone()));

    let mut handles = Vec::new();
    for _ in 0..6 {
        let engine = engine.clone();
        handles.push(tokio::spawn(async move {
            engine.analyze_symbol("BTC").await.unwrap()
        }));
    }
    for handle in handles {
        let analysis = handle.await.unwrap();
        assert_eq!(analysis.symbol, "BTC");
    }

    // One shared context computation: one primary + one long-interval
    // candle fetch, one funding call, regardless of caller count.
    assert_eq!(source.candle_calls(), 2);
    assert_eq!(source.funding_calls(), 1);
    engine.shutdown();
}

#[tokio::test]
async fn distinct_symbols_fetch_independently() {
    let source = Arc::new(MockDataSource::new());
    let engine = Arc::new(engine(source.clone()));

    let a = {
        let engine = engine.clone();
        tokio::spawn(async move { engine.analyze_symbol("BTC").await.unwrap() })
    };
    let b = {
        let engine = engine.clone();
        tokio::spawn(async move { engine.analyze_symbol("ETH").await.unwrap() })
    };
    a.await.unwrap();
    b.await.unwrap();

    assert_eq!(source.candle_calls(), 4, "two symbols, two intervals each");
    assert_eq!(source.funding_calls(), 2);
    engine.shutdown();
}

#[tokio::test]
async fn repeated_batches_hit_the_context_cache() {
    let source = Arc::new(MockDataSource::new());
    let engine = engine(source.clone());

    let first = engine.analyze_all().await;
    let calls_after_first = source.candle_calls();
    let second = engine.analyze_all().await;

    assert_eq!(first.symbols.len(), second.symbols.len());
    assert_eq!(
        source.candle_calls(),
        calls_after_first,
        "second batch inside the TTL must not refetch"
    );
    engine.shutdown();
}

#[tokio::test]
async fn regime_history_accumulates_across_fresh_analyses() {
    // A context TTL of zero forces a fresh pipeline run per call, so the
    // regime history sees one observation each time.
    let source = Arc::new(MockDataSource::new());
    let mut config = EngineConfig::default();
    config.cache.context_ttl_secs = 0;
    let engine = AnalyticsEngine::new(config, source).unwrap();

    let first = engine.analyze_symbol("BTC").await.unwrap();
    let second = engine.analyze_symbol("BTC").await.unwrap();
    let third = engine.analyze_symbol("BTC").await.unwrap();

    assert_eq!(first.regime.duration, 1);
    // Synthetic data is stable inside the candle TTL, so the regime holds
    // and the duration counter climbs.
    assert_eq!(second.regime.duration, 2);
    assert_eq!(third.regime.duration, 3);
    engine.shutdown();
}

#[tokio::test]
async fn failed_symbol_recovers_on_next_batch() {
    let source = Arc::new(MockDataSource::new());
    source.set_failing("ETH");
    let mut config = EngineConfig::default();
    config.cache.context_ttl_secs = 0;
    let engine = AnalyticsEngine::new(config, source.clone()).unwrap();

    let degraded = engine.analyze_all().await;
    assert_eq!(degraded.excluded, vec!["ETH".to_string()]);

    // Upstream heals; errors were never cached, so the symbol comes back.
    source.clear_failing("ETH");
    let healed = engine.analyze_all().await;
    assert!(healed.excluded.is_empty());
    assert_eq!(healed.symbols.len(), 3);
    engine.shutdown();
}
