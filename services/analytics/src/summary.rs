//! Deterministic plain-text rendering for prompt embedding
//!
//! The consuming AI layer diffs and embeds this block, so field order is
//! fixed and every number is rounded to a fixed width: prices and ratios to
//! 2 decimals, percentages to 2, rates to 4.

use crate::engine::{MarketSnapshot, SymbolAnalysis};
use crate::stats::SignalDirection;
use chrono::{TimeZone, Utc};
use std::fmt::Write;

/// Render the full snapshot, one block per symbol in batch order, followed
/// by the cross-asset rollup.
pub fn render_snapshot(snapshot: &MarketSnapshot) -> String {
    let mut out = String::new();
    let stamp = Utc
        .timestamp_millis_opt(snapshot.timestamp_ms as i64)
        .single()
        .map(|dt| dt.format("%Y-%m-%dT%H:%M:%SZ").to_string())
        .unwrap_or_else(|| snapshot.timestamp_ms.to_string());

    let _ = writeln!(out, "=== MARKET ANALYSIS {} ===", stamp);
    let _ = writeln!(
        out,
        "symbols: {} analyzed, {} unavailable",
        snapshot.symbols.len(),
        snapshot.excluded.len()
    );
    if !snapshot.excluded.is_empty() {
        let _ = writeln!(out, "unavailable: {}", snapshot.excluded.join(", "));
    }
    let _ = writeln!(out);

    for analysis in &snapshot.symbols {
        render_symbol(&mut out, analysis);
        let _ = writeln!(out);
    }

    if let Some(summary) = &snapshot.summary {
        let _ = writeln!(out, "--- CROSS-ASSET ---");
        let _ = writeln!(
            out,
            "regime: {} dominant | avg correlation vs {}: {:.2}",
            summary.dominant_regime.as_str(),
            summary.reference_symbol,
            summary.avg_correlation
        );
        for (symbol, correlation) in &summary.correlations {
            let _ = writeln!(out, "  corr[{}] = {:.2}", symbol, correlation);
        }
    }

    out
}

/// Render one symbol's bundle with a stable field order.
pub fn render_symbol(out: &mut String, a: &SymbolAnalysis) {
    let _ = writeln!(out, "[{}] price={:.2}", a.symbol, a.price);

    let s = &a.statistics;
    let _ = writeln!(
        out,
        "  stats: z={:.2} pct={:.2} vol_ann={:.2}% vol_pct={:.2} expanding={} dist_mean={:.2}%",
        s.z_score,
        s.percentile,
        s.annualized_volatility,
        s.volatility_percentile,
        s.volatility_expanding,
        s.distance_from_mean_pct
    );

    if a.mean_reversion.direction != SignalDirection::Neutral {
        let _ = writeln!(
            out,
            "  mean_reversion: {} confidence={:.0}",
            a.mean_reversion.direction.as_str(),
            a.mean_reversion.confidence
        );
    }

    let ind = &a.indicators;
    let _ = writeln!(
        out,
        "  indicators: rsi={:.2} macd_hist={:.4} atr={:.4} bb=[{:.2}/{:.2}/{:.2}] adx={:.2}",
        ind.latest_rsi(),
        ind.macd.histogram,
        ind.atr,
        ind.bollinger.lower,
        ind.bollinger.middle,
        ind.bollinger.upper,
        ind.adx.adx
    );

    let t = &a.patterns.trend;
    let _ = writeln!(
        out,
        "  trend: {} strength={:.2} duration={}",
        t.direction.as_str(),
        t.strength,
        t.duration
    );

    let levels = &a.patterns.levels;
    let support = levels
        .support
        .map(|l| format!("{:.2} (x{})", l.price, l.touches))
        .unwrap_or_else(|| "none".to_string());
    let resistance = levels
        .resistance
        .map(|l| format!("{:.2} (x{})", l.price, l.touches))
        .unwrap_or_else(|| "none".to_string());
    let _ = writeln!(out, "  levels: support={} resistance={}", support, resistance);

    let v = &a.patterns.volume;
    let _ = writeln!(
        out,
        "  volume: {} score={} anomaly={}",
        v.profile.as_str(),
        v.score,
        v.anomaly
    );

    if !a.patterns.patterns.is_empty() {
        let tags: Vec<&str> = a.patterns.patterns.iter().map(|p| p.as_str()).collect();
        let _ = writeln!(out, "  patterns: {}", tags.join(", "));
    }

    let p = &a.probability;
    let _ = writeln!(
        out,
        "  probability: long_wr={:.2}% short_wr={:.2}% samples={} stop={:.2}% target={:.2}% quality={:.2} ({})",
        p.long_win_rate,
        p.short_win_rate,
        p.sample_count,
        p.optimal_stop_pct,
        p.optimal_target_pct,
        p.entry_quality,
        p.entry_bucket.as_str()
    );

    let r = &a.regime;
    let _ = writeln!(
        out,
        "  regime: {} ({}) vol={:?} liq={:?} difficulty={} strategy={} lev={}-{}x stop_mult={:.2} confidence={:.0} transition={:.0}%",
        r.overall.as_str(),
        r.trend.as_str(),
        r.volatility,
        r.liquidity,
        r.difficulty.as_str(),
        r.guidance.strategy,
        r.guidance.leverage_min,
        r.guidance.leverage_max,
        r.guidance.stop_multiplier,
        r.regime_confidence,
        r.transition_probability
    );
    if let Some(warning) = &r.warning {
        let _ = writeln!(out, "  regime_warning: {}", warning);
    }

    let f = &a.funding;
    let _ = writeln!(
        out,
        "  funding: rate={:.4}% pct={:.2} extreme={} persistence={} signal={} strength={:.0} confidence={:.0}",
        f.current_rate * 100.0,
        f.percentile,
        f.is_extreme,
        f.persistence,
        f.signal.direction.as_str(),
        f.signal.strength,
        f.signal.confidence
    );

    let mc = &a.monte_carlo;
    let preferred = mc
        .preferred
        .map(|d| d.as_str())
        .unwrap_or("none");
    let _ = writeln!(
        out,
        "  monte_carlo: long EV={:.2}% wr={:.2}% sharpe={:.2} -> {} | short EV={:.2}% wr={:.2}% sharpe={:.2} -> {} | edge={} ({:.2})",
        mc.long.expected_value,
        mc.long.win_rate,
        mc.long.sharpe_ratio,
        mc.long.recommendation.as_str(),
        mc.short.expected_value,
        mc.short.win_rate,
        mc.short.sharpe_ratio,
        mc.short.recommendation.as_str(),
        preferred,
        mc.edge_strength
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::engine::AnalyticsEngine;
    use crate::testing::MockDataSource;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_snapshot_rendering_is_stable() {
        let source = Arc::new(MockDataSource::new());
        let engine = AnalyticsEngine::new(EngineConfig::default(), source).unwrap();
        let snapshot = engine.analyze_all().await;

        let text = render_snapshot(&snapshot);
        assert!(text.starts_with("=== MARKET ANALYSIS "));
        assert!(text.contains("[BTC] price="));
        assert!(text.contains("  stats: z="));
        assert!(text.contains("  monte_carlo: long EV="));
        assert!(text.contains("--- CROSS-ASSET ---"));

        // Same snapshot renders byte-identically.
        assert_eq!(text, render_snapshot(&snapshot));
        engine.shutdown();
    }

    #[tokio::test]
    async fn test_rendering_with_exclusions() {
        let source = Arc::new(MockDataSource::new());
        source.set_failing("SOL");
        let engine = AnalyticsEngine::new(EngineConfig::default(), source).unwrap();
        let snapshot = engine.analyze_all().await;

        let text = render_snapshot(&snapshot);
        assert!(text.contains("1 unavailable"));
        assert!(text.contains("unavailable: SOL"));
        engine.shutdown();
    }
}
