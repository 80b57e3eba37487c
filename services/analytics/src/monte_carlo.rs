//! Fat-tailed Monte Carlo trade simulation
//!
//! Paths draw Student's-t(3) shocks (heavy tails) scaled by a GARCH(1,1)
//! volatility multiplier (clustering), applied multiplicatively to a price
//! normalized at 100. Each path exits at the stop, the target, or the
//! horizon; every path pays the round-trip trading cost. Results are created
//! fresh per call and never persisted.

use crate::config::MonteCarloConfig;
use crate::error::{AnalyticsError, Result};
use crate::stats::quantile;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

const MIN_SIMULATIONS: usize = 100;
const MAX_SIMULATIONS: usize = 1000;
const MIN_HORIZON: usize = 1;
const MAX_HORIZON: usize = 48;
/// Student's-t shocks are clamped to this many sigmas.
const SHOCK_CLAMP: f64 = 10.0;
/// GARCH variance bounds: multiplier stays within [0.5, 3.0].
const VARIANCE_FLOOR: f64 = 0.25;
const VARIANCE_CEILING: f64 = 9.0;
/// Annualization factor for the hourly-step Sharpe ratio.
const SHARPE_ANNUALIZER: f64 = 750.0;
/// Sharpe is reported as 0 below this dispersion.
const MIN_STD_FOR_SHARPE: f64 = 0.001;
/// A direction is worth taking above this Sharpe with positive EV.
const MIN_VALID_SHARPE: f64 = 1.2;
const EDGE_SHARPE_SCALE: f64 = 40.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradeDirection {
    Long,
    Short,
}

impl TradeDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            TradeDirection::Long => "long",
            TradeDirection::Short => "short",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Recommendation {
    StrongBuy,
    Buy,
    Hold,
    Avoid,
}

impl Recommendation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Recommendation::StrongBuy => "strong_buy",
            Recommendation::Buy => "buy",
            Recommendation::Hold => "hold",
            Recommendation::Avoid => "avoid",
        }
    }
}

/// One simulated trade setup. `drift_pct` is the signed per-step price
/// drift (positive = bullish); the equity recursion flips its sign for
/// shorts, so the same drift that helps a long hurts a short.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeScenario {
    pub direction: TradeDirection,
    /// Per-step volatility in percent
    pub step_volatility_pct: f64,
    /// Signed per-step price drift in percent (positive = bullish)
    pub drift_pct: f64,
    /// Stop loss distance in percent (positive)
    pub stop_loss_pct: f64,
    /// Take profit distance in percent (positive)
    pub take_profit_pct: f64,
}

impl TradeScenario {
    fn validate(&self) -> Result<()> {
        for (field, value) in [
            ("step_volatility_pct", self.step_volatility_pct),
            ("drift_pct", self.drift_pct),
            ("stop_loss_pct", self.stop_loss_pct),
            ("take_profit_pct", self.take_profit_pct),
        ] {
            if !value.is_finite() {
                return Err(AnalyticsError::invalid_input(format!(
                    "trade scenario: {} is not finite ({})",
                    field, value
                )));
            }
        }
        if self.step_volatility_pct < 0.0 {
            return Err(AnalyticsError::invalid_input(
                "trade scenario: volatility must be non-negative",
            ));
        }
        if self.stop_loss_pct <= 0.0 || self.take_profit_pct <= 0.0 {
            return Err(AnalyticsError::invalid_input(
                "trade scenario: stop and target must be positive",
            ));
        }
        Ok(())
    }
}

/// P&L percentile ladder from the simulated distribution.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PercentileLadder {
    pub p10: f64,
    pub p25: f64,
    pub p50: f64,
    pub p75: f64,
    pub p90: f64,
}

/// Aggregate verdict over all simulated paths. P&L figures are percentages
/// net of round-trip costs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonteCarloResult {
    pub direction: TradeDirection,
    pub expected_value: f64,
    /// Share of paths ending profitable (0-100)
    pub win_rate: f64,
    /// Worst losing path as a positive number; 0 when no path lost
    pub max_drawdown: f64,
    pub sharpe_ratio: f64,
    pub var_95: f64,
    pub var_99: f64,
    pub percentiles: PercentileLadder,
    pub simulations: usize,
    pub recommendation: Recommendation,
    pub reason: String,
}

/// Long/short comparison from two simulation runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirectionalEdge {
    pub preferred: Option<TradeDirection>,
    /// `min(100, best Sharpe * 40)`; 0 when neither direction is valid
    pub edge_strength: f64,
    pub long: MonteCarloResult,
    pub short: MonteCarloResult,
}

/// Simulator with fixed configuration; the RNG is injectable for
/// deterministic tests.
pub struct MonteCarloSimulator {
    config: MonteCarloConfig,
}

impl MonteCarloSimulator {
    pub fn new(config: MonteCarloConfig) -> Self {
        Self { config }
    }

    /// Run one scenario with an entropy-seeded RNG.
    pub fn run(&self, scenario: &TradeScenario) -> Result<MonteCarloResult> {
        let mut rng = StdRng::from_entropy();
        self.run_with_rng(scenario, &mut rng)
    }

    /// Run one scenario with a caller-supplied RNG.
    pub fn run_with_rng(
        &self,
        scenario: &TradeScenario,
        rng: &mut StdRng,
    ) -> Result<MonteCarloResult> {
        scenario.validate()?;

        let simulations = self.config.simulations.clamp(MIN_SIMULATIONS, MAX_SIMULATIONS);
        let horizon = self.config.horizon_steps.clamp(MIN_HORIZON, MAX_HORIZON);
        let round_trip_cost = self.config.fee_pct * 2.0;
        let alpha = self.config.garch_alpha;
        let beta = self.config.garch_beta;
        let omega = 1.0 - alpha - beta;
        let df = self.config.degrees_of_freedom;

        let stop = scenario.stop_loss_pct;
        let target = scenario.take_profit_pct;
        let signed_drift = match scenario.direction {
            TradeDirection::Long => scenario.drift_pct,
            TradeDirection::Short => -scenario.drift_pct,
        };

        let mut outcomes = Vec::with_capacity(simulations);
        for _ in 0..simulations {
            // `price` is the trade's normalized equity: drift is already
            // direction-adjusted, so P&L = price - 100 for both directions.
            let mut price = 100.0_f64;
            let mut variance = 1.0_f64;
            let mut pnl = 0.0_f64;
            let mut exited = false;

            for _ in 0..horizon {
                let t = student_t(rng, df).clamp(-SHOCK_CLAMP, SHOCK_CLAMP);
                let shock = t * variance.sqrt();
                let step_return_pct = shock * scenario.step_volatility_pct + signed_drift;
                price *= 1.0 + step_return_pct / 100.0;

                // Volatility clustering on the standardized shock.
                variance =
                    (omega + alpha * shock * shock + beta * variance)
                        .clamp(VARIANCE_FLOOR, VARIANCE_CEILING);

                if !price.is_finite() || price <= 0.0 {
                    // Equity collapse: the extreme adverse outcome for this
                    // direction.
                    pnl = -stop;
                    exited = true;
                    break;
                }

                pnl = price - 100.0;
                if pnl <= -stop {
                    pnl = -stop;
                    exited = true;
                    break;
                }
                if pnl >= target {
                    pnl = target;
                    exited = true;
                    break;
                }
            }

            if !exited {
                pnl = pnl.clamp(-stop, target);
            }
            outcomes.push(pnl - round_trip_cost);
        }

        Ok(aggregate(scenario.direction, outcomes, simulations))
    }

    /// Evaluate both directions of the same setup and pick the better valid
    /// one.
    pub fn directional_edge(
        &self,
        step_volatility_pct: f64,
        drift_pct: f64,
        stop_loss_pct: f64,
        take_profit_pct: f64,
        rng: &mut StdRng,
    ) -> Result<DirectionalEdge> {
        let long = self.run_with_rng(
            &TradeScenario {
                direction: TradeDirection::Long,
                step_volatility_pct,
                drift_pct,
                stop_loss_pct,
                take_profit_pct,
            },
            rng,
        )?;
        let short = self.run_with_rng(
            &TradeScenario {
                direction: TradeDirection::Short,
                step_volatility_pct,
                drift_pct,
                stop_loss_pct,
                take_profit_pct,
            },
            rng,
        )?;

        let valid = |r: &MonteCarloResult| {
            r.expected_value > 0.0 && r.sharpe_ratio >= MIN_VALID_SHARPE
        };

        let preferred = match (valid(&long), valid(&short)) {
            (true, true) => {
                if long.sharpe_ratio >= short.sharpe_ratio {
                    Some(TradeDirection::Long)
                } else {
                    Some(TradeDirection::Short)
                }
            }
            (true, false) => Some(TradeDirection::Long),
            (false, true) => Some(TradeDirection::Short),
            (false, false) => None,
        };

        let edge_strength = match preferred {
            Some(TradeDirection::Long) => (long.sharpe_ratio * EDGE_SHARPE_SCALE).min(100.0),
            Some(TradeDirection::Short) => (short.sharpe_ratio * EDGE_SHARPE_SCALE).min(100.0),
            None => 0.0,
        };

        Ok(DirectionalEdge {
            preferred,
            edge_strength,
            long,
            short,
        })
    }
}

/// Standard normal via Box-Muller.
fn standard_normal(rng: &mut StdRng) -> f64 {
    let u1: f64 = rng.gen();
    let u2: f64 = rng.gen();
    // Map [0, 1) to (0, 1] so the log stays finite.
    let u1 = (1.0 - u1).max(f64::MIN_POSITIVE);
    (-2.0 * u1.ln()).sqrt() * (std::f64::consts::TAU * u2).cos()
}

/// Student's-t variate: a standard normal over the square root of a
/// chi-squared (sum of `df` squared normals) divided by `df`.
fn student_t(rng: &mut StdRng, df: u32) -> f64 {
    let z = standard_normal(rng);
    let chi_sq: f64 = (0..df).map(|_| standard_normal(rng).powi(2)).sum();
    let denom = (chi_sq / df as f64).sqrt().max(1e-8);
    z / denom
}

fn aggregate(
    direction: TradeDirection,
    mut outcomes: Vec<f64>,
    simulations: usize,
) -> MonteCarloResult {
    let n = outcomes.len() as f64;
    let expected_value = outcomes.iter().sum::<f64>() / n;
    let wins = outcomes.iter().filter(|&&p| p > 0.0).count();
    let win_rate = wins as f64 / n * 100.0;

    let variance = outcomes
        .iter()
        .map(|p| (p - expected_value).powi(2))
        .sum::<f64>()
        / (n - 1.0).max(1.0);
    let std_dev = variance.sqrt();

    let sharpe_ratio = if std_dev < MIN_STD_FOR_SHARPE {
        0.0
    } else {
        expected_value / std_dev * SHARPE_ANNUALIZER.sqrt()
    };

    let worst = outcomes.iter().copied().fold(f64::INFINITY, f64::min);
    let max_drawdown = if worst >= 0.0 { 0.0 } else { -worst };

    outcomes.sort_by(|a, b| a.partial_cmp(b).expect("finite outcomes"));
    let var_95 = (-quantile(&outcomes, 0.05)).max(0.0);
    let var_99 = (-quantile(&outcomes, 0.01)).max(0.0);
    let percentiles = PercentileLadder {
        p10: quantile(&outcomes, 0.10),
        p25: quantile(&outcomes, 0.25),
        p50: quantile(&outcomes, 0.50),
        p75: quantile(&outcomes, 0.75),
        p90: quantile(&outcomes, 0.90),
    };

    let (recommendation, reason) =
        recommend(expected_value, win_rate, sharpe_ratio, max_drawdown);

    MonteCarloResult {
        direction,
        expected_value,
        win_rate,
        max_drawdown,
        sharpe_ratio,
        var_95,
        var_99,
        percentiles,
        simulations,
        recommendation,
        reason,
    }
}

/// Fixed threshold ladder for the categorical verdict.
fn recommend(ev: f64, win_rate: f64, sharpe: f64, max_dd: f64) -> (Recommendation, String) {
    if ev > 1.5 && win_rate > 55.0 && sharpe > 1.5 && max_dd < 5.0 {
        (
            Recommendation::StrongBuy,
            format!(
                "strong edge: EV {:.2}% at {:.0}% win rate, Sharpe {:.2}, drawdown {:.1}%",
                ev, win_rate, sharpe, max_dd
            ),
        )
    } else if ev > 0.5 && win_rate > 50.0 && sharpe > 1.2 {
        (
            Recommendation::Buy,
            format!(
                "positive edge: EV {:.2}% at {:.0}% win rate, Sharpe {:.2}",
                ev, win_rate, sharpe
            ),
        )
    } else if ev > 0.0 && win_rate > 45.0 && sharpe > 0.8 {
        (
            Recommendation::Hold,
            format!(
                "marginal edge: EV {:.2}% at {:.0}% win rate, Sharpe {:.2}",
                ev, win_rate, sharpe
            ),
        )
    } else {
        (
            Recommendation::Avoid,
            format!(
                "no edge: EV {:.2}% at {:.0}% win rate, Sharpe {:.2}",
                ev, win_rate, sharpe
            ),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn simulator(simulations: usize) -> MonteCarloSimulator {
        MonteCarloSimulator::new(MonteCarloConfig {
            simulations,
            ..Default::default()
        })
    }

    fn seeded() -> StdRng {
        StdRng::seed_from_u64(42)
    }

    #[test]
    fn test_zero_volatility_pays_only_costs() {
        let sim = simulator(100);
        let scenario = TradeScenario {
            direction: TradeDirection::Long,
            step_volatility_pct: 0.0,
            drift_pct: 0.0,
            stop_loss_pct: 2.0,
            take_profit_pct: 4.0,
        };
        let result = sim.run_with_rng(&scenario, &mut seeded()).unwrap();
        // Every path: flat price, P&L 0, minus two 0.06% fees.
        assert!((result.expected_value + 0.12).abs() < 1e-12);
        assert_eq!(result.win_rate, 0.0);
        assert_eq!(result.sharpe_ratio, 0.0);
        assert!((result.max_drawdown - 0.12).abs() < 1e-12);
        assert_eq!(result.recommendation, Recommendation::Avoid);
        assert!((result.percentiles.p50 + 0.12).abs() < 1e-12);
    }

    #[test]
    fn test_deterministic_under_fixed_seed() {
        let sim = simulator(200);
        let scenario = TradeScenario {
            direction: TradeDirection::Long,
            step_volatility_pct: 0.8,
            drift_pct: 0.05,
            stop_loss_pct: 2.0,
            take_profit_pct: 4.0,
        };
        let a = sim.run_with_rng(&scenario, &mut seeded()).unwrap();
        let b = sim.run_with_rng(&scenario, &mut seeded()).unwrap();
        assert_eq!(a.expected_value, b.expected_value);
        assert_eq!(a.win_rate, b.win_rate);
        assert_eq!(a.var_95, b.var_95);
    }

    #[test]
    fn test_simulation_count_clamped() {
        let sim = simulator(5);
        let scenario = TradeScenario {
            direction: TradeDirection::Long,
            step_volatility_pct: 0.0,
            drift_pct: 0.0,
            stop_loss_pct: 2.0,
            take_profit_pct: 4.0,
        };
        let result = sim.run_with_rng(&scenario, &mut seeded()).unwrap();
        assert_eq!(result.simulations, 100);
    }

    #[test]
    fn test_pnl_bounded_by_stop_and_target() {
        let sim = simulator(500);
        let scenario = TradeScenario {
            direction: TradeDirection::Long,
            step_volatility_pct: 3.0,
            drift_pct: 0.0,
            stop_loss_pct: 2.0,
            take_profit_pct: 4.0,
        };
        let result = sim.run_with_rng(&scenario, &mut seeded()).unwrap();
        let cost = 0.12;
        assert!(result.percentiles.p10 >= -2.0 - cost - 1e-9);
        assert!(result.percentiles.p90 <= 4.0 - cost + 1e-9);
        assert!(result.max_drawdown <= 2.0 + cost + 1e-9);
    }

    #[test]
    fn test_strong_favorable_drift_recommends_entry() {
        let sim = simulator(500);
        let scenario = TradeScenario {
            direction: TradeDirection::Long,
            step_volatility_pct: 0.2,
            drift_pct: 0.3,
            stop_loss_pct: 2.0,
            take_profit_pct: 4.0,
        };
        let result = sim.run_with_rng(&scenario, &mut seeded()).unwrap();
        assert!(result.expected_value > 1.0, "EV {}", result.expected_value);
        assert!(result.win_rate > 55.0);
        assert!(matches!(
            result.recommendation,
            Recommendation::StrongBuy | Recommendation::Buy
        ));
    }

    #[test]
    fn test_directional_edge_follows_drift() {
        let sim = simulator(500);
        // Bullish drift: the long side should carry the edge.
        let edge = sim
            .directional_edge(0.2, 0.25, 2.0, 4.0, &mut seeded())
            .unwrap();
        assert_eq!(edge.preferred, Some(TradeDirection::Long));
        assert!(edge.long.sharpe_ratio > edge.short.sharpe_ratio);
        assert!(edge.edge_strength > 0.0);
        assert!(edge.edge_strength <= 100.0);

        // Bearish drift flips the verdict.
        let edge = sim
            .directional_edge(0.2, -0.25, 2.0, 4.0, &mut seeded())
            .unwrap();
        assert_eq!(edge.preferred, Some(TradeDirection::Short));
    }

    #[test]
    fn test_quantile_single_sample_stable() {
        let sorted = [1.5];
        assert_eq!(quantile(&sorted, 0.05), 1.5);
        assert_eq!(quantile(&sorted, 0.5), 1.5);
        assert_eq!(quantile(&sorted, 0.95), 1.5);
    }

    #[test]
    fn test_rejects_non_finite_scenario() {
        let sim = simulator(100);
        let scenario = TradeScenario {
            direction: TradeDirection::Long,
            step_volatility_pct: f64::NAN,
            drift_pct: 0.0,
            stop_loss_pct: 2.0,
            take_profit_pct: 4.0,
        };
        assert!(sim.run_with_rng(&scenario, &mut seeded()).is_err());
    }

    #[test]
    fn test_shocks_are_clamped() {
        // With heavy tails, raw t(3) draws exceed 10 sigma occasionally; the
        // clamp plus stop/target bounds keeps every outcome finite.
        let sim = simulator(1000);
        let scenario = TradeScenario {
            direction: TradeDirection::Short,
            step_volatility_pct: 5.0,
            drift_pct: 0.0,
            stop_loss_pct: 5.0,
            take_profit_pct: 10.0,
        };
        let result = sim.run_with_rng(&scenario, &mut seeded()).unwrap();
        assert!(result.expected_value.is_finite());
        assert!(result.var_99.is_finite());
    }
}
