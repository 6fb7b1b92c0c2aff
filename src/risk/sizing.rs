//! EV + Position Sizer (C9): expected-value admission filter and
//! Kelly-fractional position sizer. Pure math with no external
//! collaborators: score the opportunity, clamp it against the configured
//! bounds, then pick a size.

use crate::config::RiskConfig;
use crate::error::StrategyError;

/// `p` is the execution probability for this (chain, dex, pathLength)
/// bucket, tracked by the strategy factory (C11).
pub struct EvInput {
    pub execution_probability: f64,
    pub expected_profit_usd: f64,
    pub expected_loss_usd: f64,
    pub gas_cost_estimate_usd: f64,
}

pub fn expected_value(input: &EvInput) -> f64 {
    input.execution_probability * input.expected_profit_usd
        - (1.0 - input.execution_probability) * input.expected_loss_usd
        - input.gas_cost_estimate_usd
}

pub fn check_ev(input: &EvInput, config: &RiskConfig) -> Result<f64, StrategyError> {
    let ev = expected_value(input);
    if ev < 0.0 || ev < config.min_ev_usd {
        return Err(StrategyError::LowEv { ev, min_ev: config.min_ev_usd });
    }
    Ok(ev)
}

/// Kelly-fractional position size, clamped to [minFraction, maxFraction] and
/// scaled by the drawdown breaker's `sizeMultiplier` (§4.9).
pub fn kelly_fraction(execution_probability: f64, profit: f64, loss: f64, config: &RiskConfig) -> f64 {
    if loss <= 0.0 {
        return config.min_fraction;
    }
    let b = profit / loss;
    let raw = ((execution_probability * b) - (1.0 - execution_probability)) / b;
    let safety_scaled = raw.max(0.0) * config.kelly_safety_factor;
    safety_scaled.clamp(config.min_fraction, config.max_fraction)
}

pub fn recommended_size(
    execution_probability: f64,
    profit: f64,
    loss: f64,
    capital: f64,
    size_multiplier: f64,
    config: &RiskConfig,
) -> Result<f64, StrategyError> {
    let fraction = kelly_fraction(execution_probability, profit, loss, config);
    let size = capital * fraction * size_multiplier;
    if size < config.min_position_size_usd {
        return Err(StrategyError::PositionTooSmall { size, min_size: config.min_position_size_usd });
    }
    Ok(size)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> RiskConfig {
        RiskConfig {
            caution_pct: 0.05,
            recovery_pct: 0.10,
            halt_pct: 0.20,
            halt_cooldown: std::time::Duration::from_secs(3600),
            kelly_safety_factor: 0.5,
            min_fraction: 0.01,
            max_fraction: 0.25,
            min_ev_usd: 5.0,
            min_position_size_usd: 10.0,
        }
    }

    #[test]
    fn negative_ev_is_rejected() {
        let input = EvInput {
            execution_probability: 0.3,
            expected_profit_usd: 10.0,
            expected_loss_usd: 50.0,
            gas_cost_estimate_usd: 1.0,
        };
        let err = check_ev(&input, &config()).unwrap_err();
        assert!(matches!(err, StrategyError::LowEv { .. }));
    }

    #[test]
    fn ev_below_minimum_is_rejected_even_when_positive() {
        let input = EvInput {
            execution_probability: 0.9,
            expected_profit_usd: 6.0,
            expected_loss_usd: 1.0,
            gas_cost_estimate_usd: 0.5,
        };
        assert!(expected_value(&input) > 0.0);
        let err = check_ev(&input, &config()).unwrap_err();
        assert!(matches!(err, StrategyError::LowEv { .. }));
    }

    #[test]
    fn kelly_fraction_clamps_to_max() {
        let fraction = kelly_fraction(0.95, 100.0, 1.0, &config());
        assert_eq!(fraction, config().max_fraction);
    }

    #[test]
    fn kelly_fraction_floors_to_min_when_edge_is_negative() {
        let fraction = kelly_fraction(0.1, 1.0, 10.0, &config());
        assert_eq!(fraction, config().min_fraction);
    }

    #[test]
    fn recommended_size_rejects_below_minimum() {
        let err = recommended_size(0.5, 10.0, 10.0, 50.0, 1.0, &config()).unwrap_err();
        assert!(matches!(err, StrategyError::PositionTooSmall { .. }));
    }

    #[test]
    fn recommended_size_scales_with_drawdown_multiplier() {
        let full = recommended_size(0.9, 100.0, 1.0, 10_000.0, 1.0, &config()).unwrap();
        let halved = recommended_size(0.9, 100.0, 1.0, 10_000.0, 0.5, &config()).unwrap();
        assert!((full - halved * 2.0).abs() < 1e-6);
    }
}
