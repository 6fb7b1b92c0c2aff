//! Drawdown Breaker (C8): a capital-history state machine gating position
//! size by how far current capital has fallen from its running peak. A
//! closed enum with a small transition table, rather than freestanding
//! booleans.

use serde::{Deserialize, Serialize};

use crate::config::RiskConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DrawdownState {
    Normal,
    Caution,
    Recovery,
    Halt,
}

impl DrawdownState {
    pub fn size_multiplier(self) -> f64 {
        match self {
            Self::Normal => 1.0,
            Self::Caution => 0.5,
            Self::Recovery => 0.25,
            Self::Halt => 0.0,
        }
    }

    fn from_drawdown(drawdown: f64, config: &RiskConfig) -> Self {
        if drawdown > config.halt_pct {
            Self::Halt
        } else if drawdown > config.recovery_pct {
            Self::Recovery
        } else if drawdown > config.caution_pct {
            Self::Caution
        } else {
            Self::Normal
        }
    }
}

pub struct TradingPermission {
    pub allowed: bool,
    pub state: DrawdownState,
    pub size_multiplier: f64,
    pub reason: Option<String>,
}

/// Tracks peak and current capital and derives `DrawdownState` from the
/// ratio between them. Only the orchestrator mutates this (§3 Ownership);
/// strategies consult `is_trading_allowed()` through a read-only view.
pub struct DrawdownBreaker {
    config: RiskConfig,
    peak_capital: f64,
    current_capital: f64,
    state: DrawdownState,
    halted_at: Option<std::time::Instant>,
}

impl DrawdownBreaker {
    pub fn new(config: RiskConfig, starting_capital: f64) -> Self {
        Self {
            config,
            peak_capital: starting_capital,
            current_capital: starting_capital,
            state: DrawdownState::Normal,
            halted_at: None,
        }
    }

    pub fn state(&self) -> DrawdownState {
        self.state
    }

    pub fn capital(&self) -> f64 {
        self.current_capital
    }

    pub fn drawdown(&self) -> f64 {
        if self.peak_capital <= 0.0 {
            return 0.0;
        }
        ((self.peak_capital - self.current_capital) / self.peak_capital).max(0.0)
    }

    /// Applies a realized P&L, recomputes drawdown and transitions state.
    pub fn record_outcome(&mut self, pnl: f64) {
        self.current_capital += pnl;
        self.peak_capital = self.peak_capital.max(self.current_capital);

        let drawdown = self.drawdown();
        let next = DrawdownState::from_drawdown(drawdown, &self.config);
        if next == DrawdownState::Halt && self.state != DrawdownState::Halt {
            self.halted_at = Some(std::time::Instant::now());
        }
        self.state = next;
    }

    /// Forces the breaker back to NORMAL, bypassing the cooldown — for
    /// manual operator intervention only.
    pub fn force_reset(&mut self) {
        self.state = DrawdownState::Normal;
        self.halted_at = None;
        self.peak_capital = self.current_capital;
    }

    pub fn is_trading_allowed(&self) -> TradingPermission {
        if self.state == DrawdownState::Halt {
            let cooled_down = self
                .halted_at
                .map(|at| at.elapsed() >= self.config.halt_cooldown)
                .unwrap_or(false);
            if !cooled_down {
                return TradingPermission {
                    allowed: false,
                    state: self.state,
                    size_multiplier: 0.0,
                    reason: Some("drawdown halt cooldown in effect".to_string()),
                };
            }
        }

        TradingPermission {
            allowed: self.state != DrawdownState::Halt,
            state: self.state,
            size_multiplier: self.state.size_multiplier(),
            reason: None,
        }
    }
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
    fn stays_normal_within_caution_band() {
        let mut breaker = DrawdownBreaker::new(config(), 1000.0);
        breaker.record_outcome(-40.0); // 4% drawdown
        assert_eq!(breaker.state(), DrawdownState::Normal);
    }

    #[test]
    fn transitions_through_caution_recovery_halt() {
        let mut breaker = DrawdownBreaker::new(config(), 1000.0);
        breaker.record_outcome(-60.0); // 6% drawdown -> CAUTION
        assert_eq!(breaker.state(), DrawdownState::Caution);

        breaker.record_outcome(-40.0); // exactly 10% total, boundary-inclusive to CAUTION
        assert_eq!(breaker.state(), DrawdownState::Caution);

        breaker.record_outcome(-10.0); // 11% total -> RECOVERY
        assert_eq!(breaker.state(), DrawdownState::Recovery);

        breaker.record_outcome(-100.0); // 21% total drawdown -> HALT
        assert_eq!(breaker.state(), DrawdownState::Halt);
        assert!(!breaker.is_trading_allowed().allowed);
    }

    #[test]
    fn peak_capital_only_increases() {
        let mut breaker = DrawdownBreaker::new(config(), 1000.0);
        breaker.record_outcome(500.0);
        assert_eq!(breaker.peak_capital, 1500.0);
        breaker.record_outcome(-100.0);
        assert_eq!(breaker.peak_capital, 1500.0);
    }

    #[test]
    fn force_reset_clears_halt() {
        let mut breaker = DrawdownBreaker::new(config(), 1000.0);
        breaker.record_outcome(-300.0);
        assert_eq!(breaker.state(), DrawdownState::Halt);
        breaker.force_reset();
        assert_eq!(breaker.state(), DrawdownState::Normal);
        assert!(breaker.is_trading_allowed().allowed);
    }
}
