pub mod circuit_breaker;
pub mod drawdown;
pub mod sizing;

pub use circuit_breaker::{BreakerState, CircuitBreaker};
pub use drawdown::{DrawdownBreaker, DrawdownState, TradingPermission};
pub use sizing::{check_ev, kelly_fraction, recommended_size, expected_value, EvInput};
