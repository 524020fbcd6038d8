//! The step-back trading engine: balance ladder, position sizing, order
//! lifecycle tracking, and the orchestrating event loop.

mod config;
mod ladder;
mod orchestrator;
mod sizer;
mod tracker;

pub use config::{BaseRungLoss, ConfigError, EngineConfig};
pub use ladder::{BalanceLadder, LadderError};
pub use orchestrator::{Engine, EngineEvent, Flow};
pub use sizer::{OrderPlan, PositionSizer, SizingError};
pub use tracker::{FillRole, TradePhase, TradeTracker, TrackedTrade, TrackerError};

use rust_decimal::{Decimal, RoundingStrategy};

/// Monetary rounding: half-up to `dp` decimal places. Applied once at
/// exposure boundaries; internal arithmetic stays at full precision.
pub(crate) fn round_half_up(value: Decimal, dp: u32) -> Decimal {
    value.round_dp_with_strategy(dp, RoundingStrategy::MidpointAwayFromZero)
}
