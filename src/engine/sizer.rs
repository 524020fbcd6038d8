//! Position sizing and protective price calculation.
//!
//! Quantity comes from staking the full current rung at the entry price.
//! Protective prices are then derived from the cash amounts the ladder
//! demands, so a fill at the stop realizes the step-back loss within one
//! tick and a fill at the take-profit realizes the profit target.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::{Instrument, TradeSide};

use super::ladder::BalanceLadder;
use super::round_half_up;

/// Sizing refusal. The orchestrator journals these; the ladder is never
/// touched by a refused entry.
#[derive(Debug, Error)]
pub enum SizingError {
    #[error("entry price must be positive, got {0}")]
    NonPositivePrice(Decimal),

    #[error("quantity {quantity} below exchange minimum {minimum}")]
    BelowMinimum { quantity: Decimal, minimum: Decimal },
}

/// Fully priced order plan for one trade.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderPlan {
    pub side: TradeSide,
    pub entry_price: Decimal,
    pub quantity: Decimal,
    pub stake: Decimal,
    pub take_profit_price: Decimal,
    pub stop_loss_price: Decimal,

    /// Dynamic loss fraction fixed at planning time
    pub loss_percentage: Decimal,

    /// Cash amounts the plan is built from
    pub target_amount: Decimal,
    pub risk_amount: Decimal,

    /// Risk actually carried after quantity and tick snapping
    pub effective_risk: Decimal,

    /// Quantity lost to snapping, zero when the stake divides evenly
    pub residual_quantity: Decimal,
}

/// Converts ladder state plus a quoted entry price into an order plan.
pub struct PositionSizer {
    instrument: Instrument,
    rounding_dp: u32,
}

impl PositionSizer {
    pub fn new(instrument: Instrument, rounding_dp: u32) -> Self {
        Self {
            instrument,
            rounding_dp,
        }
    }

    pub fn instrument(&self) -> &Instrument {
        &self.instrument
    }

    pub fn plan(
        &self,
        ladder: &BalanceLadder,
        side: TradeSide,
        entry_price: Decimal,
    ) -> Result<OrderPlan, SizingError> {
        if entry_price <= Decimal::ZERO {
            return Err(SizingError::NonPositivePrice(entry_price));
        }

        let stake = ladder.current_stake();
        let raw_quantity = stake / entry_price;
        let quantity = self.instrument.snap_quantity_down(raw_quantity);

        if quantity < self.instrument.min_quantity || quantity.is_zero() {
            return Err(SizingError::BelowMinimum {
                quantity,
                minimum: self.instrument.min_quantity,
            });
        }

        let target_amount = ladder.profit_target();
        let risk_amount = ladder.loss_for_step_back();
        let loss_percentage = ladder.loss_percentage_for_step_back();

        let target_offset = target_amount / quantity;
        let risk_offset = risk_amount / quantity;

        // Snap away from the entry so rounding never tightens the stop
        // or brings the target short of the required amount.
        let (take_profit_price, stop_loss_price) = match side {
            TradeSide::Long => (
                self.instrument.snap_price_up(entry_price + target_offset),
                self.instrument.snap_price_down(entry_price - risk_offset),
            ),
            TradeSide::Short => (
                self.instrument.snap_price_down(entry_price - target_offset),
                self.instrument.snap_price_up(entry_price + risk_offset),
            ),
        };

        let effective_risk = round_half_up(
            (entry_price - stop_loss_price).abs() * quantity,
            self.rounding_dp,
        );
        let residual_quantity = raw_quantity - quantity;

        Ok(OrderPlan {
            side,
            entry_price,
            quantity,
            stake,
            take_profit_price,
            stop_loss_price,
            loss_percentage,
            target_amount,
            risk_amount,
            effective_risk,
            residual_quantity,
        })
    }
}
