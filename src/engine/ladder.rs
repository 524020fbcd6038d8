//! Balance ladder: the deterministic state machine over the discrete
//! balance sequence.
//!
//! Wins push `current * G` onto the history; losses pop back to the
//! previous rung. Loss sizing is always derived from the actual rung
//! difference so that a stop-out returns the account to the previous
//! rung exactly, never from a hard-coded (G-1)/G.

use rust_decimal::Decimal;
use thiserror::Error;

use super::config::{BaseRungLoss, EngineConfig};
use super::round_half_up;

/// Ladder contract violation. Construction errors are fatal at start-up;
/// anything else is a programming error.
#[derive(Debug, Error)]
pub enum LadderError {
    #[error("initial balance must be positive, got {0}")]
    NonPositiveBalance(Decimal),

    #[error("growth factor must be greater than 1, got {0}")]
    GrowthFactorTooSmall(Decimal),
}

/// The balance ladder. History is ordered oldest first, holds at least
/// one element, and stores full-precision values; rounding is applied
/// only when exposing amounts to sizing and display.
#[derive(Debug, Clone)]
pub struct BalanceLadder {
    history: Vec<Decimal>,
    growth_factor: Decimal,
    rounding_dp: u32,
    base_rung_loss: BaseRungLoss,
    consecutive_losses: u32,
}

impl BalanceLadder {
    pub fn new(
        initial_balance: Decimal,
        growth_factor: Decimal,
        rounding_dp: u32,
        base_rung_loss: BaseRungLoss,
    ) -> Result<Self, LadderError> {
        if initial_balance <= Decimal::ZERO {
            return Err(LadderError::NonPositiveBalance(initial_balance));
        }
        if growth_factor <= Decimal::ONE {
            return Err(LadderError::GrowthFactorTooSmall(growth_factor));
        }
        Ok(Self {
            history: vec![initial_balance],
            growth_factor,
            rounding_dp,
            base_rung_loss,
            consecutive_losses: 0,
        })
    }

    pub fn from_config(config: &EngineConfig) -> Result<Self, LadderError> {
        Self::new(
            config.initial_balance,
            config.growth_factor,
            config.rounding_dp,
            config.base_rung_loss,
        )
    }

    /// Current rung at full precision. The non-empty history invariant
    /// makes a panic here a programming error, which must abort.
    fn current(&self) -> Decimal {
        *self
            .history
            .last()
            .expect("ladder invariant violated: history is empty")
    }

    fn previous(&self) -> Option<Decimal> {
        let n = self.history.len();
        (n >= 2).then(|| self.history[n - 2])
    }

    /// Notional for the next trade: the current rung, monetary-rounded.
    pub fn current_stake(&self) -> Decimal {
        round_half_up(self.current(), self.rounding_dp)
    }

    /// Absolute currency amount a win must realize.
    pub fn profit_target(&self) -> Decimal {
        round_half_up(
            self.current() * (self.growth_factor - Decimal::ONE),
            self.rounding_dp,
        )
    }

    fn raw_loss_for_step_back(&self) -> Decimal {
        match self.previous() {
            Some(prev) => self.current() - prev,
            None => match self.base_rung_loss {
                BaseRungLoss::MatchProfitTarget => {
                    self.current() * (self.growth_factor - Decimal::ONE)
                }
                BaseRungLoss::FixedFraction(f) => self.current() * f,
            },
        }
    }

    /// Cash loss that returns the account to the previous rung exactly
    /// (base-rung policy amount when there is no previous rung).
    pub fn loss_for_step_back(&self) -> Decimal {
        round_half_up(self.raw_loss_for_step_back(), self.rounding_dp)
    }

    /// Dynamic loss fraction of the current stake, at full precision.
    pub fn loss_percentage_for_step_back(&self) -> Decimal {
        self.raw_loss_for_step_back() / self.current()
    }

    /// A win: advance one rung and reset the loss streak.
    pub fn record_profit(&mut self) -> Decimal {
        let next = self.current() * self.growth_factor;
        self.history.push(next);
        self.consecutive_losses = 0;
        self.current_stake()
    }

    /// A loss: step back one rung, or hold when already on the base.
    pub fn record_loss(&mut self) -> Decimal {
        if self.history.len() > 1 {
            self.history.pop();
        }
        self.consecutive_losses += 1;
        self.current_stake()
    }

    /// One-based count of wins beyond the base rung.
    pub fn step_index(&self) -> usize {
        self.history.len() - 1
    }

    pub fn consecutive_losses(&self) -> u32 {
        self.consecutive_losses
    }

    /// Operator reset of the loss streak, used to leave the paused state.
    pub fn reset_loss_streak(&mut self) {
        self.consecutive_losses = 0;
    }

    pub fn growth_factor(&self) -> Decimal {
        self.growth_factor
    }

    /// Rounded rungs, oldest first, for snapshots and display.
    pub fn history(&self) -> Vec<Decimal> {
        self.history
            .iter()
            .map(|b| round_half_up(*b, self.rounding_dp))
            .collect()
    }
}
