//! Session performance statistics: win rate, max step, return, drawdown.

use rust_decimal::Decimal;

use crate::models::TradeOutcome;

/// Running statistics over the trading session. Fed one outcome per
/// closed trade plus an equity point after each ladder move.
#[derive(Debug, Clone)]
pub struct SessionStats {
    initial_balance: Decimal,
    total_trades: u64,
    winning_trades: u64,
    losing_trades: u64,
    neutral_closes: u64,
    max_step: usize,
    peak_equity: Decimal,
    max_drawdown: Decimal,
}

impl SessionStats {
    pub fn new(initial_balance: Decimal) -> Self {
        Self {
            initial_balance,
            total_trades: 0,
            winning_trades: 0,
            losing_trades: 0,
            neutral_closes: 0,
            max_step: 0,
            peak_equity: initial_balance,
            max_drawdown: Decimal::ZERO,
        }
    }

    /// Record a closed trade and the ladder position after it.
    pub fn record_outcome(&mut self, outcome: TradeOutcome, step_index: usize) {
        self.total_trades += 1;
        match outcome {
            TradeOutcome::Win => self.winning_trades += 1,
            TradeOutcome::Loss => self.losing_trades += 1,
            TradeOutcome::NeutralClose => self.neutral_closes += 1,
        }
        self.max_step = self.max_step.max(step_index);
    }

    /// Track the equity curve for drawdown reporting.
    pub fn record_equity(&mut self, balance: Decimal) {
        if balance > self.peak_equity {
            self.peak_equity = balance;
        }
        if self.peak_equity > Decimal::ZERO {
            let drawdown = (self.peak_equity - balance) / self.peak_equity;
            if drawdown > self.max_drawdown {
                self.max_drawdown = drawdown;
            }
        }
    }

    pub fn initial_balance(&self) -> Decimal {
        self.initial_balance
    }

    pub fn total_trades(&self) -> u64 {
        self.total_trades
    }

    pub fn winning_trades(&self) -> u64 {
        self.winning_trades
    }

    pub fn losing_trades(&self) -> u64 {
        self.losing_trades
    }

    pub fn neutral_closes(&self) -> u64 {
        self.neutral_closes
    }

    pub fn max_step(&self) -> usize {
        self.max_step
    }

    pub fn win_rate(&self) -> f64 {
        if self.total_trades == 0 {
            return 0.0;
        }
        self.winning_trades as f64 / self.total_trades as f64
    }

    /// Cumulative return as a fraction of the initial balance.
    pub fn total_return(&self, current_balance: Decimal) -> Decimal {
        if self.initial_balance.is_zero() {
            return Decimal::ZERO;
        }
        (current_balance - self.initial_balance) / self.initial_balance
    }

    /// Worst peak-to-trough equity drawdown seen, as a fraction.
    pub fn max_drawdown(&self) -> Decimal {
        self.max_drawdown
    }
}
