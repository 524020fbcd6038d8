//! Order lifecycle tracking for the one-and-only open position.
//!
//! Phases: `PendingEntry -> Open -> PendingExit -> Closed`. A trade that
//! never reaches `Open` is discarded without touching the ladder.

use rust_decimal::Decimal;
use thiserror::Error;

use crate::models::{Fill, TradeOutcome, TradeRecord, TradeSide};

use super::sizer::OrderPlan;

/// Lifecycle phase of the tracked trade.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TradePhase {
    PendingEntry,
    Open,
    PendingExit,
    Closed,
}

/// Which leg a fill belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FillRole {
    Entry,
    StopLoss,
    TakeProfit,
    Unknown,
}

#[derive(Debug, Error)]
pub enum TrackerError {
    #[error("second concurrent trade attempted while one is active")]
    AlreadyActive,
}

/// The single tracked trade and its order legs.
#[derive(Debug, Clone)]
pub struct TrackedTrade {
    pub record: TradeRecord,
    pub phase: TradePhase,
    pub entry_id: String,
    pub stop_id: Option<String>,
    pub take_profit_id: Option<String>,
    pub submitted_at: u64,
}

/// Result of an exit fill: the settled record, the sibling leg to
/// cancel, and whether classification fell back to the P&L sign.
#[derive(Debug, Clone)]
pub struct ExitSettlement {
    pub record: TradeRecord,
    pub sibling_id: Option<String>,
    pub out_of_band: bool,
}

/// Tracks at most one trade at a time. A second open attempt is a state
/// invariant violation surfaced as an error, which the orchestrator
/// treats as fatal.
pub struct TradeTracker {
    active: Option<TrackedTrade>,
    tick_size: Decimal,
}

impl TradeTracker {
    pub fn new(tick_size: Decimal) -> Self {
        Self {
            active: None,
            tick_size,
        }
    }

    pub fn is_idle(&self) -> bool {
        self.active.is_none()
    }

    pub fn active(&self) -> Option<&TrackedTrade> {
        self.active.as_ref()
    }

    /// Register a submitted entry order.
    pub fn open_pending(
        &mut self,
        plan: &OrderPlan,
        entry_id: String,
        now: u64,
    ) -> Result<(), TrackerError> {
        if self.active.is_some() {
            return Err(TrackerError::AlreadyActive);
        }
        let record = TradeRecord {
            entry_price: plan.entry_price,
            exit_price: None,
            side: plan.side,
            quantity: plan.quantity,
            stake: plan.stake,
            take_profit_price: plan.take_profit_price,
            stop_loss_price: plan.stop_loss_price,
            loss_percentage_used: plan.loss_percentage,
            opened_at: now,
            closed_at: None,
            outcome: None,
        };
        self.active = Some(TrackedTrade {
            record,
            phase: TradePhase::PendingEntry,
            entry_id,
            stop_id: None,
            take_profit_id: None,
            submitted_at: now,
        });
        Ok(())
    }

    /// Drop a trade that never achieved `Open`.
    pub fn discard_pending(&mut self) -> Option<TrackedTrade> {
        match self.active.as_ref().map(|t| t.phase) {
            Some(TradePhase::PendingEntry) => self.active.take(),
            _ => None,
        }
    }

    /// Classify which leg a fill belongs to.
    pub fn match_fill(&self, client_id: &str) -> FillRole {
        let Some(trade) = self.active.as_ref() else {
            return FillRole::Unknown;
        };
        if trade.entry_id == client_id {
            return FillRole::Entry;
        }
        if trade.stop_id.as_deref() == Some(client_id) {
            return FillRole::StopLoss;
        }
        if trade.take_profit_id.as_deref() == Some(client_id) {
            return FillRole::TakeProfit;
        }
        FillRole::Unknown
    }

    /// Entry fill confirmed: the position is open at the fill price.
    pub fn entry_filled(&mut self, fill: &Fill) -> Option<&TrackedTrade> {
        let trade = self.active.as_mut()?;
        if trade.phase != TradePhase::PendingEntry {
            return None;
        }
        trade.record.entry_price = fill.price;
        trade.record.opened_at = fill.ts;
        trade.phase = TradePhase::Open;
        Some(&*trade)
    }

    /// Attach a protective stop leg submitted after the entry fill.
    pub fn attach_stop(&mut self, stop_id: String) {
        if let Some(trade) = self.active.as_mut() {
            trade.stop_id = Some(stop_id);
        }
    }

    /// Attach a protective take-profit leg submitted after the entry fill.
    pub fn attach_take_profit(&mut self, take_profit_id: String) {
        if let Some(trade) = self.active.as_mut() {
            trade.take_profit_id = Some(take_profit_id);
        }
    }

    /// A protective submission failed permanently: the position exists
    /// but cannot be protected. Operator intervention required.
    pub fn force_pending_exit(&mut self) {
        if let Some(trade) = self.active.as_mut() {
            trade.phase = TradePhase::PendingExit;
        }
    }

    /// One of the protective legs filled: settle the trade.
    pub fn exit_filled(&mut self, role: FillRole, fill: &Fill) -> Option<ExitSettlement> {
        let trade = self.active.as_mut()?;
        if !matches!(trade.phase, TradePhase::Open | TradePhase::PendingExit) {
            return None;
        }

        let (outcome, out_of_band) = classify_exit(&trade.record, fill.price, self.tick_size);
        trade.record.exit_price = Some(fill.price);
        trade.record.closed_at = Some(fill.ts);
        trade.record.outcome = Some(outcome);
        trade.phase = TradePhase::Closed;

        let sibling_id = match role {
            FillRole::StopLoss => trade.take_profit_id.clone(),
            FillRole::TakeProfit => trade.stop_id.clone(),
            _ => None,
        };

        let record = trade.record.clone();
        self.active = None;
        Some(ExitSettlement {
            record,
            sibling_id,
            out_of_band,
        })
    }

    /// Shutdown or operator close: report the trade as a neutral close
    /// without an exit fill. The ladder is not moved.
    pub fn abandon_open(&mut self, now: u64) -> Option<TradeRecord> {
        let trade = self.active.take()?;
        if trade.phase == TradePhase::PendingEntry {
            return None;
        }
        let mut record = trade.record;
        record.closed_at = Some(now);
        record.outcome = Some(TradeOutcome::NeutralClose);
        Some(record)
    }
}

/// Win iff the exit reached the take-profit band, loss iff it reached
/// the stop band (one tick of tolerance each). Anything in between is
/// slippage beyond both bounds and falls back to the P&L sign; the
/// second value flags that fallback.
fn classify_exit(
    record: &TradeRecord,
    exit_price: Decimal,
    tick: Decimal,
) -> (TradeOutcome, bool) {
    let (hit_target, hit_stop) = match record.side {
        TradeSide::Long => (
            exit_price >= record.take_profit_price - tick,
            exit_price <= record.stop_loss_price + tick,
        ),
        TradeSide::Short => (
            exit_price <= record.take_profit_price + tick,
            exit_price >= record.stop_loss_price - tick,
        ),
    };

    if hit_target {
        return (TradeOutcome::Win, false);
    }
    if hit_stop {
        return (TradeOutcome::Loss, false);
    }

    let pnl = record.pnl_at(exit_price);
    if pnl > Decimal::ZERO {
        (TradeOutcome::Win, true)
    } else if pnl < Decimal::ZERO {
        (TradeOutcome::Loss, true)
    } else {
        (TradeOutcome::NeutralClose, true)
    }
}
