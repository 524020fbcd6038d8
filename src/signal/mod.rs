//! Pluggable entry predicate.
//!
//! The engine does not prescribe how entry signals are generated; it
//! consults a predicate once all entry gates have passed. Predicate
//! errors are downgraded to `Skip` by the orchestrator.

use anyhow::Result;
use rust_decimal::Decimal;

use crate::models::{Quote, TradeSide};

/// What the predicate wants the engine to do with the current quote.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Enter(TradeSide),
    Skip,
}

/// Read-only view of engine state handed to the predicate.
#[derive(Debug, Clone)]
pub struct EngineView {
    pub current_stake: Decimal,
    pub step_index: usize,
    pub consecutive_losses: u32,
    pub last_exit_ts: Option<u64>,
}

pub trait EntryPredicate: Send {
    fn decide(&self, quote: &Quote, view: &EngineView) -> Result<Decision>;
}

/// Default demonstration predicate: enter long on every permitted quote.
pub struct AlwaysLong;

impl EntryPredicate for AlwaysLong {
    fn decide(&self, _quote: &Quote, _view: &EngineView) -> Result<Decision> {
        Ok(Decision::Enter(TradeSide::Long))
    }
}
