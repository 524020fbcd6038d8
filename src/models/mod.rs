//! Data models for quotes, instruments, trades, and order wire types.

mod instrument;
mod order;
mod quote;
mod trade;

pub use instrument::Instrument;
pub use order::{Ack, ExecutionEvent, Fill, OrderKind, OrderSide, Reject};
pub use quote::Quote;
pub use trade::{TradeOutcome, TradeRecord, TradeSide};
