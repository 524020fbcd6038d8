//! Trade record: one position from entry to close.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::OrderSide;

/// Direction of a position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradeSide {
    Long,
    Short,
}

impl TradeSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            TradeSide::Long => "long",
            TradeSide::Short => "short",
        }
    }

    /// Order side that opens a position in this direction.
    pub fn entry_order_side(&self) -> OrderSide {
        match self {
            TradeSide::Long => OrderSide::Buy,
            TradeSide::Short => OrderSide::Sell,
        }
    }

    /// Order side that closes a position in this direction.
    pub fn exit_order_side(&self) -> OrderSide {
        match self {
            TradeSide::Long => OrderSide::Sell,
            TradeSide::Short => OrderSide::Buy,
        }
    }
}

/// How a closed trade resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TradeOutcome {
    Win,
    Loss,
    NeutralClose,
}

/// Record of a single trade. Created when a position opens, immutable
/// once closed and appended to the journal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeRecord {
    /// Entry fill price in quote units
    pub entry_price: Decimal,

    /// Exit fill price; `None` while open or when closed without a fill
    pub exit_price: Option<Decimal>,

    pub side: TradeSide,

    /// Positive for both sides; direction carried by `side`
    pub quantity: Decimal,

    /// Balance rung staked on this trade
    pub stake: Decimal,

    pub take_profit_price: Decimal,
    pub stop_loss_price: Decimal,

    /// Dynamic step-back percentage fixed at entry (fraction of stake)
    pub loss_percentage_used: Decimal,

    /// Nanosecond timestamps
    pub opened_at: u64,
    pub closed_at: Option<u64>,

    pub outcome: Option<TradeOutcome>,
}

impl TradeRecord {
    /// Signed cash P&L against a given exit price.
    pub fn pnl_at(&self, exit_price: Decimal) -> Decimal {
        let diff = exit_price - self.entry_price;
        match self.side {
            TradeSide::Long => self.quantity * diff,
            TradeSide::Short => self.quantity * -diff,
        }
    }
}
