//! Order wire types exchanged with the gateway.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Direction of an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderSide::Buy => "BUY",
            OrderSide::Sell => "SELL",
        }
    }
}

/// Kind of order resting at or sent to the gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderKind {
    Market,
    Stop,
    Limit,
}

/// Synchronous acknowledgement of a gateway request.
#[derive(Debug, Clone)]
pub struct Ack {
    pub client_id: String,
}

/// Asynchronous fill notification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Fill {
    pub client_id: String,
    pub price: Decimal,
    pub quantity: Decimal,
    pub ts: u64,
}

/// Asynchronous rejection notification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reject {
    pub client_id: String,
    pub reason: String,
}

/// Event stream emitted by a gateway back to the engine.
#[derive(Debug, Clone)]
pub enum ExecutionEvent {
    Fill(Fill),
    Reject(Reject),
}
