//! Simulated order gateway backing the demo, paper-live, and backtest
//! modes.
//!
//! Market orders fill immediately at the touch of the last seen quote.
//! Stop and limit orders rest until a quote crosses them, then fill at
//! their own price. Fills and rejects are emitted on the execution
//! event stream exactly like a real gateway would deliver them.

use std::sync::Arc;

use async_trait::async_trait;
use rust_decimal::Decimal;
use tokio::sync::{mpsc, Mutex};
use tracing::debug;

use crate::models::{Ack, ExecutionEvent, Fill, OrderKind, OrderSide, Quote};

use super::{GatewayError, OrderGateway};

#[derive(Debug, Clone)]
struct RestingOrder {
    client_id: String,
    side: OrderSide,
    kind: OrderKind,
    price: Decimal,
    quantity: Decimal,
}

#[derive(Default)]
struct PaperState {
    last_quote: Option<Quote>,
    resting: Vec<RestingOrder>,
}

pub struct PaperGateway {
    state: Mutex<PaperState>,
    events_tx: mpsc::UnboundedSender<ExecutionEvent>,
}

impl PaperGateway {
    /// Build a gateway and the receiving half of its execution stream.
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<ExecutionEvent>) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        (
            Arc::new(Self {
                state: Mutex::new(PaperState::default()),
                events_tx,
            }),
            events_rx,
        )
    }

    fn emit_fill(&self, client_id: &str, price: Decimal, quantity: Decimal, ts: u64) {
        let _ = self.events_tx.send(ExecutionEvent::Fill(Fill {
            client_id: client_id.to_string(),
            price,
            quantity,
            ts,
        }));
    }

    /// Feed the next quote: updates the touch and triggers any resting
    /// protective orders it crosses.
    pub async fn on_quote(&self, quote: &Quote) {
        let mut state = self.state.lock().await;
        state.last_quote = Some(*quote);

        let mut triggered = Vec::new();
        state.resting.retain(|order| {
            let crossed = match (order.kind, order.side) {
                (OrderKind::Stop, OrderSide::Sell) => quote.bid <= order.price,
                (OrderKind::Stop, OrderSide::Buy) => quote.ask >= order.price,
                (OrderKind::Limit, OrderSide::Sell) => quote.bid >= order.price,
                (OrderKind::Limit, OrderSide::Buy) => quote.ask <= order.price,
                (OrderKind::Market, _) => false,
            };
            if crossed {
                triggered.push(order.clone());
            }
            !crossed
        });
        drop(state);

        for order in triggered {
            debug!(
                client_id = %order.client_id,
                side = order.side.as_str(),
                kind = ?order.kind,
                price = %order.price,
                "resting order triggered"
            );
            self.emit_fill(&order.client_id, order.price, order.quantity, quote.ts);
        }
    }
}

#[async_trait]
impl OrderGateway for PaperGateway {
    async fn submit_market(
        &self,
        side: OrderSide,
        quantity: Decimal,
        client_id: &str,
    ) -> Result<Ack, GatewayError> {
        let state = self.state.lock().await;
        let quote = state
            .last_quote
            .ok_or_else(|| GatewayError::Transient("no market data yet".to_string()))?;
        drop(state);

        let price = match side {
            OrderSide::Buy => quote.ask,
            OrderSide::Sell => quote.bid,
        };
        self.emit_fill(client_id, price, quantity, quote.ts);
        Ok(Ack {
            client_id: client_id.to_string(),
        })
    }

    async fn submit_stop(
        &self,
        side: OrderSide,
        trigger_price: Decimal,
        quantity: Decimal,
        client_id: &str,
    ) -> Result<Ack, GatewayError> {
        let mut state = self.state.lock().await;
        state.resting.push(RestingOrder {
            client_id: client_id.to_string(),
            side,
            kind: OrderKind::Stop,
            price: trigger_price,
            quantity,
        });
        Ok(Ack {
            client_id: client_id.to_string(),
        })
    }

    async fn submit_limit(
        &self,
        side: OrderSide,
        price: Decimal,
        quantity: Decimal,
        client_id: &str,
    ) -> Result<Ack, GatewayError> {
        let mut state = self.state.lock().await;
        state.resting.push(RestingOrder {
            client_id: client_id.to_string(),
            side,
            kind: OrderKind::Limit,
            price,
            quantity,
        });
        Ok(Ack {
            client_id: client_id.to_string(),
        })
    }

    /// Cancellation is idempotent: cancelling an order that already
    /// filled or was never seen still acknowledges.
    async fn cancel(&self, client_id: &str) -> Result<Ack, GatewayError> {
        let mut state = self.state.lock().await;
        state.resting.retain(|o| o.client_id != client_id);
        Ok(Ack {
            client_id: client_id.to_string(),
        })
    }
}
