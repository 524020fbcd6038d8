//! Order gateway interface, error taxonomy, and bounded retry.

mod paper;

pub use paper::PaperGateway;

use std::time::Duration;

use async_trait::async_trait;
use rust_decimal::Decimal;
use thiserror::Error;
use tracing::warn;

use crate::models::{Ack, OrderSide};

/// Gateway failure, split into transient (retryable) and permanent
/// (abandon the attempt) classes. The orchestrator has a single match
/// site for this distinction.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("transient gateway failure: {0}")]
    Transient(String),

    #[error("gateway request timed out after {0:?}")]
    Timeout(Duration),

    #[error("order rejected: {0}")]
    Rejected(String),
}

impl GatewayError {
    pub fn is_transient(&self) -> bool {
        matches!(self, GatewayError::Transient(_) | GatewayError::Timeout(_))
    }
}

/// Order gateway consumed by the engine. Implementations emit `Fill` and
/// `Reject` events asynchronously on their execution stream.
#[async_trait]
pub trait OrderGateway: Send + Sync {
    async fn submit_market(
        &self,
        side: OrderSide,
        quantity: Decimal,
        client_id: &str,
    ) -> Result<Ack, GatewayError>;

    async fn submit_stop(
        &self,
        side: OrderSide,
        trigger_price: Decimal,
        quantity: Decimal,
        client_id: &str,
    ) -> Result<Ack, GatewayError>;

    async fn submit_limit(
        &self,
        side: OrderSide,
        price: Decimal,
        quantity: Decimal,
        client_id: &str,
    ) -> Result<Ack, GatewayError>;

    async fn cancel(&self, client_id: &str) -> Result<Ack, GatewayError>;
}

/// Bounded exponential backoff for transient gateway failures.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            base_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    fn delay_for(&self, attempt: u32) -> Duration {
        let exp = self.base_delay.saturating_mul(1u32 << attempt.min(16));
        exp.min(self.max_delay)
    }
}

/// Run a gateway call, retrying transient failures with backoff.
/// Permanent failures and exhausted retries surface to the caller.
pub async fn with_retry<F, Fut>(
    policy: &RetryPolicy,
    op_name: &str,
    mut call: F,
) -> Result<Ack, GatewayError>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<Ack, GatewayError>>,
{
    let mut attempt = 0;
    loop {
        match call().await {
            Ok(ack) => return Ok(ack),
            Err(e) if e.is_transient() && attempt + 1 < policy.max_attempts => {
                let delay = policy.delay_for(attempt);
                warn!(
                    op = op_name,
                    attempt = attempt + 1,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "transient gateway failure, retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}
