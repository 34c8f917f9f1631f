// =============================================================================
// Order Executor — one signed market order per call
// =============================================================================
//
// Builds a market order, stamps it with `now + TTL` expiration, signs it and
// submits it. No rounding and no retries happen here: quantities arrive
// pre-rounded and retry policy belongs to the callers (close protocol, TWAP,
// exit sequence). Submission errors propagate.
// =============================================================================

use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use serde_json::Value;
use tracing::{info, warn};
use uuid::Uuid;

use crate::exchange::{ExchangeClient, OrderRequest};
use crate::types::OrderSide;

/// Submits market orders for one instrument.
#[derive(Clone)]
pub struct OrderExecutor {
    client: Arc<dyn ExchangeClient>,
    symbol: String,
    leverage: u32,
    ttl_ms: u64,
}

impl OrderExecutor {
    pub fn new(
        client: Arc<dyn ExchangeClient>,
        symbol: impl Into<String>,
        leverage: u32,
        ttl_ms: u64,
    ) -> Self {
        Self {
            client,
            symbol: symbol.into(),
            leverage,
            ttl_ms,
        }
    }

    /// Build the unsigned market order for `side` / `quantity`.
    pub fn market_order(&self, side: OrderSide, quantity: f64) -> OrderRequest {
        let ttl = i64::try_from(self.ttl_ms).unwrap_or(i64::MAX);
        OrderRequest {
            symbol: self.symbol.clone(),
            side,
            order_type: "MARKET".to_string(),
            quantity,
            price: 0.0,
            leverage: self.leverage,
            expiration_ms: Utc::now().timestamp_millis().saturating_add(ttl),
            client_order_id: Uuid::new_v4().to_string(),
        }
    }

    /// Sign and submit a market order.
    pub async fn submit_market(&self, side: OrderSide, quantity: f64) -> Result<Value> {
        let order = self.market_order(side, quantity);
        let signed = self
            .client
            .sign_order(&order)
            .with_context(|| format!("failed to sign {side} {quantity} {}", self.symbol))?;

        match self.client.submit_order(&signed).await {
            Ok(ack) => {
                info!(
                    symbol = %self.symbol,
                    side = %side,
                    quantity,
                    leverage = self.leverage,
                    client_order_id = %order.client_order_id,
                    "market order submitted"
                );
                Ok(ack)
            }
            Err(e) => {
                warn!(symbol = %self.symbol, side = %side, quantity, error = %e, "market order failed");
                Err(e.context(format!("market {side} {quantity} {} failed", self.symbol)))
            }
        }
    }
}

impl std::fmt::Debug for OrderExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OrderExecutor")
            .field("client", &"<ExchangeClient>")
            .field("symbol", &self.symbol)
            .field("leverage", &self.leverage)
            .field("ttl_ms", &self.ttl_ms)
            .finish()
    }
}
