// =============================================================================
// Exchange Module — venue abstraction, REST client and paper venue
// =============================================================================
//
// Everything above this module talks to the venue through `ExchangeClient`.
// Responses are returned as raw JSON because the venue does not keep one shape
// per endpoint; normalisation lives with the consumers (position reader,
// market helpers).

pub mod client;
pub mod paper;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::fixed_point::to_base18;
use crate::types::OrderSide;

/// Parameters of one order before signing. Quantities and prices are in
/// display units; they are converted to base-18 only in `canonical_payload`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderRequest {
    pub symbol: String,
    pub side: OrderSide,
    pub order_type: String,
    pub quantity: f64,
    /// Zero for market orders.
    pub price: f64,
    pub leverage: u32,
    /// Absolute expiry, UNIX milliseconds.
    pub expiration_ms: i64,
    pub client_order_id: String,
}

impl OrderRequest {
    /// Stable `key=value&...` rendering used as the signing input.
    pub fn canonical_payload(&self) -> String {
        format!(
            "symbol={}&side={}&orderType={}&quantity={}&price={}&leverage={}&expiration={}&clientOrderId={}",
            self.symbol,
            self.side,
            self.order_type,
            to_base18(self.quantity),
            to_base18(self.price),
            to_base18(f64::from(self.leverage)),
            self.expiration_ms,
            self.client_order_id,
        )
    }
}

/// An order together with its signature, ready for submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignedOrder {
    pub request: OrderRequest,
    pub payload: String,
    pub signature: String,
}

/// The operations the cycler needs from a derivatives venue.
#[async_trait]
pub trait ExchangeClient: Send + Sync {
    /// Current position for `symbol`, in whatever shape the venue returns.
    async fn get_position(&self, symbol: &str) -> Result<Value>;

    /// Account snapshot (wallet balance and `positions[]`).
    async fn get_account_data(&self) -> Result<Value>;

    /// Market snapshot carrying one of `markPrice`, `lastPrice` or `price`.
    async fn get_market_data(&self, symbol: &str) -> Result<Value>;

    /// Sign an order. Pure computation, no I/O.
    fn sign_order(&self, order: &OrderRequest) -> Result<SignedOrder>;

    /// Submit a signed order and return the venue acknowledgement.
    async fn submit_order(&self, order: &SignedOrder) -> Result<Value>;
}
