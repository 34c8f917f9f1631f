// =============================================================================
// Paper Exchange — in-process venue for dry runs
// =============================================================================
//
// Fills every market order instantly at the current simulated price and keeps
// one signed net position for the configured symbol. Responses use the same
// base-18 string encoding and the same field names as the live venue, so the
// position reader and market helpers run unchanged against it.
//
// The price follows a multiplicative random walk (one step per market or
// position query). A volatility of zero freezes it.
// =============================================================================

use anyhow::{ensure, Result};
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use rand::Rng;
use serde_json::{json, Value};
use tracing::{debug, info};
use uuid::Uuid;

use super::{ExchangeClient, OrderRequest, SignedOrder};
use crate::fixed_point::to_base18;

/// Size below which the simulated position is considered flat.
const FLAT_EPSILON: f64 = 1e-12;

/// Default per-step volatility of the random walk (0.1 %).
pub const DEFAULT_VOLATILITY: f64 = 0.001;

#[derive(Debug)]
struct Book {
    price: f64,
    volatility: f64,
    /// Signed: positive long, negative short.
    net_qty: f64,
    avg_entry: f64,
    wallet_balance: f64,
    orders_filled: u64,
}

impl Book {
    fn step_price(&mut self) {
        if self.volatility > 0.0 {
            let shock: f64 = rand::thread_rng().gen_range(-1.0..=1.0);
            self.price = (self.price * (1.0 + shock * self.volatility)).max(f64::MIN_POSITIVE);
        }
    }

    fn unrealized(&self) -> f64 {
        (self.price - self.avg_entry) * self.net_qty
    }

    fn fill(&mut self, signed_qty: f64) {
        let price = self.price;
        let old = self.net_qty;
        let new = old + signed_qty;

        if old.abs() < FLAT_EPSILON || old.signum() == signed_qty.signum() {
            // Opening or adding: weighted entry.
            self.avg_entry = if new.abs() < FLAT_EPSILON {
                0.0
            } else {
                (self.avg_entry * old.abs() + price * signed_qty.abs()) / new.abs()
            };
        } else {
            // Reducing, possibly flipping.
            let closed = signed_qty.abs().min(old.abs());
            self.wallet_balance += (price - self.avg_entry) * closed * old.signum();
            if new.abs() < FLAT_EPSILON {
                self.avg_entry = 0.0;
            } else if new.signum() != old.signum() {
                self.avg_entry = price;
            }
        }

        self.net_qty = if new.abs() < FLAT_EPSILON { 0.0 } else { new };
        self.orders_filled += 1;
    }

    fn position_record(&self, symbol: &str) -> Value {
        let side = if self.net_qty >= 0.0 { "BUY" } else { "SELL" };
        json!({
            "symbol": symbol,
            "side": side,
            "quantity": to_base18(self.net_qty.abs()),
            "avgEntryPrice": to_base18(self.avg_entry),
            "avgOpenPrice": to_base18(self.avg_entry),
            "unrealizedProfit": to_base18(self.unrealized()),
        })
    }
}

/// Simulated venue trading a single symbol.
pub struct PaperExchange {
    symbol: String,
    book: Mutex<Book>,
}

impl PaperExchange {
    /// Create a flat paper venue.
    pub fn new(symbol: impl Into<String>, start_price: f64, wallet_balance: f64) -> Self {
        let symbol = symbol.into();
        info!(symbol = %symbol, start_price, wallet_balance, "paper exchange created");
        Self {
            symbol,
            book: Mutex::new(Book {
                price: start_price,
                volatility: DEFAULT_VOLATILITY,
                net_qty: 0.0,
                avg_entry: 0.0,
                wallet_balance,
                orders_filled: 0,
            }),
        }
    }

    /// Override the random-walk volatility (0 freezes the price).
    #[cfg(test)]
    pub fn with_volatility(self, volatility: f64) -> Self {
        self.book.lock().volatility = volatility.max(0.0);
        self
    }

    /// Move the simulated price.
    #[cfg(test)]
    pub fn set_price(&self, price: f64) {
        self.book.lock().price = price;
    }

    /// Signed net position (positive long).
    #[cfg(test)]
    pub fn net_quantity(&self) -> f64 {
        self.book.lock().net_qty
    }

    #[cfg(test)]
    pub fn orders_filled(&self) -> u64 {
        self.book.lock().orders_filled
    }
}

#[async_trait]
impl ExchangeClient for PaperExchange {
    async fn get_position(&self, symbol: &str) -> Result<Value> {
        let mut book = self.book.lock();
        book.step_price();
        if symbol != self.symbol || book.net_qty == 0.0 {
            // Flat: the live venue answers with an empty page.
            return Ok(json!({ "data": [] }));
        }
        Ok(book.position_record(symbol))
    }

    async fn get_account_data(&self) -> Result<Value> {
        let book = self.book.lock();
        let positions = if book.net_qty == 0.0 {
            vec![]
        } else {
            vec![book.position_record(&self.symbol)]
        };
        Ok(json!({
            "walletBalance": to_base18(book.wallet_balance),
            "positions": positions,
        }))
    }

    async fn get_market_data(&self, symbol: &str) -> Result<Value> {
        ensure!(symbol == self.symbol, "paper exchange does not list {symbol}");
        let mut book = self.book.lock();
        book.step_price();
        Ok(json!({ "result": { "symbol": symbol, "markPrice": to_base18(book.price) } }))
    }

    fn sign_order(&self, order: &OrderRequest) -> Result<SignedOrder> {
        let payload = order.canonical_payload();
        Ok(SignedOrder {
            request: order.clone(),
            signature: format!("paper-{}", payload.len()),
            payload,
        })
    }

    async fn submit_order(&self, order: &SignedOrder) -> Result<Value> {
        let req = &order.request;
        ensure!(req.symbol == self.symbol, "paper exchange does not list {}", req.symbol);
        ensure!(req.quantity > 0.0, "order quantity must be positive, got {}", req.quantity);
        ensure!(
            req.expiration_ms > Utc::now().timestamp_millis(),
            "order {} expired before submission",
            req.client_order_id
        );

        let mut book = self.book.lock();
        book.fill(req.quantity * req.side.sign());

        let fill_price = book.price;
        debug!(
            symbol = %req.symbol,
            side = %req.side,
            quantity = req.quantity,
            fill_price,
            net_qty = book.net_qty,
            fills = book.orders_filled,
            "paper fill"
        );

        Ok(json!({
            "status": "FILLED",
            "orderId": Uuid::new_v4().to_string(),
            "clientId": req.client_order_id,
            "price": to_base18(fill_price),
        }))
    }
}

impl std::fmt::Debug for PaperExchange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PaperExchange")
            .field("symbol", &self.symbol)
            .field("book", &*self.book.lock())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixed_point::field;
    use crate::types::OrderSide;

    fn order(side: OrderSide, quantity: f64) -> SignedOrder {
        let req = OrderRequest {
            symbol: "WAL-PERP".into(),
            side,
            order_type: "MARKET".into(),
            quantity,
            price: 0.0,
            leverage: 5,
            expiration_ms: Utc::now().timestamp_millis() + 60_000,
            client_order_id: "t".into(),
        };
        SignedOrder {
            payload: req.canonical_payload(),
            signature: String::new(),
            request: req,
        }
    }

    fn venue() -> PaperExchange {
        PaperExchange::new("WAL-PERP", 2.0, 100.0).with_volatility(0.0)
    }

    #[tokio::test]
    async fn flat_venue_reports_empty_page() {
        let ex = venue();
        let resp = ex.get_position("WAL-PERP").await.unwrap();
        assert_eq!(resp, json!({ "data": [] }));
        let acct = ex.get_account_data().await.unwrap();
        assert_eq!(acct["positions"].as_array().unwrap().len(), 0);
        assert_eq!(field(&acct, "walletBalance"), Some(100.0));
    }

    #[tokio::test]
    async fn buys_then_sells_round_trip_to_flat() {
        let ex = venue();
        ex.submit_order(&order(OrderSide::Buy, 4.0)).await.unwrap();
        ex.set_price(2.5);
        let pos = ex.get_position("WAL-PERP").await.unwrap();
        assert_eq!(field(&pos, "quantity"), Some(4.0));
        assert_eq!(field(&pos, "avgEntryPrice"), Some(2.0));
        assert_eq!(field(&pos, "unrealizedProfit"), Some(2.0));
        assert_eq!(pos["side"], "BUY");

        ex.submit_order(&order(OrderSide::Sell, 4.0)).await.unwrap();
        assert_eq!(ex.net_quantity(), 0.0);
        let acct = ex.get_account_data().await.unwrap();
        assert_eq!(field(&acct, "walletBalance"), Some(102.0));
        assert_eq!(ex.orders_filled(), 2);
    }

    #[tokio::test]
    async fn short_positions_report_sell_side() {
        let ex = venue();
        ex.submit_order(&order(OrderSide::Sell, 3.0)).await.unwrap();
        let pos = ex.get_position("WAL-PERP").await.unwrap();
        assert_eq!(pos["side"], "SELL");
        assert_eq!(field(&pos, "quantity"), Some(3.0));
        assert_eq!(ex.net_quantity(), -3.0);
    }

    #[tokio::test]
    async fn expired_orders_are_rejected() {
        let ex = venue();
        let mut o = order(OrderSide::Buy, 1.0);
        o.request.expiration_ms = Utc::now().timestamp_millis() - 1;
        assert!(ex.submit_order(&o).await.is_err());
        assert_eq!(ex.orders_filled(), 0);
    }
}
