// Test doubles shared by the component tests.

use std::collections::VecDeque;

use anyhow::Result;
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};

use crate::exchange::{ExchangeClient, OrderRequest, SignedOrder};
use crate::fixed_point::to_base18;
use crate::notify::{MessageHandle, Notifier};
use crate::runtime_config::BotConfig;

pub const SYMBOL: &str = "WAL-PERP";

/// Direct-shape position record.
pub fn position(side: &str, quantity: f64, entry: f64, pnl: f64) -> Value {
    json!({
        "symbol": SYMBOL,
        "side": side,
        "quantity": to_base18(quantity),
        "avgEntryPrice": to_base18(entry),
        "unrealizedProfit": to_base18(pnl),
    })
}

pub fn long(quantity: f64) -> Value {
    position("BUY", quantity, 2.0, 0.0)
}

pub fn flat() -> Value {
    json!({ "data": [] })
}

/// Exchange whose position responses follow a script. Each `get_position`
/// pops the next entry; the last one repeats forever.
pub struct ScriptedExchange {
    positions: Mutex<VecDeque<Value>>,
    account: Mutex<Value>,
    market: Mutex<Value>,
    pub submitted: Mutex<Vec<OrderRequest>>,
    pub position_reads: Mutex<u32>,
    fail_position_query: bool,
    fail_submit: bool,
}

impl ScriptedExchange {
    pub fn new(script: Vec<Value>) -> Self {
        Self {
            positions: Mutex::new(script.into()),
            account: Mutex::new(json!({ "walletBalance": to_base18(25.0), "positions": [] })),
            market: Mutex::new(json!({ "markPrice": to_base18(2.0) })),
            submitted: Mutex::new(Vec::new()),
            position_reads: Mutex::new(0),
            fail_position_query: false,
            fail_submit: false,
        }
    }

    pub fn with_account(self, account: Value) -> Self {
        *self.account.lock() = account;
        self
    }

    pub fn with_market(self, market: Value) -> Self {
        *self.market.lock() = market;
        self
    }

    pub fn failing_position_query(mut self) -> Self {
        self.fail_position_query = true;
        self
    }

    pub fn failing_submit(mut self) -> Self {
        self.fail_submit = true;
        self
    }

    pub fn orders(&self) -> Vec<OrderRequest> {
        self.submitted.lock().clone()
    }

    pub fn reads(&self) -> u32 {
        *self.position_reads.lock()
    }
}

#[async_trait]
impl ExchangeClient for ScriptedExchange {
    async fn get_position(&self, _symbol: &str) -> Result<Value> {
        *self.position_reads.lock() += 1;
        if self.fail_position_query {
            anyhow::bail!("position endpoint unavailable");
        }
        let mut script = self.positions.lock();
        let next = if script.len() > 1 {
            script.pop_front()
        } else {
            script.front().cloned()
        };
        Ok(next.unwrap_or_else(flat))
    }

    async fn get_account_data(&self) -> Result<Value> {
        Ok(self.account.lock().clone())
    }

    async fn get_market_data(&self, _symbol: &str) -> Result<Value> {
        Ok(self.market.lock().clone())
    }

    fn sign_order(&self, order: &OrderRequest) -> Result<SignedOrder> {
        Ok(SignedOrder {
            request: order.clone(),
            payload: order.canonical_payload(),
            signature: "test".into(),
        })
    }

    async fn submit_order(&self, order: &SignedOrder) -> Result<Value> {
        if self.fail_submit {
            anyhow::bail!("order rejected: insufficient margin");
        }
        self.submitted.lock().push(order.request.clone());
        Ok(json!({ "status": "ACCEPTED" }))
    }
}

/// Notifier that keeps everything it was asked to send.
#[derive(Default)]
pub struct RecordingNotifier {
    pub sent: Mutex<Vec<String>>,
    pub edits: Mutex<Vec<(MessageHandle, String)>>,
}

impl RecordingNotifier {
    pub fn sent(&self) -> Vec<String> {
        self.sent.lock().clone()
    }

    pub fn edits(&self) -> Vec<(MessageHandle, String)> {
        self.edits.lock().clone()
    }

    pub fn any_sent(&self, needle: &str) -> bool {
        self.sent.lock().iter().any(|m| m.contains(needle))
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, text: &str) -> Option<MessageHandle> {
        let mut sent = self.sent.lock();
        sent.push(text.to_string());
        Some(MessageHandle(sent.len() as i64))
    }

    async fn update(&self, handle: MessageHandle, text: &str) {
        self.edits.lock().push((handle, text.to_string()));
    }
}

/// Default config with the test symbol.
pub fn config() -> BotConfig {
    BotConfig {
        symbol: SYMBOL.to_string(),
        ..BotConfig::default()
    }
}
