// =============================================================================
// Position Reader — canonical view of the venue position
// =============================================================================
//
// The position endpoint answers in several layouts depending on venue version
// and account state:
//
//   Direct   { "avgEntryPrice": .., "quantity": .., .. }
//   Nested   { "data" | "result": { "avgEntryPrice": .., .. } }
//   List     { "data" | "result": [ {..} ] }  or  { "data": { "data": [ {..} ] } }
//   Empty    anything else
//
// `PositionResponse::classify` maps a raw body to one of these variants and
// `normalize` maps a record to `Position`. When the endpoint yields no usable
// record, the account snapshot's `positions[]` is scanned instead.
//
// A record with quantity zero is NOT a position. Every consumer receives
// `None` for it.
// =============================================================================

use std::sync::Arc;

use anyhow::Result;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::exchange::ExchangeClient;
use crate::fixed_point::field;
use crate::types::Direction;

/// Canonical open position, rebuilt on every read.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Position {
    pub symbol: String,
    pub side: Direction,
    /// Always > 0.
    pub quantity: f64,
    pub avg_entry_price: f64,
    pub unrealized_profit: f64,
}

/// Known layouts of the position endpoint.
#[derive(Debug, Clone, PartialEq)]
pub enum PositionResponse {
    Direct(Value),
    Nested(Value),
    List(Vec<Value>),
    Empty,
}

fn has_entry_price(record: &Value) -> bool {
    match record.get("avgEntryPrice") {
        None | Some(Value::Null) => false,
        Some(Value::String(s)) => !s.trim().is_empty(),
        Some(_) => true,
    }
}

impl PositionResponse {
    pub fn classify(body: &Value) -> Self {
        if body.is_object() && has_entry_price(body) {
            return Self::Direct(body.clone());
        }
        if let Some(items) = body.as_array() {
            return Self::List(items.clone());
        }

        let inner = body.get("data").or_else(|| body.get("result"));
        match inner {
            Some(Value::Array(items)) => Self::List(items.clone()),
            Some(obj @ Value::Object(_)) => {
                if let Some(Value::Array(items)) = obj.get("data") {
                    Self::List(items.clone())
                } else if has_entry_price(obj) {
                    Self::Nested(obj.clone())
                } else {
                    Self::Empty
                }
            }
            _ => Self::Empty,
        }
    }

    /// The single record this response describes, if it has one.
    pub fn into_record(self) -> Option<Value> {
        match self {
            Self::Direct(rec) | Self::Nested(rec) => Some(rec),
            Self::List(items) => items.into_iter().next().filter(Value::is_object),
            Self::Empty => None,
        }
    }
}

/// Map a raw record to a `Position`. `None` when the quantity is zero,
/// missing or unparseable.
pub fn normalize(record: &Value, default_symbol: &str) -> Option<Position> {
    let signed_qty = field(record, "quantity")?;
    if signed_qty == 0.0 || !signed_qty.is_finite() {
        return None;
    }

    let label = record
        .get("side")
        .or_else(|| record.get("positionSide"))
        .and_then(Value::as_str);
    let side = match label {
        Some(l) => Direction::from_exchange_label(l),
        None if signed_qty < 0.0 => Direction::Short,
        None => Direction::Long,
    };

    let avg_entry_price = field(record, "avgEntryPrice")
        .or_else(|| field(record, "avgOpenPrice"))
        .unwrap_or(0.0);

    Some(Position {
        symbol: record
            .get("symbol")
            .and_then(Value::as_str)
            .unwrap_or(default_symbol)
            .to_string(),
        side,
        quantity: signed_qty.abs(),
        avg_entry_price,
        unrealized_profit: field(record, "unrealizedProfit").unwrap_or(0.0),
    })
}

/// Scan an account snapshot for `symbol` with a strictly positive open price.
pub fn find_in_account(account: &Value, symbol: &str) -> Option<Value> {
    let root = account.get("result").unwrap_or(account);
    root.get("positions")?
        .as_array()?
        .iter()
        .find(|p| {
            p.get("symbol").and_then(Value::as_str) == Some(symbol)
                && field(p, "avgOpenPrice").map_or(false, |px| px > 0.0)
        })
        .cloned()
}

/// Reads the current position of one instrument.
#[derive(Clone)]
pub struct PositionReader {
    client: Arc<dyn ExchangeClient>,
    symbol: String,
}

impl PositionReader {
    pub fn new(client: Arc<dyn ExchangeClient>, symbol: impl Into<String>) -> Self {
        Self {
            client,
            symbol: symbol.into(),
        }
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    /// Current position, or `None` when flat or unreadable.
    ///
    /// A failing position endpoint falls through to the account snapshot; a
    /// failing account query is returned as an error.
    pub async fn read_position(&self) -> Result<Option<Position>> {
        let direct = match self.client.get_position(&self.symbol).await {
            Ok(body) => PositionResponse::classify(&body).into_record(),
            Err(e) => {
                warn!(symbol = %self.symbol, error = %e, "position query failed, trying account data");
                None
            }
        };

        if let Some(record) = direct {
            let pos = normalize(&record, &self.symbol);
            debug!(symbol = %self.symbol, quantity = pos.as_ref().map(|p| p.quantity), "position read");
            return Ok(pos);
        }

        let account = self.client.get_account_data().await?;
        let pos = find_in_account(&account, &self.symbol).and_then(|r| normalize(&r, &self.symbol));
        debug!(
            symbol = %self.symbol,
            quantity = pos.as_ref().map(|p| p.quantity),
            "position read from account data"
        );
        Ok(pos)
    }
}
