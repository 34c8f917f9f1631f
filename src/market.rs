// =============================================================================
// Market helpers — price and wallet balance extraction
// =============================================================================

use anyhow::Result;
use serde_json::Value;
use tracing::debug;

use crate::exchange::ExchangeClient;
use crate::fixed_point::field;

/// Price fields in order of preference.
const PRICE_FIELDS: [&str; 3] = ["markPrice", "lastPrice", "price"];

/// First strictly positive price among `markPrice`, `lastPrice`, `price`,
/// looked up under `result` when present.
pub fn parse_price(market: &Value) -> Option<f64> {
    let data = market.get("result").unwrap_or(market);
    PRICE_FIELDS
        .iter()
        .filter_map(|k| field(data, k))
        .find(|px| *px > 0.0)
}

/// Wallet balance from `walletBalance`, `result.walletBalance` or
/// `balances[0].walletBalance`.
pub fn parse_wallet_balance(account: &Value) -> Option<f64> {
    field(account, "walletBalance")
        .or_else(|| account.get("result").and_then(|r| field(r, "walletBalance")))
        .or_else(|| {
            account
                .get("balances")
                .and_then(Value::as_array)
                .and_then(|b| b.first())
                .and_then(|b| field(b, "walletBalance"))
        })
}

/// Fetch the current price of `symbol`. `Ok(None)` when the venue answered
/// without a usable price.
pub async fn fetch_price(client: &dyn ExchangeClient, symbol: &str) -> Result<Option<f64>> {
    let market = client.get_market_data(symbol).await?;
    let price = parse_price(&market);
    debug!(symbol, price, "market price fetched");
    Ok(price)
}

/// Fetch the wallet balance. `Ok(None)` when the snapshot carries none.
pub async fn fetch_wallet_balance(client: &dyn ExchangeClient) -> Result<Option<f64>> {
    let account = client.get_account_data().await?;
    Ok(parse_wallet_balance(&account))
}
