// =============================================================================
// REST Exchange Client — HMAC-SHA256 signed orders
// =============================================================================
//
// SECURITY: The secret key is never logged or serialized. Every request carries
// the API key as a header; orders carry an HMAC-SHA256 signature over their
// canonical payload, and an absolute expiration so a delayed signed order
// cannot execute late.
// =============================================================================

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use hmac::{Hmac, Mac};
use reqwest::header::{HeaderMap, HeaderValue};
use serde_json::{json, Value};
use sha2::Sha256;
use tracing::{debug, instrument};

use super::{ExchangeClient, OrderRequest, SignedOrder};

type HmacSha256 = Hmac<Sha256>;

/// Default REST endpoint when `EXCHANGE_BASE_URL` is not set.
pub const DEFAULT_BASE_URL: &str = "https://dapi.api.sui-prod.bluefin.io";

/// Per-request timeout.
const REQUEST_TIMEOUT_SECS: u64 = 10;

/// Signed REST client for the perpetuals venue.
#[derive(Clone)]
pub struct RestExchangeClient {
    secret: String,
    /// Parent account the positions belong to.
    account: String,
    base_url: String,
    client: reqwest::Client,
}

impl RestExchangeClient {
    // -------------------------------------------------------------------------
    // Construction
    // -------------------------------------------------------------------------

    /// Create a new client.
    ///
    /// # Arguments
    /// * `api_key`: sent as the `X-API-KEY` header.
    /// * `secret`: used exclusively for HMAC signing.
    /// * `account`: parent account address used in position queries.
    /// * `base_url`: REST root, without trailing slash.
    pub fn new(
        api_key: impl Into<String>,
        secret: impl Into<String>,
        account: impl Into<String>,
        base_url: impl Into<String>,
    ) -> Result<Self> {
        let api_key = api_key.into();

        let mut default_headers = HeaderMap::new();
        if let Ok(val) = HeaderValue::from_str(&api_key) {
            default_headers.insert("X-API-KEY", val);
        }

        let client = reqwest::Client::builder()
            .default_headers(default_headers)
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .context("failed to build reqwest client")?;

        let base_url = base_url.into().trim_end_matches('/').to_string();
        debug!(base_url = %base_url, "RestExchangeClient initialised");

        Ok(Self {
            secret: secret.into(),
            account: account.into(),
            base_url,
            client,
        })
    }

    // -------------------------------------------------------------------------
    // Signing helpers
    // -------------------------------------------------------------------------

    /// Produce an HMAC-SHA256 hex signature of `payload`.
    pub fn sign(&self, payload: &str) -> Result<String> {
        let mut mac = HmacSha256::new_from_slice(self.secret.as_bytes())
            .context("invalid HMAC key")?;
        mac.update(payload.as_bytes());
        Ok(hex::encode(mac.finalize().into_bytes()))
    }

    // -------------------------------------------------------------------------
    // Transport
    // -------------------------------------------------------------------------

    async fn get_json(&self, path: &str, query: &[(&str, &str)]) -> Result<Value> {
        let url = format!("{}{}", self.base_url, path);

        let resp = self
            .client
            .get(&url)
            .query(query)
            .send()
            .await
            .with_context(|| format!("GET {path} request failed"))?;

        let status = resp.status();
        let body: Value = resp
            .json()
            .await
            .with_context(|| format!("failed to parse {path} response"))?;

        if !status.is_success() {
            anyhow::bail!("GET {} returned {}: {}", path, status, body);
        }
        Ok(body)
    }
}

#[async_trait]
impl ExchangeClient for RestExchangeClient {
    /// GET /userPosition
    #[instrument(skip(self), name = "exchange::get_position")]
    async fn get_position(&self, symbol: &str) -> Result<Value> {
        let body = self
            .get_json(
                "/userPosition",
                &[
                    ("symbol", symbol),
                    ("pageSize", "1"),
                    ("pageNumber", "1"),
                    ("parentAddress", self.account.as_str()),
                ],
            )
            .await?;
        debug!(symbol, "position retrieved");
        Ok(body)
    }

    /// GET /account
    #[instrument(skip(self), name = "exchange::get_account_data")]
    async fn get_account_data(&self) -> Result<Value> {
        let body = self
            .get_json("/account", &[("parentAddress", self.account.as_str())])
            .await?;
        debug!("account data retrieved");
        Ok(body)
    }

    /// GET /marketData
    #[instrument(skip(self), name = "exchange::get_market_data")]
    async fn get_market_data(&self, symbol: &str) -> Result<Value> {
        let body = self.get_json("/marketData", &[("symbol", symbol)]).await?;
        debug!(symbol, "market data retrieved");
        Ok(body)
    }

    fn sign_order(&self, order: &OrderRequest) -> Result<SignedOrder> {
        let payload = order.canonical_payload();
        let signature = self.sign(&payload)?;
        Ok(SignedOrder {
            request: order.clone(),
            payload,
            signature,
        })
    }

    /// POST /orders
    #[instrument(skip(self, order), name = "exchange::submit_order")]
    async fn submit_order(&self, order: &SignedOrder) -> Result<Value> {
        let url = format!("{}/orders", self.base_url);
        let req = &order.request;

        let body = json!({
            "orderSignatureRequest": order.payload,
            "orderSignature": order.signature,
            "parentAddress": self.account,
            "clientId": req.client_order_id,
        });

        debug!(symbol = %req.symbol, side = %req.side, quantity = req.quantity, "submitting order");

        let resp = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .context("POST /orders request failed")?;

        let status = resp.status();
        let ack: Value = resp
            .json()
            .await
            .context("failed to parse order response")?;

        if !status.is_success() {
            anyhow::bail!("POST /orders returned {}: {}", status, ack);
        }

        debug!(symbol = %req.symbol, side = %req.side, "order accepted");
        Ok(ack)
    }
}

impl std::fmt::Debug for RestExchangeClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RestExchangeClient")
            .field("secret", &"<redacted>")
            .field("account", &self.account)
            .field("base_url", &self.base_url)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::OrderSide;

    fn client() -> RestExchangeClient {
        RestExchangeClient::new("key", "secret", "0xabc", "https://example.test/").unwrap()
    }

    #[test]
    fn signature_is_deterministic_hex() {
        let c = client();
        let a = c.sign("payload").unwrap();
        let b = c.sign("payload").unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        assert_ne!(a, c.sign("payload2").unwrap());
    }

    #[test]
    fn signed_order_covers_canonical_payload() {
        let c = client();
        let req = OrderRequest {
            symbol: "WAL-PERP".into(),
            side: OrderSide::Buy,
            order_type: "MARKET".into(),
            quantity: 2.0,
            price: 0.0,
            leverage: 5,
            expiration_ms: 42,
            client_order_id: "id".into(),
        };
        let signed = c.sign_order(&req).unwrap();
        assert_eq!(signed.payload, req.canonical_payload());
        assert_eq!(signed.signature, c.sign(&signed.payload).unwrap());
    }

    #[test]
    fn debug_redacts_secret() {
        let rendered = format!("{:?}", client());
        assert!(rendered.contains("<redacted>"));
        assert!(!rendered.contains("\"secret\""));
        assert!(rendered.contains("https://example.test"));
    }
}
