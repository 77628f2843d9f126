/*
[INPUT]:  HTTP configuration, API key/secret, signed REST calls to a
          Binance-shaped spot venue
[OUTPUT]: Decimal prices/quantities and order identifiers per the Exchange
          trait
[POS]:    Live transport implementation of the exchange facade
[UPDATE]: When the venue's REST surface or signing scheme changes
*/

use crate::error::{ExchangeError, Result};
use crate::facade::{Exchange, OrderStatus};
use crate::wire::{OrderState, Side};
use async_trait::async_trait;
use hmac::{Hmac, Mac};
use reqwest::{Client, Method, Url};
use rust_decimal::Decimal;
use serde::Deserialize;
use sha2::Sha256;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

type HmacSha256 = Hmac<Sha256>;

/// Stop-limit leg of a bracket is placed at `lower * STOP_LIMIT_OFFSET`, a
/// hair below the stop trigger so the limit order actually crosses the
/// book once triggered.
const STOP_LIMIT_OFFSET: &str = "0.99";

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub timeout: std::time::Duration,
    pub connect_timeout: std::time::Duration,
    pub recv_window_ms: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            timeout: std::time::Duration::from_secs(30),
            connect_timeout: std::time::Duration::from_secs(10),
            recv_window_ms: 5_000,
        }
    }
}

/// Live REST client for a Binance-shaped spot trading venue.
///
/// Trading endpoints are signed with HMAC-SHA256 over the canonical query
/// string, keyed by the account secret, with the resulting hex digest
/// appended as a `signature` parameter and the API key sent as the
/// `X-MBX-APIKEY` header — the same scheme the source bot's exchange
/// binding used against Binance.
#[derive(Debug, Clone)]
pub struct LiveExchange {
    http: Client,
    base_url: Url,
    api_key: String,
    api_secret: String,
    buy_guard_ratio: Decimal,
    debug: bool,
}

impl LiveExchange {
    pub fn new(api_key: String, api_secret: String, buy_guard_ratio: Decimal) -> Result<Self> {
        Self::with_config(
            ClientConfig::default(),
            "https://api.binance.com",
            api_key,
            api_secret,
            buy_guard_ratio,
            false,
        )
    }

    pub fn with_config(
        config: ClientConfig,
        base_url: &str,
        api_key: String,
        api_secret: String,
        buy_guard_ratio: Decimal,
        debug: bool,
    ) -> Result<Self> {
        let http = Client::builder()
            .timeout(config.timeout)
            .connect_timeout(config.connect_timeout)
            .build()
            .map_err(|err| ExchangeError::Config(err.to_string()))?;
        let base_url =
            Url::parse(base_url).map_err(|err| ExchangeError::Config(err.to_string()))?;
        Ok(Self {
            http,
            base_url,
            api_key,
            api_secret,
            buy_guard_ratio,
            debug,
        })
    }

    fn sign(&self, query: &str) -> String {
        let mut mac = HmacSha256::new_from_slice(self.api_secret.as_bytes())
            .expect("HMAC accepts a key of any length");
        mac.update(query.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    fn now_ms() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system clock before epoch")
            .as_millis() as u64
    }

    async fn public_get<T: for<'de> Deserialize<'de>>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T> {
        let url = self
            .base_url
            .join(path)
            .map_err(|err| ExchangeError::Config(err.to_string()))?;
        let resp = self.http.get(url).query(query).send().await?;
        Self::parse_response(resp).await
    }

    /// Build and send a signed request (trading/account endpoints).
    async fn signed(
        &self,
        method: Method,
        path: &str,
        mut params: Vec<(&str, String)>,
    ) -> Result<reqwest::Response> {
        params.push(("timestamp", Self::now_ms().to_string()));
        let query = serde_urlencoded_like(&params);
        let signature = self.sign(&query);
        let url = self
            .base_url
            .join(path)
            .map_err(|err| ExchangeError::Config(err.to_string()))?;
        let full_query = format!("{query}&signature={signature}");

        if self.debug {
            debug!(path, %full_query, "signed request");
        }

        let req = self
            .http
            .request(method.clone(), url)
            .header("X-MBX-APIKEY", &self.api_key);
        let req = if method == Method::GET || method == Method::DELETE {
            req.query(&parse_query_pairs(&full_query))
        } else {
            req.body(full_query).header(
                "content-type",
                "application/x-www-form-urlencoded",
            )
        };
        Ok(req.send().await?)
    }

    async fn parse_response<T: for<'de> Deserialize<'de>>(resp: reqwest::Response) -> Result<T> {
        let status = resp.status();
        let body = resp.text().await?;
        if !status.is_success() {
            if status.is_server_error() || status.as_u16() == 429 {
                return Err(ExchangeError::Transient(format!(
                    "http {status}: {body}"
                )));
            }
            return Err(ExchangeError::Rejected(format!("http {status}: {body}")));
        }
        serde_json::from_str(&body).map_err(|err| {
            ExchangeError::Serialization(format!("{err} (body: {body})"))
        })
    }

    async fn price_tick_precision(&self, symbol: &str) -> Result<u32> {
        #[derive(Deserialize)]
        struct ExchangeInfo {
            symbols: Vec<SymbolInfo>,
        }
        #[derive(Deserialize)]
        struct SymbolInfo {
            symbol: String,
            filters: Vec<serde_json::Value>,
        }

        let info: ExchangeInfo = self
            .public_get("/api/v3/exchangeInfo", &[("symbol", symbol.to_string())])
            .await?;
        let sym = info
            .symbols
            .into_iter()
            .find(|s| s.symbol == symbol)
            .ok_or_else(|| ExchangeError::NotFound(symbol.to_string()))?;
        for filter in sym.filters {
            if filter.get("filterType").and_then(|v| v.as_str()) == Some("PRICE_FILTER") {
                if let Some(tick) = filter.get("tickSize").and_then(|v| v.as_str()) {
                    return Ok(tick_size_to_precision(tick));
                }
            }
        }
        Ok(8)
    }

    async fn buy_limit(
        &self,
        symbol: &str,
        quote_qty: Decimal,
        price: Decimal,
    ) -> Result<(Decimal, Decimal)> {
        let precision = self.price_tick_precision(symbol).await?;
        let rounded_price = price.round_dp(precision);
        let qty = (quote_qty / rounded_price).round_dp(precision);
        let params = vec![
            ("symbol", symbol.to_string()),
            ("side", Side::Buy.to_string()),
            ("type", "LIMIT".to_string()),
            ("timeInForce", "FOK".to_string()),
            ("quantity", qty.to_string()),
            ("price", rounded_price.to_string()),
        ];
        let resp = self.signed(Method::POST, "/api/v3/order", params).await?;
        let order: OrderAck = Self::parse_response(resp).await?;
        self.await_order(symbol, &order.order_id.to_string(), &CancellationToken::new())
            .await
            .map(|status| (status.filled_quote_qty, qty))
    }

    async fn buy_market(&self, symbol: &str, quote_qty: Decimal) -> Result<(Decimal, Decimal)> {
        let params = vec![
            ("symbol", symbol.to_string()),
            ("side", Side::Buy.to_string()),
            ("type", "MARKET".to_string()),
            ("quoteOrderQty", quote_qty.to_string()),
        ];
        let resp = self.signed(Method::POST, "/api/v3/order", params).await?;
        let order: OrderAck = Self::parse_response(resp).await?;
        let status = self
            .await_order(symbol, &order.order_id.to_string(), &CancellationToken::new())
            .await?;
        Ok((status.filled_quote_qty, order.executed_qty.unwrap_or_default()))
    }

    /// Poll a freshly-placed order until it leaves NEW/PARTIALLY_FILLED.
    /// Used only to turn the exchange's async order placement into the
    /// synchronous `buy`/`sell` contract the Trader expects; retry pacing
    /// for *this* poll is intentionally tight since it's bounded by the
    /// order's own fill-or-kill/market semantics, not the 5s Trader cadence.
    async fn await_order(
        &self,
        symbol: &str,
        order_id: &str,
        cancel: &CancellationToken,
    ) -> Result<OrderStatus> {
        loop {
            if cancel.is_cancelled() {
                return Err(ExchangeError::Transient("canceled".to_string()));
            }
            match self.status(symbol, order_id, cancel).await {
                Ok(status) if status.completed => return Ok(status),
                Ok(_) => tokio::time::sleep(std::time::Duration::from_millis(200)).await,
                Err(err) if err.is_transient() => {
                    tokio::time::sleep(std::time::Duration::from_millis(200)).await
                }
                Err(err) => return Err(err),
            }
        }
    }
}

#[async_trait]
impl Exchange for LiveExchange {
    fn symbol(&self, base: &str, quote: &str) -> String {
        format!("{base}{quote}")
    }

    async fn price(&self, symbol: &str, _cancel: &CancellationToken) -> Result<Decimal> {
        #[derive(Deserialize)]
        struct Ticker {
            price: Decimal,
        }
        let ticker: Ticker = self
            .public_get("/api/v3/ticker/price", &[("symbol", symbol.to_string())])
            .await?;
        Ok(ticker.price)
    }

    async fn balance(&self, currency: &str, _cancel: &CancellationToken) -> Result<Decimal> {
        #[derive(Deserialize)]
        struct Account {
            balances: Vec<Balance>,
        }
        #[derive(Deserialize)]
        struct Balance {
            asset: String,
            free: Decimal,
        }
        let resp = self.signed(Method::GET, "/api/v3/account", vec![]).await?;
        let account: Account = Self::parse_response(resp).await?;
        account
            .balances
            .into_iter()
            .find(|b| b.asset == currency)
            .map(|b| b.free)
            .ok_or_else(|| ExchangeError::NotFound(currency.to_string()))
    }

    async fn buy(
        &self,
        symbol: &str,
        quote_qty: Decimal,
        hint_price: Decimal,
        cancel: &CancellationToken,
    ) -> Result<(Decimal, Decimal)> {
        let current_price = self.price(symbol, cancel).await?;
        if current_price < hint_price * self.buy_guard_ratio {
            return Err(ExchangeError::Rejected(format!(
                "current price {current_price} is below guard ratio of start price {hint_price}"
            )));
        }
        match self.buy_limit(symbol, quote_qty, current_price).await {
            Ok(result) => Ok(result),
            Err(err) => {
                warn!(%symbol, %err, "buy limit failed, falling back to market");
                self.buy_market(symbol, quote_qty).await
            }
        }
    }

    async fn sell(&self, symbol: &str, qty: Decimal, cancel: &CancellationToken) -> Result<Decimal> {
        let precision = self.price_tick_precision(symbol).await?;
        let qty = qty.round_dp(precision);
        let params = vec![
            ("symbol", symbol.to_string()),
            ("side", Side::Sell.to_string()),
            ("type", "MARKET".to_string()),
            ("quantity", qty.to_string()),
        ];
        let resp = self.signed(Method::POST, "/api/v3/order", params).await?;
        let order: OrderAck = Self::parse_response(resp).await?;
        let status = self.await_order(symbol, &order.order_id.to_string(), cancel).await?;
        Ok(status.filled_quote_qty)
    }

    async fn create_stop_limit(
        &self,
        symbol: &str,
        qty: Decimal,
        upper: Decimal,
        lower: Decimal,
        _cancel: &CancellationToken,
    ) -> Result<(String, Vec<String>)> {
        let precision = self.price_tick_precision(symbol).await?;
        let stop_limit_offset: Decimal = STOP_LIMIT_OFFSET.parse().expect("valid constant");
        let upper = upper.round_dp(precision);
        let lower = lower.round_dp(precision);
        let stop_limit_price = (lower * stop_limit_offset).round_dp(precision);
        let qty = qty.round_dp(precision);

        let params = vec![
            ("symbol", symbol.to_string()),
            ("side", Side::Sell.to_string()),
            ("quantity", qty.to_string()),
            ("price", upper.to_string()),
            ("stopPrice", lower.to_string()),
            ("stopLimitPrice", stop_limit_price.to_string()),
            ("stopLimitTimeInForce", "GTC".to_string()),
        ];
        let resp = self
            .signed(Method::POST, "/api/v3/orderList/oco", params)
            .await?;
        let ack: OcoAck = Self::parse_response(resp).await?;
        let order_ids = ack
            .order_reports
            .into_iter()
            .map(|o| o.order_id.to_string())
            .collect();
        Ok((ack.order_list_id.to_string(), order_ids))
    }

    async fn cancel_stop_limit(
        &self,
        symbol: &str,
        order_list_id: &str,
        _cancel: &CancellationToken,
    ) -> Result<()> {
        let params = vec![
            ("symbol", symbol.to_string()),
            ("orderListId", order_list_id.to_string()),
        ];
        let resp = self
            .signed(Method::DELETE, "/api/v3/orderList", params)
            .await?;
        let status = resp.status();
        if status.is_success() {
            return Ok(());
        }
        // Canceling a bracket that already cleared is not an error: the
        // Trader's cancel-before-ratchet/exit step must be idempotent.
        if status.as_u16() == 400 {
            return Ok(());
        }
        if status.is_server_error() {
            return Err(ExchangeError::Transient(format!("http {status}")));
        }
        Err(ExchangeError::Rejected(format!("http {status}")))
    }

    async fn status(
        &self,
        symbol: &str,
        order_id: &str,
        _cancel: &CancellationToken,
    ) -> Result<OrderStatus> {
        let params = vec![
            ("symbol", symbol.to_string()),
            ("orderId", order_id.to_string()),
        ];
        let resp = self.signed(Method::GET, "/api/v3/order", params).await?;
        let order: OrderStatusResponse = Self::parse_response(resp).await?;
        match order.status {
            state if !state.is_terminal() => Ok(OrderStatus {
                completed: false,
                filled_quote_qty: Decimal::ZERO,
            }),
            OrderState::Filled => Ok(OrderStatus {
                completed: true,
                filled_quote_qty: order.cummulative_quote_qty,
            }),
            OrderState::Canceled => Err(ExchangeError::OrderCanceled),
            state => Err(ExchangeError::Rejected(format!(
                "order ended as {state:?}"
            ))),
        }
    }
}

#[derive(Deserialize)]
struct OrderAck {
    #[serde(rename = "orderId")]
    order_id: i64,
    #[serde(rename = "executedQty")]
    executed_qty: Option<Decimal>,
}

#[derive(Deserialize)]
struct OcoAck {
    #[serde(rename = "orderListId")]
    order_list_id: i64,
    #[serde(rename = "orderReports")]
    order_reports: Vec<OcoLeg>,
}

#[derive(Deserialize)]
struct OcoLeg {
    #[serde(rename = "orderId")]
    order_id: i64,
}

#[derive(Deserialize)]
struct OrderStatusResponse {
    status: OrderState,
    #[serde(rename = "cummulativeQuoteQty")]
    cummulative_quote_qty: Decimal,
}

fn serde_urlencoded_like(params: &[(&str, String)]) -> String {
    params
        .iter()
        .map(|(k, v)| format!("{k}={}", urlencode(v)))
        .collect::<Vec<_>>()
        .join("&")
}

fn parse_query_pairs(query: &str) -> Vec<(String, String)> {
    query
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

fn urlencode(value: &str) -> String {
    url::form_urlencoded::byte_serialize(value.as_bytes()).collect()
}

fn tick_size_to_precision(tick: &str) -> u32 {
    match tick.split('.').nth(1) {
        Some(frac) => frac.trim_end_matches('0').len() as u32,
        None => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tick_precision_from_step_size() {
        assert_eq!(tick_size_to_precision("0.00100000"), 1);
        assert_eq!(tick_size_to_precision("0.00010000"), 4);
        assert_eq!(tick_size_to_precision("1.00000000"), 0);
    }

    #[test]
    fn order_ack_deserializes_expected_fields() {
        let ack: OrderAck =
            serde_json::from_str(r#"{"orderId":42,"executedQty":"1.5"}"#).unwrap();
        assert_eq!(ack.order_id, 42);
        assert_eq!(ack.executed_qty, Some("1.5".parse().unwrap()));
    }
}
