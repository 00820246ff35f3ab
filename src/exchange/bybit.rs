//! Bybit v5 REST transport implementation

use super::{
    traits::*,
    Market,
};
use crate::{config::ApiConfig, ArbitrageError, Result};
use async_trait::async_trait;
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;
use tracing::{debug, warn};

type HmacSha256 = Hmac<Sha256>;

/// Settlement coin used for linear position queries
const SETTLE_COIN: &str = "USDT";

/// Bybit REST transport
///
/// Executes signed v5 API requests. Host selection follows the account mode:
/// demo trading, testnet, or mainnet.
pub struct BybitTransport {
    base_url: String,
    api_key: String,
    secret_key: String,
    recv_window: u64,
    client: reqwest::Client,
}

impl BybitTransport {
    /// Create a transport from API configuration
    pub fn new(config: &ApiConfig) -> Result<Self> {
        let base_url = config.rest_url();

        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| ArbitrageError::Connection(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            base_url,
            api_key: config.api_key.clone(),
            secret_key: config.secret_key.clone(),
            recv_window: config.recv_window_ms,
            client,
        })
    }

    /// Create a transport against an explicit base URL (used by tests)
    pub fn with_base_url(base_url: &str, api_key: &str, secret_key: &str) -> Result<Self> {
        let url = url::Url::parse(base_url)
            .map_err(|e| ArbitrageError::Connection(format!("Invalid base URL: {}", e)))?;

        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .map_err(|e| ArbitrageError::Connection(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            base_url: url.as_str().trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            secret_key: secret_key.to_string(),
            recv_window: 5000,
            client,
        })
    }

    /// Sign `payload` (query string for GET, raw JSON body for POST)
    fn sign(&self, timestamp: i64, payload: &str) -> String {
        let param_str = format!("{}{}{}{}", timestamp, self.api_key, self.recv_window, payload);
        let mut mac = HmacSha256::new_from_slice(self.secret_key.as_bytes())
            .expect("HMAC accepts keys of any length");
        mac.update(param_str.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    fn auth_headers(
        &self,
        builder: reqwest::RequestBuilder,
        timestamp: i64,
        signature: &str,
    ) -> reqwest::RequestBuilder {
        builder
            .header("X-BAPI-API-KEY", &self.api_key)
            .header("X-BAPI-SIGN", signature)
            .header("X-BAPI-SIGN-TYPE", "2")
            .header("X-BAPI-TIMESTAMP", timestamp.to_string())
            .header("X-BAPI-RECV-WINDOW", self.recv_window.to_string())
    }

    async fn get<T: serde::de::DeserializeOwned>(
        &self,
        endpoint: &str,
        params: &[(&str, String)],
        signed: bool,
    ) -> Result<T> {
        let query = params
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join("&");
        let url = if query.is_empty() {
            format!("{}{}", self.base_url, endpoint)
        } else {
            format!("{}{}?{}", self.base_url, endpoint, query)
        };

        let mut builder = self.client.get(&url);
        if signed {
            let timestamp = chrono::Utc::now().timestamp_millis();
            let signature = self.sign(timestamp, &query);
            builder = self.auth_headers(builder, timestamp, &signature);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| ArbitrageError::Connection(format!("HTTP request failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(ArbitrageError::Connection(format!(
                "HTTP request failed with status: {}",
                response.status()
            ))
            .into());
        }

        let envelope: ApiEnvelope<T> = response
            .json()
            .await
            .map_err(|e| ArbitrageError::DataParsing(format!("Failed to parse response: {}", e)))?;

        envelope.into_result()
    }

    async fn post<T: serde::de::DeserializeOwned>(
        &self,
        endpoint: &str,
        body: serde_json::Value,
    ) -> Result<T> {
        let url = format!("{}{}", self.base_url, endpoint);
        let payload = body.to_string();
        let timestamp = chrono::Utc::now().timestamp_millis();
        let signature = self.sign(timestamp, &payload);

        let builder = self
            .client
            .post(&url)
            .header("Content-Type", "application/json")
            .body(payload);

        let response = self
            .auth_headers(builder, timestamp, &signature)
            .send()
            .await
            .map_err(|e| ArbitrageError::Connection(format!("HTTP request failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(ArbitrageError::Connection(format!(
                "HTTP request failed with status: {}",
                response.status()
            ))
            .into());
        }

        let envelope: ApiEnvelope<T> = response
            .json()
            .await
            .map_err(|e| ArbitrageError::DataParsing(format!("Failed to parse response: {}", e)))?;

        envelope.into_result()
    }
}

#[async_trait]
impl ExchangeTransport for BybitTransport {
    async fn get_ticker(&self, market: Market, symbol: &str) -> Result<Ticker> {
        let result: TickerResult = self
            .get(
                "/v5/market/tickers",
                &[
                    ("category", market.to_string()),
                    ("symbol", symbol.to_string()),
                ],
                false,
            )
            .await?;

        let entry = result
            .list
            .into_iter()
            .next()
            .ok_or_else(|| ArbitrageError::DataParsing(format!("Empty ticker list for {}", symbol)))?;

        Ok(Ticker {
            symbol: entry.symbol,
            last_price: parse_f64(&entry.last_price, "lastPrice")?,
            funding_rate: entry.funding_rate.as_deref().and_then(|s| s.parse().ok()),
            next_funding_time: entry
                .next_funding_time
                .as_deref()
                .and_then(|s| s.parse().ok()),
        })
    }

    async fn get_instrument_rules(&self, market: Market, symbol: &str) -> Result<InstrumentRules> {
        let result: InstrumentResult = self
            .get(
                "/v5/market/instruments-info",
                &[
                    ("category", market.to_string()),
                    ("symbol", symbol.to_string()),
                ],
                false,
            )
            .await?;

        let info = result.list.into_iter().next().ok_or_else(|| {
            ArbitrageError::DataParsing(format!("No instrument info for {}", symbol))
        })?;

        match market {
            Market::Spot => spot_rules_from(&info),
            Market::Linear => linear_rules_from(&info),
        }
    }

    async fn place_order(&self, order: &OrderRequest) -> Result<OrderAck> {
        let mut body = serde_json::json!({
            "category": order.market.to_string(),
            "symbol": order.symbol,
            "side": order.side.to_string(),
            "orderType": "Market",
            "qty": order.qty.value().to_string(),
            "orderLinkId": format!("arb-{}", uuid::Uuid::new_v4()),
        });

        // Spot market buys are sized in quote units
        if order.market == Market::Spot {
            if let OrderQty::Quote(_) = order.qty {
                body["marketUnit"] = serde_json::json!("quoteCoin");
            }
        }

        debug!(symbol = %order.symbol, side = %order.side, market = %order.market, "Placing market order");

        let result: OrderResult = self.post("/v5/order/create", body).await?;
        Ok(OrderAck {
            order_id: result.order_id,
        })
    }

    async fn cancel_order(&self, symbol: &str, order_id: &str, market: Market) -> Result<()> {
        let body = serde_json::json!({
            "category": market.to_string(),
            "symbol": symbol,
            "orderId": order_id,
        });

        let _: OrderResult = self.post("/v5/order/cancel", body).await?;
        Ok(())
    }

    async fn set_leverage(&self, symbol: &str, leverage: u32, market: Market) -> Result<()> {
        let body = serde_json::json!({
            "category": market.to_string(),
            "symbol": symbol,
            "buyLeverage": leverage.to_string(),
            "sellLeverage": leverage.to_string(),
        });

        let _: serde_json::Value = self.post("/v5/position/set-leverage", body).await?;
        Ok(())
    }

    async fn get_positions(&self, market: Market) -> Result<Vec<FuturesPosition>> {
        let mut params = vec![("category", market.to_string())];
        if market == Market::Linear {
            params.push(("settleCoin", SETTLE_COIN.to_string()));
        }

        let result: PositionResult = self.get("/v5/position/list", &params, true).await?;

        let mut positions = Vec::new();
        for entry in result.list {
            let side = match entry.side.as_str() {
                "Buy" => OrderSide::Buy,
                "Sell" => OrderSide::Sell,
                other => {
                    // Flat entries report an empty side
                    debug!(symbol = %entry.symbol, side = other, "Skipping position without side");
                    continue;
                }
            };
            positions.push(FuturesPosition {
                symbol: entry.symbol,
                size: entry.size.parse().unwrap_or(0.0),
                side,
                avg_price: entry.avg_price.parse().unwrap_or(0.0),
                unrealized_pnl: entry.unrealized_pnl.parse().unwrap_or(0.0),
            });
        }
        Ok(positions)
    }

    async fn get_wallet_balances(&self) -> Result<Vec<WalletBalance>> {
        let result: WalletResult = self
            .get(
                "/v5/account/wallet-balance",
                &[("accountType", "UNIFIED".to_string())],
                true,
            )
            .await?;

        let mut balances = Vec::new();
        for account in result.list {
            for coin in account.coin {
                let balance = coin.wallet_balance.parse().unwrap_or(0.0);
                balances.push(WalletBalance {
                    asset: coin.coin,
                    balance,
                });
            }
        }
        Ok(balances)
    }
}

fn parse_f64(value: &str, field: &str) -> Result<f64> {
    value
        .parse()
        .map_err(|e| ArbitrageError::DataParsing(format!("Invalid {}: {}", field, e)).into())
}

/// Number of decimal places in a step string, e.g. "0.001" -> 3
fn decimals_in(step: &str) -> u32 {
    match step.split_once('.') {
        Some((_, frac)) => frac.len() as u32,
        None => 0,
    }
}

fn spot_rules_from(info: &InstrumentInfo) -> Result<InstrumentRules> {
    let lot = info
        .lot_size_filter
        .as_ref()
        .ok_or_else(|| ArbitrageError::DataParsing("Missing lotSizeFilter".to_string()))?;
    let base_precision = lot.base_precision.as_deref().unwrap_or("0.00001");
    let tick_size = info
        .price_filter
        .as_ref()
        .and_then(|f| f.tick_size.as_deref())
        .unwrap_or("0.01");

    Ok(InstrumentRules {
        min_order_qty: lot.min_order_qty.as_deref().unwrap_or("0").parse().unwrap_or(0.0),
        max_order_qty: lot.max_order_qty.as_deref().unwrap_or("0").parse().unwrap_or(0.0),
        qty_step: base_precision.parse().unwrap_or(0.00001),
        min_order_amt: lot.min_order_amt.as_deref().unwrap_or("0").parse().unwrap_or(0.0),
        max_order_amt: lot.max_order_amt.as_deref().unwrap_or("0").parse().unwrap_or(0.0),
        price_precision: decimals_in(tick_size),
        qty_precision: decimals_in(base_precision),
        max_leverage: None,
        status: info.status.clone().unwrap_or_else(|| "Unknown".to_string()),
    })
}

fn linear_rules_from(info: &InstrumentInfo) -> Result<InstrumentRules> {
    let lot = info
        .lot_size_filter
        .as_ref()
        .ok_or_else(|| ArbitrageError::DataParsing("Missing lotSizeFilter".to_string()))?;
    let qty_step = lot.qty_step.as_deref().unwrap_or("0.01");
    let tick_size = info
        .price_filter
        .as_ref()
        .and_then(|f| f.tick_size.as_deref())
        .unwrap_or("0.01");
    let max_order_qty: f64 = lot.max_order_qty.as_deref().unwrap_or("0").parse().unwrap_or(0.0);

    Ok(InstrumentRules {
        min_order_qty: lot.min_order_qty.as_deref().unwrap_or("0").parse().unwrap_or(0.0),
        max_order_qty,
        qty_step: qty_step.parse().unwrap_or(0.01),
        // Linear contracts report a minimum notional instead of a min amount
        min_order_amt: lot
            .min_notional_value
            .as_deref()
            .unwrap_or("0")
            .parse()
            .unwrap_or(0.0),
        // No notional cap is reported; estimate from the quantity cap
        max_order_amt: max_order_qty * 100_000.0,
        price_precision: decimals_in(tick_size),
        qty_precision: decimals_in(qty_step),
        max_leverage: info
            .leverage_filter
            .as_ref()
            .and_then(|f| f.max_leverage.as_deref())
            .and_then(|s| s.parse().ok()),
        status: info.status.clone().unwrap_or_else(|| "Unknown".to_string()),
    })
}

// Bybit v5 response envelope and payload types

#[derive(Debug, Deserialize)]
struct ApiEnvelope<T> {
    #[serde(rename = "retCode")]
    ret_code: i64,
    #[serde(rename = "retMsg")]
    ret_msg: String,
    result: Option<T>,
}

impl<T> ApiEnvelope<T> {
    fn into_result(self) -> Result<T> {
        if self.ret_code != 0 {
            warn!(code = self.ret_code, message = %self.ret_msg, "Exchange returned error");
            return Err(ArbitrageError::Exchange {
                code: self.ret_code,
                message: self.ret_msg,
            }
            .into());
        }
        self.result
            .ok_or_else(|| ArbitrageError::DataParsing("Missing result payload".to_string()).into())
    }
}

#[derive(Debug, Deserialize)]
struct TickerResult {
    list: Vec<TickerEntry>,
}

#[derive(Debug, Deserialize)]
struct TickerEntry {
    symbol: String,
    #[serde(rename = "lastPrice")]
    last_price: String,
    #[serde(rename = "fundingRate")]
    funding_rate: Option<String>,
    #[serde(rename = "nextFundingTime")]
    next_funding_time: Option<String>,
}

#[derive(Debug, Deserialize)]
struct InstrumentResult {
    list: Vec<InstrumentInfo>,
}

#[derive(Debug, Deserialize)]
struct InstrumentInfo {
    status: Option<String>,
    #[serde(rename = "lotSizeFilter")]
    lot_size_filter: Option<LotSizeFilter>,
    #[serde(rename = "priceFilter")]
    price_filter: Option<PriceFilter>,
    #[serde(rename = "leverageFilter")]
    leverage_filter: Option<LeverageFilter>,
}

#[derive(Debug, Deserialize)]
struct LotSizeFilter {
    #[serde(rename = "basePrecision")]
    base_precision: Option<String>,
    #[serde(rename = "qtyStep")]
    qty_step: Option<String>,
    #[serde(rename = "minOrderQty")]
    min_order_qty: Option<String>,
    #[serde(rename = "maxOrderQty")]
    max_order_qty: Option<String>,
    #[serde(rename = "minOrderAmt")]
    min_order_amt: Option<String>,
    #[serde(rename = "maxOrderAmt")]
    max_order_amt: Option<String>,
    #[serde(rename = "minNotionalValue")]
    min_notional_value: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PriceFilter {
    #[serde(rename = "tickSize")]
    tick_size: Option<String>,
}

#[derive(Debug, Deserialize)]
struct LeverageFilter {
    #[serde(rename = "maxLeverage")]
    max_leverage: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OrderResult {
    #[serde(rename = "orderId")]
    order_id: String,
}

#[derive(Debug, Deserialize)]
struct PositionResult {
    list: Vec<PositionEntry>,
}

#[derive(Debug, Deserialize)]
struct PositionEntry {
    symbol: String,
    size: String,
    side: String,
    #[serde(rename = "avgPrice")]
    avg_price: String,
    #[serde(rename = "unrealisedPnl")]
    unrealized_pnl: String,
}

#[derive(Debug, Deserialize)]
struct WalletResult {
    list: Vec<WalletAccount>,
}

#[derive(Debug, Deserialize)]
struct WalletAccount {
    coin: Vec<WalletCoin>,
}

#[derive(Debug, Deserialize)]
struct WalletCoin {
    coin: String,
    #[serde(rename = "walletBalance")]
    wallet_balance: String,
}
