//! Binance USDⓈ-M Futures REST API Client
//!
//! Provides REST API integration for:
//! - Symbol metadata (exchangeInfo filters)
//! - Reference prices and candle history
//! - Account position snapshots
//! - User-stream listen keys
//! - Conditional (algo) orders, leverage and position mode
//!
//! # Authentication
//!
//! Signed requests require:
//! - `X-MBX-APIKEY` header
//! - `signature` query parameter (HMAC SHA256 of query string)
//! - `timestamp` query parameter
//!
//! Listen-key requests only carry the API key header.

use std::time::Duration;

use reqwest::{Client, Method};
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;
use tokio::time::timeout;
use tracing::debug;

use hedgeline_domain::{timestamp_from_millis, ApiCredentials, Candle, Symbol};
use hedgeline_exec::{ConditionalOrderSpec, SymbolMetadata};

use crate::endpoints::BinanceEndpoints;
use crate::signing::{canonical_query, sign, timestamp_millis};

// =============================================================================
// Constants
// =============================================================================

/// Request timeout in seconds
const REQUEST_TIMEOUT_SECS: u64 = 10;

/// Binance code for "no need to change" (leverage / position mode already set)
pub const NO_CHANGE_CODE: i64 = -4059;

// =============================================================================
// Errors
// =============================================================================

/// Errors that can occur in the Binance REST client.
#[derive(Debug, Clone, Error)]
pub enum BinanceRestError {
    /// Failed to build request signature
    #[error("Failed to build signature: {0}")]
    SignatureError(String),

    /// HTTP request failed
    #[error("HTTP request failed: {0}")]
    RequestFailed(String),

    /// API returned error
    #[error("Binance API error: {code} - {msg}")]
    ApiError { code: i64, msg: String },

    /// Failed to parse response
    #[error("Failed to parse response: {0}")]
    ParseError(String),

    /// Request timed out
    #[error("Request timed out")]
    Timeout,

    /// Invalid parameter
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),
}

/// How a request is authenticated
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Auth {
    /// No credentials
    Public,
    /// API key header only
    Keyed,
    /// API key header + timestamp + signature
    Signed,
}

// =============================================================================
// Binance REST Client
// =============================================================================

/// Binance USDⓈ-M futures REST client.
pub struct BinanceRestClient {
    /// HTTP client
    client: Client,
    /// API key and secret
    credentials: ApiCredentials,
    /// Base URLs
    endpoints: BinanceEndpoints,
}

impl BinanceRestClient {
    /// Create a new REST client.
    pub fn new(credentials: ApiCredentials, endpoints: BinanceEndpoints) -> Self {
        Self { client: Client::new(), credentials, endpoints }
    }

    /// Base URLs in use
    pub fn endpoints(&self) -> &BinanceEndpoints {
        &self.endpoints
    }

    /// Build query string with signature for signed requests.
    fn build_signed_query(&self, mut params: Vec<(&str, String)>) -> Result<String, BinanceRestError> {
        params.push(("timestamp", timestamp_millis().to_string()));
        let query = canonical_query(&mut params);
        let signature =
            sign(self.credentials.secret_bytes(), &query).map_err(BinanceRestError::SignatureError)?;
        Ok(format!("{}&signature={}", query, signature))
    }

    /// Send a request and return the response body.
    async fn send(
        &self,
        method: Method,
        base: &str,
        endpoint: &str,
        params: Vec<(&str, String)>,
        auth: Auth,
    ) -> Result<String, BinanceRestError> {
        let query = match auth {
            Auth::Signed => self.build_signed_query(params)?,
            Auth::Public | Auth::Keyed => {
                let mut params = params;
                canonical_query(&mut params)
            }
        };
        let url = if query.is_empty() {
            format!("{}{}", base, endpoint)
        } else {
            format!("{}{}?{}", base, endpoint, query)
        };

        let mut request = self.client.request(method.clone(), &url);
        if auth != Auth::Public {
            request = request.header("X-MBX-APIKEY", &self.credentials.api_key);
        }

        debug!(%method, endpoint, "Binance REST request");

        let response = timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS), request.send())
            .await
            .map_err(|_| BinanceRestError::Timeout)?
            .map_err(|e| BinanceRestError::RequestFailed(e.to_string()))?;

        let status = response.status();
        let body = response.text().await.map_err(|e| BinanceRestError::ParseError(e.to_string()))?;

        if !status.is_success() {
            // Try to parse Binance error response
            if let Ok(err) = serde_json::from_str::<BinanceErrorResponse>(&body) {
                return Err(BinanceRestError::ApiError { code: err.code, msg: err.msg });
            }
            return Err(BinanceRestError::RequestFailed(format!("HTTP {}: {}", status, body)));
        }

        Ok(body)
    }

    // =========================================================================
    // Market Data API
    // =========================================================================

    /// Fetch trading rules for every listed symbol.
    ///
    /// # Endpoint
    ///
    /// `GET /fapi/v1/exchangeInfo` (on the metadata base URL)
    pub async fn exchange_info(&self) -> Result<ExchangeInfo, BinanceRestError> {
        let body = self
            .send(Method::GET, &self.endpoints.metadata_rest, "/fapi/v1/exchangeInfo", vec![], Auth::Public)
            .await?;

        parse_json(&body)
    }

    /// 24h ticker statistics for one symbol.
    ///
    /// # Endpoint
    ///
    /// `GET /fapi/v1/ticker/24hr`
    pub async fn ticker_24hr(&self, symbol: &Symbol) -> Result<Ticker24hr, BinanceRestError> {
        let params = vec![("symbol", symbol.as_pair().to_string())];
        let body = self.send(Method::GET, &self.endpoints.rest, "/fapi/v1/ticker/24hr", params, Auth::Public).await?;

        parse_json(&body)
    }

    /// Recent klines, oldest first.
    ///
    /// # Endpoint
    ///
    /// `GET /fapi/v1/klines`
    pub async fn klines(&self, symbol: &Symbol, interval: &str, limit: u16) -> Result<Vec<Candle>, BinanceRestError> {
        if !(1..=1500).contains(&limit) {
            return Err(BinanceRestError::InvalidParameter(format!(
                "kline limit must be within 1..=1500, got {}",
                limit
            )));
        }
        let params = vec![
            ("symbol", symbol.as_pair().to_string()),
            ("interval", interval.to_string()),
            ("limit", limit.to_string()),
        ];
        let body = self.send(Method::GET, &self.endpoints.rest, "/fapi/v1/klines", params, Auth::Public).await?;

        let rows: Vec<Vec<Value>> = parse_json(&body)?;
        rows.iter().map(|row| parse_kline_row(symbol, row)).collect()
    }

    // =========================================================================
    // Account API
    // =========================================================================

    /// Position snapshot for every symbol (including flat ones).
    ///
    /// # Endpoint
    ///
    /// `GET /fapi/v2/positionRisk`
    pub async fn position_risk(&self) -> Result<Vec<PositionRiskEntry>, BinanceRestError> {
        let body = self.send(Method::GET, &self.endpoints.rest, "/fapi/v2/positionRisk", vec![], Auth::Signed).await?;

        parse_json(&body)
    }

    /// Set initial leverage for a symbol.
    ///
    /// # Endpoint
    ///
    /// `POST /fapi/v1/leverage`
    pub async fn set_leverage(&self, symbol: &Symbol, leverage: u8) -> Result<(), BinanceRestError> {
        let params = vec![("symbol", symbol.as_pair().to_string()), ("leverage", leverage.to_string())];
        self.send(Method::POST, &self.endpoints.rest, "/fapi/v1/leverage", params, Auth::Signed)
            .await
            .map(|_| ())
    }

    /// Switch between hedge mode (`true`) and one-way mode.
    ///
    /// # Endpoint
    ///
    /// `POST /fapi/v1/positionSide/dual`
    pub async fn set_dual_position(&self, enabled: bool) -> Result<(), BinanceRestError> {
        let params = vec![("dualSidePosition", enabled.to_string())];
        self.send(Method::POST, &self.endpoints.rest, "/fapi/v1/positionSide/dual", params, Auth::Signed)
            .await
            .map(|_| ())
    }

    // =========================================================================
    // User Stream API
    // =========================================================================

    /// Create (or return the existing) listen key.
    ///
    /// # Endpoint
    ///
    /// `POST /fapi/v1/listenKey`
    pub async fn create_listen_key(&self) -> Result<String, BinanceRestError> {
        let body = self.send(Method::POST, &self.endpoints.rest, "/fapi/v1/listenKey", vec![], Auth::Keyed).await?;

        let response: ListenKeyResponse = parse_json(&body)?;
        Ok(response.listen_key)
    }

    /// Extend the listen key's validity by 60 minutes.
    ///
    /// # Endpoint
    ///
    /// `PUT /fapi/v1/listenKey`
    pub async fn keepalive_listen_key(&self, listen_key: &str) -> Result<(), BinanceRestError> {
        let params = vec![("listenKey", listen_key.to_string())];
        self.send(Method::PUT, &self.endpoints.rest, "/fapi/v1/listenKey", params, Auth::Keyed)
            .await
            .map(|_| ())
    }

    /// Invalidate the listen key.
    ///
    /// # Endpoint
    ///
    /// `DELETE /fapi/v1/listenKey`
    pub async fn close_listen_key(&self, listen_key: &str) -> Result<(), BinanceRestError> {
        let params = vec![("listenKey", listen_key.to_string())];
        self.send(Method::DELETE, &self.endpoints.rest, "/fapi/v1/listenKey", params, Auth::Keyed)
            .await
            .map(|_| ())
    }

    // =========================================================================
    // Algo Order API
    // =========================================================================

    /// Place a conditional order triggering on the mark price.
    ///
    /// # Endpoint
    ///
    /// `POST /fapi/v1/algoOrder`
    pub async fn place_algo_order(&self, spec: &ConditionalOrderSpec) -> Result<AlgoOrderResponse, BinanceRestError> {
        let params = vec![
            ("algoType", "CONDITIONAL".to_string()),
            ("symbol", spec.symbol.as_pair().to_string()),
            ("side", spec.side.as_str().to_string()),
            ("positionSide", spec.position_side.as_wire().to_string()),
            ("type", spec.kind.as_wire().to_string()),
            ("quantity", spec.quantity.clone()),
            ("triggerPrice", spec.trigger_price.clone()),
            ("workingType", "MARK_PRICE".to_string()),
            ("clientAlgoId", spec.client_order_id.clone()),
        ];
        let body = self.send(Method::POST, &self.endpoints.rest, "/fapi/v1/algoOrder", params, Auth::Signed).await?;

        parse_json(&body)
    }

    /// Cancel a conditional order.
    ///
    /// # Endpoint
    ///
    /// `DELETE /fapi/v1/algoOrder`
    pub async fn cancel_algo_order(&self, symbol: &Symbol, algo_id: u64) -> Result<(), BinanceRestError> {
        let params = vec![("symbol", symbol.as_pair().to_string()), ("algoId", algo_id.to_string())];
        self.send(Method::DELETE, &self.endpoints.rest, "/fapi/v1/algoOrder", params, Auth::Signed)
            .await
            .map(|_| ())
    }
}

fn parse_json<T: serde::de::DeserializeOwned>(body: &str) -> Result<T, BinanceRestError> {
    serde_json::from_str(body).map_err(|e| BinanceRestError::ParseError(e.to_string()))
}

/// Parse one kline row: `[openTime, open, high, low, close, volume, closeTime, quoteVolume, ...]`.
fn parse_kline_row(symbol: &Symbol, row: &[Value]) -> Result<Candle, BinanceRestError> {
    let millis = |index: usize| {
        row.get(index)
            .and_then(Value::as_i64)
            .ok_or_else(|| BinanceRestError::ParseError(format!("kline field {} is not a timestamp", index)))
    };
    let decimal = |index: usize| {
        row.get(index)
            .and_then(Value::as_str)
            .and_then(|s| s.parse::<Decimal>().ok())
            .ok_or_else(|| BinanceRestError::ParseError(format!("kline field {} is not a decimal", index)))
    };

    Ok(Candle {
        symbol: symbol.clone(),
        open_time: timestamp_from_millis(millis(0)?),
        open: decimal(1)?,
        high: decimal(2)?,
        low: decimal(3)?,
        close: decimal(4)?,
        volume: decimal(5)?,
        close_time: timestamp_from_millis(millis(6)?),
        quote_volume: decimal(7)?,
    })
}

// =============================================================================
// Binance Types (from API responses)
// =============================================================================

/// Binance error response.
#[derive(Debug, Deserialize)]
struct BinanceErrorResponse {
    code: i64,
    msg: String,
}

/// Exchange information (only the parts the client uses).
#[derive(Debug, Clone, Deserialize)]
pub struct ExchangeInfo {
    /// Listed symbols
    pub symbols: Vec<ExchangeSymbol>,
}

impl ExchangeInfo {
    /// Metadata for every symbol that carries both a lot-size and a price filter.
    pub fn symbol_metadata(&self) -> Vec<SymbolMetadata> {
        self.symbols.iter().filter_map(ExchangeSymbol::metadata).collect()
    }
}

/// One listed symbol.
#[derive(Debug, Clone, Deserialize)]
pub struct ExchangeSymbol {
    /// Symbol name
    pub symbol: String,
    /// Trading status (TRADING, SETTLING, ...)
    #[serde(default)]
    pub status: String,
    /// Symbol filters
    #[serde(default)]
    pub filters: Vec<SymbolFilter>,
}

impl ExchangeSymbol {
    fn metadata(&self) -> Option<SymbolMetadata> {
        let lot = self.filters.iter().find_map(|f| match f {
            SymbolFilter::LotSize { min_qty, step_size } => Some((min_qty, step_size)),
            _ => None,
        });
        let tick = self.filters.iter().find_map(|f| match f {
            SymbolFilter::PriceFilter { tick_size } => Some(tick_size),
            _ => None,
        });

        match (lot, tick) {
            (Some((min_qty, step_size)), Some(tick_size)) => Some(SymbolMetadata {
                symbol: self.symbol.clone(),
                quantity_step: step_size.clone(),
                min_quantity: min_qty.clone(),
                price_step: tick_size.clone(),
            }),
            _ => {
                debug!(symbol = %self.symbol, "Symbol lacks LOT_SIZE or PRICE_FILTER, skipped");
                None
            }
        }
    }
}

/// Symbol filter (only the kinds the client uses are decoded).
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "filterType")]
pub enum SymbolFilter {
    /// Quantity constraints for limit orders
    #[serde(rename = "LOT_SIZE")]
    LotSize {
        /// Minimum quantity
        #[serde(rename = "minQty")]
        min_qty: String,
        /// Quantity step
        #[serde(rename = "stepSize")]
        step_size: String,
    },
    /// Price constraints
    #[serde(rename = "PRICE_FILTER")]
    PriceFilter {
        /// Price tick
        #[serde(rename = "tickSize")]
        tick_size: String,
    },
    /// Any other filter
    #[serde(other)]
    Other,
}

/// 24h ticker response (subset).
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Ticker24hr {
    /// Symbol
    pub symbol: String,
    /// Last traded price
    pub last_price: Decimal,
}

/// Position risk entry.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PositionRiskEntry {
    /// Symbol
    pub symbol: String,
    /// Signed position amount
    pub position_amt: String,
    /// Average entry price
    pub entry_price: String,
    /// Mark price
    pub mark_price: String,
    /// Unrealized PnL
    pub un_realized_profit: String,
    /// Leverage
    pub leverage: String,
    /// LONG, SHORT or BOTH
    pub position_side: String,
}

/// Listen key response.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListenKeyResponse {
    listen_key: String,
}

/// Algo order response (subset).
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlgoOrderResponse {
    /// Exchange-assigned algo id
    pub algo_id: u64,
    /// Client algo id echoed back
    #[serde(default)]
    pub client_algo_id: String,
    /// Algo order status
    #[serde(default)]
    pub algo_status: Option<String>,
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::endpoints::BinanceNetwork;
    use rust_decimal_macros::dec;

    fn client() -> BinanceRestClient {
        BinanceRestClient::new(
            ApiCredentials::new("test_key", "test_secret"),
            BinanceEndpoints::for_network(BinanceNetwork::Testnet),
        )
    }

    #[test]
    fn test_build_signed_query() {
        let query = client().build_signed_query(vec![("symbol", "BTCUSDT".to_string())]).unwrap();

        // Query should contain timestamp and signature
        assert!(query.contains("timestamp="));
        assert!(query.contains("symbol=BTCUSDT"));
        let signature = query.rsplit("signature=").next().unwrap();
        assert_eq!(signature.len(), 64);
    }

    #[test]
    fn test_build_signed_query_sorts_params() {
        let params = vec![("symbol", "BTCUSDT".to_string()), ("side", "SELL".to_string())];
        let query = client().build_signed_query(params).unwrap();

        // Params should be sorted (side comes before symbol)
        let side_idx = query.find("side=").unwrap();
        let symbol_idx = query.find("symbol=").unwrap();
        assert!(side_idx < symbol_idx);
    }

    #[test]
    fn test_exchange_info_extracts_filters() {
        let json = r#"{
            "timezone": "UTC",
            "symbols": [
                {
                    "symbol": "BTCUSDT",
                    "status": "TRADING",
                    "filters": [
                        {"filterType": "PRICE_FILTER", "minPrice": "261.10", "maxPrice": "809484", "tickSize": "0.10"},
                        {"filterType": "LOT_SIZE", "maxQty": "1000", "minQty": "0.001", "stepSize": "0.001"},
                        {"filterType": "MARKET_LOT_SIZE", "maxQty": "120", "minQty": "0.001", "stepSize": "0.001"},
                        {"filterType": "MIN_NOTIONAL", "notional": "100"}
                    ]
                },
                {
                    "symbol": "ODDUSDT",
                    "status": "TRADING",
                    "filters": [{"filterType": "PERCENT_PRICE", "multiplierUp": "1.05"}]
                }
            ]
        }"#;

        let info: ExchangeInfo = serde_json::from_str(json).unwrap();
        let metadata = info.symbol_metadata();

        assert_eq!(metadata.len(), 1);
        assert_eq!(metadata[0].symbol, "BTCUSDT");
        assert_eq!(metadata[0].quantity_step, "0.001");
        assert_eq!(metadata[0].min_quantity, "0.001");
        assert_eq!(metadata[0].price_step, "0.10");
    }

    #[test]
    fn test_position_risk_deserialize() {
        let json = r#"[{
            "entryPrice": "60000.0",
            "breakEvenPrice": "0.0",
            "marginType": "cross",
            "isAutoAddMargin": "false",
            "isolatedMargin": "0.00000000",
            "leverage": "20",
            "liquidationPrice": "0",
            "markPrice": "60123.40000000",
            "maxNotionalValue": "250000",
            "positionAmt": "-0.015",
            "notional": "-901.85",
            "isolatedWallet": "0",
            "symbol": "BTCUSDT",
            "unRealizedProfit": "-1.85100000",
            "positionSide": "SHORT",
            "updateTime": 1700000000000
        }]"#;

        let entries: Vec<PositionRiskEntry> = serde_json::from_str(json).unwrap();

        assert_eq!(entries[0].position_amt, "-0.015");
        assert_eq!(entries[0].un_realized_profit, "-1.85100000");
        assert_eq!(entries[0].position_side, "SHORT");
    }

    #[test]
    fn test_ticker_deserialize() {
        let json = r#"{"symbol":"BTCUSDT","priceChange":"-94.99","lastPrice":"60012.30","lastQty":"0.010","openTime":1700000000000}"#;

        let ticker: Ticker24hr = serde_json::from_str(json).unwrap();

        assert_eq!(ticker.last_price, dec!(60012.30));
    }

    #[test]
    fn test_parse_kline_row() {
        let json = r#"[1700000000000,"60000.0","60250.0","59900.0","60100.0","12.500",1700000059999,"751250.00",1024,"6.1","366000.0","0"]"#;
        let row: Vec<Value> = serde_json::from_str(json).unwrap();

        let candle = parse_kline_row(&Symbol::from_pair("BTCUSDT").unwrap(), &row).unwrap();

        assert_eq!(candle.open, dec!(60000.0));
        assert_eq!(candle.close, dec!(60100.0));
        assert_eq!(candle.quote_volume, dec!(751250.00));
        assert_eq!(candle.close_time.timestamp_millis(), 1_700_000_059_999);
    }

    #[test]
    fn test_parse_kline_row_rejects_short_rows() {
        let row: Vec<Value> = serde_json::from_str(r#"[1700000000000,"60000.0"]"#).unwrap();

        assert!(parse_kline_row(&Symbol::from_pair("BTCUSDT").unwrap(), &row).is_err());
    }

    #[test]
    fn test_algo_order_response_deserialize() {
        let json = r#"{"algoId":2146760,"clientAlgoId":"sl_0192","algoType":"CONDITIONAL","orderType":"STOP_MARKET","symbol":"BTCUSDT","algoStatus":"NEW"}"#;

        let response: AlgoOrderResponse = serde_json::from_str(json).unwrap();

        assert_eq!(response.algo_id, 2146760);
        assert_eq!(response.client_algo_id, "sl_0192");
    }
}
