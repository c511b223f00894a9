//! Binance implementation of the exchange port.
//!
//! Wraps the REST client, the combined stream and the WebSocket API order
//! channel behind [`ExchangeService`], and classifies Binance failures into
//! the execution layer's error kinds.

use std::sync::Arc;

use async_trait::async_trait;
use rust_decimal::Decimal;
use tracing::{info, warn};

use hedgeline_domain::{ApiCredentials, Candle, Leverage, OrderAck, OrderStatus, Symbol};
use hedgeline_exec::{
    ConditionalOrderSpec, ConditionalRef, ExchangeService, ExecError, ExecResult, OrderChannel, RawPosition,
    SessionToken, StreamChannel, SymbolMetadata,
};

use crate::binance_rest::{BinanceRestClient, BinanceRestError, PositionRiskEntry, NO_CHANGE_CODE};
use crate::binance_ws::{BinanceStream, BinanceWsError};
use crate::binance_ws_api::BinanceOrderSocket;
use crate::endpoints::{BinanceEndpoints, BinanceNetwork};

/// Error codes meaning the key, signature or source IP was refused
const AUTH_ERROR_CODES: [i64; 4] = [-2014, -2015, -1022, -2008];

/// Requested leverage is above what the account's bracket allows
const LEVERAGE_UNAVAILABLE_CODE: i64 = -4141;

// =============================================================================
// Error Classification
// =============================================================================

pub(crate) fn rest_error_to_exec(error: BinanceRestError) -> ExecError {
    match error {
        BinanceRestError::ApiError { code, msg } if AUTH_ERROR_CODES.contains(&code) => {
            ExecError::Auth(format!("{} ({})", msg, code))
        },
        BinanceRestError::ApiError { code, msg } => ExecError::Rejected { code, msg },
        BinanceRestError::RequestFailed(msg) => ExecError::Transport(msg),
        BinanceRestError::Timeout => ExecError::Transport("request timed out".to_string()),
        BinanceRestError::ParseError(msg) => ExecError::Protocol(msg),
        BinanceRestError::SignatureError(msg) => ExecError::Auth(msg),
        BinanceRestError::InvalidParameter(msg) => ExecError::InvalidParameter(msg),
    }
}

pub(crate) fn ws_error_to_exec(error: BinanceWsError) -> ExecError {
    match error {
        BinanceWsError::ApiError { code, msg } if AUTH_ERROR_CODES.contains(&code) => {
            ExecError::Auth(format!("{} ({})", msg, code))
        },
        BinanceWsError::ApiError { code, msg } => ExecError::Rejected { code, msg },
        BinanceWsError::ConnectionFailed(msg) | BinanceWsError::SendFailed(msg) => ExecError::Transport(msg),
        BinanceWsError::ChannelClosed => ExecError::Transport("order channel closed".to_string()),
        BinanceWsError::Timeout => ExecError::Transport("no response within timeout".to_string()),
        BinanceWsError::InvalidMessage(msg) => ExecError::Protocol(msg),
        BinanceWsError::SignatureError(msg) => ExecError::Auth(msg),
    }
}

/// Listen-key failures are their own kind so the supervisor can report them.
fn token_error(error: BinanceRestError) -> ExecError {
    match rest_error_to_exec(error) {
        ExecError::Auth(msg) => ExecError::Auth(msg),
        other => ExecError::SessionTokenFetchFailed(other.to_string()),
    }
}

/// Treat "no need to change" as success.
fn accept_no_change(result: Result<(), BinanceRestError>) -> Result<(), BinanceRestError> {
    match result {
        Err(BinanceRestError::ApiError { code, .. }) if code == NO_CHANGE_CODE => Ok(()),
        other => other,
    }
}

/// An unavailable leverage leaves the current one in place; warn and go on.
fn tolerate_unavailable_leverage(
    result: Result<(), BinanceRestError>,
    symbol: &Symbol,
    leverage: Leverage,
) -> Result<(), BinanceRestError> {
    match result {
        Err(BinanceRestError::ApiError { code, msg }) if code == LEVERAGE_UNAVAILABLE_CODE => {
            warn!(
                %symbol,
                leverage = leverage.value(),
                code,
                %msg,
                "Leverage unavailable for this bracket, keeping current"
            );
            Ok(())
        },
        other => other,
    }
}

fn position_from_risk(entry: PositionRiskEntry) -> RawPosition {
    RawPosition {
        symbol: entry.symbol,
        position_amt: entry.position_amt,
        entry_price: entry.entry_price,
        mark_price: entry.mark_price,
        unrealized_pnl: entry.un_realized_profit,
        leverage: entry.leverage,
        position_side: entry.position_side,
    }
}

// =============================================================================
// Binance Exchange
// =============================================================================

/// Binance USDⓈ-M futures exchange adapter.
pub struct BinanceExchange {
    rest: BinanceRestClient,
    credentials: ApiCredentials,
    network: BinanceNetwork,
}

impl BinanceExchange {
    /// Create an adapter for `network` with its default endpoints.
    pub fn new(credentials: ApiCredentials, network: BinanceNetwork) -> Self {
        Self::with_endpoints(credentials, network, BinanceEndpoints::for_network(network))
    }

    /// Create an adapter with explicit endpoints.
    pub fn with_endpoints(credentials: ApiCredentials, network: BinanceNetwork, endpoints: BinanceEndpoints) -> Self {
        Self { rest: BinanceRestClient::new(credentials.clone(), endpoints), credentials, network }
    }

    /// Network this adapter talks to
    pub fn network(&self) -> BinanceNetwork {
        self.network
    }
}

#[async_trait]
impl ExchangeService for BinanceExchange {
    async fn fetch_symbol_metadata(&self) -> ExecResult<Vec<SymbolMetadata>> {
        let info = self.rest.exchange_info().await.map_err(rest_error_to_exec)?;
        Ok(info.symbol_metadata())
    }

    async fn fetch_reference_price(&self, symbol: &Symbol) -> ExecResult<Decimal> {
        let ticker = self.rest.ticker_24hr(symbol).await.map_err(rest_error_to_exec)?;
        Ok(ticker.last_price)
    }

    async fn fetch_account_positions(&self) -> ExecResult<Vec<RawPosition>> {
        let entries = self.rest.position_risk().await.map_err(rest_error_to_exec)?;
        Ok(entries.into_iter().map(position_from_risk).collect())
    }

    async fn open_session_token(&self) -> ExecResult<SessionToken> {
        let listen_key = self.rest.create_listen_key().await.map_err(token_error)?;
        Ok(SessionToken::new(listen_key))
    }

    async fn keepalive_session_token(&self, token: &SessionToken) -> ExecResult<()> {
        self.rest.keepalive_listen_key(token.as_str()).await.map_err(token_error)
    }

    async fn close_session_token(&self, token: &SessionToken) -> ExecResult<()> {
        self.rest.close_listen_key(token.as_str()).await.map_err(token_error)
    }

    async fn open_market_and_user_stream(
        &self,
        symbol: &Symbol,
        interval: &str,
        token: &SessionToken,
    ) -> ExecResult<Box<dyn StreamChannel>> {
        let kline_stream = format!("{}@kline_{}", symbol.stream_name(), interval);
        let url = self.rest.endpoints().combined_stream_url(&kline_stream, token.as_str());

        let stream = BinanceStream::connect(&url).await.map_err(ws_error_to_exec)?;
        Ok(Box::new(stream))
    }

    async fn open_order_channel(&self) -> ExecResult<Arc<dyn OrderChannel>> {
        let socket = BinanceOrderSocket::connect(&self.rest.endpoints().ws_api, self.credentials.clone())
            .await
            .map_err(ws_error_to_exec)?;
        Ok(Arc::new(socket))
    }

    async fn submit_conditional_order(&self, spec: &ConditionalOrderSpec) -> ExecResult<OrderAck> {
        let response = self.rest.place_algo_order(spec).await.map_err(rest_error_to_exec)?;

        info!(
            symbol = %spec.symbol,
            kind = spec.kind.as_wire(),
            algo_id = response.algo_id,
            trigger_price = %spec.trigger_price,
            "Conditional order placed"
        );

        let client_order_id = if response.client_algo_id.is_empty() {
            spec.client_order_id.clone()
        } else {
            response.client_algo_id
        };

        Ok(OrderAck {
            symbol: spec.symbol.clone(),
            order_id: response.algo_id,
            client_order_id,
            status: OrderStatus::New,
        })
    }

    async fn cancel_conditional_order(&self, order: &ConditionalRef) -> ExecResult<()> {
        self.rest.cancel_algo_order(&order.symbol, order.algo_id).await.map_err(rest_error_to_exec)
    }

    async fn set_leverage(&self, symbol: &Symbol, leverage: Leverage) -> ExecResult<()> {
        let result = accept_no_change(self.rest.set_leverage(symbol, leverage.value()).await);
        tolerate_unavailable_leverage(result, symbol, leverage).map_err(rest_error_to_exec)
    }

    async fn set_dual_position_mode(&self, enabled: bool) -> ExecResult<()> {
        match accept_no_change(self.rest.set_dual_position(enabled).await) {
            Ok(()) => Ok(()),
            // Testnet accounts often refuse to leave hedge mode; keep going
            Err(e) if !enabled && self.network == BinanceNetwork::Testnet => {
                warn!(error = %e, "Could not disable hedge mode on testnet, continuing");
                Ok(())
            },
            Err(e) => Err(rest_error_to_exec(e)),
        }
    }

    async fn fetch_candles(&self, symbol: &Symbol, interval: &str, limit: u16) -> ExecResult<Vec<Candle>> {
        self.rest.klines(symbol, interval, limit).await.map_err(rest_error_to_exec)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auth_codes_classified_as_auth() {
        for code in AUTH_ERROR_CODES {
            let error = rest_error_to_exec(BinanceRestError::ApiError { code, msg: "refused".to_string() });
            assert!(matches!(error, ExecError::Auth(_)), "code {} should be Auth", code);
        }
    }

    #[test]
    fn test_other_api_codes_are_rejections() {
        let error = rest_error_to_exec(BinanceRestError::ApiError {
            code: -2019,
            msg: "Margin is insufficient.".to_string(),
        });

        match error {
            ExecError::Rejected { code, .. } => assert_eq!(code, -2019),
            other => panic!("Expected Rejected, got {:?}", other),
        }
    }

    #[test]
    fn test_transport_failures_are_retryable() {
        assert!(rest_error_to_exec(BinanceRestError::Timeout).is_retryable());
        assert!(rest_error_to_exec(BinanceRestError::RequestFailed("reset".to_string())).is_retryable());
        assert!(ws_error_to_exec(BinanceWsError::ChannelClosed).is_retryable());
        assert!(!ws_error_to_exec(BinanceWsError::InvalidMessage("x".to_string())).is_retryable());
    }

    #[test]
    fn test_listen_key_failure_kind() {
        let error = token_error(BinanceRestError::RequestFailed("503".to_string()));
        assert!(matches!(error, ExecError::SessionTokenFetchFailed(_)));

        let error = token_error(BinanceRestError::ApiError { code: -2015, msg: "Invalid API-key".to_string() });
        assert!(matches!(error, ExecError::Auth(_)));
    }

    #[test]
    fn test_no_change_is_success() {
        let result = accept_no_change(Err(BinanceRestError::ApiError {
            code: NO_CHANGE_CODE,
            msg: "No need to change position side.".to_string(),
        }));
        assert!(result.is_ok());

        let result = accept_no_change(Err(BinanceRestError::ApiError { code: -4028, msg: "bad".to_string() }));
        assert!(result.is_err());
    }

    #[test]
    fn test_unavailable_leverage_is_tolerated() {
        let symbol = Symbol::from_pair("BTCUSDT").unwrap();
        let leverage = Leverage::new(125).unwrap();

        let result = tolerate_unavailable_leverage(
            Err(BinanceRestError::ApiError {
                code: LEVERAGE_UNAVAILABLE_CODE,
                msg: "Leverage 125 is not valid".to_string(),
            }),
            &symbol,
            leverage,
        );
        assert!(result.is_ok());

        let result = tolerate_unavailable_leverage(
            Err(BinanceRestError::ApiError { code: -1121, msg: "Invalid symbol.".to_string() }),
            &symbol,
            leverage,
        );
        assert!(matches!(result, Err(BinanceRestError::ApiError { code: -1121, .. })));
    }

    #[test]
    fn test_position_risk_mapping() {
        let json = r#"{
            "symbol": "BTCUSDT",
            "positionAmt": "-0.015",
            "entryPrice": "61000.0",
            "markPrice": "60500.5",
            "unRealizedProfit": "7.49",
            "liquidationPrice": "70000",
            "leverage": "20",
            "marginType": "cross",
            "positionSide": "SHORT"
        }"#;
        let entry: PositionRiskEntry = serde_json::from_str(json).unwrap();
        let raw = position_from_risk(entry);

        assert_eq!(raw.position_amt, "-0.015");
        assert_eq!(raw.unrealized_pnl, "7.49");
        assert_eq!(raw.position_side, "SHORT");

        let positions = hedgeline_exec::parse_positions(&[raw]).unwrap();
        assert_eq!(positions.len(), 1);
    }
}
