//! Execution layer port definitions.
//!
//! Ports define the interfaces for the exchange: REST-style account and
//! metadata calls, the combined market/user stream and the order channel.
//! Adapters implement these ports for specific services (Binance, stub, etc.).
//!
//! Quantities and prices cross this boundary as exact decimal strings so no
//! adapter ever reformats a value the engine already rounded.

use std::fmt;

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use hedgeline_domain::{
    Candle, Leverage, OrderAck, OrderRef, OrderSide, OrderStatus, PositionSide, Symbol,
};

use crate::error::ExecResult;

// =============================================================================
// Wire Records
// =============================================================================

/// Trading constraints for one symbol, as published by the metadata endpoint.
///
/// Values are kept as the exchange's strings; parsing happens in the rule cache.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SymbolMetadata {
    /// Symbol name (e.g., BTCUSDT)
    pub symbol: String,
    /// Quantity increment
    pub quantity_step: String,
    /// Minimum order quantity
    pub min_quantity: String,
    /// Price tick
    pub price_step: String,
}

/// One position record from the account snapshot, unparsed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawPosition {
    /// Symbol
    pub symbol: String,
    /// Signed amount
    pub position_amt: String,
    /// Average entry price
    pub entry_price: String,
    /// Mark price
    pub mark_price: String,
    /// Unrealized PnL
    pub unrealized_pnl: String,
    /// Leverage multiplier
    pub leverage: String,
    /// LONG, SHORT or BOTH
    pub position_side: String,
}

/// Opaque user-stream session token (Binance listen key).
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionToken(String);

impl SessionToken {
    /// Wrap a token issued by the exchange
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// Raw token value
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for SessionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let hint = self.0.get(..6).unwrap_or("");
        write!(f, "SessionToken({}***)", hint)
    }
}

/// Execution style of a regular order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderKind {
    /// Fill at market
    Market,
    /// Rest on the book at `price` (good till cancelled)
    Limit {
        /// Exact price text
        price: String,
    },
}

/// A regular order ready for submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderSpec {
    /// Symbol
    pub symbol: Symbol,
    /// Direction
    pub side: OrderSide,
    /// Position side the order applies to
    pub position_side: PositionSide,
    /// Exact quantity text
    pub quantity: String,
    /// Market or limit
    pub kind: OrderKind,
    /// Only reduce an existing position (one-way mode closes)
    pub reduce_only: bool,
    /// Caller-assigned id
    pub client_order_id: String,
}

/// Replacement price/quantity for a resting limit order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModifySpec {
    /// Order to modify
    pub order: OrderRef,
    /// Side of the existing order
    pub side: OrderSide,
    /// New exact quantity text
    pub quantity: String,
    /// New exact price text
    pub price: String,
}

/// Status of an existing order as reported by the order channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderStatusReport {
    /// Symbol
    pub symbol: Symbol,
    /// Exchange order id
    pub order_id: u64,
    /// Client order id
    pub client_order_id: String,
    /// Direction
    pub side: OrderSide,
    /// Position side
    pub position_side: PositionSide,
    /// Current status
    pub status: OrderStatus,
    /// Limit price (zero for market orders)
    pub price: Decimal,
    /// Original quantity
    pub orig_quantity: Decimal,
    /// Filled quantity
    pub executed_quantity: Decimal,
}

/// Conditional (trigger) order type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConditionalKind {
    /// Market exit when the mark price crosses against the position
    StopMarket,
    /// Market exit when the mark price crosses in favor of the position
    TakeProfitMarket,
}

impl ConditionalKind {
    /// Exchange order type string
    pub fn as_wire(&self) -> &'static str {
        match self {
            ConditionalKind::StopMarket => "STOP_MARKET",
            ConditionalKind::TakeProfitMarket => "TAKE_PROFIT_MARKET",
        }
    }
}

/// A conditional order ready for submission.
///
/// Triggers on the mark price.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConditionalOrderSpec {
    /// Symbol
    pub symbol: Symbol,
    /// Direction (opposite of the entry)
    pub side: OrderSide,
    /// Position side of the protected position
    pub position_side: PositionSide,
    /// Stop or take-profit
    pub kind: ConditionalKind,
    /// Exact trigger price text
    pub trigger_price: String,
    /// Exact quantity text
    pub quantity: String,
    /// Caller-assigned id
    pub client_order_id: String,
}

/// Reference to a conditional order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConditionalRef {
    /// Symbol
    pub symbol: Symbol,
    /// Exchange-assigned conditional order id
    pub algo_id: u64,
}

// =============================================================================
// Channels
// =============================================================================

/// Combined market-data and user-event stream.
///
/// Yields raw text frames; routing happens in the session layer.
#[async_trait]
pub trait StreamChannel: Send {
    /// Next text frame, or `None` once the stream has ended (closed, timed out,
    /// or failed).
    async fn next_message(&mut self) -> Option<String>;

    /// Close the stream. Idempotent.
    async fn close(&mut self);
}

/// Low-latency order submission channel.
///
/// Implementations:
/// - `StubOrderChannel` - For testing (records submissions)
/// - `BinanceOrderSocket` - Binance WebSocket order API
#[async_trait]
pub trait OrderChannel: Send + Sync {
    /// Submit a market or limit order.
    async fn submit(&self, spec: &OrderSpec) -> ExecResult<OrderAck>;

    /// Change price and quantity of a resting limit order.
    async fn modify(&self, spec: &ModifySpec) -> ExecResult<OrderAck>;

    /// Look up an existing order.
    async fn query_status(&self, order: &OrderRef) -> ExecResult<OrderStatusReport>;

    /// Close the channel; pending requests fail. Idempotent.
    async fn close(&self);

    /// Resolves once the channel can no longer carry requests, whether it was
    /// closed locally or dropped by the remote side.
    async fn closed(&self);
}

// =============================================================================
// Exchange Service
// =============================================================================

/// Port for everything the session needs from the exchange.
///
/// Implementations:
/// - `StubExchange` - For testing (scripted metadata, positions and streams)
/// - `BinanceExchange` - Binance USDⓈ-M futures
#[async_trait]
pub trait ExchangeService: Send + Sync {
    /// Fetch trading constraints for every listed symbol (one bulk call).
    async fn fetch_symbol_metadata(&self) -> ExecResult<Vec<SymbolMetadata>>;

    /// Current reference (last traded) price for a symbol.
    async fn fetch_reference_price(&self, symbol: &Symbol) -> ExecResult<Decimal>;

    /// Full account position snapshot, including zero-amount records.
    async fn fetch_account_positions(&self) -> ExecResult<Vec<RawPosition>>;

    /// Obtain a user-stream session token.
    ///
    /// Rejections surface as `ExecError::SessionTokenFetchFailed`.
    async fn open_session_token(&self) -> ExecResult<SessionToken>;

    /// Extend the token's lifetime.
    async fn keepalive_session_token(&self, token: &SessionToken) -> ExecResult<()>;

    /// Invalidate the token.
    async fn close_session_token(&self, token: &SessionToken) -> ExecResult<()>;

    /// Open the combined candle feed for `symbol`/`interval` plus the user feed
    /// for `token`.
    async fn open_market_and_user_stream(
        &self,
        symbol: &Symbol,
        interval: &str,
        token: &SessionToken,
    ) -> ExecResult<Box<dyn StreamChannel>>;

    /// Open a fresh order submission channel.
    async fn open_order_channel(&self) -> ExecResult<std::sync::Arc<dyn OrderChannel>>;

    /// Submit a conditional (trigger) order.
    async fn submit_conditional_order(&self, spec: &ConditionalOrderSpec) -> ExecResult<OrderAck>;

    /// Cancel a conditional order.
    async fn cancel_conditional_order(&self, order: &ConditionalRef) -> ExecResult<()>;

    /// Set the leverage multiplier for a symbol.
    async fn set_leverage(&self, symbol: &Symbol, leverage: Leverage) -> ExecResult<()>;

    /// Enable (hedge mode) or disable (one-way mode) dual position sides.
    async fn set_dual_position_mode(&self, enabled: bool) -> ExecResult<()>;

    /// Recent candle history, oldest first.
    async fn fetch_candles(
        &self,
        symbol: &Symbol,
        interval: &str,
        limit: u16,
    ) -> ExecResult<Vec<Candle>>;
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_token_debug_is_redacted() {
        let token = SessionToken::new("pqia91ma19a5s61cv6a81va65sdf19v8a65a1a5s61cv6a81va65sdf19v8a65a1");
        let debug = format!("{:?}", token);

        assert!(debug.starts_with("SessionToken(pqia91"));
        assert!(!debug.contains("v8a65a1"));
    }

    #[test]
    fn test_conditional_kind_wire_names() {
        assert_eq!(ConditionalKind::StopMarket.as_wire(), "STOP_MARKET");
        assert_eq!(ConditionalKind::TakeProfitMarket.as_wire(), "TAKE_PROFIT_MARKET");
    }

    #[test]
    fn test_order_spec_serialization() {
        let spec = OrderSpec {
            symbol: Symbol::from_pair("BTCUSDT").unwrap(),
            side: OrderSide::Buy,
            position_side: PositionSide::Long,
            quantity: "0.016".to_string(),
            kind: OrderKind::Limit { price: "60000.0".to_string() },
            reduce_only: false,
            client_order_id: "en_abc".to_string(),
        };

        let json = serde_json::to_string(&spec).unwrap();
        let parsed: OrderSpec = serde_json::from_str(&json).unwrap();

        assert_eq!(parsed, spec);
    }
}
