//! Domain Entities for Hedgeline
//!
//! Positions, orders and the values exchanged with callers of the session.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::value_objects::{DomainError, OrderSide, PositionSide, Price, Symbol};

// =============================================================================
// Position
// =============================================================================

/// Open position as reported by the exchange account snapshot.
///
/// Positions are never patched field by field: the whole set is replaced on
/// each refresh. A zero `signed_amount` is never represented.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position {
    /// Trading symbol
    pub symbol: Symbol,
    /// Signed size in base units (positive = long exposure, negative = short)
    pub signed_amount: Decimal,
    /// Average entry price
    pub entry_price: Decimal,
    /// Current mark price
    pub mark_price: Decimal,
    /// Unrealized profit and loss in quote currency
    pub unrealized_pnl: Decimal,
    /// Current leverage multiplier
    pub leverage: u32,
    /// Position side (hedge leg or net)
    pub side: PositionSide,
}

impl Position {
    /// Order side that flattens this position (inverse of the amount's sign)
    pub fn closing_side(&self) -> OrderSide {
        if self.signed_amount.is_sign_positive() {
            OrderSide::Sell
        } else {
            OrderSide::Buy
        }
    }

    /// Absolute held amount
    pub fn abs_amount(&self) -> Decimal {
        self.signed_amount.abs()
    }

    /// Whether the position carries any size
    pub fn is_open(&self) -> bool {
        !self.signed_amount.is_zero()
    }
}

// =============================================================================
// Orders
// =============================================================================

/// Order status as reported by the exchange
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderStatus {
    /// Accepted, resting on the book
    New,
    /// Partially filled, remainder still resting
    PartiallyFilled,
    /// Completely filled
    Filled,
    /// Cancelled
    Canceled,
    /// Rejected by exchange
    Rejected,
    /// Expired
    Expired,
}

impl OrderStatus {
    /// "Still open" class: the order can still be modified or cancelled
    pub fn is_open(&self) -> bool {
        matches!(self, OrderStatus::New | OrderStatus::PartiallyFilled)
    }
}

impl FromStr for OrderStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "NEW" => Ok(OrderStatus::New),
            "PARTIALLY_FILLED" => Ok(OrderStatus::PartiallyFilled),
            "FILLED" => Ok(OrderStatus::Filled),
            "CANCELED" | "CANCELLED" => Ok(OrderStatus::Canceled),
            "REJECTED" => Ok(OrderStatus::Rejected),
            "EXPIRED" | "EXPIRED_IN_MATCH" => Ok(OrderStatus::Expired),
            other => Err(DomainError::UnknownVariant {
                field: "order status",
                value: other.to_string(),
            }),
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            OrderStatus::New => "NEW",
            OrderStatus::PartiallyFilled => "PARTIALLY_FILLED",
            OrderStatus::Filled => "FILLED",
            OrderStatus::Canceled => "CANCELED",
            OrderStatus::Rejected => "REJECTED",
            OrderStatus::Expired => "EXPIRED",
        };
        f.write_str(s)
    }
}

/// How an order is identified on the exchange
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderId {
    /// Exchange-assigned numeric id
    Exchange(u64),
    /// Caller-assigned client order id
    Client(String),
}

impl fmt::Display for OrderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderId::Exchange(id) => write!(f, "{}", id),
            OrderId::Client(id) => f.write_str(id),
        }
    }
}

/// Reference to an existing order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderRef {
    /// Symbol the order trades
    pub symbol: Symbol,
    /// Exchange or client id
    pub id: OrderId,
}

impl OrderRef {
    /// Reference by exchange order id
    pub fn by_exchange_id(symbol: Symbol, order_id: u64) -> Self {
        Self { symbol, id: OrderId::Exchange(order_id) }
    }

    /// Reference by client order id
    pub fn by_client_id(symbol: Symbol, client_order_id: impl Into<String>) -> Self {
        Self { symbol, id: OrderId::Client(client_order_id.into()) }
    }
}

/// Exchange acknowledgement of a submitted order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderAck {
    /// Symbol
    pub symbol: Symbol,
    /// Exchange order id (algo id for conditional orders)
    pub order_id: u64,
    /// Client order id echoed back
    pub client_order_id: String,
    /// Status at acknowledgement time
    pub status: OrderStatus,
}

// =============================================================================
// Order Intent
// =============================================================================

/// A requested order, sized in quote currency.
///
/// Exists only for the duration of one coordinator call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderIntent {
    /// Symbol to trade
    pub symbol: Symbol,
    /// Order direction
    pub side: OrderSide,
    /// Size in quote currency (e.g., USDT)
    pub notional: Decimal,
    /// Price used for sizing; fetched from the exchange when absent
    pub reference_price: Option<Price>,
    /// Position side the order applies to
    pub position_side: PositionSide,
}

impl OrderIntent {
    /// Create an intent with the hedge-mode position side matching `side`.
    pub fn new(symbol: Symbol, side: OrderSide, notional: Decimal) -> Self {
        Self {
            symbol,
            side,
            notional,
            reference_price: None,
            position_side: PositionSide::for_entry(side),
        }
    }

    /// Size against a caller-supplied price instead of the live ticker
    pub fn with_reference_price(mut self, price: Price) -> Self {
        self.reference_price = Some(price);
        self
    }

    /// Override the position side (e.g., `PositionSide::Net` in one-way mode)
    pub fn with_position_side(mut self, position_side: PositionSide) -> Self {
        self.position_side = position_side;
        self
    }
}

// =============================================================================
// Strategy Result
// =============================================================================

/// Outcome of a bracket strategy (entry + stop-loss + take-profit).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StrategyResult {
    /// Client order id of the limit entry
    pub entry_order_id: String,
    /// Conditional order id of the stop-loss
    pub stop_loss_order_id: u64,
    /// Conditional order id of the take-profit
    pub take_profit_order_id: u64,
    /// Quantity submitted on all three legs (exact decimal text)
    pub quantity: String,
    /// Entry limit price
    pub entry_price: Price,
    /// Stop-loss trigger price
    pub stop_loss: Price,
    /// Take-profit trigger price
    pub take_profit: Price,
    /// Position side of all legs
    pub position_side: PositionSide,
}

// =============================================================================
// Connection State
// =============================================================================

/// Lifecycle state of the exchange connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ConnectionState {
    /// No channels open
    #[default]
    Disconnected,
    /// Establishing (or re-establishing) channels
    Connecting,
    /// Streams and order channel are live
    Connected,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "disconnected"),
            ConnectionState::Connecting => write!(f, "connecting"),
            ConnectionState::Connected => write!(f, "connected"),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn position(amount: Decimal, side: PositionSide) -> Position {
        Position {
            symbol: Symbol::from_pair("BTCUSDT").unwrap(),
            signed_amount: amount,
            entry_price: dec!(60000),
            mark_price: dec!(60100),
            unrealized_pnl: dec!(1.5),
            leverage: 20,
            side,
        }
    }

    #[test]
    fn test_closing_side_inverts_sign() {
        assert_eq!(position(dec!(0.015), PositionSide::Long).closing_side(), OrderSide::Sell);
        assert_eq!(position(dec!(-0.015), PositionSide::Short).closing_side(), OrderSide::Buy);
        assert_eq!(position(dec!(-0.015), PositionSide::Short).abs_amount(), dec!(0.015));
    }

    #[test]
    fn test_order_status_open_class() {
        assert!(OrderStatus::New.is_open());
        assert!(OrderStatus::PartiallyFilled.is_open());
        assert!(!OrderStatus::Filled.is_open());
        assert!(!OrderStatus::Canceled.is_open());
        assert!(!OrderStatus::Expired.is_open());
    }

    #[test]
    fn test_order_status_parse() {
        assert_eq!("PARTIALLY_FILLED".parse::<OrderStatus>().unwrap(), OrderStatus::PartiallyFilled);
        assert_eq!("EXPIRED_IN_MATCH".parse::<OrderStatus>().unwrap(), OrderStatus::Expired);
        assert!("PENDING".parse::<OrderStatus>().is_err());
    }

    #[test]
    fn test_intent_defaults_to_hedge_side() {
        let symbol = Symbol::from_pair("BTCUSDT").unwrap();
        let intent = OrderIntent::new(symbol.clone(), OrderSide::Sell, dec!(100));
        assert_eq!(intent.position_side, PositionSide::Short);
        assert!(intent.reference_price.is_none());

        let intent = OrderIntent::new(symbol, OrderSide::Buy, dec!(100))
            .with_position_side(PositionSide::Net)
            .with_reference_price(Price::new(dec!(50000)).unwrap());
        assert_eq!(intent.position_side, PositionSide::Net);
        assert_eq!(intent.reference_price.unwrap().as_decimal(), dec!(50000));
    }

    #[test]
    fn test_connection_state_default() {
        assert_eq!(ConnectionState::default(), ConnectionState::Disconnected);
        assert_eq!(ConnectionState::Connecting.to_string(), "connecting");
    }
}
