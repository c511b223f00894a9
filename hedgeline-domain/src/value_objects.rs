//! Value Objects for the Hedgeline Domain
//!
//! Immutable, validated domain primitives.
//! All value objects enforce invariants at construction time.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Domain errors for value object validation
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DomainError {
    /// Price must be positive
    #[error("Invalid price: {0}")]
    InvalidPrice(String),

    /// Quantity must be positive
    #[error("Invalid quantity: {0}")]
    InvalidQuantity(String),

    /// Symbol must be a valid exchange symbol
    #[error("Invalid symbol: {0}")]
    InvalidSymbol(String),

    /// Leverage outside the exchange range
    #[error("Invalid leverage: {0}")]
    InvalidLeverage(String),

    /// Trading rule violates its invariants
    #[error("Invalid symbol rule: {0}")]
    InvalidRule(String),

    /// Unknown wire value for an enumerated field
    #[error("Unknown {field} value: {value}")]
    UnknownVariant {
        /// Field being parsed (e.g., "position side")
        field: &'static str,
        /// Raw value received
        value: String,
    },
}

// =============================================================================
// Price
// =============================================================================

/// Price represents a positive decimal price
///
/// # Invariants
/// - Must be > 0
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Price(Decimal);

impl Price {
    /// Create a new Price with validation
    ///
    /// # Errors
    /// Returns `DomainError::InvalidPrice` if value <= 0
    pub fn new(value: Decimal) -> Result<Self, DomainError> {
        if value <= Decimal::ZERO {
            return Err(DomainError::InvalidPrice(format!("Price must be positive, got {}", value)));
        }
        Ok(Self(value))
    }

    /// Get the underlying Decimal value
    pub fn as_decimal(&self) -> Decimal {
        self.0
    }
}

impl fmt::Display for Price {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// =============================================================================
// Quantity
// =============================================================================

/// Quantity represents a positive decimal quantity in base-asset units
///
/// # Invariants
/// - Must be > 0
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Quantity(Decimal);

impl Quantity {
    /// Create a new Quantity with validation
    ///
    /// # Errors
    /// Returns `DomainError::InvalidQuantity` if value <= 0
    pub fn new(value: Decimal) -> Result<Self, DomainError> {
        if value <= Decimal::ZERO {
            return Err(DomainError::InvalidQuantity(format!(
                "Quantity must be positive, got {}",
                value
            )));
        }
        Ok(Self(value))
    }

    /// Get the underlying Decimal value
    pub fn as_decimal(&self) -> Decimal {
        self.0
    }
}

impl fmt::Display for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// =============================================================================
// Symbol
// =============================================================================

/// Symbol is an exchange contract identifier (e.g., BTCUSDT)
///
/// # Invariants
/// - Non-empty
/// - Upper-case ASCII letters, digits and `_` only
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Symbol(String);

impl Symbol {
    /// Create a Symbol from a trading pair string
    ///
    /// Input is upper-cased, so `btcusdt` and `BTCUSDT` are the same symbol.
    ///
    /// # Examples
    /// ```
    /// # use hedgeline_domain::value_objects::Symbol;
    /// let symbol = Symbol::from_pair("btcusdt").unwrap();
    /// assert_eq!(symbol.as_pair(), "BTCUSDT");
    /// assert_eq!(symbol.stream_name(), "btcusdt");
    /// ```
    ///
    /// # Errors
    /// Returns `DomainError::InvalidSymbol` if format is invalid
    pub fn from_pair(pair: &str) -> Result<Self, DomainError> {
        let pair = pair.trim();
        if pair.is_empty() {
            return Err(DomainError::InvalidSymbol("Symbol must be non-empty".to_string()));
        }
        if !pair.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return Err(DomainError::InvalidSymbol(format!("Cannot parse trading pair: {}", pair)));
        }
        Ok(Self(pair.to_ascii_uppercase()))
    }

    /// Get the trading pair as string (e.g., "BTCUSDT")
    pub fn as_pair(&self) -> &str {
        &self.0
    }

    /// Lower-case form used in stream names (e.g., "btcusdt")
    pub fn stream_name(&self) -> String {
        self.0.to_ascii_lowercase()
    }
}

impl Default for Symbol {
    /// BTCUSDT perpetual
    fn default() -> Self {
        Self("BTCUSDT".to_string())
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Symbol {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_pair(s)
    }
}

// =============================================================================
// OrderSide
// =============================================================================

/// OrderSide represents the order direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderSide {
    /// Buy order
    Buy,
    /// Sell order
    Sell,
}

impl OrderSide {
    /// The side that unwinds this one (Buy ↔ Sell)
    pub fn opposite(&self) -> OrderSide {
        match self {
            OrderSide::Buy => OrderSide::Sell,
            OrderSide::Sell => OrderSide::Buy,
        }
    }

    /// Wire representation ("BUY" / "SELL")
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderSide::Buy => "BUY",
            OrderSide::Sell => "SELL",
        }
    }
}

impl fmt::Display for OrderSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OrderSide {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "BUY" => Ok(OrderSide::Buy),
            "SELL" => Ok(OrderSide::Sell),
            _ => Err(DomainError::UnknownVariant { field: "order side", value: s.to_string() }),
        }
    }
}

// =============================================================================
// PositionSide
// =============================================================================

/// Position side: hedge-mode leg (LONG / SHORT) or one-way net position
///
/// The exchange calls the one-way side `BOTH`; the wire form is produced by
/// [`PositionSide::as_wire`] and accepted back by `FromStr`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PositionSide {
    /// Long leg of a hedge-mode account
    Long,
    /// Short leg of a hedge-mode account
    Short,
    /// Single net position (one-way mode)
    Net,
}

impl PositionSide {
    /// Hedge-mode side that an entry with `side` opens
    ///
    /// Buy → Long, Sell → Short
    pub fn for_entry(side: OrderSide) -> PositionSide {
        match side {
            OrderSide::Buy => PositionSide::Long,
            OrderSide::Sell => PositionSide::Short,
        }
    }

    /// Exchange wire value ("LONG" / "SHORT" / "BOTH")
    pub fn as_wire(&self) -> &'static str {
        match self {
            PositionSide::Long => "LONG",
            PositionSide::Short => "SHORT",
            PositionSide::Net => "BOTH",
        }
    }
}

impl fmt::Display for PositionSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PositionSide::Long => write!(f, "LONG"),
            PositionSide::Short => write!(f, "SHORT"),
            PositionSide::Net => write!(f, "NET"),
        }
    }
}

impl FromStr for PositionSide {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "LONG" => Ok(PositionSide::Long),
            "SHORT" => Ok(PositionSide::Short),
            "BOTH" | "NET" => Ok(PositionSide::Net),
            _ => Err(DomainError::UnknownVariant { field: "position side", value: s.to_string() }),
        }
    }
}

// =============================================================================
// Leverage
// =============================================================================

/// Initial leverage for a futures symbol
///
/// # Invariants
/// - 1 ≤ leverage ≤ 125 (the exchange maximum; per-symbol tiers may be lower)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Leverage(u8);

impl Leverage {
    /// Maximum leverage the exchange ever accepts
    pub const MAX: u8 = 125;

    /// Create a validated leverage multiplier
    ///
    /// # Errors
    /// Returns `DomainError::InvalidLeverage` outside 1..=125
    pub fn new(value: u8) -> Result<Self, DomainError> {
        if value == 0 || value > Self::MAX {
            return Err(DomainError::InvalidLeverage(format!(
                "Leverage {} is outside 1..={}",
                value,
                Self::MAX
            )));
        }
        Ok(Self(value))
    }

    /// Get the multiplier
    pub fn value(&self) -> u8 {
        self.0
    }
}

impl fmt::Display for Leverage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x", self.0)
    }
}

// =============================================================================
// Tests
// =============================================================================
