//! Market Data Types
//!
//! Canonical market data types used across Hedgeline.
//! These are exchange-agnostic; connectors convert wire payloads into them.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::Symbol;

// =============================================================================
// Candle
// =============================================================================

/// OHLCV candlestick data.
///
/// Represents aggregated trade data over one interval.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Candle {
    /// Trading symbol
    pub symbol: Symbol,
    /// Candle open time
    pub open_time: DateTime<Utc>,
    /// Candle close time
    pub close_time: DateTime<Utc>,
    /// Open price
    pub open: Decimal,
    /// High price
    pub high: Decimal,
    /// Low price
    pub low: Decimal,
    /// Close price
    pub close: Decimal,
    /// Base-asset volume
    pub volume: Decimal,
    /// Quote-asset volume
    pub quote_volume: Decimal,
}

impl Candle {
    /// Price range of the candle (high - low).
    pub fn range(&self) -> Decimal {
        self.high - self.low
    }

    /// Whether the candle closed above its open.
    pub fn is_bullish(&self) -> bool {
        self.close > self.open
    }
}

/// Convert exchange epoch milliseconds to a UTC timestamp.
///
/// Out-of-range values fall back to the Unix epoch.
pub fn timestamp_from_millis(millis: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(millis).unwrap_or_default()
}

// =============================================================================
// Tests
// =============================================================================
