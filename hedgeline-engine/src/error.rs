//! Engine errors

use rust_decimal::Decimal;
use thiserror::Error;

/// Errors produced while sizing orders
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    /// Floored quantity is zero or below the symbol minimum
    #[error("Order too small for {symbol}: computed {computed}, minimum {minimum}")]
    OrderTooSmall {
        /// Symbol the order was sized for
        symbol: String,
        /// Quantity after flooring to the step
        computed: Decimal,
        /// Symbol minimum quantity
        minimum: Decimal,
    },

    /// Price floors to zero at the symbol tick
    #[error("Price {price} is below tick {tick}")]
    PriceBelowTick {
        /// Requested price
        price: Decimal,
        /// Symbol price tick
        tick: Decimal,
    },

    /// Non-positive notional, price or step
    #[error("Invalid sizing input: {0}")]
    InvalidInput(String),
}
