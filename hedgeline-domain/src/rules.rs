//! Symbol Trading Rules
//!
//! Exchange-imposed constraints on order size and price for one symbol.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::{DomainError, Symbol};

/// Trading constraints for a single symbol.
///
/// # Invariants
/// - `quantity_step > 0`
/// - `price_step > 0`
/// - `min_quantity >= 0`
/// - precisions are derived from the steps, never supplied independently
///
/// Rules are immutable once fetched and are never refreshed within a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SymbolRule {
    symbol: Symbol,
    min_quantity: Decimal,
    quantity_step: Decimal,
    price_step: Decimal,
    quantity_precision: u32,
    price_precision: u32,
}

impl SymbolRule {
    /// Build a rule from raw exchange filter values.
    ///
    /// # Errors
    /// Returns `DomainError::InvalidRule` if a step is not positive or the
    /// minimum quantity is negative.
    pub fn new(
        symbol: Symbol,
        min_quantity: Decimal,
        quantity_step: Decimal,
        price_step: Decimal,
    ) -> Result<Self, DomainError> {
        if quantity_step <= Decimal::ZERO {
            return Err(DomainError::InvalidRule(format!(
                "{}: quantity step must be positive, got {}",
                symbol, quantity_step
            )));
        }
        if price_step <= Decimal::ZERO {
            return Err(DomainError::InvalidRule(format!(
                "{}: price step must be positive, got {}",
                symbol, price_step
            )));
        }
        if min_quantity < Decimal::ZERO {
            return Err(DomainError::InvalidRule(format!(
                "{}: minimum quantity must not be negative, got {}",
                symbol, min_quantity
            )));
        }

        Ok(Self {
            symbol,
            min_quantity,
            quantity_step,
            price_step,
            quantity_precision: step_precision(quantity_step),
            price_precision: step_precision(price_step),
        })
    }

    /// Symbol these rules apply to
    pub fn symbol(&self) -> &Symbol {
        &self.symbol
    }

    /// Smallest order quantity the exchange accepts
    pub fn min_quantity(&self) -> Decimal {
        self.min_quantity
    }

    /// Quantity increment; every order quantity is a multiple of it
    pub fn quantity_step(&self) -> Decimal {
        self.quantity_step
    }

    /// Price tick
    pub fn price_step(&self) -> Decimal {
        self.price_step
    }

    /// Fractional digits used when formatting quantities
    pub fn quantity_precision(&self) -> u32 {
        self.quantity_precision
    }

    /// Fractional digits of the price tick (may be 0 for integer ticks)
    pub fn price_precision(&self) -> u32 {
        self.price_precision
    }
}

/// Number of significant fractional digits in a step, ignoring trailing zeros.
///
/// `0.00100000` → 3, `0.10` → 1, `1` → 0, `10` → 0.
pub fn step_precision(step: Decimal) -> u32 {
    step.normalize().scale()
}
