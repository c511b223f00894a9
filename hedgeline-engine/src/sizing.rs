//! Order sizing: notional → exchange-compliant quantity.
//!
//! Everything here is decimal arithmetic; binary floats never enter the path,
//! so threshold checks near step boundaries are exact.
//!
//! # Rounding
//!
//! ```text
//! raw     = notional / reference_price
//! floored = floor(raw / quantity_step) * quantity_step
//! ```
//!
//! Quantities always round toward zero size: under-filling the requested
//! notional is acceptable, exceeding it is not.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::debug;

use hedgeline_domain::{Price, SymbolRule};

use crate::error::EngineError;

/// Fractional digits used for prices whose tick has no fractional part.
///
/// Integer-tick symbols are still sent as "60000.0" rather than "60000".
pub const INTEGER_TICK_PRICE_DIGITS: u32 = 1;

/// A quantity that satisfies the symbol's step and minimum.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedQuantity {
    /// Numeric value (a multiple of the quantity step)
    pub value: Decimal,
    /// Exact wire text with `quantity_precision` fractional digits
    pub text: String,
}

/// A price floored to the symbol's tick.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedPrice {
    /// Numeric value (a multiple of the price step)
    pub value: Decimal,
    /// Exact wire text
    pub text: String,
}

/// Derive an order quantity from a notional amount.
///
/// # Errors
///
/// - `EngineError::InvalidInput` if notional or price is not positive, or the
///   arithmetic overflows
/// - `EngineError::OrderTooSmall` if the floored quantity is below the
///   symbol minimum, or is zero
///
/// # Example
///
/// ```
/// # use hedgeline_domain::{Symbol, SymbolRule};
/// # use hedgeline_engine::resolve_quantity;
/// # use rust_decimal_macros::dec;
/// let rule = SymbolRule::new(
///     Symbol::from_pair("BTCUSDT").unwrap(),
///     dec!(0.001),
///     dec!(0.001),
///     dec!(0.1),
/// )
/// .unwrap();
/// let qty = resolve_quantity(dec!(250), dec!(50000), &rule).unwrap();
/// assert_eq!(qty.text, "0.005");
/// ```
pub fn resolve_quantity(
    notional: Decimal,
    reference_price: Decimal,
    rule: &SymbolRule,
) -> Result<ResolvedQuantity, EngineError> {
    if notional <= Decimal::ZERO {
        return Err(EngineError::InvalidInput(format!(
            "notional must be positive, got {}",
            notional
        )));
    }
    if reference_price <= Decimal::ZERO {
        return Err(EngineError::InvalidInput(format!(
            "reference price must be positive, got {}",
            reference_price
        )));
    }

    let raw = notional
        .checked_div(reference_price)
        .ok_or_else(|| EngineError::InvalidInput("notional / price overflowed".to_string()))?;
    let floored = floor_to_step(raw, rule.quantity_step())?;

    if floored.is_zero() || floored < rule.min_quantity() {
        return Err(EngineError::OrderTooSmall {
            symbol: rule.symbol().to_string(),
            computed: floored,
            minimum: rule.min_quantity(),
        });
    }

    let text = format_fixed(floored, rule.quantity_precision());

    debug!(
        symbol = %rule.symbol(),
        %notional,
        %reference_price,
        %raw,
        quantity = %text,
        "Resolved order quantity"
    );

    Ok(ResolvedQuantity { value: floored, text })
}

/// Floor a price to the symbol's tick and format it for the wire.
///
/// Uses the price precision of the tick, except that integer ticks are
/// formatted with [`INTEGER_TICK_PRICE_DIGITS`] fractional digits.
///
/// # Errors
///
/// `EngineError::PriceBelowTick` if the price floors to zero.
pub fn resolve_price(price: Price, rule: &SymbolRule) -> Result<ResolvedPrice, EngineError> {
    let floored = floor_to_step(price.as_decimal(), rule.price_step())?;
    if floored.is_zero() {
        return Err(EngineError::PriceBelowTick {
            price: price.as_decimal(),
            tick: rule.price_step(),
        });
    }

    let digits = match rule.price_precision() {
        0 => INTEGER_TICK_PRICE_DIGITS,
        precision => precision,
    };

    Ok(ResolvedPrice { value: floored, text: format_fixed(floored, digits) })
}

/// Exact text for an amount reported by the exchange (trailing zeros dropped).
///
/// Used when the quantity is not derived from a notional, e.g. closing the
/// full held amount of a position.
pub fn exact_text(amount: Decimal) -> String {
    amount.normalize().to_string()
}

/// floor(value / step) * step
fn floor_to_step(value: Decimal, step: Decimal) -> Result<Decimal, EngineError> {
    if step <= Decimal::ZERO {
        return Err(EngineError::InvalidInput(format!("step must be positive, got {}", step)));
    }
    let steps = value
        .checked_div(step)
        .ok_or_else(|| EngineError::InvalidInput("value / step overflowed".to_string()))?
        .floor();
    steps
        .checked_mul(step)
        .ok_or_else(|| EngineError::InvalidInput("steps * step overflowed".to_string()))
}

/// Format with exactly `digits` fractional digits.
fn format_fixed(value: Decimal, digits: u32) -> String {
    let mut fixed = value;
    fixed.rescale(digits);
    fixed.to_string()
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use hedgeline_domain::Symbol;
    use rust_decimal_macros::dec;

    fn rule(min: Decimal, step: Decimal, tick: Decimal) -> SymbolRule {
        SymbolRule::new(Symbol::from_pair("BTCUSDT").unwrap(), min, step, tick).unwrap()
    }

    fn btc_rule() -> SymbolRule {
        rule(dec!(0.001), dec!(0.001), dec!(0.10))
    }

    #[test]
    fn test_resolve_exact_multiple() {
        let qty = resolve_quantity(dec!(250), dec!(50000), &btc_rule()).unwrap();

        assert_eq!(qty.value, dec!(0.005));
        assert_eq!(qty.text, "0.005");
    }

    #[test]
    fn test_resolve_too_small() {
        let err = resolve_quantity(dec!(5), dec!(50000), &btc_rule()).unwrap_err();

        match err {
            EngineError::OrderTooSmall { computed, minimum, .. } => {
                assert!(computed.is_zero());
                assert_eq!(minimum, dec!(0.001));
            }
            other => panic!("Expected OrderTooSmall, got {:?}", other),
        }
    }

    #[test]
    fn test_resolve_floors_toward_zero() {
        // 1000 / 60000 = 0.01666.. → 0.016, never 0.017
        let qty = resolve_quantity(dec!(1000), dec!(60000), &btc_rule()).unwrap();

        assert_eq!(qty.text, "0.016");
        assert!(qty.value * dec!(60000) <= dec!(1000));
    }

    #[test]
    fn test_resolve_below_minimum_but_nonzero() {
        let rule = rule(dec!(0.01), dec!(0.001), dec!(0.1));
        // 250 / 50000 = 0.005 < 0.01
        let err = resolve_quantity(dec!(250), dec!(50000), &rule).unwrap_err();

        assert!(matches!(
            err,
            EngineError::OrderTooSmall { computed, .. } if computed == dec!(0.005)
        ));
    }

    #[test]
    fn test_resolve_zero_minimum_still_rejects_zero() {
        let rule = rule(dec!(0), dec!(1), dec!(0.01));
        let err = resolve_quantity(dec!(10), dec!(50000), &rule).unwrap_err();

        assert!(matches!(err, EngineError::OrderTooSmall { .. }));
    }

    #[test]
    fn test_resolve_integer_step_formats_without_fraction() {
        let rule = rule(dec!(1), dec!(1), dec!(0.0001));
        let qty = resolve_quantity(dec!(100), dec!(0.3), &rule).unwrap();

        assert_eq!(qty.text, "333");
    }

    #[test]
    fn test_resolve_pads_to_precision() {
        // 0.010 must be sent as "0.010", not "0.01"
        let qty = resolve_quantity(dec!(600), dec!(60000), &btc_rule()).unwrap();

        assert_eq!(qty.text, "0.010");
    }

    #[test]
    fn test_resolve_rejects_bad_inputs() {
        assert!(matches!(
            resolve_quantity(dec!(0), dec!(50000), &btc_rule()),
            Err(EngineError::InvalidInput(_))
        ));
        assert!(matches!(
            resolve_quantity(dec!(100), dec!(0), &btc_rule()),
            Err(EngineError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_resolved_quantities_respect_rules() {
        let rules = [
            rule(dec!(0.001), dec!(0.001), dec!(0.1)),
            rule(dec!(0.01), dec!(0.01), dec!(0.01)),
            rule(dec!(1), dec!(1), dec!(0.0001)),
            rule(dec!(0.5), dec!(0.5), dec!(0.001)),
        ];
        let notionals = [dec!(5), dec!(19.99), dec!(100), dec!(250), dec!(1000), dec!(12345.67)];
        let prices = [dec!(0.0789), dec!(1.5), dec!(3021.37), dec!(50000), dec!(60000)];

        for rule in &rules {
            for notional in notionals {
                for price in prices {
                    match resolve_quantity(notional, price, rule) {
                        Ok(qty) => {
                            assert!(qty.value >= rule.min_quantity());
                            assert!((qty.value % rule.quantity_step()).is_zero());
                            assert!(qty.value <= notional / price);
                            assert_eq!(qty.text.parse::<Decimal>().unwrap(), qty.value);
                        }
                        Err(EngineError::OrderTooSmall { .. }) => {}
                        Err(other) => panic!("unexpected error {:?}", other),
                    }
                }
            }
        }
    }

    #[test]
    fn test_price_uses_tick_precision() {
        let price = resolve_price(Price::new(dec!(60000.07)).unwrap(), &btc_rule()).unwrap();

        assert_eq!(price.value, dec!(60000.0));
        assert_eq!(price.text, "60000.0");
    }

    #[test]
    fn test_price_integer_tick_gets_one_digit() {
        let rule = rule(dec!(0.001), dec!(0.001), dec!(1));
        let price = resolve_price(Price::new(dec!(59500.9)).unwrap(), &rule).unwrap();

        assert_eq!(price.text, "59500.0");
    }

    #[test]
    fn test_price_fine_tick() {
        let rule = rule(dec!(1), dec!(1), dec!(0.0001));
        let price = resolve_price(Price::new(dec!(0.078912)).unwrap(), &rule).unwrap();

        assert_eq!(price.text, "0.0789");
    }

    #[test]
    fn test_price_below_tick() {
        let rule = rule(dec!(1), dec!(1), dec!(0.01));
        let err = resolve_price(Price::new(dec!(0.001)).unwrap(), &rule).unwrap_err();

        assert!(matches!(err, EngineError::PriceBelowTick { .. }));
    }

    #[test]
    fn test_exact_text_drops_trailing_zeros() {
        assert_eq!(exact_text(dec!(0.01500)), "0.015");
        assert_eq!(exact_text(dec!(-3.0)), "-3");
        assert_eq!(exact_text(dec!(42)), "42");
    }
}
