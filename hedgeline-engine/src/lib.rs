//! Hedgeline Engine Layer
//!
//! Pure sizing logic, deterministic, no I/O.
//! Takes a notional and symbol rules → returns exchange-compliant quantities
//! and prices.

#![warn(clippy::all)]

pub mod error;
pub mod sizing;

pub use error::EngineError;
pub use sizing::{
    exact_text, resolve_price, resolve_quantity, ResolvedPrice, ResolvedQuantity,
    INTEGER_TICK_PRICE_DIGITS,
};
