//! Hedgeline Domain Layer
//!
//! Pure domain types with zero I/O dependencies: value objects, symbol
//! trading rules, positions, orders and market data.

#![warn(missing_docs)]
#![warn(clippy::all)]

// Public modules
pub mod credentials;
pub mod entities;
pub mod market_data;
pub mod rules;
pub mod value_objects;

// Re-export commonly used types
pub use credentials::ApiCredentials;
pub use entities::{
    ConnectionState, OrderAck, OrderId, OrderIntent, OrderRef, OrderStatus, Position,
    StrategyResult,
};
pub use market_data::{timestamp_from_millis, Candle};
pub use rules::{step_precision, SymbolRule};
pub use value_objects::{
    DomainError, Leverage, OrderSide, PositionSide, Price, Quantity, Symbol,
};
