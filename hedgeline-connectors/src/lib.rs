//! Hedgeline Exchange Connectors
//!
//! Binance USDⓈ-M futures adapters (REST + WebSocket) behind the execution
//! layer's ports. Normalizes exchange-specific types to domain types.

#![warn(clippy::all)]

// Public modules
pub mod adapter;
pub mod binance_rest;
pub mod binance_ws;
pub mod binance_ws_api;
pub mod endpoints;
pub mod signing;

// Re-exports
pub use adapter::BinanceExchange;
pub use binance_rest::{BinanceRestClient, BinanceRestError, NO_CHANGE_CODE};
pub use binance_ws::{BinanceStream, BinanceWsError};
pub use binance_ws_api::BinanceOrderSocket;
pub use endpoints::{BinanceEndpoints, BinanceNetwork};
