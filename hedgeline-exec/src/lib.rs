//! Hedgeline Execution Layer
//!
//! Everything between a caller's order intent and the exchange.
//!
//! # Architecture
//!
//! ```text
//! OrderIntent → OrderCoordinator → QuantityResolver → OrderChannel → Exchange
//!                     │                   ▲
//!                     ├── SymbolRuleCache ┘
//!                     └── PositionView (close / reload)
//! ```
//!
//! # Components
//!
//! - **Ports**: Traits defining the exchange service, stream and order channel
//! - **SymbolRuleCache**: Bulk-fetched, never-invalidated symbol constraints
//! - **PositionView**: Wholesale-replaced snapshot of open positions
//! - **OrderChannelSlot**: The order channel the supervisor currently publishes
//! - **OrderCoordinator**: Market, limit, bracket, modify and close operations
//! - **Stub**: Test implementations for development
//!
//! # Example
//!
//! ```rust,ignore
//! use hedgeline_exec::{OrderChannelSlot, OrderCoordinator, PositionView, StubExchange, SymbolRuleCache};
//! use std::sync::Arc;
//!
//! let exchange = Arc::new(StubExchange::with_default_markets());
//! let rules = Arc::new(SymbolRuleCache::new(exchange.clone()));
//! let positions = Arc::new(PositionView::new(exchange.clone()));
//! let slot = Arc::new(OrderChannelSlot::new());
//!
//! let coordinator = OrderCoordinator::new(exchange, rules, positions, slot);
//! let ack = coordinator.place_market_order(&intent).await?;
//! ```

#![warn(clippy::all)]

pub mod channel;
pub mod coordinator;
pub mod error;
pub mod ports;
pub mod positions;
pub mod stub;
pub mod symbol_rules;

// Re-exports for convenience
pub use channel::OrderChannelSlot;
pub use coordinator::OrderCoordinator;
pub use error::{BracketLeg, ExecError, ExecResult};
pub use ports::{
    ConditionalKind, ConditionalOrderSpec, ConditionalRef, ExchangeService, ModifySpec,
    OrderChannel, OrderKind, OrderSpec, OrderStatusReport, RawPosition, SessionToken,
    StreamChannel, SymbolMetadata,
};
pub use positions::{parse_positions, PositionSnapshot, PositionView};
pub use stub::{raw_position, StubExchange, StubOp};
pub use symbol_rules::{parse_rule, SymbolRuleCache};
