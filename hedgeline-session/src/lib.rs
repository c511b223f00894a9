//! Hedgeline Session Library
//!
//! Runtime side of a trading session: keeps the exchange connection alive and
//! exposes order operations over it.
//!
//! # Architecture
//!
//! ```text
//!                    TradingSession
//!                   /              \
//!   ConnectionSupervisor        OrderCoordinator
//!     │  token / stream /            │
//!     │  order channel / keepalive   │
//!     ├──► OrderChannelSlot ◄────────┤
//!     └──► PositionView ◄────────────┘
//!              ▲
//!     StreamRouter (user events → refresh)
//! ```
//!
//! # Components
//!
//! - **Supervisor**: Connection state machine with retry and self-healing
//! - **Router**: Classifies combined-stream frames
//! - **Retry**: Explicit backoff policy
//! - **Event Bus**: Session notifications (state, candles, refreshes)
//! - **Config**: Environment-based configuration
//!
//! # Example
//!
//! ```rust,ignore
//! use hedgeline_session::{Config, TradingSession};
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = Config::from_env().expect("Failed to load config");
//!     let session = TradingSession::from_config(&config);
//!     session.connect(config.market.symbol.clone(), config.market.interval.clone()).await;
//! }
//! ```

#![warn(clippy::all)]

pub mod config;
pub mod error;
pub mod event_bus;
pub mod retry;
pub mod router;
pub mod session;
pub mod supervisor;

// Re-exports for convenience
pub use config::{Config, MarketConfig};
pub use error::{SessionError, SessionResult};
pub use event_bus::{EventBus, EventReceiver, SessionEvent};
pub use retry::{Backoff, RetryPolicy};
pub use router::{route, StreamEvent};
pub use session::TradingSession;
pub use supervisor::{ConnectionSupervisor, DEFAULT_KEEPALIVE_INTERVAL};
