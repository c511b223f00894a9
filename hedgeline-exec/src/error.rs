//! Execution layer error types.

use std::fmt;

use thiserror::Error;

use hedgeline_domain::{OrderAck, OrderStatus};

/// Leg of a bracket strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BracketLeg {
    /// Limit entry
    Entry,
    /// Conditional stop-loss exit
    StopLoss,
    /// Conditional take-profit exit
    TakeProfit,
}

impl fmt::Display for BracketLeg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BracketLeg::Entry => write!(f, "entry"),
            BracketLeg::StopLoss => write!(f, "stop-loss"),
            BracketLeg::TakeProfit => write!(f, "take-profit"),
        }
    }
}

/// Errors that can occur during execution operations.
#[derive(Debug, Error)]
pub enum ExecError {
    /// Network failure or timeout talking to the exchange (retryable)
    #[error("Transport error: {0}")]
    Transport(String),

    /// Credentials or source IP refused by the exchange
    #[error("Authentication failed: {0}")]
    Auth(String),

    /// Metadata service has no such symbol
    #[error("Symbol not found: {0}")]
    SymbolNotFound(String),

    /// Sizing failed (e.g., order too small)
    #[error("Engine error: {0}")]
    Engine(#[from] hedgeline_engine::EngineError),

    /// Domain validation failed
    #[error("Domain error: {0}")]
    Domain(#[from] hedgeline_domain::DomainError),

    /// Order is no longer in a modifiable state
    #[error("Order {order} is not modifiable (status {status})")]
    OrderNotModifiable {
        /// Order reference (exchange or client id)
        order: String,
        /// Status reported by the exchange
        status: OrderStatus,
    },

    /// Bulk symbol metadata could not be fetched or parsed
    #[error("Metadata fetch failed: {0}")]
    MetadataFetchFailed(String),

    /// Session token could not be obtained
    #[error("Session token fetch failed: {0}")]
    SessionTokenFetchFailed(String),

    /// Exchange refused the request
    #[error("Rejected by exchange ({code}): {msg}")]
    Rejected {
        /// Exchange error code
        code: i64,
        /// Exchange error message
        msg: String,
    },

    /// Response could not be understood
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// No order channel is currently published
    #[error("Not connected: no order channel available")]
    NotConnected,

    /// Caller supplied an invalid argument
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// Bracket stopped after the entry was placed
    ///
    /// Legs that succeeded are reported; nothing is rolled back.
    #[error("Bracket incomplete: {failed_leg} failed after entry {}: {cause}", .entry.client_order_id)]
    BracketIncomplete {
        /// Acknowledged entry order
        entry: OrderAck,
        /// Acknowledged stop-loss, if it was placed
        stop_loss: Option<OrderAck>,
        /// Leg that failed
        failed_leg: BracketLeg,
        /// Why it failed
        cause: Box<ExecError>,
    },
}

impl ExecError {
    /// Whether retrying the same request may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ExecError::Transport(_)
                | ExecError::SessionTokenFetchFailed(_)
                | ExecError::MetadataFetchFailed(_)
                | ExecError::NotConnected
        )
    }
}

/// Result type for execution operations.
pub type ExecResult<T> = Result<T, ExecError>;
