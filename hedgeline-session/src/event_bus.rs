//! Event bus for session notifications.
//!
//! The supervisor publishes lifecycle and market events here:
//! - Connection state transitions
//! - Closed candles from the market stream
//! - Position view refreshes triggered by user events
//! - Reconnect scheduling and retry exhaustion
//!
//! Uses tokio broadcast channels for fan-out to multiple receivers.

use chrono::{DateTime, Utc};
use hedgeline_domain::{Candle, ConnectionState};
use tokio::sync::broadcast;

// =============================================================================
// Event Types
// =============================================================================

/// Events that flow through the session event bus.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// Connection state changed
    StateChanged {
        previous: ConnectionState,
        current: ConnectionState,
        timestamp: DateTime<Utc>,
    },

    /// A candle closed on the market stream
    CandleClosed(Candle),

    /// Position view was refreshed after a user event
    PositionsRefreshed {
        /// User event type that triggered the refresh
        trigger: String,
        /// Open positions after the refresh
        open_positions: usize,
    },

    /// A failed connection attempt will be retried
    Reconnecting {
        /// Attempt that failed (0-based)
        attempt: u32,
        /// Wait before the next attempt
        delay_ms: u64,
        /// Why the attempt failed
        error: String,
    },

    /// Every connection attempt failed; the session is disconnected
    RetriesExhausted {
        /// Attempts made
        attempts: u32,
        /// Last failure
        error: String,
    },
}

// =============================================================================
// Event Bus
// =============================================================================

/// Event bus for session-wide notifications.
///
/// Multiple producers can send events, and multiple consumers can receive.
/// Uses broadcast channels for fan-out pattern.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<SessionEvent>,
}

impl EventBus {
    /// Create a new event bus with specified capacity.
    ///
    /// Capacity determines how many events can be buffered before
    /// slow receivers start missing events (lagging).
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Send an event to all subscribers.
    ///
    /// Returns the number of receivers that received the event.
    /// Returns 0 if there are no active receivers.
    pub fn send(&self, event: SessionEvent) -> usize {
        // send() returns Err if there are no receivers, but we don't care
        self.sender.send(event).unwrap_or(0)
    }

    /// Subscribe to events.
    ///
    /// Returns a receiver that will receive all events sent after subscription.
    pub fn subscribe(&self) -> EventReceiver {
        EventReceiver {
            receiver: self.sender.subscribe(),
        }
    }

    /// Get the number of active receivers.
    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1000)
    }
}

/// Receiver for session events.
pub struct EventReceiver {
    receiver: broadcast::Receiver<SessionEvent>,
}

impl EventReceiver {
    /// Receive the next event.
    ///
    /// Returns `None` if the sender has been dropped.
    /// Returns error description if the receiver lagged (missed events).
    pub async fn recv(&mut self) -> Option<Result<SessionEvent, String>> {
        match self.receiver.recv().await {
            Ok(event) => Some(Ok(event)),
            Err(broadcast::error::RecvError::Closed) => None,
            Err(broadcast::error::RecvError::Lagged(count)) => {
                Some(Err(format!("Receiver lagged, missed {} events", count)))
            }
        }
    }

    /// Try to receive an event without blocking.
    ///
    /// Returns `None` if no event is immediately available.
    pub fn try_recv(&mut self) -> Option<Result<SessionEvent, String>> {
        match self.receiver.try_recv() {
            Ok(event) => Some(Ok(event)),
            Err(broadcast::error::TryRecvError::Empty) => None,
            Err(broadcast::error::TryRecvError::Closed) => None,
            Err(broadcast::error::TryRecvError::Lagged(count)) => {
                Some(Err(format!("Receiver lagged, missed {} events", count)))
            }
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
