//! Order channel slot.
//!
//! The supervisor publishes the live order channel here after a successful
//! connect and clears it on teardown; the coordinator reads whatever is
//! currently published.

use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::debug;

use crate::error::{ExecError, ExecResult};
use crate::ports::OrderChannel;

/// Holder for the currently active order channel (if any).
#[derive(Default)]
pub struct OrderChannelSlot {
    current: RwLock<Option<Arc<dyn OrderChannel>>>,
}

impl OrderChannelSlot {
    /// Create an empty slot
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish a new channel, returning the one it replaced.
    pub async fn publish(&self, channel: Arc<dyn OrderChannel>) -> Option<Arc<dyn OrderChannel>> {
        debug!("Order channel published");
        self.current.write().await.replace(channel)
    }

    /// Remove the published channel.
    pub async fn clear(&self) -> Option<Arc<dyn OrderChannel>> {
        let previous = self.current.write().await.take();
        if previous.is_some() {
            debug!("Order channel cleared");
        }
        previous
    }

    /// The published channel, or `ExecError::NotConnected`.
    pub async fn current(&self) -> ExecResult<Arc<dyn OrderChannel>> {
        self.current.read().await.clone().ok_or(ExecError::NotConnected)
    }

    /// Whether a channel is published
    pub async fn is_available(&self) -> bool {
        self.current.read().await.is_some()
    }
}
