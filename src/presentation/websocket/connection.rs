//! Connection Handle
//!
//! The registry's non-owning view of a live connection: its identity, a
//! clone of the bounded outbound queue, and its cancellation token.

use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::messages::ServerFrame;

/// Why a frame could not be queued for a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueError {
    /// Outbound buffer is full (slow consumer)
    Full,
    /// The connection's writer is gone
    Closed,
}

#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    id: Uuid,
    user_id: i64,
    outbound: mpsc::Sender<ServerFrame>,
    cancel: CancellationToken,
}

impl ConnectionHandle {
    pub fn new(user_id: i64, outbound: mpsc::Sender<ServerFrame>, cancel: CancellationToken) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            outbound,
            cancel,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn user_id(&self) -> i64 {
        self.user_id
    }

    /// Queue a frame without waiting.
    pub fn try_deliver(&self, frame: ServerFrame) -> Result<(), QueueError> {
        self.outbound.try_send(frame).map_err(|e| match e {
            TrySendError::Full(_) => QueueError::Full,
            TrySendError::Closed(_) => QueueError::Closed,
        })
    }

    /// Ask the owning handler to terminate.
    pub fn disconnect(&self) {
        self.cancel.cancel();
    }

    pub fn is_disconnected(&self) -> bool {
        self.cancel.is_cancelled() || self.outbound.is_closed()
    }
}
