//! Downstream Sink
//!
//! Validated updates leave the ingestion core through [`UpdateSink`]. What
//! happens next (storage, simulation, broadcast) belongs to the collaborator.

use thiserror::Error;
use tokio::sync::mpsc;
use tracing::info;

use crate::core::update::PlayerUpdate;

/// Forwarding failures.
#[derive(Debug, Error)]
pub enum SinkError {
    /// The consumer has gone away.
    #[error("sink closed")]
    Closed,
    /// The consumer refused the update.
    #[error("sink rejected update: {0}")]
    Rejected(String),
}

/// Consumer of validated updates. Called concurrently from both listeners.
pub trait UpdateSink: Send + Sync + 'static {
    /// Take ownership of one validated update.
    fn accept(&self, update: PlayerUpdate) -> Result<(), SinkError>;
}

/// Forwards updates into an unbounded tokio channel.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<PlayerUpdate>,
}

impl ChannelSink {
    /// Create a sink and the receiver that drains it.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<PlayerUpdate>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl UpdateSink for ChannelSink {
    fn accept(&self, update: PlayerUpdate) -> Result<(), SinkError> {
        self.tx.send(update).map_err(|_| SinkError::Closed)
    }
}

/// Logs every update and drops it.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogSink;

impl UpdateSink for LogSink {
    fn accept(&self, update: PlayerUpdate) -> Result<(), SinkError> {
        info!(
            player = %update.player_id,
            source = %update.source,
            peer = %update.peer,
            x = update.x,
            y = update.y,
            "player update"
        );
        Ok(())
    }
}
