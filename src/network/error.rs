//! Transport errors fatal to a listener.

use std::io;

use thiserror::Error;

/// Failure that ends a listener (bind, accept, closed socket, crashed task).
#[derive(Debug, Error)]
pub enum TransportError {
    /// Could not bind the listening socket.
    #[error("{transport} failed to bind {addr}: {source}")]
    Bind {
        /// Which listener failed.
        transport: &'static str,
        /// Requested address.
        addr: String,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// The datagram socket reported itself closed.
    #[error("socket closed: {0}")]
    SocketClosed(#[source] io::Error),

    /// Non-transient accept failure on the RPC listener.
    #[error("accept failed: {0}")]
    Accept(#[source] io::Error),

    /// A listener task panicked or was cancelled.
    #[error("listener task failed: {0}")]
    TaskFailed(String),
}

impl TransportError {
    pub(crate) fn bind(transport: &'static str, addr: &str, source: io::Error) -> Self {
        TransportError::Bind {
            transport,
            addr: addr.to_string(),
            source,
        }
    }
}
