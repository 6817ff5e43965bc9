//! Datagram Ingestion Listener
//!
//! One long-lived loop over a UDP socket. Each datagram is decoded, its
//! credential checked, and accepted updates are handed to the sink. Failures
//! are dropped silently: UDP has no channel back to the sender, so clients get
//! no feedback of any kind, and the listener never acknowledges or echoes.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::UdpSocket;
use tokio::sync::broadcast;
use tracing::{debug, error, info, instrument, warn};

use crate::core::credential::{derive, validate};
use crate::core::update::{PlayerUpdate, UpdateSource};
use crate::network::error::TransportError;
use crate::network::protocol::DatagramUpdate;
use crate::network::sink::UpdateSink;
use crate::network::stats::IngestStats;

/// Receive buffer size. Longer datagrams are truncated and fail to decode.
pub const RECV_BUFFER_SIZE: usize = 1024;

/// Bytes of an undecodable payload echoed into debug logs.
const LOG_PREVIEW_LEN: usize = 64;

/// What happened to a single datagram.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatagramOutcome {
    /// Forwarded to the sink.
    Accepted,
    /// Could not be decoded or failed structural checks.
    Malformed,
    /// Credential did not match the player id.
    Rejected,
    /// Sink refused the update.
    SinkFailed,
}

/// UDP listener that owns its socket until `run` returns.
pub struct DatagramIngestionListener {
    socket: UdpSocket,
    local_addr: SocketAddr,
    sink: Arc<dyn UpdateSink>,
    stats: Arc<IngestStats>,
}

impl DatagramIngestionListener {
    /// Bind the socket. Failure here is fatal to this listener.
    pub async fn bind(addr: &str, sink: Arc<dyn UpdateSink>) -> Result<Self, TransportError> {
        let socket = UdpSocket::bind(addr)
            .await
            .map_err(|e| TransportError::bind("datagram listener", addr, e))?;
        let local_addr = socket
            .local_addr()
            .map_err(|e| TransportError::bind("datagram listener", addr, e))?;

        Ok(Self {
            socket,
            local_addr,
            sink,
            stats: Arc::new(IngestStats::default()),
        })
    }

    /// Actual bound address.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Shared counters for this listener.
    pub fn stats(&self) -> Arc<IngestStats> {
        self.stats.clone()
    }

    /// Receive until shutdown or until the socket is closed.
    #[instrument(name = "datagram", skip_all, fields(addr = %self.local_addr))]
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) -> Result<(), TransportError> {
        info!("Datagram listener on {}", self.local_addr);
        let mut buf = [0u8; RECV_BUFFER_SIZE];

        loop {
            tokio::select! {
                result = self.socket.recv_from(&mut buf) => {
                    match result {
                        Ok((len, peer)) => {
                            self.process(&buf[..len], peer);
                        }
                        Err(e) if is_socket_closed(&e) => {
                            error!("Datagram socket closed: {}", e);
                            return Err(TransportError::SocketClosed(e));
                        }
                        Err(e) => {
                            warn!("Datagram receive error: {}", e);
                        }
                    }
                }
                _ = shutdown.recv() => {
                    info!("Datagram listener shutting down");
                    return Ok(());
                }
            }
        }
    }

    /// Decode, validate and forward one datagram.
    pub fn process(&self, payload: &[u8], peer: SocketAddr) -> DatagramOutcome {
        self.stats.record_received();

        let msg = match DatagramUpdate::decode(payload) {
            Ok(msg) => msg,
            Err(e) => {
                self.stats.record_malformed();
                let preview = &payload[..payload.len().min(LOG_PREVIEW_LEN)];
                debug!(
                    %peer,
                    error = %e,
                    payload = %String::from_utf8_lossy(preview),
                    "Dropping undecodable datagram"
                );
                return DatagramOutcome::Malformed;
            }
        };

        if !validate(&msg.session_hash, &msg.player_id) {
            self.stats.record_rejected();
            debug!(%peer, player = %msg.player_id, "Dropping datagram with invalid credential");
            return DatagramOutcome::Rejected;
        }

        let update = PlayerUpdate::new(
            derive(&msg.player_id),
            msg.player_id,
            msg.x,
            msg.y,
            UpdateSource::Datagram,
            peer,
        );

        match self.sink.accept(update) {
            Ok(()) => {
                self.stats.record_accepted();
                DatagramOutcome::Accepted
            }
            Err(e) => {
                self.stats.record_sink_failure();
                warn!(%peer, "Failed to forward datagram update: {}", e);
                DatagramOutcome::SinkFailed
            }
        }
    }
}

/// Receive errors after which the socket is unusable.
fn is_socket_closed(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::NotConnected | io::ErrorKind::BrokenPipe
    )
}
