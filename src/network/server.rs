//! Server Group
//!
//! Owns both ingestion listeners, runs them as separate tokio tasks and joins
//! them. A single broadcast channel is the shared shutdown signal: it fires on
//! external request and as soon as either listener exits, so a failing
//! listener never leaves its sibling running.

use std::sync::Arc;

use tokio::sync::broadcast;
use tokio::task::JoinError;
use tracing::{error, info, warn};

use crate::network::datagram::DatagramIngestionListener;
use crate::network::error::TransportError;
use crate::network::rpc::{IngestionService, RpcListener};
use crate::network::sink::UpdateSink;
use crate::network::stats::{IngestStats, StatsSnapshot};

/// Listener configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    /// UDP listen address (`host:port`).
    pub udp_addr: String,
    /// WebSocket RPC listen address (`host:port`).
    pub rpc_addr: String,
    /// Maximum concurrent RPC connections.
    pub max_rpc_connections: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            udp_addr: "0.0.0.0:7777".to_string(),
            rpc_addr: "0.0.0.0:7778".to_string(),
            max_rpc_connections: 1000,
        }
    }
}

impl ServerConfig {
    /// Create config from environment variables, falling back to defaults.
    ///
    /// Reads `INGEST_UDP_ADDR`, `INGEST_RPC_ADDR` and
    /// `INGEST_MAX_RPC_CONNECTIONS`.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();

        let max_rpc_connections = match lookup("INGEST_MAX_RPC_CONNECTIONS") {
            Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
                warn!(
                    "Ignoring invalid INGEST_MAX_RPC_CONNECTIONS={:?}, using {}",
                    raw, defaults.max_rpc_connections
                );
                defaults.max_rpc_connections
            }),
            None => defaults.max_rpc_connections,
        };

        Self {
            udp_addr: lookup("INGEST_UDP_ADDR").unwrap_or(defaults.udp_addr),
            rpc_addr: lookup("INGEST_RPC_ADDR").unwrap_or(defaults.rpc_addr),
            max_rpc_connections,
        }
    }
}

/// Stops a running [`ServerGroup`].
#[derive(Debug, Clone)]
pub struct ShutdownHandle {
    tx: broadcast::Sender<()>,
}

impl ShutdownHandle {
    /// Ask both listeners to stop.
    pub fn shutdown(&self) {
        let _ = self.tx.send(());
    }
}

/// Both listeners, bound and ready to run.
pub struct ServerGroup {
    datagram: DatagramIngestionListener,
    rpc: RpcListener,
    datagram_stats: Arc<IngestStats>,
    rpc_stats: Arc<IngestStats>,
    shutdown_tx: broadcast::Sender<()>,
    datagram_shutdown: broadcast::Receiver<()>,
    rpc_shutdown: broadcast::Receiver<()>,
}

impl ServerGroup {
    /// Bind both listeners. Either bind failure aborts startup.
    pub async fn bind(
        config: &ServerConfig,
        sink: Arc<dyn UpdateSink>,
    ) -> Result<Self, TransportError> {
        let datagram = DatagramIngestionListener::bind(&config.udp_addr, sink.clone()).await?;

        let service = IngestionService::new(sink);
        let rpc_stats = service.stats();
        let rpc = RpcListener::bind(
            &config.rpc_addr,
            config.max_rpc_connections,
            Arc::new(service),
            rpc_stats.clone(),
        )
        .await?;

        // Subscribe now so a shutdown sent before `run` is not lost.
        let (shutdown_tx, datagram_shutdown) = broadcast::channel(1);
        let rpc_shutdown = shutdown_tx.subscribe();

        Ok(Self {
            datagram_stats: datagram.stats(),
            datagram,
            rpc,
            rpc_stats,
            shutdown_tx,
            datagram_shutdown,
            rpc_shutdown,
        })
    }

    /// Bind and run until both listeners exit.
    pub async fn start(
        config: &ServerConfig,
        sink: Arc<dyn UpdateSink>,
    ) -> Result<(), TransportError> {
        Self::bind(config, sink).await?.run().await
    }

    /// Bound UDP address.
    pub fn udp_addr(&self) -> std::net::SocketAddr {
        self.datagram.local_addr()
    }

    /// Bound RPC address.
    pub fn rpc_addr(&self) -> std::net::SocketAddr {
        self.rpc.local_addr()
    }

    /// Handle that stops the group once it is running.
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            tx: self.shutdown_tx.clone(),
        }
    }

    /// Datagram listener counters.
    pub fn datagram_stats(&self) -> Arc<IngestStats> {
        self.datagram_stats.clone()
    }

    /// RPC listener counters.
    pub fn rpc_stats(&self) -> Arc<IngestStats> {
        self.rpc_stats.clone()
    }

    /// Run both listeners concurrently and wait for both to exit.
    ///
    /// Whichever listener stops first triggers shutdown of the other. The
    /// first error observed is returned.
    pub async fn run(self) -> Result<(), TransportError> {
        let ServerGroup {
            datagram,
            rpc,
            datagram_stats,
            rpc_stats,
            shutdown_tx,
            datagram_shutdown,
            rpc_shutdown,
        } = self;

        info!(
            "Server group starting: datagram on {}, rpc on {}",
            datagram.local_addr(),
            rpc.local_addr()
        );

        let mut datagram_task = tokio::spawn(datagram.run(datagram_shutdown));
        let mut rpc_task = tokio::spawn(rpc.run(rpc_shutdown));

        // Wait for the first exit, then stop the sibling.
        let (first, second) = tokio::select! {
            result = &mut datagram_task => {
                let first = flatten("datagram", result);
                let _ = shutdown_tx.send(());
                (first, flatten("rpc", rpc_task.await))
            }
            result = &mut rpc_task => {
                let first = flatten("rpc", result);
                let _ = shutdown_tx.send(());
                (first, flatten("datagram", datagram_task.await))
            }
        };

        let datagram_final: StatsSnapshot = datagram_stats.snapshot();
        let rpc_final: StatsSnapshot = rpc_stats.snapshot();
        info!(
            "Server group stopped (datagram accepted {}, rpc accepted {})",
            datagram_final.accepted, rpc_final.accepted
        );

        first.and(second)
    }
}

/// Merge a task's join result with its own return value.
fn flatten(
    name: &'static str,
    joined: Result<Result<(), TransportError>, JoinError>,
) -> Result<(), TransportError> {
    match joined {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => {
            error!("{} listener failed: {}", name, e);
            Err(e)
        }
        Err(e) => {
            error!("{} listener task failed: {}", name, e);
            Err(TransportError::TaskFailed(format!("{}: {}", name, e)))
        }
    }
}
