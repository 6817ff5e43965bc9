//! RPC Ingestion Service
//!
//! Request/response ingestion over WebSocket. The service surface is the
//! one-method [`PlayerUpdateService`] trait; [`RpcListener`] serves any
//! implementation of it, one tokio task per connection.
//!
//! Unlike the datagram path, every request gets exactly one response frame:
//! `OK`, `INVALID_CREDENTIAL`, `MALFORMED_REQUEST` or `INTERNAL_ERROR`.

use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio::task::JoinSet;
use tokio::time::timeout;
use tokio_tungstenite::{accept_async, tungstenite::Message};
use tracing::{debug, error, info, instrument, warn};

use crate::core::credential::{derive, validate};
use crate::core::update::{PlayerUpdate, UpdateSource};
use crate::network::error::TransportError;
use crate::network::protocol::{
    check_update_fields, DecodeError, RpcRequest, SubmitPlayerUpdateRequest,
    SubmitPlayerUpdateResponse,
};
use crate::network::sink::UpdateSink;
use crate::network::stats::IngestStats;

/// Sent if a response somehow fails to serialize.
const FALLBACK_RESPONSE: &str =
    r#"{"status":"INTERNAL_ERROR","message":"Failed to encode response"}"#;

/// Backoff after running out of file descriptors.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Time open connections get to close once the listener stops.
pub const CONNECTION_DRAIN: Duration = Duration::from_secs(2);

/// ENFILE: system-wide open file table is full.
#[cfg(unix)]
const ENFILE: i32 = 23;

/// EMFILE: per-process descriptor limit reached.
#[cfg(unix)]
const EMFILE: i32 = 24;

/// The RPC surface: exactly one operation.
pub trait PlayerUpdateService: Send + Sync + 'static {
    /// Validate a submitted update and forward it downstream.
    fn submit_player_update(
        &self,
        peer: SocketAddr,
        request: SubmitPlayerUpdateRequest,
    ) -> SubmitPlayerUpdateResponse;
}

/// Credential-checking implementation backed by an [`UpdateSink`].
pub struct IngestionService {
    sink: Arc<dyn UpdateSink>,
    stats: Arc<IngestStats>,
}

impl IngestionService {
    /// Create a service forwarding into `sink`.
    pub fn new(sink: Arc<dyn UpdateSink>) -> Self {
        Self {
            sink,
            stats: Arc::new(IngestStats::default()),
        }
    }

    /// Outcome counters. Share these with the listener serving this service.
    pub fn stats(&self) -> Arc<IngestStats> {
        self.stats.clone()
    }
}

impl PlayerUpdateService for IngestionService {
    fn submit_player_update(
        &self,
        peer: SocketAddr,
        request: SubmitPlayerUpdateRequest,
    ) -> SubmitPlayerUpdateResponse {
        if let Err(e) = check_update_fields(&request.player_id, request.x, request.y) {
            self.stats.record_malformed();
            debug!(%peer, "Rejecting malformed update: {}", e);
            return SubmitPlayerUpdateResponse::malformed(&e);
        }

        if !validate(&request.session_hash, &request.player_id) {
            self.stats.record_rejected();
            debug!(%peer, player = %request.player_id, "Rejecting update with invalid credential");
            return SubmitPlayerUpdateResponse::invalid_credential();
        }

        let update = PlayerUpdate::new(
            derive(&request.player_id),
            request.player_id,
            request.x,
            request.y,
            UpdateSource::Rpc,
            peer,
        );

        match self.sink.accept(update) {
            Ok(()) => {
                self.stats.record_accepted();
                SubmitPlayerUpdateResponse::ok()
            }
            Err(e) => {
                self.stats.record_sink_failure();
                warn!(%peer, "Failed to forward rpc update: {}", e);
                SubmitPlayerUpdateResponse::internal(format!("Failed to forward update: {}", e))
            }
        }
    }
}

/// Decrements the live connection count when a connection task ends.
struct ConnectionSlot(Arc<AtomicUsize>);

impl Drop for ConnectionSlot {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

/// WebSocket listener serving a [`PlayerUpdateService`].
pub struct RpcListener {
    listener: TcpListener,
    local_addr: SocketAddr,
    max_connections: usize,
    service: Arc<dyn PlayerUpdateService>,
    stats: Arc<IngestStats>,
}

impl RpcListener {
    /// Bind the TCP listener. Failure here is fatal to this listener.
    ///
    /// `stats` receives frame-level counts (received, undecodable); pass the
    /// same instance the service records outcomes into.
    pub async fn bind(
        addr: &str,
        max_connections: usize,
        service: Arc<dyn PlayerUpdateService>,
        stats: Arc<IngestStats>,
    ) -> Result<Self, TransportError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| TransportError::bind("rpc listener", addr, e))?;
        let local_addr = listener
            .local_addr()
            .map_err(|e| TransportError::bind("rpc listener", addr, e))?;

        Ok(Self {
            listener,
            local_addr,
            max_connections,
            service,
            stats,
        })
    }

    /// Actual bound address.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Accept connections until shutdown or a non-transient accept error.
    ///
    /// Connection tasks are owned by the listener: on exit they are told to
    /// close, given [`CONNECTION_DRAIN`] to finish, then aborted.
    #[instrument(name = "rpc", skip_all, fields(addr = %self.local_addr))]
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) -> Result<(), TransportError> {
        info!("RPC listener on {}", self.local_addr);
        let live = Arc::new(AtomicUsize::new(0));
        let mut connections = JoinSet::new();
        // Only sent after the accept loop ends, so no subscriber can miss it.
        let (close_tx, _) = broadcast::channel::<()>(1);

        let result = loop {
            tokio::select! {
                result = self.listener.accept() => {
                    match result {
                        Ok((stream, peer)) => {
                            if live.load(Ordering::Acquire) >= self.max_connections {
                                warn!("Connection limit reached, rejecting {}", peer);
                                continue;
                            }
                            live.fetch_add(1, Ordering::AcqRel);
                            let slot = ConnectionSlot(live.clone());

                            debug!("New connection from {}", peer);
                            connections.spawn(serve_connection(
                                stream,
                                peer,
                                self.service.clone(),
                                self.stats.clone(),
                                close_tx.subscribe(),
                                slot,
                            ));
                        }
                        Err(e) if is_transient_accept_error(&e) => {
                            warn!("Accept error: {}", e);
                            if is_fd_exhaustion(&e) {
                                tokio::time::sleep(ACCEPT_BACKOFF).await;
                            }
                        }
                        Err(e) => {
                            error!("Fatal accept error: {}", e);
                            break Err(TransportError::Accept(e));
                        }
                    }
                }
                Some(_) = connections.join_next(), if !connections.is_empty() => {}
                _ = shutdown.recv() => {
                    info!("RPC listener shutting down");
                    break Ok(());
                }
            }
        };

        let _ = close_tx.send(());
        let drained = timeout(CONNECTION_DRAIN, async {
            while connections.join_next().await.is_some() {}
        })
        .await;
        if drained.is_err() {
            warn!("Aborting {} connections that did not close", connections.len());
            connections.shutdown().await;
        }

        result
    }
}

/// Serve request frames on one connection until it closes.
async fn serve_connection(
    stream: TcpStream,
    peer: SocketAddr,
    service: Arc<dyn PlayerUpdateService>,
    stats: Arc<IngestStats>,
    mut shutdown: broadcast::Receiver<()>,
    _slot: ConnectionSlot,
) {
    let ws_stream = match accept_async(stream).await {
        Ok(ws) => ws,
        Err(e) => {
            debug!("WebSocket handshake failed for {}: {}", peer, e);
            return;
        }
    };
    let (mut ws_sender, mut ws_receiver) = ws_stream.split();

    loop {
        tokio::select! {
            msg = ws_receiver.next() => {
                let reply = match msg {
                    Some(Ok(Message::Text(text))) => {
                        stats.record_received();
                        Some(handle_text(&text, peer, service.as_ref(), &stats))
                    }
                    Some(Ok(Message::Binary(data))) => {
                        stats.record_received();
                        Some(handle_binary(&data, peer, service.as_ref(), &stats))
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        debug!("Client {} disconnected", peer);
                        break;
                    }
                    Some(Err(e)) => {
                        debug!("WebSocket error for {}: {}", peer, e);
                        break;
                    }
                    Some(Ok(_)) => None,
                };

                if let Some(reply) = reply {
                    if let Err(e) = ws_sender.send(reply).await {
                        debug!("Failed to reply to {}: {}", peer, e);
                        break;
                    }
                }
            }
            _ = shutdown.recv() => {
                let _ = ws_sender.send(Message::Close(None)).await;
                break;
            }
        }
    }
}

/// JSON request in, JSON response out.
fn handle_text(
    text: &str,
    peer: SocketAddr,
    service: &dyn PlayerUpdateService,
    stats: &IngestStats,
) -> Message {
    let response = match RpcRequest::from_json(text) {
        Ok(RpcRequest::SubmitPlayerUpdate(request)) => service.submit_player_update(peer, request),
        Err(e) => {
            stats.record_malformed();
            debug!("Invalid request from {}: {}", peer, e);
            SubmitPlayerUpdateResponse::malformed(&DecodeError::Json(e))
        }
    };

    match response.to_json() {
        Ok(json) => Message::Text(json),
        Err(e) => {
            error!("Failed to serialize response: {}", e);
            Message::Text(FALLBACK_RESPONSE.to_string())
        }
    }
}

/// Bincode request in, bincode response out.
fn handle_binary(
    data: &[u8],
    peer: SocketAddr,
    service: &dyn PlayerUpdateService,
    stats: &IngestStats,
) -> Message {
    let response = match SubmitPlayerUpdateRequest::from_bytes(data) {
        Ok(request) => service.submit_player_update(peer, request),
        Err(e) => {
            stats.record_malformed();
            debug!("Invalid binary request from {}: {}", peer, e);
            SubmitPlayerUpdateResponse::malformed(&DecodeError::Binary(e))
        }
    };

    match response.to_bytes() {
        Ok(bytes) => Message::Binary(bytes),
        Err(e) => {
            error!("Failed to serialize response: {}", e);
            Message::Text(FALLBACK_RESPONSE.to_string())
        }
    }
}

/// Accept errors that concern one connection or a passing resource shortage.
fn is_transient_accept_error(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionRefused
            | io::ErrorKind::Interrupted
            | io::ErrorKind::WouldBlock
            | io::ErrorKind::TimedOut
    ) || is_fd_exhaustion(err)
}

/// Out of file descriptors (ENFILE / EMFILE).
#[cfg(unix)]
fn is_fd_exhaustion(err: &io::Error) -> bool {
    matches!(err.raw_os_error(), Some(ENFILE) | Some(EMFILE))
}

#[cfg(not(unix))]
fn is_fd_exhaustion(_err: &io::Error) -> bool {
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::protocol::ResponseStatus;
    use crate::network::sink::{ChannelSink, SinkError};
    use futures_util::Stream;
    use tokio::sync::mpsc;
    use tokio::time::timeout;
    use tokio_tungstenite::connect_async;

    struct ClosedSink;

    impl UpdateSink for ClosedSink {
        fn accept(&self, _update: PlayerUpdate) -> Result<(), SinkError> {
            Err(SinkError::Closed)
        }
    }

    fn peer() -> SocketAddr {
        "127.0.0.1:6000".parse().unwrap()
    }

    fn request(player: &str, hash_of: &str) -> SubmitPlayerUpdateRequest {
        SubmitPlayerUpdateRequest {
            session_hash: derive(hash_of).to_string(),
            player_id: player.into(),
            x: 10.0,
            y: 20.0,
        }
    }

    fn service() -> (IngestionService, mpsc::UnboundedReceiver<PlayerUpdate>) {
        let (sink, rx) = ChannelSink::new();
        (IngestionService::new(Arc::new(sink)), rx)
    }

    #[test]
    fn test_valid_request_ok() {
        let (service, mut rx) = service();
        let response = service.submit_player_update(peer(), request("player_123", "player_123"));

        assert_eq!(response.status, ResponseStatus::Ok);
        assert_eq!(response.message, "Data received");

        let update = rx.try_recv().unwrap();
        assert_eq!(update.player_id, "player_123");
        assert_eq!(update.position(), (10.0, 20.0));
        assert_eq!(update.source, UpdateSource::Rpc);
    }

    #[test]
    fn test_foreign_credential_rejected() {
        let (service, mut rx) = service();
        let response = service.submit_player_update(peer(), request("player_123", "someone_else"));

        assert!(!response.is_ok());
        assert_eq!(response.status, ResponseStatus::InvalidCredential);
        assert!(rx.try_recv().is_err());
        assert_eq!(service.stats().snapshot().rejected, 1);
    }

    #[test]
    fn test_garbage_hash_rejected_not_malformed() {
        let (service, _rx) = service();
        let mut req = request("player_123", "player_123");
        req.session_hash = "zz".into();
        let response = service.submit_player_update(peer(), req);
        assert_eq!(response.status, ResponseStatus::InvalidCredential);
    }

    #[test]
    fn test_empty_player_is_malformed() {
        let (service, mut rx) = service();
        let response = service.submit_player_update(peer(), request("", ""));
        assert_eq!(response.status, ResponseStatus::MalformedRequest);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_sink_failure_is_internal_error() {
        let service = IngestionService::new(Arc::new(ClosedSink));
        let response = service.submit_player_update(peer(), request("p", "p"));
        assert_eq!(response.status, ResponseStatus::InternalError);
        assert_eq!(service.stats().snapshot().sink_failures, 1);
    }

    async fn spawn_listener() -> (
        SocketAddr,
        mpsc::UnboundedReceiver<PlayerUpdate>,
        broadcast::Sender<()>,
        Arc<IngestStats>,
    ) {
        let (service, rx) = service();
        let stats = service.stats();
        let listener = RpcListener::bind("127.0.0.1:0", 16, Arc::new(service), stats.clone())
            .await
            .unwrap();
        let addr = listener.local_addr();
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        tokio::spawn(listener.run(shutdown_rx));
        (addr, rx, shutdown_tx, stats)
    }

    async fn next_reply<S>(ws: &mut S) -> Message
    where
        S: Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
    {
        loop {
            let msg = timeout(Duration::from_secs(5), ws.next())
                .await
                .expect("reply timed out")
                .expect("stream ended")
                .expect("websocket error");
            if matches!(msg, Message::Text(_) | Message::Binary(_)) {
                return msg;
            }
        }
    }

    #[tokio::test]
    async fn test_json_round_trip_over_websocket() {
        let (addr, mut rx, shutdown_tx, _stats) = spawn_listener().await;
        let (mut ws, _) = connect_async(format!("ws://{}", addr)).await.unwrap();

        let ok = RpcRequest::SubmitPlayerUpdate(request("player_123", "player_123"));
        ws.send(Message::Text(ok.to_json().unwrap())).await.unwrap();
        let Message::Text(text) = next_reply(&mut ws).await else {
            panic!("expected text reply");
        };
        let response = SubmitPlayerUpdateResponse::from_json(&text).unwrap();
        assert!(response.is_ok());

        let bad = RpcRequest::SubmitPlayerUpdate(request("player_123", "someone_else"));
        ws.send(Message::Text(bad.to_json().unwrap())).await.unwrap();
        let Message::Text(text) = next_reply(&mut ws).await else {
            panic!("expected text reply");
        };
        let response = SubmitPlayerUpdateResponse::from_json(&text).unwrap();
        assert_eq!(response.status, ResponseStatus::InvalidCredential);

        let update = timeout(Duration::from_secs(5), rx.recv()).await.unwrap().unwrap();
        assert_eq!(update.player_id, "player_123");
        assert!(rx.try_recv().is_err());

        shutdown_tx.send(()).unwrap();
    }

    #[tokio::test]
    async fn test_malformed_frames_get_structural_error() {
        let (addr, _rx, shutdown_tx, stats) = spawn_listener().await;
        let (mut ws, _) = connect_async(format!("ws://{}", addr)).await.unwrap();

        ws.send(Message::Text("{not json".into())).await.unwrap();
        let Message::Text(text) = next_reply(&mut ws).await else {
            panic!("expected text reply");
        };
        let response = SubmitPlayerUpdateResponse::from_json(&text).unwrap();
        assert_eq!(response.status, ResponseStatus::MalformedRequest);

        ws.send(Message::Binary(vec![1, 2, 3])).await.unwrap();
        let Message::Binary(bytes) = next_reply(&mut ws).await else {
            panic!("expected binary reply");
        };
        let response = SubmitPlayerUpdateResponse::from_bytes(&bytes).unwrap();
        assert_eq!(response.status, ResponseStatus::MalformedRequest);

        let snap = stats.snapshot();
        assert_eq!(snap.received, 2);
        assert_eq!(snap.malformed, 2);

        shutdown_tx.send(()).unwrap();
    }

    #[tokio::test]
    async fn test_binary_request() {
        let (addr, mut rx, shutdown_tx, _stats) = spawn_listener().await;
        let (mut ws, _) = connect_async(format!("ws://{}", addr)).await.unwrap();

        let req = request("bin", "bin");
        ws.send(Message::Binary(req.to_bytes().unwrap())).await.unwrap();
        let Message::Binary(bytes) = next_reply(&mut ws).await else {
            panic!("expected binary reply");
        };
        assert!(SubmitPlayerUpdateResponse::from_bytes(&bytes).unwrap().is_ok());
        let update = timeout(Duration::from_secs(5), rx.recv()).await.unwrap().unwrap();
        assert_eq!(update.player_id, "bin");

        shutdown_tx.send(()).unwrap();
    }

    #[tokio::test]
    async fn test_bind_conflict_reported() {
        let (addr, _rx, shutdown_tx, _stats) = spawn_listener().await;
        let (service, _rx2) = service();
        let stats = service.stats();

        let result = RpcListener::bind(&addr.to_string(), 16, Arc::new(service), stats).await;
        assert!(matches!(result, Err(TransportError::Bind { .. })));

        shutdown_tx.send(()).unwrap();
    }

    #[tokio::test]
    async fn test_connection_limit_and_slot_release() {
        let (service, _rx) = service();
        let stats = service.stats();
        let listener = RpcListener::bind("127.0.0.1:0", 1, Arc::new(service), stats)
            .await
            .unwrap();
        let url = format!("ws://{}", listener.local_addr());
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        tokio::spawn(listener.run(shutdown_rx));

        let (mut first, _) = connect_async(url.as_str()).await.unwrap();

        let second = timeout(Duration::from_secs(5), connect_async(url.as_str())).await;
        assert!(
            !matches!(second, Ok(Ok(_))),
            "second connection should be refused at the limit"
        );

        first.close(None).await.unwrap();
        drop(first);

        // The slot frees once the server side of the first connection ends.
        let third = timeout(Duration::from_secs(5), async {
            loop {
                if let Ok((ws, _)) = connect_async(url.as_str()).await {
                    return ws;
                }
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        })
        .await;
        assert!(third.is_ok(), "slot was never released");

        shutdown_tx.send(()).unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_closes_open_connections() {
        let (service, _rx) = service();
        let stats = service.stats();
        let listener = RpcListener::bind("127.0.0.1:0", 16, Arc::new(service), stats)
            .await
            .unwrap();
        let addr = listener.local_addr();
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let task = tokio::spawn(listener.run(shutdown_rx));

        let (mut ws, _) = connect_async(format!("ws://{}", addr)).await.unwrap();
        // One served request proves the connection task is running.
        let req = RpcRequest::SubmitPlayerUpdate(request("p", "p"));
        ws.send(Message::Text(req.to_json().unwrap())).await.unwrap();
        next_reply(&mut ws).await;

        shutdown_tx.send(()).unwrap();
        let result = timeout(Duration::from_secs(5), task).await.unwrap().unwrap();
        assert!(result.is_ok());

        // By the time run() returns, the connection has been closed.
        let closed = timeout(Duration::from_secs(5), async {
            loop {
                match ws.next().await {
                    Some(Ok(Message::Close(_))) | None | Some(Err(_)) => return,
                    Some(Ok(_)) => continue,
                }
            }
        })
        .await;
        assert!(closed.is_ok());
    }

    #[test]
    fn test_accept_error_classification() {
        assert!(is_transient_accept_error(&io::Error::from(io::ErrorKind::ConnectionReset)));
        assert!(is_transient_accept_error(&io::Error::from(io::ErrorKind::ConnectionAborted)));
        assert!(!is_transient_accept_error(&io::Error::from(io::ErrorKind::PermissionDenied)));
        assert!(!is_transient_accept_error(&io::Error::from(io::ErrorKind::InvalidInput)));
    }

    #[cfg(unix)]
    #[test]
    fn test_fd_exhaustion_is_transient() {
        assert!(is_fd_exhaustion(&io::Error::from_raw_os_error(ENFILE)));
        assert!(is_fd_exhaustion(&io::Error::from_raw_os_error(EMFILE)));
        assert!(is_transient_accept_error(&io::Error::from_raw_os_error(EMFILE)));
        assert!(!is_fd_exhaustion(&io::Error::from(io::ErrorKind::ConnectionReset)));
    }
}
