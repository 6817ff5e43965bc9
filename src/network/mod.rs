//! Network Layer
//!
//! The two ingestion listeners, their wire formats, the downstream sink
//! interface and the group that supervises both listeners.

pub mod datagram;
pub mod error;
pub mod protocol;
pub mod rpc;
pub mod server;
pub mod sink;
pub mod stats;

pub use datagram::{DatagramIngestionListener, DatagramOutcome};
pub use error::TransportError;
pub use protocol::{
    DatagramUpdate, DecodeError, ResponseStatus, RpcRequest, SubmitPlayerUpdateRequest,
    SubmitPlayerUpdateResponse,
};
pub use rpc::{IngestionService, PlayerUpdateService, RpcListener};
pub use server::{ServerConfig, ServerGroup, ShutdownHandle};
pub use sink::{ChannelSink, LogSink, SinkError, UpdateSink};
pub use stats::{IngestStats, StatsSnapshot};
