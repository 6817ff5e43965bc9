//! # Player Ingest
//!
//! Dual-protocol ingestion front-end for player position updates.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      PLAYER INGEST                           │
//! ├─────────────────────────────────────────────────────────────┤
//! │  core/            - Pure logic, no I/O                       │
//! │  ├── credential.rs- SHA-256 session credentials              │
//! │  └── update.rs    - Normalized PlayerUpdate record           │
//! │                                                              │
//! │  network/         - Listeners (tokio)                        │
//! │  ├── protocol.rs  - Datagram framing, RPC messages           │
//! │  ├── datagram.rs  - UDP listener (fire-and-forget)           │
//! │  ├── rpc.rs       - WebSocket request/response service       │
//! │  ├── server.rs    - ServerGroup supervision + config         │
//! │  ├── sink.rs      - Downstream UpdateSink                    │
//! │  ├── stats.rs     - Per-listener counters                    │
//! │  └── error.rs     - TransportError                           │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Credential Caveat
//!
//! A credential is `hex(SHA-256(player_id))`. There is no server secret and
//! no expiry, so it only shows that the sender knows the player id. It is not
//! a security boundary and offers no replay protection.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod core;
pub mod network;

// Re-export commonly used types
pub use crate::core::credential::{derive, validate, SessionCredential};
pub use crate::core::update::{PlayerIdentity, PlayerUpdate, UpdateSource};
pub use network::{
    ChannelSink, LogSink, ServerConfig, ServerGroup, ShutdownHandle, TransportError, UpdateSink,
};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
