//! Player Updates
//!
//! The normalized record both listeners hand to the downstream sink once a
//! payload has been decoded and its credential checked.

use std::fmt;
use std::net::SocketAddr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::credential::SessionCredential;

/// Opaque player identity supplied by the client.
pub type PlayerIdentity = String;

/// Which listener accepted an update.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateSource {
    /// Unreliable UDP listener.
    Datagram,
    /// WebSocket request/response listener.
    Rpc,
}

impl fmt::Display for UpdateSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UpdateSource::Datagram => f.write_str("datagram"),
            UpdateSource::Rpc => f.write_str("rpc"),
        }
    }
}

/// A validated player position update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerUpdate {
    /// Credential that was checked against `player_id`.
    pub credential: SessionCredential,
    /// Player the update belongs to.
    pub player_id: PlayerIdentity,
    /// Position X.
    pub x: f64,
    /// Position Y.
    pub y: f64,
    /// Transport the update arrived on.
    pub source: UpdateSource,
    /// Sender address.
    pub peer: SocketAddr,
    /// Time the listener accepted the update.
    pub received_at: DateTime<Utc>,
}

impl PlayerUpdate {
    /// Build an update from fields that already passed validation.
    pub fn new(
        credential: SessionCredential,
        player_id: impl Into<PlayerIdentity>,
        x: f64,
        y: f64,
        source: UpdateSource,
        peer: SocketAddr,
    ) -> Self {
        Self {
            credential,
            player_id: player_id.into(),
            x,
            y,
            source,
            peer,
            received_at: Utc::now(),
        }
    }

    /// Position as a tuple.
    pub fn position(&self) -> (f64, f64) {
        (self.x, self.y)
    }
}
