//! Protocol Messages
//!
//! Wire formats for both ingestion transports.
//!
//! ## Datagram framing (version 1)
//!
//! The first byte of a UDP payload selects the framing:
//!
//! - `{` : UTF-8 JSON object
//!   `{"v":1,"playerId":"..","sessionHash":"..","x":0.0,"y":0.0}`.
//!   `v` is required and must equal [`DATAGRAM_VERSION`].
//! - `0x01` ([`DATAGRAM_VERSION`]): followed by the bincode encoding of
//!   [`DatagramUpdate`], i.e. `playerId` and `sessionHash` as u64-LE length
//!   prefixed UTF-8, then `x` and `y` as little-endian f64.
//!
//! Any other leading byte is rejected, as are bytes left over after the
//! bincode body (binary RPC requests follow the same rule). UDP offers no
//! schema negotiation, so a format change must bump the version.
//!
//! ## RPC messages
//!
//! One request per WebSocket frame, one response frame back. Text frames carry
//! JSON ([`RpcRequest`] / [`SubmitPlayerUpdateResponse`]), binary frames carry
//! bincode ([`SubmitPlayerUpdateRequest`] / [`SubmitPlayerUpdateResponse`]).

use bincode::Options;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Current datagram framing version.
pub const DATAGRAM_VERSION: u8 = 1;

/// Fixed-width little-endian bincode that refuses trailing input.
fn wire_codec() -> impl Options {
    bincode::DefaultOptions::new()
        .with_fixint_encoding()
        .reject_trailing_bytes()
}

/// Leading byte of JSON datagrams.
const JSON_MARKER: u8 = b'{';

/// Payload decoding failures.
#[derive(Debug, Error)]
pub enum DecodeError {
    /// Nothing to decode.
    #[error("empty payload")]
    Empty,
    /// Leading byte is neither `{` nor a known version.
    #[error("unsupported framing byte 0x{0:02x}")]
    UnsupportedFraming(u8),
    /// JSON envelope carries an unknown version.
    #[error("unsupported datagram version {0}")]
    UnsupportedVersion(u8),
    /// JSON decoding error.
    #[error("invalid json: {0}")]
    Json(#[from] serde_json::Error),
    /// Binary decoding error.
    #[error("invalid binary payload: {0}")]
    Binary(#[from] bincode::Error),
    /// `playerId` is empty.
    #[error("player id is empty")]
    EmptyIdentity,
    /// `x` or `y` is NaN or infinite.
    #[error("coordinate {axis} is not finite")]
    NonFiniteCoordinate {
        /// Offending axis name.
        axis: &'static str,
    },
}

/// Structural checks shared by both transports.
pub fn check_update_fields(player_id: &str, x: f64, y: f64) -> Result<(), DecodeError> {
    if player_id.is_empty() {
        return Err(DecodeError::EmptyIdentity);
    }
    if !x.is_finite() {
        return Err(DecodeError::NonFiniteCoordinate { axis: "x" });
    }
    if !y.is_finite() {
        return Err(DecodeError::NonFiniteCoordinate { axis: "y" });
    }
    Ok(())
}

// =============================================================================
// DATAGRAM
// =============================================================================

/// Credential-bearing position update carried in one datagram.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatagramUpdate {
    /// Player identity.
    pub player_id: String,
    /// Hex credential, unchecked at this layer.
    pub session_hash: String,
    /// Position X.
    pub x: f64,
    /// Position Y.
    pub y: f64,
}

/// JSON envelope: the update plus its version tag.
#[derive(Serialize, Deserialize)]
struct JsonDatagram<T> {
    v: u8,
    #[serde(flatten)]
    update: T,
}

impl DatagramUpdate {
    /// Decode a raw datagram and run the structural checks.
    pub fn decode(payload: &[u8]) -> Result<Self, DecodeError> {
        let update = match payload.first() {
            None => return Err(DecodeError::Empty),
            Some(&JSON_MARKER) => {
                let envelope: JsonDatagram<DatagramUpdate> = serde_json::from_slice(payload)?;
                if envelope.v != DATAGRAM_VERSION {
                    return Err(DecodeError::UnsupportedVersion(envelope.v));
                }
                envelope.update
            }
            Some(&DATAGRAM_VERSION) => wire_codec().deserialize(&payload[1..])?,
            Some(&other) => return Err(DecodeError::UnsupportedFraming(other)),
        };

        check_update_fields(&update.player_id, update.x, update.y)?;
        Ok(update)
    }

    /// Encode as a versioned JSON datagram.
    pub fn to_json_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(&JsonDatagram {
            v: DATAGRAM_VERSION,
            update: self,
        })
    }

    /// Encode as a versioned binary datagram.
    pub fn to_bytes(&self) -> Result<Vec<u8>, bincode::Error> {
        let body = wire_codec().serialize(self)?;
        let mut out = Vec::with_capacity(body.len() + 1);
        out.push(DATAGRAM_VERSION);
        out.extend_from_slice(&body);
        Ok(out)
    }
}

// =============================================================================
// RPC
// =============================================================================

/// Operations exposed over the RPC transport (JSON frames).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method")]
pub enum RpcRequest {
    /// Submit a player position update.
    SubmitPlayerUpdate(SubmitPlayerUpdateRequest),
}

/// `SubmitPlayerUpdate` request fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitPlayerUpdateRequest {
    /// Hex credential for `player_id`.
    pub session_hash: String,
    /// Player identity, non-empty.
    pub player_id: String,
    /// Position X.
    pub x: f64,
    /// Position Y.
    pub y: f64,
}

/// Response status codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResponseStatus {
    /// Update accepted and forwarded.
    Ok,
    /// Credential does not match the player id.
    InvalidCredential,
    /// Request could not be decoded or failed structural checks.
    MalformedRequest,
    /// Downstream forwarding failed.
    InternalError,
}

/// `SubmitPlayerUpdate` response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmitPlayerUpdateResponse {
    /// Outcome code.
    pub status: ResponseStatus,
    /// Human-readable detail.
    pub message: String,
}

impl SubmitPlayerUpdateResponse {
    /// Successful acknowledgement.
    pub fn ok() -> Self {
        Self {
            status: ResponseStatus::Ok,
            message: "Data received".to_string(),
        }
    }

    /// Credential mismatch.
    pub fn invalid_credential() -> Self {
        Self {
            status: ResponseStatus::InvalidCredential,
            message: "Session hash does not match player id".to_string(),
        }
    }

    /// Structural rejection.
    pub fn malformed(err: &DecodeError) -> Self {
        Self {
            status: ResponseStatus::MalformedRequest,
            message: format!("Malformed request: {}", err),
        }
    }

    /// Server-side failure.
    pub fn internal(message: impl Into<String>) -> Self {
        Self {
            status: ResponseStatus::InternalError,
            message: message.into(),
        }
    }

    /// Whether the status is `OK`.
    pub fn is_ok(&self) -> bool {
        self.status == ResponseStatus::Ok
    }

    /// Serialize to JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from JSON string.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }

    /// Serialize to binary.
    pub fn to_bytes(&self) -> Result<Vec<u8>, bincode::Error> {
        wire_codec().serialize(self)
    }

    /// Deserialize from binary.
    pub fn from_bytes(data: &[u8]) -> Result<Self, bincode::Error> {
        wire_codec().deserialize(data)
    }
}

impl RpcRequest {
    /// Serialize to JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from JSON string.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}

impl SubmitPlayerUpdateRequest {
    /// Serialize to binary.
    ///
    /// Tagged enums are not supported by bincode, so binary frames carry the
    /// request struct directly.
    pub fn to_bytes(&self) -> Result<Vec<u8>, bincode::Error> {
        wire_codec().serialize(self)
    }

    /// Deserialize from binary.
    pub fn from_bytes(data: &[u8]) -> Result<Self, bincode::Error> {
        wire_codec().deserialize(data)
    }
}
