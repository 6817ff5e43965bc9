//! Session Credentials
//!
//! A session credential is the lowercase-hex SHA-256 digest of a player
//! identity. It carries no secret, no expiry and no nonce: anyone who knows
//! the identity can regenerate it, and a captured pair stays valid forever.
//! Treat it as a content fingerprint that weakly proves knowledge of the
//! identity, not as a capability token.

use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Raw digest length in bytes.
pub const CREDENTIAL_BYTES: usize = 32;

/// Hex-encoded credential length in characters.
pub const CREDENTIAL_HEX_LEN: usize = CREDENTIAL_BYTES * 2;

/// Hex-encoded SHA-256 digest of a player identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct SessionCredential(String);

/// Candidate string is not 64 lowercase hex characters.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("malformed session credential")]
pub struct MalformedCredential;

impl SessionCredential {
    /// Derive the credential for an identity. Never fails, empty string included.
    pub fn derive(identity: &str) -> Self {
        let digest: [u8; CREDENTIAL_BYTES] = Sha256::digest(identity.as_bytes()).into();
        Self(hex::encode(digest))
    }

    /// Accept a candidate only if it is exactly 64 lowercase hex characters.
    ///
    /// This checks shape, not validity for any identity. Use [`validate`]
    /// for the latter.
    pub fn parse(candidate: &str) -> Option<Self> {
        let well_formed = candidate.len() == CREDENTIAL_HEX_LEN
            && candidate
                .bytes()
                .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b));
        well_formed.then(|| Self(candidate.to_owned()))
    }

    /// Check this credential against an identity.
    pub fn matches(&self, identity: &str) -> bool {
        validate(&self.0, identity)
    }

    /// The hex string as sent on the wire.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Decode back to raw digest bytes.
    pub fn to_bytes(&self) -> [u8; CREDENTIAL_BYTES] {
        let mut out = [0u8; CREDENTIAL_BYTES];
        // Every constructor yields 64 lowercase hex chars, so this cannot fail.
        let _ = hex::decode_to_slice(&self.0, &mut out);
        out
    }
}

impl fmt::Display for SessionCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for SessionCredential {
    type Error = MalformedCredential;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value).ok_or(MalformedCredential)
    }
}

impl From<SessionCredential> for String {
    fn from(cred: SessionCredential) -> Self {
        cred.0
    }
}

impl AsRef<str> for SessionCredential {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Derive the credential for an identity.
#[inline]
pub fn derive(identity: &str) -> SessionCredential {
    SessionCredential::derive(identity)
}

/// Returns `candidate == derive(identity)`.
///
/// Malformed candidates (wrong length, non-hex, uppercase, empty) simply
/// compare unequal. The comparison is not constant-time.
pub fn validate(candidate: &str, identity: &str) -> bool {
    if candidate.len() != CREDENTIAL_HEX_LEN {
        return false;
    }
    derive(identity).as_str() == candidate
}

// =============================================================================
// TESTS
// =============================================================================
