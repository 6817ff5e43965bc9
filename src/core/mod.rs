//! Core Primitives
//!
//! Transport-independent pieces: the credential scheme and the normalized
//! update record. Nothing here performs I/O.

pub mod credential;
pub mod update;

pub use credential::{derive, validate, SessionCredential, CREDENTIAL_HEX_LEN};
pub use update::{PlayerIdentity, PlayerUpdate, UpdateSource};
