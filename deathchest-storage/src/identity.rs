//! Player identifier encoding.
//!
//! Identifiers are stored as canonical hyphenated UUID text (36 chars).
//! Decoding never panics; each call site picks its own policy:
//! - writes require an owner ([`encode_owner`])
//! - single lookups tolerate a bad owner ([`decode_lenient`])
//! - full scans drop rows with a bad owner ([`decode`] + skip)

use uuid::Uuid;

use crate::error::{IdentityError, StorageError};

/// Length of the canonical hyphenated form.
pub const ENCODED_LEN: usize = 36;

/// Parse a stored identifier.
pub fn decode(raw: Option<&str>) -> Result<Uuid, IdentityError> {
    let raw = raw.ok_or(IdentityError::Missing)?;
    Uuid::try_parse(raw.trim()).map_err(|_| IdentityError::Malformed(raw.to_string()))
}

/// Parse a stored identifier, treating anything unusable as absent.
pub fn decode_lenient(raw: Option<&str>, column: &str) -> Option<Uuid> {
    match decode(raw) {
        Ok(id) => Some(id),
        Err(IdentityError::Missing) => None,
        Err(e) => {
            log::warn!("Ignoring {} value: {}", column, e);
            None
        }
    }
}

/// Canonical text for a record owner. Absence aborts the write.
pub fn encode_owner(owner: Option<Uuid>) -> Result<String, StorageError> {
    owner
        .map(|id| id.hyphenated().to_string())
        .ok_or(StorageError::InvalidOwnerIdentity)
}

/// Canonical text for an optional killer, `None` maps to SQL NULL.
pub fn encode_killer(killer: Option<Uuid>) -> Option<String> {
    killer.map(|id| id.hyphenated().to_string())
}
