//! Input validation for client-supplied identifiers and keys

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;

use crate::{Error, Result};

/// Bounds on a decoded public key, in bytes
pub const MIN_PUBLIC_KEY_LEN: usize = 32;
pub const MAX_PUBLIC_KEY_LEN: usize = 8192;

pub const MAX_ID_LEN: usize = 128;

/// Validate a base64-encoded public key and return it trimmed.
///
/// The server never interprets the key; it only checks that it is standard
/// base64 and that the decoded size is plausible for a public key.
pub fn validate_public_key(key: &str) -> Result<String> {
    let key = key.trim();
    if key.is_empty() {
        return Err(Error::InvalidPublicKey("public key is empty".to_string()));
    }

    let decoded = STANDARD
        .decode(key)
        .map_err(|e| Error::InvalidPublicKey(format!("not valid base64: {e}")))?;

    if !(MIN_PUBLIC_KEY_LEN..=MAX_PUBLIC_KEY_LEN).contains(&decoded.len()) {
        return Err(Error::InvalidPublicKey(format!(
            "decoded length {} is outside {MIN_PUBLIC_KEY_LEN}..={MAX_PUBLIC_KEY_LEN} bytes",
            decoded.len()
        )));
    }

    Ok(key.to_string())
}

/// Check a room slug or participant ID
#[must_use]
pub fn is_valid_id(id: &str) -> bool {
    !id.is_empty() && id.len() <= MAX_ID_LEN && !id.chars().any(char::is_control)
}
