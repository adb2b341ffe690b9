//! Error types for key operations.

use thiserror::Error;

/// Errors that can occur while decoding or deriving keys.
#[derive(Debug, Error)]
pub enum KeyError {
    /// Invalid base64 encoding.
    #[error("invalid base64 encoding: {0}")]
    InvalidBase64(String),

    /// Invalid key length.
    #[error("invalid key length: expected 32, got {0}")]
    InvalidKeyLength(usize),
}
