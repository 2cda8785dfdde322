//! # CA Errors
//!
//! Failure classes reported by the certificate authority.

use thiserror::Error;

/// Certificate authority errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CaError {
    /// Random source, key generation or signing failed
    #[error("crypto failure: {0}")]
    CryptoFailure(String),

    /// PEM or X.509 input could not be parsed
    #[error("decode failure: {0}")]
    DecodeFailure(String),

    /// Request fields cannot be encoded into a certificate
    #[error("invalid certificate request: {0}")]
    InvalidRequest(String),

    /// Persisted root is not usable as a signing CA
    #[error("invalid root certificate: {0}")]
    InvalidRoot(String),
}

impl CaError {
    /// Short label used for metrics and structured logs
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            CaError::CryptoFailure(_) => "crypto_failure",
            CaError::DecodeFailure(_) => "decode_failure",
            CaError::InvalidRequest(_) => "invalid_request",
            CaError::InvalidRoot(_) => "invalid_root",
        }
    }
}

/// Result type for CA operations
pub type Result<T> = std::result::Result<T, CaError>;
