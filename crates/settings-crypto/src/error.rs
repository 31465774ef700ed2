//! Error types for cryptographic operations

use thiserror::Error;

/// Errors that can occur while deriving keys, encrypting or decrypting
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CryptoError {
    /// Argon2 rejected the inputs (salt too short, parameters invalid)
    #[error("Key derivation failed: {0}")]
    KeyDerivation(String),

    /// The authentication tag did not verify: wrong key, wrong nonce or
    /// tampered ciphertext
    #[error("Integrity check failed: wrong passphrase or tampered data")]
    Integrity,

    /// The encrypted data is structurally malformed
    #[error("Malformed encrypted data: {0}")]
    Format(String),

    /// The cipher refused to encrypt (payload exceeds the AEAD limit)
    #[error("Encryption failed")]
    Encryption,

    /// The operating system random number generator failed
    #[error("Secure random number generator unavailable")]
    Rng,
}

impl CryptoError {
    /// Create a format error
    pub fn format(msg: impl Into<String>) -> Self {
        CryptoError::Format(msg.into())
    }

    /// Whether this error means the data could not be authenticated
    pub fn is_integrity_failure(&self) -> bool {
        matches!(self, CryptoError::Integrity)
    }
}

/// Result type alias for cryptographic operations
pub type CryptoResult<T> = Result<T, CryptoError>;
