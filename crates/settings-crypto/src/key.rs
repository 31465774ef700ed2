//! Key material and passphrase-based key derivation

use crate::error::{CryptoError, CryptoResult};
use argon2::{Algorithm, Argon2, Params, Version};
use ring::rand::{SecureRandom, SystemRandom};
use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Length of a symmetric key in bytes
pub const KEY_LEN: usize = 32;
/// Length of salts produced by [`generate_salt`]
pub const SALT_LEN: usize = 16;
/// Shortest salt accepted by [`derive_key`]
pub const MIN_SALT_LEN: usize = 8;
/// Longest salt accepted by [`derive_key`] (must fit the envelope's one-byte length)
pub const MAX_SALT_LEN: usize = 64;

/// A 256-bit symmetric key
///
/// The bytes are wiped when the key is dropped. The key never appears in
/// `Debug` output and has no serialization support.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SecretKey {
    bytes: [u8; KEY_LEN],
}

impl SecretKey {
    /// Wrap raw key bytes
    pub fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
        Self { bytes }
    }

    /// Generate a random key from the OS random number generator
    pub fn generate() -> CryptoResult<Self> {
        let mut bytes = [0u8; KEY_LEN];
        fill_random(&mut bytes)?;
        let key = Self { bytes };
        bytes.zeroize();
        Ok(key)
    }

    /// Borrow the raw key bytes
    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.bytes
    }
}

impl fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SecretKey([REDACTED])")
    }
}

/// Derive a key from a passphrase with Argon2id (v1.3, m=19456 KiB, t=2, p=1)
///
/// The same passphrase and salt always produce the same key.
pub fn derive_key(passphrase: &[u8], salt: &[u8]) -> CryptoResult<SecretKey> {
    if salt.len() < MIN_SALT_LEN || salt.len() > MAX_SALT_LEN {
        return Err(CryptoError::KeyDerivation(format!(
            "salt must be {}..={} bytes, got {}",
            MIN_SALT_LEN,
            MAX_SALT_LEN,
            salt.len()
        )));
    }

    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, Params::default());
    let mut bytes = [0u8; KEY_LEN];
    argon2
        .hash_password_into(passphrase, salt, &mut bytes)
        .map_err(|e| CryptoError::KeyDerivation(e.to_string()))?;

    let key = SecretKey::from_bytes(bytes);
    bytes.zeroize();
    Ok(key)
}

/// Generate a random salt for [`derive_key`]
pub fn generate_salt() -> CryptoResult<[u8; SALT_LEN]> {
    let mut salt = [0u8; SALT_LEN];
    fill_random(&mut salt)?;
    Ok(salt)
}

pub(crate) fn fill_random(buf: &mut [u8]) -> CryptoResult<()> {
    SystemRandom::new().fill(buf).map_err(|_| CryptoError::Rng)
}
