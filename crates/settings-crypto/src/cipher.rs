//! Authenticated encryption with ChaCha20-Poly1305
//!
//! A [`CipherBlob`] carries everything needed to decrypt besides the key:
//! the 96-bit nonce, the ciphertext and the 128-bit Poly1305 tag. Nonces are
//! drawn from the OS random number generator on every call, so a key can be
//! reused across many encryptions without nonce reuse in practice.

use crate::error::{CryptoError, CryptoResult};
use crate::key::{fill_random, SecretKey};
use chacha20poly1305::aead::{AeadInPlace, KeyInit};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce, Tag};
use zeroize::{Zeroize, Zeroizing};

/// Nonce length in bytes
pub const NONCE_LEN: usize = 12;
/// Authentication tag length in bytes
pub const TAG_LEN: usize = 16;

/// Output of [`encrypt`]: nonce, ciphertext and integrity tag
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CipherBlob {
    nonce: [u8; NONCE_LEN],
    ciphertext: Vec<u8>,
    tag: [u8; TAG_LEN],
}

impl CipherBlob {
    /// Assemble a blob from already-sized parts
    pub fn new(nonce: [u8; NONCE_LEN], ciphertext: Vec<u8>, tag: [u8; TAG_LEN]) -> Self {
        Self { nonce, ciphertext, tag }
    }

    /// Assemble a blob from untrusted slices, checking their lengths
    pub fn from_parts(nonce: &[u8], ciphertext: Vec<u8>, tag: &[u8]) -> CryptoResult<Self> {
        let nonce: [u8; NONCE_LEN] = nonce.try_into().map_err(|_| {
            CryptoError::format(format!("nonce must be {} bytes, got {}", NONCE_LEN, nonce.len()))
        })?;
        let tag: [u8; TAG_LEN] = tag.try_into().map_err(|_| {
            CryptoError::format(format!("tag must be {} bytes, got {}", TAG_LEN, tag.len()))
        })?;
        Ok(Self::new(nonce, ciphertext, tag))
    }

    /// Parse `nonce || ciphertext || tag`
    pub fn from_bytes(bytes: &[u8]) -> CryptoResult<Self> {
        if bytes.len() < NONCE_LEN + TAG_LEN {
            return Err(CryptoError::format(format!(
                "cipher blob must be at least {} bytes, got {}",
                NONCE_LEN + TAG_LEN,
                bytes.len()
            )));
        }
        let (nonce, rest) = bytes.split_at(NONCE_LEN);
        let (ciphertext, tag) = rest.split_at(rest.len() - TAG_LEN);
        Self::from_parts(nonce, ciphertext.to_vec(), tag)
    }

    /// Encode as `nonce || ciphertext || tag`
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.encoded_len());
        out.extend_from_slice(&self.nonce);
        out.extend_from_slice(&self.ciphertext);
        out.extend_from_slice(&self.tag);
        out
    }

    pub fn encoded_len(&self) -> usize {
        NONCE_LEN + self.ciphertext.len() + TAG_LEN
    }

    pub fn nonce(&self) -> &[u8; NONCE_LEN] {
        &self.nonce
    }

    pub fn ciphertext(&self) -> &[u8] {
        &self.ciphertext
    }

    pub fn tag(&self) -> &[u8; TAG_LEN] {
        &self.tag
    }
}

/// Encrypt `plaintext` under `key` with a fresh random nonce
pub fn encrypt(plaintext: &[u8], key: &SecretKey) -> CryptoResult<CipherBlob> {
    encrypt_with_aad(plaintext, &[], key)
}

/// Decrypt a blob produced by [`encrypt`]
///
/// Returns [`CryptoError::Integrity`] if the tag does not verify.
pub fn decrypt(blob: &CipherBlob, key: &SecretKey) -> CryptoResult<Zeroizing<Vec<u8>>> {
    decrypt_with_aad(blob, &[], key)
}

/// Encrypt and additionally authenticate `aad`, which is not stored in the blob
pub fn encrypt_with_aad(plaintext: &[u8], aad: &[u8], key: &SecretKey) -> CryptoResult<CipherBlob> {
    let cipher = ChaCha20Poly1305::new(Key::from_slice(key.as_bytes()));

    let mut nonce = [0u8; NONCE_LEN];
    fill_random(&mut nonce)?;

    let mut buffer = plaintext.to_vec();
    let tag = match cipher.encrypt_in_place_detached(Nonce::from_slice(&nonce), aad, &mut buffer) {
        Ok(tag) => tag,
        Err(_) => {
            buffer.zeroize();
            return Err(CryptoError::Encryption);
        }
    };

    let mut tag_bytes = [0u8; TAG_LEN];
    tag_bytes.copy_from_slice(tag.as_slice());

    Ok(CipherBlob::new(nonce, buffer, tag_bytes))
}

/// Decrypt a blob whose tag also covers `aad`
pub fn decrypt_with_aad(
    blob: &CipherBlob,
    aad: &[u8],
    key: &SecretKey,
) -> CryptoResult<Zeroizing<Vec<u8>>> {
    let cipher = ChaCha20Poly1305::new(Key::from_slice(key.as_bytes()));

    let mut buffer = Zeroizing::new(blob.ciphertext.clone());
    cipher
        .decrypt_in_place_detached(
            Nonce::from_slice(&blob.nonce),
            aad,
            buffer.as_mut_slice(),
            Tag::from_slice(&blob.tag),
        )
        .map_err(|_| CryptoError::Integrity)?;

    Ok(buffer)
}
