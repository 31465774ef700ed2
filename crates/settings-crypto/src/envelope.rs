//! On-disk format for encrypted `.env` files
//!
//! # Byte Layout
//!
//! ```text
//! offset    len  field
//! 0         4    magic "SENV"
//! 4         1    format version (0x01)
//! 5         1    salt length S
//! 6         S    Argon2id salt
//! 6+S       12   ChaCha20-Poly1305 nonce
//! 18+S      N    ciphertext
//! 18+S+N    16   Poly1305 tag
//! ```
//!
//! The header (`magic || version || S || salt`) is authenticated as
//! associated data, so editing the salt or version byte is detected as an
//! integrity failure rather than silently producing a different key.
//!
//! The key is derived from the passphrase inside [`Envelope::seal`] and
//! [`Envelope::open`] and dropped (zeroized) before they return.

use crate::cipher::{decrypt_with_aad, encrypt_with_aad, CipherBlob, NONCE_LEN, TAG_LEN};
use crate::error::{CryptoError, CryptoResult};
use crate::key::{derive_key, generate_salt, MAX_SALT_LEN, MIN_SALT_LEN};
use zeroize::Zeroizing;

/// File magic
pub const MAGIC: &[u8; 4] = b"SENV";
/// Current envelope version
pub const FORMAT_VERSION: u8 = 1;

// magic + version + salt length
const HEADER_FIXED_LEN: usize = 6;

/// Salt plus cipher blob, as stored on disk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    salt: Vec<u8>,
    blob: CipherBlob,
}

impl Envelope {
    /// Encrypt `plaintext` under a key derived from `passphrase` and a new salt
    pub fn seal(plaintext: &[u8], passphrase: &[u8]) -> CryptoResult<Self> {
        let salt = generate_salt()?.to_vec();
        let key = derive_key(passphrase, &salt)?;
        let blob = encrypt_with_aad(plaintext, &header_bytes(&salt), &key)?;
        Ok(Self { salt, blob })
    }

    /// Derive the key from `passphrase` and decrypt
    ///
    /// A wrong passphrase yields [`CryptoError::Integrity`].
    pub fn open(&self, passphrase: &[u8]) -> CryptoResult<Zeroizing<Vec<u8>>> {
        let key = derive_key(passphrase, &self.salt)?;
        decrypt_with_aad(&self.blob, &header_bytes(&self.salt), &key)
    }

    /// Whether `bytes` start with the envelope magic
    pub fn is_envelope(bytes: &[u8]) -> bool {
        bytes.starts_with(MAGIC)
    }

    /// Parse the fixed byte layout
    pub fn from_bytes(bytes: &[u8]) -> CryptoResult<Self> {
        if bytes.len() < HEADER_FIXED_LEN {
            return Err(CryptoError::format("truncated header"));
        }
        if !Self::is_envelope(bytes) {
            return Err(CryptoError::format("not an encrypted settings file (bad magic)"));
        }

        let version = bytes[4];
        if version != FORMAT_VERSION {
            return Err(CryptoError::format(format!(
                "unsupported format version {} (supported: {})",
                version, FORMAT_VERSION
            )));
        }

        let salt_len = bytes[5] as usize;
        if !(MIN_SALT_LEN..=MAX_SALT_LEN).contains(&salt_len) {
            return Err(CryptoError::format(format!("invalid salt length {}", salt_len)));
        }

        let body = &bytes[HEADER_FIXED_LEN..];
        if body.len() < salt_len + NONCE_LEN + TAG_LEN {
            return Err(CryptoError::format(format!(
                "truncated body: need at least {} bytes after header, got {}",
                salt_len + NONCE_LEN + TAG_LEN,
                body.len()
            )));
        }

        let (salt, rest) = body.split_at(salt_len);
        let blob = CipherBlob::from_bytes(rest)?;

        Ok(Self {
            salt: salt.to_vec(),
            blob,
        })
    }

    /// Encode into the fixed byte layout
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = header_bytes(&self.salt);
        out.reserve(self.blob.encoded_len());
        out.extend_from_slice(&self.blob.to_bytes());
        out
    }

    pub fn salt(&self) -> &[u8] {
        &self.salt
    }

    pub fn blob(&self) -> &CipherBlob {
        &self.blob
    }
}

fn header_bytes(salt: &[u8]) -> Vec<u8> {
    let mut header = Vec::with_capacity(HEADER_FIXED_LEN + salt.len());
    header.extend_from_slice(MAGIC);
    header.push(FORMAT_VERSION);
    // Salt length is bounded by MAX_SALT_LEN, which fits in one byte
    header.push(salt.len() as u8);
    header.extend_from_slice(salt);
    header
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::SALT_LEN;

    const PLAINTEXT: &[u8] = b"APP_NAME=Base\nDATABASE__USER=admin\n";

    #[test]
    fn test_seal_and_open() {
        let envelope = Envelope::seal(PLAINTEXT, b"hunter2").unwrap();
        let bytes = envelope.to_bytes();

        let parsed = Envelope::from_bytes(&bytes).unwrap();
        assert_eq!(parsed, envelope);
        assert_eq!(parsed.open(b"hunter2").unwrap().as_slice(), PLAINTEXT);
    }

    #[test]
    fn test_wrong_passphrase_is_integrity_error() {
        let envelope = Envelope::seal(PLAINTEXT, b"right").unwrap();
        assert_eq!(envelope.open(b"wrong").unwrap_err(), CryptoError::Integrity);
    }

    #[test]
    fn test_layout_offsets() {
        let envelope = Envelope::seal(b"xyz", b"pw").unwrap();
        let bytes = envelope.to_bytes();

        assert_eq!(&bytes[0..4], b"SENV");
        assert_eq!(bytes[4], FORMAT_VERSION);
        assert_eq!(bytes[5] as usize, SALT_LEN);
        assert_eq!(&bytes[6..6 + SALT_LEN], envelope.salt());
        assert_eq!(&bytes[6 + SALT_LEN..18 + SALT_LEN], envelope.blob().nonce());
        assert_eq!(bytes.len(), 6 + SALT_LEN + NONCE_LEN + 3 + TAG_LEN);
        assert_eq!(&bytes[bytes.len() - TAG_LEN..], envelope.blob().tag());
    }

    #[test]
    fn test_tampered_salt_is_integrity_error() {
        let envelope = Envelope::seal(PLAINTEXT, b"pw").unwrap();
        let mut bytes = envelope.to_bytes();
        bytes[6] ^= 0xFF;

        let parsed = Envelope::from_bytes(&bytes).unwrap();
        assert_eq!(parsed.open(b"pw").unwrap_err(), CryptoError::Integrity);
    }

    #[test]
    fn test_tampered_ciphertext_is_integrity_error() {
        let envelope = Envelope::seal(PLAINTEXT, b"pw").unwrap();
        let mut bytes = envelope.to_bytes();
        let idx = 6 + SALT_LEN + NONCE_LEN + 2;
        bytes[idx] ^= 0x10;

        let parsed = Envelope::from_bytes(&bytes).unwrap();
        assert_eq!(parsed.open(b"pw").unwrap_err(), CryptoError::Integrity);
    }

    #[test]
    fn test_malformed_inputs_are_format_errors() {
        assert!(matches!(Envelope::from_bytes(b"SEN"), Err(CryptoError::Format(_))));
        assert!(matches!(
            Envelope::from_bytes(b"NOPE\x01\x10aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa"),
            Err(CryptoError::Format(_))
        ));

        let envelope = Envelope::seal(b"data", b"pw").unwrap();
        let bytes = envelope.to_bytes();

        let mut bad_version = bytes.clone();
        bad_version[4] = 9;
        assert!(matches!(Envelope::from_bytes(&bad_version), Err(CryptoError::Format(_))));

        let mut bad_salt_len = bytes.clone();
        bad_salt_len[5] = 2;
        assert!(matches!(Envelope::from_bytes(&bad_salt_len), Err(CryptoError::Format(_))));

        let truncated = &bytes[..6 + SALT_LEN + NONCE_LEN + TAG_LEN - 1];
        assert!(matches!(Envelope::from_bytes(truncated), Err(CryptoError::Format(_))));
    }

    #[test]
    fn test_is_envelope() {
        assert!(Envelope::is_envelope(b"SENV\x01..."));
        assert!(!Envelope::is_envelope(b"APP_NAME=x"));
    }
}
