//! Encryption primitives for protecting `.env` files at rest
//!
//! This crate provides the building blocks used by `settings-core` to read
//! and write encrypted configuration files:
//!
//! - **Key derivation**: Argon2id over a passphrase and a random salt
//! - **Authenticated encryption**: ChaCha20-Poly1305 with a fresh random
//!   nonce per call
//! - **Envelope**: a fixed byte layout (header + salt + nonce + ciphertext +
//!   tag) so independent implementations can interoperate
//!
//! Decryption always fails closed: a tag that does not verify yields
//! [`CryptoError::Integrity`] and no plaintext is released.
//!
//! # Example
//!
//! ```rust
//! use settings_crypto::Envelope;
//!
//! let envelope = Envelope::seal(b"DATABASE__USER=admin\n", b"correct horse").unwrap();
//! let bytes = envelope.to_bytes();
//!
//! let parsed = Envelope::from_bytes(&bytes).unwrap();
//! let plaintext = parsed.open(b"correct horse").unwrap();
//! assert_eq!(plaintext.as_slice(), b"DATABASE__USER=admin\n");
//! ```

pub mod cipher;
pub mod envelope;
pub mod error;
pub mod key;

pub use cipher::{decrypt, decrypt_with_aad, encrypt, encrypt_with_aad, CipherBlob, NONCE_LEN, TAG_LEN};
pub use envelope::{Envelope, FORMAT_VERSION, MAGIC};
pub use error::{CryptoError, CryptoResult};
pub use key::{derive_key, generate_salt, SecretKey, KEY_LEN, MAX_SALT_LEN, MIN_SALT_LEN, SALT_LEN};
