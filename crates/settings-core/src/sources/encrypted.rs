//! Encrypted `.env` files
//!
//! Files are stored in the `settings-crypto` envelope format. The passphrase
//! is resolved from a [`PassphraseSource`] on every read; the derived key
//! lives only for the duration of one decrypt call and the plaintext buffer
//! is zeroized once it has been parsed.
//!
//! Argon2id key derivation runs on the blocking thread pool.
//!
//! # Example
//!
//! ```rust,ignore
//! use settings_core::sources::{DefaultSourceReader, PassphraseSource, SourceKind, SourceSpec};
//!
//! let reader = DefaultSourceReader::new()
//!     .with_passphrase(PassphraseSource::File("/run/secrets/settings.key".into()));
//! let spec = SourceSpec::new("secrets", SourceKind::EncryptedFile, ".env.encrypted", 50);
//! let values = reader.read(&spec).await?;
//! ```

use super::env::parse_dotenv_bytes;
use super::{DecryptionCause, FlatMap, SourceError, SourceResult};
use settings_crypto::Envelope;
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{debug, error};
use zeroize::Zeroizing;

/// Default environment variable holding the passphrase
pub const DEFAULT_PASSPHRASE_VAR: &str = "SETTINGS_PASSPHRASE";

/// Where the passphrase for encrypted sources comes from
#[derive(Clone)]
pub enum PassphraseSource {
    /// Named environment variable
    Env(String),
    /// Key file; trailing newlines are ignored
    File(PathBuf),
    /// In-memory value, for tests and embedders
    Value(Zeroizing<String>),
}

impl Default for PassphraseSource {
    fn default() -> Self {
        PassphraseSource::Env(DEFAULT_PASSPHRASE_VAR.to_string())
    }
}

impl fmt::Debug for PassphraseSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PassphraseSource::Env(var) => f.debug_tuple("Env").field(var).finish(),
            PassphraseSource::File(path) => f.debug_tuple("File").field(path).finish(),
            PassphraseSource::Value(_) => f.write_str("Value([REDACTED])"),
        }
    }
}

impl PassphraseSource {
    pub fn value(passphrase: impl Into<String>) -> Self {
        PassphraseSource::Value(Zeroizing::new(passphrase.into()))
    }

    /// Resolve the passphrase
    pub async fn resolve(&self) -> Result<Zeroizing<String>, DecryptionCause> {
        match self {
            PassphraseSource::Env(var) => match std::env::var(var) {
                Ok(value) if !value.is_empty() => Ok(Zeroizing::new(value)),
                _ => Err(DecryptionCause::MissingPassphrase(format!(
                    "environment variable {} is not set",
                    var
                ))),
            },
            PassphraseSource::File(path) => {
                let content = tokio::fs::read_to_string(path).await.map_err(|e| {
                    DecryptionCause::MissingPassphrase(format!(
                        "cannot read key file {}: {}",
                        path.display(),
                        e
                    ))
                })?;
                let content = Zeroizing::new(content);
                let trimmed = content.trim_end_matches(['\r', '\n']);
                if trimmed.is_empty() {
                    return Err(DecryptionCause::MissingPassphrase(format!(
                        "key file {} is empty",
                        path.display()
                    )));
                }
                Ok(Zeroizing::new(trimmed.to_string()))
            }
            PassphraseSource::Value(value) => Ok(value.clone()),
        }
    }
}

/// Decrypt envelope bytes on the blocking pool
pub async fn open_envelope(
    bytes: Vec<u8>,
    passphrase: Zeroizing<String>,
) -> Result<Zeroizing<Vec<u8>>, DecryptionCause> {
    let result = tokio::task::spawn_blocking(move || {
        let envelope = Envelope::from_bytes(&bytes)?;
        envelope.open(passphrase.as_bytes())
    })
    .await
    .map_err(|e| DecryptionCause::Aborted(e.to_string()))?;

    Ok(result?)
}

/// Read, decrypt and parse one encrypted `.env` file
pub async fn read_encrypted(
    source_id: &str,
    path: &Path,
    passphrase: &PassphraseSource,
) -> SourceResult<FlatMap> {
    let bytes = tokio::fs::read(path)
        .await
        .map_err(|e| SourceError::io(source_id, path, e))?;

    let passphrase = passphrase
        .resolve()
        .await
        .map_err(|cause| SourceError::decryption(source_id, cause))?;

    debug!(source_id = %source_id, bytes = bytes.len(), "Decrypting source");

    let plaintext = match open_envelope(bytes, passphrase).await {
        Ok(plaintext) => plaintext,
        Err(cause) => {
            let err = SourceError::decryption(source_id, cause);
            if err.is_integrity_failure() {
                error!(source_id = %source_id, path = %path.display(), "Integrity check failed for encrypted source");
            }
            return Err(err);
        }
    };

    parse_dotenv_bytes(source_id, &plaintext)
}

#[cfg(test)]
mod tests {
    use super::*;
    use settings_crypto::CryptoError;
    use tempfile::TempDir;

    fn write_envelope(dir: &TempDir, name: &str, plaintext: &[u8], passphrase: &str) -> PathBuf {
        let path = dir.path().join(name);
        let envelope = Envelope::seal(plaintext, passphrase.as_bytes()).unwrap();
        std::fs::write(&path, envelope.to_bytes()).unwrap();
        path
    }

    #[tokio::test]
    async fn test_read_encrypted() {
        let dir = TempDir::new().unwrap();
        let path = write_envelope(&dir, ".env.encrypted", b"DATABASE__PASSWORD=s3cret\n", "pw");

        let values = read_encrypted("secrets", &path, &PassphraseSource::value("pw"))
            .await
            .unwrap();
        assert_eq!(values.get("DATABASE__PASSWORD").unwrap(), "s3cret");
    }

    #[tokio::test]
    async fn test_wrong_passphrase_is_integrity_failure() {
        let dir = TempDir::new().unwrap();
        let path = write_envelope(&dir, ".env.encrypted", b"A=1\n", "right");

        let err = read_encrypted("secrets", &path, &PassphraseSource::value("wrong"))
            .await
            .unwrap_err();
        assert!(err.is_integrity_failure());
        assert_eq!(err.source_id(), "secrets");
    }

    #[tokio::test]
    async fn test_malformed_envelope_is_decryption_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("plain.encrypted");
        std::fs::write(&path, b"A=1\n").unwrap();

        let err = read_encrypted("secrets", &path, &PassphraseSource::value("pw"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            SourceError::Decryption {
                cause: DecryptionCause::Crypto(CryptoError::Format(_)),
                ..
            }
        ));
        assert!(!err.is_integrity_failure());
    }

    #[tokio::test]
    async fn test_missing_file_is_unavailable() {
        let dir = TempDir::new().unwrap();
        let err = read_encrypted(
            "secrets",
            &dir.path().join("absent.encrypted"),
            &PassphraseSource::value("pw"),
        )
        .await
        .unwrap_err();
        assert!(err.is_unavailable());
    }

    #[tokio::test]
    async fn test_passphrase_from_file() {
        let dir = TempDir::new().unwrap();
        let key_path = dir.path().join("secret.key");
        std::fs::write(&key_path, "from-file\n").unwrap();
        let path = write_envelope(&dir, ".env.encrypted", b"A=1\n", "from-file");

        let values = read_encrypted("secrets", &path, &PassphraseSource::File(key_path))
            .await
            .unwrap();
        assert_eq!(values.get("A").unwrap(), "1");
    }

    #[tokio::test]
    async fn test_missing_passphrase() {
        let dir = TempDir::new().unwrap();
        let path = write_envelope(&dir, ".env.encrypted", b"A=1\n", "pw");

        let source = PassphraseSource::Env("SETTINGS_TEST_PASSPHRASE_NEVER_SET".to_string());
        let err = read_encrypted("secrets", &path, &source).await.unwrap_err();
        assert!(matches!(
            err,
            SourceError::Decryption {
                cause: DecryptionCause::MissingPassphrase(_),
                ..
            }
        ));

        let empty_key = dir.path().join("empty.key");
        std::fs::write(&empty_key, "\n").unwrap();
        let err = read_encrypted("secrets", &path, &PassphraseSource::File(empty_key))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            SourceError::Decryption {
                cause: DecryptionCause::MissingPassphrase(_),
                ..
            }
        ));
    }

    #[test]
    fn test_debug_redacts_value() {
        let debug = format!("{:?}", PassphraseSource::value("hunter2"));
        assert_eq!(debug, "Value([REDACTED])");
        assert!(!debug.contains("hunter2"));
    }
}
