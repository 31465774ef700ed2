//! File operations on `.env` files
//!
//! These back the `encrypt`, `decrypt`, `validate` and `list` commands of a
//! command-line front end. Writes are atomic: the output is written to a
//! temporary file in the destination directory and renamed into place, so a
//! crash never leaves a half-written file behind.
//!
//! # Example
//!
//! ```rust,ignore
//! use settings_core::files::{decrypt_file, encrypt_file, DecryptOptions};
//!
//! let encrypted = encrypt_file(".env", "passphrase").await?;   // .env.encrypted
//! let restored = decrypt_file(&encrypted, "passphrase", DecryptOptions::default()).await?;
//! ```

use crate::merge::{KeyPathMerger, MergedConfig, PathConflictError};
use crate::sources::encrypted::open_envelope;
use crate::sources::env::parse_dotenv_bytes;
use crate::sources::{DecryptionCause, FlatMap, SourceError};
use crate::validate::SettingsValidator;
use settings_crypto::{CryptoError, Envelope};
use std::ffi::OsString;
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{error, info};
use zeroize::Zeroizing;

/// Suffix appended by [`encrypt_file`]
pub const ENCRYPTED_SUFFIX: &str = ".encrypted";
/// Suffix appended by [`decrypt_file`] when the input has no `.encrypted` suffix
pub const DECRYPTED_SUFFIX: &str = ".decrypted";

/// Errors from file operations
#[derive(Error, Debug)]
pub enum FileOpError {
    #[error("file not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("refusing to overwrite existing file {}", .0.display())]
    WouldOverwrite(PathBuf),

    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Crypto(#[from] CryptoError),

    #[error("passphrase unavailable: {0}")]
    MissingPassphrase(String),

    #[error("{0}")]
    Source(#[from] SourceError),

    #[error("background task failed: {0}")]
    Task(String),
}

impl FileOpError {
    fn io(path: &Path, source: std::io::Error) -> Self {
        if source.kind() == std::io::ErrorKind::NotFound {
            FileOpError::NotFound(path.to_path_buf())
        } else {
            FileOpError::Io {
                path: path.to_path_buf(),
                source,
            }
        }
    }
}

impl From<DecryptionCause> for FileOpError {
    fn from(cause: DecryptionCause) -> Self {
        match cause {
            DecryptionCause::Crypto(e) => FileOpError::Crypto(e),
            DecryptionCause::MissingPassphrase(reason) => FileOpError::MissingPassphrase(reason),
            DecryptionCause::Aborted(reason) => FileOpError::Task(reason),
        }
    }
}

/// Errors from [`validate_file`]
#[derive(Error, Debug)]
pub enum ValidateFileError<E> {
    #[error(transparent)]
    File(#[from] FileOpError),

    #[error("conflicting keys: {0}")]
    PathConflict(#[from] PathConflictError),

    #[error("validation failed: {0}")]
    Validation(#[source] E),
}

/// Options for [`decrypt_file`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DecryptOptions {
    /// Destination; derived from the input path when unset
    pub output: Option<PathBuf>,
    /// Replace an existing destination file
    pub overwrite: bool,
}

impl DecryptOptions {
    pub fn output(mut self, path: impl Into<PathBuf>) -> Self {
        self.output = Some(path.into());
        self
    }

    pub fn overwrite(mut self, overwrite: bool) -> Self {
        self.overwrite = overwrite;
        self
    }
}

/// `<path>.encrypted`
pub fn encrypted_path(path: &Path) -> PathBuf {
    append_suffix(path, ENCRYPTED_SUFFIX)
}

/// `path` without `.encrypted`, or `<path>.decrypted` if there is no such suffix
pub fn decrypted_path(path: &Path) -> PathBuf {
    match path.file_name().and_then(|n| n.to_str()) {
        Some(name) if name.len() > ENCRYPTED_SUFFIX.len() && name.ends_with(ENCRYPTED_SUFFIX) => {
            path.with_file_name(&name[..name.len() - ENCRYPTED_SUFFIX.len()])
        }
        _ => append_suffix(path, DECRYPTED_SUFFIX),
    }
}

fn append_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name: OsString = path.file_name().map(OsString::from).unwrap_or_default();
    name.push(suffix);
    path.with_file_name(name)
}

/// Encrypt a `.env` file to `<path>.encrypted`
///
/// An existing encrypted file is replaced.
pub async fn encrypt_file(path: impl AsRef<Path>, passphrase: &str) -> Result<PathBuf, FileOpError> {
    let path = path.as_ref();
    let plaintext = Zeroizing::new(
        tokio::fs::read(path)
            .await
            .map_err(|e| FileOpError::io(path, e))?,
    );

    // Fail early on content that would not load once encrypted
    parse_dotenv_bytes(&path.display().to_string(), &plaintext)?;

    let passphrase = Zeroizing::new(passphrase.to_string());
    let bytes = tokio::task::spawn_blocking(move || {
        Envelope::seal(&plaintext, passphrase.as_bytes()).map(|envelope| envelope.to_bytes())
    })
    .await
    .map_err(|e| FileOpError::Task(e.to_string()))??;

    let output = encrypted_path(path);
    write_atomic(output.clone(), bytes, true).await?;

    info!(input = %path.display(), output = %output.display(), "Encrypted settings file");
    Ok(output)
}

/// Decrypt an encrypted `.env` file
///
/// Refuses to replace an existing destination unless `options.overwrite`
/// is set.
pub async fn decrypt_file(
    path: impl AsRef<Path>,
    passphrase: &str,
    options: DecryptOptions,
) -> Result<PathBuf, FileOpError> {
    let path = path.as_ref();
    let output = options.output.clone().unwrap_or_else(|| decrypted_path(path));

    if !options.overwrite && tokio::fs::try_exists(&output).await.unwrap_or(false) {
        return Err(FileOpError::WouldOverwrite(output));
    }

    let plaintext = decrypt_bytes(path, passphrase).await?;
    write_atomic(output.clone(), plaintext.to_vec(), options.overwrite).await?;

    info!(input = %path.display(), output = %output.display(), "Decrypted settings file");
    Ok(output)
}

/// Decrypt an encrypted `.env` file into a flat map without touching disk
pub async fn decrypt_to_map(path: impl AsRef<Path>, passphrase: &str) -> Result<FlatMap, FileOpError> {
    let path = path.as_ref();
    let plaintext = decrypt_bytes(path, passphrase).await?;
    Ok(parse_dotenv_bytes(&path.display().to_string(), &plaintext)?)
}

/// Parse a plain `.env` file, expand its keys and run `validator`
pub async fn validate_file<V: SettingsValidator>(
    path: impl AsRef<Path>,
    merger: &KeyPathMerger,
    validator: &V,
) -> Result<V::Settings, ValidateFileError<V::Error>> {
    let path = path.as_ref();
    let bytes = tokio::fs::read(path)
        .await
        .map_err(|e| FileOpError::io(path, e))?;

    let values = parse_dotenv_bytes(&path.display().to_string(), &bytes).map_err(FileOpError::from)?;
    let merged = MergedConfig::new(merger.expand(&values)?);

    validator.validate(&merged).map_err(ValidateFileError::Validation)
}

async fn decrypt_bytes(path: &Path, passphrase: &str) -> Result<Zeroizing<Vec<u8>>, FileOpError> {
    let bytes = tokio::fs::read(path)
        .await
        .map_err(|e| FileOpError::io(path, e))?;

    open_envelope(bytes, Zeroizing::new(passphrase.to_string()))
        .await
        .map_err(|cause| {
            if matches!(cause, DecryptionCause::Crypto(CryptoError::Integrity)) {
                error!(path = %path.display(), "Integrity check failed for encrypted file");
            }
            FileOpError::from(cause)
        })
}

async fn write_atomic(target: PathBuf, contents: Vec<u8>, overwrite: bool) -> Result<(), FileOpError> {
    tokio::task::spawn_blocking(move || {
        let contents = Zeroizing::new(contents);
        let dir = match target.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };

        let mut temp = tempfile::NamedTempFile::new_in(&dir).map_err(|e| FileOpError::io(&dir, e))?;
        temp.write_all(&contents)
            .and_then(|_| temp.as_file().sync_all())
            .map_err(|e| FileOpError::io(temp.path(), e))?;

        let persisted = if overwrite {
            temp.persist(&target)
        } else {
            temp.persist_noclobber(&target)
        };

        match persisted {
            Ok(_) => Ok(()),
            Err(e) if e.error.kind() == std::io::ErrorKind::AlreadyExists => {
                Err(FileOpError::WouldOverwrite(target))
            }
            Err(e) => Err(FileOpError::io(&target, e.error)),
        }
    })
    .await
    .map_err(|e| FileOpError::Task(e.to_string()))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validate::SerdeValidator;
    use serde::Deserialize;
    use tempfile::TempDir;

    const ENV: &str = "APP_NAME=Base\nDEBUG=true\nDATABASE__USER=admin\n";

    fn write_env(dir: &TempDir) -> PathBuf {
        let path = dir.path().join(".env");
        std::fs::write(&path, ENV).unwrap();
        path
    }

    #[test]
    fn test_output_paths() {
        assert_eq!(encrypted_path(Path::new("/a/.env")), PathBuf::from("/a/.env.encrypted"));
        assert_eq!(decrypted_path(Path::new("/a/.env.encrypted")), PathBuf::from("/a/.env"));
        assert_eq!(decrypted_path(Path::new("/a/secrets.bin")), PathBuf::from("/a/secrets.bin.decrypted"));
        assert_eq!(decrypted_path(Path::new(".encrypted")), PathBuf::from(".encrypted.decrypted"));
    }

    #[tokio::test]
    async fn test_encrypt_then_decrypt() {
        let dir = TempDir::new().unwrap();
        let env = write_env(&dir);

        let encrypted = encrypt_file(&env, "pw").await.unwrap();
        assert_eq!(encrypted, dir.path().join(".env.encrypted"));
        let bytes = std::fs::read(&encrypted).unwrap();
        assert!(Envelope::is_envelope(&bytes));
        assert!(!String::from_utf8_lossy(&bytes).contains("admin"));

        std::fs::remove_file(&env).unwrap();
        let restored = decrypt_file(&encrypted, "pw", DecryptOptions::default()).await.unwrap();
        assert_eq!(restored, env);
        assert_eq!(std::fs::read_to_string(&restored).unwrap(), ENV);
    }

    #[tokio::test]
    async fn test_decrypt_refuses_to_overwrite() {
        let dir = TempDir::new().unwrap();
        let env = write_env(&dir);
        let encrypted = encrypt_file(&env, "pw").await.unwrap();

        let err = decrypt_file(&encrypted, "pw", DecryptOptions::default()).await.unwrap_err();
        assert!(matches!(err, FileOpError::WouldOverwrite(_)));

        std::fs::write(&env, "STALE=1\n").unwrap();
        decrypt_file(&encrypted, "pw", DecryptOptions::default().overwrite(true))
            .await
            .unwrap();
        assert_eq!(std::fs::read_to_string(&env).unwrap(), ENV);
    }

    #[tokio::test]
    async fn test_decrypt_to_explicit_output() {
        let dir = TempDir::new().unwrap();
        let env = write_env(&dir);
        let encrypted = encrypt_file(&env, "pw").await.unwrap();

        let output = dir.path().join("restored.env");
        let written = decrypt_file(&encrypted, "pw", DecryptOptions::default().output(&output))
            .await
            .unwrap();
        assert_eq!(written, output);
        assert_eq!(std::fs::read_to_string(&output).unwrap(), ENV);
    }

    #[tokio::test]
    async fn test_wrong_passphrase_writes_nothing() {
        let dir = TempDir::new().unwrap();
        let env = write_env(&dir);
        let encrypted = encrypt_file(&env, "right").await.unwrap();
        std::fs::remove_file(&env).unwrap();

        let err = decrypt_file(&encrypted, "wrong", DecryptOptions::default()).await.unwrap_err();
        assert!(matches!(err, FileOpError::Crypto(CryptoError::Integrity)));
        assert!(!env.exists());
    }

    #[tokio::test]
    async fn test_decrypt_to_map() {
        let dir = TempDir::new().unwrap();
        let encrypted = encrypt_file(write_env(&dir), "pw").await.unwrap();

        let values = decrypt_to_map(&encrypted, "pw").await.unwrap();
        assert_eq!(values.get("DATABASE__USER").unwrap(), "admin");
        assert_eq!(values.len(), 3);
    }

    #[tokio::test]
    async fn test_missing_input() {
        let dir = TempDir::new().unwrap();
        let err = encrypt_file(dir.path().join("absent.env"), "pw").await.unwrap_err();
        assert!(matches!(err, FileOpError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_encrypt_rejects_malformed_env() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(".env");
        std::fs::write(&path, "not a valid line\n").unwrap();

        let err = encrypt_file(&path, "pw").await.unwrap_err();
        assert!(matches!(err, FileOpError::Source(SourceError::Parse { .. })));
        assert!(!encrypted_path(&path).exists());
    }

    #[derive(Debug, Deserialize)]
    struct AppSettings {
        app_name: String,
        debug: bool,
    }

    #[tokio::test]
    async fn test_validate_file() {
        let dir = TempDir::new().unwrap();
        let env = write_env(&dir);

        let settings = validate_file(&env, &KeyPathMerger::default(), &SerdeValidator::<AppSettings>::new())
            .await
            .unwrap();
        assert_eq!(settings.app_name, "Base");
        assert!(settings.debug);
    }

    #[tokio::test]
    async fn test_validate_file_reports_conflicts() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(".env");
        std::fs::write(&path, "DATABASE=x\nDATABASE__USER=y\n").unwrap();

        let err = validate_file(&path, &KeyPathMerger::default(), &SerdeValidator::<AppSettings>::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ValidateFileError::PathConflict(_)));
    }

    #[tokio::test]
    async fn test_validate_file_reports_schema_errors() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(".env");
        std::fs::write(&path, "APP_NAME=Base\nDEBUG=perhaps\n").unwrap();

        let err = validate_file(&path, &KeyPathMerger::default(), &SerdeValidator::<AppSettings>::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ValidateFileError::Validation(_)));
    }
}
