//! Configuration Sources
//!
//! This module defines what a configuration source is and how a single source
//! is read into a flat key/value map. Each source is read independently; a
//! failure is scoped to that source and never affects the others.
//!
//! # Supported Kinds
//!
//! - **PlainFile**: `.env` files (`KEY=value` lines)
//! - **EncryptedFile**: `.env` files sealed with `settings-crypto`
//! - **Yaml / Json / Toml**: structured bundles, flattened with the key-path
//!   delimiter
//! - **Environment**: process environment, optionally filtered by prefix
//! - **RemoteSecret**: a JSON key/value group stored under one secret id in
//!   a remote secrets manager
//!
//! # Example
//!
//! ```rust,ignore
//! use settings_core::sources::{DefaultSourceReader, SourceKind, SourceReader, SourceSpec};
//!
//! let reader = DefaultSourceReader::new();
//! let spec = SourceSpec::new("base", SourceKind::PlainFile, ".env", 10);
//! let values = reader.read(&spec).await?;
//! ```

pub mod bundles;
pub mod encrypted;
pub mod env;
pub mod reader;

pub use encrypted::PassphraseSource;
pub use reader::DefaultSourceReader;

use crate::profile::Profile;
use crate::secrets::SecretsError;
use serde::{Deserialize, Serialize};
use settings_crypto::CryptoError;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Flat mapping of keys to string values, as produced by one source
pub type FlatMap = BTreeMap<String, String>;

/// The kind of a configuration source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    PlainFile,
    EncryptedFile,
    Yaml,
    Json,
    Toml,
    Environment,
    RemoteSecret,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::PlainFile => "plain_file",
            SourceKind::EncryptedFile => "encrypted_file",
            SourceKind::Yaml => "yaml",
            SourceKind::Json => "json",
            SourceKind::Toml => "toml",
            SourceKind::Environment => "environment",
            SourceKind::RemoteSecret => "remote_secret",
        }
    }

    /// Whether reading this kind goes over the network
    pub fn is_remote(&self) -> bool {
        matches!(self, SourceKind::RemoteSecret)
    }

    /// Guess the kind of a local file from its name
    ///
    /// `.yaml`/`.yml`, `.json` and `.toml` map to bundles, `.encrypted` and
    /// `.enc` to encrypted files, and anything else (`.env`, `.env.local`)
    /// to a plain `.env` file.
    pub fn from_path(path: impl AsRef<Path>) -> Self {
        let ext = path
            .as_ref()
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase());

        match ext.as_deref() {
            Some("yaml") | Some("yml") => SourceKind::Yaml,
            Some("json") => SourceKind::Json,
            Some("toml") => SourceKind::Toml,
            Some("encrypted") | Some("enc") => SourceKind::EncryptedFile,
            _ => SourceKind::PlainFile,
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One configured origin of configuration data
///
/// Specs are created from static configuration at startup and never
/// mutated afterwards; builder methods consume and return the spec.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceSpec {
    #[serde(rename = "id")]
    source_id: String,
    kind: SourceKind,
    #[serde(default)]
    location: String,
    rank: i64,
    #[serde(default, rename = "profiles")]
    profile_scope: BTreeSet<Profile>,
    #[serde(default)]
    required: bool,
}

impl SourceSpec {
    /// Create a best-effort source that applies to every profile
    pub fn new(
        source_id: impl Into<String>,
        kind: SourceKind,
        location: impl Into<String>,
        rank: i64,
    ) -> Self {
        Self {
            source_id: source_id.into(),
            kind,
            location: location.into(),
            rank,
            profile_scope: BTreeSet::new(),
            required: false,
        }
    }

    /// Mark the source as required: its failure aborts resolution
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    /// Restrict the source to the given profiles
    pub fn with_profiles(mut self, profiles: impl IntoIterator<Item = Profile>) -> Self {
        self.profile_scope = profiles.into_iter().collect();
        self
    }

    pub fn source_id(&self) -> &str {
        &self.source_id
    }

    pub fn kind(&self) -> SourceKind {
        self.kind
    }

    pub fn location(&self) -> &str {
        &self.location
    }

    pub fn rank(&self) -> i64 {
        self.rank
    }

    pub fn profile_scope(&self) -> &BTreeSet<Profile> {
        &self.profile_scope
    }

    pub fn is_required(&self) -> bool {
        self.required
    }

    /// Whether the source applies to `profile` (an empty scope is universal)
    pub fn applies_to(&self, profile: Profile) -> bool {
        self.profile_scope.is_empty() || self.profile_scope.contains(&profile)
    }

    /// The location interpreted as a filesystem path
    pub fn path(&self) -> PathBuf {
        PathBuf::from(&self.location)
    }
}

/// A single key/value pair read from a source, tagged with its origin
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawEntry {
    key: String,
    value: String,
    source_id: String,
    source_rank: i64,
}

impl RawEntry {
    pub fn new(key: String, value: String, spec: &SourceSpec) -> Self {
        Self {
            key,
            value,
            source_id: spec.source_id.clone(),
            source_rank: spec.rank,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn value(&self) -> &str {
        &self.value
    }

    pub fn source_id(&self) -> &str {
        &self.source_id
    }

    pub fn source_rank(&self) -> i64 {
        self.source_rank
    }
}

/// Why a source could not be reached
#[derive(Error, Debug)]
pub enum UnavailableCause {
    #[error("file not found: {}", .0.display())]
    Missing(PathBuf),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Remote(#[from] SecretsError),

    #[error("no secrets backend configured")]
    NoSecretsBackend,

    #[error("read did not finish within the resolution budget of {0:?}")]
    BudgetExhausted(std::time::Duration),
}

/// Why an encrypted source could not be decrypted
#[derive(Error, Debug)]
pub enum DecryptionCause {
    #[error("passphrase unavailable: {0}")]
    MissingPassphrase(String),

    #[error(transparent)]
    Crypto(#[from] CryptoError),

    #[error("decryption task failed: {0}")]
    Aborted(String),
}

/// Errors produced while reading one source
///
/// All variants name the source they belong to; the resolver collects them
/// per source instead of aborting unless the source is required.
#[derive(Error, Debug)]
pub enum SourceError {
    /// Missing/unreadable file or failed remote fetch
    #[error("source `{source_id}` unavailable: {cause}")]
    SourceUnavailable {
        source_id: String,
        #[source]
        cause: UnavailableCause,
    },

    /// Encrypted source that could not be decrypted (wrong passphrase,
    /// tampered data, malformed envelope)
    #[error("source `{source_id}` could not be decrypted: {cause}")]
    Decryption {
        source_id: String,
        #[source]
        cause: DecryptionCause,
    },

    /// Malformed content
    #[error("source `{source_id}` is malformed: {reason}")]
    Parse { source_id: String, reason: String },
}

impl SourceError {
    pub fn unavailable(source_id: impl Into<String>, cause: impl Into<UnavailableCause>) -> Self {
        SourceError::SourceUnavailable {
            source_id: source_id.into(),
            cause: cause.into(),
        }
    }

    pub fn decryption(source_id: impl Into<String>, cause: impl Into<DecryptionCause>) -> Self {
        SourceError::Decryption {
            source_id: source_id.into(),
            cause: cause.into(),
        }
    }

    pub fn parse(source_id: impl Into<String>, reason: impl Into<String>) -> Self {
        SourceError::Parse {
            source_id: source_id.into(),
            reason: reason.into(),
        }
    }

    /// Map an I/O error on `path` to `SourceUnavailable`
    pub(crate) fn io(source_id: &str, path: &Path, error: std::io::Error) -> Self {
        if error.kind() == std::io::ErrorKind::NotFound {
            Self::unavailable(source_id, UnavailableCause::Missing(path.to_path_buf()))
        } else {
            Self::unavailable(source_id, error)
        }
    }

    pub fn source_id(&self) -> &str {
        match self {
            SourceError::SourceUnavailable { source_id, .. }
            | SourceError::Decryption { source_id, .. }
            | SourceError::Parse { source_id, .. } => source_id,
        }
    }

    pub fn is_unavailable(&self) -> bool {
        matches!(self, SourceError::SourceUnavailable { .. })
    }

    /// Whether the encrypted data failed authentication
    pub fn is_integrity_failure(&self) -> bool {
        matches!(
            self,
            SourceError::Decryption {
                cause: DecryptionCause::Crypto(CryptoError::Integrity),
                ..
            }
        )
    }
}

/// Result type for source operations
pub type SourceResult<T> = Result<T, SourceError>;

/// Reads one configuration source into a flat mapping
///
/// This is the injection seam the resolver depends on: tests and embedders
/// can supply their own reader instead of touching files or the network.
#[async_trait::async_trait]
pub trait SourceReader: Send + Sync + fmt::Debug {
    /// Read `spec` into a flat key/value map
    async fn read(&self, spec: &SourceSpec) -> SourceResult<FlatMap>;

    /// Read `spec` into entries tagged with the source id and rank
    async fn read_entries(&self, spec: &SourceSpec) -> SourceResult<Vec<RawEntry>> {
        let values = self.read(spec).await?;
        Ok(values
            .into_iter()
            .map(|(key, value)| RawEntry::new(key, value, spec))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_from_path() {
        assert_eq!(SourceKind::from_path("config.yaml"), SourceKind::Yaml);
        assert_eq!(SourceKind::from_path("config.YML"), SourceKind::Yaml);
        assert_eq!(SourceKind::from_path("config.json"), SourceKind::Json);
        assert_eq!(SourceKind::from_path("settings.toml"), SourceKind::Toml);
        assert_eq!(SourceKind::from_path(".env.encrypted"), SourceKind::EncryptedFile);
        assert_eq!(SourceKind::from_path(".env"), SourceKind::PlainFile);
        assert_eq!(SourceKind::from_path(".env.local"), SourceKind::PlainFile);
    }

    #[test]
    fn test_spec_scope() {
        let universal = SourceSpec::new("base", SourceKind::PlainFile, ".env", 1);
        assert!(universal.applies_to(Profile::Production));
        assert!(universal.applies_to(Profile::Testing));

        let prod_only = SourceSpec::new("prod", SourceKind::Yaml, "prod.yaml", 2)
            .with_profiles([Profile::Production]);
        assert!(prod_only.applies_to(Profile::Production));
        assert!(!prod_only.applies_to(Profile::Development));
    }

    #[test]
    fn test_spec_deserialize() {
        let spec: SourceSpec = serde_json::from_str(
            r#"{"id": "vault", "kind": "remote_secret", "location": "MyAppSecrets",
                "rank": 40, "profiles": ["production"], "required": true}"#,
        )
        .unwrap();

        assert_eq!(spec.source_id(), "vault");
        assert_eq!(spec.kind(), SourceKind::RemoteSecret);
        assert_eq!(spec.rank(), 40);
        assert!(spec.is_required());
        assert!(spec.applies_to(Profile::Production));
        assert!(!spec.applies_to(Profile::Testing));
    }

    #[test]
    fn test_source_error_display() {
        let err = SourceError::unavailable("dotenv", UnavailableCause::Missing(PathBuf::from(".env")));
        assert_eq!(err.to_string(), "source `dotenv` unavailable: file not found: .env");
        assert_eq!(err.source_id(), "dotenv");
        assert!(err.is_unavailable());

        let err = SourceError::decryption("secrets", CryptoError::Integrity);
        assert!(err.is_integrity_failure());
        assert!(!err.is_unavailable());
    }

    #[test]
    fn test_raw_entry_tags_origin() {
        let spec = SourceSpec::new("yaml", SourceKind::Yaml, "config.yaml", 20);
        let entry = RawEntry::new("database__user".into(), "admin".into(), &spec);
        assert_eq!(entry.key(), "database__user");
        assert_eq!(entry.value(), "admin");
        assert_eq!(entry.source_id(), "yaml");
        assert_eq!(entry.source_rank(), 20);
    }
}
