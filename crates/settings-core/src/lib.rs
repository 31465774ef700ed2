//! Layered settings resolution
//!
//! This crate loads configuration from layered sources, decides
//! deterministically which source wins for each key, decrypts protected
//! local secrets and reconciles namespaced keys (`DATABASE__USER` ->
//! `database.user`) before handing one merged tree to a validator.
//!
//! # Components
//!
//! - [`sources`]: read one source (`.env`, encrypted `.env`, YAML/JSON/TOML,
//!   process environment, remote secret) into a flat key/value map
//! - [`merge`]: expand flat keys into a tree and fold trees by rank
//! - [`profile`]: the active deployment profile and source filtering
//! - [`secrets`]: one gateway over AWS Secrets Manager, Azure Key Vault and
//!   Google Secret Manager with timeouts, retries and error normalization
//! - [`resolver`]: fan out reads, fold results, validate
//! - [`files`]: `encrypt`, `decrypt` and `validate` operations on `.env` files
//! - [`config`]: the static manifest that declares sources
//! - [`export`]: JSON/YAML rendering of a merged tree
//! - [`telemetry`]: optional `tracing` subscriber setup
//!
//! # Example
//!
//! ```rust,ignore
//! use settings_core::{
//!     DefaultSourceReader, KeyPathMerger, Profile, SerdeValidator, SettingsResolver,
//!     SourceKind, SourceSpec,
//! };
//!
//! #[derive(serde::Deserialize)]
//! struct AppSettings {
//!     app_name: String,
//!     debug: bool,
//! }
//!
//! let specs = vec![
//!     SourceSpec::new("dotenv", SourceKind::PlainFile, ".env", 10),
//!     SourceSpec::new("yaml", SourceKind::Yaml, "config.yaml", 20),
//! ];
//!
//! let resolver = SettingsResolver::new(DefaultSourceReader::new(), KeyPathMerger::default());
//! let resolved = resolver
//!     .resolve(&specs, Profile::Development, &SerdeValidator::<AppSettings>::new())
//!     .await?;
//!
//! for failure in &resolved.failures {
//!     eprintln!("skipped {}: {}", failure.source_id, failure.error);
//! }
//! ```

pub mod config;
pub mod export;
pub mod files;
pub mod merge;
pub mod profile;
pub mod resolver;
pub mod secrets;
pub mod sources;
pub mod telemetry;
pub mod validate;

pub use config::{load_from_manifest, ConfigError, PassphraseConfig, SettingsManifest};
pub use merge::{DuplicateRankError, KeyPathMerger, MergedConfig, NestedValue, PathConflictError};
pub use profile::Profile;
pub use resolver::{Loaded, ResolveError, ResolveOptions, Resolved, SettingsResolver, SourceFailure};
pub use secrets::{BackendKind, SecretClient, SecretsError, SecretsGateway, SecretsSettings};
pub use sources::{
    DefaultSourceReader, FlatMap, PassphraseSource, RawEntry, SourceError, SourceKind, SourceReader,
    SourceSpec,
};
pub use validate::{SchemaError, SerdeValidator, SettingsValidator};

pub use settings_crypto as crypto;
