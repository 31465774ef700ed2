//! Static settings manifest
//!
//! The manifest declares the sources of a resolution and how to read them. It
//! is loaded once at startup from TOML, YAML or JSON, adjusted from a handful
//! of environment variables and then turned into a [`SettingsResolver`].
//!
//! ```toml
//! delimiter = "__"
//! budget_secs = 30
//!
//! [passphrase]
//! type = "file"
//! path = "/run/secrets/settings.key"
//!
//! [secrets]
//! backend = "secretsmanager"
//! region = "eu-west-1"
//!
//! [[sources]]
//! id = "dotenv"
//! kind = "plain_file"
//! location = ".env"
//! rank = 10
//!
//! [[sources]]
//! id = "prod-secrets"
//! kind = "encrypted_file"
//! location = ".env.production.encrypted"
//! rank = 50
//! profiles = ["production"]
//! required = true
//! ```
//!
//! # Environment overrides
//!
//! | Variable                      | Effect                                  |
//! |-------------------------------|-----------------------------------------|
//! | `SECRETS_MANAGER`             | secrets backend (enables secrets)       |
//! | `AWS_REGION`                  | AWS region, falls back to `AWS_DEFAULT_REGION` |
//! | `AZURE_VAULT_URL`             | Azure vault URL                         |
//! | `GOOGLE_PROJECT_ID`           | Google project id                       |
//! | `ENVIRONMENT`                 | active profile                          |
//! | `SETTINGS_PASSPHRASE_FILE`    | read the passphrase from this key file  |
//!
//! # Example
//!
//! ```rust,ignore
//! use settings_core::config::load_from_manifest;
//!
//! #[derive(serde::Deserialize)]
//! struct AppSettings {
//!     app_name: String,
//! }
//!
//! let resolved = load_from_manifest::<AppSettings>("settings.toml").await?;
//! println!("{}", resolved.settings.app_name);
//! ```

use crate::merge::{validate_ranks, DuplicateRankError, KeyPathMerger, KeyPathOptions, DEFAULT_DELIMITER};
use crate::profile::{self, Profile, UnknownProfile, PROFILE_ENV_VAR};
use crate::resolver::{Resolved, SettingsResolver, DEFAULT_BUDGET};
use crate::secrets::{BackendKind, EnvSecretClient, SecretClient, SecretsError, SecretsGateway, SecretsSettings};
use crate::sources::bundles::BundleFormat;
use crate::sources::encrypted::DEFAULT_PASSPHRASE_VAR;
use crate::sources::{DefaultSourceReader, PassphraseSource, SourceKind, SourceSpec};
use crate::validate::SerdeValidator;
use anyhow::Context;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

/// Default secret id of the remote source in [`SettingsManifest::original_layout`]
pub const DEFAULT_SECRET_ID: &str = "MyAppSecrets";

/// Manifest loading errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("cannot read manifest {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid manifest {}: {reason}", path.display())]
    Parse { path: PathBuf, reason: String },

    #[error("unsupported manifest format for {} (expected .toml, .yaml, .yml or .json)", .0.display())]
    UnsupportedFormat(PathBuf),

    #[error(transparent)]
    Profile(#[from] UnknownProfile),

    #[error(transparent)]
    Secrets(#[from] SecretsError),

    #[error(transparent)]
    DuplicateRank(#[from] DuplicateRankError),

    #[error("invalid manifest: {0}")]
    Invalid(String),
}

pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Where the passphrase for encrypted sources comes from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PassphraseConfig {
    Env { var: String },
    File { path: PathBuf },
}

impl Default for PassphraseConfig {
    fn default() -> Self {
        PassphraseConfig::Env {
            var: DEFAULT_PASSPHRASE_VAR.to_string(),
        }
    }
}

impl PassphraseConfig {
    pub fn source(&self) -> PassphraseSource {
        match self {
            PassphraseConfig::Env { var } => PassphraseSource::Env(var.clone()),
            PassphraseConfig::File { path } => PassphraseSource::File(path.clone()),
        }
    }
}

/// Declared sources and reading options
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SettingsManifest {
    pub delimiter: String,
    pub case_sensitive: bool,
    /// Profile for resolutions; the process-wide default when unset
    pub profile: Option<Profile>,
    pub budget_secs: u64,
    pub passphrase: PassphraseConfig,
    /// Remote secrets backend; remote sources are unavailable without one
    pub secrets: Option<SecretsSettings>,
    pub sources: Vec<SourceSpec>,
}

impl Default for SettingsManifest {
    fn default() -> Self {
        Self {
            delimiter: DEFAULT_DELIMITER.to_string(),
            case_sensitive: false,
            profile: None,
            budget_secs: DEFAULT_BUDGET.as_secs(),
            passphrase: PassphraseConfig::default(),
            secrets: None,
            sources: Vec::new(),
        }
    }
}

impl SettingsManifest {
    /// Load a manifest, choosing the format from the file extension
    pub fn from_file(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let path = path.as_ref();
        let format = match path.extension().and_then(|e| e.to_str()).map(str::to_ascii_lowercase) {
            Some(ext) if ext == "toml" => BundleFormat::Toml,
            Some(ext) if ext == "yaml" || ext == "yml" => BundleFormat::Yaml,
            Some(ext) if ext == "json" => BundleFormat::Json,
            _ => return Err(ConfigError::UnsupportedFormat(path.to_path_buf())),
        };

        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        let manifest = Self::parse(format, &content).map_err(|reason| ConfigError::Parse {
            path: path.to_path_buf(),
            reason,
        })?;

        debug!(
            path = %path.display(),
            sources = manifest.sources.len(),
            "Loaded settings manifest"
        );
        Ok(manifest)
    }

    /// Parse manifest content in the given format
    pub fn parse(format: BundleFormat, content: &str) -> Result<Self, String> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        let document = format.parse(content)?;
        serde_json::from_value(document).map_err(|e| e.to_string())
    }

    /// The layout of the original application: `.env`, `config.yaml`,
    /// `config.json`, one remote secret group and `.env.encrypted`, all
    /// best-effort
    ///
    /// The remote secret id comes from `AWS_SECRET_ID`.
    pub fn original_layout() -> Self {
        Self::original_layout_from(|name| std::env::var(name).ok())
    }

    pub fn original_layout_from(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let secret_id = lookup("AWS_SECRET_ID").unwrap_or_else(|| DEFAULT_SECRET_ID.to_string());

        Self {
            secrets: Some(SecretsSettings::default()),
            sources: vec![
                SourceSpec::new("dotenv", SourceKind::PlainFile, ".env", 10),
                SourceSpec::new("yaml", SourceKind::Yaml, "config.yaml", 20),
                SourceSpec::new("json", SourceKind::Json, "config.json", 30),
                SourceSpec::new("remote", SourceKind::RemoteSecret, secret_id, 40),
                SourceSpec::new("encrypted", SourceKind::EncryptedFile, ".env.encrypted", 50),
            ],
            ..Self::default()
        }
    }

    /// Apply the environment overrides listed in the module docs
    pub fn apply_env_overrides(&mut self) -> ConfigResult<()> {
        self.apply_overrides_from(|name| std::env::var(name).ok())
    }

    /// Apply overrides from an arbitrary variable lookup
    pub fn apply_overrides_from(&mut self, lookup: impl Fn(&str) -> Option<String>) -> ConfigResult<()> {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        if let Some(backend) = get("SECRETS_MANAGER") {
            let backend: BackendKind = backend.parse()?;
            self.secrets.get_or_insert_with(SecretsSettings::default).backend = backend;
        }

        // Backend details only refine a backend that is already enabled
        if let Some(secrets) = self.secrets.as_mut() {
            if let Some(region) = get("AWS_REGION").or_else(|| get("AWS_DEFAULT_REGION")) {
                secrets.region = Some(region);
            }
            if let Some(vault_url) = get("AZURE_VAULT_URL") {
                secrets.vault_url = Some(vault_url);
            }
            if let Some(project_id) = get("GOOGLE_PROJECT_ID") {
                secrets.project_id = Some(project_id);
            }
        }

        if let Some(profile) = get(PROFILE_ENV_VAR) {
            self.profile = Some(profile.parse()?);
        }

        if let Some(path) = get("SETTINGS_PASSPHRASE_FILE") {
            self.passphrase = PassphraseConfig::File { path: path.into() };
        }

        Ok(())
    }

    /// Check the manifest before any source is read
    pub fn validate(&self) -> ConfigResult<()> {
        if self.delimiter.is_empty() {
            return Err(ConfigError::Invalid("delimiter must not be empty".to_string()));
        }
        if self.budget_secs == 0 {
            return Err(ConfigError::Invalid("budget_secs must be greater than zero".to_string()));
        }

        let mut ids = HashSet::new();
        for spec in &self.sources {
            if spec.source_id().is_empty() {
                return Err(ConfigError::Invalid("source id must not be empty".to_string()));
            }
            if !ids.insert(spec.source_id()) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate source id `{}`",
                    spec.source_id()
                )));
            }
            if spec.location().is_empty() && spec.kind() != SourceKind::Environment {
                return Err(ConfigError::Invalid(format!(
                    "source `{}` has no location",
                    spec.source_id()
                )));
            }
        }

        validate_ranks(&self.sources)?;

        if let Some(secrets) = &self.secrets {
            match secrets.backend {
                BackendKind::KeyVault if secrets.vault_url.is_none() => {
                    return Err(SecretsError::InvalidSettings("keyvault backend requires vault_url".to_string()).into());
                }
                BackendKind::GoogleSecretManager if secrets.project_id.is_none() => {
                    return Err(SecretsError::InvalidSettings(
                        "google_secret_manager backend requires project_id".to_string(),
                    )
                    .into());
                }
                _ => {}
            }
        }

        Ok(())
    }

    /// Profile to resolve with
    pub fn active_profile(&self) -> Profile {
        self.profile.unwrap_or_else(profile::current)
    }

    pub fn budget(&self) -> Duration {
        Duration::from_secs(self.budget_secs)
    }

    pub fn merger(&self) -> KeyPathMerger {
        KeyPathMerger::new(KeyPathOptions {
            delimiter: self.delimiter.clone(),
            case_sensitive: self.case_sensitive,
        })
    }

    /// Source reader for this manifest; `client` backs the secrets gateway
    pub fn reader(&self, client: Arc<dyn SecretClient>) -> ConfigResult<DefaultSourceReader> {
        let mut reader = DefaultSourceReader::new()
            .with_delimiter(self.delimiter.clone())
            .with_passphrase(self.passphrase.source());

        if let Some(secrets) = &self.secrets {
            reader = reader.with_gateway(SecretsGateway::from_settings(secrets, client)?);
        }
        Ok(reader)
    }

    pub fn resolver(&self, client: Arc<dyn SecretClient>) -> ConfigResult<SettingsResolver> {
        let reader = self.reader(client)?;
        Ok(SettingsResolver::new(reader, self.merger()).with_budget(self.budget()))
    }
}

/// Load a manifest, apply environment overrides and resolve settings of type `T`
///
/// Remote secrets are read through [`EnvSecretClient`]; embedders with a
/// real SDK client build the resolver with [`SettingsManifest::resolver`].
pub async fn load_from_manifest<T: DeserializeOwned>(path: impl AsRef<Path>) -> anyhow::Result<Resolved<T>> {
    let path = path.as_ref();

    let mut manifest = SettingsManifest::from_file(path)
        .with_context(|| format!("Failed to load settings manifest {}", path.display()))?;
    manifest
        .apply_env_overrides()
        .context("Invalid environment override")?;
    manifest.validate()?;

    let prefix = manifest
        .secrets
        .as_ref()
        .map(|s| s.env_prefix.clone())
        .unwrap_or_else(|| SecretsSettings::default().env_prefix);
    let resolver = manifest.resolver(Arc::new(EnvSecretClient::new(prefix)))?;

    let profile = manifest.active_profile();
    let resolved = resolver
        .resolve(&manifest.sources, profile, &SerdeValidator::<T>::new())
        .await
        .with_context(|| format!("Failed to resolve settings for profile {}", profile))?;

    info!(
        profile = %profile,
        skipped = resolved.failures.len(),
        "Settings loaded from manifest"
    );
    Ok(resolved)
}
