//! Remote Secrets Managers
//!
//! One gateway over three backends:
//!
//! - **AWS Secrets Manager** (`secretsmanager`)
//! - **Azure Key Vault** (`keyvault`)
//! - **Google Secret Manager** (`google_secret_manager`)
//!
//! The SDKs themselves sit behind the [`SecretClient`] trait so this crate
//! does not pull in any cloud SDK. The gateway maps a location to the
//! backend's resource name, applies a per-call timeout, retries transient
//! failures with exponential backoff, and normalizes backend-specific error
//! codes into [`SecretsError`].
//!
//! # Example
//!
//! ```rust,ignore
//! use settings_core::secrets::{EnvSecretClient, SecretsGateway, SecretsSettings};
//! use std::sync::Arc;
//!
//! let settings = SecretsSettings::default();
//! let gateway = SecretsGateway::from_settings(&settings, Arc::new(EnvSecretClient::new("SECRET")))?;
//! let bytes = gateway.fetch("MyAppSecrets").await?;
//! ```

pub mod cloud;
pub mod gateway;
pub mod local;

pub use cloud::{AwsBackend, AzureBackend, Backend, GoogleBackend};
pub use gateway::{RetryPolicy, SecretsGateway};
pub use local::EnvSecretClient;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Backend discriminator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum BackendKind {
    #[default]
    #[serde(rename = "secretsmanager")]
    SecretsManager,
    #[serde(rename = "keyvault")]
    KeyVault,
    #[serde(rename = "google_secret_manager")]
    GoogleSecretManager,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::SecretsManager => "secretsmanager",
            BackendKind::KeyVault => "keyvault",
            BackendKind::GoogleSecretManager => "google_secret_manager",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackendKind {
    type Err = SecretsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "secretsmanager" => Ok(BackendKind::SecretsManager),
            "keyvault" => Ok(BackendKind::KeyVault),
            "google_secret_manager" => Ok(BackendKind::GoogleSecretManager),
            other => Err(SecretsError::InvalidSettings(format!(
                "unknown secrets backend `{}` (expected secretsmanager, keyvault or google_secret_manager)",
                other
            ))),
        }
    }
}

/// Normalized secrets errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SecretsError {
    #[error("secret not found: {0}")]
    NotFound(String),

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("secret fetch timed out after {0:?}")]
    Timeout(Duration),

    #[error("secrets backend error: {message}")]
    Backend { message: String, transient: bool },

    #[error("invalid secrets settings: {0}")]
    InvalidSettings(String),
}

impl SecretsError {
    pub fn backend(message: impl Into<String>, transient: bool) -> Self {
        SecretsError::Backend {
            message: message.into(),
            transient,
        }
    }

    /// Whether retrying the same request may succeed
    pub fn is_transient(&self) -> bool {
        match self {
            SecretsError::Timeout(_) => true,
            SecretsError::Backend { transient, .. } => *transient,
            _ => false,
        }
    }
}

/// Raw error reported by an SDK client, before normalization
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ClientError {
    /// Error returned by the service, with its backend-specific code: an AWS
    /// exception name, an Azure HTTP status or a Google gRPC code
    #[error("{code}: {message}")]
    Service { code: String, message: String },

    /// Network-level failure before a response was received
    #[error("transport error: {0}")]
    Transport(String),

    /// Secret absent, for clients without a service error code
    #[error("no such secret: {0}")]
    NotFound(String),
}

impl ClientError {
    pub fn service(code: impl Into<String>, message: impl Into<String>) -> Self {
        ClientError::Service {
            code: code.into(),
            message: message.into(),
        }
    }
}

/// Capability of a secrets-manager SDK client
///
/// `name` is the backend resource name produced by the gateway (a secret id
/// for AWS, a vault URL for Azure, a resource path for Google).
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait SecretClient: Send + Sync {
    async fn get_secret(&self, name: &str) -> Result<Vec<u8>, ClientError>;
}

/// Static settings for the secrets gateway
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SecretsSettings {
    pub backend: BackendKind,
    /// AWS region
    pub region: Option<String>,
    /// Azure vault URL, e.g. `https://my-vault.vault.azure.net`
    pub vault_url: Option<String>,
    /// Google Cloud project id
    pub project_id: Option<String>,
    pub timeout_secs: u64,
    pub max_retries: u32,
    /// Variable prefix used by [`EnvSecretClient`]
    pub env_prefix: String,
}

impl Default for SecretsSettings {
    fn default() -> Self {
        Self {
            backend: BackendKind::default(),
            region: None,
            vault_url: None,
            project_id: None,
            timeout_secs: 10,
            max_retries: 3,
            env_prefix: "SECRET".to_string(),
        }
    }
}

impl SecretsSettings {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            timeout: Duration::from_secs(self.timeout_secs),
            max_retries: self.max_retries,
            ..RetryPolicy::default()
        }
    }
}
