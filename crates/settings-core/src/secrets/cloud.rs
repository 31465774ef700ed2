//! Backend adapters
//!
//! Each backend knows how to turn a source location into its resource name
//! and how to classify its own error codes. The set of backends is closed.

use super::{BackendKind, ClientError, SecretClient, SecretsError, SecretsSettings};
use std::fmt;
use std::sync::Arc;

// ============================================================================
// AWS Secrets Manager
// ============================================================================

/// AWS Secrets Manager adapter
///
/// Secret ids are passed through unchanged.
#[derive(Clone)]
pub struct AwsBackend {
    client: Arc<dyn SecretClient>,
    region: Option<String>,
}

impl AwsBackend {
    pub fn new(client: Arc<dyn SecretClient>, region: Option<String>) -> Self {
        Self { client, region }
    }

    pub fn region(&self) -> Option<&str> {
        self.region.as_deref()
    }

    pub fn resource_name(&self, location: &str) -> String {
        location.to_string()
    }

    /// Classify AWS exception names
    pub fn normalize(error: ClientError, name: &str) -> SecretsError {
        match error {
            ClientError::Service { code, message } => match code.as_str() {
                "ResourceNotFoundException" => SecretsError::NotFound(name.to_string()),
                "AccessDeniedException"
                | "UnrecognizedClientException"
                | "InvalidSignatureException"
                | "ExpiredTokenException" => SecretsError::Auth(format!("{}: {}", code, message)),
                "ThrottlingException"
                | "InternalServiceError"
                | "InternalServiceErrorException"
                | "ServiceUnavailableException" => {
                    SecretsError::backend(format!("{}: {}", code, message), true)
                }
                _ => SecretsError::backend(format!("{}: {}", code, message), false),
            },
            other => normalize_common(other, name),
        }
    }
}

impl fmt::Debug for AwsBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AwsBackend")
            .field("region", &self.region)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Azure Key Vault
// ============================================================================

/// Azure Key Vault adapter
///
/// Locations are secret names inside the configured vault.
#[derive(Clone)]
pub struct AzureBackend {
    client: Arc<dyn SecretClient>,
    vault_url: String,
}

impl AzureBackend {
    pub fn new(client: Arc<dyn SecretClient>, vault_url: impl Into<String>) -> Self {
        Self {
            client,
            vault_url: vault_url.into(),
        }
    }

    pub fn vault_url(&self) -> &str {
        &self.vault_url
    }

    pub fn resource_name(&self, location: &str) -> String {
        format!("{}/secrets/{}", self.vault_url.trim_end_matches('/'), location)
    }

    /// Classify Azure HTTP status codes
    pub fn normalize(error: ClientError, name: &str) -> SecretsError {
        match error {
            ClientError::Service { code, message } => match code.parse::<u16>() {
                Ok(404) => SecretsError::NotFound(name.to_string()),
                Ok(401) | Ok(403) => SecretsError::Auth(format!("HTTP {}: {}", code, message)),
                Ok(status) if status == 408 || status == 429 || (500..600).contains(&status) => {
                    SecretsError::backend(format!("HTTP {}: {}", status, message), true)
                }
                _ => SecretsError::backend(format!("HTTP {}: {}", code, message), false),
            },
            other => normalize_common(other, name),
        }
    }
}

impl fmt::Debug for AzureBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AzureBackend")
            .field("vault_url", &self.vault_url)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Google Secret Manager
// ============================================================================

/// Google Secret Manager adapter
///
/// Short names resolve to the latest version in the configured project;
/// locations starting with `projects/` are used as full resource names.
#[derive(Clone)]
pub struct GoogleBackend {
    client: Arc<dyn SecretClient>,
    project_id: String,
}

impl GoogleBackend {
    pub fn new(client: Arc<dyn SecretClient>, project_id: impl Into<String>) -> Self {
        Self {
            client,
            project_id: project_id.into(),
        }
    }

    pub fn project_id(&self) -> &str {
        &self.project_id
    }

    pub fn resource_name(&self, location: &str) -> String {
        if location.starts_with("projects/") {
            location.to_string()
        } else {
            format!(
                "projects/{}/secrets/{}/versions/latest",
                self.project_id, location
            )
        }
    }

    /// Classify gRPC status codes
    pub fn normalize(error: ClientError, name: &str) -> SecretsError {
        match error {
            ClientError::Service { code, message } => match code.to_ascii_uppercase().as_str() {
                "NOT_FOUND" => SecretsError::NotFound(name.to_string()),
                "PERMISSION_DENIED" | "UNAUTHENTICATED" => {
                    SecretsError::Auth(format!("{}: {}", code, message))
                }
                "UNAVAILABLE" | "DEADLINE_EXCEEDED" | "RESOURCE_EXHAUSTED" | "INTERNAL"
                | "ABORTED" => SecretsError::backend(format!("{}: {}", code, message), true),
                _ => SecretsError::backend(format!("{}: {}", code, message), false),
            },
            other => normalize_common(other, name),
        }
    }
}

impl fmt::Debug for GoogleBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GoogleBackend")
            .field("project_id", &self.project_id)
            .finish_non_exhaustive()
    }
}

fn normalize_common(error: ClientError, name: &str) -> SecretsError {
    match error {
        ClientError::NotFound(_) => SecretsError::NotFound(name.to_string()),
        ClientError::Transport(message) => SecretsError::backend(message, true),
        // Only reached for service errors, which each backend handles first
        ClientError::Service { code, message } => {
            SecretsError::backend(format!("{}: {}", code, message), false)
        }
    }
}

// ============================================================================
// Backend
// ============================================================================

/// The selected backend
#[derive(Debug, Clone)]
pub enum Backend {
    Aws(AwsBackend),
    Azure(AzureBackend),
    Google(GoogleBackend),
}

impl Backend {
    /// Build the backend named by `settings`, wrapping `client`
    pub fn from_settings(
        settings: &SecretsSettings,
        client: Arc<dyn SecretClient>,
    ) -> Result<Self, SecretsError> {
        match settings.backend {
            BackendKind::SecretsManager => Ok(Backend::Aws(AwsBackend::new(
                client,
                settings.region.clone(),
            ))),
            BackendKind::KeyVault => {
                let vault_url = settings.vault_url.clone().ok_or_else(|| {
                    SecretsError::InvalidSettings("keyvault backend requires vault_url".to_string())
                })?;
                Ok(Backend::Azure(AzureBackend::new(client, vault_url)))
            }
            BackendKind::GoogleSecretManager => {
                let project_id = settings.project_id.clone().ok_or_else(|| {
                    SecretsError::InvalidSettings(
                        "google_secret_manager backend requires project_id".to_string(),
                    )
                })?;
                Ok(Backend::Google(GoogleBackend::new(client, project_id)))
            }
        }
    }

    pub fn kind(&self) -> BackendKind {
        match self {
            Backend::Aws(_) => BackendKind::SecretsManager,
            Backend::Azure(_) => BackendKind::KeyVault,
            Backend::Google(_) => BackendKind::GoogleSecretManager,
        }
    }

    /// Map a source location to the backend resource name
    pub fn resource_name(&self, location: &str) -> String {
        match self {
            Backend::Aws(b) => b.resource_name(location),
            Backend::Azure(b) => b.resource_name(location),
            Backend::Google(b) => b.resource_name(location),
        }
    }

    /// One attempt, without timeout or retry
    pub async fn fetch_once(&self, location: &str) -> Result<Vec<u8>, SecretsError> {
        let name = self.resource_name(location);
        match self {
            Backend::Aws(b) => b
                .client
                .get_secret(&name)
                .await
                .map_err(|e| AwsBackend::normalize(e, &name)),
            Backend::Azure(b) => b
                .client
                .get_secret(&name)
                .await
                .map_err(|e| AzureBackend::normalize(e, &name)),
            Backend::Google(b) => b
                .client
                .get_secret(&name)
                .await
                .map_err(|e| GoogleBackend::normalize(e, &name)),
        }
    }
}
