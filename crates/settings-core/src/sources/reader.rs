//! The default [`SourceReader`]
//!
//! Dispatches on [`SourceKind`] to the file, bundle, environment and remote
//! readers in this module tree.

use super::bundles::{flatten_document, parse_bundle, BundleFormat};
use super::encrypted::{read_encrypted, PassphraseSource};
use super::env::{parse_dotenv_bytes, read_environment};
use super::{FlatMap, SourceError, SourceKind, SourceReader, SourceResult, SourceSpec, UnavailableCause};
use crate::merge::DEFAULT_DELIMITER;
use crate::secrets::SecretsGateway;
use tracing::debug;

/// Reads local files, the process environment and remote secrets
#[derive(Debug, Clone)]
pub struct DefaultSourceReader {
    delimiter: String,
    passphrase: PassphraseSource,
    gateway: Option<SecretsGateway>,
}

impl Default for DefaultSourceReader {
    fn default() -> Self {
        Self::new()
    }
}

impl DefaultSourceReader {
    /// Reader with the `__` delimiter, the `SETTINGS_PASSPHRASE` variable as
    /// passphrase source and no secrets backend
    pub fn new() -> Self {
        Self {
            delimiter: DEFAULT_DELIMITER.to_string(),
            passphrase: PassphraseSource::default(),
            gateway: None,
        }
    }

    pub fn with_delimiter(mut self, delimiter: impl Into<String>) -> Self {
        self.delimiter = delimiter.into();
        self
    }

    pub fn with_passphrase(mut self, passphrase: PassphraseSource) -> Self {
        self.passphrase = passphrase;
        self
    }

    pub fn with_gateway(mut self, gateway: SecretsGateway) -> Self {
        self.gateway = Some(gateway);
        self
    }

    pub fn delimiter(&self) -> &str {
        &self.delimiter
    }

    async fn read_file(&self, spec: &SourceSpec) -> SourceResult<Vec<u8>> {
        let path = spec.path();
        tokio::fs::read(&path)
            .await
            .map_err(|e| SourceError::io(spec.source_id(), &path, e))
    }

    async fn read_bundle(&self, spec: &SourceSpec, format: BundleFormat) -> SourceResult<FlatMap> {
        let bytes = self.read_file(spec).await?;
        let content = String::from_utf8(bytes)
            .map_err(|_| SourceError::parse(spec.source_id(), "file is not valid UTF-8"))?;
        parse_bundle(spec.source_id(), format, &content, &self.delimiter)
    }

    async fn read_remote(&self, spec: &SourceSpec) -> SourceResult<FlatMap> {
        let gateway = self
            .gateway
            .as_ref()
            .ok_or_else(|| SourceError::unavailable(spec.source_id(), UnavailableCause::NoSecretsBackend))?;

        let bytes = gateway
            .fetch(spec.location())
            .await
            .map_err(|e| SourceError::unavailable(spec.source_id(), e))?;

        let document: serde_json::Value = serde_json::from_slice(&bytes).map_err(|e| {
            SourceError::parse(
                spec.source_id(),
                format!("secret is not a JSON object (line {}, column {})", e.line(), e.column()),
            )
        })?;

        flatten_document(spec.source_id(), &document, &self.delimiter)
    }
}

#[async_trait::async_trait]
impl SourceReader for DefaultSourceReader {
    async fn read(&self, spec: &SourceSpec) -> SourceResult<FlatMap> {
        debug!(
            source_id = %spec.source_id(),
            kind = %spec.kind(),
            rank = spec.rank(),
            "Reading source"
        );

        let values = match spec.kind() {
            SourceKind::PlainFile => {
                let bytes = self.read_file(spec).await?;
                parse_dotenv_bytes(spec.source_id(), &bytes)?
            }
            SourceKind::EncryptedFile => {
                read_encrypted(spec.source_id(), &spec.path(), &self.passphrase).await?
            }
            SourceKind::Yaml | SourceKind::Json | SourceKind::Toml => {
                let format = BundleFormat::for_kind(spec.kind()).ok_or_else(|| {
                    SourceError::parse(spec.source_id(), format!("{} is not a bundle format", spec.kind()))
                })?;
                self.read_bundle(spec, format).await?
            }
            SourceKind::Environment => read_environment(spec.location(), &self.delimiter),
            SourceKind::RemoteSecret => self.read_remote(spec).await?,
        };

        debug!(
            source_id = %spec.source_id(),
            keys = values.len(),
            "Read source"
        );
        Ok(values)
    }
}
