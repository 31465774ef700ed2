//! Render a merged tree as JSON or YAML

use crate::merge::MergedConfig;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ExportError {
    #[error("unsupported export format `{0}` (expected json or yaml)")]
    UnsupportedFormat(String),

    #[error("serialization failed: {0}")]
    Serialization(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Json,
    Yaml,
}

impl FromStr for ExportFormat {
    type Err = ExportError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "json" => Ok(ExportFormat::Json),
            "yaml" | "yml" => Ok(ExportFormat::Yaml),
            _ => Err(ExportError::UnsupportedFormat(s.to_string())),
        }
    }
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExportFormat::Json => f.write_str("json"),
            ExportFormat::Yaml => f.write_str("yaml"),
        }
    }
}

/// Pretty-printed JSON with two-space indentation
pub fn to_json_string(config: &MergedConfig) -> Result<String, ExportError> {
    serde_json::to_string_pretty(config).map_err(|e| ExportError::Serialization(e.to_string()))
}

/// Block-style YAML
pub fn to_yaml_string(config: &MergedConfig) -> Result<String, ExportError> {
    serde_yaml::to_string(config).map_err(|e| ExportError::Serialization(e.to_string()))
}

pub fn render(config: &MergedConfig, format: ExportFormat) -> Result<String, ExportError> {
    match format {
        ExportFormat::Json => to_json_string(config),
        ExportFormat::Yaml => to_yaml_string(config),
    }
}

/// Render `config` in the format named by `format` (`json` or `yaml`)
pub fn export(config: &MergedConfig, format: &str) -> Result<String, ExportError> {
    render(config, format.parse()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::merge::KeyPathMerger;
    use crate::sources::FlatMap;

    fn sample() -> MergedConfig {
        let flat: FlatMap = [
            ("APP_NAME", "demo"),
            ("DATABASE__USER", "admin"),
            ("DATABASE__PORT", "5432"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
        MergedConfig::new(KeyPathMerger::default().expand(&flat).unwrap())
    }

    #[test]
    fn test_json_export() {
        let json = export(&sample(), "json").unwrap();
        assert!(json.contains("\n  \"app_name\": \"demo\""));

        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["database"]["user"], "admin");
        assert_eq!(value["database"]["port"], "5432");
    }

    #[test]
    fn test_yaml_export() {
        let yaml = export(&sample(), "YAML").unwrap();
        assert!(yaml.contains("database:\n"));

        let value: serde_yaml::Value = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(value["database"]["user"].as_str(), Some("admin"));
    }

    #[test]
    fn test_unsupported_format() {
        let err = export(&sample(), "xml").unwrap_err();
        assert!(matches!(err, ExportError::UnsupportedFormat(ref f) if f == "xml"));
    }
}
