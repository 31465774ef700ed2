//! Structured configuration bundles (YAML, JSON, TOML)
//!
//! Each format is parsed into a `serde_json::Value` tree, which is then
//! flattened into delimiter-joined keys so that every source kind feeds the
//! merger the same shape of data.
//!
//! ```text
//! database:            database__host = "localhost"
//!   host: localhost -> database__port = "5432"
//!   port: 5432         features       = "[\"a\",\"b\"]"
//! features: [a, b]
//! ```

use super::{FlatMap, SourceError, SourceKind, SourceResult};
use serde_json::Value;

/// Structured file formats
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BundleFormat {
    Yaml,
    Json,
    Toml,
}

impl BundleFormat {
    pub fn for_kind(kind: SourceKind) -> Option<Self> {
        match kind {
            SourceKind::Yaml => Some(BundleFormat::Yaml),
            SourceKind::Json => Some(BundleFormat::Json),
            SourceKind::Toml => Some(BundleFormat::Toml),
            _ => None,
        }
    }

    /// Parse `content` into a JSON value tree
    pub fn parse(&self, content: &str) -> Result<Value, String> {
        match self {
            BundleFormat::Yaml => serde_yaml::from_str(content).map_err(|e| e.to_string()),
            BundleFormat::Json => serde_json::from_str(content).map_err(|e| e.to_string()),
            BundleFormat::Toml => toml::from_str(content).map_err(|e| e.to_string()),
        }
    }
}

/// Parse a bundle and flatten it with `delimiter`
///
/// The document root must be a mapping; an empty document yields an empty
/// map.
pub fn parse_bundle(
    source_id: &str,
    format: BundleFormat,
    content: &str,
    delimiter: &str,
) -> SourceResult<FlatMap> {
    if content.trim().is_empty() {
        return Ok(FlatMap::new());
    }

    let value = format
        .parse(content)
        .map_err(|reason| SourceError::parse(source_id, reason))?;

    flatten_document(source_id, &value, delimiter)
}

/// Flatten a parsed document whose root must be an object (or null)
pub fn flatten_document(source_id: &str, value: &Value, delimiter: &str) -> SourceResult<FlatMap> {
    match value {
        Value::Null => Ok(FlatMap::new()),
        Value::Object(_) => {
            let mut out = FlatMap::new();
            flatten_value(value, "", delimiter, &mut out);
            Ok(out)
        }
        other => Err(SourceError::parse(
            source_id,
            format!("document root must be a mapping, found {}", type_name(other)),
        )),
    }
}

/// Flatten `value` into `out`, prefixing keys with `prefix`
pub fn flatten_value(value: &Value, prefix: &str, delimiter: &str, out: &mut FlatMap) {
    match value {
        Value::Object(map) => {
            for (key, child) in map {
                let path = if prefix.is_empty() {
                    key.clone()
                } else {
                    format!("{}{}{}", prefix, delimiter, key)
                };
                flatten_value(child, &path, delimiter, out);
            }
        }
        leaf => {
            out.insert(prefix.to_string(), render_leaf(leaf));
        }
    }
}

/// Textual form of a non-object value
pub fn render_leaf(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        // Arrays (and objects, though callers recurse into those) as compact JSON
        other => other.to_string(),
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "mapping",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_yaml_bundle() {
        let content = r#"
app_name: Base
debug: false
database:
  user: admin
  port: 5432
  ratio: 0.5
features:
  - a
  - b
optional: ~
"#;
        let values = parse_bundle("yaml", BundleFormat::Yaml, content, "__").unwrap();

        assert_eq!(values.get("app_name").unwrap(), "Base");
        assert_eq!(values.get("debug").unwrap(), "false");
        assert_eq!(values.get("database__user").unwrap(), "admin");
        assert_eq!(values.get("database__port").unwrap(), "5432");
        assert_eq!(values.get("database__ratio").unwrap(), "0.5");
        assert_eq!(values.get("features").unwrap(), r#"["a","b"]"#);
        assert_eq!(values.get("optional").unwrap(), "");
    }

    #[test]
    fn test_json_bundle() {
        let content = r#"{"database": {"host": "db", "pool": {"max": 10}}, "debug": true}"#;
        let values = parse_bundle("json", BundleFormat::Json, content, "__").unwrap();

        assert_eq!(values.get("database__host").unwrap(), "db");
        assert_eq!(values.get("database__pool__max").unwrap(), "10");
        assert_eq!(values.get("debug").unwrap(), "true");
    }

    #[test]
    fn test_toml_bundle() {
        let content = r#"
app_name = "Base"

[database]
user = "admin"
port = 5432
"#;
        let values = parse_bundle("toml", BundleFormat::Toml, content, "__").unwrap();

        assert_eq!(values.get("app_name").unwrap(), "Base");
        assert_eq!(values.get("database__user").unwrap(), "admin");
        assert_eq!(values.get("database__port").unwrap(), "5432");
    }

    #[test]
    fn test_custom_delimiter() {
        let content = r#"{"a": {"b": "c"}}"#;
        let values = parse_bundle("json", BundleFormat::Json, content, ".").unwrap();
        assert_eq!(values.get("a.b").unwrap(), "c");
    }

    #[test]
    fn test_empty_document() {
        assert!(parse_bundle("yaml", BundleFormat::Yaml, "", "__").unwrap().is_empty());
        assert!(parse_bundle("yaml", BundleFormat::Yaml, "  \n", "__").unwrap().is_empty());
        assert!(parse_bundle("json", BundleFormat::Json, "null", "__").unwrap().is_empty());
    }

    #[test]
    fn test_non_mapping_root_is_parse_error() {
        let result = parse_bundle("json", BundleFormat::Json, "[1, 2]", "__");
        assert!(matches!(result, Err(SourceError::Parse { .. })));

        let result = parse_bundle("yaml", BundleFormat::Yaml, "just a string", "__");
        assert!(matches!(result, Err(SourceError::Parse { .. })));
    }

    #[test]
    fn test_malformed_content_is_parse_error() {
        let result = parse_bundle("json", BundleFormat::Json, "{not json", "__");
        match result {
            Err(SourceError::Parse { source_id, .. }) => assert_eq!(source_id, "json"),
            other => panic!("expected parse error, got {:?}", other),
        }

        let result = parse_bundle("toml", BundleFormat::Toml, "a = ", "__");
        assert!(matches!(result, Err(SourceError::Parse { .. })));
    }

    #[test]
    fn test_format_for_kind() {
        assert_eq!(BundleFormat::for_kind(SourceKind::Yaml), Some(BundleFormat::Yaml));
        assert_eq!(BundleFormat::for_kind(SourceKind::Toml), Some(BundleFormat::Toml));
        assert_eq!(BundleFormat::for_kind(SourceKind::PlainFile), None);
    }
}
