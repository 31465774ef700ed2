//! Key-path expansion and layered merging
//!
//! Flat keys such as `DATABASE__USER` are split on a delimiter (default `__`)
//! and expanded into a tree (`database -> user`). Trees from different
//! sources are then folded in ascending rank: where both sides are mappings
//! the merge recurses, otherwise the higher-ranked value replaces the lower
//! one together with its whole subtree.
//!
//! Expansion can fail (a path that is both a value and a section); merging
//! cannot.
//!
//! # Example
//!
//! ```rust,ignore
//! use settings_core::merge::{merge, KeyPathMerger};
//!
//! let merger = KeyPathMerger::default();
//! let base = merger.expand(&[("DATABASE__USER".into(), "admin".into())].into())?;
//! let overlay = merger.expand(&[("DATABASE__HOST".into(), "db".into())].into())?;
//! let merged = merge(base, overlay);
//! assert_eq!(merged.get("database.user").and_then(|v| v.as_leaf()), Some("admin"));
//! ```

use crate::sources::{FlatMap, SourceSpec};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use thiserror::Error;

/// Default key-path delimiter
pub const DEFAULT_DELIMITER: &str = "__";

/// A tree of string leaves keyed by path segment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum NestedValue {
    Leaf(String),
    Map(BTreeMap<String, NestedValue>),
}

impl Default for NestedValue {
    fn default() -> Self {
        NestedValue::Map(BTreeMap::new())
    }
}

impl NestedValue {
    pub fn leaf(value: impl Into<String>) -> Self {
        NestedValue::Leaf(value.into())
    }

    pub fn as_leaf(&self) -> Option<&str> {
        match self {
            NestedValue::Leaf(value) => Some(value),
            NestedValue::Map(_) => None,
        }
    }

    pub fn as_map(&self) -> Option<&BTreeMap<String, NestedValue>> {
        match self {
            NestedValue::Map(map) => Some(map),
            NestedValue::Leaf(_) => None,
        }
    }

    /// Look up a dotted path (`database.user`)
    pub fn get(&self, path: &str) -> Option<&NestedValue> {
        if path.is_empty() {
            return Some(self);
        }
        path.split('.').try_fold(self, |node, segment| match node {
            NestedValue::Map(map) => map.get(segment),
            NestedValue::Leaf(_) => None,
        })
    }

    /// Convert to JSON with every leaf as a string
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            NestedValue::Leaf(value) => serde_json::Value::String(value.clone()),
            NestedValue::Map(map) => serde_json::Value::Object(
                map.iter().map(|(k, v)| (k.clone(), v.to_json())).collect(),
            ),
        }
    }

    /// Number of leaves in the tree
    pub fn leaf_count(&self) -> usize {
        match self {
            NestedValue::Leaf(_) => 1,
            NestedValue::Map(map) => map.values().map(NestedValue::leaf_count).sum(),
        }
    }
}

/// Expansion failures
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PathConflictError {
    /// The same path holds a value in one key and a section in another
    #[error("path `{path}` is both a value and a section")]
    LeafAndSection { path: String },

    /// A key with an empty segment (`A____B`, leading or trailing delimiter)
    #[error("key `{key}` contains an empty path segment")]
    EmptySegment { key: String },
}

impl PathConflictError {
    /// Dotted path or raw key the error refers to
    pub fn path(&self) -> &str {
        match self {
            PathConflictError::LeafAndSection { path } => path,
            PathConflictError::EmptySegment { key } => key,
        }
    }
}

/// Two sources declared with the same rank
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("sources `{first}` and `{second}` share rank {rank}; ranks must be unique")]
pub struct DuplicateRankError {
    pub rank: i64,
    pub first: String,
    pub second: String,
}

/// Reject source sets where two specs share a rank
pub fn validate_ranks(specs: &[SourceSpec]) -> Result<(), DuplicateRankError> {
    let mut seen: HashMap<i64, &str> = HashMap::with_capacity(specs.len());
    for spec in specs {
        if let Some(first) = seen.insert(spec.rank(), spec.source_id()) {
            return Err(DuplicateRankError {
                rank: spec.rank(),
                first: first.to_string(),
                second: spec.source_id().to_string(),
            });
        }
    }
    Ok(())
}

/// Key-path options
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KeyPathOptions {
    pub delimiter: String,
    /// Keep segment case; segments are lowercased when false
    pub case_sensitive: bool,
}

impl Default for KeyPathOptions {
    fn default() -> Self {
        Self {
            delimiter: DEFAULT_DELIMITER.to_string(),
            case_sensitive: false,
        }
    }
}

/// Expands flat keys into trees and flattens them back
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeyPathMerger {
    options: KeyPathOptions,
}

impl KeyPathMerger {
    pub fn new(options: KeyPathOptions) -> Self {
        Self { options }
    }

    pub fn with_delimiter(mut self, delimiter: impl Into<String>) -> Self {
        self.options.delimiter = delimiter.into();
        self
    }

    pub fn case_sensitive(mut self, case_sensitive: bool) -> Self {
        self.options.case_sensitive = case_sensitive;
        self
    }

    pub fn delimiter(&self) -> &str {
        &self.options.delimiter
    }

    pub fn options(&self) -> &KeyPathOptions {
        &self.options
    }

    /// Expand a flat map into a tree
    ///
    /// Keys that differ only in case collapse onto one path unless the
    /// merger is case-sensitive; the last key in sorted order wins.
    pub fn expand(&self, flat: &FlatMap) -> Result<NestedValue, PathConflictError> {
        let mut root = BTreeMap::new();

        for (key, value) in flat {
            let segments = self.segments(key)?;
            insert_path(&mut root, &segments, value.clone())?;
        }

        Ok(NestedValue::Map(root))
    }

    fn segments(&self, key: &str) -> Result<Vec<String>, PathConflictError> {
        let delimiter = self.options.delimiter.as_str();
        let parts: Vec<&str> = if delimiter.is_empty() {
            vec![key]
        } else {
            key.split(delimiter).collect()
        };

        if parts.iter().any(|segment| segment.is_empty()) {
            return Err(PathConflictError::EmptySegment {
                key: key.to_string(),
            });
        }

        Ok(parts
            .into_iter()
            .map(|segment| {
                if self.options.case_sensitive {
                    segment.to_string()
                } else {
                    segment.to_lowercase()
                }
            })
            .collect())
    }

    /// Flatten a tree back into delimiter-joined keys
    pub fn flatten(&self, tree: &NestedValue) -> FlatMap {
        flatten(tree, &self.options.delimiter)
    }
}

fn insert_path(
    root: &mut BTreeMap<String, NestedValue>,
    segments: &[String],
    value: String,
) -> Result<(), PathConflictError> {
    let Some((last, parents)) = segments.split_last() else {
        return Ok(());
    };

    let mut node = root;
    for (depth, segment) in parents.iter().enumerate() {
        let child = node
            .entry(segment.clone())
            .or_insert_with(|| NestedValue::Map(BTreeMap::new()));
        node = match child {
            NestedValue::Map(map) => map,
            NestedValue::Leaf(_) => {
                return Err(PathConflictError::LeafAndSection {
                    path: segments[..=depth].join("."),
                })
            }
        };
    }

    if let Some(NestedValue::Map(_)) = node.get(last) {
        return Err(PathConflictError::LeafAndSection {
            path: segments.join("."),
        });
    }
    node.insert(last.clone(), NestedValue::Leaf(value));
    Ok(())
}

/// Merge `overlay` on top of `base`
///
/// Two mappings merge key by key; in every other combination the overlay
/// replaces the base value entirely.
pub fn merge(mut base: NestedValue, overlay: NestedValue) -> NestedValue {
    merge_into(&mut base, overlay);
    base
}

/// In-place form of [`merge`]
pub fn merge_into(base: &mut NestedValue, overlay: NestedValue) {
    match (base, overlay) {
        (NestedValue::Map(base_map), NestedValue::Map(overlay_map)) => {
            for (key, overlay_value) in overlay_map {
                match base_map.get_mut(&key) {
                    Some(base_value) => merge_into(base_value, overlay_value),
                    None => {
                        base_map.insert(key, overlay_value);
                    }
                }
            }
        }
        (base, overlay) => *base = overlay,
    }
}

/// Flatten a tree into delimiter-joined keys
pub fn flatten(tree: &NestedValue, delimiter: &str) -> FlatMap {
    let mut out = FlatMap::new();
    flatten_into(tree, "", delimiter, &mut out);
    out
}

fn flatten_into(node: &NestedValue, prefix: &str, delimiter: &str, out: &mut FlatMap) {
    match node {
        NestedValue::Map(map) => {
            for (key, child) in map {
                let path = if prefix.is_empty() {
                    key.clone()
                } else {
                    format!("{}{}{}", prefix, delimiter, key)
                };
                flatten_into(child, &path, delimiter, out);
            }
        }
        NestedValue::Leaf(value) => {
            out.insert(prefix.to_string(), value.clone());
        }
    }
}

/// The merged configuration handed to validators
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MergedConfig {
    root: NestedValue,
}

impl MergedConfig {
    pub fn new(root: NestedValue) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &NestedValue {
        &self.root
    }

    pub fn into_inner(self) -> NestedValue {
        self.root
    }

    /// Look up a dotted path
    pub fn get(&self, path: &str) -> Option<&NestedValue> {
        self.root.get(path)
    }

    /// Look up a leaf value by dotted path
    pub fn get_str(&self, path: &str) -> Option<&str> {
        self.get(path).and_then(NestedValue::as_leaf)
    }

    pub fn is_empty(&self) -> bool {
        match &self.root {
            NestedValue::Map(map) => map.is_empty(),
            NestedValue::Leaf(_) => false,
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        self.root.to_json()
    }

    pub fn flatten(&self, delimiter: &str) -> FlatMap {
        flatten(&self.root, delimiter)
    }
}

impl From<NestedValue> for MergedConfig {
    fn from(root: NestedValue) -> Self {
        Self::new(root)
    }
}
