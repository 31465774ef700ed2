//! Settings Resolution
//!
//! The resolver ties the pieces together for one call:
//!
//! 1. reject duplicate ranks before any I/O
//! 2. select the sources that apply to the profile
//! 3. read them concurrently under one shared deadline
//! 4. expand each result and fold them in ascending rank
//! 5. hand the merged tree to a validator
//!
//! A best-effort source that fails is recorded in the result and skipped.
//! A required source that fails aborts the call; reads still in flight are
//! dropped. The fold only starts once every read has finished, so the result
//! does not depend on completion order and a validator never sees a partial
//! configuration.
//!
//! # Example
//!
//! ```rust,ignore
//! use settings_core::{DefaultSourceReader, KeyPathMerger, Profile, SettingsResolver};
//!
//! let resolver = SettingsResolver::new(DefaultSourceReader::new(), KeyPathMerger::default())
//!     .with_budget(std::time::Duration::from_secs(5));
//!
//! let loaded = resolver.load(&specs, Profile::Production).await?;
//! println!("{}", loaded.merged.to_json());
//! ```

use crate::merge::{
    merge_into, validate_ranks, DuplicateRankError, KeyPathMerger, MergedConfig, NestedValue,
    PathConflictError,
};
use crate::profile::{self, applicable_sources, Profile};
use crate::sources::{FlatMap, SourceError, SourceReader, SourceSpec, UnavailableCause};
use crate::validate::SettingsValidator;
use chrono::{DateTime, Utc};
use futures::stream::{FuturesUnordered, StreamExt};
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Default budget shared by all reads of one resolution
pub const DEFAULT_BUDGET: Duration = Duration::from_secs(30);

/// Per-call resolution options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolveOptions {
    /// Deadline for all source reads, measured from the start of the call
    pub budget: Duration,
}

impl Default for ResolveOptions {
    fn default() -> Self {
        Self {
            budget: DEFAULT_BUDGET,
        }
    }
}

/// A best-effort source that was skipped
#[derive(Debug)]
pub struct SourceFailure {
    pub source_id: String,
    pub rank: i64,
    pub error: SourceError,
}

/// Merged configuration without validation
#[derive(Debug)]
pub struct Loaded {
    pub merged: MergedConfig,
    /// Skipped sources, in ascending rank
    pub failures: Vec<SourceFailure>,
    pub profile: Profile,
    pub loaded_at: DateTime<Utc>,
}

/// Validated settings together with the data they were built from
#[derive(Debug)]
pub struct Resolved<S> {
    pub settings: S,
    pub merged: MergedConfig,
    /// Skipped sources, in ascending rank
    pub failures: Vec<SourceFailure>,
    pub profile: Profile,
    pub loaded_at: DateTime<Utc>,
}

/// Resolution errors
///
/// `E` is the validator's error type; it is `Infallible` for [`SettingsResolver::load`].
#[derive(Error, Debug)]
pub enum ResolveError<E = Infallible> {
    #[error(transparent)]
    DuplicateRank(#[from] DuplicateRankError),

    #[error("source `{source_id}` has conflicting keys: {error}")]
    PathConflict {
        source_id: String,
        #[source]
        error: PathConflictError,
    },

    #[error("required {0}")]
    RequiredSource(#[source] SourceError),

    #[error("settings validation failed: {0}")]
    Validation(#[source] E),
}

impl ResolveError<Infallible> {
    /// Re-type a load error for a resolution with validator error `E`
    pub fn widen<E>(self) -> ResolveError<E> {
        match self {
            ResolveError::DuplicateRank(e) => ResolveError::DuplicateRank(e),
            ResolveError::PathConflict { source_id, error } => {
                ResolveError::PathConflict { source_id, error }
            }
            ResolveError::RequiredSource(e) => ResolveError::RequiredSource(e),
            ResolveError::Validation(never) => match never {},
        }
    }
}

/// Resolves layered sources into settings
///
/// Cheap to clone; clones share the reader.
#[derive(Debug, Clone)]
pub struct SettingsResolver {
    reader: Arc<dyn SourceReader>,
    merger: KeyPathMerger,
    options: ResolveOptions,
}

impl SettingsResolver {
    pub fn new<R: SourceReader + 'static>(reader: R, merger: KeyPathMerger) -> Self {
        Self::from_arc(Arc::new(reader), merger)
    }

    pub fn from_arc(reader: Arc<dyn SourceReader>, merger: KeyPathMerger) -> Self {
        Self {
            reader,
            merger,
            options: ResolveOptions::default(),
        }
    }

    pub fn with_budget(mut self, budget: Duration) -> Self {
        self.options.budget = budget;
        self
    }

    pub fn with_options(mut self, options: ResolveOptions) -> Self {
        self.options = options;
        self
    }

    pub fn options(&self) -> &ResolveOptions {
        &self.options
    }

    pub fn merger(&self) -> &KeyPathMerger {
        &self.merger
    }

    /// Read, expand and fold the sources for `profile`
    pub async fn load(&self, specs: &[SourceSpec], profile: Profile) -> Result<Loaded, ResolveError> {
        validate_ranks(specs)?;

        let started = Instant::now();
        let deadline = started + self.options.budget;
        let budget = self.options.budget;
        let applicable = applicable_sources(specs, profile);

        debug!(
            profile = %profile,
            sources = applicable.len(),
            budget_ms = budget.as_millis() as u64,
            "Resolving settings"
        );

        let mut pending: FuturesUnordered<_> = applicable
            .iter()
            .copied()
            .map(|spec| {
                let reader = &self.reader;
                async move {
                    let result = match tokio::time::timeout_at(deadline, reader.read(spec)).await {
                        Ok(result) => result,
                        Err(_) => Err(SourceError::unavailable(
                            spec.source_id(),
                            UnavailableCause::BudgetExhausted(budget),
                        )),
                    };
                    (spec, result)
                }
            })
            .collect();

        let mut layers: Vec<(&SourceSpec, FlatMap)> = Vec::with_capacity(applicable.len());
        let mut failures = Vec::new();

        while let Some((spec, result)) = pending.next().await {
            match result {
                Ok(values) => {
                    debug!(source_id = %spec.source_id(), rank = spec.rank(), keys = values.len(), "Source loaded");
                    layers.push((spec, values));
                }
                Err(e) if spec.is_required() => {
                    error!(
                        source_id = %spec.source_id(),
                        rank = spec.rank(),
                        kind = %spec.kind(),
                        error = %e,
                        "Required source failed, aborting resolution"
                    );
                    return Err(ResolveError::RequiredSource(e));
                }
                Err(e) => {
                    if e.is_integrity_failure() {
                        error!(
                            source_id = %spec.source_id(),
                            rank = spec.rank(),
                            error = %e,
                            "Encrypted source failed integrity check, skipping"
                        );
                    } else {
                        warn!(
                            source_id = %spec.source_id(),
                            rank = spec.rank(),
                            kind = %spec.kind(),
                            error = %e,
                            "Skipping unavailable source"
                        );
                    }
                    failures.push(SourceFailure {
                        source_id: spec.source_id().to_string(),
                        rank: spec.rank(),
                        error: e,
                    });
                }
            }
        }

        layers.sort_by_key(|(spec, _)| spec.rank());
        failures.sort_by_key(|failure| failure.rank);

        let loaded_count = layers.len();
        let mut merged = NestedValue::default();
        for (spec, values) in layers {
            let tree = self.merger.expand(&values).map_err(|error| {
                error!(source_id = %spec.source_id(), error = %error, "Conflicting keys in source");
                ResolveError::PathConflict {
                    source_id: spec.source_id().to_string(),
                    error,
                }
            })?;
            merge_into(&mut merged, tree);
        }

        info!(
            profile = %profile,
            loaded = loaded_count,
            skipped = failures.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Settings resolved"
        );

        Ok(Loaded {
            merged: MergedConfig::new(merged),
            failures,
            profile,
            loaded_at: Utc::now(),
        })
    }

    /// Load and validate the sources for `profile`
    pub async fn resolve<V: SettingsValidator>(
        &self,
        specs: &[SourceSpec],
        profile: Profile,
        validator: &V,
    ) -> Result<Resolved<V::Settings>, ResolveError<V::Error>> {
        let loaded = self
            .load(specs, profile)
            .await
            .map_err(ResolveError::<Infallible>::widen)?;

        let settings = validator.validate(&loaded.merged).map_err(|e| {
            warn!(profile = %profile, error = %e, "Settings validation failed");
            ResolveError::Validation(e)
        })?;

        Ok(Resolved {
            settings,
            merged: loaded.merged,
            failures: loaded.failures,
            profile: loaded.profile,
            loaded_at: loaded.loaded_at,
        })
    }

    /// [`resolve`](Self::resolve) with the process-wide default profile,
    /// captured once when the call starts
    pub async fn resolve_current<V: SettingsValidator>(
        &self,
        specs: &[SourceSpec],
        validator: &V,
    ) -> Result<Resolved<V::Settings>, ResolveError<V::Error>> {
        let profile = profile::current();
        self.resolve(specs, profile, validator).await
    }
}
