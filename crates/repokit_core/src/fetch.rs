//! Fetch graph planner: explicit eager association paths.
//!
//! # Responsibility
//! - Validate dotted association paths against the registry.
//! - Expand every path into its to-one prefixes so the store can join them
//!   in order.
//!
//! # Invariants
//! - Paths are finite and explicit; cycles in the association graph are
//!   never followed beyond what the caller listed.
//! - Only the final segment of a path may be a one-to-many association.

use crate::error::{RepoError, RepoResult};
use crate::registry::{Cardinality, EntityRegistry};

/// One validated eager path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchPath {
    path: String,
    cardinality: Cardinality,
}

impl FetchPath {
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn cardinality(&self) -> Cardinality {
        self.cardinality
    }

    pub fn is_to_one(&self) -> bool {
        self.cardinality == Cardinality::ManyToOne
    }

    /// Path segments (`["team", "league"]`).
    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.path.split('.')
    }

    /// The path without its last segment; empty for root associations.
    pub fn parent(&self) -> &str {
        self.path.rsplit_once('.').map_or("", |(parent, _)| parent)
    }

    pub fn last(&self) -> &str {
        self.path.rsplit_once('.').map_or(self.path.as_str(), |(_, last)| last)
    }
}

/// Resolves `requested` paths on `entity` into a de-duplicated list where
/// every to-one prefix precedes the paths that extend it.
///
/// # Errors
/// - `UnresolvableIntent` for unknown associations or a path that continues
///   past a one-to-many segment.
pub fn plan_fetch<S: AsRef<str>>(
    registry: &EntityRegistry,
    entity: &str,
    requested: &[S],
) -> RepoResult<Vec<FetchPath>> {
    let mut planned: Vec<FetchPath> = Vec::new();
    for raw in requested {
        let raw = raw.as_ref().trim();
        let segments: Vec<&str> = raw.split('.').collect();
        for depth in 1..=segments.len() {
            let prefix = segments[..depth].join(".");
            if planned.iter().any(|known| known.path == prefix) {
                continue;
            }
            let (_, association) = registry
                .resolve_association(entity, &prefix)
                .map_err(|err| {
                    RepoError::UnresolvableIntent(format!(
                        "fetch path `{raw}` on `{entity}`: {err}"
                    ))
                })?;
            planned.push(FetchPath {
                path: prefix,
                cardinality: association.cardinality,
            });
        }
    }
    Ok(planned)
}
