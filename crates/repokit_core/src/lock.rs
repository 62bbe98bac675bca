//! Locking mediator inputs: lock modes, query hints and bulk mutations.
//!
//! # Invariants
//! - `PessimisticWrite` blocks until the store write lock is held or the
//!   lock timeout fires; a query's `timeout_ms` hint takes precedence over
//!   the configured one.
//! - Bulk mutations only touch scalar attributes of the root entity; they
//!   never write identity, version or audit columns.

use crate::error::{RepoError, RepoResult};
use crate::record::Value;
use crate::registry::EntityDescriptor;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LockMode {
    #[default]
    None,
    PessimisticWrite,
    OptimisticRead,
}

impl LockMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::PessimisticWrite => "pessimistic_write",
            Self::OptimisticRead => "optimistic_read",
        }
    }
}

/// Per-query execution hints.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueryHints {
    /// Loaded rows are marked read-only and skipped by `save`.
    pub read_only: bool,
    /// Replaces the configured lock timeout for this query's statements.
    pub timeout_ms: Option<u64>,
}

impl QueryHints {
    pub fn read_only() -> Self {
        Self {
            read_only: true,
            timeout_ms: None,
        }
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Assignment {
    Set(Value),
    Increment(Value),
}

/// Set-based mutation applied to every row matching a filter.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Mutation {
    assignments: Vec<(String, Assignment)>,
}

impl Mutation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(mut self, attribute: &str, value: impl Into<Value>) -> Self {
        self.assignments
            .push((attribute.to_string(), Assignment::Set(value.into())));
        self
    }

    pub fn increment(mut self, attribute: &str, delta: impl Into<Value>) -> Self {
        self.assignments
            .push((attribute.to_string(), Assignment::Increment(delta.into())));
        self
    }

    pub fn assignments(&self) -> &[(String, Assignment)] {
        &self.assignments
    }

    /// Checks every assignment against the root entity's attributes.
    ///
    /// # Errors
    /// - `InvalidSpecification` for empty mutations, unknown or identity
    ///   attributes, and increments of non-numeric values.
    pub(crate) fn validate(&self, descriptor: &EntityDescriptor) -> RepoResult<()> {
        if self.assignments.is_empty() {
            return Err(RepoError::InvalidSpecification(format!(
                "bulk mutation on `{}` assigns nothing",
                descriptor.name
            )));
        }
        for (attribute, assignment) in &self.assignments {
            if descriptor.attribute(attribute).is_none() {
                return Err(RepoError::InvalidSpecification(format!(
                    "bulk mutation targets unknown attribute `{}.{attribute}`",
                    descriptor.name
                )));
            }
            if let Assignment::Increment(delta) = assignment {
                if !matches!(delta, Value::Integer(_) | Value::Real(_)) {
                    return Err(RepoError::InvalidSpecification(format!(
                        "cannot increment `{}.{attribute}` by {delta:?}",
                        descriptor.name
                    )));
                }
            }
        }
        Ok(())
    }
}

/// What a bulk statement does to the matching rows.
#[derive(Debug, Clone, PartialEq)]
pub enum BulkAction {
    Update(Mutation),
    Delete,
}

impl BulkAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Update(_) => "update",
            Self::Delete => "delete",
        }
    }
}
