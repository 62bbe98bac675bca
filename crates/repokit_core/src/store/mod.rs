//! Backing store boundary.
//!
//! # Responsibility
//! - Define the operations a persistence scope needs from a relational
//!   engine: plan execution, row writes, locks and set-based mutations.
//!
//! # Invariants
//! - One store instance wraps exactly one open transaction.
//! - `commit`/`rollback` consume the store; nothing runs after either.
//! - Stores never evaluate filters in memory.

mod sql;
mod sqlite;

use crate::error::RepoResult;
use crate::lock::{BulkAction, LockMode};
use crate::query::{QueryPlan, Window};
use crate::record::{DeferredLink, Record, Value};
use crate::spec::Specification;

pub use sqlite::SqliteStore;

/// Result of an update against a possibly versioned row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    /// Row written; carries the new version of versioned entities.
    Applied { version: Option<i64> },
    /// The row exists but its version moved since it was read.
    Stale,
}

pub trait Store {
    /// Loads the rows selected by `plan`, with its to-one fetch paths joined
    /// and its one-to-many fetch paths attached.
    fn execute(&self, plan: &QueryPlan, window: Option<Window>) -> RepoResult<Vec<Record>>;

    /// Inserts a new row and returns its identity.
    fn persist(&self, record: &Record) -> RepoResult<Value>;

    /// Updates an existing row.
    ///
    /// # Errors
    /// - `NotFound` when no row carries the record identity.
    fn merge(&self, record: &Record) -> RepoResult<MergeOutcome>;

    /// Deletes one row; returns whether it existed.
    fn remove(&self, entity: &str, identity: &Value) -> RepoResult<bool>;

    fn exists(&self, entity: &str, identity: &Value) -> RepoResult<bool>;

    fn count(&self, entity: &str, filter: Option<&Specification>) -> RepoResult<u64>;

    /// Blocks until `mode` is held for the plan's entity or the store's
    /// lock timeout elapses (`LockTimeout`).
    fn acquire_lock(&self, plan: &QueryPlan, mode: LockMode) -> RepoResult<()>;

    /// Applies `action` to every row matching `filter` in one statement and
    /// returns the affected row count.
    fn bulk_apply(
        &self,
        entity: &str,
        filter: Option<&Specification>,
        action: &BulkAction,
    ) -> RepoResult<u64>;

    /// Loads the rows behind a deferred association.
    fn load_deferred(&self, link: &DeferredLink) -> RepoResult<Vec<Record>>;

    fn commit(self: Box<Self>) -> RepoResult<()>;

    fn rollback(self: Box<Self>) -> RepoResult<()>;
}
