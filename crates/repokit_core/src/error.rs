//! Repository error taxonomy.
//!
//! # Invariants
//! - Errors are surfaced to callers unmodified; nothing here is retried.
//! - SQLite busy/locked failures always map to `LockTimeout`.

use crate::db::DbError;
use std::error::Error;
use std::fmt::{Display, Formatter};

pub type RepoResult<T> = Result<T, RepoError>;

/// Error for every repository, query and persistence-scope operation.
#[derive(Debug)]
pub enum RepoError {
    /// A filter references an unknown attribute or crosses a to-many edge.
    InvalidSpecification(String),
    /// A lookup pattern, declared query or parameter binding cannot be resolved.
    UnresolvableIntent(String),
    /// No projection descriptor is registered for the requested type token.
    UnsupportedProjection { entity: String, token: String },
    /// A deferred association was accessed outside its originating scope.
    DetachedAccess { entity: String, association: String },
    /// A deferred association was accessed without going through its scope.
    DeferredAssociation { entity: String, association: String },
    /// A pessimistic lock or write transaction could not be acquired in time.
    LockTimeout(String),
    /// A versioned row changed underneath the writer.
    OptimisticConflict { entity: String, identity: String },
    /// A lookup that demanded exactly one row found none.
    NotFound { entity: String, identity: String },
    /// A single-result lookup matched more than one row.
    NonUniqueResult { entity: String, matched: usize },
    /// An owning association points at an entity that was never saved.
    TransientReference { entity: String, association: String },
    /// Page size or index out of range.
    InvalidPageRequest(String),
    /// Entity or projection metadata is inconsistent.
    InvalidDescriptor(String),
    /// Persisted data cannot be decoded into the declared shape.
    InvalidData(String),
    Db(DbError),
}

impl Display for RepoError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidSpecification(message) => write!(f, "invalid specification: {message}"),
            Self::UnresolvableIntent(message) => write!(f, "unresolvable query: {message}"),
            Self::UnsupportedProjection { entity, token } => {
                write!(f, "no projection `{token}` registered for entity `{entity}`")
            }
            Self::DetachedAccess {
                entity,
                association,
            } => write!(
                f,
                "association `{entity}.{association}` accessed after its persistence scope ended"
            ),
            Self::DeferredAssociation {
                entity,
                association,
            } => write!(
                f,
                "association `{entity}.{association}` is not loaded; resolve it through its scope"
            ),
            Self::LockTimeout(message) => write!(f, "lock timeout: {message}"),
            Self::OptimisticConflict { entity, identity } => write!(
                f,
                "optimistic conflict on `{entity}` {identity}: row was modified concurrently"
            ),
            Self::NotFound { entity, identity } => write!(f, "{entity} not found: {identity}"),
            Self::NonUniqueResult { entity, matched } => write!(
                f,
                "expected at most one `{entity}` row, query matched {matched}"
            ),
            Self::TransientReference {
                entity,
                association,
            } => write!(
                f,
                "association `{entity}.{association}` references an unsaved entity"
            ),
            Self::InvalidPageRequest(message) => write!(f, "invalid page request: {message}"),
            Self::InvalidDescriptor(message) => write!(f, "invalid descriptor: {message}"),
            Self::InvalidData(message) => write!(f, "invalid persisted data: {message}"),
            Self::Db(err) => write!(f, "{err}"),
        }
    }
}

impl Error for RepoError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Db(err) => Some(err),
            _ => None,
        }
    }
}

impl From<DbError> for RepoError {
    fn from(value: DbError) -> Self {
        match value {
            DbError::Sqlite(err) => Self::from(err),
            other => Self::Db(other),
        }
    }
}

impl From<rusqlite::Error> for RepoError {
    fn from(value: rusqlite::Error) -> Self {
        if is_busy(&value) {
            return Self::LockTimeout(value.to_string());
        }
        Self::Db(DbError::Sqlite(value))
    }
}

/// Returns whether SQLite gave up waiting for a lock.
pub(crate) fn is_busy(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(failure, _)
            if matches!(
                failure.code,
                rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
            )
    )
}

#[cfg(test)]
mod tests {
    use super::RepoError;

    #[test]
    fn busy_sqlite_failures_become_lock_timeouts() {
        let busy = rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_BUSY),
            Some("database is locked".to_string()),
        );
        assert!(matches!(RepoError::from(busy), RepoError::LockTimeout(_)));

        let other = rusqlite::Error::QueryReturnedNoRows;
        assert!(matches!(RepoError::from(other), RepoError::Db(_)));
    }
}
