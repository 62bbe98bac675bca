//! Generic repository layer over SQLite.
//!
//! Entities are described once in an `EntityRegistry`; a `Repository<E>`
//! resolves lookups (derived patterns, declared text, examples or composed
//! specifications) into query plans and executes them inside a `Scope`,
//! reshaping rows into entities, views or DTOs.

pub mod audit;
pub mod config;
pub mod db;
pub mod entity;
pub mod error;
pub mod fetch;
pub mod identity;
pub mod lock;
pub mod logging;
pub mod model;
pub mod paging;
pub mod projection;
pub mod query;
pub mod record;
pub mod registry;
pub mod repo;
pub mod scope;
pub mod spec;
pub mod store;

pub use audit::{AuditMetadata, AuditorSource, Clock, FixedAuditor, ManualClock, SystemClock};
pub use config::{AuditingConfig, RepositoryConfig, TransactionMode};
pub use entity::{Association, Collection, Entity};
pub use error::{RepoError, RepoResult};
pub use lock::{LockMode, Mutation, QueryHints};
pub use logging::{default_log_level, init_logging, logging_status, LoggingError};
pub use paging::{Direction, Page, PageRequest, Slice, Sort};
pub use projection::{Projected, Projection, ProjectionDescriptor, ProjectionKind, ProjectionRegistry};
pub use query::{Example, Params, QueryPlan};
pub use record::{EntityMeta, Link, Record, Value};
pub use registry::{AttributeKind, AuditMode, EntityDescriptor, EntityRegistry};
pub use repo::{Repository, RepositoryBuilder};
pub use scope::{Database, Scope, ScopeContext};
pub use spec::{and, or, Criteria, Operand, Specification};

/// Minimal health-check API for early integration.
pub fn ping() -> &'static str {
    "pong"
}

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::{core_version, ping};

    #[test]
    fn ping_returns_pong() {
        assert_eq!(ping(), "pong");
    }

    #[test]
    fn version_is_not_empty() {
        assert!(!core_version().is_empty());
    }
}
