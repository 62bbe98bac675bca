//! Projection mapping: reshape query rows into caller-chosen views.
//!
//! # Responsibility
//! - Hold compiled projection descriptors keyed by `(entity, token)`.
//! - Map loaded rows to entity records, closed/open views or DTO rows.
//!
//! # Invariants
//! - Views never write back to the store.
//! - An unregistered token fails with `UnsupportedProjection`; nothing falls
//!   back to the full entity silently.

pub mod descriptor;
pub mod mapper;
pub mod template;
pub mod view;

use crate::error::{RepoError, RepoResult};
use crate::record::Record;
use crate::registry::EntityRegistry;
use log::debug;
use std::collections::BTreeMap;

pub use descriptor::{ProjectionDescriptor, ProjectionKind, ProjectionMember};
pub use mapper::{compile, CompiledProjection};
pub use template::Template;
pub use view::{DtoRow, View, ViewValue};

/// One projected row.
#[derive(Debug, Clone, PartialEq)]
pub enum Projected {
    Entity(Record),
    Closed(View),
    Open(View),
    Dto(DtoRow),
}

impl Projected {
    pub fn kind(&self) -> ProjectionKind {
        match self {
            Self::Entity(_) => ProjectionKind::Entity,
            Self::Closed(_) => ProjectionKind::Closed,
            Self::Open(_) => ProjectionKind::Open,
            Self::Dto(_) => ProjectionKind::Dto,
        }
    }

    /// Closed or open view.
    pub fn into_view(self) -> RepoResult<View> {
        match self {
            Self::Closed(view) | Self::Open(view) => Ok(view),
            other => Err(other.mismatch("view")),
        }
    }

    pub fn into_dto(self) -> RepoResult<DtoRow> {
        match self {
            Self::Dto(row) => Ok(row),
            other => Err(other.mismatch("DTO row")),
        }
    }

    pub fn into_record(self) -> RepoResult<Record> {
        match self {
            Self::Entity(record) => Ok(record),
            other => Err(other.mismatch("entity row")),
        }
    }

    fn mismatch(&self, expected: &str) -> RepoError {
        RepoError::InvalidData(format!(
            "{} projection cannot be read as {expected}",
            self.kind().as_str()
        ))
    }
}

/// A typed projection the caller can request by type.
pub trait Projection: Sized {
    const TOKEN: &'static str;

    fn descriptor() -> ProjectionDescriptor;

    fn from_projected(projected: Projected) -> RepoResult<Self>;
}

/// Compiled projections for one repository.
#[derive(Debug, Clone, Default)]
pub struct ProjectionRegistry {
    entries: BTreeMap<(String, String), CompiledProjection>,
}

impl ProjectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Compiles and stores `descriptor`.
    ///
    /// # Errors
    /// - `InvalidDescriptor` when the descriptor does not compile or the
    ///   token is already registered for the entity.
    pub fn register(
        &mut self,
        registry: &EntityRegistry,
        descriptor: &ProjectionDescriptor,
    ) -> RepoResult<()> {
        let key = (
            descriptor.entity_name().to_string(),
            descriptor.token().to_string(),
        );
        if self.entries.contains_key(&key) {
            return Err(RepoError::InvalidDescriptor(format!(
                "projection `{}` registered twice for `{}`",
                key.1, key.0
            )));
        }
        let compiled = compile(registry, descriptor)?;
        debug!(
            "event=projection_register module=projection entity={} token={} kind={}",
            key.0,
            key.1,
            compiled.kind().as_str()
        );
        self.entries.insert(key, compiled);
        Ok(())
    }

    pub fn contains(&self, entity: &str, token: &str) -> bool {
        self.entries
            .contains_key(&(entity.to_string(), token.to_string()))
    }

    /// Registered tokens of `entity`.
    pub fn tokens<'a>(&'a self, entity: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.entries
            .keys()
            .filter(move |(owner, _)| owner == entity)
            .map(|(_, token)| token.as_str())
    }

    pub(crate) fn lookup(&self, entity: &str, token: &str) -> RepoResult<&CompiledProjection> {
        self.entries
            .get(&(entity.to_string(), token.to_string()))
            .ok_or_else(|| RepoError::UnsupportedProjection {
                entity: entity.to_string(),
                token: token.to_string(),
            })
    }
}
