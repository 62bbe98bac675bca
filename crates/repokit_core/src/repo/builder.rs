//! Build step producing one concrete `Repository<E>` per contract.
//!
//! Declared queries, derived patterns and projections are validated here,
//! once, so a built repository never fails on a malformed declaration.

use crate::entity::Entity;
use crate::error::{RepoError, RepoResult};
use crate::projection::{Projection, ProjectionDescriptor, ProjectionRegistry};
use crate::query::{DeclaredQuery, PatternCache};
use crate::registry::EntityRegistry;
use crate::repo::generic::Repository;
use log::info;
use std::collections::BTreeMap;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Instant;

#[derive(Debug)]
pub struct RepositoryBuilder<E: Entity> {
    registry: Arc<EntityRegistry>,
    declared: Vec<(String, String)>,
    derived: Vec<String>,
    projections: Vec<ProjectionDescriptor>,
    _entity: PhantomData<fn() -> E>,
}

impl<E: Entity> RepositoryBuilder<E> {
    pub fn new(registry: Arc<EntityRegistry>) -> Self {
        Self {
            registry,
            declared: Vec::new(),
            derived: Vec::new(),
            projections: Vec::new(),
            _entity: PhantomData,
        }
    }

    /// Declares a named query in `SELECT a FROM Entity a ...` form.
    pub fn declare(mut self, name: &str, text: &str) -> Self {
        self.declared.push((name.to_string(), text.to_string()));
        self
    }

    /// Pre-compiles a derived lookup pattern.
    pub fn derive(mut self, pattern: &str) -> Self {
        self.derived.push(pattern.to_string());
        self
    }

    pub fn projection(mut self, descriptor: ProjectionDescriptor) -> Self {
        self.projections.push(descriptor);
        self
    }

    pub fn projection_of<P: Projection>(self) -> Self {
        self.projection(P::descriptor())
    }

    /// Validates every declaration and produces the repository.
    ///
    /// The full entity is always available as the projection token `E::NAME`.
    ///
    /// # Errors
    /// - `UnresolvableIntent` for malformed queries or patterns.
    /// - `InvalidDescriptor` for duplicate names and projections over
    ///   another entity.
    pub fn build(self) -> RepoResult<Repository<E>> {
        let started_at = Instant::now();
        self.registry.require(E::NAME)?;

        let mut declared = BTreeMap::new();
        for (name, text) in &self.declared {
            let query = DeclaredQuery::parse(&self.registry, E::NAME, name, text)?;
            if declared.insert(name.clone(), query).is_some() {
                return Err(RepoError::InvalidDescriptor(format!(
                    "query `{name}` declared twice for `{}`",
                    E::NAME
                )));
            }
        }

        let patterns = PatternCache::default();
        for pattern in &self.derived {
            patterns.get_or_parse(&self.registry, E::NAME, pattern)?;
        }

        let mut projections = ProjectionRegistry::new();
        projections.register(&self.registry, &ProjectionDescriptor::entity(E::NAME, E::NAME))?;
        for descriptor in &self.projections {
            if descriptor.entity_name() != E::NAME {
                return Err(RepoError::InvalidDescriptor(format!(
                    "projection `{}` maps `{}`, not `{}`",
                    descriptor.token(),
                    descriptor.entity_name(),
                    E::NAME
                )));
            }
            projections.register(&self.registry, descriptor)?;
        }

        info!(
            "event=repository_build module=repo entity={} declared={} derived={} projections={} duration_ms={}",
            E::NAME,
            declared.len(),
            patterns.len(),
            self.projections.len() + 1,
            started_at.elapsed().as_millis()
        );

        Ok(Repository {
            registry: self.registry,
            patterns,
            declared,
            projections,
            _entity: PhantomData,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::RepositoryBuilder;
    use crate::error::RepoError;
    use crate::model::{soccer_registry, SoccerPlayer};
    use std::sync::Arc;

    #[test]
    fn malformed_fetch_declaration_fails_the_build() {
        let registry = Arc::new(soccer_registry().expect("registry"));
        let err = RepositoryBuilder::<SoccerPlayer>::new(registry)
            .declare("bad", "SELECT sp FROM SoccerPlayer sp JOIN FETCH sp.nonexistent")
            .build()
            .unwrap_err();
        assert!(matches!(err, RepoError::UnresolvableIntent(_)));
    }

    #[test]
    fn duplicate_declared_names_are_rejected() {
        let registry = Arc::new(soccer_registry().expect("registry"));
        let err = RepositoryBuilder::<SoccerPlayer>::new(registry)
            .declare("all", "SELECT sp FROM SoccerPlayer sp")
            .declare("all", "SELECT sp FROM SoccerPlayer sp ORDER BY sp.name")
            .build()
            .unwrap_err();
        assert!(matches!(err, RepoError::InvalidDescriptor(_)));
    }
}
