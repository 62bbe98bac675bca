//! Resolved query plan shared by every resolution strategy.

use crate::error::{RepoError, RepoResult};
use crate::fetch::{plan_fetch, FetchPath};
use crate::lock::{LockMode, QueryHints};
use crate::paging::Sort;
use crate::registry::EntityRegistry;
use crate::spec::Specification;

/// What the caller expects back from a plan.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum QueryKind {
    #[default]
    List,
    Count,
    Exists,
}

/// Row window applied by the store (`LIMIT`/`OFFSET`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window {
    pub offset: u64,
    pub limit: u64,
}

/// Immutable, fully validated query intent.
///
/// `with_*` methods consume the plan and return an adjusted copy; nothing
/// re-resolves the original intent.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryPlan {
    entity: String,
    filter: Option<Specification>,
    sort: Sort,
    fetch: Vec<FetchPath>,
    lock: LockMode,
    hints: QueryHints,
    max_results: Option<u64>,
    kind: QueryKind,
    origin: String,
}

impl QueryPlan {
    /// Unfiltered plan over `entity`.
    ///
    /// # Errors
    /// - `UnresolvableIntent` when `entity` is not registered.
    pub fn new(registry: &EntityRegistry, entity: &str, origin: &str) -> RepoResult<Self> {
        registry.require(entity)?;
        Ok(Self {
            entity: entity.to_string(),
            filter: None,
            sort: Sort::unsorted(),
            fetch: Vec::new(),
            lock: LockMode::None,
            hints: QueryHints::default(),
            max_results: None,
            kind: QueryKind::List,
            origin: origin.to_string(),
        })
    }

    pub fn entity(&self) -> &str {
        &self.entity
    }

    pub fn filter(&self) -> Option<&Specification> {
        self.filter.as_ref()
    }

    pub fn sort(&self) -> &Sort {
        &self.sort
    }

    pub fn fetch_paths(&self) -> &[FetchPath] {
        &self.fetch
    }

    pub fn lock(&self) -> LockMode {
        self.lock
    }

    pub fn hints(&self) -> QueryHints {
        self.hints
    }

    pub fn max_results(&self) -> Option<u64> {
        self.max_results
    }

    pub fn kind(&self) -> QueryKind {
        self.kind
    }

    /// Label of the strategy and lookup that produced the plan.
    pub fn origin(&self) -> &str {
        &self.origin
    }

    /// Replaces the filter.
    ///
    /// # Errors
    /// - `InvalidSpecification` when the filter targets another entity.
    pub fn with_filter(mut self, filter: Option<Specification>) -> RepoResult<Self> {
        if let Some(filter) = &filter {
            filter.ensure_entity(&self.entity)?;
        }
        self.filter = filter;
        Ok(self)
    }

    pub fn with_sort(mut self, sort: Sort) -> Self {
        self.sort = sort;
        self
    }

    /// Adds eager association paths to the plan.
    ///
    /// # Errors
    /// - `UnresolvableIntent` for unknown or non-terminating paths.
    pub fn with_fetch<S: AsRef<str>>(
        mut self,
        registry: &EntityRegistry,
        paths: &[S],
    ) -> RepoResult<Self> {
        let mut requested: Vec<String> =
            self.fetch.iter().map(|path| path.path().to_string()).collect();
        requested.extend(paths.iter().map(|path| path.as_ref().to_string()));
        self.fetch = plan_fetch(registry, &self.entity, &requested)?;
        Ok(self)
    }

    pub fn with_lock(mut self, lock: LockMode) -> Self {
        self.lock = lock;
        self
    }

    pub fn with_hints(mut self, hints: QueryHints) -> Self {
        self.hints = hints;
        self
    }

    /// # Errors
    /// - `UnresolvableIntent` for a zero limit.
    pub fn with_max_results(mut self, max_results: u64) -> RepoResult<Self> {
        if max_results == 0 {
            return Err(RepoError::UnresolvableIntent(format!(
                "`{}` limits results to zero rows",
                self.origin
            )));
        }
        self.max_results = Some(max_results);
        Ok(self)
    }

    pub fn with_kind(mut self, kind: QueryKind) -> Self {
        self.kind = kind;
        self
    }

    /// Window used for a plain list execution.
    pub(crate) fn list_window(&self) -> Option<Window> {
        self.max_results.map(|limit| Window { offset: 0, limit })
    }

    /// Fails unless the plan is a plain list intent or was derived as `kind`.
    pub(crate) fn ensure_kind(&self, kind: QueryKind) -> RepoResult<()> {
        if self.kind == QueryKind::List || self.kind == kind {
            return Ok(());
        }
        Err(RepoError::UnresolvableIntent(format!(
            "`{}` is a {:?} query and cannot run as {kind:?}",
            self.origin, self.kind
        )))
    }

    /// Fails when the plan cannot be combined with page/slice windows.
    pub(crate) fn ensure_pageable(&self) -> RepoResult<()> {
        match self.max_results {
            Some(limit) => Err(RepoError::UnresolvableIntent(format!(
                "`{}` is limited to {limit} rows and cannot be paged",
                self.origin
            ))),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::QueryPlan;
    use crate::error::RepoError;
    use crate::registry::{AttributeKind, EntityDescriptor, EntityRegistry};
    use crate::spec::Criteria;

    fn registry() -> EntityRegistry {
        EntityRegistry::builder()
            .register(
                EntityDescriptor::builder("Side", "sides")
                    .generated_id("id", "side_id")
                    .attribute("name", AttributeKind::Text)
                    .build()
                    .expect("side"),
            )
            .register(
                EntityDescriptor::builder("Player", "players")
                    .generated_id("id", "player_id")
                    .attribute("name", AttributeKind::Text)
                    .many_to_one("side", "Side", "side_id")
                    .build()
                    .expect("player"),
            )
            .build()
            .expect("registry")
    }

    #[test]
    fn filter_for_another_entity_is_rejected() {
        let registry = registry();
        let sides = Criteria::new(&registry, "Side").expect("criteria");
        let err = QueryPlan::new(&registry, "Player", "test")
            .expect("plan")
            .with_filter(Some(sides.equal("name", "TeamA").expect("leaf")))
            .unwrap_err();
        assert!(matches!(err, RepoError::InvalidSpecification(_)));
    }

    #[test]
    fn limited_plans_cannot_be_paged() {
        let registry = registry();
        let plan = QueryPlan::new(&registry, "Player", "findFirstByName")
            .expect("plan")
            .with_max_results(1)
            .expect("limit");
        assert!(matches!(
            plan.ensure_pageable(),
            Err(RepoError::UnresolvableIntent(_))
        ));
    }

    #[test]
    fn fetch_paths_accumulate_without_duplicates() {
        let registry = registry();
        let plan = QueryPlan::new(&registry, "Player", "test")
            .expect("plan")
            .with_fetch(&registry, &["side"])
            .expect("fetch")
            .with_fetch(&registry, &["side"])
            .expect("fetch again");
        assert_eq!(plan.fetch_paths().len(), 1);
    }
}
