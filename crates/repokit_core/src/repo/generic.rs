//! Generic repository over one registered entity.
//!
//! # Responsibility
//! - Expose CRUD, filtered lookups, paging/slicing, projections and bulk
//!   mutations for one entity type through an open `Scope`.
//! - Turn the three query intents (derived pattern, declared text, example)
//!   into plans and execute them.
//!
//! # Invariants
//! - Every plan executed by a repository targets its own entity.
//! - Projection lookups never re-resolve the plan; they only add the fetch
//!   paths the projection reads.
//! - Bulk mutations bypass auditing and versioning.

use crate::entity::Entity;
use crate::error::{RepoError, RepoResult};
use crate::lock::{BulkAction, Mutation};
use crate::paging::{Page, PageRequest, Slice, Sort};
use crate::projection::{CompiledProjection, Projected, Projection, ProjectionRegistry};
use crate::query::{DeclaredQuery, Example, Params, PatternCache, QueryKind, QueryPlan, Window};
use crate::record::{Record, Value};
use crate::registry::EntityRegistry;
use crate::scope::Scope;
use crate::spec::{Operand, Specification};
use std::collections::BTreeMap;
use std::marker::PhantomData;
use std::sync::Arc;

/// Concrete repository produced by `RepositoryBuilder::build`.
#[derive(Debug)]
pub struct Repository<E: Entity> {
    pub(crate) registry: Arc<EntityRegistry>,
    pub(crate) patterns: PatternCache,
    pub(crate) declared: BTreeMap<String, DeclaredQuery>,
    pub(crate) projections: ProjectionRegistry,
    pub(crate) _entity: PhantomData<fn() -> E>,
}

impl<E: Entity> Repository<E> {
    pub fn registry(&self) -> &EntityRegistry {
        &self.registry
    }

    pub fn projections(&self) -> &ProjectionRegistry {
        &self.projections
    }

    /// Names of the declared queries, sorted.
    pub fn declared_names(&self) -> impl Iterator<Item = &str> {
        self.declared.keys().map(String::as_str)
    }

    /// Inserts or updates `entity` and returns it as stored (identity,
    /// version and audit metadata filled in).
    pub fn save(&self, scope: &Scope<'_>, entity: E) -> RepoResult<E> {
        let record = self.own_record(entity.to_record())?;
        E::from_record(scope.save_record(record)?)
    }

    pub fn save_all<I>(&self, scope: &Scope<'_>, entities: I) -> RepoResult<Vec<E>>
    where
        I: IntoIterator<Item = E>,
    {
        entities
            .into_iter()
            .map(|entity| self.save(scope, entity))
            .collect()
    }

    /// Deletes the row of `entity`. Never-saved entities are ignored.
    pub fn delete(&self, scope: &Scope<'_>, entity: &E) -> RepoResult<()> {
        let identity = entity.identity();
        if identity.is_null() {
            return Ok(());
        }
        scope.remove(E::NAME, &identity)?;
        Ok(())
    }

    pub fn delete_all<'e, I>(&self, scope: &Scope<'_>, entities: I) -> RepoResult<()>
    where
        I: IntoIterator<Item = &'e E>,
        E: 'e,
    {
        for entity in entities {
            self.delete(scope, entity)?;
        }
        Ok(())
    }

    /// # Errors
    /// - `NotFound` when no row carries `id`.
    pub fn delete_by_id(&self, scope: &Scope<'_>, id: impl Into<Value>) -> RepoResult<()> {
        let id = id.into();
        if scope.remove(E::NAME, &id)? {
            Ok(())
        } else {
            Err(self.not_found(&id))
        }
    }

    /// Served from the scope cache when the row was loaded or saved in the
    /// same scope.
    pub fn find_by_id(&self, scope: &Scope<'_>, id: impl Into<Value>) -> RepoResult<Option<E>> {
        let id = id.into();
        scope
            .find_record(E::NAME, &id)?
            .map(E::from_record)
            .transpose()
    }

    /// # Errors
    /// - `NotFound` when no row carries `id`.
    pub fn get_by_id(&self, scope: &Scope<'_>, id: impl Into<Value>) -> RepoResult<E> {
        let id = id.into();
        self.find_by_id(scope, id.clone())?
            .ok_or_else(|| self.not_found(&id))
    }

    pub fn exists_by_id(&self, scope: &Scope<'_>, id: impl Into<Value>) -> RepoResult<bool> {
        scope.exists(E::NAME, &id.into())
    }

    pub fn find_all(&self, scope: &Scope<'_>) -> RepoResult<Vec<E>> {
        self.list(scope, &self.filter_plan(None)?)
    }

    pub fn find_all_sorted(&self, scope: &Scope<'_>, sort: Sort) -> RepoResult<Vec<E>> {
        self.list(scope, &self.filter_plan(None)?.with_sort(sort))
    }

    pub fn find_matching(
        &self,
        scope: &Scope<'_>,
        filter: Option<Specification>,
    ) -> RepoResult<Vec<E>> {
        self.list(scope, &self.filter_plan(filter)?)
    }

    pub fn find_page(
        &self,
        scope: &Scope<'_>,
        filter: Option<Specification>,
        request: &PageRequest,
    ) -> RepoResult<Page<E>> {
        self.page(scope, &self.filter_plan(filter)?, request)
    }

    pub fn find_slice(
        &self,
        scope: &Scope<'_>,
        filter: Option<Specification>,
        request: &PageRequest,
    ) -> RepoResult<Slice<E>> {
        self.slice(scope, &self.filter_plan(filter)?, request)
    }

    /// # Errors
    /// - `NonUniqueResult` when more than one row matches.
    pub fn find_one(
        &self,
        scope: &Scope<'_>,
        filter: Option<Specification>,
    ) -> RepoResult<Option<E>> {
        self.one(scope, &self.filter_plan(filter)?)
    }

    /// # Errors
    /// - `NotFound` when nothing matches; `NonUniqueResult` when several do.
    pub fn get_one(&self, scope: &Scope<'_>, filter: Option<Specification>) -> RepoResult<E> {
        self.find_one(scope, filter)?.ok_or_else(|| RepoError::NotFound {
            entity: E::NAME.to_string(),
            identity: "<filter>".to_string(),
        })
    }

    pub fn count(&self, scope: &Scope<'_>) -> RepoResult<u64> {
        scope.count(E::NAME, None)
    }

    pub fn count_matching(
        &self,
        scope: &Scope<'_>,
        filter: Option<Specification>,
    ) -> RepoResult<u64> {
        self.count_plan(scope, &self.filter_plan(filter)?)
    }

    /// Applies `mutation` to every matching row in one statement.
    ///
    /// # Errors
    /// - `InvalidSpecification` when the mutation targets unknown or
    ///   identity attributes.
    pub fn bulk_update(
        &self,
        scope: &Scope<'_>,
        filter: Option<Specification>,
        mutation: Mutation,
    ) -> RepoResult<u64> {
        mutation.validate(self.registry.require(E::NAME)?)?;
        let plan = self.filter_plan(filter)?;
        scope.bulk(E::NAME, plan.filter(), &BulkAction::Update(mutation))
    }

    pub fn bulk_delete(&self, scope: &Scope<'_>, filter: Option<Specification>) -> RepoResult<u64> {
        let plan = self.filter_plan(filter)?;
        scope.bulk(E::NAME, plan.filter(), &BulkAction::Delete)
    }

    /// Plan for a pattern-derived lookup such as `findByTeamNameOrderByNameAsc`.
    ///
    /// # Errors
    /// - `UnresolvableIntent` for malformed patterns, unknown attributes or
    ///   an argument count that does not fit.
    pub fn derived_plan(&self, pattern: &str, args: &[Operand]) -> RepoResult<QueryPlan> {
        self.patterns
            .get_or_parse(&self.registry, E::NAME, pattern)?
            .to_plan(&self.registry, args)
    }

    /// Plan for a query declared at build time.
    ///
    /// # Errors
    /// - `UnresolvableIntent` for unknown names or parameters that do not
    ///   match the declared placeholders.
    pub fn declared_plan(&self, name: &str, params: &Params) -> RepoResult<QueryPlan> {
        self.declared
            .get(name)
            .ok_or_else(|| {
                RepoError::UnresolvableIntent(format!(
                    "no query named `{name}` is declared for `{}`",
                    E::NAME
                ))
            })?
            .to_plan(&self.registry, params)
    }

    pub fn example_plan(&self, example: &Example<E>) -> RepoResult<QueryPlan> {
        example.to_plan(&self.registry)
    }

    pub fn filter_plan(&self, filter: Option<Specification>) -> RepoResult<QueryPlan> {
        QueryPlan::new(&self.registry, E::NAME, "filter")?.with_filter(filter)
    }

    /// Adds eager association paths to `plan`.
    pub fn with_fetch<S: AsRef<str>>(&self, plan: QueryPlan, paths: &[S]) -> RepoResult<QueryPlan> {
        plan.with_fetch(&self.registry, paths)
    }

    pub fn list(&self, scope: &Scope<'_>, plan: &QueryPlan) -> RepoResult<Vec<E>> {
        self.rows(scope, plan, plan.list_window())?
            .into_iter()
            .map(E::from_record)
            .collect()
    }

    /// At most one row.
    ///
    /// # Errors
    /// - `NonUniqueResult` when the plan is unlimited and several rows match.
    pub fn one(&self, scope: &Scope<'_>, plan: &QueryPlan) -> RepoResult<Option<E>> {
        self.single_row(scope, plan)?.map(E::from_record).transpose()
    }

    pub fn page(
        &self,
        scope: &Scope<'_>,
        plan: &QueryPlan,
        request: &PageRequest,
    ) -> RepoResult<Page<E>> {
        self.paged_rows(scope, plan, request)?.try_map(E::from_record)
    }

    pub fn slice(
        &self,
        scope: &Scope<'_>,
        plan: &QueryPlan,
        request: &PageRequest,
    ) -> RepoResult<Slice<E>> {
        self.sliced_rows(scope, plan, request)?.try_map(E::from_record)
    }

    /// # Errors
    /// - `UnresolvableIntent` when `plan` was derived as an exists query.
    pub fn count_plan(&self, scope: &Scope<'_>, plan: &QueryPlan) -> RepoResult<u64> {
        plan.ensure_kind(QueryKind::Count)?;
        self.matching_rows(scope, plan)
    }

    /// # Errors
    /// - `UnresolvableIntent` when `plan` was derived as a count query.
    pub fn exists_plan(&self, scope: &Scope<'_>, plan: &QueryPlan) -> RepoResult<bool> {
        plan.ensure_kind(QueryKind::Exists)?;
        Ok(self.matching_rows(scope, plan)? > 0)
    }

    /// Runs `plan` and maps every row into `P`.
    ///
    /// # Errors
    /// - `UnsupportedProjection` when `P` is not registered for the entity.
    pub fn list_as<P: Projection>(&self, scope: &Scope<'_>, plan: &QueryPlan) -> RepoResult<Vec<P>> {
        self.list_projected(scope, plan, P::TOKEN)?
            .into_iter()
            .map(P::from_projected)
            .collect()
    }

    pub fn one_as<P: Projection>(&self, scope: &Scope<'_>, plan: &QueryPlan) -> RepoResult<Option<P>> {
        let projection = self.projections.lookup(E::NAME, P::TOKEN)?;
        let plan = self.projected_plan(plan, projection)?;
        self.single_row(scope, &plan)?
            .map(|row| P::from_projected(projection.project(&self.registry, row)?))
            .transpose()
    }

    pub fn page_as<P: Projection>(
        &self,
        scope: &Scope<'_>,
        plan: &QueryPlan,
        request: &PageRequest,
    ) -> RepoResult<Page<P>> {
        let projection = self.projections.lookup(E::NAME, P::TOKEN)?;
        let plan = self.projected_plan(plan, projection)?;
        self.paged_rows(scope, &plan, request)?
            .try_map(|row| P::from_projected(projection.project(&self.registry, row)?))
    }

    pub fn slice_as<P: Projection>(
        &self,
        scope: &Scope<'_>,
        plan: &QueryPlan,
        request: &PageRequest,
    ) -> RepoResult<Slice<P>> {
        let projection = self.projections.lookup(E::NAME, P::TOKEN)?;
        let plan = self.projected_plan(plan, projection)?;
        self.sliced_rows(scope, &plan, request)?
            .try_map(|row| P::from_projected(projection.project(&self.registry, row)?))
    }

    /// Runs `plan` and maps rows with the projection registered under
    /// `token`, chosen per call.
    ///
    /// # Errors
    /// - `UnsupportedProjection` when `token` is not registered for the
    ///   entity.
    pub fn list_projected(
        &self,
        scope: &Scope<'_>,
        plan: &QueryPlan,
        token: &str,
    ) -> RepoResult<Vec<Projected>> {
        let projection = self.projections.lookup(E::NAME, token)?;
        let plan = self.projected_plan(plan, projection)?;
        self.rows(scope, &plan, plan.list_window())?
            .into_iter()
            .map(|row| projection.project(&self.registry, row))
            .collect()
    }

    fn projected_plan(&self, plan: &QueryPlan, projection: &CompiledProjection) -> RepoResult<QueryPlan> {
        self.ensure_own(plan)?;
        if projection.fetch_paths().is_empty() {
            return Ok(plan.clone());
        }
        plan.clone().with_fetch(&self.registry, projection.fetch_paths())
    }

    fn rows(&self, scope: &Scope<'_>, plan: &QueryPlan, window: Option<Window>) -> RepoResult<Vec<Record>> {
        self.ensure_own(plan)?;
        plan.ensure_kind(QueryKind::List)?;
        scope.execute(plan, window)
    }

    fn matching_rows(&self, scope: &Scope<'_>, plan: &QueryPlan) -> RepoResult<u64> {
        self.ensure_own(plan)?;
        scope.count(E::NAME, plan.filter())
    }

    fn single_row(&self, scope: &Scope<'_>, plan: &QueryPlan) -> RepoResult<Option<Record>> {
        let window = match plan.max_results() {
            Some(limit) => Window { offset: 0, limit },
            None => Window { offset: 0, limit: 2 },
        };
        let mut rows = self.rows(scope, plan, Some(window))?;
        if plan.max_results().is_none() && rows.len() > 1 {
            return Err(RepoError::NonUniqueResult {
                entity: E::NAME.to_string(),
                matched: rows.len(),
            });
        }
        Ok(if rows.is_empty() { None } else { Some(rows.swap_remove(0)) })
    }

    fn paged_rows(
        &self,
        scope: &Scope<'_>,
        plan: &QueryPlan,
        request: &PageRequest,
    ) -> RepoResult<Page<Record>> {
        plan.ensure_pageable()?;
        let plan = self.ordered(plan, request);
        let window = Window {
            offset: request.offset(),
            limit: request.size(),
        };
        let content = self.rows(scope, &plan, Some(window))?;
        let total = scope.count(E::NAME, plan.filter())?;
        Ok(Page::new(content, request, total))
    }

    fn sliced_rows(
        &self,
        scope: &Scope<'_>,
        plan: &QueryPlan,
        request: &PageRequest,
    ) -> RepoResult<Slice<Record>> {
        plan.ensure_pageable()?;
        let plan = self.ordered(plan, request);
        let window = Window {
            offset: request.offset(),
            limit: request.size().saturating_add(1),
        };
        let fetched = self.rows(scope, &plan, Some(window))?;
        Ok(Slice::from_lookahead(fetched, request))
    }

    /// Plan ordering first, then the request's.
    fn ordered(&self, plan: &QueryPlan, request: &PageRequest) -> QueryPlan {
        if request.sort().is_unsorted() {
            return plan.clone();
        }
        let sort = plan.sort().clone().and(request.sort().clone());
        plan.clone().with_sort(sort)
    }

    fn ensure_own(&self, plan: &QueryPlan) -> RepoResult<()> {
        if plan.entity() == E::NAME {
            return Ok(());
        }
        Err(RepoError::InvalidSpecification(format!(
            "plan `{}` targets `{}`, not `{}`",
            plan.origin(),
            plan.entity(),
            E::NAME
        )))
    }

    fn own_record(&self, record: Record) -> RepoResult<Record> {
        if record.entity() == E::NAME {
            return Ok(record);
        }
        Err(RepoError::InvalidData(format!(
            "`{}` record handed to the `{}` repository",
            record.entity(),
            E::NAME
        )))
    }

    fn not_found(&self, id: &Value) -> RepoError {
        RepoError::NotFound {
            entity: E::NAME.to_string(),
            identity: id.to_string(),
        }
    }
}
