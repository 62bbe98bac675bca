//! `SoccerPlayer` repository contract.
//!
//! # Responsibility
//! - Name every player lookup the domain needs and bind its arguments.
//! - Keep lock modes, hints and fetch paths next to the lookups that use
//!   them.
//!
//! # Invariants
//! - Every declared query and derived pattern is validated in `build`.

use crate::error::RepoResult;
use crate::lock::{LockMode, Mutation, QueryHints};
use crate::model::projections::{BodySpec, ExcludeIdDto, ExcludeIdView, NestedClosedProjection};
use crate::model::{specs, SoccerPlayer};
use crate::paging::{Page, PageRequest, Slice};
use crate::projection::{Projected, Projection};
use crate::query::Params;
use crate::registry::EntityRegistry;
use crate::repo::{Repository, RepositoryBuilder};
use crate::scope::Scope;
use crate::spec::Operand;
use std::ops::Deref;
use std::sync::Arc;

const FIND_BY_NAME: &str = "SoccerPlayer.findByName";
const FIND_BY_HEIGHT_GREATER_THAN: &str = "SoccerPlayer.findByHeightGreaterThan";
const FIND_ALL: &str = "SoccerPlayer.findAll";
const FIND_ALL_WITH_TEAM: &str = "SoccerPlayer.findAllWithTeam";
const FIND_BY_NAME_AND_HEIGHT_POSITIONAL: &str = "SoccerPlayer.findByNameAndHeightPositional";
const FIND_BY_NAME_AND_HEIGHT_NAMED: &str = "SoccerPlayer.findByNameAndHeightNamed";
const FIND_BY_ID_IN: &str = "SoccerPlayer.findByIdIn";

const BY_NAME_AND_HEIGHT: &str = "findByNameAndHeightGreaterThan";
const BY_NAME_HEIGHT_AND_WEIGHT: &str = "findByNameAndHeightGreaterThanAndWeightLessThan";
const ONE_BY_NAME: &str = "findOneByName";
const ALL_BY_NAME: &str = "findAllByName";
const PAGE_BY_NAME_NOT_NULL: &str = "findPageByNameIsNotNull";
const SLICE_BY_NAME_NOT_NULL: &str = "findSliceByNameIsNotNull";
const READ_ONLY_BY_NAME: &str = "findReadOnlyByName";
const LOCKED_BY_NAME: &str = "findUsingLockByName";
const PROJECTION_BY_NAME: &str = "findProjectionByName";
const COUNT_BY_NAME: &str = "countByName";
const EXISTS_BY_NAME: &str = "existsByName";

#[derive(Debug)]
pub struct SoccerPlayerRepository {
    inner: Repository<SoccerPlayer>,
}

impl SoccerPlayerRepository {
    pub fn build(registry: Arc<EntityRegistry>) -> RepoResult<Self> {
        let inner = RepositoryBuilder::<SoccerPlayer>::new(registry)
            .declare(FIND_BY_NAME, "SELECT sp FROM SoccerPlayer sp WHERE sp.name = :name")
            .declare(
                FIND_BY_HEIGHT_GREATER_THAN,
                "SELECT sp FROM SoccerPlayer sp WHERE sp.height > :height",
            )
            .declare(FIND_ALL, "SELECT sp FROM SoccerPlayer sp")
            .declare(
                FIND_ALL_WITH_TEAM,
                "SELECT sp FROM SoccerPlayer sp JOIN FETCH sp.team",
            )
            .declare(
                FIND_BY_NAME_AND_HEIGHT_POSITIONAL,
                "SELECT sp FROM SoccerPlayer sp WHERE sp.name = ?1 AND sp.height > ?2",
            )
            .declare(
                FIND_BY_NAME_AND_HEIGHT_NAMED,
                "SELECT sp FROM SoccerPlayer sp WHERE sp.name = :name AND sp.height > :height",
            )
            .declare(FIND_BY_ID_IN, "SELECT sp FROM SoccerPlayer sp WHERE sp.id IN :ids")
            .derive(BY_NAME_AND_HEIGHT)
            .derive(BY_NAME_HEIGHT_AND_WEIGHT)
            .derive(ONE_BY_NAME)
            .derive(ALL_BY_NAME)
            .derive(PAGE_BY_NAME_NOT_NULL)
            .derive(SLICE_BY_NAME_NOT_NULL)
            .derive(READ_ONLY_BY_NAME)
            .derive(LOCKED_BY_NAME)
            .derive(PROJECTION_BY_NAME)
            .derive(COUNT_BY_NAME)
            .derive(EXISTS_BY_NAME)
            .projection_of::<ExcludeIdView>()
            .projection_of::<BodySpec>()
            .projection_of::<ExcludeIdDto>()
            .projection_of::<NestedClosedProjection>()
            .build()?;
        Ok(Self { inner })
    }

    pub fn find_by_name_and_height_greater_than(
        &self,
        scope: &Scope<'_>,
        name: &str,
        height: i64,
    ) -> RepoResult<Vec<SoccerPlayer>> {
        let plan = self.derived_plan(BY_NAME_AND_HEIGHT, &[name.into(), height.into()])?;
        self.list(scope, &plan)
    }

    pub fn find_by_name_and_height_greater_than_and_weight_less_than(
        &self,
        scope: &Scope<'_>,
        name: &str,
        height: i64,
        weight: i64,
    ) -> RepoResult<Vec<SoccerPlayer>> {
        let plan = self.derived_plan(
            BY_NAME_HEIGHT_AND_WEIGHT,
            &[name.into(), height.into(), weight.into()],
        )?;
        self.list(scope, &plan)
    }

    pub fn find_by_name_declared(&self, scope: &Scope<'_>, name: &str) -> RepoResult<Vec<SoccerPlayer>> {
        let plan = self.declared_plan(FIND_BY_NAME, &Params::new().bind("name", name))?;
        self.list(scope, &plan)
    }

    pub fn find_by_height_greater_than_declared(
        &self,
        scope: &Scope<'_>,
        height: i64,
    ) -> RepoResult<Vec<SoccerPlayer>> {
        let plan = self.declared_plan(
            FIND_BY_HEIGHT_GREATER_THAN,
            &Params::new().bind("height", height),
        )?;
        self.list(scope, &plan)
    }

    pub fn find_all_declared(&self, scope: &Scope<'_>) -> RepoResult<Vec<SoccerPlayer>> {
        self.list(scope, &self.declared_plan(FIND_ALL, &Params::new())?)
    }

    /// Every player as `(name, height, weight)` value objects.
    pub fn find_dto_all(&self, scope: &Scope<'_>) -> RepoResult<Vec<ExcludeIdDto>> {
        self.list_as(scope, &self.declared_plan(FIND_ALL, &Params::new())?)
    }

    pub fn find_by_name_and_height_positional(
        &self,
        scope: &Scope<'_>,
        name: &str,
        height: i64,
    ) -> RepoResult<Vec<SoccerPlayer>> {
        let params = Params::new().arg(name).arg(height);
        self.list(scope, &self.declared_plan(FIND_BY_NAME_AND_HEIGHT_POSITIONAL, &params)?)
    }

    pub fn find_by_name_and_height_named(
        &self,
        scope: &Scope<'_>,
        name: &str,
        height: i64,
    ) -> RepoResult<Vec<SoccerPlayer>> {
        let params = Params::new().bind("name", name).bind("height", height);
        self.list(scope, &self.declared_plan(FIND_BY_NAME_AND_HEIGHT_NAMED, &params)?)
    }

    pub fn find_by_id_in(&self, scope: &Scope<'_>, ids: &[i64]) -> RepoResult<Vec<SoccerPlayer>> {
        let params = Params::new().bind("ids", ids.to_vec());
        self.list(scope, &self.declared_plan(FIND_BY_ID_IN, &params)?)
    }

    /// # Errors
    /// - `NonUniqueResult` when several players share `name`.
    pub fn find_one_by_name(&self, scope: &Scope<'_>, name: &str) -> RepoResult<Option<SoccerPlayer>> {
        self.one(scope, &self.derived_plan(ONE_BY_NAME, &[name.into()])?)
    }

    pub fn count_by_name(&self, scope: &Scope<'_>, name: &str) -> RepoResult<u64> {
        self.count_plan(scope, &self.derived_plan(COUNT_BY_NAME, &[name.into()])?)
    }

    pub fn exists_by_name(&self, scope: &Scope<'_>, name: &str) -> RepoResult<bool> {
        self.exists_plan(scope, &self.derived_plan(EXISTS_BY_NAME, &[name.into()])?)
    }

    pub fn find_page_by_name_is_not_null(
        &self,
        scope: &Scope<'_>,
        request: &PageRequest,
    ) -> RepoResult<Page<SoccerPlayer>> {
        self.page(scope, &self.derived_plan(PAGE_BY_NAME_NOT_NULL, &[])?, request)
    }

    pub fn find_slice_by_name_is_not_null(
        &self,
        scope: &Scope<'_>,
        request: &PageRequest,
    ) -> RepoResult<Slice<SoccerPlayer>> {
        self.slice(scope, &self.derived_plan(SLICE_BY_NAME_NOT_NULL, &[])?, request)
    }

    /// Adds `delta` to the weight of every player taller than `height` in
    /// one statement; audit columns are left untouched.
    pub fn bulk_add_weight(&self, scope: &Scope<'_>, height: i64, delta: i64) -> RepoResult<u64> {
        let filter = specs::greater_height(self.registry(), height)?;
        self.bulk_update(scope, Some(filter), Mutation::new().increment("weight", delta))
    }

    /// All players with their team joined in the same round trip.
    pub fn find_all_with_team(&self, scope: &Scope<'_>) -> RepoResult<Vec<SoccerPlayer>> {
        let plan = self.with_fetch(self.filter_plan(None)?, &["team"])?;
        self.list(scope, &plan)
    }

    pub fn find_all_with_team_declared(&self, scope: &Scope<'_>) -> RepoResult<Vec<SoccerPlayer>> {
        self.list(scope, &self.declared_plan(FIND_ALL_WITH_TEAM, &Params::new())?)
    }

    pub fn find_all_by_name_with_team(
        &self,
        scope: &Scope<'_>,
        name: &str,
    ) -> RepoResult<Vec<SoccerPlayer>> {
        let plan = self.derived_plan(ALL_BY_NAME, &[name.into()])?;
        self.list(scope, &self.with_fetch(plan, &["team"])?)
    }

    /// Loaded player is marked read-only; saving it writes nothing.
    pub fn find_read_only_by_name(
        &self,
        scope: &Scope<'_>,
        name: &str,
    ) -> RepoResult<Option<SoccerPlayer>> {
        let plan = self
            .derived_plan(READ_ONLY_BY_NAME, &[name.into()])?
            .with_hints(QueryHints::read_only());
        self.one(scope, &plan)
    }

    /// Takes the player table write lock before reading.
    ///
    /// # Errors
    /// - `LockTimeout` when another scope holds the lock past the configured
    ///   timeout.
    pub fn find_using_lock_by_name(
        &self,
        scope: &Scope<'_>,
        name: &str,
    ) -> RepoResult<Vec<SoccerPlayer>> {
        let plan = self
            .derived_plan(LOCKED_BY_NAME, &[name.into()])?
            .with_lock(LockMode::PessimisticWrite);
        self.list(scope, &plan)
    }

    /// Same lookup, output shape chosen by the caller's type.
    pub fn find_projection_by_name<P: Projection>(
        &self,
        scope: &Scope<'_>,
        name: &str,
    ) -> RepoResult<Vec<P>> {
        self.list_as(scope, &self.derived_plan(PROJECTION_BY_NAME, &[name.into()])?)
    }

    /// Same lookup, output shape chosen by token at run time.
    pub fn find_projected_by_name(
        &self,
        scope: &Scope<'_>,
        name: &str,
        token: &str,
    ) -> RepoResult<Vec<Projected>> {
        let plan = self.derived_plan(PROJECTION_BY_NAME, &[Operand::from(name)])?;
        self.list_projected(scope, &plan, token)
    }
}

impl Deref for SoccerPlayerRepository {
    type Target = Repository<SoccerPlayer>;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}
