//! `Team` repository contract.

use crate::error::RepoResult;
use crate::model::Team;
use crate::query::Params;
use crate::registry::EntityRegistry;
use crate::repo::{Repository, RepositoryBuilder};
use crate::scope::Scope;
use std::ops::Deref;
use std::sync::Arc;

const FIND_ALL_WITH_PLAYERS: &str = "Team.findAllWithPlayers";
const ONE_BY_NAME: &str = "findOneByName";

#[derive(Debug)]
pub struct TeamRepository {
    inner: Repository<Team>,
}

impl TeamRepository {
    pub fn build(registry: Arc<EntityRegistry>) -> RepoResult<Self> {
        let inner = RepositoryBuilder::<Team>::new(registry)
            .declare(
                FIND_ALL_WITH_PLAYERS,
                "SELECT t FROM Team t JOIN FETCH t.soccer_players ORDER BY t.name ASC",
            )
            .derive(ONE_BY_NAME)
            .build()?;
        Ok(Self { inner })
    }

    pub fn find_one_by_name(&self, scope: &Scope<'_>, name: &str) -> RepoResult<Option<Team>> {
        self.one(scope, &self.derived_plan(ONE_BY_NAME, &[name.into()])?)
    }

    /// Teams with their rosters loaded by one batched query.
    pub fn find_all_with_players(&self, scope: &Scope<'_>) -> RepoResult<Vec<Team>> {
        self.list(scope, &self.declared_plan(FIND_ALL_WITH_PLAYERS, &Params::new())?)
    }
}

impl Deref for TeamRepository {
    type Target = Repository<Team>;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}
