//! Reusable filter fragments over `SoccerPlayer`.

use crate::entity::Entity;
use crate::error::RepoResult;
use crate::model::SoccerPlayer;
use crate::registry::EntityRegistry;
use crate::spec::{Criteria, Specification};

/// Players whose team is called `name`. A blank name filters nothing.
pub fn team_name(registry: &EntityRegistry, name: &str) -> RepoResult<Option<Specification>> {
    Criteria::new(registry, SoccerPlayer::NAME)?.text_equal("team.name", name)
}

pub fn greater_height(registry: &EntityRegistry, height: i64) -> RepoResult<Specification> {
    Criteria::new(registry, SoccerPlayer::NAME)?.greater_than("height", height)
}

pub fn greater_weight(registry: &EntityRegistry, weight: i64) -> RepoResult<Specification> {
    Criteria::new(registry, SoccerPlayer::NAME)?.greater_than("weight", weight)
}
