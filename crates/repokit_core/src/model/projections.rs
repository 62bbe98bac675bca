//! Projection types over `SoccerPlayer`.
//!
//! Each type registers its descriptor under its own token; callers pick
//! one per call with `Repository::list_as::<P>`.

use crate::entity::Entity;
use crate::error::RepoResult;
use crate::model::{SoccerPlayer, Team};
use crate::projection::{Projected, Projection, ProjectionDescriptor, View};
use serde::{Deserialize, Serialize};

/// Closed view without the identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExcludeIdView {
    pub name: String,
    pub height: i64,
    pub weight: i64,
}

impl Projection for ExcludeIdView {
    const TOKEN: &'static str = "ExcludeIdView";

    fn descriptor() -> ProjectionDescriptor {
        ProjectionDescriptor::closed(Self::TOKEN, SoccerPlayer::NAME)
            .field("name")
            .field("height")
            .field("weight")
    }

    fn from_projected(projected: Projected) -> RepoResult<Self> {
        let view = projected.into_view()?;
        Ok(Self {
            name: view.text("name")?,
            height: view.integer("height")?,
            weight: view.integer("weight")?,
        })
    }
}

/// Open view computing one label from height and weight.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BodySpec {
    pub body_spec: String,
}

impl Projection for BodySpec {
    const TOKEN: &'static str = "BodySpec";

    fn descriptor() -> ProjectionDescriptor {
        ProjectionDescriptor::open(Self::TOKEN, SoccerPlayer::NAME)
            .expression("body_spec", "height: {height}, weight: {weight}")
    }

    fn from_projected(projected: Projected) -> RepoResult<Self> {
        Ok(Self {
            body_spec: projected.into_view()?.text("body_spec")?,
        })
    }
}

/// Value object built from `(name, height, weight)` in that order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExcludeIdDto {
    pub name: String,
    pub height: i64,
    pub weight: i64,
}

impl ExcludeIdDto {
    /// Copies the DTO fields out of a loaded player.
    pub fn of(player: &SoccerPlayer) -> Self {
        Self {
            name: player.name.clone(),
            height: player.height,
            weight: player.weight,
        }
    }
}

impl Projection for ExcludeIdDto {
    const TOKEN: &'static str = "ExcludeIdDto";

    fn descriptor() -> ProjectionDescriptor {
        ProjectionDescriptor::dto(Self::TOKEN, SoccerPlayer::NAME)
            .argument("name")
            .argument("height")
            .argument("weight")
    }

    fn from_projected(projected: Projected) -> RepoResult<Self> {
        let row = projected.into_dto()?;
        Ok(Self {
            name: row.text(0)?,
            height: row.integer(1)?,
            weight: row.integer(2)?,
        })
    }
}

/// Team part of `NestedClosedProjection`; `None` name when the player has
/// no team.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TeamInfo {
    pub name: Option<String>,
}

impl TeamInfo {
    fn descriptor() -> ProjectionDescriptor {
        ProjectionDescriptor::closed("TeamInfo", Team::NAME).field("name")
    }

    fn from_view(view: Option<&View>) -> RepoResult<Self> {
        match view {
            Some(view) => Ok(Self {
                name: view.optional_text("name")?,
            }),
            None => Ok(Self::default()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NestedClosedProjection {
    pub name: String,
    pub height: i64,
    pub weight: i64,
    pub team: TeamInfo,
}

impl Projection for NestedClosedProjection {
    const TOKEN: &'static str = "NestedClosedProjection";

    fn descriptor() -> ProjectionDescriptor {
        ProjectionDescriptor::closed(Self::TOKEN, SoccerPlayer::NAME)
            .field("name")
            .field("height")
            .field("weight")
            .nested("team", TeamInfo::descriptor())
    }

    fn from_projected(projected: Projected) -> RepoResult<Self> {
        let view = projected.into_view()?;
        Ok(Self {
            name: view.text("name")?,
            height: view.integer("height")?,
            weight: view.integer("weight")?,
            team: TeamInfo::from_view(view.nested("team"))?,
        })
    }
}
