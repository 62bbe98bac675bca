//! Soccer domain bundled with the crate: players, teams and directors.
//!
//! # Responsibility
//! - Show each persistence feature on a concrete entity: store-generated
//!   and assigned identities, a bidirectional association, versioning and
//!   both audit modes.
//! - Provide the filter fragments and projections used by the domain
//!   repositories.
//!
//! # Invariants
//! - `SoccerPlayer` owns the `team` association; `Team.soccer_players` is
//!   its inverse side and is never written.

pub mod director;
pub mod projections;
pub mod soccer_player;
pub mod specs;
pub mod team;

use crate::error::RepoResult;
use crate::registry::EntityRegistry;

pub use director::Director;
pub use projections::{BodySpec, ExcludeIdDto, ExcludeIdView, NestedClosedProjection, TeamInfo};
pub use soccer_player::SoccerPlayer;
pub use team::Team;

/// Registry holding the three soccer entities.
pub fn soccer_registry() -> RepoResult<EntityRegistry> {
    EntityRegistry::builder()
        .entity::<Team>()?
        .entity::<SoccerPlayer>()?
        .entity::<Director>()?
        .build()
}
