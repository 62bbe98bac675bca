//! Hand-written query fragments.
//!
//! # Responsibility
//! - Hold lookups that are written out as statements instead of being
//!   declared or derived at build time.
//! - Merge them into the generated repositories through extension traits.
//!
//! # Invariants
//! - Fragments run through `Scope::create_query`, so their rows share the
//!   scope's cache and deferred-association binding.

use crate::error::RepoResult;
use crate::model::SoccerPlayer;
use crate::query::Params;
use crate::repo::SoccerPlayerRepository;
use crate::scope::Scope;

/// Custom `SoccerPlayer` lookups.
pub trait SoccerPlayerCustom {
    fn find_custom_by_name(&self, scope: &Scope<'_>, name: &str) -> RepoResult<Vec<SoccerPlayer>>;
}

impl SoccerPlayerCustom for SoccerPlayerRepository {
    fn find_custom_by_name(&self, scope: &Scope<'_>, name: &str) -> RepoResult<Vec<SoccerPlayer>> {
        scope.create_query(
            "SELECT SP FROM SoccerPlayer SP WHERE SP.name = :name",
            &Params::new().bind("name", name),
        )
    }
}
