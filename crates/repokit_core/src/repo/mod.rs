//! Repository layer: the generic repository, its build step and the
//! repositories of the bundled soccer domain.
//!
//! # Responsibility
//! - Give callers one typed data-access surface per entity.
//! - Keep SQL and plan execution behind `Scope` and `Store`.
//!
//! # Invariants
//! - Repositories hold no open transaction; every call borrows a scope.
//! - Repository APIs return semantic errors (`NotFound`, `NonUniqueResult`)
//!   in addition to store transport errors.

pub mod builder;
pub mod custom;
pub mod director_repo;
pub mod generic;
pub mod soccer_player_repo;
pub mod team_repo;

pub use builder::RepositoryBuilder;
pub use custom::SoccerPlayerCustom;
pub use director_repo::DirectorRepository;
pub use generic::Repository;
pub use soccer_player_repo::SoccerPlayerRepository;
pub use team_repo::TeamRepository;
