//! New-vs-existing classification on the save path.

use crate::error::{RepoError, RepoResult};
use crate::record::Record;
use crate::registry::{AuditMode, EntityDescriptor, IdentityStrategy};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityState {
    New,
    Existing,
}

/// Decides whether `save` inserts or merges `record`.
///
/// Store-generated identities are new while null. Assigned identities are
/// new when the version or `created_at` marker is still unset; without
/// either marker the store is asked through `exists`.
///
/// # Errors
/// - `InvalidData` when an assigned identity is null.
pub fn classify(
    descriptor: &EntityDescriptor,
    record: &Record,
    exists: impl FnOnce() -> RepoResult<bool>,
) -> RepoResult<EntityState> {
    let identity = record.identity();
    match descriptor.identity.strategy {
        IdentityStrategy::Generated if identity.is_null() => Ok(EntityState::New),
        IdentityStrategy::Generated => Ok(EntityState::Existing),
        IdentityStrategy::Assigned if identity.is_null() => Err(RepoError::InvalidData(format!(
            "`{}` requires an assigned identity before save",
            descriptor.name
        ))),
        IdentityStrategy::Assigned => {
            if descriptor.versioned {
                return Ok(state(record.meta().version().is_none()));
            }
            if descriptor.audit != AuditMode::None {
                return Ok(state(record.meta().audit().created_at().is_none()));
            }
            Ok(state(!exists()?))
        }
    }
}

fn state(is_new: bool) -> EntityState {
    if is_new {
        EntityState::New
    } else {
        EntityState::Existing
    }
}
