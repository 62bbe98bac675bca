//! `Director` repository contract. Identities are assigned by the caller.

use crate::error::RepoResult;
use crate::model::Director;
use crate::registry::EntityRegistry;
use crate::repo::{Repository, RepositoryBuilder};
use std::ops::Deref;
use std::sync::Arc;

#[derive(Debug)]
pub struct DirectorRepository {
    inner: Repository<Director>,
}

impl DirectorRepository {
    pub fn build(registry: Arc<EntityRegistry>) -> RepoResult<Self> {
        Ok(Self {
            inner: RepositoryBuilder::<Director>::new(registry).build()?,
        })
    }
}

impl Deref for DirectorRepository {
    type Target = Repository<Director>;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}
