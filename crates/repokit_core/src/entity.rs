//! Typed entity contract and association handles.
//!
//! # Responsibility
//! - Map typed domain structs to and from `Record`.
//! - Expose association state without owning back-pointers, so bidirectional
//!   graphs stay acyclic in memory.
//!
//! # Invariants
//! - `to_record` followed by `from_record` preserves every persisted field.
//! - Deferred handles are only loadable through the scope that produced them.

use crate::error::{RepoError, RepoResult};
use crate::record::{DeferredKey, DeferredLink, Link, Record, Value};
use crate::registry::EntityDescriptor;

/// A persisted domain type.
pub trait Entity: Clone + Sized {
    /// Registry name; also the token of the full-entity projection.
    const NAME: &'static str;

    fn descriptor() -> RepoResult<EntityDescriptor>;

    /// Current identity, `Value::Null` before the first save of a
    /// store-generated identity.
    fn identity(&self) -> Value;

    fn to_record(&self) -> Record;

    fn from_record(record: Record) -> RepoResult<Self>;
}

/// Owning side of a many-to-one association.
#[derive(Debug, Clone)]
pub enum Association<T> {
    Absent,
    /// Points at a persisted row that is not loaded.
    Reference(Value),
    Loaded(Box<T>),
    Deferred(DeferredLink),
}

impl<T: Entity> Association<T> {
    pub fn loaded(target: T) -> Self {
        Self::Loaded(Box::new(target))
    }

    pub fn reference(identity: impl Into<Value>) -> Self {
        Self::Reference(identity.into())
    }

    /// Reads a materialized target.
    ///
    /// # Errors
    /// - `DetachedAccess` when the handle is deferred and its scope ended.
    /// - `DeferredAssociation` when the target was never loaded.
    pub fn get(&self) -> RepoResult<Option<&T>> {
        match self {
            Self::Absent => Ok(None),
            Self::Loaded(target) => Ok(Some(target)),
            Self::Deferred(link) => Err(link.access_error()),
            Self::Reference(_) => Err(RepoError::DeferredAssociation {
                entity: T::NAME.to_string(),
                association: "reference".to_string(),
            }),
        }
    }

    pub fn is_loaded(&self) -> bool {
        matches!(self, Self::Loaded(_))
    }

    /// Identity of the target, when known without loading it.
    pub fn identity(&self) -> Option<Value> {
        match self {
            Self::Absent => None,
            Self::Reference(identity) => Some(identity.clone()),
            Self::Loaded(target) => Some(target.identity()).filter(|identity| !identity.is_null()),
            Self::Deferred(link) => match link.key() {
                DeferredKey::ById(identity) => Some(identity.clone()),
                DeferredKey::ByOwner { .. } => None,
            },
        }
    }

    pub fn to_link(&self) -> Link {
        match self {
            Self::Absent => Link::Absent,
            Self::Reference(identity) => Link::Reference(identity.clone()),
            Self::Loaded(target) => Link::Loaded(Box::new(target.to_record())),
            Self::Deferred(link) => Link::Deferred(link.clone()),
        }
    }

    pub fn from_link(link: Option<&Link>) -> RepoResult<Self> {
        match link {
            None | Some(Link::Absent) => Ok(Self::Absent),
            Some(Link::Reference(identity)) => Ok(Self::Reference(identity.clone())),
            Some(Link::Loaded(record)) => Ok(Self::loaded(T::from_record(record.as_ref().clone())?)),
            Some(Link::Deferred(link)) => Ok(Self::Deferred(link.clone())),
            Some(Link::LoadedMany(_)) => Err(RepoError::InvalidData(format!(
                "to-one association of `{}` holds a collection",
                T::NAME
            ))),
        }
    }
}

impl<T> Default for Association<T> {
    fn default() -> Self {
        Self::Absent
    }
}

impl<T: Entity> PartialEq for Association<T> {
    /// Two handles are equal when they point at the same target identity.
    fn eq(&self, other: &Self) -> bool {
        self.identity() == other.identity()
    }
}

/// Inverse side of a one-to-many association.
#[derive(Debug, Clone)]
pub enum Collection<T> {
    /// Never loaded and not bound to any scope (transient owners).
    Unset,
    Loaded(Vec<T>),
    Deferred(DeferredLink),
}

impl<T: Entity> Collection<T> {
    pub fn get(&self) -> RepoResult<&[T]> {
        match self {
            Self::Unset => Ok(&[]),
            Self::Loaded(items) => Ok(items.as_slice()),
            Self::Deferred(link) => Err(link.access_error()),
        }
    }

    pub fn is_loaded(&self) -> bool {
        matches!(self, Self::Loaded(_))
    }

    pub fn to_link(&self) -> Link {
        match self {
            Self::Unset => Link::Absent,
            Self::Loaded(items) => Link::LoadedMany(items.iter().map(Entity::to_record).collect()),
            Self::Deferred(link) => Link::Deferred(link.clone()),
        }
    }

    pub fn from_link(link: Option<&Link>) -> RepoResult<Self> {
        match link {
            None | Some(Link::Absent) => Ok(Self::Unset),
            Some(Link::LoadedMany(records)) => records
                .iter()
                .cloned()
                .map(T::from_record)
                .collect::<RepoResult<Vec<_>>>()
                .map(Self::Loaded),
            Some(Link::Deferred(link)) => Ok(Self::Deferred(link.clone())),
            Some(Link::Reference(_)) | Some(Link::Loaded(_)) => Err(RepoError::InvalidData(
                format!("collection of `{}` holds a single row", T::NAME),
            )),
        }
    }
}

impl<T> Default for Collection<T> {
    fn default() -> Self {
        Self::Unset
    }
}

impl<T: Entity> PartialEq for Collection<T> {
    /// Collections only take part in equality once both sides are loaded.
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Loaded(left), Self::Loaded(right)) => {
                left.len() == right.len()
                    && left
                        .iter()
                        .zip(right)
                        .all(|(left, right)| left.identity() == right.identity())
            }
            _ => true,
        }
    }
}
