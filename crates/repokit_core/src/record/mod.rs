//! Dynamic row model shared by the store, the scope and projections.
//!
//! # Responsibility
//! - Carry one entity row: identity, ordered scalar attributes, association
//!   links and persistence metadata (version, audit columns, read-only hint).
//! - Express association state explicitly instead of through owning
//!   pointers, so cyclic graphs never materialize implicitly.
//!
//! # Invariants
//! - `Link::Deferred` is always bound to the scope that produced the row.
//! - `EntityMeta` audit fields are written only by the auditing interceptor.

pub mod value;

use crate::audit::AuditMetadata;
use crate::error::{RepoError, RepoResult};
use crate::scope::ScopeTicket;
pub use value::Value;

/// State of one association slot on a record.
#[derive(Debug, Clone, PartialEq)]
pub enum Link {
    /// No associated row (null join column, or an unset inverse collection).
    Absent,
    /// Identity of the target is known but the row was not loaded.
    Reference(Value),
    /// Target row materialized in the same round trip as the owner.
    Loaded(Box<Record>),
    /// Collection materialized in the same round trip as the owner.
    LoadedMany(Vec<Record>),
    /// Lazily loadable through the originating scope only.
    Deferred(DeferredLink),
}

impl Link {
    /// Identity of a to-one target, when one is known.
    pub fn identity(&self) -> Option<&Value> {
        match self {
            Self::Reference(identity) => Some(identity),
            Self::Loaded(record) if !record.identity().is_null() => Some(record.identity()),
            Self::Deferred(DeferredLink {
                key: DeferredKey::ById(identity),
                ..
            }) => Some(identity),
            _ => None,
        }
    }

    pub fn is_materialized(&self) -> bool {
        matches!(self, Self::Absent | Self::Loaded(_) | Self::LoadedMany(_))
    }
}

/// How a deferred association finds its rows.
#[derive(Debug, Clone, PartialEq)]
pub enum DeferredKey {
    /// To-one: the target identity.
    ById(Value),
    /// To-many: rows of the target whose `mapped_by` association points at `owner`.
    ByOwner { mapped_by: String, owner: Value },
}

/// Handle for an association that was not fetched eagerly.
#[derive(Debug, Clone)]
pub struct DeferredLink {
    pub(crate) entity: String,
    pub(crate) association: String,
    pub(crate) target: String,
    pub(crate) key: DeferredKey,
    pub(crate) ticket: ScopeTicket,
}

impl DeferredLink {
    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn key(&self) -> &DeferredKey {
        &self.key
    }

    /// Error returned when the link is read without its scope.
    pub(crate) fn access_error(&self) -> RepoError {
        if self.ticket.is_open() {
            RepoError::DeferredAssociation {
                entity: self.entity.clone(),
                association: self.association.clone(),
            }
        } else {
            RepoError::DetachedAccess {
                entity: self.entity.clone(),
                association: self.association.clone(),
            }
        }
    }
}

impl PartialEq for DeferredLink {
    fn eq(&self, other: &Self) -> bool {
        self.target == other.target && self.key == other.key
    }
}

/// Persistence metadata carried alongside every entity.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EntityMeta {
    pub(crate) version: Option<i64>,
    pub(crate) audit: AuditMetadata,
    pub(crate) read_only: bool,
}

impl EntityMeta {
    /// Row version; `None` until the first save of a versioned entity.
    pub fn version(&self) -> Option<i64> {
        self.version
    }

    pub fn audit(&self) -> &AuditMetadata {
        &self.audit
    }

    /// Whether the row was loaded under a read-only hint.
    pub fn is_read_only(&self) -> bool {
        self.read_only
    }
}

/// One entity row.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    entity: String,
    identity: Value,
    attributes: Vec<(String, Value)>,
    links: Vec<(String, Link)>,
    meta: EntityMeta,
}

impl Record {
    pub fn new(entity: &str, identity: impl Into<Value>) -> Self {
        Self {
            entity: entity.to_string(),
            identity: identity.into(),
            attributes: Vec::new(),
            links: Vec::new(),
            meta: EntityMeta::default(),
        }
    }

    pub fn entity(&self) -> &str {
        &self.entity
    }

    pub fn identity(&self) -> &Value {
        &self.identity
    }

    pub(crate) fn set_identity(&mut self, identity: Value) {
        self.identity = identity;
    }

    /// Builder-style attribute assignment.
    pub fn with(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.set(name, value);
        self
    }

    pub fn with_link(mut self, name: &str, link: Link) -> Self {
        self.set_link(name, link);
        self
    }

    pub fn with_meta(mut self, meta: EntityMeta) -> Self {
        self.meta = meta;
        self
    }

    pub fn set(&mut self, name: &str, value: impl Into<Value>) {
        let value = value.into();
        match self.attributes.iter_mut().find(|(key, _)| key == name) {
            Some((_, slot)) => *slot = value,
            None => self.attributes.push((name.to_string(), value)),
        }
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.attributes
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value)
    }

    pub fn attributes(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.attributes
            .iter()
            .map(|(name, value)| (name.as_str(), value))
    }

    pub fn set_link(&mut self, name: &str, link: Link) {
        match self.links.iter_mut().find(|(key, _)| key == name) {
            Some((_, slot)) => *slot = link,
            None => self.links.push((name.to_string(), link)),
        }
    }

    pub fn link(&self, name: &str) -> Option<&Link> {
        self.links
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, link)| link)
    }

    pub(crate) fn link_mut(&mut self, name: &str) -> Option<&mut Link> {
        self.links
            .iter_mut()
            .find(|(key, _)| key == name)
            .map(|(_, link)| link)
    }

    pub(crate) fn links_mut(&mut self) -> impl Iterator<Item = (&str, &mut Link)> {
        self.links
            .iter_mut()
            .map(|(name, link)| (name.as_str(), link))
    }

    pub fn meta(&self) -> &EntityMeta {
        &self.meta
    }

    pub(crate) fn meta_mut(&mut self) -> &mut EntityMeta {
        &mut self.meta
    }

    /// Reads a materialized to-one association.
    ///
    /// # Errors
    /// - `DetachedAccess` when the link is deferred and its scope has ended.
    /// - `DeferredAssociation` when the link is deferred and its scope is still
    ///   open; use `Scope::resolve` to load it.
    pub fn related(&self, name: &str) -> RepoResult<Option<&Record>> {
        match self.link(name) {
            None | Some(Link::Absent) => Ok(None),
            Some(Link::Loaded(record)) => Ok(Some(record)),
            Some(Link::Deferred(deferred)) => Err(deferred.access_error()),
            Some(Link::Reference(_)) | Some(Link::LoadedMany(_)) => {
                Err(RepoError::DeferredAssociation {
                    entity: self.entity.clone(),
                    association: name.to_string(),
                })
            }
        }
    }

    /// Reads a materialized to-many association.
    pub fn related_many(&self, name: &str) -> RepoResult<&[Record]> {
        match self.link(name) {
            None | Some(Link::Absent) => Ok(&[]),
            Some(Link::LoadedMany(records)) => Ok(records.as_slice()),
            Some(Link::Deferred(deferred)) => Err(deferred.access_error()),
            Some(Link::Reference(_)) | Some(Link::Loaded(_)) => {
                Err(RepoError::DeferredAssociation {
                    entity: self.entity.clone(),
                    association: name.to_string(),
                })
            }
        }
    }

    pub fn text(&self, name: &str) -> RepoResult<String> {
        self.optional_text(name)?
            .ok_or_else(|| self.missing(name, "text"))
    }

    pub fn optional_text(&self, name: &str) -> RepoResult<Option<String>> {
        match self.get(name) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::Text(value)) => Ok(Some(value.clone())),
            Some(other) => Err(self.mismatch(name, "text", other)),
        }
    }

    pub fn integer(&self, name: &str) -> RepoResult<i64> {
        self.optional_integer(name)?
            .ok_or_else(|| self.missing(name, "integer"))
    }

    pub fn optional_integer(&self, name: &str) -> RepoResult<Option<i64>> {
        match self.get(name) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::Integer(value)) => Ok(Some(*value)),
            Some(other) => Err(self.mismatch(name, "integer", other)),
        }
    }

    fn missing(&self, name: &str, expected: &str) -> RepoError {
        RepoError::InvalidData(format!(
            "`{}.{name}` is null, expected {expected}",
            self.entity
        ))
    }

    fn mismatch(&self, name: &str, expected: &str, found: &Value) -> RepoError {
        RepoError::InvalidData(format!(
            "`{}.{name}` holds {found:?}, expected {expected}",
            self.entity
        ))
    }
}
