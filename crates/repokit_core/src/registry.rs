//! Entity registry: static metadata for every persisted entity.
//!
//! # Responsibility
//! - Describe identity, scalar attributes, associations, versioning and
//!   audit columns of each entity type.
//! - Resolve dotted attribute paths (`team.name`) across associations.
//!
//! # Invariants
//! - Every descriptor has exactly one identity attribute.
//! - Association targets must be registered; `mapped_by` must point at an
//!   owning many-to-one on the target that leads back to the declaring entity.
//! - Descriptors never change after `EntityRegistryBuilder::build`.

use crate::entity::Entity;
use crate::error::{RepoError, RepoResult};
use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};

pub const VERSION_COLUMN: &str = "version";
pub const CREATED_AT_COLUMN: &str = "created_at";
pub const CREATED_BY_COLUMN: &str = "created_by";
pub const UPDATED_AT_COLUMN: &str = "updated_at";
pub const UPDATED_BY_COLUMN: &str = "updated_by";

/// Semantic type of one persisted scalar.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttributeKind {
    Integer,
    Real,
    Text,
    Boolean,
    /// Epoch milliseconds.
    Timestamp,
}

impl AttributeKind {
    pub(crate) fn sql_type(self) -> &'static str {
        match self {
            Self::Integer | Self::Boolean | Self::Timestamp => "INTEGER",
            Self::Real => "REAL",
            Self::Text => "TEXT",
        }
    }
}

/// Who assigns identity values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentityStrategy {
    /// Store-generated integer row id.
    Generated,
    /// Caller supplies the identity before the first save.
    Assigned,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityDescriptor {
    pub name: String,
    pub column: String,
    pub kind: AttributeKind,
    pub strategy: IdentityStrategy,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttributeDescriptor {
    pub name: String,
    pub column: String,
    pub kind: AttributeKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cardinality {
    /// Owning side; the declaring table carries the join column.
    ManyToOne,
    /// Inverse side; rows of the target table point back via `mapped_by`.
    OneToMany,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssociationDescriptor {
    pub name: String,
    pub target: String,
    pub cardinality: Cardinality,
    /// Set for `ManyToOne`.
    pub join_column: Option<String>,
    /// Set for `OneToMany`: the owning association name on `target`.
    pub mapped_by: Option<String>,
}

impl AssociationDescriptor {
    pub fn is_to_one(&self) -> bool {
        self.cardinality == Cardinality::ManyToOne
    }
}

/// Which audit columns an entity carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditMode {
    None,
    /// Only `created_at`.
    CreatedDate,
    /// `created_at`, `created_by`, `updated_at`, `updated_by`.
    Full,
}

/// Static metadata for one entity type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityDescriptor {
    pub name: String,
    pub table: String,
    pub identity: IdentityDescriptor,
    pub attributes: Vec<AttributeDescriptor>,
    pub associations: Vec<AssociationDescriptor>,
    pub versioned: bool,
    pub audit: AuditMode,
}

impl EntityDescriptor {
    pub fn builder(name: &str, table: &str) -> EntityDescriptorBuilder {
        EntityDescriptorBuilder {
            name: name.to_string(),
            table: table.to_string(),
            identity: None,
            attributes: Vec::new(),
            associations: Vec::new(),
            versioned: false,
            audit: AuditMode::None,
        }
    }

    pub fn attribute(&self, name: &str) -> Option<&AttributeDescriptor> {
        self.attributes.iter().find(|attribute| attribute.name == name)
    }

    pub fn association(&self, name: &str) -> Option<&AssociationDescriptor> {
        self.associations
            .iter()
            .find(|association| association.name == name)
    }

    pub fn is_identity(&self, name: &str) -> bool {
        self.identity.name == name
    }

    /// Column and kind of a scalar member (identity included).
    pub fn scalar(&self, name: &str) -> Option<(&str, AttributeKind)> {
        if self.is_identity(name) {
            return Some((self.identity.column.as_str(), self.identity.kind));
        }
        self.attribute(name)
            .map(|attribute| (attribute.column.as_str(), attribute.kind))
    }

    pub fn to_one_associations(&self) -> impl Iterator<Item = &AssociationDescriptor> {
        self.associations.iter().filter(|association| association.is_to_one())
    }
}

/// Builder used by `Entity::descriptor` implementations.
#[derive(Debug)]
pub struct EntityDescriptorBuilder {
    name: String,
    table: String,
    identity: Option<IdentityDescriptor>,
    attributes: Vec<AttributeDescriptor>,
    associations: Vec<AssociationDescriptor>,
    versioned: bool,
    audit: AuditMode,
}

impl EntityDescriptorBuilder {
    pub fn generated_id(mut self, name: &str, column: &str) -> Self {
        self.identity = Some(IdentityDescriptor {
            name: name.to_string(),
            column: column.to_string(),
            kind: AttributeKind::Integer,
            strategy: IdentityStrategy::Generated,
        });
        self
    }

    pub fn assigned_id(mut self, name: &str, column: &str, kind: AttributeKind) -> Self {
        self.identity = Some(IdentityDescriptor {
            name: name.to_string(),
            column: column.to_string(),
            kind,
            strategy: IdentityStrategy::Assigned,
        });
        self
    }

    /// Declares a scalar whose column name equals the attribute name.
    pub fn attribute(self, name: &str, kind: AttributeKind) -> Self {
        self.attribute_column(name, name, kind)
    }

    pub fn attribute_column(mut self, name: &str, column: &str, kind: AttributeKind) -> Self {
        self.attributes.push(AttributeDescriptor {
            name: name.to_string(),
            column: column.to_string(),
            kind,
        });
        self
    }

    pub fn many_to_one(mut self, name: &str, target: &str, join_column: &str) -> Self {
        self.associations.push(AssociationDescriptor {
            name: name.to_string(),
            target: target.to_string(),
            cardinality: Cardinality::ManyToOne,
            join_column: Some(join_column.to_string()),
            mapped_by: None,
        });
        self
    }

    pub fn one_to_many(mut self, name: &str, target: &str, mapped_by: &str) -> Self {
        self.associations.push(AssociationDescriptor {
            name: name.to_string(),
            target: target.to_string(),
            cardinality: Cardinality::OneToMany,
            join_column: None,
            mapped_by: Some(mapped_by.to_string()),
        });
        self
    }

    pub fn versioned(mut self) -> Self {
        self.versioned = true;
        self
    }

    pub fn audited(mut self, audit: AuditMode) -> Self {
        self.audit = audit;
        self
    }

    /// Finishes the descriptor.
    ///
    /// # Errors
    /// - `InvalidDescriptor` when no identity was declared or a member name
    ///   is declared twice.
    pub fn build(self) -> RepoResult<EntityDescriptor> {
        let identity = self.identity.ok_or_else(|| {
            RepoError::InvalidDescriptor(format!("entity `{}` declares no identity", self.name))
        })?;

        let mut seen = vec![identity.name.as_str()];
        let members = self
            .attributes
            .iter()
            .map(|attribute| attribute.name.as_str())
            .chain(self.associations.iter().map(|association| association.name.as_str()));
        for member in members {
            if seen.contains(&member) {
                return Err(RepoError::InvalidDescriptor(format!(
                    "entity `{}` declares member `{member}` twice",
                    self.name
                )));
            }
            seen.push(member);
        }

        Ok(EntityDescriptor {
            name: self.name,
            table: self.table,
            identity,
            attributes: self.attributes,
            associations: self.associations,
            versioned: self.versioned,
            audit: self.audit,
        })
    }
}

/// Reason a dotted path could not be resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathError {
    UnknownEntity(String),
    UnknownMember { entity: String, member: String },
    ToManyTraversal { entity: String, association: String },
    NotScalar { entity: String, member: String },
    Empty,
}

impl Display for PathError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnknownEntity(entity) => write!(f, "unknown entity `{entity}`"),
            Self::UnknownMember { entity, member } => {
                write!(f, "entity `{entity}` has no attribute `{member}`")
            }
            Self::ToManyTraversal { entity, association } => write!(
                f,
                "path crosses to-many association `{entity}.{association}`"
            ),
            Self::NotScalar { entity, member } => {
                write!(f, "`{entity}.{member}` is an association, not an attribute")
            }
            Self::Empty => write!(f, "empty attribute path"),
        }
    }
}

/// A scalar reached through zero or more to-one hops.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedPath<'r> {
    pub hops: Vec<&'r AssociationDescriptor>,
    pub owner: &'r EntityDescriptor,
    pub column: String,
    pub kind: AttributeKind,
}

/// All registered entity descriptors, keyed by entity name.
#[derive(Debug, Clone, Default)]
pub struct EntityRegistry {
    entities: BTreeMap<String, EntityDescriptor>,
    order: Vec<String>,
}

impl EntityRegistry {
    pub fn builder() -> EntityRegistryBuilder {
        EntityRegistryBuilder::default()
    }

    pub fn descriptor(&self, entity: &str) -> Option<&EntityDescriptor> {
        self.entities.get(entity)
    }

    /// Looks up a descriptor, failing with `UnresolvableIntent` when absent.
    pub fn require(&self, entity: &str) -> RepoResult<&EntityDescriptor> {
        self.descriptor(entity)
            .ok_or_else(|| RepoError::UnresolvableIntent(format!("unknown entity `{entity}`")))
    }

    /// Descriptors in registration order.
    pub fn descriptors(&self) -> impl Iterator<Item = &EntityDescriptor> {
        self.order.iter().filter_map(|name| self.entities.get(name))
    }

    /// Resolves `a.b.c` to the scalar `c` reached through to-one hops `a`, `b`.
    pub fn resolve_scalar(&self, entity: &str, path: &str) -> Result<ResolvedPath<'_>, PathError> {
        let (hops, owner, last) = self.walk(entity, path)?;
        let (column, kind) = owner.scalar(last).ok_or_else(|| {
            if owner.association(last).is_some() {
                PathError::NotScalar {
                    entity: owner.name.clone(),
                    member: last.to_string(),
                }
            } else {
                PathError::UnknownMember {
                    entity: owner.name.clone(),
                    member: last.to_string(),
                }
            }
        })?;
        Ok(ResolvedPath {
            hops,
            owner,
            column: column.to_string(),
            kind,
        })
    }

    /// Resolves `a.b` to the association `b` (of any cardinality) reached
    /// through the to-one hop `a`.
    pub fn resolve_association(
        &self,
        entity: &str,
        path: &str,
    ) -> Result<(Vec<&AssociationDescriptor>, &AssociationDescriptor), PathError> {
        let (hops, owner, last) = self.walk(entity, path)?;
        let association = owner
            .association(last)
            .ok_or_else(|| PathError::UnknownMember {
                entity: owner.name.clone(),
                member: last.to_string(),
            })?;
        Ok((hops, association))
    }

    fn walk<'p>(
        &self,
        entity: &str,
        path: &'p str,
    ) -> Result<(Vec<&AssociationDescriptor>, &EntityDescriptor, &'p str), PathError> {
        let mut owner = self
            .descriptor(entity)
            .ok_or_else(|| PathError::UnknownEntity(entity.to_string()))?;
        let mut segments: Vec<&str> = path.split('.').map(str::trim).collect();
        let last = match segments.pop() {
            Some(last) if !last.is_empty() => last,
            _ => return Err(PathError::Empty),
        };

        let mut hops = Vec::with_capacity(segments.len());
        for segment in segments {
            let association =
                owner
                    .association(segment)
                    .ok_or_else(|| PathError::UnknownMember {
                        entity: owner.name.clone(),
                        member: segment.to_string(),
                    })?;
            if !association.is_to_one() {
                return Err(PathError::ToManyTraversal {
                    entity: owner.name.clone(),
                    association: segment.to_string(),
                });
            }
            owner = self
                .descriptor(&association.target)
                .ok_or_else(|| PathError::UnknownEntity(association.target.clone()))?;
            hops.push(association);
        }
        Ok((hops, owner, last))
    }
}

/// Collects descriptors and validates the association graph.
#[derive(Debug, Default)]
pub struct EntityRegistryBuilder {
    descriptors: Vec<EntityDescriptor>,
}

impl EntityRegistryBuilder {
    pub fn register(mut self, descriptor: EntityDescriptor) -> Self {
        self.descriptors.push(descriptor);
        self
    }

    pub fn entity<E: Entity>(self) -> RepoResult<Self> {
        Ok(self.register(E::descriptor()?))
    }

    /// Validates and freezes the registry.
    ///
    /// # Errors
    /// - `InvalidDescriptor` for duplicate names, unknown targets or a
    ///   `mapped_by` that does not lead back to the declaring entity.
    pub fn build(self) -> RepoResult<EntityRegistry> {
        let mut registry = EntityRegistry::default();
        for descriptor in self.descriptors {
            if registry.entities.contains_key(&descriptor.name) {
                return Err(RepoError::InvalidDescriptor(format!(
                    "entity `{}` registered twice",
                    descriptor.name
                )));
            }
            registry.order.push(descriptor.name.clone());
            registry
                .entities
                .insert(descriptor.name.clone(), descriptor);
        }

        for descriptor in registry.entities.values() {
            for association in &descriptor.associations {
                let target = registry.descriptor(&association.target).ok_or_else(|| {
                    RepoError::InvalidDescriptor(format!(
                        "association `{}.{}` targets unknown entity `{}`",
                        descriptor.name, association.name, association.target
                    ))
                })?;
                if let Some(mapped_by) = association.mapped_by.as_deref() {
                    let back = target.association(mapped_by);
                    let valid = back.is_some_and(|back| {
                        back.is_to_one() && back.target == descriptor.name
                    });
                    if !valid {
                        return Err(RepoError::InvalidDescriptor(format!(
                            "association `{}.{}` is mapped by `{}.{mapped_by}`, which is not an owning many-to-one back to `{}`",
                            descriptor.name, association.name, target.name, descriptor.name
                        )));
                    }
                }
            }
        }

        Ok(registry)
    }
}

#[cfg(test)]
mod tests {
    use super::{AttributeKind, AuditMode, EntityDescriptor, EntityRegistry, PathError};
    use crate::error::RepoError;

    fn club() -> EntityDescriptor {
        EntityDescriptor::builder("Club", "clubs")
            .generated_id("id", "club_id")
            .attribute("name", AttributeKind::Text)
            .one_to_many("members", "Member", "club")
            .build()
            .expect("club descriptor")
    }

    fn member() -> EntityDescriptor {
        EntityDescriptor::builder("Member", "members")
            .generated_id("id", "member_id")
            .attribute("name", AttributeKind::Text)
            .many_to_one("club", "Club", "club_id")
            .audited(AuditMode::Full)
            .build()
            .expect("member descriptor")
    }

    #[test]
    fn descriptor_without_identity_is_rejected() {
        let err = EntityDescriptor::builder("Orphan", "orphans")
            .attribute("name", AttributeKind::Text)
            .build()
            .unwrap_err();
        assert!(matches!(err, RepoError::InvalidDescriptor(_)));
    }

    #[test]
    fn unknown_association_target_is_rejected() {
        let err = EntityRegistry::builder().register(member()).build().unwrap_err();
        assert!(err.to_string().contains("unknown entity `Club`"));
    }

    #[test]
    fn paths_resolve_through_to_one_hops_only() {
        let registry = EntityRegistry::builder()
            .register(club())
            .register(member())
            .build()
            .expect("registry");

        let resolved = registry.resolve_scalar("Member", "club.name").expect("path");
        assert_eq!(resolved.hops.len(), 1);
        assert_eq!(resolved.owner.name, "Club");
        assert_eq!(resolved.column, "name");

        let err = registry.resolve_scalar("Club", "members.name").unwrap_err();
        assert!(matches!(err, PathError::ToManyTraversal { .. }));

        let err = registry.resolve_scalar("Member", "club").unwrap_err();
        assert!(matches!(err, PathError::NotScalar { .. }));
    }
}
