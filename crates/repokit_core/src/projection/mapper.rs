//! Projection compilation and row mapping.
//!
//! # Invariants
//! - Every member path is validated when the projection is registered, not
//!   when rows are mapped.
//! - Each compiled projection knows the to-one paths it reads, so the store
//!   loads them in the same round trip.

use crate::error::{RepoError, RepoResult};
use crate::projection::descriptor::{ProjectionDescriptor, ProjectionKind, ProjectionMember};
use crate::projection::template::Template;
use crate::projection::view::{DtoRow, View, ViewValue};
use crate::projection::Projected;
use crate::record::{Link, Record, Value};
use crate::registry::EntityRegistry;

#[derive(Debug, Clone)]
enum CompiledMember {
    Field {
        name: String,
        path: String,
    },
    Expression {
        name: String,
        template: Template,
    },
    Nested {
        association: String,
        projection: Box<CompiledProjection>,
    },
    Argument {
        path: String,
    },
}

/// Validated projection, ready to map rows.
#[derive(Debug, Clone)]
pub struct CompiledProjection {
    token: String,
    entity: String,
    kind: ProjectionKind,
    members: Vec<CompiledMember>,
    fetch: Vec<String>,
}

impl CompiledProjection {
    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn entity(&self) -> &str {
        &self.entity
    }

    pub fn kind(&self) -> ProjectionKind {
        self.kind
    }

    /// To-one association paths read by this projection.
    pub fn fetch_paths(&self) -> &[String] {
        &self.fetch
    }

    /// Maps one loaded row into the projected shape.
    pub fn project(&self, registry: &EntityRegistry, record: Record) -> RepoResult<Projected> {
        match self.kind {
            ProjectionKind::Entity => Ok(Projected::Entity(record)),
            ProjectionKind::Closed => Ok(Projected::Closed(self.view(registry, Some(&record))?)),
            ProjectionKind::Open => Ok(Projected::Open(self.view(registry, Some(&record))?)),
            ProjectionKind::Dto => {
                let mut arguments = Vec::with_capacity(self.members.len());
                for member in &self.members {
                    if let CompiledMember::Argument { path } = member {
                        arguments.push(value_at(registry, &record, path)?);
                    }
                }
                Ok(Projected::Dto(DtoRow::new(&self.token, arguments)))
            }
        }
    }

    /// Builds a view; `None` yields the all-null view of an absent association.
    fn view(&self, registry: &EntityRegistry, record: Option<&Record>) -> RepoResult<View> {
        let mut values = Vec::with_capacity(self.members.len());
        for member in &self.members {
            match member {
                CompiledMember::Field { name, path } => {
                    let value = match record {
                        Some(record) => value_at(registry, record, path)?,
                        None => Value::Null,
                    };
                    values.push((name.clone(), ViewValue::Scalar(value)));
                }
                CompiledMember::Expression { name, template } => {
                    let value = match record {
                        Some(record) => Value::Text(
                            template.render(|path| value_at(registry, record, path))?,
                        ),
                        None => Value::Null,
                    };
                    values.push((name.clone(), ViewValue::Scalar(value)));
                }
                CompiledMember::Nested {
                    association,
                    projection,
                } => {
                    let target = match record {
                        Some(record) => record.related(association)?,
                        None => None,
                    };
                    let nested = projection.view(registry, target)?;
                    values.push((association.clone(), ViewValue::Nested(nested)));
                }
                CompiledMember::Argument { .. } => {}
            }
        }
        Ok(View::new(&self.token, values))
    }
}

/// Validates `descriptor` against the registry.
///
/// # Errors
/// - `InvalidDescriptor` for unknown entities or paths, members that do not
///   fit the projection kind, or a nested projection over the wrong entity.
pub fn compile(
    registry: &EntityRegistry,
    descriptor: &ProjectionDescriptor,
) -> RepoResult<CompiledProjection> {
    let entity = descriptor.entity_name();
    let owner = registry.descriptor(entity).ok_or_else(|| {
        invalid(descriptor, &format!("unknown entity `{entity}`"))
    })?;

    let kind = descriptor.kind();
    match kind {
        ProjectionKind::Entity if !descriptor.members().is_empty() => {
            return Err(invalid(descriptor, "entity projections declare no members"));
        }
        ProjectionKind::Dto if descriptor.members().is_empty() => {
            return Err(invalid(descriptor, "DTO projections need at least one argument"));
        }
        ProjectionKind::Closed | ProjectionKind::Open if descriptor.members().is_empty() => {
            return Err(invalid(descriptor, "projection declares no members"));
        }
        _ => {}
    }

    let mut members = Vec::with_capacity(descriptor.members().len());
    let mut fetch: Vec<String> = Vec::new();
    for member in descriptor.members() {
        let compiled = match (kind, member) {
            (ProjectionKind::Closed | ProjectionKind::Open, ProjectionMember::Field { name, path }) => {
                scalar_path(registry, descriptor, path, &mut fetch)?;
                CompiledMember::Field {
                    name: name.clone(),
                    path: path.clone(),
                }
            }
            (ProjectionKind::Open, ProjectionMember::Expression { name, template }) => {
                let template = Template::parse(template)?;
                for path in template.paths() {
                    scalar_path(registry, descriptor, path, &mut fetch)?;
                }
                CompiledMember::Expression {
                    name: name.clone(),
                    template,
                }
            }
            (
                ProjectionKind::Closed | ProjectionKind::Open,
                ProjectionMember::Nested {
                    association,
                    descriptor: nested,
                },
            ) => {
                let edge = owner
                    .association(association)
                    .filter(|edge| edge.is_to_one())
                    .ok_or_else(|| {
                        invalid(
                            descriptor,
                            &format!("`{association}` is not a to-one association of `{entity}`"),
                        )
                    })?;
                if nested.entity_name() != edge.target {
                    return Err(invalid(
                        descriptor,
                        &format!(
                            "nested projection over `{}` cannot map `{entity}.{association}` (`{}`)",
                            nested.entity_name(),
                            edge.target
                        ),
                    ));
                }
                if nested.kind() == ProjectionKind::Dto || nested.kind() == ProjectionKind::Entity {
                    return Err(invalid(
                        descriptor,
                        &format!("nested `{association}` must be a closed or open projection"),
                    ));
                }
                let projection = compile(registry, nested)?;
                push_unique(&mut fetch, association.clone());
                for path in projection.fetch_paths() {
                    push_unique(&mut fetch, format!("{association}.{path}"));
                }
                CompiledMember::Nested {
                    association: association.clone(),
                    projection: Box::new(projection),
                }
            }
            (ProjectionKind::Dto, ProjectionMember::Argument { path }) => {
                scalar_path(registry, descriptor, path, &mut fetch)?;
                CompiledMember::Argument { path: path.clone() }
            }
            (kind, member) => {
                return Err(invalid(
                    descriptor,
                    &format!("{} projections cannot declare {member:?}", kind.as_str()),
                ));
            }
        };
        members.push(compiled);
    }

    Ok(CompiledProjection {
        token: descriptor.token().to_string(),
        entity: entity.to_string(),
        kind,
        members,
        fetch,
    })
}

/// Reads the scalar at `path`, following loaded to-one links.
///
/// A missing association yields `Null`; a reference yields its identity when
/// the path ends at the target identity.
pub(crate) fn value_at(registry: &EntityRegistry, record: &Record, path: &str) -> RepoResult<Value> {
    let mut current = record;
    let mut segments = path.split('.').peekable();
    while let Some(segment) = segments.next() {
        if segments.peek().is_none() {
            let descriptor = registry.require(current.entity())?;
            if descriptor.is_identity(segment) {
                return Ok(current.identity().clone());
            }
            return Ok(current.get(segment).cloned().unwrap_or_default());
        }
        match current.link(segment) {
            None | Some(Link::Absent) => return Ok(Value::Null),
            Some(Link::Loaded(target)) => current = target.as_ref(),
            Some(Link::Reference(identity)) => {
                let rest: Vec<&str> = segments.by_ref().collect();
                let descriptor = registry.require(current.entity())?;
                let target = descriptor
                    .association(segment)
                    .map(|edge| registry.require(&edge.target))
                    .transpose()?;
                if let (Some(target), [last]) = (target, rest.as_slice()) {
                    if target.is_identity(last) {
                        return Ok(identity.clone());
                    }
                }
                return Err(RepoError::DeferredAssociation {
                    entity: current.entity().to_string(),
                    association: segment.to_string(),
                });
            }
            Some(Link::Deferred(link)) => return Err(link.access_error()),
            Some(Link::LoadedMany(_)) => {
                return Err(RepoError::InvalidSpecification(format!(
                    "path `{path}` crosses to-many association `{}.{segment}`",
                    current.entity()
                )));
            }
        }
    }
    Ok(Value::Null)
}

fn scalar_path(
    registry: &EntityRegistry,
    descriptor: &ProjectionDescriptor,
    path: &str,
    fetch: &mut Vec<String>,
) -> RepoResult<()> {
    registry
        .resolve_scalar(descriptor.entity_name(), path)
        .map_err(|err| invalid(descriptor, &format!("path `{path}`: {err}")))?;
    let segments: Vec<&str> = path.split('.').collect();
    for depth in 1..segments.len() {
        push_unique(fetch, segments[..depth].join("."));
    }
    Ok(())
}

fn push_unique(paths: &mut Vec<String>, path: String) {
    if !paths.contains(&path) {
        paths.push(path);
    }
}

fn invalid(descriptor: &ProjectionDescriptor, reason: &str) -> RepoError {
    RepoError::InvalidDescriptor(format!(
        "projection `{}` of `{}`: {reason}",
        descriptor.token(),
        descriptor.entity_name()
    ))
}

#[cfg(test)]
mod tests {
    use super::{compile, value_at};
    use crate::error::RepoError;
    use crate::projection::{Projected, ProjectionDescriptor};
    use crate::record::{Link, Record, Value};
    use crate::registry::{AttributeKind, EntityDescriptor, EntityRegistry};

    fn registry() -> EntityRegistry {
        EntityRegistry::builder()
            .register(
                EntityDescriptor::builder("Club", "clubs")
                    .generated_id("id", "club_id")
                    .attribute("name", AttributeKind::Text)
                    .build()
                    .expect("club"),
            )
            .register(
                EntityDescriptor::builder("Member", "members")
                    .generated_id("id", "member_id")
                    .attribute("name", AttributeKind::Text)
                    .attribute("height", AttributeKind::Integer)
                    .many_to_one("club", "Club", "club_id")
                    .build()
                    .expect("member"),
            )
            .build()
            .expect("registry")
    }

    fn member(club: Link) -> Record {
        Record::new("Member", 1)
            .with("name", "Roy")
            .with("height", 173)
            .with_link("club", club)
    }

    #[test]
    fn nested_projection_over_absent_association_is_all_null() {
        let registry = registry();
        let projection = compile(
            &registry,
            &ProjectionDescriptor::closed("WithClub", "Member")
                .field("name")
                .nested("club", ProjectionDescriptor::closed("ClubName", "Club").field("name")),
        )
        .expect("compile");
        assert_eq!(projection.fetch_paths(), ["club".to_string()]);

        let view = projection
            .project(&registry, member(Link::Absent))
            .expect("project")
            .into_view()
            .expect("view");
        assert_eq!(view.text("name").expect("name"), "Roy");
        let club = view.nested("club").expect("nested view");
        assert!(club.is_blank());
        assert_eq!(club.optional_text("name").expect("name"), None);
    }

    #[test]
    fn open_projection_renders_templates() {
        let registry = registry();
        let projection = compile(
            &registry,
            &ProjectionDescriptor::open("Label", "Member")
                .expression("label", "{name} ({club.name})"),
        )
        .expect("compile");
        let club = Record::new("Club", 9).with("name", "TeamA");
        let view = projection
            .project(&registry, member(Link::Loaded(Box::new(club))))
            .expect("project")
            .into_view()
            .expect("view");
        assert_eq!(view.text("label").expect("label"), "Roy (TeamA)");
    }

    #[test]
    fn dto_arguments_keep_declared_order() {
        let registry = registry();
        let projection = compile(
            &registry,
            &ProjectionDescriptor::dto("NameHeight", "Member")
                .argument("height")
                .argument("name"),
        )
        .expect("compile");
        match projection.project(&registry, member(Link::Absent)).expect("project") {
            Projected::Dto(row) => {
                assert_eq!(row.integer(0).expect("height"), 173);
                assert_eq!(row.text(1).expect("name"), "Roy");
            }
            other => panic!("unexpected projection {other:?}"),
        }
    }

    #[test]
    fn invalid_members_are_rejected_at_compile_time() {
        let registry = registry();
        let unknown = ProjectionDescriptor::closed("Bad", "Member").field("weight");
        assert!(matches!(
            compile(&registry, &unknown),
            Err(RepoError::InvalidDescriptor(_))
        ));

        let wrong_target = ProjectionDescriptor::closed("Bad", "Member")
            .nested("club", ProjectionDescriptor::closed("Name", "Member").field("name"));
        assert!(matches!(
            compile(&registry, &wrong_target),
            Err(RepoError::InvalidDescriptor(_))
        ));

        let argument_in_closed = ProjectionDescriptor::closed("Bad", "Member").argument("name");
        assert!(matches!(
            compile(&registry, &argument_in_closed),
            Err(RepoError::InvalidDescriptor(_))
        ));
    }

    #[test]
    fn reference_links_expose_only_the_target_identity() {
        let registry = registry();
        let record = member(Link::Reference(Value::from(9)));
        assert_eq!(
            value_at(&registry, &record, "club.id").expect("identity"),
            Value::Integer(9)
        );
        assert!(matches!(
            value_at(&registry, &record, "club.name"),
            Err(RepoError::DeferredAssociation { .. })
        ));
    }
}
