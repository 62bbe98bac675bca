//! Declarative projection shapes.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProjectionKind {
    /// The full entity row, unchanged.
    Entity,
    /// Exactly the declared fields, copied.
    Closed,
    /// Fields plus values computed from `{path}` templates.
    Open,
    /// Positional constructor arguments.
    Dto,
}

impl ProjectionKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Entity => "entity",
            Self::Closed => "closed",
            Self::Open => "open",
            Self::Dto => "dto",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProjectionMember {
    Field { name: String, path: String },
    Expression { name: String, template: String },
    Nested {
        association: String,
        descriptor: Box<ProjectionDescriptor>,
    },
    Argument { path: String },
}

/// Shape requested by a caller, identified by `(entity, token)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectionDescriptor {
    token: String,
    entity: String,
    kind: ProjectionKind,
    members: Vec<ProjectionMember>,
}

impl ProjectionDescriptor {
    fn new(token: &str, entity: &str, kind: ProjectionKind) -> Self {
        Self {
            token: token.to_string(),
            entity: entity.to_string(),
            kind,
            members: Vec::new(),
        }
    }

    pub fn entity(token: &str, entity: &str) -> Self {
        Self::new(token, entity, ProjectionKind::Entity)
    }

    pub fn closed(token: &str, entity: &str) -> Self {
        Self::new(token, entity, ProjectionKind::Closed)
    }

    pub fn open(token: &str, entity: &str) -> Self {
        Self::new(token, entity, ProjectionKind::Open)
    }

    pub fn dto(token: &str, entity: &str) -> Self {
        Self::new(token, entity, ProjectionKind::Dto)
    }

    /// Copies `path` into a field of the same name.
    pub fn field(self, path: &str) -> Self {
        self.field_as(path, path)
    }

    pub fn field_as(mut self, name: &str, path: &str) -> Self {
        self.members.push(ProjectionMember::Field {
            name: name.to_string(),
            path: path.to_string(),
        });
        self
    }

    pub fn expression(mut self, name: &str, template: &str) -> Self {
        self.members.push(ProjectionMember::Expression {
            name: name.to_string(),
            template: template.to_string(),
        });
        self
    }

    /// Projects a to-one association through its own descriptor.
    pub fn nested(mut self, association: &str, descriptor: ProjectionDescriptor) -> Self {
        self.members.push(ProjectionMember::Nested {
            association: association.to_string(),
            descriptor: Box::new(descriptor),
        });
        self
    }

    /// Next positional DTO constructor argument.
    pub fn argument(mut self, path: &str) -> Self {
        self.members.push(ProjectionMember::Argument {
            path: path.to_string(),
        });
        self
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn entity_name(&self) -> &str {
        &self.entity
    }

    pub fn kind(&self) -> ProjectionKind {
        self.kind
    }

    pub fn members(&self) -> &[ProjectionMember] {
        &self.members
    }
}
