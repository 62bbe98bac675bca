use crate::entity::Entity;
use crate::error::RepoResult;
use crate::record::{EntityMeta, Record, Value};
use crate::registry::{AttributeKind, AuditMode, EntityDescriptor};

/// A director with a caller-assigned identity. New until its `created_at`
/// has been stamped.
#[derive(Debug, Clone, PartialEq)]
pub struct Director {
    pub id: String,
    pub name: String,
    pub meta: EntityMeta,
}

impl Director {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            meta: EntityMeta::default(),
        }
    }
}

impl Entity for Director {
    const NAME: &'static str = "Director";

    fn descriptor() -> RepoResult<EntityDescriptor> {
        EntityDescriptor::builder(Self::NAME, "director")
            .assigned_id("id", "id", AttributeKind::Text)
            .attribute("name", AttributeKind::Text)
            .audited(AuditMode::CreatedDate)
            .build()
    }

    fn identity(&self) -> Value {
        Value::from(self.id.as_str())
    }

    fn to_record(&self) -> Record {
        Record::new(Self::NAME, self.id.as_str())
            .with("name", self.name.as_str())
            .with_meta(self.meta.clone())
    }

    fn from_record(record: Record) -> RepoResult<Self> {
        Ok(Self {
            id: record.identity().as_str().unwrap_or_default().to_string(),
            name: record.text("name")?,
            meta: record.meta().clone(),
        })
    }
}
