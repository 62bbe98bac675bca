//! Query by example: a probe entity plus ignored paths.

use crate::entity::Entity;
use crate::error::RepoResult;
use crate::query::plan::QueryPlan;
use crate::record::{Link, Record};
use crate::registry::{EntityDescriptor, EntityRegistry};
use crate::spec::{all_of, Criteria, Specification};

/// Partially populated probe. Null and type-default attributes never
/// constrain the match.
#[derive(Debug, Clone)]
pub struct Example<E> {
    probe: E,
    ignored: Vec<String>,
}

impl<E: Entity> Example<E> {
    pub fn of(probe: E) -> Self {
        Self {
            probe,
            ignored: Vec::new(),
        }
    }

    /// Excludes attribute paths (`height`, `team.name`) from the match.
    pub fn ignoring<I, S>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.ignored
            .extend(paths.into_iter().map(|path| path.as_ref().to_string()));
        self
    }

    pub fn probe(&self) -> &E {
        &self.probe
    }

    /// AND of equality leaves over every constraining attribute.
    pub fn to_specification(&self, registry: &EntityRegistry) -> RepoResult<Option<Specification>> {
        let criteria = Criteria::new(registry, E::NAME)?;
        let record = self.probe.to_record();
        let mut leaves = Vec::new();
        self.collect(registry, &criteria, criteria.entity(), &record, "", &mut leaves)?;
        Ok(all_of(leaves))
    }

    pub fn to_plan(&self, registry: &EntityRegistry) -> RepoResult<QueryPlan> {
        QueryPlan::new(registry, E::NAME, "example")?.with_filter(self.to_specification(registry)?)
    }

    fn collect(
        &self,
        registry: &EntityRegistry,
        criteria: &Criteria<'_>,
        descriptor: &EntityDescriptor,
        record: &Record,
        prefix: &str,
        leaves: &mut Vec<Option<Specification>>,
    ) -> RepoResult<()> {
        let identity = record.identity();
        let identity_path = format!("{prefix}{}", descriptor.identity.name);
        if !identity.is_default_for(descriptor.identity.kind) && !self.is_ignored(&identity_path) {
            leaves.push(Some(criteria.equal(&identity_path, identity.clone())?));
            // Nested rows with a known identity match on it alone.
            if !prefix.is_empty() {
                return Ok(());
            }
        }

        for attribute in &descriptor.attributes {
            let path = format!("{prefix}{}", attribute.name);
            if self.is_ignored(&path) {
                continue;
            }
            match record.get(&attribute.name) {
                Some(value) if !value.is_default_for(attribute.kind) => {
                    leaves.push(Some(criteria.equal(&path, value.clone())?));
                }
                _ => {}
            }
        }

        for association in descriptor.to_one_associations() {
            let path = format!("{prefix}{}", association.name);
            if self.is_ignored(&path) {
                continue;
            }
            let target = registry.require(&association.target)?;
            match record.link(&association.name) {
                Some(Link::Loaded(nested)) => {
                    self.collect(registry, criteria, target, nested, &format!("{path}."), leaves)?;
                }
                Some(Link::Reference(identity)) if !identity.is_null() => {
                    let identity_path = format!("{path}.{}", target.identity.name);
                    leaves.push(Some(criteria.equal(&identity_path, identity.clone())?));
                }
                _ => {}
            }
        }
        Ok(())
    }

    fn is_ignored(&self, path: &str) -> bool {
        self.ignored.iter().any(|ignored| ignored == path)
    }
}
