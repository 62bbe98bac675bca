//! Specification composer: predicate fragments over one entity type.
//!
//! # Responsibility
//! - Build validated leaf predicates (`Criteria`) against registry metadata.
//! - Combine fragments with AND/OR, treating an absent fragment as identity.
//!
//! # Invariants
//! - A leaf path always resolves to a scalar reached through to-one hops.
//! - `and(None, x) == x`, `and(x, None) == x`; `or` likewise.
//! - Nothing is evaluated in memory; the store renders the tree at execution.

use crate::error::{RepoError, RepoResult};
use crate::record::Value;
use crate::registry::{EntityDescriptor, EntityRegistry};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparator {
    Equal,
    NotEqual,
    GreaterThan,
    GreaterThanOrEqual,
    LessThan,
    LessThanOrEqual,
    Like,
    In,
    IsNull,
    IsNotNull,
}

impl Comparator {
    /// Number of bound arguments the comparator consumes.
    pub fn arity(self) -> usize {
        match self {
            Self::IsNull | Self::IsNotNull => 0,
            _ => 1,
        }
    }
}

/// Right-hand side of a predicate, or one bound query argument.
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    None,
    Value(Value),
    List(Vec<Value>),
}

impl Operand {
    pub fn list<I, T>(values: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<Value>,
    {
        Self::List(values.into_iter().map(Into::into).collect())
    }
}

macro_rules! operand_from_scalar {
    ($($ty:ty),* $(,)?) => {
        $(
            impl From<$ty> for Operand {
                fn from(value: $ty) -> Self {
                    Self::Value(value.into())
                }
            }
        )*
    };
}

operand_from_scalar!(Value, i64, i32, u32, f64, bool, &str, String);

impl<T: Into<Value>> From<Vec<T>> for Operand {
    fn from(values: Vec<T>) -> Self {
        Self::list(values)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Predicate {
    pub path: String,
    pub comparator: Comparator,
    pub operand: Operand,
}

/// Predicate tree over one entity type.
#[derive(Debug, Clone, PartialEq)]
pub enum Specification {
    Leaf { entity: String, predicate: Predicate },
    And(Box<Specification>, Box<Specification>),
    Or(Box<Specification>, Box<Specification>),
}

impl Specification {
    pub fn and(self, other: impl Into<Option<Specification>>) -> Specification {
        match other.into() {
            Some(other) => Specification::And(Box::new(self), Box::new(other)),
            None => self,
        }
    }

    pub fn or(self, other: impl Into<Option<Specification>>) -> Specification {
        match other.into() {
            Some(other) => Specification::Or(Box::new(self), Box::new(other)),
            None => self,
        }
    }

    /// Entity targeted by the leftmost leaf.
    pub fn entity(&self) -> &str {
        match self {
            Self::Leaf { entity, .. } => entity,
            Self::And(left, _) | Self::Or(left, _) => left.entity(),
        }
    }

    /// Fails with `InvalidSpecification` unless every leaf targets `entity`.
    pub fn ensure_entity(&self, entity: &str) -> RepoResult<()> {
        match self {
            Self::Leaf { entity: own, .. } if own == entity => Ok(()),
            Self::Leaf {
                entity: own,
                predicate,
            } => Err(RepoError::InvalidSpecification(format!(
                "predicate on `{own}.{}` cannot filter `{entity}`",
                predicate.path
            ))),
            Self::And(left, right) | Self::Or(left, right) => {
                left.ensure_entity(entity)?;
                right.ensure_entity(entity)
            }
        }
    }

    /// Leaves in left-to-right order.
    pub fn predicates(&self) -> Vec<&Predicate> {
        let mut out = Vec::new();
        self.collect(&mut out);
        out
    }

    fn collect<'a>(&'a self, out: &mut Vec<&'a Predicate>) {
        match self {
            Self::Leaf { predicate, .. } => out.push(predicate),
            Self::And(left, right) | Self::Or(left, right) => {
                left.collect(out);
                right.collect(out);
            }
        }
    }
}

/// AND of two optional fragments; an absent side is the identity.
pub fn and(
    left: impl Into<Option<Specification>>,
    right: impl Into<Option<Specification>>,
) -> Option<Specification> {
    match (left.into(), right.into()) {
        (Some(left), right) => Some(left.and(right)),
        (None, right) => right,
    }
}

/// OR of two optional fragments; an absent side is the identity.
pub fn or(
    left: impl Into<Option<Specification>>,
    right: impl Into<Option<Specification>>,
) -> Option<Specification> {
    match (left.into(), right.into()) {
        (Some(left), right) => Some(left.or(right)),
        (None, right) => right,
    }
}

/// AND of every present fragment, in order.
pub fn all_of<I>(fragments: I) -> Option<Specification>
where
    I: IntoIterator<Item = Option<Specification>>,
{
    fragments.into_iter().fold(None, and)
}

/// Leaf factory bound to one entity.
#[derive(Debug, Clone, Copy)]
pub struct Criteria<'r> {
    registry: &'r EntityRegistry,
    entity: &'r EntityDescriptor,
}

impl<'r> Criteria<'r> {
    /// # Errors
    /// - `InvalidSpecification` when `entity` is not registered.
    pub fn new(registry: &'r EntityRegistry, entity: &str) -> RepoResult<Self> {
        let entity = registry.descriptor(entity).ok_or_else(|| {
            RepoError::InvalidSpecification(format!("unknown entity `{entity}`"))
        })?;
        Ok(Self { registry, entity })
    }

    pub fn entity(&self) -> &'r EntityDescriptor {
        self.entity
    }

    /// Builds one leaf after validating path, comparator and operand shape.
    ///
    /// # Errors
    /// - `InvalidSpecification` for unknown paths, to-many traversal or an
    ///   operand that does not fit the comparator.
    pub fn leaf(
        &self,
        path: &str,
        comparator: Comparator,
        operand: Operand,
    ) -> RepoResult<Specification> {
        self.registry
            .resolve_scalar(&self.entity.name, path)
            .map_err(|err| RepoError::InvalidSpecification(err.to_string()))?;

        let fits = match (comparator, &operand) {
            (Comparator::IsNull | Comparator::IsNotNull, Operand::None) => true,
            (Comparator::In, Operand::List(_)) => true,
            (Comparator::IsNull | Comparator::IsNotNull | Comparator::In, _) => false,
            (_, Operand::Value(_)) => true,
            _ => false,
        };
        if !fits {
            return Err(RepoError::InvalidSpecification(format!(
                "operand {operand:?} does not fit {comparator:?} on `{}.{path}`",
                self.entity.name
            )));
        }

        Ok(Specification::Leaf {
            entity: self.entity.name.clone(),
            predicate: Predicate {
                path: path.to_string(),
                comparator,
                operand,
            },
        })
    }

    pub fn equal(&self, path: &str, value: impl Into<Value>) -> RepoResult<Specification> {
        self.leaf(path, Comparator::Equal, Operand::Value(value.into()))
    }

    pub fn not_equal(&self, path: &str, value: impl Into<Value>) -> RepoResult<Specification> {
        self.leaf(path, Comparator::NotEqual, Operand::Value(value.into()))
    }

    pub fn greater_than(&self, path: &str, value: impl Into<Value>) -> RepoResult<Specification> {
        self.leaf(path, Comparator::GreaterThan, Operand::Value(value.into()))
    }

    pub fn greater_than_or_equal(
        &self,
        path: &str,
        value: impl Into<Value>,
    ) -> RepoResult<Specification> {
        self.leaf(path, Comparator::GreaterThanOrEqual, Operand::Value(value.into()))
    }

    pub fn less_than(&self, path: &str, value: impl Into<Value>) -> RepoResult<Specification> {
        self.leaf(path, Comparator::LessThan, Operand::Value(value.into()))
    }

    pub fn less_than_or_equal(
        &self,
        path: &str,
        value: impl Into<Value>,
    ) -> RepoResult<Specification> {
        self.leaf(path, Comparator::LessThanOrEqual, Operand::Value(value.into()))
    }

    pub fn like(&self, path: &str, pattern: &str) -> RepoResult<Specification> {
        self.leaf(path, Comparator::Like, Operand::Value(pattern.into()))
    }

    pub fn in_list<I, T>(&self, path: &str, values: I) -> RepoResult<Specification>
    where
        I: IntoIterator<Item = T>,
        T: Into<Value>,
    {
        self.leaf(path, Comparator::In, Operand::list(values))
    }

    pub fn is_null(&self, path: &str) -> RepoResult<Specification> {
        self.leaf(path, Comparator::IsNull, Operand::None)
    }

    pub fn is_not_null(&self, path: &str) -> RepoResult<Specification> {
        self.leaf(path, Comparator::IsNotNull, Operand::None)
    }

    /// Equality on text that degrades to "no filter" for blank input.
    pub fn text_equal(&self, path: &str, text: &str) -> RepoResult<Option<Specification>> {
        let leaf = self.equal(path, text)?;
        if text.trim().is_empty() {
            return Ok(None);
        }
        Ok(Some(leaf))
    }
}

#[cfg(test)]
mod tests {
    use super::{all_of, and, or, Comparator, Criteria, Operand, Specification};
    use crate::error::RepoError;
    use crate::registry::{AttributeKind, EntityDescriptor, EntityRegistry};

    fn registry() -> EntityRegistry {
        EntityRegistry::builder()
            .register(
                EntityDescriptor::builder("Side", "sides")
                    .generated_id("id", "side_id")
                    .attribute("name", AttributeKind::Text)
                    .build()
                    .expect("side"),
            )
            .register(
                EntityDescriptor::builder("Player", "players")
                    .generated_id("id", "player_id")
                    .attribute("name", AttributeKind::Text)
                    .attribute("height", AttributeKind::Integer)
                    .many_to_one("side", "Side", "side_id")
                    .build()
                    .expect("player"),
            )
            .build()
            .expect("registry")
    }

    #[test]
    fn absent_fragments_are_identity_for_and_and_or() {
        let registry = registry();
        let criteria = Criteria::new(&registry, "Player").expect("criteria");
        let tall = criteria.greater_than("height", 180).expect("leaf");

        assert_eq!(and(None, tall.clone()), Some(tall.clone()));
        assert_eq!(and(tall.clone(), None), Some(tall.clone()));
        assert_eq!(or(None, tall.clone()), Some(tall.clone()));
        assert_eq!(or(tall.clone(), None), Some(tall.clone()));
        assert_eq!(and(None, None), None);
    }

    #[test]
    fn blank_text_leaf_is_absent_but_still_validated() {
        let registry = registry();
        let criteria = Criteria::new(&registry, "Player").expect("criteria");

        assert_eq!(criteria.text_equal("side.name", "  ").expect("blank"), None);
        let err = criteria.text_equal("side.title", "").unwrap_err();
        assert!(matches!(err, RepoError::InvalidSpecification(_)));
    }

    #[test]
    fn unknown_attribute_fails_construction() {
        let registry = registry();
        let criteria = Criteria::new(&registry, "Player").expect("criteria");
        let err = criteria.equal("weight", 80).unwrap_err();
        assert!(matches!(err, RepoError::InvalidSpecification(_)));
    }

    #[test]
    fn operand_shape_must_fit_comparator() {
        let registry = registry();
        let criteria = Criteria::new(&registry, "Player").expect("criteria");
        assert!(criteria.leaf("height", Comparator::In, 3.into()).is_err());
        assert!(criteria
            .leaf("height", Comparator::IsNull, Operand::Value(1.into()))
            .is_err());
        assert!(criteria.in_list("id", vec![1, 2]).is_ok());
    }

    #[test]
    fn all_of_keeps_declaration_order() {
        let registry = registry();
        let criteria = Criteria::new(&registry, "Player").expect("criteria");
        let combined = all_of([
            Some(criteria.equal("name", "Roy").expect("name")),
            None,
            Some(criteria.greater_than("height", 170).expect("height")),
        ])
        .expect("combined");

        let paths: Vec<&str> = combined
            .predicates()
            .into_iter()
            .map(|predicate| predicate.path.as_str())
            .collect();
        assert_eq!(paths, vec!["name", "height"]);
        assert!(matches!(combined, Specification::And(_, _)));
    }

    #[test]
    fn mixed_entities_are_rejected() {
        let registry = registry();
        let players = Criteria::new(&registry, "Player").expect("players");
        let sides = Criteria::new(&registry, "Side").expect("sides");
        let spec = players
            .equal("name", "Roy")
            .expect("name")
            .and(sides.equal("name", "TeamA").expect("side"));
        assert!(spec.ensure_entity("Player").is_err());
    }
}
