//! Pattern-derived lookups (`findByNameAndHeightGreaterThan`).
//!
//! # Responsibility
//! - Parse a method-style lookup name into subject, limit, clauses and
//!   ordering, validated against the entity registry.
//! - Cache parsed patterns so each name is compiled once.
//!
//! # Invariants
//! - Clauses keep declaration order; arguments bind to them positionally.
//! - Every clause resolves to a scalar path before the pattern is cached.

use crate::error::{RepoError, RepoResult};
use crate::query::plan::{QueryKind, QueryPlan};
use crate::paging::{Direction, Sort};
use crate::registry::{EntityDescriptor, EntityRegistry};
use crate::spec::{all_of, Comparator, Criteria, Operand};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError};

static SUBJECT_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(find|read|get|query|stream|count|exists)([A-Za-z0-9]*?)(?:By([A-Z][A-Za-z0-9_]*))?$")
        .expect("valid subject regex")
});
static LIMIT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(First|Top)(\d*)").expect("valid limit regex"));

const ORDER_BY: &str = "OrderBy";

/// Longest suffixes first so `GreaterThanEqual` wins over `GreaterThan`.
const SUFFIXES: &[(&str, Comparator)] = &[
    ("IsNotNull", Comparator::IsNotNull),
    ("NotNull", Comparator::IsNotNull),
    ("IsNull", Comparator::IsNull),
    ("Null", Comparator::IsNull),
    ("GreaterThanEqual", Comparator::GreaterThanOrEqual),
    ("GreaterThan", Comparator::GreaterThan),
    ("LessThanEqual", Comparator::LessThanOrEqual),
    ("LessThan", Comparator::LessThan),
    ("IsNot", Comparator::NotEqual),
    ("Not", Comparator::NotEqual),
    ("IsLike", Comparator::Like),
    ("Like", Comparator::Like),
    ("IsIn", Comparator::In),
    ("In", Comparator::In),
    ("Equals", Comparator::Equal),
    ("Is", Comparator::Equal),
];

/// One `<attribute><comparator>` clause.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Clause {
    pub path: String,
    pub comparator: Comparator,
}

/// Parsed lookup pattern.
#[derive(Debug, Clone, PartialEq)]
pub struct DerivedQuery {
    pattern: String,
    entity: String,
    kind: QueryKind,
    limit: Option<u64>,
    clauses: Vec<Clause>,
    sort: Sort,
}

impl DerivedQuery {
    /// # Errors
    /// - `UnresolvableIntent` for malformed names and unknown attributes.
    pub fn parse(registry: &EntityRegistry, entity: &str, pattern: &str) -> RepoResult<Self> {
        let descriptor = registry.require(entity)?;
        let (head, order) = match pattern.find(ORDER_BY) {
            Some(index) => (&pattern[..index], Some(&pattern[index + ORDER_BY.len()..])),
            None => (pattern, None),
        };

        let captures = SUBJECT_RE
            .captures(head)
            .ok_or_else(|| unresolvable(pattern, "not a lookup pattern"))?;
        let kind = match &captures[1] {
            "count" => QueryKind::Count,
            "exists" => QueryKind::Exists,
            _ => QueryKind::List,
        };
        let limit = match LIMIT_RE.captures(&captures[2]) {
            Some(limit) if limit[2].is_empty() => Some(1),
            Some(limit) => Some(
                limit[2]
                    .parse::<u64>()
                    .map_err(|_| unresolvable(pattern, "invalid result limit"))?,
            ),
            None => None,
        };

        let mut clauses = Vec::new();
        if let Some(criteria) = captures.get(3) {
            for part in split_keyword(criteria.as_str(), "And") {
                clauses.push(parse_clause(registry, descriptor, pattern, part)?);
            }
        }

        let sort = match order {
            Some(order) => parse_order(registry, descriptor, pattern, order)?,
            None => Sort::unsorted(),
        };

        Ok(Self {
            pattern: pattern.to_string(),
            entity: entity.to_string(),
            kind,
            limit,
            clauses,
            sort,
        })
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    pub fn kind(&self) -> QueryKind {
        self.kind
    }

    pub fn limit(&self) -> Option<u64> {
        self.limit
    }

    pub fn clauses(&self) -> &[Clause] {
        &self.clauses
    }

    pub fn sort(&self) -> &Sort {
        &self.sort
    }

    /// Number of arguments the pattern consumes.
    pub fn arity(&self) -> usize {
        self.clauses
            .iter()
            .map(|clause| clause.comparator.arity())
            .sum()
    }

    /// Binds arguments in clause order and produces the plan.
    ///
    /// # Errors
    /// - `UnresolvableIntent` when the argument count or shape does not fit.
    pub fn to_plan(&self, registry: &EntityRegistry, args: &[Operand]) -> RepoResult<QueryPlan> {
        if args.len() != self.arity() {
            return Err(unresolvable(
                &self.pattern,
                &format!("expects {} arguments, got {}", self.arity(), args.len()),
            ));
        }

        let criteria = Criteria::new(registry, &self.entity)?;
        let mut args = args.iter();
        let mut leaves = Vec::with_capacity(self.clauses.len());
        for clause in &self.clauses {
            let operand = match clause.comparator.arity() {
                0 => Operand::None,
                _ => args.next().cloned().unwrap_or(Operand::None),
            };
            let leaf = criteria
                .leaf(&clause.path, clause.comparator, operand)
                .map_err(|err| unresolvable(&self.pattern, &err.to_string()))?;
            leaves.push(Some(leaf));
        }

        let mut plan = QueryPlan::new(registry, &self.entity, &self.pattern)?
            .with_filter(all_of(leaves))?
            .with_sort(self.sort.clone())
            .with_kind(self.kind);
        if let Some(limit) = self.limit {
            plan = plan.with_max_results(limit)?;
        }
        Ok(plan)
    }
}

/// Parsed patterns keyed by pattern string.
#[derive(Debug, Default)]
pub struct PatternCache {
    entries: Mutex<BTreeMap<String, Arc<DerivedQuery>>>,
}

impl PatternCache {
    pub fn get_or_parse(
        &self,
        registry: &EntityRegistry,
        entity: &str,
        pattern: &str,
    ) -> RepoResult<Arc<DerivedQuery>> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(parsed) = entries.get(pattern) {
            return Ok(Arc::clone(parsed));
        }
        let parsed = Arc::new(DerivedQuery::parse(registry, entity, pattern)?);
        entries.insert(pattern.to_string(), Arc::clone(&parsed));
        Ok(parsed)
    }

    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn parse_clause(
    registry: &EntityRegistry,
    descriptor: &EntityDescriptor,
    pattern: &str,
    clause: &str,
) -> RepoResult<Clause> {
    for (suffix, comparator) in SUFFIXES {
        let Some(property) = clause.strip_suffix(suffix) else {
            continue;
        };
        if property.is_empty() {
            continue;
        }
        if let Some(path) = resolve_property(registry, descriptor, property) {
            return Ok(Clause {
                path,
                comparator: *comparator,
            });
        }
    }
    resolve_property(registry, descriptor, clause)
        .map(|path| Clause {
            path,
            comparator: Comparator::Equal,
        })
        .ok_or_else(|| {
            unresolvable(
                pattern,
                &format!("`{clause}` is not an attribute of `{}`", descriptor.name),
            )
        })
}

fn parse_order(
    registry: &EntityRegistry,
    descriptor: &EntityDescriptor,
    pattern: &str,
    order: &str,
) -> RepoResult<Sort> {
    if order.is_empty() {
        return Err(unresolvable(pattern, "`OrderBy` names no attribute"));
    }
    let mut sort = Sort::unsorted();
    let mut rest = order;
    while !rest.is_empty() {
        let (property, direction, remainder) = next_order(rest);
        let path = resolve_property(registry, descriptor, property).ok_or_else(|| {
            unresolvable(
                pattern,
                &format!("cannot order by `{property}` on `{}`", descriptor.name),
            )
        })?;
        sort = sort.then(direction, &path);
        rest = remainder;
    }
    Ok(sort)
}

/// Splits `HeightDescNameAsc` into `(Height, Desc, NameAsc)`.
fn next_order(text: &str) -> (&str, Direction, &str) {
    for (index, _) in text.char_indices().skip(1) {
        for (keyword, direction) in [("Desc", Direction::Desc), ("Asc", Direction::Asc)] {
            if !text[index..].starts_with(keyword) {
                continue;
            }
            let end = index + keyword.len();
            if text[end..]
                .chars()
                .next()
                .map_or(true, |next| next.is_ascii_uppercase())
            {
                return (&text[..index], direction, &text[end..]);
            }
        }
    }
    (text, Direction::Asc, "")
}

/// Splits on `keyword` when it starts a new camel-case word.
fn split_keyword<'a>(text: &'a str, keyword: &str) -> Vec<&'a str> {
    let mut parts = Vec::new();
    let mut start = 0;
    for (index, _) in text.char_indices() {
        if index <= start || !text[index..].starts_with(keyword) {
            continue;
        }
        let end = index + keyword.len();
        let boundary = text[end..]
            .chars()
            .next()
            .is_some_and(|next| next.is_ascii_uppercase());
        if boundary {
            parts.push(&text[start..index]);
            start = end;
        }
    }
    parts.push(&text[start..]);
    parts
}

/// Resolves a camel-case property (`TeamName`) to a dotted path
/// (`team.name`), preferring the longest direct attribute match.
fn resolve_property(
    registry: &EntityRegistry,
    descriptor: &EntityDescriptor,
    property: &str,
) -> Option<String> {
    if let Some((head, tail)) = property.split_once('_') {
        let association = descriptor.association(&to_snake(head))?;
        if !association.is_to_one() {
            return None;
        }
        let target = registry.descriptor(&association.target)?;
        let rest = resolve_property(registry, target, tail)?;
        return Some(format!("{}.{rest}", association.name));
    }

    let snake = to_snake(property);
    if descriptor.scalar(&snake).is_some() {
        return Some(snake);
    }

    for (index, ch) in property.char_indices().skip(1) {
        if !ch.is_ascii_uppercase() {
            continue;
        }
        let Some(association) = descriptor.association(&to_snake(&property[..index])) else {
            continue;
        };
        if !association.is_to_one() {
            continue;
        }
        let target = registry.descriptor(&association.target)?;
        if let Some(rest) = resolve_property(registry, target, &property[index..]) {
            return Some(format!("{}.{rest}", association.name));
        }
    }
    None
}

fn to_snake(camel: &str) -> String {
    let mut snake = String::with_capacity(camel.len() + 4);
    for (index, ch) in camel.chars().enumerate() {
        if ch.is_ascii_uppercase() {
            if index > 0 {
                snake.push('_');
            }
            snake.push(ch.to_ascii_lowercase());
        } else {
            snake.push(ch);
        }
    }
    snake
}

fn unresolvable(pattern: &str, reason: &str) -> RepoError {
    RepoError::UnresolvableIntent(format!("`{pattern}`: {reason}"))
}
