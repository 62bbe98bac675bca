//! SQL rendering and row decoding for the SQLite store.
//!
//! # Invariants
//! - The root table is always aliased `t0`; joined associations get
//!   `t1`, `t2`, ... in the order they are first needed.
//! - Filter paths join `INNER`; fetch-only and sort-only paths join `LEFT`.
//! - Parameters are collected in the order their placeholders appear.
//! - Every ordering ends with the root identity so pages are stable.

use crate::audit::AuditMetadata;
use crate::db::schema::quote;
use crate::error::{RepoError, RepoResult};
use crate::paging::Sort;
use crate::record::{EntityMeta, Link, Record, Value};
use crate::registry::{
    AttributeKind, AuditMode, EntityDescriptor, EntityRegistry, CREATED_AT_COLUMN,
    CREATED_BY_COLUMN, UPDATED_AT_COLUMN, UPDATED_BY_COLUMN, VERSION_COLUMN,
};
use crate::spec::{Comparator, Operand, Predicate, Specification};
use rusqlite::types::Value as SqlValue;
use rusqlite::Row;

pub(crate) const ROOT_ALIAS: &str = "t0";

#[derive(Debug)]
struct Join<'r> {
    path: String,
    alias: String,
    inner: bool,
    parent_alias: String,
    join_column: String,
    target: &'r EntityDescriptor,
}

/// FROM/WHERE/ORDER BY builder rooted at one entity.
#[derive(Debug)]
pub(crate) struct Select<'r> {
    registry: &'r EntityRegistry,
    root: &'r EntityDescriptor,
    joins: Vec<Join<'r>>,
    params: Vec<SqlValue>,
}

impl<'r> Select<'r> {
    pub(crate) fn new(registry: &'r EntityRegistry, entity: &str) -> RepoResult<Self> {
        Ok(Self {
            registry,
            root: registry.require(entity)?,
            joins: Vec::new(),
            params: Vec::new(),
        })
    }

    pub(crate) fn root(&self) -> &'r EntityDescriptor {
        self.root
    }

    /// Alias of the to-one association at `path`, joining missing prefixes.
    pub(crate) fn join(&mut self, path: &str, inner: bool) -> RepoResult<String> {
        let parent_path = path.rsplit_once('.').map(|(parent, _)| parent);
        if let Some(existing) = self.joins.iter_mut().find(|join| join.path == path) {
            let alias = existing.alias.clone();
            if inner && !existing.inner {
                existing.inner = true;
                if let Some(parent) = parent_path {
                    self.join(parent, true)?;
                }
            }
            return Ok(alias);
        }

        let (parent_alias, owner) = match parent_path {
            Some(parent) => {
                let alias = self.join(parent, inner)?;
                let owner = self.joined(parent).ok_or_else(|| self.invalid_path(path))?;
                (alias, owner)
            }
            None => (ROOT_ALIAS.to_string(), self.root),
        };
        let last = path.rsplit_once('.').map_or(path, |(_, last)| last);
        let association = owner
            .association(last)
            .filter(|association| association.is_to_one())
            .ok_or_else(|| self.invalid_path(path))?;
        let join_column = association
            .join_column
            .clone()
            .ok_or_else(|| self.invalid_path(path))?;
        let target = self.registry.require(&association.target)?;

        let alias = format!("t{}", self.joins.len() + 1);
        self.joins.push(Join {
            path: path.to_string(),
            alias: alias.clone(),
            inner,
            parent_alias,
            join_column,
            target,
        });
        Ok(alias)
    }

    /// Qualified column for a scalar path.
    ///
    /// `assoc.<identity>` reads the owner's join column and needs no join.
    pub(crate) fn column(&mut self, path: &str, inner: bool) -> RepoResult<(String, AttributeKind)> {
        let registry = self.registry;
        let resolved = registry
            .resolve_scalar(&self.root.name, path)
            .map_err(|err| {
                RepoError::InvalidSpecification(format!(
                    "`{path}` on `{}`: {err}",
                    self.root.name
                ))
            })?;
        let segments: Vec<&str> = path.split('.').map(str::trim).collect();
        let (last, hops) = segments
            .split_last()
            .ok_or_else(|| self.invalid_path(path))?;

        if let Some(hop) = resolved.hops.last() {
            if resolved.owner.is_identity(last) {
                if let Some(join_column) = hop.join_column.as_deref() {
                    let parent_alias = match hops.len() {
                        1 => ROOT_ALIAS.to_string(),
                        depth => self.join(&hops[..depth - 1].join("."), inner)?,
                    };
                    return Ok((format!("{parent_alias}.{}", quote(join_column)), resolved.kind));
                }
            }
        }

        let alias = if hops.is_empty() {
            ROOT_ALIAS.to_string()
        } else {
            self.join(&hops.join("."), inner)?
        };
        Ok((format!("{alias}.{}", quote(&resolved.column)), resolved.kind))
    }

    pub(crate) fn where_clause(&mut self, filter: &Specification) -> RepoResult<String> {
        match filter {
            Specification::Leaf { predicate, .. } => self.predicate(predicate),
            Specification::And(left, right) => Ok(format!(
                "({} AND {})",
                self.where_clause(left)?,
                self.where_clause(right)?
            )),
            Specification::Or(left, right) => Ok(format!(
                "({} OR {})",
                self.where_clause(left)?,
                self.where_clause(right)?
            )),
        }
    }

    fn predicate(&mut self, predicate: &Predicate) -> RepoResult<String> {
        let (column, _) = self.column(&predicate.path, true)?;
        let sql = match (predicate.comparator, &predicate.operand) {
            (Comparator::IsNull, _) | (Comparator::Equal, Operand::Value(Value::Null)) => {
                format!("{column} IS NULL")
            }
            (Comparator::IsNotNull, _) | (Comparator::NotEqual, Operand::Value(Value::Null)) => {
                format!("{column} IS NOT NULL")
            }
            (Comparator::In, Operand::List(values)) if values.is_empty() => "0 = 1".to_string(),
            (Comparator::In, Operand::List(values)) => {
                let placeholders: Vec<&str> = values
                    .iter()
                    .map(|value| self.bind(value.to_sql()))
                    .collect();
                format!("{column} IN ({})", placeholders.join(", "))
            }
            (Comparator::In, Operand::Value(value)) => {
                format!("{column} = {}", self.bind(value.to_sql()))
            }
            (comparator, Operand::Value(value)) => match binary_operator(comparator) {
                Some(operator) => format!("{column} {operator} {}", self.bind(value.to_sql())),
                None => return Err(self.invalid_operand(predicate)),
            },
            _ => return Err(self.invalid_operand(predicate)),
        };
        Ok(sql)
    }

    /// Requested orders followed by the root identity tiebreak.
    pub(crate) fn order_clause(&mut self, sort: &Sort) -> RepoResult<String> {
        let mut parts = Vec::with_capacity(sort.orders().len() + 1);
        for order in sort.orders() {
            let (column, _) = self.column(&order.path, false)?;
            parts.push(format!("{column} {}", order.direction.sql()));
        }
        parts.push(format!(
            "{ROOT_ALIAS}.{} ASC",
            quote(&self.root.identity.column)
        ));
        Ok(parts.join(", "))
    }

    pub(crate) fn from_clause(&self) -> String {
        let mut sql = format!("{} {ROOT_ALIAS}", quote(&self.root.table));
        for join in &self.joins {
            let kind = if join.inner { "INNER JOIN" } else { "LEFT JOIN" };
            sql.push_str(&format!(
                " {kind} {} {} ON {}.{} = {}.{}",
                quote(&join.target.table),
                join.alias,
                join.alias,
                quote(&join.target.identity.column),
                join.parent_alias,
                quote(&join.join_column)
            ));
        }
        sql
    }

    pub(crate) fn into_params(self) -> Vec<SqlValue> {
        self.params
    }

    fn bind(&mut self, value: SqlValue) -> &'static str {
        self.params.push(value);
        "?"
    }

    fn joined(&self, path: &str) -> Option<&'r EntityDescriptor> {
        self.joins
            .iter()
            .find(|join| join.path == path)
            .map(|join| join.target)
    }

    fn invalid_path(&self, path: &str) -> RepoError {
        RepoError::InvalidSpecification(format!(
            "`{path}` is not a to-one path of `{}`",
            self.root.name
        ))
    }

    fn invalid_operand(&self, predicate: &Predicate) -> RepoError {
        RepoError::InvalidSpecification(format!(
            "`{}.{}` {:?} cannot take {:?}",
            self.root.name, predicate.path, predicate.comparator, predicate.operand
        ))
    }
}

fn binary_operator(comparator: Comparator) -> Option<&'static str> {
    match comparator {
        Comparator::Equal => Some("="),
        Comparator::NotEqual => Some("<>"),
        Comparator::GreaterThan => Some(">"),
        Comparator::GreaterThanOrEqual => Some(">="),
        Comparator::LessThan => Some("<"),
        Comparator::LessThanOrEqual => Some("<="),
        Comparator::Like => Some("LIKE"),
        Comparator::In | Comparator::IsNull | Comparator::IsNotNull => None,
    }
}

/// Columns of one entity, in the order `decode_record` reads them.
pub(crate) fn entity_columns(descriptor: &EntityDescriptor) -> Vec<&str> {
    let mut columns = vec![descriptor.identity.column.as_str()];
    columns.extend(
        descriptor
            .attributes
            .iter()
            .map(|attribute| attribute.column.as_str()),
    );
    columns.extend(
        descriptor
            .to_one_associations()
            .filter_map(|association| association.join_column.as_deref()),
    );
    if descriptor.versioned {
        columns.push(VERSION_COLUMN);
    }
    match descriptor.audit {
        AuditMode::None => {}
        AuditMode::CreatedDate => columns.push(CREATED_AT_COLUMN),
        AuditMode::Full => columns.extend([
            CREATED_AT_COLUMN,
            CREATED_BY_COLUMN,
            UPDATED_AT_COLUMN,
            UPDATED_BY_COLUMN,
        ]),
    }
    columns
}

/// `alias."column"` list for a SELECT clause.
pub(crate) fn qualified_columns(descriptor: &EntityDescriptor, alias: &str) -> Vec<String> {
    entity_columns(descriptor)
        .into_iter()
        .map(|column| format!("{alias}.{}", quote(column)))
        .collect()
}

/// Sequential reader over one result row.
pub(crate) struct Cursor<'row, 'stmt> {
    row: &'row Row<'stmt>,
    index: usize,
}

impl<'row, 'stmt> Cursor<'row, 'stmt> {
    pub(crate) fn new(row: &'row Row<'stmt>) -> Self {
        Self { row, index: 0 }
    }

    fn read(&mut self) -> rusqlite::Result<SqlValue> {
        let value = self.row.get::<_, SqlValue>(self.index)?;
        self.index += 1;
        Ok(value)
    }
}

/// Reads one entity's columns; `None` when a LEFT join found no row.
pub(crate) fn decode_record(
    registry: &EntityRegistry,
    descriptor: &EntityDescriptor,
    cursor: &mut Cursor<'_, '_>,
) -> RepoResult<Option<Record>> {
    let identity = decode(
        descriptor,
        &descriptor.identity.column,
        cursor.read()?,
        descriptor.identity.kind,
    )?;
    let mut record = Record::new(&descriptor.name, identity);

    for attribute in &descriptor.attributes {
        let value = decode(descriptor, &attribute.column, cursor.read()?, attribute.kind)?;
        record.set(&attribute.name, value);
    }

    for association in descriptor.to_one_associations() {
        let Some(join_column) = association.join_column.as_deref() else {
            continue;
        };
        let target = registry.require(&association.target)?;
        let value = decode(descriptor, join_column, cursor.read()?, target.identity.kind)?;
        let link = if value.is_null() {
            Link::Absent
        } else {
            Link::Reference(value)
        };
        record.set_link(&association.name, link);
    }

    let mut meta = EntityMeta::default();
    if descriptor.versioned {
        let version = decode(descriptor, VERSION_COLUMN, cursor.read()?, AttributeKind::Integer)?;
        meta.version = Some(version.as_i64().unwrap_or_default());
    }
    meta.audit = match descriptor.audit {
        AuditMode::None => AuditMetadata::default(),
        AuditMode::CreatedDate => {
            let created_at = decode(descriptor, CREATED_AT_COLUMN, cursor.read()?, AttributeKind::Timestamp)?;
            AuditMetadata::from_columns(created_at.as_i64(), None, None, None)
        }
        AuditMode::Full => {
            let created_at = decode(descriptor, CREATED_AT_COLUMN, cursor.read()?, AttributeKind::Timestamp)?;
            let created_by = decode(descriptor, CREATED_BY_COLUMN, cursor.read()?, AttributeKind::Text)?;
            let updated_at = decode(descriptor, UPDATED_AT_COLUMN, cursor.read()?, AttributeKind::Timestamp)?;
            let updated_by = decode(descriptor, UPDATED_BY_COLUMN, cursor.read()?, AttributeKind::Text)?;
            AuditMetadata::from_columns(
                created_at.as_i64(),
                created_by.as_str().map(str::to_string),
                updated_at.as_i64(),
                updated_by.as_str().map(str::to_string),
            )
        }
    };

    if record.identity().is_null() {
        return Ok(None);
    }
    Ok(Some(record.with_meta(meta)))
}

fn decode(
    descriptor: &EntityDescriptor,
    column: &str,
    value: SqlValue,
    kind: AttributeKind,
) -> RepoResult<Value> {
    let shown = format!("{value:?}");
    Value::from_sql(value, kind).ok_or_else(|| {
        RepoError::InvalidData(format!(
            "`{}.{column}` holds {shown}, expected {kind:?}",
            descriptor.table
        ))
    })
}

/// Join-column value written for a to-one link.
pub(crate) fn link_value(record: &Record, association: &str) -> SqlValue {
    record
        .link(association)
        .and_then(Link::identity)
        .map_or(SqlValue::Null, Value::to_sql)
}

#[cfg(test)]
mod tests {
    use super::Select;
    use crate::paging::Sort;
    use crate::registry::{AttributeKind, EntityDescriptor, EntityRegistry};
    use crate::spec::Criteria;

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

    #[test]
    fn filter_paths_join_inner_and_bind_in_order() {
        let registry = registry();
        let criteria = Criteria::new(&registry, "Member").expect("criteria");
        let filter = criteria
            .equal("club.name", "TeamA")
            .expect("club")
            .and(criteria.greater_than("height", 170).expect("height"));

        let mut select = Select::new(&registry, "Member").expect("select");
        let where_sql = select.where_clause(&filter).expect("where");
        assert_eq!(where_sql, "(t1.\"name\" = ? AND t0.\"height\" > ?)");
        assert_eq!(
            select.from_clause(),
            "\"members\" t0 INNER JOIN \"clubs\" t1 ON t1.\"club_id\" = t0.\"club_id\""
        );
        assert_eq!(select.into_params().len(), 2);
    }

    #[test]
    fn association_identity_reads_the_join_column() {
        let registry = registry();
        let criteria = Criteria::new(&registry, "Member").expect("criteria");
        let mut select = Select::new(&registry, "Member").expect("select");
        let where_sql = select
            .where_clause(&criteria.equal("club.id", 3).expect("leaf"))
            .expect("where");
        assert_eq!(where_sql, "t0.\"club_id\" = ?");
        assert_eq!(select.from_clause(), "\"members\" t0");
    }

    #[test]
    fn null_and_empty_in_operands_render_without_placeholders() {
        let registry = registry();
        let criteria = Criteria::new(&registry, "Member").expect("criteria");
        let mut select = Select::new(&registry, "Member").expect("select");
        let filter = criteria
            .in_list("height", Vec::<i64>::new())
            .expect("in")
            .or(criteria.equal("name", crate::record::Value::Null).expect("null"));
        assert_eq!(
            select.where_clause(&filter).expect("where"),
            "(0 = 1 OR t0.\"name\" IS NULL)"
        );
        assert!(select.into_params().is_empty());
    }

    #[test]
    fn ordering_always_ends_with_identity() {
        let registry = registry();
        let mut select = Select::new(&registry, "Member").expect("select");
        let order = select
            .order_clause(&Sort::desc("height").then(crate::paging::Direction::Asc, "club.name"))
            .expect("order");
        assert_eq!(
            order,
            "t0.\"height\" DESC, t1.\"name\" ASC, t0.\"member_id\" ASC"
        );
        assert!(select.from_clause().contains("LEFT JOIN"));
    }
}
