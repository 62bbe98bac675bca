//! `Store` implementation over one rusqlite transaction.
//!
//! # Responsibility
//! - Render plans into SQL, execute them and decode rows into `Record`s.
//! - Write single rows, bulk statements and lock bookkeeping.
//!
//! # Invariants
//! - Versioned updates compare the version read by the caller; a mismatch
//!   is reported as `MergeOutcome::Stale`, never as an error.
//! - Update statements never write `created_*` columns.
//! - One-to-many fetch paths are loaded with one batched statement per path.

use super::sql::{
    decode_record, link_value, qualified_columns, Cursor, Select, ROOT_ALIAS,
};
use super::{MergeOutcome, Store};
use crate::db::schema::quote;
use crate::error::{RepoError, RepoResult};
use crate::fetch::FetchPath;
use crate::lock::{Assignment, BulkAction, LockMode};
use crate::query::{QueryPlan, Window};
use crate::record::{DeferredKey, DeferredLink, Link, Record, Value};
use crate::registry::{
    AuditMode, EntityDescriptor, EntityRegistry, CREATED_AT_COLUMN, CREATED_BY_COLUMN,
    UPDATED_AT_COLUMN, UPDATED_BY_COLUMN, VERSION_COLUMN,
};
use crate::spec::Specification;
use log::{debug, info, warn};
use rusqlite::types::Value as SqlValue;
use rusqlite::{params, params_from_iter, Transaction};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

const LOCK_UPSERT_SQL: &str = "INSERT INTO repository_locks (entity, acquired_at, acquired_by)
VALUES (?1, CAST(strftime('%s', 'now') AS INTEGER) * 1000, ?2)
ON CONFLICT(entity) DO UPDATE SET
    acquired_at = excluded.acquired_at,
    acquired_by = excluded.acquired_by;";

/// SQLite-backed store bound to one open transaction.
pub struct SqliteStore<'conn> {
    tx: Transaction<'conn>,
    registry: Arc<EntityRegistry>,
    lock_timeout: Duration,
}

impl<'conn> SqliteStore<'conn> {
    /// `lock_timeout` is the connection's configured `busy_timeout`; it is
    /// restored after every statement that carries a timeout hint.
    pub fn new(tx: Transaction<'conn>, registry: Arc<EntityRegistry>, lock_timeout: Duration) -> Self {
        Self {
            tx,
            registry,
            lock_timeout,
        }
    }

    fn with_hinted_timeout<T>(
        &self,
        plan: &QueryPlan,
        op: impl FnOnce() -> RepoResult<T>,
    ) -> RepoResult<T> {
        let Some(timeout_ms) = plan.hints().timeout_ms else {
            return op();
        };
        self.tx.busy_timeout(Duration::from_millis(timeout_ms))?;
        let result = op();
        self.tx.busy_timeout(self.lock_timeout)?;
        result
    }

    fn select_rows(&self, plan: &QueryPlan, window: Option<Window>) -> RepoResult<Vec<Record>> {
        let registry = self.registry.as_ref();
        let mut select = Select::new(registry, plan.entity())?;

        let mut segments: Vec<(String, String, &EntityDescriptor)> =
            vec![(String::new(), ROOT_ALIAS.to_string(), select.root())];
        for fetch in plan.fetch_paths().iter().filter(|fetch| fetch.is_to_one()) {
            let alias = select.join(fetch.path(), false)?;
            let target = association_target(registry, plan.entity(), fetch.path())?;
            segments.push((fetch.path().to_string(), alias, target));
        }

        let where_sql = plan
            .filter()
            .map(|filter| select.where_clause(filter))
            .transpose()?;
        let order_sql = select.order_clause(plan.sort())?;

        let columns: Vec<String> = segments
            .iter()
            .flat_map(|(_, alias, descriptor)| qualified_columns(descriptor, alias))
            .collect();
        let mut sql = format!("SELECT {} FROM {}", columns.join(", "), select.from_clause());
        if let Some(where_sql) = where_sql {
            sql.push_str(" WHERE ");
            sql.push_str(&where_sql);
        }
        sql.push_str(" ORDER BY ");
        sql.push_str(&order_sql);

        let mut params = select.into_params();
        if let Some(window) = window {
            sql.push_str(" LIMIT ? OFFSET ?");
            params.push(SqlValue::Integer(i64::try_from(window.limit).unwrap_or(i64::MAX)));
            params.push(SqlValue::Integer(i64::try_from(window.offset).unwrap_or(i64::MAX)));
        }

        let mut statement = self.tx.prepare(&sql)?;
        let mut rows = statement.query(params_from_iter(params.iter()))?;
        let mut records = Vec::new();
        while let Some(row) = rows.next()? {
            let mut cursor = Cursor::new(row);
            let mut decoded = Vec::with_capacity(segments.len());
            for (_, _, descriptor) in &segments {
                decoded.push(decode_record(registry, descriptor, &mut cursor)?);
            }

            // Deepest paths first, so each child is complete when it is nested.
            for index in (1..segments.len()).rev() {
                let child = decoded[index].take();
                let path = segments[index].0.as_str();
                let (parent_path, last) = path.rsplit_once('.').unwrap_or(("", path));
                let parent = segments
                    .iter()
                    .position(|(segment, _, _)| segment == parent_path)
                    .and_then(|position| decoded[position].as_mut());
                if let Some(parent) = parent {
                    let link = child.map_or(Link::Absent, |child| Link::Loaded(Box::new(child)));
                    parent.set_link(last, link);
                }
            }
            if let Some(root) = decoded.swap_remove(0) {
                records.push(root);
            }
        }
        Ok(records)
    }

    /// Loads one one-to-many fetch path for every owner reached in `records`.
    fn attach_collections(
        &self,
        entity: &str,
        fetch: &FetchPath,
        records: &mut [Record],
    ) -> RepoResult<()> {
        let registry = self.registry.as_ref();
        let (_, association) = registry
            .resolve_association(entity, fetch.path())
            .map_err(|err| RepoError::UnresolvableIntent(err.to_string()))?;
        let target = registry.require(&association.target)?;
        let mapped_by = association.mapped_by.as_deref().ok_or_else(|| {
            RepoError::InvalidDescriptor(format!(
                "`{entity}.{}` is not an inverse association",
                fetch.path()
            ))
        })?;
        let join_column = owning_join_column(target, mapped_by)?;

        let parent: Vec<&str> = match fetch.parent() {
            "" => Vec::new(),
            parent => parent.split('.').collect(),
        };
        let mut owners: Vec<Value> = Vec::new();
        for record in records.iter_mut() {
            visit(record, &parent, &mut |owner: &mut Record| {
                let identity = owner.identity();
                if !identity.is_null() && !owners.contains(identity) {
                    owners.push(identity.clone());
                }
            });
        }
        if owners.is_empty() {
            return Ok(());
        }

        let placeholders = vec!["?"; owners.len()].join(", ");
        let children = self.select_where(
            target,
            &format!("{ROOT_ALIAS}.{} IN ({placeholders})", quote(join_column)),
            owners.iter().map(Value::to_sql).collect(),
        )?;
        let mut groups: BTreeMap<String, Vec<Record>> = BTreeMap::new();
        for child in children {
            let owner = child
                .link(mapped_by)
                .and_then(Link::identity)
                .map(Value::cache_key);
            if let Some(owner) = owner {
                groups.entry(owner).or_default().push(child);
            }
        }

        for record in records.iter_mut() {
            visit(record, &parent, &mut |owner: &mut Record| {
                let rows = groups
                    .get(&owner.identity().cache_key())
                    .cloned()
                    .unwrap_or_default();
                owner.set_link(fetch.last(), Link::LoadedMany(rows));
            });
        }
        debug!(
            "event=store_fetch module=store entity={entity} path={} owners={}",
            fetch.path(),
            owners.len()
        );
        Ok(())
    }

    /// Root-only select over `descriptor` with a raw condition.
    fn select_where(
        &self,
        descriptor: &EntityDescriptor,
        condition: &str,
        params: Vec<SqlValue>,
    ) -> RepoResult<Vec<Record>> {
        let sql = format!(
            "SELECT {} FROM {} {ROOT_ALIAS} WHERE {condition} ORDER BY {ROOT_ALIAS}.{} ASC",
            qualified_columns(descriptor, ROOT_ALIAS).join(", "),
            quote(&descriptor.table),
            quote(&descriptor.identity.column)
        );
        let mut statement = self.tx.prepare(&sql)?;
        let mut rows = statement.query(params_from_iter(params.iter()))?;
        let mut records = Vec::new();
        while let Some(row) = rows.next()? {
            let mut cursor = Cursor::new(row);
            if let Some(record) = decode_record(&self.registry, descriptor, &mut cursor)? {
                records.push(record);
            }
        }
        Ok(records)
    }

    fn read_version(&self, descriptor: &EntityDescriptor, identity: &Value) -> RepoResult<i64> {
        let sql = format!(
            "SELECT {} FROM {} WHERE {} = ?1",
            quote(VERSION_COLUMN),
            quote(&descriptor.table),
            quote(&descriptor.identity.column)
        );
        let version = self
            .tx
            .query_row(&sql, [identity.to_sql()], |row| row.get::<_, i64>(0))?;
        Ok(version)
    }
}

impl Store for SqliteStore<'_> {
    fn execute(&self, plan: &QueryPlan, window: Option<Window>) -> RepoResult<Vec<Record>> {
        let started_at = Instant::now();
        let records = self.with_hinted_timeout(plan, || {
            let mut records = self.select_rows(plan, window)?;
            for fetch in plan.fetch_paths().iter().filter(|fetch| !fetch.is_to_one()) {
                self.attach_collections(plan.entity(), fetch, &mut records)?;
            }
            Ok(records)
        })?;
        debug!(
            "event=store_execute module=store entity={} origin={} rows={} fetch_paths={} timeout_ms={} duration_ms={}",
            plan.entity(),
            plan.origin(),
            records.len(),
            plan.fetch_paths().len(),
            plan.hints()
                .timeout_ms
                .map_or_else(|| "none".to_string(), |timeout| timeout.to_string()),
            started_at.elapsed().as_millis()
        );
        Ok(records)
    }

    fn persist(&self, record: &Record) -> RepoResult<Value> {
        let descriptor = self.registry.require(record.entity())?;
        let mut columns: Vec<String> = Vec::new();
        let mut params: Vec<SqlValue> = Vec::new();

        let identity = record.identity();
        if !identity.is_null() {
            columns.push(quote(&descriptor.identity.column));
            params.push(identity.to_sql());
        }
        for attribute in &descriptor.attributes {
            columns.push(quote(&attribute.column));
            params.push(record.get(&attribute.name).map_or(SqlValue::Null, Value::to_sql));
        }
        for association in descriptor.to_one_associations() {
            if let Some(join_column) = association.join_column.as_deref() {
                columns.push(quote(join_column));
                params.push(link_value(record, &association.name));
            }
        }
        if descriptor.versioned {
            columns.push(quote(VERSION_COLUMN));
            params.push(SqlValue::Integer(record.meta().version().unwrap_or(0)));
        }
        let audit = record.meta().audit();
        if descriptor.audit != AuditMode::None {
            columns.push(quote(CREATED_AT_COLUMN));
            params.push(optional_integer(audit.created_at()));
        }
        if descriptor.audit == AuditMode::Full {
            columns.push(quote(CREATED_BY_COLUMN));
            params.push(optional_text(audit.created_by()));
            columns.push(quote(UPDATED_AT_COLUMN));
            params.push(optional_integer(audit.updated_at()));
            columns.push(quote(UPDATED_BY_COLUMN));
            params.push(optional_text(audit.updated_by()));
        }

        let sql = if columns.is_empty() {
            format!("INSERT INTO {} DEFAULT VALUES", quote(&descriptor.table))
        } else {
            format!(
                "INSERT INTO {} ({}) VALUES ({})",
                quote(&descriptor.table),
                columns.join(", "),
                vec!["?"; columns.len()].join(", ")
            )
        };
        self.tx.execute(&sql, params_from_iter(params.iter()))?;

        if identity.is_null() {
            Ok(Value::Integer(self.tx.last_insert_rowid()))
        } else {
            Ok(identity.clone())
        }
    }

    fn merge(&self, record: &Record) -> RepoResult<MergeOutcome> {
        let descriptor = self.registry.require(record.entity())?;
        let mut sets: Vec<String> = Vec::new();
        let mut params: Vec<SqlValue> = Vec::new();

        for attribute in &descriptor.attributes {
            sets.push(format!("{} = ?", quote(&attribute.column)));
            params.push(record.get(&attribute.name).map_or(SqlValue::Null, Value::to_sql));
        }
        for association in descriptor.to_one_associations() {
            if let Some(join_column) = association.join_column.as_deref() {
                sets.push(format!("{} = ?", quote(join_column)));
                params.push(link_value(record, &association.name));
            }
        }
        if descriptor.audit == AuditMode::Full {
            let audit = record.meta().audit();
            sets.push(format!("{} = ?", quote(UPDATED_AT_COLUMN)));
            params.push(optional_integer(audit.updated_at()));
            sets.push(format!("{} = ?", quote(UPDATED_BY_COLUMN)));
            params.push(optional_text(audit.updated_by()));
        }
        let version = quote(VERSION_COLUMN);
        if descriptor.versioned {
            sets.push(format!("{version} = {version} + 1"));
        }
        let identity_column = quote(&descriptor.identity.column);
        if sets.is_empty() {
            sets.push(format!("{identity_column} = {identity_column}"));
        }

        let mut sql = format!(
            "UPDATE {} SET {} WHERE {identity_column} = ?",
            quote(&descriptor.table),
            sets.join(", ")
        );
        params.push(record.identity().to_sql());
        let expected = record.meta().version().filter(|_| descriptor.versioned);
        if let Some(expected) = expected {
            sql.push_str(&format!(" AND {version} = ?"));
            params.push(SqlValue::Integer(expected));
        }

        let affected = self.tx.execute(&sql, params_from_iter(params.iter()))?;
        if affected == 0 {
            if expected.is_some() && self.exists(record.entity(), record.identity())? {
                return Ok(MergeOutcome::Stale);
            }
            return Err(RepoError::NotFound {
                entity: record.entity().to_string(),
                identity: record.identity().to_string(),
            });
        }

        let version = match (descriptor.versioned, expected) {
            (false, _) => None,
            (true, Some(expected)) => Some(expected + 1),
            (true, None) => Some(self.read_version(descriptor, record.identity())?),
        };
        Ok(MergeOutcome::Applied { version })
    }

    fn remove(&self, entity: &str, identity: &Value) -> RepoResult<bool> {
        let descriptor = self.registry.require(entity)?;
        let sql = format!(
            "DELETE FROM {} WHERE {} = ?1",
            quote(&descriptor.table),
            quote(&descriptor.identity.column)
        );
        let affected = self.tx.execute(&sql, [identity.to_sql()])?;
        Ok(affected > 0)
    }

    fn exists(&self, entity: &str, identity: &Value) -> RepoResult<bool> {
        let descriptor = self.registry.require(entity)?;
        let sql = format!(
            "SELECT EXISTS(SELECT 1 FROM {} WHERE {} = ?1)",
            quote(&descriptor.table),
            quote(&descriptor.identity.column)
        );
        let exists = self
            .tx
            .query_row(&sql, [identity.to_sql()], |row| row.get::<_, bool>(0))?;
        Ok(exists)
    }

    fn count(&self, entity: &str, filter: Option<&Specification>) -> RepoResult<u64> {
        let mut select = Select::new(self.registry.as_ref(), entity)?;
        let where_sql = filter
            .map(|filter| select.where_clause(filter))
            .transpose()?;
        let mut sql = format!("SELECT COUNT(*) FROM {}", select.from_clause());
        if let Some(where_sql) = where_sql {
            sql.push_str(" WHERE ");
            sql.push_str(&where_sql);
        }
        let params = select.into_params();
        let count = self
            .tx
            .query_row(&sql, params_from_iter(params.iter()), |row| row.get::<_, i64>(0))?;
        Ok(u64::try_from(count).unwrap_or_default())
    }

    fn acquire_lock(&self, plan: &QueryPlan, mode: LockMode) -> RepoResult<()> {
        match mode {
            LockMode::None => Ok(()),
            LockMode::OptimisticRead => {
                debug!(
                    "event=lock_acquire module=store entity={} mode={} status=skipped",
                    plan.entity(),
                    mode.as_str()
                );
                Ok(())
            }
            LockMode::PessimisticWrite => {
                let started_at = Instant::now();
                let upsert = self.with_hinted_timeout(plan, || {
                    Ok(self.tx.execute(LOCK_UPSERT_SQL, params![plan.entity(), plan.origin()])?)
                });
                match upsert {
                    Ok(_) => {
                        info!(
                            "event=lock_acquire module=store entity={} mode={} status=ok duration_ms={}",
                            plan.entity(),
                            mode.as_str(),
                            started_at.elapsed().as_millis()
                        );
                        Ok(())
                    }
                    Err(err) => {
                        warn!(
                            "event=lock_acquire module=store entity={} mode={} status=error duration_ms={} error={}",
                            plan.entity(),
                            mode.as_str(),
                            started_at.elapsed().as_millis(),
                            err
                        );
                        Err(err)
                    }
                }
            }
        }
    }

    fn bulk_apply(
        &self,
        entity: &str,
        filter: Option<&Specification>,
        action: &BulkAction,
    ) -> RepoResult<u64> {
        let descriptor = self.registry.require(entity)?;
        let identity_column = quote(&descriptor.identity.column);
        let mut select = Select::new(self.registry.as_ref(), entity)?;
        let where_sql = filter
            .map(|filter| select.where_clause(filter))
            .transpose()?;
        let mut matching = format!(
            "SELECT {ROOT_ALIAS}.{identity_column} FROM {}",
            select.from_clause()
        );
        if let Some(where_sql) = where_sql {
            matching.push_str(" WHERE ");
            matching.push_str(&where_sql);
        }
        let filter_params = select.into_params();

        let (sql, params) = match action {
            BulkAction::Update(mutation) => {
                mutation.validate(descriptor)?;
                let mut sets = Vec::with_capacity(mutation.assignments().len());
                let mut params = Vec::with_capacity(mutation.assignments().len());
                for (attribute, assignment) in mutation.assignments() {
                    let column = descriptor
                        .attribute(attribute)
                        .map(|attribute| quote(&attribute.column))
                        .ok_or_else(|| {
                            RepoError::InvalidSpecification(format!(
                                "unknown attribute `{entity}.{attribute}`"
                            ))
                        })?;
                    match assignment {
                        Assignment::Set(value) => {
                            sets.push(format!("{column} = ?"));
                            params.push(value.to_sql());
                        }
                        Assignment::Increment(delta) => {
                            sets.push(format!("{column} = {column} + ?"));
                            params.push(delta.to_sql());
                        }
                    }
                }
                params.extend(filter_params);
                let sql = format!(
                    "UPDATE {} SET {} WHERE {identity_column} IN ({matching})",
                    quote(&descriptor.table),
                    sets.join(", ")
                );
                (sql, params)
            }
            BulkAction::Delete => (
                format!(
                    "DELETE FROM {} WHERE {identity_column} IN ({matching})",
                    quote(&descriptor.table)
                ),
                filter_params,
            ),
        };

        let affected = self.tx.execute(&sql, params_from_iter(params.iter()))?;
        Ok(u64::try_from(affected).unwrap_or_default())
    }

    fn load_deferred(&self, link: &DeferredLink) -> RepoResult<Vec<Record>> {
        let target = self.registry.require(link.target())?;
        match link.key() {
            DeferredKey::ById(identity) => self.select_where(
                target,
                &format!("{ROOT_ALIAS}.{} = ?", quote(&target.identity.column)),
                vec![identity.to_sql()],
            ),
            DeferredKey::ByOwner { mapped_by, owner } => {
                let join_column = owning_join_column(target, mapped_by)?;
                self.select_where(
                    target,
                    &format!("{ROOT_ALIAS}.{} = ?", quote(join_column)),
                    vec![owner.to_sql()],
                )
            }
        }
    }

    fn commit(self: Box<Self>) -> RepoResult<()> {
        self.tx.commit()?;
        Ok(())
    }

    fn rollback(self: Box<Self>) -> RepoResult<()> {
        self.tx.rollback()?;
        Ok(())
    }
}

fn association_target<'r>(
    registry: &'r EntityRegistry,
    entity: &str,
    path: &str,
) -> RepoResult<&'r EntityDescriptor> {
    let (_, association) = registry
        .resolve_association(entity, path)
        .map_err(|err| RepoError::UnresolvableIntent(err.to_string()))?;
    registry.require(&association.target)
}

fn owning_join_column<'d>(target: &'d EntityDescriptor, mapped_by: &str) -> RepoResult<&'d str> {
    target
        .association(mapped_by)
        .and_then(|association| association.join_column.as_deref())
        .ok_or_else(|| {
            RepoError::InvalidDescriptor(format!(
                "`{}.{mapped_by}` carries no join column",
                target.name
            ))
        })
}

/// Calls `f` on every record reached from `record` through loaded to-one
/// links along `path`.
fn visit(record: &mut Record, path: &[&str], f: &mut dyn FnMut(&mut Record)) {
    match path.split_first() {
        None => f(record),
        Some((head, rest)) => {
            if let Some(Link::Loaded(child)) = record.link_mut(head) {
                visit(child, rest, f);
            }
        }
    }
}

fn optional_integer(value: Option<i64>) -> SqlValue {
    value.map_or(SqlValue::Null, SqlValue::Integer)
}

fn optional_text(value: Option<&str>) -> SqlValue {
    value.map_or(SqlValue::Null, |value| SqlValue::Text(value.to_string()))
}
