//! Persistence scope: one unit of work over one store transaction.
//!
//! # Responsibility
//! - Bracket reads and writes in a transaction that commits or rolls back
//!   as a whole.
//! - Keep a first-level cache (identity map) of rows loaded or saved in
//!   the scope.
//! - Bind deferred associations to the scope through a ticket, so access
//!   after the scope ends fails with `DetachedAccess`.
//! - Run the auditing interceptor and new-vs-existing classification on
//!   every save.
//!
//! # Invariants
//! - Dropping a scope without `commit` rolls the transaction back.
//! - A stale versioned update never fails mid-scope; `commit` reports it as
//!   `OptimisticConflict` and rolls back instead.
//! - Bulk mutations clear the whole first-level cache.
//! - Rows loaded under a read-only hint are never cached and never written.

use crate::audit::{Auditor, AuditorSource, Clock, FixedAuditor, SystemClock};
use crate::config::{AuditingConfig, RepositoryConfig};
use crate::db::{open_db, open_db_in_memory};
use crate::entity::{Association, Collection, Entity};
use crate::error::{RepoError, RepoResult};
use crate::identity::{classify, EntityState};
use crate::lock::{BulkAction, LockMode};
use crate::query::{DeclaredQuery, Params, QueryPlan, Window};
use crate::record::{DeferredKey, DeferredLink, Link, Record, Value};
use crate::registry::EntityRegistry;
use crate::spec::{Criteria, Specification};
use crate::store::{MergeOutcome, SqliteStore, Store};
use log::{debug, error, info, warn};
use rusqlite::Connection;
use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use uuid::Uuid;

/// Identity of one scope, shared with every deferred link it hands out.
#[derive(Debug, Clone)]
pub struct ScopeTicket {
    id: Uuid,
    open: Arc<AtomicBool>,
}

impl ScopeTicket {
    fn issue() -> Self {
        Self {
            id: Uuid::new_v4(),
            open: Arc::new(AtomicBool::new(true)),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }
}

/// Closes the ticket however the scope ends.
#[derive(Debug)]
struct TicketGuard(ScopeTicket);

impl Drop for TicketGuard {
    fn drop(&mut self) {
        self.0.open.store(false, Ordering::SeqCst);
    }
}

/// Per-scope collaborators of the auditing interceptor.
#[derive(Debug, Clone)]
pub struct ScopeContext {
    auditor: Arc<dyn AuditorSource>,
    clock: Arc<dyn Clock>,
    modify_on_create: bool,
}

impl ScopeContext {
    pub fn new(auditor: Arc<dyn AuditorSource>, clock: Arc<dyn Clock>) -> Self {
        Self {
            auditor,
            clock,
            modify_on_create: true,
        }
    }

    /// Fixed auditor and system clock from configuration.
    pub fn from_config(config: &AuditingConfig) -> Self {
        Self {
            auditor: Arc::new(FixedAuditor(config.auditor.clone())),
            clock: Arc::new(SystemClock),
            modify_on_create: config.modify_on_create,
        }
    }

    pub fn with_auditor(mut self, auditor: Arc<dyn AuditorSource>) -> Self {
        self.auditor = auditor;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_modify_on_create(mut self, modify_on_create: bool) -> Self {
        self.modify_on_create = modify_on_create;
        self
    }

    fn auditor(&self) -> Auditor<'_> {
        Auditor {
            clock: self.clock.as_ref(),
            source: self.auditor.as_ref(),
            modify_on_create: self.modify_on_create,
        }
    }
}

impl Default for ScopeContext {
    fn default() -> Self {
        Self::from_config(&AuditingConfig::default())
    }
}

type CacheKey = (String, String);

/// Open unit of work. Obtained from `Database::scope`.
pub struct Scope<'s> {
    store: Box<dyn Store + 's>,
    registry: Arc<EntityRegistry>,
    context: ScopeContext,
    ticket: TicketGuard,
    cache: RefCell<BTreeMap<CacheKey, Record>>,
    round_trips: Cell<u64>,
    pending_conflict: RefCell<Option<RepoError>>,
    started_at: Instant,
}

impl<'s> Scope<'s> {
    pub(crate) fn begin(
        store: Box<dyn Store + 's>,
        registry: Arc<EntityRegistry>,
        context: ScopeContext,
    ) -> Self {
        let ticket = ScopeTicket::issue();
        debug!("event=scope_begin module=scope scope_id={}", ticket.id());
        Self {
            store,
            registry,
            context,
            ticket: TicketGuard(ticket),
            cache: RefCell::new(BTreeMap::new()),
            round_trips: Cell::new(0),
            pending_conflict: RefCell::new(None),
            started_at: Instant::now(),
        }
    }

    pub fn ticket(&self) -> &ScopeTicket {
        &self.ticket.0
    }

    pub fn registry(&self) -> &EntityRegistry {
        &self.registry
    }

    /// Store calls issued so far by this scope.
    pub fn round_trips(&self) -> u64 {
        self.round_trips.get()
    }

    /// Whether `(entity, identity)` is in the first-level cache.
    pub fn is_cached(&self, entity: &str, identity: &Value) -> bool {
        self.cache.borrow().contains_key(&cache_key(entity, identity))
    }

    /// Commits every write of the scope.
    ///
    /// # Errors
    /// - `OptimisticConflict` when a versioned update found a stale row; the
    ///   scope is rolled back.
    pub fn commit(self) -> RepoResult<()> {
        let Scope {
            store,
            ticket,
            pending_conflict,
            round_trips,
            started_at,
            ..
        } = self;
        let scope_id = ticket.0.id();

        if let Some(conflict) = pending_conflict.into_inner() {
            warn!(
                "event=scope_commit module=scope scope_id={scope_id} status=conflict round_trips={} duration_ms={} error={}",
                round_trips.get(),
                started_at.elapsed().as_millis(),
                conflict
            );
            if let Err(err) = store.rollback() {
                error!(
                    "event=scope_rollback module=scope scope_id={scope_id} status=error error={err}"
                );
            }
            return Err(conflict);
        }

        match store.commit() {
            Ok(()) => {
                info!(
                    "event=scope_commit module=scope scope_id={scope_id} status=ok round_trips={} duration_ms={}",
                    round_trips.get(),
                    started_at.elapsed().as_millis()
                );
                Ok(())
            }
            Err(err) => {
                error!(
                    "event=scope_commit module=scope scope_id={scope_id} status=error duration_ms={} error={}",
                    started_at.elapsed().as_millis(),
                    err
                );
                Err(err)
            }
        }
    }

    /// Discards every write of the scope.
    pub fn rollback(self) -> RepoResult<()> {
        let Scope {
            store,
            ticket,
            started_at,
            ..
        } = self;
        info!(
            "event=scope_rollback module=scope scope_id={} status=ok duration_ms={}",
            ticket.0.id(),
            started_at.elapsed().as_millis()
        );
        store.rollback()
    }

    /// Loads the target of a to-one association.
    ///
    /// # Errors
    /// - `DetachedAccess` when the handle belongs to another or ended scope.
    pub fn resolve<T: Entity>(&self, association: &Association<T>) -> RepoResult<Option<T>> {
        match association {
            Association::Absent => Ok(None),
            Association::Loaded(target) => Ok(Some(target.as_ref().clone())),
            Association::Reference(identity) => self
                .find_record(T::NAME, identity)?
                .map(T::from_record)
                .transpose(),
            Association::Deferred(link) => self
                .load_deferred(link)?
                .into_iter()
                .next()
                .map(T::from_record)
                .transpose(),
        }
    }

    /// Loads the rows of a one-to-many association.
    ///
    /// # Errors
    /// - `DetachedAccess` when the handle belongs to another or ended scope.
    pub fn resolve_many<T: Entity>(&self, collection: &Collection<T>) -> RepoResult<Vec<T>> {
        match collection {
            Collection::Unset => Ok(Vec::new()),
            Collection::Loaded(items) => Ok(items.clone()),
            Collection::Deferred(link) => self
                .load_deferred(link)?
                .into_iter()
                .map(T::from_record)
                .collect(),
        }
    }

    /// Parses `statement` as an ad-hoc declared query over `E` and runs it
    /// in this scope. Hand-written repository fragments are built on this.
    ///
    /// # Errors
    /// - `UnresolvableIntent` when the statement does not parse or its
    ///   parameters do not match `params`.
    pub fn create_query<E: Entity>(&self, statement: &str, params: &Params) -> RepoResult<Vec<E>> {
        let query = DeclaredQuery::parse(&self.registry, E::NAME, "create_query", statement)?;
        let plan = query.to_plan(&self.registry, params)?;
        debug!(
            "event=create_query module=scope scope_id={} entity={}",
            self.ticket.0.id(),
            E::NAME
        );
        self.execute(&plan, plan.list_window())?
            .into_iter()
            .map(E::from_record)
            .collect()
    }

    pub(crate) fn execute(&self, plan: &QueryPlan, window: Option<Window>) -> RepoResult<Vec<Record>> {
        if plan.lock() == LockMode::PessimisticWrite {
            self.trip(|store| store.acquire_lock(plan, plan.lock()))?;
        } else if plan.lock() != LockMode::None {
            self.store.acquire_lock(plan, plan.lock())?;
        }

        let mut rows = self.trip(|store| store.execute(plan, window))?;
        let read_only = plan.hints().read_only;
        for row in &mut rows {
            if read_only {
                row.meta_mut().read_only = true;
            }
            self.attach(row)?;
            if !read_only {
                self.cache_insert(row.clone())?;
            }
        }
        Ok(rows)
    }

    pub(crate) fn count(&self, entity: &str, filter: Option<&Specification>) -> RepoResult<u64> {
        self.trip(|store| store.count(entity, filter))
    }

    /// Cached row, or one store lookup by identity.
    pub(crate) fn find_record(&self, entity: &str, identity: &Value) -> RepoResult<Option<Record>> {
        if let Some(cached) = self.cache.borrow().get(&cache_key(entity, identity)) {
            return Ok(Some(cached.clone()));
        }
        let descriptor = self.registry.require(entity)?;
        let filter = Criteria::new(&self.registry, entity)?
            .equal(&descriptor.identity.name, identity.clone())?;
        let plan = QueryPlan::new(&self.registry, entity, "find_by_id")?.with_filter(Some(filter))?;
        Ok(self.execute(&plan, None)?.into_iter().next())
    }

    pub(crate) fn exists(&self, entity: &str, identity: &Value) -> RepoResult<bool> {
        if self.is_cached(entity, identity) {
            return Ok(true);
        }
        self.trip(|store| store.exists(entity, identity))
    }

    /// Inserts or updates one row and returns it as stored.
    ///
    /// # Errors
    /// - `TransientReference` when a loaded to-one target was never saved.
    /// - `NotFound` when updating a row that does not exist.
    pub(crate) fn save_record(&self, record: Record) -> RepoResult<Record> {
        let descriptor = self.registry.require(record.entity())?;
        if record.meta().is_read_only() {
            debug!(
                "event=save_skip module=scope entity={} reason=read_only",
                descriptor.name
            );
            return Ok(record);
        }

        for association in descriptor.to_one_associations() {
            if let Some(Link::Loaded(target)) = record.link(&association.name) {
                if target.identity().is_null() {
                    return Err(RepoError::TransientReference {
                        entity: descriptor.name.clone(),
                        association: association.name.clone(),
                    });
                }
            }
        }

        let state = classify(descriptor, &record, || {
            self.trip(|store| store.exists(record.entity(), record.identity()))
        })?;
        let auditor = self.context.auditor();
        let mut record = record;
        match state {
            EntityState::New => {
                auditor.on_create(descriptor.audit, &mut record.meta_mut().audit);
                if descriptor.versioned {
                    record.meta_mut().version = Some(0);
                }
                let identity = self.trip(|store| store.persist(&record))?;
                record.set_identity(identity);
            }
            EntityState::Existing => {
                auditor.on_update(descriptor.audit, &mut record.meta_mut().audit);
                match self.trip(|store| store.merge(&record))? {
                    MergeOutcome::Applied { version } => {
                        if version.is_some() {
                            record.meta_mut().version = version;
                        }
                    }
                    MergeOutcome::Stale => {
                        let conflict = RepoError::OptimisticConflict {
                            entity: descriptor.name.clone(),
                            identity: record.identity().to_string(),
                        };
                        warn!(
                            "event=save_conflict module=scope entity={} identity={}",
                            descriptor.name,
                            record.identity()
                        );
                        self.pending_conflict.borrow_mut().get_or_insert(conflict);
                        return Ok(record);
                    }
                }
            }
        }

        self.attach(&mut record)?;
        self.cache_insert(record.clone())?;
        Ok(record)
    }

    pub(crate) fn remove(&self, entity: &str, identity: &Value) -> RepoResult<bool> {
        let removed = self.trip(|store| store.remove(entity, identity))?;
        self.cache.borrow_mut().remove(&cache_key(entity, identity));
        Ok(removed)
    }

    /// One set-based statement; clears the first-level cache.
    pub(crate) fn bulk(
        &self,
        entity: &str,
        filter: Option<&Specification>,
        action: &BulkAction,
    ) -> RepoResult<u64> {
        let started_at = Instant::now();
        let affected = self.trip(|store| store.bulk_apply(entity, filter, action))?;
        let evicted = {
            let mut cache = self.cache.borrow_mut();
            let evicted = cache.len();
            cache.clear();
            evicted
        };
        info!(
            "event=bulk_apply module=scope entity={entity} action={} rows={affected} cache_evicted={evicted} duration_ms={}",
            action.as_str(),
            started_at.elapsed().as_millis()
        );
        Ok(affected)
    }

    fn load_deferred(&self, link: &DeferredLink) -> RepoResult<Vec<Record>> {
        let ticket = &self.ticket.0;
        if link.ticket.id() != ticket.id() || !link.ticket.is_open() {
            return Err(RepoError::DetachedAccess {
                entity: link.entity.clone(),
                association: link.association.clone(),
            });
        }
        if let DeferredKey::ById(identity) = &link.key {
            return Ok(self.find_record(&link.target, identity)?.into_iter().collect());
        }
        let mut rows = self.trip(|store| store.load_deferred(link))?;
        for row in &mut rows {
            self.attach(row)?;
            self.cache_insert(row.clone())?;
        }
        Ok(rows)
    }

    /// Binds unloaded associations of `record` (and its loaded children) to
    /// this scope.
    fn attach(&self, record: &mut Record) -> RepoResult<()> {
        let descriptor = self.registry.require(record.entity())?;
        let owner = record.identity().clone();
        for association in &descriptor.associations {
            let deferred = |key: DeferredKey| DeferredLink {
                entity: descriptor.name.clone(),
                association: association.name.clone(),
                target: association.target.clone(),
                key,
                ticket: self.ticket.0.clone(),
            };
            let inverse = association
                .mapped_by
                .as_deref()
                .filter(|_| !association.is_to_one() && !owner.is_null());

            let replacement = match record.link_mut(&association.name) {
                Some(Link::Reference(identity)) => Some(deferred(DeferredKey::ById(identity.clone()))),
                Some(Link::Loaded(child)) => {
                    self.attach(child)?;
                    None
                }
                Some(Link::LoadedMany(children)) => {
                    for child in children.iter_mut() {
                        self.attach(child)?;
                    }
                    None
                }
                Some(Link::Deferred(_)) => None,
                Some(Link::Absent) | None => inverse.map(|mapped_by| {
                    deferred(DeferredKey::ByOwner {
                        mapped_by: mapped_by.to_string(),
                        owner: owner.clone(),
                    })
                }),
            };
            if let Some(link) = replacement {
                record.set_link(&association.name, Link::Deferred(link));
            }
        }
        Ok(())
    }

    /// Caches `record` and its materialized children as separate entries.
    ///
    /// The cached owner only links to its children by identity, so a later
    /// save of a child is what the owner resolves to.
    fn cache_insert(&self, mut record: Record) -> RepoResult<()> {
        let mut children = Vec::new();
        for (_, link) in record.links_mut() {
            let reduced = match link {
                Link::Loaded(child) => Some(Link::Reference(child.identity().clone())),
                Link::LoadedMany(_) => Some(Link::Absent),
                _ => None,
            };
            if let Some(reduced) = reduced {
                match std::mem::replace(link, reduced) {
                    Link::Loaded(child) => children.push(*child),
                    Link::LoadedMany(many) => children.extend(many),
                    _ => {}
                }
            }
        }
        self.attach(&mut record)?;
        let key = cache_key(record.entity(), record.identity());
        self.cache.borrow_mut().insert(key, record);
        for child in children {
            if !child.meta().is_read_only() && !child.identity().is_null() {
                self.cache_insert(child)?;
            }
        }
        Ok(())
    }

    fn trip<T>(&self, op: impl FnOnce(&dyn Store) -> RepoResult<T>) -> RepoResult<T> {
        self.round_trips.set(self.round_trips.get() + 1);
        op(self.store.as_ref())
    }
}

fn cache_key(entity: &str, identity: &Value) -> CacheKey {
    (entity.to_string(), identity.cache_key())
}

/// An open SQLite database bound to one entity registry.
pub struct Database {
    conn: Connection,
    registry: Arc<EntityRegistry>,
    config: RepositoryConfig,
    context: ScopeContext,
}

impl Database {
    /// Opens (and bootstraps) a database file.
    pub fn open(
        path: impl AsRef<Path>,
        registry: Arc<EntityRegistry>,
        config: RepositoryConfig,
    ) -> RepoResult<Self> {
        let conn = open_db(path, &registry, &config)?;
        Ok(Self::with_connection(conn, registry, config))
    }

    pub fn open_in_memory(registry: Arc<EntityRegistry>, config: RepositoryConfig) -> RepoResult<Self> {
        let conn = open_db_in_memory(&registry, &config)?;
        Ok(Self::with_connection(conn, registry, config))
    }

    fn with_connection(conn: Connection, registry: Arc<EntityRegistry>, config: RepositoryConfig) -> Self {
        let context = ScopeContext::from_config(&config.auditing);
        Self {
            conn,
            registry,
            config,
            context,
        }
    }

    /// Replaces the context handed to every new scope.
    pub fn with_context(mut self, context: ScopeContext) -> Self {
        self.context = context;
        self
    }

    pub fn registry(&self) -> &Arc<EntityRegistry> {
        &self.registry
    }

    pub fn config(&self) -> &RepositoryConfig {
        &self.config
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Begins a scope with the database's default context.
    ///
    /// # Errors
    /// - `LockTimeout` when the transaction cannot begin within the lock
    ///   timeout.
    pub fn scope(&mut self) -> RepoResult<Scope<'_>> {
        let context = self.context.clone();
        self.scope_with(context)
    }

    pub fn scope_with(&mut self, context: ScopeContext) -> RepoResult<Scope<'_>> {
        let mode = self.config.transaction_mode;
        let tx = self.conn.transaction_with_behavior(mode.behavior())?;
        debug!(
            "event=scope_open module=scope transaction_mode={}",
            mode.as_str()
        );
        let store = SqliteStore::new(
            tx,
            Arc::clone(&self.registry),
            Duration::from_millis(self.config.lock_timeout_ms),
        );
        Ok(Scope::begin(
            Box::new(store),
            Arc::clone(&self.registry),
            context,
        ))
    }

    /// Runs `work` in a fresh scope, committing only when it returns `Ok`.
    pub fn transaction<T>(
        &mut self,
        work: impl FnOnce(&Scope<'_>) -> RepoResult<T>,
    ) -> RepoResult<T> {
        let scope = self.scope()?;
        match work(&scope) {
            Ok(value) => {
                scope.commit()?;
                Ok(value)
            }
            Err(err) => {
                if let Err(rollback_err) = scope.rollback() {
                    error!(
                        "event=scope_rollback module=scope status=error error={rollback_err}"
                    );
                }
                Err(err)
            }
        }
    }
}
