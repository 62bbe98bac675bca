//! Auditing interceptor: created/updated stamping on the write path.
//!
//! # Responsibility
//! - Stamp `created_at`/`created_by` on an entity's first write.
//! - Stamp `updated_at`/`updated_by` on later writes, and on the first
//!   write too unless `modify_on_create` is disabled.
//!
//! # Invariants
//! - `created_*` fields are set once and never rewritten.
//! - The current actor comes from the scope context, never from global state.
//! - Set-based bulk mutations bypass this interceptor entirely.

use crate::registry::AuditMode;
use std::fmt::Debug;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Audit columns of one entity. Read-only outside this module.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuditMetadata {
    created_at: Option<i64>,
    created_by: Option<String>,
    updated_at: Option<i64>,
    updated_by: Option<String>,
}

impl AuditMetadata {
    pub fn created_at(&self) -> Option<i64> {
        self.created_at
    }

    pub fn created_by(&self) -> Option<&str> {
        self.created_by.as_deref()
    }

    pub fn updated_at(&self) -> Option<i64> {
        self.updated_at
    }

    pub fn updated_by(&self) -> Option<&str> {
        self.updated_by.as_deref()
    }

    /// Rebuilds metadata from persisted columns.
    pub(crate) fn from_columns(
        created_at: Option<i64>,
        created_by: Option<String>,
        updated_at: Option<i64>,
        updated_by: Option<String>,
    ) -> Self {
        Self {
            created_at,
            created_by,
            updated_at,
            updated_by,
        }
    }
}

/// Source of "now" in epoch milliseconds.
pub trait Clock: Send + Sync + Debug {
    fn now_epoch_ms(&self) -> i64;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_epoch_ms(&self) -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| i64::try_from(elapsed.as_millis()).unwrap_or(i64::MAX))
            .unwrap_or_default()
    }
}

/// Clock advanced explicitly by the caller.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicI64,
}

impl ManualClock {
    pub fn starting_at(epoch_ms: i64) -> Self {
        Self {
            now: AtomicI64::new(epoch_ms),
        }
    }

    pub fn set(&self, epoch_ms: i64) {
        self.now.store(epoch_ms, Ordering::SeqCst);
    }

    pub fn advance(&self, delta_ms: i64) {
        self.now.fetch_add(delta_ms, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_epoch_ms(&self) -> i64 {
        self.now.load(Ordering::SeqCst)
    }
}

/// Supplies the actor recorded in `created_by`/`updated_by`.
pub trait AuditorSource: Send + Sync + Debug {
    fn current_auditor(&self) -> Option<String>;
}

/// Constant actor, configured once at startup.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FixedAuditor(pub Option<String>);

impl AuditorSource for FixedAuditor {
    fn current_auditor(&self) -> Option<String> {
        self.0.clone()
    }
}

/// Stamps audit metadata for one write.
#[derive(Debug, Clone, Copy)]
pub struct Auditor<'a> {
    pub(crate) clock: &'a dyn Clock,
    pub(crate) source: &'a dyn AuditorSource,
    pub(crate) modify_on_create: bool,
}

impl Auditor<'_> {
    /// First write of a new entity.
    pub fn on_create(&self, mode: AuditMode, audit: &mut AuditMetadata) {
        if mode == AuditMode::None {
            return;
        }
        let now = self.clock.now_epoch_ms();
        audit.created_at.get_or_insert(now);
        if mode == AuditMode::CreatedDate {
            return;
        }

        let actor = self.source.current_auditor();
        if audit.created_by.is_none() {
            audit.created_by = actor.clone();
        }
        if self.modify_on_create {
            audit.updated_at = Some(now);
            audit.updated_by = actor;
        }
    }

    /// Any later write of an existing entity.
    pub fn on_update(&self, mode: AuditMode, audit: &mut AuditMetadata) {
        if mode != AuditMode::Full {
            return;
        }
        audit.updated_at = Some(self.clock.now_epoch_ms());
        audit.updated_by = self.source.current_auditor();
    }
}

#[cfg(test)]
mod tests {
    use super::{AuditMetadata, Auditor, FixedAuditor, ManualClock};
    use crate::registry::AuditMode;

    fn auditor<'a>(
        clock: &'a ManualClock,
        source: &'a FixedAuditor,
        modify_on_create: bool,
    ) -> Auditor<'a> {
        Auditor {
            clock,
            source,
            modify_on_create,
        }
    }

    #[test]
    fn create_without_modify_leaves_update_fields_unset() {
        let clock = ManualClock::starting_at(1_000);
        let source = FixedAuditor(Some("registrar".to_string()));
        let mut audit = AuditMetadata::default();

        auditor(&clock, &source, false).on_create(AuditMode::Full, &mut audit);

        assert_eq!(audit.created_at(), Some(1_000));
        assert_eq!(audit.created_by(), Some("registrar"));
        assert_eq!(audit.updated_at(), None);
        assert_eq!(audit.updated_by(), None);
    }

    #[test]
    fn create_with_modify_stamps_both_sides() {
        let clock = ManualClock::starting_at(1_000);
        let source = FixedAuditor(Some("registrar".to_string()));
        let mut audit = AuditMetadata::default();

        auditor(&clock, &source, true).on_create(AuditMode::Full, &mut audit);

        assert_eq!(audit.updated_at(), Some(1_000));
        assert_eq!(audit.updated_by(), Some("registrar"));
    }

    #[test]
    fn update_never_touches_created_fields() {
        let clock = ManualClock::starting_at(1_000);
        let source = FixedAuditor(Some("registrar".to_string()));
        let stamp = auditor(&clock, &source, false);
        let mut audit = AuditMetadata::default();
        stamp.on_create(AuditMode::Full, &mut audit);

        clock.advance(500);
        stamp.on_update(AuditMode::Full, &mut audit);
        stamp.on_create(AuditMode::Full, &mut audit);

        assert_eq!(audit.created_at(), Some(1_000));
        assert_eq!(audit.updated_at(), Some(1_500));
    }

    #[test]
    fn created_date_mode_only_sets_created_at() {
        let clock = ManualClock::starting_at(42);
        let source = FixedAuditor(Some("registrar".to_string()));
        let mut audit = AuditMetadata::default();

        auditor(&clock, &source, true).on_create(AuditMode::CreatedDate, &mut audit);

        assert_eq!(audit.created_at(), Some(42));
        assert_eq!(audit.created_by(), None);
        assert_eq!(audit.updated_at(), None);
    }
}
