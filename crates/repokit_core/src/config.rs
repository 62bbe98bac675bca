//! Repository configuration shape.
//!
//! Loading is the caller's concern; every field has a default so partial
//! documents deserialize.

use rusqlite::TransactionBehavior;
use serde::{Deserialize, Serialize};

/// How a persistence scope begins its SQLite transaction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionMode {
    Deferred,
    /// Takes the write lock at begin.
    #[default]
    Immediate,
    Exclusive,
}

impl TransactionMode {
    pub(crate) fn behavior(self) -> TransactionBehavior {
        match self {
            Self::Deferred => TransactionBehavior::Deferred,
            Self::Immediate => TransactionBehavior::Immediate,
            Self::Exclusive => TransactionBehavior::Exclusive,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Deferred => "deferred",
            Self::Immediate => "immediate",
            Self::Exclusive => "exclusive",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditingConfig {
    /// Stamp `updated_*` on the first write as well.
    pub modify_on_create: bool,
    /// Actor recorded by the default `FixedAuditor`.
    pub auditor: Option<String>,
}

impl Default for AuditingConfig {
    fn default() -> Self {
        Self {
            modify_on_create: true,
            auditor: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RepositoryConfig {
    pub transaction_mode: TransactionMode,
    /// SQLite `busy_timeout`; bounds pessimistic lock waits.
    pub lock_timeout_ms: u64,
    pub auditing: AuditingConfig,
    pub enforce_foreign_keys: bool,
}

impl Default for RepositoryConfig {
    fn default() -> Self {
        Self {
            transaction_mode: TransactionMode::default(),
            lock_timeout_ms: 5_000,
            auditing: AuditingConfig::default(),
            enforce_foreign_keys: true,
        }
    }
}
