//! Connection bootstrap utilities for SQLite.
//!
//! # Responsibility
//! - Open file or in-memory SQLite connections.
//! - Configure pragmas and the busy timeout from `RepositoryConfig`.
//! - Apply framework migrations and create entity tables before returning
//!   a usable connection.
//!
//! # Invariants
//! - Returned connections have `foreign_keys` set per config.
//! - Returned connections have migrations and entity tables in place.

use super::migrations::apply_migrations;
use super::schema::ensure_entity_tables;
use super::DbResult;
use crate::config::RepositoryConfig;
use crate::registry::EntityRegistry;
use log::{error, info};
use rusqlite::Connection;
use std::path::Path;
use std::time::{Duration, Instant};

/// Opens a SQLite database file and bootstraps it for `registry`.
///
/// # Side effects
/// - Performs connection bootstrap, migration checks and table creation.
/// - Emits `db_open` logging events with duration and status.
pub fn open_db(
    path: impl AsRef<Path>,
    registry: &EntityRegistry,
    config: &RepositoryConfig,
) -> DbResult<Connection> {
    open_with("file", || Connection::open(path), registry, config)
}

/// Opens an in-memory SQLite database and bootstraps it for `registry`.
///
/// # Side effects
/// - Performs connection bootstrap, migration checks and table creation.
/// - Emits `db_open` logging events with duration and status.
pub fn open_db_in_memory(
    registry: &EntityRegistry,
    config: &RepositoryConfig,
) -> DbResult<Connection> {
    open_with("memory", Connection::open_in_memory, registry, config)
}

fn open_with(
    mode: &str,
    open: impl FnOnce() -> rusqlite::Result<Connection>,
    registry: &EntityRegistry,
    config: &RepositoryConfig,
) -> DbResult<Connection> {
    let started_at = Instant::now();
    info!("event=db_open module=db status=start mode={mode}");

    let mut conn = match open() {
        Ok(conn) => conn,
        Err(err) => {
            error!(
                "event=db_open module=db status=error mode={mode} duration_ms={} error_code=db_open_failed error={}",
                started_at.elapsed().as_millis(),
                err
            );
            return Err(err.into());
        }
    };

    match bootstrap_connection(&mut conn, registry, config) {
        Ok(()) => {
            info!(
                "event=db_open module=db status=ok mode={mode} duration_ms={} entities={}",
                started_at.elapsed().as_millis(),
                registry.descriptors().count()
            );
            Ok(conn)
        }
        Err(err) => {
            error!(
                "event=db_open module=db status=error mode={mode} duration_ms={} error_code=db_bootstrap_failed error={}",
                started_at.elapsed().as_millis(),
                err
            );
            Err(err)
        }
    }
}

fn bootstrap_connection(
    conn: &mut Connection,
    registry: &EntityRegistry,
    config: &RepositoryConfig,
) -> DbResult<()> {
    let foreign_keys = if config.enforce_foreign_keys { "ON" } else { "OFF" };
    conn.execute_batch(&format!("PRAGMA foreign_keys = {foreign_keys};"))?;
    conn.busy_timeout(Duration::from_millis(config.lock_timeout_ms))?;
    apply_migrations(conn)?;
    ensure_entity_tables(conn, registry)?;
    Ok(())
}
