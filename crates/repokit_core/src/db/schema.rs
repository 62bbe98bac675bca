//! Entity table DDL generated from the registry.
//!
//! # Invariants
//! - Statements are `IF NOT EXISTS`; re-running them on an existing
//!   database is a no-op.
//! - Every many-to-one join column references its target identity column.

use crate::db::DbResult;
use crate::registry::{
    AuditMode, EntityDescriptor, EntityRegistry, IdentityStrategy, CREATED_AT_COLUMN,
    CREATED_BY_COLUMN, UPDATED_AT_COLUMN, UPDATED_BY_COLUMN, VERSION_COLUMN,
};
use log::debug;
use rusqlite::Connection;

/// Creates every missing entity table and join-column index.
pub fn ensure_entity_tables(conn: &Connection, registry: &EntityRegistry) -> DbResult<()> {
    for descriptor in registry.descriptors() {
        let ddl = table_ddl(registry, descriptor);
        conn.execute_batch(&ddl)?;
        debug!(
            "event=schema_ensure module=db entity={} table={}",
            descriptor.name, descriptor.table
        );
    }
    Ok(())
}

/// `CREATE TABLE` plus index statements for one entity.
pub fn table_ddl(registry: &EntityRegistry, descriptor: &EntityDescriptor) -> String {
    let mut columns = Vec::new();
    let identity = &descriptor.identity;
    columns.push(match identity.strategy {
        IdentityStrategy::Generated => format!("{} INTEGER PRIMARY KEY", quote(&identity.column)),
        IdentityStrategy::Assigned => format!(
            "{} {} PRIMARY KEY NOT NULL",
            quote(&identity.column),
            identity.kind.sql_type()
        ),
    });

    for attribute in &descriptor.attributes {
        columns.push(format!(
            "{} {}",
            quote(&attribute.column),
            attribute.kind.sql_type()
        ));
    }

    let mut indexes = Vec::new();
    for association in descriptor.to_one_associations() {
        let Some(join_column) = association.join_column.as_deref() else {
            continue;
        };
        let target = registry.descriptor(&association.target);
        let column = match target {
            Some(target) => format!(
                "{} {} REFERENCES {}({})",
                quote(join_column),
                target.identity.kind.sql_type(),
                quote(&target.table),
                quote(&target.identity.column)
            ),
            None => format!("{} INTEGER", quote(join_column)),
        };
        columns.push(column);
        indexes.push(format!(
            "CREATE INDEX IF NOT EXISTS {} ON {} ({});",
            quote(&format!("idx_{}_{join_column}", descriptor.table)),
            quote(&descriptor.table),
            quote(join_column)
        ));
    }

    if descriptor.versioned {
        columns.push(format!("{} INTEGER NOT NULL DEFAULT 0", quote(VERSION_COLUMN)));
    }
    match descriptor.audit {
        AuditMode::None => {}
        AuditMode::CreatedDate => {
            columns.push(format!("{} INTEGER", quote(CREATED_AT_COLUMN)));
        }
        AuditMode::Full => {
            columns.push(format!("{} INTEGER", quote(CREATED_AT_COLUMN)));
            columns.push(format!("{} TEXT", quote(CREATED_BY_COLUMN)));
            columns.push(format!("{} INTEGER", quote(UPDATED_AT_COLUMN)));
            columns.push(format!("{} TEXT", quote(UPDATED_BY_COLUMN)));
        }
    }

    let mut ddl = format!(
        "CREATE TABLE IF NOT EXISTS {} (\n    {}\n);",
        quote(&descriptor.table),
        columns.join(",\n    ")
    );
    for index in indexes {
        ddl.push('\n');
        ddl.push_str(&index);
    }
    ddl
}

pub(crate) fn quote(identifier: &str) -> String {
    format!("\"{}\"", identifier.replace('"', "\"\""))
}

#[cfg(test)]
mod tests {
    use super::table_ddl;
    use crate::registry::{AttributeKind, AuditMode, EntityDescriptor, EntityRegistry};

    #[test]
    fn ddl_covers_join_version_and_audit_columns() {
        let registry = EntityRegistry::builder()
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
                    .many_to_one("club", "Club", "club_id")
                    .versioned()
                    .audited(AuditMode::Full)
                    .build()
                    .expect("member"),
            )
            .build()
            .expect("registry");

        let member = registry.descriptor("Member").expect("member");
        let ddl = table_ddl(&registry, member);
        assert!(ddl.contains("\"member_id\" INTEGER PRIMARY KEY"));
        assert!(ddl.contains("\"club_id\" INTEGER REFERENCES \"clubs\"(\"club_id\")"));
        assert!(ddl.contains("\"version\" INTEGER NOT NULL DEFAULT 0"));
        assert!(ddl.contains("\"updated_by\" TEXT"));
        assert!(ddl.contains("CREATE INDEX IF NOT EXISTS \"idx_members_club_id\""));
    }
}
