//! Storage layout migrations for SQLite.
//!
//! We use a simple versioned migration system. Each migration is a SQL string
//! that transforms the layout from version N to N+1. These are migrations of
//! the database file itself; document schema migrations are rows in the
//! `schema_migrations` table.

use rusqlite::Connection;
use tracing::debug;

use crate::error::{Result, StoreError};

/// Current storage layout version.
pub const CURRENT_VERSION: u32 = 1;

/// Initialize or migrate the database layout.
///
/// This function is idempotent - it can be called multiple times safely.
pub fn migrate(conn: &mut Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS storage_migrations (
            version INTEGER PRIMARY KEY,
            applied_at INTEGER NOT NULL
        )",
        [],
    )?;

    let current: u32 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM storage_migrations",
        [],
        |row| row.get(0),
    )?;

    if current > CURRENT_VERSION {
        return Err(StoreError::Migration(format!(
            "database layout version {} is newer than supported version {}",
            current, CURRENT_VERSION
        )));
    }

    if current < CURRENT_VERSION {
        let tx = conn.transaction()?;

        for version in (current + 1)..=CURRENT_VERSION {
            debug!(version, "applying storage migration");
            apply_migration(&tx, version)?;

            tx.execute(
                "INSERT INTO storage_migrations (version, applied_at) VALUES (?1, ?2)",
                rusqlite::params![version, now_millis()],
            )?;
        }

        tx.commit()?;
    }

    Ok(())
}

fn apply_migration(conn: &Connection, version: u32) -> Result<()> {
    match version {
        1 => apply_v1(conn),
        _ => Err(StoreError::Migration(format!(
            "unknown migration version: {}",
            version
        ))),
    }
}

/// Migration v1: initial layout.
///
/// Chains and their root checkpoints reference each other, so the foreign
/// keys are deferred to commit time.
fn apply_v1(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE version_chains (
            id BLOB PRIMARY KEY,                -- 32 bytes, derived from (schema, start)
            schema_version INTEGER NOT NULL,
            start_version INTEGER NOT NULL UNIQUE,
            root_checkpoint_id BLOB NOT NULL
                REFERENCES checkpoints(id) DEFERRABLE INITIALLY DEFERRED
        );

        CREATE TABLE checkpoints (
            id BLOB PRIMARY KEY,                -- 32 bytes, content address
            parent_id BLOB,                     -- checkpoint or delta, NULL for a chain root
            chain_id BLOB NOT NULL
                REFERENCES version_chains(id) DEFERRABLE INITIALLY DEFERRED,
            version_number INTEGER NOT NULL,
            schema_version INTEGER NOT NULL,
            timestamp INTEGER NOT NULL,         -- Unix ms
            description TEXT NOT NULL,
            is_schema_boundary INTEGER NOT NULL DEFAULT 0,
            is_manual_save INTEGER NOT NULL DEFAULT 0,
            data BLOB NOT NULL,                 -- codec-encoded document
            size_bytes INTEGER NOT NULL,

            UNIQUE(chain_id, version_number)
        );

        CREATE TABLE deltas (
            id BLOB PRIMARY KEY,
            parent_id BLOB,
            base_checkpoint_id BLOB NOT NULL
                REFERENCES checkpoints(id) DEFERRABLE INITIALLY DEFERRED,
            chain_id BLOB NOT NULL
                REFERENCES version_chains(id) DEFERRABLE INITIALLY DEFERRED,
            delta_sequence INTEGER NOT NULL,
            version_number INTEGER NOT NULL,
            schema_version INTEGER NOT NULL,
            timestamp INTEGER NOT NULL,
            description TEXT NOT NULL,
            changeset BLOB NOT NULL,            -- canonical CBOR op list
            size_bytes INTEGER NOT NULL,

            UNIQUE(chain_id, version_number),
            UNIQUE(chain_id, base_checkpoint_id, delta_sequence)
        );

        CREATE TABLE schema_migrations (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            from_schema_version INTEGER NOT NULL,
            to_schema_version INTEGER NOT NULL,
            migration_name TEXT NOT NULL,
            migration_sql TEXT NOT NULL,
            applied_at INTEGER NOT NULL,
            boundary_checkpoint_id BLOB NOT NULL UNIQUE
                REFERENCES checkpoints(id) DEFERRABLE INITIALLY DEFERRED
        );

        CREATE TABLE version_graph (
            id INTEGER PRIMARY KEY CHECK (id = 1),
            current_version INTEGER NOT NULL,
            current_schema_version INTEGER NOT NULL,
            user_checkpoint_version_id BLOB,
            latest_version_id BLOB,
            total_size INTEGER NOT NULL
        );

        CREATE INDEX idx_checkpoints_parent ON checkpoints(parent_id);
        CREATE INDEX idx_deltas_parent ON deltas(parent_id);
        CREATE INDEX idx_deltas_base ON deltas(base_checkpoint_id);
        "#,
    )?;

    Ok(())
}

fn now_millis() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migration_creates_tables() {
        let mut conn = Connection::open_in_memory().unwrap();
        migrate(&mut conn).unwrap();

        let tables: Vec<String> = conn
            .prepare("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .collect::<std::result::Result<Vec<_>, _>>()
            .unwrap();

        for table in [
            "version_chains",
            "checkpoints",
            "deltas",
            "schema_migrations",
            "version_graph",
            "storage_migrations",
        ] {
            assert!(tables.contains(&table.to_string()), "missing {table}");
        }
    }

    #[test]
    fn test_migration_idempotent() {
        let mut conn = Connection::open_in_memory().unwrap();
        migrate(&mut conn).unwrap();
        migrate(&mut conn).unwrap();
        migrate(&mut conn).unwrap();

        let version: u32 = conn
            .query_row("SELECT MAX(version) FROM storage_migrations", [], |row| {
                row.get(0)
            })
            .unwrap();
        assert_eq!(version, CURRENT_VERSION);
    }

    #[test]
    fn test_rejects_newer_layout() {
        let mut conn = Connection::open_in_memory().unwrap();
        migrate(&mut conn).unwrap();
        conn.execute(
            "INSERT INTO storage_migrations (version, applied_at) VALUES (?1, 0)",
            [CURRENT_VERSION + 1],
        )
        .unwrap();

        assert!(matches!(migrate(&mut conn), Err(StoreError::Migration(_))));
    }

    #[test]
    fn test_head_table_holds_one_row() {
        let mut conn = Connection::open_in_memory().unwrap();
        migrate(&mut conn).unwrap();
        let insert = "INSERT INTO version_graph (id, current_version, current_schema_version, total_size)
                      VALUES (?1, 0, 0, 0)";
        conn.execute(insert, [1]).unwrap();
        assert!(conn.execute(insert, [2]).is_err());
    }
}
