//! SQLite implementation of the Store trait.
//!
//! This is the primary storage backend. It uses rusqlite with bundled
//! SQLite, wrapped in async via tokio::spawn_blocking.

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row, TransactionBehavior};
use tracing::debug;

use cadversion_core::{
    decode_changeset, encode_changeset, ChainId, Checkpoint, Delta, NodeId, NodeKind, NodeSummary,
    SchemaMigration, SchemaVersion, VersionChain, VersionGraphHead,
};

use crate::batch::{WriteBatch, WriteOp};
use crate::error::{Result, StoreError};
use crate::migration;
use crate::traits::{DeltaRun, ReplayPlan, Store};

/// SQLite-based store implementation.
///
/// Thread-safe via internal Mutex. All operations use spawn_blocking
/// to avoid blocking the async runtime.
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open a SQLite database at the given path.
    ///
    /// Creates the file and runs layout migrations if needed.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::from_connection(Connection::open(path)?)
    }

    /// Open an in-memory SQLite database.
    pub fn open_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(mut conn: Connection) -> Result<Self> {
        conn.pragma_update(None, "foreign_keys", true)?;
        migration::migrate(&mut conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run `f` against the connection on the blocking pool.
    async fn blocking<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = conn.lock().map_err(StoreError::poisoned)?;
            f(&mut conn)
        })
        .await
        .map_err(|e| {
            StoreError::Database(rusqlite::Error::SqliteFailure(
                rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_ERROR),
                Some(format!("spawn_blocking failed: {}", e)),
            ))
        })?
    }
}

const CHECKPOINT_COLUMNS: &str = "id, parent_id, chain_id, version_number, schema_version,
     timestamp, description, is_schema_boundary, is_manual_save, data, size_bytes";

const CHECKPOINT_SUMMARY_COLUMNS: &str = "id, parent_id, chain_id, version_number,
     schema_version, timestamp, description, is_schema_boundary, is_manual_save, size_bytes";

const DELTA_COLUMNS: &str = "id, parent_id, base_checkpoint_id, chain_id, delta_sequence,
     version_number, schema_version, timestamp, description, changeset, size_bytes";

const DELTA_SUMMARY_COLUMNS: &str = "id, parent_id, base_checkpoint_id, chain_id,
     delta_sequence, version_number, schema_version, timestamp, description, size_bytes";

fn to_id<T: From<[u8; 32]>>(bytes: Vec<u8>, column: &str) -> rusqlite::Result<T> {
    let len = bytes.len();
    let arr: [u8; 32] = bytes.try_into().map_err(|_| {
        rusqlite::Error::FromSqlConversionFailure(
            0,
            Type::Blob,
            format!("{column}: expected 32-byte id, got {len} bytes").into(),
        )
    })?;
    Ok(T::from(arr))
}

fn id_column<T: From<[u8; 32]>>(row: &Row<'_>, column: &str) -> rusqlite::Result<T> {
    to_id(row.get(column)?, column)
}

fn opt_id_column<T: From<[u8; 32]>>(row: &Row<'_>, column: &str) -> rusqlite::Result<Option<T>> {
    row.get::<_, Option<Vec<u8>>>(column)?
        .map(|bytes| to_id(bytes, column))
        .transpose()
}

fn u64_column(row: &Row<'_>, column: &str) -> rusqlite::Result<u64> {
    let raw = row.get::<_, i64>(column)?;
    u64::try_from(raw).map_err(|_| {
        rusqlite::Error::FromSqlConversionFailure(
            0,
            Type::Integer,
            format!("{column}: negative value {raw}").into(),
        )
    })
}

fn schema_column(row: &Row<'_>, column: &str) -> rusqlite::Result<SchemaVersion> {
    Ok(SchemaVersion(row.get::<_, u32>(column)?))
}

fn row_to_chain(row: &Row<'_>) -> rusqlite::Result<VersionChain> {
    Ok(VersionChain {
        id: id_column(row, "id")?,
        schema_version: schema_column(row, "schema_version")?,
        start_version: u64_column(row, "start_version")?,
        root_checkpoint_id: id_column(row, "root_checkpoint_id")?,
    })
}

fn row_to_checkpoint(row: &Row<'_>) -> rusqlite::Result<Checkpoint> {
    let data: Vec<u8> = row.get("data")?;
    Ok(Checkpoint {
        id: id_column(row, "id")?,
        parent_id: opt_id_column(row, "parent_id")?,
        chain_id: id_column(row, "chain_id")?,
        version_number: u64_column(row, "version_number")?,
        schema_version: schema_column(row, "schema_version")?,
        timestamp: row.get("timestamp")?,
        description: row.get("description")?,
        is_schema_boundary: row.get("is_schema_boundary")?,
        is_manual_save: row.get("is_manual_save")?,
        data: Bytes::from(data),
        size_bytes: u64_column(row, "size_bytes")?,
    })
}

/// A delta row with its changeset still encoded. Decoding happens outside
/// the row mapper so a bad blob surfaces as [`StoreError::Corrupt`].
struct DeltaRow {
    delta: Delta,
    changeset: Vec<u8>,
}

impl DeltaRow {
    fn decode(self) -> Result<Delta> {
        let DeltaRow { delta, changeset } = self;
        let changeset = decode_changeset(&changeset).map_err(|e| StoreError::Corrupt {
            id: delta.id,
            reason: e.to_string(),
        })?;
        Ok(Delta { changeset, ..delta })
    }
}

fn row_to_delta(row: &Row<'_>) -> rusqlite::Result<DeltaRow> {
    Ok(DeltaRow {
        delta: Delta {
            id: id_column(row, "id")?,
            parent_id: opt_id_column(row, "parent_id")?,
            base_checkpoint_id: id_column(row, "base_checkpoint_id")?,
            chain_id: id_column(row, "chain_id")?,
            delta_sequence: u64_column(row, "delta_sequence")?,
            version_number: u64_column(row, "version_number")?,
            schema_version: schema_column(row, "schema_version")?,
            timestamp: row.get("timestamp")?,
            description: row.get("description")?,
            changeset: Vec::new(),
            size_bytes: u64_column(row, "size_bytes")?,
        },
        changeset: row.get("changeset")?,
    })
}

fn row_to_checkpoint_summary(row: &Row<'_>) -> rusqlite::Result<NodeSummary> {
    Ok(NodeSummary {
        id: id_column(row, "id")?,
        kind: NodeKind::Checkpoint,
        parent_id: opt_id_column(row, "parent_id")?,
        chain_id: id_column(row, "chain_id")?,
        version_number: u64_column(row, "version_number")?,
        schema_version: schema_column(row, "schema_version")?,
        timestamp: row.get("timestamp")?,
        description: row.get("description")?,
        is_manual_save: row.get("is_manual_save")?,
        is_schema_boundary: row.get("is_schema_boundary")?,
        base_checkpoint_id: None,
        delta_sequence: None,
        size_bytes: u64_column(row, "size_bytes")?,
    })
}

fn row_to_delta_summary(row: &Row<'_>) -> rusqlite::Result<NodeSummary> {
    Ok(NodeSummary {
        id: id_column(row, "id")?,
        kind: NodeKind::Delta,
        parent_id: opt_id_column(row, "parent_id")?,
        chain_id: id_column(row, "chain_id")?,
        version_number: u64_column(row, "version_number")?,
        schema_version: schema_column(row, "schema_version")?,
        timestamp: row.get("timestamp")?,
        description: row.get("description")?,
        is_manual_save: false,
        is_schema_boundary: false,
        base_checkpoint_id: Some(id_column(row, "base_checkpoint_id")?),
        delta_sequence: Some(u64_column(row, "delta_sequence")?),
        size_bytes: u64_column(row, "size_bytes")?,
    })
}

fn row_to_migration(row: &Row<'_>) -> rusqlite::Result<SchemaMigration> {
    Ok(SchemaMigration {
        from_schema_version: schema_column(row, "from_schema_version")?,
        to_schema_version: schema_column(row, "to_schema_version")?,
        migration_name: row.get("migration_name")?,
        migration_logic: row.get("migration_sql")?,
        applied_at: row.get("applied_at")?,
        boundary_checkpoint_id: id_column(row, "boundary_checkpoint_id")?,
    })
}

fn row_to_head(row: &Row<'_>) -> rusqlite::Result<VersionGraphHead> {
    Ok(VersionGraphHead {
        current_version: u64_column(row, "current_version")?,
        current_schema_version: schema_column(row, "current_schema_version")?,
        user_checkpoint_version_id: opt_id_column(row, "user_checkpoint_version_id")?,
        latest_version_id: opt_id_column(row, "latest_version_id")?,
        total_size: u64_column(row, "total_size")?,
    })
}

/// Constraint failures are conflicts; everything else stays a database error.
fn map_write_error(e: rusqlite::Error) -> StoreError {
    match e {
        rusqlite::Error::SqliteFailure(code, msg)
            if code.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            StoreError::Conflict(msg.unwrap_or_else(|| code.to_string()))
        }
        other => StoreError::Database(other),
    }
}

fn apply_op(conn: &Connection, op: WriteOp) -> Result<()> {
    match op {
        WriteOp::PutChain(chain) => {
            conn.execute(
                "INSERT INTO version_chains (id, schema_version, start_version, root_checkpoint_id)
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    chain.id.as_bytes().as_slice(),
                    chain.schema_version.get(),
                    chain.start_version as i64,
                    chain.root_checkpoint_id.as_bytes().as_slice(),
                ],
            )
            .map_err(map_write_error)?;
        }
        WriteOp::PutCheckpoint(cp) => {
            conn.execute(
                &format!(
                    "INSERT INTO checkpoints ({CHECKPOINT_COLUMNS})
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)"
                ),
                params![
                    cp.id.as_bytes().as_slice(),
                    cp.parent_id.as_ref().map(|p| p.as_bytes().to_vec()),
                    cp.chain_id.as_bytes().as_slice(),
                    cp.version_number as i64,
                    cp.schema_version.get(),
                    cp.timestamp,
                    cp.description,
                    cp.is_schema_boundary,
                    cp.is_manual_save,
                    cp.data.as_ref(),
                    cp.size_bytes as i64,
                ],
            )
            .map_err(map_write_error)?;
        }
        WriteOp::PutDelta(delta) => {
            conn.execute(
                &format!(
                    "INSERT INTO deltas ({DELTA_COLUMNS})
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)"
                ),
                params![
                    delta.id.as_bytes().as_slice(),
                    delta.parent_id.as_ref().map(|p| p.as_bytes().to_vec()),
                    delta.base_checkpoint_id.as_bytes().as_slice(),
                    delta.chain_id.as_bytes().as_slice(),
                    delta.delta_sequence as i64,
                    delta.version_number as i64,
                    delta.schema_version.get(),
                    delta.timestamp,
                    delta.description,
                    encode_changeset(&delta.changeset),
                    delta.size_bytes as i64,
                ],
            )
            .map_err(map_write_error)?;
        }
        WriteOp::MarkSchemaBoundary(id) => {
            let changed = conn.execute(
                "UPDATE checkpoints SET is_schema_boundary = 1 WHERE id = ?1",
                params![id.as_bytes().as_slice()],
            )?;
            if changed == 0 {
                return Err(StoreError::NotFound(format!("checkpoint {}", id)));
            }
        }
        WriteOp::PutMigration(m) => {
            conn.execute(
                "INSERT INTO schema_migrations (
                    from_schema_version, to_schema_version, migration_name,
                    migration_sql, applied_at, boundary_checkpoint_id
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    m.from_schema_version.get(),
                    m.to_schema_version.get(),
                    m.migration_name,
                    m.migration_logic,
                    m.applied_at,
                    m.boundary_checkpoint_id.as_bytes().as_slice(),
                ],
            )
            .map_err(map_write_error)?;
        }
        WriteOp::DeleteCheckpoint(id) => {
            let changed = conn.execute(
                "DELETE FROM checkpoints WHERE id = ?1",
                params![id.as_bytes().as_slice()],
            )?;
            if changed == 0 {
                return Err(StoreError::NotFound(format!("checkpoint {}", id)));
            }
        }
        WriteOp::DeleteDelta(id) => {
            let changed = conn.execute(
                "DELETE FROM deltas WHERE id = ?1",
                params![id.as_bytes().as_slice()],
            )?;
            if changed == 0 {
                return Err(StoreError::NotFound(format!("delta {}", id)));
            }
        }
        WriteOp::PutHead(head) => {
            conn.execute(
                "INSERT OR REPLACE INTO version_graph (
                    id, current_version, current_schema_version,
                    user_checkpoint_version_id, latest_version_id, total_size
                ) VALUES (1, ?1, ?2, ?3, ?4, ?5)",
                params![
                    head.current_version as i64,
                    head.current_schema_version.get(),
                    head.user_checkpoint_version_id
                        .as_ref()
                        .map(|id| id.as_bytes().to_vec()),
                    head.latest_version_id.as_ref().map(|id| id.as_bytes().to_vec()),
                    head.total_size as i64,
                ],
            )?;
        }
    }
    Ok(())
}

fn query_checkpoint_summary(conn: &Connection, id: &NodeId) -> Result<Option<NodeSummary>> {
    conn.query_row(
        &format!("SELECT {CHECKPOINT_SUMMARY_COLUMNS} FROM checkpoints WHERE id = ?1"),
        params![id.as_bytes().as_slice()],
        row_to_checkpoint_summary,
    )
    .optional()
    .map_err(StoreError::from)
}

fn query_delta_summary(conn: &Connection, id: &NodeId) -> Result<Option<NodeSummary>> {
    conn.query_row(
        &format!("SELECT {DELTA_SUMMARY_COLUMNS} FROM deltas WHERE id = ?1"),
        params![id.as_bytes().as_slice()],
        row_to_delta_summary,
    )
    .optional()
    .map_err(StoreError::from)
}

fn query_node_at_version(
    conn: &Connection,
    chain: &ChainId,
    version: u64,
) -> Result<Option<NodeSummary>> {
    let checkpoint = conn
        .query_row(
            &format!(
                "SELECT {CHECKPOINT_SUMMARY_COLUMNS} FROM checkpoints
                 WHERE chain_id = ?1 AND version_number = ?2"
            ),
            params![chain.as_bytes().as_slice(), version as i64],
            row_to_checkpoint_summary,
        )
        .optional()?;
    if checkpoint.is_some() {
        return Ok(checkpoint);
    }
    conn.query_row(
        &format!(
            "SELECT {DELTA_SUMMARY_COLUMNS} FROM deltas
             WHERE chain_id = ?1 AND version_number = ?2"
        ),
        params![chain.as_bytes().as_slice(), version as i64],
        row_to_delta_summary,
    )
    .optional()
    .map_err(StoreError::from)
}

#[async_trait]
impl Store for SqliteStore {
    async fn apply(&self, batch: WriteBatch) -> Result<()> {
        if batch.is_empty() {
            return Ok(());
        }
        let ops = batch.len();
        self.blocking(move |conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            for op in batch {
                apply_op(&tx, op)?;
            }
            // Deferred foreign keys are checked here.
            tx.commit().map_err(map_write_error)?;
            debug!(ops, "applied write batch");
            Ok(())
        })
        .await
    }

    async fn get_head(&self) -> Result<Option<VersionGraphHead>> {
        self.blocking(|conn| {
            conn.query_row(
                "SELECT current_version, current_schema_version, user_checkpoint_version_id,
                        latest_version_id, total_size
                 FROM version_graph WHERE id = 1",
                [],
                row_to_head,
            )
            .optional()
            .map_err(StoreError::from)
        })
        .await
    }

    async fn get_chain(&self, id: &ChainId) -> Result<Option<VersionChain>> {
        let id = *id;
        self.blocking(move |conn| {
            conn.query_row(
                "SELECT id, schema_version, start_version, root_checkpoint_id
                 FROM version_chains WHERE id = ?1",
                params![id.as_bytes().as_slice()],
                row_to_chain,
            )
            .optional()
            .map_err(StoreError::from)
        })
        .await
    }

    async fn list_chains(&self) -> Result<Vec<VersionChain>> {
        self.blocking(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, schema_version, start_version, root_checkpoint_id
                 FROM version_chains ORDER BY start_version",
            )?;
            let chains = stmt
                .query_map([], row_to_chain)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(chains)
        })
        .await
    }

    async fn get_checkpoint(&self, id: &NodeId) -> Result<Option<Checkpoint>> {
        let id = *id;
        self.blocking(move |conn| {
            conn.query_row(
                &format!("SELECT {CHECKPOINT_COLUMNS} FROM checkpoints WHERE id = ?1"),
                params![id.as_bytes().as_slice()],
                row_to_checkpoint,
            )
            .optional()
            .map_err(StoreError::from)
        })
        .await
    }

    async fn get_delta(&self, id: &NodeId) -> Result<Option<Delta>> {
        let id = *id;
        self.blocking(move |conn| {
            conn.query_row(
                &format!("SELECT {DELTA_COLUMNS} FROM deltas WHERE id = ?1"),
                params![id.as_bytes().as_slice()],
                row_to_delta,
            )
            .optional()?
            .map(DeltaRow::decode)
            .transpose()
        })
        .await
    }

    async fn get_node_summary(&self, id: &NodeId) -> Result<Option<NodeSummary>> {
        let id = *id;
        self.blocking(move |conn| match query_checkpoint_summary(conn, &id)? {
            Some(summary) => Ok(Some(summary)),
            None => query_delta_summary(conn, &id),
        })
        .await
    }

    async fn list_node_summaries(&self, chain: Option<&ChainId>) -> Result<Vec<NodeSummary>> {
        let chain = chain.map(|c| c.as_bytes().to_vec());
        self.blocking(move |conn| {
            let mut summaries = Vec::new();

            let mut stmt = conn.prepare(&format!(
                "SELECT {CHECKPOINT_SUMMARY_COLUMNS} FROM checkpoints
                 WHERE ?1 IS NULL OR chain_id = ?1"
            ))?;
            for summary in stmt.query_map(params![chain], row_to_checkpoint_summary)? {
                summaries.push(summary?);
            }

            let mut stmt = conn.prepare(&format!(
                "SELECT {DELTA_SUMMARY_COLUMNS} FROM deltas
                 WHERE ?1 IS NULL OR chain_id = ?1"
            ))?;
            for summary in stmt.query_map(params![chain], row_to_delta_summary)? {
                summaries.push(summary?);
            }

            // Checkpoints first when versions tie.
            summaries.sort_by_key(|s| (s.version_number, s.kind == NodeKind::Delta));
            Ok(summaries)
        })
        .await
    }

    async fn node_at_version(&self, chain: &ChainId, version: u64) -> Result<Option<NodeSummary>> {
        let chain = *chain;
        self.blocking(move |conn| query_node_at_version(conn, &chain, version))
            .await
    }

    async fn chain_tip(&self, chain: &ChainId) -> Result<Option<NodeSummary>> {
        let chain = *chain;
        self.blocking(move |conn| {
            let checkpoint = conn
                .query_row(
                    &format!(
                        "SELECT {CHECKPOINT_SUMMARY_COLUMNS} FROM checkpoints
                         WHERE chain_id = ?1 ORDER BY version_number DESC LIMIT 1"
                    ),
                    params![chain.as_bytes().as_slice()],
                    row_to_checkpoint_summary,
                )
                .optional()?;
            let delta = conn
                .query_row(
                    &format!(
                        "SELECT {DELTA_SUMMARY_COLUMNS} FROM deltas
                         WHERE chain_id = ?1 ORDER BY version_number DESC LIMIT 1"
                    ),
                    params![chain.as_bytes().as_slice()],
                    row_to_delta_summary,
                )
                .optional()?;
            Ok(match (checkpoint, delta) {
                (Some(c), Some(d)) if d.version_number > c.version_number => Some(d),
                (Some(c), _) => Some(c),
                (None, d) => d,
            })
        })
        .await
    }

    async fn latest_checkpoint(
        &self,
        chain: &ChainId,
        at_or_before: u64,
    ) -> Result<Option<NodeSummary>> {
        let chain = *chain;
        self.blocking(move |conn| {
            conn.query_row(
                &format!(
                    "SELECT {CHECKPOINT_SUMMARY_COLUMNS} FROM checkpoints
                     WHERE chain_id = ?1 AND version_number <= ?2
                     ORDER BY version_number DESC LIMIT 1"
                ),
                params![chain.as_bytes().as_slice(), at_or_before.min(i64::MAX as u64) as i64],
                row_to_checkpoint_summary,
            )
            .optional()
            .map_err(StoreError::from)
        })
        .await
    }

    async fn get_delta_sequence(&self, chain: &ChainId, base: &NodeId) -> Result<Vec<Delta>> {
        let (chain, base) = (*chain, *base);
        self.blocking(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {DELTA_COLUMNS} FROM deltas
                 WHERE chain_id = ?1 AND base_checkpoint_id = ?2
                 ORDER BY delta_sequence"
            ))?;
            let deltas = stmt
                .query_map(
                    params![chain.as_bytes().as_slice(), base.as_bytes().as_slice()],
                    row_to_delta,
                )?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            deltas.into_iter().map(DeltaRow::decode).collect()
        })
        .await
    }

    async fn delta_run(&self, chain: &ChainId, base: &NodeId) -> Result<DeltaRun> {
        let (chain, base) = (*chain, *base);
        self.blocking(move |conn| {
            conn.query_row(
                "SELECT COUNT(*), COALESCE(MAX(delta_sequence), 0), COALESCE(SUM(size_bytes), 0)
                 FROM deltas WHERE chain_id = ?1 AND base_checkpoint_id = ?2",
                params![chain.as_bytes().as_slice(), base.as_bytes().as_slice()],
                |row| {
                    Ok(DeltaRun {
                        count: row.get::<_, i64>(0)? as usize,
                        max_sequence: row.get::<_, i64>(1)? as u64,
                        total_bytes: row.get::<_, i64>(2)? as u64,
                    })
                },
            )
            .map_err(StoreError::from)
        })
        .await
    }

    async fn list_migrations(&self) -> Result<Vec<SchemaMigration>> {
        self.blocking(|conn| {
            let mut stmt = conn.prepare(
                "SELECT from_schema_version, to_schema_version, migration_name, migration_sql,
                        applied_at, boundary_checkpoint_id
                 FROM schema_migrations ORDER BY id",
            )?;
            let migrations = stmt
                .query_map([], row_to_migration)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(migrations)
        })
        .await
    }

    async fn load_replay_plan(&self, chain: &ChainId, version: u64) -> Result<Option<ReplayPlan>> {
        let chain = *chain;
        let version = version.min(i64::MAX as u64);
        self.blocking(move |conn| {
            // One read transaction so a concurrent writer is never half-observed.
            let tx = conn.transaction()?;

            let checkpoint = tx
                .query_row(
                    &format!(
                        "SELECT {CHECKPOINT_COLUMNS} FROM checkpoints
                         WHERE chain_id = ?1 AND version_number <= ?2
                         ORDER BY version_number DESC LIMIT 1"
                    ),
                    params![chain.as_bytes().as_slice(), version as i64],
                    row_to_checkpoint,
                )
                .optional()?;
            let Some(checkpoint) = checkpoint else {
                return Ok(None);
            };

            let deltas = {
                let mut stmt = tx.prepare(&format!(
                    "SELECT {DELTA_COLUMNS} FROM deltas
                     WHERE chain_id = ?1 AND base_checkpoint_id = ?2 AND version_number <= ?3
                     ORDER BY delta_sequence"
                ))?;
                let rows = stmt.query_map(
                    params![
                        chain.as_bytes().as_slice(),
                        checkpoint.id.as_bytes().as_slice(),
                        version as i64
                    ],
                    row_to_delta,
                )?;
                rows.collect::<rusqlite::Result<Vec<_>>>()?
            };
            let deltas = deltas
                .into_iter()
                .map(DeltaRow::decode)
                .collect::<Result<Vec<_>>>()?;

            let target = query_node_at_version(&tx, &chain, version)?;
            tx.commit()?;

            Ok(Some(ReplayPlan {
                checkpoint,
                deltas,
                target,
            }))
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cadversion_core::{
        CheckpointBuilder, DeltaBuilder, Node, PatchOp, Pointer, Value, VersionGraphHead,
    };

    struct Fixture {
        chain: VersionChain,
        root: Checkpoint,
        head: VersionGraphHead,
    }

    async fn seeded() -> (SqliteStore, Fixture) {
        let store = SqliteStore::open_memory().unwrap();
        let schema = SchemaVersion(1);
        let chain_id = ChainId::derive(schema, 1);
        let root = CheckpointBuilder::new(chain_id, 1, schema, b"root".to_vec())
            .timestamp(1_000)
            .description("root")
            .build();
        let chain = VersionChain {
            id: chain_id,
            schema_version: schema,
            start_version: 1,
            root_checkpoint_id: root.id,
        };
        let head = VersionGraphHead::default().advance(&Node::from(root.clone()));
        store
            .apply(
                WriteBatch::new()
                    .put_checkpoint(root.clone())
                    .put_chain(chain.clone())
                    .put_head(head.clone()),
            )
            .await
            .unwrap();
        (store, Fixture { chain, root, head })
    }

    fn delta(f: &Fixture, seq: u64, version: u64, parent: NodeId) -> Delta {
        DeltaBuilder::new(
            f.chain.id,
            f.root.id,
            seq,
            version,
            f.chain.schema_version,
            vec![PatchOp::add(
                Pointer::parse(&format!("/v{version}")).unwrap(),
                Value::from(version as i64),
            )],
        )
        .parent(Some(parent))
        .timestamp(1_000 + version as i64)
        .build()
    }

    #[tokio::test]
    async fn test_chain_and_root_roundtrip() {
        let (store, f) = seeded().await;

        assert_eq!(store.get_chain(&f.chain.id).await.unwrap(), Some(f.chain.clone()));
        assert_eq!(store.list_chains().await.unwrap(), vec![f.chain.clone()]);
        assert_eq!(store.get_checkpoint(&f.root.id).await.unwrap(), Some(f.root.clone()));
        assert_eq!(store.get_head().await.unwrap(), Some(f.head.clone()));
    }

    #[tokio::test]
    async fn test_empty_store_has_no_head() {
        let store = SqliteStore::open_memory().unwrap();
        assert_eq!(store.get_head().await.unwrap(), None);
        assert!(store.list_chains().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_delta_sequence_and_run() {
        let (store, f) = seeded().await;
        let d1 = delta(&f, 1, 2, f.root.id);
        let d2 = delta(&f, 2, 3, d1.id);
        store
            .apply(WriteBatch::new().put_delta(d1.clone()).put_delta(d2.clone()))
            .await
            .unwrap();

        let seq = store.get_delta_sequence(&f.chain.id, &f.root.id).await.unwrap();
        assert_eq!(seq, vec![d1.clone(), d2.clone()]);

        let run = store.delta_run(&f.chain.id, &f.root.id).await.unwrap();
        assert_eq!(run.count, 2);
        assert_eq!(run.max_sequence, 2);
        assert_eq!(run.total_bytes, d1.size_bytes + d2.size_bytes);

        let tip = store.chain_tip(&f.chain.id).await.unwrap().unwrap();
        assert_eq!(tip.id, d2.id);
        assert_eq!(tip.delta_sequence, Some(2));
    }

    #[tokio::test]
    async fn test_duplicate_sequence_is_conflict() {
        let (store, f) = seeded().await;
        let d1 = delta(&f, 1, 2, f.root.id);
        let clash = delta(&f, 1, 3, d1.id);
        store.apply(WriteBatch::new().put_delta(d1)).await.unwrap();

        let err = store.apply(WriteBatch::new().put_delta(clash)).await.unwrap_err();
        assert!(err.is_conflict());
    }

    #[tokio::test]
    async fn test_failed_batch_writes_nothing() {
        let (store, f) = seeded().await;
        let d1 = delta(&f, 1, 2, f.root.id);
        let bogus = WriteBatch::new()
            .put_delta(d1.clone())
            .mark_schema_boundary(NodeId::from_bytes([7; 32]));

        assert!(matches!(
            store.apply(bogus).await,
            Err(StoreError::NotFound(_))
        ));
        assert_eq!(store.get_delta(&d1.id).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_dangling_base_is_rejected_at_commit() {
        let (store, f) = seeded().await;
        let orphan = DeltaBuilder::new(
            f.chain.id,
            NodeId::from_bytes([9; 32]),
            1,
            2,
            f.chain.schema_version,
            Vec::new(),
        )
        .build();

        let err = store.apply(WriteBatch::new().put_delta(orphan)).await.unwrap_err();
        assert!(err.is_conflict());
    }

    #[tokio::test]
    async fn test_replay_plan_stops_at_target() {
        let (store, f) = seeded().await;
        let d1 = delta(&f, 1, 2, f.root.id);
        let d2 = delta(&f, 2, 3, d1.id);
        store
            .apply(WriteBatch::new().put_delta(d1.clone()).put_delta(d2))
            .await
            .unwrap();

        let plan = store.load_replay_plan(&f.chain.id, 2).await.unwrap().unwrap();
        assert_eq!(plan.checkpoint.id, f.root.id);
        assert_eq!(plan.deltas, vec![d1.clone()]);
        assert_eq!(plan.target.map(|t| t.id), Some(d1.id));

        assert!(store.load_replay_plan(&f.chain.id, 0).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_schema_boundary_and_migration_rows() {
        let (store, f) = seeded().await;
        let migration = SchemaMigration {
            from_schema_version: SchemaVersion(1),
            to_schema_version: SchemaVersion(2),
            migration_name: "rename-layers".into(),
            migration_logic: "[]".into(),
            applied_at: 5,
            boundary_checkpoint_id: f.root.id,
        };
        store
            .apply(
                WriteBatch::new()
                    .mark_schema_boundary(f.root.id)
                    .put_migration(migration.clone()),
            )
            .await
            .unwrap();

        let root = store.get_checkpoint(&f.root.id).await.unwrap().unwrap();
        assert!(root.is_schema_boundary);
        assert_eq!(root.compute_id(), root.id);
        assert_eq!(store.list_migrations().await.unwrap(), vec![migration]);
    }

    #[tokio::test]
    async fn test_summaries_sorted_by_version() {
        let (store, f) = seeded().await;
        let d1 = delta(&f, 1, 2, f.root.id);
        store.apply(WriteBatch::new().put_delta(d1.clone())).await.unwrap();

        let all = store.list_node_summaries(None).await.unwrap();
        let ids: Vec<_> = all.iter().map(|s| s.id).collect();
        assert_eq!(ids, vec![f.root.id, d1.id]);

        let other = ChainId::derive(SchemaVersion(9), 99);
        assert!(store.list_node_summaries(Some(&other)).await.unwrap().is_empty());
        assert_eq!(
            store.node_at_version(&f.chain.id, 2).await.unwrap().map(|s| s.id),
            Some(d1.id)
        );
    }

    #[tokio::test]
    async fn test_undecodable_changeset_is_corrupt() {
        let (store, f) = seeded().await;
        let d1 = delta(&f, 1, 2, f.root.id);
        store.apply(WriteBatch::new().put_delta(d1.clone())).await.unwrap();
        store
            .blocking(|conn| {
                conn.execute("UPDATE deltas SET changeset = x'ff'", [])?;
                Ok(())
            })
            .await
            .unwrap();

        let err = store.get_delta(&d1.id).await.unwrap_err();
        assert!(matches!(err, StoreError::Corrupt { id, .. } if id == d1.id));
        let err = store.load_replay_plan(&f.chain.id, 2).await.unwrap_err();
        assert!(matches!(err, StoreError::Corrupt { id, .. } if id == d1.id));
        assert!(store.get_node_summary(&d1.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_delete_missing_delta_is_not_found() {
        let (store, _f) = seeded().await;
        let result = store
            .apply(WriteBatch::new().delete_delta(NodeId::from_bytes([1; 32])))
            .await;
        assert!(matches!(result, Err(StoreError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("drawing.db");
        let root_id = {
            let store = SqliteStore::open(&path).unwrap();
            let schema = SchemaVersion(3);
            let chain_id = ChainId::derive(schema, 1);
            let root = CheckpointBuilder::new(chain_id, 1, schema, b"x".to_vec()).build();
            let chain = VersionChain {
                id: chain_id,
                schema_version: schema,
                start_version: 1,
                root_checkpoint_id: root.id,
            };
            store
                .apply(WriteBatch::new().put_chain(chain).put_checkpoint(root.clone()))
                .await
                .unwrap();
            root.id
        };

        let reopened = SqliteStore::open(&path).unwrap();
        let root = reopened.get_checkpoint(&root_id).await.unwrap().unwrap();
        assert_eq!(root.schema_version, SchemaVersion(3));
    }
}
