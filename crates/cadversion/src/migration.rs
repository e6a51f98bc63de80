//! Schema migration coordinator.
//!
//! A migration closes the active chain at its tip checkpoint, runs user logic
//! over that checkpoint's document and roots a new chain with the result.
//! Everything lands in one batch, so a failed migration leaves no trace.

use std::collections::{HashMap, HashSet, VecDeque};

use tracing::info;

use cadversion_core::{
    apply_owned, ChainId, Document, DocumentCodec, Node, NodeId, PatchOp, SchemaMigration,
    SchemaVersion, VersionChain,
};
use cadversion_store::{Store, WriteBatch};

use crate::chain::{build_root, CheckpointDraft};
use crate::error::{Result, VersionGraphError};
use crate::graph::{now_millis, VersionGraph};

/// A transformation from one schema version's document to the next.
pub trait MigrationLogic: Send + Sync {
    /// Transform the document at the boundary checkpoint.
    fn migrate(&self, document: Document) -> anyhow::Result<Document>;

    /// Textual form of the logic, recorded alongside the migration.
    fn source(&self) -> String;
}

/// Migration logic backed by a closure.
///
/// The closure itself cannot be persisted, so the caller supplies the text
/// that is recorded for it.
pub struct FnMigration<F> {
    source: String,
    f: F,
}

impl<F> FnMigration<F>
where
    F: Fn(Document) -> anyhow::Result<Document> + Send + Sync,
{
    pub fn new(source: impl Into<String>, f: F) -> Self {
        Self {
            source: source.into(),
            f,
        }
    }
}

impl<F> MigrationLogic for FnMigration<F>
where
    F: Fn(Document) -> anyhow::Result<Document> + Send + Sync,
{
    fn migrate(&self, document: Document) -> anyhow::Result<Document> {
        (self.f)(document)
    }

    fn source(&self) -> String {
        self.source.clone()
    }
}

/// Declarative migration: a changeset applied to the boundary document.
#[derive(Debug, Clone)]
pub struct PatchMigration {
    ops: Vec<PatchOp>,
    source: String,
}

impl PatchMigration {
    pub fn new(ops: Vec<PatchOp>) -> std::result::Result<Self, serde_json::Error> {
        let source = serde_json::to_string(&ops)?;
        Ok(Self { ops, source })
    }

    pub fn ops(&self) -> &[PatchOp] {
        &self.ops
    }
}

impl MigrationLogic for PatchMigration {
    fn migrate(&self, document: Document) -> anyhow::Result<Document> {
        Ok(apply_owned(document, &self.ops)?)
    }

    fn source(&self) -> String {
        self.source.clone()
    }
}

impl<S: Store, C: DocumentCodec> VersionGraph<S, C> {
    /// Migrate the document to `to_schema_version` at `at_checkpoint_id`.
    ///
    /// The checkpoint must be the tip of the active chain `chain_id`. It is
    /// marked as a schema boundary, which seals the chain, and the migrated
    /// document becomes the root of a new chain at the next version.
    pub async fn begin_migration(
        &self,
        chain_id: &ChainId,
        at_checkpoint_id: &NodeId,
        to_schema_version: SchemaVersion,
        migration_name: &str,
        logic: &dyn MigrationLogic,
    ) -> Result<(SchemaMigration, VersionChain)> {
        let _writer = self.writer.lock().await;
        let head = self.head().await?;
        let chain = self.get_chain(chain_id).await?;

        let boundary = self.store.get_checkpoint(at_checkpoint_id).await?.ok_or_else(|| {
            VersionGraphError::SchemaMigrationBoundaryViolation(format!(
                "{} is not a checkpoint",
                at_checkpoint_id
            ))
        })?;
        if boundary.chain_id != chain.id {
            return Err(VersionGraphError::SchemaMigrationBoundaryViolation(format!(
                "checkpoint {} is not in chain {}",
                boundary.id, chain.id
            )));
        }
        let tip = self.store.chain_tip(&chain.id).await?;
        if tip.as_ref().map(|t| t.id) != Some(boundary.id) {
            return Err(VersionGraphError::SchemaMigrationBoundaryViolation(format!(
                "checkpoint {} at version {} is not the tip of chain {}",
                boundary.id, boundary.version_number, chain.id
            )));
        }
        if let Err(e) = self.ensure_writable(&chain).await {
            return Err(match e {
                VersionGraphError::ChainSealed(id) => {
                    VersionGraphError::SchemaMigrationBoundaryViolation(format!(
                        "chain {} is sealed",
                        id
                    ))
                }
                other => other,
            });
        }
        if to_schema_version == chain.schema_version {
            return Err(VersionGraphError::SchemaVersionMismatch {
                expected: chain.schema_version,
                found: to_schema_version,
            });
        }

        let document = self
            .codec
            .decode(&boundary.data)
            .map_err(|e| VersionGraphError::Corruption {
                node: boundary.id,
                reason: e.to_string(),
            })?;
        let migrated = logic
            .migrate(document)
            .map_err(|e| VersionGraphError::MigrationFailed {
                name: migration_name.to_string(),
                reason: format!("{e:#}"),
            })?;
        let data = self.codec.encode(&migrated)?;

        let draft = CheckpointDraft::new(to_schema_version, data)
            .description(format!("migration {}", migration_name));
        let (new_chain, root) = build_root(&head, draft);
        let migration = SchemaMigration {
            from_schema_version: chain.schema_version,
            to_schema_version,
            migration_name: migration_name.to_string(),
            migration_logic: logic.source(),
            applied_at: now_millis(),
            boundary_checkpoint_id: boundary.id,
        };

        let batch = WriteBatch::new()
            .mark_schema_boundary(boundary.id)
            .put_chain(new_chain.clone())
            .put_migration(migration.clone());
        self.write_node(&head, Node::Checkpoint(root), batch).await?;

        info!(
            migration = migration_name,
            from = %chain.schema_version,
            to = %to_schema_version,
            boundary = %boundary.id,
            chain = %new_chain.id,
            "applied schema migration"
        );
        Ok((migration, new_chain))
    }

    /// Recorded migrations in the order they were applied.
    pub async fn migrations(&self) -> Result<Vec<SchemaMigration>> {
        Ok(self.store.list_migrations().await?)
    }

    /// A chain of recorded migrations connecting two schema versions.
    ///
    /// Migrations are followed in either direction. Returns `Some(vec![])`
    /// when `from == to` and `None` when the versions are not connected.
    pub async fn migration_path(
        &self,
        from: SchemaVersion,
        to: SchemaVersion,
    ) -> Result<Option<Vec<SchemaMigration>>> {
        if from == to {
            return Ok(Some(Vec::new()));
        }
        let migrations = self.store.list_migrations().await?;

        let mut edges: HashMap<SchemaVersion, Vec<(SchemaVersion, usize)>> = HashMap::new();
        for (i, m) in migrations.iter().enumerate() {
            edges
                .entry(m.from_schema_version)
                .or_default()
                .push((m.to_schema_version, i));
            edges
                .entry(m.to_schema_version)
                .or_default()
                .push((m.from_schema_version, i));
        }

        let mut came_from: HashMap<SchemaVersion, (SchemaVersion, usize)> = HashMap::new();
        let mut seen = HashSet::from([from]);
        let mut queue = VecDeque::from([from]);
        while let Some(schema) = queue.pop_front() {
            if schema == to {
                let mut path = Vec::new();
                let mut cursor = to;
                while let Some(&(prev, i)) = came_from.get(&cursor) {
                    path.push(migrations[i].clone());
                    cursor = prev;
                }
                path.reverse();
                return Ok(Some(path));
            }
            for &(next, i) in edges.get(&schema).into_iter().flatten() {
                if seen.insert(next) {
                    came_from.insert(next, (schema, i));
                    queue.push_back(next);
                }
            }
        }
        Ok(None)
    }
}
