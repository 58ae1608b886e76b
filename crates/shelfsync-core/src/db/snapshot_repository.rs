//! Snapshot repository implementation

use libsql::{params, Connection, Row};

use crate::error::{Error, Result};
use crate::models::{EnrichedContent, EnrichmentStatus, InventoryId, Snapshot, SnapshotId};

const SNAPSHOT_COLUMNS: &str = "id, owner_id, kind, note, captured, created_at";

/// Trait for snapshot storage operations (async)
///
/// Snapshots are append-only: there is no update or delete.
#[allow(async_fn_in_trait)]
pub trait SnapshotRepository {
    /// Append a snapshot
    async fn insert(&self, snapshot: &Snapshot) -> Result<()>;

    /// Get a snapshot by ID
    async fn get(&self, id: &SnapshotId) -> Result<Option<Snapshot>>;

    /// Snapshots for one owner, newest first
    async fn list_for_owner(&self, owner_id: &InventoryId) -> Result<Vec<Snapshot>>;

    /// Copy a snapshot's captured content onto its owner in a single statement.
    ///
    /// Returns false when the snapshot does not belong to the owner.
    async fn restore_onto_owner(
        &self,
        owner_id: &InventoryId,
        snapshot_id: &SnapshotId,
        status: EnrichmentStatus,
    ) -> Result<bool>;
}

/// libSQL implementation of `SnapshotRepository`
pub struct LibSqlSnapshotRepository<'a> {
    conn: &'a Connection,
}

impl<'a> LibSqlSnapshotRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    fn parse_snapshot(row: &Row) -> Result<Snapshot> {
        let id: String = row.get(0)?;
        let owner_id: String = row.get(1)?;
        let kind: String = row.get(2)?;
        let captured: String = row.get(4)?;

        Ok(Snapshot {
            id: id
                .parse()
                .map_err(|_| Error::Database(format!("invalid snapshot id `{id}`")))?,
            owner_id: owner_id
                .parse()
                .map_err(|_| Error::Database(format!("invalid owner id `{owner_id}`")))?,
            kind: kind.parse()?,
            note: row.get(3)?,
            captured: serde_json::from_str::<EnrichedContent>(&captured)?,
            created_at: row.get(5)?,
        })
    }
}

impl SnapshotRepository for LibSqlSnapshotRepository<'_> {
    async fn insert(&self, snapshot: &Snapshot) -> Result<()> {
        let captured = serde_json::to_string(&snapshot.captured)?;
        self.conn
            .execute(
                &format!("INSERT INTO snapshots ({SNAPSHOT_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?)"),
                params![
                    snapshot.id.as_str(),
                    snapshot.owner_id.as_str(),
                    snapshot.kind.as_str(),
                    snapshot.note.clone(),
                    captured,
                    snapshot.created_at
                ],
            )
            .await?;
        Ok(())
    }

    async fn get(&self, id: &SnapshotId) -> Result<Option<Snapshot>> {
        let mut rows = self
            .conn
            .query(
                &format!("SELECT {SNAPSHOT_COLUMNS} FROM snapshots WHERE id = ?"),
                [id.as_str()],
            )
            .await?;

        match rows.next().await? {
            Some(row) => Ok(Some(Self::parse_snapshot(&row)?)),
            None => Ok(None),
        }
    }

    async fn list_for_owner(&self, owner_id: &InventoryId) -> Result<Vec<Snapshot>> {
        let mut rows = self
            .conn
            .query(
                &format!(
                    "SELECT {SNAPSHOT_COLUMNS} FROM snapshots
                     WHERE owner_id = ?
                     ORDER BY created_at DESC, id DESC"
                ),
                [owner_id.as_str()],
            )
            .await?;

        let mut snapshots = Vec::new();
        while let Some(row) = rows.next().await? {
            snapshots.push(Self::parse_snapshot(&row)?);
        }
        Ok(snapshots)
    }

    async fn restore_onto_owner(
        &self,
        owner_id: &InventoryId,
        snapshot_id: &SnapshotId,
        status: EnrichmentStatus,
    ) -> Result<bool> {
        let now = chrono::Utc::now().timestamp_millis();
        let rows = self
            .conn
            .execute(
                "UPDATE inventory_items
                 SET content = (SELECT captured FROM snapshots WHERE id = ?1 AND owner_id = ?2),
                     enrichment_status = ?3,
                     updated_at = ?4
                 WHERE id = ?2
                   AND EXISTS (SELECT 1 FROM snapshots WHERE id = ?1 AND owner_id = ?2)",
                params![snapshot_id.as_str(), owner_id.as_str(), status.as_str(), now],
            )
            .await?;
        Ok(rows > 0)
    }
}
