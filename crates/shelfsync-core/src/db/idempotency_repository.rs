//! Idempotency record repository implementation

use libsql::{params, Connection, Row};

use crate::error::{Error, Result};
use crate::models::{IdempotencyRecord, IdempotencyRecordId, IdempotencyState};

const RECORD_COLUMNS: &str = "id, endpoint, idempotency_key, request_hash, state, status_code, \
     response_body, locked_until, created_at, updated_at";

/// Result of an insert guarded by a unique constraint
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    AlreadyExists,
}

/// Trait for idempotency record storage operations (async)
#[allow(async_fn_in_trait)]
pub trait IdempotencyRepository {
    /// Insert unless a record with the same (endpoint, key) exists
    async fn insert_if_absent(&self, record: &IdempotencyRecord) -> Result<InsertOutcome>;

    /// Zero-or-one lookup by (endpoint, key)
    async fn find(&self, endpoint: &str, idempotency_key: &str)
        -> Result<Option<IdempotencyRecord>>;

    /// Re-lock a record whose lock expired (or whose run failed).
    ///
    /// The condition is evaluated by the store, so only one caller wins.
    async fn try_take_over(
        &self,
        id: &IdempotencyRecordId,
        now_ms: i64,
        locked_until: i64,
    ) -> Result<bool>;

    /// Move an in-progress record to its terminal state
    async fn finalize(
        &self,
        id: &IdempotencyRecordId,
        state: IdempotencyState,
        status_code: u16,
        response_body: &serde_json::Value,
    ) -> Result<bool>;
}

/// libSQL implementation of `IdempotencyRepository`
pub struct LibSqlIdempotencyRepository<'a> {
    conn: &'a Connection,
}

impl<'a> LibSqlIdempotencyRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    fn parse_record(row: &Row) -> Result<IdempotencyRecord> {
        let id: String = row.get(0)?;
        let state: String = row.get(4)?;
        let status_code: Option<i64> = row.get(5)?;
        let response_body: Option<String> = row.get(6)?;

        Ok(IdempotencyRecord {
            id: id
                .parse()
                .map_err(|_| Error::Database(format!("invalid idempotency id `{id}`")))?,
            endpoint: row.get(1)?,
            idempotency_key: row.get(2)?,
            request_hash: row.get(3)?,
            state: state.parse()?,
            status_code: status_code.and_then(|code| u16::try_from(code).ok()),
            response_body: response_body
                .map(|body| serde_json::from_str(&body))
                .transpose()?,
            locked_until: row.get(7)?,
            created_at: row.get(8)?,
            updated_at: row.get(9)?,
        })
    }
}

impl IdempotencyRepository for LibSqlIdempotencyRepository<'_> {
    async fn insert_if_absent(&self, record: &IdempotencyRecord) -> Result<InsertOutcome> {
        let rows = self
            .conn
            .execute(
                &format!(
                    "INSERT INTO idempotency_records ({RECORD_COLUMNS})
                     VALUES (?, ?, ?, ?, ?, NULL, NULL, ?, ?, ?)
                     ON CONFLICT (endpoint, idempotency_key) DO NOTHING"
                ),
                params![
                    record.id.as_str(),
                    record.endpoint.as_str(),
                    record.idempotency_key.as_str(),
                    record.request_hash.as_str(),
                    record.state.as_str(),
                    record.locked_until,
                    record.created_at,
                    record.updated_at
                ],
            )
            .await?;

        Ok(if rows == 0 {
            InsertOutcome::AlreadyExists
        } else {
            InsertOutcome::Inserted
        })
    }

    async fn find(
        &self,
        endpoint: &str,
        idempotency_key: &str,
    ) -> Result<Option<IdempotencyRecord>> {
        let mut rows = self
            .conn
            .query(
                &format!(
                    "SELECT {RECORD_COLUMNS} FROM idempotency_records
                     WHERE endpoint = ? AND idempotency_key = ?"
                ),
                [endpoint, idempotency_key],
            )
            .await?;

        match rows.next().await? {
            Some(row) => Ok(Some(Self::parse_record(&row)?)),
            None => Ok(None),
        }
    }

    async fn try_take_over(
        &self,
        id: &IdempotencyRecordId,
        now_ms: i64,
        locked_until: i64,
    ) -> Result<bool> {
        let rows = self
            .conn
            .execute(
                "UPDATE idempotency_records
                 SET state = 'in_progress', locked_until = ?, updated_at = ?
                 WHERE id = ?
                   AND (state = 'failed' OR (state = 'in_progress' AND locked_until <= ?))",
                params![locked_until, now_ms, id.as_str(), now_ms],
            )
            .await?;
        Ok(rows > 0)
    }

    async fn finalize(
        &self,
        id: &IdempotencyRecordId,
        state: IdempotencyState,
        status_code: u16,
        response_body: &serde_json::Value,
    ) -> Result<bool> {
        let now = chrono::Utc::now().timestamp_millis();
        let body = serde_json::to_string(response_body)?;
        let rows = self
            .conn
            .execute(
                "UPDATE idempotency_records
                 SET state = ?, status_code = ?, response_body = ?, locked_until = ?, updated_at = ?
                 WHERE id = ? AND state = 'in_progress'",
                params![
                    state.as_str(),
                    i64::from(status_code),
                    body,
                    now,
                    now,
                    id.as_str()
                ],
            )
            .await?;
        Ok(rows > 0)
    }
}
