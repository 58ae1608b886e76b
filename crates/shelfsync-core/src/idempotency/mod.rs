//! Idempotency guard for externally triggered state changes.
//!
//! A record per (endpoint, client key) makes a retried request replay the
//! stored response instead of running its side effects twice. Concurrency
//! control lives entirely in the store: the unique constraint decides which of
//! two simultaneous first requests wins, and lock takeover is a conditional
//! update.
//!
//! Locks are time-based and carry no fencing token. A holder that outlives its
//! lock can still write after a new holder took over; this is only harmless
//! for side effects that are idempotent on the platform (update-by-id).

mod hash;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde_json::{json, Value};

pub use hash::{canonical_json, request_hash};

use crate::db::{Database, IdempotencyRepository, InsertOutcome, LibSqlIdempotencyRepository};
use crate::error::{Error, Result};
use crate::models::{IdempotencyRecord, IdempotencyRecordId, IdempotencyState};

/// Default advisory lock duration
pub const DEFAULT_LOCK: Duration = Duration::from_secs(300);

/// How many times `acquire` re-reads after losing a race
const ACQUIRE_ATTEMPTS: usize = 3;

/// Decision returned by [`IdempotencyGuard::acquire`]
#[derive(Debug, Clone, PartialEq)]
pub enum AcquireOutcome {
    /// The caller owns the record and must finalize it
    Acquired(IdempotencyRecordId),
    /// The request already completed; replay this response verbatim
    Replay { status_code: u16, body: Value },
    /// Another request with this key holds a live lock
    InProgress,
    /// The key was used before with a different payload
    Conflict,
}

/// A response as it is stored and replayed
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoredResponse {
    pub status_code: u16,
    pub body: Value,
}

impl StoredResponse {
    pub const fn new(status_code: u16, body: Value) -> Self {
        Self { status_code, body }
    }

    /// Non-2xx responses finalize the record as failed
    pub const fn is_failure(&self) -> bool {
        !(self.status_code >= 200 && self.status_code < 300)
    }
}

/// Result of [`IdempotencyGuard::run`]
#[derive(Debug, Clone, PartialEq)]
pub enum Guarded {
    /// The operation ran in this call
    Executed(StoredResponse),
    /// A previous call's response was replayed; nothing ran
    Replayed(StoredResponse),
}

impl Guarded {
    pub const fn response(&self) -> &StoredResponse {
        match self {
            Self::Executed(response) | Self::Replayed(response) => response,
        }
    }

    pub fn into_response(self) -> StoredResponse {
        match self {
            Self::Executed(response) | Self::Replayed(response) => response,
        }
    }

    pub const fn is_replay(&self) -> bool {
        matches!(self, Self::Replayed(_))
    }
}

/// Store-backed idempotency guard
#[derive(Clone)]
pub struct IdempotencyGuard {
    db: Arc<Database>,
    lock: Duration,
}

impl IdempotencyGuard {
    pub const fn new(db: Arc<Database>, lock: Duration) -> Self {
        Self { db, lock }
    }

    /// Lock duration applied by [`Self::run`]
    pub const fn lock_duration(&self) -> Duration {
        self.lock
    }

    /// Decide whether a request may run.
    pub async fn acquire(
        &self,
        endpoint: &str,
        idempotency_key: &str,
        request_hash: &str,
        lock: Duration,
    ) -> Result<AcquireOutcome> {
        let repo = LibSqlIdempotencyRepository::new(self.db.connection());
        let lock_ms = i64::try_from(lock.as_millis()).unwrap_or(i64::MAX);

        for _ in 0..ACQUIRE_ATTEMPTS {
            let now = chrono::Utc::now().timestamp_millis();
            let locked_until = now.saturating_add(lock_ms);

            let Some(record) = repo.find(endpoint, idempotency_key).await? else {
                let record =
                    IdempotencyRecord::in_progress(endpoint, idempotency_key, request_hash, locked_until);
                match repo.insert_if_absent(&record).await? {
                    InsertOutcome::Inserted => {
                        tracing::debug!(endpoint, record = %record.id, "Acquired idempotency key");
                        return Ok(AcquireOutcome::Acquired(record.id));
                    }
                    // Lost the race for the first insert; re-read the winner's record
                    InsertOutcome::AlreadyExists => continue,
                }
            };

            if record.request_hash != request_hash {
                tracing::warn!(endpoint, "Idempotency key reused with a different payload");
                return Ok(AcquireOutcome::Conflict);
            }

            match record.state {
                IdempotencyState::Completed => {
                    return Ok(AcquireOutcome::Replay {
                        status_code: record.status_code.unwrap_or(200),
                        body: record.response_body.unwrap_or(Value::Null),
                    });
                }
                IdempotencyState::InProgress if record.is_locked_at(now) => {
                    return Ok(AcquireOutcome::InProgress);
                }
                IdempotencyState::InProgress | IdempotencyState::Failed => {
                    if repo.try_take_over(&record.id, now, locked_until).await? {
                        tracing::info!(
                            endpoint,
                            record = %record.id,
                            previous_state = record.state.as_str(),
                            "Took over idempotency record"
                        );
                        return Ok(AcquireOutcome::Acquired(record.id));
                    }
                    // Someone else took it over first; re-read
                }
            }
        }

        Ok(AcquireOutcome::InProgress)
    }

    /// Store the final response for an acquired record.
    pub async fn finalize(
        &self,
        record_id: &IdempotencyRecordId,
        status_code: u16,
        response_body: &Value,
        failed: bool,
    ) -> Result<()> {
        let repo = LibSqlIdempotencyRepository::new(self.db.connection());
        let state = if failed {
            IdempotencyState::Failed
        } else {
            IdempotencyState::Completed
        };

        if repo
            .finalize(record_id, state, status_code, response_body)
            .await?
        {
            tracing::debug!(record = %record_id, state = state.as_str(), "Finalized idempotency record");
        } else {
            tracing::warn!(
                record = %record_id,
                "Idempotency record was no longer in progress when finalizing"
            );
        }
        Ok(())
    }

    /// Run `operation` under the guard.
    ///
    /// Without a key the operation simply runs. The operation reports every
    /// outcome, including failures, as a [`StoredResponse`]. If the run is
    /// dropped before the operation returns (client gone, timeout) or the
    /// operation panics, the record is finalized as a failed 500 in the
    /// background, so a retry can run again without waiting out the lock.
    pub async fn run<F, Fut>(
        &self,
        endpoint: &str,
        idempotency_key: Option<&str>,
        payload: &Value,
        operation: F,
    ) -> Result<Guarded>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = StoredResponse>,
    {
        let Some(key) = idempotency_key.map(str::trim).filter(|key| !key.is_empty()) else {
            return Ok(Guarded::Executed(operation().await));
        };

        let hash = request_hash(payload);
        let record_id = match self.acquire(endpoint, key, &hash, self.lock).await? {
            AcquireOutcome::Acquired(record_id) => record_id,
            AcquireOutcome::Replay { status_code, body } => {
                tracing::info!(endpoint, status_code, "Replaying stored response");
                return Ok(Guarded::Replayed(StoredResponse::new(status_code, body)));
            }
            AcquireOutcome::InProgress => {
                return Err(Error::InProgress(format!(
                    "a request with this idempotency key is already running on {endpoint}; retry later"
                )));
            }
            AcquireOutcome::Conflict => {
                return Err(Error::Conflict(
                    "idempotency key was already used with a different request payload".into(),
                ));
            }
        };

        let pending = PendingFinalize {
            guard: Some(self.clone()),
            record_id,
        };
        let response = operation().await;
        pending.disarm();

        if let Err(error) = self
            .finalize(
                &record_id,
                response.status_code,
                &response.body,
                response.is_failure(),
            )
            .await
        {
            // The lock expires on its own; the caller still gets its response
            tracing::error!(record = %record_id, %error, "Failed to finalize idempotency record");
        }

        Ok(Guarded::Executed(response))
    }
}

/// Finalizes an acquired record as failed unless disarmed
struct PendingFinalize {
    guard: Option<IdempotencyGuard>,
    record_id: IdempotencyRecordId,
}

impl PendingFinalize {
    fn disarm(mut self) {
        self.guard = None;
    }
}

impl Drop for PendingFinalize {
    fn drop(&mut self) {
        let Some(guard) = self.guard.take() else {
            return;
        };
        let record_id = self.record_id;
        let reason = if std::thread::panicking() {
            "request panicked"
        } else {
            "request was cancelled"
        };
        tracing::warn!(record = %record_id, reason, "Idempotent run ended without a response");

        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            tracing::error!(record = %record_id, "No runtime to finalize on; lock will expire");
            return;
        };
        handle.spawn(async move {
            let body = json!({ "error": reason });
            if let Err(error) = guard.finalize(&record_id, 500, &body, true).await {
                tracing::error!(record = %record_id, %error, "Failed to finalize abandoned record");
            }
        });
    }
}
