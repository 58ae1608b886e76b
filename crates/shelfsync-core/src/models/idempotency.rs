//! Idempotency record model

use serde::{Deserialize, Serialize};
use std::str::FromStr;

use super::IdempotencyRecordId;
use crate::error::Error;

/// Lifecycle of an idempotency record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdempotencyState {
    InProgress,
    Completed,
    Failed,
}

impl IdempotencyState {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl FromStr for IdempotencyState {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "in_progress" => Ok(Self::InProgress),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(Error::Database(format!(
                "unknown idempotency state `{other}`"
            ))),
        }
    }
}

/// Stored outcome of a state-changing request, keyed by (endpoint, key)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdempotencyRecord {
    pub id: IdempotencyRecordId,
    pub endpoint: String,
    pub idempotency_key: String,
    pub request_hash: String,
    pub state: IdempotencyState,
    pub status_code: Option<u16>,
    pub response_body: Option<serde_json::Value>,
    /// Advisory lock expiry (Unix ms)
    pub locked_until: i64,
    pub created_at: i64,
    pub updated_at: i64,
}

impl IdempotencyRecord {
    /// A fresh in-progress record locked until `locked_until`
    #[must_use]
    pub fn in_progress(
        endpoint: &str,
        idempotency_key: &str,
        request_hash: &str,
        locked_until: i64,
    ) -> Self {
        let now = chrono::Utc::now().timestamp_millis();
        Self {
            id: IdempotencyRecordId::new(),
            endpoint: endpoint.to_string(),
            idempotency_key: idempotency_key.to_string(),
            request_hash: request_hash.to_string(),
            state: IdempotencyState::InProgress,
            status_code: None,
            response_body: None,
            locked_until,
            created_at: now,
            updated_at: now,
        }
    }

    /// True while the record is held by a live request
    pub const fn is_locked_at(&self, now_ms: i64) -> bool {
        matches!(self.state, IdempotencyState::InProgress) && self.locked_until > now_ms
    }
}
