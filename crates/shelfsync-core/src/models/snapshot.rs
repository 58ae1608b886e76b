//! Snapshot model

use serde::{Deserialize, Serialize};
use std::str::FromStr;

use super::{EnrichedContent, InventoryId, SnapshotId};
use crate::error::Error;

/// Why a snapshot was captured
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SnapshotKind {
    /// Content as it was before the first enrichment
    Original,
    /// Captured automatically before pushing to the commerce platform
    BeforeSync,
    /// Requested by an operator
    Manual,
}

impl SnapshotKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Original => "original",
            Self::BeforeSync => "before_sync",
            Self::Manual => "manual",
        }
    }
}

impl FromStr for SnapshotKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "original" => Ok(Self::Original),
            "before_sync" => Ok(Self::BeforeSync),
            "manual" => Ok(Self::Manual),
            other => Err(Error::InvalidInput(format!("unknown snapshot type `{other}`"))),
        }
    }
}

/// Immutable point-in-time copy of an item's enriched content
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub id: SnapshotId,
    pub owner_id: InventoryId,
    pub kind: SnapshotKind,
    pub note: Option<String>,
    pub captured: EnrichedContent,
    /// Capture timestamp (Unix ms)
    pub created_at: i64,
}
