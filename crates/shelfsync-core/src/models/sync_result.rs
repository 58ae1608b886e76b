//! Publish outcome model

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// External platforms, in publish order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Platform {
    Commerce,
    Crm,
    Workspace,
}

impl Platform {
    pub const fn label(self) -> &'static str {
        match self {
            Self::Commerce => "Commerce",
            Self::Crm => "CRM",
            Self::Workspace => "Workspace",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Outcome on one platform
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlatformResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub external_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl PlatformResult {
    pub const fn succeeded(external_id: Option<String>) -> Self {
        Self {
            success: true,
            external_id,
            error: None,
        }
    }

    pub const fn failed(error: String) -> Self {
        Self {
            success: false,
            external_id: None,
            error: Some(error),
        }
    }
}

/// Aggregate outcome of one publish attempt
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncResult {
    pub success: bool,
    pub per_platform: BTreeMap<Platform, PlatformResult>,
    pub errors: Vec<String>,
}

impl SyncResult {
    /// Record one platform outcome
    pub fn record(&mut self, platform: Platform, result: PlatformResult) {
        if let Some(error) = result.error.as_deref() {
            self.errors.push(format!("{platform}: {error}"));
        }
        self.per_platform.insert(platform, result);
    }

    /// Seal the result; success iff every attempted platform succeeded
    #[must_use]
    pub fn finish(mut self) -> Self {
        self.success = self.errors.is_empty();
        self
    }
}
