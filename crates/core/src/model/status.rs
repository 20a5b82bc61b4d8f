use std::fmt;

use serde::{Deserialize, Serialize};

/// Lifecycle of one uploaded file and its server-side asset.
///
/// Transitions only move forward; `Complete`, `Failed`, `Error` and
/// `Timeout` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AssetStatus {
    /// Found by the scan, nothing sent yet.
    Pending,
    /// Asset created, payload being uploaded.
    Uploading,
    /// Payload uploaded, server is tiling.
    Processing,
    /// Server finished tiling.
    Complete,
    /// Rejected by us or by the server (bad data, missing asset).
    Failed,
    /// Server-side processing error, or the status could not be read.
    Error,
    /// Still processing when the wait budget ran out.
    Timeout,
}

impl AssetStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AssetStatus::Pending => "PENDING",
            AssetStatus::Uploading => "UPLOADING",
            AssetStatus::Processing => "PROCESSING",
            AssetStatus::Complete => "COMPLETE",
            AssetStatus::Failed => "FAILED",
            AssetStatus::Error => "ERROR",
            AssetStatus::Timeout => "TIMEOUT",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            AssetStatus::Complete | AssetStatus::Failed | AssetStatus::Error | AssetStatus::Timeout
        )
    }

    fn rank(&self) -> u8 {
        match self {
            AssetStatus::Pending => 0,
            AssetStatus::Uploading => 1,
            AssetStatus::Processing => 2,
            AssetStatus::Complete
            | AssetStatus::Failed
            | AssetStatus::Error
            | AssetStatus::Timeout => 3,
        }
    }

    /// Whether `next` is a legal forward move from `self`.
    pub fn can_transition_to(&self, next: AssetStatus) -> bool {
        !self.is_terminal() && next.rank() > self.rank()
    }
}

impl fmt::Display for AssetStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
