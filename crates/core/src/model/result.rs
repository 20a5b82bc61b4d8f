use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{AssetStatus, ModelError, UploadItem};

/// Workflow stage an outcome or failure belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Upload,
    Monitor,
    Archive,
    Download,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Upload => "upload",
            Stage::Monitor => "monitor",
            Stage::Archive => "archive",
            Stage::Download => "download",
        }
    }
}

/// Error category recorded with a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    AuthError,
    NotFoundError,
    TransientNetworkError,
    RateLimitError,
    ServerError,
    InvalidInput,
    ProcessingFailed,
    Timeout,
    Io,
    Interrupted,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::AuthError => "AuthError",
            ErrorKind::NotFoundError => "NotFoundError",
            ErrorKind::TransientNetworkError => "TransientNetworkError",
            ErrorKind::RateLimitError => "RateLimitError",
            ErrorKind::ServerError => "ServerError",
            ErrorKind::InvalidInput => "InvalidInput",
            ErrorKind::ProcessingFailed => "ProcessingFailed",
            ErrorKind::Timeout => "Timeout",
            ErrorKind::Io => "IoError",
            ErrorKind::Interrupted => "Interrupted",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why an item did not make it through a stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureDetail {
    pub stage: Stage,
    pub kind: ErrorKind,
    pub message: String,
}

impl FailureDetail {
    pub fn new(stage: Stage, kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            stage,
            kind,
            message: message.into(),
        }
    }
}

impl fmt::Display for FailureDetail {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} failed ({}): {}", self.stage.as_str(), self.kind, self.message)
    }
}

/// Final category of one item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Succeeded,
    Failed,
    TimedOut,
    Skipped,
}

/// Readiness of a server-side archive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArchiveStatus {
    /// Creation requested, no identifier yet.
    Requested,
    /// Server is packaging.
    Pending,
    /// Ready to download.
    Ready,
    /// Written to local storage.
    Downloaded,
    /// Creation or packaging failed.
    Failed,
    /// Not ready within the wait budget.
    Timeout,
}

/// Archive bookkeeping for one completed asset.
///
/// Only constructible for assets in `COMPLETE` state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveRecord {
    asset_id: u64,
    archive_id: Option<u64>,
    status: ArchiveStatus,
    local_path: Option<PathBuf>,
}

impl ArchiveRecord {
    pub fn new(asset_id: u64, asset_status: AssetStatus) -> Result<Self, ModelError> {
        if asset_status != AssetStatus::Complete {
            return Err(ModelError::AssetNotComplete {
                asset_id,
                status: asset_status,
            });
        }
        Ok(Self {
            asset_id,
            archive_id: None,
            status: ArchiveStatus::Requested,
            local_path: None,
        })
    }

    pub fn asset_id(&self) -> u64 {
        self.asset_id
    }

    pub fn archive_id(&self) -> Option<u64> {
        self.archive_id
    }

    pub fn status(&self) -> ArchiveStatus {
        self.status
    }

    pub fn local_path(&self) -> Option<&PathBuf> {
        self.local_path.as_ref()
    }

    pub fn set_archive_id(&mut self, archive_id: u64) {
        self.archive_id = Some(archive_id);
        self.status = ArchiveStatus::Pending;
    }

    pub fn set_status(&mut self, status: ArchiveStatus) {
        self.status = status;
    }

    pub fn mark_downloaded(&mut self, path: PathBuf) {
        self.local_path = Some(path);
        self.status = ArchiveStatus::Downloaded;
    }
}

/// Result slot for one input item.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemOutcome {
    pub path: PathBuf,
    pub name: String,
    pub asset_id: Option<u64>,
    pub status: AssetStatus,
    pub outcome: Outcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub archive: Option<ArchiveRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureDetail>,
}

impl ItemOutcome {
    /// Slot for an item after the upload and monitor stages.
    pub fn from_item(item: &UploadItem, failure: Option<FailureDetail>) -> Self {
        let outcome = match (&failure, item.status()) {
            (Some(f), _) if f.kind == ErrorKind::Interrupted => Outcome::Skipped,
            (_, AssetStatus::Timeout) => Outcome::TimedOut,
            (Some(_), _) => Outcome::Failed,
            (None, AssetStatus::Failed | AssetStatus::Error) => Outcome::Failed,
            (None, _) => Outcome::Succeeded,
        };
        Self {
            path: item.path().to_path_buf(),
            name: item.name().to_string(),
            asset_id: item.asset_id(),
            status: item.status(),
            outcome,
            archive: None,
            failure,
        }
    }

    /// Slot for an item that was never started.
    pub fn skipped(item: &UploadItem) -> Self {
        Self {
            path: item.path().to_path_buf(),
            name: item.name().to_string(),
            asset_id: item.asset_id(),
            status: item.status(),
            outcome: Outcome::Skipped,
            archive: None,
            failure: None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.outcome == Outcome::Succeeded
    }

    /// Record a failure at a later stage; the first failure wins.
    pub fn fail(&mut self, detail: FailureDetail) {
        if self.failure.is_none() {
            self.failure = Some(detail);
        }
        self.outcome = Outcome::Failed;
    }
}

/// Aggregate result of one run. Built once, after every stage finished.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchResult {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub succeeded: usize,
    pub failed: usize,
    pub timed_out: usize,
    pub skipped: usize,
    /// Per-item outcomes in input order.
    pub items: Vec<ItemOutcome>,
    /// Set when a fatal error (bad credential, interrupt) stopped the run.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aborted: Option<String>,
}

impl BatchResult {
    pub fn new(
        items: Vec<ItemOutcome>,
        started_at: DateTime<Utc>,
        aborted: Option<String>,
    ) -> Self {
        let count = |o: Outcome| items.iter().filter(|i| i.outcome == o).count();
        let succeeded = count(Outcome::Succeeded);
        let failed = count(Outcome::Failed);
        let timed_out = count(Outcome::TimedOut);
        let skipped = count(Outcome::Skipped);

        Self {
            started_at,
            finished_at: Utc::now(),
            succeeded,
            failed,
            timed_out,
            skipped,
            items,
            aborted,
        }
    }

    pub fn total(&self) -> usize {
        self.items.len()
    }

    /// True when every item went through every requested stage.
    pub fn is_success(&self) -> bool {
        self.aborted.is_none() && self.items.iter().all(ItemOutcome::is_success)
    }

    pub fn failures(&self) -> impl Iterator<Item = &ItemOutcome> {
        self.items.iter().filter(|i| i.outcome == Outcome::Failed)
    }
}
