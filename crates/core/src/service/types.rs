//! Types for tiling service operations.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::{AssetStatus, ErrorKind};

/// Server-side asset identifier.
pub type AssetId = u64;

/// Server-side archive identifier.
pub type ArchiveId = u64;

/// Streamed archive body.
pub type ByteStream = BoxStream<'static, Result<Bytes, ServiceError>>;

/// Errors that can occur during tiling service operations.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ServiceError {
    /// Credential rejected. Fatal for the whole run.
    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("not found: {0}")]
    NotFound(String),

    /// Connection reset, timeout, gateway errors.
    #[error("transient network error: {0}")]
    Transient(String),

    #[error("rate limited by server")]
    RateLimited { retry_after: Option<Duration> },

    #[error("server error: {0}")]
    Server(String),

    /// Rejected locally before any request was made.
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

impl ServiceError {
    /// Whether the retry decorator should try the call again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient(_) | Self::RateLimited { .. })
    }

    pub fn is_auth(&self) -> bool {
        matches!(self, Self::Auth(_))
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Auth(_) => ErrorKind::AuthError,
            Self::NotFound(_) => ErrorKind::NotFoundError,
            Self::Transient(_) => ErrorKind::TransientNetworkError,
            Self::RateLimited { .. } => ErrorKind::RateLimitError,
            Self::Server(_) => ErrorKind::ServerError,
            Self::InvalidInput(_) => ErrorKind::InvalidInput,
        }
    }
}

/// Status string reported by the service for assets and archives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RemoteStatus {
    AwaitingFiles,
    NotStarted,
    InProgress,
    Complete,
    DataError,
    Error,
    #[serde(other)]
    Unknown,
}

impl RemoteStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RemoteStatus::AwaitingFiles => "AWAITING_FILES",
            RemoteStatus::NotStarted => "NOT_STARTED",
            RemoteStatus::InProgress => "IN_PROGRESS",
            RemoteStatus::Complete => "COMPLETE",
            RemoteStatus::DataError => "DATA_ERROR",
            RemoteStatus::Error => "ERROR",
            RemoteStatus::Unknown => "UNKNOWN",
        }
    }

    /// Local view of a remote asset status.
    pub fn to_asset_status(self) -> AssetStatus {
        match self {
            RemoteStatus::Complete => AssetStatus::Complete,
            RemoteStatus::DataError => AssetStatus::Failed,
            RemoteStatus::Error => AssetStatus::Error,
            _ => AssetStatus::Processing,
        }
    }
}

/// Information about an asset.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssetInfo {
    pub id: AssetId,
    pub name: String,
    pub status: RemoteStatus,
    /// Tiling progress (0 - 100).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub percent_complete: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date_added: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub asset_type: Option<String>,
}

/// Information about an archive.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchiveInfo {
    pub id: ArchiveId,
    pub status: RemoteStatus,
    #[serde(default)]
    pub asset_ids: Vec<AssetId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bytes_archived: Option<u64>,
    /// Explicit download location, when the service provides one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub download_url: Option<String>,
}

/// Request to create a new asset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateAssetRequest {
    pub name: String,
    pub description: String,
    /// Output type, e.g. `3DTILES`.
    pub asset_type: String,
    /// Input type, e.g. `CITYGML`.
    pub source_type: String,
}

impl CreateAssetRequest {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            asset_type: "3DTILES".to_string(),
            source_type: "CITYGML".to_string(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_types(mut self, asset_type: impl Into<String>, source_type: impl Into<String>) -> Self {
        self.asset_type = asset_type.into();
        self.source_type = source_type.into();
        self
    }
}

/// Temporary object-store credentials for uploading a source file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadLocation {
    pub endpoint: String,
    pub bucket: String,
    pub prefix: String,
    pub access_key: String,
    pub secret_access_key: String,
    pub session_token: String,
}

/// Callback the service expects once the source upload is finished.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OnComplete {
    pub method: String,
    pub url: String,
    #[serde(default)]
    pub fields: serde_json::Value,
}

/// Result of creating an asset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatedAsset {
    pub id: AssetId,
    pub name: String,
    pub upload_location: Option<UploadLocation>,
    pub on_complete: Option<OnComplete>,
}

/// Trait for tiling service backends.
#[async_trait]
pub trait TilingService: Send + Sync {
    /// Backend name for logging.
    fn name(&self) -> &str;

    /// Create an asset record awaiting its source file.
    async fn create_asset(&self, request: &CreateAssetRequest)
        -> Result<CreatedAsset, ServiceError>;

    /// Upload the source file for a created asset and start processing.
    async fn upload_payload(&self, asset: &CreatedAsset, file: &Path) -> Result<(), ServiceError>;

    /// Current status of an asset.
    async fn get_status(&self, asset_id: AssetId) -> Result<AssetInfo, ServiceError>;

    /// Most recently added assets, newest first.
    async fn list_assets(&self, limit: usize) -> Result<Vec<AssetInfo>, ServiceError>;

    /// Request a downloadable archive of a processed asset.
    async fn create_archive(&self, asset_id: AssetId) -> Result<ArchiveInfo, ServiceError>;

    /// Current status of an archive.
    async fn get_archive(&self, archive_id: ArchiveId) -> Result<ArchiveInfo, ServiceError>;

    /// All archives visible to the credential.
    async fn list_archives(&self) -> Result<Vec<ArchiveInfo>, ServiceError>;

    /// Open the archive body as a byte stream.
    async fn download_archive(&self, archive: &ArchiveInfo) -> Result<ByteStream, ServiceError>;
}
