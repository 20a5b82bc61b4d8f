//! Archive creation and download.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::context::RunContext;
use crate::model::{
    ArchiveRecord, ArchiveStatus, AssetStatus, ErrorKind, FailureDetail, ModelError, Stage,
    UploadItem,
};
use crate::monitor::{poll_until_settled, PollSettings, PollVerdict, Readiness};
use crate::pool::{PoolError, TaskOutcome, WorkerPool};
use crate::service::{ArchiveId, ArchiveInfo, AssetId, RemoteStatus, ServiceError, TilingService};

use super::writer::{write_stream, DownloadError};
use super::{ArchiveConfig, ExistingFilePolicy};

/// Whole-download attempts; each attempt restarts from the first byte.
const MAX_DOWNLOAD_ATTEMPTS: u32 = 3;

/// Pause between download attempts.
const DOWNLOAD_RETRY_DELAY: Duration = Duration::from_secs(2);

/// An archive request for one completed asset.
///
/// Only constructible for assets in `COMPLETE` state.
#[derive(Debug, Clone)]
pub struct ArchiveRequest {
    name: String,
    record: ArchiveRecord,
}

impl ArchiveRequest {
    pub fn new(
        name: impl Into<String>,
        asset_id: AssetId,
        status: AssetStatus,
    ) -> Result<Self, ModelError> {
        Ok(Self {
            name: name.into(),
            record: ArchiveRecord::new(asset_id, status)?,
        })
    }

    pub fn from_item(item: &UploadItem) -> Result<Self, ModelError> {
        let asset_id = item
            .asset_id()
            .ok_or_else(|| ModelError::MissingAssetId(item.path().to_path_buf()))?;
        Self::new(item.name(), asset_id, item.status())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn asset_id(&self) -> AssetId {
        self.record.asset_id()
    }
}

/// Result of archiving (and optionally downloading) one asset.
#[derive(Debug, Clone)]
pub struct ArchiveReport {
    pub name: String,
    pub record: ArchiveRecord,
    /// The destination already existed and was kept.
    pub skipped_existing: bool,
    pub failure: Option<FailureDetail>,
}

impl ArchiveReport {
    pub fn is_success(&self) -> bool {
        self.failure.is_none()
    }
}

/// Result of downloading one archive by id.
#[derive(Debug, Clone)]
pub struct DownloadReport {
    pub archive_id: ArchiveId,
    pub path: Option<PathBuf>,
    pub bytes: u64,
    pub skipped_existing: bool,
    pub failure: Option<FailureDetail>,
}

impl DownloadReport {
    fn failed(archive_id: ArchiveId, failure: FailureDetail) -> Self {
        Self {
            archive_id,
            path: None,
            bytes: 0,
            skipped_existing: false,
            failure: Some(failure),
        }
    }

    pub fn is_success(&self) -> bool {
        self.failure.is_none()
    }
}

/// Requests archives for completed assets and downloads them.
#[derive(Clone)]
pub struct ArchiveManager {
    service: Arc<dyn TilingService>,
    config: ArchiveConfig,
    settings: PollSettings,
    download: bool,
}

impl ArchiveManager {
    pub fn new(service: Arc<dyn TilingService>, config: &ArchiveConfig) -> Self {
        Self {
            service,
            settings: config.settings(),
            config: config.clone(),
            download: true,
        }
    }

    pub fn with_settings(mut self, settings: PollSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Stop after the archive is ready instead of downloading it.
    pub fn with_download(mut self, download: bool) -> Self {
        self.download = download;
        self
    }

    pub fn config(&self) -> &ArchiveConfig {
        &self.config
    }

    /// Local path for an asset's archive: `<output_dir>/<name>_<id>.zip`.
    pub fn destination_for(&self, name: &str, asset_id: AssetId) -> PathBuf {
        self.config
            .output_dir
            .join(format!("{}_{}.zip", sanitize(name), asset_id))
    }

    /// Local path for a standalone archive download.
    pub fn destination_for_archive(&self, archive_id: ArchiveId) -> PathBuf {
        self.config.output_dir.join(format!("archive_{archive_id}.zip"))
    }

    fn keep_existing(&self, dest: &std::path::Path) -> bool {
        self.config.existing == ExistingFilePolicy::Skip && dest.is_file()
    }

    /// Create, await and (optionally) download the archive for one asset.
    pub async fn archive(&self, request: ArchiveRequest, ctx: &RunContext) -> ArchiveReport {
        let ArchiveRequest { name, mut record } = request;
        let asset_id = record.asset_id();
        let dest = self.destination_for(&name, asset_id);

        if self.download && self.keep_existing(&dest) {
            info!(asset_id, path = %dest.display(), "Archive already downloaded, skipping");
            record.mark_downloaded(dest);
            return ArchiveReport {
                name,
                record,
                skipped_existing: true,
                failure: None,
            };
        }

        let failure = self.run_archive(&mut record, &dest, ctx).await.err();
        if let Some(failure) = &failure {
            warn!(asset_id, error = %failure, "Archive failed");
        }
        ArchiveReport {
            name,
            record,
            skipped_existing: false,
            failure,
        }
    }

    async fn run_archive(
        &self,
        record: &mut ArchiveRecord,
        dest: &std::path::Path,
        ctx: &RunContext,
    ) -> Result<(), FailureDetail> {
        let asset_id = record.asset_id();
        if ctx.is_cancelled() {
            return Err(interrupted(Stage::Archive));
        }

        let created = self.service.create_archive(asset_id).await.map_err(|e| {
            record.set_status(ArchiveStatus::Failed);
            service_failure(Stage::Archive, e, ctx)
        })?;
        record.set_archive_id(created.id);
        debug!(asset_id, archive_id = created.id, "Archive requested");

        let archive = self.await_ready(record, created, ctx).await?;
        record.set_status(ArchiveStatus::Ready);

        if !self.download {
            return Ok(());
        }

        self.download_to(&archive, dest, ctx).await?;
        record.mark_downloaded(dest.to_path_buf());
        Ok(())
    }

    async fn await_ready(
        &self,
        record: &mut ArchiveRecord,
        created: ArchiveInfo,
        ctx: &RunContext,
    ) -> Result<ArchiveInfo, FailureDetail> {
        if created.status == RemoteStatus::Complete {
            return Ok(created);
        }

        let archive_id = created.id;
        let settled = poll_until_settled(
            ctx,
            self.settings,
            || self.service.get_archive(archive_id),
            classify_archive,
        )
        .await;

        match settled.verdict {
            PollVerdict::Ready => Ok(settled.last.unwrap_or(created)),
            PollVerdict::TimedOut => {
                record.set_status(ArchiveStatus::Timeout);
                Err(FailureDetail::new(
                    Stage::Archive,
                    ErrorKind::Timeout,
                    format!("archive {archive_id} not ready in time"),
                ))
            }
            PollVerdict::Cancelled => Err(interrupted(Stage::Archive)),
            PollVerdict::Unauthorized(message) => {
                ctx.abort(format!("authentication failed: {message}"));
                Err(FailureDetail::new(Stage::Archive, ErrorKind::AuthError, message))
            }
            PollVerdict::NotFound(message) => {
                record.set_status(ArchiveStatus::Failed);
                Err(FailureDetail::new(Stage::Archive, ErrorKind::NotFoundError, message))
            }
            PollVerdict::Failed(message) => {
                record.set_status(ArchiveStatus::Failed);
                Err(FailureDetail::new(Stage::Archive, ErrorKind::ProcessingFailed, message))
            }
            PollVerdict::Errored { kind, message } => {
                record.set_status(ArchiveStatus::Failed);
                Err(FailureDetail::new(Stage::Archive, kind, message))
            }
        }
    }

    /// Download with whole-file retries on transient failures.
    async fn download_to(
        &self,
        archive: &ArchiveInfo,
        dest: &std::path::Path,
        ctx: &RunContext,
    ) -> Result<u64, FailureDetail> {
        let mut attempt = 1;
        loop {
            let result = match self.service.download_archive(archive).await {
                Ok(body) => write_stream(body, dest, ctx).await,
                Err(e) => Err(DownloadError::Service(e)),
            };

            match result {
                Ok(bytes) => {
                    info!(archive_id = archive.id, path = %dest.display(), bytes, "Archive downloaded");
                    return Ok(bytes);
                }
                Err(e) if e.is_retryable() && attempt < MAX_DOWNLOAD_ATTEMPTS => {
                    warn!(archive_id = archive.id, attempt, error = %e, "Download failed, restarting");
                    if !ctx.sleep(DOWNLOAD_RETRY_DELAY).await {
                        return Err(interrupted(Stage::Download));
                    }
                    attempt += 1;
                }
                Err(DownloadError::Service(e)) => {
                    return Err(service_failure(Stage::Download, e, ctx))
                }
                Err(e) => {
                    return Err(FailureDetail::new(Stage::Download, e.kind(), e.to_string()))
                }
            }
        }
    }

    /// Archive every request with bounded concurrency. Results keep input
    /// order.
    pub async fn archive_all(
        &self,
        requests: Vec<ArchiveRequest>,
        ctx: &RunContext,
    ) -> Result<Vec<ArchiveReport>, PoolError> {
        let pool = WorkerPool::new("archive", self.config.concurrency)?;
        let manager = self.clone();
        let task_ctx = ctx.clone();

        let outcomes = pool
            .run(requests, ctx, move |request| {
                let manager = manager.clone();
                let ctx = task_ctx.clone();
                async move { manager.archive(request, &ctx).await }
            })
            .await;

        Ok(outcomes
            .into_iter()
            .map(|outcome| match outcome {
                TaskOutcome::Completed(report) => report,
                TaskOutcome::Skipped(request) => ArchiveReport {
                    name: request.name,
                    record: request.record,
                    skipped_existing: false,
                    failure: Some(interrupted(Stage::Archive)),
                },
                TaskOutcome::Failed { item, message } => ArchiveReport {
                    name: item.name,
                    record: item.record,
                    skipped_existing: false,
                    failure: Some(FailureDetail::new(
                        Stage::Archive,
                        ErrorKind::ServerError,
                        message,
                    )),
                },
            })
            .collect())
    }

    /// Download one existing archive, looked up by id.
    pub async fn download_by_id(&self, archive_id: ArchiveId, ctx: &RunContext) -> DownloadReport {
        let dest = self.destination_for_archive(archive_id);
        if self.keep_existing(&dest) {
            return skipped_download(archive_id, dest);
        }
        if ctx.is_cancelled() {
            return DownloadReport::failed(archive_id, interrupted(Stage::Download));
        }

        let archive = match self.service.get_archive(archive_id).await {
            Ok(archive) => archive,
            Err(e) => {
                return DownloadReport::failed(archive_id, service_failure(Stage::Download, e, ctx))
            }
        };
        self.download_ready(archive, ctx).await
    }

    async fn download_ready(&self, archive: ArchiveInfo, ctx: &RunContext) -> DownloadReport {
        let dest = self.destination_for_archive(archive.id);
        if self.keep_existing(&dest) {
            return skipped_download(archive.id, dest);
        }
        if archive.status != RemoteStatus::Complete {
            return DownloadReport::failed(
                archive.id,
                FailureDetail::new(
                    Stage::Download,
                    ErrorKind::InvalidInput,
                    format!("archive {} is {}, not COMPLETE", archive.id, archive.status.as_str()),
                ),
            );
        }

        match self.download_to(&archive, &dest, ctx).await {
            Ok(bytes) => DownloadReport {
                archive_id: archive.id,
                path: Some(dest),
                bytes,
                skipped_existing: false,
                failure: None,
            },
            Err(failure) => DownloadReport::failed(archive.id, failure),
        }
    }

    /// Download the given archives with bounded concurrency.
    pub async fn download_by_ids(
        &self,
        archive_ids: Vec<ArchiveId>,
        ctx: &RunContext,
    ) -> Result<Vec<DownloadReport>, PoolError> {
        let pool = WorkerPool::new("download", self.config.concurrency)?;
        let manager = self.clone();
        let task_ctx = ctx.clone();

        let outcomes = pool
            .run(archive_ids, ctx, move |archive_id| {
                let manager = manager.clone();
                let ctx = task_ctx.clone();
                async move { manager.download_by_id(archive_id, &ctx).await }
            })
            .await;

        Ok(outcomes.into_iter().map(download_outcome).collect())
    }

    /// Download every archive the service reports as COMPLETE.
    pub async fn download_all_completed(
        &self,
        ctx: &RunContext,
    ) -> Result<Vec<DownloadReport>, ServiceError> {
        let archives: Vec<ArchiveInfo> = self
            .service
            .list_archives()
            .await?
            .into_iter()
            .filter(|a| a.status == RemoteStatus::Complete)
            .collect();
        info!(count = archives.len(), "Downloading completed archives");

        let pool = WorkerPool::new("download", self.config.concurrency)
            .map_err(|e| ServiceError::InvalidInput(e.to_string()))?;
        let manager = self.clone();
        let task_ctx = ctx.clone();

        let outcomes = pool
            .run(archives, ctx, move |archive| {
                let manager = manager.clone();
                let ctx = task_ctx.clone();
                async move { manager.download_ready(archive, &ctx).await }
            })
            .await;

        Ok(outcomes
            .into_iter()
            .map(|outcome| match outcome {
                TaskOutcome::Completed(report) => report,
                TaskOutcome::Skipped(archive) => {
                    DownloadReport::failed(archive.id, interrupted(Stage::Download))
                }
                TaskOutcome::Failed { item, message } => DownloadReport::failed(
                    item.id,
                    FailureDetail::new(Stage::Download, ErrorKind::ServerError, message),
                ),
            })
            .collect())
    }
}

fn download_outcome(outcome: TaskOutcome<ArchiveId, DownloadReport>) -> DownloadReport {
    match outcome {
        TaskOutcome::Completed(report) => report,
        TaskOutcome::Skipped(archive_id) => {
            DownloadReport::failed(archive_id, interrupted(Stage::Download))
        }
        TaskOutcome::Failed { item, message } => DownloadReport::failed(
            item,
            FailureDetail::new(Stage::Download, ErrorKind::ServerError, message),
        ),
    }
}

fn skipped_download(archive_id: ArchiveId, dest: PathBuf) -> DownloadReport {
    info!(archive_id, path = %dest.display(), "Archive already downloaded, skipping");
    DownloadReport {
        archive_id,
        path: Some(dest),
        bytes: 0,
        skipped_existing: true,
        failure: None,
    }
}

fn classify_archive(archive: &ArchiveInfo) -> Readiness {
    match archive.status {
        RemoteStatus::Complete => Readiness::Ready,
        RemoteStatus::DataError | RemoteStatus::Error => {
            Readiness::Errored(format!("archive {} failed ({})", archive.id, archive.status.as_str()))
        }
        _ => Readiness::Pending,
    }
}

fn service_failure(stage: Stage, error: ServiceError, ctx: &RunContext) -> FailureDetail {
    if error.is_auth() {
        ctx.abort(error.to_string());
    }
    FailureDetail::new(stage, error.kind(), error.to_string())
}

fn interrupted(stage: Stage) -> FailureDetail {
    FailureDetail::new(stage, ErrorKind::Interrupted, "run cancelled")
}

/// Keep asset names usable as file names.
fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect()
}
