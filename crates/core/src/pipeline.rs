//! End-to-end workflow: upload, then optionally monitor, archive and
//! download.
//!
//! Each input gets exactly one slot in the final [`BatchResult`]. Stages
//! run one after the other; inside a stage items are processed through a
//! bounded [`WorkerPool`], and one item's failure never stops the others.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use thiserror::Error;
use tracing::{info, warn};

use crate::archive::{ArchiveManager, ArchiveReport, ArchiveRequest};
use crate::config::{Config, UploadConfig};
use crate::context::RunContext;
use crate::model::{
    AssetStatus, BatchResult, ErrorKind, FailureDetail, ItemOutcome, Outcome, Stage, UploadItem,
};
use crate::monitor::ProcessingMonitor;
use crate::pool::{PoolError, TaskOutcome, WorkerPool};
use crate::service::TilingService;
use crate::upload::{run_upload_task, scan_input_dir, ScanError, UploadOptions};

/// Errors that stop a pipeline run before any item is processed.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Scan(#[from] ScanError),

    #[error(transparent)]
    Pool(#[from] PoolError),
}

/// Optional stages to run after upload.
///
/// Later stages imply earlier ones: download needs an archive, and an
/// archive needs a completed asset.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StageSelection {
    pub wait: bool,
    pub archive: bool,
    pub download: bool,
}

impl StageSelection {
    pub fn new(wait: bool, archive: bool, download: bool) -> Self {
        Self {
            wait,
            archive,
            download,
        }
        .normalized()
    }

    pub fn upload_only() -> Self {
        Self::default()
    }

    pub fn all() -> Self {
        Self::new(true, true, true)
    }

    pub fn normalized(self) -> Self {
        let archive = self.archive || self.download;
        Self {
            wait: self.wait || archive,
            archive,
            download: self.download,
        }
    }
}

/// One item moving through the stages.
struct Slot {
    item: UploadItem,
    failure: Option<FailureDetail>,
    archive: Option<ArchiveReport>,
}

/// Runs the upload workflow against a tiling service.
pub struct Pipeline {
    service: Arc<dyn TilingService>,
    upload: UploadConfig,
    options: UploadOptions,
    monitor: ProcessingMonitor,
    archive: ArchiveManager,
}

impl Pipeline {
    pub fn new(service: Arc<dyn TilingService>, config: &Config) -> Self {
        Self {
            monitor: ProcessingMonitor::new(service.clone(), &config.monitor),
            archive: ArchiveManager::new(service.clone(), &config.archive),
            options: UploadOptions::from_config(&config.upload),
            upload: config.upload.clone(),
            service,
        }
    }

    /// Scan the configured input directory and run every file found.
    pub async fn run_dir(
        &self,
        stages: StageSelection,
        ctx: &RunContext,
    ) -> Result<BatchResult, PipelineError> {
        let files = scan_input_dir(&self.upload.input_dir, &self.upload.extension).await?;
        info!(
            dir = %self.upload.input_dir.display(),
            files = files.len(),
            "Scanned input directory"
        );
        Ok(self.run(files, stages, ctx).await?)
    }

    /// Run the selected stages for `paths`. Duplicate paths are processed
    /// once.
    pub async fn run(
        &self,
        paths: Vec<PathBuf>,
        stages: StageSelection,
        ctx: &RunContext,
    ) -> Result<BatchResult, PoolError> {
        let stages = stages.normalized();
        let started_at = Utc::now();

        let mut seen = HashSet::new();
        let items: Vec<UploadItem> = paths
            .into_iter()
            .filter(|p| seen.insert(p.clone()))
            .map(UploadItem::new)
            .collect();

        info!(
            items = items.len(),
            workers = self.upload.workers,
            wait = stages.wait,
            archive = stages.archive,
            download = stages.download,
            "Starting run"
        );

        let mut slots = self.upload_all(items, ctx).await?;
        if stages.wait {
            self.monitor_all(&mut slots, ctx).await?;
        }
        if stages.archive {
            self.archive_all(&mut slots, stages.download, ctx).await?;
        }

        let outcomes = slots.into_iter().map(into_outcome).collect();
        let result = BatchResult::new(outcomes, started_at, ctx.abort_reason());
        info!(
            succeeded = result.succeeded,
            failed = result.failed,
            timed_out = result.timed_out,
            skipped = result.skipped,
            "Run finished"
        );
        Ok(result)
    }

    async fn upload_all(
        &self,
        items: Vec<UploadItem>,
        ctx: &RunContext,
    ) -> Result<Vec<Slot>, PoolError> {
        let pool = WorkerPool::new("upload", self.upload.workers)?;
        let service = self.service.clone();
        let options = self.options.clone();
        let task_ctx = ctx.clone();

        let outcomes = pool
            .run(items, ctx, move |item| {
                let service = service.clone();
                let options = options.clone();
                let ctx = task_ctx.clone();
                async move { run_upload_task(service.as_ref(), item, &options, &ctx).await }
            })
            .await;

        let status = pool.status();
        info!(
            processed = status.total_processed,
            peak = status.peak_active,
            "Upload stage finished"
        );

        Ok(outcomes
            .into_iter()
            .map(|outcome| match outcome {
                TaskOutcome::Completed(report) => Slot {
                    item: report.item,
                    failure: report.failure,
                    archive: None,
                },
                TaskOutcome::Skipped(item) => Slot {
                    item,
                    failure: Some(FailureDetail::new(
                        Stage::Upload,
                        ErrorKind::Interrupted,
                        "run cancelled before upload",
                    )),
                    archive: None,
                },
                TaskOutcome::Failed { item, message } => Slot {
                    item,
                    failure: Some(FailureDetail::new(Stage::Upload, ErrorKind::ServerError, message)),
                    archive: None,
                },
            })
            .collect())
    }

    async fn monitor_all(&self, slots: &mut [Slot], ctx: &RunContext) -> Result<(), PoolError> {
        let indices: Vec<usize> = slots
            .iter()
            .enumerate()
            .filter(|(_, s)| s.failure.is_none() && s.item.status() == AssetStatus::Processing)
            .map(|(i, _)| i)
            .collect();
        if indices.is_empty() {
            return Ok(());
        }

        let items = indices.iter().map(|&i| slots[i].item.clone()).collect();
        let reports = self.monitor.watch_all(items, ctx).await?;
        for (index, report) in indices.into_iter().zip(reports) {
            let slot = &mut slots[index];
            slot.item = report.item;
            slot.failure = report.failure;
        }
        Ok(())
    }

    async fn archive_all(
        &self,
        slots: &mut [Slot],
        download: bool,
        ctx: &RunContext,
    ) -> Result<(), PoolError> {
        let mut indices = Vec::new();
        let mut requests = Vec::new();
        for (index, slot) in slots.iter().enumerate() {
            if slot.failure.is_some() {
                continue;
            }
            // Only completed assets can be archived.
            match ArchiveRequest::from_item(&slot.item) {
                Ok(request) => {
                    indices.push(index);
                    requests.push(request);
                }
                Err(e) if slot.item.status() == AssetStatus::Processing => {
                    warn!(item = %slot.item.name(), error = %e, "Not archiving unfinished asset");
                }
                Err(_) => {}
            }
        }
        if requests.is_empty() {
            return Ok(());
        }

        let manager = self.archive.clone().with_download(download);
        let reports = manager.archive_all(requests, ctx).await?;
        for (index, report) in indices.into_iter().zip(reports) {
            slots[index].archive = Some(report);
        }
        Ok(())
    }
}

fn into_outcome(slot: Slot) -> ItemOutcome {
    let mut outcome = ItemOutcome::from_item(&slot.item, slot.failure);
    if let Some(report) = slot.archive {
        outcome.archive = Some(report.record);
        if let Some(failure) = report.failure {
            match failure.kind {
                ErrorKind::Interrupted => {
                    outcome.failure = Some(failure);
                    outcome.outcome = Outcome::Skipped;
                }
                ErrorKind::Timeout => {
                    outcome.failure = Some(failure);
                    outcome.outcome = Outcome::TimedOut;
                }
                _ => outcome.fail(failure),
            }
        }
    }
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::ExistingFilePolicy;
    use crate::model::ArchiveStatus;
    use crate::service::{RemoteStatus, ServiceError};
    use crate::testing::{fixtures, MockClock, MockTilingService};
    use tempfile::TempDir;

    struct Setup {
        dir: TempDir,
        service: Arc<MockTilingService>,
        ctx: RunContext,
        pipeline: Pipeline,
    }

    fn setup(configure: impl FnOnce(&mut Config)) -> Setup {
        let dir = TempDir::new().unwrap();
        let service = Arc::new(MockTilingService::new());
        let ctx = RunContext::with_clock(Arc::new(MockClock::new()));

        let mut config = fixtures::config();
        config.upload.workers = 2;
        config.archive = config
            .archive
            .clone()
            .with_output_dir(dir.path().join("converted"))
            .with_existing(ExistingFilePolicy::Skip);
        configure(&mut config);

        let pipeline = Pipeline::new(service.clone(), &config);
        Setup {
            dir,
            service,
            ctx,
            pipeline,
        }
    }

    #[test]
    fn test_stage_selection_implications() {
        let s = StageSelection::new(false, false, true);
        assert!(s.wait && s.archive && s.download);

        let s = StageSelection::new(false, true, false);
        assert!(s.wait && s.archive && !s.download);

        assert_eq!(StageSelection::upload_only(), StageSelection::new(false, false, false));
    }

    #[tokio::test]
    async fn test_upload_only_succeeds_without_polling() {
        let s = setup(|_| {});
        let files = fixtures::source_files(s.dir.path(), &["a.gml", "b.gml"]);

        let result = s
            .pipeline
            .run(files, StageSelection::upload_only(), &s.ctx)
            .await
            .unwrap();

        assert_eq!(result.succeeded, 2);
        assert!(result.items.iter().all(|i| i.status == AssetStatus::Processing));
        assert!(s.service.calls().await.iter().all(|c| !c.starts_with("get_status")));
    }

    #[tokio::test]
    async fn test_duplicate_paths_processed_once() {
        let s = setup(|_| {});
        let files = fixtures::source_files(s.dir.path(), &["a.gml"]);
        let paths = vec![files[0].clone(), files[0].clone()];

        let result = s
            .pipeline
            .run(paths, StageSelection::upload_only(), &s.ctx)
            .await
            .unwrap();

        assert_eq!(result.total(), 1);
        assert_eq!(s.service.upload_calls().await, 1);
    }

    #[tokio::test]
    async fn test_full_run_downloads_archives() {
        let s = setup(|_| {});
        let files = fixtures::source_files(s.dir.path(), &["a.gml"]);

        let result = s.pipeline.run(files, StageSelection::all(), &s.ctx).await.unwrap();

        assert!(result.is_success());
        let archive = result.items[0].archive.as_ref().unwrap();
        assert_eq!(archive.status(), ArchiveStatus::Downloaded);
        assert!(archive.local_path().unwrap().ends_with("a_1.zip"));
    }

    #[tokio::test]
    async fn test_failed_asset_is_not_archived() {
        let s = setup(|c| c.upload.workers = 1);
        let files = fixtures::source_files(s.dir.path(), &["a.gml", "b.gml"]);
        s.service.push_status(2, RemoteStatus::DataError).await;

        let result = s.pipeline.run(files, StageSelection::all(), &s.ctx).await.unwrap();

        assert_eq!(result.succeeded, 1);
        assert_eq!(result.failed, 1);
        let b = result.items.iter().find(|i| i.name == "b").unwrap();
        assert!(b.archive.is_none());
        assert_eq!(s.service.archive_requests().await.len(), 1);
    }

    #[tokio::test]
    async fn test_archive_failure_fails_item() {
        let s = setup(|_| {});
        let files = fixtures::source_files(s.dir.path(), &["a.gml"]);
        s.service.push_archive_status(RemoteStatus::Error).await;

        let result = s
            .pipeline
            .run(files, StageSelection::new(true, true, false), &s.ctx)
            .await
            .unwrap();

        let item = &result.items[0];
        assert_eq!(item.outcome, Outcome::Failed);
        assert_eq!(item.status, AssetStatus::Complete);
        assert_eq!(item.failure.as_ref().unwrap().stage, Stage::Archive);
    }

    #[tokio::test]
    async fn test_auth_failure_aborts_run() {
        let s = setup(|c| c.upload.workers = 1);
        let files = fixtures::source_files(s.dir.path(), &["a.gml", "b.gml", "c.gml"]);
        s.service
            .fail_create("a", ServiceError::Auth("HTTP 401".into()))
            .await;

        let result = s
            .pipeline
            .run(files, StageSelection::upload_only(), &s.ctx)
            .await
            .unwrap();

        assert!(result.aborted.is_some());
        assert!(!result.is_success());
        assert_eq!(result.total(), 3);
        assert_eq!(result.items[0].outcome, Outcome::Failed);
        assert!(result.skipped >= 1);
    }
}
