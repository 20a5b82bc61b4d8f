//! Processing monitor implementation.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::context::RunContext;
use crate::model::{AssetStatus, ErrorKind, FailureDetail, Stage, UploadItem};
use crate::pool::{PoolError, TaskOutcome, WorkerPool};
use crate::service::{AssetId, AssetInfo, TilingService};

use super::state::{poll_until_settled, PollVerdict, Readiness};
use super::{MonitorConfig, PollSettings};

/// Result of watching one asset id.
#[derive(Debug, Clone)]
pub struct AssetWatch {
    pub asset_id: AssetId,
    pub verdict: PollVerdict,
    pub polls: u32,
    /// Last status read from the service.
    pub last: Option<AssetInfo>,
}

impl AssetWatch {
    /// Local status implied by the verdict, `None` if the watch was cut short.
    pub fn status(&self) -> Option<AssetStatus> {
        match &self.verdict {
            PollVerdict::Ready => Some(AssetStatus::Complete),
            PollVerdict::Failed(_) | PollVerdict::NotFound(_) => Some(AssetStatus::Failed),
            PollVerdict::Errored { .. } => Some(AssetStatus::Error),
            PollVerdict::TimedOut => Some(AssetStatus::Timeout),
            PollVerdict::Unauthorized(_) | PollVerdict::Cancelled => None,
        }
    }
}

/// Result of the monitor stage for one item.
#[derive(Debug, Clone)]
pub struct MonitorReport {
    pub item: UploadItem,
    pub failure: Option<FailureDetail>,
    pub polls: u32,
}

/// Watches uploaded assets until the service finishes tiling them.
#[derive(Clone)]
pub struct ProcessingMonitor {
    service: Arc<dyn TilingService>,
    settings: PollSettings,
    concurrency: usize,
}

impl ProcessingMonitor {
    pub fn new(service: Arc<dyn TilingService>, config: &MonitorConfig) -> Self {
        Self {
            service,
            settings: config.settings(),
            concurrency: config.concurrency,
        }
    }

    pub fn with_settings(mut self, settings: PollSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn settings(&self) -> PollSettings {
        self.settings
    }

    /// Poll one asset until it settles.
    pub async fn watch_asset(&self, asset_id: AssetId, ctx: &RunContext) -> AssetWatch {
        let settled = poll_until_settled(
            ctx,
            self.settings,
            || self.service.get_status(asset_id),
            classify_asset,
        )
        .await;

        match &settled.verdict {
            PollVerdict::Ready => info!(asset_id, polls = settled.polls, "Asset processing complete"),
            PollVerdict::TimedOut => warn!(
                asset_id,
                max_wait_secs = self.settings.max_wait.as_secs(),
                "Asset still processing at deadline"
            ),
            PollVerdict::Unauthorized(message) => ctx.abort(format!("authentication failed: {message}")),
            PollVerdict::Cancelled => debug!(asset_id, "Monitoring cancelled"),
            other => warn!(asset_id, verdict = ?other, "Asset did not complete"),
        }

        AssetWatch {
            asset_id,
            verdict: settled.verdict,
            polls: settled.polls,
            last: settled.last,
        }
    }

    /// Watch several asset ids with bounded concurrency. Results keep input
    /// order.
    pub async fn watch_assets(
        &self,
        asset_ids: Vec<AssetId>,
        ctx: &RunContext,
    ) -> Result<Vec<AssetWatch>, PoolError> {
        let pool = WorkerPool::new("monitor", self.concurrency)?;
        let monitor = self.clone();
        let task_ctx = ctx.clone();

        let outcomes = pool
            .run(asset_ids, ctx, move |asset_id| {
                let monitor = monitor.clone();
                let ctx = task_ctx.clone();
                async move { monitor.watch_asset(asset_id, &ctx).await }
            })
            .await;

        Ok(outcomes
            .into_iter()
            .map(|outcome| match outcome {
                TaskOutcome::Completed(watch) => watch,
                TaskOutcome::Skipped(asset_id) => AssetWatch {
                    asset_id,
                    verdict: PollVerdict::Cancelled,
                    polls: 0,
                    last: None,
                },
                TaskOutcome::Failed { item, message } => AssetWatch {
                    asset_id: item,
                    verdict: PollVerdict::Errored {
                        kind: ErrorKind::ServerError,
                        message,
                    },
                    polls: 0,
                    last: None,
                },
            })
            .collect())
    }

    /// Watch one uploaded item and move it to its terminal status.
    ///
    /// Items without an asset id or not in `Processing` are returned as-is.
    pub async fn watch(&self, mut item: UploadItem, ctx: &RunContext) -> MonitorReport {
        let asset_id = match item.asset_id() {
            Some(id) if item.status() == AssetStatus::Processing => id,
            _ => {
                return MonitorReport {
                    item,
                    failure: None,
                    polls: 0,
                }
            }
        };

        let watch = self.watch_asset(asset_id, ctx).await;
        let failure = apply_watch(&mut item, &watch);
        MonitorReport {
            item,
            failure,
            polls: watch.polls,
        }
    }

    /// Watch all items that are processing. Results keep input order.
    pub async fn watch_all(
        &self,
        items: Vec<UploadItem>,
        ctx: &RunContext,
    ) -> Result<Vec<MonitorReport>, PoolError> {
        let pool = WorkerPool::new("monitor", self.concurrency)?;
        let monitor = self.clone();
        let task_ctx = ctx.clone();

        let outcomes = pool
            .run(items, ctx, move |item| {
                let monitor = monitor.clone();
                let ctx = task_ctx.clone();
                async move { monitor.watch(item, &ctx).await }
            })
            .await;

        Ok(outcomes
            .into_iter()
            .map(|outcome| match outcome {
                TaskOutcome::Completed(report) => report,
                TaskOutcome::Skipped(item) => MonitorReport {
                    item,
                    failure: Some(FailureDetail::new(
                        Stage::Monitor,
                        ErrorKind::Interrupted,
                        "run cancelled before monitoring",
                    )),
                    polls: 0,
                },
                TaskOutcome::Failed { item, message } => MonitorReport {
                    item,
                    failure: Some(FailureDetail::new(Stage::Monitor, ErrorKind::ServerError, message)),
                    polls: 0,
                },
            })
            .collect())
    }
}

fn classify_asset(info: &AssetInfo) -> Readiness {
    debug!(
        asset_id = info.id,
        status = info.status.as_str(),
        percent = info.percent_complete.unwrap_or(0.0),
        "Polled asset"
    );
    match info.status.to_asset_status() {
        AssetStatus::Complete => Readiness::Ready,
        AssetStatus::Failed => Readiness::Failed(format!(
            "server rejected the source data ({})",
            info.status.as_str()
        )),
        AssetStatus::Error => Readiness::Errored(format!(
            "server-side processing error ({})",
            info.status.as_str()
        )),
        _ => Readiness::Pending,
    }
}

/// Move the item to the status implied by the watch and describe any failure.
fn apply_watch(item: &mut UploadItem, watch: &AssetWatch) -> Option<FailureDetail> {
    if let Some(status) = watch.status() {
        if let Err(e) = item.transition(status) {
            warn!(asset_id = watch.asset_id, error = %e, "Unexpected monitor transition");
        }
    }

    match &watch.verdict {
        PollVerdict::Ready => None,
        PollVerdict::Failed(message) => Some(FailureDetail::new(
            Stage::Monitor,
            ErrorKind::ProcessingFailed,
            message.clone(),
        )),
        PollVerdict::Errored { kind, message } => {
            Some(FailureDetail::new(Stage::Monitor, *kind, message.clone()))
        }
        PollVerdict::TimedOut => Some(FailureDetail::new(
            Stage::Monitor,
            ErrorKind::Timeout,
            "still processing when the wait budget ran out",
        )),
        PollVerdict::NotFound(message) => Some(FailureDetail::new(
            Stage::Monitor,
            ErrorKind::NotFoundError,
            message.clone(),
        )),
        PollVerdict::Unauthorized(message) => Some(FailureDetail::new(
            Stage::Monitor,
            ErrorKind::AuthError,
            message.clone(),
        )),
        PollVerdict::Cancelled => Some(FailureDetail::new(
            Stage::Monitor,
            ErrorKind::Interrupted,
            "run cancelled while monitoring",
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::{RemoteStatus, ServiceError};
    use crate::testing::{MockClock, MockTilingService};
    use std::time::Duration;

    fn processing_item(asset_id: u64) -> UploadItem {
        let mut item = UploadItem::new(format!("data/{asset_id}.gml"));
        item.assign_asset(asset_id).unwrap();
        item.transition(AssetStatus::Uploading).unwrap();
        item.transition(AssetStatus::Processing).unwrap();
        item
    }

    fn setup() -> (Arc<MockTilingService>, Arc<MockClock>, RunContext, ProcessingMonitor) {
        let service = Arc::new(MockTilingService::new());
        let clock = Arc::new(MockClock::new());
        let ctx = RunContext::with_clock(clock.clone());
        let config = MonitorConfig::default().with_poll_interval(30).with_max_wait(600);
        let monitor = ProcessingMonitor::new(service.clone(), &config);
        (service, clock, ctx, monitor)
    }

    #[tokio::test]
    async fn test_complete_after_three_polls() {
        let (service, clock, ctx, monitor) = setup();
        service.push_status(1, RemoteStatus::InProgress).await;
        service.push_status(1, RemoteStatus::InProgress).await;
        service.push_status(1, RemoteStatus::Complete).await;

        let report = monitor.watch(processing_item(1), &ctx).await;

        assert_eq!(report.item.status(), AssetStatus::Complete);
        assert!(report.failure.is_none());
        assert_eq!(report.polls, 3);
        assert_eq!(service.status_calls(1).await, 3);
        assert_eq!(clock.elapsed(), Duration::from_secs(60));
    }

    #[tokio::test]
    async fn test_data_error_marks_failed() {
        let (service, _clock, ctx, monitor) = setup();
        service.push_status(2, RemoteStatus::DataError).await;

        let report = monitor.watch(processing_item(2), &ctx).await;

        assert_eq!(report.item.status(), AssetStatus::Failed);
        assert_eq!(report.failure.unwrap().kind, ErrorKind::ProcessingFailed);
    }

    #[tokio::test]
    async fn test_server_error_marks_error() {
        let (service, _clock, ctx, monitor) = setup();
        service.push_status(3, RemoteStatus::Error).await;

        let report = monitor.watch(processing_item(3), &ctx).await;
        assert_eq!(report.item.status(), AssetStatus::Error);
    }

    #[tokio::test]
    async fn test_timeout_not_before_deadline() {
        let (service, clock, ctx, monitor) = setup();
        service.push_status(4, RemoteStatus::InProgress).await;

        let report = monitor.watch(processing_item(4), &ctx).await;

        assert_eq!(report.item.status(), AssetStatus::Timeout);
        assert_eq!(report.failure.unwrap().kind, ErrorKind::Timeout);
        assert!(clock.elapsed() >= Duration::from_secs(600));
        assert_eq!(report.polls, 21);
    }

    #[tokio::test]
    async fn test_not_found_marks_failed() {
        let (service, _clock, ctx, monitor) = setup();
        service
            .push_status_error(5, ServiceError::NotFound("asset 5".into()))
            .await;

        let report = monitor.watch(processing_item(5), &ctx).await;

        assert_eq!(report.item.status(), AssetStatus::Failed);
        assert_eq!(report.failure.unwrap().kind, ErrorKind::NotFoundError);
        assert!(!ctx.is_cancelled());
    }

    #[tokio::test]
    async fn test_auth_error_aborts() {
        let (service, _clock, ctx, monitor) = setup();
        service
            .push_status_error(6, ServiceError::Auth("HTTP 401".into()))
            .await;

        let report = monitor.watch(processing_item(6), &ctx).await;

        assert_eq!(report.failure.unwrap().kind, ErrorKind::AuthError);
        assert_eq!(report.item.status(), AssetStatus::Processing);
        assert!(ctx.is_cancelled());
        assert!(ctx.abort_reason().is_some());
    }

    #[tokio::test]
    async fn test_single_poll_failure_is_pending() {
        let (service, _clock, ctx, monitor) = setup();
        service
            .push_status_error(7, ServiceError::Server("HTTP 500".into()))
            .await;
        service.push_status(7, RemoteStatus::Complete).await;

        let report = monitor.watch(processing_item(7), &ctx).await;
        assert_eq!(report.item.status(), AssetStatus::Complete);
        assert_eq!(report.polls, 2);
    }

    #[tokio::test]
    async fn test_item_without_asset_is_passed_through() {
        let (service, _clock, ctx, monitor) = setup();
        let report = monitor.watch(UploadItem::new("x.gml"), &ctx).await;
        assert_eq!(report.item.status(), AssetStatus::Pending);
        assert_eq!(report.polls, 0);
        assert_eq!(service.status_calls(0).await, 0);
    }

    #[tokio::test]
    async fn test_watch_all_keeps_order() {
        let (service, _clock, ctx, monitor) = setup();
        service.push_status(10, RemoteStatus::Complete).await;
        service.push_status(11, RemoteStatus::DataError).await;
        service.push_status(12, RemoteStatus::Complete).await;

        let reports = monitor
            .watch_all(
                vec![processing_item(10), processing_item(11), processing_item(12)],
                &ctx,
            )
            .await
            .unwrap();

        let statuses: Vec<_> = reports.iter().map(|r| r.item.status()).collect();
        assert_eq!(
            statuses,
            vec![AssetStatus::Complete, AssetStatus::Failed, AssetStatus::Complete]
        );
    }

    #[tokio::test]
    async fn test_watch_assets_by_id() {
        let (service, _clock, ctx, monitor) = setup();
        service.push_status(20, RemoteStatus::Complete).await;

        let watches = monitor.watch_assets(vec![20], &ctx).await.unwrap();
        assert_eq!(watches[0].status(), Some(AssetStatus::Complete));
        assert_eq!(watches[0].last.as_ref().unwrap().status, RemoteStatus::Complete);
    }
}
