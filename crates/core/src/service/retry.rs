//! Retry decorator for tiling service backends.

use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::clock::{Clock, TokioClock};

use super::{
    ArchiveId, ArchiveInfo, AssetId, AssetInfo, ByteStream, CreateAssetRequest, CreatedAsset,
    ServiceError, TilingService,
};

/// Longest server-requested `Retry-After` wait that is honoured as-is.
pub const MAX_RETRY_AFTER: Duration = Duration::from_secs(120);

/// Retry configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum attempts per call, including the first one.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Delay before the first retry in milliseconds.
    #[serde(default = "default_initial_delay")]
    pub initial_delay_ms: u64,

    /// Upper bound for a single delay in milliseconds.
    #[serde(default = "default_max_delay")]
    pub max_delay_ms: u64,

    /// Exponential backoff multiplier.
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,
}

fn default_max_attempts() -> u32 {
    4
}

fn default_initial_delay() -> u64 {
    500
}

fn default_max_delay() -> u64 {
    8_000
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay_ms: default_initial_delay(),
            max_delay_ms: default_max_delay(),
            backoff_multiplier: default_backoff_multiplier(),
        }
    }
}

impl RetryConfig {
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn with_delays(mut self, initial: Duration, max: Duration) -> Self {
        self.initial_delay_ms = initial.as_millis() as u64;
        self.max_delay_ms = max.as_millis() as u64;
        self
    }
}

/// Backoff schedule derived from a [`RetryConfig`].
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    initial_delay: Duration,
    max_delay: Duration,
    multiplier: f64,
}

impl RetryPolicy {
    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            initial_delay: Duration::from_millis(config.initial_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
            multiplier: config.backoff_multiplier.max(1.0),
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Delay before retry number `retry` (1-based).
    pub fn backoff(&self, retry: u32) -> Duration {
        let exp = retry.saturating_sub(1).min(32) as i32;
        let millis = self.initial_delay.as_millis() as f64 * self.multiplier.powi(exp);
        let delay = Duration::from_millis(millis.min(u64::MAX as f64) as u64);
        delay.min(self.max_delay)
    }

    /// Delay for a specific error. A server-provided `Retry-After` wins,
    /// capped at [`MAX_RETRY_AFTER`].
    pub fn delay_for(&self, error: &ServiceError, retry: u32) -> Duration {
        match error {
            ServiceError::RateLimited {
                retry_after: Some(after),
            } => (*after).min(MAX_RETRY_AFTER),
            _ => self.backoff(retry),
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

/// Wraps a backend and retries transient failures with bounded backoff.
///
/// Non-retryable errors (auth, not found, server) propagate on the first
/// attempt. Cancellation during a backoff sleep returns the last error.
pub struct RetryingService {
    inner: Arc<dyn TilingService>,
    policy: RetryPolicy,
    clock: Arc<dyn Clock>,
    cancel: CancellationToken,
    name: String,
}

impl RetryingService {
    pub fn new(inner: Arc<dyn TilingService>, policy: RetryPolicy) -> Self {
        let name = format!("{}+retry", inner.name());
        Self {
            inner,
            policy,
            clock: Arc::new(TokioClock),
            cancel: CancellationToken::new(),
            name,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Stop retrying once this token fires.
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    async fn with_retry<T, F, Fut>(&self, op: &str, mut call: F) -> Result<T, ServiceError>
    where
        F: FnMut() -> Fut + Send,
        Fut: Future<Output = Result<T, ServiceError>> + Send,
        T: Send,
    {
        let mut attempt = 1;
        loop {
            match call().await {
                Ok(value) => {
                    if attempt > 1 {
                        debug!(op, attempt, "Call succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(e) if e.is_retryable() && attempt < self.policy.max_attempts => {
                    let delay = self.policy.delay_for(&e, attempt);
                    warn!(
                        op,
                        attempt,
                        max_attempts = self.policy.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Retrying after transient failure"
                    );
                    tokio::select! {
                        _ = self.cancel.cancelled() => return Err(e),
                        _ = self.clock.sleep(delay) => {}
                    }
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[async_trait]
impl TilingService for RetryingService {
    fn name(&self) -> &str {
        &self.name
    }

    async fn create_asset(
        &self,
        request: &CreateAssetRequest,
    ) -> Result<CreatedAsset, ServiceError> {
        self.with_retry("create_asset", || self.inner.create_asset(request))
            .await
    }

    async fn upload_payload(&self, asset: &CreatedAsset, file: &Path) -> Result<(), ServiceError> {
        self.with_retry("upload_payload", || self.inner.upload_payload(asset, file))
            .await
    }

    async fn get_status(&self, asset_id: AssetId) -> Result<AssetInfo, ServiceError> {
        self.with_retry("get_status", || self.inner.get_status(asset_id))
            .await
    }

    async fn list_assets(&self, limit: usize) -> Result<Vec<AssetInfo>, ServiceError> {
        self.with_retry("list_assets", || self.inner.list_assets(limit))
            .await
    }

    async fn create_archive(&self, asset_id: AssetId) -> Result<ArchiveInfo, ServiceError> {
        self.with_retry("create_archive", || self.inner.create_archive(asset_id))
            .await
    }

    async fn get_archive(&self, archive_id: ArchiveId) -> Result<ArchiveInfo, ServiceError> {
        self.with_retry("get_archive", || self.inner.get_archive(archive_id))
            .await
    }

    async fn list_archives(&self) -> Result<Vec<ArchiveInfo>, ServiceError> {
        self.with_retry("list_archives", || self.inner.list_archives())
            .await
    }

    async fn download_archive(&self, archive: &ArchiveInfo) -> Result<ByteStream, ServiceError> {
        self.with_retry("download_archive", || self.inner.download_archive(archive))
            .await
    }
}
