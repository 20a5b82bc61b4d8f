//! Mock tiling service for testing.

use async_trait::async_trait;
use bytes::Bytes;
use futures::{stream, StreamExt};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::path::Path;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

use crate::service::{
    ArchiveId, ArchiveInfo, AssetId, AssetInfo, ByteStream, CreateAssetRequest, CreatedAsset,
    RemoteStatus, ServiceError, TilingService,
};

type Script<T> = VecDeque<Result<T, ServiceError>>;

/// Mock implementation of the [`TilingService`] trait.
///
/// Behaviour is scripted per asset or per file name:
/// - status scripts are consumed one entry per poll and the last entry
///   repeats; an asset without a script reports `COMPLETE`
/// - queued create/upload failures are consumed one per call, after which
///   calls succeed
/// - archive creation returns `IN_PROGRESS` while an archive script is
///   set (archive polls then follow it), `COMPLETE` otherwise
///
/// Every call is recorded so tests can assert on counts and ordering.
///
/// # Example
///
/// ```rust,ignore
/// use tilepush_core::testing::MockTilingService;
///
/// let service = MockTilingService::new();
/// service.push_status(1, RemoteStatus::InProgress).await;
/// service.push_status(1, RemoteStatus::Complete).await;
///
/// // ... run the monitor ...
/// assert_eq!(service.status_calls(1).await, 2);
/// ```
#[derive(Debug)]
pub struct MockTilingService {
    next_asset_id: AtomicU64,
    next_archive_id: AtomicU64,
    /// Asset names by id, for status and listing responses.
    assets: Arc<RwLock<BTreeMap<AssetId, String>>>,
    created: Arc<RwLock<Vec<CreateAssetRequest>>>,
    create_failures: Arc<RwLock<HashMap<String, VecDeque<ServiceError>>>>,
    upload_failures: Arc<RwLock<HashMap<String, VecDeque<ServiceError>>>>,
    upload_calls: AtomicUsize,
    upload_delay: Arc<RwLock<Option<Duration>>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    statuses: Arc<RwLock<HashMap<AssetId, Script<RemoteStatus>>>>,
    status_calls: Arc<RwLock<HashMap<AssetId, usize>>>,
    archives: Arc<RwLock<BTreeMap<ArchiveId, ArchiveInfo>>>,
    archive_script: Arc<RwLock<VecDeque<RemoteStatus>>>,
    archive_requests: Arc<RwLock<Vec<AssetId>>>,
    archive_polls: AtomicUsize,
    archive_body: Arc<RwLock<Vec<u8>>>,
    download_failures: Arc<RwLock<VecDeque<ServiceError>>>,
    download_calls: AtomicUsize,
    calls: Arc<RwLock<Vec<String>>>,
}

impl Default for MockTilingService {
    fn default() -> Self {
        Self::new()
    }
}

impl MockTilingService {
    pub fn new() -> Self {
        Self {
            next_asset_id: AtomicU64::new(1),
            next_archive_id: AtomicU64::new(500),
            assets: Arc::new(RwLock::new(BTreeMap::new())),
            created: Arc::new(RwLock::new(Vec::new())),
            create_failures: Arc::new(RwLock::new(HashMap::new())),
            upload_failures: Arc::new(RwLock::new(HashMap::new())),
            upload_calls: AtomicUsize::new(0),
            upload_delay: Arc::new(RwLock::new(None)),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            statuses: Arc::new(RwLock::new(HashMap::new())),
            status_calls: Arc::new(RwLock::new(HashMap::new())),
            archives: Arc::new(RwLock::new(BTreeMap::new())),
            archive_script: Arc::new(RwLock::new(VecDeque::new())),
            archive_requests: Arc::new(RwLock::new(Vec::new())),
            archive_polls: AtomicUsize::new(0),
            archive_body: Arc::new(RwLock::new(b"PK\x05\x06".to_vec())),
            download_failures: Arc::new(RwLock::new(VecDeque::new())),
            download_calls: AtomicUsize::new(0),
            calls: Arc::new(RwLock::new(Vec::new())),
        }
    }

    // =========================================================================
    // Scripting
    // =========================================================================

    /// Append a status to the poll script of `asset_id`.
    pub async fn push_status(&self, asset_id: AssetId, status: RemoteStatus) {
        self.statuses
            .write()
            .await
            .entry(asset_id)
            .or_default()
            .push_back(Ok(status));
    }

    /// Append a poll error to the script of `asset_id`.
    pub async fn push_status_error(&self, asset_id: AssetId, error: ServiceError) {
        self.statuses
            .write()
            .await
            .entry(asset_id)
            .or_default()
            .push_back(Err(error));
    }

    /// Queue a failure for the next asset creation named `name`.
    pub async fn fail_create(&self, name: &str, error: ServiceError) {
        self.create_failures
            .write()
            .await
            .entry(name.to_string())
            .or_default()
            .push_back(error);
    }

    /// Queue a failure for the next payload upload of asset `name`.
    pub async fn fail_upload(&self, name: &str, error: ServiceError) {
        self.upload_failures
            .write()
            .await
            .entry(name.to_string())
            .or_default()
            .push_back(error);
    }

    /// Hold each payload upload for `delay` (real time) so concurrent tasks
    /// overlap.
    pub async fn set_upload_delay(&self, delay: Duration) {
        *self.upload_delay.write().await = Some(delay);
    }

    /// Append a status to the archive poll script (shared by all archives).
    pub async fn push_archive_status(&self, status: RemoteStatus) {
        self.archive_script.write().await.push_back(status);
    }

    /// Register an existing archive.
    pub async fn add_archive(&self, id: ArchiveId, status: RemoteStatus, asset_ids: Vec<AssetId>) {
        self.archives.write().await.insert(
            id,
            ArchiveInfo {
                id,
                status,
                asset_ids,
                format: Some("ZIP".to_string()),
                bytes_archived: None,
                download_url: None,
            },
        );
    }

    /// Bytes served by every archive download.
    pub async fn set_archive_body(&self, body: Vec<u8>) {
        *self.archive_body.write().await = body;
    }

    /// Queue a failure for the next archive download.
    pub async fn fail_next_download(&self, error: ServiceError) {
        self.download_failures.write().await.push_back(error);
    }

    // =========================================================================
    // Inspection
    // =========================================================================

    pub async fn created_assets(&self) -> Vec<CreateAssetRequest> {
        self.created.read().await.clone()
    }

    pub async fn upload_calls(&self) -> usize {
        self.upload_calls.load(Ordering::SeqCst)
    }

    /// Highest number of payload uploads that ran at the same time.
    pub fn max_concurrent_uploads(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub async fn status_calls(&self, asset_id: AssetId) -> usize {
        self.status_calls
            .read()
            .await
            .get(&asset_id)
            .copied()
            .unwrap_or(0)
    }

    /// Asset ids archive creation was requested for, in call order.
    pub async fn archive_requests(&self) -> Vec<AssetId> {
        self.archive_requests.read().await.clone()
    }

    pub async fn archive_polls(&self) -> usize {
        self.archive_polls.load(Ordering::SeqCst)
    }

    pub async fn download_calls(&self) -> usize {
        self.download_calls.load(Ordering::SeqCst)
    }

    /// Every call as `"<operation>:<argument>"`, in order.
    pub async fn calls(&self) -> Vec<String> {
        self.calls.read().await.clone()
    }

    async fn record(&self, call: String) {
        self.calls.write().await.push(call);
    }

    async fn peek_status(&self, asset_id: AssetId) -> Result<RemoteStatus, ServiceError> {
        self.statuses
            .read()
            .await
            .get(&asset_id)
            .and_then(|script| script.front().cloned())
            .unwrap_or(Ok(RemoteStatus::Complete))
    }
}

#[async_trait]
impl TilingService for MockTilingService {
    fn name(&self) -> &str {
        "mock"
    }

    async fn create_asset(&self, request: &CreateAssetRequest) -> Result<CreatedAsset, ServiceError> {
        self.record(format!("create_asset:{}", request.name)).await;
        self.created.write().await.push(request.clone());

        if let Some(queue) = self.create_failures.write().await.get_mut(&request.name) {
            if let Some(error) = queue.pop_front() {
                return Err(error);
            }
        }

        let id = self.next_asset_id.fetch_add(1, Ordering::SeqCst);
        self.assets.write().await.insert(id, request.name.clone());
        Ok(CreatedAsset {
            id,
            name: request.name.clone(),
            upload_location: None,
            on_complete: None,
        })
    }

    async fn upload_payload(&self, asset: &CreatedAsset, file: &Path) -> Result<(), ServiceError> {
        self.record(format!("upload_payload:{}", asset.name)).await;
        self.upload_calls.fetch_add(1, Ordering::SeqCst);

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        let delay = *self.upload_delay.read().await;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let failure = self
            .upload_failures
            .write()
            .await
            .get_mut(&asset.name)
            .and_then(|queue| queue.pop_front());
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if let Some(error) = failure {
            return Err(error);
        }
        if !file.is_file() {
            return Err(ServiceError::InvalidInput(format!(
                "file not found: {}",
                file.display()
            )));
        }
        Ok(())
    }

    async fn get_status(&self, asset_id: AssetId) -> Result<AssetInfo, ServiceError> {
        self.record(format!("get_status:{asset_id}")).await;
        *self.status_calls.write().await.entry(asset_id).or_insert(0) += 1;

        let result = {
            let mut statuses = self.statuses.write().await;
            match statuses.get_mut(&asset_id) {
                Some(script) if script.len() > 1 => script.pop_front(),
                Some(script) => script.front().cloned(),
                None => None,
            }
        };
        let status = result.unwrap_or(Ok(RemoteStatus::Complete))?;

        let name = self
            .assets
            .read()
            .await
            .get(&asset_id)
            .cloned()
            .unwrap_or_else(|| format!("asset-{asset_id}"));
        Ok(asset_info(asset_id, name, status))
    }

    async fn list_assets(&self, limit: usize) -> Result<Vec<AssetInfo>, ServiceError> {
        self.record(format!("list_assets:{limit}")).await;
        let assets: Vec<(AssetId, String)> = self
            .assets
            .read()
            .await
            .iter()
            .rev()
            .take(limit)
            .map(|(id, name)| (*id, name.clone()))
            .collect();

        let mut infos = Vec::with_capacity(assets.len());
        for (id, name) in assets {
            let status = self.peek_status(id).await.unwrap_or(RemoteStatus::Error);
            infos.push(asset_info(id, name, status));
        }
        Ok(infos)
    }

    async fn create_archive(&self, asset_id: AssetId) -> Result<ArchiveInfo, ServiceError> {
        self.record(format!("create_archive:{asset_id}")).await;
        self.archive_requests.write().await.push(asset_id);

        let id = self.next_archive_id.fetch_add(1, Ordering::SeqCst);
        let status = if self.archive_script.read().await.is_empty() {
            RemoteStatus::Complete
        } else {
            RemoteStatus::InProgress
        };
        let info = ArchiveInfo {
            id,
            status,
            asset_ids: vec![asset_id],
            format: Some("ZIP".to_string()),
            bytes_archived: None,
            download_url: None,
        };
        self.archives.write().await.insert(id, info.clone());
        Ok(info)
    }

    async fn get_archive(&self, archive_id: ArchiveId) -> Result<ArchiveInfo, ServiceError> {
        self.record(format!("get_archive:{archive_id}")).await;
        self.archive_polls.fetch_add(1, Ordering::SeqCst);

        let mut archives = self.archives.write().await;
        let archive = archives
            .get_mut(&archive_id)
            .ok_or_else(|| ServiceError::NotFound(format!("archive {archive_id}")))?;

        let mut script = self.archive_script.write().await;
        let next = if script.len() > 1 {
            script.pop_front()
        } else {
            script.front().copied()
        };
        if let Some(status) = next {
            archive.status = status;
        }
        Ok(archive.clone())
    }

    async fn list_archives(&self) -> Result<Vec<ArchiveInfo>, ServiceError> {
        self.record("list_archives:".to_string()).await;
        Ok(self.archives.read().await.values().cloned().collect())
    }

    async fn download_archive(&self, archive: &ArchiveInfo) -> Result<ByteStream, ServiceError> {
        self.record(format!("download_archive:{}", archive.id)).await;
        self.download_calls.fetch_add(1, Ordering::SeqCst);

        if let Some(error) = self.download_failures.write().await.pop_front() {
            return Err(error);
        }

        let body = Bytes::from(self.archive_body.read().await.clone());
        let mid = body.len() / 2;
        let chunks = vec![Ok(body.slice(..mid)), Ok(body.slice(mid..))];
        Ok(stream::iter(chunks).boxed())
    }
}

fn asset_info(id: AssetId, name: String, status: RemoteStatus) -> AssetInfo {
    AssetInfo {
        id,
        name,
        status,
        percent_complete: (status == RemoteStatus::Complete).then_some(100.0),
        date_added: None,
        description: None,
        asset_type: Some("3DTILES".to_string()),
    }
}
