//! Core library for tilepush.
//!
//! Uploads source files to a cloud 3D-tiling service, follows server-side
//! processing, and fetches the resulting archives. Pre-tiled artifacts can
//! be pushed straight to an object store.

pub mod archive;
pub mod clock;
pub mod config;
pub mod context;
pub mod model;
pub mod monitor;
pub mod pipeline;
pub mod pool;
pub mod service;
pub mod testing;
pub mod tiles;
pub mod upload;

pub use archive::{
    ArchiveConfig, ArchiveManager, ArchiveReport, ArchiveRequest, DownloadError, DownloadReport,
    ExistingFilePolicy,
};
pub use clock::{Clock, TokioClock};
pub use config::{
    load_config, load_config_from_str, validate_config, validate_tiles_config, Config,
    ConfigError, IonConfig, SanitizedConfig, UploadConfig,
};
pub use context::RunContext;
pub use model::{
    ArchiveRecord, ArchiveStatus, AssetStatus, BatchResult, ErrorKind, FailureDetail,
    ItemOutcome, ModelError, Outcome, Stage, UploadItem,
};
pub use monitor::{MonitorConfig, MonitorReport, PollSettings, ProcessingMonitor};
pub use pipeline::{Pipeline, PipelineError, StageSelection};
pub use pool::{PoolError, PoolStatus, TaskOutcome, WorkerPool};
pub use service::{
    ArchiveInfo, AssetId, AssetInfo, ArchiveId, CreateAssetRequest, CreatedAsset, IonClient,
    RemoteStatus, RetryConfig, RetryPolicy, RetryingService, ServiceError, TilingService,
};
pub use tiles::{
    ArtifactError, ArtifactStore, CentroidTable, S3ArtifactStore, TileReport, TileUploader,
    TilesConfig,
};
pub use upload::{scan_input_dir, run_upload_task, ScanError, UploadOptions, UploadReport};
