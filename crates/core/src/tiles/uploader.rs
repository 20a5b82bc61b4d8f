use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use bytes::Bytes;
use sha2::{Digest, Sha256};
use tracing::{info, warn};

use crate::context::RunContext;
use crate::pool::{TaskOutcome, WorkerPool};
use crate::upload::scan_input_dir;

use super::{ArtifactError, ArtifactStore, CentroidTable, TilesConfig};

/// Result of uploading one pre-tiled artifact.
#[derive(Debug, Clone)]
pub struct TileReport {
    pub path: PathBuf,
    /// Object key, set once the upload was attempted.
    pub key: Option<String>,
    pub error: Option<String>,
    /// The run was cancelled before this artifact was started.
    pub skipped: bool,
}

impl TileReport {
    pub fn is_success(&self) -> bool {
        self.error.is_none() && !self.skipped
    }

    pub fn is_failed(&self) -> bool {
        self.error.is_some()
    }

    fn failed(path: PathBuf, key: Option<String>, error: impl Into<String>) -> Self {
        Self {
            path,
            key,
            error: Some(error.into()),
            skipped: false,
        }
    }

    fn skipped(path: PathBuf) -> Self {
        Self {
            path,
            key: None,
            error: None,
            skipped: true,
        }
    }
}

/// Uploads `*.zip` artifacts with centroid metadata.
#[derive(Clone)]
pub struct TileUploader {
    store: Arc<dyn ArtifactStore>,
    config: TilesConfig,
}

impl TileUploader {
    pub fn new(store: Arc<dyn ArtifactStore>, config: TilesConfig) -> Self {
        Self { store, config }
    }

    pub fn config(&self) -> &TilesConfig {
        &self.config
    }

    /// Upload every artifact in the configured input directory.
    ///
    /// Scan and centroid-table errors fail the whole call; per-file errors
    /// are reported in the returned list.
    pub async fn run(&self, ctx: &RunContext) -> Result<Vec<TileReport>, ArtifactError> {
        let files = scan_input_dir(&self.config.input_dir, "zip").await?;
        let centroids = match &self.config.centroids {
            Some(path) => Some(Arc::new(CentroidTable::load(path).await?)),
            None => None,
        };
        info!(
            files = files.len(),
            centroids = centroids.as_ref().map(|t| t.len()),
            bucket = %self.config.bucket,
            "Uploading pre-tiled artifacts"
        );

        let pool = WorkerPool::new("tiles", self.config.workers)?;
        let uploader = self.clone();
        let task_ctx = ctx.clone();

        let outcomes = pool
            .run(files, ctx, move |path| {
                let uploader = uploader.clone();
                let centroids = centroids.clone();
                let ctx = task_ctx.clone();
                async move {
                    uploader
                        .upload_one(path, centroids.as_deref(), &ctx)
                        .await
                }
            })
            .await;

        Ok(outcomes
            .into_iter()
            .map(|outcome| match outcome {
                TaskOutcome::Completed(report) => report,
                TaskOutcome::Skipped(path) => TileReport::skipped(path),
                TaskOutcome::Failed { item, message } => TileReport::failed(item, None, message),
            })
            .collect())
    }

    async fn upload_one(
        &self,
        path: PathBuf,
        centroids: Option<&CentroidTable>,
        ctx: &RunContext,
    ) -> TileReport {
        if ctx.is_cancelled() {
            return TileReport::skipped(path);
        }

        let Some(file_name) = path.file_name().map(|n| n.to_string_lossy().to_string()) else {
            return TileReport::failed(path, None, "path has no file name");
        };
        let stem = file_stem(&path);

        let mut metadata = HashMap::new();
        metadata.insert("category".to_string(), self.config.category.clone());
        if let Some(table) = centroids {
            let Some(row) = table.find(&stem) else {
                warn!(file = %file_name, "No matching centroid entry");
                return TileReport::failed(path, None, "no matching centroid entry");
            };
            metadata.insert("name".to_string(), row.name.clone());
            metadata.insert("center_x".to_string(), row.center_x.clone());
            metadata.insert("center_y".to_string(), row.center_y.clone());
        } else {
            metadata.insert("name".to_string(), stem);
        }

        let body = match tokio::fs::read(&path).await {
            Ok(data) => Bytes::from(data),
            Err(e) => return TileReport::failed(path, None, format!("read failed: {e}")),
        };
        metadata.insert(
            "sha256".to_string(),
            format!("{:x}", Sha256::digest(&body)),
        );

        let key = self.config.key_for(&file_name);
        match self
            .store
            .put_object(&self.config.bucket, &key, body, &metadata)
            .await
        {
            Ok(()) => {
                info!(file = %file_name, key = %key, "Artifact uploaded");
                TileReport {
                    path,
                    key: Some(key),
                    error: None,
                    skipped: false,
                }
            }
            Err(e) => {
                warn!(file = %file_name, error = %e, "Artifact upload failed");
                TileReport::failed(path, Some(key), e.to_string())
            }
        }
    }
}

fn file_stem(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default()
}
