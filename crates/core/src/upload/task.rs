use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::UploadConfig;
use crate::context::RunContext;
use crate::model::{AssetStatus, ErrorKind, FailureDetail, Stage, UploadItem};
use crate::service::{CreateAssetRequest, ServiceError, TilingService};

/// Asset parameters sent with every upload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadOptions {
    pub asset_type: String,
    pub source_type: String,
}

impl Default for UploadOptions {
    fn default() -> Self {
        Self::from_config(&UploadConfig::default())
    }
}

impl UploadOptions {
    pub fn from_config(config: &UploadConfig) -> Self {
        Self {
            asset_type: config.asset_type.clone(),
            source_type: config.source_type.clone(),
        }
    }

    fn request_for(&self, item: &UploadItem) -> CreateAssetRequest {
        CreateAssetRequest::new(item.name())
            .with_description(format!("Uploaded source file: {}", item.file_name()))
            .with_types(&self.asset_type, &self.source_type)
    }
}

/// What happened to one item in the upload stage.
#[derive(Debug, Clone)]
pub struct UploadReport {
    pub item: UploadItem,
    pub failure: Option<FailureDetail>,
}

impl UploadReport {
    pub fn is_uploaded(&self) -> bool {
        self.failure.is_none() && self.item.status() == AssetStatus::Processing
    }
}

/// Create the asset for one item and upload its file.
///
/// On success the item is `Processing`. On failure it is `Failed` and the
/// report carries the error. An auth error also aborts the run.
pub async fn run_upload_task(
    service: &dyn TilingService,
    mut item: UploadItem,
    options: &UploadOptions,
    ctx: &RunContext,
) -> UploadReport {
    if ctx.is_cancelled() {
        return UploadReport {
            item,
            failure: Some(FailureDetail::new(
                Stage::Upload,
                ErrorKind::Interrupted,
                "run cancelled before upload",
            )),
        };
    }

    match tokio::fs::metadata(item.path()).await {
        Ok(meta) if meta.is_file() => {}
        Ok(_) => {
            let message = format!("{} is not a regular file", item.path().display());
            return fail(item, ErrorKind::InvalidInput, message);
        }
        Err(e) => {
            let message = format!("cannot read {}: {e}", item.path().display());
            return fail(item, ErrorKind::InvalidInput, message);
        }
    }

    debug!(file = %item.path().display(), name = %item.name(), "Creating asset");
    let created = match service.create_asset(&options.request_for(&item)).await {
        Ok(created) => created,
        Err(e) => return service_failure(item, e, ctx),
    };

    if let Err(e) = item.assign_asset(created.id) {
        return fail(item, ErrorKind::InvalidInput, e.to_string());
    }
    if let Err(e) = item.transition(AssetStatus::Uploading) {
        return fail(item, ErrorKind::InvalidInput, e.to_string());
    }

    if let Err(e) = service.upload_payload(&created, item.path()).await {
        return service_failure(item, e, ctx);
    }
    if let Err(e) = item.transition(AssetStatus::Processing) {
        return fail(item, ErrorKind::InvalidInput, e.to_string());
    }

    info!(
        file = %item.file_name(),
        asset_id = created.id,
        "Uploaded, processing started"
    );
    UploadReport {
        item,
        failure: None,
    }
}

fn service_failure(item: UploadItem, error: ServiceError, ctx: &RunContext) -> UploadReport {
    if error.is_auth() {
        ctx.abort(error.to_string());
    }
    fail(item, error.kind(), error.to_string())
}

fn fail(mut item: UploadItem, kind: ErrorKind, message: String) -> UploadReport {
    warn!(file = %item.file_name(), kind = %kind, error = %message, "Upload failed");
    // Pending and Uploading can always move to Failed.
    let _ = item.transition(AssetStatus::Failed);
    UploadReport {
        item,
        failure: Some(FailureDetail::new(Stage::Upload, kind, message)),
    }
}
