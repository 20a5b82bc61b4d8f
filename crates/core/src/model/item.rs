use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::{AssetStatus, ModelError};

/// One local file on its way to the tiling service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadItem {
    path: PathBuf,
    name: String,
    asset_id: Option<u64>,
    status: AssetStatus,
}

impl UploadItem {
    /// Create a pending item; the asset name is the file stem.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let name = path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| path.to_string_lossy().to_string());

        Self {
            path,
            name,
            asset_id: None,
            status: AssetStatus::Pending,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn asset_id(&self) -> Option<u64> {
        self.asset_id
    }

    pub fn status(&self) -> AssetStatus {
        self.status
    }

    /// File name including extension, for display and upload keys.
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| self.name.clone())
    }

    /// Record the identifier returned by asset creation. Set once.
    pub fn assign_asset(&mut self, asset_id: u64) -> Result<(), ModelError> {
        if let Some(existing) = self.asset_id {
            return Err(ModelError::AssetAlreadyAssigned {
                path: self.path.clone(),
                asset_id: existing,
            });
        }
        self.asset_id = Some(asset_id);
        Ok(())
    }

    /// Move the item forward. `Uploading` and later non-failure states need an
    /// asset id.
    pub fn transition(&mut self, next: AssetStatus) -> Result<(), ModelError> {
        if !self.status.can_transition_to(next) {
            return Err(ModelError::InvalidTransition {
                from: self.status,
                to: next,
            });
        }
        let needs_asset = matches!(
            next,
            AssetStatus::Uploading | AssetStatus::Processing | AssetStatus::Complete
        );
        if needs_asset && self.asset_id.is_none() {
            return Err(ModelError::MissingAssetId(self.path.clone()));
        }
        self.status = next;
        Ok(())
    }
}
