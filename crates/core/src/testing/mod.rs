//! Testing utilities and mock implementations.
//!
//! Mocks for every external collaborator (tiling service, object store,
//! clock), so the whole workflow can be exercised without network access or
//! real waiting.
//!
//! # Example
//!
//! ```rust,ignore
//! use tilepush_core::testing::{MockClock, MockTilingService};
//!
//! let service = Arc::new(MockTilingService::new());
//! let clock = Arc::new(MockClock::new());
//! let ctx = RunContext::with_clock(clock.clone());
//!
//! service.push_status(1, RemoteStatus::InProgress).await;
//! // ... run a stage with `service` and `ctx` ...
//! assert_eq!(clock.elapsed(), Duration::from_secs(30));
//! ```

mod mock_clock;
mod mock_service;
mod mock_store;

pub use mock_clock::MockClock;
pub use mock_service::MockTilingService;
pub use mock_store::{MockArtifactStore, StoredObject};

/// Test fixtures and helper functions.
pub mod fixtures {
    use std::path::{Path, PathBuf};

    use crate::config::Config;
    use crate::model::{AssetStatus, UploadItem};

    /// Write one small source file per name into `dir`.
    pub fn source_files(dir: &Path, names: &[&str]) -> Vec<PathBuf> {
        names
            .iter()
            .map(|name| {
                let path = dir.join(name);
                std::fs::write(&path, b"<core:CityModel/>").expect("write fixture file");
                path
            })
            .collect()
    }

    /// An item that went through upload and is being processed remotely.
    pub fn processing_item(path: impl Into<PathBuf>, asset_id: u64) -> UploadItem {
        let mut item = UploadItem::new(path);
        item.assign_asset(asset_id).expect("fresh item");
        item.transition(AssetStatus::Uploading).expect("pending -> uploading");
        item.transition(AssetStatus::Processing).expect("uploading -> processing");
        item
    }

    /// A valid configuration with a placeholder token.
    pub fn config() -> Config {
        let mut config = Config::default();
        config.ion.token = "test-token".to_string();
        config
    }
}
