//! Upload of pre-tiled artifacts to an object store.
//!
//! Archives produced elsewhere (or downloaded by the archive stage) are
//! pushed to a bucket, tagged with the centroid of the area they cover.

mod centroid;
mod config;
mod store;
mod uploader;

pub use centroid::{Centroid, CentroidTable};
pub use config::TilesConfig;
pub use store::{ArtifactStore, S3ArtifactStore};
pub use uploader::{TileReport, TileUploader};

use std::path::PathBuf;
use thiserror::Error;

use crate::pool::PoolError;
use crate::upload::ScanError;

/// Errors raised by the artifact upload path.
#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error(transparent)]
    Scan(#[from] ScanError),

    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid centroid table: {0}")]
    Centroids(String),

    #[error("Object store error: {0}")]
    Store(String),

    #[error(transparent)]
    Pool(#[from] PoolError),
}
