//! Per-item state tracked across the upload workflow.
//!
//! An [`UploadItem`] moves forward through [`AssetStatus`]; the stages report
//! into [`ItemOutcome`] slots which are folded into a [`BatchResult`] once
//! the run ends.

mod item;
mod result;
mod status;

pub use item::UploadItem;
pub use result::{
    ArchiveRecord, ArchiveStatus, BatchResult, ErrorKind, FailureDetail, ItemOutcome, Outcome,
    Stage,
};
pub use status::AssetStatus;

use std::path::PathBuf;
use thiserror::Error;

/// Violations of the item state invariants.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ModelError {
    #[error("invalid status transition from {from} to {to}")]
    InvalidTransition { from: AssetStatus, to: AssetStatus },

    #[error("item {0} has no asset id")]
    MissingAssetId(PathBuf),

    #[error("item {path} already has asset id {asset_id}")]
    AssetAlreadyAssigned { path: PathBuf, asset_id: u64 },

    #[error("asset {asset_id} is {status}, archives need a complete asset")]
    AssetNotComplete { asset_id: u64, status: AssetStatus },
}
