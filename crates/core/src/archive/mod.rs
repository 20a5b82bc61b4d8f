//! Archive creation and download for completed assets.

mod config;
mod manager;
mod writer;

pub use config::{ArchiveConfig, ExistingFilePolicy};
pub use manager::{ArchiveManager, ArchiveReport, ArchiveRequest, DownloadReport};
pub use writer::{part_path, write_stream, DownloadError};
