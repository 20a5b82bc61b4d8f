//! Source discovery and the per-item upload task.

mod scan;
mod task;

pub use scan::{scan_input_dir, ScanError};
pub use task::{run_upload_task, UploadOptions, UploadReport};
