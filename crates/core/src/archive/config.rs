//! Archive stage configuration.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::monitor::PollSettings;

/// What to do when the destination file already exists.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExistingFilePolicy {
    /// Keep the file and skip the download entirely.
    #[default]
    Skip,
    /// Download again and replace the file.
    Overwrite,
}

/// Configuration for archive creation and download.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchiveConfig {
    /// Directory archives are written to.
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,

    /// Policy for destinations that already exist.
    #[serde(default)]
    pub existing: ExistingFilePolicy,

    /// Archives created or downloaded concurrently.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// How often to poll archive readiness (seconds).
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,

    /// Wait budget for one archive to become ready (seconds).
    #[serde(default = "default_max_wait")]
    pub max_wait_secs: u64,
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("converted")
}

fn default_concurrency() -> usize {
    2
}

fn default_poll_interval() -> u64 {
    10
}

fn default_max_wait() -> u64 {
    900
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
            existing: ExistingFilePolicy::default(),
            concurrency: default_concurrency(),
            poll_interval_secs: default_poll_interval(),
            max_wait_secs: default_max_wait(),
        }
    }
}

impl ArchiveConfig {
    pub fn with_output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = dir.into();
        self
    }

    pub fn with_existing(mut self, policy: ExistingFilePolicy) -> Self {
        self.existing = policy;
        self
    }

    pub fn settings(&self) -> PollSettings {
        PollSettings::new(
            Duration::from_secs(self.poll_interval_secs),
            Duration::from_secs(self.max_wait_secs),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ArchiveConfig::default();
        assert_eq!(config.output_dir, PathBuf::from("converted"));
        assert_eq!(config.existing, ExistingFilePolicy::Skip);
        assert_eq!(config.concurrency, 2);
    }

    #[test]
    fn test_deserialize_policy() {
        let config: ArchiveConfig = toml::from_str(r#"existing = "overwrite""#).unwrap();
        assert_eq!(config.existing, ExistingFilePolicy::Overwrite);
        assert!(toml::from_str::<ArchiveConfig>(r#"existing = "append""#).is_err());
    }
}
