use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Configuration for uploading pre-tiled archives to an object store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TilesConfig {
    /// Destination bucket.
    pub bucket: String,

    /// Key prefix; objects land under `<prefix>/<file name>`.
    #[serde(default = "default_prefix")]
    pub prefix: String,

    #[serde(default = "default_region")]
    pub region: String,

    /// Custom endpoint for S3-compatible stores (MinIO, Spaces, ...).
    #[serde(default)]
    pub endpoint: Option<String>,

    /// Directory scanned for `*.zip` artifacts.
    #[serde(default = "default_input_dir")]
    pub input_dir: PathBuf,

    /// Optional centroid table (`name,center_x,center_y`).
    #[serde(default)]
    pub centroids: Option<PathBuf>,

    /// Value of the `category` metadata entry.
    #[serde(default = "default_category")]
    pub category: String,

    /// Concurrent object uploads.
    #[serde(default = "default_workers")]
    pub workers: usize,
}

fn default_prefix() -> String {
    "3d-tiles".to_string()
}

fn default_region() -> String {
    "us-east-1".to_string()
}

fn default_input_dir() -> PathBuf {
    PathBuf::from("converted")
}

fn default_category() -> String {
    "building".to_string()
}

fn default_workers() -> usize {
    4
}

impl TilesConfig {
    pub fn new(bucket: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            prefix: default_prefix(),
            region: default_region(),
            endpoint: None,
            input_dir: default_input_dir(),
            centroids: None,
            category: default_category(),
            workers: default_workers(),
        }
    }

    pub fn with_input_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.input_dir = dir.into();
        self
    }

    pub fn with_centroids(mut self, path: impl Into<PathBuf>) -> Self {
        self.centroids = Some(path.into());
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    /// Object key for an artifact file name.
    pub fn key_for(&self, file_name: &str) -> String {
        let prefix = self.prefix.trim_matches('/');
        if prefix.is_empty() {
            file_name.to_string()
        } else {
            format!("{prefix}/{file_name}")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_toml() {
        let config: TilesConfig = toml::from_str(r#"bucket = "tiles""#).unwrap();
        assert_eq!(config.prefix, "3d-tiles");
        assert_eq!(config.region, "us-east-1");
        assert_eq!(config.category, "building");
        assert_eq!(config.workers, 4);
        assert!(config.centroids.is_none());
    }

    #[test]
    fn test_key_for() {
        let mut config = TilesConfig::new("b");
        assert_eq!(config.key_for("a.zip"), "3d-tiles/a.zip");
        config.prefix = "/nested/dir/".into();
        assert_eq!(config.key_for("a.zip"), "nested/dir/a.zip");
        config.prefix = String::new();
        assert_eq!(config.key_for("a.zip"), "a.zip");
    }
}
