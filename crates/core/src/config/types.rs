use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::archive::ArchiveConfig;
use crate::monitor::MonitorConfig;
use crate::service::RetryConfig;
use crate::tiles::TilesConfig;

/// Root configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub ion: IonConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub upload: UploadConfig,
    #[serde(default)]
    pub monitor: MonitorConfig,
    #[serde(default)]
    pub archive: ArchiveConfig,
    /// Pre-tiled artifact upload (required by `tiles` only)
    #[serde(default)]
    pub tiles: Option<TilesConfig>,
}

/// Cesium ion API configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct IonConfig {
    /// API base URL (default: "https://api.cesium.com")
    #[serde(default = "default_ion_url")]
    pub url: String,
    /// Access token, usually supplied through `CESIUM_ION_TOKEN`
    #[serde(default)]
    pub token: String,
    /// Request timeout in seconds (default: 30)
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
    /// Archive download timeout in seconds (default: 600)
    #[serde(default = "default_download_timeout")]
    pub download_timeout_secs: u64,
}

impl Default for IonConfig {
    fn default() -> Self {
        Self {
            url: default_ion_url(),
            token: String::new(),
            timeout_secs: default_timeout(),
            download_timeout_secs: default_download_timeout(),
        }
    }
}

fn default_ion_url() -> String {
    "https://api.cesium.com".to_string()
}

fn default_timeout() -> u64 {
    30
}

fn default_download_timeout() -> u64 {
    600
}

/// Source upload configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct UploadConfig {
    /// Directory scanned for source files (default: "data")
    #[serde(default = "default_input_dir")]
    pub input_dir: PathBuf,
    /// Source file extension, without the dot (default: "gml")
    #[serde(default = "default_extension")]
    pub extension: String,
    /// Concurrent upload tasks (default: 5)
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Output asset type (default: "3DTILES")
    #[serde(default = "default_asset_type")]
    pub asset_type: String,
    /// Source type hint for the tiler (default: "CITYGML")
    #[serde(default = "default_source_type")]
    pub source_type: String,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            input_dir: default_input_dir(),
            extension: default_extension(),
            workers: default_workers(),
            asset_type: default_asset_type(),
            source_type: default_source_type(),
        }
    }
}

fn default_input_dir() -> PathBuf {
    PathBuf::from("data")
}

fn default_extension() -> String {
    "gml".to_string()
}

fn default_workers() -> usize {
    5
}

fn default_asset_type() -> String {
    "3DTILES".to_string()
}

fn default_source_type() -> String {
    "CITYGML".to_string()
}

/// Sanitized config for logging (secrets redacted)
#[derive(Debug, Clone, Serialize)]
pub struct SanitizedConfig {
    pub ion: SanitizedIonConfig,
    pub retry: RetryConfig,
    pub upload: UploadConfig,
    pub monitor: MonitorConfig,
    pub archive: ArchiveConfig,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tiles: Option<TilesConfig>,
}

/// Sanitized ion config (token hidden)
#[derive(Debug, Clone, Serialize)]
pub struct SanitizedIonConfig {
    pub url: String,
    pub token_configured: bool,
    pub timeout_secs: u64,
    pub download_timeout_secs: u64,
}

impl From<&Config> for SanitizedConfig {
    fn from(config: &Config) -> Self {
        Self {
            ion: SanitizedIonConfig {
                url: config.ion.url.clone(),
                token_configured: !config.ion.token.trim().is_empty(),
                timeout_secs: config.ion.timeout_secs,
                download_timeout_secs: config.ion.download_timeout_secs,
            },
            retry: config.retry.clone(),
            upload: config.upload.clone(),
            monitor: config.monitor.clone(),
            archive: config.archive.clone(),
            tiles: config.tiles.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::ExistingFilePolicy;

    #[test]
    fn test_deserialize_empty_config_uses_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.ion.url, "https://api.cesium.com");
        assert!(config.ion.token.is_empty());
        assert_eq!(config.upload.workers, 5);
        assert_eq!(config.upload.extension, "gml");
        assert_eq!(config.upload.input_dir, PathBuf::from("data"));
        assert_eq!(config.monitor.poll_interval_secs, 30);
        assert_eq!(config.monitor.max_wait_secs, 1800);
        assert_eq!(config.archive.output_dir, PathBuf::from("converted"));
        assert_eq!(config.retry.max_attempts, 4);
        assert!(config.tiles.is_none());
    }

    #[test]
    fn test_deserialize_sections() {
        let toml = r#"
[ion]
url = "http://localhost:8080"
token = "abc"

[upload]
input_dir = "/srv/gml"
workers = 8

[monitor]
poll_interval_secs = 10

[archive]
output_dir = "out"
existing = "overwrite"

[tiles]
bucket = "city-tiles"
centroids = "centroid.csv"
"#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.ion.url, "http://localhost:8080");
        assert_eq!(config.ion.token, "abc");
        assert_eq!(config.ion.timeout_secs, 30); // default
        assert_eq!(config.upload.workers, 8);
        assert_eq!(config.monitor.poll_interval_secs, 10);
        assert_eq!(config.monitor.max_wait_secs, 1800); // default
        assert_eq!(config.archive.existing, ExistingFilePolicy::Overwrite);

        let tiles = config.tiles.unwrap();
        assert_eq!(tiles.bucket, "city-tiles");
        assert_eq!(tiles.prefix, "3d-tiles");
        assert_eq!(tiles.centroids, Some(PathBuf::from("centroid.csv")));
    }

    #[test]
    fn test_sanitized_config_hides_token() {
        let mut config = Config::default();
        config.ion.token = "super-secret".to_string();

        let sanitized = SanitizedConfig::from(&config);
        assert!(sanitized.ion.token_configured);

        let json = serde_json::to_string(&sanitized).unwrap();
        assert!(!json.contains("super-secret"));
        assert!(json.contains("token_configured"));
    }

    #[test]
    fn test_sanitized_config_without_token() {
        let sanitized = SanitizedConfig::from(&Config::default());
        assert!(!sanitized.ion.token_configured);
        assert!(sanitized.tiles.is_none());
    }
}
