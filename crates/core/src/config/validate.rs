use super::{types::Config, ConfigError};
use crate::tiles::TilesConfig;

/// Validate configuration
/// Currently validates:
/// - Token is present
/// - Worker and concurrency limits are at least 1
/// - Poll intervals and wait budgets (monitor and archive) are non-zero
/// - Retry attempts are within 1..=10
pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    if config.ion.token.trim().is_empty() {
        return Err(ConfigError::ValidationError(
            "ion.token is required (set CESIUM_ION_TOKEN or TILEPUSH_ION__TOKEN)".to_string(),
        ));
    }
    if config.ion.url.trim().is_empty() {
        return Err(ConfigError::ValidationError(
            "ion.url cannot be empty".to_string(),
        ));
    }
    if config.ion.timeout_secs == 0 || config.ion.download_timeout_secs == 0 {
        return Err(ConfigError::ValidationError(
            "ion timeouts must be greater than 0".to_string(),
        ));
    }

    if config.upload.workers == 0 {
        return Err(ConfigError::ValidationError(
            "upload.workers must be at least 1".to_string(),
        ));
    }
    if config.upload.extension.trim_start_matches('.').is_empty() {
        return Err(ConfigError::ValidationError(
            "upload.extension cannot be empty".to_string(),
        ));
    }

    if config.monitor.poll_interval_secs == 0 {
        return Err(ConfigError::ValidationError(
            "monitor.poll_interval_secs cannot be 0".to_string(),
        ));
    }
    if config.monitor.max_wait_secs == 0 {
        return Err(ConfigError::ValidationError(
            "monitor.max_wait_secs cannot be 0".to_string(),
        ));
    }
    if config.archive.poll_interval_secs == 0 {
        return Err(ConfigError::ValidationError(
            "archive.poll_interval_secs cannot be 0".to_string(),
        ));
    }
    if config.archive.max_wait_secs == 0 {
        return Err(ConfigError::ValidationError(
            "archive.max_wait_secs cannot be 0".to_string(),
        ));
    }
    if config.monitor.concurrency == 0 || config.archive.concurrency == 0 {
        return Err(ConfigError::ValidationError(
            "monitor.concurrency and archive.concurrency must be at least 1".to_string(),
        ));
    }

    if !(1..=10).contains(&config.retry.max_attempts) {
        return Err(ConfigError::ValidationError(format!(
            "retry.max_attempts must be between 1 and 10, got {}",
            config.retry.max_attempts
        )));
    }
    if config.retry.backoff_multiplier < 1.0 {
        return Err(ConfigError::ValidationError(
            "retry.backoff_multiplier must be at least 1.0".to_string(),
        ));
    }

    if let Some(tiles) = &config.tiles {
        validate_tiles(tiles)?;
    }

    Ok(())
}

/// Validate only what the pre-tiled artifact upload needs.
///
/// The tiling service token is not required here.
pub fn validate_tiles_config(config: &Config) -> Result<&TilesConfig, ConfigError> {
    let tiles = config.tiles.as_ref().ok_or_else(|| {
        ConfigError::ValidationError(
            "[tiles] section is required (at least tiles.bucket)".to_string(),
        )
    })?;
    validate_tiles(tiles)?;
    Ok(tiles)
}

fn validate_tiles(tiles: &TilesConfig) -> Result<(), ConfigError> {
    if tiles.bucket.trim().is_empty() {
        return Err(ConfigError::ValidationError(
            "tiles.bucket cannot be empty".to_string(),
        ));
    }
    if tiles.workers == 0 {
        return Err(ConfigError::ValidationError(
            "tiles.workers must be at least 1".to_string(),
        ));
    }
    Ok(())
}
