use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use std::path::Path;

use super::{types::Config, ConfigError};

/// Config file picked up from the working directory when no path is given.
pub const DEFAULT_CONFIG_FILE: &str = "tilepush.toml";

/// Token variable understood by the original tooling.
const LEGACY_TOKEN_VAR: &str = "CESIUM_ION_TOKEN";

/// Load configuration with environment variable overrides.
///
/// Layers, lowest priority first: built-in defaults, the TOML file
/// (`path`, or `tilepush.toml` if present), `CESIUM_ION_TOKEN`, then
/// `TILEPUSH_*` variables with `__` between section and key
/// (`TILEPUSH_UPLOAD__WORKERS=8`).
pub fn load_config(path: Option<&Path>) -> Result<Config, ConfigError> {
    let toml = match path {
        Some(path) => {
            if !path.exists() {
                return Err(ConfigError::FileNotFound(path.display().to_string()));
            }
            Toml::file(path)
        }
        None => Toml::file(DEFAULT_CONFIG_FILE),
    };

    let config: Config = Figment::new()
        .merge(toml)
        .merge(
            Env::raw()
                .only(&[LEGACY_TOKEN_VAR])
                .map(|_| "ion.token".into()),
        )
        .merge(Env::prefixed("TILEPUSH_").split("__"))
        .extract()
        .map_err(|e| ConfigError::ParseError(e.to_string()))?;

    Ok(config)
}

/// Load configuration from TOML string (useful for testing)
pub fn load_config_from_str(toml_str: &str) -> Result<Config, ConfigError> {
    toml::from_str(toml_str).map_err(|e| ConfigError::ParseError(e.to_string()))
}
