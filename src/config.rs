use std::path::{Path, PathBuf};

use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use grapefruit_models::{Config, GrapefruitError};

/// Used when no `--config` is given and the file exists.
pub const DEFAULT_CONFIG_PATH: &str = "configs/default.toml";
pub const ENV_PREFIX: &str = "GRAPEFRUIT_";

/// Layers, lowest priority first: built-in defaults, the TOML file,
/// `GRAPEFRUIT_` environment variables (`__` separates sections).
pub fn figment(config_path: Option<&Path>) -> Figment {
    let file = config_path
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH));

    Figment::from(Serialized::defaults(Config::default()))
        .merge(Toml::file(file))
        .merge(Env::prefixed(ENV_PREFIX).split("__"))
}

/// Loads the configuration. An explicit `config_path` must exist.
/// `DATABASE_URL` wins over `storage.db_url` from any layer.
pub fn load_config(config_path: Option<&Path>) -> Result<Config, GrapefruitError> {
    if let Some(path) = config_path {
        if !path.exists() {
            return Err(GrapefruitError::ConfigError {
                reason: format!("config file {} does not exist", path.display()),
            });
        }
    }

    let mut config: Config = figment(config_path)
        .extract()
        .map_err(|e| GrapefruitError::ConfigError { reason: e.to_string() })?;

    if let Ok(url) = std::env::var("DATABASE_URL") {
        config.storage.db_url = url;
    }
    Ok(config)
}
