// Configuration loader
// Loads ~/.codecast/config.toml, then applies environment overrides

use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

use super::constants::CONFIG_FILE_NAME;
use super::settings::{default_data_dir, Config};

/// Load configuration from an explicit path or the default location.
///
/// A missing file is not an error: defaults plus environment overrides are
/// returned. A present but malformed file is.
pub fn load_config(path: Option<&Path>) -> Result<Config> {
    let config_path = path
        .map(Path::to_path_buf)
        .unwrap_or_else(default_config_path);

    let mut config = if config_path.exists() {
        let contents = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;
        toml::from_str::<Config>(&contents)
            .with_context(|| format!("Failed to parse config file: {}", config_path.display()))?
    } else {
        tracing::debug!(
            "No config file at {}, using defaults",
            config_path.display()
        );
        Config::default()
    };

    apply_env_overrides(&mut config, |key| std::env::var(key).ok());
    config.validate().context("Invalid configuration")?;

    Ok(config)
}

pub fn default_config_path() -> PathBuf {
    default_data_dir().join(CONFIG_FILE_NAME)
}

/// Apply environment overrides. `lookup` is injectable for tests.
pub(crate) fn apply_env_overrides<F>(config: &mut Config, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

    if let Some(key) = non_empty("CODECAST_API_KEY").or_else(|| non_empty("OPENAI_API_KEY")) {
        config.generation.api_key = key;
    }
    if let Some(url) = non_empty("CODECAST_BASE_URL") {
        config.generation.base_url = url;
    }
    if let Some(model) = non_empty("CODECAST_MODEL") {
        config.generation.model = model;
    }
    if let Some(dir) = non_empty("CODECAST_DATA_DIR") {
        config.storage.data_dir = PathBuf::from(dir);
    }
}
