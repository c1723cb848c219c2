mod types;

pub use types::*;

use anyhow::{Context, Result};
use std::path::Path;

/// Load configuration from a TOML file
pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {:?}", path))?;

    let config: Config = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {:?}", path))?;

    validate_config(&config)?;

    Ok(config)
}

/// Load config from default locations or return default config
pub fn load_config_or_default(custom_path: Option<&Path>) -> Result<Config> {
    if let Some(path) = custom_path {
        return load_config(path);
    }

    let default_paths = [
        "./stowage.toml",
        "~/.config/stowage/config.toml",
        "/etc/stowage/config.toml",
    ];

    for path_str in default_paths {
        let path = shellexpand::tilde(path_str);
        let path = Path::new(path.as_ref());
        if path.exists() {
            return load_config(path);
        }
    }

    Ok(Config::default())
}

/// Validate configuration
pub fn validate_config(config: &Config) -> Result<()> {
    if config.notifier.publisher_id.trim().is_empty() {
        anyhow::bail!("notifier.publisher_id cannot be empty");
    }

    if config.notifier.bus_capacity == 0 {
        anyhow::bail!("notifier.bus_capacity must be at least 1");
    }

    if config.tasks.time_to_live_hours <= 0 {
        anyhow::bail!(
            "tasks.time_to_live_hours must be positive, got {}",
            config.tasks.time_to_live_hours
        );
    }

    if config.quota.user_storage_quota.limit() == Some(0) {
        tracing::warn!("user_storage_quota is 0: no image data can be stored");
    }

    Ok(())
}
