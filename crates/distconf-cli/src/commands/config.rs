//! Keeper configuration loading

use anyhow::{Context, Result};
use distconf_core::KeeperConfig;
use std::path::Path;

/// Load the keeper config from `path` (or defaults), then apply environment overrides
pub fn load_keeper_config(path: Option<&Path>) -> Result<KeeperConfig> {
    let mut config = match path {
        Some(path) => KeeperConfig::load_from_file(path)
            .with_context(|| format!("loading keeper config from {}", path.display()))?,
        None => KeeperConfig::default(),
    };
    config
        .merge_with_env()
        .context("applying DISTCONF_* overrides")?;
    tracing::debug!(?config, "keeper config loaded");
    Ok(config)
}

/// Print the default configuration as TOML
pub fn print_default_config() -> Result<()> {
    let rendered = KeeperConfig::default().to_toml_string()?;
    print!("{rendered}");
    Ok(())
}
