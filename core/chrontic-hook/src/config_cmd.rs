//! `chrontic config` subcommands.

use chrontic_core::{config::default_config_path, ConfigError, Settings};
use std::path::{Path, PathBuf};

/// Redacted TOML of the effective settings (file plus env overrides).
pub fn show(path: Option<&Path>) -> Result<String, ConfigError> {
    let settings = Settings::load(path)?;
    let resolved = resolve(path)?;
    let body = toml::to_string_pretty(&settings.redacted())?;
    Ok(format!("# {}\n{}", resolved.display(), body))
}

/// Updates one key in the file. Env overrides are never written back.
pub fn set(path: Option<&Path>, key: &str, value: &str) -> Result<PathBuf, ConfigError> {
    let mut settings = Settings::load_file(path)?;
    settings.set(key, value)?;
    settings.validate()?;
    let saved = settings.save(path)?;
    tracing::info!(key, path = %saved.display(), "Setting updated");
    Ok(saved)
}

fn resolve(path: Option<&Path>) -> Result<PathBuf, ConfigError> {
    match path {
        Some(path) => Ok(path.to_path_buf()),
        None => default_config_path(),
    }
}
