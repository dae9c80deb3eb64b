//! Configuration and log locations

use std::io;
use std::path::{Path, PathBuf};

/// Project name used for platform directories
const APP_NAME: &str = "rsipp";

/// Get the configuration directory path
///
/// Uses the directories crate for platform-appropriate locations:
/// - Linux: `~/.config/rsipp/`
/// - macOS: `~/Library/Application Support/rsipp/`
/// - Windows: `%APPDATA%\rsipp\`
pub fn config_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", APP_NAME).map(|dirs| dirs.config_dir().to_path_buf())
}

/// Get the path to the configuration file
pub fn config_path() -> Option<PathBuf> {
    config_dir().map(|dir| dir.join("config.toml"))
}

/// Directory agent logs go to when nothing else is configured
pub fn default_logdir() -> PathBuf {
    std::env::temp_dir()
}

/// Create a log directory if needed and return it
pub fn ensure_logdir(dir: &Path) -> io::Result<PathBuf> {
    if !dir.exists() {
        std::fs::create_dir_all(dir)?;
    }
    Ok(dir.to_path_buf())
}
