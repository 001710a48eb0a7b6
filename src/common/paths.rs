//! Configuration, log and report locations
//!
//! Uses the directories crate for platform-appropriate locations:
//! - Linux: `~/.config/dss-qualifier/`, `~/.local/share/dss-qualifier/`
//! - macOS: `~/Library/Application Support/dss-qualifier/`
//! - Windows: `%APPDATA%\dss-qualifier\`

use std::io;
use std::path::PathBuf;

/// Application name used for all directories
const APP_NAME: &str = "dss-qualifier";

fn project_dirs() -> Option<directories::ProjectDirs> {
    directories::ProjectDirs::from("", "", APP_NAME)
}

/// Get the configuration directory path
pub fn config_dir() -> Option<PathBuf> {
    project_dirs().map(|dirs| dirs.config_dir().to_path_buf())
}

/// Get the path to the configuration file
pub fn config_path() -> Option<PathBuf> {
    config_dir().map(|dir| dir.join("config.toml"))
}

/// Get the path to the log directory
pub fn log_dir() -> Option<PathBuf> {
    project_dirs().map(|dirs| dirs.data_dir().join("logs"))
}

/// Get the directory where reports are written when no path is given
pub fn report_dir() -> Option<PathBuf> {
    project_dirs().map(|dirs| dirs.data_dir().join("reports"))
}

/// Ensure the given directory exists
pub fn ensure_dir(dir: &std::path::Path) -> io::Result<()> {
    if !dir.exists() {
        std::fs::create_dir_all(dir)?;
    }
    Ok(())
}
