//! Cross-platform path resolution.
//!
//! Locations of the persisted scan store and the configuration file, and the
//! canonical form of a workspace path used as part of cache keys.

use std::path::{Path, PathBuf};

const APP_DIR: &str = "scanvault";

/// Returns the directory holding persisted scan results.
///
/// Platform-specific locations:
/// - Linux: `~/.cache/scanvault/`
/// - macOS: `~/Library/Caches/scanvault/`
/// - Windows: `%LOCALAPPDATA%\scanvault\`
///
/// Falls back to the system temp directory if no cache directory can be determined.
pub fn cache_dir() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(APP_DIR)
}

/// Returns the directory holding `config.toml`.
///
/// Falls back to the current directory.
pub fn config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_DIR)
}

/// Absolute form of a workspace path.
///
/// Relative paths are resolved against the current directory without touching
/// the filesystem, so the same workspace maps to the same string whether or
/// not it still exists. Rebuilding from components drops trailing separators
/// and `.` segments.
pub fn absolute_workspace_path(workspace: &Path) -> PathBuf {
    std::path::absolute(workspace)
        .unwrap_or_else(|_| workspace.to_path_buf())
        .components()
        .collect()
}
