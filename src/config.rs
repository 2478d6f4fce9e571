//! Configuration file handling.
//!
//! This module provides loading and saving of scanvault configuration
//! from a TOML file.
//!
//! # Configuration Location
//!
//! The configuration file is stored at:
//! - Linux: `~/.config/scanvault/config.toml`
//! - macOS: `~/Library/Application Support/scanvault/config.toml`
//! - Windows: `%APPDATA%\scanvault\config.toml`
//!
//! # Example Configuration
//!
//! ```toml
//! cache_ttl_days = 7
//! flatten_graph = true
//! project_key = "my-project"
//! watches = ["security-watch"]
//! default_format = "table"
//!
//! [exclude]
//! patterns = ["**/*{test,venv,node_modules,target}*"]
//! ```

use anyhow::Result;
use globset::{Glob, GlobBuilder, GlobSet, GlobSetBuilder};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::warn;

use crate::cache::DEFAULT_TTL_DAYS;
use crate::platform::config_dir;

/// Application configuration.
///
/// # Example
///
/// ```no_run
/// use scanvault::Config;
///
/// let config = Config::load().unwrap();
/// println!("Cached results expire after {} days", config.cache_ttl_days);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// How long scan results stay relevant, in days.
    ///
    /// Default: 7 days
    pub cache_ttl_days: u64,

    /// Send a flattened, deduplicated component list instead of the full
    /// dependency hierarchy.
    ///
    /// Default: true
    pub flatten_graph: bool,

    /// Project whose policies scope the graph scan. When set, only
    /// violations are returned.
    pub project_key: Option<String>,

    /// Watches scoping the graph scan.
    pub watches: Vec<String>,

    /// Output format of `status` when no `--format` flag is provided.
    ///
    /// Valid values: "table", "json"
    /// Default: "table"
    pub default_format: String,

    /// Descriptor paths skipped during discovery.
    #[serde(default)]
    pub exclude: ExcludeConfig,
}

/// Glob patterns of workspace paths that are never scanned.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExcludeConfig {
    /// Patterns matched against paths relative to the workspace root.
    ///
    /// `*` matches within one path segment, `**` across segments, and `{a,b}`
    /// matches either alternative.
    pub patterns: Vec<String>,
}

impl Default for ExcludeConfig {
    fn default() -> Self {
        Self {
            patterns: vec!["**/*{test,venv,node_modules,target}*".to_string()],
        }
    }
}

impl ExcludeConfig {
    /// Compiles the patterns once for repeated matching.
    ///
    /// Each pattern is also tried with a `**/` prefix so it matches at any
    /// depth. Invalid patterns are logged and skipped.
    pub fn matcher(&self) -> ExcludeMatcher {
        let mut builder = GlobSetBuilder::new();
        for pattern in &self.patterns {
            let normalized = pattern.replace('\\', "/");
            let glob = match compile_glob(&normalized) {
                Ok(glob) => glob,
                Err(e) => {
                    warn!(pattern = %pattern, error = %e, "Ignoring invalid exclude pattern");
                    continue;
                }
            };
            builder.add(glob);
            if !normalized.starts_with("**/") {
                if let Ok(prefixed) = compile_glob(&format!("**/{normalized}")) {
                    builder.add(prefixed);
                }
            }
        }
        let set = builder.build().unwrap_or_else(|e| {
            warn!(error = %e, "Failed to build exclude patterns, excluding nothing");
            GlobSet::empty()
        });
        ExcludeMatcher { set }
    }

    /// Check if a workspace-relative path should be skipped.
    pub fn should_exclude(&self, relative_path: &str) -> bool {
        self.matcher().is_match(relative_path)
    }
}

/// `*` never crosses a path separator; `**` does.
fn compile_glob(pattern: &str) -> Result<Glob, globset::Error> {
    GlobBuilder::new(pattern).literal_separator(true).build()
}

/// Compiled [`ExcludeConfig`] patterns.
#[derive(Debug, Clone)]
pub struct ExcludeMatcher {
    set: GlobSet,
}

impl ExcludeMatcher {
    /// True when the path, or any directory containing it, matches a pattern.
    pub fn is_match(&self, relative_path: &str) -> bool {
        let normalized = relative_path.replace('\\', "/");
        Path::new(normalized.trim_start_matches('/'))
            .ancestors()
            .filter(|path| !path.as_os_str().is_empty())
            .any(|path| self.set.is_match(path))
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            cache_ttl_days: DEFAULT_TTL_DAYS,
            flatten_graph: true,
            project_key: None,
            watches: Vec::new(),
            default_format: "table".to_string(),
            exclude: ExcludeConfig::default(),
        }
    }
}

impl Config {
    /// Loads configuration from the config file.
    ///
    /// If the config file doesn't exist, returns default configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file exists but cannot be read or parsed.
    pub fn load() -> Result<Self> {
        let path = Self::config_path();

        if !path.exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(&path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    /// Saves the configuration to the config file.
    ///
    /// Creates the parent directory if it doesn't exist.
    pub fn save(&self) -> Result<()> {
        let path = Self::config_path();

        if let Some(parent) = path.parent() {
            if !parent.exists() {
                fs::create_dir_all(parent)?;
            }
        }

        let content = toml::to_string_pretty(self)?;
        fs::write(&path, content)?;
        Ok(())
    }

    /// Returns the path to the configuration file.
    pub fn config_path() -> PathBuf {
        config_dir().join("config.toml")
    }

    /// Generates a string containing the default configuration.
    pub fn generate_default_config() -> String {
        let config = Config::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}
