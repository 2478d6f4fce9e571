//! Persistent per-workspace cache of scan results.
//!
//! [`IssuesCache`] maps a workspace to the last [`ScanResults`] recorded for
//! it. Entries live in a [`KeyValueStore`] under the key
//! `scanvault.cache.issues.<absolute workspace path>` and are serialized as
//! JSON. Freshness is enforced lazily: a read through
//! [`IssuesCache::get_or_clear_if_not_relevant`] evicts results whose oldest
//! scan is older than the TTL (7 days by default).
//!
//! # Cache Location
//!
//! The default [`FileStore`] keeps one JSON file per key in:
//! - Linux: `~/.cache/scanvault/`
//! - macOS: `~/Library/Caches/scanvault/`
//! - Windows: `%LOCALAPPDATA%\scanvault\`
//!
//! # Example
//!
//! ```
//! use scanvault::cache::{IssuesCache, MemoryStore};
//! use scanvault::model::ScanResults;
//! use std::path::Path;
//!
//! let cache = IssuesCache::with_store(MemoryStore::default());
//! let workspace = Path::new("/home/dev/project");
//!
//! cache.store(workspace, &ScanResults::new("/home/dev/project")).unwrap();
//! assert!(cache.contains(workspace));
//! assert!(cache.get(workspace).is_some());
//! ```

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, info, warn};

use crate::model::{ScanResults, Timestamp};
use crate::platform::{absolute_workspace_path, cache_dir};

/// Default freshness window in days.
pub const DEFAULT_TTL_DAYS: u64 = 7;

/// Persistent string storage with last-write-wins semantics per key.
pub trait KeyValueStore: Send + Sync {
    /// All keys currently holding a value.
    fn keys(&self) -> Vec<String>;

    fn get(&self, key: &str) -> Option<String>;

    /// Replaces the value of `key`, or deletes it when `value` is `None`.
    ///
    /// Deleting an absent key succeeds.
    fn update(&self, key: &str, value: Option<&str>) -> Result<()>;
}

/// A [`KeyValueStore`] keeping one JSON file per key.
///
/// Files are named after the SHA-256 digest of their key, so any key fits in a
/// file name, and hold the key next to the value so [`KeyValueStore::keys`]
/// can return it. Writes go to a temporary file first and are moved into
/// place, so readers never see a partially written value.
pub struct FileStore {
    dir: PathBuf,
}

#[derive(Serialize, Deserialize)]
struct StoredEntry {
    key: String,
    value: String,
}

impl FileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn ensure_dir(&self) -> Result<()> {
        if !self.dir.exists() {
            fs::create_dir_all(&self.dir)?;
        }
        Ok(())
    }

    fn entry_path(&self, key: &str) -> PathBuf {
        let mut hasher = Sha256::new();
        hasher.update(key.as_bytes());
        let digest = hex::encode(hasher.finalize());
        self.dir.join(format!("{digest}.json"))
    }

    fn read_entry(path: &Path) -> Option<StoredEntry> {
        let content = fs::read_to_string(path).ok()?;
        match serde_json::from_str(&content) {
            Ok(entry) => Some(entry),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Ignoring unreadable cache file");
                None
            }
        }
    }
}

impl Default for FileStore {
    fn default() -> Self {
        Self::new(cache_dir())
    }
}

impl KeyValueStore for FileStore {
    fn keys(&self) -> Vec<String> {
        let Ok(entries) = fs::read_dir(&self.dir) else {
            return Vec::new();
        };
        entries
            .flatten()
            .map(|entry| entry.path())
            .filter(|path| path.extension().map(|e| e == "json").unwrap_or(false))
            .filter_map(|path| Self::read_entry(&path))
            .map(|entry| entry.key)
            .collect()
    }

    fn get(&self, key: &str) -> Option<String> {
        Self::read_entry(&self.entry_path(key))
            .filter(|entry| entry.key == key)
            .map(|entry| entry.value)
    }

    fn update(&self, key: &str, value: Option<&str>) -> Result<()> {
        let path = self.entry_path(key);
        match value {
            Some(value) => {
                self.ensure_dir()?;
                let content = serde_json::to_string(&StoredEntry {
                    key: key.to_string(),
                    value: value.to_string(),
                })?;
                let tmp = path.with_extension("json.tmp");
                fs::write(&tmp, content)?;
                fs::rename(&tmp, &path)?;
            }
            None => match fs::remove_file(&path) {
                Err(e) if e.kind() != ErrorKind::NotFound => return Err(e.into()),
                _ => {}
            },
        }
        Ok(())
    }
}

/// An in-memory [`KeyValueStore`], mostly useful for tests and short-lived
/// sessions.
#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<BTreeMap<String, String>>,
}

impl MemoryStore {
    fn entries(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, String>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl KeyValueStore for MemoryStore {
    fn keys(&self) -> Vec<String> {
        self.entries().keys().cloned().collect()
    }

    fn get(&self, key: &str) -> Option<String> {
        self.entries().get(key).cloned()
    }

    fn update(&self, key: &str, value: Option<&str>) -> Result<()> {
        let mut entries = self.entries();
        match value {
            Some(content) => {
                entries.insert(key.to_string(), content.to_string());
            }
            None => {
                entries.remove(key);
            }
        }
        Ok(())
    }
}

/// Cache of [`ScanResults`] keyed by workspace.
pub struct IssuesCache<S = FileStore> {
    store: S,
    ttl: Duration,
}

impl IssuesCache<FileStore> {
    /// Creates a cache backed by the platform cache directory with the
    /// default 7-day TTL.
    pub fn new() -> Self {
        Self::with_store(FileStore::default())
    }
}

impl Default for IssuesCache<FileStore> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: KeyValueStore> IssuesCache<S> {
    pub const CACHE_BASE_KEY: &'static str = "scanvault.cache.issues.";

    pub fn with_store(store: S) -> Self {
        Self {
            store,
            ttl: Duration::days(DEFAULT_TTL_DAYS as i64),
        }
    }

    pub fn with_ttl_days(mut self, days: u64) -> Self {
        self.ttl = Duration::days(days as i64);
        self
    }

    pub fn store_backend(&self) -> &S {
        &self.store
    }

    /// Stable key for a workspace, derived from its absolute path.
    pub fn to_key(workspace: &Path) -> String {
        format!(
            "{}{}",
            Self::CACHE_BASE_KEY,
            absolute_workspace_path(workspace).display()
        )
    }

    /// True when results are stored for the workspace.
    pub fn contains(&self, workspace: &Path) -> bool {
        let key = Self::to_key(workspace);
        self.store.keys().iter().any(|k| *k == key)
    }

    /// Reads the stored results.
    ///
    /// A value that fails to deserialize is treated as a miss.
    pub fn get(&self, workspace: &Path) -> Option<ScanResults> {
        let key = Self::to_key(workspace);
        let raw = self.store.get(&key)?;
        match serde_json::from_str(&raw) {
            Ok(results) => {
                debug!(key = %key, "Cache hit");
                Some(results)
            }
            Err(e) => {
                warn!(key = %key, error = %e, "Ignoring corrupted cache entry");
                None
            }
        }
    }

    /// Serializes and stores results, replacing any previous value.
    pub fn store(&self, workspace: &Path, results: &ScanResults) -> Result<()> {
        let key = Self::to_key(workspace);
        let content = serde_json::to_string(results)?;
        self.store.update(&key, Some(&content))?;
        debug!(key = %key, "Stored scan results");
        Ok(())
    }

    /// Deletes the workspace entry. Removing an absent entry is a no-op.
    pub fn remove(&self, workspace: &Path) -> Result<()> {
        self.store.update(&Self::to_key(workspace), None)
    }

    /// Reads the stored results, evicting them if their oldest scan is past
    /// the freshness window.
    pub fn get_or_clear_if_not_relevant(&self, workspace: &Path) -> Option<ScanResults> {
        self.get_or_clear_if_not_relevant_at(workspace, Utc::now())
    }

    pub fn get_or_clear_if_not_relevant_at(
        &self,
        workspace: &Path,
        now: DateTime<Utc>,
    ) -> Option<ScanResults> {
        let results = self.get(workspace)?;
        if self.is_interval_passed(results.oldest_scan_timestamp(), now) {
            info!(workspace = %workspace.display(), "Evicting stale scan results");
            if let Err(e) = self.remove(workspace) {
                warn!(workspace = %workspace.display(), error = %e, "Failed to evict stale scan results");
            }
            return None;
        }
        Some(results)
    }

    /// Results without any timestamp never expire.
    fn is_interval_passed(&self, timestamp: Option<Timestamp>, now: DateTime<Utc>) -> bool {
        match timestamp {
            Some(ts) => now.timestamp_millis() - ts > self.ttl.num_milliseconds(),
            None => false,
        }
    }

    /// Workspace paths with stored results.
    pub fn cached_workspaces(&self) -> Vec<String> {
        self.store
            .keys()
            .into_iter()
            .filter_map(|key| key.strip_prefix(Self::CACHE_BASE_KEY).map(str::to_string))
            .collect()
    }

    /// Removes every workspace entry.
    pub fn clear(&self) -> Result<()> {
        for key in self.store.keys() {
            if key.starts_with(Self::CACHE_BASE_KEY) {
                self.store.update(&key, None)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{AnalyzerKind, AnalyzerScanResponse};

    fn results_at(timestamp: Timestamp) -> ScanResults {
        let mut results = ScanResults::new("/ws/app");
        results.record_analyzer_scan(AnalyzerKind::Eos, AnalyzerScanResponse::default(), timestamp);
        results.record_failed_file("/ws/app/pom.xml", "build failed");
        results
    }

    fn memory_cache() -> IssuesCache<MemoryStore> {
        IssuesCache::with_store(MemoryStore::default())
    }

    #[test]
    fn test_store_then_get_round_trip() {
        let cache = memory_cache();
        let workspace = Path::new("/ws/app");
        let results = results_at(1_000);

        cache.store(workspace, &results).unwrap();
        assert_eq!(cache.get(workspace), Some(results));
    }

    #[test]
    fn test_contains_reports_present_data() {
        let cache = memory_cache();
        let workspace = Path::new("/ws/app");

        assert!(!cache.contains(workspace));
        cache.store(workspace, &results_at(1)).unwrap();
        assert!(cache.contains(workspace));
        assert!(!cache.contains(Path::new("/ws/other")));
    }

    #[test]
    fn test_remove_is_idempotent() {
        let cache = memory_cache();
        let workspace = Path::new("/ws/app");

        cache.remove(workspace).unwrap();
        cache.store(workspace, &results_at(1)).unwrap();
        cache.remove(workspace).unwrap();
        cache.remove(workspace).unwrap();
        assert!(cache.get(workspace).is_none());
    }

    #[test]
    fn test_corrupted_entry_is_a_miss() {
        let cache = memory_cache();
        let workspace = Path::new("/ws/app");
        let key = IssuesCache::<MemoryStore>::to_key(workspace);

        cache.store_backend().update(&key, Some("{not json")).unwrap();
        assert!(cache.get(workspace).is_none());
        assert!(cache.get_or_clear_if_not_relevant(workspace).is_none());
    }

    #[test]
    fn test_stale_results_are_evicted() {
        let cache = memory_cache();
        let workspace = Path::new("/ws/app");
        let now = Utc::now();
        let eight_days_ago = (now - Duration::days(8)).timestamp_millis();

        cache.store(workspace, &results_at(eight_days_ago)).unwrap();
        assert!(cache.get_or_clear_if_not_relevant_at(workspace, now).is_none());
        assert!(cache.get(workspace).is_none());
        assert!(!cache.contains(workspace));
    }

    #[test]
    fn test_fresh_results_are_kept() {
        let cache = memory_cache();
        let workspace = Path::new("/ws/app");
        let now = Utc::now();
        let results = results_at((now - Duration::days(6)).timestamp_millis());

        cache.store(workspace, &results).unwrap();
        assert_eq!(
            cache.get_or_clear_if_not_relevant_at(workspace, now),
            Some(results)
        );
        assert!(cache.contains(workspace));
    }

    #[test]
    fn test_results_without_timestamp_never_expire() {
        let cache = memory_cache();
        let workspace = Path::new("/ws/app");

        cache.store(workspace, &ScanResults::new("/ws/app")).unwrap();
        let far_future = Utc::now() + Duration::days(365);
        assert!(cache
            .get_or_clear_if_not_relevant_at(workspace, far_future)
            .is_some());
    }

    #[test]
    fn test_custom_ttl() {
        let cache = memory_cache().with_ttl_days(1);
        let workspace = Path::new("/ws/app");
        let now = Utc::now();

        cache
            .store(workspace, &results_at((now - Duration::days(2)).timestamp_millis()))
            .unwrap();
        assert!(cache.get_or_clear_if_not_relevant_at(workspace, now).is_none());
    }

    #[cfg(unix)]
    #[test]
    fn test_key_is_prefix_plus_absolute_path() {
        assert_eq!(
            IssuesCache::<MemoryStore>::to_key(Path::new("/ws/app")),
            "scanvault.cache.issues./ws/app"
        );
    }

    #[cfg(unix)]
    #[test]
    fn test_trailing_separator_maps_to_same_entry() {
        assert_eq!(
            IssuesCache::<MemoryStore>::to_key(Path::new("/ws/app/")),
            IssuesCache::<MemoryStore>::to_key(Path::new("/ws/app"))
        );

        let cache = memory_cache();
        cache.store(Path::new("/ws/app"), &results_at(1)).unwrap();
        assert!(cache.contains(Path::new("/ws/app/")));
        assert!(cache.get(Path::new("/ws/app/")).is_some());
    }

    #[test]
    fn test_file_store_keeps_original_keys() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path());
        let keys = ["scanvault.cache.issues./ws/app", "C:\\work\\app", "naïve space"];
        for key in keys {
            store.update(key, Some(key)).unwrap();
        }

        let mut stored = store.keys();
        stored.sort();
        let mut expected = keys.map(str::to_string).to_vec();
        expected.sort();
        assert_eq!(stored, expected);
        assert_eq!(store.get("naïve space").as_deref(), Some("naïve space"));
        assert_eq!(store.get("absent"), None);
    }

    #[test]
    fn test_file_store_long_non_ascii_workspace() {
        let dir = tempfile::tempdir().unwrap();
        let cache = IssuesCache::with_store(FileStore::new(dir.path()));
        let segment = "プロジェクト-モノレポ-サービス-フロントエンド-アプリケーション";
        let workspace = PathBuf::from(format!("/home/dev/{segment}/{segment}/{segment}"));
        let results = results_at(7);

        cache.store(&workspace, &results).unwrap();
        assert!(cache.contains(&workspace));
        assert_eq!(cache.get(&workspace), Some(results));
        assert_eq!(
            cache.cached_workspaces(),
            [absolute_workspace_path(&workspace).display().to_string()]
        );
    }

    #[test]
    fn test_file_store_skips_foreign_files() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("stray.json"), "not an entry").unwrap();
        let store = FileStore::new(dir.path());
        store.update("k", Some("v")).unwrap();
        assert_eq!(store.keys(), ["k"]);
    }

    #[test]
    fn test_file_store_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let cache = IssuesCache::with_store(FileStore::new(dir.path().join("store")));
        let workspace = Path::new("/ws/app");
        let results = results_at(42);

        cache.store(workspace, &results).unwrap();
        assert!(cache.contains(workspace));
        assert_eq!(cache.get(workspace), Some(results));
        assert_eq!(cache.cached_workspaces().len(), 1);

        cache.clear().unwrap();
        assert!(!cache.contains(workspace));
        assert!(cache.cached_workspaces().is_empty());
    }

    #[test]
    fn test_file_store_missing_dir_has_no_keys() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path().join("absent"));
        assert!(store.keys().is_empty());
        store.update("k", None).unwrap();
    }
}
