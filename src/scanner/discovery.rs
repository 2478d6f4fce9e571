use std::path::{Path, PathBuf};
use walkdir::{DirEntry, WalkDir};

use crate::config::ExcludeConfig;
use crate::model::PackageType;

/// A manifest file found in the workspace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Descriptor {
    pub name: String,
    pub full_path: PathBuf,
    pub package_type: PackageType,
}

const SKIPPED_DIRS: &[&str] = &[".git", ".idea", ".vscode"];

/// Finds every known descriptor under `workspace`, sorted by path.
///
/// Hidden tool directories are never entered; paths matching `exclude` are
/// skipped, directories included.
pub fn discover_descriptors(workspace: &Path, exclude: &ExcludeConfig) -> Vec<Descriptor> {
    let matcher = exclude.matcher();
    let is_excluded = |entry: &DirEntry| -> bool {
        if entry.depth() == 0 {
            return false;
        }
        if entry.file_type().is_dir() {
            let name = entry.file_name().to_string_lossy();
            if SKIPPED_DIRS.contains(&name.as_ref()) {
                return true;
            }
        }
        entry
            .path()
            .strip_prefix(workspace)
            .map(|relative| matcher.is_match(&relative.to_string_lossy()))
            .unwrap_or(false)
    };

    WalkDir::new(workspace)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| !is_excluded(entry))
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .filter_map(|entry| {
            let name = entry.file_name().to_str()?.to_string();
            let package_type = PackageType::from_descriptor_name(&name)?;
            Some(Descriptor {
                name,
                full_path: entry.into_path(),
                package_type,
            })
        })
        .collect()
}
