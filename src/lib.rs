pub mod cache;
pub mod config;
pub mod diagnostics;
pub mod issues;
pub mod model;
pub mod output;
pub mod platform;
pub mod progress;
pub mod request;
pub mod scanner;

pub use cache::IssuesCache;
pub use config::Config;
pub use issues::{build_issues_tree, FileNode};
pub use model::{DependencyScanResults, GraphRequest, GraphResponse, ScanResults, Severity};
pub use request::{DependencyTree, GraphMode, GraphRequestBuilder};
pub use scanner::{ScanError, ScanSession};
