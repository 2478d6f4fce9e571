//! Core data types for scan results, graph scans and severities.
//!
//! - [`ScanResults`] - every scan output collected for one workspace
//! - [`DependencyScanResults`] - graph scan output for one descriptor
//! - [`GraphRequest`] / [`GraphResponse`] - graph scan wire types
//! - [`ImpactGraph`] - how an issue reaches a direct dependency
//! - [`Severity`] - totally ordered issue criticality
//! - [`PackageType`] - package ecosystem tag
//!
//! # Example
//!
//! ```
//! use scanvault::model::{AnalyzerKind, AnalyzerScanResponse, ScanResults};
//!
//! let mut results = ScanResults::new("/home/dev/project");
//! assert!(!results.has_issues());
//!
//! results.record_analyzer_scan(AnalyzerKind::Secrets, AnalyzerScanResponse::default(), 0);
//! assert_eq!(results.oldest_scan_timestamp(), Some(0));
//! ```

mod graph;
mod package;
mod scan_results;
mod severity;

pub use graph::*;
pub use package::*;
pub use scan_results::*;
pub use severity::*;
