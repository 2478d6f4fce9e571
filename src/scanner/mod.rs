//! Scan sessions and the collaborators they drive.
//!
//! A [`ScanSession`] discovers the descriptors of a workspace, resolves each
//! one into a dependency tree, submits it to a [`GraphScanService`], runs the
//! configured [`SourceAnalyzer`]s and commits the merged [`ScanResults`] to the
//! cache. The remote service, the package-manager tree resolution and the
//! source analyzers are external; this module only defines their seams.
//!
//! [`ScanResults`]: crate::model::ScanResults
//!
//! # Example
//!
//! ```no_run
//! use scanvault::cache::IssuesCache;
//! use scanvault::scanner::{DependencyResolver, GraphScanService, ScanSession};
//! use std::sync::Arc;
//! use tokio_util::sync::CancellationToken;
//!
//! async fn rescan(
//!     resolver: Arc<dyn DependencyResolver>,
//!     service: Arc<dyn GraphScanService>,
//! ) -> anyhow::Result<()> {
//!     let cache = Arc::new(IssuesCache::new());
//!     let session = ScanSession::new("/home/dev/project", cache, resolver, service);
//!     let results = session.run(&CancellationToken::new()).await?;
//!     println!("{} descriptors scanned", results.descriptors_issues.len());
//!     Ok(())
//! }
//! ```

mod discovery;
mod session;

pub use discovery::{discover_descriptors, Descriptor};
pub use session::ScanSession;

use async_trait::async_trait;
use std::path::Path;
use thiserror::Error;

use crate::model::{
    AnalyzerKind, AnalyzerScanResponse, ApplicabilityScanResponse, GraphRequest, GraphResponse,
    PackageType,
};
use crate::progress::ScanProgress;
use crate::request::DependencyTree;

#[derive(Debug, Error)]
pub enum ScanError {
    #[error("scan cancelled")]
    Cancelled,

    #[error("{0}")]
    Service(String),

    #[error("failed to store scan results: {0}")]
    Cache(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl ScanError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, ScanError::Cancelled)
    }
}

/// Builds the dependency tree declared by a descriptor, usually by running
/// the ecosystem's package manager.
#[async_trait]
pub trait DependencyResolver: Send + Sync {
    fn supports(&self, package_type: PackageType) -> bool;

    async fn resolve(&self, descriptor: &Descriptor) -> Result<DependencyTree, ScanError>;
}

/// The remote dependency graph scan.
#[async_trait]
pub trait GraphScanService: Send + Sync {
    fn name(&self) -> &'static str;

    /// Scans a graph, reporting percentage-complete through `progress`.
    async fn scan_graph(
        &self,
        request: &GraphRequest,
        progress: &ScanProgress,
    ) -> Result<GraphResponse, ScanError>;
}

/// Checks which CVEs of a descriptor are reachable from the workspace source.
#[async_trait]
pub trait ApplicabilityScanner: Send + Sync {
    async fn scan_applicability(
        &self,
        workspace: &Path,
        cves: &[String],
    ) -> Result<ApplicabilityScanResponse, ScanError>;
}

/// A workspace-wide static analysis (code patterns, IaC, secrets).
#[async_trait]
pub trait SourceAnalyzer: Send + Sync {
    fn kind(&self) -> AnalyzerKind;

    async fn analyze(
        &self,
        workspace: &Path,
        progress: &ScanProgress,
    ) -> Result<AnalyzerScanResponse, ScanError>;
}
