use futures::future::join_all;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{
    discover_descriptors, ApplicabilityScanner, Descriptor, DependencyResolver, GraphScanService,
    ScanError, SourceAnalyzer,
};
use crate::cache::{IssuesCache, KeyValueStore};
use crate::config::{Config, ExcludeConfig};
use crate::model::{now_millis, DependencyScanResults, ScanResults};
use crate::platform::absolute_workspace_path;
use crate::progress::{NoopSink, ProgressSink, StepProgress};
use crate::request::{GraphMode, GraphRequestBuilder};

/// One scan of a workspace.
///
/// Descriptors are scanned one after another, then every source analyzer runs
/// concurrently. The cancellation token is checked between steps and raced
/// against every remote call. Results reach the cache only when the whole
/// session completes; a cancelled session leaves the previous entry intact.
pub struct ScanSession<S: KeyValueStore> {
    workspace: PathBuf,
    cache: Arc<IssuesCache<S>>,
    resolver: Arc<dyn DependencyResolver>,
    graph_service: Arc<dyn GraphScanService>,
    applicability: Option<Arc<dyn ApplicabilityScanner>>,
    analyzers: Vec<Arc<dyn SourceAnalyzer>>,
    builder: GraphRequestBuilder,
    mode: GraphMode,
    exclude: ExcludeConfig,
    sink: Arc<dyn ProgressSink>,
}

impl<S: KeyValueStore> ScanSession<S> {
    pub fn new(
        workspace: impl AsRef<Path>,
        cache: Arc<IssuesCache<S>>,
        resolver: Arc<dyn DependencyResolver>,
        graph_service: Arc<dyn GraphScanService>,
    ) -> Self {
        Self {
            workspace: absolute_workspace_path(workspace.as_ref()),
            cache,
            resolver,
            graph_service,
            applicability: None,
            analyzers: Vec::new(),
            builder: GraphRequestBuilder::new(),
            mode: GraphMode::default(),
            exclude: ExcludeConfig::default(),
            sink: Arc::new(NoopSink),
        }
    }

    /// Applies graph mode, scoping and exclusions from the configuration.
    pub fn with_config(mut self, config: &Config) -> Self {
        self.builder = GraphRequestBuilder::from_config(config);
        self.mode = GraphMode::from_flatten(config.flatten_graph);
        self.exclude = config.exclude.clone();
        self
    }

    pub fn with_mode(mut self, mode: GraphMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_analyzer(mut self, analyzer: Arc<dyn SourceAnalyzer>) -> Self {
        self.analyzers.push(analyzer);
        self
    }

    pub fn with_applicability(mut self, scanner: Arc<dyn ApplicabilityScanner>) -> Self {
        self.applicability = Some(scanner);
        self
    }

    pub fn with_progress(mut self, sink: Arc<dyn ProgressSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn workspace(&self) -> &Path {
        &self.workspace
    }

    /// Runs every planned step and commits the results to the cache.
    ///
    /// # Errors
    ///
    /// [`ScanError::Cancelled`] when `cancel` fires before the results are
    /// committed, [`ScanError::Cache`] when they cannot be stored. Failures of
    /// single files are recorded in `failed_files` instead.
    pub async fn run(&self, cancel: &CancellationToken) -> Result<ScanResults, ScanError> {
        let descriptors: Vec<Descriptor> = discover_descriptors(&self.workspace, &self.exclude)
            .into_iter()
            .filter(|d| {
                let supported = self.resolver.supports(d.package_type);
                if !supported {
                    debug!(path = %d.full_path.display(), "Skipping unsupported descriptor");
                }
                supported
            })
            .collect();

        let progress = Arc::new(
            StepProgress::new(
                Arc::clone(&self.sink),
                descriptors.len() + self.analyzers.len(),
            )
            .with_cancellation(cancel.clone()),
        );
        let mut results = ScanResults::new(self.workspace.display().to_string());
        info!(
            workspace = %self.workspace.display(),
            descriptors = descriptors.len(),
            analyzers = self.analyzers.len(),
            "Starting scan session"
        );

        for descriptor in &descriptors {
            check_cancelled(cancel)?;
            progress.start_step(&format!("Scanning {}", descriptor.name), None);
            match self.scan_descriptor(descriptor, &progress, cancel).await {
                Ok(scan) => results.descriptors_issues.push(scan),
                Err(ScanError::Cancelled) => return Err(self.cancelled()),
                Err(e) => {
                    warn!(path = %descriptor.full_path.display(), error = %e, "Descriptor scan failed");
                    results.record_failed_file(descriptor.full_path.display().to_string(), e.to_string());
                }
            }
        }

        check_cancelled(cancel)?;
        let analyses = self.analyzers.iter().map(|analyzer| {
            let progress = Arc::clone(&progress);
            async move {
                progress.start_step(analyzer.kind().display_name(), None);
                let scan_progress = progress.create_scan_progress(analyzer.kind().display_name());
                let outcome =
                    cancellable(cancel, analyzer.analyze(&self.workspace, &scan_progress)).await;
                (analyzer.kind(), outcome)
            }
        });
        for (kind, outcome) in join_all(analyses).await {
            match outcome {
                Ok(response) => results.record_analyzer_scan(kind, response, now_millis()),
                Err(ScanError::Cancelled) => return Err(self.cancelled()),
                Err(e) => {
                    warn!(analyzer = kind.display_name(), error = %e, "Source analysis failed");
                    results.record_failed_file(
                        self.workspace.display().to_string(),
                        format!("{} scan failed: {}", kind.display_name(), e),
                    );
                }
            }
        }

        check_cancelled(cancel)?;
        self.cache
            .store(&self.workspace, &results)
            .map_err(|e| ScanError::Cache(e.to_string()))?;
        info!(
            workspace = %self.workspace.display(),
            has_issues = results.has_issues(),
            failed_files = results.failed_files.len(),
            "Scan session completed"
        );
        Ok(results)
    }

    async fn scan_descriptor(
        &self,
        descriptor: &Descriptor,
        progress: &Arc<StepProgress>,
        cancel: &CancellationToken,
    ) -> Result<DependencyScanResults, ScanError> {
        let tree = cancellable(cancel, self.resolver.resolve(descriptor)).await?;
        check_cancelled(cancel)?;

        let request = self.builder.build(&tree, self.mode);
        let scan_progress = progress.create_scan_progress(descriptor.name.clone());
        debug!(
            path = %descriptor.full_path.display(),
            service = self.graph_service.name(),
            nodes = request.nodes.len(),
            "Submitting dependency graph"
        );
        let response =
            cancellable(cancel, self.graph_service.scan_graph(&request, &scan_progress)).await?;
        let mut scan = DependencyScanResults::from_graph_scan(
            descriptor.full_path.display().to_string(),
            descriptor.package_type,
            response,
            now_millis(),
        );

        let Some(applicability) = &self.applicability else {
            return Ok(scan);
        };
        let mut cves: Vec<String> = scan
            .dependencies_graph_scan
            .issues()
            .flat_map(|issue| issue.cves.iter().filter_map(|c| c.cve.clone()))
            .collect();
        cves.sort();
        cves.dedup();
        if cves.is_empty() {
            return Ok(scan);
        }

        match cancellable(cancel, applicability.scan_applicability(&self.workspace, &cves)).await {
            Ok(response) => scan = scan.with_applicability(response, now_millis()),
            Err(ScanError::Cancelled) => return Err(ScanError::Cancelled),
            Err(e) => {
                warn!(path = %descriptor.full_path.display(), error = %e, "Applicability scan failed");
            }
        }
        Ok(scan)
    }

    fn cancelled(&self) -> ScanError {
        info!(workspace = %self.workspace.display(), "Scan session cancelled");
        ScanError::Cancelled
    }
}

fn check_cancelled(cancel: &CancellationToken) -> Result<(), ScanError> {
    if cancel.is_cancelled() {
        return Err(ScanError::Cancelled);
    }
    Ok(())
}

/// Races `future` against cancellation, cancellation winning ties.
async fn cancellable<T, F>(cancel: &CancellationToken, future: F) -> Result<T, ScanError>
where
    F: Future<Output = Result<T, ScanError>>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(ScanError::Cancelled),
        result = future => result,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryStore;
    use crate::model::{
        AnalyzedFile, AnalyzerFinding, AnalyzerKind, AnalyzerScanResponse,
        ApplicabilityScanResponse, GraphComponent, GraphCve, GraphIssue, GraphRequest,
        GraphResponse, ImpactPathEntry, PackageType, Severity,
    };
    use crate::progress::ScanProgress;
    use crate::request::DependencyTree;
    use async_trait::async_trait;
    use std::collections::BTreeMap;
    use std::fs;
    use std::sync::Mutex;

    struct FakeResolver;

    #[async_trait]
    impl DependencyResolver for FakeResolver {
        fn supports(&self, package_type: PackageType) -> bool {
            package_type != PackageType::Go
        }

        async fn resolve(&self, descriptor: &Descriptor) -> Result<DependencyTree, ScanError> {
            match descriptor.package_type {
                PackageType::Maven => Err(ScanError::Service("mvn not installed".to_string())),
                _ => Ok(DependencyTree::new(
                    "npm://app:1.0.0",
                    vec![DependencyTree::new(
                        "npm://mkdirp:0.5.1",
                        vec![DependencyTree::leaf("npm://minimist:0.0.8")],
                    )],
                )),
            }
        }
    }

    #[derive(Default)]
    struct FakeGraphService {
        requests: Mutex<Vec<GraphRequest>>,
        cancel_on_call: Option<CancellationToken>,
    }

    #[async_trait]
    impl GraphScanService for FakeGraphService {
        fn name(&self) -> &'static str {
            "fake"
        }

        async fn scan_graph(
            &self,
            request: &GraphRequest,
            progress: &ScanProgress,
        ) -> Result<GraphResponse, ScanError> {
            self.requests.lock().unwrap().push(request.clone());
            if let Some(token) = &self.cancel_on_call {
                token.cancel();
                std::future::pending::<()>().await;
            }
            progress.set_percentage(50.0);
            progress.set_percentage(100.0);

            let mut components = BTreeMap::new();
            components.insert(
                "npm://minimist:0.0.8".to_string(),
                GraphComponent {
                    fixed_versions: vec!["1.2.6".to_string()],
                    impact_paths: vec![["npm://app:1.0.0", "npm://mkdirp:0.5.1", "npm://minimist:0.0.8"]
                        .iter()
                        .map(|id| ImpactPathEntry {
                            component_id: id.to_string(),
                        })
                        .collect()],
                },
            );
            Ok(GraphResponse {
                scan_id: "scan-1".to_string(),
                vulnerabilities: vec![GraphIssue {
                    issue_id: "XRAY-1".to_string(),
                    summary: "Prototype pollution".to_string(),
                    severity: "Critical".to_string(),
                    cves: vec![GraphCve {
                        cve: Some("CVE-2021-44906".to_string()),
                        cvss_v3_score: Some("9.8".to_string()),
                    }],
                    components,
                }],
                ..Default::default()
            })
        }
    }

    struct FakeAnalyzer {
        kind: AnalyzerKind,
        fail: bool,
    }

    #[async_trait]
    impl SourceAnalyzer for FakeAnalyzer {
        fn kind(&self) -> AnalyzerKind {
            self.kind
        }

        async fn analyze(
            &self,
            workspace: &Path,
            progress: &ScanProgress,
        ) -> Result<AnalyzerScanResponse, ScanError> {
            if self.fail {
                return Err(ScanError::Service("analyzer crashed".to_string()));
            }
            progress.set_percentage(100.0);
            Ok(AnalyzerScanResponse {
                files_with_issues: vec![AnalyzedFile {
                    full_path: workspace.join("config.js").display().to_string(),
                    issues: vec![AnalyzerFinding {
                        rule_id: "generic-token".to_string(),
                        rule_name: "Hardcoded token".to_string(),
                        severity: Severity::High,
                        locations: Vec::new(),
                    }],
                }],
            })
        }
    }

    /// Reports once, cancels the session, tries to report again and hangs.
    struct CancellingAnalyzer {
        token: CancellationToken,
    }

    #[async_trait]
    impl SourceAnalyzer for CancellingAnalyzer {
        fn kind(&self) -> AnalyzerKind {
            AnalyzerKind::Eos
        }

        async fn analyze(
            &self,
            _workspace: &Path,
            progress: &ScanProgress,
        ) -> Result<AnalyzerScanResponse, ScanError> {
            progress.set_percentage(20.0);
            self.token.cancel();
            progress.set_percentage(80.0);
            std::future::pending().await
        }
    }

    /// Records every increment together with whether the token had fired.
    struct CancelAwareSink {
        token: CancellationToken,
        increments: Mutex<Vec<bool>>,
    }

    impl ProgressSink for CancelAwareSink {
        fn report(&self, _message: Option<&str>, increment: Option<f64>) {
            if increment.is_some() {
                self.increments.lock().unwrap().push(self.token.is_cancelled());
            }
        }
    }

    struct FakeApplicability;

    #[async_trait]
    impl ApplicabilityScanner for FakeApplicability {
        async fn scan_applicability(
            &self,
            _workspace: &Path,
            cves: &[String],
        ) -> Result<ApplicabilityScanResponse, ScanError> {
            Ok(ApplicabilityScanResponse {
                scanned_cves: cves.to_vec(),
                applicable_cves: BTreeMap::new(),
            })
        }
    }

    fn workspace() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("package.json"), "{}").unwrap();
        fs::create_dir_all(dir.path().join("backend")).unwrap();
        fs::write(dir.path().join("backend").join("pom.xml"), "<project/>").unwrap();
        fs::write(dir.path().join("go.mod"), "module x").unwrap();
        dir
    }

    #[tokio::test]
    async fn test_session_merges_and_commits_results() {
        let dir = workspace();
        let cache = Arc::new(IssuesCache::with_store(MemoryStore::default()));
        let service = Arc::new(FakeGraphService::default());
        let session = ScanSession::new(dir.path(), cache.clone(), Arc::new(FakeResolver), service.clone())
            .with_analyzer(Arc::new(FakeAnalyzer {
                kind: AnalyzerKind::Secrets,
                fail: false,
            }))
            .with_analyzer(Arc::new(FakeAnalyzer {
                kind: AnalyzerKind::Iac,
                fail: true,
            }));

        let results = session.run(&CancellationToken::new()).await.unwrap();

        assert_eq!(results.descriptors_issues.len(), 1);
        assert_eq!(results.descriptors_issues[0].name, "package.json");
        assert!(results.descriptors_issues[0]
            .impact_tree_data
            .contains_key("XRAY-1"));
        assert!(results.secrets_scan.has_issues());
        assert!(results.secrets_scan_timestamp.is_some());
        assert!(results.iac_scan_timestamp.is_none());

        let reasons: Vec<&str> = results
            .failed_files
            .iter()
            .filter_map(|f| f.reason.as_deref())
            .collect();
        assert_eq!(reasons.len(), 2);
        assert!(reasons.contains(&"mvn not installed"));
        assert!(reasons
            .iter()
            .any(|r| r.starts_with("Infrastructure as code scan failed")));

        assert_eq!(cache.get(dir.path()), Some(results));

        let requests = service.requests.lock().unwrap();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].nodes.len(), 2);
    }

    #[tokio::test]
    async fn test_session_uses_config_mode_and_scoping() {
        let dir = workspace();
        let cache = Arc::new(IssuesCache::with_store(MemoryStore::default()));
        let service = Arc::new(FakeGraphService::default());
        let config = Config {
            flatten_graph: false,
            project_key: Some("proj".to_string()),
            ..Config::default()
        };
        let session =
            ScanSession::new(dir.path(), cache, Arc::new(FakeResolver), service.clone()).with_config(&config);

        session.run(&CancellationToken::new()).await.unwrap();

        let requests = service.requests.lock().unwrap();
        assert_eq!(requests[0].project_key.as_deref(), Some("proj"));
        assert_eq!(requests[0].nodes.len(), 1);
        assert_eq!(requests[0].nodes[0].nodes.len(), 1);
    }

    #[tokio::test]
    async fn test_applicability_is_attached() {
        let dir = workspace();
        let cache = Arc::new(IssuesCache::with_store(MemoryStore::default()));
        let session = ScanSession::new(
            dir.path(),
            cache,
            Arc::new(FakeResolver),
            Arc::new(FakeGraphService::default()),
        )
        .with_applicability(Arc::new(FakeApplicability));

        let results = session.run(&CancellationToken::new()).await.unwrap();

        let scan = &results.descriptors_issues[0];
        let applicability = scan.applicable_issues.as_ref().unwrap();
        assert_eq!(applicability.is_applicable("CVE-2021-44906"), Some(false));
        assert!(scan.applicable_scan_timestamp.is_some());
    }

    #[tokio::test]
    async fn test_cancelled_session_commits_nothing() {
        let dir = workspace();
        let cache = Arc::new(IssuesCache::with_store(MemoryStore::default()));
        let previous = ScanResults::new("previous");
        cache.store(dir.path(), &previous).unwrap();

        let token = CancellationToken::new();
        let service = Arc::new(FakeGraphService {
            cancel_on_call: Some(token.clone()),
            ..Default::default()
        });
        let session = ScanSession::new(dir.path(), cache.clone(), Arc::new(FakeResolver), service);

        let error = session.run(&token).await.unwrap_err();

        assert!(error.is_cancelled());
        assert_eq!(cache.get(dir.path()), Some(previous));
    }

    #[tokio::test]
    async fn test_cancel_during_analyzers_commits_nothing() {
        let dir = workspace();
        let cache = Arc::new(IssuesCache::with_store(MemoryStore::default()));
        let previous = ScanResults::new("previous");
        cache.store(dir.path(), &previous).unwrap();

        let token = CancellationToken::new();
        let sink = Arc::new(CancelAwareSink {
            token: token.clone(),
            increments: Mutex::new(Vec::new()),
        });
        let session = ScanSession::new(
            dir.path(),
            cache.clone(),
            Arc::new(FakeResolver),
            Arc::new(FakeGraphService::default()),
        )
        .with_analyzer(Arc::new(FakeAnalyzer {
            kind: AnalyzerKind::Secrets,
            fail: false,
        }))
        .with_analyzer(Arc::new(CancellingAnalyzer {
            token: token.clone(),
        }))
        .with_progress(sink.clone());

        let error = session.run(&token).await.unwrap_err();

        assert!(error.is_cancelled());
        assert_eq!(cache.get(dir.path()), Some(previous));
        let increments = sink.increments.lock().unwrap();
        assert!(!increments.is_empty());
        assert!(increments.iter().all(|after_cancel| !after_cancel));
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let dir = workspace();
        let cache = Arc::new(IssuesCache::with_store(MemoryStore::default()));
        let session = ScanSession::new(
            dir.path(),
            cache.clone(),
            Arc::new(FakeResolver),
            Arc::new(FakeGraphService::default()),
        );
        let token = CancellationToken::new();
        token.cancel();

        assert!(session.run(&token).await.unwrap_err().is_cancelled());
        assert!(!cache.contains(dir.path()));
    }
}
