use chrono::{TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

use super::{GraphResponse, ImpactGraph, PackageType, Severity};

/// Milliseconds since the Unix epoch.
pub type Timestamp = i64;

pub fn now_millis() -> Timestamp {
    Utc::now().timestamp_millis()
}

/// Renders a timestamp as a UTC date, or `"Never"` when absent.
pub fn to_date(timestamp: Option<Timestamp>) -> String {
    match timestamp.and_then(|ts| Utc.timestamp_millis_opt(ts).single()) {
        Some(date) => date.to_rfc2822(),
        None => "Never".to_string(),
    }
}

/// Describes when a scan completed, empty when it never ran.
pub fn last_scan_string(timestamp: Option<Timestamp>) -> String {
    match timestamp {
        Some(_) => format!("scan completed at '{}'", to_date(timestamp)),
        None => String::new(),
    }
}

/// Returns the last path segment of `path`.
pub fn last_segment(path: &str) -> &str {
    Path::new(path)
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or(path)
}

/// A file that took part in a scan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileIssuesData {
    pub name: String,
    pub full_path: String,
    /// Why the file could not be scanned, for entries of `failed_files`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl FileIssuesData {
    pub fn new(full_path: impl Into<String>) -> Self {
        let full_path = full_path.into();
        Self {
            name: last_segment(&full_path).to_string(),
            full_path,
            reason: None,
        }
    }

    pub fn failed(full_path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            reason: Some(reason.into()),
            ..Self::new(full_path)
        }
    }
}

/// A region inside a source file, 1-based lines and columns.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileRegion {
    pub start_line: u32,
    pub start_column: u32,
    pub end_line: u32,
    pub end_column: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snippet: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyzerFinding {
    pub rule_id: String,
    #[serde(default)]
    pub rule_name: String,
    pub severity: Severity,
    #[serde(default)]
    pub locations: Vec<FileRegion>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyzedFile {
    pub full_path: String,
    #[serde(default)]
    pub issues: Vec<AnalyzerFinding>,
}

/// Output of a source analyzer (code patterns, infrastructure-as-code or
/// secrets).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyzerScanResponse {
    #[serde(default)]
    pub files_with_issues: Vec<AnalyzedFile>,
}

impl AnalyzerScanResponse {
    pub fn has_issues(&self) -> bool {
        !self.files_with_issues.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplicabilityEvidence {
    pub full_path: String,
    pub region: FileRegion,
}

/// Result of checking whether vulnerable code is reachable from the source.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplicabilityScanResponse {
    #[serde(default)]
    pub scanned_cves: Vec<String>,
    /// Evidence per CVE found to be reachable.
    #[serde(default)]
    pub applicable_cves: BTreeMap<String, Vec<ApplicabilityEvidence>>,
}

impl ApplicabilityScanResponse {
    /// `None` when the CVE was not part of the scan.
    pub fn is_applicable(&self, cve: &str) -> Option<bool> {
        if self.applicable_cves.contains_key(cve) {
            return Some(true);
        }
        if self.scanned_cves.iter().any(|scanned| scanned == cve) {
            return Some(false);
        }
        None
    }
}

/// Dependency scan output for one descriptor or for the whole workspace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DependencyScanResults {
    pub name: String,
    pub full_path: String,
    #[serde(rename = "type")]
    pub package_type: PackageType,
    pub graph_scan_timestamp: Timestamp,
    pub dependencies_graph_scan: GraphResponse,
    /// Impact graph per issue id.
    #[serde(default)]
    pub impact_tree_data: BTreeMap<String, ImpactGraph>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub applicable_issues: Option<ApplicabilityScanResponse>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub applicable_scan_timestamp: Option<Timestamp>,
}

impl DependencyScanResults {
    /// Wraps a graph scan response and derives the impact graph of each issue
    /// from the impact paths of all its affected components.
    pub fn from_graph_scan(
        full_path: impl Into<String>,
        package_type: PackageType,
        response: GraphResponse,
        timestamp: Timestamp,
    ) -> Self {
        let file = FileIssuesData::new(full_path);
        let mut impact_tree_data = BTreeMap::new();
        for issue in response.issues() {
            let paths = issue
                .components
                .values()
                .flat_map(|component| component.impact_paths.iter().map(Vec::as_slice));
            if let Some(graph) = ImpactGraph::from_paths(paths) {
                impact_tree_data.insert(issue.issue_id.clone(), graph);
            }
        }

        Self {
            name: file.name,
            full_path: file.full_path,
            package_type,
            graph_scan_timestamp: timestamp,
            dependencies_graph_scan: response,
            impact_tree_data,
            applicable_issues: None,
            applicable_scan_timestamp: None,
        }
    }

    pub fn with_applicability(
        mut self,
        response: ApplicabilityScanResponse,
        timestamp: Timestamp,
    ) -> Self {
        self.applicable_issues = Some(response);
        self.applicable_scan_timestamp = Some(timestamp);
        self
    }

    fn oldest_timestamp(&self) -> Timestamp {
        match self.applicable_scan_timestamp {
            Some(applicable) => applicable.min(self.graph_scan_timestamp),
            None => self.graph_scan_timestamp,
        }
    }
}

/// Source analyzers whose results are stored next to the dependency scans.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AnalyzerKind {
    Eos,
    Iac,
    Secrets,
}

impl AnalyzerKind {
    pub fn display_name(&self) -> &'static str {
        match self {
            AnalyzerKind::Eos => "Code patterns",
            AnalyzerKind::Iac => "Infrastructure as code",
            AnalyzerKind::Secrets => "Secrets",
        }
    }
}

/// Every scan output collected for one workspace.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanResults {
    pub path: String,
    #[serde(default)]
    pub descriptors_issues: Vec<DependencyScanResults>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workspace_issues: Option<DependencyScanResults>,
    #[serde(default)]
    pub eos_scan: AnalyzerScanResponse,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub eos_scan_timestamp: Option<Timestamp>,
    #[serde(default)]
    pub iac_scan: AnalyzerScanResponse,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iac_scan_timestamp: Option<Timestamp>,
    #[serde(default)]
    pub secrets_scan: AnalyzerScanResponse,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secrets_scan_timestamp: Option<Timestamp>,
    #[serde(default)]
    pub failed_files: Vec<FileIssuesData>,
}

impl ScanResults {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            ..Default::default()
        }
    }

    /// True when at least one scan reported something to show.
    pub fn has_issues(&self) -> bool {
        !self.descriptors_issues.is_empty()
            || self.eos_scan.has_issues()
            || self.iac_scan.has_issues()
            || self.secrets_scan.has_issues()
            || self.workspace_issues.is_some()
    }

    /// True when there are issues or files that failed to scan.
    pub fn has_information(&self) -> bool {
        self.has_issues() || !self.failed_files.is_empty()
    }

    /// Minimum of every recorded scan timestamp, `None` if nothing ran.
    pub fn oldest_scan_timestamp(&self) -> Option<Timestamp> {
        self.descriptors_issues
            .iter()
            .chain(self.workspace_issues.iter())
            .map(DependencyScanResults::oldest_timestamp)
            .chain(self.eos_scan_timestamp)
            .chain(self.iac_scan_timestamp)
            .chain(self.secrets_scan_timestamp)
            .min()
    }

    pub fn analyzer_scan(&self, kind: AnalyzerKind) -> (&AnalyzerScanResponse, Option<Timestamp>) {
        match kind {
            AnalyzerKind::Eos => (&self.eos_scan, self.eos_scan_timestamp),
            AnalyzerKind::Iac => (&self.iac_scan, self.iac_scan_timestamp),
            AnalyzerKind::Secrets => (&self.secrets_scan, self.secrets_scan_timestamp),
        }
    }

    pub fn record_analyzer_scan(
        &mut self,
        kind: AnalyzerKind,
        response: AnalyzerScanResponse,
        timestamp: Timestamp,
    ) {
        let (scan, scan_timestamp) = match kind {
            AnalyzerKind::Eos => (&mut self.eos_scan, &mut self.eos_scan_timestamp),
            AnalyzerKind::Iac => (&mut self.iac_scan, &mut self.iac_scan_timestamp),
            AnalyzerKind::Secrets => (&mut self.secrets_scan, &mut self.secrets_scan_timestamp),
        };
        *scan = response;
        *scan_timestamp = Some(timestamp);
    }

    pub fn record_failed_file(&mut self, full_path: impl Into<String>, reason: impl Into<String>) {
        self.failed_files
            .push(FileIssuesData::failed(full_path, reason));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{GraphComponent, GraphIssue, ImpactPathEntry};

    fn finding_response(path: &str) -> AnalyzerScanResponse {
        AnalyzerScanResponse {
            files_with_issues: vec![AnalyzedFile {
                full_path: path.to_string(),
                issues: vec![AnalyzerFinding {
                    rule_id: "rule-1".to_string(),
                    rule_name: "Hardcoded secret".to_string(),
                    severity: Severity::High,
                    locations: vec![FileRegion::default()],
                }],
            }],
        }
    }

    fn descriptor(timestamp: Timestamp) -> DependencyScanResults {
        DependencyScanResults::from_graph_scan(
            "/ws/package.json",
            PackageType::Npm,
            GraphResponse::default(),
            timestamp,
        )
    }

    #[test]
    fn test_empty_results_have_no_issues() {
        let results = ScanResults::new("/ws");
        assert!(!results.has_issues());
        assert!(!results.has_information());
        assert_eq!(results.oldest_scan_timestamp(), None);
    }

    #[test]
    fn test_has_issues_per_scan_type() {
        let mut results = ScanResults::new("/ws");
        results.descriptors_issues.push(descriptor(1));
        assert!(results.has_issues());

        let mut results = ScanResults::new("/ws");
        results.workspace_issues = Some(descriptor(1));
        assert!(results.has_issues());

        for kind in [AnalyzerKind::Eos, AnalyzerKind::Iac, AnalyzerKind::Secrets] {
            let mut results = ScanResults::new("/ws");
            results.record_analyzer_scan(kind, finding_response("/ws/main.tf"), 1);
            assert!(results.has_issues(), "{:?}", kind);
        }
    }

    #[test]
    fn test_analyzer_without_findings_is_not_an_issue() {
        let mut results = ScanResults::new("/ws");
        results.record_analyzer_scan(AnalyzerKind::Iac, AnalyzerScanResponse::default(), 5);
        assert!(!results.has_issues());
        assert_eq!(results.oldest_scan_timestamp(), Some(5));
    }

    #[test]
    fn test_failed_files_count_as_information() {
        let mut results = ScanResults::new("/ws");
        results.record_failed_file("/ws/pom.xml", "mvn not found");
        assert!(!results.has_issues());
        assert!(results.has_information());
        assert_eq!(results.failed_files[0].name, "pom.xml");
    }

    #[test]
    fn test_oldest_scan_timestamp_is_minimum() {
        let mut results = ScanResults::new("/ws");
        results.descriptors_issues.push(descriptor(300));
        results
            .descriptors_issues
            .push(descriptor(400).with_applicability(ApplicabilityScanResponse::default(), 150));
        results.record_analyzer_scan(AnalyzerKind::Secrets, AnalyzerScanResponse::default(), 200);
        assert_eq!(results.oldest_scan_timestamp(), Some(150));
    }

    #[test]
    fn test_from_graph_scan_builds_impact_tree_per_issue() {
        let entry = |id: &str| ImpactPathEntry {
            component_id: id.to_string(),
        };
        let mut components = BTreeMap::new();
        components.insert(
            "npm://minimist:0.0.8".to_string(),
            GraphComponent {
                fixed_versions: vec!["1.2.6".to_string()],
                impact_paths: vec![vec![
                    entry("npm://app:1.0.0"),
                    entry("npm://mkdirp:0.5.1"),
                    entry("npm://minimist:0.0.8"),
                ]],
            },
        );
        let response = GraphResponse {
            vulnerabilities: vec![GraphIssue {
                issue_id: "XRAY-100".to_string(),
                severity: "High".to_string(),
                components,
                ..Default::default()
            }],
            ..Default::default()
        };

        let results =
            DependencyScanResults::from_graph_scan("/ws/package.json", PackageType::Npm, response, 1);

        assert_eq!(results.name, "package.json");
        let graph = &results.impact_tree_data["XRAY-100"];
        assert_eq!(
            graph.direct_dependencies().collect::<Vec<_>>(),
            ["npm://mkdirp:0.5.1"]
        );
    }

    #[test]
    fn test_applicability_lookup() {
        let mut response = ApplicabilityScanResponse {
            scanned_cves: vec!["CVE-1".to_string(), "CVE-2".to_string()],
            ..Default::default()
        };
        response.applicable_cves.insert("CVE-1".to_string(), Vec::new());

        assert_eq!(response.is_applicable("CVE-1"), Some(true));
        assert_eq!(response.is_applicable("CVE-2"), Some(false));
        assert_eq!(response.is_applicable("CVE-3"), None);
    }

    #[test]
    fn test_scan_strings() {
        assert_eq!(to_date(None), "Never");
        assert_eq!(last_scan_string(None), "");
        assert!(last_scan_string(Some(0)).starts_with("scan completed at '"));
        assert!(to_date(Some(0)).contains("1970"));
    }
}
