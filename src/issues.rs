//! Issue tree built from a [`ScanResults`] snapshot.
//!
//! Each scanned file becomes a [`FileNode`]. Descriptors list their
//! dependencies with issues, source files list analyzer findings, and files
//! that failed to scan carry the failure reason instead of issues.

use std::collections::HashMap;

use crate::model::{
    last_scan_string, AnalyzerFinding, AnalyzerKind, DependencyScanResults, GraphIssue,
    ImpactGraph, PackageType, ScanResults, Severity, Timestamp,
};

/// One issue affecting a component.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssueNode {
    pub issue_id: String,
    pub label: String,
    pub severity: Severity,
    pub cves: Vec<String>,
    /// Paths from the scanned root to the component carrying this issue.
    pub impact_graph: Option<ImpactGraph>,
}

/// A component (direct or transitive) carrying at least one issue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DependencyWithIssues {
    pub component_id: String,
    pub package_type: PackageType,
    pub fixed_versions: Vec<String>,
    pub severity: Severity,
    pub issues: Vec<IssueNode>,
}

/// Dependency issues of one descriptor, or of the whole workspace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DescriptorIssues {
    pub name: String,
    pub full_path: String,
    pub package_type: PackageType,
    pub timestamp: Option<Timestamp>,
    pub severity: Severity,
    pub dependencies_with_issues: Vec<DependencyWithIssues>,
}

impl DescriptorIssues {
    pub fn from_scan(scan: &DependencyScanResults) -> Self {
        let applicability = scan.applicable_issues.as_ref();
        let mut dependencies: Vec<DependencyWithIssues> = Vec::new();
        let mut index: HashMap<&str, usize> = HashMap::new();

        for issue in scan.dependencies_graph_scan.issues() {
            let severity = match applicability {
                Some(response) if is_not_applicable(issue, |cve| response.is_applicable(cve)) => {
                    issue.severity().to_not_applicable()
                }
                _ => issue.severity(),
            };

            for (component_id, component) in &issue.components {
                let position = *index.entry(component_id.as_str()).or_insert_with(|| {
                    dependencies.push(DependencyWithIssues {
                        component_id: component_id.clone(),
                        package_type: scan.package_type,
                        fixed_versions: Vec::new(),
                        severity: Severity::default(),
                        issues: Vec::new(),
                    });
                    dependencies.len() - 1
                });
                let dependency = &mut dependencies[position];

                let impact_graph =
                    ImpactGraph::from_paths(component.impact_paths.iter().map(Vec::as_slice))
                        .or_else(|| scan.impact_tree_data.get(&issue.issue_id).cloned());
                for version in &component.fixed_versions {
                    if !dependency.fixed_versions.contains(version) {
                        dependency.fixed_versions.push(version.clone());
                    }
                }
                dependency.severity = dependency.severity.max(severity);
                dependency.issues.push(IssueNode {
                    issue_id: issue.issue_id.clone(),
                    label: issue.label().to_string(),
                    severity,
                    cves: issue.cves.iter().filter_map(|c| c.cve.clone()).collect(),
                    impact_graph,
                });
            }
        }

        for dependency in &mut dependencies {
            dependency.issues.sort_by(|a, b| b.severity.cmp(&a.severity));
        }
        dependencies.sort_by(|a, b| b.severity.cmp(&a.severity));

        Self {
            name: scan.name.clone(),
            full_path: scan.full_path.clone(),
            package_type: scan.package_type,
            timestamp: Some(scan.graph_scan_timestamp),
            severity: dependencies
                .iter()
                .map(|d| d.severity)
                .max()
                .unwrap_or(Severity::Unknown),
            dependencies_with_issues: dependencies,
        }
    }

    pub fn dependency_by_id(&self, component_id: &str) -> Option<&DependencyWithIssues> {
        self.dependencies_with_issues
            .iter()
            .find(|d| d.component_id == component_id)
    }

    pub fn issue_count(&self) -> usize {
        self.dependencies_with_issues
            .iter()
            .map(|d| d.issues.len())
            .sum()
    }
}

/// Not applicable only when every CVE of the issue was scanned and none is
/// reachable.
fn is_not_applicable(issue: &GraphIssue, lookup: impl Fn(&str) -> Option<bool>) -> bool {
    let mut cves = issue.cves.iter().filter_map(|c| c.cve.as_deref()).peekable();
    if cves.peek().is_none() {
        return false;
    }
    cves.all(|cve| lookup(cve) == Some(false))
}

/// Analyzer findings of one source file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeFileIssues {
    pub name: String,
    pub full_path: String,
    pub severity: Severity,
    pub findings: Vec<(AnalyzerKind, AnalyzerFinding)>,
    pub timestamp: Option<Timestamp>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileNode {
    Descriptor(DescriptorIssues),
    Code(CodeFileIssues),
    Failed {
        name: String,
        full_path: String,
        reason: Option<String>,
    },
}

impl FileNode {
    pub fn name(&self) -> &str {
        match self {
            FileNode::Descriptor(d) => &d.name,
            FileNode::Code(c) => &c.name,
            FileNode::Failed { name, .. } => name,
        }
    }

    pub fn full_path(&self) -> &str {
        match self {
            FileNode::Descriptor(d) => &d.full_path,
            FileNode::Code(c) => &c.full_path,
            FileNode::Failed { full_path, .. } => full_path,
        }
    }

    pub fn severity(&self) -> Severity {
        match self {
            FileNode::Descriptor(d) => d.severity,
            FileNode::Code(c) => c.severity,
            FileNode::Failed { .. } => Severity::Unknown,
        }
    }

    pub fn issue_count(&self) -> usize {
        match self {
            FileNode::Descriptor(d) => d.issue_count(),
            FileNode::Code(c) => c.findings.len(),
            FileNode::Failed { .. } => 0,
        }
    }

    pub fn timestamp(&self) -> Option<Timestamp> {
        match self {
            FileNode::Descriptor(d) => d.timestamp,
            FileNode::Code(c) => c.timestamp,
            FileNode::Failed { .. } => None,
        }
    }

    /// Path relative to the workspace when the file lives inside it.
    pub fn description(&self, workspace: &str) -> String {
        match self {
            FileNode::Failed { .. } => "Fail to scan file".to_string(),
            _ => relative_path(self.full_path(), workspace),
        }
    }

    pub fn label(&self) -> String {
        match self {
            FileNode::Failed {
                name,
                reason: Some(reason),
                ..
            } => format!("{} - {}", name, reason),
            _ => self.name().to_string(),
        }
    }

    pub fn tooltip(&self) -> String {
        if let FileNode::Failed { full_path, .. } = self {
            return full_path.clone();
        }
        format!(
            "Top severity: {}\nIssues count: {}\nFull path: {}\nLast {}",
            self.severity(),
            self.issue_count(),
            self.full_path(),
            last_scan_string(self.timestamp())
        )
    }
}

fn relative_path(full: &str, workspace: &str) -> String {
    match full.strip_prefix(workspace) {
        Some(rest) if !workspace.is_empty() => {
            format!(".{}", rest)
        }
        _ => full.to_string(),
    }
}

/// Builds the file nodes of a workspace, most severe first.
///
/// Failed files come last, in the order they were recorded.
pub fn build_issues_tree(results: &ScanResults) -> Vec<FileNode> {
    let mut nodes: Vec<FileNode> = results
        .descriptors_issues
        .iter()
        .chain(results.workspace_issues.iter())
        .map(|scan| FileNode::Descriptor(DescriptorIssues::from_scan(scan)))
        .collect();

    let mut code_files: Vec<CodeFileIssues> = Vec::new();
    for kind in [AnalyzerKind::Eos, AnalyzerKind::Iac, AnalyzerKind::Secrets] {
        let (scan, timestamp) = results.analyzer_scan(kind);
        for file in &scan.files_with_issues {
            let position = match code_files.iter().position(|c| c.full_path == file.full_path) {
                Some(position) => position,
                None => {
                    code_files.push(CodeFileIssues {
                        name: crate::model::last_segment(&file.full_path).to_string(),
                        full_path: file.full_path.clone(),
                        severity: Severity::Unknown,
                        findings: Vec::new(),
                        timestamp,
                    });
                    code_files.len() - 1
                }
            };
            let code_file = &mut code_files[position];
            code_file.timestamp = match (code_file.timestamp, timestamp) {
                (Some(a), Some(b)) => Some(a.min(b)),
                (a, b) => a.or(b),
            };
            for finding in &file.issues {
                code_file.severity = code_file.severity.max(finding.severity);
                code_file.findings.push((kind, finding.clone()));
            }
        }
    }
    nodes.extend(code_files.into_iter().map(FileNode::Code));
    nodes.sort_by(|a, b| b.severity().cmp(&a.severity()));

    nodes.extend(results.failed_files.iter().map(|file| FileNode::Failed {
        name: file.name.clone(),
        full_path: file.full_path.clone(),
        reason: file.reason.clone(),
    }));
    nodes
}
