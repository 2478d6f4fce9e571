//! Direct-dependency diagnostics for descriptor files.
//!
//! A descriptor declares direct dependencies, but most issues are found in
//! transitive components. [`aggregate_direct_dependencies`] folds every issue
//! onto the direct dependency that pulled the infected component in, giving
//! one [`DirectDependencyInfo`] per declaration: a top severity for the gutter
//! icon and one entry per issue listing the infected components.
//!
//! The computation is pure; [`DiagnosticsCache`] keeps results per document
//! revision so a caller can skip recomputing unchanged documents.

use std::collections::hash_map::Entry;
use std::collections::{BTreeMap, HashMap, HashSet};

use crate::issues::DescriptorIssues;
use crate::model::{PackageType, Severity};

/// Zero-based line/character position in a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TextPosition {
    pub line: u32,
    pub character: u32,
}

/// Half-open range `[start, end)` in a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextRange {
    pub start: TextPosition,
    pub end: TextPosition,
}

impl TextRange {
    pub fn new(start_line: u32, start_character: u32, end_line: u32, end_character: u32) -> Self {
        Self {
            start: TextPosition {
                line: start_line,
                character: start_character,
            },
            end: TextPosition {
                line: end_line,
                character: end_character,
            },
        }
    }

    /// True when the ranges overlap or touch.
    pub fn intersects(&self, other: &TextRange) -> bool {
        self.start <= other.end && other.start <= self.end
    }
}

/// Finds where a component is declared in the document being annotated.
pub trait PositionResolver {
    fn dependency_ranges(&self, package_type: PackageType, component_id: &str) -> Vec<TextRange>;
}

impl<F> PositionResolver for F
where
    F: Fn(PackageType, &str) -> Vec<TextRange>,
{
    fn dependency_ranges(&self, package_type: PackageType, component_id: &str) -> Vec<TextRange> {
        self(package_type, component_id)
    }
}

/// One issue reaching a direct dependency, possibly through several
/// transitive components.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectDependencyIssue {
    pub issue_id: String,
    pub label: String,
    pub severity: Severity,
    /// Components carrying the issue, without duplicates, in discovery order.
    pub infected_dependencies: Vec<String>,
}

/// Aggregated issues of one direct dependency.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectDependencyInfo {
    pub severity: Severity,
    pub range: Vec<TextRange>,
    diagnostic_issues: Vec<DirectDependencyIssue>,
}

impl DirectDependencyInfo {
    fn new(range: Vec<TextRange>) -> Self {
        Self {
            severity: Severity::NotApplicableUnknown,
            range,
            diagnostic_issues: Vec::new(),
        }
    }

    pub fn issue(&self, issue_id: &str) -> Option<&DirectDependencyIssue> {
        self.diagnostic_issues.iter().find(|i| i.issue_id == issue_id)
    }

    /// Issues in discovery order.
    pub fn issues(&self) -> &[DirectDependencyIssue] {
        &self.diagnostic_issues
    }

    /// Issues by descending severity; equal severities keep discovery order.
    pub fn sorted_issues(&self) -> Vec<&DirectDependencyIssue> {
        let mut issues: Vec<&DirectDependencyIssue> = self.diagnostic_issues.iter().collect();
        issues.sort_by(|a, b| b.severity.cmp(&a.severity));
        issues
    }

    /// One diagnostic message per issue, most severe first.
    pub fn diagnostics(&self) -> Vec<DiagnosticMessage> {
        self.sorted_issues()
            .into_iter()
            .map(|issue| DiagnosticMessage {
                issue_id: issue.issue_id.clone(),
                message: format!(
                    "{} - Severity: {}\nImpacted Components: {}",
                    issue.label,
                    issue.severity,
                    issue.infected_dependencies.join(",")
                ),
            })
            .collect()
    }

    fn add_issue(&mut self, issue_id: &str, label: &str, severity: Severity, infected: &str) {
        if self.severity < severity {
            self.severity = severity;
        }
        let existing = self
            .diagnostic_issues
            .iter()
            .position(|i| i.issue_id == issue_id);
        match existing {
            Some(index) => {
                let infected_dependencies = &mut self.diagnostic_issues[index].infected_dependencies;
                if !infected_dependencies.iter().any(|d| d == infected) {
                    infected_dependencies.push(infected.to_string());
                }
            }
            None => self.diagnostic_issues.push(DirectDependencyIssue {
                issue_id: issue_id.to_string(),
                label: label.to_string(),
                severity,
                infected_dependencies: vec![infected.to_string()],
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiagnosticMessage {
    pub issue_id: String,
    pub message: String,
}

/// Direct dependency infos keyed by direct dependency id.
pub type ProcessedDependencies = BTreeMap<String, DirectDependencyInfo>;

/// Folds the issues of a descriptor onto its direct dependencies.
///
/// Direct dependencies are the first hop of each issue's impact graph. Those
/// the resolver cannot locate in the document are skipped.
pub fn aggregate_direct_dependencies<R>(descriptor: &DescriptorIssues, resolver: &R) -> ProcessedDependencies
where
    R: PositionResolver + ?Sized,
{
    let mut processed = ProcessedDependencies::new();
    let mut unresolved: HashSet<&str> = HashSet::new();

    for dependency in &descriptor.dependencies_with_issues {
        for issue in &dependency.issues {
            let Some(graph) = &issue.impact_graph else {
                continue;
            };
            for direct_id in graph.direct_dependencies() {
                if unresolved.contains(direct_id) {
                    continue;
                }
                if !processed.contains_key(direct_id) {
                    let range = resolver.dependency_ranges(dependency.package_type, direct_id);
                    if range.is_empty() {
                        unresolved.insert(direct_id);
                        continue;
                    }
                    processed.insert(direct_id.to_string(), DirectDependencyInfo::new(range));
                }
                if let Some(info) = processed.get_mut(direct_id) {
                    info.add_issue(
                        &issue.issue_id,
                        &issue.label,
                        issue.severity,
                        &dependency.component_id,
                    );
                }
            }
        }
    }
    processed
}

/// Distinct infected components of every direct dependency declared within
/// `range`.
pub fn infected_dependencies_in_range<'a>(
    processed: &'a ProcessedDependencies,
    range: &TextRange,
) -> Vec<&'a str> {
    let mut seen = HashSet::new();
    processed
        .values()
        .filter(|info| info.range.iter().any(|r| r.intersects(range)))
        .flat_map(|info| info.diagnostic_issues.iter())
        .flat_map(|issue| issue.infected_dependencies.iter())
        .map(String::as_str)
        .filter(|id| seen.insert(*id))
        .collect()
}

/// Identity of a document at a given revision.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DocumentKey {
    pub path: String,
    pub revision: u64,
}

impl DocumentKey {
    pub fn new(path: impl Into<String>, revision: u64) -> Self {
        Self {
            path: path.into(),
            revision,
        }
    }
}

/// Aggregation results per document, valid for one revision at a time.
#[derive(Debug, Default)]
pub struct DiagnosticsCache {
    entries: HashMap<String, (u64, ProcessedDependencies)>,
}

impl DiagnosticsCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached result for this exact revision.
    pub fn get(&self, key: &DocumentKey) -> Option<&ProcessedDependencies> {
        self.entries
            .get(&key.path)
            .filter(|(revision, _)| *revision == key.revision)
            .map(|(_, processed)| processed)
    }

    /// Returns the cached result for the revision, computing and replacing any
    /// older revision's result otherwise.
    pub fn get_or_compute<F>(&mut self, key: &DocumentKey, compute: F) -> &ProcessedDependencies
    where
        F: FnOnce() -> ProcessedDependencies,
    {
        match self.entries.entry(key.path.clone()) {
            Entry::Occupied(mut occupied) => {
                if occupied.get().0 != key.revision {
                    occupied.insert((key.revision, compute()));
                }
                &occupied.into_mut().1
            }
            Entry::Vacant(vacant) => &vacant.insert((key.revision, compute())).1,
        }
    }

    /// Drops the document's result, whatever its revision.
    pub fn invalidate(&mut self, path: &str) {
        self.entries.remove(path);
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
