//! Wire types exchanged with the remote graph scanning service, plus the
//! impact graph derived from its responses.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

use super::Severity;

/// One node of a graph scan request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphNode {
    pub component_id: String,
    #[serde(default)]
    pub nodes: Vec<GraphNode>,
}

impl GraphNode {
    pub fn leaf(component_id: impl Into<String>) -> Self {
        Self {
            component_id: component_id.into(),
            nodes: Vec::new(),
        }
    }
}

/// Request body of a graph scan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphRequest {
    pub component_id: String,
    #[serde(default)]
    pub nodes: Vec<GraphNode>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project_key: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub watches: Vec<String>,
}

/// Response of a graph scan.
///
/// Vulnerabilities are returned when the scan is unscoped, violations when a
/// project key or watches were supplied.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphResponse {
    #[serde(default)]
    pub scan_id: String,
    #[serde(default)]
    pub component_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub package_type: Option<String>,
    #[serde(default)]
    pub vulnerabilities: Vec<GraphIssue>,
    #[serde(default)]
    pub violations: Vec<GraphIssue>,
    #[serde(default)]
    pub licenses: Vec<GraphLicense>,
}

impl GraphResponse {
    /// Iterates vulnerabilities followed by violations.
    pub fn issues(&self) -> impl Iterator<Item = &GraphIssue> {
        self.vulnerabilities.iter().chain(self.violations.iter())
    }

    pub fn has_issues(&self) -> bool {
        !self.vulnerabilities.is_empty() || !self.violations.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphIssue {
    pub issue_id: String,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub severity: String,
    #[serde(default)]
    pub cves: Vec<GraphCve>,
    /// Affected components keyed by component id.
    #[serde(default)]
    pub components: BTreeMap<String, GraphComponent>,
}

impl GraphIssue {
    pub fn severity(&self) -> Severity {
        Severity::from_service(&self.severity)
    }

    /// Summary when present, the issue id otherwise.
    pub fn label(&self) -> &str {
        if self.summary.is_empty() {
            &self.issue_id
        } else {
            &self.summary
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphCve {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cve: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cvss_v3_score: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphComponent {
    #[serde(default)]
    pub fixed_versions: Vec<String>,
    /// Each path runs from the scanned root down to this component.
    #[serde(default)]
    pub impact_paths: Vec<Vec<ImpactPathEntry>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImpactPathEntry {
    pub component_id: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphLicense {
    pub license_key: String,
    #[serde(default)]
    pub license_name: String,
    #[serde(default)]
    pub components: BTreeMap<String, GraphComponent>,
}

/// Chain of components through which an issue reaches the scanned root.
///
/// The root is the scanned project, its children are direct dependencies and
/// leaves are the infected components. No component appears twice on a single
/// root-to-leaf path; construction truncates a branch at the first repeat.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "RawImpactGraph")]
pub struct ImpactGraph {
    pub name: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<ImpactGraph>,
}

/// Unchecked shape of a stored graph.
#[derive(Deserialize)]
struct RawImpactGraph {
    name: String,
    #[serde(default)]
    children: Vec<ImpactGraph>,
}

impl From<RawImpactGraph> for ImpactGraph {
    fn from(raw: RawImpactGraph) -> Self {
        ImpactGraph::new(raw.name, raw.children)
    }
}

impl ImpactGraph {
    pub fn new(name: impl Into<String>, children: Vec<ImpactGraph>) -> Self {
        let mut graph = Self {
            name: name.into(),
            children,
        };
        let mut ancestors = HashSet::new();
        graph.prune_cycles(&mut ancestors);
        graph
    }

    pub fn leaf(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            children: Vec::new(),
        }
    }

    /// Merges impact paths sharing a common root into one graph.
    ///
    /// The root is taken from the first non-empty path. Returns `None` when
    /// every path is empty.
    pub fn from_paths<'a, I>(paths: I) -> Option<Self>
    where
        I: IntoIterator<Item = &'a [ImpactPathEntry]>,
    {
        let mut root: Option<ImpactGraph> = None;
        for path in paths {
            let Some((head, tail)) = path.split_first() else {
                continue;
            };
            let root = root.get_or_insert_with(|| ImpactGraph::leaf(head.component_id.clone()));
            let mut ancestors = HashSet::from([root.name.clone()]);
            root.insert_path(tail, &mut ancestors);
        }
        root
    }

    fn insert_path(&mut self, rest: &[ImpactPathEntry], ancestors: &mut HashSet<String>) {
        let Some((head, tail)) = rest.split_first() else {
            return;
        };
        if !ancestors.insert(head.component_id.clone()) {
            return;
        }
        let existing = self
            .children
            .iter()
            .position(|child| child.name == head.component_id);
        let index = match existing {
            Some(index) => index,
            None => {
                self.children
                    .push(ImpactGraph::leaf(head.component_id.clone()));
                self.children.len() - 1
            }
        };
        self.children[index].insert_path(tail, ancestors);
    }

    fn prune_cycles(&mut self, ancestors: &mut HashSet<String>) {
        ancestors.insert(self.name.clone());
        self.children.retain(|child| !ancestors.contains(&child.name));
        for child in &mut self.children {
            child.prune_cycles(ancestors);
        }
        ancestors.remove(&self.name);
    }

    /// Names of the first hop below the root.
    pub fn direct_dependencies(&self) -> impl Iterator<Item = &str> {
        self.children.iter().map(|child| child.name.as_str())
    }
}
