//! Conversion of a resolved dependency tree into a graph scan request.
//!
//! Two shapes are supported:
//! - [`GraphMode::Hierarchical`] mirrors the tree, so a component reached
//!   through two branches is sent twice.
//! - [`GraphMode::Flattened`] sends every dependency once, in traversal order,
//!   directly under the root.
//!
//! Trees must be finite and acyclic; the builder does not detect cycles.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::config::Config;
use crate::model::{GraphNode, GraphRequest};

/// A resolved dependency tree: the project at the root, its direct
/// dependencies below it and their transitive dependencies further down.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencyTree {
    pub dependency_id: String,
    #[serde(default)]
    pub children: Vec<DependencyTree>,
}

impl DependencyTree {
    pub fn new(dependency_id: impl Into<String>, children: Vec<DependencyTree>) -> Self {
        Self {
            dependency_id: dependency_id.into(),
            children,
        }
    }

    pub fn leaf(dependency_id: impl Into<String>) -> Self {
        Self::new(dependency_id, Vec::new())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GraphMode {
    Hierarchical,
    #[default]
    Flattened,
}

impl GraphMode {
    pub fn from_flatten(flatten: bool) -> Self {
        if flatten {
            GraphMode::Flattened
        } else {
            GraphMode::Hierarchical
        }
    }
}

/// Builds [`GraphRequest`]s with the scoping parameters attached.
///
/// # Example
///
/// ```
/// use scanvault::request::{DependencyTree, GraphMode, GraphRequestBuilder};
///
/// let tree = DependencyTree::new(
///     "npm://app:1.0.0",
///     vec![
///         DependencyTree::new("npm://a:1.0.0", vec![DependencyTree::leaf("npm://c:1.0.0")]),
///         DependencyTree::new("npm://b:1.0.0", vec![DependencyTree::leaf("npm://c:1.0.0")]),
///     ],
/// );
///
/// let request = GraphRequestBuilder::new().build(&tree, GraphMode::Flattened);
/// assert_eq!(request.nodes.len(), 3);
/// ```
#[derive(Debug, Clone, Default)]
pub struct GraphRequestBuilder {
    project_key: Option<String>,
    watches: Vec<String>,
}

impl GraphRequestBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(config: &Config) -> Self {
        Self {
            project_key: config.project_key.clone(),
            watches: config.watches.clone(),
        }
    }

    pub fn with_project_key(mut self, project_key: impl Into<String>) -> Self {
        self.project_key = Some(project_key.into());
        self
    }

    pub fn with_watches(mut self, watches: Vec<String>) -> Self {
        self.watches = watches;
        self
    }

    pub fn build(&self, root: &DependencyTree, mode: GraphMode) -> GraphRequest {
        let nodes = match mode {
            GraphMode::Hierarchical => hierarchical_nodes(root),
            GraphMode::Flattened => {
                let mut seen = HashSet::new();
                let mut nodes = Vec::new();
                flattened_nodes(root, &mut seen, &mut nodes);
                nodes
            }
        };

        GraphRequest {
            component_id: root.dependency_id.clone(),
            nodes,
            project_key: self.project_key.clone(),
            watches: self.watches.clone(),
        }
    }
}

fn hierarchical_nodes(dependency: &DependencyTree) -> Vec<GraphNode> {
    dependency
        .children
        .iter()
        .map(|child| GraphNode {
            component_id: child.dependency_id.clone(),
            nodes: hierarchical_nodes(child),
        })
        .collect()
}

/// Pre-order traversal emitting each non-empty id once.
fn flattened_nodes<'a>(
    dependency: &'a DependencyTree,
    seen: &mut HashSet<&'a str>,
    nodes: &mut Vec<GraphNode>,
) {
    for child in &dependency.children {
        let id = child.dependency_id.as_str();
        if !id.is_empty() && seen.insert(id) {
            nodes.push(GraphNode::leaf(id));
        }
        flattened_nodes(child, seen, nodes);
    }
}
