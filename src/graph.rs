//! Operation graph construction.
//!
//! The graph builder merges the planned resource set with the prior
//! snapshot into one acyclic graph: a synthetic root plus one node per
//! resource key in `planned ∪ prior`. Edges encode declared dependencies,
//! implicit reference edges discovered in attribute trees, and reversed
//! dependencies for delete nodes so dependents are removed before the
//! resources they depend on.
//!
//! The builder also fixes the deterministic key order every ledger uses:
//! a Kahn walk that breaks ties lexicographically by resource id.

use crate::error::{Error, Result};
use crate::ledger::Action;
use crate::resolver;
use crate::resource::{index_by_id, Resource};
use crate::spec::Spec;
use petgraph::algo::tarjan_scc;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;
use std::collections::{BTreeMap, HashMap};

// =============================================================================
// Nodes
// =============================================================================

/// One resource's slot in the operation graph.
///
/// `action` is tentative for update candidates: the classifier may still
/// rewrite it to `Unchanged` (live equals planned) or `Create` (the
/// runtime no longer knows the resource).
#[derive(Debug, Clone)]
pub struct ResourceNode {
    pub id: String,
    pub action: Action,
    /// Entry from the intent spec; `None` for delete nodes.
    pub planned: Option<Resource>,
    /// Entry from the prior snapshot; `None` for create nodes.
    pub prior: Option<Resource>,
}

#[derive(Debug)]
enum GraphNode {
    Root,
    Resource(ResourceNode),
}

// =============================================================================
// Graph
// =============================================================================

/// The acyclic graph one operation walks.
#[derive(Debug)]
pub struct OperationGraph {
    graph: DiGraph<GraphNode, ()>,
    root: NodeIndex,
    order: Vec<String>,
}

impl OperationGraph {
    /// Builds the graph for `planned ∪ prior` and verifies acyclicity.
    pub fn build(spec: &Spec, prior: &[Resource]) -> Result<Self> {
        spec.validate()?;

        let planned_index = index_by_id(&spec.resources);
        let prior_index = index_by_id(prior);

        let mut graph: DiGraph<GraphNode, ()> = DiGraph::new();
        let root = graph.add_node(GraphNode::Root);
        let mut by_id: HashMap<String, NodeIndex> = HashMap::new();

        // Nodes: planned resources first (declaration order), then orphaned
        // prior resources which become delete nodes.
        for resource in &spec.resources {
            let action = if prior_index.contains_key(&resource.id) {
                Action::Update
            } else {
                Action::Create
            };
            let node = ResourceNode {
                id: resource.id.clone(),
                action,
                planned: Some(resource.clone()),
                prior: prior_index.get(&resource.id).cloned(),
            };
            let idx = graph.add_node(GraphNode::Resource(node));
            by_id.insert(resource.id.clone(), idx);
        }
        for resource in prior {
            if planned_index.contains_key(&resource.id) {
                continue;
            }
            let node = ResourceNode {
                id: resource.id.clone(),
                action: Action::Delete,
                planned: None,
                prior: Some(resource.clone()),
            };
            let idx = graph.add_node(GraphNode::Resource(node));
            by_id.insert(resource.id.clone(), idx);
        }

        // Declared dependencies: dependency before dependent.
        for resource in &spec.resources {
            let to = by_id[&resource.id];
            for dep in &resource.depends_on {
                let from = by_id[dep.as_str()];
                graph.update_edge(from, to, ());
            }
        }

        // Implicit reference edges: a placeholder target must be final
        // before the referring node runs.
        for resource in &spec.resources {
            let to = by_id[&resource.id];
            for target in resolver::referred_ids(&resource.attributes) {
                if !planned_index.contains_key(&target) {
                    return Err(Error::IllegalManifest(format!(
                        "resource {} references unknown resource {}",
                        resource.id, target
                    )));
                }
                let from = by_id[&target];
                if from != to {
                    graph.update_edge(from, to, ());
                }
            }
        }

        // Delete nodes reverse their declared dependencies: the dependent
        // is removed before the resource it depended on.
        for resource in prior {
            if planned_index.contains_key(&resource.id) {
                continue;
            }
            let from = by_id[&resource.id];
            for dep in &resource.depends_on {
                if let Some(&to) = by_id.get(dep.as_str()) {
                    graph.update_edge(from, to, ());
                }
            }
        }

        // Root fans out to every node without another in-edge.
        for (_, &idx) in &by_id {
            if graph
                .neighbors_directed(idx, Direction::Incoming)
                .next()
                .is_none()
            {
                graph.add_edge(root, idx, ());
            }
        }

        let mut built = Self {
            graph,
            root,
            order: Vec::new(),
        };
        built.order = built.sort_keys()?;
        Ok(built)
    }

    /// Kahn walk with a lexicographic ready set; rejects cycles with an
    /// explicit cycle listing.
    fn sort_keys(&self) -> Result<Vec<String>> {
        let mut in_degree: HashMap<NodeIndex, usize> = self
            .graph
            .node_indices()
            .map(|idx| {
                (
                    idx,
                    self.graph
                        .neighbors_directed(idx, Direction::Incoming)
                        .count(),
                )
            })
            .collect();

        let mut ready: BTreeMap<String, NodeIndex> = BTreeMap::new();
        let mut order = Vec::new();
        let mut visited = 0usize;

        // The root is the only node without in-edges.
        let release = |idx: NodeIndex,
                           in_degree: &mut HashMap<NodeIndex, usize>,
                           ready: &mut BTreeMap<String, NodeIndex>,
                           graph: &DiGraph<GraphNode, ()>| {
            for succ in graph.neighbors_directed(idx, Direction::Outgoing) {
                let remaining = in_degree.get_mut(&succ).expect("known node");
                *remaining -= 1;
                if *remaining == 0 {
                    if let GraphNode::Resource(node) = &graph[succ] {
                        ready.insert(node.id.clone(), succ);
                    }
                }
            }
        };

        visited += 1;
        release(self.root, &mut in_degree, &mut ready, &self.graph);

        while let Some((id, idx)) = ready.pop_first() {
            order.push(id);
            visited += 1;
            release(idx, &mut in_degree, &mut ready, &self.graph);
        }

        if visited != self.graph.node_count() {
            return Err(Error::IllegalManifest(format!(
                "cycle detected: {}",
                self.describe_cycle()
            )));
        }
        Ok(order)
    }

    /// Formats one offending cycle for the rejection message.
    fn describe_cycle(&self) -> String {
        for scc in tarjan_scc(&self.graph) {
            if scc.len() < 2 {
                continue;
            }
            let mut ids: Vec<&str> = scc
                .iter()
                .filter_map(|&idx| match &self.graph[idx] {
                    GraphNode::Resource(node) => Some(node.id.as_str()),
                    GraphNode::Root => None,
                })
                .collect();
            ids.sort_unstable();
            if let Some(first) = ids.first().copied() {
                let mut path = ids.join(" -> ");
                path.push_str(" -> ");
                path.push_str(first);
                return path;
            }
        }
        "unknown cycle".to_string()
    }

    /// Deterministic topological key order (lexicographic tie-break); the
    /// ledger's step-key sequence.
    pub fn sorted_keys(&self) -> &[String] {
        &self.order
    }

    /// Returns the node for a resource id.
    pub fn node(&self, id: &str) -> Option<&ResourceNode> {
        self.graph.node_indices().find_map(|idx| match &self.graph[idx] {
            GraphNode::Resource(node) if node.id == id => Some(node),
            _ => None,
        })
    }

    /// Number of resource nodes (the root is not counted).
    pub fn resource_count(&self) -> usize {
        self.graph.node_count() - 1
    }

    // =========================================================================
    // Walker Access
    // =========================================================================

    pub(crate) fn root_index(&self) -> NodeIndex {
        self.root
    }

    pub(crate) fn node_indices(&self) -> impl Iterator<Item = NodeIndex> + '_ {
        self.graph.node_indices()
    }

    pub(crate) fn resource_at(&self, idx: NodeIndex) -> Option<&ResourceNode> {
        match &self.graph[idx] {
            GraphNode::Resource(node) => Some(node),
            GraphNode::Root => None,
        }
    }

    pub(crate) fn in_degree(&self, idx: NodeIndex) -> usize {
        self.graph
            .neighbors_directed(idx, Direction::Incoming)
            .count()
    }

    pub(crate) fn successors(&self, idx: NodeIndex) -> impl Iterator<Item = NodeIndex> + '_ {
        self.graph.neighbors_directed(idx, Direction::Outgoing)
    }
}
