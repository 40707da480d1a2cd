/// Population trees and networks laid out for post-order traversal
///
/// Nodes live in a flat arena and refer to their children through [`Edge`]s.
/// An edge names the branch leaving a node towards one of its parents: every
/// node owns one branch, except admixture nodes, which own one per parent.

use serde::{Deserialize, Serialize};

use crate::error::{LikelihoodError, Result};

/// Coalescent parameters of one branch
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct BranchParams {
    /// Branch length, in the units the branch model expects
    pub length: f64,
    /// Effective size of the population along the branch
    pub population_size: f64,
}

impl BranchParams {
    pub fn new(length: f64, population_size: f64) -> Self {
        Self {
            length,
            population_size,
        }
    }
}

/// The branch from `node` to its parent number `slot`
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Edge {
    pub node: usize,
    pub slot: usize,
}

impl Edge {
    /// The single branch of a non-admixture node
    pub fn to_parent(node: usize) -> Self {
        Self { node, slot: 0 }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum NodeKind {
    /// Sampled population; `population` indexes the pattern count vectors
    Leaf { population: usize },
    /// Two lineages joining into an ancestral population
    Bifurcating { left: Edge, right: Edge },
    /// Any number of lineages joining at once, merged one after another.
    /// A single child passes its lineage straight through.
    Polytomy { children: Vec<Edge> },
    /// One lineage inherited from two parents; each allele copy goes to
    /// parent 1 (branch slot 0) with probability `parent1_prob`
    Admixture { child: Edge, parent1_prob: f64 },
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PopulationNode {
    pub label: String,
    pub kind: NodeKind,
    /// One entry per parent; the root's single entry holds the root
    /// population parameters
    pub branches: Vec<BranchParams>,
}

impl PopulationNode {
    pub fn leaf(label: impl Into<String>, population: usize, branch: BranchParams) -> Self {
        Self {
            label: label.into(),
            kind: NodeKind::Leaf { population },
            branches: vec![branch],
        }
    }

    pub fn bifurcating(
        label: impl Into<String>,
        left: Edge,
        right: Edge,
        branch: BranchParams,
    ) -> Self {
        Self {
            label: label.into(),
            kind: NodeKind::Bifurcating { left, right },
            branches: vec![branch],
        }
    }

    pub fn polytomy(label: impl Into<String>, children: Vec<Edge>, branch: BranchParams) -> Self {
        Self {
            label: label.into(),
            kind: NodeKind::Polytomy { children },
            branches: vec![branch],
        }
    }

    pub fn admixture(
        label: impl Into<String>,
        child: Edge,
        parent1_prob: f64,
        branch_to_parent1: BranchParams,
        branch_to_parent2: BranchParams,
    ) -> Self {
        Self {
            label: label.into(),
            kind: NodeKind::Admixture {
                child,
                parent1_prob,
            },
            branches: vec![branch_to_parent1, branch_to_parent2],
        }
    }

    pub fn is_leaf(&self) -> bool {
        matches!(self.kind, NodeKind::Leaf { .. })
    }

    pub fn child_edges(&self) -> Vec<Edge> {
        match &self.kind {
            NodeKind::Leaf { .. } => Vec::new(),
            NodeKind::Bifurcating { left, right } => vec![*left, *right],
            NodeKind::Polytomy { children } => children.clone(),
            NodeKind::Admixture { child, .. } => vec![*child],
        }
    }
}

/// Validated population tree or network
#[derive(Clone, Debug)]
pub struct PopulationNetwork {
    nodes: Vec<PopulationNode>,
    root: usize,
    /// Children before parents, every node exactly once
    postorder: Vec<usize>,
    n_populations: usize,
}

impl PopulationNetwork {
    /// Validate the topology and compute its post-order.
    pub fn from_nodes(nodes: Vec<PopulationNode>) -> Result<Self> {
        let n_nodes = nodes.len();
        if n_nodes == 0 {
            return Err(LikelihoodError::invalid_network("network has no nodes"));
        }

        let mut edge_users: Vec<Vec<Option<usize>>> = Vec::with_capacity(n_nodes);
        for node in &nodes {
            let expected = match &node.kind {
                NodeKind::Polytomy { children } if children.is_empty() => {
                    return Err(LikelihoodError::invalid_network(format!(
                        "polytomy '{}' has no children",
                        node.label
                    )));
                }
                &NodeKind::Admixture { parent1_prob, .. } => {
                    if !(0.0..=1.0).contains(&parent1_prob) {
                        return Err(LikelihoodError::invalid_network(format!(
                            "admixture node '{}' has inheritance probability {}",
                            node.label, parent1_prob
                        )));
                    }
                    2
                }
                _ => 1,
            };
            if node.branches.len() != expected {
                return Err(LikelihoodError::invalid_network(format!(
                    "node '{}' needs {} branch(es), got {}",
                    node.label,
                    expected,
                    node.branches.len()
                )));
            }
            edge_users.push(vec![None; expected]);
        }

        for (parent, node) in nodes.iter().enumerate() {
            for edge in node.child_edges() {
                let slot = edge_users
                    .get_mut(edge.node)
                    .and_then(|slots| slots.get_mut(edge.slot))
                    .ok_or_else(|| {
                        LikelihoodError::invalid_network(format!(
                            "node '{}' refers to missing branch {}:{}",
                            node.label, edge.node, edge.slot
                        ))
                    })?;
                if let Some(other) = slot {
                    return Err(LikelihoodError::invalid_network(format!(
                        "branch {}:{} is claimed by both '{}' and '{}'",
                        edge.node, edge.slot, nodes[*other].label, node.label
                    )));
                }
                *slot = Some(parent);
            }
        }

        // The root is the only node none of whose branches is claimed
        let mut root: Option<usize> = None;
        for (idx, slots) in edge_users.iter().enumerate() {
            let claimed = slots.iter().filter(|s| s.is_some()).count();
            if claimed == slots.len() {
                continue;
            }
            if claimed > 0 || matches!(nodes[idx].kind, NodeKind::Admixture { .. }) {
                return Err(LikelihoodError::invalid_network(format!(
                    "admixture node '{}' must have both parents",
                    nodes[idx].label
                )));
            }
            if let Some(previous) = root {
                return Err(LikelihoodError::invalid_network(format!(
                    "both '{}' and '{}' have no parent",
                    nodes[previous].label, nodes[idx].label
                )));
            }
            root = Some(idx);
        }
        let root = root.ok_or_else(|| LikelihoodError::invalid_network("no root node found"))?;

        let mut populations: Vec<usize> = nodes
            .iter()
            .filter_map(|node| match node.kind {
                NodeKind::Leaf { population } => Some(population),
                _ => None,
            })
            .collect();
        populations.sort_unstable();
        if populations.iter().enumerate().any(|(i, &p)| i != p) {
            return Err(LikelihoodError::invalid_network(format!(
                "leaf populations must be 0..{} with no repeats, got {:?}",
                populations.len(),
                populations
            )));
        }
        let n_populations = populations.len();

        let postorder = compute_postorder(&nodes, root)?;
        if postorder.len() != n_nodes {
            return Err(LikelihoodError::invalid_network(format!(
                "{} of {} nodes are not reachable from the root",
                n_nodes - postorder.len(),
                n_nodes
            )));
        }

        Ok(Self {
            nodes,
            root,
            postorder,
            n_populations,
        })
    }

    pub fn root(&self) -> usize {
        self.root
    }

    pub fn nodes(&self) -> &[PopulationNode] {
        &self.nodes
    }

    pub fn node(&self, idx: usize) -> &PopulationNode {
        &self.nodes[idx]
    }

    pub fn postorder(&self) -> &[usize] {
        &self.postorder
    }

    pub fn number_of_populations(&self) -> usize {
        self.n_populations
    }

    pub fn number_of_nodes(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_tree(&self) -> bool {
        !self
            .nodes
            .iter()
            .any(|n| matches!(n.kind, NodeKind::Admixture { .. }))
    }
}

#[derive(Clone, Copy, PartialEq)]
enum Mark {
    Unvisited,
    InProgress,
    Done,
}

/// Depth-first post-order from the root. Admixture nodes are reachable from
/// two parents but are emitted once.
fn compute_postorder(nodes: &[PopulationNode], root: usize) -> Result<Vec<usize>> {
    fn visit(
        node: usize,
        nodes: &[PopulationNode],
        marks: &mut [Mark],
        postorder: &mut Vec<usize>,
    ) -> Result<()> {
        match marks[node] {
            Mark::Done => return Ok(()),
            Mark::InProgress => {
                return Err(LikelihoodError::invalid_network(format!(
                    "cycle through node '{}'",
                    nodes[node].label
                )))
            }
            Mark::Unvisited => {}
        }
        marks[node] = Mark::InProgress;
        for edge in nodes[node].child_edges() {
            visit(edge.node, nodes, marks, postorder)?;
        }
        marks[node] = Mark::Done;
        postorder.push(node);
        Ok(())
    }

    let mut marks = vec![Mark::Unvisited; nodes.len()];
    let mut postorder = Vec::with_capacity(nodes.len());
    visit(root, nodes, &mut marks, &mut postorder)?;
    Ok(postorder)
}
