//! DAG structure: node typing, entry point, cycle check, topological order.

use std::collections::{HashMap, HashSet, VecDeque};

/// How a step node declares its concurrency relationship with siblings.
///
/// `Parallel` is a declaration of independence, not a concurrency mandate —
/// the reference scheduler is free to walk parallel nodes one at a time in
/// topological order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeType {
    Sequential,
    Parallel,
}

/// Errors that can occur while validating a [`Graph`]. All are fatal to
/// `Builder::build` and never occur at runtime.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum GraphError {
    #[error("node '{0}' is already registered")]
    DuplicateNode(String),

    #[error("edge references unknown node '{0}'")]
    DanglingEdge(String),

    #[error("graph contains a cycle involving node '{0}'")]
    Cycle(String),

    #[error("no entry point set and no node has zero in-degree")]
    MissingEntryPoint,

    #[error("multiple nodes have zero in-degree: {0:?}; an entry point must be set explicitly")]
    AmbiguousEntryPoint(Vec<String>),

    #[error("entry point '{0}' is not a registered node")]
    UnknownEntryPoint(String),

    #[error("node '{0}' is unreachable from the entry point")]
    UnreachableNode(String),
}

/// A directed acyclic graph of step ids.
///
/// Tie-breaks in [`Graph::topological_order`] use insertion order, which is
/// what makes "the last step's output" a stable, replay-safe definition of
/// workflow output.
#[derive(Debug, Clone, Default)]
pub struct Graph {
    nodes: Vec<String>,
    node_types: HashMap<String, NodeType>,
    edges: Vec<(String, String)>,
    entry_point: Option<String>,
}

impl Graph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a node. Re-registering an existing id is an error.
    pub fn add_node(&mut self, id: impl Into<String>, node_type: NodeType) -> Result<(), GraphError> {
        let id = id.into();
        if self.node_types.contains_key(&id) {
            return Err(GraphError::DuplicateNode(id));
        }
        self.node_types.insert(id.clone(), node_type);
        self.nodes.push(id);
        Ok(())
    }

    /// Update the node type of an already-registered node.
    pub fn update_node_type(&mut self, id: &str, node_type: NodeType) -> Result<(), GraphError> {
        let entry = self
            .node_types
            .get_mut(id)
            .ok_or_else(|| GraphError::DanglingEdge(id.to_string()))?;
        *entry = node_type;
        Ok(())
    }

    /// Add a "from must precede to" edge. Endpoints need not exist yet;
    /// dangling edges are caught at [`Graph::validate`] time.
    pub fn add_edge(&mut self, from: impl Into<String>, to: impl Into<String>) {
        self.edges.push((from.into(), to.into()));
    }

    pub fn set_entry_point(&mut self, id: impl Into<String>) {
        self.entry_point = Some(id.into());
    }

    pub fn entry_point(&self) -> Option<&str> {
        self.entry_point.as_deref()
    }

    pub fn nodes(&self) -> impl Iterator<Item = &str> {
        self.nodes.iter().map(String::as_str)
    }

    pub fn edges(&self) -> impl Iterator<Item = (&str, &str)> {
        self.edges.iter().map(|(a, b)| (a.as_str(), b.as_str()))
    }

    pub fn node_type(&self, id: &str) -> Option<NodeType> {
        self.node_types.get(id).copied()
    }

    pub fn contains_node(&self, id: &str) -> bool {
        self.node_types.contains_key(id)
    }

    /// Predecessors of `id`, in the order their edges were inserted.
    pub fn predecessors(&self, id: &str) -> Vec<&str> {
        self.edges
            .iter()
            .filter(|(_, to)| to == id)
            .map(|(from, _)| from.as_str())
            .collect()
    }

    fn zero_in_degree_nodes(&self) -> Vec<&str> {
        let mut has_predecessor: HashSet<&str> = HashSet::new();
        for (_, to) in &self.edges {
            has_predecessor.insert(to.as_str());
        }
        self.nodes
            .iter()
            .map(String::as_str)
            .filter(|n| !has_predecessor.contains(n))
            .collect()
    }

    /// Resolve the effective entry point: the explicit one if set, otherwise
    /// the unique zero in-degree node.
    pub fn resolve_entry_point(&self) -> Result<String, GraphError> {
        if let Some(explicit) = &self.entry_point {
            if !self.node_types.contains_key(explicit) {
                return Err(GraphError::UnknownEntryPoint(explicit.clone()));
            }
            return Ok(explicit.clone());
        }

        let roots = self.zero_in_degree_nodes();
        match roots.len() {
            0 => Err(GraphError::MissingEntryPoint),
            1 => Ok(roots[0].to_string()),
            _ => Err(GraphError::AmbiguousEntryPoint(
                roots.into_iter().map(str::to_string).collect(),
            )),
        }
    }

    /// Run all build-time validation rules: no cycles, entry point exists,
    /// every node reachable from it, every edge endpoint registered.
    pub fn validate(&self) -> Result<(), GraphError> {
        for (from, to) in &self.edges {
            if !self.node_types.contains_key(from) {
                return Err(GraphError::DanglingEdge(from.clone()));
            }
            if !self.node_types.contains_key(to) {
                return Err(GraphError::DanglingEdge(to.clone()));
            }
        }

        let entry = self.resolve_entry_point()?;

        // Reachability via BFS from entry.
        let mut adjacency: HashMap<&str, Vec<&str>> = HashMap::new();
        for (from, to) in &self.edges {
            adjacency.entry(from.as_str()).or_default().push(to.as_str());
        }
        let mut reachable: HashSet<&str> = HashSet::new();
        let mut queue = VecDeque::new();
        reachable.insert(entry.as_str());
        queue.push_back(entry.as_str());
        while let Some(n) = queue.pop_front() {
            if let Some(succs) = adjacency.get(n) {
                for s in succs {
                    if reachable.insert(s) {
                        queue.push_back(s);
                    }
                }
            }
        }
        for node in &self.nodes {
            if !reachable.contains(node.as_str()) {
                return Err(GraphError::UnreachableNode(node.clone()));
            }
        }

        // Cycle detection via Kahn's algorithm (also used for topo order).
        self.kahn_order()?;

        Ok(())
    }

    /// Deterministic topological linearization, tie-broken by insertion
    /// order of nodes.
    pub fn topological_order(&self) -> Result<Vec<String>, GraphError> {
        self.kahn_order()
    }

    fn kahn_order(&self) -> Result<Vec<String>, GraphError> {
        let mut in_degree: HashMap<&str, usize> =
            self.nodes.iter().map(|n| (n.as_str(), 0usize)).collect();
        let mut adjacency: HashMap<&str, Vec<&str>> = HashMap::new();
        for (from, to) in &self.edges {
            if self.node_types.contains_key(from.as_str()) && self.node_types.contains_key(to.as_str()) {
                *in_degree.entry(to.as_str()).or_insert(0) += 1;
                adjacency.entry(from.as_str()).or_default().push(to.as_str());
            }
        }

        // Ready set ordered by original insertion order, not a hash order.
        let mut ready: VecDeque<&str> = self
            .nodes
            .iter()
            .map(String::as_str)
            .filter(|n| in_degree.get(n).copied().unwrap_or(0) == 0)
            .collect();

        let mut order = Vec::with_capacity(self.nodes.len());
        let insertion_index: HashMap<&str, usize> = self
            .nodes
            .iter()
            .enumerate()
            .map(|(i, n)| (n.as_str(), i))
            .collect();

        while !ready.is_empty() {
            // Stable tie-break: always take the node with the smallest
            // original insertion index among those currently ready.
            let (pos, _) = ready
                .iter()
                .enumerate()
                .min_by_key(|(_, n)| insertion_index[*n])
                .expect("ready is non-empty");
            let node = ready.remove(pos).expect("valid position");
            order.push(node.to_string());

            if let Some(succs) = adjacency.get(node) {
                for succ in succs {
                    let deg = in_degree.get_mut(succ).expect("node registered");
                    *deg -= 1;
                    if *deg == 0 {
                        ready.push_back(succ);
                    }
                }
            }
        }

        if order.len() != self.nodes.len() {
            let stuck = self
                .nodes
                .iter()
                .find(|n| !order.contains(n))
                .cloned()
                .unwrap_or_default();
            return Err(GraphError::Cycle(stuck));
        }

        Ok(order)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn linear_graph() -> Graph {
        let mut g = Graph::new();
        g.add_node("a", NodeType::Sequential).unwrap();
        g.add_node("b", NodeType::Sequential).unwrap();
        g.add_node("c", NodeType::Sequential).unwrap();
        g.add_edge("a", "b");
        g.add_edge("b", "c");
        g
    }

    #[test]
    fn topological_order_is_deterministic() {
        let g = linear_graph();
        assert_eq!(g.topological_order().unwrap(), vec!["a", "b", "c"]);
    }

    #[test]
    fn single_root_is_inferred_entry_point() {
        let g = linear_graph();
        assert_eq!(g.resolve_entry_point().unwrap(), "a");
    }

    #[test]
    fn explicit_entry_point_overrides_inference() {
        let mut g = Graph::new();
        g.add_node("a", NodeType::Sequential).unwrap();
        g.add_node("b", NodeType::Sequential).unwrap();
        g.set_entry_point("b");
        assert_eq!(g.resolve_entry_point().unwrap(), "b");
    }

    #[test]
    fn ambiguous_entry_point_without_explicit_choice_fails() {
        let mut g = Graph::new();
        g.add_node("a", NodeType::Sequential).unwrap();
        g.add_node("b", NodeType::Sequential).unwrap();
        assert!(matches!(
            g.resolve_entry_point(),
            Err(GraphError::AmbiguousEntryPoint(_))
        ));
    }

    #[test]
    fn cycle_is_detected() {
        let mut g = Graph::new();
        g.add_node("a", NodeType::Sequential).unwrap();
        g.add_node("b", NodeType::Sequential).unwrap();
        g.add_edge("a", "b");
        g.add_edge("b", "a");
        assert!(matches!(g.validate(), Err(GraphError::Cycle(_))));
    }

    #[test]
    fn dangling_edge_is_detected() {
        let mut g = Graph::new();
        g.add_node("a", NodeType::Sequential).unwrap();
        g.add_edge("a", "ghost");
        assert!(matches!(g.validate(), Err(GraphError::DanglingEdge(_))));
    }

    #[test]
    fn unreachable_node_is_detected() {
        let mut g = Graph::new();
        g.add_node("a", NodeType::Sequential).unwrap();
        g.add_node("b", NodeType::Sequential).unwrap();
        g.add_node("island", NodeType::Sequential).unwrap();
        g.add_edge("a", "b");
        assert!(matches!(g.validate(), Err(GraphError::UnreachableNode(_))));
    }

    #[test]
    fn duplicate_node_rejected() {
        let mut g = Graph::new();
        g.add_node("a", NodeType::Sequential).unwrap();
        assert!(matches!(
            g.add_node("a", NodeType::Sequential),
            Err(GraphError::DuplicateNode(_))
        ));
    }

    #[test]
    fn repeated_build_yields_identical_topological_order() {
        let g1 = linear_graph();
        let g2 = linear_graph();
        assert_eq!(g1.topological_order().unwrap(), g2.topological_order().unwrap());
    }

    #[test]
    fn parallel_siblings_tie_break_by_insertion_order() {
        let mut g = Graph::new();
        g.add_node("a", NodeType::Sequential).unwrap();
        g.add_node("p1", NodeType::Parallel).unwrap();
        g.add_node("p2", NodeType::Parallel).unwrap();
        g.add_edge("a", "p1");
        g.add_edge("a", "p2");
        assert_eq!(g.topological_order().unwrap(), vec!["a", "p1", "p2"]);
    }
}
