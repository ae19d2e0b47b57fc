//! # Dependency Graph
//!
//! The labeled DAG at the heart of the analysis.
//!
//! Nodes are typed (master, request, cookie, not-found sentinel); edges point
//! consumer → provider and optionally carry the literal value they resolve.
//! All data structures use `BTreeMap` for deterministic ordering.
//!
//! ## Acyclicity discipline
//!
//! The graph is acyclic at all times. `add_edge` is transactional: the edge
//! is tentatively inserted, cycle detection runs, and the insertion is rolled
//! back (with a `CIRCULAR_DEPENDENCIES` error) if a cycle would close. There
//! is no post-hoc repair.

use crate::request::CapturedRequest;
use crate::types::{ClassifiedParam, NodeId, RetraceError};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

// =============================================================================
// NODE KINDS & CONTENT
// =============================================================================

/// The node taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    /// The action request a workflow reproduces; exactly one per workflow.
    Master,
    /// An ordinary captured request acting as a dependency provider/consumer.
    Request,
    /// A cookie from the capture-time cookie store.
    Cookie,
    /// Sentinel recording a literal that could not be resolved.
    NotFound,
}

impl NodeKind {
    /// Deterministic ordering priority for topological tie-breaks:
    /// master > request > cookie > not_found.
    #[must_use]
    pub const fn sort_priority(self) -> u8 {
        match self {
            Self::Master => 0,
            Self::Request => 1,
            Self::Cookie => 2,
            Self::NotFound => 3,
        }
    }
}

/// Per-analysis state of a request-backed node.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RequestState {
    /// The captured request this node represents.
    pub request: CapturedRequest,
    /// Dynamic values with no covering edge label yet.
    pub unresolved_values: BTreeSet<String>,
    /// Values this node produces for its consumers.
    pub provided_values: BTreeSet<String>,
    /// Declared inputs found on this request: input name -> example value.
    pub classified_inputs: BTreeMap<String, String>,
    /// Classification verdict per dynamic value.
    pub classified_params: BTreeMap<String, ClassifiedParam>,
}

impl RequestState {
    /// Wrap a captured request with empty analysis state.
    #[must_use]
    pub fn new(request: CapturedRequest) -> Self {
        Self {
            request,
            ..Self::default()
        }
    }
}

/// Tagged node content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NodeContent {
    /// The workflow's action request.
    Master(RequestState),
    /// A dependency-providing (or consuming) request.
    Request(RequestState),
    /// A cookie provider.
    Cookie {
        /// Cookie name.
        name: String,
        /// Captured value.
        value: String,
        /// Values this cookie provides to consumers.
        #[serde(default)]
        provided_values: BTreeSet<String>,
    },
    /// Unresolvable-literal sentinel; records the failure in-band.
    NotFound {
        /// The literal that could not be resolved.
        literal: String,
    },
}

/// A node in the dependency graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphNode {
    /// Insertion-ordered identifier.
    pub id: NodeId,
    /// Tagged content.
    #[serde(flatten)]
    pub content: NodeContent,
    /// Free-form attributes (bootstrap subtype, extraction pattern, ...).
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    #[serde(default)]
    pub attrs: BTreeMap<String, serde_json::Value>,
}

impl GraphNode {
    /// The node kind.
    #[must_use]
    pub fn kind(&self) -> NodeKind {
        match &self.content {
            NodeContent::Master(_) => NodeKind::Master,
            NodeContent::Request(_) => NodeKind::Request,
            NodeContent::Cookie { .. } => NodeKind::Cookie,
            NodeContent::NotFound { .. } => NodeKind::NotFound,
        }
    }

    /// Dynamic values with no covering edge label.
    #[must_use]
    pub fn unresolved_values(&self) -> BTreeSet<String> {
        match &self.content {
            NodeContent::Master(state) | NodeContent::Request(state) => {
                state.unresolved_values.clone()
            }
            NodeContent::Cookie { .. } => BTreeSet::new(),
            NodeContent::NotFound { literal } => BTreeSet::from([literal.clone()]),
        }
    }

    /// Values this node provides to consumers.
    #[must_use]
    pub fn provided_values(&self) -> BTreeSet<String> {
        match &self.content {
            NodeContent::Master(state) | NodeContent::Request(state) => {
                state.provided_values.clone()
            }
            NodeContent::Cookie {
                provided_values, ..
            } => provided_values.clone(),
            NodeContent::NotFound { .. } => BTreeSet::new(),
        }
    }

    /// Request-backed analysis state, when this node wraps a request.
    #[must_use]
    pub fn request_state(&self) -> Option<&RequestState> {
        match &self.content {
            NodeContent::Master(state) | NodeContent::Request(state) => Some(state),
            _ => None,
        }
    }

    /// Mutable request-backed analysis state.
    #[must_use]
    pub fn request_state_mut(&mut self) -> Option<&mut RequestState> {
        match &mut self.content {
            NodeContent::Master(state) | NodeContent::Request(state) => Some(state),
            _ => None,
        }
    }
}

// =============================================================================
// GRAPH
// =============================================================================

/// The dependency graph.
///
/// Nodes are append-only (they transition unresolved → resolved but are never
/// deleted); edges are append-only subject to acyclicity.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DependencyGraph {
    /// Node storage: NodeId -> node.
    nodes: BTreeMap<NodeId, GraphNode>,
    /// Adjacency: consumer -> (provider -> labels on that edge).
    edges: BTreeMap<NodeId, BTreeMap<NodeId, BTreeSet<Option<String>>>>,
    /// Next available node id.
    next_node_id: u64,
}

impl DependencyGraph {
    /// Create a new empty graph.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    // =========================================================================
    // NODE OPERATIONS
    // =========================================================================

    /// Insert a node. Returns its id.
    ///
    /// Nodes are never deduplicated here; callers use
    /// [`find_node_by_request`](Self::find_node_by_request) first when the
    /// content is a captured request.
    pub fn add_node(
        &mut self,
        content: NodeContent,
        attrs: BTreeMap<String, serde_json::Value>,
    ) -> NodeId {
        let id = NodeId(self.next_node_id);
        self.next_node_id = self.next_node_id.saturating_add(1);
        self.nodes.insert(id, GraphNode { id, content, attrs });
        id
    }

    /// Merge attributes into an existing node.
    pub fn update_node(
        &mut self,
        id: NodeId,
        attrs: BTreeMap<String, serde_json::Value>,
    ) -> Result<(), RetraceError> {
        let node = self
            .nodes
            .get_mut(&id)
            .ok_or(RetraceError::NodeNotFound(id))?;
        node.attrs.extend(attrs);
        Ok(())
    }

    /// Lookup a node.
    #[must_use]
    pub fn get_node(&self, id: NodeId) -> Option<&GraphNode> {
        self.nodes.get(&id)
    }

    /// Mutable lookup.
    #[must_use]
    pub fn get_node_mut(&mut self, id: NodeId) -> Option<&mut GraphNode> {
        self.nodes.get_mut(&id)
    }

    /// All nodes in id (= insertion) order.
    pub fn get_all_nodes(&self) -> impl Iterator<Item = &GraphNode> {
        self.nodes.values()
    }

    /// Whether a node exists.
    #[must_use]
    pub fn contains_node(&self, id: NodeId) -> bool {
        self.nodes.contains_key(&id)
    }

    /// Total node count.
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// The next node id that would be assigned.
    #[must_use]
    pub fn next_node_id(&self) -> u64 {
        self.next_node_id
    }

    /// Total edge count (labels counted individually).
    #[must_use]
    pub fn edge_count(&self) -> usize {
        self.edges
            .values()
            .flat_map(BTreeMap::values)
            .map(BTreeSet::len)
            .sum()
    }

    /// First node (in id order) whose request matches the given identity.
    #[must_use]
    pub fn find_node_by_request(&self, request: &CapturedRequest) -> Option<NodeId> {
        self.nodes
            .values()
            .find(|node| {
                node.request_state()
                    .is_some_and(|state| state.request.same_identity(request))
            })
            .map(|node| node.id)
    }

    /// First cookie node with the given name.
    #[must_use]
    pub fn find_cookie_node(&self, cookie_name: &str) -> Option<NodeId> {
        self.nodes
            .values()
            .find(|node| matches!(&node.content, NodeContent::Cookie { name, .. } if name == cookie_name))
            .map(|node| node.id)
    }

    /// Ids of all master nodes.
    #[must_use]
    pub fn master_nodes(&self) -> Vec<NodeId> {
        self.nodes
            .values()
            .filter(|n| n.kind() == NodeKind::Master)
            .map(|n| n.id)
            .collect()
    }

    /// Record that a node provides a value.
    ///
    /// No-op for not-found sentinels (they provide nothing by definition).
    pub fn add_provided_value(&mut self, id: NodeId, value: &str) -> Result<(), RetraceError> {
        let node = self
            .nodes
            .get_mut(&id)
            .ok_or(RetraceError::NodeNotFound(id))?;
        match &mut node.content {
            NodeContent::Master(state) | NodeContent::Request(state) => {
                state.provided_values.insert(value.to_string());
            }
            NodeContent::Cookie {
                provided_values, ..
            } => {
                provided_values.insert(value.to_string());
            }
            NodeContent::NotFound { .. } => {}
        }
        Ok(())
    }

    // =========================================================================
    // EDGE OPERATIONS
    // =========================================================================

    /// Insert a consumer → provider edge, transactionally.
    ///
    /// The edge is tentatively added, cycle detection runs over the affected
    /// region, and the insertion is rolled back with `CIRCULAR_DEPENDENCIES`
    /// if any cycle is found. On commit, a labeled edge also records the
    /// label in the provider's `provided_values` so the coverage invariant
    /// holds mechanically.
    pub fn add_edge(
        &mut self,
        from: NodeId,
        to: NodeId,
        label: Option<String>,
    ) -> Result<(), RetraceError> {
        if !self.nodes.contains_key(&from) {
            return Err(RetraceError::NodeNotFound(from));
        }
        if !self.nodes.contains_key(&to) {
            return Err(RetraceError::NodeNotFound(to));
        }

        // Tentative insert
        let inserted = self
            .edges
            .entry(from)
            .or_default()
            .entry(to)
            .or_default()
            .insert(label.clone());

        if self.reaches(to, from) {
            // Roll back the tentative edge; committed state is untouched.
            if inserted {
                if let Some(targets) = self.edges.get_mut(&from) {
                    if let Some(labels) = targets.get_mut(&to) {
                        labels.remove(&label);
                        if labels.is_empty() {
                            targets.remove(&to);
                        }
                    }
                    if targets.is_empty() {
                        self.edges.remove(&from);
                    }
                }
            }
            return Err(RetraceError::CircularDependencies { from, to });
        }

        if let Some(value) = &label {
            self.add_provided_value(to, value)?;
        }
        Ok(())
    }

    /// Nodes this node depends on (outgoing edges).
    #[must_use]
    pub fn successors(&self, id: NodeId) -> Vec<NodeId> {
        self.edges
            .get(&id)
            .map(|targets| targets.keys().copied().collect())
            .unwrap_or_default()
    }

    /// Nodes that depend on this node (incoming edges).
    #[must_use]
    pub fn predecessors(&self, id: NodeId) -> Vec<NodeId> {
        self.edges
            .iter()
            .filter(|(_, targets)| targets.contains_key(&id))
            .map(|(from, _)| *from)
            .collect()
    }

    /// All edges as `(consumer, provider, label)` triples, in id order.
    pub fn edges(&self) -> impl Iterator<Item = (NodeId, NodeId, Option<&str>)> {
        self.edges.iter().flat_map(|(&from, targets)| {
            targets.iter().flat_map(move |(&to, labels)| {
                labels.iter().map(move |label| (from, to, label.as_deref()))
            })
        })
    }

    /// Labels on the outgoing edges of a node.
    #[must_use]
    pub fn outgoing_labels(&self, id: NodeId) -> BTreeSet<String> {
        self.edges
            .get(&id)
            .into_iter()
            .flat_map(BTreeMap::values)
            .flatten()
            .filter_map(|label| label.clone())
            .collect()
    }

    /// Whether `start` can reach `target` through committed edges.
    fn reaches(&self, start: NodeId, target: NodeId) -> bool {
        if start == target {
            return true;
        }
        let mut visited = BTreeSet::new();
        let mut stack = vec![start];
        while let Some(current) = stack.pop() {
            if current == target {
                return true;
            }
            if !visited.insert(current) {
                continue;
            }
            if let Some(targets) = self.edges.get(&current) {
                stack.extend(targets.keys().copied());
            }
        }
        false
    }

    // =========================================================================
    // CYCLES & ORDERING
    // =========================================================================

    /// Find all cycles in the graph. Empty when the graph is acyclic.
    ///
    /// The invariant says this is always empty; it exists so violations are
    /// observable rather than assumed away.
    #[must_use]
    pub fn detect_cycles(&self) -> Vec<Vec<NodeId>> {
        let mut cycles = Vec::new();
        let mut done = BTreeSet::new();

        for &start in self.nodes.keys() {
            if done.contains(&start) {
                continue;
            }
            // Iterative DFS keeping the current path for cycle extraction
            let mut path: Vec<NodeId> = Vec::new();
            let mut on_path = BTreeSet::new();
            let mut stack: Vec<(NodeId, usize)> = vec![(start, 0)];

            while let Some(&(current, next_child)) = stack.last() {
                if next_child == 0 {
                    if done.contains(&current) {
                        // Duplicate frame for a finished node
                        stack.pop();
                        continue;
                    }
                    path.push(current);
                    on_path.insert(current);
                }
                let children = self.successors(current);
                if next_child < children.len() {
                    if let Some(frame) = stack.last_mut() {
                        frame.1 += 1;
                    }
                    let child = children[next_child];
                    if on_path.contains(&child) {
                        let cycle_start =
                            path.iter().position(|&n| n == child).unwrap_or(0);
                        cycles.push(path[cycle_start..].to_vec());
                    } else if !done.contains(&child) {
                        stack.push((child, 0));
                    }
                } else {
                    stack.pop();
                    path.pop();
                    on_path.remove(&current);
                    done.insert(current);
                }
            }
        }
        cycles
    }

    /// Deterministic topological order: providers before their consumers.
    ///
    /// Among simultaneously ready nodes, order by
    /// `(kind priority: master > request > cookie > not_found, insertion order)`.
    /// Fails with `CIRCULAR_DEPENDENCIES` if the graph is not acyclic.
    pub fn topological_sort(&self) -> Result<Vec<NodeId>, RetraceError> {
        // Out-degree counts remaining providers; a node is ready when all of
        // its providers have been emitted.
        let mut remaining: BTreeMap<NodeId, usize> = self
            .nodes
            .keys()
            .map(|&id| {
                let degree = self
                    .edges
                    .get(&id)
                    .map(|t| t.values().map(BTreeSet::len).sum())
                    .unwrap_or(0);
                (id, degree)
            })
            .collect();

        let sort_key = |id: NodeId| -> (u8, NodeId) {
            let priority = self
                .nodes
                .get(&id)
                .map_or(u8::MAX, |n| n.kind().sort_priority());
            (priority, id)
        };

        let mut ready: BTreeSet<(u8, NodeId)> = remaining
            .iter()
            .filter(|&(_, &d)| d == 0)
            .map(|(&id, _)| sort_key(id))
            .collect();

        let mut order = Vec::with_capacity(self.nodes.len());
        while let Some(&(priority, id)) = ready.iter().next() {
            ready.remove(&(priority, id));
            order.push(id);
            for consumer in self.predecessors(id) {
                if let Some(count) = remaining.get_mut(&consumer) {
                    let edge_multiplicity = self
                        .edges
                        .get(&consumer)
                        .and_then(|t| t.get(&id))
                        .map_or(0, BTreeSet::len);
                    *count = count.saturating_sub(edge_multiplicity);
                    if *count == 0 {
                        ready.insert(sort_key(consumer));
                    }
                }
            }
        }

        if order.len() != self.nodes.len() {
            // A cycle kept some nodes from ever becoming ready; name one edge.
            let stuck = self
                .nodes
                .keys()
                .find(|id| !order.contains(id))
                .copied()
                .unwrap_or(NodeId(0));
            let to = self.successors(stuck).first().copied().unwrap_or(stuck);
            return Err(RetraceError::CircularDependencies { from: stuck, to });
        }
        Ok(order)
    }

    // =========================================================================
    // RESOLUTION STATE
    // =========================================================================

    /// Residual unresolved values per node.
    ///
    /// A node with unresolved values whose outgoing edge labels cover all of
    /// them is considered resolved and does not appear here.
    #[must_use]
    pub fn get_unresolved_nodes(&self) -> Vec<(NodeId, BTreeSet<String>)> {
        self.nodes
            .values()
            .filter_map(|node| {
                let state = node.request_state()?;
                let covered = self.outgoing_labels(node.id);
                let residual: BTreeSet<String> = state
                    .unresolved_values
                    .difference(&covered)
                    .cloned()
                    .collect();
                if residual.is_empty() {
                    None
                } else {
                    Some((node.id, residual))
                }
            })
            .collect()
    }

    /// Whether analysis of this graph is complete.
    ///
    /// True iff every request/master node's unresolved set is covered by its
    /// outgoing edge labels AND no not-found sentinel exists.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        let no_sentinels = !self
            .nodes
            .values()
            .any(|n| n.kind() == NodeKind::NotFound);
        no_sentinels && self.get_unresolved_nodes().is_empty()
    }

    // =========================================================================
    // SERIALIZATION
    // =========================================================================

    /// Serialize the full graph (nodes, edges, per-node state) to JSON.
    pub fn to_json(&self) -> Result<serde_json::Value, RetraceError> {
        serde_json::to_value(SerializableGraph::from(self))
            .map_err(|e| RetraceError::SerializationError(e.to_string()))
    }

    /// Rebuild a graph from its JSON serialization.
    ///
    /// Edges are re-inserted through `add_edge`, so a serialized graph that
    /// somehow encodes a cycle is rejected rather than reconstructed.
    pub fn from_json(value: serde_json::Value) -> Result<Self, RetraceError> {
        let serialized: SerializableGraph = serde_json::from_value(value)
            .map_err(|e| RetraceError::SerializationError(e.to_string()))?;
        Self::try_from(serialized)
    }
}

// =============================================================================
// SERIALIZABLE FORM
// =============================================================================

/// One serialized edge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SerializedEdge {
    /// Consumer node id.
    pub from: NodeId,
    /// Provider node id.
    pub to: NodeId,
    /// The literal this edge resolves, when labeled.
    #[serde(skip_serializing_if = "Option::is_none")]
    #[serde(default)]
    pub label: Option<String>,
}

/// Serializable representation of the graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SerializableGraph {
    /// Nodes in id order.
    pub nodes: Vec<GraphNode>,
    /// Edges in `(from, to, label)` order.
    pub edges: Vec<SerializedEdge>,
    /// Next id the graph would assign.
    pub next_node_id: u64,
}

impl From<&DependencyGraph> for SerializableGraph {
    fn from(graph: &DependencyGraph) -> Self {
        Self {
            nodes: graph.nodes.values().cloned().collect(),
            edges: graph
                .edges()
                .map(|(from, to, label)| SerializedEdge {
                    from,
                    to,
                    label: label.map(str::to_string),
                })
                .collect(),
            next_node_id: graph.next_node_id,
        }
    }
}

impl TryFrom<SerializableGraph> for DependencyGraph {
    type Error = RetraceError;

    fn try_from(serialized: SerializableGraph) -> Result<Self, Self::Error> {
        let mut graph = Self {
            next_node_id: serialized.next_node_id,
            ..Self::default()
        };
        for node in serialized.nodes {
            if node.id.0 >= graph.next_node_id {
                graph.next_node_id = node.id.0.saturating_add(1);
            }
            graph.nodes.insert(node.id, node);
        }
        for edge in serialized.edges {
            graph.add_edge(edge.from, edge.to, edge.label)?;
        }
        Ok(graph)
    }
}

// =============================================================================
// TESTS
// =============================================================================
