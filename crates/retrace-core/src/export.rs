//! # Canonical Export Module
//!
//! Deterministic, bit-exact serialization of the dependency graph for
//! verification and handoff.
//!
//! The full graph serializes to JSON (`DependencyGraph::to_json`) for the
//! external code generator; that form is convenient but not guaranteed
//! byte-stable across serializer versions. The canonical export here IS
//! byte-stable: sorted records, fixed header, postcard encoding, integer
//! checksum. Two graphs with identical node and edge sets produce identical
//! canonical bytes.

use crate::graph::{DependencyGraph, NodeContent};
use crate::types::RetraceError;
use serde::{Deserialize, Serialize};

// =============================================================================
// CANONICAL FORMAT
// =============================================================================

/// Magic bytes for the canonical export format.
pub const CANONICAL_MAGIC: [u8; 4] = *b"RTRX"; // Retrace Export

/// Current canonical format version.
pub const CANONICAL_VERSION: u8 = 1;

/// Maximum allowed node count in canonical payloads.
///
/// Prevents memory exhaustion from malicious or corrupted data.
pub const MAX_EXPORT_NODE_COUNT: u64 = 1_000_000;

/// Maximum allowed edge count in canonical payloads.
pub const MAX_EXPORT_EDGE_COUNT: u64 = 10_000_000;

/// Header for canonical export payloads.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CanonicalHeader {
    /// Magic bytes identifying the format.
    pub magic: [u8; 4],
    /// Format version.
    pub version: u8,
    /// Number of nodes in the payload.
    pub node_count: u64,
    /// Number of edges in the payload.
    pub edge_count: u64,
    /// XOR-rotate checksum of the payload section.
    pub checksum: u64,
}

impl CanonicalHeader {
    /// Create a new header with the given counts.
    #[must_use]
    pub fn new(node_count: u64, edge_count: u64, checksum: u64) -> Self {
        Self {
            magic: CANONICAL_MAGIC,
            version: CANONICAL_VERSION,
            node_count,
            edge_count,
            checksum,
        }
    }

    /// Validate the header.
    ///
    /// Error messages are intentionally generic to avoid leaking format
    /// details.
    pub fn validate(&self) -> Result<(), RetraceError> {
        if self.magic != CANONICAL_MAGIC {
            return Err(RetraceError::SerializationError(
                "Invalid file format".to_string(),
            ));
        }
        if self.version != CANONICAL_VERSION {
            return Err(RetraceError::SerializationError(
                "Unsupported file version".to_string(),
            ));
        }
        if self.node_count > MAX_EXPORT_NODE_COUNT || self.edge_count > MAX_EXPORT_EDGE_COUNT {
            return Err(RetraceError::SerializationError(
                "Payload exceeds size limits".to_string(),
            ));
        }
        Ok(())
    }
}

// =============================================================================
// CANONICAL NODE & EDGE (Sorted, Deterministic)
// =============================================================================

/// A node in canonical form.
///
/// Flattened to plain fields so the encoding stays stable regardless of how
/// the in-memory node enum evolves. Sorted by node id.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
pub struct CanonicalNode {
    /// Node id (sort key).
    pub id: u64,
    /// Kind discriminant: 0 master, 1 request, 2 cookie, 3 not-found.
    pub kind: u8,
    /// Request method; empty for non-request nodes.
    pub method: String,
    /// Request URL; empty for non-request nodes.
    pub url: String,
    /// Request body hash; 0 for non-request nodes.
    pub body_hash: u64,
    /// Cookie name or unresolved literal; empty otherwise.
    pub name: String,
    /// Cookie value; empty otherwise.
    pub value: String,
    /// Unresolved values, sorted.
    pub unresolved: Vec<String>,
    /// Provided values, sorted.
    pub provided: Vec<String>,
}

/// An edge in canonical form. Sorted by `(from, to, label)`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
pub struct CanonicalEdge {
    /// Consumer node id.
    pub from: u64,
    /// Provider node id.
    pub to: u64,
    /// Resolved literal, when the edge is labeled.
    pub label: Option<String>,
}

/// The canonical graph payload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CanonicalGraph {
    /// Nodes sorted by id.
    pub nodes: Vec<CanonicalNode>,
    /// Edges sorted by `(from, to, label)`.
    pub edges: Vec<CanonicalEdge>,
    /// Next node id the graph would assign.
    pub next_node_id: u64,
}

impl CanonicalGraph {
    /// Build the canonical form of a graph.
    #[must_use]
    pub fn from_graph(graph: &DependencyGraph) -> Self {
        let mut nodes: Vec<CanonicalNode> = graph
            .get_all_nodes()
            .map(|node| {
                let (method, url, body_hash, name, value) = match &node.content {
                    NodeContent::Master(state) | NodeContent::Request(state) => {
                        let identity = state.request.identity();
                        (
                            identity.method,
                            identity.url,
                            identity.body_hash,
                            String::new(),
                            String::new(),
                        )
                    }
                    NodeContent::Cookie { name, value, .. } => (
                        String::new(),
                        String::new(),
                        0,
                        name.clone(),
                        value.clone(),
                    ),
                    NodeContent::NotFound { literal } => (
                        String::new(),
                        String::new(),
                        0,
                        literal.clone(),
                        String::new(),
                    ),
                };
                CanonicalNode {
                    id: node.id.0,
                    kind: node.kind().sort_priority(),
                    method,
                    url,
                    body_hash,
                    name,
                    value,
                    unresolved: node.unresolved_values().into_iter().collect(),
                    provided: node.provided_values().into_iter().collect(),
                }
            })
            .collect();
        nodes.sort();

        let mut edges: Vec<CanonicalEdge> = graph
            .edges()
            .map(|(from, to, label)| CanonicalEdge {
                from: from.0,
                to: to.0,
                label: label.map(str::to_string),
            })
            .collect();
        edges.sort();

        Self {
            nodes,
            edges,
            next_node_id: graph.next_node_id(),
        }
    }

    /// XOR-rotate checksum over the canonical records.
    ///
    /// Integer-only and order-sensitive; identical graphs always produce
    /// identical checksums.
    #[must_use]
    pub fn checksum(&self) -> u64 {
        let mut acc: u64 = 0x5252_5452_4143_4531; // seed
        let mut mix = |bytes: &[u8]| {
            for &b in bytes {
                acc = acc.rotate_left(7) ^ u64::from(b);
            }
        };
        for node in &self.nodes {
            mix(&node.id.to_le_bytes());
            mix(&[node.kind]);
            mix(node.method.as_bytes());
            mix(node.url.as_bytes());
            mix(&node.body_hash.to_le_bytes());
            mix(node.name.as_bytes());
            mix(node.value.as_bytes());
            for v in node.unresolved.iter().chain(&node.provided) {
                mix(v.as_bytes());
            }
        }
        for edge in &self.edges {
            mix(&edge.from.to_le_bytes());
            mix(&edge.to.to_le_bytes());
            if let Some(label) = &edge.label {
                mix(label.as_bytes());
            }
        }
        acc
    }
}

// =============================================================================
// EXPORT / DECODE / VERIFY
// =============================================================================

/// Serialize a graph to canonical bytes: postcard header + postcard payload.
pub fn export_canonical(graph: &DependencyGraph) -> Result<Vec<u8>, RetraceError> {
    let canonical = CanonicalGraph::from_graph(graph);
    let header = CanonicalHeader::new(
        canonical.nodes.len() as u64,
        canonical.edges.len() as u64,
        canonical.checksum(),
    );

    let mut out = postcard::to_stdvec(&header)
        .map_err(|e| RetraceError::SerializationError(e.to_string()))?;
    let payload = postcard::to_stdvec(&canonical)
        .map_err(|e| RetraceError::SerializationError(e.to_string()))?;
    out.extend_from_slice(&payload);
    Ok(out)
}

/// Decode canonical bytes back into the canonical payload.
///
/// Validates the header and re-computes the checksum.
pub fn decode_canonical(data: &[u8]) -> Result<CanonicalGraph, RetraceError> {
    let (header, rest): (CanonicalHeader, &[u8]) = postcard::take_from_bytes(data)
        .map_err(|e| RetraceError::DeserializationError(e.to_string()))?;
    header.validate()?;

    let canonical: CanonicalGraph = postcard::from_bytes(rest)
        .map_err(|e| RetraceError::DeserializationError(e.to_string()))?;

    if canonical.nodes.len() as u64 != header.node_count
        || canonical.edges.len() as u64 != header.edge_count
    {
        return Err(RetraceError::SerializationError(
            "Header counts do not match payload".to_string(),
        ));
    }
    if canonical.checksum() != header.checksum {
        return Err(RetraceError::SerializationError(
            "Checksum mismatch".to_string(),
        ));
    }
    Ok(canonical)
}

/// Verify that canonical bytes match a live graph.
pub fn verify_canonical(graph: &DependencyGraph, data: &[u8]) -> Result<bool, RetraceError> {
    let decoded = decode_canonical(data)?;
    Ok(decoded == CanonicalGraph::from_graph(graph))
}

/// Checksum of a live graph's canonical form.
#[must_use]
pub fn canonical_checksum(graph: &DependencyGraph) -> u64 {
    CanonicalGraph::from_graph(graph).checksum()
}

/// BLAKE3 hash (hex) of the canonical bytes.
#[cfg(feature = "crypto-hash")]
pub fn canonical_crypto_hash(graph: &DependencyGraph) -> Result<String, RetraceError> {
    let bytes = export_canonical(graph)?;
    Ok(blake3::hash(&bytes).to_hex().to_string())
}

// =============================================================================
// TESTS
// =============================================================================
