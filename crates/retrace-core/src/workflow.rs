//! # Workflow Discovery
//!
//! Groups captured requests into coherent workflows (search, authenticate,
//! document fetch, ...) and picks one primary endpoint per workflow.
//!
//! Discovery is a pure function of the capture's URLs and request counts:
//! running it twice over identical input yields identical groupings and the
//! same primary selection. The oracle's groupings are trusted when present;
//! this module is the deterministic fallback and the shared vocabulary.

use crate::capture::is_meaningful;
use crate::request::CapturedRequest;
use crate::types::{NodeId, WorkflowId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// =============================================================================
// CATEGORY
// =============================================================================

/// Semantic workflow category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowCategory {
    Search,
    DocumentOperations,
    Authentication,
    UserManagement,
    Crud,
    DataExport,
    Other,
}

impl WorkflowCategory {
    /// Base priority for the category.
    #[must_use]
    pub const fn base_priority(self) -> u8 {
        match self {
            Self::Search => 9,
            Self::Authentication => 8,
            Self::DocumentOperations => 7,
            Self::Crud => 6,
            Self::DataExport => 5,
            Self::UserManagement => 4,
            Self::Other => 3,
        }
    }

    /// Stable identifier fragment.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Search => "search",
            Self::DocumentOperations => "document_operations",
            Self::Authentication => "authentication",
            Self::UserManagement => "user_management",
            Self::Crud => "crud",
            Self::DataExport => "data_export",
            Self::Other => "other",
        }
    }

    /// Human-readable name.
    #[must_use]
    pub const fn display_name(self) -> &'static str {
        match self {
            Self::Search => "Search",
            Self::DocumentOperations => "Document operations",
            Self::Authentication => "Authentication",
            Self::UserManagement => "User management",
            Self::Crud => "Create/update/delete",
            Self::DataExport => "Data export",
            Self::Other => "Other",
        }
    }

    /// Whether reads dominate this category (GET preferred as primary).
    #[must_use]
    pub const fn prefers_get(self) -> bool {
        matches!(self, Self::Search | Self::DocumentOperations | Self::Other)
    }
}

/// Language-independent keyword table, checked in priority order.
const CATEGORY_KEYWORDS: &[(WorkflowCategory, &[&str])] = &[
    (WorkflowCategory::Search, &["search", "pesquisa"]),
    (
        WorkflowCategory::DocumentOperations,
        &["document", "documento", "copiar", "citar"],
    ),
    (
        WorkflowCategory::Authentication,
        &["auth", "login", "token", "session"],
    ),
    (
        WorkflowCategory::UserManagement,
        &["user", "usuario", "account", "conta"],
    ),
    (WorkflowCategory::DataExport, &["export", "download"]),
    (
        WorkflowCategory::Crud,
        &["create", "update", "delete", "edit"],
    ),
];

/// Categorize a URL path by exact segment and keyword matches.
#[must_use]
pub fn categorize_path(path: &str) -> WorkflowCategory {
    let lowered = path.to_ascii_lowercase();
    let segments: Vec<&str> = lowered.split('/').filter(|s| !s.is_empty()).collect();

    for (category, keywords) in CATEGORY_KEYWORDS {
        // Exact path segments first, then substring keyword matches
        if segments
            .iter()
            .any(|segment| keywords.contains(segment))
            || keywords.iter().any(|k| lowered.contains(k))
        {
            return *category;
        }
    }
    WorkflowCategory::Other
}

// =============================================================================
// WORKFLOW RECORD
// =============================================================================

/// Path tail segments marking sub-actions rather than base endpoints.
const SUB_ACTION_SEGMENTS: &[&str] = &["copy", "cite", "download", "copiar", "citar", "print"];

/// A discovered workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Workflow {
    /// Stable identifier within the session.
    pub id: WorkflowId,
    /// Human-readable name.
    pub name: String,
    /// Semantic category.
    pub category: WorkflowCategory,
    /// Priority in `[1, 10]`.
    pub priority: u8,
    /// Complexity in `[1, 10]`.
    pub complexity: u8,
    /// Whether the workflow needs user-supplied values at runtime.
    pub requires_user_input: bool,
    /// Method of the primary endpoint.
    pub primary_method: String,
    /// Base URL (query stripped) of the primary endpoint.
    pub primary_url: String,
    /// Capture indices of the member requests.
    pub member_indices: Vec<usize>,
    /// Master node, once the workflow is selected.
    #[serde(skip_serializing_if = "Option::is_none")]
    #[serde(default)]
    pub master_node_id: Option<NodeId>,
    /// Member nodes inserted into the graph so far.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    #[serde(default)]
    pub member_node_ids: Vec<NodeId>,
}

impl Workflow {
    /// Whether a captured request is a member of this workflow.
    ///
    /// Matching is exact base-URL comparison.
    #[must_use]
    pub fn matches_member(&self, request: &CapturedRequest, capture: &[CapturedRequest]) -> bool {
        self.member_indices
            .iter()
            .filter_map(|&i| capture.get(i))
            .any(|member| member.base_url() == request.base_url())
    }
}

// =============================================================================
// DISCOVERY
// =============================================================================

/// Whether the last path segment marks a sub-action endpoint.
fn is_sub_action(request: &CapturedRequest) -> bool {
    request
        .path_segments()
        .last()
        .is_some_and(|seg| SUB_ACTION_SEGMENTS.contains(&seg.to_ascii_lowercase().as_str()))
}

/// Group the capture into workflows with deterministic primary selection.
#[must_use]
pub fn discover_workflows(capture: &[CapturedRequest]) -> Vec<Workflow> {
    // Group member indices by category
    let mut groups: BTreeMap<WorkflowCategory, Vec<usize>> = BTreeMap::new();
    for (index, request) in capture.iter().enumerate() {
        if !is_meaningful(request) || request.is_javascript_or_html() {
            continue;
        }
        groups
            .entry(categorize_path(request.path()))
            .or_default()
            .push(index);
    }

    // Frequency: captured requests sharing (method, base URL without query)
    let mut frequency: BTreeMap<(String, String), usize> = BTreeMap::new();
    for request in capture {
        let key = (
            request.method.to_ascii_uppercase(),
            request.base_url().to_string(),
        );
        *frequency.entry(key).or_insert(0) += 1;
    }

    let mut workflows: Vec<Workflow> = groups
        .into_iter()
        .filter_map(|(category, members)| {
            let primary = pick_primary_endpoint(category, &members, capture, &frequency)?;
            let primary_request = &capture[primary];
            let primary_key = (
                primary_request.method.to_ascii_uppercase(),
                primary_request.base_url().to_string(),
            );
            let primary_frequency = frequency.get(&primary_key).copied().unwrap_or(1);

            let boost = u8::from(primary_frequency >= 3);
            let priority = category
                .base_priority()
                .saturating_add(boost)
                .clamp(1, 10);
            let complexity = (members.len().div_ceil(2)).clamp(1, 10) as u8;
            let requires_user_input = members.iter().any(|&i| {
                let req = &capture[i];
                !req.query.is_empty() || req.body.is_some()
            });

            Some(Workflow {
                id: WorkflowId::new(format!("wf-{}", category.as_str())),
                name: category.display_name().to_string(),
                category,
                priority,
                complexity,
                requires_user_input,
                primary_method: primary_key.0,
                primary_url: primary_key.1,
                member_indices: members,
                master_node_id: None,
                member_node_ids: Vec::new(),
            })
        })
        .collect();

    // Highest-priority workflows first; stable order for equal priorities
    workflows.sort_by(|a, b| {
        b.priority
            .cmp(&a.priority)
            .then(a.complexity.cmp(&b.complexity))
            .then(a.id.cmp(&b.id))
    });
    workflows
}

/// Pick the primary endpoint for a member group.
///
/// Highest frequency wins among base paths (sub-actions excluded); the
/// category's preferred method breaks frequency ties, then capture order.
fn pick_primary_endpoint(
    category: WorkflowCategory,
    members: &[usize],
    capture: &[CapturedRequest],
    frequency: &BTreeMap<(String, String), usize>,
) -> Option<usize> {
    let preferred_method = if category.prefers_get() { "GET" } else { "POST" };

    let candidates: Vec<usize> = members
        .iter()
        .copied()
        .filter(|&i| !is_sub_action(&capture[i]))
        .collect();
    // Fall back to sub-actions when the group has nothing else
    let pool = if candidates.is_empty() {
        members.to_vec()
    } else {
        candidates
    };

    pool.into_iter().min_by_key(|&i| {
        let request = &capture[i];
        let key = (
            request.method.to_ascii_uppercase(),
            request.base_url().to_string(),
        );
        let freq = frequency.get(&key).copied().unwrap_or(1);
        let method_rank = u8::from(request.method.to_ascii_uppercase() != preferred_method);
        // Lower tuple wins: higher frequency, preferred method, earliest capture
        (usize::MAX - freq, method_rank, i)
    })
}

/// Primary-workflow selection when the user has not chosen one:
/// `(priority DESC, complexity ASC, id ASC)`.
#[must_use]
pub fn pick_primary_workflow(workflows: &[Workflow]) -> Option<&Workflow> {
    workflows.iter().min_by(|a, b| {
        b.priority
            .cmp(&a.priority)
            .then(a.complexity.cmp(&b.complexity))
            .then(a.id.cmp(&b.id))
    })
}

// =============================================================================
// TESTS
// =============================================================================
