//! # Oracle Contract
//!
//! The LLM is an external collaborator with a single typed operation:
//! `call_function(prompt, schema, name)` returning a loosely typed JSON
//! payload. This module owns the contract:
//!
//! - the four function definitions the pipeline invokes
//! - strongly typed payload records, decoded fail-fast at the boundary
//!   (unknown enum values are errors, never guesses)
//! - [`NullOracle`], which always defers to the deterministic fallbacks
//!
//! Every call site in the orchestrator has a rule-based fallback, so the
//! pipeline makes progress without any oracle at all.

use crate::types::RetraceError;
use crate::workflow::WorkflowCategory;
use serde::{Deserialize, Serialize};
use serde_json::json;

// =============================================================================
// FUNCTION DEFINITION
// =============================================================================

/// A named JSON-schema function definition.
///
/// `parameters` is always an object schema (`"type": "object"`) and
/// `required` lists its mandatory keys.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionDefinition {
    /// Function name.
    pub name: String,
    /// What the function computes.
    pub description: String,
    /// JSON-schema object for the parameters.
    pub parameters: serde_json::Value,
    /// Required parameter keys.
    pub required: Vec<String>,
}

impl FunctionDefinition {
    /// Create a definition, wrapping the property map into an object schema.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        properties: serde_json::Value,
        required: &[&str],
    ) -> Self {
        let required: Vec<String> = required.iter().map(|s| (*s).to_string()).collect();
        let parameters = json!({
            "type": "object",
            "properties": properties,
            "required": required.clone(),
        });
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
            required,
        }
    }
}

// =============================================================================
// ORACLE TRAIT
// =============================================================================

/// The oracle seam.
///
/// Implementations perform the actual LLM round trip; the core only sees the
/// parsed JSON result. The oracle is stateless from the core's perspective.
pub trait Oracle {
    /// Invoke a function-shaped completion.
    fn call_function(
        &self,
        prompt: &str,
        schema: &FunctionDefinition,
        name: &str,
    ) -> Result<serde_json::Value, RetraceError>;
}

/// Oracle that is never available.
///
/// Forces every call site down its deterministic fallback; used in tests and
/// whenever no model is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullOracle;

impl Oracle for NullOracle {
    fn call_function(
        &self,
        _prompt: &str,
        _schema: &FunctionDefinition,
        name: &str,
    ) -> Result<serde_json::Value, RetraceError> {
        Err(RetraceError::OracleUnavailable(format!(
            "no oracle configured for {name}"
        )))
    }
}

// =============================================================================
// FUNCTION SCHEMAS
// =============================================================================

/// Schema for `discover_workflows`.
#[must_use]
pub fn discover_workflows_schema() -> FunctionDefinition {
    FunctionDefinition::new(
        "discover_workflows",
        "Group the captured requests into coherent user-visible workflows",
        json!({
            "workflows": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "id": {"type": "string"},
                        "name": {"type": "string"},
                        "description": {"type": "string"},
                        "category": {
                            "type": "string",
                            "enum": [
                                "search", "document_operations", "authentication",
                                "user_management", "crud", "data_export", "other"
                            ]
                        },
                        "priority": {"type": "integer", "minimum": 1, "maximum": 10},
                        "complexity": {"type": "integer", "minimum": 1, "maximum": 10},
                        "requires_user_input": {"type": "boolean"},
                        "endpoints": {
                            "type": "array",
                            "items": {
                                "type": "object",
                                "properties": {
                                    "url": {"type": "string"},
                                    "method": {"type": "string"},
                                    "role": {
                                        "type": "string",
                                        "enum": ["primary", "secondary", "supporting"]
                                    }
                                },
                                "required": ["url", "method", "role"]
                            }
                        }
                    },
                    "required": [
                        "id", "name", "category", "priority",
                        "complexity", "requires_user_input", "endpoints"
                    ]
                }
            }
        }),
        &["workflows"],
    )
}

/// Schema for `identify_end_url`.
#[must_use]
pub fn identify_end_url_schema() -> FunctionDefinition {
    FunctionDefinition::new(
        "identify_end_url",
        "Pick the URL of the action request the user described; \
         must be one of the URLs presented in the prompt",
        json!({
            "url": {"type": "string"}
        }),
        &["url"],
    )
}

/// Schema for `identify_dynamic_parts`.
#[must_use]
pub fn identify_dynamic_parts_schema() -> FunctionDefinition {
    FunctionDefinition::new(
        "identify_dynamic_parts",
        "List the literal fragments of the request that vary across invocations",
        json!({
            "dynamic_parts": {
                "type": "array",
                "items": {"type": "string"}
            }
        }),
        &["dynamic_parts"],
    )
}

/// Schema for `identify_input_variables`.
#[must_use]
pub fn identify_input_variables_schema() -> FunctionDefinition {
    FunctionDefinition::new(
        "identify_input_variables",
        "Name the user-supplied input variables visible in the request",
        json!({
            "identified_variables": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "variable_name": {"type": "string"},
                        "variable_value": {"type": "string"}
                    },
                    "required": ["variable_name", "variable_value"]
                }
            }
        }),
        &["identified_variables"],
    )
}

// =============================================================================
// TYPED PAYLOADS
// =============================================================================

/// Endpoint role inside an oracle workflow grouping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndpointRole {
    Primary,
    Secondary,
    Supporting,
}

/// One endpoint in an oracle workflow grouping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointSpec {
    /// Endpoint URL as presented in the prompt.
    pub url: String,
    /// HTTP method.
    pub method: String,
    /// Role within the workflow.
    pub role: EndpointRole,
}

/// One workflow in the oracle's grouping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowSpec {
    /// Oracle-assigned id.
    pub id: String,
    /// Workflow name.
    pub name: String,
    /// Optional description.
    #[serde(default)]
    pub description: Option<String>,
    /// Category; unknown values fail the decode.
    pub category: WorkflowCategory,
    /// Priority in `[1, 10]`.
    pub priority: u8,
    /// Complexity in `[1, 10]`.
    pub complexity: u8,
    /// Whether the workflow needs user input.
    pub requires_user_input: bool,
    /// Grouped endpoints.
    pub endpoints: Vec<EndpointSpec>,
}

/// Payload of `discover_workflows`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowsPayload {
    pub workflows: Vec<WorkflowSpec>,
}

/// Payload of `identify_end_url`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndUrlPayload {
    pub url: String,
}

/// Payload of `identify_dynamic_parts`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DynamicPartsPayload {
    pub dynamic_parts: Vec<String>,
}

/// One identified input variable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentifiedVariable {
    pub variable_name: String,
    pub variable_value: String,
}

/// Payload of `identify_input_variables`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputVariablesPayload {
    pub identified_variables: Vec<IdentifiedVariable>,
}

/// Decode a loosely typed oracle result into a typed payload.
///
/// Fail-fast: structural mismatches and unknown enum values are
/// `DESERIALIZATION_ERROR`s, which the orchestrator treats as an oracle
/// failure and routes to the deterministic fallback.
pub fn decode_payload<T: serde::de::DeserializeOwned>(
    value: serde_json::Value,
) -> Result<T, RetraceError> {
    serde_json::from_value(value).map_err(|e| RetraceError::DeserializationError(e.to_string()))
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schemas_are_object_typed_with_required_keys() {
        for schema in [
            discover_workflows_schema(),
            identify_end_url_schema(),
            identify_dynamic_parts_schema(),
            identify_input_variables_schema(),
        ] {
            assert_eq!(schema.parameters["type"], "object");
            assert!(!schema.required.is_empty());
            assert_eq!(
                schema.parameters["required"],
                serde_json::to_value(&schema.required).expect("json")
            );
        }
    }

    #[test]
    fn workflows_payload_decodes() {
        let value = json!({
            "workflows": [{
                "id": "wf-1",
                "name": "Search items",
                "category": "search",
                "priority": 9,
                "complexity": 2,
                "requires_user_input": true,
                "endpoints": [
                    {"url": "https://api/x/search", "method": "GET", "role": "primary"}
                ]
            }]
        });
        let payload: WorkflowsPayload = decode_payload(value).expect("decode");
        assert_eq!(payload.workflows.len(), 1);
        assert_eq!(payload.workflows[0].category, WorkflowCategory::Search);
        assert_eq!(payload.workflows[0].endpoints[0].role, EndpointRole::Primary);
    }

    #[test]
    fn unknown_category_fails_fast() {
        let value = json!({
            "workflows": [{
                "id": "wf-1",
                "name": "X",
                "category": "telepathy",
                "priority": 5,
                "complexity": 5,
                "requires_user_input": false,
                "endpoints": []
            }]
        });
        let err = decode_payload::<WorkflowsPayload>(value).expect_err("unknown enum");
        assert_eq!(err.code(), "DESERIALIZATION_ERROR");
    }

    #[test]
    fn unknown_role_fails_fast() {
        let value = json!({
            "workflows": [{
                "id": "wf-1",
                "name": "X",
                "category": "search",
                "priority": 5,
                "complexity": 5,
                "requires_user_input": false,
                "endpoints": [
                    {"url": "https://api/x", "method": "GET", "role": "observer"}
                ]
            }]
        });
        assert!(decode_payload::<WorkflowsPayload>(value).is_err());
    }

    #[test]
    fn null_oracle_is_always_unavailable() {
        let err = NullOracle
            .call_function("prompt", &identify_end_url_schema(), "identify_end_url")
            .expect_err("unavailable");
        assert!(!err.is_fatal());
        assert_eq!(err.code(), "ORACLE_UNAVAILABLE");
    }

    #[test]
    fn dynamic_parts_payload_decodes() {
        let value = json!({"dynamic_parts": ["AAA", "12345"]});
        let payload: DynamicPartsPayload = decode_payload(value).expect("decode");
        assert_eq!(payload.dynamic_parts, vec!["AAA", "12345"]);
    }
}
