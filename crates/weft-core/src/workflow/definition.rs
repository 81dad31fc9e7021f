//! Workflow definition loading and validation.
//!
//! Parses JSON or YAML into `WorkflowDefinition`, then checks it against the
//! step registry. A definition that passes `validate_definition` can be run;
//! anything else is rejected before a single node executes.

use std::path::Path;
use std::sync::Arc;

use serde_json::Value;
use thiserror::Error;
use weft_types::config::EngineConfig;
use weft_types::workflow::{ErrorPolicy, WorkflowDefinition};

use super::context::INPUT_ROOT;
use super::dag::WorkflowGraph;
use super::expression::has_markers;
use super::registry::{StepExecutor, StepRegistry};

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// A definition that cannot be run.
#[derive(Debug, Error)]
pub enum WorkflowInvalidError {
    #[error("parse error: {0}")]
    Parse(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("workflow has no nodes")]
    Empty,

    #[error("invalid node id '{node}': {reason}")]
    InvalidNodeId { node: String, reason: String },

    #[error("node keyed '{key}' declares id '{id}'")]
    NodeIdMismatch { key: String, id: String },

    #[error("edge {from} -> {to} references unknown node '{missing}'")]
    UnknownEdgeEndpoint {
        from: String,
        to: String,
        missing: String,
    },

    #[error("self-loop on node '{0}'")]
    SelfLoop(String),

    #[error("duplicate edge {from} -> {to}")]
    DuplicateEdge { from: String, to: String },

    #[error("cycle detected involving node '{0}'")]
    CycleDetected(String),

    #[error("expected exactly one entry node, found {}: [{}]", .0.len(), .0.join(", "))]
    MultipleEntryNodes(Vec<String>),

    #[error("node '{node}' has unknown step type '{step_type}'")]
    UnknownStepType { node: String, step_type: String },

    #[error("node '{node}' has an invalid onError policy: {reason}")]
    InvalidPolicy { node: String, reason: String },

    #[error("edge {from} -> {to} is tagged '{branch}' but '{from}' does not select branches")]
    UnexpectedBranch {
        from: String,
        to: String,
        branch: String,
    },

    #[error("node '{node}' has invalid params: {reason}")]
    InvalidParams { node: String, reason: String },
}

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

/// Parse a JSON workflow definition. Node ids left out are filled from keys.
pub fn parse_workflow_json(json: &str) -> Result<WorkflowDefinition, WorkflowInvalidError> {
    let def: WorkflowDefinition =
        serde_json::from_str(json).map_err(|e| WorkflowInvalidError::Parse(e.to_string()))?;
    normalize(def)
}

/// Parse a YAML workflow definition. Node ids left out are filled from keys.
pub fn parse_workflow_yaml(yaml: &str) -> Result<WorkflowDefinition, WorkflowInvalidError> {
    let def: WorkflowDefinition =
        serde_yaml_ng::from_str(yaml).map_err(|e| WorkflowInvalidError::Parse(e.to_string()))?;
    normalize(def)
}

/// Load a definition from disk; `.yaml`/`.yml` parse as YAML, anything else as JSON.
pub fn load_workflow_file(path: &Path) -> Result<WorkflowDefinition, WorkflowInvalidError> {
    let content = std::fs::read_to_string(path)?;
    let is_yaml = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("yaml") || e.eq_ignore_ascii_case("yml"));

    if is_yaml {
        parse_workflow_yaml(&content)
    } else {
        parse_workflow_json(&content)
    }
}

/// Fill empty node ids from their map keys and reject disagreeing ones.
pub fn normalize(mut def: WorkflowDefinition) -> Result<WorkflowDefinition, WorkflowInvalidError> {
    for (key, node) in def.nodes.iter_mut() {
        if node.id.is_empty() {
            node.id = key.clone();
        } else if node.id != *key {
            return Err(WorkflowInvalidError::NodeIdMismatch {
                key: key.clone(),
                id: node.id.clone(),
            });
        }
    }
    Ok(def)
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// A validated definition bound to its executors.
#[derive(Clone)]
pub struct ExecutionPlan {
    pub graph: WorkflowGraph,
    /// Executor for each node, indexed like the graph.
    pub executors: Vec<Arc<dyn StepExecutor>>,
}

impl std::fmt::Debug for ExecutionPlan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionPlan")
            .field("graph", &self.graph)
            .finish_non_exhaustive()
    }
}

/// Run every load-time check and bind executors.
///
/// Checks, in order: node ids, graph structure (see `WorkflowGraph::build`),
/// registered step types, well-formed `onError` policies, branch tags only
/// on edges leaving branching steps, and executor param pre-validation.
pub fn validate_definition(
    def: &WorkflowDefinition,
    registry: &StepRegistry,
    config: &EngineConfig,
) -> Result<ExecutionPlan, WorkflowInvalidError> {
    for (key, node) in &def.nodes {
        validate_node_id(key)?;
        if !node.id.is_empty() && node.id != *key {
            return Err(WorkflowInvalidError::NodeIdMismatch {
                key: key.clone(),
                id: node.id.clone(),
            });
        }
    }

    let graph = WorkflowGraph::build(def)?;

    let mut executors = Vec::with_capacity(graph.len());
    for (key, node) in &def.nodes {
        let executor =
            registry
                .lookup(&node.step_type)
                .map_err(|_| WorkflowInvalidError::UnknownStepType {
                    node: key.clone(),
                    step_type: node.step_type.clone(),
                })?;
        validate_policy(key, &node.on_error, config)?;
        if node.timeout_ms == Some(0) {
            return Err(WorkflowInvalidError::InvalidParams {
                node: key.clone(),
                reason: "timeoutMs must be greater than 0".to_string(),
            });
        }
        executors.push(executor);
    }

    for edge in graph.edges() {
        if let Some(branch) = &edge.branch {
            if !executors[edge.from].emits_branch() {
                return Err(WorkflowInvalidError::UnexpectedBranch {
                    from: graph.id(edge.from).to_string(),
                    to: graph.id(edge.to).to_string(),
                    branch: branch.clone(),
                });
            }
        }
    }

    for (i, node) in def.nodes.values().enumerate() {
        executors[i]
            .validate_params(&with_placeholders(&node.params))
            .map_err(|reason| WorkflowInvalidError::InvalidParams {
                node: graph.id(i).to_string(),
                reason,
            })?;
    }

    tracing::debug!(
        workflow = %def.id,
        nodes = graph.len(),
        edges = graph.edges().len(),
        "workflow definition validated"
    );

    Ok(ExecutionPlan { graph, executors })
}

fn validate_node_id(id: &str) -> Result<(), WorkflowInvalidError> {
    let reason = if id.is_empty() {
        Some("must not be empty")
    } else if id == INPUT_ROOT {
        Some("'input' is reserved for the run's global input")
    } else if id.contains('.') {
        Some("must not contain '.'")
    } else if id.chars().any(|c| c.is_whitespace() || c == '{' || c == '}') {
        Some("must not contain whitespace or braces")
    } else {
        None
    };

    match reason {
        Some(reason) => Err(WorkflowInvalidError::InvalidNodeId {
            node: id.to_string(),
            reason: reason.to_string(),
        }),
        None => Ok(()),
    }
}

fn validate_policy(
    node: &str,
    policy: &ErrorPolicy,
    config: &EngineConfig,
) -> Result<(), WorkflowInvalidError> {
    if let ErrorPolicy::Retry {
        max_attempts,
        backoff_ms,
        ..
    } = policy
    {
        if *max_attempts < 1 {
            return Err(WorkflowInvalidError::InvalidPolicy {
                node: node.to_string(),
                reason: "maxAttempts must be at least 1".to_string(),
            });
        }
        if *backoff_ms > config.max_backoff_ms {
            return Err(WorkflowInvalidError::InvalidPolicy {
                node: node.to_string(),
                reason: format!(
                    "backoffMs {} exceeds the maximum of {} ms",
                    backoff_ms, config.max_backoff_ms
                ),
            });
        }
    }
    Ok(())
}

/// Keep templated params present (as marker strings) so executors can tell
/// "missing" from "known at dispatch".
fn with_placeholders(params: &serde_json::Map<String, Value>) -> serde_json::Map<String, Value> {
    params
        .iter()
        .map(|(k, v)| {
            let v = if has_markers(v) && !v.is_string() {
                Value::String("{{ }}".to_string())
            } else {
                v.clone()
            };
            (k.clone(), v)
        })
        .collect()
}
