//! Workflow domain types for Weft.
//!
//! Defines the declarative workflow graph (`WorkflowDefinition`, `NodeSpec`,
//! `EdgeSpec`), the per-node failure policy, and the execution tracking types
//! (`NodeStatus`, `StepResult`, `RunRecord`) produced by the engine.
//!
//! Wire format is camelCase JSON, matching the documents served by the
//! external workflow catalog.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Workflow Definition
// ---------------------------------------------------------------------------

/// A declarative automation: typed nodes connected by directed edges.
///
/// Immutable once handed to the engine for a run. Structural invariants
/// (acyclic, single entry node, known endpoints) are checked at load time by
/// the engine, not by deserialization.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowDefinition {
    /// Opaque identifier assigned by the catalog.
    pub id: String,
    /// Human-readable name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Optional longer description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Nodes keyed by node ID. Ordered map so iteration is deterministic.
    pub nodes: BTreeMap<String, NodeSpec>,
    /// Directed edges, in declaration order.
    #[serde(default)]
    pub edges: Vec<EdgeSpec>,
    /// Extensible metadata carried through untouched.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, Value>,
}

impl WorkflowDefinition {
    /// Display label: the name when set, otherwise the ID.
    pub fn label(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.id)
    }
}

/// One step's declaration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeSpec {
    /// Node ID. May be omitted in documents; filled from the map key on load.
    #[serde(default)]
    pub id: String,
    /// Registry key of the executor (e.g. `http.request`).
    #[serde(rename = "type")]
    pub step_type: String,
    /// Executor parameters. String leaves may contain `{{ path }}` templates.
    #[serde(default)]
    pub params: serde_json::Map<String, Value>,
    /// What to do when the executor fails.
    #[serde(default)]
    pub on_error: ErrorPolicy,
    /// Per-attempt timeout in milliseconds (engine default when absent).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

/// A directed dependency between two nodes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EdgeSpec {
    /// Source node ID.
    pub from: String,
    /// Target node ID.
    pub to: String,
    /// Branch tag; only meaningful on edges leaving a branching step.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
}

impl EdgeSpec {
    /// Unconditional edge.
    pub fn new(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            branch: None,
        }
    }

    /// Edge taken only when `from` selects `branch`.
    pub fn on_branch(from: impl Into<String>, to: impl Into<String>, branch: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            branch: Some(branch.into()),
        }
    }
}

// ---------------------------------------------------------------------------
// Error policy
// ---------------------------------------------------------------------------

/// Per-node failure policy.
///
/// ```json
/// "onError": "stop"
/// "onError": "continue"
/// "onError": { "retry": { "maxAttempts": 3, "backoffMs": 250 } }
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ErrorPolicy {
    /// Mark the node errored and wind the run down.
    #[default]
    Stop,
    /// Mark the node errored, commit `null`, and let dependents proceed.
    Continue,
    /// Re-attempt with the same resolved params, then fall back to `Stop`.
    Retry {
        /// Total attempts including the first (default 3).
        #[serde(default = "default_max_attempts")]
        max_attempts: u32,
        /// Base delay between attempts in milliseconds.
        #[serde(default = "default_backoff_ms")]
        backoff_ms: u64,
        /// Curve override; the engine-wide default applies when absent.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        backoff: Option<BackoffCurve>,
    },
}

fn default_max_attempts() -> u32 {
    3
}

fn default_backoff_ms() -> u64 {
    1000
}

impl ErrorPolicy {
    /// Retry policy with the engine's default curve.
    pub fn retry(max_attempts: u32, backoff_ms: u64) -> Self {
        ErrorPolicy::Retry {
            max_attempts,
            backoff_ms,
            backoff: None,
        }
    }
}

/// Shape of the delay between retry attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffCurve {
    /// `backoffMs` between every attempt.
    Fixed,
    /// `backoffMs * n` after the n-th failed attempt.
    #[default]
    Linear,
    /// `backoffMs * 2^(n-1)` after the n-th failed attempt.
    Exponential,
}

// ---------------------------------------------------------------------------
// Execution status
// ---------------------------------------------------------------------------

/// Overall status of a workflow run.
///
/// A sealed `RunRecord` only ever carries one of the three terminal values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    #[serde(rename = "partial")]
    PartiallySucceeded,
}

impl RunStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            RunStatus::Succeeded | RunStatus::Failed | RunStatus::PartiallySucceeded
        )
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RunStatus::Pending => "pending",
            RunStatus::Running => "running",
            RunStatus::Succeeded => "succeeded",
            RunStatus::Failed => "failed",
            RunStatus::PartiallySucceeded => "partial",
        };
        f.write_str(s)
    }
}

/// Lifecycle of a single node within a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    Waiting,
    Ready,
    Executing,
    Completed,
    Errored,
    Skipped,
}

impl NodeStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            NodeStatus::Completed | NodeStatus::Errored | NodeStatus::Skipped
        )
    }
}

impl std::fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            NodeStatus::Waiting => "waiting",
            NodeStatus::Ready => "ready",
            NodeStatus::Executing => "executing",
            NodeStatus::Completed => "completed",
            NodeStatus::Errored => "errored",
            NodeStatus::Skipped => "skipped",
        };
        f.write_str(s)
    }
}

/// Classification of a node failure as recorded in the run record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepFailureKind {
    /// A `{{ path }}` template could not be resolved.
    Resolution,
    /// The executor reported an error.
    Execution,
    /// The attempt exceeded its timeout.
    Timeout,
    /// The run was cancelled while the node was executing.
    Cancelled,
}

/// Recorded failure of a node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepFailure {
    pub kind: StepFailureKind,
    pub message: String,
    #[serde(default)]
    pub retryable: bool,
}

// ---------------------------------------------------------------------------
// Run Record
// ---------------------------------------------------------------------------

/// Terminal outcome of one node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepResult {
    pub node_id: String,
    pub step_type: String,
    /// Always terminal: `completed`, `errored` or `skipped`.
    pub status: NodeStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<StepFailure>,
    /// Executor invocations; 0 for skipped nodes.
    pub attempts: u32,
    pub duration_ms: u64,
    /// Set on nodes that were still executing when the run was cancelled.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub cancelled: bool,
}

impl StepResult {
    /// Result for a node that never executed.
    pub fn skipped(node_id: impl Into<String>, step_type: impl Into<String>) -> Self {
        Self {
            node_id: node_id.into(),
            step_type: step_type.into(),
            status: NodeStatus::Skipped,
            output: None,
            error: None,
            attempts: 0,
            duration_ms: 0,
            cancelled: false,
        }
    }
}

/// Sealed snapshot of a finished run, handed to the run record sink once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunRecord {
    /// UUIDv7 run ID.
    pub run_id: Uuid,
    pub workflow_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub status: RunStatus,
    /// Ordered by completion time; skipped nodes appear when their skip was decided.
    pub step_results: Vec<StepResult>,
    /// True when the run ended because of an external cancellation signal.
    #[serde(default)]
    pub cancelled: bool,
}

impl RunRecord {
    /// Look up the result for a node.
    pub fn step(&self, node_id: &str) -> Option<&StepResult> {
        self.step_results.iter().find(|r| r.node_id == node_id)
    }

    /// IDs of nodes whose executor was invoked, in completion order.
    pub fn executed_nodes(&self) -> Vec<&str> {
        self.step_results
            .iter()
            .filter(|r| r.attempts > 0)
            .map(|r| r.node_id.as_str())
            .collect()
    }

    /// Wall-clock duration of the run in milliseconds.
    pub fn duration_ms(&self) -> u64 {
        (self.finished_at - self.started_at)
            .num_milliseconds()
            .max(0) as u64
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_catalog_json_document() {
        let doc = json!({
            "id": "wf-onboarding",
            "name": "Onboarding",
            "nodes": {
                "fetch": {
                    "type": "http.request",
                    "params": { "method": "GET", "url": "https://example.com/{{ input.user }}" },
                    "onError": { "retry": { "maxAttempts": 5, "backoffMs": 200 } },
                    "timeoutMs": 3000
                },
                "check": {
                    "type": "condition",
                    "params": { "expression": "fetch.status == 200" }
                },
                "notify": { "type": "transform", "params": { "value": "ok" }, "onError": "continue" }
            },
            "edges": [
                { "from": "fetch", "to": "check" },
                { "from": "check", "to": "notify", "branch": "true" }
            ]
        });

        let def: WorkflowDefinition = serde_json::from_value(doc).unwrap();
        assert_eq!(def.label(), "Onboarding");
        assert_eq!(def.nodes.len(), 3);
        assert_eq!(def.nodes["fetch"].step_type, "http.request");
        assert_eq!(def.nodes["fetch"].timeout_ms, Some(3000));
        assert_eq!(def.nodes["fetch"].on_error, ErrorPolicy::retry(5, 200));
        assert_eq!(def.nodes["check"].on_error, ErrorPolicy::Stop);
        assert_eq!(def.nodes["notify"].on_error, ErrorPolicy::Continue);
        assert_eq!(def.edges[1].branch.as_deref(), Some("true"));
        // IDs are filled in by the engine on load, not by serde.
        assert!(def.nodes["check"].id.is_empty());
    }

    #[test]
    fn test_error_policy_wire_format() {
        assert_eq!(serde_json::to_value(ErrorPolicy::Stop).unwrap(), json!("stop"));
        assert_eq!(
            serde_json::to_value(ErrorPolicy::Continue).unwrap(),
            json!("continue")
        );
        assert_eq!(
            serde_json::to_value(ErrorPolicy::retry(3, 10)).unwrap(),
            json!({ "retry": { "maxAttempts": 3, "backoffMs": 10 } })
        );

        let parsed: ErrorPolicy = serde_json::from_value(json!({
            "retry": { "maxAttempts": 2, "backoffMs": 50, "backoff": "exponential" }
        }))
        .unwrap();
        assert_eq!(
            parsed,
            ErrorPolicy::Retry {
                max_attempts: 2,
                backoff_ms: 50,
                backoff: Some(BackoffCurve::Exponential),
            }
        );
    }

    #[test]
    fn test_retry_policy_defaults() {
        let parsed: ErrorPolicy = serde_json::from_value(json!({ "retry": {} })).unwrap();
        assert_eq!(parsed, ErrorPolicy::retry(3, 1000));
    }

    #[test]
    fn test_unknown_policy_rejected() {
        let result: Result<ErrorPolicy, _> = serde_json::from_value(json!("explode"));
        assert!(result.is_err());
    }

    #[test]
    fn test_run_status_wire_names() {
        assert_eq!(
            serde_json::to_value(RunStatus::PartiallySucceeded).unwrap(),
            json!("partial")
        );
        assert_eq!(serde_json::to_value(RunStatus::Succeeded).unwrap(), json!("succeeded"));
        assert_eq!(RunStatus::PartiallySucceeded.to_string(), "partial");
        assert!(!RunStatus::Running.is_terminal());
        assert!(RunStatus::Failed.is_terminal());
    }

    #[test]
    fn test_step_result_omits_empty_fields() {
        let result = StepResult::skipped("b", "transform");
        let value = serde_json::to_value(&result).unwrap();
        assert_eq!(value["nodeId"], json!("b"));
        assert_eq!(value["status"], json!("skipped"));
        assert_eq!(value["attempts"], json!(0));
        assert!(value.get("output").is_none());
        assert!(value.get("error").is_none());
        assert!(value.get("cancelled").is_none());
    }

    #[test]
    fn test_run_record_helpers() {
        let started = Utc::now();
        let record = RunRecord {
            run_id: Uuid::now_v7(),
            workflow_id: "wf".to_string(),
            started_at: started,
            finished_at: started + chrono::Duration::milliseconds(42),
            status: RunStatus::Succeeded,
            step_results: vec![
                StepResult {
                    node_id: "a".to_string(),
                    step_type: "transform".to_string(),
                    status: NodeStatus::Completed,
                    output: Some(json!(1)),
                    error: None,
                    attempts: 1,
                    duration_ms: 0,
                    cancelled: false,
                },
                StepResult::skipped("b", "transform"),
            ],
            cancelled: false,
        };
        assert_eq!(record.duration_ms(), 42);
        assert_eq!(record.executed_nodes(), vec!["a"]);
        assert_eq!(record.step("b").unwrap().status, NodeStatus::Skipped);
        assert!(record.step("zzz").is_none());

        let json_str = serde_json::to_string(&record).unwrap();
        assert!(json_str.contains("\"workflowId\":\"wf\""));
        assert!(json_str.contains("\"stepResults\""));
    }

    #[test]
    fn test_parse_yaml_document() {
        let yaml = r#"
id: wf-yaml
nodes:
  start:
    type: transform
    params:
      value: [1, 2, 3]
  wait:
    type: delay
    params:
      ms: 10
    onError: continue
edges:
  - from: start
    to: wait
"#;
        let def: WorkflowDefinition = serde_yaml_ng::from_str(yaml).unwrap();
        assert_eq!(def.id, "wf-yaml");
        assert_eq!(def.edges, vec![EdgeSpec::new("start", "wait")]);
        assert_eq!(def.nodes["wait"].on_error, ErrorPolicy::Continue);
    }
}
