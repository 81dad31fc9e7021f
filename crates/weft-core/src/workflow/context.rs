//! Run context: the write-once store of node outputs for one execution.
//!
//! `RunContext` is owned by the scheduler loop for the whole run. Workers
//! never mutate it; they receive an `Arc` snapshot taken at dispatch time.

use std::collections::HashMap;

use serde_json::{json, Map, Value};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Maximum serialized size of a single node output (1 MB).
pub const MAX_STEP_OUTPUT_SIZE: usize = 1_048_576;

/// Key under which the initial payload is exposed to templates and JEXL.
pub const INPUT_ROOT: &str = "input";

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ContextError {
    #[error("output for node '{0}' was already committed")]
    AlreadyCommitted(String),
}

// ---------------------------------------------------------------------------
// RunContext
// ---------------------------------------------------------------------------

/// Append-only data store for one run.
///
/// `variables` maps node id to committed output. Insertion order is kept so
/// callers can observe completion order.
#[derive(Debug, Clone)]
pub struct RunContext {
    run_id: Uuid,
    workflow_id: String,
    global_input: Value,
    variables: HashMap<String, Value>,
    order: Vec<String>,
}

impl RunContext {
    pub fn new(run_id: Uuid, workflow_id: impl Into<String>, global_input: Value) -> Self {
        Self {
            run_id,
            workflow_id: workflow_id.into(),
            global_input,
            variables: HashMap::new(),
            order: Vec::new(),
        }
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn workflow_id(&self) -> &str {
        &self.workflow_id
    }

    /// The immutable payload the run was started with.
    pub fn global_input(&self) -> &Value {
        &self.global_input
    }

    /// Commit a node's output. Each node may be written exactly once.
    ///
    /// Outputs whose serialized form exceeds `MAX_STEP_OUTPUT_SIZE` are
    /// replaced with a truncation marker.
    pub fn commit(&mut self, node_id: &str, output: Value) -> Result<(), ContextError> {
        if self.variables.contains_key(node_id) {
            return Err(ContextError::AlreadyCommitted(node_id.to_string()));
        }

        let size = serde_json::to_string(&output).map(|s| s.len()).unwrap_or(0);
        let output = if size > MAX_STEP_OUTPUT_SIZE {
            tracing::warn!(
                node_id,
                size,
                max = MAX_STEP_OUTPUT_SIZE,
                "node output exceeds size limit, truncating"
            );
            json!({
                "_truncated": true,
                "_original_size": size,
            })
        } else {
            output
        };

        self.variables.insert(node_id.to_string(), output);
        self.order.push(node_id.to_string());
        Ok(())
    }

    /// Committed output of a node, if any.
    pub fn output(&self, node_id: &str) -> Option<&Value> {
        self.variables.get(node_id)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Iterate committed outputs in completion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.order
            .iter()
            .filter_map(|id| self.variables.get(id).map(|v| (id.as_str(), v)))
    }

    /// Build the object JEXL expressions are evaluated against:
    /// `{ input: <globalInput>, <nodeId>: <output>, ... }`.
    pub fn to_expression_context(&self) -> Value {
        let mut map = Map::new();
        for (id, value) in self.iter() {
            map.insert(id.to_string(), value.clone());
        }
        map.insert(INPUT_ROOT.to_string(), self.global_input.clone());
        Value::Object(map)
    }
}

/// Render a JSON value for interpolation into surrounding text.
///
/// Strings are inserted verbatim, everything else as compact JSON.
pub fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> RunContext {
        RunContext::new(Uuid::now_v7(), "wf", json!({"user": "ada"}))
    }

    #[test]
    fn commit_is_write_once() {
        let mut ctx = ctx();
        ctx.commit("a", json!(1)).unwrap();
        let err = ctx.commit("a", json!(2)).unwrap_err();
        assert_eq!(err, ContextError::AlreadyCommitted("a".to_string()));
        assert_eq!(ctx.output("a"), Some(&json!(1)));
    }

    #[test]
    fn completion_order_is_preserved() {
        let mut ctx = ctx();
        ctx.commit("c", json!("x")).unwrap();
        ctx.commit("a", json!("y")).unwrap();
        ctx.commit("b", Value::Null).unwrap();
        let ids: Vec<&str> = ctx.iter().map(|(id, _)| id).collect();
        assert_eq!(ids, vec!["c", "a", "b"]);
    }

    #[test]
    fn expression_context_exposes_input_and_outputs() {
        let mut ctx = ctx();
        ctx.commit("fetch", json!({"status": 200})).unwrap();
        let value = ctx.to_expression_context();
        assert_eq!(value["input"]["user"], "ada");
        assert_eq!(value["fetch"]["status"], 200);
    }

    #[test]
    fn oversized_output_is_truncated() {
        let mut ctx = ctx();
        let big = "x".repeat(MAX_STEP_OUTPUT_SIZE + 10);
        ctx.commit("big", json!(big)).unwrap();
        assert_eq!(ctx.output("big").unwrap()["_truncated"], true);
    }

    #[test]
    fn value_to_string_formats() {
        assert_eq!(value_to_string(&json!("hi")), "hi");
        assert_eq!(value_to_string(&json!(42)), "42");
        assert_eq!(value_to_string(&json!({"a": [1, 2]})), r#"{"a":[1,2]}"#);
        assert_eq!(value_to_string(&Value::Null), "null");
    }
}
