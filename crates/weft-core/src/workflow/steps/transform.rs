//! `transform`: reshape data already in the run without any I/O.
//!
//! Exactly one operation key must be present:
//!
//! - `value`: return the (resolved) literal.
//! - `mapping` + optional `source`: build an object whose fields are dot
//!   paths into `source`, or into the run context when `source` is absent.
//! - `append` + `source`: push onto the `source` array (`null` counts as empty).
//! - `concat`: flatten an array of arrays.
//! - `merge`: shallow-merge an array of objects, later keys winning.

use serde_json::{Map, Value};

use crate::workflow::expression::{get_path, lookup};
use crate::workflow::registry::{StepContext, StepExecutionError, StepExecutor, StepFuture, StepOutput};

const OPERATIONS: [&str; 5] = ["value", "mapping", "append", "concat", "merge"];

#[derive(Debug, Clone, Copy, Default)]
pub struct TransformStep;

impl TransformStep {
    pub const TYPE: &'static str = "transform";

    fn operation(params: &Map<String, Value>) -> Result<&'static str, String> {
        let present: Vec<&'static str> = OPERATIONS
            .iter()
            .copied()
            .filter(|op| params.contains_key(*op))
            .collect();
        match present.as_slice() {
            [op] => Ok(op),
            [] => Err(format!("transform requires one of {}", OPERATIONS.join(", "))),
            many => Err(format!(
                "transform takes exactly one operation, got {}",
                many.join(", ")
            )),
        }
    }

    fn apply(params: &Map<String, Value>, ctx: &StepContext) -> Result<Value, String> {
        match Self::operation(params)? {
            "value" => Ok(params.get("value").cloned().unwrap_or(Value::Null)),
            "mapping" => {
                let mapping = params
                    .get("mapping")
                    .and_then(Value::as_object)
                    .ok_or("'mapping' must be an object of field -> path")?;
                let mut out = Map::with_capacity(mapping.len());
                for (field, path) in mapping {
                    let path = path
                        .as_str()
                        .ok_or_else(|| format!("mapping for '{field}' must be a path string"))?;
                    let value = match params.get("source") {
                        Some(source) => get_path(source, path).cloned(),
                        None => lookup(path, &ctx.run),
                    }
                    .map_err(|e| e.to_string())?;
                    out.insert(field.clone(), value);
                }
                Ok(Value::Object(out))
            }
            "append" => {
                let mut items = match params.get("source") {
                    Some(Value::Array(items)) => items.clone(),
                    Some(Value::Null) | None => Vec::new(),
                    Some(_) => return Err("'source' for append must be an array".to_string()),
                };
                items.push(params.get("append").cloned().unwrap_or(Value::Null));
                Ok(Value::Array(items))
            }
            "concat" => {
                let lists = params
                    .get("concat")
                    .and_then(Value::as_array)
                    .ok_or("'concat' must be an array of arrays")?;
                let mut out = Vec::new();
                for (i, list) in lists.iter().enumerate() {
                    match list {
                        Value::Array(items) => out.extend(items.iter().cloned()),
                        Value::Null => {}
                        _ => return Err(format!("concat element {i} is not an array")),
                    }
                }
                Ok(Value::Array(out))
            }
            "merge" => {
                let objects = params
                    .get("merge")
                    .and_then(Value::as_array)
                    .ok_or("'merge' must be an array of objects")?;
                let mut out = Map::new();
                for (i, object) in objects.iter().enumerate() {
                    match object {
                        Value::Object(map) => {
                            for (k, v) in map {
                                out.insert(k.clone(), v.clone());
                            }
                        }
                        Value::Null => {}
                        _ => return Err(format!("merge element {i} is not an object")),
                    }
                }
                Ok(Value::Object(out))
            }
            other => Err(format!("unsupported transform '{other}'")),
        }
    }
}

impl StepExecutor for TransformStep {
    fn execute<'a>(&'a self, params: Value, ctx: &'a StepContext) -> StepFuture<'a> {
        let outcome = match params.as_object() {
            Some(map) => Self::apply(map, ctx),
            None => Err("transform params must be an object".to_string()),
        }
        .map(StepOutput::value)
        .map_err(StepExecutionError::fatal);
        Box::pin(std::future::ready(outcome))
    }

    fn validate_params(&self, params: &Map<String, Value>) -> Result<(), String> {
        Self::operation(params).map(|_| ())
    }

    fn description(&self) -> &'static str {
        "Reshape data: value, mapping, append, concat or merge"
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;
    use uuid::Uuid;

    use super::*;
    use crate::workflow::clock::SystemClock;
    use crate::workflow::context::RunContext;

    fn ctx() -> StepContext {
        let mut run = RunContext::new(Uuid::now_v7(), "wf", json!({"user": {"id": 7}}));
        run.commit("fetch", json!({"body": {"name": "ada", "langs": ["rust"]}}))
            .unwrap();
        StepContext::detached("shape", run, Arc::new(SystemClock))
    }

    async fn run(params: Value) -> Result<Value, StepExecutionError> {
        TransformStep.execute(params, &ctx()).await.map(|o| o.value)
    }

    #[tokio::test]
    async fn value_passes_through() {
        assert_eq!(run(json!({"value": {"a": 1}})).await.unwrap(), json!({"a": 1}));
    }

    #[tokio::test]
    async fn mapping_from_source_and_run_context() {
        let out = run(json!({
            "source": {"a": {"b": [1, 2]}},
            "mapping": {"second": "a.b.1"}
        }))
        .await
        .unwrap();
        assert_eq!(out, json!({"second": 2}));

        let out = run(json!({
            "mapping": {"name": "fetch.body.name", "id": "input.user.id"}
        }))
        .await
        .unwrap();
        assert_eq!(out, json!({"name": "ada", "id": 7}));
    }

    #[tokio::test]
    async fn mapping_missing_path_fails() {
        let err = run(json!({"source": {}, "mapping": {"x": "nope"}})).await.unwrap_err();
        assert!(err.message.contains("nope"));
    }

    #[tokio::test]
    async fn append_concat_merge() {
        assert_eq!(
            run(json!({"source": [1], "append": 2})).await.unwrap(),
            json!([1, 2])
        );
        assert_eq!(
            run(json!({"source": null, "append": "x"})).await.unwrap(),
            json!(["x"])
        );
        assert_eq!(
            run(json!({"concat": [[1], [], [2, 3], null]})).await.unwrap(),
            json!([1, 2, 3])
        );
        assert_eq!(
            run(json!({"merge": [{"a": 1, "b": 1}, {"b": 2}]})).await.unwrap(),
            json!({"a": 1, "b": 2})
        );
    }

    #[tokio::test]
    async fn exactly_one_operation() {
        assert!(run(json!({})).await.is_err());
        assert!(run(json!({"value": 1, "merge": []})).await.is_err());
        assert!(TransformStep
            .validate_params(json!({"concat": []}).as_object().unwrap())
            .is_ok());
    }
}
