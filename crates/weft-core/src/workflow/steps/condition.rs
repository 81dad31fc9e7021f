//! `condition`: evaluate a predicate and select branch `"true"` or `"false"`.
//!
//! Either `expression` (JEXL, evaluated against `{ input, <nodeId>: output }`)
//! or `value` (coerced by truthiness) must be given.

use serde_json::{json, Map, Value};

use crate::workflow::expression::{truthy, WorkflowEvaluator};
use crate::workflow::registry::{StepContext, StepExecutionError, StepExecutor, StepFuture, StepOutput};

#[derive(Debug, Clone, Copy, Default)]
pub struct ConditionStep;

impl ConditionStep {
    pub const TYPE: &'static str = "condition";

    fn evaluate(params: &Value, ctx: &StepContext) -> Result<bool, StepExecutionError> {
        if let Some(expression) = params.get("expression") {
            let expression = expression
                .as_str()
                .ok_or_else(|| StepExecutionError::fatal("'expression' must be a string"))?;
            // The evaluator is not Send; keep it out of the returned future.
            return WorkflowEvaluator::new()
                .evaluate_in_run_context(expression, &ctx.run)
                .map_err(|e| StepExecutionError::fatal(e.to_string()));
        }
        match params.get("value") {
            Some(value) => Ok(truthy(value)),
            None => Err(StepExecutionError::fatal(
                "condition requires 'expression' or 'value'",
            )),
        }
    }
}

impl StepExecutor for ConditionStep {
    fn execute<'a>(&'a self, params: Value, ctx: &'a StepContext) -> StepFuture<'a> {
        let outcome = Self::evaluate(&params, ctx).map(|result| {
            let branch = if result { "true" } else { "false" };
            StepOutput::with_branch(json!({ "result": result, "branch": branch }), branch)
        });
        Box::pin(std::future::ready(outcome))
    }

    fn emits_branch(&self) -> bool {
        true
    }

    fn validate_params(&self, params: &Map<String, Value>) -> Result<(), String> {
        match (params.get("expression"), params.get("value")) {
            (Some(_), Some(_)) => Err("give either 'expression' or 'value', not both".to_string()),
            (Some(Value::String(_)), None) | (None, Some(_)) => Ok(()),
            (Some(_), None) => Err("'expression' must be a string".to_string()),
            (None, None) => Err("condition requires 'expression' or 'value'".to_string()),
        }
    }

    fn description(&self) -> &'static str {
        "Select branch \"true\" or \"false\" from an expression or value"
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use uuid::Uuid;

    use super::*;
    use crate::workflow::clock::SystemClock;
    use crate::workflow::context::RunContext;

    fn ctx() -> StepContext {
        let mut run = RunContext::new(Uuid::now_v7(), "wf", json!({"env": "prod"}));
        run.commit("fetch", json!({"status": 503})).unwrap();
        StepContext::detached("check", run, Arc::new(SystemClock))
    }

    #[tokio::test]
    async fn expression_selects_branch() {
        let ctx = ctx();
        let out = ConditionStep
            .execute(json!({"expression": "fetch.status >= 500"}), &ctx)
            .await
            .unwrap();
        assert_eq!(out.branch.as_deref(), Some("true"));
        assert_eq!(out.value, json!({"result": true, "branch": "true"}));

        let out = ConditionStep
            .execute(json!({"expression": "input.env == 'staging'"}), &ctx)
            .await
            .unwrap();
        assert_eq!(out.branch.as_deref(), Some("false"));
    }

    #[tokio::test]
    async fn value_uses_truthiness() {
        let ctx = ctx();
        let out = ConditionStep.execute(json!({"value": ""}), &ctx).await.unwrap();
        assert_eq!(out.branch.as_deref(), Some("false"));
        let out = ConditionStep.execute(json!({"value": [0]}), &ctx).await.unwrap();
        assert_eq!(out.branch.as_deref(), Some("true"));
    }

    #[tokio::test]
    async fn missing_params_fail_without_retry() {
        let err = ConditionStep.execute(json!({}), &ctx()).await.unwrap_err();
        assert!(!err.retryable);
    }

    #[test]
    fn validate_params_requires_one_input() {
        let params = |v: Value| v.as_object().cloned().unwrap();
        assert!(ConditionStep.validate_params(&params(json!({"value": true}))).is_ok());
        assert!(ConditionStep
            .validate_params(&params(json!({"expression": "a > 1"})))
            .is_ok());
        assert!(ConditionStep.validate_params(&params(json!({}))).is_err());
        assert!(ConditionStep
            .validate_params(&params(json!({"expression": 3})))
            .is_err());
    }
}
