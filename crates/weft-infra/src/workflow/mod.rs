//! Workflow adapters: the HTTP step, file-backed source and run log.

pub mod fs_source;
pub mod http_step;
pub mod jsonl_sink;

pub use fs_source::FsWorkflowSource;
pub use http_step::HttpRequestStep;
pub use jsonl_sink::JsonlRunSink;

use weft_core::workflow::registry::StepRegistry;
use weft_types::config::EngineConfig;

/// Registry with every built-in step, including `http.request`.
pub fn default_registry(config: &EngineConfig) -> Result<StepRegistry, reqwest::Error> {
    let mut registry = StepRegistry::with_builtins(config);
    registry.register(HttpRequestStep::TYPE, HttpRequestStep::new(&config.http)?);
    Ok(registry)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;
    use weft_core::workflow::definition::parse_workflow_json;
    use weft_core::workflow::executor::{RunOptions, WorkflowEngine};
    use weft_types::workflow::{NodeStatus, RunStatus};
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    #[test]
    fn default_registry_lists_all_builtins() {
        let registry = default_registry(&EngineConfig::default()).unwrap();
        assert_eq!(
            registry.list_types(),
            vec!["condition", "delay", "http.request", "transform"]
        );
    }

    #[tokio::test]
    async fn fetch_branch_and_log_end_to_end() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/orders/42"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"id": 42, "total": 250})),
            )
            .mount(&server)
            .await;

        let def = parse_workflow_json(&format!(
            r#"{{
            "id": "orders",
            "nodes": {{
                "fetch": {{"type": "http.request",
                    "params": {{"url": "{}/orders/{{{{ orderId }}}}"}},
                    "onError": {{"retry": {{"maxAttempts": 2, "backoffMs": 1}}}}}},
                "big": {{"type": "condition", "params": {{"expression": "fetch.body.total >= 100"}}}},
                "flag": {{"type": "transform", "params": {{"value": {{"order": "{{{{ fetch.body.id }}}}", "vip": true}}}}}},
                "plain": {{"type": "transform", "params": {{"value": "standard"}}}}
            }},
            "edges": [
                {{"from": "fetch", "to": "big"}},
                {{"from": "big", "to": "flag", "branch": "true"}},
                {{"from": "big", "to": "plain", "branch": "false"}}
            ]
        }}"#,
            server.uri()
        ))
        .unwrap();

        let dir = tempfile::tempdir().unwrap();
        let config = EngineConfig::default();
        let sink = Arc::new(JsonlRunSink::new(dir.path().join("runs.jsonl")));
        let engine = WorkflowEngine::new(
            Arc::new(default_registry(&config).unwrap()),
            sink.clone(),
            config,
        );

        let record = engine
            .run_workflow(&def, json!({"orderId": 42}), RunOptions::default())
            .await
            .unwrap();

        assert_eq!(record.status, RunStatus::Succeeded);
        assert_eq!(
            record.step("flag").unwrap().output,
            Some(json!({"order": 42, "vip": true}))
        );
        assert_eq!(record.step("plain").unwrap().status, NodeStatus::Skipped);

        let logged = tokio::fs::read_to_string(sink.path()).await.unwrap();
        assert_eq!(logged.lines().count(), 1);
    }
}
