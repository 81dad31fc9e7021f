//! `http.request`: outbound HTTP via a shared `reqwest::Client`.
//!
//! Params:
//! - `url` (required)
//! - `method` (default `GET`)
//! - `headers`: object of header name to string value
//! - `body`: strings are sent verbatim, any other JSON value is sent as JSON
//! - `timeoutMs`: per-request timeout, overriding the client default
//!
//! Output is `{status, headers, body}`; `body` is parsed as JSON when it
//! parses, otherwise kept as text. Timeouts, connection failures, 5xx and 429
//! are retryable. Other 4xx responses are not.

use std::collections::BTreeMap;
use std::time::Duration;

use reqwest::{Method, StatusCode};
use serde_json::{json, Map, Value};
use weft_core::workflow::registry::{
    StepContext, StepExecutionError, StepExecutor, StepFuture, StepOutput,
};
use weft_types::config::HttpConfig;

/// Longest response body excerpt carried in an error message.
const ERROR_BODY_EXCERPT: usize = 200;

#[derive(Debug, Clone)]
pub struct HttpRequestStep {
    client: reqwest::Client,
}

impl HttpRequestStep {
    pub const TYPE: &'static str = "http.request";

    pub fn new(config: &HttpConfig) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .user_agent(config.user_agent.as_str())
            .build()?;
        Ok(Self { client })
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }

    async fn send(&self, params: &Value) -> Result<Value, StepExecutionError> {
        let url = params
            .get("url")
            .and_then(Value::as_str)
            .ok_or_else(|| StepExecutionError::fatal("http.request requires a string 'url'"))?;
        let method = parse_method(params.get("method")).map_err(StepExecutionError::fatal)?;

        let mut request = self.client.request(method.clone(), url);

        if let Some(headers) = params.get("headers").and_then(Value::as_object) {
            for (name, value) in headers {
                let value = match value {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                request = request.header(name.as_str(), value);
            }
        }

        match params.get("body") {
            None | Some(Value::Null) => {}
            Some(Value::String(text)) => request = request.body(text.clone()),
            Some(other) => request = request.json(other),
        }

        if let Some(ms) = params.get("timeoutMs").and_then(Value::as_u64) {
            request = request.timeout(Duration::from_millis(ms));
        }

        let response = request.send().await.map_err(|e| classify_transport(url, &e))?;

        let status = response.status();
        let headers: BTreeMap<String, String> = response
            .headers()
            .iter()
            .map(|(k, v)| {
                (
                    k.as_str().to_string(),
                    v.to_str().unwrap_or("<binary>").to_string(),
                )
            })
            .collect();
        let text = response
            .text()
            .await
            .map_err(|e| classify_transport(url, &e))?;

        tracing::info!(
            url,
            method = %method,
            status = status.as_u16(),
            body_len = text.len(),
            "HTTP step completed"
        );

        if status.is_client_error() || status.is_server_error() {
            return Err(status_error(url, status, &text));
        }

        let body = serde_json::from_str::<Value>(&text).unwrap_or(Value::String(text));
        Ok(json!({
            "status": status.as_u16(),
            "headers": headers,
            "body": body,
        }))
    }
}

impl StepExecutor for HttpRequestStep {
    fn execute<'a>(&'a self, params: Value, ctx: &'a StepContext) -> StepFuture<'a> {
        Box::pin(async move {
            tokio::select! {
                result = self.send(&params) => result.map(StepOutput::value),
                _ = ctx.cancellation.cancelled() => {
                    Err(StepExecutionError::fatal("http request interrupted by cancellation"))
                }
            }
        })
    }

    fn validate_params(&self, params: &Map<String, Value>) -> Result<(), String> {
        match params.get("url") {
            Some(Value::String(_)) => {}
            Some(_) => return Err("'url' must be a string".to_string()),
            None => return Err("http.request requires 'url'".to_string()),
        }

        match params.get("method") {
            Some(Value::String(s)) if s.contains("{{") => {}
            other => {
                parse_method(other)?;
            }
        }

        match params.get("headers") {
            None | Some(Value::Object(_)) => {}
            Some(Value::String(s)) if s.contains("{{") => {}
            Some(_) => return Err("'headers' must be an object".to_string()),
        }

        match params.get("timeoutMs") {
            None => Ok(()),
            Some(Value::String(s)) if s.contains("{{") => Ok(()),
            Some(v) if v.as_u64().is_some_and(|ms| ms > 0) => Ok(()),
            Some(_) => Err("'timeoutMs' must be a positive integer".to_string()),
        }
    }

    fn description(&self) -> &'static str {
        "Send an HTTP request and return {status, headers, body}"
    }
}

fn parse_method(value: Option<&Value>) -> Result<Method, String> {
    match value {
        None | Some(Value::Null) => Ok(Method::GET),
        Some(Value::String(s)) => Method::from_bytes(s.trim().to_ascii_uppercase().as_bytes())
            .map_err(|_| format!("invalid HTTP method: {s}")),
        Some(_) => Err("'method' must be a string".to_string()),
    }
}

fn classify_transport(url: &str, err: &reqwest::Error) -> StepExecutionError {
    let message = format!("HTTP request to '{url}' failed: {err}");
    if err.is_builder() {
        StepExecutionError::fatal(message)
    } else {
        // Timeouts, refused connections and dropped bodies.
        StepExecutionError::retryable(message)
    }
}

fn status_error(url: &str, status: StatusCode, body: &str) -> StepExecutionError {
    let excerpt: String = body.chars().take(ERROR_BODY_EXCERPT).collect();
    let message = format!("HTTP {} from '{url}': {excerpt}", status.as_u16());
    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        StepExecutionError::retryable(message)
    } else {
        StepExecutionError::fatal(message)
    }
}
