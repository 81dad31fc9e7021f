//! Engine configuration types for Weft.
//!
//! `EngineConfig` represents the top-level `config.toml` that controls
//! concurrency, retry backoff, cancellation grace and built-in step limits.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::workflow::BackoffCurve;

/// Top-level configuration for the engine and CLI.
///
/// Loaded from `~/.weft/config.toml`. All fields have sensible defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Maximum nodes executing at once within a run (None = unbounded).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub concurrency_limit: Option<usize>,

    /// Backoff curve for retry policies that do not name one.
    #[serde(default)]
    pub backoff: BackoffCurve,

    /// Upper bound on any single retry delay.
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,

    /// How long in-flight steps may keep running after cancellation.
    #[serde(default = "default_cancel_grace_ms")]
    pub cancel_grace_ms: u64,

    /// Per-attempt timeout for nodes that do not set `timeoutMs`.
    #[serde(default = "default_step_timeout_ms")]
    pub default_step_timeout_ms: u64,

    /// Largest duration the `delay` step accepts.
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    /// Directory holding `<id>.json` / `<id>.yaml` definitions (defaults to `{data_dir}/workflows`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workflows_dir: Option<PathBuf>,

    /// JSON-lines file receiving sealed run records (defaults to `{data_dir}/runs.jsonl`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runs_log: Option<PathBuf>,

    /// Settings for the `http.request` step.
    #[serde(default)]
    pub http: HttpConfig,
}

fn default_max_backoff_ms() -> u64 {
    60_000
}

fn default_cancel_grace_ms() -> u64 {
    5_000
}

fn default_step_timeout_ms() -> u64 {
    300_000
}

fn default_max_delay_ms() -> u64 {
    300_000
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            concurrency_limit: None,
            backoff: BackoffCurve::default(),
            max_backoff_ms: default_max_backoff_ms(),
            cancel_grace_ms: default_cancel_grace_ms(),
            default_step_timeout_ms: default_step_timeout_ms(),
            max_delay_ms: default_max_delay_ms(),
            workflows_dir: None,
            runs_log: None,
            http: HttpConfig::default(),
        }
    }
}

/// Outbound HTTP client settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HttpConfig {
    /// Request timeout when a node does not pass `timeoutMs`.
    #[serde(default = "default_http_timeout_ms")]
    pub timeout_ms: u64,
    /// `User-Agent` header sent with every request.
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

fn default_http_timeout_ms() -> u64 {
    30_000
}

fn default_user_agent() -> String {
    "weft-workflow/0.1".to_string()
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_http_timeout_ms(),
            user_agent: default_user_agent(),
        }
    }
}
