//! Step registry: maps a node's `type` string to the executor that runs it.
//!
//! The registry is filled once at startup and then shared immutably (behind
//! an `Arc`) by every run.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;
use weft_types::config::EngineConfig;

use super::clock::Clock;
use super::context::RunContext;
use super::steps::{ConditionStep, DelayStep, TransformStep};

// ---------------------------------------------------------------------------
// Executor contract
// ---------------------------------------------------------------------------

/// Boxed future returned by `StepExecutor::execute`.
pub type StepFuture<'a> =
    Pin<Box<dyn Future<Output = Result<StepOutput, StepExecutionError>> + Send + 'a>>;

/// What a step produced.
#[derive(Debug, Clone, PartialEq)]
pub struct StepOutput {
    /// Committed into the run context under the node id.
    pub value: Value,
    /// Branch tag selected by a branching step.
    pub branch: Option<String>,
}

impl StepOutput {
    pub fn value(value: Value) -> Self {
        Self {
            value,
            branch: None,
        }
    }

    pub fn with_branch(value: Value, branch: impl Into<String>) -> Self {
        Self {
            value,
            branch: Some(branch.into()),
        }
    }
}

/// Failure reported by an executor.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct StepExecutionError {
    pub message: String,
    /// Whether a `retry` policy may re-attempt the node.
    pub retryable: bool,
}

impl StepExecutionError {
    pub fn retryable(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: true,
        }
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: false,
        }
    }
}

/// Everything an executor may look at while running one attempt.
#[derive(Clone)]
pub struct StepContext {
    pub run_id: Uuid,
    pub node_id: String,
    /// 1-based attempt number.
    pub attempt: u32,
    /// Snapshot of the run context taken when the node was dispatched.
    pub run: Arc<RunContext>,
    pub clock: Arc<dyn Clock>,
    /// Fires when the run is cancelled.
    pub cancellation: CancellationToken,
}

impl StepContext {
    /// Context for invoking an executor outside a scheduled run (tests, tooling).
    pub fn detached(node_id: impl Into<String>, run: RunContext, clock: Arc<dyn Clock>) -> Self {
        Self {
            run_id: run.run_id(),
            node_id: node_id.into(),
            attempt: 1,
            run: Arc::new(run),
            clock,
            cancellation: CancellationToken::new(),
        }
    }
}

impl std::fmt::Debug for StepContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StepContext")
            .field("run_id", &self.run_id)
            .field("node_id", &self.node_id)
            .field("attempt", &self.attempt)
            .finish()
    }
}

/// A unit of work bound to a step type.
///
/// `execute` receives params with every template already resolved. Executors
/// must not mutate shared state outside their own resources.
pub trait StepExecutor: Send + Sync {
    fn execute<'a>(&'a self, params: Value, ctx: &'a StepContext) -> StepFuture<'a>;

    /// Whether this executor selects a branch for tagged outgoing edges.
    fn emits_branch(&self) -> bool {
        false
    }

    /// Check params at load time. Values that still carry template markers
    /// are only known at dispatch, so implementations should skip them.
    fn validate_params(&self, _params: &Map<String, Value>) -> Result<(), String> {
        Ok(())
    }

    /// One-line summary for `weft steps`.
    fn description(&self) -> &'static str {
        ""
    }
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("no executor registered for step type '{0}'")]
    NotFound(String),
}

#[derive(Default, Clone)]
pub struct StepRegistry {
    executors: HashMap<String, Arc<dyn StepExecutor>>,
}

impl StepRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the pure built-ins: `delay`, `condition` and `transform`.
    pub fn with_builtins(config: &EngineConfig) -> Self {
        let mut registry = Self::new();
        registry.register(DelayStep::TYPE, DelayStep::from_config(config));
        registry.register(ConditionStep::TYPE, ConditionStep);
        registry.register(TransformStep::TYPE, TransformStep);
        registry
    }

    /// Bind `step_type` to `executor`, returning any executor it replaced.
    pub fn register(
        &mut self,
        step_type: impl Into<String>,
        executor: impl StepExecutor + 'static,
    ) -> Option<Arc<dyn StepExecutor>> {
        let step_type = step_type.into();
        tracing::debug!(step_type = %step_type, "registering step executor");
        self.executors.insert(step_type, Arc::new(executor))
    }

    pub fn lookup(&self, step_type: &str) -> Result<Arc<dyn StepExecutor>, RegistryError> {
        self.executors
            .get(step_type)
            .cloned()
            .ok_or_else(|| RegistryError::NotFound(step_type.to_string()))
    }

    pub fn contains(&self, step_type: &str) -> bool {
        self.executors.contains_key(step_type)
    }

    /// Registered step types, sorted.
    pub fn list_types(&self) -> Vec<&str> {
        let mut types: Vec<&str> = self.executors.keys().map(String::as_str).collect();
        types.sort_unstable();
        types
    }

    /// `(type, description)` pairs, sorted by type.
    pub fn describe(&self) -> Vec<(&str, &'static str)> {
        self.list_types()
            .into_iter()
            .filter_map(|t| self.executors.get(t).map(|e| (t, e.description())))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.executors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.executors.is_empty()
    }
}

impl std::fmt::Debug for StepRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StepRegistry")
            .field("types", &self.list_types())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct Echo;

    impl StepExecutor for Echo {
        fn execute<'a>(&'a self, params: Value, _ctx: &'a StepContext) -> StepFuture<'a> {
            Box::pin(async move { Ok(StepOutput::value(params)) })
        }
    }

    #[test]
    fn builtins_are_registered() {
        let registry = StepRegistry::with_builtins(&EngineConfig::default());
        assert_eq!(registry.list_types(), vec!["condition", "delay", "transform"]);
        assert!(registry.lookup("condition").unwrap().emits_branch());
        assert!(!registry.lookup("transform").unwrap().emits_branch());
    }

    #[test]
    fn lookup_unknown_type() {
        let registry = StepRegistry::new();
        let err = registry.lookup("nope").err().unwrap();
        assert_eq!(err, RegistryError::NotFound("nope".to_string()));
    }

    #[test]
    fn register_replaces_existing() {
        let mut registry = StepRegistry::new();
        assert!(registry.register("echo", Echo).is_none());
        assert!(registry.register("echo", Echo).is_some());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn execution_error_constructors() {
        assert!(StepExecutionError::retryable("503").retryable);
        let fatal = StepExecutionError::fatal("bad request");
        assert!(!fatal.retryable);
        assert_eq!(fatal.to_string(), "bad request");
        assert_eq!(StepOutput::value(json!(1)).branch, None);
        assert_eq!(
            StepOutput::with_branch(json!(1), "true").branch.as_deref(),
            Some("true")
        );
    }
}
