//! Workflow engine: validates a definition, then drives its nodes to a sealed
//! `RunRecord`.
//!
//! # Execution flow
//!
//! 1. Validate the definition against the registry (`validate_definition`).
//! 2. Mark the entry node Ready.
//! 3. Dispatch Ready nodes in FIFO order while the concurrency semaphore has
//!    permits. Params are resolved against the run context at dispatch.
//! 4. Each node runs as a `JoinSet` task that loops over attempts, applying
//!    the per-attempt timeout and the retry policy.
//! 5. The scheduler loop commits outputs, resolves outgoing edges and
//!    re-evaluates successors. It is the only writer of `RunContext`.
//! 6. On stop or cancellation no new node is dispatched. Leftover nodes are
//!    marked Skipped, the record is sealed and handed to the sink once.

use std::collections::{HashMap, VecDeque};
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures_util::FutureExt;
use serde_json::Value;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::{JoinError, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;
use uuid::Uuid;
use weft_types::config::EngineConfig;
use weft_types::event::RunEvent;
use weft_types::workflow::{
    BackoffCurve, ErrorPolicy, NodeSpec, NodeStatus, RunRecord, RunStatus, StepFailure,
    StepFailureKind, StepResult, WorkflowDefinition,
};

use crate::event::bus::EventBus;

use super::clock::{Clock, SystemClock};
use super::context::RunContext;
use super::dag::WorkflowGraph;
use super::definition::{validate_definition, ExecutionPlan, WorkflowInvalidError};
use super::expression::{resolve, ResolutionError};
use super::registry::{StepContext, StepExecutionError, StepExecutor, StepOutput, StepRegistry};
use super::retry::RetryHandler;
use super::sink::RunRecordSink;
use super::source::{SourceError, WorkflowSource};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors from `run_by_id`, before a run starts.
#[derive(Debug, thiserror::Error)]
pub enum ExecutorError {
    #[error(transparent)]
    Invalid(#[from] WorkflowInvalidError),

    #[error("workflow '{0}' not found")]
    NotFound(String),

    #[error(transparent)]
    Source(#[from] SourceError),
}

/// The run was cancelled while a node was executing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("run cancelled")]
pub struct CancellationError;

/// Why a node ended in `Errored`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NodeFailure {
    #[error("template resolution failed: {0}")]
    Resolution(#[from] ResolutionError),

    #[error("{0}")]
    Execution(#[from] StepExecutionError),

    #[error("attempt timed out after {0} ms")]
    Timeout(u64),

    #[error(transparent)]
    Cancelled(#[from] CancellationError),
}

impl NodeFailure {
    /// Resolution failures are deterministic and never retried.
    pub fn retryable(&self) -> bool {
        match self {
            NodeFailure::Execution(e) => e.retryable,
            NodeFailure::Timeout(_) => true,
            NodeFailure::Resolution(_) | NodeFailure::Cancelled(_) => false,
        }
    }

    pub fn kind(&self) -> StepFailureKind {
        match self {
            NodeFailure::Resolution(_) => StepFailureKind::Resolution,
            NodeFailure::Execution(_) => StepFailureKind::Execution,
            NodeFailure::Timeout(_) => StepFailureKind::Timeout,
            NodeFailure::Cancelled(_) => StepFailureKind::Cancelled,
        }
    }

    fn to_record(&self) -> StepFailure {
        StepFailure {
            kind: self.kind(),
            message: self.to_string(),
            retryable: self.retryable(),
        }
    }
}

// ---------------------------------------------------------------------------
// RunOptions
// ---------------------------------------------------------------------------

/// Per-run knobs supplied by the caller.
#[derive(Clone)]
pub struct RunOptions {
    /// Overrides `EngineConfig::concurrency_limit`; `None` defers to it.
    pub concurrency_limit: Option<usize>,
    pub clock: Arc<dyn Clock>,
    pub cancellation: CancellationToken,
    /// Preassigned run id; a fresh UUIDv7 is used when absent.
    pub run_id: Option<Uuid>,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            concurrency_limit: None,
            clock: Arc::new(SystemClock),
            cancellation: CancellationToken::new(),
            run_id: None,
        }
    }
}

impl RunOptions {
    pub fn with_concurrency_limit(mut self, limit: usize) -> Self {
        self.concurrency_limit = Some(limit);
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }

    pub fn with_run_id(mut self, run_id: Uuid) -> Self {
        self.run_id = Some(run_id);
        self
    }
}

impl std::fmt::Debug for RunOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunOptions")
            .field("concurrency_limit", &self.concurrency_limit)
            .field("cancelled", &self.cancellation.is_cancelled())
            .field("run_id", &self.run_id)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// WorkflowEngine
// ---------------------------------------------------------------------------

/// Runs workflow definitions against a shared step registry.
///
/// Generic over `S: RunRecordSink` so callers pick where sealed records go.
pub struct WorkflowEngine<S: RunRecordSink> {
    registry: Arc<StepRegistry>,
    sink: S,
    config: EngineConfig,
    event_bus: Option<EventBus>,
}

impl<S: RunRecordSink> WorkflowEngine<S> {
    pub fn new(registry: Arc<StepRegistry>, sink: S, config: EngineConfig) -> Self {
        Self {
            registry,
            sink,
            config,
            event_bus: None,
        }
    }

    /// Publish `RunEvent`s for every run on `bus`.
    pub fn with_event_bus(mut self, bus: EventBus) -> Self {
        self.event_bus = Some(bus);
        self
    }

    pub fn registry(&self) -> &StepRegistry {
        &self.registry
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    /// Validate without running.
    pub fn validate(&self, definition: &WorkflowDefinition) -> Result<ExecutionPlan, WorkflowInvalidError> {
        validate_definition(definition, &self.registry, &self.config)
    }

    /// Execute `definition` with `input` as the global input.
    ///
    /// Returns `Err` only when the definition is invalid, in which case
    /// nothing runs and the sink is not called. Every node-level failure is
    /// captured in the returned record.
    pub async fn run_workflow(
        &self,
        definition: &WorkflowDefinition,
        input: Value,
        options: RunOptions,
    ) -> Result<RunRecord, WorkflowInvalidError> {
        let plan = self.validate(definition).inspect_err(|e| {
            tracing::warn!(workflow = %definition.id, error = %e, "workflow definition rejected");
        })?;

        let run_id = options.run_id.unwrap_or_else(Uuid::now_v7);
        let span = tracing::info_span!("workflow_run", run_id = %run_id, workflow = %definition.id);

        let scheduler = Scheduler::new(
            definition,
            &plan,
            &self.config,
            self.event_bus.as_ref(),
            run_id,
            input,
            &options,
        );
        let record = scheduler.run().instrument(span).await;

        if let Err(e) = self.sink.record(&record).await {
            tracing::warn!(run_id = %record.run_id, error = %e, "run record sink failed");
        }

        Ok(record)
    }

    /// Fetch a definition from `source` and run it.
    pub async fn run_by_id<W: WorkflowSource>(
        &self,
        source: &W,
        workflow_id: &str,
        input: Value,
        options: RunOptions,
    ) -> Result<RunRecord, ExecutorError> {
        let definition = source
            .get_definition(workflow_id)
            .await?
            .ok_or_else(|| ExecutorError::NotFound(workflow_id.to_string()))?;
        Ok(self.run_workflow(&definition, input, options).await?)
    }
}

// ---------------------------------------------------------------------------
// Scheduler
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EdgeState {
    Pending,
    Satisfied,
    Dead,
}

/// How a source node settled, as seen by its outgoing edges.
#[derive(Debug, Clone, Copy)]
enum Settled<'a> {
    Completed(Option<&'a str>),
    ContinuedAfterError,
    Skipped,
}

struct InFlight {
    dispatched_at: DateTime<Utc>,
    attempts: Arc<AtomicU32>,
}

struct NodeOutcome {
    node: usize,
    result: Result<StepOutput, NodeFailure>,
    attempts: u32,
    duration_ms: u64,
}

/// State of one run. Lives on the caller's task; owns the run context.
struct Scheduler<'r> {
    def_id: &'r str,
    specs: Vec<&'r NodeSpec>,
    graph: &'r WorkflowGraph,
    executors: &'r [Arc<dyn StepExecutor>],
    config: &'r EngineConfig,
    events: Option<&'r EventBus>,
    run_id: Uuid,
    clock: Arc<dyn Clock>,
    cancellation: CancellationToken,
    concurrency_limit: usize,
    context: RunContext,
    node_status: Vec<NodeStatus>,
    edge_state: Vec<EdgeState>,
    ready: VecDeque<usize>,
    in_flight: HashMap<usize, InFlight>,
    results: Vec<StepResult>,
    /// No further dispatch (stop policy or cancellation).
    halted: bool,
    /// A node errored under `stop` (including exhausted retries).
    stopped: bool,
}

impl<'r> Scheduler<'r> {
    fn new(
        def: &'r WorkflowDefinition,
        plan: &'r ExecutionPlan,
        config: &'r EngineConfig,
        events: Option<&'r EventBus>,
        run_id: Uuid,
        input: Value,
        options: &RunOptions,
    ) -> Self {
        let concurrency_limit = options
            .concurrency_limit
            .or(config.concurrency_limit)
            .unwrap_or(Semaphore::MAX_PERMITS)
            .clamp(1, Semaphore::MAX_PERMITS);

        Self {
            def_id: &def.id,
            specs: def.nodes.values().collect(),
            graph: &plan.graph,
            executors: &plan.executors,
            config,
            events,
            run_id,
            clock: options.clock.clone(),
            cancellation: options.cancellation.clone(),
            concurrency_limit,
            context: RunContext::new(run_id, def.id.clone(), input),
            node_status: vec![NodeStatus::Waiting; plan.graph.len()],
            edge_state: vec![EdgeState::Pending; plan.graph.edges().len()],
            ready: VecDeque::new(),
            in_flight: HashMap::new(),
            results: Vec::with_capacity(plan.graph.len()),
            halted: false,
            stopped: false,
        }
    }

    async fn run(mut self) -> RunRecord {
        let started_at = self.clock.now();
        tracing::info!(
            nodes = self.graph.len(),
            concurrency_limit = self.concurrency_limit,
            "starting workflow execution"
        );
        self.emit(RunEvent::RunStarted {
            run_id: self.run_id,
            workflow_id: self.def_id.to_string(),
            node_count: self.graph.len(),
        });

        let semaphore = Arc::new(Semaphore::new(self.concurrency_limit));
        let mut join_set: JoinSet<NodeOutcome> = JoinSet::new();
        let cancel = self.cancellation.clone();
        let mut cancelled = false;

        self.mark_ready(self.graph.entry());

        loop {
            if cancel.is_cancelled() {
                cancelled = true;
                break;
            }
            if !self.halted {
                self.dispatch_ready(&mut join_set, &semaphore);
            }
            if join_set.is_empty() {
                break;
            }

            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    cancelled = true;
                    break;
                }
                joined = join_set.join_next() => {
                    if let Some(joined) = joined {
                        self.on_joined(joined);
                    }
                }
            }
        }

        if cancelled {
            self.halted = true;
            self.drain_after_cancel(&mut join_set).await;
        }

        self.skip_remaining();

        let finished_at = self.clock.now();
        let status = if cancelled || self.stopped {
            RunStatus::Failed
        } else if self.node_status.contains(&NodeStatus::Errored) {
            RunStatus::PartiallySucceeded
        } else {
            RunStatus::Succeeded
        };

        let record = RunRecord {
            run_id: self.run_id,
            workflow_id: self.def_id.to_string(),
            started_at,
            finished_at,
            status,
            step_results: self.results,
            cancelled,
        };

        tracing::info!(
            status = %record.status,
            cancelled,
            duration_ms = record.duration_ms(),
            "workflow execution finished"
        );
        if let Some(bus) = self.events {
            bus.publish(RunEvent::RunFinished {
                run_id: record.run_id,
                workflow_id: record.workflow_id.clone(),
                status: record.status,
                duration_ms: record.duration_ms(),
                cancelled,
            });
        }

        record
    }

    /// Give in-flight nodes the grace period, then abort what is left.
    async fn drain_after_cancel(&mut self, join_set: &mut JoinSet<NodeOutcome>) {
        let grace = Duration::from_millis(self.config.cancel_grace_ms);
        tracing::warn!(
            in_flight = join_set.len(),
            grace_ms = self.config.cancel_grace_ms,
            "run cancelled, waiting for in-flight nodes"
        );

        let drained = tokio::time::timeout(grace, async {
            while let Some(joined) = join_set.join_next().await {
                self.on_joined(joined);
            }
        })
        .await;

        if drained.is_err() {
            tracing::warn!(aborting = join_set.len(), "grace period elapsed, aborting nodes");
            join_set.abort_all();
            while let Some(joined) = join_set.join_next().await {
                self.on_joined(joined);
            }
        }

        let mut stranded: Vec<usize> = self.in_flight.keys().copied().collect();
        stranded.sort_unstable();
        let now = self.clock.now();
        for node in stranded {
            if let Some(flight) = self.in_flight.remove(&node) {
                let failure = NodeFailure::Cancelled(CancellationError);
                self.node_status[node] = NodeStatus::Errored;
                self.results.push(StepResult {
                    node_id: self.graph.id(node).to_string(),
                    step_type: self.specs[node].step_type.clone(),
                    status: NodeStatus::Errored,
                    output: None,
                    error: Some(failure.to_record()),
                    attempts: flight.attempts.load(Ordering::SeqCst),
                    duration_ms: elapsed_ms(flight.dispatched_at, now),
                    cancelled: true,
                });
                self.emit(RunEvent::NodeErrored {
                    run_id: self.run_id,
                    node_id: self.graph.id(node).to_string(),
                    error: failure.to_string(),
                    attempts: flight.attempts.load(Ordering::SeqCst),
                });
            }
        }
    }

    fn dispatch_ready(&mut self, join_set: &mut JoinSet<NodeOutcome>, semaphore: &Arc<Semaphore>) {
        // A resolution failure under `stop` halts the run mid-loop.
        while !self.halted {
            let Some(&node) = self.ready.front() else {
                break;
            };
            let Ok(permit) = semaphore.clone().try_acquire_owned() else {
                break;
            };
            self.ready.pop_front();

            let spec = self.specs[node];
            match resolve(&Value::Object(spec.params.clone()), &self.context) {
                Ok(params) => self.spawn_node(node, params, permit, join_set),
                Err(e) => {
                    drop(permit);
                    tracing::warn!(node_id = %spec.id, error = %e, "failed to resolve node params");
                    self.settle(NodeOutcome {
                        node,
                        result: Err(NodeFailure::Resolution(e)),
                        attempts: 0,
                        duration_ms: 0,
                    });
                }
            }
        }
    }

    fn spawn_node(
        &mut self,
        node: usize,
        params: Value,
        permit: OwnedSemaphorePermit,
        join_set: &mut JoinSet<NodeOutcome>,
    ) {
        let spec = self.specs[node];
        let attempts = Arc::new(AtomicU32::new(0));
        let timeout_ms = spec.timeout_ms.unwrap_or(self.config.default_step_timeout_ms);

        let task = NodeTask {
            node,
            step_type: spec.step_type.clone(),
            executor: self.executors[node].clone(),
            params,
            policy: spec.on_error,
            timeout: Duration::from_millis(timeout_ms),
            default_curve: self.config.backoff,
            max_backoff_ms: self.config.max_backoff_ms,
            attempts: attempts.clone(),
            events: self.events.cloned(),
            ctx: StepContext {
                run_id: self.run_id,
                node_id: spec.id.clone(),
                attempt: 0,
                run: Arc::new(self.context.clone()),
                clock: self.clock.clone(),
                cancellation: self.cancellation.clone(),
            },
        };

        self.node_status[node] = NodeStatus::Executing;
        self.in_flight.insert(
            node,
            InFlight {
                dispatched_at: self.clock.now(),
                attempts,
            },
        );

        let span = tracing::info_span!("node", node_id = %spec.id, step_type = %spec.step_type);
        join_set.spawn(
            async move {
                let _permit = permit;
                task.run().await
            }
            .instrument(span),
        );
    }

    fn on_joined(&mut self, joined: Result<NodeOutcome, JoinError>) {
        match joined {
            Ok(outcome) => self.settle(outcome),
            // Aborted tasks stay in `in_flight` and are recorded as cancelled.
            Err(e) if e.is_cancelled() => {}
            Err(e) => tracing::error!(error = %e, "node worker task failed"),
        }
    }

    fn settle(&mut self, outcome: NodeOutcome) {
        let node = outcome.node;
        self.in_flight.remove(&node);
        let spec = self.specs[node];
        let node_id = spec.id.as_str();

        match outcome.result {
            Ok(output) => {
                if let Err(e) = self.context.commit(node_id, output.value.clone()) {
                    tracing::error!(node_id, error = %e, "node output rejected by run context");
                }
                self.node_status[node] = NodeStatus::Completed;
                tracing::info!(
                    node_id,
                    attempts = outcome.attempts,
                    duration_ms = outcome.duration_ms,
                    branch = output.branch.as_deref().unwrap_or(""),
                    "node completed"
                );
                self.results.push(StepResult {
                    node_id: node_id.to_string(),
                    step_type: spec.step_type.clone(),
                    status: NodeStatus::Completed,
                    output: Some(output.value),
                    error: None,
                    attempts: outcome.attempts,
                    duration_ms: outcome.duration_ms,
                    cancelled: false,
                });
                self.emit(RunEvent::NodeCompleted {
                    run_id: self.run_id,
                    node_id: node_id.to_string(),
                    attempts: outcome.attempts,
                    duration_ms: outcome.duration_ms,
                });
                self.resolve_outgoing(node, Settled::Completed(output.branch.as_deref()));
            }
            Err(failure) => {
                let cancelled = matches!(failure, NodeFailure::Cancelled(_));
                self.node_status[node] = NodeStatus::Errored;
                self.results.push(StepResult {
                    node_id: node_id.to_string(),
                    step_type: spec.step_type.clone(),
                    status: NodeStatus::Errored,
                    output: None,
                    error: Some(failure.to_record()),
                    attempts: outcome.attempts,
                    duration_ms: outcome.duration_ms,
                    cancelled,
                });
                self.emit(RunEvent::NodeErrored {
                    run_id: self.run_id,
                    node_id: node_id.to_string(),
                    error: failure.to_string(),
                    attempts: outcome.attempts,
                });

                if cancelled {
                    tracing::warn!(node_id, "node cancelled");
                    self.halted = true;
                } else if spec.on_error == ErrorPolicy::Continue {
                    tracing::warn!(node_id, error = %failure, "node failed, continuing");
                    if let Err(e) = self.context.commit(node_id, Value::Null) {
                        tracing::error!(node_id, error = %e, "node output rejected by run context");
                    }
                    self.resolve_outgoing(node, Settled::ContinuedAfterError);
                } else {
                    tracing::error!(
                        node_id,
                        attempts = outcome.attempts,
                        error = %failure,
                        "node failed, stopping run"
                    );
                    self.halted = true;
                    self.stopped = true;
                }
            }
        }
    }

    /// Resolve the edges leaving `node`, then propagate skips breadth-first.
    fn resolve_outgoing(&mut self, node: usize, settled: Settled<'_>) {
        let mut skipped = VecDeque::new();
        self.resolve_edges(node, settled, &mut skipped);
        while let Some(next) = skipped.pop_front() {
            self.resolve_edges(next, Settled::Skipped, &mut skipped);
        }
    }

    fn resolve_edges(&mut self, node: usize, settled: Settled<'_>, skipped: &mut VecDeque<usize>) {
        let graph = self.graph;
        for &e in graph.outgoing(node) {
            let edge = graph.edge(e);
            let satisfied = match settled {
                Settled::Completed(selected) => match &edge.branch {
                    None => true,
                    Some(tag) => selected == Some(tag.as_str()),
                },
                Settled::ContinuedAfterError => edge.branch.is_none(),
                Settled::Skipped => false,
            };
            self.edge_state[e] = if satisfied {
                EdgeState::Satisfied
            } else {
                EdgeState::Dead
            };
            self.evaluate(edge.to, skipped);
        }
    }

    /// Ready once every incoming edge is resolved and one is satisfied;
    /// Skipped when all of them are dead. Nothing becomes Ready once halted.
    fn evaluate(&mut self, node: usize, skipped: &mut VecDeque<usize>) {
        if self.node_status[node] != NodeStatus::Waiting {
            return;
        }
        let graph = self.graph;
        let incoming = graph.incoming(node);
        if incoming
            .iter()
            .any(|&e| self.edge_state[e] == EdgeState::Pending)
        {
            return;
        }

        let satisfied = incoming
            .iter()
            .any(|&e| self.edge_state[e] == EdgeState::Satisfied);
        if satisfied && !self.halted {
            self.mark_ready(node);
        } else {
            self.mark_skipped(node);
            skipped.push_back(node);
        }
    }

    fn mark_ready(&mut self, node: usize) {
        self.node_status[node] = NodeStatus::Ready;
        self.ready.push_back(node);
    }

    fn mark_skipped(&mut self, node: usize) {
        let spec = self.specs[node];
        tracing::debug!(node_id = %spec.id, "node skipped");
        self.node_status[node] = NodeStatus::Skipped;
        self.results
            .push(StepResult::skipped(spec.id.clone(), spec.step_type.clone()));
        self.emit(RunEvent::NodeSkipped {
            run_id: self.run_id,
            node_id: spec.id.clone(),
        });
    }

    /// Skip every node that never reached a terminal state.
    fn skip_remaining(&mut self) {
        self.ready.clear();
        let graph = self.graph;
        for &node in graph.topological_order() {
            if matches!(self.node_status[node], NodeStatus::Waiting | NodeStatus::Ready) {
                self.mark_skipped(node);
            }
        }
    }

    fn emit(&self, event: RunEvent) {
        if let Some(bus) = self.events {
            bus.publish(event);
        }
    }
}

// ---------------------------------------------------------------------------
// NodeTask
// ---------------------------------------------------------------------------

/// Everything a worker needs to run one node, including its retries.
struct NodeTask {
    node: usize,
    step_type: String,
    executor: Arc<dyn StepExecutor>,
    params: Value,
    policy: ErrorPolicy,
    timeout: Duration,
    default_curve: BackoffCurve,
    max_backoff_ms: u64,
    attempts: Arc<AtomicU32>,
    events: Option<EventBus>,
    ctx: StepContext,
}

impl NodeTask {
    async fn run(mut self) -> NodeOutcome {
        let started = self.ctx.clock.now();
        let mut attempt = 0;

        let result = loop {
            attempt += 1;
            self.ctx.attempt = attempt;
            self.attempts.store(attempt, Ordering::SeqCst);
            self.emit(RunEvent::NodeStarted {
                run_id: self.ctx.run_id,
                node_id: self.ctx.node_id.clone(),
                step_type: self.step_type.clone(),
                attempt,
            });

            let failure = match self.attempt_once().await {
                Ok(output) => break Ok(output),
                Err(failure) => failure,
            };

            if self.ctx.cancellation.is_cancelled() {
                break Err(NodeFailure::Cancelled(CancellationError));
            }
            if !RetryHandler::should_retry(&self.policy, attempt, failure.retryable()) {
                break Err(failure);
            }

            let delay = RetryHandler::delay_for(&self.policy, attempt, self.default_curve, self.max_backoff_ms);
            let delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
            tracing::warn!(attempt, delay_ms, error = %failure, "node attempt failed, retrying");
            self.emit(RunEvent::NodeRetrying {
                run_id: self.ctx.run_id,
                node_id: self.ctx.node_id.clone(),
                attempt,
                delay_ms,
                error: failure.to_string(),
            });

            tokio::select! {
                _ = self.ctx.clock.sleep(delay) => {}
                _ = self.ctx.cancellation.cancelled() => {
                    break Err(NodeFailure::Cancelled(CancellationError));
                }
            }
        };

        NodeOutcome {
            node: self.node,
            result,
            attempts: attempt,
            duration_ms: elapsed_ms(started, self.ctx.clock.now()),
        }
    }

    async fn attempt_once(&self) -> Result<StepOutput, NodeFailure> {
        let execution =
            AssertUnwindSafe(async { self.executor.execute(self.params.clone(), &self.ctx).await })
                .catch_unwind();

        match tokio::time::timeout(self.timeout, execution).await {
            Err(_) => Err(NodeFailure::Timeout(
                u64::try_from(self.timeout.as_millis()).unwrap_or(u64::MAX),
            )),
            Ok(Err(panic)) => Err(NodeFailure::Execution(StepExecutionError::fatal(format!(
                "executor panicked: {}",
                panic_message(panic.as_ref())
            )))),
            Ok(Ok(result)) => result.map_err(NodeFailure::from),
        }
    }

    fn emit(&self, event: RunEvent) {
        if let Some(bus) = &self.events {
            bus.publish(event);
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "unknown panic payload"
    }
}

fn elapsed_ms(start: DateTime<Utc>, end: DateTime<Utc>) -> u64 {
    u64::try_from((end - start).num_milliseconds()).unwrap_or(0)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
