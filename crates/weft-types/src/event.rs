//! Run lifecycle events for the Weft event bus.
//!
//! `RunEvent` is broadcast by the engine while a run progresses. All variants
//! are Clone + Send + Sync for use with tokio broadcast channels.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::workflow::RunStatus;

/// Events emitted during workflow execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RunEvent {
    /// A run passed validation and started executing.
    RunStarted {
        run_id: Uuid,
        workflow_id: String,
        node_count: usize,
    },

    /// A node's executor was invoked.
    NodeStarted {
        run_id: Uuid,
        node_id: String,
        step_type: String,
        attempt: u32,
    },

    /// A node attempt failed and another attempt is scheduled.
    NodeRetrying {
        run_id: Uuid,
        node_id: String,
        attempt: u32,
        delay_ms: u64,
        error: String,
    },

    /// A node completed and its output was committed.
    NodeCompleted {
        run_id: Uuid,
        node_id: String,
        attempts: u32,
        duration_ms: u64,
    },

    /// A node ended in error.
    NodeErrored {
        run_id: Uuid,
        node_id: String,
        error: String,
        attempts: u32,
    },

    /// A node was skipped without executing.
    NodeSkipped { run_id: Uuid, node_id: String },

    /// The run record was sealed.
    RunFinished {
        run_id: Uuid,
        workflow_id: String,
        status: RunStatus,
        duration_ms: u64,
        cancelled: bool,
    },
}

impl RunEvent {
    /// The run this event belongs to.
    pub fn run_id(&self) -> Uuid {
        match self {
            RunEvent::RunStarted { run_id, .. }
            | RunEvent::NodeStarted { run_id, .. }
            | RunEvent::NodeRetrying { run_id, .. }
            | RunEvent::NodeCompleted { run_id, .. }
            | RunEvent::NodeErrored { run_id, .. }
            | RunEvent::NodeSkipped { run_id, .. }
            | RunEvent::RunFinished { run_id, .. } => *run_id,
        }
    }

    /// The node this event refers to, if any.
    pub fn node_id(&self) -> Option<&str> {
        match self {
            RunEvent::NodeStarted { node_id, .. }
            | RunEvent::NodeRetrying { node_id, .. }
            | RunEvent::NodeCompleted { node_id, .. }
            | RunEvent::NodeErrored { node_id, .. }
            | RunEvent::NodeSkipped { node_id, .. } => Some(node_id),
            RunEvent::RunStarted { .. } | RunEvent::RunFinished { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_retrying_serde_tag() {
        let event = RunEvent::NodeRetrying {
            run_id: Uuid::now_v7(),
            node_id: "fetch".to_string(),
            attempt: 1,
            delay_ms: 10,
            error: "503".to_string(),
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"type\":\"node_retrying\""));
        let parsed: RunEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, event);
    }

    #[test]
    fn test_accessors() {
        let run_id = Uuid::now_v7();
        let event = RunEvent::NodeSkipped {
            run_id,
            node_id: "b".to_string(),
        };
        assert_eq!(event.run_id(), run_id);
        assert_eq!(event.node_id(), Some("b"));

        let finished = RunEvent::RunFinished {
            run_id,
            workflow_id: "wf".to_string(),
            status: RunStatus::Succeeded,
            duration_ms: 3,
            cancelled: false,
        };
        assert_eq!(finished.node_id(), None);
    }
}
