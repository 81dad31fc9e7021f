//! Destination for sealed run records.
//!
//! The engine calls `RunRecordSink::record` exactly once per run, after the
//! record is sealed. Sink failures are logged by the engine and never change
//! the record returned to the caller.

use std::future::Future;
use std::sync::{Arc, Mutex};

use weft_types::workflow::RunRecord;

#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("sink rejected record: {0}")]
    Rejected(String),
}

/// Receives every sealed `RunRecord`.
///
/// Uses RPITIT for async methods, consistent with the other traits in this
/// crate.
pub trait RunRecordSink: Send + Sync {
    fn record(&self, record: &RunRecord) -> impl Future<Output = Result<(), SinkError>> + Send;
}

impl<S: RunRecordSink> RunRecordSink for Arc<S> {
    fn record(&self, record: &RunRecord) -> impl Future<Output = Result<(), SinkError>> + Send {
        (**self).record(record)
    }
}

/// `None` discards records.
impl<S: RunRecordSink> RunRecordSink for Option<S> {
    async fn record(&self, record: &RunRecord) -> Result<(), SinkError> {
        match self {
            Some(sink) => sink.record(record).await,
            None => Ok(()),
        }
    }
}

/// Discards records.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopSink;

impl RunRecordSink for NoopSink {
    async fn record(&self, _record: &RunRecord) -> Result<(), SinkError> {
        Ok(())
    }
}

/// Keeps records in memory, for tests and embedding.
#[derive(Debug, Default)]
pub struct MemorySink {
    records: Mutex<Vec<RunRecord>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<RunRecord> {
        self.records
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn len(&self) -> usize {
        self.records.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl RunRecordSink for MemorySink {
    async fn record(&self, record: &RunRecord) -> Result<(), SinkError> {
        self.records
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(record.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use uuid::Uuid;
    use weft_types::workflow::RunStatus;

    fn record() -> RunRecord {
        let now = Utc::now();
        RunRecord {
            run_id: Uuid::now_v7(),
            workflow_id: "wf".to_string(),
            started_at: now,
            finished_at: now,
            status: RunStatus::Succeeded,
            step_results: Vec::new(),
            cancelled: false,
        }
    }

    #[tokio::test]
    async fn memory_sink_keeps_records() {
        let sink = Arc::new(MemorySink::new());
        sink.record(&record()).await.unwrap();
        sink.clone().record(&record()).await.unwrap();
        assert_eq!(sink.len(), 2);
    }

    #[tokio::test]
    async fn noop_sink_accepts_everything() {
        assert!(NoopSink.record(&record()).await.is_ok());
    }

    #[tokio::test]
    async fn optional_sink_forwards_when_present() {
        let inner = Arc::new(MemorySink::new());
        Some(inner.clone()).record(&record()).await.unwrap();
        None::<Arc<MemorySink>>.record(&record()).await.unwrap();
        assert_eq!(inner.len(), 1);
    }
}
