//! Appends sealed run records to a JSON-lines file, one record per line.

use std::path::{Path, PathBuf};

use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use weft_core::workflow::sink::{RunRecordSink, SinkError};
use weft_types::workflow::RunRecord;

#[derive(Debug)]
pub struct JsonlRunSink {
    path: PathBuf,
    /// Serializes appends from concurrent runs sharing the sink.
    write_lock: Mutex<()>,
}

impl JsonlRunSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl RunRecordSink for JsonlRunSink {
    async fn record(&self, record: &RunRecord) -> Result<(), SinkError> {
        let mut line = serde_json::to_vec(record)?;
        line.push(b'\n');

        let _guard = self.write_lock.lock().await;
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(&line).await?;
        file.flush().await?;

        tracing::debug!(run_id = %record.run_id, path = %self.path.display(), "run record appended");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use tempfile::tempdir;
    use uuid::Uuid;
    use weft_types::workflow::{RunStatus, StepResult};

    fn record(workflow_id: &str) -> RunRecord {
        let now = Utc::now();
        RunRecord {
            run_id: Uuid::now_v7(),
            workflow_id: workflow_id.to_string(),
            started_at: now,
            finished_at: now,
            status: RunStatus::PartiallySucceeded,
            step_results: vec![StepResult::skipped("b", "transform")],
            cancelled: false,
        }
    }

    #[tokio::test]
    async fn appends_one_line_per_record() {
        let dir = tempdir().unwrap();
        let sink = JsonlRunSink::new(dir.path().join("logs").join("runs.jsonl"));

        let first = record("one");
        let second = record("two");
        sink.record(&first).await.unwrap();
        sink.record(&second).await.unwrap();

        let content = tokio::fs::read_to_string(sink.path()).await.unwrap();
        let parsed: Vec<RunRecord> = content
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(parsed, vec![first, second]);
        assert!(content.contains("\"status\":\"partial\""));
    }
}
