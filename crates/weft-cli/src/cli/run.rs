//! `weft run`: execute a workflow and render its run record.

use std::path::Path;
use std::process::ExitCode;

use anyhow::{Context, Result};
use comfy_table::{presets, Cell, Color, ContentArrangement, Table};
use console::style;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use weft_core::event::EventBus;
use weft_core::workflow::definition::load_workflow_file;
use weft_core::workflow::executor::{RunOptions, WorkflowEngine};
use weft_infra::workflow::{FsWorkflowSource, JsonlRunSink};
use weft_types::event::RunEvent;
use weft_types::workflow::{NodeStatus, RunRecord, RunStatus, StepResult};

use super::RunArgs;
use crate::state::AppState;

/// Longest output excerpt shown in the step table.
const DETAIL_WIDTH: usize = 60;

pub async fn run_workflow(state: &AppState, args: RunArgs, json: bool, quiet: bool) -> Result<ExitCode> {
    let input = read_input(args.input.as_deref(), args.input_file.as_deref()).await?;

    let sink = if args.no_record {
        None
    } else {
        Some(JsonlRunSink::new(args.record.clone().unwrap_or_else(|| state.runs_log())))
    };

    let bus = EventBus::default();
    let progress = (!json && !quiet).then(|| spawn_progress(&bus));
    let engine = WorkflowEngine::new(state.registry()?, sink, state.config.clone()).with_event_bus(bus);

    let token = CancellationToken::new();
    let ctrl_c = spawn_ctrl_c(token.clone());

    let mut options = RunOptions::default().with_cancellation(token);
    if let Some(limit) = args.concurrency {
        options = options.with_concurrency_limit(limit);
    }

    let record = match (&args.file, &args.id) {
        (Some(file), _) => {
            let definition = load_workflow_file(file)
                .with_context(|| format!("failed to load workflow {}", file.display()))?;
            engine
                .run_workflow(&definition, input, options)
                .await
                .context("workflow validation failed")?
        }
        (None, Some(id)) => {
            let source = FsWorkflowSource::new(state.workflows_dir());
            engine
                .run_by_id(&source, id, input, options)
                .await
                .with_context(|| format!("failed to run workflow '{id}'"))?
        }
        (None, None) => anyhow::bail!("either a workflow file or --id is required"),
    };

    ctrl_c.abort();
    drop(engine);
    if let Some(progress) = progress {
        let _ = progress.await;
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&record)?);
    } else if !quiet {
        print_record(&record);
    }

    Ok(match record.status {
        RunStatus::Failed => ExitCode::FAILURE,
        _ => ExitCode::SUCCESS,
    })
}

/// `--input` wins over `--input-file`; no input means `{}`.
async fn read_input(inline: Option<&str>, file: Option<&Path>) -> Result<Value> {
    if let Some(raw) = inline {
        return serde_json::from_str(raw).context("--input is not valid JSON");
    }
    if let Some(path) = file {
        let raw = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("failed to read {}", path.display()))?;
        return serde_json::from_str(&raw)
            .with_context(|| format!("{} is not valid JSON", path.display()));
    }
    Ok(Value::Object(serde_json::Map::new()))
}

fn spawn_ctrl_c(token: CancellationToken) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\n  {} Cancelling run...", style("!").yellow().bold());
            token.cancel();
        }
    })
}

/// Print node progress to stderr until the engine drops the bus.
fn spawn_progress(bus: &EventBus) -> tokio::task::JoinHandle<()> {
    let mut rx = bus.subscribe();
    tokio::spawn(async move {
        use tokio::sync::broadcast::error::RecvError;
        loop {
            match rx.recv().await {
                Ok(event) => {
                    if let Some(line) = progress_line(&event) {
                        eprintln!("{line}");
                    }
                }
                Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => break,
            }
        }
    })
}

fn progress_line(event: &RunEvent) -> Option<String> {
    match event {
        RunEvent::NodeStarted { node_id, attempt, .. } if *attempt > 1 => Some(format!(
            "  {} {node_id} (attempt {attempt})",
            style("↻").yellow()
        )),
        RunEvent::NodeStarted { node_id, .. } => Some(format!("  {} {node_id}", style("▸").dim())),
        RunEvent::NodeRetrying { node_id, delay_ms, error, .. } => Some(format!(
            "  {} {node_id} failed: {error} (retrying in {delay_ms} ms)",
            style("!").yellow()
        )),
        RunEvent::NodeErrored { node_id, error, .. } => {
            Some(format!("  {} {node_id}: {error}", style("✗").red()))
        }
        _ => None,
    }
}

fn print_record(record: &RunRecord) {
    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("Step").fg(Color::Cyan),
            Cell::new("Type"),
            Cell::new("Status"),
            Cell::new("Attempts"),
            Cell::new("Duration"),
            Cell::new("Detail"),
        ]);

    for step in &record.step_results {
        table.add_row(vec![
            Cell::new(&step.node_id),
            Cell::new(&step.step_type),
            Cell::new(step.status).fg(status_color(step.status)),
            Cell::new(step.attempts),
            Cell::new(format!("{} ms", step.duration_ms)),
            Cell::new(detail(step)),
        ]);
    }

    let status = match record.status {
        RunStatus::Succeeded => style(record.status.to_string()).green().bold(),
        RunStatus::PartiallySucceeded => style(record.status.to_string()).yellow().bold(),
        _ => style(record.status.to_string()).red().bold(),
    };

    println!();
    println!("{table}");
    println!();
    println!("  Run:      {}", style(record.run_id).dim());
    println!("  Workflow: {}", style(&record.workflow_id).cyan());
    println!("  Status:   {status}");
    println!("  Duration: {} ms", record.duration_ms());
    if record.cancelled {
        println!("  {}", style("Run was cancelled").yellow());
    }
    println!();
}

fn status_color(status: NodeStatus) -> Color {
    match status {
        NodeStatus::Completed => Color::Green,
        NodeStatus::Errored => Color::Red,
        NodeStatus::Skipped => Color::DarkGrey,
        _ => Color::Yellow,
    }
}

fn detail(step: &StepResult) -> String {
    if let Some(error) = &step.error {
        return error.message.clone();
    }
    match &step.output {
        Some(value) => truncate(&value.to_string(), DETAIL_WIDTH),
        None => String::new(),
    }
}

fn truncate(text: &str, width: usize) -> String {
    if text.chars().count() <= width {
        return text.to_string();
    }
    let mut out: String = text.chars().take(width.saturating_sub(1)).collect();
    out.push('…');
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    #[tokio::test]
    async fn input_defaults_to_empty_object() {
        assert_eq!(read_input(None, None).await.unwrap(), json!({}));
        assert_eq!(
            read_input(Some(r#"{"a": 1}"#), None).await.unwrap(),
            json!({"a": 1})
        );
        assert!(read_input(Some("{oops"), None).await.is_err());
    }

    #[tokio::test]
    async fn input_file_is_parsed() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("in.json");
        tokio::fs::write(&path, r#"[1, 2]"#).await.unwrap();
        assert_eq!(read_input(None, Some(&path)).await.unwrap(), json!([1, 2]));
    }

    #[test]
    fn long_details_are_truncated() {
        assert_eq!(truncate("short", 10), "short");
        let cut = truncate(&"x".repeat(100), 10);
        assert_eq!(cut.chars().count(), 10);
        assert!(cut.ends_with('…'));
    }

    #[tokio::test]
    async fn runs_file_and_records_failure_exit() {
        let dir = tempdir().unwrap();
        let wf = dir.path().join("wf.json");
        tokio::fs::write(
            &wf,
            r#"{"id": "cli", "nodes": {
                "a": {"type": "transform", "params": {"value": "{{ name }}"}},
                "b": {"type": "transform", "params": {"value": "{{ missing.path }}"}}
            }, "edges": [{"from": "a", "to": "b"}]}"#,
        )
        .await
        .unwrap();
        let state = AppState::init(Some(dir.path().to_path_buf()), None).await.unwrap();
        let args = RunArgs {
            file: Some(wf),
            id: None,
            input: Some(r#"{"name": "weft"}"#.to_string()),
            input_file: None,
            concurrency: Some(1),
            record: None,
            no_record: false,
        };

        let code = run_workflow(&state, args, true, true).await.unwrap();
        assert_eq!(code, ExitCode::FAILURE);

        let log = tokio::fs::read_to_string(state.runs_log()).await.unwrap();
        let record: RunRecord = serde_json::from_str(log.trim()).unwrap();
        assert_eq!(record.step("a").unwrap().output, Some(json!("weft")));
        assert_eq!(record.step("b").unwrap().status, NodeStatus::Errored);
    }
}
