//! `weft validate`: load-time checks without executing anything.

use std::path::Path;
use std::process::ExitCode;

use anyhow::Result;
use comfy_table::{presets, Cell, Color, ContentArrangement, Table};
use console::style;
use weft_core::workflow::dag::WorkflowGraph;
use weft_core::workflow::definition::{load_workflow_file, validate_definition};

use crate::state::AppState;

pub async fn validate_workflow(state: &AppState, file: &Path, json: bool) -> Result<ExitCode> {
    let registry = state.registry()?;
    let outcome = load_workflow_file(file)
        .and_then(|def| validate_definition(&def, &registry, &state.config).map(|plan| (def, plan)));

    let (def, plan) = match outcome {
        Ok(ok) => ok,
        Err(e) => {
            if json {
                let out = serde_json::json!({
                    "valid": false,
                    "file": file.display().to_string(),
                    "error": e.to_string(),
                });
                println!("{}", serde_json::to_string_pretty(&out)?);
            } else {
                eprintln!();
                eprintln!("  {} {}: {e}", style("✗").red().bold(), file.display());
                eprintln!();
            }
            return Ok(ExitCode::FAILURE);
        }
    };

    let graph = &plan.graph;
    let levels = graph.levels();

    if json {
        let out = serde_json::json!({
            "valid": true,
            "workflow": def.id,
            "name": def.name,
            "nodes": graph.len(),
            "edges": graph.edges().len(),
            "entry": graph.id(graph.entry()),
            "levels": levels,
            "ancestors": ancestry(graph),
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(ExitCode::SUCCESS);
    }

    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("Level").fg(Color::Cyan),
            Cell::new("Nodes"),
        ]);
    for (depth, nodes) in levels.iter().enumerate() {
        table.add_row(vec![Cell::new(depth), Cell::new(nodes.join(", "))]);
    }

    println!();
    println!(
        "  {} Workflow '{}' is valid",
        style("✓").green().bold(),
        style(def.label()).cyan()
    );
    println!(
        "  Nodes: {}  Edges: {}  Entry: {}",
        graph.len(),
        graph.edges().len(),
        graph.id(graph.entry())
    );
    let mut deps = Table::new();
    deps.load_preset(presets::UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![Cell::new("Node").fg(Color::Cyan), Cell::new("Depends on")]);
    for &node in graph.topological_order() {
        let id = graph.id(node);
        deps.add_row(vec![Cell::new(id), Cell::new(graph.ancestors(id).join(", "))]);
    }

    println!();
    println!("{table}");
    println!("{deps}");
    println!();

    Ok(ExitCode::SUCCESS)
}

/// Transitive upstream nodes of every node, keyed by node id.
fn ancestry(graph: &WorkflowGraph) -> serde_json::Value {
    let map = graph
        .ids()
        .iter()
        .map(|id| (id.clone(), serde_json::json!(graph.ancestors(id))))
        .collect::<serde_json::Map<_, _>>();
    serde_json::Value::Object(map)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn reports_valid_and_invalid_files() {
        let dir = tempdir().unwrap();
        let state = AppState::init(Some(dir.path().to_path_buf()), None).await.unwrap();

        let good = dir.path().join("good.yaml");
        tokio::fs::write(
            &good,
            "id: good\nnodes:\n  a:\n    type: transform\n    params:\n      value: 1\n",
        )
        .await
        .unwrap();
        assert_eq!(
            validate_workflow(&state, &good, true).await.unwrap(),
            ExitCode::SUCCESS
        );

        let bad = dir.path().join("bad.json");
        tokio::fs::write(&bad, r#"{"id": "bad", "nodes": {"a": {"type": "teleport"}}}"#)
            .await
            .unwrap();
        assert_eq!(
            validate_workflow(&state, &bad, true).await.unwrap(),
            ExitCode::FAILURE
        );
    }

    #[tokio::test]
    async fn ancestry_lists_transitive_upstream_nodes() {
        let dir = tempdir().unwrap();
        let state = AppState::init(Some(dir.path().to_path_buf()), None).await.unwrap();
        let registry = state.registry().unwrap();
        let def = weft_core::workflow::definition::parse_workflow_json(
            r#"{"id": "chain", "nodes": {
                "a": {"type": "transform", "params": {"value": 1}},
                "b": {"type": "transform", "params": {"value": 2}},
                "c": {"type": "transform", "params": {"value": 3}}
            }, "edges": [{"from": "a", "to": "b"}, {"from": "b", "to": "c"}]}"#,
        )
        .unwrap();
        let plan = validate_definition(&def, &registry, &state.config).unwrap();

        let ancestors = ancestry(&plan.graph);
        assert_eq!(ancestors["a"], serde_json::json!([]));
        assert_eq!(ancestors["c"], serde_json::json!(["a", "b"]));
    }
}
