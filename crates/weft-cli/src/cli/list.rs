//! `weft list`: workflows available to `weft run --id`.

use anyhow::{Context, Result};
use comfy_table::{presets, Cell, Color, ContentArrangement, Table};
use console::style;
use weft_core::workflow::source::WorkflowSource;
use weft_infra::workflow::FsWorkflowSource;

use crate::state::AppState;

pub async fn list_workflows(state: &AppState, json: bool) -> Result<()> {
    let source = FsWorkflowSource::new(state.workflows_dir());
    let ids = source
        .list_ids()
        .await
        .with_context(|| format!("failed to read {}", source.dir().display()))?;

    let mut rows = Vec::with_capacity(ids.len());
    for id in ids {
        match source.get_definition(&id).await {
            Ok(Some(def)) => rows.push((id, def.name.clone(), Some(def.nodes.len()), None)),
            Ok(None) => {}
            Err(e) => rows.push((id, None, None, Some(e.to_string()))),
        }
    }

    if json {
        let out: Vec<_> = rows
            .iter()
            .map(|(id, name, nodes, error)| {
                serde_json::json!({ "id": id, "name": name, "nodes": nodes, "error": error })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    if rows.is_empty() {
        println!();
        println!("  No workflows in {}.", source.dir().display());
        println!(
            "  Add one with: {}",
            style(format!("cp wf.json {}/", source.dir().display())).dim()
        );
        println!();
        return Ok(());
    }

    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("Id").fg(Color::Cyan),
            Cell::new("Name"),
            Cell::new("Nodes"),
        ]);
    for (id, name, nodes, error) in &rows {
        let nodes = match (nodes, error) {
            (Some(n), _) => Cell::new(n),
            (None, Some(e)) => Cell::new(format!("invalid: {e}")).fg(Color::Red),
            (None, None) => Cell::new("-"),
        };
        table.add_row(vec![
            Cell::new(id),
            Cell::new(name.as_deref().unwrap_or("")),
            nodes,
        ]);
    }

    println!();
    println!("{table}");
    println!();
    Ok(())
}
