//! `weft steps`: list registered step types.

use anyhow::Result;
use comfy_table::{presets, Cell, Color, ContentArrangement, Table};

use crate::state::AppState;

pub async fn list_steps(state: &AppState, json: bool) -> Result<()> {
    let registry = state.registry()?;
    let steps = registry.describe();

    if json {
        let out: Vec<_> = steps
            .iter()
            .map(|(step_type, description)| {
                serde_json::json!({ "type": step_type, "description": description })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![Cell::new("Type").fg(Color::Cyan), Cell::new("Description")]);
    for (step_type, description) in steps {
        table.add_row(vec![Cell::new(step_type), Cell::new(description)]);
    }

    println!();
    println!("{table}");
    println!();
    Ok(())
}
