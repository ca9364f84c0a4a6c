//! `skillflow tools`: list configured tool adapters.

use anyhow::Result;
use comfy_table::{presets, Cell, Color, ContentArrangement, Table};
use console::style;
use serde_json::json;

use crate::state::AppState;

/// Handle `skillflow tools`.
pub fn handle_tools(state: &AppState, json: bool) -> Result<()> {
    let tools = state.runner.tools().describe();

    if json {
        let items: Vec<_> = tools
            .iter()
            .map(|(name, description)| json!({ "name": name, "description": description }))
            .collect();
        println!("{}", serde_json::to_string_pretty(&items)?);
        return Ok(());
    }

    if tools.is_empty() {
        println!();
        println!(
            "  No tools configured. Add {} entries to {}.",
            style("[[tools]]").cyan(),
            style(state.data_dir.join("config.toml").display()).dim()
        );
        println!();
        return Ok(());
    }

    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("Tool").fg(Color::Cyan),
            Cell::new("Target"),
        ]);
    for (name, description) in tools {
        table.add_row(vec![Cell::new(name), Cell::new(description)]);
    }

    println!();
    println!("{table}");
    println!();
    Ok(())
}
