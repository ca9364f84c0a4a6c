//! Workflow CLI commands: validate and list.

use std::path::PathBuf;

use anyhow::{bail, Result};
use comfy_table::{presets, Cell, Color, ContentArrangement, Table};
use console::style;
use serde_json::json;

use skillflow_core::tool::ToolRegistry;
use skillflow_core::workflow::{discover_workflows, load_workflow_file};
use skillflow_types::workflow::{StepKind, WorkflowDefinition};

use crate::state::AppState;

/// Handle `skillflow validate <files...>`.
pub fn handle_validate(state: &AppState, files: &[PathBuf], json: bool) -> Result<()> {
    let mut results = Vec::new();
    let mut failures = 0usize;

    for path in files {
        match load_workflow_file(path) {
            Ok(def) => {
                let missing = unregistered_tools(&def, state.runner.tools());
                results.push(json!({
                    "path": path.display().to_string(),
                    "name": def.name,
                    "valid": true,
                    "steps": def.steps.len(),
                    "unregistered_tools": missing,
                }));
            }
            Err(e) => {
                failures += 1;
                results.push(json!({
                    "path": path.display().to_string(),
                    "valid": false,
                    "error": e.to_string(),
                }));
            }
        }
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&results)?);
    } else {
        for result in &results {
            let path = result["path"].as_str().unwrap_or_default();
            if result["valid"] == true {
                println!(
                    "  {} {} ({}, {} steps)",
                    style("ok").green().bold(),
                    path,
                    result["name"].as_str().unwrap_or_default(),
                    result["steps"]
                );
                if let Some(missing) = result["unregistered_tools"].as_array() {
                    for tool in missing {
                        println!(
                            "     {} tool {} is not configured",
                            style("warn").yellow(),
                            tool
                        );
                    }
                }
            } else {
                println!(
                    "  {} {}: {}",
                    style("error").red().bold(),
                    path,
                    result["error"].as_str().unwrap_or_default()
                );
            }
        }
    }

    if failures > 0 {
        bail!("{failures} of {} workflow file(s) invalid", files.len());
    }
    Ok(())
}

/// Handle `skillflow list`.
pub fn handle_list(state: &AppState, json: bool) -> Result<()> {
    let workflows = discover_workflows(&state.skills_dir)?;

    if json {
        let items: Vec<_> = workflows
            .iter()
            .map(|(path, def)| {
                json!({
                    "name": def.name,
                    "description": def.description,
                    "inputs": def.inputs.iter().map(|i| &i.name).collect::<Vec<_>>(),
                    "steps": def.steps.len(),
                    "path": path.display().to_string(),
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&items)?);
        return Ok(());
    }

    if workflows.is_empty() {
        println!();
        println!(
            "  No workflows found in {}.",
            style(state.skills_dir.display()).dim()
        );
        println!();
        return Ok(());
    }

    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("Name").fg(Color::Cyan),
            Cell::new("Steps"),
            Cell::new("Inputs"),
            Cell::new("Description"),
        ]);

    for (_, def) in &workflows {
        let inputs: Vec<String> = def
            .inputs
            .iter()
            .map(|i| {
                if i.required {
                    i.name.clone()
                } else {
                    format!("{}?", i.name)
                }
            })
            .collect();
        table.add_row(vec![
            Cell::new(&def.name),
            Cell::new(def.steps.len()),
            Cell::new(inputs.join(", ")),
            Cell::new(def.description.as_deref().unwrap_or("-")),
        ]);
    }

    println!();
    println!("{table}");
    println!();
    Ok(())
}

/// Tool names a definition uses that the registry does not provide.
pub fn unregistered_tools(def: &WorkflowDefinition, registry: &ToolRegistry) -> Vec<String> {
    let mut missing: Vec<String> = def
        .steps
        .iter()
        .filter_map(|step| match &step.kind {
            StepKind::Tool { tool, .. } if !registry.contains(tool) => Some(tool.clone()),
            _ => None,
        })
        .collect();
    missing.sort();
    missing.dedup();
    missing
}

#[cfg(test)]
mod tests {
    use super::*;
    use skillflow_core::tool::FnTool;
    use skillflow_core::workflow::parse_workflow_yaml;

    #[test]
    fn test_unregistered_tools_are_deduplicated() {
        let def = parse_workflow_yaml(
            r#"
name: triage
steps:
  - name: a
    kind: tool
    tool: tracker.create
  - name: b
    kind: tool
    tool: chat.post
  - name: c
    kind: tool
    tool: tracker.create
  - name: d
    kind: tool
    tool: search
"#,
        )
        .unwrap();

        let mut registry = ToolRegistry::new();
        registry.register(FnTool::new("search", |_args| async { Ok(serde_json::Value::Null) }));
        assert_eq!(
            unregistered_tools(&def, &registry),
            vec!["chat.post".to_string(), "tracker.create".to_string()]
        );
    }
}
