//! `skillflow run`: execute a workflow and print its report.

use anyhow::{bail, Context, Result};
use comfy_table::{presets, Cell, Color, ContentArrangement, Table};
use console::style;
use serde_json::{Map, Value};

use skillflow_core::workflow::find_workflow;
use skillflow_types::run::{RunReport, RunStatus, StepStatus};

use crate::state::AppState;

/// Handle `skillflow run`.
pub async fn handle_run(
    state: &AppState,
    workflow: &str,
    pairs: &[String],
    inputs_json: Option<&str>,
    json: bool,
    quiet: bool,
) -> Result<()> {
    let (path, def) = find_workflow(&state.skills_dir, workflow)
        .with_context(|| format!("Failed to load workflow '{workflow}'"))?;
    let inputs = parse_inputs(pairs, inputs_json)?;
    tracing::debug!(path = %path.display(), workflow = %def.name, "loaded workflow");

    let run_id = uuid::Uuid::now_v7();
    let runner = state.runner.clone();
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("  Cancelling run {run_id}...");
            if let Err(e) = runner.cancel(run_id) {
                tracing::debug!(error = %e, "cancel after run finished");
            }
        }
    });

    let result = state.runner.run_with_id(run_id, &def, inputs).await;
    interrupt.abort();
    let report = result.context("Workflow could not start")?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else if !quiet {
        print_report(&report);
    }

    if report.status == RunStatus::Failed {
        let cause = report
            .error
            .as_ref()
            .map(|e| e.to_string())
            .unwrap_or_else(|| "unknown cause".to_string());
        bail!("Workflow '{}' failed: {cause}", report.workflow);
    }
    Ok(())
}

/// Merge `--inputs-json` with `--input key=value` pairs.
///
/// Pair values are parsed as JSON when they parse, otherwise kept as strings,
/// so `count=3` is a number and `name=ada` is a string.
pub fn parse_inputs(pairs: &[String], inputs_json: Option<&str>) -> Result<Map<String, Value>> {
    let mut inputs = match inputs_json {
        Some(raw) => match serde_json::from_str::<Value>(raw).context("Invalid --inputs-json")? {
            Value::Object(map) => map,
            other => bail!("--inputs-json must be a JSON object, got {other}"),
        },
        None => Map::new(),
    };

    for pair in pairs {
        let Some((key, raw)) = pair.split_once('=') else {
            bail!("Invalid --input '{pair}': expected KEY=VALUE");
        };
        let key = key.trim();
        if key.is_empty() {
            bail!("Invalid --input '{pair}': empty key");
        }
        let value = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
        inputs.insert(key.to_string(), value);
    }
    Ok(inputs)
}

fn print_report(report: &RunReport) {
    let status = match report.status {
        RunStatus::Succeeded => style(report.status.to_string()).green().bold(),
        RunStatus::Partial => style(report.status.to_string()).yellow().bold(),
        _ => style(report.status.to_string()).red().bold(),
    };

    println!();
    println!(
        "  {} Workflow '{}' {}",
        style("*").bold(),
        style(&report.workflow).cyan(),
        status
    );
    println!("  Run ID: {}", report.run_id);
    println!("  Duration: {}ms", report.duration_ms);
    println!();

    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("Step").fg(Color::Cyan),
            Cell::new("Status"),
            Cell::new("Duration"),
            Cell::new("Healed"),
            Cell::new("Detail"),
        ]);

    for (name, result) in report.ordered_steps() {
        let color = match result.status {
            StepStatus::Succeeded | StepStatus::HealedSucceeded => Color::Green,
            StepStatus::Skipped => Color::DarkGrey,
            StepStatus::Failed => Color::Red,
        };
        let detail = match (&result.error, &result.output) {
            (Some(err), _) => err.to_string(),
            (None, Some(output)) => preview(output),
            (None, None) => String::new(),
        };
        table.add_row(vec![
            Cell::new(name),
            Cell::new(result.status.as_str()).fg(color),
            Cell::new(format!("{}ms", result.duration_ms)),
            Cell::new(if result.healed > 0 { "yes" } else { "" }),
            Cell::new(detail),
        ]);
    }
    println!("{table}");

    if !report.guidance.is_empty() {
        println!();
        println!("  {}", style("Guidance").bold());
        for item in &report.guidance {
            println!("  {} {}", style(format!("[{}]", item.step)).dim(), item.text);
        }
    }

    if !report.outputs.is_empty() {
        println!();
        println!("  {}", style("Outputs").bold());
        for (name, value) in &report.outputs {
            println!("  {}: {}", style(name).cyan(), preview(value));
        }
    }
    for (name, err) in &report.output_errors {
        println!("  {}: {}", style(name).cyan(), style(err).red());
    }
    println!();
}

/// One-line rendering of a value, shortened for the table.
fn preview(value: &Value) -> String {
    const MAX: usize = 80;
    let text = match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    if text.chars().count() > MAX {
        let cut: String = text.chars().take(MAX).collect();
        format!("{cut}...")
    } else {
        text
    }
}
