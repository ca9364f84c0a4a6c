//! CLI command definitions for the `skillflow` binary.
//!
//! Uses clap derive macros for argument parsing.

pub mod run;
pub mod tools;
pub mod workflow;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use clap_complete::Shell;

/// Run declarative skill workflows.
#[derive(Parser)]
#[command(name = "skillflow", version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Output machine-readable JSON instead of styled text.
    #[arg(long, global = true)]
    pub json: bool,

    /// Suppress all output except errors.
    #[arg(long, global = true)]
    pub quiet: bool,

    /// Detailed output (-v for verbose, -vv for debug/trace).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Log line format on stderr.
    #[arg(
        long,
        global = true,
        env = "SKILLFLOW_LOG_FORMAT",
        default_value = "pretty",
        value_parser = ["pretty", "json"]
    )]
    pub log_format: String,

    /// Export tracing spans through OpenTelemetry (stdout exporter).
    #[arg(long, global = true, env = "SKILLFLOW_OTEL")]
    pub otel: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run a workflow by name or file path.
    Run {
        /// Workflow name (searched in the skills directory) or path to a YAML file.
        workflow: String,

        /// Input value as key=value; the value is parsed as JSON when possible.
        #[arg(short, long = "input", value_name = "KEY=VALUE")]
        inputs: Vec<String>,

        /// All inputs as one JSON object; `--input` entries override its keys.
        #[arg(long, value_name = "JSON")]
        inputs_json: Option<String>,
    },

    /// Validate workflow files without running them.
    Validate {
        /// Workflow YAML files.
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },

    /// List workflows in the skills directory.
    #[command(alias = "ls")]
    List,

    /// List configured tools.
    Tools,

    /// Start the REST API server.
    Serve {
        /// Port to listen on.
        #[arg(short, long, default_value = "3000")]
        port: u16,

        /// Host to bind to.
        #[arg(long, default_value = "127.0.0.1")]
        host: String,
    },

    /// Generate shell completions.
    Completions {
        /// Shell to generate completions for.
        shell: Shell,
    },
}
