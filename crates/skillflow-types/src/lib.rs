//! Shared domain types for skillflow.
//!
//! Workflow definitions, step results, run reports, lifecycle events, tool
//! error kinds, auto-heal rules and engine configuration.
//!
//! Zero infrastructure dependencies -- only serde, uuid, chrono, thiserror.

pub mod config;
pub mod event;
pub mod heal;
pub mod run;
pub mod tool;
pub mod workflow;
