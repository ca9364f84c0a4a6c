//! Skill execution engine for skillflow.
//!
//! This crate holds the engine and the ports it talks through (the `Tool`
//! trait and the `EventSink` trait). It depends only on `skillflow-types`;
//! concrete tool adapters and file sinks live in `skillflow-infra`.

pub mod event;
pub mod tool;
pub mod workflow;
