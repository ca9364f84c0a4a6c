//! Infrastructure layer for skillflow.
//!
//! Implements the ports defined in `skillflow-core`: concrete tool adapters
//! (process spawning, HTTP), a JSON-lines event sink, and configuration and
//! data-directory loading.

pub mod config;
pub mod event;
pub mod filesystem;
pub mod tool;
