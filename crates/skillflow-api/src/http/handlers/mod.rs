//! REST API handlers.

pub mod run;
pub mod system;
pub mod workflow;
