//! Tool abstraction: trait, type-erased wrapper, registry, invoker.

pub mod box_tool;
pub mod classify;
pub mod handler;
pub mod invoker;
pub mod registry;

pub use box_tool::BoxTool;
pub use handler::{FnTool, Tool};
pub use invoker::ToolInvoker;
pub use registry::ToolRegistry;
