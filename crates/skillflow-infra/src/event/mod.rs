//! Event sinks backed by local storage.

pub mod jsonl;

pub use jsonl::JsonlFileSink;
