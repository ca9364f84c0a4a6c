//! Event bus for run lifecycle events.
//!
//! `EventBus` fans every `EventRecord` out to the registered sinks and to
//! broadcast subscribers. Call sites only ever call `emit`.

pub mod bus;
pub mod sink;

pub use bus::{EventBus, SinkId};
pub use sink::{EventSink, MemorySink, SinkError, TracingSink};
