//! Event sink contract and the in-process sinks.

use std::sync::{Arc, Mutex, MutexGuard};

use skillflow_types::event::{EventKind, EventRecord};
use uuid::Uuid;

/// Errors a sink may report. They are logged by the bus and never reach
/// the orchestrator.
#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

/// A registered observer of lifecycle events.
///
/// `deliver` is called synchronously from `EventBus::emit`, once per event.
/// Implementations should be quick; slow consumers should subscribe to the
/// broadcast channel instead.
pub trait EventSink: Send + Sync {
    fn name(&self) -> &str {
        "sink"
    }

    fn deliver(&self, record: &EventRecord) -> Result<(), SinkError>;
}

// ---------------------------------------------------------------------------
// TracingSink
// ---------------------------------------------------------------------------

/// Logs every event through `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn name(&self) -> &str {
        "tracing"
    }

    fn deliver(&self, record: &EventRecord) -> Result<(), SinkError> {
        let step = record.step_name.as_deref().unwrap_or("-");
        match record.kind {
            EventKind::StepFailed => tracing::warn!(
                run_id = %record.run_id,
                step,
                kind = %record.kind,
                payload = %record.payload,
                "workflow event"
            ),
            _ => tracing::info!(
                run_id = %record.run_id,
                step,
                kind = %record.kind,
                payload = %record.payload,
                "workflow event"
            ),
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// MemorySink
// ---------------------------------------------------------------------------

/// Keeps every delivered event in memory. Clones share the same buffer.
#[derive(Debug, Default, Clone)]
pub struct MemorySink {
    events: Arc<Mutex<Vec<EventRecord>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<EventRecord>> {
        self.events.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Snapshot of all events delivered so far.
    pub fn events(&self) -> Vec<EventRecord> {
        self.lock().clone()
    }

    /// Events for one run, in delivery order.
    pub fn for_run(&self, run_id: Uuid) -> Vec<EventRecord> {
        self.lock()
            .iter()
            .filter(|e| e.run_id == run_id)
            .cloned()
            .collect()
    }

    /// `(kind, step)` pairs for one run, in delivery order.
    pub fn kinds_for(&self, run_id: Uuid) -> Vec<(EventKind, Option<String>)> {
        self.for_run(run_id)
            .into_iter()
            .map(|e| (e.kind, e.step_name))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }
}

impl EventSink for MemorySink {
    fn name(&self) -> &str {
        "memory"
    }

    fn deliver(&self, record: &EventRecord) -> Result<(), SinkError> {
        self.lock().push(record.clone());
        Ok(())
    }
}
