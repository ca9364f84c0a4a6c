//! Sink-based event bus.
//!
//! Sinks live in a `DashMap` so concurrent runs can emit while sinks are
//! added or removed. `emit` snapshots the registry, delivers to each sink
//! exactly once and isolates failures: an erroring or panicking sink is
//! logged and skipped. Every record is also sent on a broadcast channel for
//! async subscribers; sending with no subscribers is a no-op.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use dashmap::DashMap;
use skillflow_types::event::EventRecord;
use tokio::sync::broadcast;
use uuid::Uuid;

use super::sink::EventSink;

/// Handle returned by `register`, used to unregister a sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SinkId(Uuid);

impl std::fmt::Display for SinkId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// Multi-sink, multi-run event bus. Cloning shares the registry and channel.
pub struct EventBus {
    sinks: Arc<DashMap<SinkId, Arc<dyn EventSink>>>,
    sender: broadcast::Sender<EventRecord>,
}

impl EventBus {
    /// Create a bus with the given broadcast channel capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sinks: Arc::new(DashMap::new()),
            sender,
        }
    }

    /// Register a sink; it receives every event emitted from now on.
    pub fn register<S: EventSink + 'static>(&self, sink: S) -> SinkId {
        self.register_arc(Arc::new(sink))
    }

    /// Register a shared sink.
    pub fn register_arc(&self, sink: Arc<dyn EventSink>) -> SinkId {
        let id = SinkId(Uuid::now_v7());
        tracing::debug!(sink = sink.name(), %id, "registered event sink");
        self.sinks.insert(id, sink);
        id
    }

    /// Remove a sink. Returns `false` if it was not registered.
    pub fn unregister(&self, id: SinkId) -> bool {
        self.sinks.remove(&id).is_some()
    }

    pub fn sink_count(&self) -> usize {
        self.sinks.len()
    }

    /// Subscribe to every event emitted from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<EventRecord> {
        self.sender.subscribe()
    }

    /// Deliver `record` to every currently registered sink exactly once.
    pub fn emit(&self, record: EventRecord) {
        let sinks: Vec<Arc<dyn EventSink>> =
            self.sinks.iter().map(|entry| entry.value().clone()).collect();

        for sink in sinks {
            match catch_unwind(AssertUnwindSafe(|| sink.deliver(&record))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::warn!(
                    sink = sink.name(),
                    run_id = %record.run_id,
                    kind = %record.kind,
                    error = %e,
                    "event sink failed"
                ),
                Err(_) => tracing::warn!(
                    sink = sink.name(),
                    run_id = %record.run_id,
                    kind = %record.kind,
                    "event sink panicked"
                ),
            }
        }

        let _ = self.sender.send(record);
    }
}

impl Clone for EventBus {
    fn clone(&self) -> Self {
        Self {
            sinks: Arc::clone(&self.sinks),
            sender: self.sender.clone(),
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("sink_count", &self.sinks.len())
            .field("receiver_count", &self.sender.receiver_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::sink::{MemorySink, SinkError};
    use serde_json::json;
    use skillflow_types::event::EventKind;

    fn sample(run_id: Uuid, kind: EventKind) -> EventRecord {
        EventRecord::run(run_id, kind, json!({}))
    }

    struct FailingSink;

    impl EventSink for FailingSink {
        fn deliver(&self, _record: &EventRecord) -> Result<(), SinkError> {
            Err(SinkError::Other("disk full".into()))
        }
    }

    struct PanickingSink;

    impl EventSink for PanickingSink {
        fn deliver(&self, _record: &EventRecord) -> Result<(), SinkError> {
            panic!("sink bug");
        }
    }

    #[test]
    fn test_emit_delivers_once_to_each_sink() {
        let bus = EventBus::new(16);
        let a = MemorySink::new();
        let b = MemorySink::new();
        bus.register(a.clone());
        bus.register(b.clone());

        let run_id = Uuid::now_v7();
        bus.emit(sample(run_id, EventKind::RunStarted));

        assert_eq!(a.len(), 1);
        assert_eq!(b.len(), 1);
        assert_eq!(a.events()[0].kind, EventKind::RunStarted);
    }

    #[test]
    fn test_failing_sinks_do_not_block_others() {
        let bus = EventBus::new(16);
        bus.register(FailingSink);
        bus.register(PanickingSink);
        let memory = MemorySink::new();
        bus.register(memory.clone());

        bus.emit(sample(Uuid::now_v7(), EventKind::RunStarted));
        bus.emit(sample(Uuid::now_v7(), EventKind::RunCompleted));

        assert_eq!(memory.len(), 2);
    }

    #[test]
    fn test_unregister_stops_delivery_without_replay() {
        let bus = EventBus::new(16);
        let early = MemorySink::new();
        let id = bus.register(early.clone());
        let run_id = Uuid::now_v7();

        bus.emit(sample(run_id, EventKind::RunStarted));
        let late = MemorySink::new();
        bus.register(late.clone());
        assert!(bus.unregister(id));
        assert!(!bus.unregister(id));
        bus.emit(sample(run_id, EventKind::RunCompleted));

        assert_eq!(early.len(), 1);
        assert_eq!(late.len(), 1);
        assert_eq!(late.events()[0].kind, EventKind::RunCompleted);
        assert_eq!(bus.sink_count(), 1);
    }

    #[tokio::test]
    async fn test_subscribers_receive_records() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();
        let run_id = Uuid::now_v7();
        bus.clone().emit(sample(run_id, EventKind::RunStarted));
        let received = rx.recv().await.unwrap();
        assert_eq!(received.run_id, run_id);
    }

    #[tokio::test]
    async fn test_concurrent_emission_from_many_runs() {
        let bus = EventBus::new(1024);
        let memory = MemorySink::new();
        bus.register(memory.clone());

        let mut handles = Vec::new();
        for _ in 0..8 {
            let bus = bus.clone();
            handles.push(tokio::spawn(async move {
                let run_id = Uuid::now_v7();
                for _ in 0..25 {
                    bus.emit(sample(run_id, EventKind::StepStarted));
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(memory.len(), 200);
    }

    #[test]
    fn test_debug_impl() {
        let bus = EventBus::new(16);
        bus.register(MemorySink::new());
        let debug = format!("{bus:?}");
        assert!(debug.contains("sink_count: 1"));
    }
}
