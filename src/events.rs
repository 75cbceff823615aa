//! Lifecycle event subscribers — the Audit Log collaborator contract.
//!
//! The Manager never requires an [`EventSink`] to succeed: `emit` takes
//! `&self` and returns nothing, so a sink that wants to surface a failure
//! (e.g. a broken audit-log connection) must log it internally rather than
//! propagate it.

use std::sync::Mutex;

use tracing::warn;

use crate::types::LifecycleEvent;

/// Receives lifecycle events as they are appended to the store.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: LifecycleEvent);
}

/// Default sink: drops events after a trace-level log line.
#[derive(Debug, Default)]
pub struct NoopEventSink;

impl EventSink for NoopEventSink {
    fn emit(&self, event: LifecycleEvent) {
        tracing::trace!(kind = event.kind.as_str(), user_id = %event.user_id, "lifecycle event dropped (noop sink)");
    }
}

/// In-process sink that retains the most recent events, bounded by
/// capacity. Useful for tests and for a caller that wants to poll rather
/// than subscribe.
pub struct BufferedEventSink {
    capacity: usize,
    events: Mutex<Vec<LifecycleEvent>>,
}

impl BufferedEventSink {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            events: Mutex::new(Vec::new()),
        }
    }

    pub fn drain(&self) -> Vec<LifecycleEvent> {
        let mut guard = self.events.lock().unwrap_or_else(|e| e.into_inner());
        std::mem::take(&mut *guard)
    }

    pub fn snapshot(&self) -> Vec<LifecycleEvent> {
        self.events.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

impl EventSink for BufferedEventSink {
    fn emit(&self, event: LifecycleEvent) {
        if !event.success {
            warn!(kind = event.kind.as_str(), error = ?event.error, "lifecycle event reported failure");
        }
        let mut guard = self.events.lock().unwrap_or_else(|e| e.into_inner());
        guard.push(event);
        if guard.len() > self.capacity {
            let overflow = guard.len() - self.capacity;
            guard.drain(0..overflow);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::EventKind;

    #[test]
    fn buffered_sink_bounds_capacity() {
        let sink = BufferedEventSink::new(2);
        for i in 0..5 {
            sink.emit(LifecycleEvent::new(EventKind::Created, "u1").with_resource(i.to_string()));
        }
        let snapshot = sink.snapshot();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot[1].resource_id.as_deref(), Some("4"));
    }

    #[test]
    fn drain_empties_buffer() {
        let sink = BufferedEventSink::new(10);
        sink.emit(LifecycleEvent::new(EventKind::Retrieved, "u1"));
        assert_eq!(sink.drain().len(), 1);
        assert_eq!(sink.snapshot().len(), 0);
    }
}
