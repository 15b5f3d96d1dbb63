//! bounded, newest-first history of derived events

use crate::domain::{timestamp_ms, Event, EventKind};
use crate::monitor::MonitorObserver;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;

pub const DEFAULT_EVENT_CAPACITY: usize = 50;

pub struct EventLog {
    capacity: usize,
    entries: Mutex<VecDeque<Event>>,
    observer: Arc<dyn MonitorObserver>,
}

impl EventLog {
    pub fn new(capacity: usize, observer: Arc<dyn MonitorObserver>) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: Mutex::new(VecDeque::with_capacity(capacity)),
            observer,
        }
    }

    /// prepend an event, evicting the oldest once over capacity
    pub fn record(&self, message: impl Into<String>, kind: EventKind) -> Event {
        let event = Event {
            message: message.into(),
            kind,
            timestamp_ms: timestamp_ms(),
        };
        {
            let mut entries = self.entries.lock();
            entries.push_front(event.clone());
            entries.truncate(self.capacity);
        }
        tracing::debug!(kind = ?event.kind, "{}", event.message);
        self.observer.event_recorded(&event);
        event
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    pub fn list(&self) -> Vec<Event> {
        self.entries.lock().iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}
