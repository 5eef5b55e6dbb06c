//! Chronological log of what happened to each item.
//!
//! Bounded: once `capacity` events are held the oldest is dropped.

use std::collections::VecDeque;
use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::state_machine::{ItemId, ItemState};

/// Who caused a state change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeSource {
    Engine,
    Override,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum EventKind {
    Uploaded { size: u64 },
    StateChanged {
        from: ItemState,
        to: ItemState,
        source: ChangeSource,
    },
    Deleted,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemEvent {
    /// Monotonic position in the log, starting at zero.
    pub seq: u64,
    pub at: DateTime<Utc>,
    pub item_id: ItemId,
    pub label: String,
    #[serde(flatten)]
    pub kind: EventKind,
}

impl fmt::Display for ItemEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let at = self.at.format("%H:%M:%S%.3f");
        match &self.kind {
            EventKind::Uploaded { size } => {
                write!(f, "{at} {} uploaded ({size} bytes)", self.label)
            }
            EventKind::StateChanged { from, to, source } => match source {
                ChangeSource::Engine => write!(f, "{at} {} {from} -> {to}", self.label),
                ChangeSource::Override => {
                    write!(f, "{at} {} {from} -> {to} (override)", self.label)
                }
            },
            EventKind::Deleted => write!(f, "{at} {} deleted", self.label),
        }
    }
}

#[derive(Debug, Default)]
struct Ring {
    next_seq: u64,
    events: VecDeque<ItemEvent>,
}

#[derive(Debug)]
pub struct EventLog {
    capacity: usize,
    ring: Mutex<Ring>,
}

impl EventLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            ring: Mutex::new(Ring::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Ring> {
        self.ring.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn record(&self, item_id: ItemId, label: &str, kind: EventKind) {
        let mut ring = self.lock();
        // Sequence and timestamp are taken under the lock so both stay ordered.
        let event = ItemEvent {
            seq: ring.next_seq,
            at: Utc::now(),
            item_id,
            label: label.to_string(),
            kind,
        };
        ring.next_seq += 1;
        if ring.events.len() == self.capacity {
            ring.events.pop_front();
        }
        ring.events.push_back(event);
    }

    /// Oldest first.
    pub fn snapshot(&self) -> Vec<ItemEvent> {
        self.lock().events.iter().cloned().collect()
    }

    /// Events whose `seq` is at least `cursor`, for incremental polling.
    /// Events already dropped from the ring are not returned.
    pub fn since(&self, cursor: u64) -> Vec<ItemEvent> {
        self.lock()
            .events
            .iter()
            .filter(|e| e.seq >= cursor)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.lock().events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for EventLog {
    fn default() -> Self {
        Self::new(500)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn records_in_order() {
        let log = EventLog::new(10);
        let id = Uuid::new_v4();
        log.record(id, "a.jpg", EventKind::Uploaded { size: 4 });
        log.record(
            id,
            "a.jpg",
            EventKind::StateChanged {
                from: ItemState::Uploaded,
                to: ItemState::Processing,
                source: ChangeSource::Engine,
            },
        );
        log.record(id, "a.jpg", EventKind::Deleted);

        let events = log.snapshot();
        assert_eq!(events.len(), 3);
        assert!(matches!(events[0].kind, EventKind::Uploaded { size: 4 }));
        assert_eq!(events[2].kind, EventKind::Deleted);
        assert!(events[0].at <= events[2].at);
        assert_eq!(
            events.iter().map(|e| e.seq).collect::<Vec<_>>(),
            vec![0, 1, 2]
        );
    }

    #[test]
    fn drops_oldest_past_capacity() {
        let log = EventLog::new(2);
        for size in 0..3 {
            log.record(Uuid::new_v4(), "x.jpg", EventKind::Uploaded { size });
        }
        let events = log.snapshot();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].kind, EventKind::Uploaded { size: 1 });
        assert_eq!(events[0].seq, 1);
        assert_eq!(log.since(2).len(), 1);
        assert_eq!(log.since(0).len(), 2);
        assert!(log.since(3).is_empty());
    }

    #[test]
    fn display_lines() {
        let log = EventLog::new(4);
        log.record(
            Uuid::new_v4(),
            "b.png",
            EventKind::StateChanged {
                from: ItemState::Processing,
                to: ItemState::Done,
                source: ChangeSource::Override,
            },
        );
        let line = log.snapshot()[0].to_string();
        assert!(line.ends_with("b.png PROCESSING -> DONE (override)"));
    }

    #[test]
    fn event_serializes_flat() {
        let log = EventLog::new(1);
        log.record(Uuid::nil(), "c.gif", EventKind::Uploaded { size: 7 });
        let value = serde_json::to_value(&log.snapshot()[0]).unwrap();
        assert_eq!(value["kind"], "uploaded");
        assert_eq!(value["size"], 7);
        assert_eq!(value["label"], "c.gif");
    }
}
