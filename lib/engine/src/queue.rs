//! Time-ordered dispatch queue.
//!
//! A min-heap on `next_run_time` behind a single mutex, paired with a
//! notification primitive signalled on every push: a newly arriving earlier
//! record must preempt a release loop sleeping towards a later deadline.
//! `Notify` stores a permit when nobody is waiting, so a push between
//! examining the heap and parking cannot be lost.

use chrono::{DateTime, Utc};
use punctual_schedule::ScheduleRecord;
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::Notify;

struct QueuedSchedule {
    due: DateTime<Utc>,
    seq: u64,
    record: ScheduleRecord,
}

impl PartialEq for QueuedSchedule {
    fn eq(&self, other: &Self) -> bool {
        self.due == other.due && self.seq == other.seq
    }
}

impl Eq for QueuedSchedule {}

impl PartialOrd for QueuedSchedule {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueuedSchedule {
    // Reversed so the BinaryHeap max is the earliest deadline; ties release
    // in arrival order.
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .due
            .cmp(&self.due)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

/// What the release loop should do next.
#[derive(Debug)]
pub enum QueueStep {
    /// Nothing queued; park until a push or shutdown.
    Idle,
    /// The earliest record is due in the given duration.
    Wait(Duration),
    /// These records are due now, in release order.
    Due(Vec<ScheduleRecord>),
}

/// The shared dispatch queue.
#[derive(Default)]
pub struct DispatchQueue {
    heap: Mutex<BinaryHeap<QueuedSchedule>>,
    notify: Notify,
    seq: AtomicU64,
}

impl DispatchQueue {
    /// Creates an empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Pushes a record and wakes the release loop.
    pub fn push(&self, record: ScheduleRecord) {
        let entry = QueuedSchedule {
            due: record.next_run_time,
            seq: self.seq.fetch_add(1, AtomicOrdering::Relaxed),
            record,
        };
        self.heap
            .lock()
            .expect("dispatch queue lock poisoned")
            .push(entry);
        self.notify.notify_one();
    }

    /// Examines the heap: pops everything due at `now`, or reports how long
    /// to wait for the earliest entry.
    #[must_use]
    pub fn next_step(&self, now: DateTime<Utc>) -> QueueStep {
        let mut heap = self.heap.lock().expect("dispatch queue lock poisoned");

        let Some(earliest) = heap.peek() else {
            return QueueStep::Idle;
        };

        if earliest.due > now {
            let wait = (earliest.due - now)
                .to_std()
                .unwrap_or(Duration::from_millis(1));
            return QueueStep::Wait(wait);
        }

        let mut due = Vec::new();
        while let Some(entry) = heap.peek() {
            if entry.due > now {
                break;
            }
            due.push(heap.pop().expect("peeked entry exists").record);
        }
        QueueStep::Due(due)
    }

    /// Waits until the queue changes (a push, or a stored permit).
    pub async fn changed(&self) {
        self.notify.notified().await;
    }

    /// Number of queued records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.heap.lock().expect("dispatch queue lock poisoned").len()
    }

    /// Returns true when nothing is queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
