//! Time-ordered event queue.
//!
//! Events are ordered by `(time, insertion sequence)`, so events scheduled for
//! the same instant fire in the order they were scheduled.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashSet};
use std::fmt;

use crate::Simulator;
use crate::time::Time;

/// Action run when an event fires.
pub type EventFn = Box<dyn FnOnce(&Simulator)>;

/// Identifier of a scheduled event, usable for cancellation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EventId(u64);

impl EventId {
    pub fn as_raw(self) -> u64 {
        self.0
    }
}

pub enum EventKind {
    /// Run a closure.
    Invoke(EventFn),
    /// Terminate the event loop.
    Stop,
}

impl fmt::Debug for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventKind::Invoke(_) => f.write_str("Invoke(..)"),
            EventKind::Stop => f.write_str("Stop"),
        }
    }
}

#[derive(Debug)]
pub struct Event {
    pub id: EventId,
    pub time: Time,
    pub kind: EventKind,
}

impl PartialEq for Event {
    fn eq(&self, other: &Self) -> bool {
        self.time == other.time && self.id == other.id
    }
}

impl Eq for Event {}

impl PartialOrd for Event {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Event {
    // Reversed so that `BinaryHeap` pops the earliest event first.
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .time
            .cmp(&self.time)
            .then_with(|| other.id.cmp(&self.id))
    }
}

/// Priority queue of pending events.
#[derive(Debug, Default)]
pub struct EventQueue {
    heap: BinaryHeap<Event>,
    cancelled: HashSet<EventId>,
    next_seq: u64,
}

impl EventQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedules an event at an absolute time.
    pub fn schedule(&mut self, time: Time, kind: EventKind) -> EventId {
        let id = EventId(self.next_seq);
        self.next_seq += 1;
        self.heap.push(Event { id, time, kind });
        id
    }

    /// Marks an event as cancelled; it is dropped when it reaches the front.
    ///
    /// Returns `false` if the event already fired or was never scheduled.
    pub fn cancel(&mut self, id: EventId) -> bool {
        if id.0 >= self.next_seq || !self.heap.iter().any(|event| event.id == id) {
            return false;
        }
        self.cancelled.insert(id)
    }

    /// Removes and returns the next live event.
    pub fn pop(&mut self) -> Option<Event> {
        while let Some(event) = self.heap.pop() {
            if !self.cancelled.remove(&event.id) {
                return Some(event);
            }
        }
        None
    }

    /// Time of the next live event, if any.
    pub fn next_time(&self) -> Option<Time> {
        self.heap
            .iter()
            .filter(|event| !self.cancelled.contains(&event.id))
            .map(|event| event.time)
            .min()
    }

    pub fn len(&self) -> usize {
        self.heap.len() - self.cancelled.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drops every pending event, returning how many were live.
    pub fn clear(&mut self) -> usize {
        let live = self.len();
        self.heap.clear();
        self.cancelled.clear();
        live
    }

    /// Takes every pending event out of the queue without running it.
    pub(crate) fn drain(&mut self) -> Vec<Event> {
        self.cancelled.clear();
        std::mem::take(&mut self.heap).into_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop() -> EventKind {
        EventKind::Invoke(Box::new(|_| {}))
    }

    #[test]
    fn pops_in_time_order() {
        let mut queue = EventQueue::new();
        let late = queue.schedule(Time::from_nanos(1_500), noop());
        let early = queue.schedule(Time::from_nanos(500), noop());
        let middle = queue.schedule(Time::from_nanos(1_000), noop());

        assert_eq!(queue.len(), 3);
        assert_eq!(queue.next_time(), Some(Time::from_nanos(500)));
        assert_eq!(queue.pop().unwrap().id, early);
        assert_eq!(queue.pop().unwrap().id, middle);
        assert_eq!(queue.pop().unwrap().id, late);
        assert!(queue.is_empty());
    }

    #[test]
    fn fifo_at_same_time() {
        let mut queue = EventQueue::new();
        let ids: Vec<_> = (0..5)
            .map(|_| queue.schedule(Time::from_nanos(1_000), noop()))
            .collect();

        let popped: Vec<_> = std::iter::from_fn(|| queue.pop().map(|event| event.id)).collect();
        assert_eq!(popped, ids);
    }

    #[test]
    fn cancelled_events_are_skipped() {
        let mut queue = EventQueue::new();
        let first = queue.schedule(Time::from_nanos(10), noop());
        let second = queue.schedule(Time::from_nanos(20), noop());

        assert!(queue.cancel(first));
        assert!(!queue.cancel(first), "double cancel");
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.next_time(), Some(Time::from_nanos(20)));
        assert_eq!(queue.pop().unwrap().id, second);
        assert!(queue.pop().is_none());
        assert!(!queue.cancel(second), "already fired");
    }

    #[test]
    fn clear_reports_live_events() {
        let mut queue = EventQueue::new();
        let id = queue.schedule(Time::from_nanos(1), noop());
        queue.schedule(Time::from_nanos(2), EventKind::Stop);
        queue.cancel(id);

        assert_eq!(queue.clear(), 1);
        assert!(queue.is_empty());
    }

    proptest::proptest! {
        #[test]
        fn pops_sorted_by_time_then_sequence(times in proptest::collection::vec(0u64..50, 1..64)) {
            let mut queue = EventQueue::new();
            for &t in &times {
                queue.schedule(Time::from_nanos(t), noop());
            }

            let popped: Vec<_> =
                std::iter::from_fn(|| queue.pop().map(|event| (event.time, event.id))).collect();
            proptest::prop_assert_eq!(popped.len(), times.len());
            for pair in popped.windows(2) {
                proptest::prop_assert!(pair[0] < pair[1]);
            }
        }
    }
}
