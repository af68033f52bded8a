// Discrete-event queue
//
// A min-heap keyed by (fire time, insertion id). Equal times fire in insertion
// order. Cancelled timers stay in the heap and are skipped when they reach
// the top, which keeps `cancel` O(1) and makes a second cancel a no-op.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use hashbrown::HashSet;

use crate::txc_interface::{
    Address, Message, NodeEvent, SimContext, SimDuration, SimTime, TimerHandle, TimerKind,
};

/// An event ready for dispatch to `target`
#[derive(Debug, Clone, PartialEq)]
pub struct Scheduled {
    pub at: SimTime,
    pub target: Address,
    pub event: NodeEvent,
}

struct Entry {
    id: u64,
    at: SimTime,
    target: Address,
    event: NodeEvent,
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Entry {}

// reversed so BinaryHeap pops the smallest (at, id) first
impl Ord for Entry {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .at
            .total_cmp(&self.at)
            .then_with(|| other.id.cmp(&self.id))
    }
}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[derive(Default)]
pub struct EventQueue {
    heap: BinaryHeap<Entry>,
    next_id: u64,
    // timers that are scheduled and neither fired nor cancelled
    armed: HashSet<u64>,
}

impl EventQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn schedule_timer(
        &mut self,
        target: Address,
        kind: TimerKind,
        at: SimTime,
    ) -> TimerHandle {
        let id = self.push(target, at, |id| NodeEvent::TimerFired {
            kind,
            handle: TimerHandle::new(id),
        });
        self.armed.insert(id);
        TimerHandle::new(id)
    }

    pub fn schedule_arrival(&mut self, target: Address, message: Message, at: SimTime) {
        self.push(target, at, |_| NodeEvent::MessageArrived(message));
    }

    /// No-op for handles that already fired or were cancelled
    pub fn cancel(&mut self, handle: TimerHandle) {
        self.armed.remove(&handle.raw());
    }

    pub fn is_armed(&self, handle: TimerHandle) -> bool {
        self.armed.contains(&handle.raw())
    }

    /// Pop the next live event (earliest time, lowest id).
    pub fn pop_next(&mut self) -> Option<Scheduled> {
        self.skip_cancelled();
        let entry = self.heap.pop()?;
        if let NodeEvent::TimerFired { handle, .. } = &entry.event {
            self.armed.remove(&handle.raw());
        }
        Some(Scheduled {
            at: entry.at,
            target: entry.target,
            event: entry.event,
        })
    }

    pub fn peek_time(&mut self) -> Option<SimTime> {
        self.skip_cancelled();
        self.heap.peek().map(|entry| entry.at)
    }

    pub fn is_empty(&mut self) -> bool {
        self.peek_time().is_none()
    }

    /// Heap size including cancelled entries not yet skipped
    pub fn raw_len(&self) -> usize {
        self.heap.len()
    }

    fn push<F>(&mut self, target: Address, at: SimTime, make: F) -> u64
    where
        F: FnOnce(u64) -> NodeEvent,
    {
        let id = self.next_id;
        self.next_id += 1;
        self.heap.push(Entry {
            id,
            at,
            target,
            event: make(id),
        });
        id
    }

    fn skip_cancelled(&mut self) {
        loop {
            let stale = match self.heap.peek() {
                Some(Entry {
                    event: NodeEvent::TimerFired { handle, .. },
                    ..
                }) => !self.armed.contains(&handle.raw()),
                _ => false,
            };
            if !stale {
                break;
            }
            self.heap.pop();
        }
    }
}

/// The scheduler as seen by one node while it handles one event
pub struct SchedulerContext<'a> {
    queue: &'a mut EventQueue,
    now: SimTime,
    link_delay: SimDuration,
}

impl<'a> SchedulerContext<'a> {
    pub fn new(queue: &'a mut EventQueue, now: SimTime, link_delay: SimDuration) -> Self {
        Self {
            queue,
            now,
            link_delay,
        }
    }
}

impl SimContext for SchedulerContext<'_> {
    fn now(&self) -> SimTime {
        self.now
    }

    fn schedule_self_event(
        &mut self,
        node: Address,
        kind: TimerKind,
        fire_time: SimTime,
    ) -> TimerHandle {
        debug_assert!(
            fire_time >= self.now,
            "cannot schedule in the past: now={}, at={}",
            self.now,
            fire_time
        );
        self.queue.schedule_timer(node, kind, fire_time.max(self.now))
    }

    fn cancel(&mut self, handle: TimerHandle) {
        self.queue.cancel(handle);
    }

    fn deliver(&mut self, message: Message, target: Address) {
        self.queue
            .schedule_arrival(target, message, self.now + self.link_delay);
    }
}
