// Test double for the scheduler collaborator

use hashbrown::HashSet;

use crate::txc_interface::{Address, Message, SimContext, SimTime, TimerHandle, TimerKind};

#[derive(Debug, Clone, PartialEq)]
pub struct ScheduledTimer {
    pub handle: TimerHandle,
    pub node: Address,
    pub kind: TimerKind,
    pub at: SimTime,
}

/// Records every call instead of running anything
#[derive(Default)]
pub struct RecordingContext {
    pub now: SimTime,
    pub scheduled: Vec<ScheduledTimer>,
    pub cancelled: Vec<TimerHandle>,
    pub delivered: Vec<(Message, Address)>,
    pending: HashSet<TimerHandle>,
    next_handle: u64,
}

impl RecordingContext {
    pub fn at(now: SimTime) -> Self {
        Self {
            now,
            ..Default::default()
        }
    }

    pub fn is_pending(&self, handle: TimerHandle) -> bool {
        self.pending.contains(&handle)
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Mark a handle as fired, as the scheduler does before dispatching it
    pub fn fire(&mut self, handle: TimerHandle) {
        self.pending.remove(&handle);
    }

    pub fn last_scheduled(&self) -> Option<&ScheduledTimer> {
        self.scheduled.last()
    }

    pub fn pending_of(&self, kind: TimerKind) -> Vec<&ScheduledTimer> {
        self.scheduled
            .iter()
            .filter(|t| t.kind == kind && self.pending.contains(&t.handle))
            .collect()
    }
}

impl SimContext for RecordingContext {
    fn now(&self) -> SimTime {
        self.now
    }

    fn schedule_self_event(
        &mut self,
        node: Address,
        kind: TimerKind,
        fire_time: SimTime,
    ) -> TimerHandle {
        let handle = TimerHandle::new(self.next_handle);
        self.next_handle += 1;
        self.pending.insert(handle);
        self.scheduled.push(ScheduledTimer {
            handle,
            node,
            kind,
            at: fire_time,
        });
        handle
    }

    fn cancel(&mut self, handle: TimerHandle) {
        self.pending.remove(&handle);
        self.cancelled.push(handle);
    }

    fn deliver(&mut self, message: Message, target: Address) {
        self.delivered.push((message, target));
    }
}
