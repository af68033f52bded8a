// all addresses share one numeric type so topology tables can index by them
pub type Address = u32;
pub type SeqId = u64;

// simulation time in seconds
pub type SimTime = f64;
pub type SimDuration = f64;

/// Application message handed between nodes.
///
/// Messages are plain values: every send puts a fresh copy on the link, so a
/// receiver never shares an instance with the node that sent it. Only the
/// timestamp fields change after creation, and only on the sending side.
#[derive(Clone, Debug, PartialEq)]
pub struct Message {
    pub seq: SeqId,
    pub source: Address,
    pub destination: Address,
    /// Set by the sender on every (re)transmission
    pub send_time: Option<SimTime>,
    /// Processing delay chosen by the last node that buffered it
    pub processing_delay: Option<SimDuration>,
    pub receive_time: Option<SimTime>,
    pub hop_count: u32,
}

impl Message {
    pub fn new(seq: SeqId, source: Address, destination: Address) -> Self {
        Self {
            seq,
            source,
            destination,
            send_time: None,
            processing_delay: None,
            receive_time: None,
            hop_count: 0,
        }
    }

    /// Display name, `m-<seq>`
    pub fn name(&self) -> String {
        format!("m-{}", self.seq)
    }

    /// Time since the message was last put on the wire, if it ever was.
    pub fn latency_at(&self, now: SimTime) -> Option<SimDuration> {
        self.send_time.map(|sent| (now - sent).max(0.0))
    }
}

// ============================================================================
// Timers
// ============================================================================

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum TimerKind {
    /// "finish handling the buffered message, then send it"
    Processing,
    /// "no progress observed, resend the buffered message"
    Timeout,
}

impl TimerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TimerKind::Processing => "processing",
            TimerKind::Timeout => "timeout",
        }
    }
}

/// Opaque token for a scheduled self-event.
///
/// Handles carry no payload; they are only compared against the handle a
/// node remembers for the armed timer of the same kind.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimerHandle(u64);

impl TimerHandle {
    #[inline]
    pub fn new(raw: u64) -> Self {
        TimerHandle(raw)
    }

    #[inline]
    pub fn raw(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for TimerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "T#{}", self.0)
    }
}

/// Events the scheduler delivers to a node, one at a time.
#[derive(Clone, Debug, PartialEq)]
pub enum NodeEvent {
    TimerFired { kind: TimerKind, handle: TimerHandle },
    MessageArrived(Message),
}

// ============================================================================
// Scheduler collaborator
// ============================================================================

/// The services a node needs from the discrete-event scheduler.
///
/// Implementations must serialize delivery: a node never sees two events at
/// once, and `now()` never decreases between calls.
pub trait SimContext {
    fn now(&self) -> SimTime;

    /// Schedule a self-event of `kind` for `node` at absolute time `fire_time`.
    fn schedule_self_event(
        &mut self,
        node: Address,
        kind: TimerKind,
        fire_time: SimTime,
    ) -> TimerHandle;

    /// Remove a pending self-event. Cancelling a handle that already fired
    /// or was already cancelled is a no-op.
    fn cancel(&mut self, handle: TimerHandle);

    /// Put `message` on the link towards `target`. Never blocks, never fails.
    fn deliver(&mut self, message: Message, target: Address);
}

// ============================================================================
// Event Logging System
// ============================================================================

/// Events emitted by a node for display and analysis
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// Traffic bootstrap armed at startup
    Bootstrapped { seq: SeqId, at: SimTime },
    /// Arrival accepted and processing timer armed
    ProcessingStarted { seq: SeqId, delay: SimDuration },
    /// First transmission of the buffered message
    Sent { seq: SeqId, to: Address, destination: Address },
    /// Timeout fired and the buffered message went out again
    Retransmitted { seq: SeqId, to: Address, attempt: u32 },
    /// Message survived the loss draw
    Arrived { seq: SeqId, from: Address, latency: SimDuration },
    /// Message discarded by the loss draw
    Lost { seq: SeqId, from: Address },
    /// Message reached its destination address
    Delivered { seq: SeqId, source: Address, hops: u32 },
    /// Retry cap reached, buffer dropped
    GaveUp { seq: SeqId, attempts: u32 },
    /// An armed timer was cancelled by a new arrival
    TimerCancelled { kind: TimerKind },
}

impl Event {
    pub fn kind_name(&self) -> &'static str {
        match self {
            Event::Bootstrapped { .. } => "Bootstrapped",
            Event::ProcessingStarted { .. } => "ProcessingStarted",
            Event::Sent { .. } => "Sent",
            Event::Retransmitted { .. } => "Retransmitted",
            Event::Arrived { .. } => "Arrived",
            Event::Lost { .. } => "Lost",
            Event::Delivered { .. } => "Delivered",
            Event::GaveUp { .. } => "GaveUp",
            Event::TimerCancelled { .. } => "TimerCancelled",
        }
    }
}

/// Trait for consuming events from the nodes
pub trait EventSink {
    fn log(&mut self, time: SimTime, node: Address, event: Event);
}

/// No-op event sink (zero overhead)
pub struct NoOpSink;

impl EventSink for NoOpSink {
    #[inline(always)]
    fn log(&mut self, _time: SimTime, _node: Address, _event: Event) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_message_has_unset_timestamps() {
        let msg = Message::new(3, 1, 2);
        assert_eq!(msg.name(), "m-3");
        assert!(msg.send_time.is_none());
        assert!(msg.receive_time.is_none());
        assert!(msg.processing_delay.is_none());
        assert_eq!(msg.latency_at(10.0), None);
    }

    #[test]
    fn test_latency_from_send_time() {
        let mut msg = Message::new(1, 0, 1);
        msg.send_time = Some(4.0);
        assert_eq!(msg.latency_at(6.5), Some(2.5));
    }

    #[test]
    fn test_timer_handle_display() {
        assert_eq!(format!("{}", TimerHandle::new(7)), "T#7");
        assert_eq!(TimerHandle::new(7).raw(), 7);
    }
}
