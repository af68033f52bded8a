// Reliability automaton: one buffer slot, a processing timer and a timeout timer
//
// States are derived from the armed timers:
//   Idle               - nothing armed
//   AwaitingProcessing - processing timer armed, buffer holds the message
//                        being processed
//   AwaitingTimeout    - timeout timer armed, buffer holds the last message
//                        sent
//
// Every arrival cancels both timers before anything else happens, so a timer
// can never fire for a buffer that has since been replaced.

use log::debug;
use rand::Rng;

use crate::txc_config::{DelaySpec, NodeConfig};
use crate::txc_error::{TxcError, TxcResult};
use crate::txc_interface::{
    Address, Message, SimContext, SimDuration, SimTime, TimerHandle, TimerKind,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AutomatonState {
    Idle,
    AwaitingProcessing,
    AwaitingTimeout,
}

/// Parameters the transitions depend on
#[derive(Debug, Clone, PartialEq)]
pub struct AutomatonConfig {
    pub timeout: SimDuration,
    pub loss_probability: f64,
    pub processing_delay: DelaySpec,
    /// `None` resends forever
    pub max_retransmissions: Option<u32>,
}

impl From<&NodeConfig> for AutomatonConfig {
    fn from(config: &NodeConfig) -> Self {
        Self {
            timeout: config.timeout,
            loss_probability: config.loss_probability,
            processing_delay: config.processing_delay.clone(),
            max_retransmissions: config.max_retransmissions,
        }
    }
}

/// Result of an arrival after the loss draw
#[derive(Debug, Clone, PartialEq)]
pub enum ArrivalOutcome {
    Lost,
    Accepted {
        latency: Option<SimDuration>,
        processing_delay: SimDuration,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Arrival {
    /// Timers that were still armed and got cancelled by this arrival
    pub cancelled: Vec<TimerKind>,
    pub outcome: ArrivalOutcome,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TimeoutOutcome {
    /// Copy of what went back on the wire, and the resend count so far
    Retransmitted { message: Message, attempt: u32 },
    /// Retry cap reached; the buffer was dropped
    GaveUp { message: Message, attempts: u32 },
}

pub struct ReliabilityAutomaton {
    address: Address,
    out_link: Address,
    config: AutomatonConfig,
    buffer: Option<Message>,
    processing_timer: Option<TimerHandle>,
    timeout_timer: Option<TimerHandle>,
    retransmissions: u32,
}

impl ReliabilityAutomaton {
    pub fn new(address: Address, out_link: Address, config: AutomatonConfig) -> Self {
        Self {
            address,
            out_link,
            config,
            buffer: None,
            processing_timer: None,
            timeout_timer: None,
            retransmissions: 0,
        }
    }

    pub fn state(&self) -> AutomatonState {
        if self.processing_timer.is_some() {
            AutomatonState::AwaitingProcessing
        } else if self.timeout_timer.is_some() {
            AutomatonState::AwaitingTimeout
        } else {
            AutomatonState::Idle
        }
    }

    pub fn buffer(&self) -> Option<&Message> {
        self.buffer.as_ref()
    }

    pub fn processing_timer(&self) -> Option<TimerHandle> {
        self.processing_timer
    }

    pub fn timeout_timer(&self) -> Option<TimerHandle> {
        self.timeout_timer
    }

    /// Resends of the current buffer
    pub fn retransmissions(&self) -> u32 {
        self.retransmissions
    }

    pub fn out_link(&self) -> Address {
        self.out_link
    }

    pub fn config(&self) -> &AutomatonConfig {
        &self.config
    }

    /// Arm the first processing timer without a prior arrival.
    ///
    /// This is how traffic starts; the loss draw does not apply.
    pub fn bootstrap(&mut self, ctx: &mut dyn SimContext, message: Message, at: SimTime) {
        self.cancel_timers(ctx);
        debug!(
            "node {}: bootstrap {} at {}",
            self.address,
            message.name(),
            at
        );
        self.buffer = Some(message);
        self.retransmissions = 0;
        self.processing_timer =
            Some(ctx.schedule_self_event(self.address, TimerKind::Processing, at));
    }

    /// An application message arrived from the network.
    pub fn on_message_arrived<R: Rng + ?Sized>(
        &mut self,
        ctx: &mut dyn SimContext,
        mut message: Message,
        rng: &mut R,
    ) -> Arrival {
        let cancelled = self.cancel_timers(ctx);
        let now = ctx.now();

        let draw: f64 = rng.gen();
        if draw < self.config.loss_probability {
            debug!("node {}: losing {}", self.address, message.name());
            self.buffer = None;
            self.retransmissions = 0;
            return Arrival {
                cancelled,
                outcome: ArrivalOutcome::Lost,
            };
        }

        let latency = message.latency_at(now);
        let delay = self.config.processing_delay.sample(rng);
        debug!(
            "node {}: {} arrived, starting {} secs processing",
            self.address,
            message.name(),
            delay
        );

        message.receive_time = Some(now);
        message.processing_delay = Some(delay);
        self.buffer = Some(message);
        self.retransmissions = 0;
        self.processing_timer =
            Some(ctx.schedule_self_event(self.address, TimerKind::Processing, now + delay));

        Arrival {
            cancelled,
            outcome: ArrivalOutcome::Accepted {
                latency,
                processing_delay: delay,
            },
        }
    }

    /// Processing finished: send the buffer and start waiting for progress.
    ///
    /// `prepare` turns the processed message into the one to send; it is
    /// where a node decides between forwarding and generating.
    pub fn on_processing_fired<F>(
        &mut self,
        ctx: &mut dyn SimContext,
        handle: TimerHandle,
        prepare: F,
    ) -> TxcResult<Message>
    where
        F: FnOnce(Message) -> Message,
    {
        if self.processing_timer != Some(handle) {
            return Err(self.unexpected(TimerKind::Processing, handle));
        }
        self.processing_timer = None;

        let processed = match self.buffer.take() {
            Some(message) => message,
            None => return Err(self.unexpected(TimerKind::Processing, handle)),
        };
        if let Some(stale) = self.timeout_timer.take() {
            ctx.cancel(stale);
        }

        let now = ctx.now();
        let mut outgoing = prepare(processed);
        outgoing.send_time = Some(now);
        debug!(
            "node {}: waiting period is over, sending {}",
            self.address,
            outgoing.name()
        );

        ctx.deliver(outgoing.clone(), self.out_link);
        self.buffer = Some(outgoing.clone());
        self.retransmissions = 0;
        self.timeout_timer = Some(ctx.schedule_self_event(
            self.address,
            TimerKind::Timeout,
            now + self.config.timeout,
        ));

        Ok(outgoing)
    }

    /// No progress within `timeout`: resend the same buffered message.
    pub fn on_timeout_fired(
        &mut self,
        ctx: &mut dyn SimContext,
        handle: TimerHandle,
    ) -> TxcResult<TimeoutOutcome> {
        if self.timeout_timer != Some(handle) {
            return Err(self.unexpected(TimerKind::Timeout, handle));
        }
        self.timeout_timer = None;

        if self.buffer.is_none() {
            return Err(self.unexpected(TimerKind::Timeout, handle));
        }

        if let Some(max) = self.config.max_retransmissions {
            if self.retransmissions >= max {
                let attempts = self.retransmissions;
                self.retransmissions = 0;
                if let Some(message) = self.buffer.take() {
                    debug!(
                        "node {}: giving up on {} after {} resends",
                        self.address,
                        message.name(),
                        attempts
                    );
                    return Ok(TimeoutOutcome::GaveUp { message, attempts });
                }
            }
        }

        let now = ctx.now();
        let copy = match self.buffer.as_mut() {
            Some(message) => {
                message.send_time = Some(now);
                message.clone()
            }
            None => return Err(self.unexpected(TimerKind::Timeout, handle)),
        };
        self.retransmissions += 1;
        debug!(
            "node {}: timeout reached, sending {} again (attempt {})",
            self.address,
            copy.name(),
            self.retransmissions
        );

        ctx.deliver(copy.clone(), self.out_link);
        self.timeout_timer = Some(ctx.schedule_self_event(
            self.address,
            TimerKind::Timeout,
            now + self.config.timeout,
        ));

        Ok(TimeoutOutcome::Retransmitted {
            message: copy,
            attempt: self.retransmissions,
        })
    }

    // cancelling an unarmed timer is a no-op
    fn cancel_timers(&mut self, ctx: &mut dyn SimContext) -> Vec<TimerKind> {
        let mut cancelled = Vec::new();
        if let Some(handle) = self.timeout_timer.take() {
            ctx.cancel(handle);
            cancelled.push(TimerKind::Timeout);
        }
        if let Some(handle) = self.processing_timer.take() {
            ctx.cancel(handle);
            cancelled.push(TimerKind::Processing);
        }
        cancelled
    }

    fn unexpected(&self, kind: TimerKind, handle: TimerHandle) -> TxcError {
        TxcError::UnexpectedEvent {
            node: self.address,
            kind,
            handle,
        }
    }
}
