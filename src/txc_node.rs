use log::trace;
use rand::Rng;

use crate::txc_automaton::{
    Arrival, ArrivalOutcome, AutomatonConfig, AutomatonState, ReliabilityAutomaton,
    TimeoutOutcome,
};
use crate::txc_config::{ForwardMode, NodeConfig};
use crate::txc_error::TxcResult;
use crate::txc_interface::{
    Address, Event, EventSink, Message, NodeEvent, NoOpSink, SimContext, TimerHandle, TimerKind,
};
use crate::txc_message::MessageFactory;
use crate::txc_stats::{NodeReport, StatsCollector};

/// One participant: the reliability automaton plus addressing, statistics
/// and display hooks around it.
pub struct TxcNode {
    config: NodeConfig,
    automaton: ReliabilityAutomaton,
    factory: MessageFactory,
    stats: StatsCollector,
    event_sink: Box<dyn EventSink>,
}

impl TxcNode {
    /// Create a new node with default NoOpSink (zero overhead)
    pub fn new(config: NodeConfig, out_link: Address) -> TxcResult<Self> {
        Self::new_with_sink(config, out_link, Box::new(NoOpSink))
    }

    /// Create a new node with a custom event sink for display/analysis
    pub fn new_with_sink(
        config: NodeConfig,
        out_link: Address,
        event_sink: Box<dyn EventSink>,
    ) -> TxcResult<Self> {
        config.validate()?;
        Ok(Self {
            automaton: ReliabilityAutomaton::new(
                config.address,
                out_link,
                AutomatonConfig::from(&config),
            ),
            factory: MessageFactory::new(config.address, config.destination_address),
            stats: StatsCollector::new(),
            event_sink,
            config,
        })
    }

    pub fn address(&self) -> Address {
        self.config.address
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    pub fn state(&self) -> AutomatonState {
        self.automaton.state()
    }

    pub fn buffer(&self) -> Option<&Message> {
        self.automaton.buffer()
    }

    pub fn sequence_counter(&self) -> u64 {
        self.factory.sequence_counter()
    }

    pub fn stats(&self) -> &StatsCollector {
        &self.stats
    }

    pub fn timeout_timer_armed(&self) -> bool {
        self.automaton.timeout_timer().is_some()
    }

    pub fn processing_timer_armed(&self) -> bool {
        self.automaton.processing_timer().is_some()
    }

    /// Simulation start: bootstrap traffic if this node is a source.
    pub fn initialize(&mut self, ctx: &mut dyn SimContext) {
        if !self.config.send_msg_on_init {
            return;
        }
        let message = self.factory.generate();
        let at = self.config.startup_time;
        self.emit(
            ctx.now(),
            Event::Bootstrapped {
                seq: message.seq,
                at,
            },
        );
        self.automaton.bootstrap(ctx, message, at);
    }

    pub fn on_event<R: Rng + ?Sized>(
        &mut self,
        ctx: &mut dyn SimContext,
        event: NodeEvent,
        rng: &mut R,
    ) -> TxcResult<()> {
        match event {
            NodeEvent::TimerFired { kind, handle } => self.on_timer_fired(ctx, kind, handle),
            NodeEvent::MessageArrived(message) => {
                self.on_message_arrived(ctx, message, rng);
                Ok(())
            }
        }
    }

    pub fn on_timer_fired(
        &mut self,
        ctx: &mut dyn SimContext,
        kind: TimerKind,
        handle: TimerHandle,
    ) -> TxcResult<()> {
        trace!("node {}: {} timer {} fired", self.address(), kind.as_str(), handle);
        match kind {
            TimerKind::Processing => self.finish_processing(ctx, handle),
            TimerKind::Timeout => self.retransmit(ctx, handle),
        }
    }

    pub fn on_message_arrived<R: Rng + ?Sized>(
        &mut self,
        ctx: &mut dyn SimContext,
        message: Message,
        rng: &mut R,
    ) {
        let now = ctx.now();
        let seq = message.seq;
        let from = message.source;
        let Arrival { cancelled, outcome } = self.automaton.on_message_arrived(ctx, message, rng);

        for kind in cancelled {
            self.emit(now, Event::TimerCancelled { kind });
        }

        match outcome {
            ArrivalOutcome::Lost => {
                self.stats.record_lost();
                self.emit(now, Event::Lost { seq, from });
            }
            ArrivalOutcome::Accepted {
                latency,
                processing_delay,
            } => {
                self.stats.record_received(now, latency);
                self.stats.record_processing_delay(now, processing_delay);
                self.emit(
                    now,
                    Event::Arrived {
                        seq,
                        from,
                        latency: latency.unwrap_or(0.0),
                    },
                );
                self.emit(
                    now,
                    Event::ProcessingStarted {
                        seq,
                        delay: processing_delay,
                    },
                );
            }
        }
    }

    fn finish_processing(&mut self, ctx: &mut dyn SimContext, handle: TimerHandle) -> TxcResult<()> {
        let address = self.config.address;
        let mode = self.config.forward_mode;
        let factory = &mut self.factory;
        let stats = &mut self.stats;
        let mut delivered = None;

        let sent = self.automaton.on_processing_fired(ctx, handle, |processed| {
            // a message that never went on the wire is the bootstrap one
            if processed.send_time.is_none() {
                return processed;
            }
            if processed.destination == address {
                stats.record_delivered();
                delivered = Some((processed.seq, processed.source, processed.hop_count));
            }
            match mode {
                ForwardMode::Regenerate => factory.generate(),
                ForwardMode::Relay if processed.destination == address => factory.generate(),
                ForwardMode::Relay => Message {
                    hop_count: processed.hop_count + 1,
                    ..processed
                },
            }
        })?;

        let now = ctx.now();
        if let Some((seq, source, hops)) = delivered {
            self.emit(now, Event::Delivered { seq, source, hops });
        }
        self.stats.record_sent(false);
        self.emit(
            now,
            Event::Sent {
                seq: sent.seq,
                to: self.automaton.out_link(),
                destination: sent.destination,
            },
        );
        Ok(())
    }

    fn retransmit(&mut self, ctx: &mut dyn SimContext, handle: TimerHandle) -> TxcResult<()> {
        let now = ctx.now();
        match self.automaton.on_timeout_fired(ctx, handle)? {
            TimeoutOutcome::Retransmitted { message, attempt } => {
                self.stats.record_sent(true);
                self.emit(
                    now,
                    Event::Retransmitted {
                        seq: message.seq,
                        to: self.automaton.out_link(),
                        attempt,
                    },
                );
            }
            TimeoutOutcome::GaveUp { message, attempts } => {
                self.stats.record_gave_up();
                self.emit(
                    now,
                    Event::GaveUp {
                        seq: message.seq,
                        attempts,
                    },
                );
            }
        }
        Ok(())
    }

    /// End-of-run scalars; read-only
    pub fn report(&self) -> NodeReport {
        self.stats.summarize(self.config.address)
    }

    fn emit(&mut self, time: f64, event: Event) {
        self.event_sink.log(time, self.config.address, event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::txc_config::DelaySpec;
    use crate::txc_sinks::CollectorEventSink;
    use crate::txc_testing::RecordingContext;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn node_config(address: Address, destination: Address) -> NodeConfig {
        let mut config = NodeConfig::new(address);
        config.destination_address = destination;
        config.loss_probability = 0.0;
        config.processing_delay = DelaySpec::Fixed(1.0);
        config
    }

    fn fire_processing(node: &mut TxcNode, ctx: &mut RecordingContext) {
        let timer = ctx.pending_of(TimerKind::Processing)[0].clone();
        ctx.now = timer.at;
        ctx.fire(timer.handle);
        node.on_timer_fired(ctx, TimerKind::Processing, timer.handle)
            .unwrap();
    }

    fn fire_timeout(node: &mut TxcNode, ctx: &mut RecordingContext) {
        let timer = ctx.pending_of(TimerKind::Timeout)[0].clone();
        ctx.now = timer.at;
        ctx.fire(timer.handle);
        node.on_timer_fired(ctx, TimerKind::Timeout, timer.handle).unwrap();
    }

    #[test]
    fn test_invalid_config_fails_fast() {
        let mut config = NodeConfig::new(0);
        config.loss_probability = 2.0;
        assert!(TxcNode::new(config, 1).is_err());
    }

    #[test]
    fn test_no_bootstrap_without_flag() {
        let mut ctx = RecordingContext::at(0.0);
        let mut node = TxcNode::new(node_config(0, 1), 1).unwrap();
        node.initialize(&mut ctx);
        assert!(ctx.scheduled.is_empty());
        assert_eq!(node.state(), AutomatonState::Idle);
    }

    #[test]
    fn test_bootstrap_sends_generated_message() {
        let mut ctx = RecordingContext::at(0.0);
        let mut config = node_config(0, 1);
        config.send_msg_on_init = true;
        let mut node = TxcNode::new(config, 1).unwrap();

        node.initialize(&mut ctx);
        assert_eq!(ctx.last_scheduled().unwrap().at, 5.0);
        assert_eq!(node.sequence_counter(), 1);

        fire_processing(&mut node, &mut ctx);
        let (sent, to) = &ctx.delivered[0];
        assert_eq!(*to, 1);
        assert_eq!(sent.seq, 1);
        assert_eq!(sent.source, 0);
        assert_eq!(sent.destination, 1);
        assert_eq!(sent.send_time, Some(5.0));
        assert_eq!(sent.hop_count, 0);
        assert_eq!(node.report().sent_count, 1);
        // still the same message, no second generation
        assert_eq!(node.sequence_counter(), 1);
    }

    #[test]
    fn test_relay_forwards_foreign_message() {
        let mut rng = StdRng::seed_from_u64(1);
        let mut ctx = RecordingContext::at(0.0);
        let mut node = TxcNode::new(node_config(1, 0), 2).unwrap();

        let mut msg = Message::new(8, 0, 3);
        msg.send_time = Some(0.0);
        node.on_message_arrived(&mut ctx, msg, &mut rng);
        fire_processing(&mut node, &mut ctx);

        let (forwarded, to) = &ctx.delivered[0];
        assert_eq!(*to, 2);
        assert_eq!(forwarded.seq, 8);
        assert_eq!(forwarded.source, 0);
        assert_eq!(forwarded.destination, 3);
        assert_eq!(forwarded.hop_count, 1);
        assert_eq!(forwarded.send_time, Some(1.0));
        assert_eq!(node.sequence_counter(), 0);
        assert_eq!(node.report().delivered_count, 0);
    }

    #[test]
    fn test_relay_replies_when_addressed() {
        let mut rng = StdRng::seed_from_u64(1);
        let mut ctx = RecordingContext::at(0.0);
        let mut node = TxcNode::new(node_config(1, 0), 0).unwrap();

        let mut msg = Message::new(8, 0, 1);
        msg.send_time = Some(0.0);
        node.on_message_arrived(&mut ctx, msg, &mut rng);
        fire_processing(&mut node, &mut ctx);

        let (reply, _) = &ctx.delivered[0];
        assert_eq!(reply.seq, 1);
        assert_eq!(reply.source, 1);
        assert_eq!(reply.destination, 0);
        assert_eq!(node.report().delivered_count, 1);
    }

    #[test]
    fn test_regenerate_mode_always_generates() {
        let mut rng = StdRng::seed_from_u64(1);
        let mut ctx = RecordingContext::at(0.0);
        let mut config = node_config(1, 0);
        config.forward_mode = ForwardMode::Regenerate;
        let mut node = TxcNode::new(config, 2).unwrap();

        let mut msg = Message::new(8, 0, 3);
        msg.send_time = Some(0.0);
        node.on_message_arrived(&mut ctx, msg, &mut rng);
        fire_processing(&mut node, &mut ctx);

        let (sent, _) = &ctx.delivered[0];
        assert_eq!(sent.seq, 1);
        assert_eq!(sent.source, 1);
        assert_eq!(node.sequence_counter(), 1);
    }

    #[test]
    fn test_loss_never_touches_sequence_counter() {
        let mut rng = StdRng::seed_from_u64(9);
        let mut ctx = RecordingContext::at(0.0);
        let mut config = node_config(1, 0);
        config.loss_probability = 0.5;
        config.forward_mode = ForwardMode::Regenerate;
        let mut node = TxcNode::new(config, 0).unwrap();

        let mut generated = Vec::new();
        for i in 0..200 {
            ctx.now = i as f64 * 3.0;
            let mut msg = Message::new(1000 + i, 0, 1);
            msg.send_time = Some(ctx.now);
            node.on_message_arrived(&mut ctx, msg, &mut rng);
            if node.processing_timer_armed() {
                fire_processing(&mut node, &mut ctx);
                generated.push(ctx.delivered.last().unwrap().0.seq);
            }
        }

        let report = node.report();
        assert!(report.lost_count > 0);
        assert_eq!(report.lost_count + report.received_count, 200);
        // strictly increasing, no gaps
        let expected: Vec<u64> = (1..=generated.len() as u64).collect();
        assert_eq!(generated, expected);
        assert_eq!(node.sequence_counter(), report.received_count);
    }

    #[test]
    fn test_retransmission_counts_and_events() {
        let mut ctx = RecordingContext::at(0.0);
        let mut config = node_config(0, 1);
        config.send_msg_on_init = true;
        let mut node =
            TxcNode::new_with_sink(config, 1, Box::new(CollectorEventSink::new())).unwrap();

        node.initialize(&mut ctx);
        fire_processing(&mut node, &mut ctx);
        fire_timeout(&mut node, &mut ctx);
        fire_timeout(&mut node, &mut ctx);

        assert_eq!(ctx.now, 25.0);
        let seqs: Vec<u64> = ctx.delivered.iter().map(|(m, _)| m.seq).collect();
        assert_eq!(seqs, vec![1, 1, 1]);
        let report = node.report();
        assert_eq!(report.sent_count, 3);
        assert_eq!(report.retransmission_count, 2);
        assert!(node.timeout_timer_armed());
        assert!(node.buffer().is_some());
    }

    #[test]
    fn test_unexpected_timer_is_an_error() {
        let mut ctx = RecordingContext::at(0.0);
        let mut node = TxcNode::new(node_config(0, 1), 1).unwrap();
        let result = node.on_event(
            &mut ctx,
            NodeEvent::TimerFired {
                kind: TimerKind::Timeout,
                handle: TimerHandle::new(3),
            },
            &mut StdRng::seed_from_u64(0),
        );
        assert!(result.is_err());
    }
}
