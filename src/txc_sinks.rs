//! Event sinks for display and analysis

use std::cell::RefCell;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::rc::Rc;

use log::info;

use crate::txc_interface::{Address, Event, EventSink, SimTime};

// several nodes can feed one sink
impl<S: EventSink> EventSink for Rc<RefCell<S>> {
    fn log(&mut self, time: SimTime, node: Address, event: Event) {
        self.borrow_mut().log(time, node, event);
    }
}

// ============================================================================
// Logging Sink
// ============================================================================

/// Writes one line per event through the `log` facade
pub struct LogEventSink;

impl EventSink for LogEventSink {
    fn log(&mut self, time: SimTime, node: Address, event: Event) {
        match event {
            Event::Bootstrapped { seq, at } => {
                info!("{:>10.3} {:>4} Bootstrapped     m-{} first send at {}", time, node, seq, at)
            }
            Event::ProcessingStarted { seq, delay } => {
                info!("{:>10.3} {:>4} Processing       m-{} for {:.3}s", time, node, seq, delay)
            }
            Event::Sent {
                seq,
                to,
                destination,
            } => info!(
                "{:>10.3} {:>4} Sent             m-{} to:{} dest:{}",
                time, node, seq, to, destination
            ),
            Event::Retransmitted { seq, to, attempt } => info!(
                "{:>10.3} {:>4} Retransmitted    m-{} to:{} attempt:{}",
                time, node, seq, to, attempt
            ),
            Event::Arrived { seq, from, latency } => info!(
                "{:>10.3} {:>4} Arrived          m-{} from:{} latency:{:.3}",
                time, node, seq, from, latency
            ),
            Event::Lost { seq, from } => {
                info!("{:>10.3} {:>4} Lost             m-{} from:{}", time, node, seq, from)
            }
            Event::Delivered { seq, source, hops } => info!(
                "{:>10.3} {:>4} Delivered        m-{} source:{} hops:{}",
                time, node, seq, source, hops
            ),
            Event::GaveUp { seq, attempts } => info!(
                "{:>10.3} {:>4} GaveUp           m-{} after {} resends",
                time, node, seq, attempts
            ),
            Event::TimerCancelled { kind } => {
                info!("{:>10.3} {:>4} TimerCancelled   {}", time, node, kind.as_str())
            }
        }
    }
}

// ============================================================================
// CSV Event Sink
// ============================================================================

/// CSV event sink for structured data export
pub struct CsvEventSink<W: Write> {
    writer: W,
}

impl CsvEventSink<BufWriter<File>> {
    pub fn create<P: AsRef<Path>>(path: P) -> std::io::Result<Self> {
        Self::new(BufWriter::new(File::create(path)?))
    }
}

impl<W: Write> CsvEventSink<W> {
    pub fn new(mut writer: W) -> std::io::Result<Self> {
        writeln!(writer, "time,node,event,seq,peer,value")?;
        Ok(Self { writer })
    }

    pub fn flush(&mut self) -> std::io::Result<()> {
        self.writer.flush()
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write> EventSink for CsvEventSink<W> {
    fn log(&mut self, time: SimTime, node: Address, event: Event) {
        let name = event.kind_name();
        let result = match event {
            Event::Bootstrapped { seq, at } => {
                writeln!(self.writer, "{},{},{},{},,{}", time, node, name, seq, at)
            }
            Event::ProcessingStarted { seq, delay } => {
                writeln!(self.writer, "{},{},{},{},,{}", time, node, name, seq, delay)
            }
            Event::Sent { seq, to, .. } => {
                writeln!(self.writer, "{},{},{},{},{},", time, node, name, seq, to)
            }
            Event::Retransmitted { seq, to, attempt } => writeln!(
                self.writer,
                "{},{},{},{},{},{}",
                time, node, name, seq, to, attempt
            ),
            Event::Arrived { seq, from, latency } => writeln!(
                self.writer,
                "{},{},{},{},{},{}",
                time, node, name, seq, from, latency
            ),
            Event::Lost { seq, from } => {
                writeln!(self.writer, "{},{},{},{},{},", time, node, name, seq, from)
            }
            Event::Delivered { seq, source, hops } => writeln!(
                self.writer,
                "{},{},{},{},{},{}",
                time, node, name, seq, source, hops
            ),
            Event::GaveUp { seq, attempts } => {
                writeln!(self.writer, "{},{},{},{},,{}", time, node, name, seq, attempts)
            }
            Event::TimerCancelled { kind } => {
                writeln!(self.writer, "{},{},{},,,{}", time, node, name, kind.as_str())
            }
        };

        if let Err(e) = result {
            log::warn!("Error writing event CSV: {}", e);
        }
    }
}

// ============================================================================
// Collector Event Sink (In-Memory)
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct EventRecord {
    pub time: SimTime,
    pub node: Address,
    pub event: Event,
}

/// Collects events in memory for programmatic analysis
#[derive(Default)]
pub struct CollectorEventSink {
    pub events: Vec<EventRecord>,
}

impl CollectorEventSink {
    pub fn new() -> Self {
        Self { events: Vec::new() }
    }

    pub fn for_node(&self, node: Address) -> impl Iterator<Item = &EventRecord> {
        self.events.iter().filter(move |r| r.node == node)
    }

    pub fn count(&self, kind_name: &str) -> usize {
        self.events
            .iter()
            .filter(|r| r.event.kind_name() == kind_name)
            .count()
    }
}

impl EventSink for CollectorEventSink {
    fn log(&mut self, time: SimTime, node: Address, event: Event) {
        self.events.push(EventRecord { time, node, event });
    }
}

// ============================================================================
// Multi Event Sink
// ============================================================================

/// Fans every event out to several sinks
#[derive(Default)]
pub struct MultiEventSink {
    sinks: Vec<Box<dyn EventSink>>,
}

impl MultiEventSink {
    pub fn new() -> Self {
        Self { sinks: Vec::new() }
    }

    pub fn with(mut self, sink: Box<dyn EventSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}

impl EventSink for MultiEventSink {
    fn log(&mut self, time: SimTime, node: Address, event: Event) {
        if let Some((last, rest)) = self.sinks.split_last_mut() {
            for sink in rest {
                sink.log(time, node, event.clone());
            }
            last.log(time, node, event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::txc_interface::TimerKind;

    #[test]
    fn test_collector_counts() {
        let mut sink = CollectorEventSink::new();
        sink.log(1.0, 0, Event::Lost { seq: 1, from: 1 });
        sink.log(2.0, 1, Event::Lost { seq: 2, from: 0 });
        sink.log(3.0, 1, Event::TimerCancelled { kind: TimerKind::Timeout });

        assert_eq!(sink.count("Lost"), 2);
        assert_eq!(sink.for_node(1).count(), 2);
    }

    #[test]
    fn test_shared_sink_through_multi() {
        let shared = Rc::new(RefCell::new(CollectorEventSink::new()));
        let mut multi = MultiEventSink::new()
            .with(Box::new(shared.clone()))
            .with(Box::new(shared.clone()));

        multi.log(0.5, 3, Event::Sent { seq: 1, to: 4, destination: 5 });
        assert_eq!(shared.borrow().events.len(), 2);
    }

    #[test]
    fn test_csv_rows() {
        let mut sink = CsvEventSink::new(Vec::new()).unwrap();
        sink.log(5.0, 0, Event::Sent { seq: 1, to: 1, destination: 1 });
        sink.log(15.0, 0, Event::Retransmitted { seq: 1, to: 1, attempt: 1 });

        let text = String::from_utf8(sink.into_inner()).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "time,node,event,seq,peer,value");
        assert_eq!(lines[1], "5,0,Sent,1,1,");
        assert_eq!(lines[2], "15,0,Retransmitted,1,1,1");
    }
}
