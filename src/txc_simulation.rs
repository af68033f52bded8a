// Simulation driver
//
// Builds one `TxcNode` per configured address, wires each to its next hop and
// runs the event queue until it drains or the next event lies past the time
// limit. A single seeded RNG feeds every loss draw and delay sample, so a run
// is reproducible from `seed_used`.

use std::cell::RefCell;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::Path;
use std::rc::Rc;

use indexmap::IndexMap;
use log::{debug, info};
use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::txc_config::SimConfig;
use crate::txc_error::{ConfigError, TxcError, TxcResult};
use crate::txc_interface::{Address, EventSink, NoOpSink, SimTime};
use crate::txc_node::TxcNode;
use crate::txc_scheduler::{EventQueue, Scheduled, SchedulerContext};
use crate::txc_sinks::{CsvEventSink, LogEventSink, MultiEventSink};
use crate::txc_stats::{NodeReport, TimeSeries};

// ============================================================================
// Result
// ============================================================================

#[derive(Debug, Clone)]
pub struct SimResult {
    pub seed_used: u64,
    pub end_time: SimTime,
    pub events_processed: u64,
    pub reports: Vec<NodeReport>,
}

impl SimResult {
    pub fn report(&self, address: Address) -> Option<&NodeReport> {
        self.reports.iter().find(|r| r.address == address)
    }

    pub fn print_summary(&self) {
        println!("\n╔════════════════════════════════════════════════════════╗");
        println!("║    STORE-AND-FORWARD SIMULATION RESULTS                ║");
        println!("╚════════════════════════════════════════════════════════╝\n");

        println!("Seed: {}", self.seed_used);
        println!("End time: {:.3}s", self.end_time);
        println!("Events processed: {}", self.events_processed);
        println!();

        let total_sent: u64 = self.reports.iter().map(|r| r.sent_count).sum();
        let total_lost: u64 = self.reports.iter().map(|r| r.lost_count).sum();
        let total_delivered: u64 = self.reports.iter().map(|r| r.delivered_count).sum();

        println!("═══ Totals ═══");
        println!("  Sent: {} ({} resends)", total_sent,
            self.reports.iter().map(|r| r.retransmission_count).sum::<u64>());
        println!("  Lost: {}", total_lost);
        println!("  Delivered: {}", total_delivered);
        if total_sent > 0 {
            println!("  Loss Rate: {:.1}%", total_lost as f64 / total_sent as f64 * 100.0);
        }
        println!();

        println!("═══ Per Node ═══");
        for r in &self.reports {
            println!("  Node {}:", r.address);
            println!("    sent={} resent={} received={} lost={} delivered={} gave_up={}",
                r.sent_count,
                r.retransmission_count,
                r.received_count,
                r.lost_count,
                r.delivered_count,
                r.gave_up_count);
            let d = &r.processing_delay;
            println!("    processing delay: n={} min={:.3} max={:.3} mean={:.3} stddev={:.3}",
                d.count, d.min, d.max, d.mean, d.stddev);
            let l = &r.latency;
            println!("    latency:          n={} min={:.3} max={:.3} mean={:.3} stddev={:.3}",
                l.count, l.min, l.max, l.mean, l.stddev);
        }
        println!();
    }
}

// ============================================================================
// Simulation
// ============================================================================

type SharedCsvSink = Rc<RefCell<CsvEventSink<BufWriter<File>>>>;

pub struct Simulation {
    config: SimConfig,
    seed: u64,
    rng: StdRng,
    queue: EventQueue,
    nodes: IndexMap<Address, TxcNode>,
    now: SimTime,
    events_processed: u64,
    // events dispatched at `now` so far
    instant_events: u64,
    events_csv: Option<SharedCsvSink>,
}

impl Simulation {
    /// Build with the sinks chosen by `output`: the logger when
    /// `log_events` is set, a shared CSV trace when `events_csv` is set.
    pub fn new(config: SimConfig) -> TxcResult<Self> {
        config.validate()?;
        let log_events = config.output.log_events;
        let events_csv: Option<SharedCsvSink> = match &config.output.events_csv {
            Some(path) => {
                if let Some(parent) = Path::new(path).parent() {
                    fs::create_dir_all(parent)?;
                }
                Some(Rc::new(RefCell::new(CsvEventSink::create(path)?)))
            }
            None => None,
        };

        let csv = events_csv.clone();
        let mut sim = Self::new_with_sinks(config, move |_| -> Box<dyn EventSink> {
            let mut sinks = MultiEventSink::new();
            if log_events {
                sinks = sinks.with(Box::new(LogEventSink));
            }
            if let Some(csv) = &csv {
                sinks = sinks.with(Box::new(csv.clone()));
            }
            if sinks.is_empty() {
                Box::new(NoOpSink)
            } else {
                Box::new(sinks)
            }
        })?;
        sim.events_csv = events_csv;
        Ok(sim)
    }

    /// Build with one sink per node from `make_sink`. Every node is
    /// initialized at time 0 before this returns.
    pub fn new_with_sinks<F>(config: SimConfig, mut make_sink: F) -> TxcResult<Self>
    where
        F: FnMut(Address) -> Box<dyn EventSink>,
    {
        config.validate()?;
        let links = config.out_links()?;
        let seed = config.resolve_seed();

        let mut nodes = IndexMap::with_capacity(config.nodes.len());
        for node_config in &config.nodes {
            let address = node_config.address;
            let out_link = links
                .get(&address)
                .copied()
                .ok_or(ConfigError::MissingLink(address))?;
            let node = TxcNode::new_with_sink(node_config.clone(), out_link, make_sink(address))?;
            nodes.insert(address, node);
        }

        info!(
            "simulation: {} nodes, seed {}, time limit {}s",
            nodes.len(),
            seed,
            config.sim_time_limit
        );

        let mut sim = Self {
            rng: StdRng::seed_from_u64(seed),
            seed,
            queue: EventQueue::new(),
            nodes,
            now: 0.0,
            events_processed: 0,
            instant_events: 0,
            events_csv: None,
            config,
        };

        let link_delay = sim.config.link_delay;
        for node in sim.nodes.values_mut() {
            let mut ctx = SchedulerContext::new(&mut sim.queue, 0.0, link_delay);
            node.initialize(&mut ctx);
        }

        Ok(sim)
    }

    pub fn now(&self) -> SimTime {
        self.now
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    pub fn events_processed(&self) -> u64 {
        self.events_processed
    }

    pub fn node(&self, address: Address) -> Option<&TxcNode> {
        self.nodes.get(&address)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &TxcNode> {
        self.nodes.values()
    }

    /// Dispatch the next event. Returns false once the queue is drained or
    /// the next event is past the time limit, and `TxcError::Stalled` once
    /// more than `max_events_per_instant` events share one timestamp.
    pub fn step(&mut self) -> TxcResult<bool> {
        match self.queue.peek_time() {
            Some(at) if at <= self.config.sim_time_limit => {}
            _ => return Ok(false),
        }
        let Some(Scheduled { at, target, event }) = self.queue.pop_next() else {
            return Ok(false);
        };

        if at > self.now {
            self.instant_events = 0;
        }
        self.instant_events += 1;
        if self.instant_events > self.config.max_events_per_instant {
            return Err(TxcError::Stalled {
                time: at,
                events: self.instant_events - 1,
            });
        }

        self.now = at;
        let node = self
            .nodes
            .get_mut(&target)
            .ok_or(TxcError::UnknownNode(target))?;
        let mut ctx = SchedulerContext::new(&mut self.queue, at, self.config.link_delay);
        node.on_event(&mut ctx, event, &mut self.rng)?;
        self.events_processed += 1;
        Ok(true)
    }

    pub fn run(mut self) -> TxcResult<SimResult> {
        while self.step()? {}

        debug!(
            "simulation stopped at {}s after {} events",
            self.now, self.events_processed
        );

        if let Some(csv) = &self.events_csv {
            csv.borrow_mut().flush()?;
        }
        if let Some(dir) = self.config.output.csv_dir.clone() {
            self.export_csv(&dir)?;
        }

        Ok(self.build_result())
    }

    /// Write each node's processing delay and latency series as CSV files
    pub fn export_csv<P: AsRef<Path>>(&self, dir: P) -> TxcResult<()> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir)?;
        for node in self.nodes.values() {
            let stats = node.stats();
            let address = node.address();
            write_series(dir, address, "processing_delay", stats.processing_delay_series())?;
            write_series(dir, address, "latency", stats.latency_series())?;
        }
        info!("wrote time series for {} nodes to {}", self.nodes.len(), dir.display());
        Ok(())
    }

    fn build_result(self) -> SimResult {
        SimResult {
            seed_used: self.seed,
            end_time: self.now,
            events_processed: self.events_processed,
            reports: self.nodes.values().map(TxcNode::report).collect(),
        }
    }
}

fn write_series(dir: &Path, address: Address, name: &str, series: &TimeSeries) -> TxcResult<()> {
    let path = dir.join(format!("node{}_{}.csv", address, name));
    let mut writer = BufWriter::new(File::create(path)?);
    series.write_csv(&mut writer)?;
    writer.flush()?;
    Ok(())
}
