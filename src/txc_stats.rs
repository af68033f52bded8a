// Per-node statistics
//
// The collector only accumulates while the simulation runs. `summarize` reads
// the final accumulators and never changes them, so it can be called any
// number of times at the end of a run.

use std::io::{self, Write};

use serde::Serialize;

use crate::txc_interface::{Address, SimDuration, SimTime};

// ============================================================================
// Running Distribution
// ============================================================================

/// Running min/max/mean/stddev (Welford's update)
#[derive(Debug, Clone, Default)]
pub struct Distribution {
    count: u64,
    min: f64,
    max: f64,
    mean: f64,
    m2: f64,
}

impl Distribution {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn collect(&mut self, value: f64) {
        if self.count == 0 {
            self.min = value;
            self.max = value;
        } else {
            self.min = self.min.min(value);
            self.max = self.max.max(value);
        }
        self.count += 1;
        let delta = value - self.mean;
        self.mean += delta / self.count as f64;
        self.m2 += delta * (value - self.mean);
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn summarize(&self) -> DistributionSummary {
        if self.count == 0 {
            return DistributionSummary::default();
        }
        // sample standard deviation
        let stddev = if self.count > 1 {
            (self.m2 / (self.count - 1) as f64).sqrt()
        } else {
            0.0
        };
        DistributionSummary {
            count: self.count,
            min: self.min,
            max: self.max,
            mean: self.mean,
            stddev,
        }
    }
}

/// Scalars reported for a distribution; all zero when nothing was collected
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct DistributionSummary {
    pub count: u64,
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub stddev: f64,
}

// ============================================================================
// Time Series
// ============================================================================

/// `(time, value)` samples in recording order
#[derive(Debug, Clone, Default)]
pub struct TimeSeries {
    samples: Vec<(SimTime, f64)>,
}

impl TimeSeries {
    pub fn record(&mut self, time: SimTime, value: f64) {
        self.samples.push((time, value));
    }

    pub fn samples(&self) -> &[(SimTime, f64)] {
        &self.samples
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn write_csv<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        writeln!(writer, "time,value")?;
        for (time, value) in &self.samples {
            writeln!(writer, "{},{}", time, value)?;
        }
        Ok(())
    }
}

// ============================================================================
// Stats Collector
// ============================================================================

#[derive(Debug, Clone, Default)]
pub struct StatsCollector {
    sent: u64,
    retransmissions: u64,
    received: u64,
    lost: u64,
    delivered: u64,
    gave_up: u64,
    processing_delay: Distribution,
    processing_delay_series: TimeSeries,
    latency: Distribution,
    latency_series: TimeSeries,
}

impl StatsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every transmission counts, first sends and resends alike
    pub fn record_sent(&mut self, retransmission: bool) {
        self.sent += 1;
        if retransmission {
            self.retransmissions += 1;
        }
    }

    /// An arrival that survived the loss draw
    pub fn record_received(&mut self, now: SimTime, latency: Option<SimDuration>) {
        self.received += 1;
        if let Some(latency) = latency {
            self.latency.collect(latency);
            self.latency_series.record(now, latency);
        }
    }

    pub fn record_lost(&mut self) {
        self.lost += 1;
    }

    pub fn record_delivered(&mut self) {
        self.delivered += 1;
    }

    pub fn record_gave_up(&mut self) {
        self.gave_up += 1;
    }

    pub fn record_processing_delay(&mut self, now: SimTime, delay: SimDuration) {
        self.processing_delay.collect(delay);
        self.processing_delay_series.record(now, delay);
    }

    pub fn sent_count(&self) -> u64 {
        self.sent
    }

    pub fn received_count(&self) -> u64 {
        self.received
    }

    pub fn processing_delay_series(&self) -> &TimeSeries {
        &self.processing_delay_series
    }

    pub fn latency_series(&self) -> &TimeSeries {
        &self.latency_series
    }

    pub fn summarize(&self, address: Address) -> NodeReport {
        NodeReport {
            address,
            sent_count: self.sent,
            retransmission_count: self.retransmissions,
            received_count: self.received,
            lost_count: self.lost,
            delivered_count: self.delivered,
            gave_up_count: self.gave_up,
            processing_delay: self.processing_delay.summarize(),
            latency: self.latency.summarize(),
        }
    }
}

/// End-of-run scalars for one node
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NodeReport {
    pub address: Address,
    pub sent_count: u64,
    pub retransmission_count: u64,
    pub received_count: u64,
    pub lost_count: u64,
    pub delivered_count: u64,
    pub gave_up_count: u64,
    pub processing_delay: DistributionSummary,
    pub latency: DistributionSummary,
}
