// Node and simulation configuration
//
// Everything here can be read from a scenario YAML file. Missing fields fall
// back to the defaults below, so a scenario only spells out what it changes.

use std::fs;
use std::path::Path;

use indexmap::IndexMap;
use rand::Rng;
use rand_distr::{Distribution, Exp, Normal};
use serde::{Deserialize, Serialize};

use crate::txc_error::{ConfigError, TxcResult};
use crate::txc_interface::{Address, SimDuration, SimTime};

pub const DEFAULT_TIMEOUT: SimDuration = 10.0;
pub const DEFAULT_LOSS_PROBABILITY: f64 = 0.1;
pub const DEFAULT_PROCESSING_DELAY: SimDuration = 1.0;
pub const DEFAULT_STARTUP_TIME: SimTime = 5.0;
pub const DEFAULT_SIM_TIME_LIMIT: SimTime = 1000.0;
pub const DEFAULT_MAX_EVENTS_PER_INSTANT: u64 = 100_000;

// ============================================================================
// Processing Delay
// ============================================================================

/// Processing delay: a fixed duration or a distribution sampled per arrival
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "DelayRepr", into = "TaggedDelay")]
pub enum DelaySpec {
    Fixed(SimDuration),
    Uniform { min: SimDuration, max: SimDuration },
    Exponential { mean: SimDuration },
    /// Negative draws are truncated to zero
    Normal { mean: SimDuration, stddev: SimDuration },
}

// `processing_delay: 1.5` or `processing_delay: { dist: uniform, min: 1, max: 2 }`
#[derive(Deserialize)]
#[serde(untagged)]
enum DelayRepr {
    Seconds(SimDuration),
    Tagged(TaggedDelay),
}

#[derive(Serialize, Deserialize)]
#[serde(tag = "dist", rename_all = "snake_case")]
enum TaggedDelay {
    Fixed { value: SimDuration },
    Uniform { min: SimDuration, max: SimDuration },
    Exponential { mean: SimDuration },
    Normal { mean: SimDuration, stddev: SimDuration },
}

impl From<DelayRepr> for DelaySpec {
    fn from(repr: DelayRepr) -> Self {
        match repr {
            DelayRepr::Seconds(value) => DelaySpec::Fixed(value),
            DelayRepr::Tagged(TaggedDelay::Fixed { value }) => DelaySpec::Fixed(value),
            DelayRepr::Tagged(TaggedDelay::Uniform { min, max }) => DelaySpec::Uniform { min, max },
            DelayRepr::Tagged(TaggedDelay::Exponential { mean }) => DelaySpec::Exponential { mean },
            DelayRepr::Tagged(TaggedDelay::Normal { mean, stddev }) => {
                DelaySpec::Normal { mean, stddev }
            }
        }
    }
}

impl From<DelaySpec> for TaggedDelay {
    fn from(spec: DelaySpec) -> Self {
        match spec {
            DelaySpec::Fixed(value) => TaggedDelay::Fixed { value },
            DelaySpec::Uniform { min, max } => TaggedDelay::Uniform { min, max },
            DelaySpec::Exponential { mean } => TaggedDelay::Exponential { mean },
            DelaySpec::Normal { mean, stddev } => TaggedDelay::Normal { mean, stddev },
        }
    }
}

impl Default for DelaySpec {
    fn default() -> Self {
        DelaySpec::Fixed(DEFAULT_PROCESSING_DELAY)
    }
}

impl DelaySpec {
    /// Draw one processing delay. Always non-negative for a validated spec.
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> SimDuration {
        match *self {
            DelaySpec::Fixed(value) => value,
            DelaySpec::Uniform { min, max } => {
                if max > min {
                    rng.gen_range(min..max)
                } else {
                    min
                }
            }
            // parameters were checked by `validate`, so construction cannot fail
            DelaySpec::Exponential { mean } => {
                Exp::new(1.0 / mean).map_or(mean, |exp| exp.sample(rng))
            }
            DelaySpec::Normal { mean, stddev } => Normal::new(mean, stddev)
                .map_or(mean, |normal| normal.sample(rng))
                .max(0.0),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        match *self {
            DelaySpec::Fixed(value) => non_negative("processing_delay", value),
            DelaySpec::Uniform { min, max } => {
                non_negative("processing_delay.min", min)?;
                non_negative("processing_delay.max", max)?;
                if !(max >= min) {
                    return Err(ConfigError::InvalidDelay(format!(
                        "uniform max {} is below min {}",
                        max, min
                    )));
                }
                Ok(())
            }
            DelaySpec::Exponential { mean } => {
                non_negative("processing_delay.mean", mean)?;
                Exp::new(1.0 / mean).map(|_| ()).map_err(|e| {
                    ConfigError::InvalidDelay(format!("exponential({}): {}", mean, e))
                })
            }
            DelaySpec::Normal { mean, stddev } => {
                if !mean.is_finite() {
                    return Err(ConfigError::InvalidDelay(format!(
                        "normal mean must be finite, got {}",
                        mean
                    )));
                }
                non_negative("processing_delay.stddev", stddev)?;
                Normal::new(mean, stddev).map(|_| ()).map_err(|e| {
                    ConfigError::InvalidDelay(format!("normal({}, {}): {}", mean, stddev, e))
                })
            }
        }
    }
}

fn non_negative(field: &'static str, value: f64) -> Result<(), ConfigError> {
    if value >= 0.0 && value.is_finite() {
        Ok(())
    } else {
        Err(ConfigError::NegativeDuration { field, value })
    }
}

fn probability(field: &'static str, value: f64) -> Result<(), ConfigError> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::ProbabilityOutOfRange { field, value })
    }
}

// ============================================================================
// Node Configuration
// ============================================================================

/// What a node puts in the buffer when its processing timer fires
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ForwardMode {
    /// Every processing completion sends a freshly generated message
    Regenerate,
    /// Forward the received message; generate a new one only when the
    /// received message was addressed to this node
    #[default]
    Relay,
}

/// Per-node parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeConfig {
    pub address: Address,

    /// Destination written into messages this node generates
    #[serde(default)]
    pub destination_address: Address,

    #[serde(default = "default_timeout")]
    pub timeout: SimDuration,

    #[serde(default = "default_loss_probability")]
    pub loss_probability: f64,

    #[serde(default)]
    pub processing_delay: DelaySpec,

    /// Bootstrap traffic by arming the processing timer at `startup_time`
    #[serde(default)]
    pub send_msg_on_init: bool,

    #[serde(default = "default_startup_time")]
    pub startup_time: SimTime,

    /// Resend limit per buffered message; `None` retries forever
    #[serde(default)]
    pub max_retransmissions: Option<u32>,

    #[serde(default)]
    pub forward_mode: ForwardMode,
}

fn default_timeout() -> SimDuration {
    DEFAULT_TIMEOUT
}

fn default_loss_probability() -> f64 {
    DEFAULT_LOSS_PROBABILITY
}

fn default_startup_time() -> SimTime {
    DEFAULT_STARTUP_TIME
}

impl NodeConfig {
    /// Defaults for every option except the address
    pub fn new(address: Address) -> Self {
        Self {
            address,
            destination_address: 0,
            timeout: DEFAULT_TIMEOUT,
            loss_probability: DEFAULT_LOSS_PROBABILITY,
            processing_delay: DelaySpec::default(),
            send_msg_on_init: false,
            startup_time: DEFAULT_STARTUP_TIME,
            max_retransmissions: None,
            forward_mode: ForwardMode::default(),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        non_negative("timeout", self.timeout)?;
        // a zero timeout would resend forever without advancing time
        if self.timeout == 0.0 {
            return Err(ConfigError::ZeroTimeout);
        }
        probability("loss_probability", self.loss_probability)?;
        non_negative("startup_time", self.startup_time)?;
        self.processing_delay.validate()
    }
}

// ============================================================================
// Simulation Configuration
// ============================================================================

/// How node outputs are wired to node inputs
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Topology {
    /// Each node sends to the next one in declaration order; the last wraps
    /// around to the first. Two nodes make a ping-pong pair.
    #[default]
    Ring,
    /// One outgoing link per node
    Explicit { links: Vec<Link> },
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Link {
    pub from: Address,
    pub to: Address,
}

/// Output options
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct OutputConfig {
    /// Directory for per-node time series CSV files
    #[serde(default)]
    pub csv_dir: Option<String>,

    /// File for a row-per-event CSV trace
    #[serde(default)]
    pub events_csv: Option<String>,

    /// Print every node event through the logger
    #[serde(default)]
    pub log_events: bool,
}

/// Configuration for a whole run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimConfig {
    #[serde(default = "default_sim_time_limit")]
    pub sim_time_limit: SimTime,

    /// Random seed (None = generate random)
    #[serde(default)]
    pub seed: Option<u64>,

    /// Transit time on every link; 0 is the idealized channel
    #[serde(default)]
    pub link_delay: SimDuration,

    #[serde(default)]
    pub topology: Topology,

    /// Events allowed at one timestamp before the run is declared stalled.
    /// Zero-delay cycles otherwise never let time advance.
    #[serde(default = "default_max_events_per_instant")]
    pub max_events_per_instant: u64,

    pub nodes: Vec<NodeConfig>,

    #[serde(default)]
    pub output: OutputConfig,
}

fn default_sim_time_limit() -> SimTime {
    DEFAULT_SIM_TIME_LIMIT
}

fn default_max_events_per_instant() -> u64 {
    DEFAULT_MAX_EVENTS_PER_INSTANT
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            sim_time_limit: DEFAULT_SIM_TIME_LIMIT,
            seed: None,
            link_delay: 0.0,
            topology: Topology::Ring,
            max_events_per_instant: DEFAULT_MAX_EVENTS_PER_INSTANT,
            nodes: Vec::new(),
            output: OutputConfig::default(),
        }
    }
}

impl SimConfig {
    /// Classic tic-toc pair: node 0 starts the traffic, both address each other
    pub fn ping_pong() -> Self {
        let mut tic = NodeConfig::new(0);
        tic.destination_address = 1;
        tic.send_msg_on_init = true;
        let mut toc = NodeConfig::new(1);
        toc.destination_address = 0;

        Self {
            nodes: vec![tic, toc],
            ..Default::default()
        }
    }

    /// `count` nodes in a ring, node 0 bootstraps a message for the node
    /// half way round
    pub fn ring(count: usize) -> Self {
        let count = count.max(1) as Address;
        let nodes = (0..count)
            .map(|address| {
                let mut node = NodeConfig::new(address);
                node.destination_address = (address + count / 2) % count;
                node.send_msg_on_init = address == 0;
                node
            })
            .collect();

        Self {
            nodes,
            ..Default::default()
        }
    }

    /// Get or generate seed
    pub fn resolve_seed(&self) -> u64 {
        self.seed.unwrap_or_else(|| rand::thread_rng().gen())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.nodes.is_empty() {
            return Err(ConfigError::NoNodes);
        }
        non_negative("sim_time_limit", self.sim_time_limit)?;
        non_negative("link_delay", self.link_delay)?;
        if self.max_events_per_instant == 0 {
            return Err(ConfigError::ZeroEventBudget);
        }
        for node in &self.nodes {
            node.validate()?;
        }
        self.out_links().map(|_| ())
    }

    /// Resolve the topology into `address -> next hop`, in node declaration order.
    pub fn out_links(&self) -> Result<IndexMap<Address, Address>, ConfigError> {
        let mut addresses: IndexMap<Address, ()> = IndexMap::new();
        for node in &self.nodes {
            if addresses.insert(node.address, ()).is_some() {
                return Err(ConfigError::DuplicateAddress(node.address));
            }
        }

        let mut links = IndexMap::new();
        match &self.topology {
            Topology::Ring => {
                let count = self.nodes.len();
                for (i, node) in self.nodes.iter().enumerate() {
                    links.insert(node.address, self.nodes[(i + 1) % count].address);
                }
            }
            Topology::Explicit { links: explicit } => {
                for link in explicit {
                    if !addresses.contains_key(&link.from) || !addresses.contains_key(&link.to) {
                        return Err(ConfigError::UnknownLinkTarget {
                            from: link.from,
                            to: link.to,
                        });
                    }
                    links.insert(link.from, link.to);
                }
                // keep declaration order and require a link for everyone
                let mut ordered = IndexMap::new();
                for address in addresses.keys() {
                    match links.get(address) {
                        Some(to) => {
                            ordered.insert(*address, *to);
                        }
                        None => return Err(ConfigError::MissingLink(*address)),
                    }
                }
                links = ordered;
            }
        }
        Ok(links)
    }
}

// ============================================================================
// Scenario Files
// ============================================================================

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct ScenarioMeta {
    pub name: Option<String>,
    pub description: Option<String>,
}

/// Scenario file format
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioFile {
    #[serde(default)]
    pub meta: ScenarioMeta,

    pub config: SimConfig,
}

impl ScenarioFile {
    pub fn from_yaml_str(yaml: &str) -> TxcResult<Self> {
        let scenario: ScenarioFile = serde_yaml::from_str(yaml)?;
        scenario.config.validate()?;
        Ok(scenario)
    }

    pub fn load<P: AsRef<Path>>(path: P) -> TxcResult<Self> {
        let yaml = fs::read_to_string(path)?;
        Self::from_yaml_str(&yaml)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::txc_error::TxcError;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_node_defaults() {
        let config = NodeConfig::new(3);
        assert_eq!(config.timeout, 10.0);
        assert_eq!(config.loss_probability, 0.1);
        assert_eq!(config.startup_time, 5.0);
        assert!(!config.send_msg_on_init);
        assert_eq!(config.max_retransmissions, None);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_probability_out_of_range() {
        let mut config = NodeConfig::new(0);
        config.loss_probability = 1.5;
        assert_eq!(
            config.validate(),
            Err(ConfigError::ProbabilityOutOfRange {
                field: "loss_probability",
                value: 1.5
            })
        );

        config.loss_probability = f64::NAN;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_negative_durations_rejected() {
        let mut config = NodeConfig::new(0);
        config.timeout = -1.0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::NegativeDuration { field: "timeout", .. })
        ));

        let mut config = NodeConfig::new(0);
        config.processing_delay = DelaySpec::Fixed(-0.5);
        assert!(config.validate().is_err());

        let mut config = NodeConfig::new(0);
        config.processing_delay = DelaySpec::Uniform { min: 2.0, max: 1.0 };
        assert!(matches!(config.validate(), Err(ConfigError::InvalidDelay(_))));
    }

    #[test]
    fn test_non_finite_delay_bounds_rejected() {
        let mut config = NodeConfig::new(0);
        config.processing_delay = DelaySpec::Uniform {
            min: 1.0,
            max: f64::INFINITY,
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::NegativeDuration {
                field: "processing_delay.max",
                ..
            })
        ));

        config.processing_delay = DelaySpec::Normal {
            mean: f64::NAN,
            stddev: 1.0,
        };
        assert!(config.validate().is_err());

        config.processing_delay = DelaySpec::Exponential {
            mean: f64::INFINITY,
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_scenario_yaml_infinite_uniform_max() {
        let yaml = r#"
config:
  nodes:
    - address: 0
      send_msg_on_init: true
      processing_delay: { dist: uniform, min: 1, max: .inf }
"#;
        assert!(matches!(
            ScenarioFile::from_yaml_str(yaml),
            Err(TxcError::Config(ConfigError::NegativeDuration { .. }))
        ));
    }

    #[test]
    fn test_delay_sample_means() {
        let mut rng = StdRng::seed_from_u64(21);
        let n = 20_000;
        let exp = DelaySpec::Exponential { mean: 2.0 };
        let mean = (0..n).map(|_| exp.sample(&mut rng)).sum::<f64>() / n as f64;
        assert!((mean - 2.0).abs() < 0.1, "exponential mean {}", mean);

        let normal = DelaySpec::Normal {
            mean: 5.0,
            stddev: 0.5,
        };
        let mean = (0..n).map(|_| normal.sample(&mut rng)).sum::<f64>() / n as f64;
        assert!((mean - 5.0).abs() < 0.05, "normal mean {}", mean);

        // a zero mean exponential is a zero delay
        assert_eq!(DelaySpec::Exponential { mean: 0.0 }.sample(&mut rng), 0.0);
    }

    #[test]
    fn test_delay_samples_are_non_negative() {
        let mut rng = StdRng::seed_from_u64(7);
        let specs = [
            DelaySpec::Fixed(2.0),
            DelaySpec::Uniform { min: 1.0, max: 3.0 },
            DelaySpec::Exponential { mean: 1.0 },
            DelaySpec::Normal { mean: 0.5, stddev: 2.0 },
        ];
        for spec in &specs {
            for _ in 0..200 {
                let d = spec.sample(&mut rng);
                assert!(d >= 0.0, "{:?} sampled {}", spec, d);
            }
        }
        for _ in 0..200 {
            let d = DelaySpec::Uniform { min: 1.0, max: 3.0 }.sample(&mut rng);
            assert!((1.0..3.0).contains(&d));
        }
        assert_eq!(DelaySpec::Uniform { min: 2.0, max: 2.0 }.sample(&mut rng), 2.0);
    }

    #[test]
    fn test_ring_links() {
        let config = SimConfig::ring(3);
        let links = config.out_links().unwrap();
        assert_eq!(links.get(&0), Some(&1));
        assert_eq!(links.get(&1), Some(&2));
        assert_eq!(links.get(&2), Some(&0));
        assert_eq!(config.nodes[0].destination_address, 1);
    }

    #[test]
    fn test_ping_pong_links() {
        let config = SimConfig::ping_pong();
        let links = config.out_links().unwrap();
        assert_eq!(links.get(&0), Some(&1));
        assert_eq!(links.get(&1), Some(&0));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let mut config = NodeConfig::new(0);
        config.timeout = 0.0;
        assert_eq!(config.validate(), Err(ConfigError::ZeroTimeout));
    }

    #[test]
    fn test_duplicate_address_rejected() {
        let config = SimConfig {
            nodes: vec![NodeConfig::new(1), NodeConfig::new(1)],
            ..Default::default()
        };
        assert_eq!(config.validate(), Err(ConfigError::DuplicateAddress(1)));
    }

    #[test]
    fn test_explicit_links_need_every_node() {
        let config = SimConfig {
            nodes: vec![NodeConfig::new(0), NodeConfig::new(1)],
            topology: Topology::Explicit {
                links: vec![Link { from: 0, to: 1 }],
            },
            ..Default::default()
        };
        assert_eq!(config.validate(), Err(ConfigError::MissingLink(1)));

        let config = SimConfig {
            nodes: vec![NodeConfig::new(0)],
            topology: Topology::Explicit {
                links: vec![Link { from: 0, to: 5 }],
            },
            ..Default::default()
        };
        assert_eq!(
            config.validate(),
            Err(ConfigError::UnknownLinkTarget { from: 0, to: 5 })
        );
    }

    #[test]
    fn test_empty_simulation_rejected() {
        assert_eq!(SimConfig::default().validate(), Err(ConfigError::NoNodes));
    }

    #[test]
    fn test_event_budget() {
        let mut config = SimConfig::ping_pong();
        assert_eq!(config.max_events_per_instant, 100_000);
        config.max_events_per_instant = 0;
        assert_eq!(config.validate(), Err(ConfigError::ZeroEventBudget));
    }

    #[test]
    fn test_scenario_yaml() {
        let yaml = r#"
meta:
  name: lossy pair
config:
  sim_time_limit: 200
  seed: 42
  nodes:
    - address: 0
      destination_address: 1
      send_msg_on_init: true
      processing_delay: 0.5
    - address: 1
      destination_address: 0
      loss_probability: 0.3
      max_retransmissions: 4
      forward_mode: regenerate
      processing_delay:
        dist: uniform
        min: 1.0
        max: 2.0
"#;
        let scenario = ScenarioFile::from_yaml_str(yaml).unwrap();
        assert_eq!(scenario.meta.name.as_deref(), Some("lossy pair"));
        let config = scenario.config;
        assert_eq!(config.seed, Some(42));
        assert_eq!(config.sim_time_limit, 200.0);
        assert_eq!(config.topology, Topology::Ring);
        assert_eq!(config.nodes[0].processing_delay, DelaySpec::Fixed(0.5));
        assert_eq!(config.nodes[0].timeout, 10.0);
        assert_eq!(
            config.nodes[1].processing_delay,
            DelaySpec::Uniform { min: 1.0, max: 2.0 }
        );
        assert_eq!(config.nodes[1].forward_mode, ForwardMode::Regenerate);
        assert_eq!(config.nodes[1].max_retransmissions, Some(4));
    }

    #[test]
    fn test_scenario_yaml_invalid_probability() {
        let yaml = r#"
config:
  nodes:
    - address: 0
      loss_probability: -0.2
"#;
        assert!(matches!(
            ScenarioFile::from_yaml_str(yaml),
            Err(TxcError::Config(ConfigError::ProbabilityOutOfRange { .. }))
        ));
    }
}
