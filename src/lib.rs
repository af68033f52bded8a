//! # txc-relay - Store-and-Forward Reliability Simulation
//!
//! A discrete-event model of nodes that pass messages along unidirectional
//! links. Each node holds at most one message, spends a random processing
//! delay on it, forwards it to its next hop and resends the buffered copy
//! whenever the timeout expires first. Arrivals are dropped with a configured
//! loss probability. Success is never acknowledged explicitly: the next
//! arrival on the input link supersedes whatever is still waiting.
//!
//! ## Core Components
//!
//! - **ReliabilityAutomaton**: the per-node state machine (buffer plus the processing and timeout timers)
//! - **TxcNode**: the automaton plus addressing, message generation, statistics and display hooks
//! - **EventQueue / SchedulerContext**: the discrete-event clock the nodes call into
//! - **Simulation**: builds a network from a `SimConfig` and runs it to a time limit
//!
//! ```no_run
//! use txc_relay::{SimConfig, Simulation};
//!
//! let mut config = SimConfig::ping_pong();
//! config.seed = Some(42);
//! config.sim_time_limit = 500.0;
//!
//! let result = Simulation::new(config)?.run()?;
//! result.print_summary();
//! # Ok::<(), txc_relay::TxcError>(())
//! ```
//!
//! Scenario files in YAML are run by the `scenario_runner` binary, see
//! `ScenarioFile` for the format.

pub mod txc_interface;
pub mod txc_error;
pub mod txc_config;
pub mod txc_message;
pub mod txc_stats;

// Node logic
pub mod txc_automaton;
pub mod txc_node;

// Simulation harness
pub mod txc_scheduler;
pub mod txc_sinks;
pub mod txc_simulation;

#[cfg(test)]
mod txc_testing;

// Re-export commonly used types
pub use txc_automaton::{AutomatonState, ReliabilityAutomaton};
pub use txc_config::{DelaySpec, ForwardMode, NodeConfig, ScenarioFile, SimConfig, Topology};
pub use txc_error::{ConfigError, TxcError, TxcResult};
pub use txc_interface::{
    Address, Event, EventSink, Message, NodeEvent, NoOpSink, SeqId, SimContext, SimTime,
    TimerHandle, TimerKind,
};
pub use txc_node::TxcNode;
pub use txc_simulation::{SimResult, Simulation};
pub use txc_stats::NodeReport;
