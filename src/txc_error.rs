//! Error types for node configuration and event dispatch

use thiserror::Error;

use crate::txc_interface::{Address, SimTime, TimerHandle, TimerKind};

/// Invalid simulation parameters, detected before the run starts
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("{field} must be within [0, 1], got {value}")]
    ProbabilityOutOfRange { field: &'static str, value: f64 },

    #[error("{field} must be a non-negative duration, got {value}")]
    NegativeDuration { field: &'static str, value: f64 },

    #[error("timeout must be greater than zero")]
    ZeroTimeout,

    #[error("invalid processing delay distribution: {0}")]
    InvalidDelay(String),

    #[error("node {0} is configured more than once")]
    DuplicateAddress(Address),

    #[error("link {from} -> {to} references an unknown node")]
    UnknownLinkTarget { from: Address, to: Address },

    #[error("node {0} has no outgoing link")]
    MissingLink(Address),

    #[error("simulation has no nodes")]
    NoNodes,

    #[error("max_events_per_instant must be greater than zero")]
    ZeroEventBudget,
}

/// Errors that abort a simulation run
#[derive(Debug, Error)]
pub enum TxcError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// A timer fired that is not the one the node has armed for that kind
    #[error("node {node} received unexpected {} timer {handle}", kind.as_str())]
    UnexpectedEvent {
        node: Address,
        kind: TimerKind,
        handle: TimerHandle,
    },

    #[error("event addressed to unknown node {0}")]
    UnknownNode(Address),

    /// Time stopped advancing, usually a cycle of zero-delay nodes
    #[error("simulation stalled at t={time}: {events} events without time advancing")]
    Stalled { time: SimTime, events: u64 },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("scenario parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

pub type TxcResult<T> = Result<T, TxcError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_error_converts() {
        let err: TxcError = ConfigError::NoNodes.into();
        assert!(matches!(err, TxcError::Config(ConfigError::NoNodes)));
        assert_eq!(err.to_string(), "configuration error: simulation has no nodes");
    }

    #[test]
    fn test_unexpected_event_message() {
        let err = TxcError::UnexpectedEvent {
            node: 4,
            kind: TimerKind::Timeout,
            handle: TimerHandle::new(9),
        };
        assert_eq!(err.to_string(), "node 4 received unexpected timeout timer T#9");
    }
}
