//! Error taxonomy for the simulator.
//!
//! Only `ConfigError` is fatal: it aborts startup before any generation
//! begins. Everything else is contained where it is detected and surfaced
//! through counters and log lines; the process keeps running.

use thiserror::Error;

/// Malformed or inconsistent configuration. Fatal at startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("equipment '{equipment}': {field} sums to {sum} (must sum to 1.0 within 1e-6)")]
    DistributionSum {
        equipment: String,
        field: &'static str,
        sum: f64,
    },

    #[error("machine '{machine_id}' references undefined equipment type '{equipment_type}'")]
    UnknownEquipment {
        machine_id: String,
        equipment_type: String,
    },

    #[error("duplicate machine_id '{machine_id}'")]
    DuplicateMachine { machine_id: String },

    #[error("equipment '{equipment}': {field} is {value} (must be non-negative)")]
    NegativeValue {
        equipment: String,
        field: &'static str,
        value: f64,
    },

    #[error("invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("failed to read configuration: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse configuration: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Broker-side failures. Never fatal; the delivery loop recovers via its
/// reconnect/backoff state machine.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("connection failed: {0}")]
    Connection(String),

    #[error("publish failed: {0}")]
    Publish(String),

    #[error("{0} timed out")]
    Timeout(&'static str),
}

/// A malformed sample for one machine in one tick. Isolated: the machine's
/// message is skipped, the tick and all other machines are unaffected.
#[derive(Debug, Error)]
pub enum SampleError {
    #[error("{field}: distribution has no positive weight")]
    EmptyDistribution { field: &'static str },

    #[error("{field}: sampled non-finite value {value}")]
    NonFinite { field: &'static str, value: f64 },
}
