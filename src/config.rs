//! Configuration loading and validation.
//!
//! The loader parses a JSON document into an immutable [`SimConfig`]
//! snapshot and validates it up front: every distribution sums to 1 within
//! tolerance, every machine references a defined equipment type, numeric
//! ranges are sane. Any violation is a fatal [`ConfigError`] naming the
//! offending field — startup aborts before any generation begins.

use crate::core::{EquipmentKind, MachineStatus, Quality};
use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::Path;

/// Tolerance for probability distributions summing to 1.
pub const DISTRIBUTION_EPSILON: f64 = 1e-6;

// ============================================================================
// Document structure
// ============================================================================

/// Immutable configuration snapshot for one simulation run.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct SimConfig {
    pub global: GlobalConfig,
    /// Equipment definitions keyed by type id (e.g. "cnc_mill").
    /// BTreeMap so iteration order is stable across runs.
    pub equipment: BTreeMap<String, EquipmentDefinition>,
    pub machines: Vec<MachineSpec>,
    #[serde(default)]
    pub business_events: BusinessEventConfig,
    #[serde(default)]
    pub transport: TransportConfig,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct GlobalConfig {
    /// Scheduler tick length in seconds.
    pub base_interval_secs: f64,
    /// Tick jitter as a fraction of the tick length (e.g. 0.1 = ±10%).
    #[serde(default = "default_tick_jitter")]
    pub tick_jitter_frac: f64,
    /// Outbound queue capacity C.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    /// Stats snapshot period in seconds.
    #[serde(default = "default_stats_interval")]
    pub stats_interval_secs: u64,
    /// RNG seed. Fixing this makes a run reproducible; absent means seeded
    /// from entropy.
    #[serde(default)]
    pub seed: Option<u64>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct EquipmentDefinition {
    pub kind: EquipmentKind,
    /// Nominal production cycle time in seconds.
    pub base_cycle_time: f64,
    /// Uniform variation applied to the cycle time, as a fraction in [0, 1].
    pub cycle_time_variation: f64,
    /// Probability per fired message that the machine reports a breakdown.
    pub failure_rate: f64,
    /// Probability that a completed cycle is forced to scrap regardless of
    /// the sampled quality.
    pub scrap_rate: f64,
    /// Mean interval between messages from one machine, in seconds.
    pub message_interval: f64,
    /// Relative firing weight against other equipment types.
    pub frequency_weight: f64,
    /// Destination topics; the first entry overrides the default topic for
    /// this equipment kind.
    #[serde(default)]
    pub topics: Vec<String>,
    pub quality_distribution: BTreeMap<Quality, f64>,
    pub status_distribution: BTreeMap<MachineStatus, f64>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct MachineSpec {
    pub machine_id: String,
    pub station_id: String,
    pub equipment_type: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct BusinessEventConfig {
    #[serde(default)]
    pub orders_per_hour: f64,
    #[serde(default)]
    pub dispatch_per_hour: f64,
}

/// Broker connection settings. The whole section is optional; defaults
/// target a local broker.
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(default)]
pub struct TransportConfig {
    pub host: String,
    pub port: u16,
    pub client_id: String,
    /// MQTT QoS level (0 = at-most-once, 1 = at-least-once, 2 = exactly-once).
    pub qos: u8,
    pub connect_timeout_secs: u64,
    pub publish_timeout_secs: u64,
    /// Publish retries per entry before it is dropped and counted failed.
    pub max_publish_retries: u32,
    pub backoff_base_secs: u64,
    pub backoff_cap_secs: u64,
    /// Grace period for flushing the queue on shutdown.
    pub flush_grace_secs: u64,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 1883,
            client_id: "factory-sim".to_string(),
            qos: 0,
            connect_timeout_secs: 10,
            publish_timeout_secs: 5,
            max_publish_retries: 3,
            backoff_base_secs: 1,
            backoff_cap_secs: 30,
            flush_grace_secs: 5,
        }
    }
}

fn default_tick_jitter() -> f64 {
    0.1
}

fn default_queue_capacity() -> usize {
    1000
}

fn default_stats_interval() -> u64 {
    15
}

// ============================================================================
// Loading and validation
// ============================================================================

impl SimConfig {
    /// Parse and validate a configuration document.
    pub fn from_json_str(input: &str) -> Result<Self, ConfigError> {
        let config: SimConfig = serde_json::from_str(input)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let input = std::fs::read_to_string(path)?;
        Self::from_json_str(&input)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.global.base_interval_secs <= 0.0 {
            return Err(ConfigError::InvalidValue {
                field: "global.base_interval_secs".to_string(),
                reason: "must be positive".to_string(),
            });
        }
        if !(0.0..1.0).contains(&self.global.tick_jitter_frac) {
            return Err(ConfigError::InvalidValue {
                field: "global.tick_jitter_frac".to_string(),
                reason: "must be in [0, 1)".to_string(),
            });
        }
        if self.global.queue_capacity == 0 {
            return Err(ConfigError::InvalidValue {
                field: "global.queue_capacity".to_string(),
                reason: "must be positive".to_string(),
            });
        }
        if self.transport.qos > 2 {
            return Err(ConfigError::InvalidValue {
                field: "transport.qos".to_string(),
                reason: "must be 0, 1 or 2".to_string(),
            });
        }
        for (rate, field) in [
            (self.business_events.orders_per_hour, "business_events.orders_per_hour"),
            (self.business_events.dispatch_per_hour, "business_events.dispatch_per_hour"),
        ] {
            if rate < 0.0 {
                return Err(ConfigError::InvalidValue {
                    field: field.to_string(),
                    reason: "must be non-negative".to_string(),
                });
            }
        }

        for (type_id, equipment) in &self.equipment {
            equipment.validate(type_id)?;
        }

        let mut seen = HashSet::new();
        for machine in &self.machines {
            if !seen.insert(machine.machine_id.as_str()) {
                return Err(ConfigError::DuplicateMachine {
                    machine_id: machine.machine_id.clone(),
                });
            }
            if !self.equipment.contains_key(&machine.equipment_type) {
                return Err(ConfigError::UnknownEquipment {
                    machine_id: machine.machine_id.clone(),
                    equipment_type: machine.equipment_type.clone(),
                });
            }
        }

        Ok(())
    }
}

impl EquipmentDefinition {
    fn validate(&self, type_id: &str) -> Result<(), ConfigError> {
        for (value, field) in [
            (self.base_cycle_time, "base_cycle_time"),
            (self.cycle_time_variation, "cycle_time_variation"),
            (self.failure_rate, "failure_rate"),
            (self.scrap_rate, "scrap_rate"),
            (self.frequency_weight, "frequency_weight"),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(ConfigError::NegativeValue {
                    equipment: type_id.to_string(),
                    field,
                    value,
                });
            }
        }
        if self.cycle_time_variation > 1.0 {
            return Err(ConfigError::InvalidValue {
                field: format!("equipment.{type_id}.cycle_time_variation"),
                reason: "must be at most 1.0".to_string(),
            });
        }
        if !self.message_interval.is_finite() || self.message_interval <= 0.0 {
            return Err(ConfigError::InvalidValue {
                field: format!("equipment.{type_id}.message_interval"),
                reason: "must be positive".to_string(),
            });
        }

        check_distribution(type_id, "quality_distribution", self.quality_distribution.values())?;
        check_distribution(type_id, "status_distribution", self.status_distribution.values())?;
        Ok(())
    }
}

fn check_distribution<'a>(
    type_id: &str,
    field: &'static str,
    weights: impl Iterator<Item = &'a f64>,
) -> Result<(), ConfigError> {
    let sum: f64 = weights.sum();
    if (sum - 1.0).abs() > DISTRIBUTION_EPSILON {
        return Err(ConfigError::DistributionSum {
            equipment: type_id.to_string(),
            field,
            sum,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> serde_json::Value {
        serde_json::json!({
            "global": { "base_interval_secs": 1.0, "seed": 7 },
            "equipment": {
                "cnc_mill": {
                    "kind": "machining",
                    "base_cycle_time": 30.0,
                    "cycle_time_variation": 0.2,
                    "failure_rate": 0.01,
                    "scrap_rate": 0.02,
                    "message_interval": 5.0,
                    "frequency_weight": 1.0,
                    "topics": ["factory/machining"],
                    "quality_distribution": { "good": 0.9, "rework": 0.05, "scrap": 0.05 },
                    "status_distribution": { "running": 0.8, "idle": 0.15, "failure": 0.05 }
                }
            },
            "machines": [
                { "machine_id": "mill-01", "station_id": "station-a", "equipment_type": "cnc_mill" }
            ],
            "business_events": { "orders_per_hour": 12.0, "dispatch_per_hour": 10.0 }
        })
    }

    #[test]
    fn test_valid_config_loads() {
        let config = SimConfig::from_json_str(&base_config().to_string()).unwrap();
        assert_eq!(config.machines.len(), 1);
        assert_eq!(config.global.queue_capacity, 1000);
        assert_eq!(config.transport.port, 1883);
        assert_eq!(config.global.seed, Some(7));
    }

    #[test]
    fn test_distribution_must_sum_to_one() {
        let mut doc = base_config();
        doc["equipment"]["cnc_mill"]["quality_distribution"]["good"] =
            serde_json::json!(0.5);
        let err = SimConfig::from_json_str(&doc.to_string()).unwrap_err();
        match err {
            ConfigError::DistributionSum { equipment, field, .. } => {
                assert_eq!(equipment, "cnc_mill");
                assert_eq!(field, "quality_distribution");
            }
            other => panic!("expected DistributionSum, got {other:?}"),
        }
    }

    #[test]
    fn test_distribution_tolerance_accepts_rounding() {
        let mut doc = base_config();
        doc["equipment"]["cnc_mill"]["status_distribution"] = serde_json::json!({
            "running": 0.3333333, "idle": 0.3333333, "failure": 0.3333334
        });
        assert!(SimConfig::from_json_str(&doc.to_string()).is_ok());
    }

    #[test]
    fn test_unknown_equipment_reference() {
        let mut doc = base_config();
        doc["machines"][0]["equipment_type"] = serde_json::json!("laser_cutter");
        let err = SimConfig::from_json_str(&doc.to_string()).unwrap_err();
        assert!(matches!(err, ConfigError::UnknownEquipment { .. }));
    }

    #[test]
    fn test_duplicate_machine_id() {
        let mut doc = base_config();
        let first = doc["machines"][0].clone();
        doc["machines"].as_array_mut().unwrap().push(first);
        let err = SimConfig::from_json_str(&doc.to_string()).unwrap_err();
        assert!(matches!(err, ConfigError::DuplicateMachine { .. }));
    }

    #[test]
    fn test_negative_rate_rejected() {
        let mut doc = base_config();
        doc["equipment"]["cnc_mill"]["failure_rate"] = serde_json::json!(-0.1);
        let err = SimConfig::from_json_str(&doc.to_string()).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::NegativeValue { field: "failure_rate", .. }
        ));
    }

    #[test]
    fn test_zero_message_interval_rejected() {
        let mut doc = base_config();
        doc["equipment"]["cnc_mill"]["message_interval"] = serde_json::json!(0.0);
        let err = SimConfig::from_json_str(&doc.to_string()).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, base_config().to_string()).unwrap();
        assert!(SimConfig::load(&path).is_ok());
    }
}
