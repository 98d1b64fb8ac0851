//! Per-machine simulation state.
//!
//! The store is an explicitly owned arena indexed by machine id. It is not
//! thread-safe by design: all mutation is confined to the generation loop,
//! which owns the store exclusively. Read-only access for observers goes
//! through snapshots, never through shared references into the arena.

use crate::config::SimConfig;
use crate::core::{EquipmentKind, MachineStatus, Quality};
use std::collections::HashMap;

/// Mutable simulation state for one machine. Created at startup from the
/// configuration, mutated once per tick, destroyed at shutdown.
#[derive(Debug, Clone)]
pub struct MachineState {
    pub machine_id: String,
    pub station_id: String,
    pub equipment_type: String,
    pub kind: EquipmentKind,
    pub current_status: MachineStatus,
    pub last_cycle_time: f64,
    pub cycle_count: u64,
    pub last_quality: Quality,
}

/// Arena of machine states, keyed by machine id.
#[derive(Debug, Default)]
pub struct MachineStateStore {
    machines: Vec<MachineState>,
    index: HashMap<String, usize>,
}

impl MachineStateStore {
    /// Build the arena from a validated configuration. Machines keep their
    /// configuration order, which fixes the per-tick iteration order.
    pub fn from_config(config: &SimConfig) -> Self {
        let mut store = Self::default();
        for spec in &config.machines {
            // Validation guarantees the equipment reference exists.
            let Some(equipment) = config.equipment.get(&spec.equipment_type) else {
                continue;
            };
            store.insert(MachineState {
                machine_id: spec.machine_id.clone(),
                station_id: spec.station_id.clone(),
                equipment_type: spec.equipment_type.clone(),
                kind: equipment.kind,
                current_status: MachineStatus::Idle,
                last_cycle_time: equipment.base_cycle_time,
                cycle_count: 0,
                last_quality: Quality::Good,
            });
        }
        store
    }

    fn insert(&mut self, state: MachineState) {
        self.index.insert(state.machine_id.clone(), self.machines.len());
        self.machines.push(state);
    }

    pub fn get(&self, machine_id: &str) -> Option<&MachineState> {
        self.index.get(machine_id).map(|&i| &self.machines[i])
    }

    pub fn get_mut(&mut self, machine_id: &str) -> Option<&mut MachineState> {
        self.index.get(machine_id).copied().map(|i| &mut self.machines[i])
    }

    pub fn iter(&self) -> impl Iterator<Item = &MachineState> {
        self.machines.iter()
    }

    pub fn len(&self) -> usize {
        self.machines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.machines.is_empty()
    }

    /// Index-based access for the generation loop, which needs to read the
    /// state and write back a mutation in the same pass.
    pub fn get_index_mut(&mut self, index: usize) -> Option<&mut MachineState> {
        self.machines.get_mut(index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SimConfig;

    fn config_with_two_machines() -> SimConfig {
        SimConfig::from_json_str(
            &serde_json::json!({
                "global": { "base_interval_secs": 1.0 },
                "equipment": {
                    "welder": {
                        "kind": "joining",
                        "base_cycle_time": 45.0,
                        "cycle_time_variation": 0.1,
                        "failure_rate": 0.0,
                        "scrap_rate": 0.0,
                        "message_interval": 10.0,
                        "frequency_weight": 1.0,
                        "quality_distribution": { "good": 1.0 },
                        "status_distribution": { "running": 1.0 }
                    }
                },
                "machines": [
                    { "machine_id": "weld-01", "station_id": "s1", "equipment_type": "welder" },
                    { "machine_id": "weld-02", "station_id": "s2", "equipment_type": "welder" }
                ]
            })
            .to_string(),
        )
        .unwrap()
    }

    #[test]
    fn test_store_built_from_config() {
        let store = MachineStateStore::from_config(&config_with_two_machines());
        assert_eq!(store.len(), 2);

        let state = store.get("weld-01").unwrap();
        assert_eq!(state.kind, EquipmentKind::Joining);
        assert_eq!(state.current_status, MachineStatus::Idle);
        assert_eq!(state.cycle_count, 0);
        assert_eq!(state.last_cycle_time, 45.0);
    }

    #[test]
    fn test_update_through_get_mut() {
        let mut store = MachineStateStore::from_config(&config_with_two_machines());
        {
            let state = store.get_mut("weld-02").unwrap();
            state.current_status = MachineStatus::Running;
            state.cycle_count += 1;
        }
        let state = store.get("weld-02").unwrap();
        assert_eq!(state.current_status, MachineStatus::Running);
        assert_eq!(state.cycle_count, 1);
        // Other machines are untouched.
        assert_eq!(store.get("weld-01").unwrap().cycle_count, 0);
    }

    #[test]
    fn test_unknown_machine_is_none() {
        let store = MachineStateStore::from_config(&config_with_two_machines());
        assert!(store.get("weld-99").is_none());
    }
}
