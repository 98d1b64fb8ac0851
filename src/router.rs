//! Message-kind to topic mapping.
//!
//! A pure lookup table built once at startup: `factory/<equipment-kind>`
//! for telemetry, `factory/orders` and `factory/dispatch` for business
//! events, with `factory/telemetry` as the fallback for anything not
//! explicitly mapped. No state, no I/O after construction.

use crate::config::SimConfig;
use crate::core::{EquipmentKind, EventKind, SimEvent};
use std::collections::HashMap;

/// Fallback topic for unmapped kinds.
pub const DEFAULT_TOPIC: &str = "factory/telemetry";

pub const ORDERS_TOPIC: &str = "factory/orders";
pub const DISPATCH_TOPIC: &str = "factory/dispatch";

pub struct TopicRouter {
    table: HashMap<EventKind, String>,
}

impl TopicRouter {
    /// Table with the default `factory/<kind>` namespace.
    pub fn new() -> Self {
        let mut table = HashMap::new();
        for kind in [
            EquipmentKind::Machining,
            EquipmentKind::Additive,
            EquipmentKind::Joining,
            EquipmentKind::Inspection,
        ] {
            table.insert(
                EventKind::Equipment(kind),
                format!("factory/{}", kind.label()),
            );
        }
        table.insert(EventKind::Orders, ORDERS_TOPIC.to_string());
        table.insert(EventKind::Dispatch, DISPATCH_TOPIC.to_string());
        Self { table }
    }

    /// Default table with per-kind overrides taken from the first
    /// configured topic of each equipment definition.
    pub fn from_config(config: &SimConfig) -> Self {
        let mut router = Self::new();
        for equipment in config.equipment.values() {
            if let Some(topic) = equipment.topics.first() {
                router
                    .table
                    .insert(EventKind::Equipment(equipment.kind), topic.clone());
            }
        }
        router
    }

    pub fn route(&self, event: &SimEvent) -> &str {
        self.table
            .get(&event.kind())
            .map(String::as_str)
            .unwrap_or(DEFAULT_TOPIC)
    }

    pub fn topic_for(&self, kind: EventKind) -> &str {
        self.table
            .get(&kind)
            .map(String::as_str)
            .unwrap_or(DEFAULT_TOPIC)
    }
}

impl Default for TopicRouter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_namespace() {
        let router = TopicRouter::new();
        assert_eq!(
            router.topic_for(EventKind::Equipment(EquipmentKind::Machining)),
            "factory/machining"
        );
        assert_eq!(router.topic_for(EventKind::Orders), "factory/orders");
        assert_eq!(router.topic_for(EventKind::Dispatch), "factory/dispatch");
    }

    #[test]
    fn test_config_topic_overrides_default() {
        let config = SimConfig::from_json_str(
            &serde_json::json!({
                "global": { "base_interval_secs": 1.0 },
                "equipment": {
                    "printer": {
                        "kind": "additive",
                        "base_cycle_time": 120.0,
                        "cycle_time_variation": 0.1,
                        "failure_rate": 0.0,
                        "scrap_rate": 0.0,
                        "message_interval": 10.0,
                        "frequency_weight": 1.0,
                        "topics": ["plant7/printers"],
                        "quality_distribution": { "good": 1.0 },
                        "status_distribution": { "running": 1.0 }
                    }
                },
                "machines": []
            })
            .to_string(),
        )
        .unwrap();

        let router = TopicRouter::from_config(&config);
        assert_eq!(
            router.topic_for(EventKind::Equipment(EquipmentKind::Additive)),
            "plant7/printers"
        );
        // Other kinds keep the default namespace.
        assert_eq!(
            router.topic_for(EventKind::Equipment(EquipmentKind::Joining)),
            "factory/joining"
        );
    }
}
