//! Core Types for factory-sim
//!
//! Message, business-event and queue-entry types, co-located here as the
//! single source of truth. Everything that crosses the wire serializes to
//! JSON UTF-8; everything is immutable once constructed.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ============================================================================
// Equipment taxonomy
// ============================================================================

/// The closed set of supported equipment kinds. Adding a kind means adding
/// a variant here, a payload variant below and a generation arm in the
/// generator — nothing else.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum EquipmentKind {
    Machining,
    Additive,
    Joining,
    Inspection,
}

impl EquipmentKind {
    /// Stable lowercase label, used for topic construction.
    pub fn label(&self) -> &'static str {
        match self {
            EquipmentKind::Machining => "machining",
            EquipmentKind::Additive => "additive",
            EquipmentKind::Joining => "joining",
            EquipmentKind::Inspection => "inspection",
        }
    }
}

/// Operational status of a machine at message time.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum MachineStatus {
    Running,
    Idle,
    Maintenance,
    Failure,
}

/// Outcome of a completed production cycle.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Quality {
    Good,
    Rework,
    Scrap,
}

// ============================================================================
// Machine messages
// ============================================================================

/// A single telemetry message from one machine.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct MachineMessage {
    pub timestamp: DateTime<Utc>,
    pub machine_id: String,
    pub station_id: String,
    pub status: MachineStatus,
    #[serde(flatten)]
    pub payload: MessagePayload,
}

/// Equipment-kind-specific field set, flattened into the message object.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(untagged)]
pub enum MessagePayload {
    Machining {
        part_id: Uuid,
        cycle_time: f64,
        quality: Quality,
    },
    Additive {
        progress: f64,
        quality: Option<Quality>,
    },
    Joining {
        assembly_id: Uuid,
        last_cycle_time: f64,
    },
    Inspection {
        test_result: TestResult,
        issues_found: u32,
    },
}

impl MessagePayload {
    pub fn kind(&self) -> EquipmentKind {
        match self {
            MessagePayload::Machining { .. } => EquipmentKind::Machining,
            MessagePayload::Additive { .. } => EquipmentKind::Additive,
            MessagePayload::Joining { .. } => EquipmentKind::Joining,
            MessagePayload::Inspection { .. } => EquipmentKind::Inspection,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TestResult {
    Pass,
    Fail,
}

// ============================================================================
// Business events
// ============================================================================

/// Order lifecycle events, scheduled independently of machine telemetry.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum BusinessEvent {
    OrderPlaced {
        timestamp: DateTime<Utc>,
        order_id: Uuid,
        items: Vec<OrderItem>,
    },
    OrderDispatched {
        timestamp: DateTime<Utc>,
        order_id: Uuid,
        destination: String,
        carrier: String,
    },
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct OrderItem {
    pub sku: String,
    pub quantity: u32,
}

// ============================================================================
// Unified event stream
// ============================================================================

/// One generated event: either machine telemetry or a business event.
/// A tick produces an ordered list of these.
#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(untagged)]
pub enum SimEvent {
    Machine(MachineMessage),
    Business(BusinessEvent),
}

impl SimEvent {
    /// Routing key for the topic table.
    pub fn kind(&self) -> EventKind {
        match self {
            SimEvent::Machine(m) => EventKind::Equipment(m.payload.kind()),
            SimEvent::Business(BusinessEvent::OrderPlaced { .. }) => EventKind::Orders,
            SimEvent::Business(BusinessEvent::OrderDispatched { .. }) => EventKind::Dispatch,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Equipment(EquipmentKind),
    Orders,
    Dispatch,
}

// ============================================================================
// Queue entries
// ============================================================================

/// A serialized message resident in the outbound queue. Created on
/// generation, destroyed on successful publish or final drop.
#[derive(Debug, Clone)]
pub struct QueueEntry {
    /// Monotonically increasing sequence number, for loss accounting.
    pub seq: u64,
    pub topic: String,
    pub payload: Vec<u8>,
    pub qos: u8,
    pub enqueued_at: DateTime<Utc>,
    pub retry_count: u32,
}
