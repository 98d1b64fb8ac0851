//! # factory-sim — Synthetic Factory-Telemetry Simulation Engine
//!
//! Models a set of manufacturing machines, generates realistic time-series
//! and business-event messages from configurable statistical distributions
//! and delivers them best-effort to an MQTT broker under unreliable network
//! conditions.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                        SimulationEngine                          │
//! │                                                                  │
//! │  generation loop                        delivery loop            │
//! │  ┌──────────────┐                       ┌──────────────────┐     │
//! │  │ ConfigLoader │                       │ DeliveryClient   │     │
//! │  │      │       │   ┌──────────────┐    │  Disconnected    │     │
//! │  │ Generator ───┼──▶│ OutboundQueue│───▶│  → Connecting    │──▶ broker
//! │  │      │       │   │ (bounded,    │    │  → Connected     │     │
//! │  │ StateStore   │   │  drop-oldest)│    │  ⇆ Reconnecting  │     │
//! │  │ TopicRouter  │   └──────┬───────┘    └────────┬─────────┘     │
//! │  └──────────────┘          │                     │               │
//! │                            ▼                     ▼               │
//! │                      ┌───────────────────────────────┐           │
//! │                      │  StatsCollector (read-only)   │           │
//! │                      └───────────────────────────────┘           │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Key Design Principles
//!
//! 1. **Single shared resource** — the generation loop exclusively owns
//!    machine state and the rng; the delivery loop owns the connection.
//!    Only the bounded outbound queue is shared, so no other locking
//!    exists.
//!
//! 2. **Reproducible runs** — all sampling flows through one seeded
//!    `StdRng`; a fixed seed and configuration replay the exact same
//!    event sequence.
//!
//! 3. **Degrade, never die** — only configuration errors are fatal.
//!    Broker outages, publish failures and queue overflow are absorbed
//!    as counters and log lines while the process keeps running.
//!
//! 4. **Injectable transport** — the delivery state machine drives a
//!    `Transport` trait object, so reconnect/backoff logic is verifiable
//!    without a network.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use factory_sim::{SimConfig, SimulationEngine};
//! use factory_sim::transport::{MqttTransport, StaticTokenProvider};
//! use std::sync::Arc;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn demo() -> Result<(), factory_sim::ConfigError> {
//! let config = SimConfig::load("config.json")?;
//! let transport = Arc::new(MqttTransport::new(
//!     config.transport.host.clone(),
//!     config.transport.port,
//!     config.transport.client_id.clone(),
//! ));
//! let tokens = Arc::new(StaticTokenProvider::from_env());
//!
//! let engine = SimulationEngine::new(config, transport, tokens);
//! engine.run(CancellationToken::new()).await;
//! # Ok(())
//! # }
//! ```

// Core message/event types - single source of truth
pub mod core;

// Error taxonomy
pub mod error;

// Configuration loading and validation
pub mod config;

// Per-machine simulation state
pub mod machine;

// Tick-driven stochastic generation
pub mod generator;

// Message-kind to topic mapping
pub mod router;

// Bounded outbound queue
pub mod queue;

// Broker transport seam (trait + rumqttc impl)
pub mod transport;

// Delivery loop and connection state machine
pub mod delivery;

// Counters and periodic stats snapshots
pub mod stats;

// Loop wiring
pub mod engine;

// Re-exports for convenience
pub use crate::core::{
    BusinessEvent, EquipmentKind, EventKind, MachineMessage, MachineStatus, MessagePayload,
    OrderItem, Quality, QueueEntry, SimEvent, TestResult,
};
pub use config::{
    BusinessEventConfig, EquipmentDefinition, GlobalConfig, MachineSpec, SimConfig, TransportConfig,
};
pub use delivery::{ConnectionState, DeliveryClient, DeliverySettings};
pub use engine::{generate_offline, generate_offline_from, SimulationEngine};
pub use error::{ConfigError, SampleError, TransportError};
pub use generator::MessageGenerator;
pub use machine::{MachineState, MachineStateStore};
pub use queue::OutboundQueue;
pub use router::TopicRouter;
pub use stats::{SimCounters, StatsCollector, StatsSnapshot};
pub use transport::{Backoff, Credential, MqttTransport, StaticTokenProvider, TokenProvider, Transport};
