//! Stochastic message generation.
//!
//! The generator is pure scheduling logic driven by a tick of length
//! `base_interval`. Per tick, each machine runs a Bernoulli trial with
//! fire probability `frequency_weight * base_interval / message_interval`
//! (clamped to [0, 1]); fired machines sample a status, a cycle time and —
//! on a completed cycle — a quality, write the mutation back to the store
//! and emit a kind-specific message. Business events are scheduled
//! independently from hourly rates.
//!
//! All randomness flows through one seeded `StdRng`, so a fixed seed and
//! configuration replay the exact same event sequence. A malformed sample
//! for one machine is logged and skipped; it never aborts the tick.

use crate::config::{EquipmentDefinition, SimConfig};
use crate::core::{
    BusinessEvent, EquipmentKind, MachineMessage, MachineStatus, MessagePayload, OrderItem,
    Quality, SimEvent, TestResult,
};
use crate::error::SampleError;
use crate::machine::{MachineState, MachineStateStore};
use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Poisson};
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::warn;
use uuid::Uuid;

/// Mean number of line items per placed order.
const ORDER_ITEMS_MEAN: f64 = 3.0;
/// Dispatch events reference previously placed orders from this window.
const PENDING_ORDER_WINDOW: usize = 64;

const SKUS: &[&str] = &["GEAR-T5", "SHAFT-M2", "HOUSING-L", "BRACKET-S", "FLANGE-D8"];
const DESTINATIONS: &[&str] = &["Hamburg", "Rotterdam", "Lyon", "Gdansk", "Porto"];
const CARRIERS: &[&str] = &["DHL", "DB Schenker", "Kuehne+Nagel", "DSV"];

/// Tick-driven generator over an exclusively owned machine-state arena.
pub struct MessageGenerator {
    config: Arc<SimConfig>,
    rng: StdRng,
    /// Logical tick clock; advanced by `base_interval` per tick.
    clock: DateTime<Utc>,
    tick_len: chrono::Duration,
    /// Placed-order ids not yet dispatched, oldest first.
    pending_orders: VecDeque<Uuid>,
    items_per_order: Option<Poisson<f64>>,
}

impl MessageGenerator {
    /// Generator with the tick clock starting at the wall clock.
    pub fn new(config: Arc<SimConfig>, seed: u64) -> Self {
        Self::with_start(config, seed, Utc::now())
    }

    /// Generator with an explicit start time. Offline generation uses a
    /// fixed start so two runs with one seed are byte-identical.
    pub fn with_start(config: Arc<SimConfig>, seed: u64, start: DateTime<Utc>) -> Self {
        let tick_len =
            chrono::Duration::milliseconds((config.global.base_interval_secs * 1000.0).round() as i64);
        Self {
            config,
            rng: StdRng::seed_from_u64(seed),
            clock: start,
            tick_len,
            pending_orders: VecDeque::new(),
            items_per_order: Poisson::new(ORDER_ITEMS_MEAN).ok(),
        }
    }

    /// Run one tick: fire machines in fixed configuration order, then
    /// business events, and advance the tick clock.
    pub fn tick(&mut self, store: &mut MachineStateStore) -> Vec<SimEvent> {
        let timestamp = self.clock;
        let base_interval = self.config.global.base_interval_secs;
        let config = Arc::clone(&self.config);
        let mut events = Vec::new();

        for i in 0..store.len() {
            let Some(state) = store.get_index_mut(i) else {
                continue;
            };
            let Some(equipment) = config.equipment.get(&state.equipment_type) else {
                continue;
            };
            match machine_event(&mut self.rng, equipment, state, base_interval, timestamp) {
                Ok(Some(message)) => events.push(SimEvent::Machine(message)),
                Ok(None) => {}
                Err(err) => {
                    warn!(machine_id = %state.machine_id, error = %err, "sample failed, skipping machine");
                }
            }
        }

        for event in self.business_events(timestamp) {
            events.push(SimEvent::Business(event));
        }

        self.clock += self.tick_len;
        events
    }

    fn business_events(&mut self, timestamp: DateTime<Utc>) -> Vec<BusinessEvent> {
        let base_interval = self.config.global.base_interval_secs;
        let rates = self.config.business_events.clone();
        let mut events = Vec::new();

        let p_placed = (rates.orders_per_hour * base_interval / 3600.0).clamp(0.0, 1.0);
        if self.rng.random_bool(p_placed) {
            let order_id = self.next_uuid();
            let items = self.sample_order_items();
            self.pending_orders.push_back(order_id);
            if self.pending_orders.len() > PENDING_ORDER_WINDOW {
                self.pending_orders.pop_front();
            }
            events.push(BusinessEvent::OrderPlaced {
                timestamp,
                order_id,
                items,
            });
        }

        let p_dispatch = (rates.dispatch_per_hour * base_interval / 3600.0).clamp(0.0, 1.0);
        if self.rng.random_bool(p_dispatch) {
            // Prefer an order this run actually placed; fall back to a
            // synthetic id when none is pending.
            let order_id = match self.pending_orders.pop_front() {
                Some(id) => id,
                None => self.next_uuid(),
            };
            let destination = DESTINATIONS[self.rng.random_range(0..DESTINATIONS.len())];
            let carrier = CARRIERS[self.rng.random_range(0..CARRIERS.len())];
            events.push(BusinessEvent::OrderDispatched {
                timestamp,
                order_id,
                destination: destination.to_string(),
                carrier: carrier.to_string(),
            });
        }

        events
    }

    fn sample_order_items(&mut self) -> Vec<OrderItem> {
        let count = match &self.items_per_order {
            Some(dist) => dist.sample(&mut self.rng) as usize,
            None => ORDER_ITEMS_MEAN as usize,
        }
        .clamp(1, 8);

        (0..count)
            .map(|_| OrderItem {
                sku: SKUS[self.rng.random_range(0..SKUS.len())].to_string(),
                quantity: self.rng.random_range(1..=10),
            })
            .collect()
    }

    /// Ids are drawn from the seeded rng so runs replay identically.
    fn next_uuid(&mut self) -> Uuid {
        Uuid::from_u128(self.rng.random())
    }
}

/// Fire-or-skip decision and full sampling for one machine. Mutates the
/// machine state only when a message actually fires.
fn machine_event(
    rng: &mut StdRng,
    equipment: &EquipmentDefinition,
    state: &mut MachineState,
    base_interval: f64,
    timestamp: DateTime<Utc>,
) -> Result<Option<MachineMessage>, SampleError> {
    let fire_probability =
        (equipment.frequency_weight * base_interval / equipment.message_interval).clamp(0.0, 1.0);
    if !rng.random_bool(fire_probability) {
        return Ok(None);
    }

    let mut status = sample_categorical(rng, &equipment.status_distribution, "status_distribution")?;
    if equipment.failure_rate > 0.0 && rng.random_bool(equipment.failure_rate.min(1.0)) {
        status = MachineStatus::Failure;
    }

    let cycle_time = sample_cycle_time(rng, equipment)?;

    // A Running sample counts as a completed production cycle.
    let completed = status == MachineStatus::Running;
    let quality = if completed {
        let mut quality =
            sample_categorical(rng, &equipment.quality_distribution, "quality_distribution")?;
        if equipment.scrap_rate > 0.0 && rng.random_bool(equipment.scrap_rate.min(1.0)) {
            quality = Quality::Scrap;
        }
        Some(quality)
    } else {
        None
    };

    state.current_status = status;
    state.last_cycle_time = cycle_time;
    if completed {
        state.cycle_count += 1;
        if let Some(quality) = quality {
            state.last_quality = quality;
        }
    }

    let payload = match state.kind {
        EquipmentKind::Machining => MessagePayload::Machining {
            part_id: Uuid::from_u128(rng.random()),
            cycle_time,
            quality: quality.unwrap_or(state.last_quality),
        },
        EquipmentKind::Additive => {
            if completed {
                MessagePayload::Additive {
                    progress: 100.0,
                    quality,
                }
            } else {
                MessagePayload::Additive {
                    progress: round1(rng.random_range(0.0..100.0)),
                    quality: None,
                }
            }
        }
        EquipmentKind::Joining => MessagePayload::Joining {
            assembly_id: Uuid::from_u128(rng.random()),
            last_cycle_time: state.last_cycle_time,
        },
        EquipmentKind::Inspection => {
            let passed = quality.unwrap_or(state.last_quality) == Quality::Good;
            MessagePayload::Inspection {
                test_result: if passed { TestResult::Pass } else { TestResult::Fail },
                issues_found: if passed { 0 } else { rng.random_range(1..=4) },
            }
        }
    };

    Ok(Some(MachineMessage {
        timestamp,
        machine_id: state.machine_id.clone(),
        station_id: state.station_id.clone(),
        status,
        payload,
    }))
}

fn sample_cycle_time(rng: &mut StdRng, equipment: &EquipmentDefinition) -> Result<f64, SampleError> {
    let variation = equipment.cycle_time_variation;
    let factor = if variation > 0.0 {
        1.0 + rng.random_range(-variation..=variation)
    } else {
        1.0
    };
    let cycle_time = equipment.base_cycle_time * factor;
    if !cycle_time.is_finite() || cycle_time < 0.0 {
        return Err(SampleError::NonFinite {
            field: "cycle_time",
            value: cycle_time,
        });
    }
    Ok(round3(cycle_time))
}

/// Categorical sampling by cumulative-distribution inversion. BTreeMap
/// keys give a stable accumulation order across runs.
fn sample_categorical<T: Copy + Ord>(
    rng: &mut StdRng,
    distribution: &std::collections::BTreeMap<T, f64>,
    field: &'static str,
) -> Result<T, SampleError> {
    let total: f64 = distribution.values().sum();
    if !total.is_finite() {
        return Err(SampleError::NonFinite {
            field,
            value: total,
        });
    }
    if total <= 0.0 {
        return Err(SampleError::EmptyDistribution { field });
    }

    let x = rng.random_range(0.0..total);
    let mut cumulative = 0.0;
    for (value, weight) in distribution {
        cumulative += weight;
        if x < cumulative {
            return Ok(*value);
        }
    }
    // Float roundoff can leave x just past the last bucket boundary.
    distribution
        .keys()
        .next_back()
        .copied()
        .ok_or(SampleError::EmptyDistribution { field })
}

fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

fn round3(value: f64) -> f64 {
    (value * 1000.0).round() / 1000.0
}
