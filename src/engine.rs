//! Simulation engine: wires the generation loop, delivery loop and stats
//! sampler together.
//!
//! Two logically independent execution contexts run concurrently. The
//! generation loop exclusively owns the machine-state arena and the
//! generator's rng; the delivery loop owns the broker connection. The only
//! shared resource is the outbound queue. One cancellation token is
//! observed by every loop each iteration.

use crate::config::SimConfig;
use crate::delivery::{ConnectionState, DeliveryClient, DeliverySettings};
use crate::generator::MessageGenerator;
use crate::machine::MachineStateStore;
use crate::queue::OutboundQueue;
use crate::router::TopicRouter;
use crate::stats::{SimCounters, StatsCollector};
use crate::transport::{TokenProvider, Transport};
use chrono::{DateTime, Utc};
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

pub struct SimulationEngine {
    config: Arc<SimConfig>,
    queue: Arc<OutboundQueue>,
    counters: Arc<SimCounters>,
    transport: Arc<dyn Transport>,
    tokens: Arc<dyn TokenProvider>,
    seed: u64,
}

impl SimulationEngine {
    /// Engine over an injected transport and token provider. The seed comes
    /// from the configuration, or from entropy when unset.
    pub fn new(
        config: SimConfig,
        transport: Arc<dyn Transport>,
        tokens: Arc<dyn TokenProvider>,
    ) -> Self {
        let seed = config.global.seed.unwrap_or_else(|| rand::rng().random());
        let counters = Arc::new(SimCounters::default());
        let queue = Arc::new(OutboundQueue::new(
            config.global.queue_capacity,
            Arc::clone(&counters),
        ));
        Self {
            config: Arc::new(config),
            queue,
            counters,
            transport,
            tokens,
            seed,
        }
    }

    pub fn counters(&self) -> Arc<SimCounters> {
        Arc::clone(&self.counters)
    }

    pub fn queue(&self) -> Arc<OutboundQueue> {
        Arc::clone(&self.queue)
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Run until the token is cancelled. Returns once every loop has shut
    /// down and the delivery side has flushed and disconnected.
    pub async fn run(&self, cancel: CancellationToken) {
        info!(
            machines = self.config.machines.len(),
            seed = self.seed,
            queue_capacity = self.config.global.queue_capacity,
            "simulation starting"
        );

        let (delivery, state_rx) = DeliveryClient::new(
            Arc::clone(&self.queue),
            Arc::clone(&self.transport),
            Arc::clone(&self.tokens),
            Arc::clone(&self.counters),
            DeliverySettings::from(&self.config.transport),
        );

        let generation = tokio::spawn(generation_loop(
            Arc::clone(&self.config),
            Arc::clone(&self.queue),
            self.seed,
            cancel.clone(),
        ));
        let delivery = tokio::spawn(delivery.run(cancel.clone()));
        let stats = tokio::spawn(self.stats_collector(state_rx).run(cancel.clone()));

        for (name, handle) in [
            ("generation", generation),
            ("delivery", delivery),
            ("stats", stats),
        ] {
            if let Err(e) = handle.await {
                error!(loop_name = name, error = %e, "loop panicked");
            }
        }
        info!("simulation stopped");
    }

    fn stats_collector(&self, state_rx: watch::Receiver<ConnectionState>) -> StatsCollector {
        StatsCollector::new(
            Arc::clone(&self.counters),
            Arc::clone(&self.queue),
            state_rx,
            Duration::from_secs(self.config.global.stats_interval_secs),
        )
    }
}

/// Timer-driven generation: tick, route, serialize, enqueue, then sleep
/// for a jittered tick interval. The jitter de-aligns concurrent simulator
/// instances; it never feeds the sampling rng, so message content stays a
/// pure function of the seed.
async fn generation_loop(
    config: Arc<SimConfig>,
    queue: Arc<OutboundQueue>,
    seed: u64,
    cancel: CancellationToken,
) {
    let mut store = MachineStateStore::from_config(&config);
    let mut generator = MessageGenerator::new(Arc::clone(&config), seed);
    let router = TopicRouter::from_config(&config);
    let qos = config.transport.qos;
    let base = config.global.base_interval_secs;
    let jitter_frac = config.global.tick_jitter_frac;

    loop {
        for event in generator.tick(&mut store) {
            match serde_json::to_vec(&event) {
                Ok(payload) => {
                    queue.push(router.route(&event).to_string(), payload, qos);
                }
                Err(e) => error!(error = %e, "failed to serialize event"),
            }
        }

        let jitter = if jitter_frac > 0.0 {
            rand::rng().random_range(-jitter_frac..=jitter_frac)
        } else {
            0.0
        };
        let sleep = Duration::from_secs_f64((base * (1.0 + jitter)).max(0.001));
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(sleep) => {}
        }
    }
    info!("generation loop stopped");
}

/// Offline generation: run K ticks against a fixed start time and return
/// one JSON line per event, topic included. With a fixed seed the output
/// is byte-identical across runs.
pub fn generate_offline(
    config: &SimConfig,
    seed: u64,
    ticks: u64,
) -> Result<Vec<String>, serde_json::Error> {
    generate_offline_from(config, seed, ticks, DateTime::UNIX_EPOCH)
}

pub fn generate_offline_from(
    config: &SimConfig,
    seed: u64,
    ticks: u64,
    start: DateTime<Utc>,
) -> Result<Vec<String>, serde_json::Error> {
    let mut store = MachineStateStore::from_config(config);
    let mut generator = MessageGenerator::with_start(Arc::new(config.clone()), seed, start);
    let router = TopicRouter::from_config(config);

    let mut lines = Vec::new();
    for _ in 0..ticks {
        for event in generator.tick(&mut store) {
            let line = serde_json::json!({
                "topic": router.route(&event),
                "payload": event,
            });
            lines.push(serde_json::to_string(&line)?);
        }
    }
    Ok(lines)
}
