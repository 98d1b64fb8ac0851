//! Delivery and generation counters plus the periodic stats sampler.
//!
//! Counters are plain atomics bumped by the queue and the delivery loop;
//! the collector task samples them on a fixed period, derives the send
//! rate and emits one structured snapshot line. Strictly read-only with
//! respect to every other component.

use crate::delivery::ConnectionState;
use crate::queue::OutboundQueue;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Shared counters for one simulation run.
#[derive(Debug, Default)]
pub struct SimCounters {
    /// Entries accepted by the outbound queue.
    pub enqueued: AtomicU64,
    /// Entries evicted on queue overflow.
    pub queue_dropped: AtomicU64,
    /// Entries published successfully.
    pub sent: AtomicU64,
    /// Entries dropped after exhausting publish retries.
    pub failed: AtomicU64,
    /// Transitions into Reconnecting.
    pub reconnects: AtomicU64,
}

impl SimCounters {
    pub fn snapshot(&self) -> CounterSnapshot {
        CounterSnapshot {
            enqueued: self.enqueued.load(Ordering::Relaxed),
            queue_dropped: self.queue_dropped.load(Ordering::Relaxed),
            sent: self.sent.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            reconnects: self.reconnects.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct CounterSnapshot {
    pub enqueued: u64,
    pub queue_dropped: u64,
    pub sent: u64,
    pub failed: u64,
    pub reconnects: u64,
}

/// One emitted observability sample.
#[derive(Debug, Clone, Serialize)]
pub struct StatsSnapshot {
    pub sent: u64,
    pub failed: u64,
    pub dropped: u64,
    pub queue_depth: usize,
    /// Instantaneous send rate over the sample period, messages/sec.
    pub send_rate: f64,
    pub connection: &'static str,
}

pub struct StatsCollector {
    counters: Arc<SimCounters>,
    queue: Arc<OutboundQueue>,
    connection: watch::Receiver<ConnectionState>,
    period: Duration,
}

impl StatsCollector {
    pub fn new(
        counters: Arc<SimCounters>,
        queue: Arc<OutboundQueue>,
        connection: watch::Receiver<ConnectionState>,
        period: Duration,
    ) -> Self {
        Self {
            counters,
            queue,
            connection,
            period,
        }
    }

    /// Build one sample from the current counter values.
    pub fn sample(&self, last_sent: u64, elapsed: Duration) -> StatsSnapshot {
        let counters = self.counters.snapshot();
        let delta = counters.sent.saturating_sub(last_sent);
        let secs = elapsed.as_secs_f64();
        StatsSnapshot {
            sent: counters.sent,
            failed: counters.failed,
            dropped: counters.queue_dropped,
            queue_depth: self.queue.depth(),
            send_rate: if secs > 0.0 { delta as f64 / secs } else { 0.0 },
            connection: self.connection.borrow().label(),
        }
    }

    pub async fn run(self, cancel: CancellationToken) {
        let mut interval = tokio::time::interval(self.period);
        // The first tick of a tokio interval fires immediately.
        interval.tick().await;

        let mut last_sent = self.counters.sent.load(Ordering::Relaxed);
        let mut last_at = Instant::now();

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = interval.tick() => {
                    let now = Instant::now();
                    let snapshot = self.sample(last_sent, now - last_at);
                    last_sent = snapshot.sent;
                    last_at = now;
                    info!(
                        sent = snapshot.sent,
                        failed = snapshot.failed,
                        dropped = snapshot.dropped,
                        queue_depth = snapshot.queue_depth,
                        send_rate = snapshot.send_rate,
                        connection = snapshot.connection,
                        "stats"
                    );
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_reads_counters() {
        let counters = SimCounters::default();
        counters.sent.fetch_add(5, Ordering::Relaxed);
        counters.failed.fetch_add(2, Ordering::Relaxed);
        let snapshot = counters.snapshot();
        assert_eq!(snapshot.sent, 5);
        assert_eq!(snapshot.failed, 2);
        assert_eq!(snapshot.queue_dropped, 0);
    }

    #[tokio::test]
    async fn test_sample_computes_rate_and_depth() {
        let counters = Arc::new(SimCounters::default());
        let queue = Arc::new(OutboundQueue::new(10, Arc::clone(&counters)));
        let (_tx, rx) = watch::channel(ConnectionState::Connected);

        queue.push("factory/test".to_string(), b"{}".to_vec(), 0);
        counters.sent.fetch_add(30, Ordering::Relaxed);

        let collector = StatsCollector::new(
            Arc::clone(&counters),
            Arc::clone(&queue),
            rx,
            Duration::from_secs(10),
        );
        let snapshot = collector.sample(0, Duration::from_secs(10));
        assert_eq!(snapshot.queue_depth, 1);
        assert_eq!(snapshot.connection, "connected");
        assert!((snapshot.send_rate - 3.0).abs() < f64::EPSILON);
    }
}
