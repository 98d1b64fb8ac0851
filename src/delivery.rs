//! Delivery loop and connection state machine.
//!
//! Owns the broker connection. While Connected it continuously drains the
//! outbound queue and publishes; any I/O error or timeout sends it through
//! `Reconnecting -> Connecting` with exponential backoff. Reconnection is
//! unbounded by design — only the backoff delay is capped — so prolonged
//! broker unavailability never terminates the process.

use crate::config::TransportConfig;
use crate::error::TransportError;
use crate::queue::OutboundQueue;
use crate::stats::SimCounters;
use crate::transport::{Backoff, TokenProvider, Transport};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// How long one queue pop waits before re-checking for shutdown.
const POP_WAIT: Duration = Duration::from_millis(250);

/// Connection lifecycle: `Disconnected -> Connecting -> Connected`, with
/// `Reconnecting` between failed sessions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

impl ConnectionState {
    pub fn label(&self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Reconnecting => "reconnecting",
        }
    }
}

#[derive(Debug, Clone)]
pub struct DeliverySettings {
    pub connect_timeout: Duration,
    pub publish_timeout: Duration,
    pub max_publish_retries: u32,
    pub backoff_base: Duration,
    pub backoff_cap: Duration,
    pub flush_grace: Duration,
}

impl From<&TransportConfig> for DeliverySettings {
    fn from(config: &TransportConfig) -> Self {
        Self {
            connect_timeout: Duration::from_secs(config.connect_timeout_secs),
            publish_timeout: Duration::from_secs(config.publish_timeout_secs),
            max_publish_retries: config.max_publish_retries,
            backoff_base: Duration::from_secs(config.backoff_base_secs),
            backoff_cap: Duration::from_secs(config.backoff_cap_secs),
            flush_grace: Duration::from_secs(config.flush_grace_secs),
        }
    }
}

enum DrainExit {
    Shutdown,
    ConnectionLost,
}

pub struct DeliveryClient {
    queue: Arc<OutboundQueue>,
    transport: Arc<dyn Transport>,
    tokens: Arc<dyn TokenProvider>,
    counters: Arc<SimCounters>,
    settings: DeliverySettings,
    state_tx: watch::Sender<ConnectionState>,
}

impl DeliveryClient {
    pub fn new(
        queue: Arc<OutboundQueue>,
        transport: Arc<dyn Transport>,
        tokens: Arc<dyn TokenProvider>,
        counters: Arc<SimCounters>,
        settings: DeliverySettings,
    ) -> (Self, watch::Receiver<ConnectionState>) {
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);
        (
            Self {
                queue,
                transport,
                tokens,
                counters,
                settings,
                state_tx,
            },
            state_rx,
        )
    }

    fn set_state(&self, state: ConnectionState) {
        self.state_tx.send_replace(state);
    }

    /// Drive the state machine until shutdown, then flush within the grace
    /// period and disconnect cleanly.
    pub async fn run(self, cancel: CancellationToken) {
        let mut backoff = Backoff::new(self.settings.backoff_base, self.settings.backoff_cap);
        let mut flush_on_exit = false;

        loop {
            if cancel.is_cancelled() {
                break;
            }

            self.set_state(ConnectionState::Connecting);
            let handshake = async {
                let credential = self.tokens.credential().await?;
                self.transport.connect(&credential).await
            };

            let connected = match tokio::time::timeout(self.settings.connect_timeout, handshake).await
            {
                Ok(result) => result,
                Err(_) => Err(TransportError::Timeout("connect")),
            };
            match connected {
                Ok(()) => {
                    info!("connected to broker");
                    self.set_state(ConnectionState::Connected);
                    backoff.reset();
                    match self.drain(&cancel).await {
                        DrainExit::Shutdown => {
                            flush_on_exit = true;
                            break;
                        }
                        DrainExit::ConnectionLost => {
                            self.counters.reconnects.fetch_add(1, Ordering::Relaxed);
                            self.set_state(ConnectionState::Reconnecting);
                        }
                    }
                }
                Err(e) => {
                    warn!(error = %e, "connect failed");
                    self.counters.reconnects.fetch_add(1, Ordering::Relaxed);
                    self.set_state(ConnectionState::Reconnecting);
                }
            }

            let delay = backoff.next_delay();
            debug!(delay = ?delay, "backing off before reconnect");
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        if flush_on_exit {
            self.flush().await;
        }
        let _ = self.transport.disconnect().await;
        self.set_state(ConnectionState::Disconnected);
        info!("delivery loop stopped");
    }

    /// Publish entries until shutdown or an I/O failure. A failed entry is
    /// requeued at the head while it has retries left, otherwise dropped
    /// and counted failed.
    async fn drain(&self, cancel: &CancellationToken) -> DrainExit {
        loop {
            let entry = tokio::select! {
                _ = cancel.cancelled() => return DrainExit::Shutdown,
                entry = self.queue.pop_timeout(POP_WAIT) => entry,
            };
            let Some(entry) = entry else {
                continue;
            };

            match self.publish_entry(&entry).await {
                Ok(()) => {
                    self.counters.sent.fetch_add(1, Ordering::Relaxed);
                }
                Err(e) => {
                    warn!(seq = entry.seq, error = %e, "publish failed");
                    self.account_failure(entry);
                    return DrainExit::ConnectionLost;
                }
            }
        }
    }

    /// One publish attempt bounded by the publish timeout; an elapsed
    /// timer surfaces as a `Timeout` transport error.
    async fn publish_entry(&self, entry: &crate::core::QueueEntry) -> Result<(), TransportError> {
        let publish = self
            .transport
            .publish(&entry.topic, &entry.payload, entry.qos);
        match tokio::time::timeout(self.settings.publish_timeout, publish).await {
            Ok(result) => result,
            Err(_) => Err(TransportError::Timeout("publish")),
        }
    }

    fn account_failure(&self, mut entry: crate::core::QueueEntry) {
        entry.retry_count += 1;
        if entry.retry_count < self.settings.max_publish_retries {
            self.queue.push_front(entry);
        } else {
            debug!(seq = entry.seq, "dropping entry after max retries");
            self.counters.failed.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Best-effort flush of whatever is resident, bounded by the grace
    /// period. Stops at the first failure; the connection is going away.
    async fn flush(&self) {
        let deadline = Instant::now() + self.settings.flush_grace;
        let mut flushed = 0u64;
        while Instant::now() < deadline {
            let Some(entry) = self.queue.try_pop() else {
                break;
            };
            match self.publish_entry(&entry).await {
                Ok(()) => {
                    flushed += 1;
                    self.counters.sent.fetch_add(1, Ordering::Relaxed);
                }
                Err(e) => {
                    warn!(seq = entry.seq, error = %e, "flush publish failed");
                    self.counters.failed.fetch_add(1, Ordering::Relaxed);
                    break;
                }
            }
        }
        info!(flushed, remaining = self.queue.depth(), "shutdown flush complete");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TransportError;
    use crate::transport::{Credential, StaticTokenProvider};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicU64};
    use std::sync::Mutex;

    #[derive(Default)]
    struct MockTransport {
        fail_connect: AtomicBool,
        fail_publish: AtomicBool,
        hang_publish: AtomicBool,
        connect_attempts: AtomicU64,
        publish_attempts: AtomicU64,
        published: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl Transport for MockTransport {
        async fn connect(&self, _credential: &Credential) -> Result<(), TransportError> {
            self.connect_attempts.fetch_add(1, Ordering::Relaxed);
            if self.fail_connect.load(Ordering::Relaxed) {
                Err(TransportError::Connection("broker unreachable".to_string()))
            } else {
                Ok(())
            }
        }

        async fn publish(
            &self,
            topic: &str,
            _payload: &[u8],
            _qos: u8,
        ) -> Result<(), TransportError> {
            self.publish_attempts.fetch_add(1, Ordering::Relaxed);
            if self.hang_publish.load(Ordering::Relaxed) {
                std::future::pending::<()>().await;
            }
            if self.fail_publish.load(Ordering::Relaxed) {
                Err(TransportError::Publish("write failed".to_string()))
            } else {
                self.published
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .push(topic.to_string());
                Ok(())
            }
        }

        async fn disconnect(&self) -> Result<(), TransportError> {
            Ok(())
        }
    }

    fn settings() -> DeliverySettings {
        DeliverySettings {
            connect_timeout: Duration::from_secs(10),
            publish_timeout: Duration::from_secs(5),
            max_publish_retries: 3,
            backoff_base: Duration::from_secs(1),
            backoff_cap: Duration::from_secs(30),
            flush_grace: Duration::from_secs(5),
        }
    }

    fn harness(
        transport: Arc<MockTransport>,
    ) -> (
        Arc<OutboundQueue>,
        Arc<SimCounters>,
        DeliveryClient,
        watch::Receiver<ConnectionState>,
    ) {
        let counters = Arc::new(SimCounters::default());
        let queue = Arc::new(OutboundQueue::new(100, Arc::clone(&counters)));
        let tokens = Arc::new(StaticTokenProvider::new("user", "pass"));
        let (client, state_rx) = DeliveryClient::new(
            Arc::clone(&queue),
            transport,
            tokens,
            Arc::clone(&counters),
            settings(),
        );
        (queue, counters, client, state_rx)
    }

    async fn wait_for(mut condition: impl FnMut() -> bool) {
        for _ in 0..2000 {
            if condition() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("condition not reached");
    }

    #[tokio::test(start_paused = true)]
    async fn test_drains_queue_in_order_while_connected() {
        let transport = Arc::new(MockTransport::default());
        let (queue, counters, client, _state) = harness(Arc::clone(&transport));
        for i in 0..3 {
            queue.push(format!("factory/t{i}"), b"{}".to_vec(), 0);
        }

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(client.run(cancel.clone()));

        let sent = Arc::clone(&counters);
        wait_for(move || sent.sent.load(Ordering::Relaxed) == 3).await;
        cancel.cancel();
        handle.await.unwrap();

        let published = transport.published.lock().unwrap().clone();
        assert_eq!(published, vec!["factory/t0", "factory/t1", "factory/t2"]);
        assert_eq!(counters.failed.load(Ordering::Relaxed), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_publish_failure_retries_then_drops() {
        let transport = Arc::new(MockTransport::default());
        transport.fail_publish.store(true, Ordering::Relaxed);
        let (queue, counters, client, _state) = harness(Arc::clone(&transport));
        queue.push("factory/t".to_string(), b"{}".to_vec(), 0);

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(client.run(cancel.clone()));

        let failed = Arc::clone(&counters);
        wait_for(move || failed.failed.load(Ordering::Relaxed) == 1).await;
        cancel.cancel();
        handle.await.unwrap();

        // Three attempts total, then the entry leaves the retry path.
        assert_eq!(transport.publish_attempts.load(Ordering::Relaxed), 3);
        assert_eq!(counters.failed.load(Ordering::Relaxed), 1);
        assert_eq!(counters.sent.load(Ordering::Relaxed), 0);
        assert_eq!(queue.depth(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_publish_timeout_retries_then_drops() {
        let transport = Arc::new(MockTransport::default());
        transport.hang_publish.store(true, Ordering::Relaxed);
        let (queue, counters, client, _state) = harness(Arc::clone(&transport));
        queue.push("factory/t".to_string(), b"{}".to_vec(), 0);

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(client.run(cancel.clone()));

        // Each attempt hangs until the publish timeout elapses; the entry
        // follows the same retry-then-drop path as a hard publish error.
        let failed = Arc::clone(&counters);
        wait_for(move || failed.failed.load(Ordering::Relaxed) == 1).await;
        cancel.cancel();
        handle.await.unwrap();

        assert_eq!(transport.publish_attempts.load(Ordering::Relaxed), 3);
        assert_eq!(counters.sent.load(Ordering::Relaxed), 0);
        assert_eq!(queue.depth(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unreachable_broker_keeps_reconnecting() {
        let transport = Arc::new(MockTransport::default());
        transport.fail_connect.store(true, Ordering::Relaxed);
        let (queue, counters, client, state) = harness(Arc::clone(&transport));
        queue.push("factory/t".to_string(), b"{}".to_vec(), 0);

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(client.run(cancel.clone()));

        let attempts = Arc::clone(&transport);
        wait_for(move || attempts.connect_attempts.load(Ordering::Relaxed) >= 4).await;
        cancel.cancel();
        handle.await.unwrap();

        // Nothing was delivered, nothing was lost from the queue.
        assert_eq!(counters.sent.load(Ordering::Relaxed), 0);
        assert_eq!(queue.depth(), 1);
        assert!(counters.reconnects.load(Ordering::Relaxed) >= 4);
        assert_eq!(*state.borrow(), ConnectionState::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_flushes_within_grace() {
        let transport = Arc::new(MockTransport::default());
        let (queue, counters, client, _state) = harness(Arc::clone(&transport));
        for i in 0..5 {
            queue.push(format!("factory/t{i}"), b"{}".to_vec(), 0);
        }

        let cancel = CancellationToken::new();
        cancel.cancel();
        // A run cancelled before its first connect exits without flushing;
        // the queue contents survive untouched.
        client.run(cancel).await;
        assert_eq!(counters.sent.load(Ordering::Relaxed), 0);
        assert_eq!(queue.depth(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connected_shutdown_flushes_remaining() {
        let transport = Arc::new(MockTransport::default());
        let (queue, counters, client, state) = harness(Arc::clone(&transport));

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(client.run(cancel.clone()));

        let mut connected = state.clone();
        connected
            .wait_for(|s| *s == ConnectionState::Connected)
            .await
            .unwrap();

        for i in 0..5 {
            queue.push(format!("factory/t{i}"), b"{}".to_vec(), 0);
        }
        cancel.cancel();
        handle.await.unwrap();

        // Shutdown flush delivers what was still resident.
        assert_eq!(
            counters.sent.load(Ordering::Relaxed) + queue.depth() as u64,
            5
        );
        assert!(counters.sent.load(Ordering::Relaxed) >= 4);
    }
}
