//! Broker transport seam.
//!
//! The delivery loop talks to the broker only through the [`Transport`]
//! trait: connect with a credential, publish, disconnect. Credentials come
//! from a [`TokenProvider`] collaborator; the core never mints or refreshes
//! them itself. The production implementation rides on rumqttc; tests
//! inject in-memory transports to drive the state machine without a
//! network.

use crate::error::TransportError;
use async_trait::async_trait;
use rand::Rng;
use rumqttc::{AsyncClient, ConnectReturnCode, Event, MqttOptions, Packet, QoS};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::debug;

// ============================================================================
// Credentials
// ============================================================================

/// A ready-to-use credential handle (e.g. a ServiceAccountToken exchanged
/// by an external identity collaborator).
#[derive(Debug, Clone)]
pub struct Credential {
    pub username: String,
    pub password: String,
}

/// Supplies (and refreshes) the broker credential on demand.
#[async_trait]
pub trait TokenProvider: Send + Sync {
    async fn credential(&self) -> Result<Credential, TransportError>;
}

/// Provider handing out one fixed credential, read once at startup.
pub struct StaticTokenProvider {
    credential: Credential,
}

impl StaticTokenProvider {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            credential: Credential {
                username: username.into(),
                password: password.into(),
            },
        }
    }

    /// Credential from `FACTORY_SIM_USERNAME` / `FACTORY_SIM_PASSWORD`.
    pub fn from_env() -> Self {
        Self::new(
            std::env::var("FACTORY_SIM_USERNAME").unwrap_or_else(|_| "factory-sim".to_string()),
            std::env::var("FACTORY_SIM_PASSWORD").unwrap_or_default(),
        )
    }
}

#[async_trait]
impl TokenProvider for StaticTokenProvider {
    async fn credential(&self) -> Result<Credential, TransportError> {
        Ok(self.credential.clone())
    }
}

// ============================================================================
// Transport trait
// ============================================================================

/// Connect/publish/disconnect capability against one broker endpoint.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn connect(&self, credential: &Credential) -> Result<(), TransportError>;
    async fn publish(&self, topic: &str, payload: &[u8], qos: u8) -> Result<(), TransportError>;
    async fn disconnect(&self) -> Result<(), TransportError>;
}

// ============================================================================
// Reconnect backoff
// ============================================================================

/// Exponential backoff: doubles from `base` up to `cap`, ±25% jitter on
/// the returned delay, reset to `base` after any successful connect.
#[derive(Debug)]
pub struct Backoff {
    base: Duration,
    cap: Duration,
    next: Duration,
}

impl Backoff {
    pub fn new(base: Duration, cap: Duration) -> Self {
        Self {
            base,
            cap,
            next: base,
        }
    }

    /// The nominal (un-jittered) delay the next call will draw from.
    pub fn nominal(&self) -> Duration {
        self.next
    }

    /// Draw the next delay and advance the nominal schedule.
    pub fn next_delay(&mut self) -> Duration {
        let nominal = self.next;
        self.next = (self.next * 2).min(self.cap);
        let jitter = rand::rng().random_range(0.75..=1.25);
        nominal.mul_f64(jitter)
    }

    pub fn reset(&mut self) {
        self.next = self.base;
    }
}

// ============================================================================
// MQTT transport (rumqttc)
// ============================================================================

struct MqttLive {
    client: AsyncClient,
    alive: Arc<AtomicBool>,
    poll_task: JoinHandle<()>,
}

/// Publish-only MQTT client. `connect` performs the handshake inline and
/// then hands the event loop to a background poll task; a broker-initiated
/// disconnect flips the alive flag and surfaces as a publish error on the
/// next attempt.
pub struct MqttTransport {
    host: String,
    port: u16,
    client_id: String,
    keep_alive: Duration,
    live: Mutex<Option<MqttLive>>,
}

impl MqttTransport {
    pub fn new(host: impl Into<String>, port: u16, client_id: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port,
            client_id: client_id.into(),
            keep_alive: Duration::from_secs(30),
            live: Mutex::new(None),
        }
    }

    fn take_live(&self) -> Option<MqttLive> {
        self.live.lock().unwrap_or_else(|e| e.into_inner()).take()
    }

    fn current(&self) -> Option<(AsyncClient, Arc<AtomicBool>)> {
        self.live
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .map(|live| (live.client.clone(), Arc::clone(&live.alive)))
    }
}

fn to_qos(qos: u8) -> QoS {
    match qos {
        2 => QoS::ExactlyOnce,
        1 => QoS::AtLeastOnce,
        _ => QoS::AtMostOnce,
    }
}

#[async_trait]
impl Transport for MqttTransport {
    async fn connect(&self, credential: &Credential) -> Result<(), TransportError> {
        // Tear down any previous session first.
        if let Some(live) = self.take_live() {
            live.poll_task.abort();
        }

        let mut options = MqttOptions::new(&self.client_id, &self.host, self.port);
        options.set_keep_alive(self.keep_alive);
        if !credential.username.is_empty() {
            options.set_credentials(&credential.username, &credential.password);
        }

        let (client, mut event_loop) = AsyncClient::new(options, 64);

        // Wait for the CONNACK before declaring the handshake complete.
        loop {
            match event_loop.poll().await {
                Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                    if ack.code == ConnectReturnCode::Success {
                        break;
                    }
                    return Err(TransportError::Connection(format!(
                        "broker rejected connection: {:?}",
                        ack.code
                    )));
                }
                Ok(_) => continue,
                Err(e) => return Err(TransportError::Connection(e.to_string())),
            }
        }

        let alive = Arc::new(AtomicBool::new(true));
        let poll_alive = Arc::clone(&alive);
        let poll_task = tokio::spawn(async move {
            loop {
                if let Err(e) = event_loop.poll().await {
                    debug!(error = %e, "mqtt event loop terminated");
                    poll_alive.store(false, Ordering::Relaxed);
                    break;
                }
            }
        });

        *self.live.lock().unwrap_or_else(|e| e.into_inner()) = Some(MqttLive {
            client,
            alive,
            poll_task,
        });
        Ok(())
    }

    async fn publish(&self, topic: &str, payload: &[u8], qos: u8) -> Result<(), TransportError> {
        let Some((client, alive)) = self.current() else {
            return Err(TransportError::Publish("not connected".to_string()));
        };
        if !alive.load(Ordering::Relaxed) {
            return Err(TransportError::Publish("connection lost".to_string()));
        }
        client
            .publish(topic, to_qos(qos), false, payload.to_vec())
            .await
            .map_err(|e| TransportError::Publish(e.to_string()))
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        if let Some(live) = self.take_live() {
            let _ = live.client.disconnect().await;
            live.poll_task.abort();
        }
        Ok(())
    }
}
