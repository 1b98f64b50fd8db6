//! Common test helpers for rfxmqtt tests
//!
//! This crate provides:
//! - Condition-based waiting (no hardcoded sleeps)
//! - An in-memory MQTT broker recording every publish
//! - Builders for received radio frames
//! - Settings pointed at the virtual transceiver and a temp data dir

use async_trait::async_trait;
use parking_lot::Mutex;
use rfxmqtt_bridge::{Broker, BridgeError, BridgeEvent, ConnectOptions, MqttClient, MqttMessage, MqttSession, Will};
use rfxmqtt_core::config::{Settings, MOCK_PORT};
use rfxmqtt_core::TopicPattern;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

pub use rfxmqtt_transport::MockTransceiver;

/// Default test timeout
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default condition check interval
pub const DEFAULT_CHECK_INTERVAL: Duration = Duration::from_millis(10);

// ============================================================================
// Condition-Based Waiting
// ============================================================================

/// Wait for a condition with timeout - condition-based, not time-based
pub async fn wait_for<F, Fut>(check: F, interval: Duration, max_wait: Duration) -> bool
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let start = Instant::now();
    while start.elapsed() < max_wait {
        if check().await {
            return true;
        }
        tokio::time::sleep(interval).await;
    }
    false
}

// ============================================================================
// In-memory broker
// ============================================================================

/// One recorded publish
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Published {
    pub topic: String,
    pub payload: String,
    pub qos: u8,
    pub retain: bool,
}

#[derive(Default)]
struct BrokerState {
    published: Mutex<Vec<Published>>,
    subscriptions: Mutex<Vec<String>>,
    events: Mutex<Option<mpsc::Sender<BridgeEvent>>>,
    will: Mutex<Option<Will>>,
    fail_connect: AtomicBool,
    fail_publish: AtomicBool,
    connected: AtomicBool,
    connects: AtomicU32,
}

/// Broker double: records publishes and subscriptions, injects messages
#[derive(Clone, Default)]
pub struct MemoryBroker {
    state: Arc<BrokerState>,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every following connect fail
    pub fn set_fail_connect(&self, fail: bool) {
        self.state.fail_connect.store(fail, Ordering::SeqCst);
    }

    /// Make every following publish fail while the session stays up
    pub fn set_fail_publish(&self, fail: bool) {
        self.state.fail_publish.store(fail, Ordering::SeqCst);
    }

    pub fn is_connected(&self) -> bool {
        self.state.connected.load(Ordering::SeqCst)
    }

    pub fn connect_count(&self) -> u32 {
        self.state.connects.load(Ordering::SeqCst)
    }

    pub fn will(&self) -> Option<Will> {
        self.state.will.lock().clone()
    }

    pub fn published(&self) -> Vec<Published> {
        self.state.published.lock().clone()
    }

    /// Every publish to an exact topic, oldest first
    pub fn published_to(&self, topic: &str) -> Vec<Published> {
        self.state
            .published
            .lock()
            .iter()
            .filter(|p| p.topic == topic)
            .cloned()
            .collect()
    }

    /// Every publish whose topic starts with `prefix`
    pub fn published_under(&self, prefix: &str) -> Vec<Published> {
        self.state
            .published
            .lock()
            .iter()
            .filter(|p| p.topic.starts_with(prefix))
            .cloned()
            .collect()
    }

    pub fn last_payload(&self, topic: &str) -> Option<String> {
        self.published_to(topic).pop().map(|p| p.payload)
    }

    pub fn subscriptions(&self) -> Vec<String> {
        self.state.subscriptions.lock().clone()
    }

    /// Whether any subscription filter matches `topic`
    pub fn is_subscribed(&self, topic: &str) -> bool {
        self.state
            .subscriptions
            .lock()
            .iter()
            .any(|f| TopicPattern::compile(f).map(|p| p.matches(topic)).unwrap_or(false))
    }

    pub fn clear_published(&self) {
        self.state.published.lock().clear();
    }

    /// Wait until at least `count` publishes reached `topic`
    pub async fn wait_for_publish(&self, topic: &str, count: usize, max_wait: Duration) -> bool {
        wait_for(
            || async { self.published_to(topic).len() >= count },
            DEFAULT_CHECK_INTERVAL,
            max_wait,
        )
        .await
    }

    /// Deliver a message to the connected session
    pub async fn inject(&self, topic: &str, payload: &str) -> bool {
        let tx = self.state.events.lock().clone();
        match tx {
            Some(tx) => tx
                .send(BridgeEvent::Message(MqttMessage::new(topic, payload)))
                .await
                .is_ok(),
            None => false,
        }
    }

    /// Drop the session as if the broker went away
    ///
    /// Subscriptions are forgotten, like a clean-session broker does.
    pub async fn drop_connection(&self) {
        self.state.connected.store(false, Ordering::SeqCst);
        self.state.subscriptions.lock().clear();
        self.send_event(BridgeEvent::Disconnected {
            reason: Some("broker closed the connection".to_string()),
        })
        .await;
    }

    /// Bring a dropped session back, as the client's reconnect would
    pub async fn restore_connection(&self) {
        self.state.connected.store(true, Ordering::SeqCst);
        self.send_event(BridgeEvent::Connected).await;
    }

    async fn send_event(&self, event: BridgeEvent) {
        let tx = self.state.events.lock().clone();
        if let Some(tx) = tx {
            let _ = tx.send(event).await;
        }
    }
}

struct MemoryClient {
    state: Arc<BrokerState>,
}

#[async_trait]
impl MqttClient for MemoryClient {
    async fn publish(&self, topic: &str, payload: Vec<u8>, qos: u8, retain: bool) -> rfxmqtt_bridge::Result<()> {
        if !self.state.connected.load(Ordering::SeqCst) {
            return Err(BridgeError::NotConnected);
        }
        if self.state.fail_publish.load(Ordering::SeqCst) {
            return Err(BridgeError::Send(format!("publish to {} rejected", topic)));
        }
        self.state.published.lock().push(Published {
            topic: topic.to_string(),
            payload: String::from_utf8_lossy(&payload).into_owned(),
            qos,
            retain,
        });
        Ok(())
    }

    async fn subscribe(&self, filter: &str, _qos: u8) -> rfxmqtt_bridge::Result<()> {
        let mut subscriptions = self.state.subscriptions.lock();
        if !subscriptions.iter().any(|f| f == filter) {
            subscriptions.push(filter.to_string());
        }
        Ok(())
    }

    async fn disconnect(&self) -> rfxmqtt_bridge::Result<()> {
        self.state.connected.store(false, Ordering::SeqCst);
        self.state.events.lock().take();
        Ok(())
    }
}

#[async_trait]
impl Broker for MemoryBroker {
    async fn connect(&self, options: &ConnectOptions) -> rfxmqtt_bridge::Result<MqttSession> {
        self.state.connects.fetch_add(1, Ordering::SeqCst);
        if self.state.fail_connect.load(Ordering::SeqCst) {
            return Err(BridgeError::ConnectionFailed(format!(
                "connection refused by {}:{}",
                options.host, options.port
            )));
        }

        let (tx, rx) = mpsc::channel(100);
        let _ = tx.send(BridgeEvent::Connected).await;
        *self.state.events.lock() = Some(tx);
        *self.state.will.lock() = Some(options.will.clone());
        self.state.connected.store(true, Ordering::SeqCst);

        Ok(MqttSession {
            client: Arc::new(MemoryClient {
                state: Arc::clone(&self.state),
            }),
            events: rx,
        })
    }
}

// ============================================================================
// Radio frames
// ============================================================================

/// Received lighting2 (AC) frame
pub fn lighting2_frame(id: u32, unit: u8, command: u8, level: u8) -> Vec<u8> {
    let id = id.to_be_bytes();
    vec![
        0x0B,
        0x11,
        0x00,
        0x00,
        id[0] & 0x03,
        id[1],
        id[2],
        id[3],
        unit,
        command,
        level,
        0x70,
    ]
}

/// Received temp1 frame; `tenths` is the temperature in tenths of a degree
pub fn temp1_frame(id: u16, tenths: i16, battery: u8) -> Vec<u8> {
    let id = id.to_be_bytes();
    let magnitude = tenths.unsigned_abs();
    let mut high = (magnitude >> 8) as u8 & 0x7F;
    if tenths < 0 {
        high |= 0x80;
    }
    vec![
        0x08,
        0x50,
        0x01,
        0x00,
        id[0],
        id[1],
        high,
        (magnitude & 0xFF) as u8,
        0x60 | (battery & 0x0F),
    ]
}

// ============================================================================
// Settings
// ============================================================================

/// Settings for the virtual transceiver, storing snapshots under `data_dir`
pub fn test_settings(data_dir: &std::path::Path) -> Settings {
    let mut settings = Settings::default();
    settings.data_dir = data_dir.to_path_buf();
    settings.mqtt.base_topic = "rfxcom2mqtt".to_string();
    settings.mqtt.client_id = "rfxmqtt-test".to_string();
    settings.rfxcom.usbport = MOCK_PORT.to_string();
    settings.rfxcom.status_timeout_ms = 500;
    settings.healthcheck.enabled = false;
    settings
}

/// Temp dir plus settings pointing into it
pub fn temp_settings() -> (tempfile::TempDir, Settings) {
    let dir = tempfile::tempdir().expect("create temp dir");
    let settings = test_settings(dir.path());
    (dir, settings)
}
