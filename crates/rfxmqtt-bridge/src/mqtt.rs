//! MQTT adapter
//!
//! Owns the broker session, the last will, the listener dispatch table and
//! the publish defaults. The broker connection sits behind the [`Broker`]
//! trait; [`RumqttBroker`] is the production implementation.

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use rfxmqtt_core::config::MqttSettings;
use rfxmqtt_core::{Availability, Topics};
use rumqttc::{AsyncClient, Event, LastWill, MqttOptions, Packet, QoS as MqttQoS};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

use crate::listener::{ListenerRegistry, MqttListener};
use crate::{BridgeError, BridgeEvent, Result};

/// Time allowed for the broker to acknowledge the connection
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// An inbound MQTT message
#[derive(Debug, Clone, PartialEq)]
pub struct MqttMessage {
    pub topic: String,
    pub payload: String,
    pub retain: bool,
}

impl MqttMessage {
    pub fn new(topic: &str, payload: &str) -> Self {
        Self {
            topic: topic.to_string(),
            payload: payload.to_string(),
            retain: false,
        }
    }

    /// Build from raw bytes; invalid UTF-8 is replaced
    pub fn from_bytes(topic: &str, payload: &[u8], retain: bool) -> Self {
        Self {
            topic: topic.to_string(),
            payload: String::from_utf8_lossy(payload).into_owned(),
            retain,
        }
    }
}

/// Per-call publish options; `None` falls back to the adapter default
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublishOptions {
    pub qos: Option<u8>,
    pub retain: Option<bool>,
}

impl PublishOptions {
    pub fn retained(qos: u8) -> Self {
        Self {
            qos: Some(qos),
            retain: Some(true),
        }
    }
}

/// Last will registered with the broker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Will {
    pub topic: String,
    pub payload: String,
    pub qos: u8,
    pub retain: bool,
}

/// Everything a broker needs to open a session
#[derive(Debug, Clone)]
pub struct ConnectOptions {
    pub host: String,
    pub port: u16,
    pub client_id: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub keep_alive: Duration,
    pub will: Will,
    pub connect_timeout: Duration,
}

/// Client half of a broker session
#[async_trait]
pub trait MqttClient: Send + Sync {
    async fn publish(&self, topic: &str, payload: Vec<u8>, qos: u8, retain: bool) -> Result<()>;

    async fn subscribe(&self, filter: &str, qos: u8) -> Result<()>;

    async fn disconnect(&self) -> Result<()>;
}

/// An open broker session
pub struct MqttSession {
    pub client: Arc<dyn MqttClient>,
    /// Connection events and inbound messages
    pub events: mpsc::Receiver<BridgeEvent>,
}

/// Connects to a broker
#[async_trait]
pub trait Broker: Send + Sync {
    /// Open a session; fails if the broker does not acknowledge in time
    async fn connect(&self, options: &ConnectOptions) -> Result<MqttSession>;
}

/// Parse MQTT QoS level
fn parse_qos(qos: u8) -> MqttQoS {
    match qos {
        0 => MqttQoS::AtMostOnce,
        1 => MqttQoS::AtLeastOnce,
        _ => MqttQoS::ExactlyOnce,
    }
}

/// Broker backed by rumqttc
#[derive(Debug, Default, Clone, Copy)]
pub struct RumqttBroker;

struct RumqttClient {
    client: AsyncClient,
    task: tokio::task::JoinHandle<()>,
}

#[async_trait]
impl MqttClient for RumqttClient {
    async fn publish(&self, topic: &str, payload: Vec<u8>, qos: u8, retain: bool) -> Result<()> {
        self.client
            .publish(topic, parse_qos(qos), retain, payload)
            .await
            .map_err(|e| BridgeError::Send(format!("MQTT publish failed: {}", e)))
    }

    async fn subscribe(&self, filter: &str, qos: u8) -> Result<()> {
        self.client
            .subscribe(filter, parse_qos(qos))
            .await
            .map_err(|e| BridgeError::ConnectionFailed(format!("Subscribe failed: {}", e)))
    }

    async fn disconnect(&self) -> Result<()> {
        let result = self
            .client
            .disconnect()
            .await
            .map_err(|e| BridgeError::Send(format!("MQTT disconnect failed: {}", e)));
        // give the event loop a moment to flush the disconnect packet
        tokio::time::sleep(Duration::from_millis(50)).await;
        self.task.abort();
        result
    }
}

#[async_trait]
impl Broker for RumqttBroker {
    async fn connect(&self, options: &ConnectOptions) -> Result<MqttSession> {
        let mut mqttoptions = MqttOptions::new(&options.client_id, &options.host, options.port);
        mqttoptions.set_keep_alive(options.keep_alive);
        mqttoptions.set_last_will(LastWill::new(
            &options.will.topic,
            options.will.payload.clone(),
            parse_qos(options.will.qos),
            options.will.retain,
        ));

        if let (Some(user), Some(pass)) = (&options.username, &options.password) {
            mqttoptions.set_credentials(user, pass);
        }

        let (client, mut eventloop) = AsyncClient::new(mqttoptions, 100);
        let (tx, rx) = mpsc::channel(100);
        let (ready_tx, ready_rx) = oneshot::channel::<std::result::Result<(), String>>();

        info!("MQTT connecting to {}:{}", options.host, options.port);

        // Spawn event loop
        let task = tokio::spawn(async move {
            let mut ready = Some(ready_tx);
            loop {
                match eventloop.poll().await {
                    Ok(Event::Incoming(Packet::Publish(publish))) => {
                        debug!("MQTT received: {} ({} bytes)", publish.topic, publish.payload.len());
                        let msg = MqttMessage::from_bytes(&publish.topic, &publish.payload, publish.retain);
                        if tx.send(BridgeEvent::Message(msg)).await.is_err() {
                            break;
                        }
                    }
                    Ok(Event::Incoming(Packet::ConnAck(_))) => {
                        info!("MQTT connected to broker");
                        if let Some(ready) = ready.take() {
                            let _ = ready.send(Ok(()));
                        }
                        let _ = tx.send(BridgeEvent::Connected).await;
                    }
                    Ok(Event::Incoming(Packet::Disconnect)) => {
                        warn!("MQTT disconnected from broker");
                        let _ = tx
                            .send(BridgeEvent::Disconnected {
                                reason: Some("Broker disconnect".to_string()),
                            })
                            .await;
                    }
                    Err(e) => {
                        // the first failure before ConnAck is a connect failure
                        if let Some(ready) = ready.take() {
                            let _ = ready.send(Err(e.to_string()));
                            break;
                        }
                        error!("MQTT error: {:?}", e);
                        let _ = tx
                            .send(BridgeEvent::Disconnected {
                                reason: Some(e.to_string()),
                            })
                            .await;
                        tokio::time::sleep(Duration::from_secs(5)).await;
                    }
                    _ => {}
                }
            }
        });

        match tokio::time::timeout(options.connect_timeout, ready_rx).await {
            Ok(Ok(Ok(()))) => Ok(MqttSession {
                client: Arc::new(RumqttClient { client, task }),
                events: rx,
            }),
            Ok(Ok(Err(reason))) => {
                task.abort();
                Err(BridgeError::ConnectionFailed(reason))
            }
            Ok(Err(_)) => {
                task.abort();
                Err(BridgeError::ConnectionFailed("event loop ended".to_string()))
            }
            Err(_) => {
                task.abort();
                Err(BridgeError::ConnectionFailed(format!(
                    "no answer from {}:{} within {:?}",
                    options.host, options.port, options.connect_timeout
                )))
            }
        }
    }
}

type ClientSlot = Arc<RwLock<Option<Arc<dyn MqttClient>>>>;

/// Cloneable publish handle sharing the adapter's connection
#[derive(Clone)]
pub struct MqttPublisher {
    client: ClientSlot,
    base: String,
    defaults: PublishOptions,
}

impl MqttPublisher {
    /// Default QoS and retain flag
    pub fn defaults(&self) -> (u8, bool) {
        (self.defaults.qos.unwrap_or(0), self.defaults.retain.unwrap_or(false))
    }

    pub fn base(&self) -> &str {
        &self.base
    }

    pub fn is_connected(&self) -> bool {
        self.client.read().is_some()
    }

    /// Publish `payload` on `<base>/<topic>`
    ///
    /// `options` override the adapter defaults field by field and
    /// `base_override` replaces the base topic (discovery prefix).
    pub async fn publish(
        &self,
        topic: &str,
        payload: &str,
        options: Option<PublishOptions>,
        base_override: Option<&str>,
    ) -> Result<()> {
        let client = self.client.read().clone().ok_or(BridgeError::NotConnected)?;

        let options = options.unwrap_or_default();
        let qos = options.qos.or(self.defaults.qos).unwrap_or(0);
        let retain = options.retain.or(self.defaults.retain).unwrap_or(false);
        let full_topic = format!("{}/{}", base_override.unwrap_or(&self.base), topic);

        client
            .publish(&full_topic, payload.as_bytes().to_vec(), qos, retain)
            .await?;
        debug!("MQTT published {} (qos {}, retain {})", full_topic, qos, retain);
        Ok(())
    }

    /// Publish a serializable value as JSON
    pub async fn publish_json<T: serde::Serialize>(
        &self,
        topic: &str,
        value: &T,
        options: Option<PublishOptions>,
        base_override: Option<&str>,
    ) -> Result<()> {
        let payload = serde_json::to_string(value)?;
        self.publish(topic, &payload, options, base_override).await
    }
}

/// MQTT adapter
pub struct MqttAdapter {
    settings: MqttSettings,
    topics: Topics,
    broker: Arc<dyn Broker>,
    client: ClientSlot,
    listeners: RwLock<ListenerRegistry>,
    running: Arc<Mutex<bool>>,
}

impl MqttAdapter {
    /// Create a new MQTT adapter
    pub fn new(settings: MqttSettings, broker: Arc<dyn Broker>) -> Self {
        let topics = Topics::new(&settings.base_topic);

        Self {
            settings,
            topics,
            broker,
            client: Arc::new(RwLock::new(None)),
            listeners: RwLock::new(ListenerRegistry::new()),
            running: Arc::new(Mutex::new(false)),
        }
    }

    pub fn is_running(&self) -> bool {
        *self.running.lock()
    }

    pub fn topics(&self) -> &Topics {
        &self.topics
    }

    /// Publish handle with the adapter defaults
    pub fn publisher(&self) -> MqttPublisher {
        MqttPublisher {
            client: Arc::clone(&self.client),
            base: self.topics.base.clone(),
            defaults: PublishOptions {
                qos: Some(self.settings.qos),
                retain: Some(self.settings.retain),
            },
        }
    }

    /// Publish through the adapter defaults
    pub async fn publish(
        &self,
        topic: &str,
        payload: &str,
        options: Option<PublishOptions>,
        base_override: Option<&str>,
    ) -> Result<()> {
        self.publisher()
            .publish(topic, payload, options, base_override)
            .await
    }

    /// Register a listener; subscribes right away when connected
    pub async fn add_listener(&self, listener: Arc<dyn MqttListener>) {
        let added = self.listeners.write().add(listener);
        let client = self.client.read().clone();
        if let Some(client) = client {
            for filter in added {
                if let Err(e) = client.subscribe(&filter, self.settings.qos).await {
                    warn!("Failed to subscribe to {}: {}", filter, e);
                }
            }
        }
    }

    pub fn clear_listeners(&self) {
        self.listeners.write().clear();
    }

    /// Every filter currently registered
    pub fn filters(&self) -> Vec<String> {
        self.listeners.read().filters()
    }

    /// Deliver a message to every listener with a matching filter
    pub async fn dispatch(&self, msg: &MqttMessage) {
        let listeners = self.listeners.read().matching(&msg.topic);
        if listeners.is_empty() {
            debug!("No listener for {}", msg.topic);
            return;
        }
        futures::future::join_all(listeners.iter().map(|l| l.on_mqtt_message(msg))).await;
    }

    fn connect_options(&self) -> ConnectOptions {
        ConnectOptions {
            host: self.settings.host().to_string(),
            port: self.settings.port,
            client_id: self.settings.client_id.clone(),
            username: self.settings.username.clone(),
            password: self.settings.password.clone(),
            keep_alive: Duration::from_secs(self.settings.keepalive as u64),
            will: Will {
                topic: self.topics.will_topic(),
                payload: Availability::Offline.to_string(),
                qos: 1,
                retain: true,
            },
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }

    /// Connect, announce `online` and subscribe every listener filter
    pub async fn connect(&self) -> Result<mpsc::Receiver<BridgeEvent>> {
        if *self.running.lock() {
            return Err(BridgeError::Other("MQTT adapter already connected".to_string()));
        }

        let options = self.connect_options();
        let session = self.broker.connect(&options).await?;
        *self.client.write() = Some(Arc::clone(&session.client));
        *self.running.lock() = true;

        if let Err(e) = self.announce().await {
            warn!("MQTT announce failed, closing session: {}", e);
            if let Err(close) = session.client.disconnect().await {
                debug!("MQTT disconnect after failed announce: {}", close);
            }
            *self.client.write() = None;
            *self.running.lock() = false;
            return Err(e);
        }

        info!("MQTT adapter connected as {}", options.client_id);
        Ok(session.events)
    }

    /// Publish `online` and subscribe every listener filter
    ///
    /// Called on connect and again whenever the broker session is
    /// re-established.
    pub async fn announce(&self) -> Result<()> {
        let client = self.client.read().clone().ok_or(BridgeError::NotConnected)?;

        self.publish(
            &self.topics.will,
            Availability::Online.as_str(),
            Some(PublishOptions::retained(1)),
            None,
        )
        .await?;

        for filter in self.filters() {
            client.subscribe(&filter, self.settings.qos).await?;
            debug!("MQTT subscribed to: {}", filter);
        }
        Ok(())
    }

    /// Publish `offline` and close the session
    pub async fn disconnect(&self) -> Result<()> {
        let client = self.client.read().clone();
        let Some(client) = client else {
            return Ok(());
        };

        if let Err(e) = self
            .publish(
                &self.topics.will,
                Availability::Offline.as_str(),
                Some(PublishOptions::retained(1)),
                None,
            )
            .await
        {
            warn!("Failed to publish offline status: {}", e);
        }

        let result = client.disconnect().await;
        *self.client.write() = None;
        *self.running.lock() = false;
        info!("MQTT adapter disconnected");
        result
    }
}
