//! Home Assistant MQTT discovery
//!
//! [`BridgeDiscovery`] announces the bridge itself (firmware version,
//! connection state, log level select). [`DeviceDiscovery`] announces every
//! device heard on the radio and serves the hub-facing `cmd/` topics.
//! [`HomeAssistantDiscovery`] routes between the two.

pub mod bridge;
pub mod device;
pub mod payload;

use async_trait::async_trait;
use rfxmqtt_core::{BridgeInfo, DeviceState, NormalizedEvent, Topics};
use serde_json::Value;
use std::sync::Arc;
use tracing::warn;

pub use bridge::BridgeDiscovery;
pub use device::DeviceDiscovery;
pub use payload::{DiscoveryEntry, HassConfig, HassDevice};

use crate::listener::MqttListener;
use crate::mqtt::{MqttMessage, MqttPublisher, PublishOptions};
use crate::Result;

/// Discovery work item, routed by the `device` tag
#[derive(Debug, Clone, PartialEq)]
pub struct DiscoveryMessage {
    /// `true` for a device event, `false` for bridge info
    pub device: bool,
    pub payload: Value,
}

impl DiscoveryMessage {
    pub fn device(event: &NormalizedEvent) -> Self {
        Self {
            device: true,
            payload: Value::Object(event.to_object()),
        }
    }

    pub fn bridge(info: &BridgeInfo) -> Self {
        Self {
            device: false,
            payload: serde_json::to_value(info).unwrap_or(Value::Null),
        }
    }
}

/// Publishes discovery configs: QoS 1, retained, under the discovery prefix
#[derive(Clone)]
pub struct DiscoveryPublisher {
    publisher: MqttPublisher,
    prefix: String,
}

impl DiscoveryPublisher {
    pub fn new(publisher: MqttPublisher, prefix: &str) -> Self {
        Self {
            publisher,
            prefix: prefix.trim_end_matches('/').to_string(),
        }
    }

    pub async fn publish_entry(&self, entry: &DiscoveryEntry) -> Result<()> {
        self.publisher
            .publish_json(
                &entry.topic(),
                &entry.config,
                Some(PublishOptions::retained(1)),
                Some(&self.prefix),
            )
            .await
    }

    /// Base-topic publish with the adapter defaults
    pub fn base(&self) -> &MqttPublisher {
        &self.publisher
    }
}

/// Entry point for discovery, and the listener for its MQTT topics
pub struct HomeAssistantDiscovery {
    topics: Topics,
    bridge: Arc<BridgeDiscovery>,
    device: Arc<DeviceDiscovery>,
}

impl HomeAssistantDiscovery {
    pub fn new(topics: Topics, bridge: Arc<BridgeDiscovery>, device: Arc<DeviceDiscovery>) -> Self {
        Self {
            topics,
            bridge,
            device,
        }
    }

    pub fn bridge(&self) -> &Arc<BridgeDiscovery> {
        &self.bridge
    }

    pub fn device(&self) -> &Arc<DeviceDiscovery> {
        &self.device
    }

    /// Route a discovery message to the bridge or device generator
    pub async fn publish_discovery_to_mqtt(&self, msg: DiscoveryMessage) {
        if msg.device {
            match serde_json::from_value::<NormalizedEvent>(msg.payload) {
                Ok(event) => self.device.publish_discovery(&event).await,
                Err(e) => warn!("Discarding device discovery message: {}", e),
            }
        } else {
            match serde_json::from_value::<BridgeInfo>(msg.payload) {
                Ok(info) => self.bridge.publish_discovery(&info).await,
                Err(e) => warn!("Discarding bridge discovery message: {}", e),
            }
        }
    }

    /// Republish the discovery configs of one stored device
    pub async fn publish_discovery_device_to_mqtt(&self, device: &DeviceState) {
        self.device.publish_device(device).await;
    }
}

#[async_trait]
impl MqttListener for HomeAssistantDiscovery {
    fn subscribe_topics(&self) -> Vec<String> {
        vec![self.topics.log_level_topic(), self.topics.hub_command_pattern()]
    }

    async fn on_mqtt_message(&self, msg: &MqttMessage) {
        if msg.topic == self.topics.log_level_topic() {
            self.bridge.on_log_level(&msg.payload).await;
        } else {
            self.device.on_hub_command(msg).await;
        }
    }
}
