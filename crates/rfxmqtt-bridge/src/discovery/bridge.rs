//! Bridge entities

use parking_lot::RwLock;
use rfxmqtt_core::config::{SettingsHandle, LOG_LEVELS};
use rfxmqtt_core::{Availability, BridgeInfo, Topics};
use std::sync::Arc;
use tracing::warn;

use super::payload::{DiscoveryEntry, HassConfig, HassDevice};
use super::DiscoveryPublisher;
use crate::mqtt::PublishOptions;
use crate::Result;

pub struct BridgeDiscovery {
    publisher: DiscoveryPublisher,
    topics: Topics,
    settings: Arc<SettingsHandle>,
    info: RwLock<Option<BridgeInfo>>,
}

impl BridgeDiscovery {
    pub fn new(publisher: DiscoveryPublisher, topics: Topics, settings: Arc<SettingsHandle>) -> Self {
        Self {
            publisher,
            topics,
            settings,
            info: RwLock::new(None),
        }
    }

    fn unique_id(&self) -> String {
        self.settings
            .read(|s| s.homeassistant.discovery_bridge_unique_id.clone())
    }

    /// Last bridge info seen
    pub fn info(&self) -> Option<BridgeInfo> {
        self.info.read().clone()
    }

    fn device_block(&self, info: &BridgeInfo) -> HassDevice {
        HassDevice {
            identifiers: vec![self.unique_id()],
            name: "RFXCOM Bridge".to_string(),
            model: Some(info.coordinator.receiver_type.clone()),
            manufacturer: Some("RFXCOM".to_string()),
            sw_version: Some(info.version.clone()),
            via_device: None,
        }
    }

    /// The three bridge entities
    pub fn entries(&self, info: &BridgeInfo) -> Vec<DiscoveryEntry> {
        let unique_id = self.unique_id();
        let device = self.device_block(info);
        let will = self.topics.will_topic();
        let info_topic = self.topics.info_topic();

        let mut version = HassConfig::new(
            "Coordinator Version",
            &format!("{}_version", unique_id),
            device.clone(),
        )
        .available_on(&will);
        version.state_topic = Some(info_topic.clone());
        version.value_template = Some("{{ value_json.coordinator.firmwareVersion }}".to_string());
        version.entity_category = Some("diagnostic".to_string());

        let mut connection = HassConfig::new(
            "Connection State",
            &format!("{}_connection_state", unique_id),
            device.clone(),
        );
        connection.state_topic = Some(will);
        connection.device_class = Some("connectivity".to_string());
        connection.payload_on = Some(Availability::Online.to_string());
        connection.payload_off = Some(Availability::Offline.to_string());
        connection.entity_category = Some("diagnostic".to_string());

        let mut log_level = HassConfig::new("Log Level", &format!("{}_log_level", unique_id), device)
            .available_on(&self.topics.will_topic());
        log_level.state_topic = Some(info_topic);
        log_level.value_template = Some("{{ value_json.logLevel | lower }}".to_string());
        log_level.command_topic = Some(self.topics.log_level_topic());
        log_level.options = Some(LOG_LEVELS.iter().map(|l| l.to_string()).collect());
        log_level.entity_category = Some("config".to_string());

        vec![
            DiscoveryEntry {
                component: "sensor",
                object_id: unique_id.clone(),
                sub_id: "version".to_string(),
                config: version,
            },
            DiscoveryEntry {
                component: "binary_sensor",
                object_id: unique_id.clone(),
                sub_id: "connection_state".to_string(),
                config: connection,
            },
            DiscoveryEntry {
                component: "select",
                object_id: unique_id,
                sub_id: "log_level".to_string(),
                config: log_level,
            },
        ]
    }

    pub async fn publish_discovery(&self, info: &BridgeInfo) {
        *self.info.write() = Some(info.clone());
        for entry in self.entries(info) {
            if let Err(e) = self.publisher.publish_entry(&entry).await {
                warn!("Failed to publish bridge discovery {}: {}", entry.topic(), e);
            }
        }
    }

    /// Publish `<base>/bridge/info`
    pub async fn publish_info(&self, info: &BridgeInfo) -> Result<()> {
        *self.info.write() = Some(info.clone());
        self.publisher
            .base()
            .publish_json(&self.topics.info, info, Some(PublishOptions::retained(1)), None)
            .await
    }

    /// Apply a log level requested over MQTT
    pub async fn on_log_level(&self, payload: &str) {
        let level = payload.trim().trim_matches('"');
        if let Err(e) = self.settings.set_log_level(level) {
            warn!("Rejected log level '{}': {}", level, e);
            return;
        }
        let updated = self.info.read().clone().map(|mut info| {
            info.log_level = self.settings.log_level();
            info
        });
        if let Some(info) = updated {
            if let Err(e) = self.publish_info(&info).await {
                warn!("Failed to publish bridge info: {}", e);
            }
        }
    }
}
