//! Device entities and the hub command channel

use rfxmqtt_core::config::SettingsHandle;
use rfxmqtt_core::store::{DeviceStore, EntityStore};
use rfxmqtt_core::topic::{topic_entity, HUB_COMMAND_SUFFIX};
use rfxmqtt_core::types::{
    entity_id, sanitize_id, BinarySensorEntity, CommandEntity, DevicePatch, SensorEntity, DEVICE_ID_FIELD,
};
use rfxmqtt_core::{DeviceState, EntityState, NormalizedEvent, Topics};
use serde_json::{json, Map, Value};
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::payload::{DiscoveryEntry, HassConfig, HassDevice};
use super::DiscoveryPublisher;
use crate::mqtt::MqttMessage;
use crate::rfxcom::{transition, RfxcomBridge};
use crate::{BridgeError, Result};

const MOODS: [&str; 5] = ["mood1", "mood2", "mood3", "mood4", "mood5"];

/// Statuses reported as `ON` by security sensors
const SECURITY_ACTIVE: [&str; 5] = ["Alarm", "Alarm Delayed", "Motion", "Panic", "Tamper"];

/// Sub-entity kinds a family exposes
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    pub switch: bool,
    pub mood_select: bool,
    pub chime_select: bool,
    pub cover: bool,
    pub binary_sensor: bool,
    pub temperature: bool,
    pub humidity: bool,
}

impl Capabilities {
    pub fn for_protocol(protocol: &str) -> Self {
        let mut caps = Capabilities::default();
        match protocol {
            "lighting5" => {
                caps.switch = true;
                caps.mood_select = true;
            }
            p if p.starts_with("lighting") => caps.switch = true,
            "chime1" => caps.chime_select = true,
            "blinds1" | "rfy" => caps.cover = true,
            "security1" => caps.binary_sensor = true,
            p if p.starts_with("temphumidity") => {
                caps.temperature = true;
                caps.humidity = true;
            }
            p if p.starts_with("temp") => caps.temperature = true,
            p if p.starts_with("humidity") => caps.humidity = true,
            _ => {}
        }
        caps
    }
}

/// Add the sub-entities an event implies; returns whether anything changed
pub fn attach_entities(device: &mut DeviceState, event: &NormalizedEvent) -> bool {
    let before = device.clone();
    let caps = Capabilities::for_protocol(&event.protocol);
    let id = event.entity_id();
    let unit_code = event.unit_code.clone().filter(|_| !event.is_group);
    let name = match &unit_code {
        Some(unit) => format!("{} {}", device.name, unit),
        None => device.name.clone(),
    };

    let command = |options: Vec<String>| CommandEntity {
        id: id.clone(),
        name: name.clone(),
        unit_code: unit_code.clone(),
        is_group: event.is_group,
        options,
    };

    if caps.switch {
        device.switches.entry(id.clone()).or_insert_with(|| command(Vec::new()));
    }
    if caps.cover {
        device.covers.entry(id.clone()).or_insert_with(|| command(Vec::new()));
    }
    if caps.mood_select {
        device
            .selects
            .entry(id.clone())
            .or_insert_with(|| command(MOODS.iter().map(|m| m.to_string()).collect()));
    }
    if caps.chime_select {
        device
            .selects
            .entry(id.clone())
            .or_insert_with(|| command(vec!["chime".to_string()]));
    }

    let mut sensor = |suffix: &str, label: &str, property: &str, unit: Option<&str>, class: Option<&str>| {
        let sensor_id = format!("{}_{}", id, suffix);
        device.sensors.entry(sensor_id.clone()).or_insert_with(|| SensorEntity {
            id: sensor_id,
            name: format!("{} {}", name, label),
            property: property.to_string(),
            unit_of_measurement: unit.map(str::to_string),
            device_class: class.map(str::to_string),
            unit_code: unit_code.clone(),
        });
    };

    if caps.temperature {
        sensor("temperature", "Temperature", "temperature", Some("°C"), Some("temperature"));
    }
    if caps.humidity {
        sensor("humidity", "Humidity", "humidity", Some("%"), Some("humidity"));
    }
    sensor("rssi", "Rssi", "rssi", None, None);
    if event.battery_level.is_some() {
        sensor("battery", "Battery", "batteryLevel", None, None);
    }

    if caps.binary_sensor {
        device
            .binary_sensors
            .entry(id.clone())
            .or_insert_with(|| BinarySensorEntity {
                id: id.clone(),
                name: name.clone(),
                property: "status".to_string(),
                device_class: Some("safety".to_string()),
                payload_on: "ON".to_string(),
                payload_off: "OFF".to_string(),
                unit_code: unit_code.clone(),
            });
    }

    *device != before
}

/// Generates device discovery and serves `<base>/cmd/...`
pub struct DeviceDiscovery {
    publisher: DiscoveryPublisher,
    topics: Topics,
    settings: Arc<SettingsHandle>,
    rfxcom: Arc<RfxcomBridge>,
    devices: Arc<DeviceStore>,
    entities: Arc<EntityStore>,
}

impl DeviceDiscovery {
    pub fn new(
        publisher: DiscoveryPublisher,
        topics: Topics,
        settings: Arc<SettingsHandle>,
        rfxcom: Arc<RfxcomBridge>,
        devices: Arc<DeviceStore>,
        entities: Arc<EntityStore>,
    ) -> Self {
        Self {
            publisher,
            topics,
            settings,
            rfxcom,
            devices,
            entities,
        }
    }

    fn bridge_id(&self) -> String {
        self.settings
            .read(|s| s.homeassistant.discovery_bridge_unique_id.clone())
    }

    /// Base-relative state topic of a topic entity
    fn state_suffix(&self, topic_entity: &str) -> String {
        format!("{}/state", self.topics.device_suffix(topic_entity))
    }

    /// Stored device, or a fresh one named from the static config
    fn resolve_device(&self, event: &NormalizedEvent) -> DeviceState {
        if let Some(device) = self.devices.get(&event.id) {
            return device;
        }
        let name = self
            .settings
            .read(|s| s.find_device(&event.id).map(|d| d.display_name().to_string()))
            .unwrap_or_else(|| event.id.clone());
        DeviceState::new(&event.id, &name, &event.protocol, event.subtype, &event.subtype_name)
    }

    /// Discovery entries for every sub-entity of a device
    pub fn entries(&self, device: &DeviceState) -> Vec<DiscoveryEntry> {
        let bridge_id = self.bridge_id();
        let object_id = sanitize_id(&device.id);
        let will = self.topics.will_topic();
        let block = HassDevice {
            identifiers: vec![format!("{}_{}", bridge_id, object_id)],
            name: device.name.clone(),
            model: Some(format!("{} {}", device.protocol, device.subtype_name)),
            manufacturer: None,
            sw_version: None,
            via_device: Some(bridge_id),
        };

        let entry = |component: &'static str, sub_id: &str, name: &str| {
            let unique_id = format!("{}_{}", sub_id, component);
            DiscoveryEntry {
                component,
                object_id: object_id.clone(),
                sub_id: unique_id.clone(),
                config: HassConfig::new(name, &unique_id, block.clone()).available_on(&will),
            }
        };
        let state_topic = |unit_code: Option<&str>, is_group: bool| {
            self.topics
                .full(&self.state_suffix(&topic_entity(&device.id, unit_code, is_group)))
        };

        let mut entries = Vec::new();

        for switch in device.switches.values() {
            let mut e = entry("switch", &switch.id, &switch.name);
            e.config.command_topic = Some(switch.command_topic(&self.topics, &device.protocol, &device.id));
            e.config.state_topic = Some(state_topic(switch.unit_code.as_deref(), switch.is_group));
            e.config.value_template = Some(
                "{{ 'ON' if value_json.command in ['On', 'Group On', 'All On', 'Set Level'] else 'OFF' }}"
                    .to_string(),
            );
            let (on, off) = if switch.is_group {
                ("group on", "group off")
            } else {
                ("on", "off")
            };
            e.config.payload_on = Some(on.to_string());
            e.config.payload_off = Some(off.to_string());
            entries.push(e);
        }

        for cover in device.covers.values() {
            let mut e = entry("cover", &cover.id, &cover.name);
            e.config.command_topic = Some(cover.command_topic(&self.topics, &device.protocol, &device.id));
            e.config.payload_open = Some("open".to_string());
            e.config.payload_close = Some("close".to_string());
            e.config.payload_stop = Some("stop".to_string());
            entries.push(e);
        }

        for select in device.selects.values() {
            let mut e = entry("select", &select.id, &select.name);
            e.config.command_topic = Some(select.command_topic(&self.topics, &device.protocol, &device.id));
            e.config.state_topic = Some(state_topic(select.unit_code.as_deref(), select.is_group));
            e.config.value_template = Some("{{ value_json.command | lower }}".to_string());
            e.config.options = Some(select.options.clone());
            entries.push(e);
        }

        for sensor in device.sensors.values() {
            let mut e = entry("sensor", &sensor.id, &sensor.name);
            e.config.state_topic = Some(state_topic(sensor.unit_code.as_deref(), false));
            e.config.value_template = Some(format!("{{{{ value_json.{} }}}}", sensor.property));
            e.config.unit_of_measurement = sensor.unit_of_measurement.clone();
            e.config.device_class = sensor.device_class.clone();
            if sensor.device_class.is_some() {
                e.config.state_class = Some("measurement".to_string());
            } else {
                e.config.entity_category = Some("diagnostic".to_string());
            }
            entries.push(e);
        }

        for binary in device.binary_sensors.values() {
            let mut e = entry("binary_sensor", &binary.id, &binary.name);
            e.config.state_topic = Some(state_topic(binary.unit_code.as_deref(), false));
            let active = SECURITY_ACTIVE
                .iter()
                .map(|s| format!("'{}'", s))
                .collect::<Vec<_>>()
                .join(", ");
            e.config.value_template = Some(format!(
                "{{{{ '{}' if value_json.{} in [{}] else '{}' }}}}",
                binary.payload_on, binary.property, active, binary.payload_off
            ));
            e.config.device_class = binary.device_class.clone();
            e.config.payload_on = Some(binary.payload_on.clone());
            e.config.payload_off = Some(binary.payload_off.clone());
            entries.push(e);
        }

        entries
    }

    /// Publish every discovery entry of a device
    pub async fn publish_device(&self, device: &DeviceState) {
        for entry in self.entries(device) {
            if let Err(e) = self.publisher.publish_entry(&entry).await {
                warn!("Failed to publish discovery {}: {}", entry.topic(), e);
            }
        }
    }

    /// Handle one radio event: discover, store and publish state
    pub async fn publish_discovery(&self, event: &NormalizedEvent) {
        let mut device = self.resolve_device(event);
        let is_new = !self.devices.contains(&event.id);
        let changed = attach_entities(&mut device, event);

        if is_new || changed {
            let device = self.devices.set(device.id.clone(), DevicePatch::from(device));
            if is_new {
                info!("Discovered {} device {} ({})", device.protocol, device.id, device.subtype_name);
            }
            self.publish_device(&device).await;
        }

        let state = self.entities.set(event.entity_id(), event.to_state_patch());
        let topic_entity = topic_entity(&event.id, event.unit_code.as_deref(), event.is_group);
        self.publish_state(&topic_entity, &state).await;
    }

    async fn publish_state(&self, topic_entity: &str, state: &EntityState) {
        if let Err(e) = self
            .publisher
            .base()
            .publish_json(&self.state_suffix(topic_entity), state, None, None)
            .await
        {
            warn!("Failed to publish state of {}: {}", state.id, e);
        }
    }

    /// Handle `<base>/cmd/<family>/<deviceId>[/<unitCode>]`
    pub async fn on_hub_command(&self, msg: &MqttMessage) {
        let Some(rest) = self.topics.strip_base(&msg.topic) else {
            warn!("Ignoring hub command outside base topic: {}", msg.topic);
            return;
        };
        let segments: Vec<&str> = rest.split('/').collect();
        if segments.len() < 3 || segments[0] != HUB_COMMAND_SUFFIX || segments[1].is_empty() || segments[2].is_empty()
        {
            warn!("Ignoring malformed hub command topic: {}", msg.topic);
            return;
        }
        let family = segments[1];
        let device_id = segments[2];
        let unit_code = segments.get(3).copied().filter(|s| !s.is_empty());

        let Some(t) = transition(family, &msg.payload) else {
            warn!(
                "Unknown command '{}' for {} {} (accepted: {})",
                msg.payload,
                family,
                device_id,
                transition::vocabulary(family).join(", ")
            );
            return;
        };

        let address = match unit_code {
            Some(unit) => format!("{}/{}", device_id, unit),
            None => device_id.to_string(),
        };
        let config = self.settings.read(|s| s.find_device(device_id).cloned());
        if let Err(e) = self
            .rfxcom
            .on_command(family, &address, &msg.payload, config.as_ref())
            .await
        {
            warn!("Command {} to {} failed: {}", t.function, address, e);
            return;
        }

        let Some(device) = self.devices.get(&device_id.to_string()) else {
            debug!("No stored device {}, skipping state update", device_id);
            return;
        };
        let entity = entity_id(&device.subtype_name, device_id, unit_code, t.group);
        let mut patch = Map::new();
        patch.insert(DEVICE_ID_FIELD.to_string(), json!(device_id));
        patch.insert("command".to_string(), json!(t.label));
        patch.insert("commandNumber".to_string(), json!(t.command_number));
        if t.function == "setLevel" {
            if let Some(level) = t.arg {
                patch.insert("level".to_string(), Value::from(level));
            }
        }
        let state = self.entities.set(entity, patch);
        self.publish_state(&topic_entity(device_id, unit_code, t.group), &state)
            .await;
    }

    /// Rename a stored device and republish its discovery
    pub async fn rename_device(&self, device_id: &str, name: &str) -> Result<DeviceState> {
        let key = device_id.to_string();
        if !self.devices.contains(&key) {
            return Err(BridgeError::Other(format!("unknown device {}", device_id)));
        }

        let mut device = self.devices.set(key.clone(), DevicePatch::rename(name));
        let renamed = |entity: &mut CommandEntity| {
            entity.name = match &entity.unit_code {
                Some(unit) => format!("{} {}", name, unit),
                None => name.to_string(),
            };
        };
        device.switches.values_mut().for_each(&renamed);
        device.covers.values_mut().for_each(&renamed);
        device.selects.values_mut().for_each(&renamed);
        let device = self.devices.set(key, DevicePatch::from(device));

        info!("Renamed device {} to {}", device_id, name);
        self.publish_device(&device).await;
        Ok(device)
    }
}
