//! Bridge data model

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::str::FromStr;

use crate::topic::{Topics, HUB_COMMAND_SUFFIX};
use crate::{Error, Result};

/// A radio frame normalised into protocol-independent fields
///
/// Produced fresh for every received frame. Protocol-specific values
/// (`level`, `temperature`, `data`, ...) live in `fields` and are
/// flattened into the JSON body.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NormalizedEvent {
    pub id: String,
    #[serde(rename = "type")]
    pub protocol: String,
    pub subtype: u8,
    pub subtype_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unit_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command_number: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    pub is_group: bool,
    pub rssi: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub battery_level: Option<u8>,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl NormalizedEvent {
    /// Set a protocol-specific field
    pub fn with_field(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.fields.insert(key.to_string(), value.into());
        self
    }

    /// Read a protocol-specific field
    pub fn field(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    /// Deterministic entity id for this event
    pub fn entity_id(&self) -> String {
        entity_id(
            &self.subtype_name,
            &self.id,
            self.unit_code.as_deref(),
            self.is_group,
        )
    }

    /// Flatten into a JSON object
    pub fn to_object(&self) -> Map<String, Value> {
        match serde_json::to_value(self) {
            Ok(Value::Object(map)) => map,
            _ => Map::new(),
        }
    }

    /// Entity state patch: the event fields with `id` moved to `deviceId`
    pub fn to_state_patch(&self) -> Map<String, Value> {
        let mut map = self.to_object();
        if let Some(id) = map.remove("id") {
            map.insert(DEVICE_ID_FIELD.to_string(), id);
        }
        map
    }
}

/// Compute the entity id for an addressable unit
///
/// `<subtype>_<device>[_<unit>]`, lower-cased, with every character outside
/// `[a-z0-9_]` replaced by `_`. Group entities never carry a unit code.
pub fn entity_id(subtype_name: &str, device_id: &str, unit_code: Option<&str>, is_group: bool) -> String {
    let mut id = format!("{}_{}", subtype_name, device_id);
    if let Some(unit) = unit_code.filter(|_| !is_group) {
        id.push('_');
        id.push_str(unit);
    }
    sanitize_id(&id)
}

/// Lower-case and replace anything outside `[a-z0-9_]`
pub fn sanitize_id(raw: &str) -> String {
    raw.chars()
        .map(|c| {
            let c = c.to_ascii_lowercase();
            if c.is_ascii_alphanumeric() || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Field of an [`EntityState`] holding the owning device id
pub const DEVICE_ID_FIELD: &str = "deviceId";

/// Flattened per-entity state record
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EntityState {
    pub id: String,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl EntityState {
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    /// Device id this entity belongs to, if recorded
    pub fn device_id(&self) -> Option<&str> {
        self.fields.get(DEVICE_ID_FIELD).and_then(Value::as_str)
    }
}

/// Sensor sub-entity (temperature, humidity, rssi, battery)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SensorEntity {
    pub id: String,
    pub name: String,
    /// Event field the sensor reads
    pub property: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit_of_measurement: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_class: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit_code: Option<String>,
}

/// Binary sensor sub-entity (door contacts, motion)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BinarySensorEntity {
    pub id: String,
    pub name: String,
    pub property: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_class: Option<String>,
    pub payload_on: String,
    pub payload_off: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit_code: Option<String>,
}

/// Controllable sub-entity: switch, cover or select
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandEntity {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit_code: Option<String>,
    #[serde(default)]
    pub is_group: bool,
    /// Options for select entities
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<String>,
}

impl CommandEntity {
    /// Hub-facing command topic: `<base>/cmd/<family>/<deviceId>[/<unitCode>]`
    pub fn command_topic(&self, topics: &Topics, protocol: &str, device_id: &str) -> String {
        let mut suffix = format!("{}/{}/{}", HUB_COMMAND_SUFFIX, protocol, device_id);
        if let Some(unit) = self.unit_code.as_ref().filter(|_| !self.is_group) {
            suffix.push('/');
            suffix.push_str(unit);
        }
        topics.full(&suffix)
    }
}

/// Discovered device metadata
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DeviceState {
    pub id: String,
    pub name: String,
    pub original_name: String,
    #[serde(rename = "type")]
    pub protocol: String,
    pub subtype: u8,
    pub subtype_name: String,
    pub sensors: BTreeMap<String, SensorEntity>,
    pub binary_sensors: BTreeMap<String, BinarySensorEntity>,
    pub switches: BTreeMap<String, CommandEntity>,
    pub covers: BTreeMap<String, CommandEntity>,
    pub selects: BTreeMap<String, CommandEntity>,
}

impl DeviceState {
    pub fn new(id: &str, name: &str, protocol: &str, subtype: u8, subtype_name: &str) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            original_name: id.to_string(),
            protocol: protocol.to_string(),
            subtype,
            subtype_name: subtype_name.to_string(),
            ..Default::default()
        }
    }

    /// Find a controllable entity by id
    pub fn command_entity(&self, entity_id: &str) -> Option<&CommandEntity> {
        self.switches
            .get(entity_id)
            .or_else(|| self.covers.get(entity_id))
            .or_else(|| self.selects.get(entity_id))
    }

    /// First controllable entity, switches before covers before selects
    pub fn first_command_entity(&self) -> Option<&CommandEntity> {
        self.switches
            .values()
            .chain(self.covers.values())
            .chain(self.selects.values())
            .next()
    }
}

/// Shallow patch for a [`DeviceState`]; `None` leaves the field untouched
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DevicePatch {
    pub name: Option<String>,
    pub original_name: Option<String>,
    pub protocol: Option<String>,
    pub subtype: Option<u8>,
    pub subtype_name: Option<String>,
    pub sensors: Option<BTreeMap<String, SensorEntity>>,
    pub binary_sensors: Option<BTreeMap<String, BinarySensorEntity>>,
    pub switches: Option<BTreeMap<String, CommandEntity>>,
    pub covers: Option<BTreeMap<String, CommandEntity>>,
    pub selects: Option<BTreeMap<String, CommandEntity>>,
}

impl DevicePatch {
    pub fn rename(name: &str) -> Self {
        Self {
            name: Some(name.to_string()),
            ..Default::default()
        }
    }
}

impl From<DeviceState> for DevicePatch {
    fn from(device: DeviceState) -> Self {
        Self {
            name: Some(device.name),
            original_name: Some(device.original_name),
            protocol: Some(device.protocol),
            subtype: Some(device.subtype),
            subtype_name: Some(device.subtype_name),
            sensors: Some(device.sensors),
            binary_sensors: Some(device.binary_sensors),
            switches: Some(device.switches),
            covers: Some(device.covers),
            selects: Some(device.selects),
        }
    }
}

/// Action category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionType {
    Bridge,
    Device,
}

/// A command intent from MQTT or the admin API
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Action {
    #[serde(rename = "type")]
    pub kind: ActionType,
    pub action: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity_id: Option<String>,
}

impl Action {
    pub fn bridge(action: &str) -> Self {
        Self {
            kind: ActionType::Bridge,
            action: action.to_string(),
            device_id: None,
            entity_id: None,
        }
    }

    pub fn device(device_id: &str, action: &str) -> Self {
        Self {
            kind: ActionType::Device,
            action: action.to_string(),
            device_id: Some(device_id.to_string()),
            entity_id: None,
        }
    }

    pub fn with_entity(mut self, entity_id: &str) -> Self {
        self.entity_id = Some(entity_id.to_string());
        self
    }

    /// Check the action carries every field its type needs
    pub fn validate(&self) -> Result<()> {
        if self.action.trim().is_empty() {
            return Err(Error::Protocol("action is empty".to_string()));
        }
        if self.kind == ActionType::Device
            && self.device_id.as_deref().map_or(true, str::is_empty)
        {
            return Err(Error::Protocol(format!(
                "device action '{}' without deviceId",
                self.action
            )));
        }
        Ok(())
    }
}

/// Bridge-level actions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeAction {
    Restart,
    Stop,
    ResetDevices,
    ResetState,
}

impl FromStr for BridgeAction {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "restart" => Ok(BridgeAction::Restart),
            "stop" => Ok(BridgeAction::Stop),
            "reset_devices" => Ok(BridgeAction::ResetDevices),
            "reset_state" => Ok(BridgeAction::ResetState),
            other => Err(Error::Protocol(format!("unknown bridge action: {}", other))),
        }
    }
}

/// Transceiver identity reported by the status response
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CoordinatorInfo {
    pub receiver_type: String,
    pub hardware_version: String,
    pub firmware_version: u16,
    pub firmware_type: String,
    pub enabled_protocols: Vec<String>,
}

/// Payload of `<base>/bridge/info`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BridgeInfo {
    pub version: String,
    pub coordinator: CoordinatorInfo,
    pub log_level: String,
}

/// Transceiver availability as published on the will topic
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Availability {
    Online,
    Offline,
}

impl Availability {
    pub fn as_str(&self) -> &'static str {
        match self {
            Availability::Online => "online",
            Availability::Offline => "offline",
        }
    }
}

impl std::fmt::Display for Availability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
