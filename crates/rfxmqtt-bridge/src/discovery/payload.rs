//! Home Assistant discovery payloads

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Device block shared by every entity of one device
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HassDevice {
    pub identifiers: Vec<String>,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub manufacturer: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sw_version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub via_device: Option<String>,
}

/// One availability source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HassAvailability {
    pub topic: String,
}

/// Entity config published to `<prefix>/<component>/<objectId>/<subId>/config`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HassConfig {
    pub name: String,
    pub unique_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub object_id: Option<String>,
    pub device: HassDevice,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub availability: Vec<HassAvailability>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state_topic: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command_topic: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub json_attributes_topic: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value_template: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_class: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unit_of_measurement: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state_class: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entity_category: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload_on: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload_off: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload_open: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload_close: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload_stop: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub options: Option<Vec<String>>,
    /// Component specific keys not modelled above
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl HassConfig {
    pub fn new(name: &str, unique_id: &str, device: HassDevice) -> Self {
        Self {
            name: name.to_string(),
            unique_id: unique_id.to_string(),
            device,
            ..Default::default()
        }
    }

    pub fn available_on(mut self, topic: &str) -> Self {
        self.availability.push(HassAvailability {
            topic: topic.to_string(),
        });
        self
    }
}

/// A discovery entry ready to publish
#[derive(Debug, Clone, PartialEq)]
pub struct DiscoveryEntry {
    pub component: &'static str,
    pub object_id: String,
    pub sub_id: String,
    pub config: HassConfig,
}

impl DiscoveryEntry {
    /// Discovery-prefix relative topic
    pub fn topic(&self) -> String {
        format!("{}/{}/{}/config", self.component, self.object_id, self.sub_id)
    }
}
