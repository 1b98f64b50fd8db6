//! Home Assistant discovery tests over the in-memory broker

use rfxmqtt_bridge::{
    BridgeDiscovery, DeviceDiscovery, DiscoveryMessage, DiscoveryPublisher, HomeAssistantDiscovery, MqttAdapter,
    MqttMessage, RfxcomBridge,
};
use rfxmqtt_core::store::{DeviceStore, EntityStore};
use rfxmqtt_core::{BridgeInfo, CoordinatorInfo, NormalizedEvent, Settings, SettingsHandle, Topics};
use rfxmqtt_test_utils::{temp_settings, MemoryBroker, MockTransceiver};
use serde_json::Value;
use std::path::Path;
use std::sync::Arc;

struct Harness {
    broker: MemoryBroker,
    mqtt: Arc<MqttAdapter>,
    device: MockTransceiver,
    rfxcom: Arc<RfxcomBridge>,
    settings: Arc<SettingsHandle>,
    devices: Arc<DeviceStore>,
    entities: Arc<EntityStore>,
    discovery: Arc<HomeAssistantDiscovery>,
    _dir: tempfile::TempDir,
}

async fn harness() -> Harness {
    harness_with(|settings, _| SettingsHandle::new(settings)).await
}

async fn harness_with(handle: impl FnOnce(Settings, &Path) -> Arc<SettingsHandle>) -> Harness {
    let (dir, settings) = temp_settings();
    let settings = handle(settings, dir.path());
    let broker = MemoryBroker::new();
    let mqtt = Arc::new(MqttAdapter::new(
        settings.read(|s| s.mqtt.clone()),
        Arc::new(broker.clone()),
    ));
    let device = MockTransceiver::new();
    let rfxcom = Arc::new(RfxcomBridge::new(
        Arc::new(device.clone()),
        settings.read(|s| s.rfxcom.clone()),
    ));
    let devices = Arc::new(DeviceStore::in_memory("devices"));
    let entities = Arc::new(EntityStore::in_memory("entities"));

    let topics = Topics::new("rfxcom2mqtt");
    let publisher = DiscoveryPublisher::new(mqtt.publisher(), "homeassistant");
    let discovery = Arc::new(HomeAssistantDiscovery::new(
        topics.clone(),
        Arc::new(BridgeDiscovery::new(publisher.clone(), topics.clone(), Arc::clone(&settings))),
        Arc::new(DeviceDiscovery::new(
            publisher,
            topics,
            Arc::clone(&settings),
            Arc::clone(&rfxcom),
            Arc::clone(&devices),
            Arc::clone(&entities),
        )),
    ));
    mqtt.add_listener(discovery.clone()).await;
    mqtt.connect().await.unwrap();

    Harness {
        broker,
        mqtt,
        device,
        rfxcom,
        settings,
        devices,
        entities,
        discovery,
        _dir: dir,
    }
}

fn switch_event() -> NormalizedEvent {
    NormalizedEvent {
        id: "0x123ABC".to_string(),
        protocol: "lighting2".to_string(),
        subtype: 0,
        subtype_name: "AC".to_string(),
        unit_code: Some("1".to_string()),
        command_number: Some(1),
        command: Some("On".to_string()),
        rssi: 7,
        ..Default::default()
    }
    .with_field("level", 15)
}

fn bridge_info() -> BridgeInfo {
    BridgeInfo {
        version: "1.2.0".to_string(),
        coordinator: CoordinatorInfo {
            receiver_type: "433.92MHz transceiver".to_string(),
            firmware_version: 241,
            ..Default::default()
        },
        log_level: "info".to_string(),
    }
}

fn json(payload: &str) -> Value {
    serde_json::from_str(payload).unwrap()
}

#[tokio::test]
async fn test_device_message_routes_to_device_discovery() {
    let h = harness().await;

    h.discovery
        .publish_discovery_to_mqtt(DiscoveryMessage::device(&switch_event()))
        .await;

    let switch = h
        .broker
        .last_payload("homeassistant/switch/0x123abc/ac_0x123abc_1_switch/config")
        .expect("switch discovery");
    let config = json(&switch);
    assert_eq!(config["command_topic"], "rfxcom2mqtt/cmd/lighting2/0x123ABC/1");
    assert_eq!(config["state_topic"], "rfxcom2mqtt/devices/0x123ABC/1/state");
    assert_eq!(config["availability"][0]["topic"], "rfxcom2mqtt/bridge/status");

    assert!(h
        .broker
        .last_payload("homeassistant/sensor/0x123abc/ac_0x123abc_1_rssi_sensor/config")
        .is_some());
    assert!(h.broker.published_under("homeassistant/select/rfxcom2mqtt_bridge").is_empty());
    assert!(h
        .broker
        .published_to("homeassistant/switch/0x123abc/ac_0x123abc_1_switch/config")
        .iter()
        .all(|p| p.retain && p.qos == 1));

    let stored = h.devices.get(&"0x123ABC".to_string()).unwrap();
    assert!(stored.switches.contains_key("ac_0x123abc_1"));
}

#[tokio::test]
async fn test_bridge_message_routes_to_bridge_discovery() {
    let h = harness().await;

    h.discovery
        .publish_discovery_to_mqtt(DiscoveryMessage::bridge(&bridge_info()))
        .await;

    let select = json(
        &h.broker
            .last_payload("homeassistant/select/rfxcom2mqtt_bridge/log_level/config")
            .expect("log level select"),
    );
    assert_eq!(select["command_topic"], "rfxcom2mqtt/bridge/request/log_level");
    assert_eq!(select["options"].as_array().unwrap().len(), 5);

    let connection = json(
        &h.broker
            .last_payload("homeassistant/binary_sensor/rfxcom2mqtt_bridge/connection_state/config")
            .expect("connection sensor"),
    );
    assert_eq!(connection["device_class"], "connectivity");
    assert_eq!(connection["state_topic"], "rfxcom2mqtt/bridge/status");

    assert!(h
        .broker
        .last_payload("homeassistant/sensor/rfxcom2mqtt_bridge/version/config")
        .is_some());
    assert!(h.devices.is_empty());
    assert!(h.broker.published_under("rfxcom2mqtt/devices").is_empty());
}

#[tokio::test]
async fn test_device_state_published_once_per_event() {
    let h = harness().await;

    h.discovery
        .publish_discovery_to_mqtt(DiscoveryMessage::device(&switch_event()))
        .await;

    let states = h.broker.published_to("rfxcom2mqtt/devices/0x123ABC/1/state");
    assert_eq!(states.len(), 1);
    let state = json(&states[0].payload);
    assert_eq!(state["id"], "ac_0x123abc_1");
    assert_eq!(state["deviceId"], "0x123ABC");
    assert_eq!(state["command"], "On");
    assert_eq!(state["level"], 15);

    let entity = h.entities.get(&"ac_0x123abc_1".to_string()).unwrap();
    assert_eq!(entity.device_id(), Some("0x123ABC"));

    // a repeat event republishes state but not discovery
    h.broker.clear_published();
    h.discovery
        .publish_discovery_to_mqtt(DiscoveryMessage::device(&switch_event()))
        .await;
    assert!(h.broker.published_under("homeassistant").is_empty());
    assert_eq!(h.broker.published_to("rfxcom2mqtt/devices/0x123ABC/1/state").len(), 1);
}

#[tokio::test]
async fn test_hub_command_transmits_and_updates_state() {
    let h = harness().await;
    h.rfxcom.initialise().await.unwrap();
    h.discovery
        .publish_discovery_to_mqtt(DiscoveryMessage::device(&switch_event()))
        .await;

    h.mqtt
        .dispatch(&MqttMessage::new("rfxcom2mqtt/cmd/lighting2/0x123ABC/1", "group on"))
        .await;

    let sent = h.device.transmitted();
    assert_eq!(sent.len(), 1);
    assert_eq!((sent[0][8], sent[0][9]), (0x00, 0x04));

    let state = json(
        &h.broker
            .last_payload("rfxcom2mqtt/devices/0x123ABC/state")
            .expect("group state"),
    );
    assert_eq!(state["command"], "Group On");
    assert_eq!(state["commandNumber"], 3);

    h.mqtt
        .dispatch(&MqttMessage::new("rfxcom2mqtt/cmd/lighting2/0x123ABC/1", "level 5"))
        .await;
    let state = json(&h.broker.last_payload("rfxcom2mqtt/devices/0x123ABC/1/state").unwrap());
    assert_eq!(state["command"], "Set Level");
    assert_eq!(state["level"], 5);
}

#[tokio::test]
async fn test_hub_command_unknown_word_ignored() {
    let h = harness().await;
    h.rfxcom.initialise().await.unwrap();

    h.mqtt
        .dispatch(&MqttMessage::new("rfxcom2mqtt/cmd/lighting2/0x123ABC/1", "dance"))
        .await;
    h.mqtt
        .dispatch(&MqttMessage::new("rfxcom2mqtt/cmd/lighting2", "on"))
        .await;

    assert!(h.device.transmitted().is_empty());
}

#[tokio::test]
async fn test_log_level_request() {
    let h = harness().await;
    h.discovery
        .publish_discovery_to_mqtt(DiscoveryMessage::bridge(&bridge_info()))
        .await;

    h.mqtt
        .dispatch(&MqttMessage::new("rfxcom2mqtt/bridge/request/log_level", "DEBUG"))
        .await;
    assert_eq!(h.settings.log_level(), "debug");
    let info = json(&h.broker.last_payload("rfxcom2mqtt/bridge/info").unwrap());
    assert_eq!(info["logLevel"], "debug");

    h.mqtt
        .dispatch(&MqttMessage::new("rfxcom2mqtt/bridge/request/log_level", "chatty"))
        .await;
    assert_eq!(h.settings.log_level(), "debug");
}

#[tokio::test]
async fn test_log_level_applied_when_settings_file_unwritable() {
    let h = harness_with(|settings, dir| SettingsHandle::with_path(settings, dir.join("missing").join("rfxmqtt.toml")))
        .await;
    h.discovery
        .publish_discovery_to_mqtt(DiscoveryMessage::bridge(&bridge_info()))
        .await;

    h.mqtt
        .dispatch(&MqttMessage::new("rfxcom2mqtt/bridge/request/log_level", "warn"))
        .await;
    assert_eq!(h.settings.log_level(), "warn");
    let info = json(&h.broker.last_payload("rfxcom2mqtt/bridge/info").unwrap());
    assert_eq!(info["logLevel"], "warn");
}

#[tokio::test]
async fn test_rename_device_republishes() {
    let h = harness().await;
    h.discovery
        .publish_discovery_to_mqtt(DiscoveryMessage::device(&switch_event()))
        .await;
    h.broker.clear_published();

    let renamed = h
        .discovery
        .device()
        .rename_device("0x123ABC", "Patio")
        .await
        .unwrap();
    assert_eq!(renamed.name, "Patio");
    assert_eq!(renamed.original_name, "0x123ABC");
    assert_eq!(h.devices.get_by_name("Patio").unwrap().id, "0x123ABC");

    let switch = json(
        &h.broker
            .last_payload("homeassistant/switch/0x123abc/ac_0x123abc_1_switch/config")
            .unwrap(),
    );
    assert_eq!(switch["name"], "Patio 1");
    assert_eq!(switch["device"]["name"], "Patio");

    assert!(h.discovery.device().rename_device("0xFFFFFF", "Nope").await.is_err());
}
