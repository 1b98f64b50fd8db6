//! Keyed store persistence tests

use rfxmqtt_core::store::{DEVICES_FILE, STATE_FILE};
use rfxmqtt_core::{
    CommandEntity, DevicePatch, DeviceState, DeviceStore, EntityStore, NormalizedEvent,
};
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

fn sample_event() -> NormalizedEvent {
    NormalizedEvent {
        id: "0x123ABC".to_string(),
        protocol: "lighting2".to_string(),
        subtype: 0,
        subtype_name: "AC".to_string(),
        unit_code: Some("1".to_string()),
        command: Some("On".to_string()),
        command_number: Some(1),
        ..Default::default()
    }
    .with_field("level", 15)
}

#[test]
fn test_entity_snapshot_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join(STATE_FILE);

    let store = EntityStore::persistent("entities", &path, Duration::from_secs(60));
    let event = sample_event();
    store.set(event.entity_id(), event.to_state_patch());
    store.save().unwrap();
    assert!(!store.is_dirty());

    let reloaded = EntityStore::persistent("entities", &path, Duration::from_secs(60));
    reloaded.load();

    let entity = reloaded.get(&"ac_0x123abc_1".to_string()).unwrap();
    assert_eq!(entity.id, "ac_0x123abc_1");
    assert_eq!(entity.get("level"), Some(&json!(15)));
    assert_eq!(entity.device_id(), Some("0x123ABC"));
    assert_eq!(reloaded.get_by_device_id("0x123ABC").len(), 1);
}

#[test]
fn test_device_snapshot_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join(DEVICES_FILE);

    let store = DeviceStore::persistent("devices", &path, Duration::from_secs(60));
    let mut device = DeviceState::new("0x123ABC", "0x123ABC", "lighting2", 0, "AC");
    device.switches.insert(
        "ac_0x123abc_1".to_string(),
        CommandEntity {
            id: "ac_0x123abc_1".to_string(),
            name: "0x123ABC 1".to_string(),
            unit_code: Some("1".to_string()),
            is_group: false,
            options: vec![],
        },
    );
    store.set(device.id.clone(), DevicePatch::from(device.clone()));
    store.save().unwrap();

    let reloaded = DeviceStore::persistent("devices", &path, Duration::from_secs(60));
    reloaded.load();
    assert_eq!(reloaded.get(&"0x123ABC".to_string()), Some(device));
}

#[test]
fn test_malformed_snapshot_loads_empty() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join(STATE_FILE);
    std::fs::write(&path, "{ not json").unwrap();

    let store = EntityStore::persistent("entities", &path, Duration::from_secs(60));
    store.load();
    assert!(store.is_empty());
}

#[test]
fn test_missing_snapshot_loads_empty() {
    let dir = tempfile::tempdir().unwrap();
    let store = EntityStore::persistent(
        "entities",
        dir.path().join("nested").join(STATE_FILE),
        Duration::from_secs(60),
    );
    store.load();
    assert!(store.is_empty());

    // save creates the data directory
    store.set("e1".to_string(), serde_json::Map::new());
    store.save().unwrap();
    assert!(dir.path().join("nested").join(STATE_FILE).exists());
}

#[test]
fn test_reset_clears_and_saves() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join(DEVICES_FILE);

    let store = DeviceStore::persistent("devices", &path, Duration::from_secs(60));
    store.set("0x1".to_string(), DevicePatch::rename("one"));
    store.save().unwrap();

    store.reset();
    assert!(store.is_empty());

    let text = std::fs::read_to_string(&path).unwrap();
    let on_disk: BTreeMap<String, serde_json::Value> = serde_json::from_str(&text).unwrap();
    assert!(on_disk.is_empty());
}

#[tokio::test]
async fn test_stop_writes_final_snapshot() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join(STATE_FILE);

    let store = Arc::new(EntityStore::persistent("entities", &path, Duration::from_secs(3600)));
    store.start();
    store.set("e1".to_string(), json!({"command": "Off"}).as_object().cloned().unwrap());
    assert!(!path.exists());

    store.stop();
    assert!(path.exists());
    assert!(!store.is_dirty());
}

#[tokio::test(start_paused = true)]
async fn test_flush_timer_saves_dirty_store() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join(STATE_FILE);

    let store = Arc::new(EntityStore::persistent("entities", &path, Duration::from_secs(60)));
    store.start();
    store.set("e1".to_string(), serde_json::Map::new());

    tokio::time::sleep(Duration::from_secs(61)).await;
    // let the flush task run
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }

    assert!(path.exists());
    store.stop();
}
