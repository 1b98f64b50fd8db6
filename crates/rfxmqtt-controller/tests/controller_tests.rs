//! Controller scenarios against the virtual transceiver and in-memory broker

use parking_lot::Mutex;
use rfxmqtt_controller::{Controller, ControllerError, ControllerState, ExitCallback};
use rfxmqtt_core::config::{DeviceConfig, Settings};
use rfxmqtt_core::{Action, Availability, SettingsHandle};
use rfxmqtt_test_utils::{
    lighting2_frame, temp_settings, wait_for, MemoryBroker, MockTransceiver, DEFAULT_CHECK_INTERVAL,
};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

const WAIT: Duration = Duration::from_secs(3);

struct Harness {
    controller: Arc<Controller>,
    device: MockTransceiver,
    broker: MemoryBroker,
    exits: Arc<Mutex<Vec<(i32, bool)>>>,
    _dir: TempDir,
}

fn harness_with(configure: impl FnOnce(&mut Settings)) -> Harness {
    let (dir, mut settings) = temp_settings();
    configure(&mut settings);

    let device = MockTransceiver::new();
    let broker = MemoryBroker::new();
    let exits = Arc::new(Mutex::new(Vec::new()));
    let recorder = Arc::clone(&exits);
    let on_exit: ExitCallback = Arc::new(move |code, restart| recorder.lock().push((code, restart)));

    let controller = Controller::new(
        SettingsHandle::new(settings),
        Arc::new(device.clone()),
        Arc::new(broker.clone()),
        on_exit,
    )
    .unwrap();

    Harness {
        controller,
        device,
        broker,
        exits,
        _dir: dir,
    }
}

fn harness() -> Harness {
    harness_with(|_| {})
}

async fn wait_until<F: Fn() -> bool>(check: F) -> bool {
    wait_for(|| async { check() }, DEFAULT_CHECK_INTERVAL, WAIT).await
}

#[tokio::test]
async fn test_start_publishes_bridge_info() {
    let h = harness();
    h.controller.start().await.unwrap();
    assert_eq!(h.controller.state(), ControllerState::Running);

    assert!(h.broker.wait_for_publish("rfxcom2mqtt/bridge/info", 1, WAIT).await);
    let info: serde_json::Value =
        serde_json::from_str(&h.broker.last_payload("rfxcom2mqtt/bridge/info").unwrap()).unwrap();
    assert_eq!(info["version"], rfxmqtt_core::VERSION);
    assert_eq!(info["logLevel"], "info");
    assert_eq!(info["coordinator"]["firmwareVersion"], 0xF1);

    assert!(
        h.broker
            .wait_for_publish("homeassistant/select/rfxcom2mqtt_bridge/log_level/config", 1, WAIT)
            .await
    );
    assert_eq!(h.broker.last_payload("rfxcom2mqtt/bridge/status").as_deref(), Some("online"));
    assert!(h.broker.is_subscribed("rfxcom2mqtt/command/lighting2/0x1/1"));
    assert!(h.broker.is_subscribed("rfxcom2mqtt/cmd/lighting2/0x1/1"));

    h.controller.stop(false).await.unwrap();
}

#[tokio::test]
async fn test_event_published_to_devices_topic() {
    let h = harness();
    h.controller.start().await.unwrap();

    h.device.inject(&lighting2_frame(0x123ABC, 1, 1, 15)).await;
    assert!(h.broker.wait_for_publish("rfxcom2mqtt/devices/0x123ABC/1", 1, WAIT).await);

    let payload = h.broker.last_payload("rfxcom2mqtt/devices/0x123ABC/1").unwrap();
    assert!(payload.contains("\"command\":\"On\""));
    assert!(payload.contains("\"level\":15"));

    assert!(
        h.broker
            .wait_for_publish("homeassistant/switch/0x123abc/ac_0x123abc_1_switch/config", 1, WAIT)
            .await
    );
    assert!(h.controller.devices().contains(&"0x123ABC".to_string()));

    h.controller.stop(false).await.unwrap();
}

#[tokio::test]
async fn test_discovery_disabled() {
    let h = harness_with(|s| s.homeassistant.discovery = false);
    h.controller.start().await.unwrap();

    h.device.inject(&lighting2_frame(0x123ABC, 1, 0, 0)).await;
    assert!(h.broker.wait_for_publish("rfxcom2mqtt/devices/0x123ABC/1", 1, WAIT).await);
    assert!(h.broker.wait_for_publish("rfxcom2mqtt/bridge/info", 1, WAIT).await);

    assert!(h.broker.published_under("homeassistant/").is_empty());
    assert!(h.controller.devices().is_empty());

    h.controller.stop(false).await.unwrap();
}

#[tokio::test]
async fn test_transceiver_failure_aborts_start() {
    let h = harness();
    h.device.set_fail_open(true);

    let result = h.controller.start().await;
    assert!(matches!(result, Err(ControllerError::Bridge(_))));
    assert_eq!(h.controller.state(), ControllerState::Stopped);
    assert!(h.exits.lock().is_empty());
    assert_eq!(h.broker.connect_count(), 0);
}

#[tokio::test]
async fn test_broker_failure_stops_transceiver() {
    let h = harness();
    h.broker.set_fail_connect(true);

    h.controller.start().await.unwrap();

    assert_eq!(*h.exits.lock(), vec![(1, false)]);
    assert!(!h.device.is_connected());
    assert_eq!(h.controller.state(), ControllerState::Stopped);
}

#[tokio::test]
async fn test_broker_rejecting_announce_can_start_again() {
    let h = harness();
    h.broker.set_fail_publish(true);

    h.controller.start().await.unwrap();
    assert_eq!(*h.exits.lock(), vec![(1, false)]);
    assert_eq!(h.controller.state(), ControllerState::Stopped);
    assert!(!h.broker.is_connected());

    h.broker.set_fail_publish(false);
    h.controller.start().await.unwrap();
    assert_eq!(h.controller.state(), ControllerState::Running);
    assert_eq!(h.broker.connect_count(), 2);
    assert_eq!(h.broker.last_payload("rfxcom2mqtt/bridge/status").as_deref(), Some("online"));

    h.controller.stop(false).await.unwrap();
}

#[tokio::test]
async fn test_reconnect_reannounces_and_resubscribes() {
    let h = harness();
    h.controller.start().await.unwrap();
    assert_eq!(h.broker.published_to("rfxcom2mqtt/bridge/status").len(), 1);

    h.broker.drop_connection().await;
    assert!(!h.broker.is_subscribed("rfxcom2mqtt/command/lighting2/0x1/1"));

    h.broker.restore_connection().await;
    assert!(h.broker.wait_for_publish("rfxcom2mqtt/bridge/status", 2, WAIT).await);
    assert_eq!(h.broker.last_payload("rfxcom2mqtt/bridge/status").as_deref(), Some("online"));
    assert!(wait_until(|| h.broker.is_subscribed("rfxcom2mqtt/command/lighting2/0x1/1")).await);
    assert!(h.broker.is_subscribed("rfxcom2mqtt/cmd/lighting2/0x1/1"));
    assert!(h.broker.is_subscribed("rfxcom2mqtt/bridge/request/log_level"));
    assert!(h.exits.lock().is_empty());

    h.controller.stop(false).await.unwrap();
}

#[tokio::test]
async fn test_health_check_online() {
    let h = harness();
    h.controller.start().await.unwrap();
    h.broker.clear_published();

    assert_eq!(h.controller.run_health_check().await, Availability::Online);
    assert_eq!(h.broker.last_payload("rfxcom2mqtt/bridge/status").as_deref(), Some("online"));
    assert!(h.exits.lock().is_empty());

    h.controller.stop(false).await.unwrap();
}

#[tokio::test]
async fn test_health_check_offline_stops() {
    let h = harness();
    h.controller.start().await.unwrap();
    h.device.set_responsive(false);

    assert_eq!(h.controller.run_health_check().await, Availability::Offline);

    assert_eq!(*h.exits.lock(), vec![(1, false)]);
    assert_eq!(h.controller.state(), ControllerState::Stopped);
    assert!(!h.device.is_connected());
    assert_eq!(h.broker.last_payload("rfxcom2mqtt/bridge/status").as_deref(), Some("offline"));
}

#[tokio::test]
async fn test_scheduled_health_check() {
    let h = harness_with(|s| {
        s.healthcheck.enabled = true;
        s.healthcheck.cron = "* * * * * *".to_string();
    });
    h.controller.start().await.unwrap();
    h.device.set_responsive(false);

    assert!(wait_until(|| !h.exits.lock().is_empty()).await);
    assert_eq!(h.exits.lock()[0], (1, false));
    assert_eq!(h.controller.state(), ControllerState::Stopped);
}

#[tokio::test]
async fn test_command_topic_reaches_transceiver() {
    let h = harness();
    h.controller.start().await.unwrap();

    h.broker
        .inject("rfxcom2mqtt/command/lighting2/0x123ABC/1", "switchOn")
        .await;
    assert!(wait_until(|| h.device.transmitted().len() == 1).await);

    let sent = h.device.transmitted();
    assert_eq!(&sent[0][4..10], &[0x00, 0x12, 0x3A, 0xBC, 0x01, 0x01]);

    h.controller.stop(false).await.unwrap();
}

#[tokio::test]
async fn test_command_by_device_name() {
    let h = harness_with(|s| {
        s.devices.push(DeviceConfig {
            id: "0x0ABCDE".to_string(),
            name: Some("porch".to_string()),
            repetitions: Some(2),
            ..Default::default()
        })
    });
    h.controller.start().await.unwrap();

    h.broker
        .inject("rfxcom2mqtt/command/lighting2/porch/2", "switchOff")
        .await;
    assert!(wait_until(|| h.device.transmitted().len() == 2).await);

    let sent = h.device.transmitted();
    assert_eq!(&sent[0][4..10], &[0x00, 0x0A, 0xBC, 0xDE, 0x02, 0x00]);

    h.controller.stop(false).await.unwrap();
}

#[tokio::test]
async fn test_malformed_command_dropped() {
    let h = harness();
    h.controller.start().await.unwrap();

    h.broker.inject("rfxcom2mqtt/command/lighting2", "switchOn").await;
    h.broker.inject("rfxcom2mqtt/command/lighting2/0x123ABC/1", "").await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert!(h.device.transmitted().is_empty());
    assert_eq!(h.controller.state(), ControllerState::Running);

    h.controller.stop(false).await.unwrap();
}

#[tokio::test]
async fn test_device_action_uses_command_path() {
    let h = harness();
    h.controller.start().await.unwrap();
    h.device.inject(&lighting2_frame(0x123ABC, 1, 0, 0)).await;
    assert!(wait_until(|| h.controller.devices().contains(&"0x123ABC".to_string())).await);

    h.controller
        .run_action(Action::device("0x123ABC", "on"))
        .await;

    let sent = h.device.transmitted();
    assert_eq!(sent.len(), 1);
    assert_eq!((sent[0][8], sent[0][9]), (0x01, 0x01));

    // unknown device and entity are ignored
    h.controller.run_action(Action::device("0xFFFFFF", "on")).await;
    h.controller
        .run_action(Action::device("0x123ABC", "on").with_entity("nope"))
        .await;
    assert_eq!(h.device.transmitted().len(), 1);

    h.controller.stop(false).await.unwrap();
}

#[tokio::test]
async fn test_invalid_action_ignored() {
    let h = harness();
    h.controller.start().await.unwrap();

    let mut action = Action::device("0x123ABC", "on");
    action.device_id = None;
    h.controller.run_action(action).await;
    h.controller.run_action(Action::bridge("reboot")).await;

    assert_eq!(h.controller.state(), ControllerState::Running);
    assert!(h.exits.lock().is_empty());

    h.controller.stop(false).await.unwrap();
}

#[tokio::test]
async fn test_reset_state_action() {
    let h = harness();
    h.controller.start().await.unwrap();
    h.device.inject(&lighting2_frame(0x123ABC, 1, 1, 15)).await;
    assert!(wait_until(|| !h.controller.entities().is_empty()).await);

    h.controller.run_action(Action::bridge("reset_state")).await;
    assert!(h.controller.entities().is_empty());
    assert!(!h.controller.devices().is_empty());

    h.controller.run_action(Action::bridge("reset_devices")).await;
    assert!(h.controller.devices().is_empty());
    assert_eq!(h.controller.state(), ControllerState::Running);

    h.controller.stop(false).await.unwrap();
}

#[tokio::test]
async fn test_stop_and_restart_actions() {
    let h = harness();
    h.controller.start().await.unwrap();
    h.controller
        .queue_action(Action::bridge("restart"))
        .await
        .unwrap();
    assert!(wait_until(|| !h.exits.lock().is_empty()).await);
    assert_eq!(*h.exits.lock(), vec![(0, true)]);
    assert_eq!(h.controller.state(), ControllerState::Stopped);

    // a stopped controller starts again
    h.controller.start().await.unwrap();
    h.controller.run_action(Action::bridge("stop")).await;
    assert_eq!(*h.exits.lock(), vec![(0, true), (0, false)]);
    assert_eq!(h.broker.last_payload("rfxcom2mqtt/bridge/status").as_deref(), Some("offline"));
}

#[tokio::test]
async fn test_stop_writes_snapshots() {
    let h = harness();
    let state_path = h.controller.settings().read(|s| s.state_path());
    h.controller.start().await.unwrap();
    h.device.inject(&lighting2_frame(0x123ABC, 1, 1, 15)).await;
    assert!(wait_until(|| !h.controller.entities().is_empty()).await);

    h.controller.stop(false).await.unwrap();
    assert_eq!(h.controller.state(), ControllerState::Stopped);

    let text = std::fs::read_to_string(state_path).unwrap();
    assert!(text.contains("ac_0x123abc_1"));
    assert!(h.controller.queue_action(Action::bridge("stop")).await.is_err());
}

#[tokio::test]
async fn test_transceiver_unplug_stops() {
    let h = harness();
    h.controller.start().await.unwrap();

    h.device.unplug().await;
    assert!(wait_until(|| !h.exits.lock().is_empty()).await);
    assert_eq!(*h.exits.lock(), vec![(1, false)]);
    assert_eq!(h.controller.state(), ControllerState::Stopped);
}

#[test]
fn test_invalid_schedule_rejected() {
    let (_dir, mut settings) = temp_settings();
    settings.healthcheck.enabled = true;
    settings.healthcheck.cron = "61 * * * *".to_string();

    let on_exit: ExitCallback = Arc::new(|_, _| {});
    let result = Controller::new(
        SettingsHandle::new(settings),
        Arc::new(MockTransceiver::new()),
        Arc::new(MemoryBroker::new()),
        on_exit,
    );
    assert!(matches!(result, Err(ControllerError::Schedule { .. })));
}
