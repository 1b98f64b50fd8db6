//! RFXtrx adapter tests against the virtual transceiver

use rfxmqtt_bridge::{BridgeError, BridgeEvent, RfxcomBridge};
use rfxmqtt_core::config::{BlindsMode, DeviceConfig, DeviceOptions, RfxcomSettings};
use rfxmqtt_core::Availability;
use rfxmqtt_test_utils::{lighting2_frame, temp1_frame, MockTransceiver};
use std::sync::Arc;
use std::time::Duration;

fn settings() -> RfxcomSettings {
    RfxcomSettings {
        usbport: "mock".to_string(),
        status_timeout_ms: 300,
        ..Default::default()
    }
}

fn bridge(device: &MockTransceiver, settings: RfxcomSettings) -> RfxcomBridge {
    RfxcomBridge::new(Arc::new(device.clone()), settings)
}

#[tokio::test]
async fn test_initialise_handshake() {
    let device = MockTransceiver::new();
    let rfxcom = bridge(&device, settings());

    assert!(!rfxcom.is_running());
    let info = rfxcom.initialise().await.unwrap();
    assert!(rfxcom.is_running());
    assert_eq!(info.firmware_version, 0xF1);
    assert_eq!(info.hardware_version, "1.3");
    assert!(!info.enabled_protocols.is_empty());
    assert_eq!(rfxcom.coordinator(), Some(info));

    let commands: Vec<u8> = device.sent().iter().map(|p| p[4]).collect();
    assert_eq!(commands, vec![0x00, 0x02, 0x07]);
}

#[tokio::test]
async fn test_initialise_sets_mode() {
    let device = MockTransceiver::new();
    let mut settings = settings();
    settings.enabled_protocols = vec!["AC".to_string(), "ARC".to_string()];
    let rfxcom = bridge(&device, settings);

    let info = rfxcom.initialise().await.unwrap();
    let commands: Vec<u8> = device.sent().iter().map(|p| p[4]).collect();
    assert_eq!(commands, vec![0x00, 0x02, 0x03, 0x07]);

    let mut enabled = info.enabled_protocols.clone();
    enabled.sort();
    assert_eq!(enabled, vec!["AC".to_string(), "ARC".to_string()]);
}

#[tokio::test]
async fn test_initialise_rejects_unknown_protocol() {
    let device = MockTransceiver::new();
    let mut settings = settings();
    settings.enabled_protocols = vec!["TELEPATHY".to_string()];
    let rfxcom = bridge(&device, settings);

    assert!(rfxcom.initialise().await.is_err());
    assert!(!device.is_connected());
}

#[tokio::test]
async fn test_initialise_fails_when_silent() {
    let device = MockTransceiver::new();
    device.set_responsive(false);
    let rfxcom = bridge(&device, settings());

    let err = rfxcom.initialise().await.unwrap_err();
    assert!(matches!(err, BridgeError::ConnectionFailed(_)));
    assert!(!device.is_connected());
}

#[tokio::test]
async fn test_initialise_fails_when_port_missing() {
    let device = MockTransceiver::new();
    device.set_fail_open(true);
    let rfxcom = bridge(&device, settings());

    assert!(matches!(
        rfxcom.initialise().await,
        Err(BridgeError::ConnectionFailed(_))
    ));
}

#[tokio::test]
async fn test_get_status() {
    let device = MockTransceiver::new();
    let rfxcom = bridge(&device, settings());
    assert_eq!(rfxcom.get_status().await, Availability::Offline);

    rfxcom.initialise().await.unwrap();
    assert_eq!(rfxcom.get_status().await, Availability::Online);

    device.set_responsive(false);
    assert_eq!(rfxcom.get_status().await, Availability::Offline);

    device.set_responsive(true);
    rfxcom.stop().await.unwrap();
    assert_eq!(rfxcom.get_status().await, Availability::Offline);
}

#[tokio::test]
async fn test_protocol_events() {
    let device = MockTransceiver::new();
    let rfxcom = bridge(&device, settings());
    let mut events = rfxcom.subscribe_protocols_event();
    rfxcom.initialise().await.unwrap();

    assert!(device.inject(&lighting2_frame(0x123ABC, 1, 1, 15)).await);
    let (protocol, event) = tokio::time::timeout(Duration::from_secs(2), events.recv())
        .await
        .unwrap()
        .unwrap();

    assert_eq!(protocol, "lighting2");
    assert_eq!(event.id, "0x123ABC");
    assert_eq!(event.unit_code.as_deref(), Some("1"));
    assert_eq!(event.command.as_deref(), Some("On"));
    assert_eq!(event.subtype_name, "AC");
    assert_eq!(event.field("level"), Some(&serde_json::json!(15)));
    assert!(!event.is_group);
}

#[tokio::test]
async fn test_receive_filter() {
    let device = MockTransceiver::new();
    let mut settings = settings();
    settings.receive = vec!["temp1".to_string()];
    let rfxcom = bridge(&device, settings);
    let mut events = rfxcom.subscribe_protocols_event();
    rfxcom.initialise().await.unwrap();

    device.inject(&lighting2_frame(0x123ABC, 1, 1, 0)).await;
    device.inject(&temp1_frame(0x0101, 215, 9)).await;

    let (protocol, event) = tokio::time::timeout(Duration::from_secs(2), events.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(protocol, "temp1");
    assert_eq!(event.battery_level, Some(9));
    assert_eq!(event.field("temperature"), Some(&serde_json::json!(21.5)));
}

#[tokio::test]
async fn test_on_command_lighting2() {
    let device = MockTransceiver::new();
    let rfxcom = bridge(&device, settings());
    rfxcom.initialise().await.unwrap();

    rfxcom
        .on_command("lighting2", "0x123ABC/1", "switchOn", None)
        .await
        .unwrap();
    rfxcom
        .on_command("lighting2", "0x123ABC/1", "level 9", None)
        .await
        .unwrap();

    let sent = device.transmitted();
    assert_eq!(sent.len(), 2);
    assert_eq!(&sent[0][4..10], &[0x00, 0x12, 0x3A, 0xBC, 0x01, 0x01]);
    assert_eq!(&sent[1][9..11], &[0x02, 0x09]);
    assert_ne!(sent[0][3], sent[1][3]);
}

#[tokio::test]
async fn test_on_command_group_word() {
    let device = MockTransceiver::new();
    let rfxcom = bridge(&device, settings());
    rfxcom.initialise().await.unwrap();

    rfxcom
        .on_command("lighting2", "0x123ABC/1", "group on", None)
        .await
        .unwrap();

    let sent = device.transmitted();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0][8], 0x00);
    assert_eq!(sent[0][9], 0x04);
}

#[tokio::test]
async fn test_on_command_remote_shutter_units() {
    let device = MockTransceiver::new();
    let rfxcom = bridge(&device, settings());
    rfxcom.initialise().await.unwrap();

    let config = DeviceConfig {
        id: "0x0A0B0C".to_string(),
        units: vec!["0x0A0B0C/2".to_string(), "0x0A0B0D/1".to_string()],
        ..Default::default()
    };
    rfxcom
        .on_command("rfy", "0x0A0B0C/1", "down", Some(&config))
        .await
        .unwrap();

    let sent = device.transmitted();
    assert_eq!(sent.len(), 3);
    let targets: Vec<(u8, u8)> = sent.iter().map(|p| (p[6], p[7])).collect();
    assert_eq!(targets, vec![(0x0C, 1), (0x0C, 2), (0x0D, 1)]);
    assert!(sent.iter().all(|p| p[8] == 0x03));
}

#[tokio::test]
async fn test_on_command_blinds_mode() {
    let device = MockTransceiver::new();
    let rfxcom = bridge(&device, settings());
    rfxcom.initialise().await.unwrap();

    rfxcom
        .on_command("blinds1", "0x123456/1", "tiltUp", None)
        .await
        .unwrap();

    let us = DeviceConfig {
        id: "0x123456".to_string(),
        options: DeviceOptions {
            blinds_mode: Some(BlindsMode::Us),
        },
        ..Default::default()
    };
    rfxcom
        .on_command("blinds1", "0x123456/1", "tiltUp", Some(&us))
        .await
        .unwrap();
    rfxcom
        .on_command("blinds1", "0x123456/1", "tilt down", Some(&us))
        .await
        .unwrap();

    let sent = device.transmitted();
    assert_eq!(sent.len(), 3);
    assert_eq!(sent[0][1], 0x19);
    assert_eq!(&sent[0][4..8], &[0x12, 0x34, 0x56, 0x01]);
    assert_eq!(sent[0][8], 0x07);
    assert_eq!(sent[1][8], 0x05);
    assert_eq!(sent[2][8], 0x06);
}

#[tokio::test]
async fn test_on_command_dimmer_subtype() {
    let device = MockTransceiver::new();
    let rfxcom = bridge(&device, settings());
    rfxcom.initialise().await.unwrap();

    rfxcom
        .on_command("lighting5", "0xF09AC8/1", "setMood 2", None)
        .await
        .unwrap();

    let emw = DeviceConfig {
        id: "0xF09AC8".to_string(),
        subtype: Some("EMW100".to_string()),
        ..Default::default()
    };
    rfxcom
        .on_command("lighting5", "0xF09AC8/1", "mood3", Some(&emw))
        .await
        .unwrap();

    let sent = device.transmitted();
    assert_eq!(sent.len(), 2);
    assert_eq!((sent[0][1], sent[0][2]), (0x14, 0x00));
    assert_eq!(&sent[0][4..8], &[0xF0, 0x9A, 0xC8, 0x01]);
    assert_eq!(sent[0][8], 4);
    assert_eq!((sent[1][2], sent[1][8]), (0x01, 5));
}

#[tokio::test]
async fn test_on_command_repetitions() {
    let device = MockTransceiver::new();
    let mut settings = settings();
    settings.transmit.repeat = 2;
    let rfxcom = bridge(&device, settings);
    rfxcom.initialise().await.unwrap();

    rfxcom
        .on_command("lighting2", "0x123ABC/1", "off", None)
        .await
        .unwrap();
    assert_eq!(device.transmitted().len(), 2);

    device.clear_sent();
    let config = DeviceConfig {
        id: "0x123ABC".to_string(),
        repetitions: Some(3),
        ..Default::default()
    };
    rfxcom
        .on_command("lighting2", "0x123ABC/1", "off", Some(&config))
        .await
        .unwrap();
    assert_eq!(device.transmitted().len(), 3);
}

#[tokio::test]
async fn test_on_command_ignores_unknown() {
    let device = MockTransceiver::new();
    let rfxcom = bridge(&device, settings());
    rfxcom.initialise().await.unwrap();

    rfxcom.on_command("warpdrive", "0x1/1", "on", None).await.unwrap();
    rfxcom.on_command("lighting2", "0x123ABC/1", "explode", None).await.unwrap();
    rfxcom.on_command("lighting2", "not-hex/1", "on", None).await.unwrap();
    rfxcom.on_command("temp1", "0x0101", "on", None).await.unwrap();

    assert!(device.transmitted().is_empty());
}

#[tokio::test]
async fn test_on_command_before_initialise() {
    let device = MockTransceiver::new();
    let rfxcom = bridge(&device, settings());

    let result = rfxcom.on_command("lighting2", "0x123ABC/1", "on", None).await;
    assert!(matches!(result, Err(BridgeError::NotConnected)));
}

#[tokio::test]
async fn test_unplug_emits_disconnect() {
    let device = MockTransceiver::new();
    let rfxcom = bridge(&device, settings());
    let mut events = rfxcom.subscribe_events();
    rfxcom.initialise().await.unwrap();

    let status = tokio::time::timeout(Duration::from_secs(1), events.recv())
        .await
        .unwrap();
    assert!(matches!(status, Some(BridgeEvent::Status(_))));

    device.unplug().await;
    let event = tokio::time::timeout(Duration::from_secs(1), events.recv())
        .await
        .unwrap();
    assert!(matches!(event, Some(BridgeEvent::Disconnected { .. })));
}

#[test]
fn test_lookups() {
    let rfxcom = bridge(&MockTransceiver::new(), settings());
    assert_eq!(rfxcom.get_sub_type("lighting2", 0), Some("AC"));
    for command in 0..=255u8 {
        assert_eq!(rfxcom.is_group("lighting2", command), command == 3 || command == 4);
    }
}
