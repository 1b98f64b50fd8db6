//! RFXtrx packet decoding
//!
//! Packet layout shared by every family:
//!
//! ```text
//! [0] length (bytes after this one)
//! [1] packet type
//! [2] subtype
//! [3] sequence number
//! [4..] payload
//! ```
//!
//! Sensor packets end with a byte carrying the signal strength in the high
//! nibble and the battery level in the low nibble.

use rfxmqtt_core::{CoordinatorInfo, NormalizedEvent};

use super::registry::{self, Family};
use crate::error::ProtocolError;

pub const INTERFACE_CONTROL: u8 = 0x00;
pub const INTERFACE_MESSAGE: u8 = 0x01;
pub const TRANSMITTER_RESPONSE: u8 = 0x02;

pub const CMD_RESET: u8 = 0x00;
pub const CMD_STATUS: u8 = 0x02;
pub const CMD_SET_MODE: u8 = 0x03;
pub const CMD_START_RECEIVER: u8 = 0x07;

/// Frequency byte sent with interface commands (433.92 MHz)
pub const FREQUENCY_433: u8 = 0x53;

const START_RECEIVER_SUBTYPE: u8 = 0x07;

/// A decoded packet from the transceiver
#[derive(Debug, Clone, PartialEq)]
pub enum Packet {
    /// Response to get status / set mode
    Status {
        info: CoordinatorInfo,
        receiver_type: u8,
        protocols: [u8; 3],
    },
    /// Response to start receiver
    ReceiverStarted(String),
    /// Acknowledgement of a transmitted packet
    TransmitAck { seq: u8, ok: bool },
    /// A radio frame
    Event(NormalizedEvent),
}

/// Build an interface control packet
pub fn interface_command(seq: u8, cmnd: u8, receiver_type: u8, protocols: [u8; 3]) -> Vec<u8> {
    let mut packet = vec![0u8; 14];
    packet[0] = 0x0D;
    packet[1] = INTERFACE_CONTROL;
    packet[2] = 0x00;
    packet[3] = seq;
    packet[4] = cmnd;
    packet[5] = receiver_type;
    packet[7..10].copy_from_slice(&protocols);
    packet
}

/// Decode one complete packet
pub fn decode(packet: &[u8]) -> Result<Packet, ProtocolError> {
    if packet.len() < 4 || packet[0] as usize + 1 != packet.len() {
        return Err(ProtocolError::MalformedPacket(format!("{:02X?}", packet)));
    }

    match packet[1] {
        INTERFACE_MESSAGE => decode_interface(packet),
        TRANSMITTER_RESPONSE => {
            need(packet, 5)?;
            Ok(Packet::TransmitAck {
                seq: packet[3],
                ok: packet[4] == 0x00,
            })
        }
        packet_type => {
            let family = registry::family_by_packet_type(packet_type).ok_or_else(|| {
                ProtocolError::MalformedPacket(format!("unsupported packet type 0x{:02X}", packet_type))
            })?;
            decode_event(family, packet).map(Packet::Event)
        }
    }
}

fn need(packet: &[u8], len: usize) -> Result<(), ProtocolError> {
    if packet.len() < len {
        return Err(ProtocolError::MalformedPacket(format!(
            "expected {} bytes, got {:02X?}",
            len, packet
        )));
    }
    Ok(())
}

fn decode_interface(packet: &[u8]) -> Result<Packet, ProtocolError> {
    need(packet, 14)?;

    if packet[2] == START_RECEIVER_SUBTYPE {
        let text: String = packet[4..]
            .iter()
            .take_while(|b| **b != 0)
            .map(|b| *b as char)
            .collect();
        return Ok(Packet::ReceiverStarted(text));
    }

    let receiver_type = packet[5];
    let protocols = [packet[7], packet[8], packet[9]];
    let info = CoordinatorInfo {
        receiver_type: registry::receiver_type_name(receiver_type),
        hardware_version: format!("{}.{}", packet[10], packet[11]),
        firmware_version: packet[6] as u16,
        firmware_type: registry::firmware_type_name(packet[13]),
        enabled_protocols: registry::enabled_protocols(protocols),
    };

    Ok(Packet::Status {
        info,
        receiver_type,
        protocols,
    })
}

fn hex_id(bytes: &[u8], width: usize) -> String {
    let value = bytes.iter().fold(0u32, |acc, b| (acc << 8) | *b as u32);
    format!("0x{:0width$X}", value, width = width)
}

fn base_event(family: &Family, packet: &[u8], id: String) -> NormalizedEvent {
    NormalizedEvent {
        id,
        protocol: family.name.to_string(),
        subtype: packet[2],
        subtype_name: family
            .subtype_name(packet[2])
            .map(str::to_string)
            .unwrap_or_else(|| format!("{}_0x{:02X}", family.name.to_uppercase(), packet[2])),
        ..Default::default()
    }
}

/// Signal strength only
fn with_rssi(mut event: NormalizedEvent, byte: u8) -> NormalizedEvent {
    event.rssi = byte >> 4;
    event
}

/// Signal strength and battery level
fn with_battery_rssi(mut event: NormalizedEvent, byte: u8) -> NormalizedEvent {
    event.rssi = byte >> 4;
    event.battery_level = Some(byte & 0x0F);
    event
}

fn with_command(mut event: NormalizedEvent, number: u8, name: Option<&str>) -> NormalizedEvent {
    event.command_number = Some(number);
    event.command = Some(
        name.map(str::to_string)
            .unwrap_or_else(|| format!("Unknown 0x{:02X}", number)),
    );
    event.is_group = registry::is_group(&event.protocol, number);
    event
}

fn temperature(high: u8, low: u8) -> f64 {
    let magnitude = (((high & 0x7F) as u16) << 8 | low as u16) as f64 / 10.0;
    if high & 0x80 != 0 {
        -magnitude
    } else {
        magnitude
    }
}

fn humidity_status(code: u8) -> &'static str {
    match code {
        0x00 => "Normal",
        0x01 => "Comfort",
        0x02 => "Dry",
        0x03 => "Wet",
        _ => "Unknown",
    }
}

fn decode_event(family: &'static Family, packet: &[u8]) -> Result<NormalizedEvent, ProtocolError> {
    let event = match family.packet_type {
        registry::LIGHTING1 => {
            need(packet, 8)?;
            let mut event = base_event(family, packet, (packet[4] as char).to_string());
            event.unit_code = Some(packet[5].to_string());
            let name = match packet[6] {
                0 => Some("Off"),
                1 => Some("On"),
                2 => Some("Dim"),
                3 => Some("Bright"),
                5 => Some("All Off"),
                6 => Some("All On"),
                7 => Some("Chime"),
                _ => None,
            };
            let event = with_command(event, packet[6], name).with_field("houseCode", (packet[4] as char).to_string());
            with_rssi(event, packet[7])
        }
        registry::LIGHTING2 => {
            need(packet, 12)?;
            let id = [packet[4] & 0x03, packet[5], packet[6], packet[7]];
            let mut event = base_event(family, packet, hex_id(&id, 6));
            event.unit_code = Some(packet[8].to_string());
            let name = match packet[9] {
                0 => Some("Off"),
                1 => Some("On"),
                2 => Some("Set Level"),
                3 => Some("Group Off"),
                4 => Some("Group On"),
                5 => Some("Set Group Level"),
                _ => None,
            };
            let event = with_command(event, packet[9], name).with_field("level", packet[10]);
            with_rssi(event, packet[11])
        }
        registry::LIGHTING4 => {
            need(packet, 10)?;
            // the identity is the code itself
            let data = hex_id(&packet[4..7], 6);
            let pulse = (packet[7] as u16) << 8 | packet[8] as u16;
            let event = base_event(family, packet, data.clone())
                .with_field("data", data)
                .with_field("pulseWidth", pulse);
            with_rssi(event, packet[9])
        }
        registry::LIGHTING5 => {
            need(packet, 11)?;
            let mut event = base_event(family, packet, hex_id(&packet[4..7], 6));
            event.unit_code = Some(packet[7].to_string());
            let name = match packet[8] {
                0x00 => Some("Off"),
                0x01 => Some("On"),
                0x02 => Some("Group Off"),
                0x03 => Some("Mood1"),
                0x04 => Some("Mood2"),
                0x05 => Some("Mood3"),
                0x06 => Some("Mood4"),
                0x07 => Some("Mood5"),
                0x10 => Some("Set Level"),
                _ => None,
            };
            let event = with_command(event, packet[8], name).with_field("level", packet[9]);
            with_rssi(event, packet[10])
        }
        registry::LIGHTING6 => {
            need(packet, 12)?;
            let mut event = base_event(family, packet, hex_id(&packet[4..6], 4));
            event.unit_code = Some(format!("{}{}", packet[6] as char, packet[7]));
            let name = match packet[8] {
                0 => Some("On"),
                1 => Some("Off"),
                2 => Some("Group On"),
                3 => Some("Group Off"),
                _ => None,
            };
            let event = with_command(event, packet[8], name).with_field("groupCode", (packet[6] as char).to_string());
            with_rssi(event, packet[11])
        }
        registry::CHIME1 => {
            need(packet, 8)?;
            let event = base_event(family, packet, hex_id(&packet[4..6], 4)).with_field("sound", packet[6]);
            with_rssi(event, packet[7])
        }
        registry::BLINDS1 => {
            need(packet, 10)?;
            let mut event = base_event(family, packet, hex_id(&packet[4..7], 6));
            event.unit_code = Some(packet[7].to_string());
            let name = match packet[8] {
                0 => Some("Open"),
                1 => Some("Close"),
                2 => Some("Stop"),
                3 => Some("Confirm"),
                4 => Some("Set Limit"),
                _ => None,
            };
            with_rssi(with_command(event, packet[8], name), packet[9])
        }
        registry::SECURITY1 => {
            need(packet, 9)?;
            let status = packet[7] & 0x7F;
            let name = match status {
                0x00 => "Normal",
                0x01 => "Normal Delayed",
                0x02 => "Alarm",
                0x03 => "Alarm Delayed",
                0x04 => "Motion",
                0x05 => "No Motion",
                0x06 => "Panic",
                0x07 => "End Panic",
                0x09 => "Arm Away",
                0x0A => "Arm Away Delayed",
                0x0B => "Arm Home",
                0x0C => "Arm Home Delayed",
                0x0D => "Disarm",
                _ => "Unknown",
            };
            let event = base_event(family, packet, hex_id(&packet[4..7], 6))
                .with_field("status", name)
                .with_field("statusCode", status)
                .with_field("tampered", packet[7] & 0x80 != 0);
            with_battery_rssi(event, packet[8])
        }
        registry::TEMP1 => {
            need(packet, 9)?;
            let event = base_event(family, packet, hex_id(&packet[4..6], 4))
                .with_field("temperature", temperature(packet[6], packet[7]));
            with_battery_rssi(event, packet[8])
        }
        registry::HUMIDITY1 => {
            need(packet, 9)?;
            let event = base_event(family, packet, hex_id(&packet[4..6], 4))
                .with_field("humidity", packet[6])
                .with_field("humidityStatus", humidity_status(packet[7]));
            with_battery_rssi(event, packet[8])
        }
        registry::TEMPHUMIDITY1 => {
            need(packet, 11)?;
            let event = base_event(family, packet, hex_id(&packet[4..6], 4))
                .with_field("temperature", temperature(packet[6], packet[7]))
                .with_field("humidity", packet[8])
                .with_field("humidityStatus", humidity_status(packet[9]));
            with_battery_rssi(event, packet[10])
        }
        other => {
            return Err(ProtocolError::MalformedPacket(format!(
                "no decoder for {} (0x{:02X})",
                family.name, other
            )))
        }
    };

    Ok(event)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    fn number_field(event: &NormalizedEvent, key: &str) -> Option<f64> {
        event.field(key).and_then(Value::as_f64)
    }

    fn decode_event_packet(bytes: &[u8]) -> NormalizedEvent {
        match decode(bytes).unwrap() {
            Packet::Event(event) => event,
            other => panic!("expected event, got {:?}", other),
        }
    }

    #[test]
    fn test_decode_lighting2() {
        let event = decode_event_packet(&[
            0x0B, 0x11, 0x00, 0x01, 0x00, 0x12, 0x3A, 0xBC, 0x01, 0x01, 0x0F, 0x70,
        ]);
        assert_eq!(event.id, "0x123ABC");
        assert_eq!(event.protocol, "lighting2");
        assert_eq!(event.subtype_name, "AC");
        assert_eq!(event.unit_code.as_deref(), Some("1"));
        assert_eq!(event.command.as_deref(), Some("On"));
        assert_eq!(event.command_number, Some(1));
        assert_eq!(event.rssi, 7);
        assert!(!event.is_group);
        assert_eq!(number_field(&event, "level"), Some(15.0));
    }

    #[test]
    fn test_decode_lighting2_group() {
        let event = decode_event_packet(&[
            0x0B, 0x11, 0x00, 0x01, 0x00, 0x12, 0x3A, 0xBC, 0x00, 0x04, 0x00, 0x50,
        ]);
        assert!(event.is_group);
        assert_eq!(event.command.as_deref(), Some("Group On"));
    }

    #[test]
    fn test_decode_lighting4_uses_data_as_id() {
        let event = decode_event_packet(&[
            0x09, 0x13, 0x00, 0x02, 0x0A, 0x0B, 0x0C, 0x01, 0x5E, 0x60,
        ]);
        assert_eq!(event.id, "0x0A0B0C");
        assert_eq!(event.field("data"), Some(&Value::from("0x0A0B0C")));
        assert_eq!(number_field(&event, "pulseWidth"), Some(350.0));
        assert!(event.unit_code.is_none());
    }

    #[test]
    fn test_decode_temphumidity_negative() {
        let event = decode_event_packet(&[
            0x0A, 0x52, 0x01, 0x03, 0xAB, 0x01, 0x80, 0x19, 0x32, 0x01, 0x89,
        ]);
        assert_eq!(event.id, "0xAB01");
        assert_eq!(event.subtype_name, "TH1");
        assert_eq!(number_field(&event, "temperature"), Some(-2.5));
        assert_eq!(number_field(&event, "humidity"), Some(50.0));
        assert_eq!(event.battery_level, Some(9));
        assert_eq!(event.rssi, 8);
    }

    #[test]
    fn test_decode_security1_tamper() {
        let event = decode_event_packet(&[0x08, 0x20, 0x00, 0x00, 0x12, 0x34, 0x56, 0x82, 0x59]);
        assert_eq!(event.field("status"), Some(&Value::from("Alarm")));
        assert_eq!(event.field("tampered"), Some(&Value::from(true)));
        assert_eq!(event.battery_level, Some(9));
    }

    #[test]
    fn test_decode_status() {
        let mut bytes = vec![0u8; 21];
        bytes[0] = 0x14;
        bytes[1] = INTERFACE_MESSAGE;
        bytes[4] = CMD_STATUS;
        bytes[5] = 0x53;
        bytes[6] = 0xF1;
        bytes[9] = 0x04;
        bytes[10] = 1;
        bytes[11] = 3;
        bytes[13] = 0x02;

        match decode(&bytes).unwrap() {
            Packet::Status { info, protocols, .. } => {
                assert_eq!(info.receiver_type, "433.92MHz transceiver");
                assert_eq!(info.firmware_version, 0xF1);
                assert_eq!(info.firmware_type, "Type2");
                assert_eq!(info.hardware_version, "1.3");
                assert_eq!(info.enabled_protocols, vec!["AC"]);
                assert_eq!(protocols, [0, 0, 0x04]);
            }
            other => panic!("expected status, got {:?}", other),
        }
    }

    #[test]
    fn test_decode_ack_and_nak() {
        assert_eq!(
            decode(&[0x04, 0x02, 0x01, 0x09, 0x00]).unwrap(),
            Packet::TransmitAck { seq: 9, ok: true }
        );
        assert_eq!(
            decode(&[0x04, 0x02, 0x01, 0x09, 0x02]).unwrap(),
            Packet::TransmitAck { seq: 9, ok: false }
        );
    }

    #[test]
    fn test_decode_rejects_bad_length() {
        assert!(decode(&[0x0B, 0x11, 0x00]).is_err());
        assert!(decode(&[0x03, 0x77, 0x00, 0x00]).is_err());
    }

    #[test]
    fn test_interface_command_layout() {
        let packet = interface_command(4, CMD_SET_MODE, FREQUENCY_433, [0x08, 0x00, 0x24]);
        assert_eq!(packet.len(), 14);
        assert_eq!(packet[0], 0x0D);
        assert_eq!(packet[4], CMD_SET_MODE);
        assert_eq!(&packet[7..10], &[0x08, 0x00, 0x24]);
    }
}
