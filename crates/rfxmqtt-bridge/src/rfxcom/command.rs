//! Per-family transmit handlers
//!
//! Each [`CommandHandler`] variant knows the functions its family supports
//! and how to encode them. Addresses are the entity name with an optional
//! unit: `0x123ABC/1` (lighting2), `A/3` (lighting1), `0x1234/B1`
//! (lighting6). Unit `0` addresses the whole group where the family has one.

use rfxmqtt_core::config::BlindsMode;

use super::registry::{self, Family};
use crate::error::ProtocolError;

/// Packets produced by one command, sequence byte left at zero
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Effect {
    pub packets: Vec<Vec<u8>>,
}

impl Effect {
    fn single(packet: Vec<u8>) -> Self {
        Self {
            packets: vec![packet],
        }
    }
}

/// Default pulse width for lighting4 codes, in microseconds
pub const DEFAULT_PULSE_WIDTH: u16 = 350;

/// Transmit handler for one packet family and subtype
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandHandler {
    Lighting1(u8),
    Lighting2(u8),
    Lighting4(u8),
    Lighting5(u8),
    Lighting6(u8),
    Chime1(u8),
    Blinds1(u8, BlindsMode),
    Rfy(u8),
}

impl CommandHandler {
    /// Resolve a handler from a device type and an optional subtype name
    pub fn resolve(device_type: &str, subtype: Option<&str>) -> Result<Self, ProtocolError> {
        let family = registry::family(device_type)
            .filter(|f| f.transmit)
            .ok_or_else(|| ProtocolError::UnknownDeviceType(device_type.to_string()))?;
        let code = subtype_code(family, subtype)?;

        Ok(match family.packet_type {
            registry::LIGHTING1 => CommandHandler::Lighting1(code),
            registry::LIGHTING2 => CommandHandler::Lighting2(code),
            registry::LIGHTING4 => CommandHandler::Lighting4(code),
            registry::LIGHTING5 => CommandHandler::Lighting5(code),
            registry::LIGHTING6 => CommandHandler::Lighting6(code),
            registry::CHIME1 => CommandHandler::Chime1(code),
            registry::BLINDS1 => CommandHandler::Blinds1(code, BlindsMode::default()),
            registry::RFY => CommandHandler::Rfy(code),
            _ => return Err(ProtocolError::UnknownDeviceType(device_type.to_string())),
        })
    }

    /// Switch the tilt command set (blinds only)
    pub fn with_blinds_mode(self, mode: BlindsMode) -> Self {
        match self {
            CommandHandler::Blinds1(subtype, _) => CommandHandler::Blinds1(subtype, mode),
            other => other,
        }
    }

    pub fn family(&self) -> &'static str {
        match self {
            CommandHandler::Lighting1(_) => "lighting1",
            CommandHandler::Lighting2(_) => "lighting2",
            CommandHandler::Lighting4(_) => "lighting4",
            CommandHandler::Lighting5(_) => "lighting5",
            CommandHandler::Lighting6(_) => "lighting6",
            CommandHandler::Chime1(_) => "chime1",
            CommandHandler::Blinds1(..) => "blinds1",
            CommandHandler::Rfy(_) => "rfy",
        }
    }

    /// Functions this family accepts
    pub fn functions(&self) -> &'static [&'static str] {
        match self {
            CommandHandler::Lighting1(_) => &["switchOn", "switchOff", "chime", "bright", "dim"],
            CommandHandler::Lighting2(_) => &["switchOn", "switchOff", "setLevel"],
            CommandHandler::Lighting4(_) => &["sendData"],
            CommandHandler::Lighting5(_) => &["switchOn", "switchOff", "setMood", "setLevel"],
            CommandHandler::Lighting6(_) => &["switchOn", "switchOff"],
            CommandHandler::Chime1(_) => &["chime"],
            CommandHandler::Blinds1(..) => &["open", "close", "stop", "confirm", "setLimit", "tiltUp", "tiltDown"],
            CommandHandler::Rfy(_) => &["up", "down", "stop", "program"],
        }
    }

    pub fn supports(&self, function: &str) -> bool {
        self.functions().contains(&function)
    }

    /// Static name of a supported function
    pub fn function(&self, name: &str) -> Option<&'static str> {
        self.functions().iter().copied().find(|f| *f == name)
    }

    /// Rewrite an entity address to address its whole group (unit 0)
    pub fn group_address(&self, address: &str) -> String {
        let id = address.split('/').next().unwrap_or(address);
        match self {
            CommandHandler::Lighting6(_) => {
                let group = address
                    .split('/')
                    .nth(1)
                    .and_then(|rest| rest.chars().next())
                    .unwrap_or('A');
                format!("{}/{}", id, group)
            }
            _ => format!("{}/0", id),
        }
    }

    /// Encode `function` for the entity at `address`
    pub fn execute(&self, address: &str, function: &str, value: Option<i64>) -> Result<Effect, ProtocolError> {
        if !self.supports(function) {
            return Err(ProtocolError::UnknownFunction {
                device_type: self.family().to_string(),
                function: function.to_string(),
            });
        }

        match *self {
            CommandHandler::Lighting1(subtype) => {
                let (house, unit) = house_unit(address)?;
                let cmd = match (function, unit) {
                    ("switchOff", 0) => 5,
                    ("switchOn", 0) => 6,
                    ("switchOff", _) => 0,
                    ("switchOn", _) => 1,
                    ("dim", _) => 2,
                    ("bright", _) => 3,
                    _ => 7,
                };
                Ok(Effect::single(vec![0x07, registry::LIGHTING1, subtype, 0, house, unit, cmd, 0]))
            }
            CommandHandler::Lighting2(subtype) => {
                let (id, unit) = id_unit(address, 26)?;
                let group = unit == 0;
                let (cmd, level) = match function {
                    "switchOff" => (if group { 3 } else { 0 }, 0),
                    "switchOn" => (if group { 4 } else { 1 }, 0),
                    _ => (if group { 5 } else { 2 }, ranged(value, 0, 15, "level")?),
                };
                let id = id.to_be_bytes();
                Ok(Effect::single(vec![
                    0x0B,
                    registry::LIGHTING2,
                    subtype,
                    0,
                    id[0],
                    id[1],
                    id[2],
                    id[3],
                    unit,
                    cmd,
                    level,
                    0,
                ]))
            }
            CommandHandler::Lighting4(subtype) => {
                let data = parse_hex(address.split('/').next().unwrap_or(address), 24)?;
                let pulse = match value {
                    Some(v) => u16::try_from(v).map_err(|_| {
                        ProtocolError::InvalidValue(format!("pulse width {} outside 0..=65535", v))
                    })?,
                    None => DEFAULT_PULSE_WIDTH,
                };
                let data = data.to_be_bytes();
                let pulse = pulse.to_be_bytes();
                Ok(Effect::single(vec![
                    0x09,
                    registry::LIGHTING4,
                    subtype,
                    0,
                    data[1],
                    data[2],
                    data[3],
                    pulse[0],
                    pulse[1],
                    0,
                ]))
            }
            CommandHandler::Lighting5(subtype) => {
                let (id, unit) = id_unit(address, 24)?;
                let (cmd, level) = match function {
                    "switchOff" if unit == 0 => (0x02, 0),
                    "switchOff" => (0x00, 0),
                    "switchOn" => (0x01, 0),
                    "setMood" => (2 + ranged(value, 1, 5, "mood")?, 0),
                    _ => (0x10, ranged(value, 0, 31, "level")?),
                };
                let id = id.to_be_bytes();
                Ok(Effect::single(vec![
                    0x0A,
                    registry::LIGHTING5,
                    subtype,
                    0,
                    id[1],
                    id[2],
                    id[3],
                    unit,
                    cmd,
                    level,
                    0,
                ]))
            }
            CommandHandler::Lighting6(subtype) => {
                let (id, group, unit) = lighting6_address(address)?;
                let cmd = match (function, unit) {
                    ("switchOn", 0) => 2,
                    ("switchOff", 0) => 3,
                    ("switchOn", _) => 0,
                    _ => 1,
                };
                let id = id.to_be_bytes();
                Ok(Effect::single(vec![
                    0x0B,
                    registry::LIGHTING6,
                    subtype,
                    0,
                    id[2],
                    id[3],
                    group,
                    unit,
                    cmd,
                    0,
                    0,
                    0,
                ]))
            }
            CommandHandler::Chime1(subtype) => {
                let id = parse_hex(address.split('/').next().unwrap_or(address), 16)?;
                let sound = ranged(value.or(Some(1)), 0, 0xFF, "sound")?;
                let id = id.to_be_bytes();
                Ok(Effect::single(vec![0x07, registry::CHIME1, subtype, 0, id[2], id[3], sound, 0]))
            }
            CommandHandler::Blinds1(subtype, mode) => {
                let (id, unit) = id_unit(address, 24)?;
                let cmd = match (function, mode) {
                    ("open", _) => 0x00,
                    ("close", _) => 0x01,
                    ("stop", _) => 0x02,
                    ("confirm", _) => 0x03,
                    ("setLimit", _) => 0x04,
                    ("tiltUp", BlindsMode::Eu) => 0x07,
                    ("tiltDown", BlindsMode::Eu) => 0x08,
                    ("tiltUp", BlindsMode::Us) => 0x05,
                    _ => 0x06,
                };
                let id = id.to_be_bytes();
                Ok(Effect::single(vec![
                    0x09,
                    registry::BLINDS1,
                    subtype,
                    0,
                    id[1],
                    id[2],
                    id[3],
                    unit,
                    cmd,
                    0,
                ]))
            }
            CommandHandler::Rfy(subtype) => {
                let (id, unit) = id_unit(address, 20)?;
                let cmd = match function {
                    "stop" => 0x00,
                    "up" => 0x01,
                    "down" => 0x03,
                    _ => 0x07,
                };
                let id = id.to_be_bytes();
                Ok(Effect::single(vec![
                    0x0C,
                    registry::RFY,
                    subtype,
                    0,
                    id[1],
                    id[2],
                    id[3],
                    unit,
                    cmd,
                    0,
                    0,
                    0,
                    0,
                ]))
            }
        }
    }
}

fn subtype_code(family: &Family, subtype: Option<&str>) -> Result<u8, ProtocolError> {
    match subtype {
        None => Ok(family.default_subtype()),
        Some(name) => family
            .subtype_code(name)
            .or_else(|| parse_number(name).and_then(|n| u8::try_from(n).ok()))
            .filter(|code| family.subtype_name(*code).is_some())
            .ok_or_else(|| ProtocolError::UnknownSubtype {
                device_type: family.name.to_string(),
                subtype: name.to_string(),
            }),
    }
}

fn parse_number(text: &str) -> Option<u32> {
    match text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(hex, 16).ok(),
        None => text.parse().ok(),
    }
}

/// Parse a hex id (with or without `0x`) that must fit in `bits`
fn parse_hex(text: &str, bits: u32) -> Result<u32, ProtocolError> {
    let digits = text
        .strip_prefix("0x")
        .or_else(|| text.strip_prefix("0X"))
        .unwrap_or(text);
    let value = u32::from_str_radix(digits, 16)
        .map_err(|_| ProtocolError::InvalidAddress(text.to_string()))?;
    if bits < 32 && value >> bits != 0 {
        return Err(ProtocolError::InvalidAddress(format!(
            "{} does not fit in {} bits",
            text, bits
        )));
    }
    Ok(value)
}

fn parse_unit(text: Option<&str>, address: &str) -> Result<u8, ProtocolError> {
    match text {
        None => Ok(0),
        Some(unit) => unit
            .parse::<u8>()
            .map_err(|_| ProtocolError::InvalidAddress(address.to_string())),
    }
}

/// `<hex id>[/<unit>]`
fn id_unit(address: &str, bits: u32) -> Result<(u32, u8), ProtocolError> {
    let mut parts = address.split('/');
    let id = parse_hex(parts.next().unwrap_or_default(), bits)?;
    let unit = parse_unit(parts.next(), address)?;
    Ok((id, unit))
}

/// `<house letter>[/<unit>]`
fn house_unit(address: &str) -> Result<(u8, u8), ProtocolError> {
    let mut parts = address.split('/');
    let house = parts
        .next()
        .and_then(|h| h.chars().next())
        .map(|c| c.to_ascii_uppercase())
        .filter(|c| ('A'..='P').contains(c))
        .ok_or_else(|| ProtocolError::InvalidAddress(address.to_string()))?;
    let unit = parse_unit(parts.next(), address)?;
    Ok((house as u8, unit))
}

/// `<hex id>/<group letter><unit>`, e.g. `0x1234/B1`
fn lighting6_address(address: &str) -> Result<(u32, u8, u8), ProtocolError> {
    let mut parts = address.split('/');
    let id = parse_hex(parts.next().unwrap_or_default(), 16)?;
    let rest: String = parts.collect::<Vec<_>>().join("");
    let mut chars = rest.chars();
    let group = chars
        .next()
        .map(|c| c.to_ascii_uppercase())
        .filter(|c| c.is_ascii_uppercase())
        .ok_or_else(|| ProtocolError::InvalidAddress(address.to_string()))?;
    let unit_text: String = chars.collect();
    let unit = parse_unit(Some(unit_text.as_str()).filter(|s| !s.is_empty()), address)?;
    Ok((id, group as u8, unit))
}

fn ranged(value: Option<i64>, min: i64, max: i64, what: &str) -> Result<u8, ProtocolError> {
    let value = value.ok_or_else(|| ProtocolError::InvalidValue(format!("{} is required", what)))?;
    if value < min || value > max {
        return Err(ProtocolError::InvalidValue(format!(
            "{} {} outside {}..={}",
            what, value, min, max
        )));
    }
    Ok(value as u8)
}
