//! rfxmqtt Core
//!
//! Shared building blocks for the RFXtrx to MQTT bridge.
//!
//! This crate provides:
//! - The bridge data model ([`NormalizedEvent`], [`DeviceState`], [`EntityState`], [`Action`])
//! - Topic naming and MQTT filter matching ([`Topics`], [`TopicPattern`])
//! - Debounced JSON-backed stores ([`KeyedStore`])
//! - Settings and the live settings handle ([`Settings`], [`SettingsHandle`])

pub mod config;
pub mod error;
pub mod store;
pub mod topic;
pub mod types;

pub use config::{DeviceConfig, Settings, SettingsHandle};
pub use error::{Error, Result};
pub use store::{DeviceStore, EntityStore, KeyedStore, Record};
pub use topic::{topic_entity, CommandTopic, TopicPattern, Topics};
pub use types::*;

/// Bridge version reported on `bridge/info`
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default MQTT base topic
pub const DEFAULT_BASE_TOPIC: &str = "rfxcom2mqtt";

/// Default Home Assistant discovery prefix
pub const DEFAULT_DISCOVERY_PREFIX: &str = "homeassistant";

/// Serial speed of the RFXtrx family
pub const DEFAULT_BAUD_RATE: u32 = 38400;
