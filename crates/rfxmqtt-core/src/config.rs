//! Bridge settings
//!
//! Settings are read from a TOML file; every field has a default so an
//! empty file is a valid configuration:
//!
//! ```toml
//! loglevel = "info"
//! data_dir = "./data"
//!
//! [mqtt]
//! server = "localhost"
//! base_topic = "rfxcom2mqtt"
//!
//! [rfxcom]
//! usbport = "/dev/ttyUSB0"
//! receive = ["lighting2", "temphumidity1"]
//! enabled_protocols = ["AC", "OREGON"]
//!
//! [[devices]]
//! id = "0x123ABC"
//! name = "kitchen"
//! ```

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::{Error, Result, DEFAULT_BASE_TOPIC, DEFAULT_DISCOVERY_PREFIX};

/// Accepted log levels, most to least severe
pub const LOG_LEVELS: [&str; 5] = ["error", "warn", "info", "debug", "trace"];

/// Port name selecting the virtual transceiver
pub const MOCK_PORT: &str = "mock";

/// Top-level settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub loglevel: String,
    pub data_dir: PathBuf,
    pub mqtt: MqttSettings,
    pub rfxcom: RfxcomSettings,
    pub homeassistant: HomeAssistantSettings,
    pub cache_state: CacheSettings,
    pub healthcheck: HealthcheckSettings,
    pub devices: Vec<DeviceConfig>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            loglevel: "info".to_string(),
            data_dir: PathBuf::from("./data"),
            mqtt: MqttSettings::default(),
            rfxcom: RfxcomSettings::default(),
            homeassistant: HomeAssistantSettings::default(),
            cache_state: CacheSettings::default(),
            healthcheck: HealthcheckSettings::default(),
            devices: Vec::new(),
        }
    }
}

/// Broker connection settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MqttSettings {
    /// Broker host, optionally with an `mqtt://` or `tcp://` scheme
    pub server: String,
    pub port: u16,
    pub base_topic: String,
    pub client_id: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub qos: u8,
    pub retain: bool,
    /// Keep alive interval in seconds
    pub keepalive: u16,
}

impl Default for MqttSettings {
    fn default() -> Self {
        let suffix = uuid::Uuid::new_v4().simple().to_string();
        Self {
            server: "localhost".to_string(),
            port: 1883,
            base_topic: DEFAULT_BASE_TOPIC.to_string(),
            client_id: format!("rfxmqtt-{}", &suffix[..8]),
            username: None,
            password: None,
            qos: 0,
            retain: false,
            keepalive: 60,
        }
    }
}

impl MqttSettings {
    /// Host name with any URL scheme stripped
    pub fn host(&self) -> &str {
        let server = self.server.as_str();
        let server = server
            .strip_prefix("mqtt://")
            .or_else(|| server.strip_prefix("tcp://"))
            .unwrap_or(server);
        server.trim_end_matches('/')
    }
}

/// Transceiver settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RfxcomSettings {
    /// Serial port path, or `mock` for the virtual transceiver
    pub usbport: String,
    pub baud: u32,
    /// Log every raw packet
    pub debug: bool,
    pub transmit: TransmitSettings,
    /// Packet families forwarded to MQTT; empty forwards every family
    pub receive: Vec<String>,
    /// Radio protocols to enable with a set-mode command; empty keeps the stored mode
    pub enabled_protocols: Vec<String>,
    /// Status response timeout in milliseconds
    pub status_timeout_ms: u64,
}

impl Default for RfxcomSettings {
    fn default() -> Self {
        Self {
            usbport: "/dev/ttyUSB0".to_string(),
            baud: 38400,
            debug: false,
            transmit: TransmitSettings::default(),
            receive: Vec::new(),
            enabled_protocols: Vec::new(),
            status_timeout_ms: 5000,
        }
    }
}

impl RfxcomSettings {
    pub fn is_mock(&self) -> bool {
        self.usbport == MOCK_PORT
    }

    /// Repetitions for a device: override, then `transmit.repeat`
    pub fn repetitions_for(&self, device: Option<&DeviceConfig>) -> u8 {
        device
            .and_then(|d| d.repetitions)
            .unwrap_or(self.transmit.repeat)
            .max(1)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransmitSettings {
    /// Times each command is transmitted
    pub repeat: u8,
}

impl Default for TransmitSettings {
    fn default() -> Self {
        Self { repeat: 1 }
    }
}

/// Home Assistant discovery settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HomeAssistantSettings {
    pub discovery: bool,
    pub discovery_topic: String,
    pub discovery_bridge_unique_id: String,
}

impl Default for HomeAssistantSettings {
    fn default() -> Self {
        Self {
            discovery: true,
            discovery_topic: DEFAULT_DISCOVERY_PREFIX.to_string(),
            discovery_bridge_unique_id: "rfxcom2mqtt_bridge".to_string(),
        }
    }
}

/// Store persistence settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    pub enable: bool,
    /// Flush interval in seconds
    pub save_interval: u64,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            enable: true,
            save_interval: 60,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthcheckSettings {
    pub enabled: bool,
    /// Cron expression, 5 fields (minute precision) or 6-7 fields
    pub cron: String,
}

impl Default for HealthcheckSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            cron: "* * * * *".to_string(),
        }
    }
}

/// Blind tilt command set
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum BlindsMode {
    #[default]
    #[serde(rename = "EU")]
    Eu,
    #[serde(rename = "US")]
    Us,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceOptions {
    pub blinds_mode: Option<BlindsMode>,
}

/// Static per-device override
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    pub id: String,
    pub name: Option<String>,
    pub friendly_name: Option<String>,
    #[serde(rename = "type")]
    pub device_type: Option<String>,
    pub subtype: Option<String>,
    /// Extra addresses commanded together with the device (remote shutters)
    pub units: Vec<String>,
    pub options: DeviceOptions,
    pub repetitions: Option<u8>,
}

impl DeviceConfig {
    /// Display name: friendly name, then name, then id
    pub fn display_name(&self) -> &str {
        self.friendly_name
            .as_deref()
            .or(self.name.as_deref())
            .unwrap_or(&self.id)
    }
}

impl Settings {
    /// Parse settings from TOML text
    pub fn from_toml_str(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    /// Read settings from a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path).map_err(|e| {
            Error::Configuration(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&text)
    }

    pub fn to_toml_string(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Look up a static device override by name or id
    pub fn find_device(&self, name_or_id: &str) -> Option<&DeviceConfig> {
        self.devices
            .iter()
            .find(|d| d.name.as_deref() == Some(name_or_id))
            .or_else(|| self.devices.iter().find(|d| d.id == name_or_id))
    }

    pub fn repetitions_for(&self, device: Option<&DeviceConfig>) -> u8 {
        self.rfxcom.repetitions_for(device)
    }

    pub fn state_path(&self) -> PathBuf {
        self.data_dir.join(crate::store::STATE_FILE)
    }

    pub fn devices_path(&self) -> PathBuf {
        self.data_dir.join(crate::store::DEVICES_FILE)
    }

    /// Check the settings are usable
    pub fn validate(&self) -> Result<()> {
        if !LOG_LEVELS.contains(&self.loglevel.as_str()) {
            return Err(Error::Configuration(format!(
                "loglevel must be one of {}, got '{}'",
                LOG_LEVELS.join(", "),
                self.loglevel
            )));
        }

        if self.mqtt.host().is_empty() {
            return Err(Error::Configuration("mqtt.server is empty".to_string()));
        }
        if self.mqtt.port == 0 {
            return Err(Error::Configuration("mqtt.port must be non-zero".to_string()));
        }
        if self.mqtt.qos > 2 {
            return Err(Error::Configuration(format!(
                "mqtt.qos must be 0, 1 or 2, got {}",
                self.mqtt.qos
            )));
        }
        validate_topic_prefix("mqtt.base_topic", &self.mqtt.base_topic)?;
        if self.mqtt.client_id.is_empty() {
            return Err(Error::Configuration("mqtt.client_id is empty".to_string()));
        }
        if self.mqtt.username.is_some() != self.mqtt.password.is_some() {
            return Err(Error::Configuration(
                "mqtt.username and mqtt.password must be set together".to_string(),
            ));
        }

        if self.rfxcom.usbport.is_empty() {
            return Err(Error::Configuration("rfxcom.usbport is empty".to_string()));
        }
        if self.rfxcom.baud == 0 {
            return Err(Error::Configuration("rfxcom.baud must be non-zero".to_string()));
        }

        if self.homeassistant.discovery {
            validate_topic_prefix("homeassistant.discovery_topic", &self.homeassistant.discovery_topic)?;
        }

        if self.cache_state.enable && self.cache_state.save_interval == 0 {
            return Err(Error::Configuration(
                "cache_state.save_interval must be non-zero".to_string(),
            ));
        }

        if self.healthcheck.enabled {
            let fields = self.healthcheck.cron.split_whitespace().count();
            if !(5..=7).contains(&fields) {
                return Err(Error::Configuration(format!(
                    "healthcheck.cron must have 5 to 7 fields, got '{}'",
                    self.healthcheck.cron
                )));
            }
        }

        let mut seen = HashSet::new();
        for device in &self.devices {
            if device.id.is_empty() {
                return Err(Error::Configuration("device override without id".to_string()));
            }
            if !seen.insert(device.id.as_str()) {
                return Err(Error::Configuration(format!(
                    "duplicate device override: {}",
                    device.id
                )));
            }
        }

        Ok(())
    }
}

fn validate_topic_prefix(key: &str, topic: &str) -> Result<()> {
    if topic.trim_matches('/').is_empty() {
        return Err(Error::Configuration(format!("{} is empty", key)));
    }
    if topic.contains('#') || topic.contains('+') {
        return Err(Error::Configuration(format!(
            "{} must not contain wildcards: {}",
            key, topic
        )));
    }
    Ok(())
}

type LogLevelCallback = Box<dyn Fn(&str) + Send + Sync>;

/// Owner of the live settings
///
/// Components read snapshots; the only runtime mutation is the log level,
/// which is applied through the installed callback and written back to the
/// settings file.
pub struct SettingsHandle {
    settings: RwLock<Settings>,
    path: Option<PathBuf>,
    on_log_level: Mutex<Option<LogLevelCallback>>,
}

impl SettingsHandle {
    pub fn new(settings: Settings) -> Arc<Self> {
        Arc::new(Self {
            settings: RwLock::new(settings),
            path: None,
            on_log_level: Mutex::new(None),
        })
    }

    /// Handle persisting changes to `path`
    pub fn with_path(settings: Settings, path: impl Into<PathBuf>) -> Arc<Self> {
        Arc::new(Self {
            settings: RwLock::new(settings),
            path: Some(path.into()),
            on_log_level: Mutex::new(None),
        })
    }

    /// Current settings
    pub fn get(&self) -> Settings {
        self.settings.read().clone()
    }

    /// Read a value without cloning the whole settings
    pub fn read<T>(&self, f: impl FnOnce(&Settings) -> T) -> T {
        f(&self.settings.read())
    }

    pub fn log_level(&self) -> String {
        self.settings.read().loglevel.clone()
    }

    /// Install the callback applying log level changes
    pub fn on_log_level_change<F>(&self, callback: F)
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        *self.on_log_level.lock() = Some(Box::new(callback));
    }

    /// Change the live log level and persist it
    ///
    /// Only an unknown level is an error; a failed settings write is
    /// logged and the new level stays active.
    pub fn set_log_level(&self, level: &str) -> Result<()> {
        let level = level.trim().to_ascii_lowercase();
        if !LOG_LEVELS.contains(&level.as_str()) {
            return Err(Error::Configuration(format!("unknown log level: {}", level)));
        }

        self.settings.write().loglevel = level.clone();
        if let Some(callback) = self.on_log_level.lock().as_ref() {
            callback(&level);
        }
        info!("Log level set to {}", level);

        if let Err(e) = self.persist() {
            warn!("Failed to save log level {}: {}", level, e);
        }
        Ok(())
    }

    fn persist(&self) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let text = self.settings.read().to_toml_string()?;
        fs::write(path, text)?;
        debug!("Settings written to {}", path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_file_is_default() {
        let settings = Settings::from_toml_str("").unwrap();
        assert_eq!(settings.mqtt.base_topic, "rfxcom2mqtt");
        assert_eq!(settings.homeassistant.discovery_topic, "homeassistant");
        assert_eq!(settings.cache_state.save_interval, 60);
        assert_eq!(settings.rfxcom.transmit.repeat, 1);
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_parse_devices() {
        let settings = Settings::from_toml_str(
            r#"
            [[devices]]
            id = "0x00F00D"
            name = "patio"
            type = "rfy"
            units = ["0x00F00E", "0x00F00F"]
            repetitions = 3

            [[devices]]
            id = "0x1234"
            friendly_name = "Kitchen blind"
            options = { blinds_mode = "US" }
            "#,
        )
        .unwrap();

        let patio = settings.find_device("patio").unwrap();
        assert_eq!(patio.id, "0x00F00D");
        assert_eq!(patio.units.len(), 2);
        assert_eq!(settings.repetitions_for(Some(patio)), 3);

        let blind = settings.find_device("0x1234").unwrap();
        assert_eq!(blind.options.blinds_mode, Some(BlindsMode::Us));
        assert_eq!(blind.display_name(), "Kitchen blind");
        assert_eq!(settings.repetitions_for(Some(blind)), 1);
    }

    #[test]
    fn test_validate_rejects() {
        let mut settings = Settings::default();
        settings.loglevel = "verbose".to_string();
        assert!(matches!(settings.validate(), Err(Error::Configuration(_))));

        let mut settings = Settings::default();
        settings.mqtt.base_topic = "rfx/#".to_string();
        assert!(settings.validate().is_err());

        let mut settings = Settings::default();
        settings.mqtt.qos = 3;
        assert!(settings.validate().is_err());

        let mut settings = Settings::default();
        settings.healthcheck.cron = "every minute".to_string();
        assert!(settings.validate().is_err());

        let mut settings = Settings::default();
        settings.devices = vec![
            DeviceConfig { id: "a".into(), ..Default::default() },
            DeviceConfig { id: "a".into(), ..Default::default() },
        ];
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_mqtt_host_strips_scheme() {
        let mut mqtt = MqttSettings::default();
        mqtt.server = "mqtt://broker.local".to_string();
        assert_eq!(mqtt.host(), "broker.local");
    }

    #[test]
    fn test_set_log_level_invokes_callback() {
        let handle = SettingsHandle::new(Settings::default());
        let seen = Arc::new(Mutex::new(String::new()));
        let seen_clone = seen.clone();
        handle.on_log_level_change(move |level| *seen_clone.lock() = level.to_string());

        handle.set_log_level("DEBUG").unwrap();
        assert_eq!(handle.log_level(), "debug");
        assert_eq!(*seen.lock(), "debug");

        assert!(handle.set_log_level("loud").is_err());
        assert_eq!(handle.log_level(), "debug");
    }

    #[test]
    fn test_set_log_level_survives_failed_write() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing").join("rfxmqtt.toml");
        let handle = SettingsHandle::with_path(Settings::default(), &path);

        handle.set_log_level("warn").unwrap();
        assert_eq!(handle.log_level(), "warn");
        assert!(!path.exists());
    }
}
