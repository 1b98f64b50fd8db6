//! Topic naming and pattern matching
//!
//! Bridge topics are derived once from the base topic:
//! ```text
//! rfxcom2mqtt/devices/0x123ABC/1
//! rfxcom2mqtt/bridge/status
//! rfxcom2mqtt/command/lighting2/0x123ABC/1
//! ```
//!
//! Wildcards (MQTT filter syntax):
//! - `+` matches exactly one level
//! - `#` matches any number of levels, including none, and must be last

use crate::{Error, Result};

/// Suffix for device state publishes
pub const DEVICES_SUFFIX: &str = "devices";
/// Suffix for the last-will / online-offline topic
pub const WILL_SUFFIX: &str = "bridge/status";
/// Suffix for bridge info publishes
pub const INFO_SUFFIX: &str = "bridge/info";
/// Suffix for inbound device commands
pub const COMMAND_SUFFIX: &str = "command";
/// Suffix for hub-facing simplified commands
pub const HUB_COMMAND_SUFFIX: &str = "cmd";
/// Suffix for runtime log level changes
pub const LOG_LEVEL_SUFFIX: &str = "bridge/request/log_level";

/// Topic naming convention, derived once from configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topics {
    pub base: String,
    pub devices: String,
    pub will: String,
    pub info: String,
}

impl Topics {
    pub fn new(base: &str) -> Self {
        Self {
            base: base.trim_end_matches('/').to_string(),
            devices: DEVICES_SUFFIX.to_string(),
            will: WILL_SUFFIX.to_string(),
            info: INFO_SUFFIX.to_string(),
        }
    }

    /// Prefix a base-relative suffix with the base topic
    pub fn full(&self, suffix: &str) -> String {
        format!("{}/{}", self.base, suffix)
    }

    pub fn will_topic(&self) -> String {
        self.full(&self.will)
    }

    pub fn info_topic(&self) -> String {
        self.full(&self.info)
    }

    /// Base-relative devices topic for a topic entity (`<id>[/<unit>]`)
    pub fn device_suffix(&self, topic_entity: &str) -> String {
        format!("{}/{}", self.devices, topic_entity)
    }

    /// Subscription pattern for inbound device commands
    pub fn command_pattern(&self) -> String {
        self.full(&format!("{}/#", COMMAND_SUFFIX))
    }

    /// Subscription pattern for hub-facing commands
    pub fn hub_command_pattern(&self) -> String {
        self.full(&format!("{}/#", HUB_COMMAND_SUFFIX))
    }

    pub fn log_level_topic(&self) -> String {
        self.full(LOG_LEVEL_SUFFIX)
    }

    /// Strip `<base>/` from an absolute topic
    pub fn strip_base<'a>(&self, topic: &'a str) -> Option<&'a str> {
        topic
            .strip_prefix(self.base.as_str())
            .and_then(|rest| rest.strip_prefix('/'))
    }
}

/// Build the topic entity used under `devices/`
///
/// Group events address the whole device, so the unit code is dropped.
pub fn topic_entity(device_id: &str, unit_code: Option<&str>, is_group: bool) -> String {
    match unit_code {
        Some(unit) if !is_group => format!("{}/{}", device_id, unit),
        _ => device_id.to_string(),
    }
}

/// A parsed `<base>/command/<deviceType>/<entityName>[/<unitCode>]` topic
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandTopic {
    pub device_type: String,
    pub entity_name: String,
    pub unit_code: Option<String>,
}

impl CommandTopic {
    /// Parse an absolute command topic
    pub fn parse(topics: &Topics, topic: &str) -> Result<Self> {
        let rest = topics.strip_base(topic).ok_or_else(|| {
            Error::InvalidTopic(format!("topic {} is outside base {}", topic, topics.base))
        })?;

        let segments: Vec<&str> = rest.split('/').collect();
        if segments.len() < 3 || segments[0] != COMMAND_SUFFIX {
            return Err(Error::InvalidTopic(format!(
                "expected {}/command/<deviceType>/<entityName>[/<unitCode>], got {}",
                topics.base, topic
            )));
        }
        if segments.iter().take(3).any(|s| s.is_empty()) {
            return Err(Error::InvalidTopic(format!("empty segment in {}", topic)));
        }

        Ok(Self {
            device_type: segments[1].to_string(),
            entity_name: segments[2].to_string(),
            unit_code: segments
                .get(3)
                .filter(|s| !s.is_empty())
                .map(|s| s.to_string()),
        })
    }

    /// Address handed to the transceiver (`<entity>[/<unit>]`)
    pub fn address(&self) -> String {
        match &self.unit_code {
            Some(unit) => format!("{}/{}", self.entity_name, unit),
            None => self.entity_name.clone(),
        }
    }
}

/// A compiled MQTT topic filter
#[derive(Debug, Clone)]
pub struct TopicPattern {
    raw: String,
    regex: Option<regex_lite::Regex>,
}

impl TopicPattern {
    /// Compile a topic filter
    pub fn compile(filter: &str) -> Result<Self> {
        if filter.is_empty() {
            return Err(Error::InvalidTopic("empty topic filter".to_string()));
        }

        let segments: Vec<&str> = filter.split('/').collect();
        for (i, seg) in segments.iter().enumerate() {
            if seg.contains('#') && (*seg != "#" || i != segments.len() - 1) {
                return Err(Error::InvalidTopic(format!(
                    "'#' must be the last level: {}",
                    filter
                )));
            }
            if seg.contains('+') && *seg != "+" {
                return Err(Error::InvalidTopic(format!(
                    "'+' must occupy a whole level: {}",
                    filter
                )));
            }
        }

        let is_pattern = segments.iter().any(|s| *s == "+" || *s == "#");
        let regex = if is_pattern {
            let mut regex_str = String::from("^");
            for (i, seg) in segments.iter().enumerate() {
                match *seg {
                    "#" if i == 0 => regex_str.push_str(".*"),
                    // `a/#` also matches the parent level `a`
                    "#" => regex_str.push_str("(/.*)?"),
                    "+" => {
                        if i > 0 {
                            regex_str.push('/');
                        }
                        regex_str.push_str("[^/]*");
                    }
                    literal => {
                        if i > 0 {
                            regex_str.push('/');
                        }
                        regex_str.push_str(&regex_lite::escape(literal));
                    }
                }
            }
            regex_str.push('$');
            Some(
                regex_lite::Regex::new(&regex_str)
                    .map_err(|e| Error::InvalidTopic(e.to_string()))?,
            )
        } else {
            None
        };

        Ok(Self {
            raw: filter.to_string(),
            regex,
        })
    }

    /// Check if a topic matches this filter
    pub fn matches(&self, topic: &str) -> bool {
        match &self.regex {
            Some(regex) => regex.is_match(topic),
            None => topic == self.raw,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn is_pattern(&self) -> bool {
        self.regex.is_some()
    }
}

impl std::fmt::Display for TopicPattern {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.raw)
    }
}
