//! MQTT listener registry

use async_trait::async_trait;
use rfxmqtt_core::TopicPattern;
use std::sync::Arc;
use tracing::warn;

use crate::mqtt::MqttMessage;

/// A component interested in inbound MQTT messages
#[async_trait]
pub trait MqttListener: Send + Sync {
    /// Topic filters this listener wants, absolute (base included)
    fn subscribe_topics(&self) -> Vec<String>;

    /// Handle one message whose topic matched a filter
    async fn on_mqtt_message(&self, msg: &MqttMessage);
}

/// A compiled filter bound to its listener
struct ListenerEntry {
    pattern: TopicPattern,
    listener: Arc<dyn MqttListener>,
}

/// Dispatch table from topic filters to listeners
#[derive(Default)]
pub struct ListenerRegistry {
    entries: Vec<ListenerEntry>,
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener, compiling its filters
    ///
    /// Invalid filters are skipped with a warning. Returns the filters that
    /// were registered.
    pub fn add(&mut self, listener: Arc<dyn MqttListener>) -> Vec<String> {
        let mut added = Vec::new();
        for filter in listener.subscribe_topics() {
            match TopicPattern::compile(&filter) {
                Ok(pattern) => {
                    self.entries.push(ListenerEntry {
                        pattern,
                        listener: Arc::clone(&listener),
                    });
                    added.push(filter);
                }
                Err(e) => warn!("Ignoring listener filter {}: {}", filter, e),
            }
        }
        added
    }

    /// Listeners with at least one filter matching the topic, each once
    pub fn matching(&self, topic: &str) -> Vec<Arc<dyn MqttListener>> {
        let mut found: Vec<Arc<dyn MqttListener>> = Vec::new();
        for entry in &self.entries {
            if entry.pattern.matches(topic)
                && !found.iter().any(|l| Arc::ptr_eq(l, &entry.listener))
            {
                found.push(Arc::clone(&entry.listener));
            }
        }
        found
    }

    /// Every registered filter, deduplicated
    pub fn filters(&self) -> Vec<String> {
        let mut filters: Vec<String> = Vec::new();
        for entry in &self.entries {
            let filter = entry.pattern.as_str();
            if !filters.iter().any(|f| f == filter) {
                filters.push(filter.to_string());
            }
        }
        filters
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
