//! Adapter events

use rfxmqtt_core::CoordinatorInfo;

use crate::mqtt::MqttMessage;

/// Events from a bridge
#[derive(Debug, Clone)]
pub enum BridgeEvent {
    /// Bridge connected
    Connected,
    /// Bridge disconnected
    Disconnected { reason: Option<String> },
    /// Transceiver status response
    Status(CoordinatorInfo),
    /// Inbound MQTT message
    Message(MqttMessage),
    /// Error occurred
    Error(String),
}
