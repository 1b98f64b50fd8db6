//! rfxmqtt Bridge
//!
//! The three adapters around the core:
//! - [`rfxcom::RfxcomBridge`] speaks the RFXtrx serial protocol
//! - [`mqtt::MqttAdapter`] owns the broker session and listener dispatch
//! - [`discovery`] projects devices into Home Assistant discovery

pub mod discovery;
pub mod error;
pub mod event;
pub mod listener;
pub mod mqtt;
pub mod rfxcom;

pub use discovery::{BridgeDiscovery, DeviceDiscovery, DiscoveryMessage, DiscoveryPublisher, HomeAssistantDiscovery};
pub use error::{BridgeError, ProtocolError, Result};
pub use event::BridgeEvent;
pub use listener::{ListenerRegistry, MqttListener};
pub use mqtt::{
    Broker, ConnectOptions, MqttAdapter, MqttClient, MqttMessage, MqttPublisher, MqttSession, PublishOptions,
    RumqttBroker, Will,
};
pub use rfxcom::{CommandHandler, Effect, ProtocolEvent, RfxcomBridge, Strategy, Transition};
