//! Bridge error types

use thiserror::Error;

pub type Result<T> = std::result::Result<T, BridgeError>;

#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("command error: {0}")]
    Command(#[from] ProtocolError),

    #[error("send error: {0}")]
    Send(String),

    #[error("not connected")]
    NotConnected,

    #[error("timeout waiting for {0}")]
    Timeout(String),

    #[error("transport error: {0}")]
    Transport(#[from] rfxmqtt_transport::TransportError),

    #[error(transparent)]
    Core(#[from] rfxmqtt_core::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("bridge error: {0}")]
    Other(String),
}

/// Failures resolving or encoding a transceiver command
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("unknown device type: {0}")]
    UnknownDeviceType(String),

    #[error("unknown subtype {subtype} for {device_type}")]
    UnknownSubtype { device_type: String, subtype: String },

    #[error("{device_type} has no function {function}")]
    UnknownFunction { device_type: String, function: String },

    #[error("invalid address: {0}")]
    InvalidAddress(String),

    #[error("invalid value: {0}")]
    InvalidValue(String),

    #[error("malformed packet: {0}")]
    MalformedPacket(String),

    #[error("unknown radio protocol: {0}")]
    UnknownRadioProtocol(String),
}
