//! Controller error types

use thiserror::Error;

pub type Result<T> = std::result::Result<T, ControllerError>;

#[derive(Error, Debug)]
pub enum ControllerError {
    #[error("invalid health check schedule '{expression}': {reason}")]
    Schedule { expression: String, reason: String },

    #[error("invalid state: {0}")]
    State(String),

    #[error(transparent)]
    Bridge(#[from] rfxmqtt_bridge::BridgeError),

    #[error(transparent)]
    Core(#[from] rfxmqtt_core::Error),
}
