//! rfxmqtt Controller
//!
//! Lifecycle and routing for the bridge:
//! - radio events to `<base>/devices/...` and Home Assistant discovery
//! - `<base>/command/...` to the transceiver
//! - bridge and device actions from MQTT or an admin surface
//! - the cron-scheduled transceiver health check

pub mod controller;
pub mod error;
pub mod healthcheck;

pub use controller::{CommandListener, Controller, ControllerState, ExitCallback};
pub use error::{ControllerError, Result};
pub use healthcheck::HealthCheck;
