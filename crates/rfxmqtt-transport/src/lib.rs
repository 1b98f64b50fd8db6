//! rfxmqtt Transport Layer
//!
//! This crate provides the byte links to a transceiver:
//! - Serial (RFXtrx USB devices, optional `serial` feature)
//! - Virtual transceiver (tests and `usbport = "mock"`)
//!
//! Both deliver whole packets; [`framing::PacketFramer`] does the reassembly.

pub mod error;
pub mod framing;
pub mod mock;
pub mod serial;
pub mod traits;

pub use error::{Result, TransportError};
pub use framing::PacketFramer;
pub use mock::{MockIdentity, MockTransceiver};
pub use serial::{SerialConfig, SerialConnector};
pub use traits::{Connector, TransportEvent, TransportPair, TransportReceiver, TransportSender};

#[cfg(feature = "serial")]
pub use serial::SerialTransport;
