//! Transport trait definitions

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::Result;

/// Events that can occur on a transport
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// Connection established
    Connected,
    /// Connection closed (clean or error)
    Disconnected { reason: Option<String> },
    /// One complete packet received
    Data(Bytes),
    /// Error occurred
    Error(String),
}

/// Trait for sending data
#[async_trait]
pub trait TransportSender: Send + Sync {
    /// Send one packet
    async fn send(&self, data: Bytes) -> Result<()>;

    /// Check if connected
    fn is_connected(&self) -> bool;

    /// Close the sender
    async fn close(&self) -> Result<()>;
}

/// Trait for receiving data
#[async_trait]
pub trait TransportReceiver: Send {
    /// Receive the next event
    async fn recv(&mut self) -> Option<TransportEvent>;
}

/// Boxed sender/receiver pair returned by a [`Connector`]
pub type TransportPair = (Box<dyn TransportSender>, Box<dyn TransportReceiver>);

/// Opens a transport to a transceiver
///
/// Implemented by the serial port and by the virtual transceiver, so the
/// protocol layer can reopen the link on restart.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Open a fresh connection
    async fn open(&self) -> Result<TransportPair>;

    /// Human readable endpoint, for logs
    fn describe(&self) -> String;
}
