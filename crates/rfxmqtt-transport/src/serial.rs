//! Serial transport implementation
//!
//! RFXtrx transceivers enumerate as USB serial devices running at
//! 38400 baud, 8N1, no flow control. The reader task reassembles packets
//! so every [`TransportEvent::Data`] carries exactly one packet.

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info};

use crate::error::{Result, TransportError};
use crate::framing::PacketFramer;
use crate::traits::{Connector, TransportEvent, TransportPair, TransportReceiver, TransportSender};

/// Serial transport configuration
#[derive(Debug, Clone)]
pub struct SerialConfig {
    /// Baud rate (default: 38400)
    pub baud_rate: u32,
    /// Log raw bytes at debug level
    pub debug: bool,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            baud_rate: 38400,
            debug: false,
        }
    }
}

/// Serial transport to a physical transceiver
#[cfg(feature = "serial")]
pub struct SerialTransport;

#[cfg(feature = "serial")]
impl SerialTransport {
    /// Connect with custom config
    pub async fn connect_with_config(
        port_name: &str,
        config: SerialConfig,
    ) -> Result<(SerialSender, SerialReceiver)> {
        use tokio_serial::{DataBits, FlowControl, Parity, SerialPortBuilderExt, StopBits};

        let port = tokio_serial::new(port_name, config.baud_rate)
            .data_bits(DataBits::Eight)
            .stop_bits(StopBits::One)
            .parity(Parity::None)
            .flow_control(FlowControl::None)
            .open_native_async()
            .map_err(|e| TransportError::ConnectionFailed(format!("Failed to open {}: {}", port_name, e)))?;

        info!("Serial port opened: {} @ {} baud", port_name, config.baud_rate);

        let (mut reader, writer) = tokio::io::split(port);
        let (tx, rx) = mpsc::channel(100);
        let connected = Arc::new(Mutex::new(true));
        let connected_clone = connected.clone();
        let debug_bytes = config.debug;

        // Spawn receiver task
        let reader_task = tokio::spawn(async move {
            use tokio::io::AsyncReadExt;
            let mut buf = vec![0u8; 256];
            let mut framer = PacketFramer::new();

            loop {
                match reader.read(&mut buf).await {
                    Ok(0) => {
                        *connected_clone.lock() = false;
                        let _ = tx.send(TransportEvent::Disconnected { reason: None }).await;
                        break;
                    }
                    Ok(n) => {
                        if debug_bytes {
                            debug!("Serial received {:02X?}", &buf[..n]);
                        }
                        for packet in framer.push(&buf[..n]) {
                            if tx.send(TransportEvent::Data(packet)).await.is_err() {
                                return;
                            }
                        }
                    }
                    Err(e) => {
                        error!("Serial read error: {}", e);
                        *connected_clone.lock() = false;
                        let _ = tx
                            .send(TransportEvent::Disconnected {
                                reason: Some(e.to_string()),
                            })
                            .await;
                        break;
                    }
                }
            }
        });

        let sender = SerialSender {
            writer: tokio::sync::Mutex::new(writer),
            connected,
            reader_task,
            debug: debug_bytes,
        };

        Ok((sender, SerialReceiver { rx }))
    }
}

/// Serial sender
#[cfg(feature = "serial")]
pub struct SerialSender {
    writer: tokio::sync::Mutex<tokio::io::WriteHalf<tokio_serial::SerialStream>>,
    connected: Arc<Mutex<bool>>,
    reader_task: tokio::task::JoinHandle<()>,
    debug: bool,
}

#[cfg(feature = "serial")]
#[async_trait]
impl TransportSender for SerialSender {
    async fn send(&self, data: Bytes) -> Result<()> {
        use tokio::io::AsyncWriteExt;

        if !self.is_connected() {
            return Err(TransportError::NotConnected);
        }

        let mut writer = self.writer.lock().await;
        writer
            .write_all(&data)
            .await
            .map_err(|e| TransportError::SendFailed(format!("Serial write failed: {}", e)))?;

        if self.debug {
            debug!("Serial sent {:02X?}", &data[..]);
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        *self.connected.lock()
    }

    async fn close(&self) -> Result<()> {
        *self.connected.lock() = false;
        self.reader_task.abort();
        Ok(())
    }
}

/// Serial receiver
pub struct SerialReceiver {
    rx: mpsc::Receiver<TransportEvent>,
}

#[async_trait]
impl TransportReceiver for SerialReceiver {
    async fn recv(&mut self) -> Option<TransportEvent> {
        self.rx.recv().await
    }
}

/// Opens the serial port on demand
pub struct SerialConnector {
    port_name: String,
    config: SerialConfig,
}

impl SerialConnector {
    pub fn new(port_name: &str, config: SerialConfig) -> Self {
        Self {
            port_name: port_name.to_string(),
            config,
        }
    }
}

#[cfg(feature = "serial")]
#[async_trait]
impl Connector for SerialConnector {
    async fn open(&self) -> Result<TransportPair> {
        let (sender, receiver) =
            SerialTransport::connect_with_config(&self.port_name, self.config.clone()).await?;
        Ok((Box::new(sender), Box::new(receiver)))
    }

    fn describe(&self) -> String {
        format!("{} @ {} baud", self.port_name, self.config.baud_rate)
    }
}

// Stub implementation when serial feature is disabled
#[cfg(not(feature = "serial"))]
#[async_trait]
impl Connector for SerialConnector {
    async fn open(&self) -> Result<TransportPair> {
        Err(TransportError::ConnectionFailed(format!(
            "cannot open {}: serial feature not enabled",
            self.port_name
        )))
    }

    fn describe(&self) -> String {
        self.port_name.clone()
    }
}
