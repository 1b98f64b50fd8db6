//! Virtual transceiver
//!
//! Behaves like an RFXtrx433 on the other end of a serial line: it answers
//! interface commands (reset, get status, set mode, start receiver),
//! acknowledges every transmit packet and lets callers inject received
//! radio frames. Selected with `usbport = "mock"`.

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::error::{Result, TransportError};
use crate::traits::{Connector, TransportEvent, TransportPair, TransportReceiver, TransportSender};

const INTERFACE_CONTROL: u8 = 0x00;
const INTERFACE_MESSAGE: u8 = 0x01;
const TRANSMITTER_RESPONSE: u8 = 0x02;

const CMD_RESET: u8 = 0x00;
const CMD_STATUS: u8 = 0x02;
const CMD_SET_MODE: u8 = 0x03;
const CMD_START_RECEIVER: u8 = 0x07;

const START_RECEIVER_SUBTYPE: u8 = 0x07;
const COPYRIGHT: &[u8; 16] = b"Copyright RFXCOM";

/// Identity reported by the virtual transceiver
#[derive(Debug, Clone)]
pub struct MockIdentity {
    pub receiver_type: u8,
    pub firmware_version: u8,
    pub firmware_type: u8,
    pub hardware_version: (u8, u8),
    /// Protocol enable bitmaps (msg3, msg4, msg5)
    pub protocols: [u8; 3],
}

impl Default for MockIdentity {
    fn default() -> Self {
        Self {
            // 433.92 MHz transceiver
            receiver_type: 0x53,
            firmware_version: 0xF1,
            firmware_type: 0x02,
            hardware_version: (1, 3),
            // AC, ARC, X10, HomeEasy EU, Oregon, Lighting4
            protocols: [0x08, 0x00, 0x2F],
        }
    }
}

struct MockState {
    identity: Mutex<MockIdentity>,
    responsive: AtomicBool,
    fail_open: AtomicBool,
    sent: Mutex<Vec<Bytes>>,
    events: Mutex<Option<mpsc::Sender<TransportEvent>>>,
    connected: Arc<AtomicBool>,
}

/// Handle to a virtual transceiver; clones share the same device
#[derive(Clone)]
pub struct MockTransceiver {
    state: Arc<MockState>,
}

impl Default for MockTransceiver {
    fn default() -> Self {
        Self::new()
    }
}

impl MockTransceiver {
    pub fn new() -> Self {
        Self::with_identity(MockIdentity::default())
    }

    pub fn with_identity(identity: MockIdentity) -> Self {
        Self {
            state: Arc::new(MockState {
                identity: Mutex::new(identity),
                responsive: AtomicBool::new(true),
                fail_open: AtomicBool::new(false),
                sent: Mutex::new(Vec::new()),
                events: Mutex::new(None),
                connected: Arc::new(AtomicBool::new(false)),
            }),
        }
    }

    /// Stop answering; packets are still recorded
    pub fn set_responsive(&self, responsive: bool) {
        self.state.responsive.store(responsive, Ordering::SeqCst);
    }

    /// Make the next `open` calls fail
    pub fn set_fail_open(&self, fail: bool) {
        self.state.fail_open.store(fail, Ordering::SeqCst);
    }

    pub fn is_connected(&self) -> bool {
        self.state.connected.load(Ordering::SeqCst)
    }

    /// Every packet written by the host, in order
    pub fn sent(&self) -> Vec<Bytes> {
        self.state.sent.lock().clone()
    }

    /// Packets written by the host that are not interface commands
    pub fn transmitted(&self) -> Vec<Bytes> {
        self.state
            .sent
            .lock()
            .iter()
            .filter(|p| p.get(1) != Some(&INTERFACE_CONTROL))
            .cloned()
            .collect()
    }

    pub fn clear_sent(&self) {
        self.state.sent.lock().clear();
    }

    /// Current protocol enable bitmaps
    pub fn protocols(&self) -> [u8; 3] {
        self.state.identity.lock().protocols
    }

    /// Deliver a received radio frame to the host
    pub async fn inject(&self, packet: &[u8]) -> bool {
        self.emit(TransportEvent::Data(Bytes::copy_from_slice(packet)))
            .await
    }

    /// Simulate the device being unplugged
    pub async fn unplug(&self) {
        self.state.connected.store(false, Ordering::SeqCst);
        self.emit(TransportEvent::Disconnected {
            reason: Some("device unplugged".to_string()),
        })
        .await;
        self.state.events.lock().take();
    }

    async fn emit(&self, event: TransportEvent) -> bool {
        let tx = self.state.events.lock().clone();
        match tx {
            Some(tx) => tx.send(event).await.is_ok(),
            None => false,
        }
    }

    fn status_packet(&self, seq: u8, cmnd: u8) -> Bytes {
        let identity = self.state.identity.lock().clone();
        let mut packet = vec![0u8; 21];
        packet[0] = 0x14;
        packet[1] = INTERFACE_MESSAGE;
        packet[2] = 0x00;
        packet[3] = seq;
        packet[4] = cmnd;
        packet[5] = identity.receiver_type;
        packet[6] = identity.firmware_version;
        packet[7..10].copy_from_slice(&identity.protocols);
        packet[10] = identity.hardware_version.0;
        packet[11] = identity.hardware_version.1;
        packet[13] = identity.firmware_type;
        Bytes::from(packet)
    }

    fn start_receiver_packet(seq: u8) -> Bytes {
        let mut packet = vec![0u8; 21];
        packet[0] = 0x14;
        packet[1] = INTERFACE_MESSAGE;
        packet[2] = START_RECEIVER_SUBTYPE;
        packet[3] = seq;
        packet[4..20].copy_from_slice(COPYRIGHT);
        Bytes::from(packet)
    }

    /// Answer a packet the way the hardware would
    async fn handle(&self, packet: Bytes) {
        self.state.sent.lock().push(packet.clone());

        if !self.state.responsive.load(Ordering::SeqCst) || packet.len() < 5 {
            return;
        }

        let seq = packet[3];
        let reply = match packet[1] {
            INTERFACE_CONTROL => match packet[4] {
                CMD_RESET => None,
                CMD_STATUS => Some(self.status_packet(seq, CMD_STATUS)),
                CMD_SET_MODE => {
                    if packet.len() >= 10 {
                        let mut identity = self.state.identity.lock();
                        identity.receiver_type = packet[5];
                        identity.protocols.copy_from_slice(&packet[7..10]);
                    }
                    Some(self.status_packet(seq, CMD_SET_MODE))
                }
                CMD_START_RECEIVER => Some(Self::start_receiver_packet(seq)),
                other => {
                    debug!("Virtual transceiver ignoring interface command 0x{:02X}", other);
                    None
                }
            },
            _ => Some(Bytes::from(vec![0x04, TRANSMITTER_RESPONSE, 0x01, seq, 0x00])),
        };

        if let Some(reply) = reply {
            self.emit(TransportEvent::Data(reply)).await;
        }
    }
}

#[async_trait]
impl Connector for MockTransceiver {
    async fn open(&self) -> Result<TransportPair> {
        if self.state.fail_open.load(Ordering::SeqCst) {
            return Err(TransportError::ConnectionFailed(
                "virtual transceiver refused to open".to_string(),
            ));
        }

        let (tx, rx) = mpsc::channel(100);
        *self.state.events.lock() = Some(tx);
        self.state.connected.store(true, Ordering::SeqCst);
        info!("Virtual transceiver opened");

        let sender = MockSender {
            device: self.clone(),
        };
        Ok((Box::new(sender), Box::new(MockReceiver { rx })))
    }

    fn describe(&self) -> String {
        "virtual transceiver".to_string()
    }
}

/// Host side of the virtual serial line
pub struct MockSender {
    device: MockTransceiver,
}

#[async_trait]
impl TransportSender for MockSender {
    async fn send(&self, data: Bytes) -> Result<()> {
        if !self.is_connected() {
            return Err(TransportError::NotConnected);
        }
        self.device.handle(data).await;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.device.is_connected()
    }

    async fn close(&self) -> Result<()> {
        self.device.state.connected.store(false, Ordering::SeqCst);
        self.device.state.events.lock().take();
        Ok(())
    }
}

pub struct MockReceiver {
    rx: mpsc::Receiver<TransportEvent>,
}

#[async_trait]
impl TransportReceiver for MockReceiver {
    async fn recv(&mut self) -> Option<TransportEvent> {
        self.rx.recv().await
    }
}
