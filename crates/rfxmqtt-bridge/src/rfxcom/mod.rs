//! RFXtrx protocol adapter
//!
//! Drives the transceiver through its interface commands, decodes received
//! frames into [`NormalizedEvent`]s and encodes outbound commands through
//! the per-family [`CommandHandler`]s.

pub mod command;
pub mod packet;
pub mod registry;
pub mod transition;

use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use rfxmqtt_core::config::{DeviceConfig, RfxcomSettings};
use rfxmqtt_core::{Availability, CoordinatorInfo, NormalizedEvent};
use rfxmqtt_transport::{Connector, TransportEvent, TransportReceiver, TransportSender};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

pub use command::{CommandHandler, Effect};
pub use packet::Packet;
pub use transition::{transition, Transition};

use crate::{BridgeError, BridgeEvent, Result};

/// Pause after reset before the transceiver accepts commands
pub const RESET_DELAY: Duration = Duration::from_millis(500);

/// Protocol event: `(protocol, event)`
pub type ProtocolEvent = (String, NormalizedEvent);

/// Strategy used to turn a command into transmissions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    /// `rfy`: the entity and every configured unit are addressed
    RemoteShutter,
    /// `blinds1`: tilt codes depend on the blinds mode
    VenetianBlind,
    /// `lighting5`: subtype defaults to `LIGHTWAVERF`
    FiveStateDimmer,
    Default,
}

impl Strategy {
    pub fn for_family(device_type: &str) -> Self {
        match device_type {
            "rfy" => Strategy::RemoteShutter,
            "blinds1" => Strategy::VenetianBlind,
            "lighting5" => Strategy::FiveStateDimmer,
            _ => Strategy::Default,
        }
    }

    fn default_subtype(&self) -> Option<&'static str> {
        match self {
            Strategy::FiveStateDimmer => Some("LIGHTWAVERF"),
            _ => None,
        }
    }

    /// Addresses one command is sent to
    fn addresses(&self, address: &str, device: Option<&DeviceConfig>) -> Vec<String> {
        let mut addresses = vec![address.to_string()];
        if *self == Strategy::RemoteShutter {
            for unit in device.map(|d| d.units.as_slice()).unwrap_or_default() {
                if !addresses.contains(unit) {
                    addresses.push(unit.clone());
                }
            }
        }
        addresses
    }
}

/// A command payload resolved against a handler
#[derive(Debug, Clone, PartialEq, Eq)]
struct Resolved {
    function: &'static str,
    value: Option<i64>,
    group: bool,
}

/// Parse `<function> [value]`, falling back to the free-text words
fn resolve_payload(handler: &CommandHandler, payload: &str) -> Option<Resolved> {
    let mut parts = payload.split_whitespace();
    let head = parts.next()?;

    if let Some(function) = handler.function(head) {
        let value = match parts.next() {
            Some(text) => Some(text.parse::<i64>().ok()?),
            None => None,
        };
        return Some(Resolved {
            function,
            value,
            group: false,
        });
    }

    let t = transition(handler.family(), payload)?;
    handler.function(t.function).map(|function| Resolved {
        function,
        value: t.arg,
        group: t.group,
    })
}

/// State shared with the reader task
#[derive(Default)]
struct Shared {
    pending_status: Mutex<Option<oneshot::Sender<(CoordinatorInfo, u8)>>>,
    pending_start: Mutex<Option<oneshot::Sender<String>>>,
    protocol_tx: Mutex<Option<mpsc::Sender<ProtocolEvent>>>,
    events_tx: Mutex<Option<mpsc::Sender<BridgeEvent>>>,
    coordinator: RwLock<Option<CoordinatorInfo>>,
}

impl Shared {
    async fn emit(&self, event: BridgeEvent) {
        let tx = self.events_tx.lock().clone();
        if let Some(tx) = tx {
            if tx.send(event).await.is_err() {
                self.events_tx.lock().take();
            }
        }
    }

    async fn forward(&self, event: ProtocolEvent) {
        let tx = self.protocol_tx.lock().clone();
        if let Some(tx) = tx {
            if tx.send(event).await.is_err() {
                self.protocol_tx.lock().take();
            }
        }
    }
}

/// RFXtrx transceiver adapter
pub struct RfxcomBridge {
    connector: Arc<dyn Connector>,
    settings: RfxcomSettings,
    sender: RwLock<Option<Arc<dyn TransportSender>>>,
    seq: AtomicU8,
    shared: Arc<Shared>,
    reader: Mutex<Option<JoinHandle<()>>>,
    running: Arc<Mutex<bool>>,
}

impl RfxcomBridge {
    pub fn new(connector: Arc<dyn Connector>, settings: RfxcomSettings) -> Self {
        Self {
            connector,
            settings,
            sender: RwLock::new(None),
            seq: AtomicU8::new(0),
            shared: Arc::new(Shared::default()),
            reader: Mutex::new(None),
            running: Arc::new(Mutex::new(false)),
        }
    }

    /// Whether the handshake completed and the link is open
    pub fn is_running(&self) -> bool {
        *self.running.lock()
    }

    fn status_timeout(&self) -> Duration {
        Duration::from_millis(self.settings.status_timeout_ms)
    }

    /// Identity reported by the last status response
    pub fn coordinator(&self) -> Option<CoordinatorInfo> {
        self.shared.coordinator.read().clone()
    }

    /// Status and disconnect events
    pub fn subscribe_events(&self) -> mpsc::Receiver<BridgeEvent> {
        let (tx, rx) = mpsc::channel(100);
        *self.shared.events_tx.lock() = Some(tx);
        rx
    }

    /// Decoded radio events for the enabled receive protocols
    pub fn subscribe_protocols_event(&self) -> mpsc::Receiver<ProtocolEvent> {
        let (tx, rx) = mpsc::channel(100);
        *self.shared.protocol_tx.lock() = Some(tx);
        rx
    }

    pub fn get_sub_type(&self, protocol: &str, subtype: u8) -> Option<&'static str> {
        registry::get_sub_type(protocol, subtype)
    }

    pub fn is_group(&self, protocol: &str, command_number: u8) -> bool {
        registry::is_group(protocol, command_number)
    }

    fn next_seq(&self) -> u8 {
        self.seq.fetch_add(1, Ordering::SeqCst)
    }

    async fn send(&self, packet: Vec<u8>) -> Result<()> {
        let sender = self.sender.read().clone().ok_or(BridgeError::NotConnected)?;
        if self.settings.debug {
            debug!("RFXtrx send {:02X?}", packet);
        }
        sender.send(Bytes::from(packet)).await?;
        Ok(())
    }

    /// Send an interface command and wait for the status response
    async fn command_with_status(
        &self,
        cmnd: u8,
        receiver_type: u8,
        protocols: [u8; 3],
    ) -> Result<(CoordinatorInfo, u8)> {
        let (tx, rx) = oneshot::channel();
        *self.shared.pending_status.lock() = Some(tx);

        let packet = packet::interface_command(self.next_seq(), cmnd, receiver_type, protocols);
        if let Err(e) = self.send(packet).await {
            self.shared.pending_status.lock().take();
            return Err(e);
        }

        match tokio::time::timeout(self.status_timeout(), rx).await {
            Ok(Ok(status)) => Ok(status),
            Ok(Err(_)) => Err(BridgeError::ConnectionFailed("transceiver closed".to_string())),
            Err(_) => {
                self.shared.pending_status.lock().take();
                Err(BridgeError::Timeout("status response".to_string()))
            }
        }
    }

    /// Open the transceiver and bring it into receive mode
    pub async fn initialise(&self) -> Result<CoordinatorInfo> {
        if *self.running.lock() {
            return Err(BridgeError::Other("Transceiver already initialised".to_string()));
        }

        info!("Opening transceiver on {}", self.connector.describe());
        let (sender, receiver) = self
            .connector
            .open()
            .await
            .map_err(|e| BridgeError::ConnectionFailed(e.to_string()))?;
        let sender: Arc<dyn TransportSender> = Arc::from(sender);
        *self.sender.write() = Some(Arc::clone(&sender));

        let task = tokio::spawn(read_loop(receiver, Arc::clone(&self.shared), self.settings.clone()));
        if let Some(old) = self.reader.lock().replace(task) {
            old.abort();
        }

        match self.handshake().await {
            Ok(info) => {
                *self.running.lock() = true;
                self.shared.emit(BridgeEvent::Status(info.clone())).await;
                Ok(info)
            }
            Err(e) => {
                error!("Transceiver initialisation failed: {}", e);
                self.close().await;
                Err(BridgeError::ConnectionFailed(e.to_string()))
            }
        }
    }

    async fn handshake(&self) -> Result<CoordinatorInfo> {
        self.seq.store(0, Ordering::SeqCst);
        self.send(packet::interface_command(self.next_seq(), packet::CMD_RESET, 0, [0; 3]))
            .await?;
        tokio::time::sleep(RESET_DELAY).await;

        // anything the transceiver sent before the reset settled is stale
        self.shared.pending_status.lock().take();
        self.shared.pending_start.lock().take();

        let (mut info, receiver_type) = self
            .command_with_status(packet::CMD_STATUS, 0, [0; 3])
            .await?;
        info!(
            "Transceiver {} firmware {} ({}), hardware {}",
            info.receiver_type, info.firmware_version, info.firmware_type, info.hardware_version
        );

        if !self.settings.enabled_protocols.is_empty() {
            let bits = registry::protocol_bits(&self.settings.enabled_protocols)?;
            let receiver_type = if receiver_type == 0 {
                packet::FREQUENCY_433
            } else {
                receiver_type
            };
            let (updated, _) = self
                .command_with_status(packet::CMD_SET_MODE, receiver_type, bits)
                .await?;
            info = updated;
            info!("Enabled protocols: {}", info.enabled_protocols.join(", "));
        }

        let (tx, rx) = oneshot::channel();
        *self.shared.pending_start.lock() = Some(tx);
        self.send(packet::interface_command(
            self.next_seq(),
            packet::CMD_START_RECEIVER,
            0,
            [0; 3],
        ))
        .await?;
        match tokio::time::timeout(self.status_timeout(), rx).await {
            Ok(Ok(text)) => info!("Receiver started: {}", text),
            _ => return Err(BridgeError::Timeout("start receiver".to_string())),
        }

        *self.shared.coordinator.write() = Some(info.clone());
        Ok(info)
    }

    /// Ask the transceiver for its status
    pub async fn get_status(&self) -> Availability {
        let connected = self
            .sender
            .read()
            .as_ref()
            .map(|s| s.is_connected())
            .unwrap_or(false);
        if !connected {
            return Availability::Offline;
        }

        match self.command_with_status(packet::CMD_STATUS, 0, [0; 3]).await {
            Ok(_) => Availability::Online,
            Err(e) => {
                warn!("Transceiver status check failed: {}", e);
                Availability::Offline
            }
        }
    }

    /// Transmit a command for `entity_name`
    ///
    /// Unknown device types, subtypes and functions are logged and ignored.
    pub async fn on_command(
        &self,
        device_type: &str,
        entity_name: &str,
        payload: &str,
        device: Option<&DeviceConfig>,
    ) -> Result<()> {
        let strategy = Strategy::for_family(device_type);
        let subtype = device
            .and_then(|d| d.subtype.as_deref())
            .or(strategy.default_subtype());

        let handler = match CommandHandler::resolve(device_type, subtype) {
            Ok(handler) => handler,
            Err(e) => {
                warn!("Ignoring command for {}: {}", entity_name, e);
                return Ok(());
            }
        };
        let handler = match strategy {
            Strategy::VenetianBlind => {
                handler.with_blinds_mode(device.and_then(|d| d.options.blinds_mode).unwrap_or_default())
            }
            _ => handler,
        };

        let Some(resolved) = resolve_payload(&handler, payload) else {
            warn!(
                "Ignoring command '{}' for {} {}: expected one of {}",
                payload,
                device_type,
                entity_name,
                handler.functions().join(", ")
            );
            return Ok(());
        };

        let repetitions = self.settings.repetitions_for(device);
        for address in strategy.addresses(entity_name, device) {
            let address = if resolved.group {
                handler.group_address(&address)
            } else {
                address
            };
            let effect = match handler.execute(&address, resolved.function, resolved.value) {
                Ok(effect) => effect,
                Err(e) => {
                    warn!("Cannot send {} to {}: {}", resolved.function, address, e);
                    continue;
                }
            };

            info!(
                "Sending {} {} to {} ({} time(s))",
                device_type, resolved.function, address, repetitions
            );
            for _ in 0..repetitions {
                for packet in &effect.packets {
                    let mut packet = packet.clone();
                    packet[3] = self.next_seq();
                    self.send(packet).await?;
                }
            }
        }
        Ok(())
    }

    async fn close(&self) {
        if let Some(task) = self.reader.lock().take() {
            task.abort();
        }
        let sender = self.sender.write().take();
        if let Some(sender) = sender {
            if let Err(e) = sender.close().await {
                warn!("Error closing transceiver: {}", e);
            }
        }
    }

    /// Close the transport
    pub async fn stop(&self) -> Result<()> {
        self.close().await;
        *self.running.lock() = false;
        info!("Transceiver closed");
        Ok(())
    }
}

async fn read_loop(mut receiver: Box<dyn TransportReceiver>, shared: Arc<Shared>, settings: RfxcomSettings) {
    while let Some(event) = receiver.recv().await {
        match event {
            TransportEvent::Data(data) => {
                if settings.debug {
                    debug!("RFXtrx recv {:02X?}", data.as_ref());
                }
                match packet::decode(&data) {
                    Ok(Packet::Status { info, receiver_type, .. }) => {
                        *shared.coordinator.write() = Some(info.clone());
                        let pending = shared.pending_status.lock().take();
                        if let Some(tx) = pending {
                            let _ = tx.send((info.clone(), receiver_type));
                        }
                    }
                    Ok(Packet::ReceiverStarted(text)) => {
                        let pending = shared.pending_start.lock().take();
                        if let Some(tx) = pending {
                            let _ = tx.send(text);
                        }
                    }
                    Ok(Packet::TransmitAck { seq, ok }) => {
                        if ok {
                            debug!("Transmit {} acknowledged", seq);
                        } else {
                            warn!("Transmit {} rejected by transceiver", seq);
                        }
                    }
                    Ok(Packet::Event(event)) => {
                        if !settings.receive.is_empty() && !settings.receive.contains(&event.protocol) {
                            debug!("Dropping {} event from {}", event.protocol, event.id);
                            continue;
                        }
                        shared.forward((event.protocol.clone(), event)).await;
                    }
                    Err(e) => debug!("Undecodable packet: {}", e),
                }
            }
            TransportEvent::Disconnected { reason } => {
                warn!("Transceiver disconnected: {:?}", reason);
                shared.emit(BridgeEvent::Disconnected { reason }).await;
                break;
            }
            TransportEvent::Error(e) => error!("Transceiver error: {}", e),
            TransportEvent::Connected => debug!("Transceiver link up"),
        }
    }
}
