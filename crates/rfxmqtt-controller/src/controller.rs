//! Bridge controller
//!
//! Owns the transceiver adapter, the MQTT adapter, both stores and the
//! discovery generator. One task runs the event loop; everything that
//! touches MQTT or the radio is routed through it.

use async_trait::async_trait;
use parking_lot::Mutex;
use rfxmqtt_bridge::{
    BridgeDiscovery, BridgeEvent, Broker, DeviceDiscovery, DiscoveryMessage, DiscoveryPublisher,
    HomeAssistantDiscovery, MqttAdapter, MqttListener, MqttMessage, ProtocolEvent, PublishOptions, RfxcomBridge,
};
use rfxmqtt_core::store::{DeviceStore, EntityStore};
use rfxmqtt_core::{
    topic_entity, Action, ActionType, Availability, BridgeAction, BridgeInfo, CommandTopic, CoordinatorInfo,
    NormalizedEvent, SettingsHandle, Topics, VERSION,
};
use rfxmqtt_transport::Connector;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Notify};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::error::{ControllerError, Result};
use crate::healthcheck::HealthCheck;

/// Process exit hook: `(code, restart)`
pub type ExitCallback = Arc<dyn Fn(i32, bool) + Send + Sync>;

/// Controller lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerState {
    Created,
    Starting,
    Running,
    Stopping,
    Stopped,
}

/// Serves `<base>/command/<deviceType>/<entityName>[/<unitCode>]`
pub struct CommandListener {
    topics: Topics,
    settings: Arc<SettingsHandle>,
    rfxcom: Arc<RfxcomBridge>,
}

impl CommandListener {
    pub fn new(topics: Topics, settings: Arc<SettingsHandle>, rfxcom: Arc<RfxcomBridge>) -> Self {
        Self {
            topics,
            settings,
            rfxcom,
        }
    }
}

#[async_trait]
impl MqttListener for CommandListener {
    fn subscribe_topics(&self) -> Vec<String> {
        vec![self.topics.command_pattern()]
    }

    async fn on_mqtt_message(&self, msg: &MqttMessage) {
        let command = match CommandTopic::parse(&self.topics, &msg.topic) {
            Ok(command) => command,
            Err(e) => {
                warn!("Dropping command: {}", e);
                return;
            }
        };

        // static overrides may address a device by name
        let config = self
            .settings
            .read(|s| s.find_device(&command.entity_name).cloned());
        let address = match (&config, &command.unit_code) {
            (Some(device), Some(unit)) => format!("{}/{}", device.id, unit),
            (Some(device), None) => device.id.clone(),
            (None, _) => command.address(),
        };

        debug!("Command {} for {} {}", msg.payload, command.device_type, address);
        if let Err(e) = self
            .rfxcom
            .on_command(&command.device_type, &address, &msg.payload, config.as_ref())
            .await
        {
            warn!("Command {} to {} failed: {}", msg.payload, address, e);
        }
    }
}

/// Receivers consumed by one run of the event loop
struct LoopChannels {
    protocol: mpsc::Receiver<ProtocolEvent>,
    status: mpsc::Receiver<BridgeEvent>,
    mqtt: mpsc::Receiver<BridgeEvent>,
    actions: mpsc::Receiver<Action>,
}

/// Mediator between the transceiver and the broker
pub struct Controller {
    settings: Arc<SettingsHandle>,
    topics: Topics,
    rfxcom: Arc<RfxcomBridge>,
    mqtt: Arc<MqttAdapter>,
    devices: Arc<DeviceStore>,
    entities: Arc<EntityStore>,
    discovery: Arc<HomeAssistantDiscovery>,
    health: Option<HealthCheck>,
    on_exit: ExitCallback,
    state: Mutex<ControllerState>,
    actions: Mutex<Option<mpsc::Sender<Action>>>,
    shutdown: Notify,
}

impl Controller {
    /// Wire every component from the current settings
    pub fn new(
        settings: Arc<SettingsHandle>,
        connector: Arc<dyn Connector>,
        broker: Arc<dyn Broker>,
        on_exit: ExitCallback,
    ) -> Result<Arc<Self>> {
        let snapshot = settings.get();
        snapshot.validate()?;

        let health = if snapshot.healthcheck.enabled {
            Some(HealthCheck::parse(&snapshot.healthcheck.cron)?)
        } else {
            None
        };

        let (devices, entities) = if snapshot.cache_state.enable {
            let interval = Duration::from_secs(snapshot.cache_state.save_interval);
            (
                DeviceStore::persistent("devices", snapshot.devices_path(), interval),
                EntityStore::persistent("entities", snapshot.state_path(), interval),
            )
        } else {
            (DeviceStore::in_memory("devices"), EntityStore::in_memory("entities"))
        };
        let devices = Arc::new(devices);
        let entities = Arc::new(entities);

        let topics = Topics::new(&snapshot.mqtt.base_topic);
        let rfxcom = Arc::new(RfxcomBridge::new(connector, snapshot.rfxcom.clone()));
        let mqtt = Arc::new(MqttAdapter::new(snapshot.mqtt.clone(), broker));

        let publisher = DiscoveryPublisher::new(mqtt.publisher(), &snapshot.homeassistant.discovery_topic);
        let discovery = Arc::new(HomeAssistantDiscovery::new(
            topics.clone(),
            Arc::new(BridgeDiscovery::new(
                publisher.clone(),
                topics.clone(),
                Arc::clone(&settings),
            )),
            Arc::new(DeviceDiscovery::new(
                publisher,
                topics.clone(),
                Arc::clone(&settings),
                Arc::clone(&rfxcom),
                Arc::clone(&devices),
                Arc::clone(&entities),
            )),
        ));

        Ok(Arc::new(Self {
            settings,
            topics,
            rfxcom,
            mqtt,
            devices,
            entities,
            discovery,
            health,
            on_exit,
            state: Mutex::new(ControllerState::Created),
            actions: Mutex::new(None),
            shutdown: Notify::new(),
        }))
    }

    pub fn state(&self) -> ControllerState {
        *self.state.lock()
    }

    pub fn settings(&self) -> &Arc<SettingsHandle> {
        &self.settings
    }

    pub fn topics(&self) -> &Topics {
        &self.topics
    }

    pub fn rfxcom(&self) -> &Arc<RfxcomBridge> {
        &self.rfxcom
    }

    pub fn mqtt(&self) -> &Arc<MqttAdapter> {
        &self.mqtt
    }

    pub fn devices(&self) -> &Arc<DeviceStore> {
        &self.devices
    }

    pub fn entities(&self) -> &Arc<EntityStore> {
        &self.entities
    }

    pub fn discovery(&self) -> &Arc<HomeAssistantDiscovery> {
        &self.discovery
    }

    fn discovery_enabled(&self) -> bool {
        self.settings.read(|s| s.homeassistant.discovery)
    }

    /// Bring the bridge up
    ///
    /// A transceiver failure aborts the start and is returned. A broker
    /// failure closes the transceiver, fires the exit callback with code 1
    /// and still returns `Ok`.
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        {
            let mut state = self.state.lock();
            if !matches!(*state, ControllerState::Created | ControllerState::Stopped) {
                return Err(ControllerError::State(format!("cannot start while {:?}", *state)));
            }
            *state = ControllerState::Starting;
        }
        info!("Starting rfxmqtt {}", VERSION);

        self.devices.start();
        self.entities.start();

        self.mqtt.clear_listeners();
        self.mqtt.add_listener(self.discovery.clone()).await;
        self.mqtt
            .add_listener(Arc::new(CommandListener::new(
                self.topics.clone(),
                Arc::clone(&self.settings),
                Arc::clone(&self.rfxcom),
            )))
            .await;

        let protocol = self.rfxcom.subscribe_protocols_event();
        let status = self.rfxcom.subscribe_events();
        if let Err(e) = self.rfxcom.initialise().await {
            error!("Transceiver initialisation failed: {}", e);
            self.devices.stop();
            self.entities.stop();
            *self.state.lock() = ControllerState::Stopped;
            return Err(e.into());
        }

        let mqtt = match self.mqtt.connect().await {
            Ok(rx) => rx,
            Err(e) => {
                error!("MQTT connection failed: {}", e);
                if let Err(e) = self.rfxcom.stop().await {
                    warn!("Error stopping transceiver: {}", e);
                }
                self.devices.stop();
                self.entities.stop();
                *self.state.lock() = ControllerState::Stopped;
                (self.on_exit)(1, false);
                return Ok(());
            }
        };

        let (actions_tx, actions) = mpsc::channel(32);
        *self.actions.lock() = Some(actions_tx);

        if let Some(health) = &self.health {
            info!("Health check scheduled: {}", health.expression());
        }

        *self.state.lock() = ControllerState::Running;
        let controller = Arc::clone(self);
        tokio::spawn(async move {
            controller
                .run(LoopChannels {
                    protocol,
                    status,
                    mqtt,
                    actions,
                })
                .await;
        });

        info!("Bridge running");
        Ok(())
    }

    fn next_check(&self) -> Option<Instant> {
        self.health
            .as_ref()
            .and_then(HealthCheck::next_delay)
            .map(|delay| Instant::now() + delay)
    }

    async fn run(self: Arc<Self>, mut channels: LoopChannels) {
        let mut next_check = self.next_check();
        let mut sessions = 0u32;

        loop {
            let health_tick = async move {
                match next_check {
                    Some(deadline) => tokio::time::sleep_until(deadline).await,
                    None => std::future::pending::<()>().await,
                }
            };

            tokio::select! {
                _ = self.shutdown.notified() => break,
                Some((protocol, event)) = channels.protocol.recv() => {
                    self.send_to_mqtt(&protocol, &event).await;
                }
                Some(event) = channels.status.recv() => {
                    self.on_transceiver_event(event).await;
                }
                Some(event) = channels.mqtt.recv() => {
                    if matches!(event, BridgeEvent::Connected) {
                        sessions += 1;
                    }
                    self.on_broker_event(event, sessions).await;
                }
                Some(action) = channels.actions.recv() => {
                    self.run_action(action).await;
                }
                _ = health_tick => {
                    self.run_health_check().await;
                    next_check = self.next_check();
                }
            }
        }
        debug!("Controller loop finished");
    }

    async fn on_transceiver_event(&self, event: BridgeEvent) {
        match event {
            BridgeEvent::Status(info) => self.on_status(info).await,
            BridgeEvent::Disconnected { reason } => {
                error!("Transceiver disconnected: {}", reason.as_deref().unwrap_or("unknown"));
                self.publish_availability(Availability::Offline).await;
                self.shutdown(1, false).await;
            }
            BridgeEvent::Error(e) => error!("Transceiver error: {}", e),
            other => debug!("Ignoring transceiver event {:?}", other),
        }
    }

    async fn on_broker_event(&self, event: BridgeEvent, sessions: u32) {
        match event {
            BridgeEvent::Message(msg) => self.mqtt.dispatch(&msg).await,
            BridgeEvent::Connected if sessions > 1 => {
                info!("MQTT session re-established");
                if let Err(e) = self.mqtt.announce().await {
                    warn!("Failed to re-announce after reconnect: {}", e);
                }
            }
            BridgeEvent::Connected => debug!("MQTT session up"),
            BridgeEvent::Disconnected { reason } => {
                warn!("MQTT connection lost: {}", reason.as_deref().unwrap_or("unknown"));
            }
            BridgeEvent::Error(e) => error!("MQTT error: {}", e),
            BridgeEvent::Status(_) => {}
        }
    }

    /// Publish bridge info and, when enabled, bridge discovery
    async fn on_status(&self, coordinator: CoordinatorInfo) {
        debug!("Publishing bridge info for {}", coordinator.receiver_type);
        let info = BridgeInfo {
            version: VERSION.to_string(),
            coordinator,
            log_level: self.settings.log_level(),
        };

        if let Err(e) = self.discovery.bridge().publish_info(&info).await {
            warn!("Failed to publish bridge info: {}", e);
        }
        if self.discovery_enabled() {
            self.discovery
                .publish_discovery_to_mqtt(DiscoveryMessage::bridge(&info))
                .await;
        }
    }

    /// Publish a radio event to `<base>/devices/<id>[/<unit>]`
    pub async fn send_to_mqtt(&self, protocol: &str, event: &NormalizedEvent) {
        let entity = topic_entity(&event.id, event.unit_code.as_deref(), event.is_group);
        debug!("{} event from {}", protocol, entity);

        if let Err(e) = self
            .mqtt
            .publisher()
            .publish_json(&self.topics.device_suffix(&entity), event, None, None)
            .await
        {
            warn!("Failed to publish {} event for {}: {}", protocol, entity, e);
        }

        if self.discovery_enabled() {
            self.discovery
                .publish_discovery_to_mqtt(DiscoveryMessage::device(event))
                .await;
        }
    }

    /// Queue an action for the event loop
    pub async fn queue_action(&self, action: Action) -> Result<()> {
        let tx = self.actions.lock().clone();
        let tx = tx.ok_or_else(|| ControllerError::State("controller is not running".to_string()))?;
        tx.send(action)
            .await
            .map_err(|_| ControllerError::State("controller loop has stopped".to_string()))
    }

    /// Execute a bridge or device action
    ///
    /// Failures are logged, never returned.
    pub async fn run_action(&self, action: Action) {
        if let Err(e) = action.validate() {
            warn!("Ignoring action: {}", e);
            return;
        }
        match action.kind {
            ActionType::Bridge => self.run_bridge_action(&action.action).await,
            ActionType::Device => self.run_device_action(&action).await,
        }
    }

    async fn run_bridge_action(&self, name: &str) {
        let action = match name.parse::<BridgeAction>() {
            Ok(action) => action,
            Err(e) => {
                warn!("Ignoring bridge action: {}", e);
                return;
            }
        };
        info!("Running bridge action {}", name);
        match action {
            BridgeAction::Restart => self.shutdown(0, true).await,
            BridgeAction::Stop => self.shutdown(0, false).await,
            BridgeAction::ResetDevices => self.devices.reset(),
            BridgeAction::ResetState => self.entities.reset(),
        }
    }

    /// Re-inject a device action through the hub command path
    async fn run_device_action(&self, action: &Action) {
        let device_id = action.device_id.as_deref().unwrap_or_default();
        let Some(device) = self.devices.get(&device_id.to_string()) else {
            warn!("Ignoring action {}: unknown device {}", action.action, device_id);
            return;
        };

        let entity = match action.entity_id.as_deref() {
            Some(entity_id) => device.command_entity(entity_id),
            None => device.first_command_entity(),
        };
        let Some(entity) = entity else {
            warn!("Ignoring action {}: device {} has no matching entity", action.action, device_id);
            return;
        };

        let topic = entity.command_topic(&self.topics, &device.protocol, &device.id);
        debug!("Device action {} via {}", action.action, topic);
        self.mqtt.dispatch(&MqttMessage::new(&topic, &action.action)).await;
    }

    async fn publish_availability(&self, availability: Availability) {
        if let Err(e) = self
            .mqtt
            .publish(
                &self.topics.will,
                availability.as_str(),
                Some(PublishOptions::retained(1)),
                None,
            )
            .await
        {
            warn!("Failed to publish availability: {}", e);
        }
    }

    /// Probe the transceiver and publish the result on the will topic
    ///
    /// An offline transceiver shuts the bridge down with exit code 1.
    pub async fn run_health_check(&self) -> Availability {
        let status = self.rfxcom.get_status().await;
        debug!("Health check: transceiver {}", status);
        self.publish_availability(status).await;

        if status == Availability::Offline {
            error!("Transceiver is offline, shutting down");
            self.shutdown(1, false).await;
        }
        status
    }

    async fn shutdown(&self, code: i32, restart: bool) {
        if let Err(e) = self.stop(restart).await {
            warn!("Error during shutdown: {}", e);
        }
        (self.on_exit)(code, restart);
    }

    /// Stop every component and write the final snapshots
    pub async fn stop(&self, restart: bool) -> Result<()> {
        {
            let mut state = self.state.lock();
            if !matches!(*state, ControllerState::Starting | ControllerState::Running) {
                return Ok(());
            }
            *state = ControllerState::Stopping;
        }
        info!("Stopping bridge{}", if restart { " for restart" } else { "" });

        self.shutdown.notify_one();
        self.actions.lock().take();

        let mut result = Ok(());
        if let Err(e) = self.mqtt.disconnect().await {
            warn!("Error disconnecting from MQTT: {}", e);
            result = Err(e.into());
        }
        self.mqtt.clear_listeners();
        if let Err(e) = self.rfxcom.stop().await {
            warn!("Error stopping transceiver: {}", e);
            result = Err(e.into());
        }

        self.devices.stop();
        self.entities.stop();

        *self.state.lock() = ControllerState::Stopped;
        info!("Bridge stopped");
        result
    }
}
