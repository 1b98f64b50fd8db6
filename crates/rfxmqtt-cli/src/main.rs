//! rfxmqtt - RFXtrx 433 MHz transceiver to MQTT bridge
//!
//! Runs the bridge until interrupted, restarting it in place when a
//! `restart` action is received.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use rfxmqtt_bridge::RumqttBroker;
use rfxmqtt_controller::{Controller, ExitCallback};
use rfxmqtt_core::{Settings, SettingsHandle};
use rfxmqtt_transport::{Connector, MockTransceiver, SerialConfig, SerialConnector};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, reload, EnvFilter, Registry};

type FilterHandle = reload::Handle<EnvFilter, Registry>;

/// rfxmqtt - bridge an RFXtrx transceiver to MQTT and Home Assistant
#[derive(Parser)]
#[command(name = "rfxmqtt")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, global = true, env = "RFXMQTT_CONFIG")]
    config: Option<PathBuf>,

    /// Output logs as JSON
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the bridge (default)
    Run,

    /// Validate the configuration and exit
    CheckConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let settings = load_settings(cli.config.as_deref())?;
    let filter = setup_logging(&settings.loglevel, cli.json_logs)?;

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => run(cli.config, filter).await,
        Commands::CheckConfig => {
            settings.validate().context("Invalid configuration")?;
            println!("Configuration OK");
            println!("  mqtt:      {}:{} ({})", settings.mqtt.host(), settings.mqtt.port, settings.mqtt.base_topic);
            println!("  rfxcom:    {}", settings.rfxcom.usbport);
            println!(
                "  discovery: {}",
                if settings.homeassistant.discovery {
                    settings.homeassistant.discovery_topic.as_str()
                } else {
                    "disabled"
                }
            );
            println!("  devices:   {} override(s)", settings.devices.len());
            Ok(())
        }
    }
}

fn load_settings(path: Option<&Path>) -> Result<Settings> {
    match path {
        Some(path) => Settings::from_file(path).with_context(|| format!("Failed to load {}", path.display())),
        None => Ok(Settings::default()),
    }
}

fn setup_logging(level: &str, json: bool) -> Result<FilterHandle> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .context("Failed to parse log level")?;
    let (filter, handle) = reload::Layer::new(filter);

    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(false).compact())
            .init();
    }

    Ok(handle)
}

fn connector(settings: &Settings) -> Arc<dyn Connector> {
    if settings.rfxcom.is_mock() {
        info!("Using the virtual transceiver");
        Arc::new(MockTransceiver::new())
    } else {
        Arc::new(SerialConnector::new(
            &settings.rfxcom.usbport,
            SerialConfig {
                baud_rate: settings.rfxcom.baud,
                debug: settings.rfxcom.debug,
            },
        ))
    }
}

async fn run(config: Option<PathBuf>, filter: FilterHandle) -> Result<()> {
    loop {
        // reread on every pass so a restart picks up edits
        let settings = load_settings(config.as_deref())?;
        settings.validate().context("Invalid configuration")?;

        let handle = match &config {
            Some(path) => SettingsHandle::with_path(settings.clone(), path),
            None => SettingsHandle::new(settings.clone()),
        };
        let reload = filter.clone();
        handle.on_log_level_change(move |level| {
            if let Err(e) = reload.modify(|f| *f = EnvFilter::new(level)) {
                warn!("Failed to apply log level {}: {}", level, e);
            }
        });

        let (exit_tx, mut exit_rx) = mpsc::unbounded_channel();
        let on_exit: ExitCallback = Arc::new(move |code, restart| {
            let _ = exit_tx.send((code, restart));
        });

        let controller = Controller::new(handle, connector(&settings), Arc::new(RumqttBroker), on_exit)?;
        controller.start().await.context("Failed to start the bridge")?;

        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                signal.context("Failed to listen for ctrl+c")?;
                info!("Received shutdown signal");
                controller.stop(false).await?;
                return Ok(());
            }
            exit = exit_rx.recv() => match exit {
                Some((_, true)) => info!("Restarting bridge"),
                Some((0, false)) | None => return Ok(()),
                Some((code, false)) => bail!("Bridge stopped with exit code {}", code),
            },
        }
    }
}
