//! CLI entry point for telemetry-link
//!
//! Connects to the board over one transport and prints delivered readings until
//! Ctrl-C, then prints a history summary.
//!
//! # Usage
//!
//! ```bash
//! telemetry-link serial --port /dev/ttyACM0
//! telemetry-link radio --json
//! telemetry-link probe
//! telemetry-link ports
//! telemetry-link config
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use telemetry_link::config::{TelemetryConfig, DEFAULT_CONFIG_PATH};
use telemetry_link::history::{HistoryAccumulator, Metric};
use telemetry_link::logging;
use telemetry_link::pipeline::{LatestReading, TelemetryPipeline};
use telemetry_link::transport::radio::{DefaultRadioPlatform, RadioTransport};
use telemetry_link::transport::serial::{self, DefaultSerialPlatform, WiredTransport};
use telemetry_link::transport::{ConnectionStatus, Transport, TransportKind};
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "telemetry-link")]
#[command(about = "Micro:bit weather-station telemetry over BLE or USB serial", long_about = None)]
struct Cli {
    /// Configuration file
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Override the configured log level
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Stream readings over USB serial
    Serial {
        /// Serial port path (default: first USB port)
        #[arg(long)]
        port: Option<String>,

        /// Print readings as JSON lines
        #[arg(long)]
        json: bool,
    },

    /// Stream readings over BLE
    Radio {
        /// Print readings as JSON lines
        #[arg(long)]
        json: bool,
    },

    /// Report which transports this platform supports
    Probe,

    /// List serial ports
    Ports,

    /// Print the effective configuration as TOML
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = TelemetryConfig::load_from(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;
    if let Some(level) = cli.log_level {
        config.application.log_level = level;
    }
    if let Commands::Serial { port: Some(port), .. } = &cli.command {
        config.serial.port = Some(port.clone());
    }
    config.validate()?;
    logging::init_from_config(&config)?;

    match cli.command {
        Commands::Serial { json, .. } => stream(config, TransportKind::Wired, json).await,
        Commands::Radio { json } => stream(config, TransportKind::Radio, json).await,
        Commands::Probe => probe(&config).await,
        Commands::Ports => ports(),
        Commands::Config => {
            print!("{}", config.to_toml()?);
            Ok(())
        }
    }
}

async fn stream(config: TelemetryConfig, kind: TransportKind, json: bool) -> Result<()> {
    let pipeline = TelemetryPipeline::new(
        &config,
        DefaultRadioPlatform::default(),
        DefaultSerialPlatform::default(),
    );
    let mut latest = pipeline.subscribe_latest();
    let mut status = match kind {
        TransportKind::Radio => pipeline.radio().subscribe_status(),
        TransportKind::Wired => pipeline.wired().subscribe_status(),
    };

    match kind {
        TransportKind::Radio => pipeline.radio().connect().await,
        TransportKind::Wired => pipeline.wired().connect().await,
    }

    let snapshot = match kind {
        TransportKind::Radio => pipeline.radio().snapshot(),
        TransportKind::Wired => pipeline.wired().snapshot(),
    };
    match snapshot.status {
        ConnectionStatus::Connected => {
            info!(transport = %kind, "streaming, press Ctrl-C to stop");
        }
        ConnectionStatus::Error => {
            let message = snapshot.error.unwrap_or_default();
            pipeline.shutdown().await;
            anyhow::bail!("{kind} link failed: {message}");
        }
        _ => {
            warn!(transport = %kind, "no device selected");
            pipeline.shutdown().await;
            return Ok(());
        }
    }

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("interrupted");
                break;
            }
            changed = latest.changed() => {
                if changed.is_err() {
                    break;
                }
                let current = *latest.borrow_and_update();
                if let Some(current) = current {
                    print_reading(&current, json)?;
                }
            }
            changed = status.changed() => {
                if changed.is_err() {
                    break;
                }
                let now = *status.borrow_and_update();
                match now {
                    ConnectionStatus::Disconnected | ConnectionStatus::Error => {
                        let overview = pipeline.overview();
                        match overview.error {
                            Some(message) => warn!(transport = %kind, error = %message, "link lost"),
                            None => warn!(transport = %kind, "link closed"),
                        }
                        break;
                    }
                    _ => {}
                }
            }
        }
    }

    let overview = pipeline.overview();
    let history = pipeline.history();
    pipeline.shutdown().await;
    print_summary(&history, overview.total_packets);
    Ok(())
}

fn print_reading(latest: &LatestReading, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string(latest)?);
        return Ok(());
    }
    let r = &latest.reading;
    println!(
        "{} [{}] temp {:.2}°C (precise {:.2}°C)  light {:.0}  sound {:.0}  heading {:.0}°{}",
        latest.received_at.format("%H:%M:%S"),
        latest.source,
        r.temperature,
        r.ultra_temperature,
        r.light,
        r.sound,
        r.compass,
        if r.storm_risk() { "  STORM RISK" } else { "" }
    );
    Ok(())
}

fn print_summary(history: &HistoryAccumulator, packets: u64) {
    println!();
    println!("Session summary ({packets} packets)");
    for metric in Metric::ALL {
        let window = history.window(metric);
        match window.range() {
            Some((lo, hi)) => println!(
                "  {:<12} {:>4} samples  min {:>8.2}  max {:>8.2}",
                metric.to_string(),
                window.len(),
                lo,
                hi
            ),
            None => println!("  {:<12} no samples", metric.to_string()),
        }
    }
}

async fn probe(config: &TelemetryConfig) -> Result<()> {
    let radio = RadioTransport::new(DefaultRadioPlatform::default(), config.radio.clone());
    let wired = WiredTransport::new(DefaultSerialPlatform::default(), config.serial.clone());

    report(&radio).await;
    report(&wired).await;
    Ok(())
}

async fn report<T: Transport>(transport: &T) {
    match transport.check_capability().await {
        Ok(()) => println!("{:<6} available", transport.kind()),
        Err(err) => println!("{:<6} unavailable: {err}", transport.kind()),
    }
}

fn ports() -> Result<()> {
    let ports = serial::list_ports()?;
    if ports.is_empty() {
        println!("No serial ports found");
        return Ok(());
    }
    let preferred = serial::choose_port(&ports).map(|p| p.name.clone());
    for port in &ports {
        let marker = if Some(&port.name) == preferred.as_ref() { "*" } else { " " };
        println!(
            "{marker} {:<20} {:<9} {}",
            port.name,
            port.kind,
            port.product.as_deref().unwrap_or("")
        );
    }
    Ok(())
}
