//! End-to-end wiring of the ingest path.
//!
//! ```text
//! radio manager ──events──▶ parser task ──readings──┐
//!                                                    ├──▶ dashboard task ──▶ latest + history
//! wired manager ──events──▶ parser task ──readings──┘
//! ```
//!
//! Each transport owns its own mailbox, parser and throttle. The dashboard task is the
//! only writer of the latest-reading channel and the history windows.

use crate::config::TelemetryConfig;
use crate::history::HistoryAccumulator;
use crate::parser::spawn_parser;
use crate::reading::Reading;
use crate::transport::radio::{RadioPlatform, RadioTransport};
use crate::transport::serial::{SerialPlatform, WiredTransport};
use crate::transport::{ConnectionManager, ConnectionStatus, LinkSnapshot, TransportKind};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::debug;

/// Most recent delivered reading.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct LatestReading {
    /// The reading itself.
    pub reading: Reading,
    /// When the dashboard received it.
    pub received_at: DateTime<Utc>,
    /// Transport it came from.
    pub source: TransportKind,
}

/// One summary over both transports, for a connection panel.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LinkOverview {
    /// `Connected` if either link is, else `Connecting` if either is, else `Error` if
    /// either failed, else `Disconnected`.
    pub status: ConnectionStatus,
    /// The connected transport (radio first).
    pub active: Option<TransportKind>,
    /// Packets across both transports.
    pub total_packets: u64,
    /// Packets per second across both transports.
    pub total_rate: f64,
    /// First error message (radio first).
    pub error: Option<String>,
}

impl LinkOverview {
    /// Combine the two manager snapshots.
    pub fn from_snapshots(radio: &LinkSnapshot, wired: &LinkSnapshot) -> Self {
        let either = |status| radio.status == status || wired.status == status;
        let status = [
            ConnectionStatus::Connected,
            ConnectionStatus::Connecting,
            ConnectionStatus::Error,
        ]
        .into_iter()
        .find(|status| either(*status))
        .unwrap_or(ConnectionStatus::Disconnected);

        let active = [radio, wired]
            .into_iter()
            .find(|link| link.status == ConnectionStatus::Connected)
            .map(|link| link.kind);

        Self {
            status,
            active,
            total_packets: radio.packets + wired.packets,
            total_rate: radio.rate + wired.rate,
            error: radio.error.clone().or_else(|| wired.error.clone()),
        }
    }

    /// True when either link is connected.
    pub fn is_connected(&self) -> bool {
        self.status == ConnectionStatus::Connected
    }
}

/// Radio manager type used by [`TelemetryPipeline`].
pub type RadioManager<R> = ConnectionManager<RadioTransport<R>>;

/// Wired manager type used by [`TelemetryPipeline`].
pub type WiredManager<S> = ConnectionManager<WiredTransport<S>>;

/// Both connection managers, their parsers, and the dashboard state they feed.
pub struct TelemetryPipeline<R: RadioPlatform, S: SerialPlatform> {
    radio: Arc<RadioManager<R>>,
    wired: Arc<WiredManager<S>>,
    latest: watch::Receiver<Option<LatestReading>>,
    history: Arc<RwLock<HistoryAccumulator>>,
    tasks: Vec<JoinHandle<()>>,
}

impl<R: RadioPlatform, S: SerialPlatform> TelemetryPipeline<R, S> {
    /// Build the pipeline and spawn its tasks. Must be called from within a runtime.
    pub fn new(config: &TelemetryConfig, radio_platform: R, serial_platform: S) -> Self {
        let mailbox = config.transport.mailbox_capacity;
        let rate_period = config.transport.rate_sample_interval();

        let (radio_events_tx, radio_events_rx) = mpsc::channel(mailbox);
        let (wired_events_tx, wired_events_rx) = mpsc::channel(mailbox);
        let (radio_readings_tx, radio_readings_rx) = mpsc::channel(mailbox);
        let (wired_readings_tx, wired_readings_rx) = mpsc::channel(mailbox);

        let radio = Arc::new(ConnectionManager::new(
            RadioTransport::new(radio_platform, config.radio.clone()),
            radio_events_tx,
            rate_period,
        ));
        let wired = Arc::new(ConnectionManager::new(
            WiredTransport::new(serial_platform, config.serial.clone()),
            wired_events_tx,
            rate_period,
        ));

        let history = Arc::new(RwLock::new(HistoryAccumulator::new(config.history.capacity)));
        let (latest_tx, latest) = watch::channel(None);

        let tasks = vec![
            spawn_parser(config.parser, radio_events_rx, radio_readings_tx),
            spawn_parser(config.parser, wired_events_rx, wired_readings_tx),
            tokio::spawn(dashboard(
                radio_readings_rx,
                wired_readings_rx,
                latest_tx,
                Arc::clone(&history),
            )),
        ];

        Self {
            radio,
            wired,
            latest,
            history,
            tasks,
        }
    }

    /// Radio connection manager.
    pub fn radio(&self) -> &Arc<RadioManager<R>> {
        &self.radio
    }

    /// Wired connection manager.
    pub fn wired(&self) -> &Arc<WiredManager<S>> {
        &self.wired
    }

    /// Combined view of both links.
    pub fn overview(&self) -> LinkOverview {
        LinkOverview::from_snapshots(&self.radio.snapshot(), &self.wired.snapshot())
    }

    /// Most recent delivered reading.
    pub fn latest(&self) -> Option<LatestReading> {
        *self.latest.borrow()
    }

    /// Watch delivered readings.
    pub fn subscribe_latest(&self) -> watch::Receiver<Option<LatestReading>> {
        self.latest.clone()
    }

    /// Copy of the current history windows.
    pub fn history(&self) -> HistoryAccumulator {
        self.history.read().clone()
    }

    /// Empty the history windows.
    pub fn clear_history(&self) {
        self.history.write().clear();
    }

    /// Disconnect both links and stop the background tasks.
    pub async fn shutdown(self) {
        self.radio.disconnect().await;
        self.wired.disconnect().await;
        for task in &self.tasks {
            task.abort();
        }
        debug!("pipeline shut down");
    }
}

async fn dashboard(
    mut radio: mpsc::Receiver<Reading>,
    mut wired: mpsc::Receiver<Reading>,
    latest: watch::Sender<Option<LatestReading>>,
    history: Arc<RwLock<HistoryAccumulator>>,
) {
    loop {
        let (reading, source) = tokio::select! {
            Some(reading) = radio.recv() => (reading, TransportKind::Radio),
            Some(reading) = wired.recv() => (reading, TransportKind::Wired),
            else => break,
        };
        let received_at = Utc::now();
        history.write().add_data_point_at(&reading, received_at);
        latest.send_replace(Some(LatestReading {
            reading,
            received_at,
            source,
        }));
    }
}
