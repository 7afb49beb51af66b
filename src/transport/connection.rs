//! The shared connection state machine.

use super::stats::LinkStats;
use super::{ConnectionStatus, Link, LinkSnapshot, Transport, TransportEvent, TransportKind};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Drives one [`Transport`] through the connection lifecycle.
///
/// `connect` and `disconnect` never return errors. Outcomes are observed through
/// [`status`](Self::status), [`error`](Self::error) and the status watch channel.
/// Inbound text and the end of each cycle arrive on the event mailbox passed to
/// [`new`](Self::new).
pub struct ConnectionManager<T: Transport> {
    transport: T,
    rate_period: Duration,
    shared: Arc<Shared>,
}

struct Shared {
    kind: TransportKind,
    life: Mutex<Lifecycle>,
    status_tx: watch::Sender<ConnectionStatus>,
    events: mpsc::Sender<TransportEvent>,
    stats: LinkStats,
}

#[derive(Default)]
struct Lifecycle {
    status: ConnectionStatus,
    error: Option<String>,
    generation: u64,
    cycle: Option<Cycle>,
}

/// One connect attempt and, once negotiated, the reader task streaming its link.
///
/// Whoever takes the cycle out of [`Lifecycle`] owns the teardown and sends the
/// single `Disconnected` event for it.
struct Cycle {
    generation: u64,
    abort_connect: Option<oneshot::Sender<()>>,
    /// Closes once `connect` has finished with the attempt, including any cleanup.
    negotiation: Option<oneshot::Receiver<()>>,
    stop_reader: Option<oneshot::Sender<()>>,
    reader: Option<JoinHandle<()>>,
}

#[derive(Debug)]
enum PumpEnd {
    Stopped,
    PeerClosed,
    Fault(String),
    ConsumerGone,
}

impl Shared {
    fn set_status(&self, life: &mut Lifecycle, status: ConnectionStatus) {
        life.status = status;
        self.status_tx.send_replace(status);
    }

    fn is_current(life: &Lifecycle, generation: u64) -> bool {
        life.cycle.as_ref().map(|cycle| cycle.generation) == Some(generation)
    }

    async fn notify_disconnected(&self) {
        if self.events.send(TransportEvent::Disconnected).await.is_err() {
            debug!(transport = %self.kind, "event consumer gone, disconnect not delivered");
        }
    }
}

impl<T: Transport> ConnectionManager<T> {
    /// Create a disconnected manager that publishes events on `events`.
    ///
    /// `rate_period` is the packet-rate sampling period.
    pub fn new(transport: T, events: mpsc::Sender<TransportEvent>, rate_period: Duration) -> Self {
        let (status_tx, _) = watch::channel(ConnectionStatus::Disconnected);
        Self {
            shared: Arc::new(Shared {
                kind: transport.kind(),
                life: Mutex::new(Lifecycle::default()),
                status_tx,
                events,
                stats: LinkStats::default(),
            }),
            transport,
            rate_period,
        }
    }

    /// Attempt to bring the link up.
    ///
    /// Returns once the attempt has resolved to `Connected`, `Disconnected` or `Error`.
    /// Ignored while a previous attempt is in progress or the link is connected.
    pub async fn connect(&self) {
        let kind = self.shared.kind;
        if self.shared.life.lock().cycle.is_some() {
            debug!(transport = %kind, "connect ignored, link busy");
            return;
        }

        if let Err(err) = self.transport.check_capability().await {
            warn!(transport = %kind, error = %err, "transport unavailable");
            let mut life = self.shared.life.lock();
            if life.cycle.is_none() {
                life.error = Some(err.to_string());
                self.shared.set_status(&mut life, ConnectionStatus::Error);
            }
            return;
        }

        let (generation, mut abort_rx, _negotiating) = {
            let mut life = self.shared.life.lock();
            if life.cycle.is_some() {
                debug!(transport = %kind, "connect ignored, link busy");
                return;
            }
            life.generation += 1;
            let generation = life.generation;
            let (abort_tx, abort_rx) = oneshot::channel();
            let (negotiating, negotiation) = oneshot::channel::<()>();
            life.cycle = Some(Cycle {
                generation,
                abort_connect: Some(abort_tx),
                negotiation: Some(negotiation),
                stop_reader: None,
                reader: None,
            });
            life.error = None;
            self.shared.set_status(&mut life, ConnectionStatus::Connecting);
            (generation, abort_rx, negotiating)
        };
        info!(transport = %kind, "connecting");

        // `open` releases anything half-open before returning once `abort_rx` fires.
        let link = match self.transport.open(&mut abort_rx).await {
            Err(err) => {
                let mut life = self.shared.life.lock();
                if !Shared::is_current(&life, generation) {
                    debug!(transport = %kind, error = %err, "connect aborted by disconnect");
                    return;
                }
                life.cycle = None;
                if err.is_cancellation() {
                    info!(transport = %kind, "selection dismissed");
                    life.error = None;
                    self.shared.set_status(&mut life, ConnectionStatus::Disconnected);
                } else {
                    warn!(transport = %kind, error = %err, "connection failed");
                    life.error = Some(err.to_string());
                    self.shared.set_status(&mut life, ConnectionStatus::Error);
                }
                return;
            }
            Ok(link) => link,
        };

        let peer = link.peer().to_string();
        let mut link = Some(link);
        {
            let mut life = self.shared.life.lock();
            if let Some(cycle) = life.cycle.as_mut().filter(|c| c.generation == generation) {
                if let Some(link) = link.take() {
                    let (stop_tx, stop_rx) = oneshot::channel();
                    self.shared.stats.reset();
                    self.shared.stats.start_sampler(self.rate_period);
                    cycle.abort_connect = None;
                    cycle.negotiation = None;
                    cycle.stop_reader = Some(stop_tx);
                    cycle.reader = Some(tokio::spawn(pump(
                        Arc::clone(&self.shared),
                        generation,
                        link,
                        stop_rx,
                    )));
                    self.shared.set_status(&mut life, ConnectionStatus::Connected);
                }
            }
        }

        match link {
            None => info!(transport = %kind, peer = %peer, "connected"),
            Some(mut stale) => {
                debug!(transport = %kind, peer = %peer, "attempt ended during negotiation, closing link");
                stale.close().await;
            }
        }
    }

    /// Tear down any attempt or link and return to `Disconnected`.
    ///
    /// Clears the error message. Sends `Disconnected` on the event mailbox once if an
    /// attempt or link was active, after the last `Data` of that cycle. Calling it
    /// again, or from `Disconnected`/`Error`, sends nothing.
    ///
    /// While `Connecting`, waits for the attempt to release whatever it had opened.
    pub async fn disconnect(&self) {
        let kind = self.shared.kind;
        let cycle = {
            let mut life = self.shared.life.lock();
            let cycle = life.cycle.take();
            self.shared.stats.stop_sampler();
            life.error = None;
            self.shared.set_status(&mut life, ConnectionStatus::Disconnected);
            cycle
        };

        let Some(mut cycle) = cycle else {
            debug!(transport = %kind, "disconnect with no active link");
            return;
        };

        if let Some(abort) = cycle.abort_connect.take() {
            let _ = abort.send(());
        }
        if let Some(negotiation) = cycle.negotiation.take() {
            let _ = negotiation.await;
        }
        if let Some(stop) = cycle.stop_reader.take() {
            let _ = stop.send(());
        }
        if let Some(reader) = cycle.reader.take() {
            if let Err(err) = reader.await {
                error!(transport = %kind, error = %err, "reader task failed");
            }
        }

        info!(transport = %kind, "disconnected");
        self.shared.notify_disconnected().await;
    }

    /// Link variant.
    pub fn kind(&self) -> TransportKind {
        self.shared.kind
    }

    /// Current state.
    pub fn status(&self) -> ConnectionStatus {
        self.shared.life.lock().status
    }

    /// Failure message while in `Error`.
    pub fn error(&self) -> Option<String> {
        self.shared.life.lock().error.clone()
    }

    /// Inbound units since the last successful connect.
    pub fn packets_received(&self) -> u64 {
        self.shared.stats.packets()
    }

    /// Inbound units per second over the last sampling period.
    pub fn data_rate(&self) -> f64 {
        self.shared.stats.rate()
    }

    /// Watch state transitions.
    pub fn subscribe_status(&self) -> watch::Receiver<ConnectionStatus> {
        self.shared.status_tx.subscribe()
    }

    /// Point-in-time view for display.
    pub fn snapshot(&self) -> LinkSnapshot {
        let (status, error) = {
            let life = self.shared.life.lock();
            (life.status, life.error.clone())
        };
        LinkSnapshot {
            kind: self.shared.kind,
            status,
            error,
            packets: self.shared.stats.packets(),
            rate: self.shared.stats.rate(),
        }
    }
}

impl<T: Transport> Drop for ConnectionManager<T> {
    fn drop(&mut self) {
        // Dropping the cycle's senders stops the reader, which closes the link.
        let cycle = self.shared.life.lock().cycle.take();
        self.shared.stats.stop_sampler();
        drop(cycle);
    }
}

/// Reader task: forwards link text to the mailbox until stopped or the link ends.
async fn pump(
    shared: Arc<Shared>,
    generation: u64,
    mut link: Box<dyn Link>,
    mut stop: oneshot::Receiver<()>,
) {
    let kind = shared.kind;
    let end = loop {
        let next = tokio::select! {
            biased;
            _ = &mut stop => break PumpEnd::Stopped,
            next = link.next_chunk() => next,
        };

        match next {
            Ok(Some(chunk)) => {
                shared.stats.record_packet();
                if chunk.is_empty() {
                    continue;
                }
                tokio::select! {
                    biased;
                    _ = &mut stop => break PumpEnd::Stopped,
                    sent = shared.events.send(TransportEvent::Data(chunk)) => {
                        if sent.is_err() {
                            break PumpEnd::ConsumerGone;
                        }
                    }
                }
            }
            Ok(None) => break PumpEnd::PeerClosed,
            Err(err) => break PumpEnd::Fault(err.to_string()),
        }
    };

    if matches!(end, PumpEnd::Stopped) {
        link.close().await;
        debug!(transport = %kind, "reader stopped");
        return;
    }

    let owned = {
        let mut life = shared.life.lock();
        if Shared::is_current(&life, generation) {
            life.cycle = None;
            shared.stats.stop_sampler();
            match &end {
                PumpEnd::Fault(message) => {
                    life.error = Some(message.clone());
                    shared.set_status(&mut life, ConnectionStatus::Error);
                }
                _ => {
                    life.error = None;
                    shared.set_status(&mut life, ConnectionStatus::Disconnected);
                }
            }
            true
        } else {
            false
        }
    };

    link.close().await;

    match &end {
        PumpEnd::Fault(message) => error!(transport = %kind, error = %message, "link read failed"),
        PumpEnd::PeerClosed => info!(transport = %kind, "link closed by peer"),
        _ => debug!(transport = %kind, ?end, "reader ended"),
    }

    if owned {
        shared.notify_disconnected().await;
    }
}
