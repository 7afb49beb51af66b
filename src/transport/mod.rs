//! Transport lifecycle shared by the radio and wired links.
//!
//! Both links follow one four-state machine:
//!
//! ```text
//! Disconnected ──connect──▶ Connecting ──open ok──▶ Connected ──peer drop──▶ Disconnected
//!       ▲                       │                       │
//!       │                       ├─cancelled─────────────┼──────────────────▶ Disconnected
//!       │                       └─failure──▶ Error      └─read fault──────▶ Error
//!       └──────────────────────disconnect (from any state)
//! ```
//!
//! [`ConnectionManager`] implements that machine once. A link variant only supplies
//! the primitives behind the [`Transport`] trait: a capability probe and an `open`
//! that performs selection plus negotiation and yields a [`Link`] to read from.
//!
//! # Events
//!
//! Managers publish [`TransportEvent`]s on a bounded mailbox: one `Data` per inbound
//! unit, then exactly one `Disconnected` per torn-down cycle, never followed by more
//! `Data` from that cycle.

mod connection;
pub mod radio;
pub mod serial;
mod stats;
mod text;

pub use connection::ConnectionManager;
pub use text::Utf8Stream;

use crate::error::TransportError;
use async_trait::async_trait;
use serde::Serialize;
use std::fmt;
use std::future::Future;
use tokio::sync::oneshot;

// =============================================================================
// Lifecycle Types
// =============================================================================

/// Connection state of one transport manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    /// No link and no attempt in progress.
    #[default]
    Disconnected,
    /// Selection or negotiation in progress.
    Connecting,
    /// Link open and streaming.
    Connected,
    /// Last attempt or link failed; see the manager's error message.
    Error,
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Error => "error",
        };
        f.pad(label)
    }
}

/// Which physical link a manager drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// Short-range radio (BLE UART service).
    Radio,
    /// USB serial.
    Wired,
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Radio => f.pad("radio"),
            Self::Wired => f.pad("wired"),
        }
    }
}

/// Message from a connection manager to its parser mailbox.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// One inbound unit of decoded text. Boundaries carry no framing meaning.
    Data(String),
    /// The current connection cycle has ended.
    Disconnected,
}

/// Point-in-time view of a manager, for display.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LinkSnapshot {
    /// Link variant.
    pub kind: TransportKind,
    /// Current state.
    pub status: ConnectionStatus,
    /// Last failure message, if the state is `Error`.
    pub error: Option<String>,
    /// Inbound units since the last successful connect.
    pub packets: u64,
    /// Inbound units per second over the last sampling period.
    pub rate: f64,
}

// =============================================================================
// Variant Primitives
// =============================================================================

/// An open link producing decoded text.
///
/// # Contract
/// - `next_chunk` must be cancel-safe: the manager races it against its stop signal.
/// - `Ok(None)` means the peer closed the link.
/// - `close` is best-effort and must not fail.
#[async_trait]
pub trait Link: Send {
    /// Wait for the next inbound unit.
    async fn next_chunk(&mut self) -> Result<Option<String>, TransportError>;

    /// Release the link.
    async fn close(&mut self);

    /// Human-readable peer description (device name or port path).
    fn peer(&self) -> &str;
}

/// Resolves when `disconnect` abandons the connect attempt in progress.
///
/// A dropped sender counts as abandonment.
pub type AbortSignal = oneshot::Receiver<()>;

/// Run one negotiation step unless the attempt is abandoned first.
///
/// Returns [`TransportError::Aborted`] on abandonment. Once that happens the
/// signal is spent; callers must not pass it to another step.
pub(crate) async fn abortable<T, F>(abort: &mut AbortSignal, step: F) -> Result<T, TransportError>
where
    F: Future<Output = Result<T, TransportError>>,
{
    tokio::select! {
        result = step => result,
        _ = abort => Err(TransportError::Aborted),
    }
}

/// Selection and negotiation primitives of one link variant.
///
/// # Contract
/// `open` must return promptly once `abort` resolves, after releasing anything it
/// had already opened (a connected peer, an open port).
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Link variant.
    fn kind(&self) -> TransportKind;

    /// Fail with `Unsupported` (or `FeatureNotEnabled`) when the platform lacks the link.
    async fn check_capability(&self) -> Result<(), TransportError>;

    /// Select a peer and negotiate a streaming link.
    ///
    /// `Err(TransportError::Cancelled)` means the selection was dismissed.
    async fn open(&self, abort: &mut AbortSignal) -> Result<Box<dyn Link>, TransportError>;
}
