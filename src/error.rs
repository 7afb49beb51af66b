//! Error types for the telemetry link.
//!
//! Two enums cover the crate, both built with `thiserror`:
//!
//! - **`TransportError`**: everything a transport variant can report while probing the
//!   platform, selecting a device or port, negotiating the link, or reading from it.
//!   These never escape a [`ConnectionManager`](crate::transport::ConnectionManager) as
//!   `Err` values; the manager folds them into its status and error message.
//! - **`TelemetryError`**: application-level failures (configuration loading and
//!   validation, logging setup, I/O) returned to the binary.
//!
//! Malformed wire records are not errors at all and have no variant here.

use thiserror::Error;
use uuid::Uuid;

/// Convenience alias for results using the application error type.
pub type AppResult<T> = std::result::Result<T, TelemetryError>;

/// Failures raised by the radio and wired transport variants.
#[derive(Error, Debug)]
pub enum TransportError {
    /// The platform offers no such transport (no adapter, no port enumeration).
    #[error("{0}")]
    Unsupported(String),

    /// The device or port selection was dismissed. Not surfaced as an error state.
    #[error("Selection cancelled")]
    Cancelled,

    /// The attempt was abandoned by `disconnect` while still negotiating.
    #[error("Connection attempt aborted")]
    Aborted,

    /// The selected peer does not expose the telemetry service.
    #[error("Service {0} not found on device")]
    ServiceNotFound(Uuid),

    /// The telemetry service lacks the notification characteristic.
    #[error("Characteristic {0} not found on device")]
    CharacteristicNotFound(Uuid),

    /// The serial port could not be opened. The message is the backend's, verbatim.
    #[error("{message}")]
    Open {
        /// Port path that failed to open.
        port: String,
        /// Underlying failure message.
        message: String,
    },

    /// A read on an open link failed.
    #[error("{0}")]
    Read(#[from] std::io::Error),

    /// Any other backend failure, message verbatim.
    #[error("{0}")]
    Platform(String),

    /// The transport backend was not compiled in.
    #[error("Feature '{0}' is not enabled. Please build with --features {0}")]
    FeatureNotEnabled(String),
}

impl TransportError {
    /// Whether this outcome means the user backed out rather than something failing.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, TransportError::Cancelled)
    }
}

#[cfg(feature = "ble")]
impl From<btleplug::Error> for TransportError {
    fn from(err: btleplug::Error) -> Self {
        TransportError::Platform(err.to_string())
    }
}

/// Primary error type for the application.
#[derive(Error, Debug)]
pub enum TelemetryError {
    /// Configuration sources could not be read or extracted.
    #[error("Configuration error: {0}")]
    Config(#[from] Box<figment::Error>),

    /// Configuration parsed but failed semantic validation.
    #[error("Configuration validation error: {0}")]
    Configuration(String),

    /// Logging could not be initialised.
    #[error("Logging setup failed: {0}")]
    Logging(String),

    /// Standard I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A transport failure surfaced outside a connection manager (probing, port listing).
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
}

impl From<figment::Error> for TelemetryError {
    fn from(err: figment::Error) -> Self {
        TelemetryError::Config(Box::new(err))
    }
}
