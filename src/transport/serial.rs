//! Wired (USB serial) link variant.
//!
//! The board enumerates as a USB CDC serial device streaming at 115200 baud, 8N1,
//! no flow control. Opening a link selects a port (explicit path, else the first
//! USB port, else the first port), opens it and hands back a reader that decodes
//! each read as UTF-8 text.
//!
//! # Feature Flag
//!
//! The `tokio-serial` backend requires the `serial` feature (on by default). Without
//! it, [`DefaultSerialPlatform`] reports the transport as not compiled in.

use super::{abortable, AbortSignal, Link, Transport, TransportKind, Utf8Stream};
use crate::config::SerialSettings;
use crate::error::TransportError;
use async_trait::async_trait;
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, info};

// =============================================================================
// Serial Port Trait
// =============================================================================

/// Trait alias for async serial port I/O.
///
/// Any type implementing `AsyncRead + AsyncWrite + Unpin + Send` can be used
/// as a serial port. This includes:
/// - `tokio_serial::SerialStream` (real hardware)
/// - `tokio::io::DuplexStream` (testing)
pub trait SerialPortIO: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> SerialPortIO for T {}

/// Type-erased boxed serial port.
pub type DynSerial = Box<dyn SerialPortIO>;

/// Size of one read from the port.
const READ_CHUNK: usize = 1024;

// =============================================================================
// Platform
// =============================================================================

/// A port the selector can offer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PortSummary {
    /// Port path, e.g. `/dev/ttyACM0` or `COM3`.
    pub name: String,
    /// `usb`, `bluetooth`, `pci` or `unknown`.
    pub kind: String,
    /// USB product string, when reported.
    pub product: Option<String>,
}

/// Port enumeration and opening.
#[async_trait]
pub trait SerialPlatform: Send + Sync + 'static {
    /// Fail with `Unsupported` when ports cannot be enumerated.
    async fn is_available(&self) -> Result<(), TransportError>;

    /// Choose a port. `preferred` short-circuits selection.
    ///
    /// Returns `Cancelled` when there is nothing to choose.
    async fn request_port(&self, preferred: Option<&str>) -> Result<String, TransportError>;

    /// Open `port` at `baud_rate`, 8N1, no flow control.
    async fn open(&self, port: &str, baud_rate: u32) -> Result<DynSerial, TransportError>;
}

/// Pick the port the selector would offer first.
pub fn choose_port(ports: &[PortSummary]) -> Option<&PortSummary> {
    ports
        .iter()
        .find(|port| port.kind == "usb")
        .or_else(|| ports.first())
}

// =============================================================================
// Transport
// =============================================================================

/// Wired variant of [`Transport`].
pub struct WiredTransport<P: SerialPlatform> {
    platform: P,
    settings: SerialSettings,
}

impl<P: SerialPlatform> WiredTransport<P> {
    /// Create a transport over `platform`.
    pub fn new(platform: P, settings: SerialSettings) -> Self {
        Self { platform, settings }
    }
}

#[async_trait]
impl<P: SerialPlatform> Transport for WiredTransport<P> {
    fn kind(&self) -> TransportKind {
        TransportKind::Wired
    }

    async fn check_capability(&self) -> Result<(), TransportError> {
        self.platform.is_available().await
    }

    async fn open(&self, abort: &mut AbortSignal) -> Result<Box<dyn Link>, TransportError> {
        let port = abortable(
            abort,
            self.platform.request_port(self.settings.port.as_deref()),
        )
        .await?;
        // Dropping an opened port on abort closes it.
        let stream = abortable(abort, self.platform.open(&port, self.settings.baud_rate)).await?;
        info!(port = %port, baud = self.settings.baud_rate, "serial port opened");
        Ok(Box::new(SerialLink::new(port, stream)))
    }
}

/// An open serial port read as text.
pub struct SerialLink {
    port: String,
    stream: DynSerial,
    buf: Vec<u8>,
    decoder: Utf8Stream,
}

impl SerialLink {
    /// Wrap an open port.
    pub fn new(port: String, stream: DynSerial) -> Self {
        Self {
            port,
            stream,
            buf: vec![0; READ_CHUNK],
            decoder: Utf8Stream::new(),
        }
    }
}

#[async_trait]
impl Link for SerialLink {
    async fn next_chunk(&mut self) -> Result<Option<String>, TransportError> {
        let n = self.stream.read(&mut self.buf).await?;
        if n == 0 {
            return Ok(None);
        }
        Ok(Some(self.decoder.decode(&self.buf[..n])))
    }

    async fn close(&mut self) {
        if let Err(err) = self.stream.shutdown().await {
            debug!(port = %self.port, error = %err, "serial shutdown failed");
        }
    }

    fn peer(&self) -> &str {
        &self.port
    }
}

// =============================================================================
// Backends
// =============================================================================

/// Platform used when the `serial` feature is off.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoSerial;

#[async_trait]
impl SerialPlatform for NoSerial {
    async fn is_available(&self) -> Result<(), TransportError> {
        Err(TransportError::FeatureNotEnabled("serial".into()))
    }

    async fn request_port(&self, _preferred: Option<&str>) -> Result<String, TransportError> {
        Err(TransportError::FeatureNotEnabled("serial".into()))
    }

    async fn open(&self, _port: &str, _baud_rate: u32) -> Result<DynSerial, TransportError> {
        Err(TransportError::FeatureNotEnabled("serial".into()))
    }
}

/// Serial platform selected by the enabled features.
#[cfg(feature = "serial")]
pub type DefaultSerialPlatform = TokioSerialPlatform;

/// Serial platform selected by the enabled features.
#[cfg(not(feature = "serial"))]
pub type DefaultSerialPlatform = NoSerial;

/// Ports visible to the selector.
#[cfg(feature = "serial")]
pub fn list_ports() -> Result<Vec<PortSummary>, TransportError> {
    let ports = tokio_serial::available_ports()
        .map_err(|err| TransportError::Unsupported(err.to_string()))?;
    Ok(ports
        .into_iter()
        .map(|info| {
            let (kind, product) = match info.port_type {
                tokio_serial::SerialPortType::UsbPort(usb) => ("usb", usb.product),
                tokio_serial::SerialPortType::BluetoothPort => ("bluetooth", None),
                tokio_serial::SerialPortType::PciPort => ("pci", None),
                tokio_serial::SerialPortType::Unknown => ("unknown", None),
            };
            PortSummary {
                name: info.port_name,
                kind: kind.to_string(),
                product,
            }
        })
        .collect())
}

/// Ports visible to the selector.
#[cfg(not(feature = "serial"))]
pub fn list_ports() -> Result<Vec<PortSummary>, TransportError> {
    Err(TransportError::FeatureNotEnabled("serial".into()))
}

/// Open a serial port asynchronously using spawn_blocking.
///
/// Standard settings are applied: 8N1, no flow control.
///
/// # Errors
///
/// `Open` with the backend's message if the port cannot be opened.
#[cfg(feature = "serial")]
pub async fn open_serial_async(
    port_path: &str,
    baud_rate: u32,
) -> Result<tokio_serial::SerialStream, TransportError> {
    use tokio::task::spawn_blocking;
    use tokio_serial::SerialPortBuilderExt;

    let port_path_owned = port_path.to_string();

    spawn_blocking(move || {
        tokio_serial::new(&port_path_owned, baud_rate)
            .data_bits(tokio_serial::DataBits::Eight)
            .parity(tokio_serial::Parity::None)
            .stop_bits(tokio_serial::StopBits::One)
            .flow_control(tokio_serial::FlowControl::None)
            .open_native_async()
            .map_err(|err| TransportError::Open {
                port: port_path_owned.clone(),
                message: err.to_string(),
            })
    })
    .await
    .map_err(|err| TransportError::Platform(format!("serial open task failed: {err}")))?
}

/// `tokio-serial` backend.
#[cfg(feature = "serial")]
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioSerialPlatform;

#[cfg(feature = "serial")]
#[async_trait]
impl SerialPlatform for TokioSerialPlatform {
    async fn is_available(&self) -> Result<(), TransportError> {
        list_ports().map(|_| ())
    }

    async fn request_port(&self, preferred: Option<&str>) -> Result<String, TransportError> {
        if let Some(port) = preferred {
            return Ok(port.to_string());
        }
        let ports = list_ports()?;
        match choose_port(&ports) {
            Some(port) => {
                debug!(port = %port.name, candidates = ports.len(), "serial port chosen");
                Ok(port.name.clone())
            }
            None => {
                info!("no serial port to select");
                Err(TransportError::Cancelled)
            }
        }
    }

    async fn open(&self, port: &str, baud_rate: u32) -> Result<DynSerial, TransportError> {
        let stream = open_serial_async(port, baud_rate).await?;
        Ok(Box::new(stream))
    }
}
