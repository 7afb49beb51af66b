//! Scriptable radio and serial platforms for integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use futures::stream::{self, BoxStream};
use futures::StreamExt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use telemetry_link::transport::radio::{RadioDevice, RadioNotification, RadioPlatform};
use telemetry_link::transport::serial::{DynSerial, SerialPlatform};
use telemetry_link::TransportError;
use tokio::io::DuplexStream;
use tokio_test::io::Mock;
use tokio::sync::{mpsc, Mutex};
use uuid::Uuid;

pub const RECORD: &str = r#"{"t":21.5,"l":120,"c":90,"s":30,"storm":0,"ultra":21.48}"#;

pub fn record(t: f64) -> String {
    format!(r#"{{"t":{t},"l":1,"c":2,"s":3,"storm":0,"ultra":{t}}}"#)
}

// =============================================================================
// Radio
// =============================================================================

/// How device selection resolves.
#[derive(Clone)]
pub enum Selection {
    /// A device exposing these (service, characteristic) pairs.
    Device(Vec<(Uuid, Uuid)>),
    /// The user dismisses the chooser.
    Dismiss,
    /// Selection never resolves.
    Hang,
}

#[derive(Default)]
pub struct RadioCounters {
    pub opens: AtomicUsize,
    pub unsubscribes: AtomicUsize,
    pub closes: AtomicUsize,
}

#[derive(Clone)]
pub struct MockRadio {
    pub available: bool,
    pub selection: Selection,
    pub open_error: Option<String>,
    /// Subscription never resolves once the device is open.
    pub stall_subscribe: bool,
    feeds: Arc<Mutex<Vec<mpsc::UnboundedReceiver<RadioNotification>>>>,
    pub counters: Arc<RadioCounters>,
}

impl MockRadio {
    pub fn new(selection: Selection) -> Self {
        Self {
            available: true,
            selection,
            open_error: None,
            stall_subscribe: false,
            feeds: Arc::default(),
            counters: Arc::default(),
        }
    }

    pub fn unavailable() -> Self {
        Self {
            available: false,
            ..Self::new(Selection::Dismiss)
        }
    }

    /// Queue the notification feed for the next subscription.
    pub async fn feed(&self) -> mpsc::UnboundedSender<RadioNotification> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.feeds.lock().await.push(rx);
        tx
    }
}

#[async_trait]
impl RadioPlatform for MockRadio {
    async fn is_available(&self) -> Result<(), TransportError> {
        if self.available {
            Ok(())
        } else {
            Err(TransportError::Unsupported(
                "Bluetooth is not available on this platform".into(),
            ))
        }
    }

    async fn request_device(
        &self,
        _name_prefix: &str,
        _window: Duration,
    ) -> Result<Box<dyn RadioDevice>, TransportError> {
        match &self.selection {
            Selection::Device(services) => Ok(Box::new(MockDevice {
                platform: self.clone(),
                services: services.clone(),
            })),
            Selection::Dismiss => Err(TransportError::Cancelled),
            Selection::Hang => std::future::pending().await,
        }
    }
}

struct MockDevice {
    platform: MockRadio,
    services: Vec<(Uuid, Uuid)>,
}

#[async_trait]
impl RadioDevice for MockDevice {
    fn name(&self) -> &str {
        "BBC micro:bit [tegip]"
    }

    async fn open(&mut self) -> Result<(), TransportError> {
        self.platform.counters.opens.fetch_add(1, Ordering::SeqCst);
        match &self.platform.open_error {
            Some(message) => Err(TransportError::Platform(message.clone())),
            None => Ok(()),
        }
    }

    async fn subscribe(
        &mut self,
        service: Uuid,
        characteristic: Uuid,
    ) -> Result<BoxStream<'static, RadioNotification>, TransportError> {
        if self.platform.stall_subscribe {
            std::future::pending::<()>().await;
        }
        if !self.services.iter().any(|(s, _)| *s == service) {
            return Err(TransportError::ServiceNotFound(service));
        }
        if !self.services.contains(&(service, characteristic)) {
            return Err(TransportError::CharacteristicNotFound(characteristic));
        }
        let rx = self
            .platform
            .feeds
            .lock()
            .await
            .pop()
            .ok_or_else(|| TransportError::Platform("no feed queued".into()))?;
        Ok(stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|item| (item, rx))
        })
        .boxed())
    }

    async fn unsubscribe(&mut self) -> Result<(), TransportError> {
        self.platform.counters.unsubscribes.fetch_add(1, Ordering::SeqCst);
        Err(TransportError::Platform("GATT Server is disconnected".into()))
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.platform.counters.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

// =============================================================================
// Serial
// =============================================================================

/// How opening the port resolves.
pub enum PortOpen {
    /// Hand out the device end of a duplex pipe.
    Stream(DuplexStream),
    /// Hand out a scripted sequence of reads and read errors.
    Scripted(Mock),
    /// Fail with this message.
    Fail(String),
}

#[derive(Clone)]
pub struct MockSerial {
    pub available: bool,
    pub ports: Vec<String>,
    open: Arc<Mutex<Option<PortOpen>>>,
    pub opened: Arc<Mutex<Vec<(String, u32)>>>,
}

impl MockSerial {
    /// A platform with one port wired to the returned host end.
    pub fn connected() -> (Self, DuplexStream) {
        let (host, device) = tokio::io::duplex(4096);
        let platform = Self {
            available: true,
            ports: vec!["/dev/ttyACM0".into()],
            open: Arc::new(Mutex::new(Some(PortOpen::Stream(device)))),
            opened: Arc::default(),
        };
        (platform, host)
    }

    /// Make the next `open` hand out a fresh pipe; returns its host end.
    pub async fn rearm(&self) -> DuplexStream {
        let (host, device) = tokio::io::duplex(4096);
        *self.open.lock().await = Some(PortOpen::Stream(device));
        host
    }

    /// A platform whose one port replays `script`.
    pub fn scripted(script: Mock) -> Self {
        Self {
            available: true,
            ports: vec!["/dev/ttyACM0".into()],
            open: Arc::new(Mutex::new(Some(PortOpen::Scripted(script)))),
            opened: Arc::default(),
        }
    }

    pub fn failing(message: &str) -> Self {
        Self {
            available: true,
            ports: vec!["/dev/ttyACM0".into()],
            open: Arc::new(Mutex::new(Some(PortOpen::Fail(message.into())))),
            opened: Arc::default(),
        }
    }

    pub fn without_ports() -> Self {
        Self {
            available: true,
            ports: Vec::new(),
            open: Arc::default(),
            opened: Arc::default(),
        }
    }

    pub fn unavailable() -> Self {
        Self {
            available: false,
            ..Self::without_ports()
        }
    }
}

#[async_trait]
impl SerialPlatform for MockSerial {
    async fn is_available(&self) -> Result<(), TransportError> {
        if self.available {
            Ok(())
        } else {
            Err(TransportError::Unsupported(
                "serial ports cannot be enumerated on this platform".into(),
            ))
        }
    }

    async fn request_port(&self, preferred: Option<&str>) -> Result<String, TransportError> {
        if let Some(port) = preferred {
            return Ok(port.to_string());
        }
        self.ports.first().cloned().ok_or(TransportError::Cancelled)
    }

    async fn open(&self, port: &str, baud_rate: u32) -> Result<DynSerial, TransportError> {
        self.opened.lock().await.push((port.to_string(), baud_rate));
        match self.open.lock().await.take() {
            Some(PortOpen::Stream(stream)) => Ok(Box::new(stream)),
            Some(PortOpen::Scripted(script)) => Ok(Box::new(script)),
            Some(PortOpen::Fail(message)) => Err(TransportError::Open {
                port: port.to_string(),
                message,
            }),
            None => Err(TransportError::Open {
                port: port.to_string(),
                message: "port already open".into(),
            }),
        }
    }
}
