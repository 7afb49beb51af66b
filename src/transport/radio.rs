//! Radio (BLE) link variant.
//!
//! The board exposes the Nordic UART service; telemetry text arrives as value
//! notifications on its TX characteristic. Opening a link means:
//!
//! 1. select a device whose advertised name starts with the configured prefix
//! 2. connect and discover services
//! 3. locate the service and characteristic, then subscribe to notifications
//!
//! Platform access sits behind [`RadioPlatform`] and [`RadioDevice`] so the lifecycle
//! can be driven without an adapter. The `ble` feature supplies a `btleplug` backend.

use super::{abortable, AbortSignal, Link, Transport, TransportKind, Utf8Stream};
use crate::config::RadioSettings;
use crate::error::TransportError;
use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use std::time::Duration;
use tracing::{debug, info};
use uuid::Uuid;

/// Item of a device's notification stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RadioNotification {
    /// Characteristic value change.
    Value(Vec<u8>),
    /// The peer dropped the link.
    Disconnected,
}

/// Adapter-level operations.
#[async_trait]
pub trait RadioPlatform: Send + Sync + 'static {
    /// Fail with `Unsupported` when no radio adapter is usable.
    async fn is_available(&self) -> Result<(), TransportError>;

    /// Select a device whose name starts with `name_prefix`.
    ///
    /// Returns `Cancelled` when nothing suitable is chosen within `window`.
    async fn request_device(
        &self,
        name_prefix: &str,
        window: Duration,
    ) -> Result<Box<dyn RadioDevice>, TransportError>;
}

/// A selected peer.
#[async_trait]
pub trait RadioDevice: Send {
    /// Advertised name.
    fn name(&self) -> &str;

    /// Connect and discover services.
    async fn open(&mut self) -> Result<(), TransportError>;

    /// Subscribe to value changes of `characteristic` in `service`.
    ///
    /// The stream yields `Disconnected` (or ends) when the peer drops the link.
    async fn subscribe(
        &mut self,
        service: Uuid,
        characteristic: Uuid,
    ) -> Result<BoxStream<'static, RadioNotification>, TransportError>;

    /// Stop notifications.
    async fn unsubscribe(&mut self) -> Result<(), TransportError>;

    /// Disconnect from the peer.
    async fn close(&mut self) -> Result<(), TransportError>;
}

/// Radio variant of [`Transport`].
pub struct RadioTransport<P: RadioPlatform> {
    platform: P,
    settings: RadioSettings,
}

impl<P: RadioPlatform> RadioTransport<P> {
    /// Create a transport over `platform`.
    pub fn new(platform: P, settings: RadioSettings) -> Self {
        Self { platform, settings }
    }

    /// Underlying platform.
    pub fn platform(&self) -> &P {
        &self.platform
    }
}

#[async_trait]
impl<P: RadioPlatform> Transport for RadioTransport<P> {
    fn kind(&self) -> TransportKind {
        TransportKind::Radio
    }

    async fn check_capability(&self) -> Result<(), TransportError> {
        self.platform.is_available().await
    }

    async fn open(&self, abort: &mut AbortSignal) -> Result<Box<dyn Link>, TransportError> {
        let mut device = abortable(
            abort,
            self.platform
                .request_device(&self.settings.name_prefix, self.settings.selection_window()),
        )
        .await?;
        info!(device = device.name(), "radio device selected");

        let opened = abortable(abort, device.open()).await;
        let negotiated = match opened {
            Ok(()) => {
                abortable(
                    abort,
                    device.subscribe(self.settings.service_uuid, self.settings.characteristic_uuid),
                )
                .await
            }
            Err(err) => Err(err),
        };

        let notifications = match negotiated {
            Ok(stream) => stream,
            Err(err) => {
                // Once selected the peer may already be connected; always release it.
                if let Err(close_err) = device.close().await {
                    debug!(device = device.name(), error = %close_err, "radio disconnect failed");
                }
                return Err(err);
            }
        };

        Ok(Box::new(RadioLink {
            name: device.name().to_string(),
            device,
            notifications,
            decoder: Utf8Stream::new(),
        }))
    }
}

/// A subscribed radio link.
pub struct RadioLink {
    name: String,
    device: Box<dyn RadioDevice>,
    notifications: BoxStream<'static, RadioNotification>,
    decoder: Utf8Stream,
}

#[async_trait]
impl Link for RadioLink {
    async fn next_chunk(&mut self) -> Result<Option<String>, TransportError> {
        match self.notifications.next().await {
            Some(RadioNotification::Value(bytes)) => Ok(Some(self.decoder.decode(&bytes))),
            Some(RadioNotification::Disconnected) | None => Ok(None),
        }
    }

    async fn close(&mut self) {
        if let Err(err) = self.device.unsubscribe().await {
            debug!(device = %self.name, error = %err, "unsubscribe failed");
        }
        if let Err(err) = self.device.close().await {
            debug!(device = %self.name, error = %err, "radio disconnect failed");
        }
    }

    fn peer(&self) -> &str {
        &self.name
    }
}

/// Platform used when the `ble` feature is off.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoRadio;

#[async_trait]
impl RadioPlatform for NoRadio {
    async fn is_available(&self) -> Result<(), TransportError> {
        Err(TransportError::FeatureNotEnabled("ble".into()))
    }

    async fn request_device(
        &self,
        _name_prefix: &str,
        _window: Duration,
    ) -> Result<Box<dyn RadioDevice>, TransportError> {
        Err(TransportError::FeatureNotEnabled("ble".into()))
    }
}

/// Radio platform selected by the enabled features.
#[cfg(feature = "ble")]
pub type DefaultRadioPlatform = btle::BtleplugPlatform;

/// Radio platform selected by the enabled features.
#[cfg(not(feature = "ble"))]
pub type DefaultRadioPlatform = NoRadio;

#[cfg(feature = "ble")]
pub use btle::BtleplugPlatform;

#[cfg(feature = "ble")]
mod btle {
    use super::{RadioDevice, RadioNotification, RadioPlatform};
    use crate::error::TransportError;
    use async_trait::async_trait;
    use btleplug::api::{
        Central, CentralEvent, Characteristic, Manager as _, Peripheral as _, ScanFilter,
    };
    use btleplug::platform::{Adapter, Manager, Peripheral};
    use futures::stream::{self, BoxStream};
    use futures::StreamExt;
    use std::time::Duration;
    use tracing::{debug, info};
    use uuid::Uuid;

    /// `btleplug` backend using the first adapter.
    #[derive(Debug, Default, Clone, Copy)]
    pub struct BtleplugPlatform;

    async fn first_adapter() -> Result<Adapter, TransportError> {
        let manager = Manager::new().await?;
        manager
            .adapters()
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| TransportError::Unsupported("No Bluetooth adapter found".into()))
    }

    async fn matches_prefix(peripheral: &Peripheral, prefix: &str) -> Option<String> {
        let properties = peripheral.properties().await.ok().flatten()?;
        properties.local_name.filter(|name| name.starts_with(prefix))
    }

    async fn find_device(adapter: &Adapter, prefix: &str) -> Result<(Peripheral, String), TransportError> {
        let mut events = adapter.events().await?;

        for peripheral in adapter.peripherals().await? {
            if let Some(name) = matches_prefix(&peripheral, prefix).await {
                return Ok((peripheral, name));
            }
        }

        while let Some(event) = events.next().await {
            if let CentralEvent::DeviceDiscovered(id) | CentralEvent::DeviceUpdated(id) = event {
                let peripheral = adapter.peripheral(&id).await?;
                if let Some(name) = matches_prefix(&peripheral, prefix).await {
                    return Ok((peripheral, name));
                }
            }
        }
        Err(TransportError::Cancelled)
    }

    #[async_trait]
    impl RadioPlatform for BtleplugPlatform {
        async fn is_available(&self) -> Result<(), TransportError> {
            first_adapter().await.map(|_| ())
        }

        async fn request_device(
            &self,
            name_prefix: &str,
            window: Duration,
        ) -> Result<Box<dyn RadioDevice>, TransportError> {
            let adapter = first_adapter().await?;
            adapter.start_scan(ScanFilter::default()).await?;
            debug!(prefix = name_prefix, "scanning for radio devices");

            let found = tokio::time::timeout(window, find_device(&adapter, name_prefix)).await;
            if let Err(err) = adapter.stop_scan().await {
                debug!(error = %err, "stop scan failed");
            }

            let (peripheral, name) = match found {
                Ok(result) => result?,
                Err(_) => {
                    info!(prefix = name_prefix, "no radio device selected");
                    return Err(TransportError::Cancelled);
                }
            };

            Ok(Box::new(BtleplugDevice {
                adapter,
                peripheral,
                name,
                subscribed: None,
            }))
        }
    }

    struct BtleplugDevice {
        adapter: Adapter,
        peripheral: Peripheral,
        name: String,
        subscribed: Option<Characteristic>,
    }

    #[async_trait]
    impl RadioDevice for BtleplugDevice {
        fn name(&self) -> &str {
            &self.name
        }

        async fn open(&mut self) -> Result<(), TransportError> {
            self.peripheral.connect().await?;
            self.peripheral.discover_services().await?;
            Ok(())
        }

        async fn subscribe(
            &mut self,
            service: Uuid,
            characteristic: Uuid,
        ) -> Result<BoxStream<'static, RadioNotification>, TransportError> {
            let services = self.peripheral.services();
            let found = services
                .iter()
                .find(|s| s.uuid == service)
                .ok_or(TransportError::ServiceNotFound(service))?;
            let target = found
                .characteristics
                .iter()
                .find(|c| c.uuid == characteristic)
                .cloned()
                .ok_or(TransportError::CharacteristicNotFound(characteristic))?;

            let values = self.peripheral.notifications().await?;
            self.peripheral.subscribe(&target).await?;
            self.subscribed = Some(target);

            let id = self.peripheral.id();
            let dropped = self.adapter.events().await?.filter_map(move |event| {
                let hit = matches!(&event, CentralEvent::DeviceDisconnected(gone) if *gone == id);
                async move { hit.then_some(RadioNotification::Disconnected) }
            });
            let values = values
                .filter(move |n| futures::future::ready(n.uuid == characteristic))
                .map(|n| RadioNotification::Value(n.value))
                .chain(stream::once(async { RadioNotification::Disconnected }));

            Ok(stream::select(values, dropped).boxed())
        }

        async fn unsubscribe(&mut self) -> Result<(), TransportError> {
            if let Some(characteristic) = self.subscribed.take() {
                self.peripheral.unsubscribe(&characteristic).await?;
            }
            Ok(())
        }

        async fn close(&mut self) -> Result<(), TransportError> {
            self.peripheral.disconnect().await?;
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use tokio::sync::oneshot;

    struct FakeDevice {
        services: Vec<(Uuid, Uuid)>,
        stall_subscribe: bool,
        unsubscribed: Arc<AtomicBool>,
        closed: Arc<AtomicBool>,
    }

    #[async_trait]
    impl RadioDevice for FakeDevice {
        fn name(&self) -> &str {
            "BBC micro:bit [zogav]"
        }

        async fn open(&mut self) -> Result<(), TransportError> {
            Ok(())
        }

        async fn subscribe(
            &mut self,
            service: Uuid,
            characteristic: Uuid,
        ) -> Result<BoxStream<'static, RadioNotification>, TransportError> {
            if self.stall_subscribe {
                std::future::pending::<()>().await;
            }
            if !self.services.iter().any(|(s, _)| *s == service) {
                return Err(TransportError::ServiceNotFound(service));
            }
            if !self.services.contains(&(service, characteristic)) {
                return Err(TransportError::CharacteristicNotFound(characteristic));
            }
            let items = vec![
                RadioNotification::Value(b"{\"t\":2".to_vec()),
                RadioNotification::Value(b"1.5}".to_vec()),
                RadioNotification::Disconnected,
            ];
            Ok(stream::iter(items).boxed())
        }

        async fn unsubscribe(&mut self) -> Result<(), TransportError> {
            self.unsubscribed.store(true, Ordering::SeqCst);
            Err(TransportError::Platform("not subscribed".into()))
        }

        async fn close(&mut self) -> Result<(), TransportError> {
            self.closed.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    struct FakePlatform {
        services: Vec<(Uuid, Uuid)>,
        stall_subscribe: bool,
        unsubscribed: Arc<AtomicBool>,
        closed: Arc<AtomicBool>,
    }

    impl FakePlatform {
        fn new(services: Vec<(Uuid, Uuid)>) -> Self {
            Self {
                services,
                stall_subscribe: false,
                unsubscribed: Arc::default(),
                closed: Arc::default(),
            }
        }
    }

    #[async_trait]
    impl RadioPlatform for FakePlatform {
        async fn is_available(&self) -> Result<(), TransportError> {
            Ok(())
        }

        async fn request_device(
            &self,
            name_prefix: &str,
            _window: Duration,
        ) -> Result<Box<dyn RadioDevice>, TransportError> {
            assert_eq!(name_prefix, "BBC micro:bit");
            Ok(Box::new(FakeDevice {
                services: self.services.clone(),
                stall_subscribe: self.stall_subscribe,
                unsubscribed: Arc::clone(&self.unsubscribed),
                closed: Arc::clone(&self.closed),
            }))
        }
    }

    fn uart() -> (Uuid, Uuid) {
        let settings = RadioSettings::default();
        (settings.service_uuid, settings.characteristic_uuid)
    }

    #[tokio::test]
    async fn notifications_become_chunks_until_peer_drop() {
        let transport = RadioTransport::new(FakePlatform::new(vec![uart()]), RadioSettings::default());
        let (_abort_tx, mut abort) = oneshot::channel();
        let mut link = transport.open(&mut abort).await.unwrap();

        assert_eq!(link.peer(), "BBC micro:bit [zogav]");
        assert_eq!(link.next_chunk().await.unwrap().as_deref(), Some("{\"t\":2"));
        assert_eq!(link.next_chunk().await.unwrap().as_deref(), Some("1.5}"));
        assert_eq!(link.next_chunk().await.unwrap(), None);
    }

    #[tokio::test]
    async fn close_ignores_unsubscribe_failure() {
        let platform = FakePlatform::new(vec![uart()]);
        let unsubscribed = Arc::clone(&platform.unsubscribed);
        let closed = Arc::clone(&platform.closed);
        let transport = RadioTransport::new(platform, RadioSettings::default());

        let (_abort_tx, mut abort) = oneshot::channel();
        let mut link = transport.open(&mut abort).await.unwrap();
        link.close().await;
        assert!(unsubscribed.load(Ordering::SeqCst));
        assert!(closed.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn missing_service_fails_negotiation_and_closes() {
        let platform = FakePlatform::new(vec![]);
        let closed = Arc::clone(&platform.closed);
        let transport = RadioTransport::new(platform, RadioSettings::default());

        let (_abort_tx, mut abort) = oneshot::channel();
        let err = transport.open(&mut abort).await.err().unwrap();
        assert!(matches!(err, TransportError::ServiceNotFound(_)));
        assert!(closed.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn missing_characteristic_fails_negotiation() {
        let (service, _) = uart();
        let transport = RadioTransport::new(
            FakePlatform::new(vec![(service, Uuid::nil())]),
            RadioSettings::default(),
        );
        let (_abort_tx, mut abort) = oneshot::channel();
        let err = transport.open(&mut abort).await.err().unwrap();
        assert!(matches!(err, TransportError::CharacteristicNotFound(_)));
    }

    #[tokio::test]
    async fn abort_during_subscribe_closes_connected_device() {
        let mut platform = FakePlatform::new(vec![uart()]);
        platform.stall_subscribe = true;
        let closed = Arc::clone(&platform.closed);
        let transport = RadioTransport::new(platform, RadioSettings::default());

        let (abort_tx, mut abort) = oneshot::channel();
        tokio::spawn(async move {
            tokio::task::yield_now().await;
            let _ = abort_tx.send(());
        });

        let err = transport.open(&mut abort).await.err().unwrap();
        assert!(matches!(err, TransportError::Aborted));
        assert!(closed.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn no_radio_reports_feature() {
        let transport = RadioTransport::new(NoRadio, RadioSettings::default());
        let err = transport.check_capability().await.unwrap_err();
        assert!(err.to_string().contains("ble"));
    }
}
