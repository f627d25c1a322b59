use async_trait::async_trait;
use btleplug::{
    api::{Central, Characteristic, Manager as _, Peripheral as _, ScanFilter, WriteType},
    platform::{Adapter, Manager, Peripheral},
};
use futures::stream::StreamExt;
use std::{sync::Arc, time::Duration};
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    error::{GreenhouseError, Result},
    link::{Connector, Link, NotificationStream},
    GREENHOUSE_DATA_CHAR_UUID, GREENHOUSE_SERVICE_UUID,
};

/// Default time spent scanning for a device that is not yet known to the adapter
pub const DEFAULT_SCAN_TIMEOUT_MS: u64 = 5_000;

const SCAN_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// btleplug-backed [`Connector`] using the first Bluetooth adapter
pub struct BleConnector {
    manager: Manager,
    scan_timeout_ms: u64,
}

impl BleConnector {
    /// Create a connector on the platform Bluetooth manager
    ///
    /// # Errors
    ///
    /// Returns [`GreenhouseError::Ble`] if the Bluetooth manager cannot be initialized.
    pub async fn new() -> Result<Self> {
        let manager = Manager::new().await?;

        Ok(Self {
            manager,
            scan_timeout_ms: DEFAULT_SCAN_TIMEOUT_MS,
        })
    }

    /// Set how long to scan for an address the adapter has not seen yet
    #[must_use]
    pub const fn with_scan_timeout_ms(mut self, scan_timeout_ms: u64) -> Self {
        self.scan_timeout_ms = scan_timeout_ms;
        self
    }

    async fn adapter(&self) -> Result<Adapter> {
        self.manager
            .adapters()
            .await?
            .into_iter()
            .next()
            .ok_or(GreenhouseError::DeviceNotFound)
    }

    /// Find a peripheral by address, scanning for the greenhouse service if needed
    ///
    /// `address` is matched against the Bluetooth address and, for platforms that
    /// hide addresses, the platform peripheral id.
    async fn find_peripheral(&self, central: &Adapter, address: &str) -> Result<Peripheral> {
        if let Some(peripheral) = Self::known_peripheral(central, address).await? {
            return Ok(peripheral);
        }

        info!("Scanning for greenhouse device {}...", address);

        let service_uuid = parse_uuid(GREENHOUSE_SERVICE_UUID)?;
        central
            .start_scan(ScanFilter {
                services: vec![service_uuid],
            })
            .await?;

        let deadline = Instant::now() + Duration::from_millis(self.scan_timeout_ms);
        let found = Self::poll_until_found(central, address, deadline).await;

        if let Err(error) = central.stop_scan().await {
            warn!("Failed to stop scanning: {}", error);
        }
        found?.ok_or(GreenhouseError::DeviceNotFound)
    }

    async fn poll_until_found(
        central: &Adapter,
        address: &str,
        deadline: Instant,
    ) -> Result<Option<Peripheral>> {
        loop {
            if let Some(peripheral) = Self::known_peripheral(central, address).await? {
                return Ok(Some(peripheral));
            }
            if Instant::now() >= deadline {
                return Ok(None);
            }
            sleep(SCAN_POLL_INTERVAL).await;
        }
    }

    async fn known_peripheral(central: &Adapter, address: &str) -> Result<Option<Peripheral>> {
        let peripherals = central.peripherals().await?;

        Ok(peripherals.into_iter().find(|peripheral| {
            peripheral
                .address()
                .to_string()
                .eq_ignore_ascii_case(address)
                || peripheral.id().to_string() == address
        }))
    }
}

#[async_trait]
impl Connector for BleConnector {
    async fn connect(&self, address: &str) -> Result<Arc<dyn Link>> {
        info!("Connecting to greenhouse device: {}", address);

        let central = self.adapter().await?;
        let peripheral = self.find_peripheral(&central, address).await?;

        peripheral
            .connect()
            .await
            .map_err(|e| GreenhouseError::ConnectionFailed(e.to_string()))?;
        let guard = SetupGuard::new(peripheral.clone());

        peripheral.discover_services().await?;

        let char_uuid = parse_uuid(GREENHOUSE_DATA_CHAR_UUID)?;
        let characteristic = peripheral
            .characteristics()
            .into_iter()
            .find(|c| c.uuid == char_uuid)
            .ok_or_else(|| {
                GreenhouseError::Protocol("Greenhouse data characteristic not found".to_string())
            })?;

        peripheral.subscribe(&characteristic).await?;
        guard.disarm();

        info!("Successfully connected to {}", address);

        Ok(Arc::new(BleLink {
            peripheral,
            characteristic,
        }))
    }
}

/// Disconnects a connected peripheral whose setup failed or was abandoned
struct SetupGuard {
    peripheral: Option<Peripheral>,
}

impl SetupGuard {
    const fn new(peripheral: Peripheral) -> Self {
        Self {
            peripheral: Some(peripheral),
        }
    }

    fn disarm(mut self) {
        self.peripheral = None;
    }
}

impl Drop for SetupGuard {
    fn drop(&mut self) {
        let Some(peripheral) = self.peripheral.take() else {
            return;
        };
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            return;
        };

        warn!("Setup of {} did not complete, disconnecting", peripheral.address());
        runtime.spawn(async move {
            if let Err(error) = peripheral.disconnect().await {
                debug!("Ignoring disconnect error: {}", error);
            }
        });
    }
}

/// Active link to a greenhouse device over its data characteristic
pub struct BleLink {
    peripheral: Peripheral,
    characteristic: Characteristic,
}

impl BleLink {
    /// Platform address of the connected device
    #[must_use]
    pub fn address(&self) -> String {
        self.peripheral.address().to_string()
    }
}

#[async_trait]
impl Link for BleLink {
    async fn write(&self, data: &[u8]) -> Result<()> {
        self.peripheral
            .write(&self.characteristic, data, WriteType::WithoutResponse)
            .await?;
        Ok(())
    }

    async fn notifications(&self) -> Result<NotificationStream> {
        let char_uuid = self.characteristic.uuid;
        let stream = self.peripheral.notifications().await?;

        Ok(stream
            .filter_map(move |notification| async move {
                if notification.uuid == char_uuid {
                    Some(notification.value)
                } else {
                    debug!("Ignoring notification from {}", notification.uuid);
                    None
                }
            })
            .boxed())
    }

    async fn disconnect(&self) -> Result<()> {
        self.peripheral.disconnect().await?;
        Ok(())
    }

    async fn is_connected(&self) -> bool {
        self.peripheral.is_connected().await.unwrap_or(false)
    }
}

fn parse_uuid(value: &str) -> Result<Uuid> {
    Uuid::parse_str(value).map_err(|e| GreenhouseError::Protocol(format!("Invalid UUID: {e}")))
}
