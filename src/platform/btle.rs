use std::sync::Arc;
use async_trait::async_trait;
use btleplug::api::{Central, Manager as _, Peripheral as _, ScanFilter};
use btleplug::platform::{Adapter, Manager, Peripheral};
use futures::StreamExt;
use log::{debug, info, warn};
use tokio::runtime::Handle;
use tokio::time::{sleep, Duration};
use uuid::Uuid;

use crate::device::constants::{IS_CONNECTED_DEADLINE, IS_CONNECTED_POLL_DELAY, SCAN_POLL_DELAY};
use crate::error::PedalError;
use crate::platform::{
    Characteristic, DeviceFilter, Notification, NotificationStream, Platform, PlatformDevice,
    PlatformSession,
};

/// `Platform` implementation backed by the host Bluetooth stack via btleplug.
pub struct BtlePlatform {
    manager: Manager,
}

impl BtlePlatform {
    pub async fn new() -> Result<Self, PedalError> {
        let manager = Manager::new().await?;
        Ok(Self { manager })
    }
}

async fn start_scanning(manager: &Manager, filter: &DeviceFilter) -> Result<ScanGuard, PedalError> {
    let adapters = manager.adapters().await?;

    if adapters.is_empty() {
        return Err(PedalError::PlatformUnavailable);
    }

    let scan_filter = ScanFilter {
        services: vec![filter.service],
    };

    let guard = ScanGuard::new(adapters);

    for adapter in guard.adapters() {
        info!("Scanning using adapter {}...", adapter.adapter_info().await.unwrap_or("UNKNOWN".to_string()));
        adapter.start_scan(scan_filter.clone()).await?;
    }

    Ok(guard)
}

async fn stop_scanning(adapters: &Vec<Adapter>) {
    for adapter in adapters {
        if let Err(err) = adapter.stop_scan().await {
            warn!("Failed to stop scanning: {:?}", err);
        }
    }
}

/// A running scan across all adapters. Discovery is raced against a deadline
/// and a cancellation token, so the future holding this guard may be dropped
/// at any await point; `stop` stops the scan in place, dropping the guard
/// stops it from a spawned task.
struct ScanGuard {
    adapters: Option<Vec<Adapter>>,
}

impl ScanGuard {
    fn new(adapters: Vec<Adapter>) -> ScanGuard {
        ScanGuard { adapters: Some(adapters) }
    }

    fn adapters(&self) -> &Vec<Adapter> {
        self.adapters.as_ref().expect("Scan already stopped")
    }

    async fn stop(mut self) {
        if let Some(adapters) = self.adapters.take() {
            stop_scanning(&adapters).await;
        }
    }
}

impl Drop for ScanGuard {
    fn drop(&mut self) {
        if let Some(adapters) = self.adapters.take() {
            match Handle::try_current() {
                Ok(handle) => {
                    handle.spawn(async move {
                        stop_scanning(&adapters).await;
                    });
                },
                Err(_) => {
                    warn!("No runtime available to stop scanning");
                },
            }
        }
    }
}

async fn find_peripheral(adapters: &Vec<Adapter>, service: Uuid) -> Option<Peripheral> {
    for adapter in adapters {
        let peripherals = match adapter.peripherals().await {
            Ok(v) => v,
            Err(err) => {
                warn!("Failed to query BLE adapter for peripherals: {}", err);
                continue;
            },
        };

        for peripheral in peripherals {
            let properties = peripheral.properties().await;

            match properties {
                Err(err) => {
                    warn!("Could not query peripheral for properties: {:?}", err);
                },
                Ok(None) => {
                    warn!("Peripheral has no properties");
                },
                Ok(Some(properties)) => {
                    // Some environments ignore the filter, so make sure to check the service uuid again
                    if properties.services.contains(&service) {
                        info!(
                            "Using peripheral {} {:?} {} {:?}",
                            properties.address,
                            properties.address_type,
                            properties.local_name.unwrap_or(String::from("NONE")),
                            properties.services,
                        );
                        return Some(peripheral);
                    }

                }
            }
        }
    }

    None
}

#[async_trait]
impl Platform for BtlePlatform {
    async fn request_device(&self, filter: &DeviceFilter) -> Result<Box<dyn PlatformDevice>, PedalError> {
        let guard = start_scanning(&self.manager, filter).await?;

        loop {
            if let Some(peripheral) = find_peripheral(guard.adapters(), filter.service).await {
                guard.stop().await;
                return Ok(Box::new(BtleDevice { peripheral, service: filter.service }));
            }

            debug!("No peripherals matched");
            sleep(Duration::from_millis(SCAN_POLL_DELAY)).await;
        }
    }
}

struct BtleDevice {
    peripheral: Peripheral,
    service: Uuid,
}

#[async_trait]
impl PlatformDevice for BtleDevice {
    async fn connect(&self) -> Result<Arc<dyn PlatformSession>, PedalError> {
        info!("Connecting to peripheral...");
        self.peripheral.connect().await?;

        info!("Connected; Discovering services...");
        self.peripheral.discover_services().await?;

        Ok(Arc::new(BtleSession {
            peripheral: self.peripheral.clone(),
            service: self.service,
        }))
    }
}

struct BtleSession {
    peripheral: Peripheral,
    service: Uuid,
}

impl BtleSession {
    fn find_characteristic(&self, uuid: Uuid) -> Result<btleplug::api::Characteristic, PedalError> {
        for service in self.peripheral.services() {
            if !service.uuid.eq(&self.service) {
                continue;
            }

            for characteristic in &service.characteristics {
                if characteristic.uuid.eq(&uuid) {
                    return Ok(characteristic.clone());
                }
            }
        }

        Err(PedalError::CharacteristicNotFound { uuid })
    }
}

#[async_trait]
impl PlatformSession for BtleSession {
    async fn characteristic(&self, uuid: Uuid) -> Result<Characteristic, PedalError> {
        let characteristic = self.find_characteristic(uuid)?;
        Ok(Characteristic { uuid: characteristic.uuid })
    }

    async fn subscribe(&self, characteristic: &Characteristic) -> Result<(), PedalError> {
        let target = self.find_characteristic(characteristic.uuid)?;
        self.peripheral.subscribe(&target).await?;
        Ok(())
    }

    async fn unsubscribe(&self, characteristic: &Characteristic) -> Result<(), PedalError> {
        let target = self.find_characteristic(characteristic.uuid)?;
        self.peripheral.unsubscribe(&target).await?;
        Ok(())
    }

    async fn notifications(&self) -> Result<NotificationStream, PedalError> {
        let stream = self.peripheral.notifications().await?;
        Ok(stream
            .map(|notification| Notification {
                characteristic: notification.uuid,
                value: notification.value,
            })
            .boxed())
    }

    async fn disconnected(&self) {
        loop {
            tokio::select! {
                _ = sleep(Duration::from_millis(IS_CONNECTED_DEADLINE)) => {
                    // macOS
                    warn!("Checking for connection status took too long");
                    return;
                }
                result = self.peripheral.is_connected() => match result {
                    Err(err) => {
                        warn!("Error checking for connection state: {:?}", err);
                        return;
                    },
                    Ok(false) => {
                        warn!("Connection lost");
                        return;
                    },
                    Ok(true) => {},
                }
            }

            sleep(Duration::from_millis(IS_CONNECTED_POLL_DELAY)).await;
        }
    }

    async fn close(&self) {
        if let Err(err) = self.peripheral.disconnect().await {
            warn!("Failed to disconnect from peripheral: {:?}", err);
        }
    }
}
