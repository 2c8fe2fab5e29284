use std::sync::Arc;
use async_trait::async_trait;
use futures::stream::BoxStream;
use uuid::Uuid;

use crate::error::PedalError;

pub mod btle;

/// Device-selection criteria handed to the platform layer. `service` scopes
/// discovery to peripherals advertising it; `optional_services` widens the
/// access grant on platforms with a permission chooser without affecting
/// discovery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceFilter {
    pub service: Uuid,
    pub optional_services: Vec<Uuid>,
}

/// A characteristic exposed by the connected peripheral.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Characteristic {
    pub uuid: Uuid,
}

/// A raw notification pushed by the peripheral on a subscribed characteristic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub characteristic: Uuid,
    pub value: Vec<u8>,
}

pub type NotificationStream = BoxStream<'static, Notification>;

/// Entry point into the host's Bluetooth stack.
#[async_trait]
pub trait Platform: Send + Sync {
    /// Discover a peripheral matching the filter. Pends until one is found;
    /// the caller bounds the wait. Fails with `PlatformUnavailable` when the
    /// host has no usable Bluetooth capability.
    async fn request_device(&self, filter: &DeviceFilter) -> Result<Box<dyn PlatformDevice>, PedalError>;
}

/// A discovered peripheral that has not been connected yet.
#[async_trait]
pub trait PlatformDevice: Send + Sync {
    async fn connect(&self) -> Result<Arc<dyn PlatformSession>, PedalError>;
}

/// An open GATT session with a connected peripheral.
#[async_trait]
pub trait PlatformSession: Send + Sync {
    /// Look up a characteristic by UUID. Fails with `CharacteristicNotFound`
    /// if the peripheral does not expose it.
    async fn characteristic(&self, uuid: Uuid) -> Result<Characteristic, PedalError>;

    async fn subscribe(&self, characteristic: &Characteristic) -> Result<(), PedalError>;

    async fn unsubscribe(&self, characteristic: &Characteristic) -> Result<(), PedalError>;

    /// The stream of notifications for all subscribed characteristics.
    async fn notifications(&self) -> Result<NotificationStream, PedalError>;

    /// Resolves once the platform observes the session dropping. Never
    /// resolves while the session stays healthy.
    async fn disconnected(&self);

    /// Release the session. Must be safe to call on an already-dead session.
    async fn close(&self);
}
