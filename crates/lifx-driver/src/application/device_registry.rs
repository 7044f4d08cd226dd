//! DeviceRegistry: the driver's map of known devices.
//!
//! Entries are keyed by hardware identifier.  Registration is first-writer-wins:
//! a second announcement from a device already in the map changes nothing and
//! publishes nothing.
//!
//! # Registration sequence
//!
//! ```text
//! StateService ──► insert Generic ──► GetVersion ──► vendor 1 / product 1?
//!                                                     │yes          │no
//!                                        replace with Light    publish NewDevice(Generic)
//!                                        LightGet (no wait)
//!                                        publish NewDevice(Light)
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use lifx_core::{hardware_address, is_original_light, DeviceId};
use tokio::sync::RwLock;
use tracing::{debug, error, info};

use crate::application::subscription_bus::{DriverEvent, SubscriptionBus};
use crate::device::{Device, DeviceHandle, Light};

#[derive(Debug, Default)]
pub struct DeviceRegistry {
    devices: RwLock<HashMap<DeviceId, DeviceHandle>>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, id: DeviceId) -> Option<DeviceHandle> {
        self.devices.read().await.get(&id).cloned()
    }

    pub async fn contains(&self, id: DeviceId) -> bool {
        self.devices.read().await.contains_key(&id)
    }

    /// Inserts `handle` unless its identifier is already present.
    /// Returns `true` if the entry was inserted.
    pub async fn insert_if_absent(&self, handle: DeviceHandle) -> bool {
        let mut devices = self.devices.write().await;
        if devices.contains_key(&handle.id()) {
            return false;
        }
        devices.insert(handle.id(), handle);
        true
    }

    /// Replaces the entry for `handle`'s identifier, if one exists.
    pub async fn replace(&self, handle: DeviceHandle) -> bool {
        match self.devices.write().await.get_mut(&handle.id()) {
            Some(entry) => {
                *entry = handle;
                true
            }
            None => false,
        }
    }

    pub async fn remove(&self, id: DeviceId) -> Option<DeviceHandle> {
        self.devices.write().await.remove(&id)
    }

    /// Returns a snapshot of every registered device.
    pub async fn snapshot(&self) -> Vec<DeviceHandle> {
        self.devices.read().await.values().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.devices.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.devices.read().await.is_empty()
    }

    /// Empties the map and closes every device that was in it.  Close errors
    /// are logged and skipped.
    pub async fn close_all(&self) {
        let drained: Vec<DeviceHandle> = self.devices.write().await.drain().map(|(_, h)| h).collect();
        for handle in drained {
            if let Err(e) = handle.close().await {
                debug!(device = %hardware_address(handle.id()), "close failed: {e}");
            }
        }
    }

    /// Registers a freshly announced device and publishes `NewDevice`.
    ///
    /// Devices that identify as an original-model light are promoted to a
    /// [`Light`] wrapping the same device, and a full state request is sent
    /// before the event goes out.  Failures are logged; the entry stays in
    /// the map either way.
    pub async fn add(&self, device: Arc<Device>, bus: &SubscriptionBus) {
        let id = device.id();
        if !self
            .insert_if_absent(DeviceHandle::Generic(Arc::clone(&device)))
            .await
        {
            return;
        }
        info!(device = %hardware_address(id), addr = %device.addr(), "device registered");

        let version = match device.hardware_version().await {
            Ok(version) => version,
            Err(e) => {
                error!(device = %hardware_address(id), "could not identify hardware: {e}");
                return;
            }
        };

        let handle = if is_original_light(version.vendor, version.product) {
            let light = Arc::new(Light::new(device));
            let handle = DeviceHandle::Light(Arc::clone(&light));
            self.replace(handle.clone()).await;
            if let Err(e) = light.get().await {
                debug!(device = %hardware_address(id), "could not request light state: {e}");
            }
            handle
        } else {
            DeviceHandle::Generic(device)
        };

        if let Err(e) = bus.publish(DriverEvent::NewDevice(handle)).await {
            error!(device = %hardware_address(id), "could not publish new device: {e}");
        }
    }
}
