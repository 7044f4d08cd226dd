use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use lifx_core::{hardware_address, DeviceId, Packet};

use super::{Device, DeviceError, Light};

/// A registered device in one of its two capability variants.
///
/// Cloning is cheap; both variants share the underlying [`Device`].
#[derive(Clone)]
pub enum DeviceHandle {
    Generic(Arc<Device>),
    Light(Arc<Light>),
}

impl DeviceHandle {
    pub fn id(&self) -> DeviceId {
        self.device().id()
    }

    pub fn device(&self) -> &Arc<Device> {
        match self {
            DeviceHandle::Generic(device) => device,
            DeviceHandle::Light(light) => light.device(),
        }
    }

    pub fn as_light(&self) -> Option<&Arc<Light>> {
        match self {
            DeviceHandle::Light(light) => Some(light),
            DeviceHandle::Generic(_) => None,
        }
    }

    pub fn is_light(&self) -> bool {
        matches!(self, DeviceHandle::Light(_))
    }

    pub async fn seen(&self) -> Instant {
        self.device().seen().await
    }

    pub async fn set_seen(&self, at: Instant) {
        self.device().set_seen(at).await;
    }

    /// Routes `packet` to the variant's handler.
    pub async fn handle(&self, packet: &Packet) {
        match self {
            DeviceHandle::Generic(device) => device.handle(packet).await,
            DeviceHandle::Light(light) => light.handle(packet).await,
        }
    }

    pub async fn close(&self) -> Result<(), DeviceError> {
        self.device().close().await
    }
}

impl fmt::Debug for DeviceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let variant = if self.is_light() { "Light" } else { "Generic" };
        write!(f, "{variant}({})", hardware_address(self.id()))
    }
}

impl PartialEq for DeviceHandle {
    /// Two handles are equal when they refer to the same device in the same variant.
    fn eq(&self, other: &Self) -> bool {
        self.is_light() == other.is_light() && Arc::ptr_eq(self.device(), other.device())
    }
}
