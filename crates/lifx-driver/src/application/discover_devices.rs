//! DiscoverDevices: expire silent devices, then broadcast discovery.
//!
//! A device is considered extinct when it has not been seen for twice the time
//! elapsed since the previous discovery round:
//!
//! ```text
//! seen < now - 2 * (now - last_discovery)
//! ```
//!
//! With discovery on a fixed interval this tolerates roughly one missed round
//! before a device is expired.  The first round never expires anything.

use std::sync::Arc;
use std::time::Instant;

use lifx_core::hardware_address;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::application::device_registry::DeviceRegistry;
use crate::application::subscription_bus::{DriverEvent, SubscriptionBus};
use crate::device::{DeviceError, Light};

/// Source of the current time.  Lets tests pin `now` for the expiry threshold.
#[cfg_attr(test, mockall::automock)]
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

/// The monotonic system clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Returns `true` when a device last seen at `seen` should be expired.
///
/// The comparison is strict; a threshold that would fall before the clock's
/// representable range expires nothing.
pub fn is_extinct(seen: Instant, last_discovery: Instant, now: Instant) -> bool {
    let since = now.saturating_duration_since(last_discovery);
    match since.checked_mul(2).and_then(|window| now.checked_sub(window)) {
        Some(threshold) => seen < threshold,
        None => false,
    }
}

/// Remembers when the last discovery round ran.
pub struct DiscoveryCoordinator {
    last_discovery: Mutex<Option<Instant>>,
    clock: Box<dyn Clock>,
}

impl DiscoveryCoordinator {
    pub fn new(clock: Box<dyn Clock>) -> Self {
        Self {
            last_discovery: Mutex::new(None),
            clock,
        }
    }

    pub async fn last_discovery(&self) -> Option<Instant> {
        *self.last_discovery.lock().await
    }

    /// Runs one discovery round.
    ///
    /// Extinct devices are removed and announced as `ExpiredDevice`; a failed
    /// announcement is logged and the round carries on.  The broadcast result
    /// is returned, and the round is recorded even when the broadcast fails.
    pub async fn discover(
        &self,
        registry: &DeviceRegistry,
        bus: &SubscriptionBus,
        broadcast: &Arc<Light>,
    ) -> Result<(), DeviceError> {
        if let Some(last) = self.last_discovery().await {
            let now = self.clock.now();
            let mut extinct = Vec::new();
            for handle in registry.snapshot().await {
                if is_extinct(handle.seen().await, last, now) {
                    extinct.push(handle);
                }
            }

            for handle in extinct {
                registry.remove(handle.id()).await;
                info!(device = %hardware_address(handle.id()), "device expired");
                if let Err(e) = bus.publish(DriverEvent::ExpiredDevice(handle.clone())).await {
                    warn!(device = %hardware_address(handle.id()), "could not publish expired device: {e}");
                }
            }
        }

        let sent = broadcast.device().discover().await;
        *self.last_discovery.lock().await = Some(self.clock.now());
        debug!(devices = registry.len().await, "discovery broadcast sent");
        sent
    }
}
