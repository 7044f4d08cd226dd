//! Light capability layered over a [`Device`].

use std::sync::Arc;
use std::time::Duration;

use lifx_core::protocol::messages::{power_level, POWER_OFF};
use lifx_core::{hardware_address, Color, DeviceId, Message, MessageType, Packet};
use tokio::sync::RwLock;

use super::{Device, DeviceError};

/// A device known to accept light messages.
///
/// Promotion from a generic device wraps the very same `Arc<Device>`, so the
/// sequence counter, pending requests and cached power/label carry over.
#[derive(Debug)]
pub struct Light {
    device: Arc<Device>,
    color: RwLock<Option<Color>>,
}

impl Light {
    pub fn new(device: Arc<Device>) -> Self {
        Self {
            device,
            color: RwLock::new(None),
        }
    }

    pub fn id(&self) -> DeviceId {
        self.device.id()
    }

    pub fn device(&self) -> &Arc<Device> {
        &self.device
    }

    /// Cached color, if known.
    pub async fn color(&self) -> Option<Color> {
        *self.color.read().await
    }

    /// Cached power state, if known.
    pub async fn power(&self) -> Option<bool> {
        self.device.power().await
    }

    /// Requests the full light state without waiting for it.
    ///
    /// The `LightState` reply is applied by [`Light::handle`] when the
    /// dispatch loop routes it here.
    pub async fn get(&self) -> Result<(), DeviceError> {
        self.device.send_detached(&Message::LightGet).await
    }

    /// Queries the light state and returns the current color.
    pub async fn get_color(&self) -> Result<Color, DeviceError> {
        let reply = self.device.request(&Message::LightGet).await?;
        self.set_state(&reply).await?;
        self.color().await.ok_or(DeviceError::UnexpectedMessage {
            expected: MessageType::LightState,
            got: reply.kind,
        })
    }

    /// Transitions to `color` over `duration`.
    pub async fn set_color(&self, color: Color, duration: Duration) -> Result<(), DeviceError> {
        self.device
            .send(&Message::LightSetColor {
                color,
                duration_ms: duration_ms(duration),
            })
            .await?;
        *self.color.write().await = Some(color);
        Ok(())
    }

    /// Switches power over `duration`.
    pub async fn set_power_duration(&self, on: bool, duration: Duration) -> Result<(), DeviceError> {
        self.device
            .send(&Message::LightSetPower {
                level: power_level(on),
                duration_ms: duration_ms(duration),
            })
            .await?;
        self.device.store_power(on).await;
        Ok(())
    }

    /// Applies a `LightState` packet: color, power and label.
    ///
    /// # Errors
    ///
    /// Returns [`DeviceError`] for other message types or malformed payloads.
    pub async fn set_state(&self, packet: &Packet) -> Result<(), DeviceError> {
        match packet.message()? {
            Message::LightState {
                color,
                power,
                label,
            } => {
                *self.color.write().await = Some(color);
                self.device.store_power(power != POWER_OFF).await;
                self.device.store_label(label).await;
                Ok(())
            }
            _ => Err(DeviceError::UnexpectedMessage {
                expected: MessageType::LightState,
                got: packet.kind,
            }),
        }
    }

    /// Applies light-specific state, then lets the device complete any
    /// request waiting on the packet.
    pub async fn handle(&self, packet: &Packet) {
        let applied = match packet.message_type() {
            Some(MessageType::LightState) => self.set_state(packet).await,
            Some(MessageType::LightStatePower) => self.device.set_state_power(packet).await,
            _ => Ok(()),
        };
        if let Err(e) = applied {
            tracing::debug!(device = %hardware_address(self.id()), "ignoring unusable light state: {e}");
        }
        self.device.handle(packet).await;
    }
}

fn duration_ms(duration: Duration) -> u32 {
    u32::try_from(duration.as_millis()).unwrap_or(u32::MAX)
}
