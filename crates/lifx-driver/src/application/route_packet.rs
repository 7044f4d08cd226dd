//! RoutePacket: decides what each inbound packet means.
//!
//! Runs once per datagram, concurrently with other packets.  Three cases:
//!
//! - **Foreign source** – another controller on the LAN changed something.
//!   Power, label and full light state updates are applied to known devices;
//!   everything else is ignored.
//! - **Own source, `StateService`** – a discovery reply.  Unknown devices are
//!   registered; known lights get a state refresh.
//! - **Own source, anything else** – a reply to a request one of our devices
//!   made, handed to that device for correlation.
//!
//! Before any of that, a packet whose target is a known device refreshes the
//! device's "last seen" time.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use lifx_core::{hardware_address, MessageType, Packet};
use tracing::{debug, error, trace};

use crate::application::device_registry::DeviceRegistry;
use crate::application::subscription_bus::SubscriptionBus;
use crate::device::{Device, DeviceContext};

pub struct PacketRouter {
    client_id: u32,
    registry: Arc<DeviceRegistry>,
    bus: Arc<SubscriptionBus>,
    ctx: DeviceContext,
}

impl PacketRouter {
    pub fn new(
        registry: Arc<DeviceRegistry>,
        bus: Arc<SubscriptionBus>,
        ctx: DeviceContext,
    ) -> Self {
        Self {
            client_id: ctx.source(),
            registry,
            bus,
            ctx,
        }
    }

    pub async fn route(&self, packet: Packet, from: SocketAddr) {
        trace!(
            %from,
            source = packet.source,
            kind = packet.kind,
            sequence = packet.sequence,
            target = %hardware_address(packet.target),
            tagged = packet.tagged,
            "routing packet"
        );

        if packet.target != 0 {
            if let Some(handle) = self.registry.get(packet.target).await {
                handle.set_seen(Instant::now()).await;
            }
        }

        if packet.source != self.client_id {
            self.route_foreign(&packet).await;
        } else if packet.message_type() == Some(MessageType::StateService) {
            self.route_announcement(&packet, from).await;
        } else {
            self.route_response(&packet).await;
        }
    }

    async fn route_foreign(&self, packet: &Packet) {
        let kind = packet.message_type();
        if !matches!(
            kind,
            Some(MessageType::StatePower | MessageType::StateLabel | MessageType::LightState)
        ) {
            debug!(source = packet.source, kind = packet.kind, "skipping packet with foreign source");
            return;
        }
        let Some(handle) = self.registry.get(packet.target).await else {
            debug!(
                target = %hardware_address(packet.target),
                kind = packet.kind,
                "skipping state for unknown device"
            );
            return;
        };

        let applied = match kind {
            Some(MessageType::StatePower) => handle.device().set_state_power(packet).await,
            Some(MessageType::StateLabel) => handle.device().set_state_label(packet).await,
            _ => match handle.as_light() {
                Some(light) => light.set_state(packet).await,
                None => {
                    debug!(device = %hardware_address(handle.id()), "skipping light state for non-light device");
                    return;
                }
            },
        };
        if let Err(e) = applied {
            debug!(device = %hardware_address(handle.id()), "could not apply foreign state: {e}");
        }
    }

    async fn route_announcement(&self, packet: &Packet, from: SocketAddr) {
        match self.registry.get(packet.target).await {
            None => match Device::from_service_announcement(packet, from, &self.ctx) {
                Ok(device) => self.registry.add(Arc::new(device), &self.bus).await,
                Err(e) => error!(%from, "could not create device: {e}"),
            },
            Some(handle) => {
                if let Some(light) = handle.as_light() {
                    if let Err(e) = light.get().await {
                        debug!(device = %hardware_address(handle.id()), "could not request light state: {e}");
                    }
                }
            }
        }
    }

    async fn route_response(&self, packet: &Packet) {
        if packet.target == 0 {
            debug!(kind = packet.kind, "skipping packet without target");
            return;
        }
        match self.registry.get(packet.target).await {
            Some(handle) => handle.handle(packet).await,
            None => error!(target = %hardware_address(packet.target), "no known device with this target"),
        }
    }
}
