//! Device objects: the per-bulb side of the protocol.
//!
//! A [`Device`] knows its own address, builds request packets stamped with the
//! driver's source identifier, and pairs replies with the requests waiting for
//! them.  Replies never arrive here directly: the driver's dispatch loop reads
//! every datagram and the packet router hands the relevant ones to
//! [`Device::handle`].
//!
//! ```text
//! caller ── request() ──► socket ──► bulb
//!    ▲                                 │
//!    └── oneshot ◄── handle() ◄── router ◄── dispatch loop
//! ```
//!
//! - [`Light`] wraps the same `Arc<Device>` and adds color state.
//! - [`DeviceHandle`] is the registry's view: one of the two variants.

pub mod handle;
pub mod light;

pub use handle::DeviceHandle;
pub use light::Light;

use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use lifx_core::protocol::messages::{power_level, POWER_OFF, SERVICE_UDP};
use lifx_core::protocol::SequenceCounter;
use lifx_core::{encode_packet, hardware_address, DeviceId, Message, MessageType, Packet, ProtocolError};
use thiserror::Error;
use tokio::net::UdpSocket;
use tokio::sync::{oneshot, watch, Mutex, RwLock};
use tokio::time;
use tracing::{debug, trace};

/// Error type for device operations.
#[derive(Debug, Error)]
pub enum DeviceError {
    /// No reply arrived before the request timeout.
    #[error("device {} did not answer {kind:?} within {timeout:?}", mac(.id))]
    Timeout {
        id: DeviceId,
        kind: MessageType,
        timeout: Duration,
    },
    /// The device was closed by driver shutdown.
    #[error("device {} is closed", mac(.0))]
    Closed(DeviceId),
    /// The shared socket refused the datagram.
    #[error("socket I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// A reply could not be decoded.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),
    /// A packet of the wrong type was applied as state.
    #[error("expected {expected:?}, got message type {got}")]
    UnexpectedMessage { expected: MessageType, got: u16 },
}

fn mac(id: &DeviceId) -> String {
    hardware_address(*id)
}

/// Request timeout and retry interval supplied by the owning client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientTimeouts {
    /// Total time a request waits for its reply.
    pub request_timeout: Duration,
    /// Interval between retransmissions while waiting.
    pub retry_interval: Duration,
}

impl Default for ClientTimeouts {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(2),
            retry_interval: Duration::from_millis(500),
        }
    }
}

/// Everything a device needs from the driver that creates it.
///
/// Timeouts are read from a watch channel when a device is constructed, so a
/// configuration change affects every device created afterwards and leaves
/// existing devices alone.
#[derive(Debug, Clone)]
pub struct DeviceContext {
    socket: Arc<UdpSocket>,
    source: u32,
    reliable: bool,
    timeouts: watch::Receiver<ClientTimeouts>,
}

impl DeviceContext {
    pub fn new(
        socket: Arc<UdpSocket>,
        source: u32,
        reliable: bool,
        timeouts: watch::Receiver<ClientTimeouts>,
    ) -> Self {
        Self {
            socket,
            source,
            reliable,
            timeouts,
        }
    }

    /// The timeouts currently configured by the owning client.
    pub fn timeouts(&self) -> ClientTimeouts {
        *self.timeouts.borrow()
    }

    pub fn source(&self) -> u32 {
        self.source
    }

    /// Returns a copy of this context with acknowledgements disabled.
    pub fn unreliable(&self) -> Self {
        Self {
            reliable: false,
            ..self.clone()
        }
    }
}

/// Hardware identification reported by `StateVersion`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HardwareVersion {
    pub vendor: u32,
    pub product: u32,
    pub version: u32,
}

#[derive(Debug, Default)]
struct DeviceState {
    power: Option<bool>,
    label: Option<String>,
    version: Option<HardwareVersion>,
}

/// A request waiting for its reply.
struct Pending {
    expected: MessageType,
    reply: oneshot::Sender<Packet>,
}

/// A single bulb reachable at a unicast (or, for the broadcast pseudo-device,
/// broadcast) address.
pub struct Device {
    id: DeviceId,
    addr: SocketAddr,
    /// Released on close so the driver's port can be rebound.
    socket: RwLock<Option<Arc<UdpSocket>>>,
    source: u32,
    reliable: bool,
    timeouts: ClientTimeouts,
    sequence: SequenceCounter,
    seen: Mutex<Instant>,
    state: RwLock<DeviceState>,
    pending: Mutex<HashMap<u8, Pending>>,
    closed: AtomicBool,
}

impl Device {
    /// Creates a device addressed at `addr`.  Target `0` addresses every device.
    pub fn new(id: DeviceId, addr: SocketAddr, ctx: &DeviceContext) -> Self {
        Self {
            id,
            addr,
            socket: RwLock::new(Some(Arc::clone(&ctx.socket))),
            source: ctx.source,
            reliable: ctx.reliable,
            timeouts: ctx.timeouts(),
            sequence: SequenceCounter::new(),
            seen: Mutex::new(Instant::now()),
            state: RwLock::new(DeviceState::default()),
            pending: Mutex::new(HashMap::new()),
            closed: AtomicBool::new(false),
        }
    }

    /// Creates a device from a `StateService` reply received from `from`.
    ///
    /// The device is addressed at the sender's IP and the UDP port it
    /// advertised, falling back to the sender's port.
    ///
    /// # Errors
    ///
    /// Returns [`DeviceError`] if the packet is not a valid `StateService`.
    pub fn from_service_announcement(
        packet: &Packet,
        from: SocketAddr,
        ctx: &DeviceContext,
    ) -> Result<Self, DeviceError> {
        let port = match packet.message()? {
            Message::StateService { service, port }
                if service == SERVICE_UDP && (1..=u16::MAX as u32).contains(&port) =>
            {
                port as u16
            }
            Message::StateService { .. } => from.port(),
            _ => {
                return Err(DeviceError::UnexpectedMessage {
                    expected: MessageType::StateService,
                    got: packet.kind,
                })
            }
        };
        Ok(Self::new(packet.target, SocketAddr::new(from.ip(), port), ctx))
    }

    pub fn id(&self) -> DeviceId {
        self.id
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// When a packet attributed to this device was last processed.
    pub async fn seen(&self) -> Instant {
        *self.seen.lock().await
    }

    pub async fn set_seen(&self, at: Instant) {
        *self.seen.lock().await = at;
    }

    /// Cached power state, if known.
    pub async fn power(&self) -> Option<bool> {
        self.state.read().await.power
    }

    /// Cached label, if known.
    pub async fn label(&self) -> Option<String> {
        self.state.read().await.label.clone()
    }

    // ── Hardware identification ───────────────────────────────────────────

    /// Returns the hardware version, querying the device on first use.
    ///
    /// # Errors
    ///
    /// Returns [`DeviceError::Timeout`] if the device does not answer.
    pub async fn hardware_version(&self) -> Result<HardwareVersion, DeviceError> {
        if let Some(version) = self.state.read().await.version {
            return Ok(version);
        }
        let reply = self.request(&Message::GetVersion).await?;
        self.apply_version(&reply).await
    }

    pub async fn hardware_vendor(&self) -> Result<u32, DeviceError> {
        Ok(self.hardware_version().await?.vendor)
    }

    pub async fn hardware_product(&self) -> Result<u32, DeviceError> {
        Ok(self.hardware_version().await?.product)
    }

    // ── Power and label ───────────────────────────────────────────────────

    /// Queries the current power state.
    pub async fn get_power(&self) -> Result<bool, DeviceError> {
        let reply = self.request(&Message::GetPower).await?;
        self.set_state_power(&reply).await?;
        Ok(self.power().await.unwrap_or(false))
    }

    pub async fn set_power(&self, on: bool) -> Result<(), DeviceError> {
        self.send(&Message::SetPower {
            level: power_level(on),
        })
        .await?;
        self.store_power(on).await;
        Ok(())
    }

    /// Queries the current label.
    pub async fn get_label(&self) -> Result<String, DeviceError> {
        let reply = self.request(&Message::GetLabel).await?;
        self.set_state_label(&reply).await?;
        Ok(self.label().await.unwrap_or_default())
    }

    pub async fn set_label(&self, label: &str) -> Result<(), DeviceError> {
        self.send(&Message::SetLabel {
            label: label.to_string(),
        })
        .await?;
        self.store_label(label.to_string()).await;
        Ok(())
    }

    /// Applies a `StatePower` (or `LightStatePower`) packet to the cached state.
    ///
    /// # Errors
    ///
    /// Returns [`DeviceError`] for other message types or malformed payloads.
    pub async fn set_state_power(&self, packet: &Packet) -> Result<(), DeviceError> {
        match packet.message()? {
            Message::StatePower { level } | Message::LightStatePower { level } => {
                self.store_power(level != POWER_OFF).await;
                Ok(())
            }
            _ => Err(DeviceError::UnexpectedMessage {
                expected: MessageType::StatePower,
                got: packet.kind,
            }),
        }
    }

    /// Applies a `StateLabel` packet to the cached state.
    ///
    /// # Errors
    ///
    /// Returns [`DeviceError`] for other message types or malformed payloads.
    pub async fn set_state_label(&self, packet: &Packet) -> Result<(), DeviceError> {
        match packet.message()? {
            Message::StateLabel { label } => {
                self.store_label(label).await;
                Ok(())
            }
            _ => Err(DeviceError::UnexpectedMessage {
                expected: MessageType::StateLabel,
                got: packet.kind,
            }),
        }
    }

    pub(crate) async fn store_power(&self, on: bool) {
        self.state.write().await.power = Some(on);
    }

    pub(crate) async fn store_label(&self, label: String) {
        self.state.write().await.label = Some(label);
    }

    async fn apply_version(&self, packet: &Packet) -> Result<HardwareVersion, DeviceError> {
        match packet.message()? {
            Message::StateVersion {
                vendor,
                product,
                version,
            } => {
                let hw = HardwareVersion {
                    vendor,
                    product,
                    version,
                };
                self.state.write().await.version = Some(hw);
                Ok(hw)
            }
            _ => Err(DeviceError::UnexpectedMessage {
                expected: MessageType::StateVersion,
                got: packet.kind,
            }),
        }
    }

    // ── Inbound ───────────────────────────────────────────────────────────

    /// Handles a reply routed to this device.
    ///
    /// State carried by the packet refreshes the cache; a request waiting on
    /// the packet's sequence number for this message type is then completed.
    pub async fn handle(&self, packet: &Packet) {
        let refreshed = match packet.message_type() {
            Some(MessageType::StatePower) => self.set_state_power(packet).await,
            Some(MessageType::StateLabel) => self.set_state_label(packet).await,
            Some(MessageType::StateVersion) => self.apply_version(packet).await.map(|_| ()),
            _ => Ok(()),
        };
        if let Err(e) = refreshed {
            debug!(device = %hardware_address(self.id), "ignoring unusable state: {e}");
        }

        let waiter = {
            let mut pending = self.pending.lock().await;
            let expected = pending
                .get(&packet.sequence)
                .is_some_and(|p| p.expected as u16 == packet.kind);
            if expected {
                pending.remove(&packet.sequence)
            } else {
                None
            }
        };
        match waiter {
            Some(p) => {
                // The requester may have timed out in the meantime.
                let _ = p.reply.send(packet.clone());
            }
            None => trace!(
                device = %hardware_address(self.id),
                sequence = packet.sequence,
                kind = packet.kind,
                "no request waiting for packet"
            ),
        }
    }

    // ── Outbound ──────────────────────────────────────────────────────────

    /// Broadcasts a `GetService` discovery request.  Replies arrive through
    /// the dispatch loop as `StateService` packets.
    pub async fn discover(&self) -> Result<(), DeviceError> {
        let mut packet = self.build(&Message::GetService);
        packet.res_required = true;
        self.transmit(&packet).await
    }

    /// Sends `message`, waiting for an acknowledgement when the driver is
    /// configured as reliable.
    pub async fn send(&self, message: &Message) -> Result<(), DeviceError> {
        let mut packet = self.build(message);
        if self.reliable {
            packet.ack_required = true;
            self.exchange(packet, MessageType::Acknowledgement).await?;
            Ok(())
        } else {
            self.transmit(&packet).await
        }
    }

    /// Sends `message` with a response requested but does not wait for it.
    pub async fn send_detached(&self, message: &Message) -> Result<(), DeviceError> {
        let mut packet = self.build(message);
        packet.res_required = true;
        self.transmit(&packet).await
    }

    /// Sends a query and waits for its response.
    ///
    /// # Errors
    ///
    /// Returns [`DeviceError::Timeout`] if no response arrives in time.
    pub async fn request(&self, message: &Message) -> Result<Packet, DeviceError> {
        let expected = message.response_type().unwrap_or(MessageType::Acknowledgement);
        let mut packet = self.build(message);
        if expected == MessageType::Acknowledgement {
            packet.ack_required = true;
        } else {
            packet.res_required = true;
        }
        self.exchange(packet, expected).await
    }

    /// Marks the device closed, fails every request still waiting and drops
    /// the device's reference to the shared socket.
    ///
    /// # Errors
    ///
    /// Returns [`DeviceError::Closed`] if the device was already closed.
    pub async fn close(&self) -> Result<(), DeviceError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Err(DeviceError::Closed(self.id));
        }
        // Dropping the senders wakes every waiter with a closed error.
        self.pending.lock().await.clear();
        self.socket.write().await.take();
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn build(&self, message: &Message) -> Packet {
        let mut packet = Packet::new(message);
        packet.source = self.source;
        packet.target = self.id;
        packet.tagged = self.id == 0;
        packet.sequence = self.sequence.next();
        packet
    }

    async fn transmit(&self, packet: &Packet) -> Result<(), DeviceError> {
        if self.is_closed() {
            return Err(DeviceError::Closed(self.id));
        }
        let socket = self
            .socket
            .read()
            .await
            .clone()
            .ok_or(DeviceError::Closed(self.id))?;
        let bytes = encode_packet(packet);
        socket.send_to(&bytes, self.addr).await?;
        trace!(
            device = %hardware_address(self.id),
            addr = %self.addr,
            kind = packet.kind,
            sequence = packet.sequence,
            "sent packet"
        );
        Ok(())
    }

    /// Transmits `packet` and waits for a reply of type `expected`,
    /// retransmitting every retry interval until the request timeout.
    async fn exchange(&self, packet: Packet, expected: MessageType) -> Result<Packet, DeviceError> {
        let (tx, mut rx) = oneshot::channel();
        self.pending.lock().await.insert(
            packet.sequence,
            Pending {
                expected,
                reply: tx,
            },
        );

        let timeouts = self.timeouts;
        let interval = if timeouts.retry_interval.is_zero() {
            timeouts.request_timeout
        } else {
            timeouts.retry_interval
        };
        let deadline = Instant::now() + timeouts.request_timeout;

        let result = loop {
            if let Err(e) = self.transmit(&packet).await {
                break Err(e);
            }
            let wait = interval.min(deadline.saturating_duration_since(Instant::now()));
            match time::timeout(wait, &mut rx).await {
                Ok(Ok(reply)) => break Ok(reply),
                Ok(Err(_)) => break Err(DeviceError::Closed(self.id)),
                Err(_) if Instant::now() >= deadline => {
                    break Err(DeviceError::Timeout {
                        id: self.id,
                        kind: expected,
                        timeout: timeouts.request_timeout,
                    })
                }
                Err(_) => debug!(
                    device = %hardware_address(self.id),
                    sequence = packet.sequence,
                    "no reply yet, retransmitting"
                ),
            }
        };

        self.pending.lock().await.remove(&packet.sequence);
        result
    }
}

impl fmt::Debug for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Device")
            .field("id", &hardware_address(self.id))
            .field("addr", &self.addr)
            .field("reliable", &self.reliable)
            .finish()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
