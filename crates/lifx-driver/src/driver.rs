//! The protocol driver: the public face of the crate.
//!
//! A [`ProtocolDriver`] owns one UDP socket, the broadcast pseudo-device used
//! for discovery and whole-network commands, the device registry and the
//! subscription bus.  All of it is created lazily on first use:
//!
//! ```text
//! subscribe / discover / set_power / ...
//!        │
//!        ▼
//!   runtime() ── read lock: initialised? ──yes──► use it
//!        │no
//!        ▼
//!   write lock: re-check ──► bind socket ──► spawn dispatch loop
//! ```
//!
//! A failed bind leaves the driver uninitialised so a later call can retry.
//! [`ProtocolDriver::close`] takes the runtime out of its slot, signals the
//! dispatch loop exactly once and waits for it to close every registered
//! device.  The socket is released when the last device lets go of it.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use lifx_core::protocol::messages::{DEFAULT_PORT, MAX_DATAGRAM_SIZE};
use lifx_core::{Color, DeviceId};
use thiserror::Error;
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, oneshot, watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::application::device_registry::DeviceRegistry;
use crate::application::discover_devices::{DiscoveryCoordinator, SystemClock};
use crate::application::route_packet::PacketRouter;
use crate::application::subscription_bus::{BusError, Subscription, SubscriptionBus};
use crate::device::{ClientTimeouts, Device, DeviceContext, DeviceError, DeviceHandle, Light};
use crate::infrastructure::network::dispatch::{DispatchError, DispatchLoop, ERROR_CHANNEL_CAPACITY};

/// Error type for driver operations.
#[derive(Debug, Error)]
pub enum DriverError {
    /// The socket could not be bound.  The driver stays uninitialised.
    #[error("failed to initialise driver on {addr}: {source}")]
    Initialization {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },
    #[error("subscription {0} not found")]
    SubscriptionNotFound(Uuid),
    #[error("no registered device with id {0:#x}")]
    DeviceNotFound(DeviceId),
    /// `close` was called before anything initialised the driver.
    #[error("driver is not initialised")]
    NotInitialized,
    #[error("driver is already closed")]
    AlreadyClosed,
    #[error(transparent)]
    Device(#[from] DeviceError),
    #[error("failed to publish event: {0}")]
    Publish(#[source] BusError),
}

impl From<BusError> for DriverError {
    fn from(err: BusError) -> Self {
        match err {
            BusError::NotFound(id) => DriverError::SubscriptionNotFound(id),
            other => DriverError::Publish(other),
        }
    }
}

/// Runtime settings for a [`ProtocolDriver`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriverConfig {
    /// Local UDP port to bind.  `0` picks an ephemeral port.
    pub port: u16,
    /// Request acknowledgements for state-changing messages.
    pub reliable: bool,
    /// Destination of discovery and whole-network commands.
    pub broadcast_addr: IpAddr,
    pub broadcast_port: u16,
    /// Size of the receive buffer.
    pub max_datagram_size: usize,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            reliable: true,
            broadcast_addr: IpAddr::V4(Ipv4Addr::BROADCAST),
            broadcast_port: DEFAULT_PORT,
            max_datagram_size: MAX_DATAGRAM_SIZE,
        }
    }
}

/// Everything created by initialisation.
struct Runtime {
    socket: Arc<UdpSocket>,
    broadcast: Arc<Light>,
    registry: Arc<DeviceRegistry>,
    bus: Arc<SubscriptionBus>,
    discovery: DiscoveryCoordinator,
    shutdown: Mutex<Option<oneshot::Sender<()>>>,
    dispatch: Mutex<Option<JoinHandle<()>>>,
}

/// LAN protocol driver.
pub struct ProtocolDriver {
    config: DriverConfig,
    client_id: u32,
    timeouts: watch::Sender<ClientTimeouts>,
    runtime: RwLock<Option<Arc<Runtime>>>,
    closed: AtomicBool,
    errors_tx: mpsc::Sender<DispatchError>,
    errors_rx: Mutex<Option<mpsc::Receiver<DispatchError>>>,
}

impl ProtocolDriver {
    pub fn new(config: DriverConfig) -> Self {
        let (timeouts, _) = watch::channel(ClientTimeouts::default());
        let (errors_tx, errors_rx) = mpsc::channel(ERROR_CHANNEL_CAPACITY);
        Self {
            config,
            client_id: random_client_id(),
            timeouts,
            runtime: RwLock::new(None),
            closed: AtomicBool::new(false),
            errors_tx,
            errors_rx: Mutex::new(Some(errors_rx)),
        }
    }

    /// The source identifier stamped on every packet this driver sends.
    pub fn client_id(&self) -> u32 {
        self.client_id
    }

    pub fn config(&self) -> &DriverConfig {
        &self.config
    }

    /// Sets the request timeout and retry interval for devices created from
    /// now on.  Devices that already exist keep their settings.
    pub fn set_client_config(&self, request_timeout: Duration, retry_interval: Duration) {
        self.timeouts.send_replace(ClientTimeouts {
            request_timeout,
            retry_interval,
        });
    }

    /// Takes the receiving end of the dispatch error channel.  Returns `None`
    /// after the first call.
    pub async fn errors(&self) -> Option<mpsc::Receiver<DispatchError>> {
        self.errors_rx.lock().await.take()
    }

    /// The local address of the driver's socket, once initialised.
    pub async fn local_addr(&self) -> Option<SocketAddr> {
        let runtime = self.runtime.read().await;
        runtime.as_ref().and_then(|rt| rt.socket.local_addr().ok())
    }

    // ── Subscriptions ─────────────────────────────────────────────────────

    pub async fn subscribe(&self) -> Result<Subscription, DriverError> {
        let rt = self.runtime().await?;
        Ok(rt.bus.subscribe().await)
    }

    /// Removes a subscription.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError::SubscriptionNotFound`] for an unknown identifier,
    /// including one that was already removed.
    pub async fn unsubscribe(&self, id: Uuid) -> Result<(), DriverError> {
        let rt = self.runtime().await?;
        Ok(rt.bus.unsubscribe(id).await?)
    }

    // ── Discovery and registry ────────────────────────────────────────────

    /// Expires silent devices, then broadcasts a discovery request.
    pub async fn discover(&self) -> Result<(), DriverError> {
        let rt = self.runtime().await?;
        rt.discovery
            .discover(&rt.registry, &rt.bus, &rt.broadcast)
            .await?;
        Ok(())
    }

    /// Snapshot of every registered device.
    pub async fn devices(&self) -> Result<Vec<DeviceHandle>, DriverError> {
        let rt = self.runtime().await?;
        Ok(rt.registry.snapshot().await)
    }

    pub async fn device(&self, id: DeviceId) -> Result<DeviceHandle, DriverError> {
        let rt = self.runtime().await?;
        rt.registry
            .get(id)
            .await
            .ok_or(DriverError::DeviceNotFound(id))
    }

    // ── Whole-network commands ────────────────────────────────────────────

    /// Switches every reachable device on or off.
    pub async fn set_power(&self, on: bool) -> Result<(), DriverError> {
        let rt = self.runtime().await?;
        Ok(rt.broadcast.device().set_power(on).await?)
    }

    pub async fn set_power_duration(&self, on: bool, duration: Duration) -> Result<(), DriverError> {
        let rt = self.runtime().await?;
        Ok(rt.broadcast.set_power_duration(on, duration).await?)
    }

    /// Sets every reachable light to `color` over `duration`.
    pub async fn set_color(&self, color: Color, duration: Duration) -> Result<(), DriverError> {
        let rt = self.runtime().await?;
        Ok(rt.broadcast.set_color(color, duration).await?)
    }

    // ── Lifecycle ─────────────────────────────────────────────────────────

    /// Shuts the driver down.
    ///
    /// Returns only after the dispatch loop has stopped and every registered
    /// device, and the broadcast device, has been closed.  By then the local
    /// port is free again unless the caller still has a request in flight.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError::NotInitialized`] if nothing has initialised the
    /// driver yet, and [`DriverError::AlreadyClosed`] on every call after the
    /// first.
    pub async fn close(&self) -> Result<(), DriverError> {
        let rt = {
            let mut slot = self.runtime.write().await;
            if self.is_closed() {
                return Err(DriverError::AlreadyClosed);
            }
            let rt = slot.take().ok_or(DriverError::NotInitialized)?;
            self.closed.store(true, Ordering::SeqCst);
            rt
        };

        if let Some(tx) = rt.shutdown.lock().await.take() {
            // The loop may already have stopped on a socket error.
            let _ = tx.send(());
        }
        if let Some(task) = rt.dispatch.lock().await.take() {
            if let Err(e) = task.await {
                warn!("dispatch loop ended abnormally: {e}");
            }
        }
        if let Err(e) = rt.broadcast.device().close().await {
            debug!("broadcast device close failed: {e}");
        }
        info!(client_id = self.client_id, "driver closed");
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Returns the runtime, initialising it on first use.
    async fn runtime(&self) -> Result<Arc<Runtime>, DriverError> {
        if self.is_closed() {
            return Err(DriverError::AlreadyClosed);
        }
        if let Some(rt) = self.runtime.read().await.as_ref() {
            return Ok(Arc::clone(rt));
        }

        let mut slot = self.runtime.write().await;
        if self.is_closed() {
            return Err(DriverError::AlreadyClosed);
        }
        if let Some(rt) = slot.as_ref() {
            return Ok(Arc::clone(rt));
        }
        let rt = Arc::new(self.start().await?);
        *slot = Some(Arc::clone(&rt));
        Ok(rt)
    }

    async fn start(&self) -> Result<Runtime, DriverError> {
        let addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), self.config.port);
        let socket = UdpSocket::bind(addr)
            .await
            .and_then(|socket| socket.set_broadcast(true).map(|()| socket))
            .map_err(|source| DriverError::Initialization { addr, source })?;
        let socket = Arc::new(socket);

        let ctx = DeviceContext::new(
            Arc::clone(&socket),
            self.client_id,
            self.config.reliable,
            self.timeouts.subscribe(),
        );
        let broadcast_addr = SocketAddr::new(self.config.broadcast_addr, self.config.broadcast_port);
        let broadcast = Arc::new(Light::new(Arc::new(Device::new(
            0,
            broadcast_addr,
            &ctx.unreliable(),
        ))));

        let registry = Arc::new(DeviceRegistry::new());
        let bus = Arc::new(SubscriptionBus::new());
        let router = Arc::new(PacketRouter::new(
            Arc::clone(&registry),
            Arc::clone(&bus),
            ctx,
        ));

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let dispatch = DispatchLoop::new(
            Arc::clone(&socket),
            router,
            Arc::clone(&registry),
            self.errors_tx.clone(),
            self.config.max_datagram_size,
        );
        let task = tokio::spawn(dispatch.run(shutdown_rx));

        info!(
            local = ?socket.local_addr().ok(),
            broadcast = %broadcast_addr,
            client_id = self.client_id,
            reliable = self.config.reliable,
            "driver initialised"
        );

        Ok(Runtime {
            socket,
            broadcast,
            registry,
            bus,
            discovery: DiscoveryCoordinator::new(Box::new(SystemClock)),
            shutdown: Mutex::new(Some(shutdown_tx)),
            dispatch: Mutex::new(Some(task)),
        })
    }
}

impl Default for ProtocolDriver {
    fn default() -> Self {
        Self::new(DriverConfig::default())
    }
}

/// A random source identifier.  Zero is avoided because bulbs treat a zero
/// source as a request for broadcast replies.
fn random_client_id() -> u32 {
    match Uuid::new_v4().as_u128() as u32 {
        0 => 1,
        id => id,
    }
}
