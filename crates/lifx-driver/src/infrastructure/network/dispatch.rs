//! The dispatch loop: sole reader of the driver's UDP socket.
//!
//! ```text
//! socket ──► recv_from ──► decode_packet ──► routes.spawn(router.route)
//!                │               │
//!                │               └─ error: report, keep reading
//!                └─ error: report, close devices, stop
//! ```
//!
//! Each decoded packet is routed on its own task, so a slow registration
//! (which waits on a `GetVersion` reply) never stalls the reader that has to
//! deliver that very reply.  Route tasks live in a [`JoinSet`] owned by the
//! loop: finished ones are reaped as they complete and a panic is logged.
//!
//! Shutdown is a one-shot signal checked before every read and raced against
//! the read itself, so an idle socket does not delay it.  On the way out the
//! loop aborts in-flight routes, then empties the registry and closes every
//! device.  Once `run` returns nothing it created still holds the socket.

use std::net::SocketAddr;
use std::sync::Arc;

use lifx_core::{decode_packet, ProtocolError};
use thiserror::Error;
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, oneshot};
use tokio::task::{JoinError, JoinSet};
use tracing::{debug, error, info, warn};

use crate::application::device_registry::DeviceRegistry;
use crate::application::route_packet::PacketRouter;

/// Capacity of the dispatch error channel.  Errors beyond it are logged only.
pub const ERROR_CHANNEL_CAPACITY: usize = 32;

/// A failure observed by the dispatch loop.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// Reading from the socket failed.  The loop stops after reporting this.
    #[error("failed reading from socket: {0}")]
    Read(#[source] std::io::Error),
    /// A datagram could not be decoded.  The loop keeps running.
    #[error("failed decoding datagram from {from}: {source}")]
    Decode {
        from: SocketAddr,
        #[source]
        source: ProtocolError,
    },
}

pub struct DispatchLoop {
    socket: Arc<UdpSocket>,
    router: Arc<PacketRouter>,
    registry: Arc<DeviceRegistry>,
    errors: mpsc::Sender<DispatchError>,
    max_datagram_size: usize,
}

impl DispatchLoop {
    pub fn new(
        socket: Arc<UdpSocket>,
        router: Arc<PacketRouter>,
        registry: Arc<DeviceRegistry>,
        errors: mpsc::Sender<DispatchError>,
        max_datagram_size: usize,
    ) -> Self {
        Self {
            socket,
            router,
            registry,
            errors,
            max_datagram_size,
        }
    }

    /// Reads until `shutdown` fires (or its sender is dropped) or the socket
    /// fails, then closes every registered device.
    pub async fn run(self, mut shutdown: oneshot::Receiver<()>) {
        let mut buf = vec![0u8; self.max_datagram_size];
        let mut routes = JoinSet::new();
        info!(
            addr = ?self.socket.local_addr().ok(),
            "dispatch loop started"
        );

        loop {
            tokio::select! {
                biased;
                _ = &mut shutdown => {
                    debug!("shutdown signalled");
                    break;
                }
                Some(done) = routes.join_next(), if !routes.is_empty() => {
                    reap(done);
                }
                received = self.socket.recv_from(&mut buf) => match received {
                    Ok((len, from)) => match decode_packet(&buf[..len]) {
                        Ok(packet) => {
                            let router = Arc::clone(&self.router);
                            routes.spawn(async move { router.route(packet, from).await });
                        }
                        Err(source) => {
                            debug!(%from, len, "undecodable datagram: {source}");
                            self.report(DispatchError::Decode { from, source });
                        }
                    },
                    Err(e) => {
                        error!("socket read failed: {e}");
                        self.report(DispatchError::Read(e));
                        break;
                    }
                },
            }
        }

        // A route still registering must not insert after the registry is emptied.
        routes.abort_all();
        while let Some(done) = routes.join_next().await {
            reap(done);
        }
        self.registry.close_all().await;
        info!("dispatch loop stopped");
    }

    fn report(&self, err: DispatchError) {
        if let Err(e) = self.errors.try_send(err) {
            warn!("dropping dispatch error: {e}");
        }
    }
}

fn reap(done: Result<(), JoinError>) {
    match done {
        Ok(()) => {}
        Err(e) if e.is_cancelled() => debug!("route task aborted by shutdown"),
        Err(e) => error!("route task failed: {e}"),
    }
}
