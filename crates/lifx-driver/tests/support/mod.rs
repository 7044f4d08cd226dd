//! Loopback test double for a bulb.
//!
//! `FakeBulb` binds `127.0.0.1:0` and answers the subset of the protocol the
//! driver speaks, echoing the requester's source and sequence like real
//! hardware.  Every message type it receives is recorded so tests can assert
//! on what the driver sent.

#![allow(dead_code)]

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use lifx_core::protocol::messages::{power_level, MAX_DATAGRAM_SIZE, POWER_OFF, SERVICE_UDP};
use lifx_core::{decode_packet, encode_packet, Color, Message, MessageType, Packet};
use lifx_driver::{DriverConfig, ProtocolDriver};
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;

#[derive(Debug, Clone)]
pub struct BulbState {
    pub power: bool,
    pub label: String,
    pub color: Color,
}

pub struct FakeBulb {
    pub id: u64,
    pub addr: SocketAddr,
    pub state: Arc<Mutex<BulbState>>,
    received: Arc<Mutex<Vec<MessageType>>>,
    silent: Arc<AtomicBool>,
    task: JoinHandle<()>,
}

impl FakeBulb {
    /// An original-model light (vendor 1, product 1).
    pub async fn light(id: u64) -> Self {
        Self::start(id, 1, 1).await
    }

    /// A device that is not an original-model light.
    pub async fn generic(id: u64) -> Self {
        Self::start(id, 1, 22).await
    }

    pub async fn start(id: u64, vendor: u32, product: u32) -> Self {
        let socket = UdpSocket::bind("127.0.0.1:0").await.expect("bind fake bulb");
        let addr = socket.local_addr().expect("local addr");
        let state = Arc::new(Mutex::new(BulbState {
            power: true,
            label: format!("bulb-{id}"),
            color: Color::new(21845, 65535, 32768, 3500),
        }));
        let received = Arc::new(Mutex::new(Vec::new()));
        let silent = Arc::new(AtomicBool::new(false));

        let task = tokio::spawn(serve(
            socket,
            id,
            vendor,
            product,
            Arc::clone(&state),
            Arc::clone(&received),
            Arc::clone(&silent),
        ));

        Self {
            id,
            addr,
            state,
            received,
            silent,
            task,
        }
    }

    /// Stops answering, as if the bulb lost power.
    pub fn go_silent(&self) {
        self.silent.store(true, Ordering::SeqCst);
    }

    pub fn received(&self) -> Vec<MessageType> {
        self.received.lock().unwrap().clone()
    }

    pub fn count(&self, kind: MessageType) -> usize {
        self.received().iter().filter(|k| **k == kind).count()
    }

    pub fn state(&self) -> BulbState {
        self.state.lock().unwrap().clone()
    }
}

impl Drop for FakeBulb {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn serve(
    socket: UdpSocket,
    id: u64,
    vendor: u32,
    product: u32,
    state: Arc<Mutex<BulbState>>,
    received: Arc<Mutex<Vec<MessageType>>>,
    silent: Arc<AtomicBool>,
) {
    let port = socket.local_addr().map(|a| a.port()).unwrap_or_default();
    let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];
    loop {
        let Ok((len, from)) = socket.recv_from(&mut buf).await else {
            return;
        };
        let Ok(request) = decode_packet(&buf[..len]) else {
            continue;
        };
        let Ok(message) = request.message() else {
            continue;
        };
        received.lock().unwrap().push(message.message_type());
        if silent.load(Ordering::SeqCst) {
            continue;
        }

        let mut replies = Vec::new();
        if request.ack_required {
            replies.push(Message::Acknowledgement);
        }
        {
            let mut s = state.lock().unwrap();
            match message {
                Message::GetService => replies.push(Message::StateService {
                    service: SERVICE_UDP,
                    port: port as u32,
                }),
                Message::GetVersion => replies.push(Message::StateVersion {
                    vendor,
                    product,
                    version: 0,
                }),
                Message::GetPower => replies.push(Message::StatePower {
                    level: power_level(s.power),
                }),
                Message::GetLabel => replies.push(Message::StateLabel {
                    label: s.label.clone(),
                }),
                Message::LightGet => replies.push(Message::LightState {
                    color: s.color,
                    power: power_level(s.power),
                    label: s.label.clone(),
                }),
                Message::SetPower { level } | Message::LightSetPower { level, .. } => {
                    s.power = level != POWER_OFF;
                }
                Message::SetLabel { label } => s.label = label,
                Message::LightSetColor { color, .. } => s.color = color,
                _ => {}
            }
        }

        for reply in replies {
            let mut packet = Packet::new(&reply);
            packet.source = request.source;
            packet.sequence = request.sequence;
            packet.target = id;
            let _ = socket.send_to(&encode_packet(&packet), from).await;
        }
    }
}

/// Short timeouts so failure paths finish quickly.
pub const REQUEST_TIMEOUT: Duration = Duration::from_millis(500);
pub const RETRY_INTERVAL: Duration = Duration::from_millis(100);

/// A driver on an ephemeral port whose "broadcast" goes to `bulb` only.
pub fn driver_for(bulb: &FakeBulb, reliable: bool) -> ProtocolDriver {
    let driver = ProtocolDriver::new(DriverConfig {
        port: 0,
        reliable,
        broadcast_addr: IpAddr::V4(Ipv4Addr::LOCALHOST),
        broadcast_port: bulb.addr.port(),
        ..DriverConfig::default()
    });
    driver.set_client_config(REQUEST_TIMEOUT, RETRY_INTERVAL);
    driver
}

/// The loopback address of an initialised driver's socket.
pub async fn driver_addr(driver: &ProtocolDriver) -> SocketAddr {
    let local = driver.local_addr().await.expect("driver initialised");
    SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), local.port())
}

/// Polls `check` until it holds or two seconds pass.
pub async fn eventually<F, Fut>(mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while tokio::time::Instant::now() < deadline {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}
