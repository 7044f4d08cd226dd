//! End-to-end tests for the protocol driver over loopback UDP.
//!
//! Each test points the driver's "broadcast" at a [`FakeBulb`] bound to
//! `127.0.0.1`, so discovery, registration, request/response correlation and
//! expiry all run over a real socket and the real dispatch loop.
//!
//! ```text
//! ProtocolDriver ──GetService──► FakeBulb
//!        ▲                          │
//!        └──StateService / StateVersion / LightState / Acknowledgement
//! ```

mod support;

use std::time::Duration;

use lifx_core::protocol::messages::{POWER_OFF, SERVICE_UDP};
use lifx_core::{encode_packet, Color, Message, MessageType, Packet};
use lifx_driver::{DeviceHandle, DispatchError, DriverError, DriverEvent, Subscription};
use tokio::net::UdpSocket;
use tokio::time::timeout;
use tokio_test::{assert_err, assert_ok};

use support::{driver_addr, driver_for, eventually, FakeBulb};

async fn next_event(sub: &mut Subscription) -> DriverEvent {
    timeout(Duration::from_secs(3), sub.recv())
        .await
        .expect("no event within 3 s")
        .expect("subscription closed")
}

async fn no_event_within(sub: &mut Subscription, wait: Duration) -> bool {
    timeout(wait, sub.recv()).await.is_err()
}

// ── Discovery and registration ────────────────────────────────────────────────

#[tokio::test]
async fn test_discovery_registers_and_promotes_original_light() {
    // Arrange
    let bulb = FakeBulb::light(0x0302_01d5_73d0).await;
    let driver = driver_for(&bulb, true);
    let mut sub = assert_ok!(driver.subscribe().await);

    // Act
    assert_ok!(driver.discover().await);
    let event = next_event(&mut sub).await;

    // Assert
    let handle = match event {
        DriverEvent::NewDevice(handle) => handle,
        other => panic!("expected NewDevice, got {other:?}"),
    };
    assert_eq!(handle.id(), bulb.id);
    assert!(handle.is_light());
    assert_eq!(handle.device().addr(), bulb.addr);

    let registered = assert_ok!(driver.device(bulb.id).await);
    assert_eq!(registered, handle);
    assert_eq!(assert_ok!(driver.devices().await).len(), 1);

    // The post-promotion state request is answered and applied.
    let light = handle.as_light().unwrap();
    let expected = bulb.state().color;
    assert!(eventually(|| async move { light.color().await == Some(expected) }).await);

    driver.close().await.unwrap();
}

#[tokio::test]
async fn test_discovery_keeps_other_hardware_generic() {
    let bulb = FakeBulb::generic(0x42).await;
    let driver = driver_for(&bulb, true);
    let mut sub = driver.subscribe().await.unwrap();

    driver.discover().await.unwrap();

    match next_event(&mut sub).await {
        DriverEvent::NewDevice(DeviceHandle::Generic(device)) => assert_eq!(device.id(), 0x42),
        other => panic!("expected generic NewDevice, got {other:?}"),
    }
    assert_eq!(bulb.count(MessageType::LightGet), 0);
    driver.close().await.unwrap();
}

#[tokio::test]
async fn test_repeated_discovery_announces_device_once_and_refreshes_light() {
    // Arrange
    let bulb = FakeBulb::light(0x77).await;
    let driver = driver_for(&bulb, true);
    let mut sub = driver.subscribe().await.unwrap();
    driver.discover().await.unwrap();
    next_event(&mut sub).await;
    let gets_before = bulb.count(MessageType::LightGet);

    // Act
    driver.discover().await.unwrap();

    // Assert
    assert!(no_event_within(&mut sub, Duration::from_millis(300)).await);
    assert!(bulb.count(MessageType::LightGet) > gets_before);
    assert_eq!(driver.devices().await.unwrap().len(), 1);
    driver.close().await.unwrap();
}

// ── Request / response through the dispatch loop ──────────────────────────────

#[tokio::test]
async fn test_requests_to_registered_light_are_answered() {
    // Arrange
    let bulb = FakeBulb::light(0x99).await;
    let driver = driver_for(&bulb, true);
    let mut sub = driver.subscribe().await.unwrap();
    driver.discover().await.unwrap();
    let handle = next_event(&mut sub).await.device().clone();
    let light = handle.as_light().unwrap();

    // Act
    let color = assert_ok!(light.get_color().await);
    assert_ok!(light.device().set_label("Study").await);
    assert_ok!(light.set_power_duration(false, Duration::from_millis(250)).await);
    let label = assert_ok!(light.device().get_label().await);

    // Assert
    assert_eq!(color, Color::new(21845, 65535, 32768, 3500));
    assert_eq!(label, "Study");
    assert!(!bulb.state().power);
    assert_eq!(light.power().await, Some(false));
    driver.close().await.unwrap();
}

#[tokio::test]
async fn test_broadcast_commands_reach_every_device() {
    let bulb = FakeBulb::light(0x55).await;
    let driver = driver_for(&bulb, true);
    let target = Color::new(0, 0, 65535, 6500);

    driver.set_color(target, Duration::from_secs(1)).await.unwrap();
    driver.set_power(false).await.unwrap();

    let bulb = &bulb;
    assert!(
        eventually(|| async move {
            let state = bulb.state();
            state.color == target && !state.power
        })
        .await
    );
    driver.close().await.unwrap();
}

// ── Foreign traffic ───────────────────────────────────────────────────────────

#[tokio::test]
async fn test_foreign_state_is_applied_and_foreign_announcements_ignored() {
    // Arrange
    let bulb = FakeBulb::light(0x1234).await;
    let driver = driver_for(&bulb, false);
    let mut sub = driver.subscribe().await.unwrap();
    driver.discover().await.unwrap();
    let handle = next_event(&mut sub).await.device().clone();
    let light = handle.as_light().unwrap();
    assert!(eventually(|| async move { light.power().await == Some(true) }).await);

    let other_controller = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let to = driver_addr(&driver).await;
    let foreign = driver.client_id().wrapping_add(1).max(1);

    // Act – another app switches the bulb off, and a stranger announces itself
    let mut power = Packet::new(&Message::StatePower { level: POWER_OFF });
    power.source = foreign;
    power.target = bulb.id;
    other_controller.send_to(&encode_packet(&power), to).await.unwrap();

    let mut stranger = Packet::new(&Message::StateService {
        service: SERVICE_UDP,
        port: 56700,
    });
    stranger.source = foreign;
    stranger.target = 0xDEAD;
    other_controller.send_to(&encode_packet(&stranger), to).await.unwrap();

    // Assert
    assert!(eventually(|| async move { light.power().await == Some(false) }).await);
    assert!(no_event_within(&mut sub, Duration::from_millis(200)).await);
    assert_err!(driver.device(0xDEAD).await);
    driver.close().await.unwrap();
}

// ── Expiry ────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_silent_device_expires_after_consecutive_discoveries() {
    // Arrange
    let bulb = FakeBulb::light(0xAB).await;
    let driver = driver_for(&bulb, false);
    let mut sub = driver.subscribe().await.unwrap();
    driver.discover().await.unwrap();
    next_event(&mut sub).await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    bulb.go_silent();

    // Act – the second round only establishes the window; the third,
    // run right after, finds the device silent for twice as long
    tokio::time::sleep(Duration::from_millis(400)).await;
    driver.discover().await.unwrap();
    driver.discover().await.unwrap();

    // Assert
    match next_event(&mut sub).await {
        DriverEvent::ExpiredDevice(handle) => assert_eq!(handle.id(), bulb.id),
        other => panic!("expected ExpiredDevice, got {other:?}"),
    }
    assert!(matches!(
        driver.device(bulb.id).await,
        Err(DriverError::DeviceNotFound(_))
    ));
    driver.close().await.unwrap();
}

// ── Subscriptions, errors and shutdown ────────────────────────────────────────

#[tokio::test]
async fn test_unsubscribe_is_not_idempotent() {
    let bulb = FakeBulb::light(1).await;
    let driver = driver_for(&bulb, false);
    let sub = driver.subscribe().await.unwrap();
    let id = sub.id();

    assert_ok!(driver.unsubscribe(id).await);
    assert!(matches!(
        driver.unsubscribe(id).await,
        Err(DriverError::SubscriptionNotFound(got)) if got == id
    ));
    assert_err!(sub.close().await);
    driver.close().await.unwrap();
}

#[tokio::test]
async fn test_garbage_datagram_is_reported_without_stopping_dispatch() {
    // Arrange
    let bulb = FakeBulb::light(0xC0).await;
    let driver = driver_for(&bulb, false);
    let mut errors = driver.errors().await.expect("first take");
    let mut sub = driver.subscribe().await.unwrap();
    let noise = UdpSocket::bind("127.0.0.1:0").await.unwrap();

    // Act
    noise
        .send_to(b"definitely not a packet", driver_addr(&driver).await)
        .await
        .unwrap();
    driver.discover().await.unwrap();

    // Assert
    let reported = timeout(Duration::from_secs(2), errors.recv())
        .await
        .expect("no dispatch error reported");
    assert!(matches!(reported, Some(DispatchError::Decode { .. })));
    assert!(matches!(next_event(&mut sub).await, DriverEvent::NewDevice(_)));
    driver.close().await.unwrap();
}

#[tokio::test]
async fn test_close_tears_down_devices_and_refuses_second_close() {
    // Arrange
    let bulb = FakeBulb::light(0xF0).await;
    let driver = driver_for(&bulb, true);
    let mut sub = driver.subscribe().await.unwrap();
    driver.discover().await.unwrap();
    let handle = next_event(&mut sub).await.device().clone();

    // Act
    let first = driver.close().await;
    let second = driver.close().await;

    // Assert
    assert_ok!(first);
    assert!(matches!(second, Err(DriverError::AlreadyClosed)));
    assert!(handle.device().is_closed());
    assert!(matches!(driver.discover().await, Err(DriverError::AlreadyClosed)));
}
