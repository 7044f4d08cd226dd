//! SubscriptionBus: delivers device lifecycle events to subscribers.
//!
//! Each subscriber owns a bounded queue.  Publishing never blocks: a full or
//! abandoned queue is a delivery failure, and the first failure aborts the
//! publish so the caller can log it.  Subscribers registered while a publish
//! is in progress do not see that event.

use std::sync::Arc;

use thiserror::Error;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

use crate::device::DeviceHandle;

/// Capacity of each subscriber's event queue.
pub const SUBSCRIPTION_CAPACITY: usize = 64;

/// A device lifecycle event.
#[derive(Debug, Clone, PartialEq)]
pub enum DriverEvent {
    /// A device answered discovery and has been registered.
    NewDevice(DeviceHandle),
    /// A device stopped answering discovery and has been removed.
    ExpiredDevice(DeviceHandle),
}

impl DriverEvent {
    pub fn device(&self) -> &DeviceHandle {
        match self {
            DriverEvent::NewDevice(device) | DriverEvent::ExpiredDevice(device) => device,
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum BusError {
    /// A subscriber's queue was full or its receiver was dropped.
    #[error("could not deliver event to subscription {subscription}: {reason}")]
    DeliveryFailed { subscription: Uuid, reason: String },
    #[error("subscription {0} not found")]
    NotFound(Uuid),
}

/// Registry of live subscriptions.
#[derive(Debug, Default)]
pub struct SubscriptionBus {
    // A Vec keeps delivery order equal to subscription order.
    subscribers: RwLock<Vec<(Uuid, mpsc::Sender<DriverEvent>)>>,
}

impl SubscriptionBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a new subscription.
    pub async fn subscribe(self: &Arc<Self>) -> Subscription {
        let (tx, rx) = mpsc::channel(SUBSCRIPTION_CAPACITY);
        let id = Uuid::new_v4();
        self.subscribers.write().await.push((id, tx));
        debug!(subscription = %id, "subscription registered");
        Subscription {
            id,
            rx,
            bus: Arc::clone(self),
        }
    }

    /// Removes a subscription.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::NotFound`] if `id` is not registered, including
    /// when it was already removed.
    pub async fn unsubscribe(&self, id: Uuid) -> Result<(), BusError> {
        let mut subscribers = self.subscribers.write().await;
        let index = subscribers
            .iter()
            .position(|(sid, _)| *sid == id)
            .ok_or(BusError::NotFound(id))?;
        subscribers.remove(index);
        debug!(subscription = %id, "subscription removed");
        Ok(())
    }

    /// Delivers `event` to every subscriber registered when the call began.
    ///
    /// # Errors
    ///
    /// Returns the first delivery failure; later subscribers are skipped.
    pub async fn publish(&self, event: DriverEvent) -> Result<(), BusError> {
        let snapshot: Vec<_> = self.subscribers.read().await.clone();
        for (id, tx) in snapshot {
            tx.try_send(event.clone()).map_err(|e| BusError::DeliveryFailed {
                subscription: id,
                reason: match e {
                    TrySendError::Full(_) => "queue full".to_string(),
                    TrySendError::Closed(_) => "receiver dropped".to_string(),
                },
            })?;
        }
        Ok(())
    }

    pub async fn len(&self) -> usize {
        self.subscribers.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.subscribers.read().await.is_empty()
    }
}

/// A live subscription: an event queue plus its identifier.
#[derive(Debug)]
pub struct Subscription {
    id: Uuid,
    rx: mpsc::Receiver<DriverEvent>,
    bus: Arc<SubscriptionBus>,
}

impl Subscription {
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Waits for the next event.  Returns `None` once the subscription has
    /// been removed and its queue drained.
    pub async fn recv(&mut self) -> Option<DriverEvent> {
        self.rx.recv().await
    }

    /// Returns the next queued event without waiting.
    pub fn try_recv(&mut self) -> Option<DriverEvent> {
        self.rx.try_recv().ok()
    }

    /// Unregisters this subscription from its bus.
    pub async fn close(self) -> Result<(), BusError> {
        self.bus.unsubscribe(self.id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::tests::loopback_context;
    use crate::device::{ClientTimeouts, Device};

    async fn make_event(id: u64) -> DriverEvent {
        let (ctx, _tx) = loopback_context(ClientTimeouts::default()).await;
        let device = Device::new(id, "127.0.0.1:9".parse().unwrap(), &ctx);
        DriverEvent::NewDevice(DeviceHandle::Generic(Arc::new(device)))
    }

    #[tokio::test]
    async fn test_publish_reaches_every_subscriber() {
        // Arrange
        let bus = Arc::new(SubscriptionBus::new());
        let mut first = bus.subscribe().await;
        let mut second = bus.subscribe().await;
        let event = make_event(1).await;

        // Act
        bus.publish(event.clone()).await.unwrap();

        // Assert
        assert_eq!(first.try_recv(), Some(event.clone()));
        assert_eq!(second.try_recv(), Some(event));
    }

    #[tokio::test]
    async fn test_publish_with_no_subscribers_succeeds() {
        let bus = Arc::new(SubscriptionBus::new());
        assert!(bus.publish(make_event(1).await).await.is_ok());
    }

    #[tokio::test]
    async fn test_unsubscribe_twice_reports_not_found() {
        // Arrange
        let bus = Arc::new(SubscriptionBus::new());
        let sub = bus.subscribe().await;
        let id = sub.id();

        // Act
        let first = bus.unsubscribe(id).await;
        let second = bus.unsubscribe(id).await;

        // Assert
        assert_eq!(first, Ok(()));
        assert_eq!(second, Err(BusError::NotFound(id)));
        assert!(bus.is_empty().await);
    }

    #[tokio::test]
    async fn test_removed_subscription_receives_nothing_further() {
        let bus = Arc::new(SubscriptionBus::new());
        let mut sub = bus.subscribe().await;
        bus.unsubscribe(sub.id()).await.unwrap();

        bus.publish(make_event(1).await).await.unwrap();

        assert_eq!(sub.recv().await, None);
    }

    #[tokio::test]
    async fn test_publish_fails_fast_on_dropped_receiver() {
        // Arrange – first subscriber is gone, second is healthy
        let bus = Arc::new(SubscriptionBus::new());
        let dropped = bus.subscribe().await;
        let dropped_id = dropped.id();
        drop(dropped);
        let mut healthy = bus.subscribe().await;

        // Act
        let result = bus.publish(make_event(1).await).await;

        // Assert
        assert!(matches!(
            result,
            Err(BusError::DeliveryFailed { subscription, .. }) if subscription == dropped_id
        ));
        assert_eq!(healthy.try_recv(), None);
    }

    #[tokio::test]
    async fn test_publish_stops_at_first_failed_subscriber() {
        // Arrange – first and third healthy, second gone
        let bus = Arc::new(SubscriptionBus::new());
        let mut first = bus.subscribe().await;
        let second = bus.subscribe().await;
        let second_id = second.id();
        drop(second);
        let mut third = bus.subscribe().await;
        let event = make_event(1).await;

        // Act
        let result = bus.publish(event.clone()).await;

        // Assert
        assert!(matches!(
            result,
            Err(BusError::DeliveryFailed { subscription, .. }) if subscription == second_id
        ));
        assert_eq!(first.try_recv(), Some(event));
        assert_eq!(third.try_recv(), None);
    }

    #[tokio::test]
    async fn test_publish_reports_full_queue() {
        let bus = Arc::new(SubscriptionBus::new());
        let _slow = bus.subscribe().await;
        let event = make_event(1).await;
        for _ in 0..SUBSCRIPTION_CAPACITY {
            bus.publish(event.clone()).await.unwrap();
        }

        let result = bus.publish(event).await;

        assert!(matches!(result, Err(BusError::DeliveryFailed { reason, .. }) if reason == "queue full"));
    }

    #[tokio::test]
    async fn test_subscription_close_unregisters() {
        let bus = Arc::new(SubscriptionBus::new());
        let sub = bus.subscribe().await;

        sub.close().await.unwrap();

        assert_eq!(bus.len().await, 0);
    }
}
