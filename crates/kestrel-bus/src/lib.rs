// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! In-process typed publish/subscribe fabric.
//!
//! [`Bus<T>`] fans out mutations of a single payload type to every live
//! subscriber without ever blocking the publisher. Each subscriber gets its
//! own bounded `mpsc` channel; a slow or stalled subscriber only ever loses
//! its own events, never the publisher's forward progress, and never another
//! subscriber's delivery.

use std::sync::Mutex;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::warn;

/// Default bounded buffer size for a new subscriber channel.
pub const DEFAULT_SUBSCRIBER_BUFFER: usize = 64;

/// How long the publisher waits on a full subscriber channel before giving
/// up on that subscriber for this event.
pub const DELIVERY_TIMEOUT: Duration = Duration::from_secs(2);

/// The kind of mutation an [`Event`] carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Created,
    Updated,
    Deleted,
}

/// A single published mutation of payload type `T`.
#[derive(Debug, Clone)]
pub struct Event<T> {
    pub kind: EventKind,
    pub payload: T,
}

/// A typed pub/sub channel for payload `T`.
///
/// Construct one `Bus<T>` per payload type (Session, Message, Todo, ...);
/// components that need to fan out more than one type hold one `Bus` per
/// type rather than a single enum-typed bus, so subscribers only ever see
/// the events they asked for.
pub struct Bus<T> {
    subscribers: Mutex<Vec<mpsc::Sender<Event<T>>>>,
    buffer: usize,
}

impl<T> Default for Bus<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Bus<T> {
    pub fn new() -> Self {
        Self::with_buffer(DEFAULT_SUBSCRIBER_BUFFER)
    }

    pub fn with_buffer(buffer: usize) -> Self {
        Self { subscribers: Mutex::new(Vec::new()), buffer }
    }

    /// Register a new subscriber. The subscription ends when the returned
    /// receiver is dropped; the bus notices and removes it lazily on the
    /// next publish rather than eagerly.
    pub fn subscribe(&self) -> mpsc::Receiver<Event<T>> {
        let (tx, rx) = mpsc::channel(self.buffer);
        self.subscribers.lock().unwrap().push(tx);
        rx
    }

    /// Current number of live subscriber slots.
    ///
    /// This is an upper bound: a subscriber that dropped its receiver since
    /// the last publish is still counted until the next `publish` call prunes it.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().unwrap().len()
    }
}

impl<T> Bus<T>
where
    T: Clone + Send + 'static,
{
    /// Publish an event to every live subscriber.
    ///
    /// Never blocks the caller: delivery to a subscriber whose channel is
    /// full is handed off to a background task bounded by
    /// [`DELIVERY_TIMEOUT`]. Subscribers whose receiver has been dropped are
    /// pruned from the subscriber list as part of this call.
    pub fn publish(&self, kind: EventKind, payload: T) {
        let mut subs = self.subscribers.lock().unwrap();
        subs.retain(|tx| !tx.is_closed());
        for tx in subs.iter() {
            let event = Event { kind, payload: payload.clone() };
            match tx.try_send(event) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(event)) => {
                    let tx = tx.clone();
                    tokio::spawn(async move {
                        if tokio::time::timeout(DELIVERY_TIMEOUT, tx.send(event))
                            .await
                            .is_err()
                        {
                            warn!("bus subscriber did not drain in time; dropping event");
                        }
                    });
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    // Subscriber gone; pruned on next publish.
                }
            }
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscriber_receives_published_event() {
        let bus: Bus<String> = Bus::new();
        let mut rx = bus.subscribe();
        bus.publish(EventKind::Created, "hello".to_string());
        let ev = rx.recv().await.unwrap();
        assert_eq!(ev.kind, EventKind::Created);
        assert_eq!(ev.payload, "hello");
    }

    #[tokio::test]
    async fn multiple_subscribers_each_receive_their_own_copy() {
        let bus: Bus<u32> = Bus::new();
        let mut a = bus.subscribe();
        let mut b = bus.subscribe();
        bus.publish(EventKind::Updated, 42);
        assert_eq!(a.recv().await.unwrap().payload, 42);
        assert_eq!(b.recv().await.unwrap().payload, 42);
    }

    #[tokio::test]
    async fn delivery_order_is_preserved_per_subscriber() {
        let bus: Bus<u32> = Bus::new();
        let mut rx = bus.subscribe();
        for i in 0..5 {
            bus.publish(EventKind::Updated, i);
        }
        for expected in 0..5 {
            assert_eq!(rx.recv().await.unwrap().payload, expected);
        }
    }

    #[tokio::test]
    async fn dropped_receiver_is_pruned_on_next_publish() {
        let bus: Bus<u32> = Bus::new();
        let rx = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 1);
        drop(rx);
        bus.publish(EventKind::Deleted, 1);
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn publish_does_not_block_when_no_subscribers() {
        let bus: Bus<u32> = Bus::new();
        bus.publish(EventKind::Created, 1);
    }

    #[tokio::test]
    async fn slow_consumer_does_not_block_other_subscribers() {
        let bus: Bus<u32> = Bus::with_buffer(1);
        let mut fast = bus.subscribe();
        let _slow = bus.subscribe(); // never drained

        bus.publish(EventKind::Created, 1); // fills both buffers to capacity 1
        bus.publish(EventKind::Updated, 2); // slow's buffer is full; handed to background task

        // the fast subscriber is unaffected by the slow one's backlog.
        assert_eq!(fast.recv().await.unwrap().payload, 1);
        assert_eq!(fast.recv().await.unwrap().payload, 2);
    }

    #[tokio::test]
    async fn full_buffer_eventually_drops_for_unread_subscriber() {
        let bus: Bus<u32> = Bus::with_buffer(1);
        let _rx = bus.subscribe(); // filled, never drained
        bus.publish(EventKind::Created, 1);
        bus.publish(EventKind::Created, 2); // spawns a background delivery attempt

        // give the background task a chance to time out; we use a short
        // sleep rather than the full 2s DELIVERY_TIMEOUT to keep the test fast.
        // The assertion here is only that publishing a second event while the
        // buffer is full does not panic or block the caller, which the
        // preceding publish() calls already demonstrate by returning.
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
