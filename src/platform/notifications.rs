//! Lifecycle-scoped subscriptions to platform audio-session notifications
//!
//! The platform side posts [`SessionNotification`]s into a [`NotificationHub`].
//! Consumers register handlers and receive a [`Subscription`] guard; dropping
//! the guard deregisters the handler, so no callback outlives its owner.

use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

/// Phase reported by a system interruption notification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterruptionPhase {
    Began,
    Ended,
    /// Subtype this crate does not recognize (raw platform value)
    Other(u32),
}

/// Notifications delivered by the platform audio session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionNotification {
    /// Call, alarm, other app taking the session
    Interruption(InterruptionPhase),
    /// Output/input route changed (headphones, Bluetooth)
    RouteChange,
    /// Hardware format changed under the running graph
    ConfigurationChange,
    /// The whole audio subsystem was restarted; node wiring is invalid
    MediaServicesReset,
}

type Handler = Arc<dyn Fn(&SessionNotification) + Send + Sync>;

struct HubInner {
    handlers: DashMap<u64, Handler>,
    next_id: AtomicU64,
}

/// Pub/sub hub for session notifications
#[derive(Clone)]
pub struct NotificationHub {
    inner: Arc<HubInner>,
}

impl NotificationHub {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(HubInner {
                handlers: DashMap::new(),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    /// Register a handler; it stays registered until the guard is dropped
    pub fn subscribe<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&SessionNotification) + Send + Sync + 'static,
    {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner.handlers.insert(id, Arc::new(handler));
        tracing::debug!("Notification subscription {} registered", id);

        Subscription {
            hub: Arc::downgrade(&self.inner),
            id,
        }
    }

    /// Deliver a notification to every current subscriber
    pub fn post(&self, notification: SessionNotification) {
        // Snapshot first: handlers may subscribe/unsubscribe while running
        let handlers: Vec<Handler> = self
            .inner
            .handlers
            .iter()
            .map(|entry| entry.value().clone())
            .collect();

        tracing::debug!(
            "Posting {:?} to {} subscriber(s)",
            notification,
            handlers.len()
        );
        for handler in handlers {
            handler(&notification);
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.handlers.len()
    }
}

impl Default for NotificationHub {
    fn default() -> Self {
        Self::new()
    }
}

/// Registration guard; deregisters on drop
pub struct Subscription {
    hub: Weak<HubInner>,
    id: u64,
}

impl Subscription {
    pub fn id(&self) -> u64 {
        self.id
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(hub) = self.hub.upgrade() {
            hub.handlers.remove(&self.id);
            tracing::debug!("Notification subscription {} removed", self.id);
        }
    }
}
