//! Notification channels.
//!
//! The plugin manager owns one global channel of [`PluginEvent`]s and every
//! plugin context owns its own channel of [`ContextEvent`]s. Delivery is
//! synchronous: by the time `emit` returns, every subscriber has run.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Weak};
use uuid::Uuid;

/// Manager-scoped events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum PluginEvent {
    /// A plugin became active
    #[serde(rename = "plugin:added")]
    Added { plugin_id: String },

    /// A plugin stopped being active
    #[serde(rename = "plugin:removed")]
    Removed { plugin_id: String },

    /// An active plugin's capability set changed
    #[serde(rename = "plugin:state-changed")]
    StateChanged { plugin_id: String },
}

impl PluginEvent {
    /// Get the plugin this event refers to.
    pub fn plugin_id(&self) -> &str {
        match self {
            Self::Added { plugin_id }
            | Self::Removed { plugin_id }
            | Self::StateChanged { plugin_id } => plugin_id,
        }
    }
}

/// Context-scoped events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ContextEvent {
    /// Settings cache or capability tables changed
    #[serde(rename = "state:changed")]
    StateChanged { plugin_id: String },
}

type Listener<E> = Arc<dyn Fn(&E) + Send + Sync>;

struct EmitterInner<E> {
    listeners: RwLock<Vec<(Uuid, Listener<E>)>>,
}

impl<E> EmitterInner<E> {
    fn remove(&self, id: Uuid) -> bool {
        let mut listeners = self.listeners.write();
        let before = listeners.len();
        listeners.retain(|(listener_id, _)| *listener_id != id);
        listeners.len() != before
    }
}

/// Typed publish/subscribe channel.
pub struct EventEmitter<E> {
    inner: Arc<EmitterInner<E>>,
}

impl<E> EventEmitter<E> {
    /// Create a new emitter with no subscribers.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(EmitterInner {
                listeners: RwLock::new(Vec::new()),
            }),
        }
    }

    /// Subscribe to events. Listeners run in subscription order.
    pub fn subscribe<F>(&self, listener: F) -> Subscription<E>
    where
        F: Fn(&E) + Send + Sync + 'static,
    {
        let id = Uuid::new_v4();
        self.inner.listeners.write().push((id, Arc::new(listener)));

        Subscription {
            id,
            emitter: Arc::downgrade(&self.inner),
        }
    }

    /// Remove a subscription. Returns `false` if it was already removed.
    pub fn unsubscribe(&self, subscription: &Subscription<E>) -> bool {
        self.inner.remove(subscription.id)
    }

    /// Deliver an event to every current subscriber.
    pub fn emit(&self, event: &E) {
        // Snapshot first so listeners can (un)subscribe without deadlocking.
        let listeners: Vec<Listener<E>> = self
            .inner
            .listeners
            .read()
            .iter()
            .map(|(_, listener)| listener.clone())
            .collect();

        for listener in listeners {
            listener(event);
        }
    }

    /// Get the number of active subscriptions.
    pub fn subscriber_count(&self) -> usize {
        self.inner.listeners.read().len()
    }
}

impl<E> Default for EventEmitter<E> {
    fn default() -> Self {
        Self::new()
    }
}

/// Handle returned by [`EventEmitter::subscribe`].
///
/// Dropping the handle does not unsubscribe; call [`Subscription::unsubscribe`].
pub struct Subscription<E> {
    id: Uuid,
    emitter: Weak<EmitterInner<E>>,
}

impl<E> Subscription<E> {
    /// Get the subscription ID.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Stop receiving events. Returns `false` if the emitter is gone or the
    /// subscription was already removed.
    pub fn unsubscribe(self) -> bool {
        self.emitter
            .upgrade()
            .map(|inner| inner.remove(self.id))
            .unwrap_or(false)
    }
}

impl<E> std::fmt::Debug for Subscription<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}
