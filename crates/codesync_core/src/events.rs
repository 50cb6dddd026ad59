//! Document and protocol events, plus a registry for subscribing to them.
//!
//! Documents report every content change as a [`SyncEvent::ContentsChanged`]
//! tagged with where the change came from, and the sync manager reports
//! protocol state transitions. Drivers subscribe through a [`CallbackRegistry`]
//! to push fresh text to an editor or UI.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};

use crate::crdt::{ResourceId, SyncState, UpdateOrigin};

/// Events emitted by documents and the sync manager.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum SyncEvent {
    /// The text of a document changed.
    ContentsChanged {
        /// Document that changed.
        resource: ResourceId,
        /// Full text after the change.
        content: String,
        /// Where the change came from.
        origin: UpdateOrigin,
    },

    /// The handshake state of a resource changed.
    SyncStateChanged {
        /// Resource whose state changed.
        resource: ResourceId,
        /// New state.
        state: SyncState,
    },
}

impl SyncEvent {
    /// Create a ContentsChanged event.
    pub fn contents_changed(resource: ResourceId, content: String, origin: UpdateOrigin) -> Self {
        Self::ContentsChanged {
            resource,
            content,
            origin,
        }
    }

    /// Create a SyncStateChanged event.
    pub fn sync_state_changed(resource: ResourceId, state: SyncState) -> Self {
        Self::SyncStateChanged { resource, state }
    }

    /// The resource this event is about.
    pub fn resource(&self) -> &ResourceId {
        match self {
            Self::ContentsChanged { resource, .. } => resource,
            Self::SyncStateChanged { resource, .. } => resource,
        }
    }

    /// Get the event type as a string.
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::ContentsChanged { .. } => "ContentsChanged",
            Self::SyncStateChanged { .. } => "SyncStateChanged",
        }
    }
}

/// A unique identifier for a subscription.
pub type SubscriptionId = u64;

/// Callback function type for sync events.
///
/// Callbacks run synchronously on the thread that produced the event and
/// should not block.
pub type EventCallback = Arc<dyn Fn(&SyncEvent) + Send + Sync>;

/// Thread-safe registry for managing event subscriptions.
///
/// ```ignore
/// use codesync_core::events::CallbackRegistry;
/// use std::sync::Arc;
///
/// let registry = Arc::new(CallbackRegistry::new());
/// let id = registry.subscribe(Arc::new(|event| println!("{:?}", event)));
/// manager.set_event_callback(registry.as_callback());
/// registry.unsubscribe(id);
/// ```
pub struct CallbackRegistry {
    callbacks: RwLock<HashMap<SubscriptionId, EventCallback>>,
    next_id: AtomicU64,
}

impl CallbackRegistry {
    /// Create a new empty callback registry.
    pub fn new() -> Self {
        Self {
            callbacks: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Subscribe to events. Returns an ID for [`unsubscribe`](Self::unsubscribe).
    pub fn subscribe(&self, callback: EventCallback) -> SubscriptionId {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let mut callbacks = self.callbacks.write().unwrap();
        callbacks.insert(id, callback);
        id
    }

    /// Unsubscribe. Returns `true` if the subscription existed.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut callbacks = self.callbacks.write().unwrap();
        callbacks.remove(&id).is_some()
    }

    /// Emit an event to all registered callbacks.
    ///
    /// A panicking callback does not stop delivery to the others.
    pub fn emit(&self, event: &SyncEvent) {
        let callbacks: Vec<EventCallback> = self.callbacks.read().unwrap().values().cloned().collect();
        for callback in callbacks {
            let _ = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                callback(event);
            }));
        }
    }

    /// Wrap this registry as a single callback that fans out to every subscriber.
    pub fn as_callback(self: &Arc<Self>) -> EventCallback {
        let registry = Arc::clone(self);
        Arc::new(move |event| registry.emit(event))
    }

    /// Get the number of active subscriptions.
    pub fn subscriber_count(&self) -> usize {
        self.callbacks.read().unwrap().len()
    }

    /// Clear all subscriptions.
    pub fn clear(&self) {
        self.callbacks.write().unwrap().clear();
    }
}

impl Default for CallbackRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for CallbackRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallbackRegistry")
            .field("subscriber_count", &self.subscriber_count())
            .finish()
    }
}
