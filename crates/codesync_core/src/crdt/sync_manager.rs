//! Sync manager driving the handshake for every resource on a channel.
//!
//! `SyncManager` owns the [`DocManager`], per-resource handshake state and the
//! outbound [`SyncTransport`]. Inbound messages go through
//! [`handle_message`](SyncManager::handle_message); local edits go out through
//! [`send_local_update`](SyncManager::send_local_update).
//!
//! # Usage
//!
//! ```ignore
//! let (transport, outbound) = ChannelTransport::new();
//! let manager = SyncManager::new(Arc::new(DocManager::new()), Arc::new(transport));
//!
//! let doc = manager.open(&resource);          // sends Init
//! doc.insert(0, "hello")?;
//! manager.send_local_update(&resource);       // sends Update
//!
//! let result = manager.handle_message(inbound)?;
//! if let Some(text) = result.content { /* refresh the view */ }
//! ```

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use yrs::StateVector;
use yrs::updates::decoder::Decode;

use super::manager::DocManager;
use super::sync::{ResourceSync, SyncMessage, SyncState};
use super::text_doc::{TextDoc, is_empty_delta};
use super::types::{ResourceId, UpdateOrigin};
use crate::error::{Result, SyncError};
use crate::events::{EventCallback, SyncEvent};
use crate::transport::SyncTransport;

/// Result of handling one inbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncResult {
    /// Resource the message was about.
    pub resource: ResourceId,
    /// New text if the message changed the document.
    pub content: Option<String>,
    /// Handshake state after handling.
    pub state: SyncState,
    /// The peer's state vector showed it lost history this side had seen
    /// from it, and the local replica was rebuilt empty.
    pub peer_restarted: bool,
}

/// Handshake driver for all resources multiplexed over one channel.
pub struct SyncManager {
    docs: Arc<DocManager>,
    transport: Arc<dyn SyncTransport>,
    protocols: RwLock<HashMap<ResourceId, ResourceSync>>,
    /// Latest state vector received from the peer, kept across `reset`.
    peer_vectors: RwLock<HashMap<ResourceId, StateVector>>,
    rebuild_on_peer_restart: AtomicBool,
    event_callback: RwLock<Option<EventCallback>>,
}

impl SyncManager {
    /// Create a new sync manager.
    pub fn new(docs: Arc<DocManager>, transport: Arc<dyn SyncTransport>) -> Self {
        Self {
            docs,
            transport,
            protocols: RwLock::new(HashMap::new()),
            peer_vectors: RwLock::new(HashMap::new()),
            rebuild_on_peer_restart: AtomicBool::new(false),
            event_callback: RwLock::new(None),
        }
    }

    /// Set the callback that receives `SyncStateChanged` events.
    ///
    /// Document content events are configured on the [`DocManager`].
    pub fn set_event_callback(&self, callback: EventCallback) {
        let mut cb = self.event_callback.write().unwrap();
        *cb = Some(callback);
    }

    fn emit_event(&self, event: SyncEvent) {
        if let Some(ref cb) = *self.event_callback.read().unwrap() {
            cb(&event);
        }
    }

    /// The document registry.
    pub fn docs(&self) -> &Arc<DocManager> {
        &self.docs
    }

    /// Discard the local replica when the peer turns out to have restarted.
    ///
    /// A restarted peer seeds a fresh document under a new client id; merging
    /// it into the old replica would duplicate the content. Sides that do not
    /// own the content (remote surfaces) enable this and take the peer's copy
    /// instead. Off by default.
    pub fn set_rebuild_on_peer_restart(&self, enabled: bool) {
        self.rebuild_on_peer_restart.store(enabled, Ordering::SeqCst);
    }

    /// Whether the document of `resource` contains everything the peer had
    /// in its last state vector.
    pub fn has_caught_up(&self, resource: &ResourceId) -> bool {
        let Some(doc) = self.docs.get_if_loaded(resource) else {
            return false;
        };
        let peer_vectors = self.peer_vectors.read().unwrap();
        peer_vectors
            .get(resource)
            .is_some_and(|peer| doc.covers(peer))
    }

    /// Record the peer's vector; returns whether it lost history seen before.
    fn observe_peer_vector(&self, resource: &ResourceId, vector: StateVector) -> bool {
        let mut peer_vectors = self.peer_vectors.write().unwrap();
        let regressed = peer_vectors.get(resource).is_some_and(|previous| {
            previous
                .iter()
                .any(|(client, clock)| vector.get(client) < *clock)
        });
        peer_vectors.insert(resource.clone(), vector);
        regressed
    }

    fn entry(&self, resource: &ResourceId) -> ResourceSync {
        let protocols = self.protocols.read().unwrap();
        protocols.get(resource).copied().unwrap_or_default()
    }

    fn store(&self, resource: &ResourceId, next: ResourceSync) {
        let previous = {
            let mut protocols = self.protocols.write().unwrap();
            protocols
                .insert(resource.clone(), next)
                .map(|s| s.state)
                .unwrap_or_default()
        };

        if previous != next.state {
            log::debug!(
                "[SyncManager] {}: {} -> {}",
                resource,
                previous,
                next.state
            );
            self.emit_event(SyncEvent::sync_state_changed(resource.clone(), next.state));
        }
    }

    // =========================================================================
    // Session Lifecycle
    // =========================================================================

    /// Start syncing `resource`, sending `Init` if nothing was exchanged yet.
    ///
    /// Returns the resource's document, created empty on first reference.
    pub fn open(&self, resource: &ResourceId) -> Arc<TextDoc> {
        let doc = self.docs.get(resource);
        let mut sync = self.entry(resource);

        if sync.state == SyncState::Uninitialized {
            log::info!("[SyncManager] Opening {}", resource);
            self.transport.send(SyncMessage::init(resource.clone()));
            sync.state = SyncState::AwaitingPeerVector;
            self.store(resource, sync);
        }
        doc
    }

    /// Push this side's state vector without waiting for the peer's `Init`.
    ///
    /// The peer answers with whatever this side is missing and, having not
    /// seen a vector from it, also learns what it must send back.
    pub fn announce(&self, resource: &ResourceId) {
        let doc = self.docs.get(resource);
        let mut sync = self.entry(resource);

        self.transport
            .send(SyncMessage::state_vector(resource.clone(), doc.state_vector()));
        sync.vector_sent = true;
        if sync.state == SyncState::Uninitialized {
            sync.state = SyncState::AwaitingPeerVector;
        }
        self.store(resource, sync);
    }

    /// Stop syncing `resource` and discard its document.
    pub fn close(&self, resource: &ResourceId) {
        let removed = {
            let mut protocols = self.protocols.write().unwrap();
            protocols.remove(resource)
        };
        self.peer_vectors.write().unwrap().remove(resource);
        self.docs.close(resource);

        if removed.is_some_and(|s| s.state != SyncState::Uninitialized) {
            self.emit_event(SyncEvent::sync_state_changed(
                resource.clone(),
                SyncState::Uninitialized,
            ));
        }
        log::debug!("[SyncManager] Closed {}", resource);
    }

    /// Forget every session after the channel was torn down and rebuilt.
    ///
    /// Documents are kept; each resource must go through the handshake again.
    pub fn reset(&self) {
        let resources: Vec<ResourceId> = {
            let protocols = self.protocols.read().unwrap();
            protocols.keys().cloned().collect()
        };
        for resource in resources {
            let mut sync = self.entry(&resource);
            sync.reset();
            self.store(&resource, sync);
        }
        log::info!("[SyncManager] Reset complete");
    }

    // =========================================================================
    // Messages
    // =========================================================================

    /// Handle one inbound message and send whatever the protocol answers.
    ///
    /// A malformed delta or state vector is returned as an error; the
    /// document and the handshake state are left as they were.
    pub fn handle_message(&self, message: SyncMessage) -> Result<SyncResult> {
        log::debug!(
            "[SyncManager] handle_message: {} for {}",
            message.message_type(),
            message.resource()
        );

        let mut sync = self.entry(message.resource());
        let mut content = None;
        let mut peer_restarted = false;

        let resource = match message {
            SyncMessage::Init { resource } => {
                let doc = self.docs.get(&resource);
                self.transport
                    .send(SyncMessage::state_vector(resource.clone(), doc.state_vector()));
                sync.vector_sent = true;
                sync.state = SyncState::AwaitingPeerVector;
                resource
            }
            SyncMessage::StateVector { resource, vector } => {
                let peer = StateVector::decode_v1(&vector).map_err(|e| {
                    SyncError::Crdt(format!("Failed to decode state vector: {}", e))
                })?;
                let mut doc = self.docs.get(&resource);

                if self.observe_peer_vector(&resource, peer) {
                    if self.rebuild_on_peer_restart.load(Ordering::SeqCst) {
                        log::warn!(
                            "[SyncManager] Peer restarted for {}, rebuilding replica",
                            resource
                        );
                        self.docs.close(&resource);
                        doc = self.docs.get(&resource);
                        sync.reset();
                        peer_restarted = true;
                    } else {
                        log::info!("[SyncManager] Peer restarted for {}", resource);
                    }
                }

                let delta = doc.diff_since(&vector)?;
                if !is_empty_delta(&delta) {
                    self.transport
                        .send(SyncMessage::update(resource.clone(), delta));
                }
                if !sync.vector_sent {
                    self.transport
                        .send(SyncMessage::state_vector(resource.clone(), doc.state_vector()));
                    sync.vector_sent = true;
                }
                sync.state = SyncState::Synced;
                resource
            }
            SyncMessage::Update { resource, delta } => {
                let doc = self.docs.get(&resource);
                let origin = if sync.state == SyncState::Synced {
                    UpdateOrigin::Remote
                } else {
                    UpdateOrigin::Sync
                };
                if doc.import_delta(&delta, origin)? {
                    content = Some(doc.text());
                }
                sync.state = SyncState::Synced;
                resource
            }
        };

        self.store(&resource, sync);
        Ok(SyncResult {
            resource,
            content,
            state: sync.state,
            peer_restarted,
        })
    }

    /// Send an already-built message, e.g. an update exported by an edit coordinator.
    pub fn send(&self, message: SyncMessage) {
        self.transport.send(message);
    }

    /// Send the local changes of `resource` made since the last export.
    ///
    /// Returns `false` when there was nothing to send. Updates go out even
    /// before the handshake completes; the peer merges them idempotently.
    pub fn send_local_update(&self, resource: &ResourceId) -> bool {
        match self.docs.export_delta(resource) {
            Some(delta) => {
                log::debug!(
                    "[SyncManager] Sending {} byte update for {}",
                    delta.len(),
                    resource
                );
                self.transport.send(SyncMessage::update(resource.clone(), delta));
                true
            }
            None => false,
        }
    }

    // =========================================================================
    // State
    // =========================================================================

    /// Handshake state of `resource`.
    pub fn state(&self, resource: &ResourceId) -> SyncState {
        self.entry(resource).state
    }

    /// Whether `resource` has completed the handshake.
    pub fn is_synced(&self, resource: &ResourceId) -> bool {
        self.state(resource) == SyncState::Synced
    }

    /// Resources with handshake state, sorted.
    pub fn active_resources(&self) -> Vec<ResourceId> {
        let protocols = self.protocols.read().unwrap();
        let mut resources: Vec<ResourceId> = protocols.keys().cloned().collect();
        resources.sort();
        resources
    }
}

impl std::fmt::Debug for SyncManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncManager")
            .field("docs", &self.docs)
            .field("active_resources", &self.active_resources().len())
            .finish_non_exhaustive()
    }
}
