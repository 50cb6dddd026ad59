//! Manager for the documents multiplexed over one channel.
//!
//! `DocManager` keeps exactly one [`TextDoc`] per [`ResourceId`], creating it
//! on first reference and dropping it when the resource is closed. It does no
//! I/O; documents live only in memory for the life of a session.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use super::text_doc::{DEFAULT_TEXT_NAME, TextDoc};
use super::types::{ResourceId, UpdateOrigin};
use crate::error::{Result, SyncError};
use crate::events::EventCallback;

/// Registry of live documents keyed by resource.
///
/// # Example
///
/// ```ignore
/// use codesync_core::crdt::{DocManager, ResourceId};
///
/// let manager = DocManager::new();
/// let doc = manager.get(&ResourceId::code("src/app.ts"));
/// doc.set_content("export {}")?;
/// assert!(manager.is_loaded(&ResourceId::code("src/app.ts")));
/// ```
pub struct DocManager {
    docs: RwLock<HashMap<ResourceId, Arc<TextDoc>>>,
    text_name: String,
    /// Propagated to each document when it is created.
    event_callback: RwLock<Option<EventCallback>>,
}

impl DocManager {
    /// Create a manager whose documents use the default Y.Text name.
    pub fn new() -> Self {
        Self::with_text_name(DEFAULT_TEXT_NAME)
    }

    /// Create a manager whose documents store their text under `text_name`.
    pub fn with_text_name(text_name: impl Into<String>) -> Self {
        Self {
            docs: RwLock::new(HashMap::new()),
            text_name: text_name.into(),
            event_callback: RwLock::new(None),
        }
    }

    /// Set the callback handed to every document created from now on.
    ///
    /// Documents that are already loaded keep whatever callback they had.
    pub fn set_event_callback(&self, callback: EventCallback) {
        let mut cb = self.event_callback.write().unwrap();
        *cb = Some(callback);
    }

    fn apply_event_callback(&self, doc: &mut TextDoc) {
        let cb = self.event_callback.read().unwrap();
        if let Some(ref callback) = *cb {
            doc.set_event_callback(Arc::clone(callback));
        }
    }

    /// Get the document for `resource`, creating an empty one on first reference.
    /// Uses double-checked locking so concurrent callers share one document.
    pub fn get(&self, resource: &ResourceId) -> Arc<TextDoc> {
        {
            let docs = self.docs.read().unwrap();
            if let Some(doc) = docs.get(resource) {
                return Arc::clone(doc);
            }
        }

        let mut docs = self.docs.write().unwrap();
        if let Some(doc) = docs.get(resource) {
            return Arc::clone(doc);
        }

        let mut doc = TextDoc::with_text_name(resource.clone(), &self.text_name);
        self.apply_event_callback(&mut doc);

        log::debug!("[DocManager] Created document for {}", resource);
        let doc = Arc::new(doc);
        docs.insert(resource.clone(), Arc::clone(&doc));
        doc
    }

    /// Get the document for `resource` only if it is already loaded.
    pub fn get_if_loaded(&self, resource: &ResourceId) -> Option<Arc<TextDoc>> {
        let docs = self.docs.read().unwrap();
        docs.get(resource).cloned()
    }

    /// Tear down the document for `resource`.
    ///
    /// A later [`get`](Self::get) starts again from an empty document.
    pub fn close(&self, resource: &ResourceId) -> Option<Arc<TextDoc>> {
        let mut docs = self.docs.write().unwrap();
        let removed = docs.remove(resource);
        if removed.is_some() {
            log::debug!("[DocManager] Closed document for {}", resource);
        }
        removed
    }

    /// Check if a document is loaded.
    pub fn is_loaded(&self, resource: &ResourceId) -> bool {
        let docs = self.docs.read().unwrap();
        docs.contains_key(resource)
    }

    /// All loaded resources, sorted.
    pub fn loaded(&self) -> Vec<ResourceId> {
        let docs = self.docs.read().unwrap();
        let mut resources: Vec<ResourceId> = docs.keys().cloned().collect();
        resources.sort();
        resources
    }

    /// Number of loaded documents.
    pub fn loaded_count(&self) -> usize {
        let docs = self.docs.read().unwrap();
        docs.len()
    }

    /// Drop every document.
    pub fn clear(&self) {
        let mut docs = self.docs.write().unwrap();
        docs.clear();
    }

    // ==================== Convenience ====================

    /// Current text of a loaded document.
    pub fn text(&self, resource: &ResourceId) -> Result<String> {
        self.get_if_loaded(resource)
            .map(|doc| doc.text())
            .ok_or_else(|| SyncError::UnknownResource(resource.clone()))
    }

    /// Import a peer delta into the document for `resource`, creating it if needed.
    pub fn import_delta(
        &self,
        resource: &ResourceId,
        delta: &[u8],
        origin: UpdateOrigin,
    ) -> Result<bool> {
        self.get(resource).import_delta(delta, origin)
    }

    /// Take the pending local changes of a loaded document.
    pub fn export_delta(&self, resource: &ResourceId) -> Option<Vec<u8>> {
        self.get_if_loaded(resource)
            .and_then(|doc| doc.export_delta())
    }
}

impl Default for DocManager {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for DocManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DocManager")
            .field("loaded", &self.loaded())
            .field("text_name", &self.text_name)
            .finish()
    }
}
