//! Host side of a session: the process that owns the authoritative file.
//!
//! The host seeds each document with the editor's content, pushes its state
//! vector to the peer, forwards editor changes as updates, and writes merged
//! peer changes back into the editor through an [`EditorSink`].

use std::sync::Arc;

use crate::crdt::{ResourceId, SyncManager, SyncMessage, SyncResult, TextDoc};
use crate::diff::{TextChange, compute_changes};
use crate::error::Result;

/// The host's editor, as seen by the sync engine.
pub trait EditorSink: Send + Sync {
    /// Text the editor currently shows for `resource`, or `None` if it has no
    /// buffer open for it.
    fn current_text(&self, resource: &ResourceId) -> Option<String>;

    /// Apply positional edits to the editor buffer.
    fn apply_edits(&self, resource: &ResourceId, changes: &[TextChange]) -> Result<()>;

    /// Replace the whole buffer.
    fn replace_all(&self, resource: &ResourceId, content: &str) -> Result<()>;
}

/// Host driver over a [`SyncManager`].
pub struct Host {
    sync: SyncManager,
    editor: Arc<dyn EditorSink>,
}

impl Host {
    /// Create a host.
    pub fn new(sync: SyncManager, editor: Arc<dyn EditorSink>) -> Self {
        Self { sync, editor }
    }

    /// The underlying sync manager.
    pub fn sync(&self) -> &SyncManager {
        &self.sync
    }

    /// Start sharing `resource`, seeding its document with `content`.
    ///
    /// Reopening a resource that is already loaded only applies the difference
    /// between the document and `content`, so nothing is duplicated.
    pub fn open(&self, resource: &ResourceId, content: &str) -> Result<Arc<TextDoc>> {
        let doc = self.sync.docs().get(resource);
        doc.set_content(content)?;
        log::info!(
            "[Host] Opened {} ({} chars)",
            resource,
            doc.char_len()
        );

        // Vector first: a peer that sees a restarted host rebuilds its replica
        // before the seeded content arrives.
        self.sync.announce(resource);
        self.sync.send_local_update(resource);
        Ok(doc)
    }

    /// Stop sharing `resource`.
    pub fn close(&self, resource: &ResourceId) {
        self.sync.close(resource);
    }

    /// The editor reports the full content of `resource`.
    ///
    /// Content equal to the document's, which is what the editor reports after
    /// the host wrote a peer change into it, is ignored. Returns whether an
    /// update was sent.
    pub fn editor_changed(&self, resource: &ResourceId, content: &str) -> Result<bool> {
        let Some(doc) = self.sync.docs().get_if_loaded(resource) else {
            return Ok(false);
        };
        if doc.is_applying_remote() || doc.text() == content {
            return Ok(false);
        }

        doc.set_content(content)?;
        Ok(self.sync.send_local_update(resource))
    }

    /// The editor reports positional edits to `resource`.
    pub fn editor_edited(&self, resource: &ResourceId, changes: &[TextChange]) -> Result<bool> {
        let Some(doc) = self.sync.docs().get_if_loaded(resource) else {
            return Ok(false);
        };
        if doc.is_applying_remote() {
            return Ok(false);
        }

        doc.apply_changes(changes)?;
        Ok(self.sync.send_local_update(resource))
    }

    /// Handle a message from the peer, writing any merged change into the editor.
    ///
    /// Before an update is merged, editor content the document has not seen yet
    /// is recorded as a local edit, so writing the merge back cannot drop it.
    pub fn handle_message(&self, message: SyncMessage) -> Result<SyncResult> {
        if matches!(message, SyncMessage::Update { .. }) {
            self.catch_up_with_editor(message.resource())?;
        }

        let result = self.sync.handle_message(message)?;
        if let Some(ref content) = result.content {
            self.apply_to_editor(&result.resource, content);
        }
        Ok(result)
    }

    /// The channel was rebuilt: restart the handshake for every open resource.
    pub fn reconnect(&self) {
        self.sync.reset();
        for resource in self.sync.docs().loaded() {
            self.sync.announce(&resource);
        }
    }

    fn catch_up_with_editor(&self, resource: &ResourceId) -> Result<()> {
        let Some(current) = self.editor.current_text(resource) else {
            return Ok(());
        };
        if self.editor_changed(resource, &current)? {
            log::debug!("[Host] Recorded unsent editor change for {}", resource);
        }
        Ok(())
    }

    fn apply_to_editor(&self, resource: &ResourceId, content: &str) {
        let Some(current) = self.editor.current_text(resource) else {
            log::debug!("[Host] No editor buffer for {}, skipping", resource);
            return;
        };

        let changes = compute_changes(&current, content);
        if changes.is_empty() {
            return;
        }

        if let Err(e) = self.editor.apply_edits(resource, &changes) {
            log::warn!(
                "[Host] Minimal edit failed for {}, replacing buffer: {}",
                resource,
                e
            );
            if let Err(e) = self.editor.replace_all(resource, content) {
                log::error!("[Host] Failed to update editor for {}: {}", resource, e);
            }
        }
    }
}

impl std::fmt::Debug for Host {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Host")
            .field("sync", &self.sync)
            .finish_non_exhaustive()
    }
}
