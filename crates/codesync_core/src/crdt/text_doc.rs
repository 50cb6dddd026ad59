//! Replicated text document.
//!
//! `TextDoc` wraps a Y.Doc holding a single Y.Text. Positions in its API count
//! Unicode code points; the conversion to the CRDT's native byte offsets
//! happens here and nowhere else, so callers never see storage units.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use yrs::{
    Doc, GetString, ReadTxn, StateVector, Text, TextRef, Transact, TransactionMut, Update,
    updates::decoder::Decode, updates::encoder::Encode,
};

use super::types::{ResourceId, UpdateOrigin};
use crate::diff::{self, TextChange, TextSink, byte_offset};
use crate::error::{Result, SyncError};
use crate::events::{EventCallback, SyncEvent};

/// Name of the Y.Text holding the document content.
pub const DEFAULT_TEXT_NAME: &str = "content";

/// Whether an encoded v1 update carries no structs and no deletions.
///
/// yrs encodes an empty update as two zero varints rather than zero bytes.
pub fn is_empty_delta(delta: &[u8]) -> bool {
    delta.iter().all(|b| *b == 0) && delta.len() <= 2
}

/// A CRDT document for one resource's text.
///
/// Local edits go through [`insert`](Self::insert), [`delete`](Self::delete),
/// [`apply_changes`](Self::apply_changes) or [`set_content`](Self::set_content)
/// and accumulate until [`export_delta`](Self::export_delta) hands them out.
/// Peer deltas come in through [`import_delta`](Self::import_delta).
///
/// # Example
///
/// ```ignore
/// use codesync_core::crdt::{ResourceId, TextDoc, UpdateOrigin};
///
/// let a = TextDoc::new(ResourceId::code("main.rs"));
/// let b = TextDoc::new(ResourceId::code("main.rs"));
///
/// a.insert(0, "fn main() {}")?;
/// let delta = a.export_delta().unwrap();
/// b.import_delta(&delta, UpdateOrigin::Remote)?;
/// assert_eq!(b.text(), "fn main() {}");
/// ```
pub struct TextDoc {
    resource: ResourceId,
    doc: Doc,
    text: TextRef,
    /// State vector at the last export; the next export covers everything after it.
    last_export: Mutex<StateVector>,
    /// Set by local mutations, cleared by export.
    dirty: AtomicBool,
    /// Held while a peer delta is being merged.
    applying_remote: AtomicBool,
    /// Length in code points, refreshed after every mutation and import.
    chars: AtomicUsize,
    event_callback: Option<EventCallback>,
}

impl TextDoc {
    /// Create a new empty document.
    pub fn new(resource: ResourceId) -> Self {
        Self::with_text_name(resource, DEFAULT_TEXT_NAME)
    }

    /// Create a new empty document whose Y.Text is stored under `text_name`.
    ///
    /// Both peers must use the same name or their edits will not meet.
    pub fn with_text_name(resource: ResourceId, text_name: &str) -> Self {
        let doc = Doc::new();
        let text = doc.get_or_insert_text(text_name);

        Self {
            resource,
            doc,
            text,
            last_export: Mutex::new(StateVector::default()),
            dirty: AtomicBool::new(false),
            applying_remote: AtomicBool::new(false),
            chars: AtomicUsize::new(0),
            event_callback: None,
        }
    }

    /// Set the callback that receives `ContentsChanged` events.
    pub fn set_event_callback(&mut self, callback: EventCallback) {
        self.event_callback = Some(callback);
    }

    fn emit_contents_changed(&self, origin: UpdateOrigin) {
        if let Some(ref cb) = self.event_callback {
            cb(&SyncEvent::contents_changed(
                self.resource.clone(),
                self.text(),
                origin,
            ));
        }
    }

    /// The resource this document belongs to.
    pub fn resource(&self) -> &ResourceId {
        &self.resource
    }

    // ==================== Content ====================

    /// Get the full text.
    pub fn text(&self) -> String {
        let txn = self.doc.transact();
        self.text.get_string(&txn)
    }

    /// Length of the text in code points.
    pub fn char_len(&self) -> usize {
        self.chars.load(Ordering::SeqCst)
    }

    /// Whether a peer delta is being merged right now.
    ///
    /// Content notifications raised while this is true are not local edits
    /// and must not be sent back to the peer.
    pub fn is_applying_remote(&self) -> bool {
        self.applying_remote.load(Ordering::SeqCst)
    }

    /// Whether local edits are waiting for [`export_delta`](Self::export_delta).
    pub fn has_unexported_changes(&self) -> bool {
        self.dirty.load(Ordering::SeqCst)
    }

    // ==================== Local Edits ====================

    /// Insert `text` at code-point `position`.
    pub fn insert(&self, position: usize, text: &str) -> Result<()> {
        self.mutate(|sink| sink.insert(position, text)).map(|_| ())
    }

    /// Delete `len` code points starting at `position`.
    pub fn delete(&self, position: usize, len: usize) -> Result<()> {
        self.mutate(|sink| sink.delete(position, len)).map(|_| ())
    }

    /// Apply a batch of changes in one transaction.
    ///
    /// The batch is checked against the current length first, so an
    /// out-of-bounds batch leaves the document untouched.
    pub fn apply_changes(&self, changes: &[TextChange]) -> Result<bool> {
        if changes.is_empty() {
            return Ok(false);
        }
        self.mutate(|sink| diff::apply_changes(sink, changes))
    }

    /// Replace the content with `content`, touching only the differing span.
    ///
    /// Returns `false` when the content was already equal.
    pub fn set_content(&self, content: &str) -> Result<bool> {
        let changes = diff::compute_changes(&self.text(), content);
        self.apply_changes(&changes)
    }

    fn mutate<F>(&self, edit: F) -> Result<bool>
    where
        F: FnOnce(&mut DocSink<'_>) -> Result<()>,
    {
        let touched = {
            let mut sink = DocSink::new(&self.text, self.doc.transact_mut());
            edit(&mut sink)?;
            // Flag before the transaction commits so a concurrent import
            // cannot advance the export vector past this edit.
            if sink.touched {
                self.dirty.store(true, Ordering::SeqCst);
                self.chars.store(sink.chars, Ordering::SeqCst);
            }
            sink.touched
        };

        if touched {
            self.emit_contents_changed(UpdateOrigin::Local);
        }
        Ok(touched)
    }

    // ==================== Sync Operations ====================

    /// Take the local changes made since the previous export.
    ///
    /// Returns `None` if no local edit happened since then.
    pub fn export_delta(&self) -> Option<Vec<u8>> {
        let mut last = self.last_export.lock().unwrap();
        if !self.dirty.swap(false, Ordering::SeqCst) {
            return None;
        }

        let txn = self.doc.transact();
        let delta = txn.encode_state_as_update_v1(&last);
        *last = txn.state_vector();
        Some(delta)
    }

    /// Merge a delta produced by the peer.
    ///
    /// Merging is idempotent and order-independent. A malformed delta is
    /// rejected with [`SyncError::Crdt`] and leaves the document unchanged.
    /// Returns whether the visible text changed.
    pub fn import_delta(&self, delta: &[u8], origin: UpdateOrigin) -> Result<bool> {
        let _guard = RemoteApplyGuard::acquire(&self.applying_remote);

        let update = Update::decode_v1(delta)
            .map_err(|e| SyncError::Crdt(format!("Failed to decode update: {}", e)))?;

        let before = self.text();
        {
            let mut txn = self.doc.transact_mut();
            txn.apply_update(update)
                .map_err(|e| SyncError::Crdt(format!("Failed to apply update: {}", e)))?;
        }

        {
            let mut last = self.last_export.lock().unwrap();
            if !self.dirty.load(Ordering::SeqCst) {
                *last = self.doc.transact().state_vector();
            }
        }

        let after = self.text();
        self.chars.store(after.chars().count(), Ordering::SeqCst);
        let changed = after != before;
        if changed {
            log::debug!(
                "[TextDoc] Imported {} bytes into {} ({})",
                delta.len(),
                self.resource,
                origin
            );
            self.emit_contents_changed(origin);
        }
        Ok(changed)
    }

    /// Encode the state vector summarizing what this replica has seen.
    pub fn state_vector(&self) -> Vec<u8> {
        let txn = self.doc.transact();
        txn.state_vector().encode_v1()
    }

    /// Encode everything this replica has that the peer with `peer_vector` lacks.
    pub fn diff_since(&self, peer_vector: &[u8]) -> Result<Vec<u8>> {
        let sv = StateVector::decode_v1(peer_vector)
            .map_err(|e| SyncError::Crdt(format!("Failed to decode state vector: {}", e)))?;
        let txn = self.doc.transact();
        Ok(txn.encode_state_as_update_v1(&sv))
    }

    /// Whether this replica has integrated everything summarized by `vector`.
    pub(crate) fn covers(&self, vector: &StateVector) -> bool {
        let local = self.doc.transact().state_vector();
        vector
            .iter()
            .all(|(client, clock)| local.get(client) >= *clock)
    }

    /// Encode the full state as a single update.
    pub fn encode_state(&self) -> Vec<u8> {
        let txn = self.doc.transact();
        txn.encode_state_as_update_v1(&StateVector::default())
    }
}

impl std::fmt::Debug for TextDoc {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TextDoc")
            .field("resource", &self.resource)
            .field("text", &self.text())
            .field("dirty", &self.has_unexported_changes())
            .finish_non_exhaustive()
    }
}

/// Scoped "applying remote delta" state; released on drop, including on error paths.
struct RemoteApplyGuard<'a> {
    flag: &'a AtomicBool,
}

impl<'a> RemoteApplyGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Self {
        flag.store(true, Ordering::SeqCst);
        Self { flag }
    }
}

impl Drop for RemoteApplyGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::SeqCst);
    }
}

/// A [`TextSink`] over an open write transaction.
///
/// Every edit made through one sink lands in the same transaction. The text
/// is read from the CRDT once and mirrored locally, so a batch of edits does
/// not rebuild the string per edit.
pub struct DocSink<'a> {
    text: &'a TextRef,
    txn: TransactionMut<'a>,
    mirror: String,
    chars: usize,
    touched: bool,
}

impl<'a> DocSink<'a> {
    fn new(text: &'a TextRef, txn: TransactionMut<'a>) -> Self {
        let mirror = text.get_string(&txn);
        let chars = mirror.chars().count();
        Self {
            text,
            txn,
            mirror,
            chars,
            touched: false,
        }
    }

    fn out_of_bounds(&self, position: usize, len: usize) -> SyncError {
        SyncError::OutOfBounds {
            position,
            len,
            doc_len: self.chars,
        }
    }
}

impl TextSink for DocSink<'_> {
    fn char_len(&self) -> usize {
        self.chars
    }

    fn insert(&mut self, position: usize, text: &str) -> Result<()> {
        let at = byte_offset(&self.mirror, position)
            .ok_or_else(|| self.out_of_bounds(position, 0))?;
        if text.is_empty() {
            return Ok(());
        }
        self.text.insert(&mut self.txn, at as u32, text);
        self.mirror.insert_str(at, text);
        self.chars += text.chars().count();
        self.touched = true;
        Ok(())
    }

    fn delete(&mut self, position: usize, len: usize) -> Result<()> {
        let from = byte_offset(&self.mirror, position)
            .ok_or_else(|| self.out_of_bounds(position, len))?;
        let to = position
            .checked_add(len)
            .and_then(|end| byte_offset(&self.mirror, end))
            .ok_or_else(|| self.out_of_bounds(position, len))?;
        if to > from {
            self.text
                .remove_range(&mut self.txn, from as u32, (to - from) as u32);
            self.mirror.replace_range(from..to, "");
            self.chars -= len;
            self.touched = true;
        }
        Ok(())
    }
}
