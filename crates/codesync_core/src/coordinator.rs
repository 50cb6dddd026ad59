//! Edit coordinator for surfaces that report whole-content snapshots.
//!
//! A UI surface typically only says "the text is now S". [`EditCoordinator`]
//! turns that into CRDT operations: it keeps the last known content as a
//! baseline, waits for a quiet period after the latest input, then diffs,
//! applies and exports the edit as one `Update`.
//!
//! The coordinator is a plain state machine driven by the caller's clock; the
//! async loop in [`surface`](crate::surface) feeds it inputs and deadlines.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

use crate::crdt::{SyncMessage, TextDoc};
use crate::diff::compute_changes;
use crate::error::Result;

/// What a flush did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlushOutcome {
    /// Nothing to send: no pending input, or it matched the baseline.
    Unchanged,
    /// The edit was applied; send this message to the peer.
    Exported(SyncMessage),
    /// The edit no longer fit the document and was dropped. The payload is
    /// the document's current text, now the new baseline.
    Resynced(String),
}

/// Debounces content snapshots for one document and turns them into updates.
#[derive(Debug)]
pub struct EditCoordinator {
    doc: Arc<TextDoc>,
    window: Duration,
    baseline: String,
    pending: Option<String>,
    deadline: Option<Instant>,
}

impl EditCoordinator {
    /// Create a coordinator whose baseline is the document's current text.
    pub fn new(doc: Arc<TextDoc>, window: Duration) -> Self {
        let baseline = doc.text();
        Self {
            doc,
            window,
            baseline,
            pending: None,
            deadline: None,
        }
    }

    /// The document this coordinator feeds.
    pub fn doc(&self) -> &Arc<TextDoc> {
        &self.doc
    }

    /// Content the next diff will be computed against.
    pub fn baseline(&self) -> &str {
        &self.baseline
    }

    /// Whether an input is waiting for its quiet period to end.
    pub fn has_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// When the pending input becomes due, if there is one.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Whether the pending input's quiet period has passed at `now`.
    pub fn is_due(&self, now: Instant) -> bool {
        self.deadline.is_some_and(|deadline| now >= deadline)
    }

    /// Record a content snapshot from the surface.
    ///
    /// Snapshots raised while a peer delta is being merged are echoes and are
    /// ignored, as are snapshots equal to the latest known content. Anything
    /// else becomes the pending input and restarts the quiet period.
    /// Returns whether the snapshot was accepted.
    pub fn on_input(&mut self, content: &str, now: Instant) -> bool {
        if self.doc.is_applying_remote() {
            log::trace!("[Coordinator] Ignoring echo for {}", self.doc.resource());
            return false;
        }

        let latest = self.pending.as_deref().unwrap_or(&self.baseline);
        if latest == content {
            return false;
        }

        self.pending = Some(content.to_string());
        self.deadline = Some(now + self.window);
        true
    }

    /// Diff, apply and export the pending input now, regardless of the deadline.
    pub fn flush(&mut self) -> Result<FlushOutcome> {
        self.deadline = None;
        let Some(content) = self.pending.take() else {
            return Ok(FlushOutcome::Unchanged);
        };

        let changes = compute_changes(&self.baseline, &content);
        if changes.is_empty() {
            return Ok(FlushOutcome::Unchanged);
        }

        match self.doc.apply_changes(&changes) {
            Ok(_) => {
                self.baseline = content;
                Ok(match self.doc.export_delta() {
                    Some(delta) => FlushOutcome::Exported(SyncMessage::update(
                        self.doc.resource().clone(),
                        delta,
                    )),
                    None => FlushOutcome::Unchanged,
                })
            }
            Err(e) if e.is_out_of_bounds() => {
                log::warn!(
                    "[Coordinator] Dropping edit for {}: {}",
                    self.doc.resource(),
                    e
                );
                self.baseline = self.doc.text();
                Ok(FlushOutcome::Resynced(self.baseline.clone()))
            }
            Err(e) => Err(e),
        }
    }

    /// Flush only if the pending input is due at `now`.
    pub fn flush_if_due(&mut self, now: Instant) -> Result<FlushOutcome> {
        if self.is_due(now) {
            self.flush()
        } else {
            Ok(FlushOutcome::Unchanged)
        }
    }

    /// Adopt content that arrived from the peer as the new baseline.
    pub fn accept_remote(&mut self, content: &str) {
        self.baseline = content.to_string();
    }

    /// Remove the pending input without applying it.
    pub fn take_pending(&mut self) -> Option<String> {
        self.deadline = None;
        self.pending.take()
    }
}
