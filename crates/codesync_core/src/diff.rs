//! Minimal text diffing and change application.
//!
//! [`compute_changes`] reduces two versions of a string to the single
//! replacement that turns one into the other, and [`apply_changes`] replays a
//! list of such replacements onto any [`TextSink`]. All offsets count Unicode
//! scalar values (code points), never bytes.

use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::error::{Result, SyncError};

/// A single replacement: remove `delete` characters at `start`, then insert `insert` there.
///
/// In a list of changes every `start` is measured against the original string;
/// [`apply_changes`] corrects for the shift caused by earlier changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct TextChange {
    /// Offset in code points where the change begins.
    pub start: usize,
    /// Number of code points removed.
    pub delete: usize,
    /// Text inserted at `start` after the removal.
    pub insert: String,
}

impl TextChange {
    /// Create a new change.
    pub fn new(start: usize, delete: usize, insert: impl Into<String>) -> Self {
        Self {
            start,
            delete,
            insert: insert.into(),
        }
    }

    /// Create a pure insertion.
    pub fn insertion(start: usize, insert: impl Into<String>) -> Self {
        Self::new(start, 0, insert)
    }

    /// Create a pure deletion.
    pub fn deletion(start: usize, delete: usize) -> Self {
        Self::new(start, delete, String::new())
    }

    /// Length of the inserted text in code points.
    pub fn insert_len(&self) -> usize {
        self.insert.chars().count()
    }

    /// Change in document length caused by applying this change.
    fn delta(&self) -> isize {
        self.insert_len() as isize - self.delete as isize
    }
}

/// Compute the minimal edit turning `before` into `after`.
///
/// Returns an empty list when the strings are equal, otherwise exactly one
/// change covering everything between the longest common prefix and the
/// longest common suffix. The suffix never overlaps the prefix.
pub fn compute_changes(before: &str, after: &str) -> Vec<TextChange> {
    if before == after {
        return Vec::new();
    }

    let old_chars: Vec<char> = before.chars().collect();
    let new_chars: Vec<char> = after.chars().collect();

    let prefix = old_chars
        .iter()
        .zip(new_chars.iter())
        .take_while(|(a, b)| a == b)
        .count();

    let max_suffix = (old_chars.len() - prefix).min(new_chars.len() - prefix);
    let suffix = old_chars[prefix..]
        .iter()
        .rev()
        .zip(new_chars[prefix..].iter().rev())
        .take(max_suffix)
        .take_while(|(a, b)| a == b)
        .count();

    let delete = old_chars.len() - prefix - suffix;
    let insert: String = new_chars[prefix..new_chars.len() - suffix].iter().collect();

    if delete == 0 && insert.is_empty() {
        return Vec::new();
    }

    vec![TextChange {
        start: prefix,
        delete,
        insert,
    }]
}

/// Something that can receive positional text edits.
///
/// Positions and lengths are code points. Implementations must reject
/// out-of-range edits with [`SyncError::OutOfBounds`] instead of clamping.
pub trait TextSink {
    /// Current length in code points.
    fn char_len(&self) -> usize;

    /// Insert `text` at `position`.
    fn insert(&mut self, position: usize, text: &str) -> Result<()>;

    /// Remove `len` code points starting at `position`.
    fn delete(&mut self, position: usize, len: usize) -> Result<()>;
}

/// Check that `changes` fit a document of `doc_len` code points.
///
/// Runs the same offset bookkeeping as [`apply_changes`] without touching a
/// sink, so a failing batch can be rejected before anything is mutated.
pub fn validate_changes(doc_len: usize, changes: &[TextChange]) -> Result<()> {
    let mut len = doc_len as isize;
    let mut offset: isize = 0;

    for change in changes {
        let position = change.start as isize + offset;
        if position < 0 || position + change.delete as isize > len {
            return Err(SyncError::OutOfBounds {
                position: position.max(0) as usize,
                len: change.delete,
                doc_len: len.max(0) as usize,
            });
        }
        len += change.delta();
        offset += change.delta();
    }

    Ok(())
}

/// Apply `changes` to `target` left to right, correcting each start for the
/// net shift of the changes before it.
///
/// The whole batch is validated first; on error `target` is left untouched.
pub fn apply_changes<S: TextSink + ?Sized>(target: &mut S, changes: &[TextChange]) -> Result<()> {
    validate_changes(target.char_len(), changes)?;

    let mut offset: isize = 0;
    for change in changes {
        let position = (change.start as isize + offset) as usize;

        if change.delete > 0 {
            target.delete(position, change.delete)?;
            offset -= change.delete as isize;
        }

        if !change.insert.is_empty() {
            target.insert(position, &change.insert)?;
            offset += change.insert_len() as isize;
        }
    }

    Ok(())
}

/// Convert a code-point position in `s` to a byte offset.
///
/// `position == char count` maps to `s.len()`; anything past it is `None`.
pub(crate) fn byte_offset(s: &str, position: usize) -> Option<usize> {
    s.char_indices()
        .map(|(i, _)| i)
        .chain(std::iter::once(s.len()))
        .nth(position)
}

impl TextSink for String {
    fn char_len(&self) -> usize {
        self.chars().count()
    }

    fn insert(&mut self, position: usize, text: &str) -> Result<()> {
        let at = byte_offset(self, position).ok_or_else(|| SyncError::OutOfBounds {
            position,
            len: 0,
            doc_len: self.chars().count(),
        })?;
        self.insert_str(at, text);
        Ok(())
    }

    fn delete(&mut self, position: usize, len: usize) -> Result<()> {
        let out_of_bounds = || SyncError::OutOfBounds {
            position,
            len,
            doc_len: self.chars().count(),
        };
        let from = byte_offset(self, position).ok_or_else(out_of_bounds)?;
        let to = byte_offset(self, position + len).ok_or_else(out_of_bounds)?;
        self.replace_range(from..to, "");
        Ok(())
    }
}
