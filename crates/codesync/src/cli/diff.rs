//! Diff command handler

use std::path::Path;

use codesync_core::diff::{TextChange, compute_changes};

/// Read both files and print the change list as JSON.
/// Returns true on success.
pub fn handle_diff(before: &Path, after: &Path, compact: bool) -> bool {
    let (old, new) = match (read(before), read(after)) {
        (Some(old), Some(new)) => (old, new),
        _ => return false,
    };

    let changes = compute_changes(&old, &new);
    log::debug!("[Diff] {} change(s)", changes.len());

    match render(&changes, compact) {
        Ok(json) => {
            println!("{}", json);
            true
        }
        Err(e) => {
            eprintln!("✗ Failed to serialize changes: {}", e);
            false
        }
    }
}

fn read(path: &Path) -> Option<String> {
    match std::fs::read_to_string(path) {
        Ok(content) => Some(content),
        Err(e) => {
            eprintln!("✗ Failed to read {}: {}", path.display(), e);
            None
        }
    }
}

fn render(changes: &[TextChange], compact: bool) -> serde_json::Result<String> {
    if compact {
        serde_json::to_string(changes)
    } else {
        serde_json::to_string_pretty(changes)
    }
}
