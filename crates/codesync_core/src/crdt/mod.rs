#![doc = include_str!("README.md")]

mod manager;
mod sync;
mod sync_manager;
mod text_doc;
mod types;

pub use manager::DocManager;
pub use sync::{ResourceSync, SyncMessage, SyncState};
pub use sync_manager::{SyncManager, SyncResult};
pub use text_doc::{DEFAULT_TEXT_NAME, DocSink, TextDoc, is_empty_delta};
pub use types::{ResourceId, UpdateOrigin};
