//! Core types shared by the CRDT layer and the sync protocol.
//!
//! This module defines how resources are addressed on the wire and how the
//! origin of a document change is reported to observers.

use serde::{Deserialize, Serialize};
use ts_rs::TS;

/// Identifies one synchronized document on a shared channel.
///
/// Serialized as an internally tagged object, e.g. `{"type":"code","path":"src/main.ts"}`.
/// New resource kinds are added as new variants with a distinct tag, so
/// identifiers of different kinds never compare equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ResourceId {
    /// A source file, addressed by its workspace-relative path.
    Code {
        /// Path of the file.
        path: String,
    },
}

impl ResourceId {
    /// Create a code resource identifier.
    pub fn code(path: impl Into<String>) -> Self {
        Self::Code { path: path.into() }
    }

    /// The wire tag of this resource kind.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Code { .. } => "code",
        }
    }

    /// The path this resource refers to.
    pub fn path(&self) -> &str {
        match self {
            Self::Code { path } => path,
        }
    }

    /// Build an identifier from a kind tag and a path.
    ///
    /// Returns `None` for kinds this build does not know about.
    pub fn from_kind(kind: &str, path: impl Into<String>) -> Option<Self> {
        match kind {
            "code" => Some(Self::code(path)),
            _ => None,
        }
    }
}

impl std::fmt::Display for ResourceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.kind(), self.path())
    }
}

/// Origin of a CRDT update, used to distinguish local vs remote changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UpdateOrigin {
    /// Update originated from a local edit
    Local,

    /// Update received from the peer during normal operation
    Remote,

    /// Update received while catching up after a handshake
    Sync,
}

impl std::fmt::Display for UpdateOrigin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UpdateOrigin::Local => write!(f, "local"),
            UpdateOrigin::Remote => write!(f, "remote"),
            UpdateOrigin::Sync => write!(f, "sync"),
        }
    }
}

impl std::str::FromStr for UpdateOrigin {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "local" => Ok(UpdateOrigin::Local),
            "remote" => Ok(UpdateOrigin::Remote),
            "sync" => Ok(UpdateOrigin::Sync),
            _ => Err(format!("Unknown update origin: {}", s)),
        }
    }
}
