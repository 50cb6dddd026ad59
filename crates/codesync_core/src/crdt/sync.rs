//! Sync protocol messages and per-resource handshake state.
//!
//! Messages travel as JSON objects with binary payloads written as arrays of
//! byte values:
//!
//! ```text
//! {"type":"sync-init","resource":{"type":"code","path":"a.ts"}}
//! {"type":"sync-state-vector","resource":{..},"payload":{"stateVector":[1,2,3]}}
//! {"type":"sync-update","resource":{..},"payload":{"update":[1,2,3]}}
//! ```
//!
//! The handshake per resource:
//!
//! 1. The side that first needs a resource sends `Init`.
//! 2. `Init` is answered with the receiver's `StateVector`.
//! 3. A `StateVector` is answered with an `Update` carrying what the sender of
//!    the vector lacks, and, if this side has not sent its own vector yet in
//!    this session, with a `StateVector` of its own so the catch-up runs both ways.
//! 4. `Update` is merged and the resource counts as synced.

use serde::{Deserialize, Serialize};

use super::types::ResourceId;
use crate::error::Result;

/// A message of the sync protocol, scoped to one resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "WireMessage", into = "WireMessage")]
pub enum SyncMessage {
    /// Ask the peer to start (or restart) the catch-up exchange.
    Init {
        /// Resource being synchronized.
        resource: ResourceId,
    },
    /// The sender's state vector.
    StateVector {
        /// Resource being synchronized.
        resource: ResourceId,
        /// Encoded state vector.
        vector: Vec<u8>,
    },
    /// A delta to merge.
    Update {
        /// Resource being synchronized.
        resource: ResourceId,
        /// Encoded update.
        delta: Vec<u8>,
    },
}

impl SyncMessage {
    /// Create an Init message.
    pub fn init(resource: ResourceId) -> Self {
        Self::Init { resource }
    }

    /// Create a StateVector message.
    pub fn state_vector(resource: ResourceId, vector: Vec<u8>) -> Self {
        Self::StateVector { resource, vector }
    }

    /// Create an Update message.
    pub fn update(resource: ResourceId, delta: Vec<u8>) -> Self {
        Self::Update { resource, delta }
    }

    /// The resource this message is about.
    pub fn resource(&self) -> &ResourceId {
        match self {
            Self::Init { resource }
            | Self::StateVector { resource, .. }
            | Self::Update { resource, .. } => resource,
        }
    }

    /// Wire tag of this message.
    pub fn message_type(&self) -> &'static str {
        match self {
            Self::Init { .. } => "sync-init",
            Self::StateVector { .. } => "sync-state-vector",
            Self::Update { .. } => "sync-update",
        }
    }

    /// Serialize to a JSON string.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parse a JSON string.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

#[derive(Serialize, Deserialize)]
#[serde(tag = "type")]
enum WireMessage {
    #[serde(rename = "sync-init")]
    Init { resource: ResourceId },
    #[serde(rename = "sync-state-vector")]
    StateVector {
        resource: ResourceId,
        payload: StateVectorPayload,
    },
    #[serde(rename = "sync-update")]
    Update {
        resource: ResourceId,
        payload: UpdatePayload,
    },
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StateVectorPayload {
    state_vector: Vec<u8>,
}

#[derive(Serialize, Deserialize)]
struct UpdatePayload {
    update: Vec<u8>,
}

impl From<WireMessage> for SyncMessage {
    fn from(wire: WireMessage) -> Self {
        match wire {
            WireMessage::Init { resource } => Self::Init { resource },
            WireMessage::StateVector { resource, payload } => Self::StateVector {
                resource,
                vector: payload.state_vector,
            },
            WireMessage::Update { resource, payload } => Self::Update {
                resource,
                delta: payload.update,
            },
        }
    }
}

impl From<SyncMessage> for WireMessage {
    fn from(message: SyncMessage) -> Self {
        match message {
            SyncMessage::Init { resource } => Self::Init { resource },
            SyncMessage::StateVector { resource, vector } => Self::StateVector {
                resource,
                payload: StateVectorPayload {
                    state_vector: vector,
                },
            },
            SyncMessage::Update { resource, delta } => Self::Update {
                resource,
                payload: UpdatePayload { update: delta },
            },
        }
    }
}

/// Handshake state of one resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SyncState {
    /// Nothing exchanged in this session yet.
    #[default]
    Uninitialized,
    /// `Init` sent or received; waiting for the peer's state vector.
    AwaitingPeerVector,
    /// Both sides have exchanged what the other was missing.
    Synced,
}

impl std::fmt::Display for SyncState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SyncState::Uninitialized => write!(f, "uninitialized"),
            SyncState::AwaitingPeerVector => write!(f, "awaiting-peer-vector"),
            SyncState::Synced => write!(f, "synced"),
        }
    }
}

/// Per-resource protocol bookkeeping.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResourceSync {
    /// Current handshake state.
    pub state: SyncState,
    /// Whether this side has sent its own state vector in the current session.
    pub vector_sent: bool,
}

impl ResourceSync {
    /// Forget the session, keeping nothing but the default state.
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}
