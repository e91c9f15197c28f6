//! Collaborator interfaces for scene backends and session membership.
//!
//! This module provides:
//! - The local and distributed backend contracts (`SceneBackend`, `DistributedBackend`)
//! - Session membership queries (`SessionMembership`)
//! - Completion events, subscriptions and tokens (`feed`)
//! - An in-process scene manager (`local`)

pub mod feed;
pub mod local;

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use feed::{CompletionToken, EventFeed, Subscription};
pub use local::LocalSceneManager;

/// Reasons a backend refuses to start a load or unload.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DispatchError {
    #[error("only the session host may issue scene operations")]
    NotAuthoritative,

    #[error("an operation on scene '{0}' is already in flight")]
    AlreadyInFlight(String),

    #[error("unknown scene '{0}'")]
    UnknownScene(String),

    #[error("scene '{0}' is not resident")]
    NotResident(String),

    #[error("no session is active")]
    SessionInactive,

    #[error("no async runtime available to run the operation")]
    NoRuntime,

    #[error("operation rejected: {0}")]
    Rejected(String),
}

/// Identity of a session participant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ParticipantId(pub u64);

impl fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "participant-{}", self.0)
    }
}

/// Opaque reference to a live scene instance.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SceneHandle {
    id: u64,
    name: Arc<str>,
}

impl SceneHandle {
    pub(crate) fn new(id: u64, name: &str) -> Self {
        Self {
            id,
            name: Arc::from(name),
        }
    }

    /// Instance id, unique per backend.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Name of the content unit this instance belongs to.
    pub fn name(&self) -> &str {
        &self.name
    }
}

/// The two processing verbs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SceneOp {
    Load,
    Unload,
}

impl fmt::Display for SceneOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Load => write!(f, "load"),
            Self::Unload => write!(f, "unload"),
        }
    }
}

/// Completion notification emitted by a backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SceneEvent {
    /// Content unit the operation targeted
    pub scene: String,
    /// Operation that finished
    pub op: SceneOp,
    /// Whether the unit is resident after the operation
    pub resident: bool,
    /// Participant the notification is scoped to (distributed backend only)
    pub participant: Option<ParticipantId>,
}

/// Predicate a follower installs to approve host-initiated loads.
pub type LoadGate = Arc<dyn Fn(&str) -> bool + Send + Sync>;

/// How followers apply host-initiated loads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncMode {
    /// Replace the follower's resident units with the loaded one
    #[default]
    Single,
    /// Load alongside whatever the follower already has resident
    Additive,
}

/// Single-process content-unit manager.
pub trait SceneBackend: Send + Sync {
    /// Bring a unit into memory additively.
    fn load(&self, scene: &str) -> Result<CompletionToken, DispatchError>;

    /// Remove a unit's resident instance.
    fn unload(&self, scene: &str) -> Result<CompletionToken, DispatchError>;

    /// Live instance of a unit, if resident.
    fn resident(&self, scene: &str) -> Option<SceneHandle>;

    /// Whether the backend can load a unit by this name at all.
    fn knows(&self, scene: &str) -> bool;

    /// Current foreground unit.
    fn active_scene(&self) -> Option<String>;

    /// Make a resident unit the foreground unit, returning the previous one.
    fn set_active_scene(&self, handle: &SceneHandle) -> Result<Option<String>, DispatchError>;

    /// Receive `(name, residency)` completions.
    fn subscribe(&self) -> Subscription;
}

/// Session-replicated content-unit manager.
pub trait DistributedBackend: Send + Sync {
    /// Load a unit on every participant. Host only.
    fn load(&self, scene: &str) -> Result<CompletionToken, DispatchError>;

    /// Unload a unit on every participant. Host only.
    fn unload(&self, scene: &str) -> Result<CompletionToken, DispatchError>;

    /// Receive completions; each is scoped to one participant.
    fn subscribe(&self) -> Subscription;

    /// Install (or clear) the gate consulted before a host-initiated load.
    fn install_load_gate(&self, gate: Option<LoadGate>);

    /// Configure how followers apply host-initiated loads. Host only.
    fn set_follower_sync_mode(&self, mode: SyncMode) -> Result<(), DispatchError>;
}

/// Session membership queries.
pub trait SessionMembership: Send + Sync {
    fn is_session_active(&self) -> bool;

    fn is_host(&self) -> bool;

    fn local_participant(&self) -> ParticipantId;

    /// Connected participants, this process included.
    fn connected_participant_count(&self) -> usize;

    fn disconnect_self(&self);
}

/// Membership for a process that never joins a session.
#[derive(Debug, Clone, Copy, Default)]
pub struct Standalone;

impl SessionMembership for Standalone {
    fn is_session_active(&self) -> bool {
        false
    }

    fn is_host(&self) -> bool {
        false
    }

    fn local_participant(&self) -> ParticipantId {
        ParticipantId(0)
    }

    fn connected_participant_count(&self) -> usize {
        0
    }

    fn disconnect_self(&self) {}
}
