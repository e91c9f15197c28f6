//! Stagehand - scene lifecycle orchestration for standalone and session-replicated processes.

mod defaults;
pub mod error;

pub mod backend;
pub mod bootstrap;
pub mod config;
pub mod orchestrator;
pub mod scene;
pub mod session;

pub use error::{Error, Result};

pub use backend::{
    CompletionToken, DispatchError, DistributedBackend, EventFeed, LoadGate, LocalSceneManager,
    ParticipantId, SceneBackend, SceneEvent, SceneHandle, SceneOp, SessionMembership, Standalone,
    Subscription, SyncMode,
};
pub use config::{CatalogueConfig, ConfigError, EntryConfig, OrchestratorConfig, SceneAction};
pub use orchestrator::{OrchestratorBuilder, SceneOrchestrator, SessionRole};
pub use scene::{
    Catalogue, Completion, EntrySnapshot, LoadTrigger, ProcessState, ReconciliationWarning,
    SceneCallback, SceneEntry,
};
pub use session::{DispatchRecord, SessionError, SessionHub, SessionMode, SessionParticipant};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
