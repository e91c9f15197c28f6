//! Distributed sessions.
//!
//! A [`SessionHub`] is one session shared by several in-process participants.
//! Each [`SessionParticipant`] is handed to that participant's orchestrator
//! as both its distributed backend and its membership view.

pub mod hub;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::backend::ParticipantId;

pub use hub::{DispatchRecord, SessionHub, SessionParticipant};

/// How a process takes part in a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionMode {
    /// Authoritative participant that also plays
    Host,
    /// Follower joining a running session
    Client,
    /// Authoritative participant without local play
    Server,
}

impl SessionMode {
    pub fn is_authoritative(self) -> bool {
        matches!(self, Self::Host | Self::Server)
    }
}

/// Errors starting or joining a session.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("session is already hosted by {0}")]
    AlreadyHosted(ParticipantId),

    #[error("no host is running the session")]
    NoHost,
}
