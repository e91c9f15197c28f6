//! In-process session hub.
//!
//! One hub stands for one distributed session. Each participant brings its
//! own [`LocalSceneManager`]; host-issued operations are replicated to every
//! connected participant and each participant's completion is published as a
//! separate event scoped to that participant.

use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::backend::feed::{CompletionToken, EventFeed, Subscription};
use crate::backend::{
    DispatchError, DistributedBackend, LoadGate, LocalSceneManager, ParticipantId, SceneBackend,
    SceneEvent, SceneOp, SessionMembership, SyncMode,
};

use super::{SessionError, SessionMode};

/// A host-issued operation, as recorded by the hub.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchRecord {
    pub participant: ParticipantId,
    pub op: SceneOp,
    pub scene: String,
}

struct Member {
    local: Arc<LocalSceneManager>,
    gate: Option<LoadGate>,
}

#[derive(Default)]
struct HubState {
    host: Option<ParticipantId>,
    members: BTreeMap<ParticipantId, Member>,
    next_id: u64,
    sync_mode: SyncMode,
    in_flight: HashSet<String>,
    dispatched: Vec<DispatchRecord>,
}

#[derive(Default)]
struct HubShared {
    state: Mutex<HubState>,
    feed: EventFeed,
}

impl HubShared {
    fn lock(&self) -> MutexGuard<'_, HubState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Shared state of one session.
#[derive(Clone, Default)]
pub struct SessionHub {
    shared: Arc<HubShared>,
}

impl SessionHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start or join the session in `mode` with this process's scene manager.
    ///
    /// Starting as host (or server) switches followers to additive sync.
    pub fn start(
        &self,
        mode: SessionMode,
        local: Arc<LocalSceneManager>,
    ) -> Result<Arc<SessionParticipant>, SessionError> {
        let mut state = self.shared.lock();

        let id = match mode {
            SessionMode::Host | SessionMode::Server => {
                if let Some(host) = state.host {
                    return Err(SessionError::AlreadyHosted(host));
                }
                let id = ParticipantId(state.next_id);
                state.host = Some(id);
                state.sync_mode = SyncMode::Additive;
                id
            }
            SessionMode::Client => {
                if state.host.is_none() {
                    return Err(SessionError::NoHost);
                }
                ParticipantId(state.next_id)
            }
        };
        state.next_id += 1;
        state.members.insert(id, Member { local: Arc::clone(&local), gate: None });

        log::info!("{} joined the session as {:?}", id, mode);

        Ok(Arc::new(SessionParticipant {
            id,
            mode,
            local,
            hub: Arc::clone(&self.shared),
        }))
    }

    /// Whether a host is currently running the session.
    pub fn is_active(&self) -> bool {
        self.shared.lock().host.is_some()
    }

    pub fn participant_count(&self) -> usize {
        self.shared.lock().members.len()
    }

    pub fn sync_mode(&self) -> SyncMode {
        self.shared.lock().sync_mode
    }

    /// Operations the host has issued through the hub.
    pub fn dispatched(&self) -> Vec<DispatchRecord> {
        self.shared.lock().dispatched.clone()
    }
}

/// One process's membership in a session.
///
/// Serves as both the distributed backend and the membership view for the
/// orchestrator running in that process.
pub struct SessionParticipant {
    id: ParticipantId,
    mode: SessionMode,
    local: Arc<LocalSceneManager>,
    hub: Arc<HubShared>,
}

impl SessionParticipant {
    pub fn id(&self) -> ParticipantId {
        self.id
    }

    pub fn mode(&self) -> SessionMode {
        self.mode
    }

    pub fn local(&self) -> &Arc<LocalSceneManager> {
        &self.local
    }

    fn replicate(&self, scene: &str, op: SceneOp) -> Result<CompletionToken, DispatchError> {
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| DispatchError::NoRuntime)?;

        let (followers, sync_mode) = {
            let mut state = self.hub.lock();
            if state.host.is_none() || !state.members.contains_key(&self.id) {
                return Err(DispatchError::SessionInactive);
            }
            if state.host != Some(self.id) {
                return Err(DispatchError::NotAuthoritative);
            }
            if state.in_flight.contains(scene) {
                return Err(DispatchError::AlreadyInFlight(scene.to_string()));
            }

            let followers: Vec<(ParticipantId, Arc<LocalSceneManager>, Option<LoadGate>)> = state
                .members
                .iter()
                .filter(|&(&id, _)| id != self.id)
                .map(|(&id, m)| (id, Arc::clone(&m.local), m.gate.clone()))
                .collect();
            (followers, state.sync_mode)
        };

        // The host applies the operation first so refusals surface immediately.
        let host_token = match op {
            SceneOp::Load => self.local.load(scene)?,
            SceneOp::Unload => self.local.unload(scene)?,
        };

        {
            let mut state = self.hub.lock();
            state.in_flight.insert(scene.to_string());
            state.dispatched.push(DispatchRecord {
                participant: self.id,
                op,
                scene: scene.to_string(),
            });
        }

        let mut pending = Vec::with_capacity(followers.len());
        for (id, local, gate) in followers {
            let issued = match op {
                SceneOp::Load => {
                    if gate.as_ref().is_some_and(|approve| !approve(scene)) {
                        log::debug!("{} declined to load scene '{}'", id, scene);
                        continue;
                    }
                    if sync_mode == SyncMode::Single {
                        for other in local.resident_scenes() {
                            if other == scene {
                                continue;
                            }
                            if let Err(e) = local.unload(&other) {
                                log::warn!("Failed to unload '{}' on {}: {}", other, id, e);
                            }
                        }
                    }
                    local.load(scene)
                }
                SceneOp::Unload => {
                    if local.resident(scene).is_none() {
                        continue;
                    }
                    local.unload(scene)
                }
            };
            match issued {
                Ok(token) => pending.push((id, token)),
                Err(e) => log::warn!("Failed to replicate {} of '{}' to {}: {}", op, scene, id, e),
            }
        }

        let (token, completer) = CompletionToken::pair(scene, op);
        let hub = Arc::clone(&self.hub);
        let host = self.id;
        let scene = scene.to_string();

        runtime.spawn(async move {
            let resident = host_token.wait().await.unwrap_or(false);
            hub.lock().in_flight.remove(&scene);
            hub.feed.publish(SceneEvent {
                scene: scene.clone(),
                op,
                resident,
                participant: Some(host),
            });
            completer.complete(resident);

            for (id, token) in pending {
                let resident = token.wait().await.unwrap_or(false);
                hub.feed.publish(SceneEvent {
                    scene: scene.clone(),
                    op,
                    resident,
                    participant: Some(id),
                });
            }
        });

        Ok(token)
    }
}

impl DistributedBackend for SessionParticipant {
    fn load(&self, scene: &str) -> Result<CompletionToken, DispatchError> {
        self.replicate(scene, SceneOp::Load)
    }

    fn unload(&self, scene: &str) -> Result<CompletionToken, DispatchError> {
        self.replicate(scene, SceneOp::Unload)
    }

    fn subscribe(&self) -> Subscription {
        self.hub.feed.subscribe()
    }

    fn install_load_gate(&self, gate: Option<LoadGate>) {
        if let Some(member) = self.hub.lock().members.get_mut(&self.id) {
            member.gate = gate;
        }
    }

    fn set_follower_sync_mode(&self, mode: SyncMode) -> Result<(), DispatchError> {
        let mut state = self.hub.lock();
        if state.host != Some(self.id) {
            return Err(DispatchError::NotAuthoritative);
        }
        state.sync_mode = mode;
        Ok(())
    }
}

impl SessionMembership for SessionParticipant {
    fn is_session_active(&self) -> bool {
        let state = self.hub.lock();
        state.host.is_some() && state.members.contains_key(&self.id)
    }

    fn is_host(&self) -> bool {
        self.hub.lock().host == Some(self.id)
    }

    fn local_participant(&self) -> ParticipantId {
        self.id
    }

    fn connected_participant_count(&self) -> usize {
        self.hub.lock().members.len()
    }

    /// Leave the session. The host leaving ends it for everyone.
    fn disconnect_self(&self) {
        let mut state = self.hub.lock();
        if state.host == Some(self.id) {
            state.host = None;
            state.members.clear();
            state.in_flight.clear();
            log::info!("{} shut the session down", self.id);
        } else if state.members.remove(&self.id).is_some() {
            log::info!("{} disconnected from the session", self.id);
        }
    }
}
