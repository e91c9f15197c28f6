use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use stagehand::{
    CatalogueConfig, EntryConfig, LoadTrigger, LocalSceneManager, SceneOrchestrator, SessionHub,
    SessionMode, SessionParticipant,
};

pub(crate) const SCENES: [&str; 4] = ["MainMenu", "Lobby", "Arena", "Credits"];

/// MainMenu at startup, Arena only when triggered and only by the host.
pub(crate) fn menu_and_arena() -> CatalogueConfig {
    CatalogueConfig::new(vec![
        EntryConfig::new("MainMenu", LoadTrigger::Startup),
        EntryConfig::new("Arena", LoadTrigger::Triggered).session_scoped(true),
    ])
}

pub(crate) fn standalone(
    local: &Arc<LocalSceneManager>,
    catalogue: CatalogueConfig,
) -> SceneOrchestrator {
    SceneOrchestrator::builder(Arc::clone(local))
        .catalogue(catalogue)
        .build()
        .expect("Failed to build orchestrator")
}

pub(crate) struct Session {
    pub(crate) hub: SessionHub,
    pub(crate) host: Arc<SessionParticipant>,
    pub(crate) client: Arc<SessionParticipant>,
}

/// A hosted session with one client.
pub(crate) fn session(host_local: Arc<LocalSceneManager>, client_local: Arc<LocalSceneManager>) -> Session {
    let hub = SessionHub::new();
    let host = hub
        .start(SessionMode::Host, host_local)
        .expect("Failed to host session");
    let client = hub
        .start(SessionMode::Client, client_local)
        .expect("Failed to join session");
    Session { hub, host, client }
}

pub(crate) fn participant_orchestrator(
    participant: &Arc<SessionParticipant>,
    catalogue: CatalogueConfig,
) -> SceneOrchestrator {
    SceneOrchestrator::builder(Arc::clone(participant.local()))
        .catalogue(catalogue)
        .session(Arc::clone(participant))
        .build()
        .expect("Failed to build orchestrator")
}

/// Let spawned completions and replication settle.
pub(crate) async fn settle() {
    tokio::time::sleep(Duration::from_millis(50)).await;
}

pub(crate) fn counter() -> (Arc<AtomicUsize>, impl Fn() + Send + Sync + 'static) {
    let count = Arc::new(AtomicUsize::new(0));
    let inner = Arc::clone(&count);
    (count, move || {
        inner.fetch_add(1, Ordering::SeqCst);
    })
}
