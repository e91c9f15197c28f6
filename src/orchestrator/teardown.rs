//! Session teardown barrier.
//!
//! Started when a teardown entry leaves residency. The session is only
//! terminated once every dependent entry is stable and, on the host, every
//! other participant has disconnected.

use std::sync::Arc;

use super::Inner;
use crate::scene::SceneEntry;

impl Inner {
    pub(super) fn begin_teardown(self: &Arc<Self>, entry: &Arc<SceneEntry>) {
        let mut slot = self.teardown_slot();
        if slot.as_ref().is_some_and(|task| !task.is_finished()) {
            log::debug!("Session teardown already in progress");
            return;
        }

        if !self.session.is_session_active() {
            log::info!(
                "Scene '{}' unloaded with no active session; nothing to tear down",
                entry.name()
            );
            return;
        }

        log::info!(
            "Scene '{}' unloaded; draining session before teardown",
            entry.name()
        );
        let drain = drain_session(Arc::clone(self), entry.name().to_string(), entry.dependents());
        *slot = Some(self.runtime.spawn(drain));
    }
}

async fn drain_session(inner: Arc<Inner>, scene: String, dependents: Vec<Arc<SceneEntry>>) {
    let cadence = inner.config.teardown_cadence();

    loop {
        // Let in-flight completions and disconnects land before each check.
        tokio::time::sleep(cadence).await;

        if !inner.session.is_session_active() {
            log::info!("Session ended while draining for '{}'", scene);
            let mut state = inner.lock();
            inner.unsubscribe_session(&mut state);
            return;
        }

        let pending = dependents.iter().filter(|d| !d.is_processed()).count();
        let remote = if inner.session.is_host() {
            inner.session.connected_participant_count().saturating_sub(1)
        } else {
            0
        };
        if pending == 0 && remote == 0 {
            break;
        }

        log::debug!(
            "Teardown waiting on {} dependent scenes and {} participants",
            pending,
            remote
        );
    }

    // The loop keeps its local subscription for entries still in flight.
    {
        let mut state = inner.lock();
        inner.unsubscribe_session(&mut state);
        inner.session.disconnect_self();
    }
    log::info!("Session torn down after '{}' unloaded", scene);
}
