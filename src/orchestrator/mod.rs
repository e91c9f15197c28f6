//! Scene orchestrator.
//!
//! Provides the `SceneOrchestrator` which:
//! - Owns the catalogue and seeds entry states from local residency
//! - Runs the single-flight processing loop
//! - Selects the local or distributed backend for every operation
//! - Routes completion notifications into entries

mod teardown;

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::sync::Notify;
use tokio::task::JoinHandle;

use crate::backend::{
    DispatchError, DistributedBackend, LoadGate, SceneBackend, SceneEvent, SceneOp,
    SessionMembership, Standalone, Subscription,
};
use crate::config::{CatalogueConfig, ConfigError, OrchestratorConfig};
use crate::error::{Error, Result};
use crate::scene::entry::EntryHost;
use crate::scene::{Catalogue, Completion, LoadTrigger, ProcessState, SceneEntry};

/// Which part this process plays when issuing operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionRole {
    /// No session: the local backend issues and completes everything
    Standalone,
    /// Authoritative session participant: issues through the distributed backend
    Host,
    /// Non-authoritative participant: never issues, waits for the host
    Follower,
}

#[derive(Default)]
struct LoopState {
    running: bool,
    active: Option<usize>,
    /// Local completions, held while the loop runs
    local_listener: Option<JoinHandle<()>>,
    /// Distributed completions, held until the session is left
    session_listener: Option<JoinHandle<()>>,
    gate_installed: bool,
    loop_task: Option<JoinHandle<()>>,
}

impl LoopState {
    fn subscribed(&self) -> bool {
        self.local_listener.is_some() || self.session_listener.is_some()
    }
}

enum Step {
    Wait,
    Dispatch(Arc<SceneEntry>),
    Finished,
}

struct Inner {
    catalogue: Catalogue,
    local: Arc<dyn SceneBackend>,
    distributed: Option<Arc<dyn DistributedBackend>>,
    session: Arc<dyn SessionMembership>,
    config: OrchestratorConfig,
    runtime: Handle,
    state: Mutex<LoopState>,
    /// Signalled whenever a completion has been routed
    resolved: Notify,
    teardown: Mutex<Option<JoinHandle<()>>>,
}

/// Builder for [`SceneOrchestrator`].
pub struct OrchestratorBuilder {
    local: Arc<dyn SceneBackend>,
    distributed: Option<Arc<dyn DistributedBackend>>,
    session: Arc<dyn SessionMembership>,
    catalogue: CatalogueConfig,
    config: OrchestratorConfig,
}

impl OrchestratorBuilder {
    pub fn catalogue(mut self, catalogue: CatalogueConfig) -> Self {
        self.catalogue = catalogue;
        self
    }

    /// Take part in a session through `participant`.
    pub fn session<S>(mut self, participant: Arc<S>) -> Self
    where
        S: DistributedBackend + SessionMembership + 'static,
    {
        let distributed: Arc<dyn DistributedBackend> = participant.clone();
        let session: Arc<dyn SessionMembership> = participant;
        self.distributed = Some(distributed);
        self.session = session;
        self
    }

    pub fn config(mut self, config: OrchestratorConfig) -> Self {
        self.config = config;
        self
    }

    /// Build the orchestrator. Must be called from within a tokio runtime.
    pub fn build(self) -> Result<SceneOrchestrator> {
        let runtime = Handle::try_current().map_err(|e| Error::Runtime(e.to_string()))?;
        let catalogue = Catalogue::from_config(&self.catalogue, self.local.as_ref())?;

        let inner = Arc::new(Inner {
            catalogue,
            local: self.local,
            distributed: self.distributed,
            session: self.session,
            config: self.config,
            runtime,
            state: Mutex::new(LoopState::default()),
            resolved: Notify::new(),
            teardown: Mutex::new(None),
        });

        let weak: Weak<Inner> = Arc::downgrade(&inner);
        let host: Weak<dyn EntryHost> = weak;
        for entry in inner.catalogue.iter() {
            entry.attach(host.clone());
        }

        // Followers learn residency from the host and listen to it from the start.
        if inner.role() == SessionRole::Follower {
            let mut state = inner.lock();
            inner.subscribe_session(&mut state);
        } else {
            for entry in inner.catalogue.iter() {
                entry.initialize(inner.local.resident(entry.name()));
            }
        }

        log::debug!(
            "Scene orchestrator built with {} entries as {:?}",
            inner.catalogue.len(),
            inner.role()
        );

        Ok(SceneOrchestrator { inner })
    }
}

/// Drives the catalogue's entries through their load and unload operations.
pub struct SceneOrchestrator {
    inner: Arc<Inner>,
}

impl SceneOrchestrator {
    /// Start building an orchestrator around the process's local backend.
    pub fn builder<L>(local: Arc<L>) -> OrchestratorBuilder
    where
        L: SceneBackend + 'static,
    {
        OrchestratorBuilder {
            local,
            distributed: None,
            session: Arc::new(Standalone),
            catalogue: CatalogueConfig::default(),
            config: OrchestratorConfig::default(),
        }
    }

    /// Request every startup entry and start the processing loop.
    pub fn start(&self) -> Result<()> {
        let startup: Vec<&Arc<SceneEntry>> = self
            .inner
            .catalogue
            .iter()
            .filter(|e| e.trigger() == LoadTrigger::Startup)
            .collect();

        if startup.is_empty() && self.inner.config.require_startup_entry {
            return Err(ConfigError::NoStartupEntry.into());
        }

        log::info!(
            "Starting scene orchestrator: {} entries, {} at startup",
            self.inner.catalogue.len(),
            startup.len()
        );

        for entry in startup {
            entry.request_load();
        }
        self.inner.start_processing();
        Ok(())
    }

    /// Request a load by entry name.
    pub fn request_load(&self, name: &str) -> Result<()> {
        self.require(name)?.request_load();
        Ok(())
    }

    /// Request an unload by entry name.
    pub fn request_unload(&self, name: &str) -> Result<()> {
        self.require(name)?.request_unload();
        Ok(())
    }

    pub fn entry(&self, name: &str) -> Option<&Arc<SceneEntry>> {
        self.inner.catalogue.get(name)
    }

    pub fn catalogue(&self) -> &Catalogue {
        &self.inner.catalogue
    }

    pub fn state(&self, name: &str) -> Option<ProcessState> {
        self.entry(name).map(|e| e.state())
    }

    pub fn role(&self) -> SessionRole {
        self.inner.role()
    }

    /// Whether the processing loop is running.
    pub fn is_processing(&self) -> bool {
        self.inner.lock().running
    }

    /// Whether completion notifications are currently being received.
    pub fn is_subscribed(&self) -> bool {
        self.inner.lock().subscribed()
    }

    /// Name of the entry currently being processed.
    pub fn active_entry(&self) -> Option<String> {
        let active = self.inner.lock().active;
        active.map(|i| self.inner.catalogue.entries()[i].name().to_string())
    }

    /// Whether a follower would accept a host-initiated load of `scene`.
    pub fn approves_remote_load(&self, scene: &str) -> bool {
        self.inner.approves_remote_load(scene)
    }

    /// Whether the teardown barrier (or a follower's local exit) is running.
    pub fn is_tearing_down(&self) -> bool {
        self.inner
            .teardown_slot()
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }

    /// Wait for the teardown barrier, if any, to finish.
    pub async fn wait_for_teardown(&self) {
        loop {
            let task = self.inner.teardown_slot().take();
            match task {
                Some(task) => {
                    if let Err(e) = task.await {
                        log::warn!("Teardown task ended abnormally: {}", e);
                    }
                }
                None => return,
            }
        }
    }

    /// Wait until the processing loop has nothing left to do.
    pub async fn wait_until_idle(&self) {
        let tick = Duration::from_millis(self.inner.config.tick_ms.max(1));
        while self.is_processing() {
            tokio::time::sleep(tick).await;
        }
    }

    /// Stop the loop, drop subscriptions and abandon any teardown in progress.
    pub fn shutdown(&self) {
        {
            let mut state = self.inner.lock();
            state.running = false;
            state.active = None;
            if let Some(task) = state.loop_task.take() {
                task.abort();
            }
            self.inner.unsubscribe(&mut state);
        }
        if let Some(task) = self.inner.teardown_slot().take() {
            task.abort();
        }
    }

    pub(crate) fn local_backend(&self) -> &Arc<dyn SceneBackend> {
        &self.inner.local
    }

    fn require(&self, name: &str) -> Result<&Arc<SceneEntry>> {
        self.entry(name)
            .ok_or_else(|| DispatchError::UnknownScene(name.to_string()).into())
    }
}

impl Drop for SceneOrchestrator {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, LoopState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn teardown_slot(&self) -> MutexGuard<'_, Option<JoinHandle<()>>> {
        self.teardown.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn role(&self) -> SessionRole {
        match self.distributed {
            Some(_) if self.session.is_session_active() => {
                if self.session.is_host() {
                    SessionRole::Host
                } else {
                    SessionRole::Follower
                }
            }
            _ => SessionRole::Standalone,
        }
    }

    fn approves_remote_load(&self, scene: &str) -> bool {
        self.catalogue
            .get(scene)
            .is_some_and(|e| e.is_session_scoped() || e.is_default_active())
    }

    /// Start the processing loop unless it is already running.
    fn start_processing(self: &Arc<Self>) {
        let mut state = self.lock();
        if state.running {
            self.resolved.notify_one();
            return;
        }
        state.running = true;
        // Subscribe before the loop can dispatch anything.
        self.subscribe(&mut state);
        state.loop_task = Some(self.runtime.spawn(run_loop(Arc::clone(self))));
        log::debug!("Processing loop started");
    }

    fn next_step(self: &Arc<Self>) -> Step {
        let mut state = self.lock();
        // Leaving the session changes which completions the loop needs.
        self.subscribe(&mut state);

        if let Some(i) = state.active {
            if !self.catalogue.entries()[i].is_processed() {
                return Step::Wait;
            }
            state.active = None;
        }

        match self.catalogue.first_pending() {
            Some(i) => {
                state.active = Some(i);
                Step::Dispatch(Arc::clone(&self.catalogue.entries()[i]))
            }
            None => {
                state.running = false;
                state.loop_task = None;
                self.unsubscribe_local(&mut state);
                Step::Finished
            }
        }
    }

    /// Hand the entry's pending operation to the backend for this role.
    fn dispatch(&self, entry: &Arc<SceneEntry>) {
        let op = match entry.state() {
            ProcessState::Loading => SceneOp::Load,
            ProcessState::Unloading => SceneOp::Unload,
            _ => return,
        };
        let role = self.role();

        // Marked first: the completion may be routed before the call returns.
        entry.mark_dispatched();

        let issued = match (role, &self.distributed) {
            (SessionRole::Follower, _) => {
                log::debug!(
                    "Waiting for the session host to {} scene '{}'",
                    op,
                    entry.name()
                );
                return;
            }
            (SessionRole::Host, Some(distributed)) => match op {
                SceneOp::Load => distributed.load(entry.name()),
                SceneOp::Unload => distributed.unload(entry.name()),
            },
            _ => match op {
                SceneOp::Load => self.local.load(entry.name()),
                SceneOp::Unload => self.local.unload(entry.name()),
            },
        };

        match issued {
            Ok(_) => log::debug!("Issued {} of scene '{}' as {:?}", op, entry.name(), role),
            Err(e) => {
                log::error!("Failed to {} scene '{}': {}", op, entry.name(), e);
                entry.revert();
            }
        }
    }

    /// Hold the listeners the current role needs.
    fn subscribe(self: &Arc<Self>, state: &mut LoopState) {
        let role = self.role();
        if role != SessionRole::Follower && state.local_listener.is_none() {
            let listener = listen(Arc::downgrade(self), self.local.subscribe());
            state.local_listener = Some(self.runtime.spawn(listener));
            log::debug!("Subscribed to local scene completions");
        }
        if role != SessionRole::Standalone {
            self.subscribe_session(state);
        }
    }

    fn subscribe_session(self: &Arc<Self>, state: &mut LoopState) {
        let Some(distributed) = &self.distributed else {
            return;
        };
        if state.session_listener.is_none() {
            let listener = listen(Arc::downgrade(self), distributed.subscribe());
            state.session_listener = Some(self.runtime.spawn(listener));
            log::debug!("Subscribed to session scene completions");
        }
        if self.role() == SessionRole::Follower && !state.gate_installed {
            distributed.install_load_gate(Some(self.load_gate()));
            state.gate_installed = true;
        }
    }

    fn unsubscribe_local(&self, state: &mut LoopState) {
        if let Some(listener) = state.local_listener.take() {
            listener.abort();
        }
    }

    /// Stop receiving session completions and clear the load gate.
    fn unsubscribe_session(&self, state: &mut LoopState) {
        if let Some(listener) = state.session_listener.take() {
            listener.abort();
        }
        if state.gate_installed {
            if let Some(distributed) = &self.distributed {
                distributed.install_load_gate(None);
            }
            state.gate_installed = false;
        }
    }

    fn unsubscribe(&self, state: &mut LoopState) {
        self.unsubscribe_local(state);
        self.unsubscribe_session(state);
    }

    fn load_gate(self: &Arc<Self>) -> LoadGate {
        let inner = Arc::downgrade(self);
        Arc::new(move |scene: &str| {
            inner
                .upgrade()
                .is_some_and(|inner| inner.approves_remote_load(scene))
        })
    }

    /// Deliver a completion to the entry it names.
    fn route(self: &Arc<Self>, event: SceneEvent) {
        if let Some(participant) = event.participant {
            if participant != self.session.local_participant() {
                return;
            }
        }

        let Some(entry) = self.catalogue.get(&event.scene) else {
            log::debug!(
                "Discarding {} completion for unknown scene '{}'",
                event.op,
                event.scene
            );
            return;
        };

        // Residency is re-read rather than taken from the notification.
        let handle = self.local.resident(&event.scene);
        let host_driven = event.participant.is_some() && !self.session.is_host();
        let outcome = if host_driven && entry.is_processed() {
            entry.mirror_remote(handle)
        } else {
            entry.on_backend_completion(&event.scene, handle)
        };

        match outcome {
            Completion::Ignored => {}
            Completion::Loaded | Completion::Unloaded => {
                log::debug!("Scene '{}' is now {}", entry.name(), entry.state());
            }
            Completion::TeardownRequested => self.begin_teardown(entry),
            Completion::Reconciled(warning) => log::warn!("{}", warning),
        }

        self.resolved.notify_one();
    }
}

impl EntryHost for Inner {
    fn wake(self: Arc<Self>) {
        self.start_processing();
    }

    fn is_attached_follower(&self) -> bool {
        self.role() == SessionRole::Follower
    }

    fn begin_local_exit(self: Arc<Self>, entry: Arc<SceneEntry>) {
        {
            // Held across the disconnect so the loop cannot subscribe again as a follower.
            let mut state = self.lock();
            self.unsubscribe(&mut state);
            self.session.disconnect_self();
        }
        log::info!("Left the session to unload scene '{}' locally", entry.name());

        entry.run_pre_unload();
        match self.local.unload(entry.name()) {
            Ok(token) => {
                let task = self.runtime.spawn(async move {
                    token.wait().await;
                    entry.finish_local_exit();
                    log::debug!("Scene '{}' unloaded after leaving the session", entry.name());
                });
                *self.teardown_slot() = Some(task);
            }
            Err(e) => {
                log::error!("Failed to unload scene '{}' locally: {}", entry.name(), e);
                if self.local.resident(entry.name()).is_none() {
                    entry.finish_local_exit();
                }
            }
        }
    }
}

async fn run_loop(inner: Arc<Inner>) {
    loop {
        match inner.next_step() {
            Step::Wait => {
                tokio::select! {
                    _ = tokio::time::sleep(inner.config.poll_interval()) => {}
                    _ = inner.resolved.notified() => {}
                }
            }
            Step::Dispatch(entry) => inner.dispatch(&entry),
            Step::Finished => {
                log::debug!("Processing loop idle");
                return;
            }
        }
    }
}

async fn listen(inner: Weak<Inner>, mut subscription: Subscription) {
    while let Some(event) = subscription.recv().await {
        let Some(inner) = inner.upgrade() else {
            return;
        };
        inner.route(event);
    }
}
