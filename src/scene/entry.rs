//! Per-scene state machine.
//!
//! Provides the lifecycle of a single content unit:
//! UNLOADED -> LOADING -> LOADED -> UNLOADING -> UNLOADED
//!
//! LOADING and UNLOADING are in-flight markers; LOADED and UNLOADED are
//! stable. State and the live handle change together under one lock so the
//! handle is present exactly while the entry is LOADED.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError, Weak};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::backend::SceneHandle;
use crate::config::{ConfigError, EntryConfig};

/// When processing of an entry begins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadTrigger {
    /// Loaded as soon as the orchestrator starts
    #[default]
    Startup,
    /// Loaded only when something requests it
    Triggered,
}

/// Scene processing state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessState {
    Unloaded,
    Loading,
    Loaded,
    Unloading,
}

impl ProcessState {
    /// Stable states are the ones no operation is pending for.
    pub fn is_stable(self) -> bool {
        matches!(self, Self::Loaded | Self::Unloaded)
    }

    fn resolved(resident: bool) -> Self {
        if resident {
            Self::Loaded
        } else {
            Self::Unloaded
        }
    }
}

impl fmt::Display for ProcessState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unloaded => write!(f, "UNLOADED"),
            Self::Loading => write!(f, "LOADING"),
            Self::Loaded => write!(f, "LOADED"),
            Self::Unloading => write!(f, "UNLOADING"),
        }
    }
}

/// A completion resolved to a state other than the one requested.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("scene '{scene}' expected {expected} after completion but resolved to {actual}")]
pub struct ReconciliationWarning {
    pub scene: String,
    pub expected: ProcessState,
    pub actual: ProcessState,
}

/// What a completion did to an entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Completion {
    /// Nothing was pending, or the notification named another unit
    Ignored,
    Loaded,
    Unloaded,
    /// The entry left residency and asks for the session to be torn down
    TeardownRequested,
    /// The entry settled in an unexpected stable state
    Reconciled(ReconciliationWarning),
}

/// Side-effecting action run at a transition point.
pub type SceneCallback = Arc<dyn Fn() + Send + Sync>;

/// The orchestrator as seen from an entry.
pub(crate) trait EntryHost: Send + Sync {
    /// Make sure the processing loop is running.
    fn wake(self: Arc<Self>);

    /// Whether this process is a follower attached to a live session.
    fn is_attached_follower(&self) -> bool;

    /// Leave the session and unload `entry` locally.
    fn begin_local_exit(self: Arc<Self>, entry: Arc<SceneEntry>);
}

#[derive(Default)]
struct Callbacks {
    loaded: Vec<SceneCallback>,
    unloaded: Vec<SceneCallback>,
    pre_unload: Vec<SceneCallback>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CallbackSet {
    Loaded,
    Unloaded,
    PreUnload,
}

struct Slot {
    state: ProcessState,
    handle: Option<SceneHandle>,
    dispatched: bool,
}

/// Consistent view of an entry's state at one instant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntrySnapshot {
    pub state: ProcessState,
    pub handle: Option<SceneHandle>,
    pub dispatched: bool,
}

/// A single content unit in the catalogue.
pub struct SceneEntry {
    name: String,
    trigger: LoadTrigger,
    session_scope: bool,
    teardown_on_unload: bool,
    default_active: AtomicBool,
    slot: Mutex<Slot>,
    callbacks: Mutex<Callbacks>,
    dependents: Mutex<Vec<Weak<SceneEntry>>>,
    host: OnceLock<Weak<dyn EntryHost>>,
}

impl SceneEntry {
    /// Create a detached entry in the UNLOADED state.
    pub fn new(config: &EntryConfig) -> Arc<Self> {
        Arc::new(Self {
            name: config.name.clone(),
            trigger: config.trigger,
            session_scope: config.session_scope,
            teardown_on_unload: config.teardown_on_unload,
            default_active: AtomicBool::new(false),
            slot: Mutex::new(Slot {
                state: ProcessState::Unloaded,
                handle: None,
                dispatched: false,
            }),
            callbacks: Mutex::new(Callbacks::default()),
            dependents: Mutex::new(Vec::new()),
            host: OnceLock::new(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn trigger(&self) -> LoadTrigger {
        self.trigger
    }

    /// Only the session host may load or unload this unit.
    pub fn is_session_scoped(&self) -> bool {
        self.session_scope
    }

    /// Unloading this unit ends the session.
    pub fn tears_down_session(&self) -> bool {
        self.teardown_on_unload
    }

    /// This unit became the foreground unit during boot.
    pub fn is_default_active(&self) -> bool {
        self.default_active.load(Ordering::SeqCst)
    }

    pub fn state(&self) -> ProcessState {
        self.slot().state
    }

    pub fn loaded_handle(&self) -> Option<SceneHandle> {
        self.slot().handle.clone()
    }

    pub fn snapshot(&self) -> EntrySnapshot {
        let slot = self.slot();
        EntrySnapshot {
            state: slot.state,
            handle: slot.handle.clone(),
            dispatched: slot.dispatched,
        }
    }

    /// The unit is resident and the entry knows its live instance.
    pub fn is_loaded(&self) -> bool {
        self.slot().handle.is_some()
    }

    /// No load or unload is pending for this entry.
    pub fn is_processed(&self) -> bool {
        self.state().is_stable()
    }

    /// An operation for this entry has been handed to a backend.
    pub fn is_dispatched(&self) -> bool {
        self.slot().dispatched
    }

    pub fn on_loaded<F>(&self, callback: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.callbacks().loaded.push(Arc::new(callback));
    }

    pub fn on_unloaded<F>(&self, callback: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.callbacks().unloaded.push(Arc::new(callback));
    }

    pub fn on_pre_unload<F>(&self, callback: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.callbacks().pre_unload.push(Arc::new(callback));
    }

    /// Register an entry the teardown barrier must wait for.
    pub fn add_dependent(&self, dependent: &Arc<SceneEntry>) {
        let mut dependents = self
            .dependents
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if !dependents
            .iter()
            .any(|d| d.upgrade().is_some_and(|d| Arc::ptr_eq(&d, dependent)))
        {
            dependents.push(Arc::downgrade(dependent));
        }
    }

    pub fn dependents(&self) -> Vec<Arc<SceneEntry>> {
        self.dependents
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter_map(Weak::upgrade)
            .collect()
    }

    /// Ask for this unit to be loaded.
    ///
    /// Only valid from UNLOADED; a no-op otherwise.
    pub fn request_load(&self) {
        {
            let mut slot = self.slot();
            if slot.state != ProcessState::Unloaded {
                return;
            }
            slot.state = ProcessState::Loading;
        }
        self.wake_host();
    }

    /// Ask for this unit to be unloaded.
    ///
    /// Only valid from LOADED. A follower attached to a session unloading a
    /// teardown entry leaves the session and unloads locally instead.
    pub fn request_unload(self: &Arc<Self>) {
        if self.state() != ProcessState::Loaded {
            return;
        }

        if self.teardown_on_unload {
            if let Some(host) = self.host() {
                if host.is_attached_follower() {
                    host.begin_local_exit(Arc::clone(self));
                    return;
                }
            }
        }

        self.fire(CallbackSet::PreUnload);
        {
            let mut slot = self.slot();
            if slot.state != ProcessState::Loaded {
                return;
            }
            slot.state = ProcessState::Unloading;
        }
        self.wake_host();
    }

    /// Apply a backend completion for `scene` with the unit's current
    /// residency (`handle`).
    pub fn on_backend_completion(&self, scene: &str, handle: Option<SceneHandle>) -> Completion {
        if scene != self.name {
            return Completion::Ignored;
        }

        let resident = handle.is_some();
        let previous = {
            let mut slot = self.slot();
            let previous = slot.state;
            if previous.is_stable() {
                return Completion::Ignored;
            }
            slot.state = ProcessState::resolved(resident);
            slot.handle = handle;
            slot.dispatched = false;
            previous
        };

        match (previous, resident) {
            (ProcessState::Loading, true) => {
                self.fire(CallbackSet::Loaded);
                Completion::Loaded
            }
            (ProcessState::Loading, false) => {
                self.fire(CallbackSet::Unloaded);
                Completion::Reconciled(self.warning(ProcessState::Loaded, ProcessState::Unloaded))
            }
            (_, false) => {
                self.fire(CallbackSet::Unloaded);
                if self.teardown_on_unload {
                    Completion::TeardownRequested
                } else {
                    Completion::Unloaded
                }
            }
            (_, true) => {
                // A teardown entry that is still resident must not end the session.
                if !self.teardown_on_unload {
                    self.fire(CallbackSet::Loaded);
                }
                Completion::Reconciled(self.warning(ProcessState::Unloaded, ProcessState::Loaded))
            }
        }
    }

    /// Adopt residency driven by the session host while nothing is pending.
    pub(crate) fn mirror_remote(&self, handle: Option<SceneHandle>) -> Completion {
        let resident = handle.is_some();
        {
            let mut slot = self.slot();
            if !slot.state.is_stable() {
                drop(slot);
                return self.on_backend_completion(&self.name, handle);
            }
            if (slot.state == ProcessState::Loaded) == resident {
                return Completion::Ignored;
            }
            slot.state = ProcessState::resolved(resident);
            slot.handle = handle;
        }

        if resident {
            self.fire(CallbackSet::Loaded);
            Completion::Loaded
        } else {
            self.fire(CallbackSet::Unloaded);
            if self.teardown_on_unload {
                Completion::TeardownRequested
            } else {
                Completion::Unloaded
            }
        }
    }

    pub(crate) fn attach(&self, host: Weak<dyn EntryHost>) {
        // An entry belongs to a single orchestrator for its whole life.
        let _ = self.host.set(host);
    }

    /// Seed the state from what is already resident.
    pub(crate) fn initialize(&self, handle: Option<SceneHandle>) {
        let mut slot = self.slot();
        slot.state = ProcessState::resolved(handle.is_some());
        slot.handle = handle;
        slot.dispatched = false;
    }

    pub(crate) fn mark_dispatched(&self) {
        self.slot().dispatched = true;
    }

    /// Return to the stable state held before the failed request.
    pub(crate) fn revert(&self) {
        let mut slot = self.slot();
        slot.dispatched = false;
        slot.state = match slot.state {
            ProcessState::Loading => ProcessState::Unloaded,
            ProcessState::Unloading => ProcessState::Loaded,
            stable => stable,
        };
    }

    /// Promote this entry to the foreground unit.
    pub(crate) fn set_as_active_scene(&self, handle: SceneHandle) -> Result<(), ConfigError> {
        if handle.name() != self.name {
            return Err(ConfigError::SceneMismatch {
                expected: self.name.clone(),
                actual: handle.name().to_string(),
            });
        }
        {
            let mut slot = self.slot();
            slot.state = ProcessState::Loaded;
            slot.handle = Some(handle);
            slot.dispatched = false;
        }
        self.default_active.store(true, Ordering::SeqCst);
        Ok(())
    }

    pub(crate) fn run_pre_unload(&self) {
        self.fire(CallbackSet::PreUnload);
    }

    /// Finish a follower's local exit: UNLOADED without backend completion.
    pub(crate) fn finish_local_exit(&self) {
        {
            let mut slot = self.slot();
            slot.state = ProcessState::Unloaded;
            slot.handle = None;
            slot.dispatched = false;
        }
        self.fire(CallbackSet::Unloaded);
    }

    fn warning(&self, expected: ProcessState, actual: ProcessState) -> ReconciliationWarning {
        ReconciliationWarning {
            scene: self.name.clone(),
            expected,
            actual,
        }
    }

    fn host(&self) -> Option<Arc<dyn EntryHost>> {
        self.host.get().and_then(Weak::upgrade)
    }

    fn wake_host(&self) {
        if let Some(host) = self.host() {
            host.wake();
        }
    }

    /// Run a callback set with no lock held.
    fn fire(&self, set: CallbackSet) {
        let callbacks = {
            let callbacks = self.callbacks();
            match set {
                CallbackSet::Loaded => callbacks.loaded.clone(),
                CallbackSet::Unloaded => callbacks.unloaded.clone(),
                CallbackSet::PreUnload => callbacks.pre_unload.clone(),
            }
        };
        for callback in callbacks {
            callback();
        }
    }

    fn slot(&self) -> MutexGuard<'_, Slot> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn callbacks(&self) -> MutexGuard<'_, Callbacks> {
        self.callbacks.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for SceneEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SceneEntry")
            .field("name", &self.name)
            .field("trigger", &self.trigger)
            .field("state", &self.state())
            .field("session_scope", &self.session_scope)
            .field("teardown_on_unload", &self.teardown_on_unload)
            .finish()
    }
}
