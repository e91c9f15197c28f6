//! In-process scene manager.
//!
//! Tracks which units are resident, runs every load/unload as a spawned task
//! and publishes a completion event when it finishes. A configurable latency
//! stands in for the time a real scene graph needs to stream content.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use super::feed::{CompletionToken, EventFeed, Subscription};
use super::{DispatchError, SceneBackend, SceneEvent, SceneHandle, SceneOp};

#[derive(Default)]
struct LocalState {
    known: HashSet<String>,
    resident: HashMap<String, SceneHandle>,
    in_flight: HashSet<String>,
    active: Option<String>,
    issued: Vec<(SceneOp, String)>,
}

struct Shared {
    state: Mutex<LocalState>,
    next_handle: AtomicU64,
    latency: Duration,
    feed: EventFeed,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, LocalState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn next_handle(&self, scene: &str) -> SceneHandle {
        SceneHandle::new(self.next_handle.fetch_add(1, Ordering::SeqCst) + 1, scene)
    }

    /// Apply a finished operation and report the resulting residency.
    fn finish(&self, scene: &str, op: SceneOp) -> bool {
        let mut state = self.lock();
        state.in_flight.remove(scene);
        match op {
            SceneOp::Load => {
                if !state.resident.contains_key(scene) {
                    let handle = self.next_handle(scene);
                    state.resident.insert(scene.to_string(), handle);
                }
            }
            SceneOp::Unload => {
                state.resident.remove(scene);
                if state.active.as_deref() == Some(scene) {
                    state.active = None;
                }
            }
        }
        state.resident.contains_key(scene)
    }
}

/// Single-process content-unit manager.
pub struct LocalSceneManager {
    shared: Arc<Shared>,
}

impl LocalSceneManager {
    /// Create a manager that can load the given units.
    pub fn new<I, S>(scenes: I) -> Arc<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::with_latency(scenes, Duration::from_millis(crate::defaults::LOCAL_LOAD_LATENCY_MS))
    }

    /// Create a manager whose operations take `latency` to complete.
    pub fn with_latency<I, S>(scenes: I, latency: Duration) -> Arc<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let state = LocalState {
            known: scenes.into_iter().map(Into::into).collect(),
            ..Default::default()
        };

        Arc::new(Self {
            shared: Arc::new(Shared {
                state: Mutex::new(state),
                next_handle: AtomicU64::new(0),
                latency,
                feed: EventFeed::new(),
            }),
        })
    }

    /// Make another unit loadable.
    pub fn register_scene(&self, scene: impl Into<String>) {
        self.shared.lock().known.insert(scene.into());
    }

    /// Mark a unit resident immediately, without publishing a completion.
    ///
    /// Used for content that is already in memory when the process starts.
    pub fn preload(&self, scene: &str) -> SceneHandle {
        let mut state = self.shared.lock();
        state.known.insert(scene.to_string());
        if let Some(handle) = state.resident.get(scene) {
            return handle.clone();
        }
        let handle = self.shared.next_handle(scene);
        state.resident.insert(scene.to_string(), handle.clone());
        handle
    }

    /// Names of all resident units, sorted.
    pub fn resident_scenes(&self) -> Vec<String> {
        let mut names: Vec<String> = self.shared.lock().resident.keys().cloned().collect();
        names.sort();
        names
    }

    /// Every operation accepted so far, in issue order.
    pub fn issued_operations(&self) -> Vec<(SceneOp, String)> {
        self.shared.lock().issued.clone()
    }

    fn begin(&self, scene: &str, op: SceneOp) -> Result<CompletionToken, DispatchError> {
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| DispatchError::NoRuntime)?;

        {
            let mut state = self.shared.lock();
            if !state.known.contains(scene) {
                return Err(DispatchError::UnknownScene(scene.to_string()));
            }
            if state.in_flight.contains(scene) {
                return Err(DispatchError::AlreadyInFlight(scene.to_string()));
            }
            if op == SceneOp::Unload && !state.resident.contains_key(scene) {
                return Err(DispatchError::NotResident(scene.to_string()));
            }
            state.in_flight.insert(scene.to_string());
            state.issued.push((op, scene.to_string()));
        }

        let (token, completer) = CompletionToken::pair(scene, op);
        let shared = Arc::clone(&self.shared);
        let scene = scene.to_string();

        runtime.spawn(async move {
            if shared.latency.is_zero() {
                tokio::task::yield_now().await;
            } else {
                tokio::time::sleep(shared.latency).await;
            }

            let resident = shared.finish(&scene, op);
            log::debug!("SM-EVENT: {} {} finished (resident: {})", scene, op, resident);
            shared.feed.publish(SceneEvent {
                scene,
                op,
                resident,
                participant: None,
            });
            completer.complete(resident);
        });

        Ok(token)
    }
}

impl SceneBackend for LocalSceneManager {
    fn load(&self, scene: &str) -> Result<CompletionToken, DispatchError> {
        self.begin(scene, SceneOp::Load)
    }

    fn unload(&self, scene: &str) -> Result<CompletionToken, DispatchError> {
        self.begin(scene, SceneOp::Unload)
    }

    fn resident(&self, scene: &str) -> Option<SceneHandle> {
        self.shared.lock().resident.get(scene).cloned()
    }

    fn knows(&self, scene: &str) -> bool {
        self.shared.lock().known.contains(scene)
    }

    fn active_scene(&self) -> Option<String> {
        self.shared.lock().active.clone()
    }

    fn set_active_scene(&self, handle: &SceneHandle) -> Result<Option<String>, DispatchError> {
        let mut state = self.shared.lock();
        match state.resident.get(handle.name()) {
            Some(current) if current == handle => {
                Ok(state.active.replace(handle.name().to_string()))
            }
            _ => Err(DispatchError::NotResident(handle.name().to_string())),
        }
    }

    fn subscribe(&self) -> Subscription {
        self.shared.feed.subscribe()
    }
}
