//! Ordered catalogue of scene entries.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use crate::backend::{SceneBackend, SceneHandle};
use crate::config::{CatalogueConfig, ConfigError, SceneAction};
use crate::scene::entry::{ProcessState, SceneEntry};

/// The static catalogue an orchestrator processes.
///
/// Declaration order is iteration order; it carries no priority.
pub struct Catalogue {
    entries: Vec<Arc<SceneEntry>>,
    index: HashMap<String, usize>,
}

impl Catalogue {
    /// Build the catalogue, wiring configured actions between entries.
    ///
    /// Every entry must name a unit `backend` knows how to load.
    pub fn from_config(
        config: &CatalogueConfig,
        backend: &dyn SceneBackend,
    ) -> Result<Self, ConfigError> {
        let mut entries = Vec::with_capacity(config.entries.len());
        let mut index = HashMap::new();

        for entry_config in &config.entries {
            if index.contains_key(&entry_config.name) {
                return Err(ConfigError::DuplicateEntry(entry_config.name.clone()));
            }
            if !backend.knows(&entry_config.name) {
                return Err(ConfigError::UnknownScene(entry_config.name.clone()));
            }
            index.insert(entry_config.name.clone(), entries.len());
            entries.push(SceneEntry::new(entry_config));
        }

        let catalogue = Self { entries, index };

        for entry_config in &config.entries {
            let entry = catalogue.require(&entry_config.name, &entry_config.name)?;

            for action in &entry_config.on_loaded {
                let target = catalogue.action_target(&entry_config.name, action)?;
                entry.on_loaded(action_callback(action, target));
            }
            for action in &entry_config.on_pre_unload {
                let target = catalogue.action_target(&entry_config.name, action)?;
                entry.on_pre_unload(action_callback(action, target));
            }
            for action in &entry_config.on_unloaded {
                let target = catalogue.action_target(&entry_config.name, action)?;
                entry.add_dependent(&target);
                entry.on_unloaded(action_callback(action, target));
            }
            for name in &entry_config.dependents {
                let dependent = catalogue.require(&entry_config.name, name)?;
                entry.add_dependent(dependent);
            }
        }

        Ok(catalogue)
    }

    pub fn get(&self, name: &str) -> Option<&Arc<SceneEntry>> {
        self.index.get(name).map(|&i| &self.entries[i])
    }

    pub fn position(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    pub fn entries(&self) -> &[Arc<SceneEntry>] {
        &self.entries
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<SceneEntry>> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// First entry, in declaration order, waiting to be loaded or unloaded.
    pub fn first_pending(&self) -> Option<usize> {
        self.entries.iter().position(|e| !e.is_processed())
    }

    /// Entries currently LOADING or UNLOADING.
    pub fn pending_count(&self) -> usize {
        self.entries.iter().filter(|e| !e.is_processed()).count()
    }

    /// Entries whose operation is with a backend.
    pub fn dispatched_count(&self) -> usize {
        self.entries.iter().filter(|e| e.is_dispatched()).count()
    }

    /// The entry promoted to foreground during bootstrap, if any.
    pub fn default_active(&self) -> Option<&Arc<SceneEntry>> {
        self.entries.iter().find(|e| e.is_default_active())
    }

    /// Promote `name` to the foreground unit. At most one entry may hold it.
    pub fn promote(&self, name: &str, handle: SceneHandle) -> Result<(), ConfigError> {
        let entry = self
            .get(name)
            .ok_or_else(|| ConfigError::UnknownScene(name.to_string()))?;

        if let Some(current) = self.default_active() {
            if !Arc::ptr_eq(current, entry) {
                return Err(ConfigError::DefaultActiveConflict {
                    current: current.name().to_string(),
                    requested: name.to_string(),
                });
            }
        }

        entry.set_as_active_scene(handle)
    }

    /// Names and states, in declaration order.
    pub fn states(&self) -> Vec<(String, ProcessState)> {
        self.entries
            .iter()
            .map(|e| (e.name().to_string(), e.state()))
            .collect()
    }

    fn require(&self, owner: &str, name: &str) -> Result<&Arc<SceneEntry>, ConfigError> {
        self.get(name).ok_or_else(|| ConfigError::UnknownTarget {
            entry: owner.to_string(),
            target: name.to_string(),
        })
    }

    fn action_target(
        &self,
        owner: &str,
        action: &SceneAction,
    ) -> Result<Arc<SceneEntry>, ConfigError> {
        self.require(owner, action.target()).map(Arc::clone)
    }
}

/// Callbacks hold their target weakly; entries may reference each other.
fn action_callback(action: &SceneAction, target: Arc<SceneEntry>) -> impl Fn() + Send + Sync {
    let target: Weak<SceneEntry> = Arc::downgrade(&target);
    let load = matches!(action, SceneAction::Load(_));
    move || {
        if let Some(target) = target.upgrade() {
            if load {
                target.request_load();
            } else {
                target.request_unload();
            }
        }
    }
}
