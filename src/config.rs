//! Catalogue and orchestrator configuration.
//!
//! The catalogue is the static, ordered list of entries a process manages.
//! It is usually read from JSON:
//!
//! ```json
//! {
//!   "first_scene": "MainMenu",
//!   "entries": [
//!     { "name": "MainMenu", "trigger": "startup" },
//!     { "name": "Arena", "trigger": "triggered", "session_scope": true,
//!       "on_unloaded": [{ "action": "load", "scene": "MainMenu" }] }
//!   ]
//! }
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::defaults;
use crate::error::Result;
use crate::scene::LoadTrigger;

/// Errors in catalogue or orchestrator configuration.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("no startup-triggered entry in the catalogue")]
    NoStartupEntry,

    #[error("no first scene configured for bootstrap")]
    MissingFirstScene,

    #[error("entry '{0}' is declared more than once")]
    DuplicateEntry(String),

    #[error("entry '{0}' does not name a known content unit")]
    UnknownScene(String),

    #[error("entry '{entry}' references unknown entry '{target}'")]
    UnknownTarget { entry: String, target: String },

    #[error("'{current}' is already the default active scene; cannot promote '{requested}'")]
    DefaultActiveConflict { current: String, requested: String },

    #[error("{actual} does not match this entry's scene: {expected}")]
    SceneMismatch { expected: String, actual: String },
}

/// Action another entry performs when a callback fires.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", content = "scene", rename_all = "snake_case")]
pub enum SceneAction {
    Load(String),
    Unload(String),
}

impl SceneAction {
    pub fn target(&self) -> &str {
        match self {
            Self::Load(scene) | Self::Unload(scene) => scene,
        }
    }
}

/// Configuration of a single catalogue entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryConfig {
    pub name: String,
    #[serde(default)]
    pub trigger: LoadTrigger,
    /// Only the session host may load or unload this unit
    #[serde(default)]
    pub session_scope: bool,
    /// Unloading this unit ends the session
    #[serde(default)]
    pub teardown_on_unload: bool,
    /// Entries the teardown barrier waits for, besides `on_unloaded` targets
    #[serde(default)]
    pub dependents: Vec<String>,
    #[serde(default)]
    pub on_loaded: Vec<SceneAction>,
    #[serde(default)]
    pub on_unloaded: Vec<SceneAction>,
    #[serde(default)]
    pub on_pre_unload: Vec<SceneAction>,
}

impl EntryConfig {
    pub fn new(name: impl Into<String>, trigger: LoadTrigger) -> Self {
        Self {
            name: name.into(),
            trigger,
            session_scope: false,
            teardown_on_unload: false,
            dependents: Vec::new(),
            on_loaded: Vec::new(),
            on_unloaded: Vec::new(),
            on_pre_unload: Vec::new(),
        }
    }

    pub fn session_scoped(mut self, session_scope: bool) -> Self {
        self.session_scope = session_scope;
        self
    }

    pub fn teardown_on_unload(mut self, teardown: bool) -> Self {
        self.teardown_on_unload = teardown;
        self
    }

    pub fn dependent(mut self, name: impl Into<String>) -> Self {
        self.dependents.push(name.into());
        self
    }

    pub fn on_loaded(mut self, action: SceneAction) -> Self {
        self.on_loaded.push(action);
        self
    }

    pub fn on_unloaded(mut self, action: SceneAction) -> Self {
        self.on_unloaded.push(action);
        self
    }

    pub fn on_pre_unload(mut self, action: SceneAction) -> Self {
        self.on_pre_unload.push(action);
        self
    }
}

/// The ordered catalogue a process manages.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogueConfig {
    /// Entry promoted to the foreground unit during bootstrap
    #[serde(default)]
    pub first_scene: Option<String>,
    pub entries: Vec<EntryConfig>,
}

impl CatalogueConfig {
    pub fn new(entries: Vec<EntryConfig>) -> Self {
        Self {
            first_scene: None,
            entries,
        }
    }

    pub fn with_first_scene(mut self, name: impl Into<String>) -> Self {
        self.first_scene = Some(name.into());
        self
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json_str(&content)
    }

    /// Location of the default catalogue file.
    ///
    /// `STAGEHAND_CATALOGUE` overrides the user config directory.
    pub fn default_path() -> PathBuf {
        if let Ok(path) = std::env::var(defaults::CATALOGUE_ENV) {
            return PathBuf::from(path);
        }

        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("stagehand")
            .join("catalogue.json")
    }

    pub fn load_default() -> Result<Self> {
        Self::from_path(&Self::default_path())
    }
}

/// Timing and validation knobs for the orchestrator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Interval between checks of the in-flight entry
    #[serde(default = "defaults::poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Ticks the teardown barrier waits between drain checks
    #[serde(default = "defaults::teardown_poll_ticks")]
    pub teardown_poll_ticks: u32,
    #[serde(default = "defaults::tick_ms")]
    pub tick_ms: u64,
    /// Fail `start` when no entry is startup-triggered
    #[serde(default)]
    pub require_startup_entry: bool,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: defaults::POLL_INTERVAL_MS,
            teardown_poll_ticks: defaults::TEARDOWN_POLL_TICKS,
            tick_ms: defaults::TICK_MS,
            require_startup_entry: false,
        }
    }
}

impl OrchestratorConfig {
    /// Defaults, with `STAGEHAND_POLL_INTERVAL_MS` applied when set.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(ms) = std::env::var(defaults::POLL_INTERVAL_ENV)
            .ok()
            .and_then(|v| v.trim().parse().ok())
        {
            config.poll_interval_ms = ms;
        }
        config
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn teardown_cadence(&self) -> Duration {
        Duration::from_millis(self.tick_ms * u64::from(self.teardown_poll_ticks.max(1)))
    }
}
