//! First-scene boot sequence.

use crate::backend::SceneHandle;
use crate::config::ConfigError;
use crate::error::{Error, Result};
use crate::orchestrator::SceneOrchestrator;

/// Load `first_scene` through the local backend and make it the foreground unit.
///
/// The scene's entry becomes the catalogue's default-active entry and the
/// previously active scene is unloaded.
pub async fn run(orchestrator: &SceneOrchestrator, first_scene: Option<&str>) -> Result<SceneHandle> {
    let name = first_scene.ok_or(ConfigError::MissingFirstScene)?;
    if orchestrator.entry(name).is_none() {
        return Err(ConfigError::UnknownScene(name.to_string()).into());
    }

    let local = orchestrator.local_backend();
    let handle = match local.resident(name) {
        Some(handle) => handle,
        None => {
            local.load(name)?.wait().await;
            local.resident(name).ok_or_else(|| {
                Error::Runtime(format!("first scene '{}' did not become resident", name))
            })?
        }
    };

    orchestrator.catalogue().promote(name, handle.clone())?;
    let previous = local.set_active_scene(&handle)?;
    log::info!("Scene '{}' is the active scene", name);

    if let Some(previous) = previous.filter(|p| p != name) {
        log::debug!("Unloading previous active scene '{}'", previous);
        local.unload(&previous)?.wait().await;
    }

    Ok(handle)
}
