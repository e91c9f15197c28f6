//! Booting into the first scene from a catalogue file.

use std::io::Write;

use stagehand::{bootstrap, CatalogueConfig, LocalSceneManager, ProcessState, SceneBackend};

use crate::fixture::{participant_orchestrator, session, settle, standalone, SCENES};

const CATALOGUE: &str = r#"{
    "first_scene": "MainMenu",
    "entries": [
        { "name": "MainMenu", "trigger": "triggered" },
        { "name": "Arena", "trigger": "triggered", "session_scope": true }
    ]
}"#;

fn catalogue_from_file() -> CatalogueConfig {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(CATALOGUE.as_bytes()).unwrap();
    CatalogueConfig::from_path(file.path()).unwrap()
}

#[tokio::test]
async fn test_boot_into_first_scene() {
    let config = catalogue_from_file();
    let local = LocalSceneManager::new(SCENES);
    let boot = local.preload("Boot");
    local.set_active_scene(&boot).unwrap();
    let orchestrator = standalone(&local, config.clone());

    let handle = bootstrap::run(&orchestrator, config.first_scene.as_deref())
        .await
        .unwrap();

    assert_eq!(handle.name(), "MainMenu");
    assert_eq!(local.active_scene().as_deref(), Some("MainMenu"));
    assert_eq!(local.resident_scenes(), vec!["MainMenu".to_string()]);
    assert_eq!(
        orchestrator.catalogue().default_active().map(|e| e.name()),
        Some("MainMenu")
    );
    assert_eq!(orchestrator.state("MainMenu"), Some(ProcessState::Loaded));
}

#[tokio::test]
async fn test_default_active_scene_passes_follower_gate() {
    let config = catalogue_from_file();
    let session = session(LocalSceneManager::new(SCENES), LocalSceneManager::new(SCENES));
    let host = participant_orchestrator(&session.host, config.clone());
    let follower = participant_orchestrator(&session.client, config.clone());

    assert!(!follower.approves_remote_load("MainMenu"));
    bootstrap::run(&follower, config.first_scene.as_deref())
        .await
        .unwrap();
    assert!(follower.approves_remote_load("MainMenu"));

    // A host-driven reload of the default-active scene is accepted.
    follower.request_load("Arena").unwrap();
    session.client.local().unload("MainMenu").unwrap().wait().await;
    host.request_load("MainMenu").unwrap();
    host.wait_until_idle().await;
    settle().await;

    assert!(session.client.local().resident("MainMenu").is_some());
}
