//! Single-process catalogue processing without a session.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use stagehand::{
    CatalogueConfig, EntryConfig, LoadTrigger, LocalSceneManager, ProcessState, SceneAction,
    SceneBackend, SceneOp, SessionRole,
};

use crate::fixture::{counter, menu_and_arena, settle, standalone, SCENES};

#[tokio::test]
async fn test_menu_and_arena_standalone() {
    let local = LocalSceneManager::new(SCENES);
    let orchestrator = standalone(&local, menu_and_arena());
    assert_eq!(orchestrator.role(), SessionRole::Standalone);

    orchestrator.start().unwrap();
    orchestrator.wait_until_idle().await;

    assert_eq!(orchestrator.state("MainMenu"), Some(ProcessState::Loaded));
    assert_eq!(orchestrator.state("Arena"), Some(ProcessState::Unloaded));
    assert!(!orchestrator.is_processing());
    assert!(!orchestrator.is_subscribed());
    assert!(orchestrator.active_entry().is_none());
}

#[tokio::test]
async fn test_triggered_load_fires_on_loaded_once() {
    let local = LocalSceneManager::new(SCENES);
    let orchestrator = standalone(&local, menu_and_arena());
    let (loaded, on_loaded) = counter();
    orchestrator.entry("Arena").unwrap().on_loaded(on_loaded);

    orchestrator.request_load("Arena").unwrap();
    orchestrator.wait_until_idle().await;

    let arena = orchestrator.entry("Arena").unwrap();
    assert_eq!(arena.state(), ProcessState::Loaded);
    assert_eq!(arena.loaded_handle(), local.resident("Arena"));
    assert_eq!(loaded.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_double_request_load_dispatches_once() {
    let local = LocalSceneManager::new(SCENES);
    let orchestrator = standalone(&local, menu_and_arena());

    orchestrator.request_load("Arena").unwrap();
    orchestrator.request_load("Arena").unwrap();
    orchestrator.wait_until_idle().await;
    orchestrator.request_load("Arena").unwrap();
    settle().await;

    assert_eq!(
        local.issued_operations(),
        vec![(SceneOp::Load, "Arena".to_string())]
    );
}

#[tokio::test(start_paused = true)]
async fn test_one_entry_in_flight_at_a_time() {
    let local = LocalSceneManager::with_latency(SCENES, Duration::from_millis(100));
    let catalogue = CatalogueConfig::new(
        ["MainMenu", "Lobby", "Arena", "Credits"]
            .into_iter()
            .map(|name| EntryConfig::new(name, LoadTrigger::Startup))
            .collect(),
    );
    let orchestrator = standalone(&local, catalogue);

    orchestrator.start().unwrap();
    let mut max_dispatched = 0;
    while orchestrator.is_processing() {
        max_dispatched = max_dispatched.max(orchestrator.catalogue().dispatched_count());
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    assert_eq!(max_dispatched, 1);
    assert_eq!(local.resident_scenes().len(), 4);
    // Declaration order is processing order.
    let order: Vec<String> = local
        .issued_operations()
        .into_iter()
        .map(|(_, scene)| scene)
        .collect();
    assert_eq!(order, vec!["MainMenu", "Lobby", "Arena", "Credits"]);
}

#[tokio::test(start_paused = true)]
async fn test_refused_dispatch_reverts_entry() {
    let local = LocalSceneManager::with_latency(SCENES, Duration::from_millis(100));
    let orchestrator = standalone(&local, menu_and_arena());

    // Someone else already has an operation on Arena in flight.
    let _outside = local.load("Arena").unwrap();
    orchestrator.request_load("Arena").unwrap();
    orchestrator.wait_until_idle().await;

    assert_eq!(orchestrator.state("Arena"), Some(ProcessState::Unloaded));
    assert!(!orchestrator.entry("Arena").unwrap().is_dispatched());
    assert_eq!(local.issued_operations().len(), 1);
}

#[tokio::test]
async fn test_unload_chain_through_actions() {
    let local = LocalSceneManager::new(SCENES);
    local.preload("Arena");
    let catalogue = CatalogueConfig::new(vec![
        EntryConfig::new("MainMenu", LoadTrigger::Triggered),
        EntryConfig::new("Arena", LoadTrigger::Triggered)
            .on_unloaded(SceneAction::Load("MainMenu".into())),
    ]);
    let orchestrator = standalone(&local, catalogue);
    assert_eq!(orchestrator.state("Arena"), Some(ProcessState::Loaded));

    let pre_unload_seen = Arc::new(std::sync::Mutex::new(None));
    let seen = Arc::clone(&pre_unload_seen);
    let manager = Arc::clone(&local);
    orchestrator.entry("Arena").unwrap().on_pre_unload(move || {
        *seen.lock().unwrap() = Some(manager.resident("Arena").is_some());
    });

    orchestrator.request_unload("Arena").unwrap();
    orchestrator.wait_until_idle().await;

    assert_eq!(*pre_unload_seen.lock().unwrap(), Some(true));
    assert_eq!(orchestrator.state("Arena"), Some(ProcessState::Unloaded));
    assert_eq!(orchestrator.state("MainMenu"), Some(ProcessState::Loaded));
    assert_eq!(local.resident_scenes(), vec!["MainMenu".to_string()]);
}

#[tokio::test]
async fn test_unknown_completion_is_discarded() {
    let local = LocalSceneManager::with_latency(SCENES, Duration::from_millis(20));
    let orchestrator = standalone(&local, menu_and_arena());

    orchestrator.start().unwrap();
    // Not in the catalogue; its completion must not disturb processing.
    let credits = local.load("Credits").unwrap();
    credits.wait().await;
    orchestrator.wait_until_idle().await;

    assert_eq!(orchestrator.state("MainMenu"), Some(ProcessState::Loaded));
    assert!(orchestrator.entry("Credits").is_none());
}
