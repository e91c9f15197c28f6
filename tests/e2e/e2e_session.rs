//! Host and follower processing through a shared session.

use std::sync::atomic::Ordering;

use stagehand::{
    DispatchRecord, DistributedBackend, LocalSceneManager, ProcessState, SceneBackend, SceneOp,
    SessionMembership, SessionRole, SyncMode,
};

use crate::fixture::{counter, menu_and_arena, participant_orchestrator, session, settle, SCENES};

#[tokio::test]
async fn test_roles_follow_membership() {
    let session = session(LocalSceneManager::new(SCENES), LocalSceneManager::new(SCENES));
    let host = participant_orchestrator(&session.host, menu_and_arena());
    let follower = participant_orchestrator(&session.client, menu_and_arena());

    assert_eq!(host.role(), SessionRole::Host);
    assert_eq!(follower.role(), SessionRole::Follower);
    assert_eq!(session.hub.sync_mode(), SyncMode::Additive);
}

#[tokio::test]
async fn test_host_load_reaches_follower() {
    let session = session(LocalSceneManager::new(SCENES), LocalSceneManager::new(SCENES));
    let host = participant_orchestrator(&session.host, menu_and_arena());
    let follower = participant_orchestrator(&session.client, menu_and_arena());

    // The follower wants Arena too but has to wait for the host.
    follower.request_load("Arena").unwrap();
    assert!(follower.is_subscribed());
    settle().await;
    assert_eq!(follower.state("Arena"), Some(ProcessState::Loading));
    assert!(session.client.local().resident("Arena").is_none());

    host.request_load("Arena").unwrap();
    host.wait_until_idle().await;
    follower.wait_until_idle().await;

    assert_eq!(host.state("Arena"), Some(ProcessState::Loaded));
    assert_eq!(follower.state("Arena"), Some(ProcessState::Loaded));
    assert_eq!(
        follower.entry("Arena").unwrap().loaded_handle(),
        session.client.local().resident("Arena")
    );
    assert_eq!(
        session.hub.dispatched(),
        vec![DispatchRecord {
            participant: session.host.local_participant(),
            op: SceneOp::Load,
            scene: "Arena".to_string(),
        }]
    );
}

#[tokio::test]
async fn test_idle_follower_keeps_session_subscription() {
    let session = session(LocalSceneManager::new(SCENES), LocalSceneManager::new(SCENES));
    let host = participant_orchestrator(&session.host, menu_and_arena());
    let follower = participant_orchestrator(&session.client, menu_and_arena());

    follower.request_load("Arena").unwrap();
    host.request_load("Arena").unwrap();
    host.wait_until_idle().await;
    follower.wait_until_idle().await;
    assert!(!follower.is_processing());
    assert!(follower.is_subscribed());

    // The gate still turns away units the follower does not share.
    host.request_load("MainMenu").unwrap();
    host.wait_until_idle().await;
    settle().await;
    assert!(session.client.local().resident("MainMenu").is_none());

    host.request_unload("Arena").unwrap();
    host.wait_until_idle().await;
    settle().await;

    assert_eq!(host.state("Arena"), Some(ProcessState::Unloaded));
    assert_eq!(follower.state("Arena"), Some(ProcessState::Unloaded));
    assert!(session.client.local().resident("Arena").is_none());

    follower.shutdown();
    assert!(!follower.is_subscribed());
}

#[tokio::test]
async fn test_follower_unload_waits_for_host() {
    let session = session(LocalSceneManager::new(SCENES), LocalSceneManager::new(SCENES));
    let host = participant_orchestrator(&session.host, menu_and_arena());
    let follower = participant_orchestrator(&session.client, menu_and_arena());

    follower.request_load("Arena").unwrap();
    host.request_load("Arena").unwrap();
    host.wait_until_idle().await;
    follower.wait_until_idle().await;

    let (unloaded, on_unloaded) = counter();
    follower.entry("Arena").unwrap().on_unloaded(on_unloaded);

    follower.request_unload("Arena").unwrap();
    settle().await;
    assert_eq!(follower.state("Arena"), Some(ProcessState::Unloading));
    assert!(follower.entry("Arena").unwrap().is_dispatched());
    assert!(session.client.local().resident("Arena").is_some());
    assert_eq!(unloaded.load(Ordering::SeqCst), 0);

    host.request_unload("Arena").unwrap();
    host.wait_until_idle().await;
    follower.wait_until_idle().await;

    assert_eq!(follower.state("Arena"), Some(ProcessState::Unloaded));
    assert_eq!(unloaded.load(Ordering::SeqCst), 1);
    assert!(session.client.local().resident("Arena").is_none());
    let dispatched = session.hub.dispatched();
    assert_eq!(dispatched.len(), 2);
    assert!(dispatched
        .iter()
        .all(|record| record.participant == session.host.local_participant()));
}

#[tokio::test]
async fn test_follower_unload_reconciles_with_host_load() {
    let session = session(LocalSceneManager::new(SCENES), LocalSceneManager::new(SCENES));
    let host = participant_orchestrator(&session.host, menu_and_arena());
    let follower = participant_orchestrator(&session.client, menu_and_arena());

    follower.request_load("Arena").unwrap();
    host.request_load("Arena").unwrap();
    host.wait_until_idle().await;
    follower.wait_until_idle().await;

    let (loaded, on_loaded) = counter();
    follower.entry("Arena").unwrap().on_loaded(on_loaded);
    follower.request_unload("Arena").unwrap();
    settle().await;
    assert_eq!(follower.state("Arena"), Some(ProcessState::Unloading));

    // The host loads Arena again instead of unloading it.
    DistributedBackend::load(session.host.as_ref(), "Arena")
        .unwrap()
        .wait()
        .await;
    follower.wait_until_idle().await;

    assert_eq!(follower.state("Arena"), Some(ProcessState::Loaded));
    assert_eq!(loaded.load(Ordering::SeqCst), 1);
    assert_eq!(
        follower.entry("Arena").unwrap().loaded_handle(),
        session.client.local().resident("Arena")
    );
    assert_eq!(host.state("Arena"), Some(ProcessState::Loaded));
}

#[tokio::test]
async fn test_follower_gate_rejects_unscoped_load() {
    let session = session(LocalSceneManager::new(SCENES), LocalSceneManager::new(SCENES));
    let host = participant_orchestrator(&session.host, menu_and_arena());
    let follower = participant_orchestrator(&session.client, menu_and_arena());

    assert!(follower.approves_remote_load("Arena"));
    assert!(!follower.approves_remote_load("MainMenu"));

    follower.request_load("Arena").unwrap();
    host.request_load("MainMenu").unwrap();
    host.wait_until_idle().await;
    settle().await;

    assert_eq!(host.state("MainMenu"), Some(ProcessState::Loaded));
    assert!(session.client.local().resident("MainMenu").is_none());
    assert_eq!(follower.state("MainMenu"), Some(ProcessState::Unloaded));
}

#[tokio::test]
async fn test_follower_never_dispatches() {
    let session = session(LocalSceneManager::new(SCENES), LocalSceneManager::new(SCENES));
    let follower = participant_orchestrator(&session.client, menu_and_arena());

    follower.request_load("Arena").unwrap();
    settle().await;

    assert!(follower.entry("Arena").unwrap().is_dispatched());
    assert!(session.hub.dispatched().is_empty());
    assert!(session.client.local().issued_operations().is_empty());
}
