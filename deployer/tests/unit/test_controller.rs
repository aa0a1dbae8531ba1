//! Controller lifecycle tests

use std::sync::Arc;

use hotdeploy::deploy::controller::{ControllerConfig, DeployController};
use hotdeploy::deploy::environment::DeployEnvironment;
use hotdeploy::deploy::events::LifecycleEventKind;
use hotdeploy::deploy::lifecycle::ControllerState;
use hotdeploy::deploy::mode::{ControllerType, DeployMode};
use hotdeploy::deploy::tag::DeployTag;
use hotdeploy::repository::memory::write_tar;
use hotdeploy::utils::RetryPolicy;
use tokio_test::assert_ok;

use crate::support::{tree, CountingRepository, RecordingFactory};

fn env(repo: &Arc<CountingRepository>) -> DeployEnvironment {
    DeployEnvironment::new("default")
        .with_repository(repo.clone())
        .with_commit_retry(RetryPolicy::none())
}

fn shop(
    root: &std::path::Path,
    startup: DeployMode,
    redeploy: DeployMode,
    factory: &Arc<RecordingFactory>,
    env: &DeployEnvironment,
) -> DeployController {
    let config = ControllerConfig::new(root.join("shop"), ControllerType::Explicit).with_modes(startup, redeploy);
    DeployController::new("shop", DeployTag::new("webapp", "default/shop"), config, factory.clone(), env)
}

#[tokio::test]
async fn test_manual_manual_only_starts_on_update() {
    let dir = tempfile::tempdir().unwrap();
    let repo = CountingRepository::new();
    repo.inner
        .deploy_tree("webapp/default/shop", tree(&[("index.html", "v1")]))
        .unwrap();
    let factory = RecordingFactory::new();
    let controller = shop(dir.path(), DeployMode::Manual, DeployMode::Manual, &factory, &env(&repo));

    assert_ok!(controller.start_on_init().await);
    assert_eq!(controller.state(), ControllerState::Stopped);
    assert!(controller.request().await.is_none());
    assert!(controller.subrequest().await.is_none());
    assert_ok!(controller.alarm().await);
    assert_eq!(controller.state(), ControllerState::Stopped);

    // nothing was extracted or built
    assert_eq!(repo.expands(), 0);
    assert_eq!(factory.instantiated(), 0);

    assert_ok!(controller.update().await);
    assert_eq!(controller.state(), ControllerState::Active);
    assert_eq!(repo.expands(), 1);
    assert!(controller.request().await.is_some());

    // same content: no restart
    assert_ok!(controller.update().await);
    assert_eq!(factory.instantiated(), 1);

    repo.inner
        .deploy_tree("webapp/default/shop", tree(&[("index.html", "v2")]))
        .unwrap();
    assert_ok!(controller.update().await);
    assert_eq!(controller.state(), ControllerState::Active);
    assert_eq!(factory.instantiated(), 2);
    assert_eq!(repo.expands(), 2);

    let index = std::fs::read_to_string(dir.path().join("shop/index.html")).unwrap();
    assert_eq!(index, "v2");
}

#[tokio::test]
async fn test_error_needs_restart() {
    let dir = tempfile::tempdir().unwrap();
    let repo = CountingRepository::new();
    let env = env(&repo);
    let mut events = env.notifier.subscribe();
    let factory = RecordingFactory::new();
    factory.fail("shop", true);

    let controller = shop(dir.path(), DeployMode::Automatic, DeployMode::Manual, &factory, &env);
    assert_ok!(controller.start_on_init().await);
    assert_eq!(controller.state(), ControllerState::Error);
    assert!(controller.config_error().is_some());

    let event = events.try_recv().unwrap();
    assert_eq!(event.kind, LifecycleEventKind::StartFailed);
    assert_eq!(event.controller_id, "webapp/default/shop");

    // start does not clear an error
    assert_ok!(controller.start().await);
    assert_eq!(controller.state(), ControllerState::Error);
    assert_eq!(factory.instantiated(), 1);

    factory.fail("shop", false);
    assert_ok!(controller.restart().await);
    assert_eq!(controller.state(), ControllerState::Active);
    assert!(controller.config_error().is_none());
    assert_eq!(factory.instantiated(), 2);

    let event = events.try_recv().unwrap();
    assert_eq!(event.kind, LifecycleEventKind::AfterStart);
    assert!(event.sequence > 1);

    let status = env.notifier.tag_status("webapp/default/shop").unwrap();
    assert_eq!(status.state, ControllerState::Active);
}

#[tokio::test]
async fn test_extraction_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let repo = CountingRepository::new();
    let hash = repo
        .inner
        .deploy_tree("webapp/default/shop", tree(&[("index.html", "hi"), ("css/site.css", "body{}")]))
        .unwrap();
    let factory = RecordingFactory::new();
    let env = env(&repo);

    let controller = shop(dir.path(), DeployMode::Manual, DeployMode::Manual, &factory, &env);
    controller.init().await;
    assert!(controller.deploy().await.unwrap());
    assert!(!controller.deploy().await.unwrap());
    assert_eq!(repo.expands(), 1);
    assert_eq!(controller.root_hash().as_deref(), Some(hash.as_str()));

    let marker = std::fs::read_to_string(dir.path().join("shop/META-INF/deploy.application-hash")).unwrap();
    assert_eq!(marker.trim(), hash);
    assert!(dir.path().join("shop/css/site.css").exists());

    // a fresh controller picks the marker up and skips the expansion
    let again = shop(dir.path(), DeployMode::Manual, DeployMode::Manual, &factory, &env);
    again.init().await;
    assert!(!again.deploy().await.unwrap());
    assert_eq!(repo.expands(), 1);
}

#[tokio::test]
async fn test_archive_and_cluster_tag_conflict() {
    let dir = tempfile::tempdir().unwrap();
    let repo = CountingRepository::new();
    repo.inner
        .deploy_tree("webapp/default/shop", tree(&[("index.html", "cluster")]))
        .unwrap();
    let archive = dir.path().join("shop.tar");
    write_tar(&tree(&[("index.html", "archive")]), &archive).unwrap();

    let factory = RecordingFactory::new();
    let config = ControllerConfig::new(dir.path().join("shop"), ControllerType::Discovered)
        .with_modes(DeployMode::Automatic, DeployMode::Manual)
        .with_archive(&archive);
    let controller = DeployController::new(
        "shop",
        DeployTag::new("webapp", "default/shop"),
        config,
        factory.clone(),
        &env(&repo),
    );

    assert_ok!(controller.start_on_init().await);
    assert_eq!(controller.state(), ControllerState::Error);
    assert!(controller.config_error().unwrap().is_config());
    assert_eq!(repo.expands(), 0);
    assert_eq!(factory.instantiated(), 0);
}

#[tokio::test]
async fn test_manual_startup_with_automatic_redeploy_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let repo = CountingRepository::new();
    let factory = RecordingFactory::new();
    let controller = shop(dir.path(), DeployMode::Manual, DeployMode::Automatic, &factory, &env(&repo));

    assert_ok!(controller.start_on_init().await);
    assert_eq!(controller.state(), ControllerState::Error);
    assert!(controller.config_error().unwrap().is_config());
    assert!(controller.strategy().is_none());

    assert_ok!(controller.start().await);
    assert_eq!(controller.state(), ControllerState::Error);
    assert_eq!(factory.instantiated(), 0);
}

#[tokio::test]
async fn test_lazy_start_on_first_request() {
    let dir = tempfile::tempdir().unwrap();
    let repo = CountingRepository::new();
    let factory = RecordingFactory::new();
    let controller = shop(dir.path(), DeployMode::Lazy, DeployMode::Manual, &factory, &env(&repo));

    assert_ok!(controller.start_on_init().await);
    assert_eq!(controller.state(), ControllerState::Idle);
    assert_eq!(factory.instantiated(), 0);

    assert!(controller.request().await.is_some());
    assert_eq!(controller.state(), ControllerState::Active);

    assert_ok!(controller.stop().await);
    assert_eq!(controller.state(), ControllerState::Stopped);
}

#[tokio::test]
async fn test_destroy_is_terminal() {
    let dir = tempfile::tempdir().unwrap();
    let repo = CountingRepository::new();
    let factory = RecordingFactory::new();
    let controller = shop(dir.path(), DeployMode::Automatic, DeployMode::Manual, &factory, &env(&repo));

    assert_ok!(controller.start_on_init().await);
    assert_eq!(controller.state(), ControllerState::Active);

    assert_ok!(controller.destroy().await);
    assert_eq!(controller.state(), ControllerState::Destroyed);
    assert_eq!(factory.events("stop"), vec!["shop".to_string()]);
    assert_eq!(factory.events("destroy"), vec!["shop".to_string()]);

    assert_ok!(controller.start().await);
    assert_ok!(controller.destroy().await);
    assert_eq!(controller.state(), ControllerState::Destroyed);
    assert_eq!(factory.instantiated(), 1);
}

#[tokio::test]
async fn test_concurrent_start_and_destroy() {
    let dir = tempfile::tempdir().unwrap();
    let repo = CountingRepository::new();
    repo.inner
        .deploy_tree("webapp/default/shop", tree(&[("index.html", "v1")]))
        .unwrap();
    let factory = RecordingFactory::new();
    let controller = shop(dir.path(), DeployMode::Automatic, DeployMode::Manual, &factory, &env(&repo));
    controller.init().await;

    let (started, destroyed) = tokio::join!(controller.start(), controller.destroy());
    assert_ok!(started);
    assert_ok!(destroyed);

    assert_eq!(controller.state(), ControllerState::Destroyed);
    assert!(controller.instance().is_none());
    // whichever ran first, a started instance is stopped exactly once
    let starts = factory.events("start");
    let stops = factory.events("stop");
    assert!(starts.len() <= 1);
    assert_eq!(starts, stops);

    // a destroyed controller stays down
    assert_ok!(controller.start().await);
    assert_eq!(controller.state(), ControllerState::Destroyed);
    assert_eq!(factory.events("stop").len(), stops.len());
}
