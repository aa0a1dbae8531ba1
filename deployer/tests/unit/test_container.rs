//! Container registry, precedence and ordering

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use hotdeploy::deploy::container::DeployContainer;
use hotdeploy::deploy::controller::ControllerConfig;
use hotdeploy::deploy::environment::DeployEnvironment;
use hotdeploy::deploy::events::LifecycleEventKind;
use hotdeploy::deploy::generator::expand::{ExpandGenerator, ExpandGeneratorOptions};
use hotdeploy::deploy::generator::explicit::{ExplicitGenerator, ExplicitUnit};
use hotdeploy::deploy::generator::DeployGenerator;
use hotdeploy::deploy::lifecycle::ControllerState;
use hotdeploy::deploy::mode::{ControllerType, DeployMode};
use hotdeploy::deploy::tag::DeployTag;
use hotdeploy::repository::memory::{write_tar, MemoryRepository};
use hotdeploy::utils::RetryPolicy;

use crate::support::{tree, RecordingFactory};

fn env() -> DeployEnvironment {
    DeployEnvironment::new("default")
        .with_repository(Arc::new(MemoryRepository::new()))
        .with_commit_retry(RetryPolicy::none())
}

fn unit(root: &Path, name: &str, priority: i32) -> ExplicitUnit {
    let config = ControllerConfig::new(root.join(name), ControllerType::Explicit).with_priority(priority);
    ExplicitUnit::new(name, DeployTag::new("app", name), config)
}

fn webapps(root: &Path) -> ExpandGeneratorOptions {
    ExpandGeneratorOptions {
        expand_root: root.join("webapps"),
        versioning: true,
        startup_mode: DeployMode::Automatic,
        redeploy_mode: DeployMode::Automatic,
        check_interval: Duration::ZERO,
        redeploy_check_interval: Some(Duration::ZERO),
        ..ExpandGeneratorOptions::default()
    }
}

#[tokio::test]
async fn test_start_ascending_stop_descending() {
    let dir = tempfile::tempdir().unwrap();
    let env = env();
    let factory = RecordingFactory::new();
    let units = vec![
        unit(dir.path(), "a", 3),
        unit(dir.path(), "b", 1),
        unit(dir.path(), "c", 2),
    ];

    let container = DeployContainer::new(&env);
    container
        .add_generator(Arc::new(ExplicitGenerator::new(units, env.clone(), factory.clone())))
        .await
        .unwrap();
    container.start().await.unwrap();

    assert_eq!(factory.events("start"), vec!["b", "c", "a"]);
    assert!(container
        .controllers()
        .iter()
        .all(|c| c.state() == ControllerState::Active));

    container.stop().await;
    assert_eq!(factory.events("stop"), vec!["a", "c", "b"]);

    container.destroy().await;
    assert!(container.controllers().is_empty());
}

#[tokio::test]
async fn test_explicit_unit_outranks_discovered_one() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::create_dir_all(dir.path().join("webapps/shop")).unwrap();
    std::fs::write(dir.path().join("webapps/shop/index.html"), "discovered").unwrap();

    let env = env();
    let factory = RecordingFactory::new();

    let config = ControllerConfig::new(dir.path().join("explicit-shop"), ControllerType::Explicit)
        .with_modes(DeployMode::Manual, DeployMode::Manual);
    let explicit = ExplicitGenerator::new(
        vec![ExplicitUnit::new("shop", DeployTag::new("webapp", "default/shop"), config)],
        env.clone(),
        factory.clone(),
    );
    let discovered = ExpandGenerator::new(
        ExpandGeneratorOptions {
            startup_priority: Some(7),
            ..webapps(dir.path())
        },
        env.clone(),
        factory.clone(),
    );

    // registration order does not decide precedence
    let container = DeployContainer::new(&env);
    container.add_generator(Arc::new(discovered)).await.unwrap();
    container.add_generator(Arc::new(explicit)).await.unwrap();
    container.start().await.unwrap();

    assert_eq!(container.controllers().len(), 1);
    let shop = container.find_controller("shop").unwrap();
    let config = shop.config();
    assert_eq!(shop.controller_type(), ControllerType::Explicit);
    assert_eq!(config.root_directory, dir.path().join("explicit-shop"));
    // unset fields come from the losing candidate
    assert_eq!(config.archive_path, Some(dir.path().join("webapps/shop.tar")));
    assert_eq!(shop.startup_priority(), 7);
    assert_eq!(shop.state(), ControllerState::Stopped);

    assert!(container.start_controller("shop").await);
    assert_eq!(shop.state(), ControllerState::Active);
    assert!(container.stop_controller("shop").await);
    assert!(!container.start_controller("missing").await);
}

#[tokio::test]
async fn test_deployment_root_end_to_end() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().join("webapps");
    std::fs::create_dir_all(root.join("foo-1.0")).unwrap();
    std::fs::write(root.join("foo-1.0/index.html"), "one").unwrap();
    write_tar(&tree(&[("index.html", "two")]), &root.join("foo-2.0.tar")).unwrap();
    write_tar(&tree(&[("index.html", "bar")]), &root.join("bar.tar")).unwrap();

    let env = env();
    let factory = RecordingFactory::new();
    let container = DeployContainer::new(&env);
    let mut events = container.subscribe();
    let generator: Arc<dyn DeployGenerator> =
        Arc::new(ExpandGenerator::new(webapps(dir.path()), env.clone(), factory.clone()));
    container.add_generator(generator).await.unwrap();
    container.start().await.unwrap();

    assert_eq!(container.controllers().len(), 2);

    let foo = container.find_controller("foo").unwrap();
    assert_eq!(foo.id(), "webapp/default/foo-2.0");
    assert_eq!(foo.config().version, "2.0");
    assert_eq!(foo.state(), ControllerState::Active);
    assert_eq!(std::fs::read_to_string(root.join("foo-2.0/index.html")).unwrap(), "two");
    assert!(root.join("foo-2.0/META-INF/deploy.application-hash").exists());
    // older exploded version is left alone
    assert_eq!(std::fs::read_to_string(root.join("foo-1.0/index.html")).unwrap(), "one");

    let bar = container.find_controller("bar").unwrap();
    assert_eq!(bar.state(), ControllerState::Active);

    let mut started = 0;
    while let Ok(event) = events.try_recv() {
        assert_eq!(event.kind, LifecycleEventKind::AfterStart);
        started += 1;
    }
    assert_eq!(started, 2);

    // a newer version replaces the running one on the next alarm
    write_tar(&tree(&[("index.html", "three")]), &root.join("foo-3.0.tar")).unwrap();
    container.alarm().await;

    let upgraded = container.find_controller("foo").unwrap();
    assert_eq!(upgraded.id(), "webapp/default/foo-3.0");
    assert_eq!(upgraded.state(), ControllerState::Active);
    assert_eq!(foo.state(), ControllerState::Destroyed);
    assert_eq!(std::fs::read_to_string(root.join("foo-3.0/index.html")).unwrap(), "three");
    assert_eq!(container.controllers().len(), 2);

    // undeploy removes the archive and the unit
    assert!(container.undeploy("bar").await);
    assert!(container.find_controller("bar").is_none());
    assert!(!root.join("bar.tar").exists());
    assert_eq!(bar.state(), ControllerState::Destroyed);

    container.destroy().await;
    assert_eq!(upgraded.state(), ControllerState::Destroyed);
}

#[tokio::test]
async fn test_generator_added_while_active() {
    let dir = tempfile::tempdir().unwrap();
    let env = env();
    let factory = RecordingFactory::new();
    factory.fail("broken", true);

    let container = DeployContainer::new(&env);
    container.start().await.unwrap();
    assert!(container.controllers().is_empty());

    let units = vec![unit(dir.path(), "ok", 0), unit(dir.path(), "broken", 0)];
    container
        .add_generator(Arc::new(ExplicitGenerator::new(units, env.clone(), factory.clone())))
        .await
        .unwrap();

    assert_eq!(container.controllers().len(), 2);
    assert_eq!(container.find_controller("ok").unwrap().state(), ControllerState::Active);
    assert_eq!(container.find_controller("broken").unwrap().state(), ControllerState::Error);
    assert!(container.config_error("broken").is_some());
    assert!(container.config_error("ok").is_none());

    // a second start is refused
    assert!(container.start().await.is_err());
}

#[tokio::test]
async fn test_racing_resolution_registers_one_controller() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::create_dir_all(dir.path().join("webapps")).unwrap();

    let env = env();
    let factory = RecordingFactory::new();
    let container = DeployContainer::new(&env);
    container
        .add_generator(Arc::new(ExpandGenerator::new(webapps(dir.path()), env.clone(), factory.clone())))
        .await
        .unwrap();
    container.start().await.unwrap();
    assert!(container.controllers().is_empty());

    // the generator sees the new unit, the registry does not yet
    std::fs::create_dir_all(dir.path().join("webapps/shop")).unwrap();
    std::fs::write(dir.path().join("webapps/shop/index.html"), "new").unwrap();
    container.generators().update().await.unwrap();

    let (deployed, started) = tokio::join!(container.deploy("shop"), container.start_controller("shop"));
    assert!(deployed);
    assert!(started);

    let controllers = container.controllers();
    assert_eq!(controllers.len(), 1);
    assert_eq!(controllers.iter().filter(|c| c.id() == "webapp/default/shop").count(), 1);
    assert_eq!(controllers[0].state(), ControllerState::Active);
}
