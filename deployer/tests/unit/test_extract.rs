//! Archive commit, expansion and dependency tracking

use std::path::Path;
use std::time::Duration;

use hotdeploy::deploy::environment::DeployEnvironment;
use hotdeploy::deploy::extract::{ExtractLayout, Extractor};
use hotdeploy::deploy::tag::DeployTag;
use hotdeploy::repository::memory::write_tar;
use hotdeploy::repository::{Repository, ARCHIVE_DIGEST_ATTRIBUTE};
use hotdeploy::utils::RetryPolicy;

use crate::support::{tree, CountingRepository};

fn layout(root: &Path) -> ExtractLayout {
    ExtractLayout {
        root_directory: root.join("shop"),
        archive_path: Some(root.join("shop.tar")),
        cleanup: None,
    }
}

#[tokio::test]
async fn test_archive_is_committed_once_per_digest() {
    let dir = tempfile::tempdir().unwrap();
    let repo = CountingRepository::new();
    let env = DeployEnvironment::new("default")
        .with_repository(repo.clone())
        .with_commit_retry(RetryPolicy::none());
    let layout = layout(dir.path());
    write_tar(
        &tree(&[("index.html", "v1"), ("old.txt", "stale")]),
        layout.archive_path.as_ref().unwrap(),
    )
    .unwrap();

    let extractor = Extractor::new(&env, DeployTag::new("webapp", "default/shop"), Duration::ZERO);
    extractor.init(&layout).await;
    assert_eq!(extractor.auto_deploy_tag(), "default/webapp/default/shop");

    assert!(extractor.extract_application(&layout).await.unwrap());
    assert_eq!(repo.commits(), 1);
    assert_eq!(repo.expands(), 1);

    let entry = repo
        .inner
        .tag_entry("default/webapp/default/shop")
        .await
        .unwrap()
        .unwrap();
    assert!(entry.attributes.contains_key(ARCHIVE_DIGEST_ATTRIBUTE));
    assert_eq!(extractor.root_hash(), Some(entry.content_hash.clone()));

    // unchanged archive: neither committed nor expanded again
    assert!(!extractor.extract_application(&layout).await.unwrap());
    assert_eq!(repo.commits(), 1);
    assert_eq!(repo.expands(), 1);

    write_tar(&tree(&[("index.html", "v2")]), layout.archive_path.as_ref().unwrap()).unwrap();
    assert!(extractor.extract_application(&layout).await.unwrap());
    assert_eq!(repo.commits(), 2);

    let root = &layout.root_directory;
    assert_eq!(std::fs::read_to_string(root.join("index.html")).unwrap(), "v2");
    assert!(!root.join("old.txt").exists());
}

#[tokio::test]
async fn test_dependency_tracking() {
    let dir = tempfile::tempdir().unwrap();
    let repo = CountingRepository::new();
    let env = DeployEnvironment::new("default")
        .with_repository(repo.clone())
        .with_commit_retry(RetryPolicy::none());
    let layout = layout(dir.path());
    write_tar(&tree(&[("index.html", "v1")]), layout.archive_path.as_ref().unwrap()).unwrap();

    let extractor = Extractor::new(&env, DeployTag::new("webapp", "default/shop"), Duration::ZERO);

    // no baseline yet
    assert!(extractor.is_modified_now(&layout).await);

    extractor.extract_application(&layout).await.unwrap();
    extractor.add_dependencies(&layout).await;
    assert!(!extractor.is_modified_now(&layout).await);

    // a cluster deployment of the instance tag
    repo.inner
        .deploy_tree("webapp/default/shop", tree(&[("index.html", "cluster")]))
        .unwrap();
    assert!(extractor.is_modified_now(&layout).await);

    extractor.add_dependencies(&layout).await;
    // grows the archive past one tar block
    let large = "x".repeat(4096);
    write_tar(&tree(&[("index.html", large.as_str())]), layout.archive_path.as_ref().unwrap()).unwrap();
    assert!(extractor.is_modified(&layout).await);
}

#[tokio::test]
async fn test_undeploy_forgets_root_hash() {
    let dir = tempfile::tempdir().unwrap();
    let repo = CountingRepository::new();
    let env = DeployEnvironment::new("default")
        .with_repository(repo.clone())
        .with_commit_retry(RetryPolicy::none());
    let layout = layout(dir.path());
    write_tar(&tree(&[("index.html", "v1")]), layout.archive_path.as_ref().unwrap()).unwrap();

    let extractor = Extractor::new(&env, DeployTag::new("webapp", "default/shop"), Duration::ZERO);
    extractor.extract_application(&layout).await.unwrap();
    assert!(extractor.root_hash().is_some());

    extractor.undeploy(&layout).await.unwrap();
    assert!(extractor.root_hash().is_none());
    assert!(!layout.root_directory.join("index.html").exists());

    assert!(extractor.remove_auto_deploy_tag().await.unwrap());
    assert!(repo.inner.tag_content_hash("default/webapp/default/shop").await.unwrap().is_none());
}

fn quick_retry(max_attempts: u32) -> RetryPolicy {
    RetryPolicy {
        max_attempts,
        base_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(1),
        multiplier: 1.0,
    }
}

#[tokio::test]
async fn test_transient_commit_failure_is_retried() {
    let dir = tempfile::tempdir().unwrap();
    let repo = CountingRepository::new();
    let env = DeployEnvironment::new("default")
        .with_repository(repo.clone())
        .with_commit_retry(quick_retry(3));
    let layout = layout(dir.path());
    write_tar(&tree(&[("index.html", "v1")]), layout.archive_path.as_ref().unwrap()).unwrap();

    let extractor = Extractor::new(&env, DeployTag::new("webapp", "default/shop"), Duration::ZERO);
    repo.fail_commits(2);
    assert!(extractor.extract_application(&layout).await.unwrap());
    assert_eq!(repo.commits(), 3);
    assert_eq!(
        std::fs::read_to_string(layout.root_directory.join("index.html")).unwrap(),
        "v1"
    );
}

#[tokio::test]
async fn test_failed_commit_deploys_existing_content() {
    let dir = tempfile::tempdir().unwrap();
    let repo = CountingRepository::new();
    let env = DeployEnvironment::new("default")
        .with_repository(repo.clone())
        .with_commit_retry(quick_retry(3));
    let first = layout(dir.path());
    write_tar(&tree(&[("index.html", "v1")]), first.archive_path.as_ref().unwrap()).unwrap();

    let extractor = Extractor::new(&env, DeployTag::new("webapp", "default/shop"), Duration::ZERO);
    assert!(extractor.extract_application(&first).await.unwrap());
    assert_eq!(repo.commits(), 1);

    // new archive that never reaches the repository
    write_tar(&tree(&[("index.html", "v2")]), first.archive_path.as_ref().unwrap()).unwrap();
    repo.fail_commits(10);

    let second = ExtractLayout {
        root_directory: dir.path().join("shop-copy"),
        ..first.clone()
    };
    let extractor = Extractor::new(&env, DeployTag::new("webapp", "default/shop"), Duration::ZERO);
    assert!(extractor.extract_application(&second).await.unwrap());
    assert_eq!(repo.commits(), 4);
    assert_eq!(
        std::fs::read_to_string(second.root_directory.join("index.html")).unwrap(),
        "v1"
    );
}
