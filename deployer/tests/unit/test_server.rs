//! Admin routes

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use serde_json::Value;
use tower::ServiceExt;

use hotdeploy::app::state::ActivityTracker;
use hotdeploy::deploy::container::DeployContainer;
use hotdeploy::deploy::controller::ControllerConfig;
use hotdeploy::deploy::environment::DeployEnvironment;
use hotdeploy::deploy::generator::explicit::{ExplicitGenerator, ExplicitUnit};
use hotdeploy::deploy::mode::ControllerType;
use hotdeploy::deploy::tag::DeployTag;
use hotdeploy::server::serve::router;
use hotdeploy::server::state::ServerState;

use crate::support::RecordingFactory;

async fn app(root: &std::path::Path) -> (Router, Arc<DeployContainer>) {
    let env = DeployEnvironment::default();
    let factory = RecordingFactory::new();
    let config = ControllerConfig::new(root.join("shop"), ControllerType::Explicit);
    let units = vec![ExplicitUnit::new("shop", DeployTag::new("webapp", "shop"), config)];

    let container = Arc::new(DeployContainer::new(&env));
    container
        .add_generator(Arc::new(ExplicitGenerator::new(units, env.clone(), factory)))
        .await
        .unwrap();
    container.start().await.unwrap();

    let state = ServerState::new(container.clone(), Arc::new(ActivityTracker::new()));
    (router(Arc::new(state)), container)
}

async fn call(app: &Router, method: &str, uri: &str) -> (StatusCode, Value) {
    let request = Request::builder()
        .method(method)
        .uri(uri)
        .body(Body::empty())
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, body)
}

#[tokio::test]
async fn test_health_and_listing() {
    let dir = tempfile::tempdir().unwrap();
    let (app, _container) = app(dir.path()).await;

    let (status, body) = call(&app, "GET", "/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["deployments"], 1);

    let (status, body) = call(&app, "GET", "/deployments").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total"], 1);
    assert_eq!(body["deployments"][0]["name"], "shop");
    assert_eq!(body["deployments"][0]["state"], "active");

    let (status, body) = call(&app, "GET", "/deployments/shop").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["id"], "webapp/shop");

    let (status, _) = call(&app, "GET", "/deployments/missing").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_admin_actions() {
    let dir = tempfile::tempdir().unwrap();
    let (app, container) = app(dir.path()).await;

    let (status, body) = call(&app, "POST", "/deployments/shop/stop").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["state"], "stopped");

    let (_, body) = call(&app, "POST", "/deployments/shop/start").await;
    assert_eq!(body["success"], true);
    assert_eq!(body["state"], "active");

    let (_, body) = call(&app, "POST", "/deployments/missing/start").await;
    assert_eq!(body["success"], false);
    assert!(body["state"].is_null());

    let (status, _) = call(&app, "POST", "/deployments/shop/explode").await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (_, body) = call(&app, "POST", "/deployments/update").await;
    assert_eq!(body["success"], true);
    assert_eq!(body["changed"], Value::Array(Vec::new()));

    container.destroy().await;
    let (_, body) = call(&app, "GET", "/health").await;
    assert_eq!(body["status"], "stopped");
}
