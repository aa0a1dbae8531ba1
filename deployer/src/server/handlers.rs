//! Admin request handlers

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::Serialize;
use tracing::info;

use crate::deploy::controller::DeployController;
use crate::server::state::ServerState;
use crate::utils::version_info;

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub service: String,
    pub version: String,
    pub deployments: usize,
}

/// Health check handler
pub async fn health_handler(State(state): State<Arc<ServerState>>) -> impl IntoResponse {
    let version = version_info();
    let status = if state.container.is_active() { "healthy" } else { "stopped" };
    Json(HealthResponse {
        status: status.to_string(),
        service: "hotdeploy".to_string(),
        version: version.version,
        deployments: state.container.controllers().len(),
    })
}

/// Version response
#[derive(Debug, Serialize)]
pub struct VersionResponse {
    pub version: String,
    pub git_hash: String,
    pub build_time: String,
}

/// Version handler
pub async fn version_handler() -> impl IntoResponse {
    let version = version_info();
    Json(VersionResponse {
        version: version.version,
        git_hash: version.git_hash,
        build_time: version.build_time,
    })
}

/// One deployment as reported by the admin surface
#[derive(Debug, Serialize)]
pub struct DeploymentInfo {
    pub id: String,
    pub name: String,
    pub state: String,
    pub version: String,
    pub startup_priority: i32,
    pub redeploy_mode: String,
    pub root_directory: String,
    pub root_hash: Option<String>,
    pub error: Option<String>,
}

impl From<&DeployController> for DeploymentInfo {
    fn from(controller: &DeployController) -> Self {
        let config = controller.config();
        Self {
            id: controller.id().to_string(),
            name: controller.name().to_string(),
            state: controller.state().to_string(),
            version: config.version,
            startup_priority: controller.startup_priority(),
            redeploy_mode: controller.redeploy_mode().to_string(),
            root_directory: config.root_directory.display().to_string(),
            root_hash: controller.root_hash(),
            error: controller.config_error().map(|e| e.to_string()),
        }
    }
}

/// Deployments response
#[derive(Debug, Serialize)]
pub struct DeploymentsResponse {
    pub deployments: Vec<DeploymentInfo>,
    pub total: usize,
}

/// Deployments handler
pub async fn deployments_handler(State(state): State<Arc<ServerState>>) -> impl IntoResponse {
    state.activity_tracker.touch();

    let deployments: Vec<DeploymentInfo> = state
        .container
        .controllers()
        .iter()
        .map(|controller| DeploymentInfo::from(controller.as_ref()))
        .collect();
    let total = deployments.len();

    Json(DeploymentsResponse { deployments, total })
}

/// Single deployment handler
pub async fn deployment_handler(
    State(state): State<Arc<ServerState>>,
    Path(name): Path<String>,
) -> Result<impl IntoResponse, StatusCode> {
    state.activity_tracker.touch();

    let controller = state.container.find_controller(&name).ok_or(StatusCode::NOT_FOUND)?;
    Ok(Json(DeploymentInfo::from(controller.as_ref())))
}

/// Admin action response
#[derive(Debug, Serialize)]
pub struct ActionResponse {
    pub success: bool,
    pub name: String,
    pub action: String,
    pub state: Option<String>,
    pub error: Option<String>,
}

/// `deploy`, `start`, `stop` or `undeploy` one deployment
pub async fn deployment_action_handler(
    State(state): State<Arc<ServerState>>,
    Path((name, action)): Path<(String, String)>,
) -> Result<impl IntoResponse, StatusCode> {
    state.activity_tracker.touch();

    let container = &state.container;
    info!(name = %name, action = %action, "admin action");
    let success = match action.as_str() {
        "deploy" => container.deploy(&name).await,
        "start" => container.start_controller(&name).await,
        "stop" => container.stop_controller(&name).await,
        "undeploy" => container.undeploy(&name).await,
        _ => return Err(StatusCode::NOT_FOUND),
    };

    let controller = container.find_controller(&name);
    Ok(Json(ActionResponse {
        success,
        name,
        action,
        state: controller.as_ref().map(|c| c.state().to_string()),
        error: controller
            .and_then(|c| c.config_error())
            .map(|e| e.to_string()),
    }))
}

/// Rescan response
#[derive(Debug, Serialize)]
pub struct UpdateResponse {
    pub success: bool,
    pub changed: Vec<String>,
    pub message: Option<String>,
}

/// Rescan every deployment root now
pub async fn update_handler(State(state): State<Arc<ServerState>>) -> impl IntoResponse {
    state.activity_tracker.touch();

    match state.container.update_all().await {
        Ok(changed) => Json(UpdateResponse {
            success: true,
            changed: changed.into_iter().collect(),
            message: None,
        }),
        Err(e) => Json(UpdateResponse {
            success: false,
            changed: Vec::new(),
            message: Some(format!("Update failed: {}", e)),
        }),
    }
}
