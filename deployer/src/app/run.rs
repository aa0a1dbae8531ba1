//! Main application run loop

use std::future::Future;
use std::sync::Arc;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::app::options::{AppOptions, LifecycleOptions};
use crate::app::state::AppState;
use crate::deploy::instance::InstanceFactory;
use crate::errors::DeployError;
use crate::repository::memory::MemoryRepository;
use crate::repository::Repository;
use crate::server::serve::serve;
use crate::server::state::ServerState;
use crate::workers::alarm;

/// Run the deployment engine until `shutdown_signal` resolves.
///
/// Without a repository an in-process [`MemoryRepository`] is used.
pub async fn run(
    options: AppOptions,
    factory: Arc<dyn InstanceFactory>,
    repository: Option<Arc<dyn Repository>>,
    shutdown_signal: impl Future<Output = ()> + Send + 'static,
) -> Result<(), DeployError> {
    info!("Initializing deployment engine...");

    let (shutdown_tx, _shutdown_rx): (broadcast::Sender<()>, _) = broadcast::channel(1);
    let mut shutdown_manager = ShutdownManager::new(shutdown_tx.clone(), options.lifecycle.clone());

    let repository = repository.unwrap_or_else(|| Arc::new(MemoryRepository::new()) as Arc<dyn Repository>);

    if let Err(e) = init(&options, factory, repository, shutdown_tx.clone(), &mut shutdown_manager).await {
        error!("Failed to start deployment engine: {}", e);
        shutdown_manager.shutdown().await?;
        return Err(e);
    }

    shutdown_signal.await;
    info!("Shutdown signal received, shutting down...");

    drop(shutdown_tx);
    shutdown_manager.shutdown().await
}

// =============================== INITIALIZATION ================================== //

async fn init(
    options: &AppOptions,
    factory: Arc<dyn InstanceFactory>,
    repository: Arc<dyn Repository>,
    shutdown_tx: broadcast::Sender<()>,
    shutdown_manager: &mut ShutdownManager,
) -> Result<(), DeployError> {
    let app_state = Arc::new(AppState::init(options, factory, repository).await?);
    shutdown_manager.with_app_state(app_state.clone())?;

    app_state.container.start().await?;

    init_alarm_worker(
        options.alarm.clone(),
        app_state.clone(),
        shutdown_manager,
        shutdown_tx.subscribe(),
    )?;

    if options.enable_admin_server {
        init_admin_server(options, app_state, shutdown_manager, shutdown_tx.subscribe()).await?;
    }

    Ok(())
}

fn init_alarm_worker(
    options: alarm::Options,
    app_state: Arc<AppState>,
    shutdown_manager: &mut ShutdownManager,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DeployError> {
    info!("Initializing alarm worker...");

    let container = app_state.container.clone();
    let alarm_handle = tokio::spawn(async move {
        alarm::run(
            &options,
            container,
            tokio::time::sleep,
            Box::pin(async move {
                let _ = shutdown_rx.recv().await;
            }),
        )
        .await;
    });

    shutdown_manager.with_alarm_worker_handle(alarm_handle)
}

async fn init_admin_server(
    options: &AppOptions,
    app_state: Arc<AppState>,
    shutdown_manager: &mut ShutdownManager,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DeployError> {
    info!("Initializing admin HTTP server...");

    let server_state = ServerState::new(app_state.container.clone(), app_state.activity_tracker.clone());

    let server_handle = serve(&options.server, Arc::new(server_state), async move {
        let _ = shutdown_rx.recv().await;
    })
    .await?;

    shutdown_manager.with_admin_server_handle(server_handle)
}

// ================================= SHUTDOWN ===================================== //

struct ShutdownManager {
    shutdown_tx: broadcast::Sender<()>,
    lifecycle_options: LifecycleOptions,
    app_state: Option<Arc<AppState>>,
    admin_server_handle: Option<JoinHandle<Result<(), DeployError>>>,
    alarm_worker_handle: Option<JoinHandle<()>>,
}

impl ShutdownManager {
    pub fn new(shutdown_tx: broadcast::Sender<()>, lifecycle_options: LifecycleOptions) -> Self {
        Self {
            shutdown_tx,
            lifecycle_options,
            app_state: None,
            admin_server_handle: None,
            alarm_worker_handle: None,
        }
    }

    pub fn with_app_state(&mut self, state: Arc<AppState>) -> Result<(), DeployError> {
        if self.app_state.is_some() {
            return Err(DeployError::ShutdownError("app_state already set".to_string()));
        }
        self.app_state = Some(state);
        Ok(())
    }

    pub fn with_alarm_worker_handle(&mut self, handle: JoinHandle<()>) -> Result<(), DeployError> {
        if self.alarm_worker_handle.is_some() {
            return Err(DeployError::ShutdownError("alarm_handle already set".to_string()));
        }
        self.alarm_worker_handle = Some(handle);
        Ok(())
    }

    pub fn with_admin_server_handle(
        &mut self,
        handle: JoinHandle<Result<(), DeployError>>,
    ) -> Result<(), DeployError> {
        if self.admin_server_handle.is_some() {
            return Err(DeployError::ShutdownError("server_handle already set".to_string()));
        }
        self.admin_server_handle = Some(handle);
        Ok(())
    }

    pub async fn shutdown(&mut self) -> Result<(), DeployError> {
        let _ = self.shutdown_tx.send(());

        let max_delay = self.lifecycle_options.max_shutdown_delay;
        match tokio::time::timeout(max_delay, self.shutdown_impl()).await {
            Ok(result) => result,
            Err(_) => {
                error!("Shutdown timed out after {:?}", max_delay);
                Err(DeployError::ShutdownError(format!(
                    "shutdown did not complete within {:?}",
                    max_delay
                )))
            }
        }
    }

    async fn shutdown_impl(&mut self) -> Result<(), DeployError> {
        info!("Shutting down deployment engine...");

        // 1. Alarm worker
        if let Some(handle) = self.alarm_worker_handle.take() {
            handle.await.map_err(|e| DeployError::ShutdownError(e.to_string()))?;
        }

        // 2. Admin server
        if let Some(handle) = self.admin_server_handle.take() {
            handle.await.map_err(|e| DeployError::ShutdownError(e.to_string()))??;
        }

        // 3. Container
        if let Some(app_state) = self.app_state.take() {
            app_state.shutdown().await?;
        }

        info!("Shutdown complete");
        Ok(())
    }
}
