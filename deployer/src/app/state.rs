//! Application state management

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::info;

use crate::app::options::AppOptions;
use crate::deploy::container::DeployContainer;
use crate::deploy::environment::DeployEnvironment;
use crate::deploy::generator::expand::ExpandGenerator;
use crate::deploy::generator::explicit::ExplicitGenerator;
use crate::deploy::generator::DeployGenerator;
use crate::deploy::instance::InstanceFactory;
use crate::errors::DeployError;
use crate::repository::Repository;

/// Last time the admin surface was used
pub struct ActivityTracker {
    last_touched: AtomicI64,
}

impl ActivityTracker {
    pub fn new() -> Self {
        Self {
            last_touched: AtomicI64::new(Utc::now().timestamp()),
        }
    }

    pub fn touch(&self) {
        self.last_touched.store(Utc::now().timestamp(), Ordering::SeqCst);
    }

    /// Unix seconds of the last touch
    pub fn last_touched(&self) -> i64 {
        self.last_touched.load(Ordering::SeqCst)
    }

    pub fn last_touched_at(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(self.last_touched(), 0)
    }
}

impl Default for ActivityTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// Main application state
pub struct AppState {
    /// Collaborators shared by generators and controllers
    pub env: DeployEnvironment,

    /// The deployment container
    pub container: Arc<DeployContainer>,

    /// Admin activity tracker
    pub activity_tracker: Arc<ActivityTracker>,
}

impl AppState {
    /// Build the environment and the container and register one generator
    /// per configured root, plus one for the declared units
    pub async fn init(
        options: &AppOptions,
        factory: Arc<dyn InstanceFactory>,
        repository: Arc<dyn Repository>,
    ) -> Result<Self, DeployError> {
        info!("Initializing application state...");

        let env = DeployEnvironment::new(options.stage.clone())
            .with_repository(repository)
            .with_marker(options.marker.clone())
            .with_commit_retry(options.commit_retry.clone());

        let container = Arc::new(DeployContainer::new(&env));

        if !options.units.is_empty() {
            let explicit: Arc<dyn DeployGenerator> = Arc::new(ExplicitGenerator::new(
                options.units.clone(),
                env.clone(),
                factory.clone(),
            ));
            container.add_generator(explicit).await?;
        }

        for generator_options in &options.generators {
            let generator: Arc<dyn DeployGenerator> = Arc::new(ExpandGenerator::new(
                generator_options.clone(),
                env.clone(),
                factory.clone(),
            ));
            info!(generator = %generator.id(), "registering deployment root");
            container.add_generator(generator).await?;
        }

        Ok(Self {
            env,
            container,
            activity_tracker: Arc::new(ActivityTracker::new()),
        })
    }

    /// Destroy every deployment
    pub async fn shutdown(&self) -> Result<(), DeployError> {
        info!("Shutting down application state...");
        self.container.destroy().await;
        Ok(())
    }
}
