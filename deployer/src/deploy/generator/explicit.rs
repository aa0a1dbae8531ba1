//! Generator for units declared in configuration

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;

use crate::deploy::controller::{ControllerConfig, DeployController};
use crate::deploy::environment::DeployEnvironment;
use crate::deploy::generator::DeployGenerator;
use crate::deploy::instance::InstanceFactory;
use crate::deploy::mode::{ControllerType, DeployMode};
use crate::deploy::tag::DeployTag;
use crate::errors::DeployError;

/// One declared unit
#[derive(Debug, Clone)]
pub struct ExplicitUnit {
    pub name: String,
    pub tag: DeployTag,
    pub config: ControllerConfig,
}

impl ExplicitUnit {
    pub fn new(name: impl Into<String>, tag: DeployTag, mut config: ControllerConfig) -> Self {
        config.controller_type = ControllerType::Explicit;
        Self {
            name: name.into(),
            tag,
            config,
        }
    }
}

/// A fixed list of declared units. Declarations outrank discovered units.
pub struct ExplicitGenerator {
    units: Vec<ExplicitUnit>,
    env: DeployEnvironment,
    factory: Arc<dyn InstanceFactory>,
}

impl ExplicitGenerator {
    pub fn new(units: Vec<ExplicitUnit>, env: DeployEnvironment, factory: Arc<dyn InstanceFactory>) -> Self {
        Self { units, env, factory }
    }

    pub fn units(&self) -> &[ExplicitUnit] {
        &self.units
    }
}

#[async_trait]
impl DeployGenerator for ExplicitGenerator {
    fn id(&self) -> String {
        format!("explicit[{}]", self.units.len())
    }

    // declarations only change with the configuration
    fn redeploy_mode(&self) -> DeployMode {
        DeployMode::Manual
    }

    async fn start(&self) -> Result<(), DeployError> {
        Ok(())
    }

    async fn fill_deployed_names(&self, names: &mut BTreeSet<String>) {
        names.extend(self.units.iter().map(|unit| unit.name.clone()));
    }

    async fn generate_controller(&self, name: &str, out: &mut Vec<DeployController>) -> Result<(), DeployError> {
        for unit in self.units.iter().filter(|unit| unit.name == name) {
            out.push(DeployController::new(
                unit.name.clone(),
                unit.tag.clone(),
                unit.config.clone(),
                self.factory.clone(),
                &self.env,
            ));
        }
        Ok(())
    }

    async fn is_modified(&self) -> bool {
        false
    }

    async fn update(&self) -> Result<BTreeSet<String>, DeployError> {
        Ok(BTreeSet::new())
    }
}
