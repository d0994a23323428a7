//! In-node deployment service
//!
//! Keeps the set of deployed units. The grid node publishes it in its ROOT
//! context so other components on the node can see what is deployed.

use async_trait::async_trait;
use dashmap::DashMap;
use grid_deployment::{DeploymentService, DeploymentUnit};
use tracing::info;

/// ROOT context key of the node's deployment service
pub const DEPLOYMENTS_KEY: &str = "__Deployments__";

#[derive(Debug, Default)]
pub struct NodeDeploymentService {
    deployed: DashMap<String, DeploymentUnit>,
}

impl NodeDeploymentService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_deployed(&self, unit_id: &str) -> bool {
        self.deployed.contains_key(unit_id)
    }

    /// Identifiers of every deployed unit, sorted
    pub fn deployed_units(&self) -> Vec<String> {
        let mut units: Vec<String> = self.deployed.iter().map(|e| e.key().clone()).collect();
        units.sort();
        units
    }
}

#[async_trait]
impl DeploymentService for NodeDeploymentService {
    async fn deploy(&self, unit: &DeploymentUnit) -> anyhow::Result<()> {
        self.deployed.insert(unit.identifier(), unit.clone());
        info!(unit = %unit, "Unit deployed");
        Ok(())
    }

    async fn undeploy(&self, unit: &DeploymentUnit) -> anyhow::Result<()> {
        if self.deployed.remove(&unit.identifier()).is_none() {
            anyhow::bail!("unit {} is not deployed", unit);
        }
        info!(unit = %unit, "Unit undeployed");
        Ok(())
    }
}
