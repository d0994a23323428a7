//! Deployment units and the service that (un)deploys them

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A deployable module, identified by its coordinates
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeploymentUnit {
    pub group_id: String,
    pub artifact_id: String,
    pub version: String,
    pub kbase_name: Option<String>,
    pub ksession_name: Option<String>,
}

impl DeploymentUnit {
    pub fn new(
        group_id: impl Into<String>,
        artifact_id: impl Into<String>,
        version: impl Into<String>,
    ) -> Self {
        Self {
            group_id: group_id.into(),
            artifact_id: artifact_id.into(),
            version: version.into(),
            kbase_name: None,
            ksession_name: None,
        }
    }

    pub fn with_kbase(mut self, kbase_name: impl Into<String>) -> Self {
        self.kbase_name = Some(kbase_name.into());
        self
    }

    pub fn with_ksession(mut self, ksession_name: impl Into<String>) -> Self {
        self.ksession_name = Some(ksession_name.into());
        self
    }

    /// `group:artifact:version[:kbase][:ksession]`
    pub fn identifier(&self) -> String {
        let mut id = format!("{}:{}:{}", self.group_id, self.artifact_id, self.version);
        for part in [&self.kbase_name, &self.ksession_name].into_iter().flatten() {
            id.push(':');
            id.push_str(part);
        }
        id
    }
}

impl fmt::Display for DeploymentUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.identifier())
    }
}

/// Performs the actual (un)deployment
///
/// Implementations need not be safe to call concurrently for the same
/// unit; the executor runs one job at a time.
#[async_trait]
pub trait DeploymentService: Send + Sync {
    async fn deploy(&self, unit: &DeploymentUnit) -> anyhow::Result<()>;

    async fn undeploy(&self, unit: &DeploymentUnit) -> anyhow::Result<()>;
}
