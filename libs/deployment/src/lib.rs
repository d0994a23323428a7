//! Grid Deployment
//!
//! Serialized (un)deployment of units with a bounded job cache that still
//! answers status queries after jobs finish.
//!
//! ```rust,no_run
//! # async fn example(service: std::sync::Arc<dyn grid_deployment::DeploymentService>) {
//! use grid_deployment::{AsyncDeploymentJobExecutor, DeploymentUnit};
//!
//! let executor = AsyncDeploymentJobExecutor::new(Default::default());
//! let unit = DeploymentUnit::new("org.grid", "rules", "1.0");
//! let result = executor.submit_deploy_job(service, unit.clone()).await;
//! assert!(result.success);
//! println!("{}", executor.status(&unit.identifier()));
//! # }
//! ```

pub mod cache;
pub mod error;
pub mod executor;
pub mod job;
pub mod unit;

pub use cache::JobCache;
pub use error::DeploymentError;
pub use executor::AsyncDeploymentJobExecutor;
pub use job::{DeploymentJobResult, DeploymentStatus, Job, JobId, JobState, JobType};
pub use unit::{DeploymentService, DeploymentUnit};
