//! Deployment error types
//!
//! Submissions never fail with an error; these variants are turned into
//! the message of a rejected [`DeploymentJobResult`](crate::DeploymentJobResult).

use crate::job::JobType;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeploymentError {
    /// Too many unfinished jobs
    #[error("Queue is full with existing incomplete un/deploy jobs (max {max})")]
    QueueFull { max: usize },

    /// An identical job is queued or running
    #[error("A job already exists to {job_type} this deployment ({unit_id})")]
    AlreadyInProgress { unit_id: String, job_type: JobType },

    /// The worker queue has been closed
    #[error("Deployment executor has been shut down")]
    ShutDown,

    /// The deployment service reported a failure
    #[error("Deployment ({job_type}) of {unit_id} failed due to {message}")]
    Failed {
        unit_id: String,
        job_type: JobType,
        message: String,
    },
}

pub type Result<T> = std::result::Result<T, DeploymentError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages() {
        assert!(DeploymentError::QueueFull { max: 3 }
            .to_string()
            .starts_with("Queue is full with existing incomplete un/deploy jobs"));

        let dup = DeploymentError::AlreadyInProgress {
            unit_id: "g:a:1".to_string(),
            job_type: JobType::Undeploy,
        };
        assert_eq!(
            dup.to_string(),
            "A job already exists to undeploy this deployment (g:a:1)"
        );

        let failed = DeploymentError::Failed {
            unit_id: "g:a:1".to_string(),
            job_type: JobType::Deploy,
            message: "missing kjar".to_string(),
        };
        assert!(failed.to_string().contains("failed due to missing kjar"));
    }
}
