//! Deployment jobs and their observable status

use crate::unit::DeploymentUnit;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Instant;
use tokio::sync::Notify;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    Deploy,
    Undeploy,
}

impl JobType {
    /// Status reported while a job of this type is unfinished
    pub fn in_progress(self) -> DeploymentStatus {
        match self {
            JobType::Deploy => DeploymentStatus::Deploying,
            JobType::Undeploy => DeploymentStatus::Undeploying,
        }
    }

    /// Status reported once a job of this type finished
    pub fn finished(self, success: bool) -> DeploymentStatus {
        match (self, success) {
            (JobType::Deploy, true) => DeploymentStatus::Deployed,
            (JobType::Deploy, false) => DeploymentStatus::DeployFailed,
            (JobType::Undeploy, true) => DeploymentStatus::Undeployed,
            (JobType::Undeploy, false) => DeploymentStatus::UndeployFailed,
        }
    }
}

impl fmt::Display for JobType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobType::Deploy => f.write_str("deploy"),
            JobType::Undeploy => f.write_str("undeploy"),
        }
    }
}

/// At most one unfinished job exists per id
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobId {
    pub unit_id: String,
    pub job_type: JobType,
}

impl JobId {
    pub fn new(unit_id: impl Into<String>, job_type: JobType) -> Self {
        Self {
            unit_id: unit_id.into(),
            job_type,
        }
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.unit_id, self.job_type)
    }
}

/// Deployment status of a unit as seen through the job cache
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeploymentStatus {
    Nonexistent,
    Deploying,
    Deployed,
    DeployFailed,
    Undeploying,
    Undeployed,
    UndeployFailed,
}

impl fmt::Display for DeploymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DeploymentStatus::Nonexistent => "NONEXISTENT",
            DeploymentStatus::Deploying => "DEPLOYING",
            DeploymentStatus::Deployed => "DEPLOYED",
            DeploymentStatus::DeployFailed => "DEPLOY_FAILED",
            DeploymentStatus::Undeploying => "UNDEPLOYING",
            DeploymentStatus::Undeployed => "UNDEPLOYED",
            DeploymentStatus::UndeployFailed => "UNDEPLOY_FAILED",
        };
        f.write_str(name)
    }
}

/// Outcome of a submission
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentJobResult {
    pub message: String,
    pub success: bool,
    pub unit: DeploymentUnit,
    pub job_type: JobType,
}

impl DeploymentJobResult {
    pub fn new(
        message: impl Into<String>,
        success: bool,
        unit: DeploymentUnit,
        job_type: JobType,
    ) -> Self {
        Self {
            message: message.into(),
            success,
            unit,
            job_type,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum JobState {
    Queued = 0,
    Running = 1,
    Succeeded = 2,
    Failed = 3,
}

impl JobState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => JobState::Queued,
            1 => JobState::Running,
            2 => JobState::Succeeded,
            _ => JobState::Failed,
        }
    }
}

/// One submitted (un)deployment
pub struct Job {
    id: JobId,
    unit: DeploymentUnit,
    state: AtomicU8,
    done: Notify,
    submitted_at: Instant,
}

impl Job {
    pub fn new(unit: DeploymentUnit, job_type: JobType) -> Self {
        Self {
            id: JobId::new(unit.identifier(), job_type),
            unit,
            state: AtomicU8::new(JobState::Queued as u8),
            done: Notify::new(),
            submitted_at: Instant::now(),
        }
    }

    pub fn id(&self) -> &JobId {
        &self.id
    }

    pub fn unit(&self) -> &DeploymentUnit {
        &self.unit
    }

    pub fn job_type(&self) -> JobType {
        self.id.job_type
    }

    pub fn submitted_at(&self) -> Instant {
        self.submitted_at
    }

    pub fn state(&self) -> JobState {
        JobState::from_u8(self.state.load(Ordering::SeqCst))
    }

    fn transition(&self, from: JobState, to: JobState) -> bool {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    /// Claim the job for running; fails if it was cancelled
    pub fn start(&self) -> bool {
        self.transition(JobState::Queued, JobState::Running)
    }

    /// Cancel a job that has not started; it then counts as failed
    pub fn cancel(&self) -> bool {
        let cancelled = self.transition(JobState::Queued, JobState::Failed);
        if cancelled {
            self.done.notify_waiters();
        }
        cancelled
    }

    pub fn complete(&self, success: bool) {
        let state = if success {
            JobState::Succeeded
        } else {
            JobState::Failed
        };
        self.state.store(state as u8, Ordering::SeqCst);
        self.done.notify_waiters();
    }

    pub fn is_done(&self) -> bool {
        matches!(self.state(), JobState::Succeeded | JobState::Failed)
    }

    /// `Some(success)` once finished
    pub fn outcome(&self) -> Option<bool> {
        match self.state() {
            JobState::Succeeded => Some(true),
            JobState::Failed => Some(false),
            _ => None,
        }
    }

    /// Status this job implies for its unit
    pub fn status(&self) -> DeploymentStatus {
        match self.outcome() {
            Some(success) => self.job_type().finished(success),
            None => self.job_type().in_progress(),
        }
    }

    /// Wait until the job finishes and return whether it succeeded
    pub async fn wait(&self) -> bool {
        loop {
            // Register before checking so a completion in between is not missed
            let notified = self.done.notified();
            if let Some(outcome) = self.outcome() {
                return outcome;
            }
            notified.await;
        }
    }
}

impl fmt::Debug for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Job")
            .field("id", &self.id)
            .field("state", &self.state())
            .finish()
    }
}
