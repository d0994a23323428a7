//! Deployment job executor
//!
//! All (un)deployments run on one worker task, one at a time, in
//! submission order. A unit therefore never sees two operations at once,
//! and the deployment service does not need to be reentrant. Submissions
//! return immediately with a structured result; callers poll
//! [`status`](AsyncDeploymentJobExecutor::status) for the outcome.

use crate::cache::JobCache;
use crate::error::DeploymentError;
use crate::job::{DeploymentJobResult, DeploymentStatus, Job, JobId, JobType};
use crate::unit::{DeploymentService, DeploymentUnit};
use futures::FutureExt;
use grid_config::DeploymentSettings;
use parking_lot::Mutex;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

struct QueuedJob {
    job: Arc<Job>,
    service: Arc<dyn DeploymentService>,
}

pub struct AsyncDeploymentJobExecutor {
    settings: DeploymentSettings,
    cache: Mutex<JobCache>,
    queue: Mutex<Option<mpsc::UnboundedSender<QueuedJob>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl AsyncDeploymentJobExecutor {
    /// Create the executor and, in async mode, spawn its worker
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(settings: DeploymentSettings) -> Self {
        let (queue, worker) = if settings.async_enabled {
            let (tx, rx) = mpsc::unbounded_channel();
            (Some(tx), Some(tokio::spawn(run_worker(rx))))
        } else {
            (None, None)
        };

        info!(
            max_queue_size = settings.max_queue_size,
            async_enabled = settings.async_enabled,
            "Deployment job executor started"
        );

        Self {
            cache: Mutex::new(JobCache::new(settings.max_queue_size)),
            settings,
            queue: Mutex::new(queue),
            worker: Mutex::new(worker),
        }
    }

    pub fn max_queue_size(&self) -> usize {
        self.settings.max_queue_size
    }

    pub fn is_async(&self) -> bool {
        self.settings.async_enabled
    }

    pub async fn submit_deploy_job(
        &self,
        service: Arc<dyn DeploymentService>,
        unit: DeploymentUnit,
    ) -> DeploymentJobResult {
        self.submit_job(service, unit, JobType::Deploy).await
    }

    pub async fn submit_undeploy_job(
        &self,
        service: Arc<dyn DeploymentService>,
        unit: DeploymentUnit,
    ) -> DeploymentJobResult {
        self.submit_job(service, unit, JobType::Undeploy).await
    }

    /// Submit one job
    ///
    /// Rejected when too many jobs are unfinished or an identical job is
    /// still queued or running. In async mode this never waits for the
    /// job; in sync mode the job runs before this returns.
    pub async fn submit_job(
        &self,
        service: Arc<dyn DeploymentService>,
        unit: DeploymentUnit,
        job_type: JobType,
    ) -> DeploymentJobResult {
        if !self.settings.async_enabled {
            return self.run_inline(service, unit, job_type).await;
        }

        match self.enqueue(service, &unit, job_type) {
            Ok(job) => {
                info!(job = %job.id(), "{} job submitted successfully", job_type);
                DeploymentJobResult::new(
                    format!("Deployment ({}) job submitted successfully.", job_type),
                    true,
                    unit,
                    job_type,
                )
            }
            Err(e) => {
                info!(unit = %unit, "{} job NOT submitted: {}", job_type, e);
                DeploymentJobResult::new(e.to_string(), false, unit, job_type)
            }
        }
    }

    /// Admission checks and queueing under one lock
    fn enqueue(
        &self,
        service: Arc<dyn DeploymentService>,
        unit: &DeploymentUnit,
        job_type: JobType,
    ) -> Result<Arc<Job>, DeploymentError> {
        let mut cache = self.cache.lock();

        if cache.pending_count() >= self.settings.max_queue_size {
            return Err(DeploymentError::QueueFull {
                max: self.settings.max_queue_size,
            });
        }

        let job = Arc::new(Job::new(unit.clone(), job_type));
        if cache.find_pending(job.id()).is_some() {
            return Err(DeploymentError::AlreadyInProgress {
                unit_id: job.id().unit_id.clone(),
                job_type,
            });
        }

        let queue = self.queue.lock();
        let sender = queue.as_ref().ok_or(DeploymentError::ShutDown)?;
        sender
            .send(QueuedJob {
                job: job.clone(),
                service,
            })
            .map_err(|_| DeploymentError::ShutDown)?;

        cache.insert(job.clone());
        Ok(job)
    }

    async fn run_inline(
        &self,
        service: Arc<dyn DeploymentService>,
        unit: DeploymentUnit,
        job_type: JobType,
    ) -> DeploymentJobResult {
        let job = {
            let mut cache = self.cache.lock();
            let job = Arc::new(Job::new(unit.clone(), job_type));
            if cache.find_pending(job.id()).is_some() {
                let e = DeploymentError::AlreadyInProgress {
                    unit_id: job.id().unit_id.clone(),
                    job_type,
                };
                return DeploymentJobResult::new(e.to_string(), false, unit, job_type);
            }
            cache.insert(job.clone());
            job
        };

        job.start();
        let outcome = run_job(service.as_ref(), &unit, job_type).await;
        job.complete(outcome.is_ok());

        match outcome {
            Ok(()) => DeploymentJobResult::new(
                format!("Deployment ({}) of {} completed successfully.", job_type, unit),
                true,
                unit,
                job_type,
            ),
            Err(message) => {
                let e = DeploymentError::Failed {
                    unit_id: unit.identifier(),
                    job_type,
                    message,
                };
                DeploymentJobResult::new(e.to_string(), false, unit, job_type)
            }
        }
    }

    /// Status of `unit_id` from cached jobs; never waits
    pub fn status(&self, unit_id: &str) -> DeploymentStatus {
        self.cache.lock().status_for(unit_id)
    }

    /// Most recent cached job with `id`
    pub fn job(&self, id: &JobId) -> Option<Arc<Job>> {
        self.cache.lock().latest(id).cloned()
    }

    pub fn pending_count(&self) -> usize {
        self.cache.lock().pending_count()
    }

    /// Cancel a job that has not started yet
    pub fn cancel(&self, id: &JobId) -> bool {
        let cancelled = self
            .cache
            .lock()
            .find_pending(id)
            .is_some_and(|job| job.cancel());
        if cancelled {
            info!(job = %id, "Deployment job cancelled");
        }
        cancelled
    }

    /// Close the queue and wait for already queued jobs to finish
    pub async fn shutdown(&self) {
        self.queue.lock().take();

        let worker = self.worker.lock().take();
        if let Some(worker) = worker {
            if let Err(e) = worker.await {
                warn!("Deployment worker ended abnormally: {}", e);
            }
        }
        info!("Deployment job executor stopped");
    }
}

async fn run_worker(mut queue: mpsc::UnboundedReceiver<QueuedJob>) {
    while let Some(QueuedJob { job, service }) = queue.recv().await {
        if !job.start() {
            debug!(job = %job.id(), "Skipping cancelled job");
            continue;
        }

        debug!(
            job = %job.id(),
            queued_ms = job.submitted_at().elapsed().as_millis() as u64,
            "Running deployment job"
        );
        let outcome = run_job(service.as_ref(), job.unit(), job.job_type()).await;
        job.complete(outcome.is_ok());
    }
    debug!("Deployment worker queue closed");
}

/// Run one operation, absorbing errors and panics
async fn run_job(
    service: &dyn DeploymentService,
    unit: &DeploymentUnit,
    job_type: JobType,
) -> Result<(), String> {
    let operation = async {
        match job_type {
            JobType::Deploy => service.deploy(unit).await,
            JobType::Undeploy => service.undeploy(unit).await,
        }
    };

    match AssertUnwindSafe(operation).catch_unwind().await {
        Ok(Ok(())) => {
            debug!("Deployment unit '{}' {}ed.", unit, job_type);
            Ok(())
        }
        Ok(Err(e)) => {
            error!("Unable to {} '{}': {:#}", job_type, unit, e);
            Err(format!("{:#}", e))
        }
        Err(_) => {
            error!("Unable to {} '{}': operation panicked", job_type, unit);
            Err("operation panicked".to_string())
        }
    }
}
