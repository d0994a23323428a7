//! Bounded, insertion-ordered job cache
//!
//! Once the cache grows past its maximum size the oldest *completed* jobs
//! are evicted. Unfinished jobs are never evicted, so the cache can exceed
//! its bound while more than `max_size` jobs are in flight; the executor
//! caps that separately.

use crate::job::{DeploymentStatus, Job, JobId};
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::debug;

#[derive(Debug)]
pub struct JobCache {
    entries: VecDeque<Arc<Job>>,
    max_size: usize,
}

impl JobCache {
    pub fn new(max_size: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            max_size,
        }
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn pending_count(&self) -> usize {
        self.entries.iter().filter(|job| !job.is_done()).count()
    }

    pub fn find_pending(&self, id: &JobId) -> Option<&Arc<Job>> {
        self.entries
            .iter()
            .find(|job| job.id() == id && !job.is_done())
    }

    /// Most recently inserted job with `id`
    pub fn latest(&self, id: &JobId) -> Option<&Arc<Job>> {
        self.entries.iter().rev().find(|job| job.id() == id)
    }

    /// Add `job`, replacing finished jobs with the same id, then evict
    pub fn insert(&mut self, job: Arc<Job>) {
        self.entries
            .retain(|existing| !(existing.id() == job.id() && existing.is_done()));
        self.entries.push_back(job);
        self.evict();
    }

    fn evict(&mut self) {
        while self.entries.len() > self.max_size {
            match self.entries.iter().position(|job| job.is_done()) {
                Some(index) => {
                    if let Some(job) = self.entries.remove(index) {
                        debug!(job = %job.id(), "Evicted completed job");
                    }
                }
                None => break,
            }
        }
    }

    /// Status of `unit_id` from the jobs still cached
    ///
    /// The oldest unfinished job for the unit is the one the worker reaches
    /// first, so it decides; otherwise the most recent finished job does.
    pub fn status_for(&self, unit_id: &str) -> DeploymentStatus {
        if let Some(job) = self
            .entries
            .iter()
            .find(|job| job.id().unit_id == unit_id && !job.is_done())
        {
            return job.job_type().in_progress();
        }

        self.entries
            .iter()
            .rev()
            .find(|job| job.id().unit_id == unit_id)
            .map(|job| job.status())
            .unwrap_or(DeploymentStatus::Nonexistent)
    }
}
