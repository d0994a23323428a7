//! Lowest-latency selection
//!
//! Latency comes from a [`LatencyProbe`]. The stock probe is a
//! [`LatencyTable`] of the last round trip measured per candidate name,
//! refreshed by pinging node connectors. A candidate whose last probe
//! failed, or that was never probed, is not eligible.

use super::{Candidate, SelectionStrategy};
use crate::connector::NodeConnector;
use dashmap::DashMap;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

pub trait LatencyProbe: Send + Sync {
    /// Last known round trip to `name`; `None` when unknown or failing
    fn probe(&self, name: &str) -> Option<Duration>;
}

/// Last measured round trip per candidate name
#[derive(Debug, Default)]
pub struct LatencyTable {
    samples: DashMap<String, Option<Duration>>,
}

impl LatencyTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, name: impl Into<String>, rtt: Duration) {
        self.samples.insert(name.into(), Some(rtt));
    }

    pub fn record_failure(&self, name: impl Into<String>) {
        self.samples.insert(name.into(), None);
    }

    pub fn forget(&self, name: &str) {
        self.samples.remove(name);
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Ping every connector and record the outcome under its node name
    pub async fn refresh(&self, connectors: &[Arc<NodeConnector>]) {
        let pings = connectors.iter().map(|connector| async move {
            (connector.address().name.clone(), connector.ping().await)
        });

        for (name, outcome) in futures::future::join_all(pings).await {
            match outcome {
                Ok(rtt) => {
                    debug!(node = %name, rtt_us = rtt.as_micros() as u64, "Latency probe");
                    self.record(name, rtt);
                }
                Err(e) => {
                    warn!(node = %name, error = %e, "Latency probe failed");
                    self.record_failure(name);
                }
            }
        }
    }
}

impl LatencyProbe for LatencyTable {
    fn probe(&self, name: &str) -> Option<Duration> {
        self.samples.get(name).and_then(|sample| *sample.value())
    }
}

/// Picks the candidate with the smallest probed latency
pub struct LowestLatencyStrategy {
    probe: Arc<dyn LatencyProbe>,
}

impl LowestLatencyStrategy {
    pub fn new(probe: Arc<dyn LatencyProbe>) -> Self {
        Self { probe }
    }
}

impl<C: Candidate> SelectionStrategy<C> for LowestLatencyStrategy {
    fn select_best<'a>(&self, candidates: &'a BTreeMap<String, C>) -> Option<&'a C> {
        candidates
            .iter()
            .filter_map(|(name, candidate)| self.probe.probe(name).map(|rtt| (rtt, candidate)))
            .min_by_key(|(rtt, _)| *rtt)
            .map(|(_, candidate)| candidate)
    }

    fn name(&self) -> &'static str {
        "lowest_latency"
    }
}
