//! Resource Selection
//!
//! Strategies that pick one grid resource out of a named candidate set.
//! Candidates live in a `BTreeMap`, so iteration is by name and tie
//! breaking is deterministic. An empty candidate set selects nothing.

use crate::address::{ConnectorAddress, ConnectorType};
use grid_config::SelectionPolicy;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

pub mod latency;
pub mod priority;
pub mod random;

pub use latency::{LatencyProbe, LatencyTable, LowestLatencyStrategy};
pub use priority::PriorityStrategy;
pub use random::RandomStrategy;

/// Anything a strategy can choose between
pub trait Candidate {
    fn connector_type(&self) -> ConnectorType;
}

/// Picks the best candidate
pub trait SelectionStrategy<C: Candidate>: Send + Sync {
    /// `None` when `candidates` is empty or none qualifies
    fn select_best<'a>(&self, candidates: &'a BTreeMap<String, C>) -> Option<&'a C>;

    fn name(&self) -> &'static str;
}

/// Name and address of one grid resource
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceDescriptor {
    pub name: String,
    pub address: ConnectorAddress,
}

impl ResourceDescriptor {
    pub fn new(name: impl Into<String>, address: ConnectorAddress) -> Self {
        Self {
            name: name.into(),
            address,
        }
    }
}

/// Kinds of resource a client selects between
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum GridResource {
    /// Node able to run sessions and commands
    ExecutionEnvironment(ResourceDescriptor),
    /// Directory (white pages) service
    DirectoryInstance(ResourceDescriptor),
    /// Human task server
    TaskServerInstance(ResourceDescriptor),
}

impl GridResource {
    pub fn descriptor(&self) -> &ResourceDescriptor {
        match self {
            GridResource::ExecutionEnvironment(d)
            | GridResource::DirectoryInstance(d)
            | GridResource::TaskServerInstance(d) => d,
        }
    }

    pub fn name(&self) -> &str {
        &self.descriptor().name
    }

    pub fn address(&self) -> &ConnectorAddress {
        &self.descriptor().address
    }
}

impl Candidate for GridResource {
    fn connector_type(&self) -> ConnectorType {
        self.address().connector_type()
    }
}

impl Candidate for ResourceDescriptor {
    fn connector_type(&self) -> ConnectorType {
        self.address.connector_type()
    }
}

impl Candidate for ConnectorAddress {
    fn connector_type(&self) -> ConnectorType {
        ConnectorAddress::connector_type(self)
    }
}

/// Build the strategy for a configured policy
pub fn strategy_for<C: Candidate>(
    policy: SelectionPolicy,
    probe: Arc<dyn LatencyProbe>,
) -> Box<dyn SelectionStrategy<C>> {
    match policy {
        SelectionPolicy::Priority => Box::new(PriorityStrategy),
        SelectionPolicy::Random => Box::new(RandomStrategy::new()),
        SelectionPolicy::LowestLatency => Box::new(LowestLatencyStrategy::new(probe)),
    }
}
