//! Priority-by-connector-type selection

use super::{Candidate, SelectionStrategy};
use crate::address::ConnectorType;
use std::collections::BTreeMap;

/// Prefers LOCAL, then DISTRIBUTED, then REMOTE
#[derive(Debug, Clone, Copy, Default)]
pub struct PriorityStrategy;

/// Lower ranks win
pub fn rank(connector_type: ConnectorType) -> u8 {
    match connector_type {
        ConnectorType::Local => 0,
        ConnectorType::Distributed => 1,
        ConnectorType::Remote => 2,
    }
}

impl<C: Candidate> SelectionStrategy<C> for PriorityStrategy {
    fn select_best<'a>(&self, candidates: &'a BTreeMap<String, C>) -> Option<&'a C> {
        // min_by_key keeps the first of equal ranks, i.e. the lowest name
        candidates
            .values()
            .min_by_key(|candidate| rank(candidate.connector_type()))
    }

    fn name(&self) -> &'static str {
        "priority"
    }
}
