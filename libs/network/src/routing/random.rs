//! Uniform random selection

use super::{Candidate, SelectionStrategy};
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::BTreeMap;

/// Picks a uniformly random candidate
pub struct RandomStrategy {
    rng: Mutex<StdRng>,
}

impl Default for RandomStrategy {
    fn default() -> Self {
        Self::new()
    }
}

impl RandomStrategy {
    pub fn new() -> Self {
        Self {
            rng: Mutex::new(StdRng::from_entropy()),
        }
    }

    /// Reproducible sequence for tests and simulations
    pub fn with_seed(seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }
}

impl<C: Candidate> SelectionStrategy<C> for RandomStrategy {
    fn select_best<'a>(&self, candidates: &'a BTreeMap<String, C>) -> Option<&'a C> {
        if candidates.is_empty() {
            return None;
        }
        let index = self.rng.lock().gen_range(0..candidates.len());
        candidates.values().nth(index)
    }

    fn name(&self) -> &'static str {
        "random"
    }
}
