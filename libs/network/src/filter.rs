//! Inbound envelope filters
//!
//! Filters are registered by name on a [`FilterChain`] and run in
//! registration order on every inbound envelope before it reaches
//! correlation. A filter may rewrite the envelope or veto it.

use crate::message::Envelope;
use crate::transports::{EnvelopeHandler, SessionWriter};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::sync::Arc;
use tracing::debug;

pub trait EnvelopeFilter: Send + Sync {
    /// Inspect or rewrite `envelope`; `false` drops it
    fn filter(&self, envelope: &mut Envelope) -> bool;
}

impl<F> EnvelopeFilter for F
where
    F: Fn(&mut Envelope) -> bool + Send + Sync,
{
    fn filter(&self, envelope: &mut Envelope) -> bool {
        self(envelope)
    }
}

/// Ordered, named filters
#[derive(Default)]
pub struct FilterChain {
    filters: RwLock<Vec<(String, Arc<dyn EnvelopeFilter>)>>,
}

impl FilterChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `filter` under `name`, replacing a filter of the same name in place
    pub fn add(&self, name: impl Into<String>, filter: Arc<dyn EnvelopeFilter>) {
        let name = name.into();
        let mut filters = self.filters.write();
        match filters.iter_mut().find(|(existing, _)| *existing == name) {
            Some(slot) => slot.1 = filter,
            None => filters.push((name, filter)),
        }
    }

    pub fn remove(&self, name: &str) -> bool {
        let mut filters = self.filters.write();
        let before = filters.len();
        filters.retain(|(existing, _)| existing != name);
        filters.len() != before
    }

    pub fn clear(&self) {
        self.filters.write().clear();
    }

    pub fn names(&self) -> Vec<String> {
        self.filters.read().iter().map(|(n, _)| n.clone()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.filters.read().is_empty()
    }

    /// Run the chain; `false` once any filter vetoes
    pub fn apply(&self, envelope: &mut Envelope) -> bool {
        for (name, filter) in self.filters.read().iter() {
            if !filter.filter(envelope) {
                debug!(filter = %name, response_id = envelope.response_id, "Envelope dropped by filter");
                return false;
            }
        }
        true
    }
}

/// Runs a [`FilterChain`] in front of another handler
pub struct FilteringHandler {
    chain: Arc<FilterChain>,
    inner: Arc<dyn EnvelopeHandler>,
}

impl FilteringHandler {
    pub fn new(chain: Arc<FilterChain>, inner: Arc<dyn EnvelopeHandler>) -> Self {
        Self { chain, inner }
    }
}

#[async_trait]
impl EnvelopeHandler for FilteringHandler {
    async fn envelope_received(&self, session: SessionWriter, mut envelope: Envelope) {
        if self.chain.apply(&mut envelope) {
            self.inner.envelope_received(session, envelope).await;
        }
    }

    async fn session_opened(&self, session: &SessionWriter) {
        self.inner.session_opened(session).await;
    }

    async fn session_idle(&self, session: &SessionWriter) {
        self.inner.session_idle(session).await;
    }

    async fn session_closed(&self, session: &SessionWriter) {
        self.inner.session_closed(session).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Body;

    #[test]
    fn test_chain_order_and_veto() {
        let chain = FilterChain::new();
        chain.add(
            "tag",
            Arc::new(|env: &mut Envelope| {
                env.sender_id.push_str("+tagged");
                true
            }),
        );
        chain.add("drop-empty", Arc::new(|env: &mut Envelope| env.body != Body::Empty));

        let mut kept = Envelope::new(Body::Bytes(vec![1]));
        assert!(chain.apply(&mut kept));
        assert_eq!(kept.sender_id, "+tagged");

        let mut dropped = Envelope::new(Body::Empty);
        assert!(!chain.apply(&mut dropped));

        assert_eq!(chain.names(), vec!["tag".to_string(), "drop-empty".to_string()]);
    }

    #[test]
    fn test_replace_and_remove() {
        let chain = FilterChain::new();
        chain.add("f", Arc::new(|_: &mut Envelope| false));
        chain.add("f", Arc::new(|_: &mut Envelope| true));
        assert_eq!(chain.names().len(), 1);
        assert!(chain.apply(&mut Envelope::new(Body::Empty)));

        assert!(chain.remove("f"));
        assert!(!chain.remove("f"));
        assert!(chain.is_empty());
    }
}
