//! Transport Layer
//!
//! The transport contract the rest of the grid is written against. A
//! [`Connector`] opens sessions to an address; an acceptor (see
//! [`tcp::TcpAcceptor`]) accepts them. Both deliver every inbound
//! [`Envelope`] to a registered [`EnvelopeHandler`] together with the
//! session it arrived on, so the handler can answer on the same session.

use crate::address::ConnectorAddress;
use crate::message::Envelope;
use crate::Result;
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

pub mod local;
pub mod tcp;

// Re-export transport types
pub use local::LocalConnector;
pub use tcp::{TcpAcceptor, TcpConnector};

static SESSION_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Allocate a process-unique session id
pub(crate) fn next_session_id() -> u64 {
    SESSION_ID_COUNTER.fetch_add(1, Ordering::Relaxed)
}

/// Write side of an open session
#[async_trait]
pub trait EnvelopeWriter: Send + Sync {
    /// Send one envelope to the peer
    async fn write(&self, envelope: &Envelope) -> Result<()>;

    /// Close the session; closing twice is a no-op
    async fn close(&self) -> Result<()>;

    fn is_open(&self) -> bool;

    /// Process-unique session id
    fn session_id(&self) -> u64;

    /// Human readable peer description
    fn peer(&self) -> String;
}

/// Shared handle to a session's write side
pub type SessionWriter = Arc<dyn EnvelopeWriter>;

/// Receives everything a session delivers
#[async_trait]
pub trait EnvelopeHandler: Send + Sync {
    /// An envelope arrived on `session`
    async fn envelope_received(&self, session: SessionWriter, envelope: Envelope);

    async fn session_opened(&self, _session: &SessionWriter) {}

    /// No traffic in either direction for the configured idle time
    async fn session_idle(&self, session: &SessionWriter) {
        debug!(session = session.session_id(), peer = %session.peer(), "Session idle");
    }

    /// The session failed to read or decode a frame
    async fn session_error(&self, session: &SessionWriter, cause: &str) {
        debug!(session = session.session_id(), peer = %session.peer(), cause, "Session error");
    }

    async fn session_closed(&self, _session: &SessionWriter) {}
}

/// Opens sessions for one address scheme
#[async_trait]
pub trait Connector: Send + Sync {
    /// Scheme this connector serves, e.g. `Mina` or `Local`
    fn scheme(&self) -> &str;

    /// Open a session to `address`, delivering inbound envelopes to `handler`
    async fn open(
        &self,
        address: &ConnectorAddress,
        handler: Arc<dyn EnvelopeHandler>,
    ) -> Result<SessionWriter>;
}

/// Connector lookup by address scheme (case-insensitive)
#[derive(Default)]
pub struct ConnectorRegistry {
    connectors: DashMap<String, Arc<dyn Connector>>,
}

impl ConnectorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connector under its scheme, replacing any previous one
    pub fn register(&self, connector: Arc<dyn Connector>) {
        let scheme = connector.scheme().to_ascii_lowercase();
        debug!(scheme = %scheme, "Registered connector");
        self.connectors.insert(scheme, connector);
    }

    pub fn resolve(&self, scheme: &str) -> Option<Arc<dyn Connector>> {
        self.connectors
            .get(&scheme.to_ascii_lowercase())
            .map(|entry| entry.value().clone())
    }

    pub fn schemes(&self) -> Vec<String> {
        self.connectors.iter().map(|e| e.key().clone()).collect()
    }
}
