//! In-process transport
//!
//! Endpoints bind a name on a [`LocalConnector`]; opening `Local:<name>`
//! links the caller's handler to the bound one with a pair of channels.
//! Each direction is pumped by its own task so handlers run off the
//! writer's stack, the same way socket sessions deliver.

use super::{next_session_id, Connector, EnvelopeHandler, EnvelopeWriter, SessionWriter};
use crate::address::ConnectorAddress;
use crate::message::Envelope;
use crate::{GridError, Result};
use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info};

/// Connector for `Local:<name>` addresses
#[derive(Default)]
pub struct LocalConnector {
    endpoints: DashMap<String, Arc<dyn EnvelopeHandler>>,
}

impl LocalConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `handler` reachable as `Local:<name>`
    pub fn bind(&self, name: impl Into<String>, handler: Arc<dyn EnvelopeHandler>) {
        let name = name.into();
        info!("Bound local endpoint {}", name);
        self.endpoints.insert(name, handler);
    }

    pub fn unbind(&self, name: &str) -> bool {
        self.endpoints.remove(name).is_some()
    }
}

#[async_trait]
impl Connector for LocalConnector {
    fn scheme(&self) -> &str {
        "Local"
    }

    async fn open(
        &self,
        address: &ConnectorAddress,
        handler: Arc<dyn EnvelopeHandler>,
    ) -> Result<SessionWriter> {
        let remote = self
            .endpoints
            .get(&address.name)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| GridError::connector(address, "no local endpoint bound under that name"))?;

        let (to_remote_tx, to_remote_rx) = mpsc::unbounded_channel();
        let (to_local_tx, to_local_rx) = mpsc::unbounded_channel();

        let open = Arc::new(AtomicBool::new(true));
        let label = address.name.clone();

        // Two halves of one link; each writes toward the opposite handler
        let local_side: SessionWriter = Arc::new(LocalSession {
            id: next_session_id(),
            peer: format!("local:{}", label),
            outbound: Mutex::new(Some(to_remote_tx)),
            open: open.clone(),
        });
        let remote_side: SessionWriter = Arc::new(LocalSession {
            id: next_session_id(),
            peer: "local:client".to_string(),
            outbound: Mutex::new(Some(to_local_tx)),
            open,
        });

        tokio::spawn(pump(to_remote_rx, remote_side.clone(), local_side.clone(), remote));
        tokio::spawn(pump(to_local_rx, local_side.clone(), remote_side, handler));

        debug!("Opened local session {} to {}", local_side.session_id(), label);
        Ok(local_side)
    }
}

/// One half of a local link
struct LocalSession {
    id: u64,
    peer: String,
    outbound: Mutex<Option<mpsc::UnboundedSender<Envelope>>>,
    /// Shared by both halves
    open: Arc<AtomicBool>,
}

#[async_trait]
impl EnvelopeWriter for LocalSession {
    async fn write(&self, envelope: &Envelope) -> Result<()> {
        let guard = self.outbound.lock();
        let sender = guard
            .as_ref()
            .filter(|_| self.is_open())
            .ok_or_else(|| GridError::connection("Local session is closed", None))?;
        sender
            .send(envelope.clone())
            .map_err(|_| GridError::connection("Local peer went away", None))
    }

    async fn close(&self) -> Result<()> {
        if self.open.swap(false, Ordering::SeqCst) {
            debug!("Closed local session {}", self.id);
        }
        self.outbound.lock().take();
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    fn session_id(&self) -> u64 {
        self.id
    }

    fn peer(&self) -> String {
        self.peer.clone()
    }
}

/// Deliver envelopes for one direction until every sender is gone or the
/// link closes
async fn pump(
    mut inbound: mpsc::UnboundedReceiver<Envelope>,
    reply_side: SessionWriter,
    origin: SessionWriter,
    handler: Arc<dyn EnvelopeHandler>,
) {
    handler.session_opened(&reply_side).await;

    while let Some(envelope) = inbound.recv().await {
        if !reply_side.is_open() {
            break;
        }
        handler.envelope_received(reply_side.clone(), envelope).await;
    }

    // Closing either half ends the whole link
    let _ = origin.close().await;
    let _ = reply_side.close().await;
    handler.session_closed(&reply_side).await;
}
