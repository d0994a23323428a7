//! Response correlation
//!
//! A [`CorrelationDispatcher`] sits on the client side of a session. Callers
//! register a one-shot [`ResponseHandler`] under the request id they are
//! about to send; when a reply arrives carrying that id as its
//! `response_id`, the handler is removed and invoked exactly once. Replies
//! nobody waits for go to an optional fallback handler, or are reported to
//! a [`DiagnosticListener`] and dropped.

use crate::message::{Body, Envelope, RemoteFailure};
use crate::transports::{EnvelopeHandler, SessionWriter};
use crate::{GridError, Result};
use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

/// One-shot receiver of a single reply
pub trait ResponseHandler: Send + 'static {
    /// The reply arrived with a normal body
    fn on_reply(self: Box<Self>, envelope: Envelope);

    /// The reply carried a failure, or the session closed first
    fn on_failure(self: Box<Self>, failure: RemoteFailure);
}

impl<F> ResponseHandler for F
where
    F: FnOnce(std::result::Result<Envelope, RemoteFailure>) + Send + 'static,
{
    fn on_reply(self: Box<Self>, envelope: Envelope) {
        (*self)(Ok(envelope))
    }

    fn on_failure(self: Box<Self>, failure: RemoteFailure) {
        (*self)(Err(failure))
    }
}

/// Notified about replies that matched no waiter
pub trait DiagnosticListener: Send + Sync {
    fn unmatched_reply(&self, envelope: &Envelope);
}

/// Logs unmatched replies at warn level
#[derive(Debug, Default)]
pub struct TracingDiagnostics;

impl DiagnosticListener for TracingDiagnostics {
    fn unmatched_reply(&self, envelope: &Envelope) {
        warn!(
            conversation = %envelope.conversation_id,
            response_id = envelope.response_id,
            body = envelope.body.kind(),
            "Dropping reply with no registered handler"
        );
    }
}

/// Dispatcher counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatcherStats {
    pub delivered: u64,
    pub failed: u64,
    pub forwarded: u64,
    pub dropped: u64,
}

/// Routes replies to the handler registered for their request id
pub struct CorrelationDispatcher {
    /// Handlers are `Send` only; the mutex makes the table shareable
    pending: DashMap<u64, Mutex<Box<dyn ResponseHandler>>>,
    fallback: Option<Arc<dyn EnvelopeHandler>>,
    diagnostics: Arc<dyn DiagnosticListener>,
    delivered: AtomicU64,
    failed: AtomicU64,
    forwarded: AtomicU64,
    dropped: AtomicU64,
}

impl Default for CorrelationDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl CorrelationDispatcher {
    pub fn new() -> Self {
        Self {
            pending: DashMap::new(),
            fallback: None,
            diagnostics: Arc::new(TracingDiagnostics),
            delivered: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            forwarded: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        }
    }

    /// Handler for envelopes that match no waiter
    pub fn with_fallback(mut self, fallback: Arc<dyn EnvelopeHandler>) -> Self {
        self.fallback = Some(fallback);
        self
    }

    pub fn with_diagnostics(mut self, diagnostics: Arc<dyn DiagnosticListener>) -> Self {
        self.diagnostics = diagnostics;
        self
    }

    /// Register the handler for the reply to `request_id`
    pub fn register(&self, request_id: u64, handler: Box<dyn ResponseHandler>) -> Result<()> {
        match self.pending.entry(request_id) {
            Entry::Occupied(_) => Err(GridError::correlation(
                request_id,
                "a handler is already registered for this request",
            )),
            Entry::Vacant(slot) => {
                slot.insert(Mutex::new(handler));
                Ok(())
            }
        }
    }

    /// Drop the handler for `request_id` without invoking it
    pub fn unregister(&self, request_id: u64) -> bool {
        self.pending.remove(&request_id).is_some()
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Fail every outstanding waiter with `failure`
    pub fn fail_all(&self, failure: RemoteFailure) {
        let ids: Vec<u64> = self.pending.iter().map(|e| *e.key()).collect();
        for id in ids {
            if let Some((_, handler)) = self.pending.remove(&id) {
                self.failed.fetch_add(1, Ordering::Relaxed);
                handler.into_inner().on_failure(failure.clone());
            }
        }
    }

    /// Route one inbound envelope
    pub async fn on_receive(&self, session: SessionWriter, envelope: Envelope) {
        // Removal is the claim: a reply can only ever reach one handler
        let waiter = if envelope.is_reply() {
            self.pending
                .remove(&envelope.response_id)
                .map(|(_, h)| h.into_inner())
        } else {
            None
        };

        match waiter {
            Some(handler) => {
                debug!(response_id = envelope.response_id, "Dispatching correlated reply");
                match envelope.body {
                    Body::Failure(failure) => {
                        self.failed.fetch_add(1, Ordering::Relaxed);
                        handler.on_failure(failure);
                    }
                    _ => {
                        self.delivered.fetch_add(1, Ordering::Relaxed);
                        handler.on_reply(envelope);
                    }
                }
            }
            None => match &self.fallback {
                Some(fallback) => {
                    self.forwarded.fetch_add(1, Ordering::Relaxed);
                    fallback.envelope_received(session, envelope).await;
                }
                None => {
                    self.dropped.fetch_add(1, Ordering::Relaxed);
                    self.diagnostics.unmatched_reply(&envelope);
                }
            },
        }
    }

    pub fn stats(&self) -> DispatcherStats {
        DispatcherStats {
            delivered: self.delivered.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            forwarded: self.forwarded.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
        }
    }
}

#[async_trait]
impl EnvelopeHandler for CorrelationDispatcher {
    async fn envelope_received(&self, session: SessionWriter, envelope: Envelope) {
        self.on_receive(session, envelope).await;
    }

    async fn session_closed(&self, session: &SessionWriter) {
        let outstanding = self.pending_count();
        if outstanding > 0 {
            warn!(
                session = session.session_id(),
                outstanding, "Session closed with replies outstanding"
            );
        }
        self.fail_all(RemoteFailure::connection_closed());
    }
}
