//! Conversations
//!
//! A [`Conversation`] is an addressed request/reply channel over one open
//! session. It owns the session's [`CorrelationDispatcher`] and the
//! request-id counter, so every id it issues is unique for its lifetime.
//! [`ConversationManager::start_conversation`] is the only way to open one.

use crate::address::ConnectorAddress;
use crate::correlation::{CorrelationDispatcher, ResponseHandler};
use crate::filter::{FilterChain, FilteringHandler};
use crate::message::{Envelope, RemoteFailure};
use crate::transports::{ConnectorRegistry, EnvelopeHandler, SessionWriter};
use crate::{GridError, Result};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

static CONVERSATION_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Allocate a process-unique conversation id
pub fn next_conversation_id() -> String {
    CONVERSATION_ID_COUNTER
        .fetch_add(1, Ordering::SeqCst)
        .to_string()
}

/// Addressed request/reply channel over one session
#[derive(Clone)]
pub struct Conversation {
    inner: Arc<ConversationInner>,
}

struct ConversationInner {
    id: String,
    sender_id: String,
    recipient_id: String,
    address: ConnectorAddress,
    session: SessionWriter,
    dispatcher: Arc<CorrelationDispatcher>,
    next_request_id: AtomicU64,
    manager: ConversationManager,
}

impl Conversation {
    pub fn id(&self) -> &str {
        &self.inner.id
    }

    pub fn sender_id(&self) -> &str {
        &self.inner.sender_id
    }

    pub fn recipient_id(&self) -> &str {
        &self.inner.recipient_id
    }

    pub fn address(&self) -> &ConnectorAddress {
        &self.inner.address
    }

    pub fn dispatcher(&self) -> &Arc<CorrelationDispatcher> {
        &self.inner.dispatcher
    }

    /// Manager that opened this conversation
    pub fn manager(&self) -> &ConversationManager {
        &self.inner.manager
    }

    /// Stamp `envelope` with a fresh request id and send it
    ///
    /// When `handler` is given it is registered for the reply before the
    /// envelope reaches the transport, so even an immediate reply finds it.
    /// A failed write removes the registration again.
    pub async fn send(
        &self,
        mut envelope: Envelope,
        handler: Option<Box<dyn ResponseHandler>>,
    ) -> Result<u64> {
        let request_id = self.inner.next_request_id.fetch_add(1, Ordering::SeqCst);

        envelope.conversation_id = self.inner.id.clone();
        envelope.sender_id = self.inner.sender_id.clone();
        envelope.recipient_id = self.inner.recipient_id.clone();
        envelope.request_id = request_id;

        if let Some(handler) = handler {
            self.inner.dispatcher.register(request_id, handler)?;
        }

        if let Err(e) = self.inner.session.write(&envelope).await {
            self.inner.dispatcher.unregister(request_id);
            return Err(e);
        }

        debug!(
            conversation = %self.inner.id,
            request_id,
            body = envelope.body.kind(),
            "Sent request"
        );
        Ok(request_id)
    }

    /// Send and wait for the correlated reply
    ///
    /// A reply carrying a failure becomes [`GridError::Remote`]. On timeout
    /// the waiter is removed, so a late reply is dropped.
    pub async fn request(&self, envelope: Envelope, timeout: Duration) -> Result<Envelope> {
        let (tx, rx) = oneshot::channel();
        let handler: Box<dyn ResponseHandler> =
            Box::new(move |result: std::result::Result<Envelope, RemoteFailure>| {
                let _ = tx.send(result);
            });

        let request_id = self.send(envelope, Some(handler)).await?;

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(Ok(reply))) => Ok(reply),
            Ok(Ok(Err(failure))) if failure == RemoteFailure::connection_closed() => Err(
                GridError::connection(format!("{} (request {})", failure.message, request_id), None),
            ),
            Ok(Ok(Err(failure))) => Err(GridError::Remote(failure)),
            Ok(Err(_)) => Err(GridError::correlation(
                request_id,
                "reply handler dropped without an answer",
            )),
            Err(_) => {
                self.inner.dispatcher.unregister(request_id);
                Err(GridError::timeout(
                    format!("request {} on conversation {}", request_id, self.inner.id),
                    timeout.as_millis() as u64,
                ))
            }
        }
    }

    pub fn is_open(&self) -> bool {
        self.inner.session.is_open()
    }

    /// Close the underlying session; outstanding waiters are failed
    pub async fn close(&self) -> Result<()> {
        info!(conversation = %self.inner.id, address = %self.inner.address, "Closing conversation");
        let closed = self.inner.session.close().await;
        self.inner
            .dispatcher
            .fail_all(RemoteFailure::connection_closed());
        closed
    }
}

impl Drop for ConversationInner {
    /// Last handle gone: shut the session down so its reader tasks end
    fn drop(&mut self) {
        self.dispatcher.fail_all(RemoteFailure::connection_closed());
        if !self.session.is_open() {
            return;
        }

        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                let session = self.session.clone();
                let id = std::mem::take(&mut self.id);
                runtime.spawn(async move {
                    if let Err(e) = session.close().await {
                        warn!(conversation = %id, error = %e, "Failed to close dropped conversation");
                    }
                });
            }
            Err(_) => warn!(conversation = %self.id, "Conversation dropped outside a runtime; session left open"),
        }
    }
}

/// Opens conversations through the registered connectors
#[derive(Clone)]
pub struct ConversationManager {
    registry: Arc<ConnectorRegistry>,
    fallback: Option<Arc<dyn EnvelopeHandler>>,
}

impl ConversationManager {
    pub fn new(registry: Arc<ConnectorRegistry>) -> Self {
        Self {
            registry,
            fallback: None,
        }
    }

    /// Handler for inbound envelopes no waiter claims
    pub fn with_fallback(mut self, fallback: Arc<dyn EnvelopeHandler>) -> Self {
        self.fallback = Some(fallback);
        self
    }

    pub fn registry(&self) -> &Arc<ConnectorRegistry> {
        &self.registry
    }

    /// Open a conversation from `sender_id` to `recipient_id` at `address`
    pub async fn start_conversation(
        &self,
        sender_id: &str,
        address: &ConnectorAddress,
        recipient_id: &str,
    ) -> Result<Conversation> {
        self.open(sender_id, address, recipient_id, None).await
    }

    /// Like [`start_conversation`](Self::start_conversation), running every
    /// inbound envelope through `filters` before correlation
    pub async fn start_filtered_conversation(
        &self,
        sender_id: &str,
        address: &ConnectorAddress,
        recipient_id: &str,
        filters: Arc<FilterChain>,
    ) -> Result<Conversation> {
        self.open(sender_id, address, recipient_id, Some(filters))
            .await
    }

    async fn open(
        &self,
        sender_id: &str,
        address: &ConnectorAddress,
        recipient_id: &str,
        filters: Option<Arc<FilterChain>>,
    ) -> Result<Conversation> {
        let connector = self.registry.resolve(&address.scheme).ok_or_else(|| {
            GridError::connector(
                address,
                format!("no connector registered for scheme '{}'", address.scheme),
            )
        })?;

        let mut dispatcher = CorrelationDispatcher::new();
        if let Some(fallback) = &self.fallback {
            dispatcher = dispatcher.with_fallback(fallback.clone());
        }
        let dispatcher = Arc::new(dispatcher);

        let handler: Arc<dyn EnvelopeHandler> = match filters {
            Some(chain) => Arc::new(FilteringHandler::new(chain, dispatcher.clone())),
            None => dispatcher.clone(),
        };

        let session = connector.open(address, handler).await?;
        let id = next_conversation_id();

        info!(
            conversation = %id,
            address = %address,
            sender = sender_id,
            recipient = recipient_id,
            "Started conversation"
        );

        Ok(Conversation {
            inner: Arc::new(ConversationInner {
                id,
                sender_id: sender_id.to_string(),
                recipient_id: recipient_id.to_string(),
                address: address.clone(),
                session,
                dispatcher,
                next_request_id: AtomicU64::new(1),
                manager: self.clone(),
            }),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Body;
    use crate::transports::{EnvelopeHandler, LocalConnector};
    use async_trait::async_trait;

    /// Replies to requests in reverse arrival order once it has two
    struct Reversing(parking_lot::Mutex<Vec<(SessionWriter, Envelope)>>);

    #[async_trait]
    impl EnvelopeHandler for Reversing {
        async fn envelope_received(&self, session: SessionWriter, envelope: Envelope) {
            let batch = {
                let mut held = self.0.lock();
                held.push((session, envelope));
                if held.len() < 2 {
                    return;
                }
                std::mem::take(&mut *held)
            };
            for (session, request) in batch.into_iter().rev() {
                let _ = session.write(&request.reply(request.body.clone())).await;
            }
        }
    }

    struct Echo;

    #[async_trait]
    impl EnvelopeHandler for Echo {
        async fn envelope_received(&self, session: SessionWriter, envelope: Envelope) {
            let _ = session.write(&envelope.reply(envelope.body.clone())).await;
        }
    }

    /// Never answers
    struct Silent;

    #[async_trait]
    impl EnvelopeHandler for Silent {
        async fn envelope_received(&self, _session: SessionWriter, _envelope: Envelope) {}
    }

    fn manager_with(name: &str, handler: Arc<dyn EnvelopeHandler>) -> ConversationManager {
        let local = LocalConnector::new();
        local.bind(name, handler);
        let registry = ConnectorRegistry::new();
        registry.register(Arc::new(local));
        ConversationManager::new(Arc::new(registry))
    }

    #[tokio::test]
    async fn test_conversation_ids_are_distinct() {
        let manager = manager_with("echo", Arc::new(Echo));
        let address = ConnectorAddress::local("echo");

        let a = manager.start_conversation("client", &address, "echo").await.unwrap();
        let b = manager.start_conversation("client", &address, "echo").await.unwrap();
        assert_ne!(a.id(), b.id());
        assert_eq!(a.recipient_id(), "echo");
        assert_eq!(a.address(), &address);
    }

    #[tokio::test]
    async fn test_request_ids_increase() {
        let manager = manager_with("echo", Arc::new(Echo));
        let conversation = manager
            .start_conversation("client", &ConnectorAddress::local("echo"), "echo")
            .await
            .unwrap();

        let first = conversation.send(Envelope::new(Body::Empty), None).await.unwrap();
        let second = conversation.send(Envelope::new(Body::Empty), None).await.unwrap();
        assert_eq!(first, 1);
        assert!(second > first);
    }

    #[tokio::test]
    async fn test_out_of_order_replies_reach_their_callers() {
        let manager = manager_with("rev", Arc::new(Reversing(Default::default())));
        let conversation = manager
            .start_conversation("client", &ConnectorAddress::local("rev"), "rev")
            .await
            .unwrap();

        let timeout = Duration::from_secs(2);
        let (a, b) = futures::join!(
            conversation.request(Envelope::new(Body::Bytes(vec![1])), timeout),
            conversation.request(Envelope::new(Body::Bytes(vec![2])), timeout),
        );

        assert_eq!(a.unwrap().body, Body::Bytes(vec![1]));
        assert_eq!(b.unwrap().body, Body::Bytes(vec![2]));
        assert_eq!(conversation.dispatcher().pending_count(), 0);
    }

    #[tokio::test]
    async fn test_request_timeout_removes_waiter() {
        let manager = manager_with("silent", Arc::new(Silent));
        let conversation = manager
            .start_conversation("client", &ConnectorAddress::local("silent"), "silent")
            .await
            .unwrap();

        let err = conversation
            .request(Envelope::new(Body::Empty), Duration::from_millis(50))
            .await
            .unwrap_err();
        assert_eq!(err.category(), "timeout");
        assert_eq!(conversation.dispatcher().pending_count(), 0);
    }

    #[tokio::test]
    async fn test_unknown_scheme_is_connector_error() {
        let manager = ConversationManager::new(Arc::new(ConnectorRegistry::new()));
        let address = ConnectorAddress::parse("Distributed:behavior:id-1").unwrap();

        let err = manager
            .start_conversation("client", &address, "id-1")
            .await
            .err()
            .unwrap();
        assert_eq!(err.category(), "connector");
        assert!(err.to_string().contains("Distributed:behavior:id-1"));
    }

    /// Reports when its side of the link closes
    struct ClosedSignal(tokio::sync::mpsc::UnboundedSender<u64>);

    #[async_trait]
    impl EnvelopeHandler for ClosedSignal {
        async fn envelope_received(&self, _session: SessionWriter, _envelope: Envelope) {}

        async fn session_closed(&self, session: &SessionWriter) {
            let _ = self.0.send(session.session_id());
        }
    }

    #[tokio::test]
    async fn test_dropping_last_handle_closes_session() {
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let manager = manager_with("watched", Arc::new(ClosedSignal(tx)));
        let conversation = manager
            .start_conversation("client", &ConnectorAddress::local("watched"), "watched")
            .await
            .unwrap();

        let copy = conversation.clone();
        drop(conversation);
        assert!(copy.is_open());

        drop(copy);
        tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
    }

    /// Session whose close always fails
    struct BrokenClose;

    #[async_trait]
    impl crate::transports::EnvelopeWriter for BrokenClose {
        async fn write(&self, _envelope: &Envelope) -> Result<()> {
            Ok(())
        }
        async fn close(&self) -> Result<()> {
            Err(GridError::connection("close refused", None))
        }
        fn is_open(&self) -> bool {
            false
        }
        fn session_id(&self) -> u64 {
            0
        }
        fn peer(&self) -> String {
            "broken".to_string()
        }
    }

    struct BrokenCloseConnector;

    #[async_trait]
    impl crate::transports::Connector for BrokenCloseConnector {
        fn scheme(&self) -> &str {
            "Broken"
        }

        async fn open(
            &self,
            _address: &ConnectorAddress,
            _handler: Arc<dyn EnvelopeHandler>,
        ) -> Result<SessionWriter> {
            Ok(Arc::new(BrokenClose))
        }
    }

    #[tokio::test]
    async fn test_close_fails_waiters_even_when_transport_close_fails() {
        let registry = ConnectorRegistry::new();
        registry.register(Arc::new(BrokenCloseConnector));
        let manager = ConversationManager::new(Arc::new(registry));
        let conversation = manager
            .start_conversation("client", &ConnectorAddress::parse("Broken:x").unwrap(), "x")
            .await
            .unwrap();

        let (tx, rx) = oneshot::channel();
        let handler: Box<dyn ResponseHandler> =
            Box::new(move |r: std::result::Result<Envelope, RemoteFailure>| {
                let _ = tx.send(r);
            });
        conversation
            .send(Envelope::new(Body::Empty), Some(handler))
            .await
            .unwrap();

        assert!(conversation.close().await.is_err());
        assert_eq!(rx.await.unwrap().unwrap_err(), RemoteFailure::connection_closed());
        assert_eq!(conversation.dispatcher().pending_count(), 0);
    }

    #[tokio::test]
    async fn test_send_on_closed_conversation_fails() {
        let manager = manager_with("echo", Arc::new(Echo));
        let conversation = manager
            .start_conversation("client", &ConnectorAddress::local("echo"), "echo")
            .await
            .unwrap();

        conversation.close().await.unwrap();
        assert!(!conversation.is_open());

        let handler: Box<dyn ResponseHandler> =
            Box::new(|_r: std::result::Result<Envelope, RemoteFailure>| {});
        assert!(conversation
            .send(Envelope::new(Body::Empty), Some(handler))
            .await
            .is_err());
        assert_eq!(conversation.dispatcher().pending_count(), 0);
    }
}
