//! Node connector
//!
//! Client-facing facade over one [`Conversation`]. It owns the
//! connect/disconnect lifecycle and offers the two send modes: `write`
//! with an optional callback, and `write_blocking`, which awaits the
//! correlated reply.

use crate::address::ConnectorAddress;
use crate::conversation::{Conversation, ConversationManager};
use crate::correlation::ResponseHandler;
use crate::filter::{EnvelopeFilter, FilterChain};
use crate::message::{Body, Command, Envelope};
use crate::{GridError, Result};
use grid_config::ConversationSettings;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Built-in liveness command every node answers
pub const PING_COMMAND: &str = "Node.ping";

/// Connector to one grid node
pub struct NodeConnector {
    name: String,
    address: ConnectorAddress,
    sender_id: String,
    recipient_id: String,
    manager: ConversationManager,
    request_timeout: Duration,
    conversation: Mutex<Option<Conversation>>,
    filters: Arc<FilterChain>,
}

impl NodeConnector {
    pub fn new(
        name: impl Into<String>,
        address: ConnectorAddress,
        manager: ConversationManager,
        settings: &ConversationSettings,
    ) -> Self {
        let name = name.into();
        Self {
            sender_id: name.clone(),
            recipient_id: address.name.clone(),
            name,
            address,
            manager,
            request_timeout: settings.request_timeout(),
            conversation: Mutex::new(None),
            filters: Arc::new(FilterChain::new()),
        }
    }

    /// Override the recipient id (defaults to the address' node name)
    pub fn with_recipient(mut self, recipient_id: impl Into<String>) -> Self {
        self.recipient_id = recipient_id.into();
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn address(&self) -> &ConnectorAddress {
        &self.address
    }

    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    /// Open the conversation; a no-op while connected
    pub async fn connect(&self) -> Result<()> {
        let mut slot = self.conversation.lock().await;
        if slot.as_ref().is_some_and(|c| c.is_open()) {
            debug!(connector = %self.name, "Already connected");
            return Ok(());
        }

        let conversation = self
            .manager
            .start_filtered_conversation(
                &self.sender_id,
                &self.address,
                &self.recipient_id,
                self.filters.clone(),
            )
            .await?;

        info!(
            connector = %self.name,
            address = %self.address,
            conversation = %conversation.id(),
            "Connected"
        );
        *slot = Some(conversation);
        Ok(())
    }

    /// Close the conversation and clear filters; never fails
    pub async fn disconnect(&self) {
        let taken = self.conversation.lock().await.take();
        if let Some(conversation) = taken {
            if let Err(e) = conversation.close().await {
                warn!(connector = %self.name, error = %e, "Error while disconnecting");
            }
            info!(connector = %self.name, address = %self.address, "Disconnected");
        }
        self.filters.clear();
    }

    pub async fn is_connected(&self) -> bool {
        self.conversation
            .lock()
            .await
            .as_ref()
            .is_some_and(|c| c.is_open())
    }

    /// Register an inbound filter under `name`
    pub fn add_filter(&self, name: impl Into<String>, filter: Arc<dyn EnvelopeFilter>) {
        self.filters.add(name, filter);
    }

    pub fn remove_filter(&self, name: &str) -> bool {
        self.filters.remove(name)
    }

    pub fn filter_names(&self) -> Vec<String> {
        self.filters.names()
    }

    /// The open conversation
    pub async fn conversation(&self) -> Result<Conversation> {
        self.conversation
            .lock()
            .await
            .as_ref()
            .filter(|c| c.is_open())
            .cloned()
            .ok_or_else(|| GridError::not_connected(self.name.clone()))
    }

    /// Send `envelope`, registering `handler` for its reply when given
    pub async fn write(
        &self,
        envelope: Envelope,
        handler: Option<Box<dyn ResponseHandler>>,
    ) -> Result<u64> {
        self.conversation().await?.send(envelope, handler).await
    }

    /// Send `envelope` and wait for the reply body
    pub async fn write_blocking(&self, envelope: Envelope) -> Result<Body> {
        let reply = self
            .conversation()
            .await?
            .request(envelope, self.request_timeout)
            .await?;
        Ok(reply.body)
    }

    /// Send a command and wait for its result
    pub async fn execute(&self, command: Command) -> Result<Body> {
        self.write_blocking(Envelope::command(command)).await
    }

    /// Measure one round trip of the ping command
    pub async fn ping(&self) -> Result<Duration> {
        let started = Instant::now();
        self.execute(Command::new(PING_COMMAND)).await?;
        let rtt = started.elapsed();
        debug!(connector = %self.name, rtt_us = rtt.as_micros() as u64, "Ping");
        Ok(rtt)
    }
}
