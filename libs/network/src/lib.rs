//! Grid Network Infrastructure
//!
//! Node-to-node remoting for the grid: the envelope model, request/reply
//! correlation, conversations, pluggable transports, the client-side node
//! connector, the serving-side command dispatch, resource selection
//! strategies and the per-node context store.

pub mod address;
pub mod connector;
pub mod conversation;
pub mod correlation;
pub mod error;
pub mod filter;
pub mod message;
pub mod node_data;
pub mod receiver;
pub mod routing;
pub mod transports;

// Re-export commonly used types
pub use address::{ConnectorAddress, ConnectorType};
pub use connector::{NodeConnector, PING_COMMAND};
pub use conversation::{Conversation, ConversationManager};
pub use correlation::{CorrelationDispatcher, DispatcherStats, ResponseHandler};
pub use error::{GridError, Result};
pub use filter::{EnvelopeFilter, FilterChain};
pub use message::{Body, Command, Envelope, RemoteFailure, NO_RESPONSE};
pub use node_data::{Context, ContextManager, NodeData};
pub use receiver::{
    CommandDispatcher, CommandExecutor, MessageReceiverHandler, ReceiverAdapter, Responder,
};
pub use routing::{
    strategy_for, Candidate, GridResource, LatencyProbe, LatencyTable, ResourceDescriptor,
    SelectionStrategy,
};
pub use transports::{
    Connector, ConnectorRegistry, EnvelopeHandler, EnvelopeWriter, LocalConnector,
    SessionWriter, TcpAcceptor, TcpConnector,
};

use std::sync::Arc;

/// Registry with the socket and in-process connectors installed
pub fn default_registry(
    transport: grid_config::TransportSettings,
    local: Arc<LocalConnector>,
) -> ConnectorRegistry {
    let registry = ConnectorRegistry::new();
    registry.register(Arc::new(TcpConnector::new(transport)));
    registry.register(local);
    registry
}
