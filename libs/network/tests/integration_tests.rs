//! Integration Tests for the Grid Network Crate
//!
//! Exercises the full client/server path over real TCP sessions:
//! - concurrent conversations correlating their own replies
//! - blocking round trips with timeouts and late replies
//! - failure replies and session loss surfacing to callers

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use grid_config::{ConversationSettings, TransportSettings};
use grid_network::{
    Body, Command, CommandDispatcher, ConnectorAddress, ConnectorRegistry, ConversationManager,
    Envelope, EnvelopeHandler, LocalConnector, NodeConnector, ReceiverAdapter, SessionWriter,
    TcpAcceptor, TcpConnector, PING_COMMAND,
};
use proptest::prelude::*;

fn commands() -> Arc<CommandDispatcher> {
    let commands = CommandDispatcher::new();
    commands.register_fn(PING_COMMAND, |_| Ok(Body::Empty));
    commands.register_fn("Echo.bytes", |cmd| Ok(Body::Bytes(cmd.arg(0)?)));
    Arc::new(commands)
}

/// Echo that delays each reply by the first payload byte in milliseconds
struct DelayedEcho;

#[async_trait]
impl grid_network::CommandExecutor for DelayedEcho {
    async fn execute(&self, command: Command) -> anyhow::Result<Body> {
        let payload: Vec<u8> = command.arg(0)?;
        let delay = payload.first().copied().unwrap_or(0) as u64;
        tokio::time::sleep(Duration::from_millis(delay)).await;
        Ok(Body::Bytes(payload))
    }
}

async fn start_server() -> TcpAcceptor {
    let commands = commands();
    commands.register("Echo.delayed", Arc::new(DelayedEcho));

    TcpAcceptor::bind(
        "127.0.0.1:0".parse().unwrap(),
        TransportSettings::default(),
        Arc::new(ReceiverAdapter::new(commands)),
    )
    .await
    .unwrap()
}

fn tcp_manager() -> ConversationManager {
    let registry = ConnectorRegistry::new();
    registry.register(Arc::new(TcpConnector::new(TransportSettings::default())));
    ConversationManager::new(Arc::new(registry))
}

#[tokio::test]
async fn test_concurrent_conversations_get_their_own_replies() {
    let server = start_server().await;
    let address = ConnectorAddress::remote("node1", "127.0.0.1", server.local_addr().port());
    let manager = tcp_manager();

    let mut clients = Vec::new();
    for client in 0..6u8 {
        let conversation = manager
            .start_conversation(&format!("client-{}", client), &address, "node1")
            .await
            .unwrap();

        clients.push(tokio::spawn(async move {
            let requests = (0..10u8).map(|i| {
                // Later requests reply sooner, forcing out-of-order arrival
                let payload = vec![10 - i, client, i];
                let command = Command::new("Echo.delayed").with_arg(&payload).unwrap();
                let conversation = conversation.clone();
                async move {
                    let reply = conversation
                        .request(Envelope::command(command), Duration::from_secs(5))
                        .await
                        .unwrap();
                    assert_eq!(reply.body, Body::Bytes(payload));
                }
            });
            futures::future::join_all(requests).await;
            conversation.dispatcher().pending_count()
        }));
    }

    for client in clients {
        assert_eq!(client.await.unwrap(), 0);
    }
    assert_eq!(server.managed_session_count(), 6);
    server.stop().await;
}

#[tokio::test]
async fn test_late_reply_after_timeout_is_dropped() {
    let server = start_server().await;
    let address = ConnectorAddress::remote("node1", "127.0.0.1", server.local_addr().port());
    let conversation = tcp_manager()
        .start_conversation("client", &address, "node1")
        .await
        .unwrap();

    let command = Command::new("Echo.delayed").with_arg(&vec![150u8]).unwrap();
    let err = conversation
        .request(Envelope::command(command), Duration::from_millis(20))
        .await
        .unwrap_err();
    assert_eq!(err.category(), "timeout");
    assert_eq!(conversation.dispatcher().pending_count(), 0);

    tokio::time::sleep(Duration::from_millis(300)).await;
    let stats = conversation.dispatcher().stats();
    assert_eq!(stats.dropped, 1);
    assert_eq!(stats.delivered, 0);

    server.stop().await;
}

#[tokio::test]
async fn test_node_connector_over_tcp() {
    let server = start_server().await;
    let address = ConnectorAddress::remote("node1", "127.0.0.1", server.local_addr().port());
    let connector = NodeConnector::new("client", address, tcp_manager(), &ConversationSettings::default());

    connector.connect().await.unwrap();
    assert!(connector.ping().await.is_ok());

    let err = connector
        .execute(Command::new("Not.registered"))
        .await
        .unwrap_err();
    assert_eq!(err.category(), "remote");

    connector.disconnect().await;
    assert!(!connector.is_connected().await);
    server.stop().await;
}

#[tokio::test]
async fn test_server_stop_fails_outstanding_requests() {
    let server = start_server().await;
    let address = ConnectorAddress::remote("node1", "127.0.0.1", server.local_addr().port());
    let conversation = tcp_manager()
        .start_conversation("client", &address, "node1")
        .await
        .unwrap();

    let command = Command::new("Echo.delayed").with_arg(&vec![250u8]).unwrap();
    let pending = {
        let conversation = conversation.clone();
        tokio::spawn(async move {
            conversation
                .request(Envelope::command(command), Duration::from_secs(5))
                .await
        })
    };

    tokio::time::sleep(Duration::from_millis(50)).await;
    server.stop().await;

    let err = pending.await.unwrap().unwrap_err();
    assert_eq!(err.category(), "connection");
}

/// Never answers anything
struct Silent;

#[async_trait]
impl EnvelopeHandler for Silent {
    async fn envelope_received(&self, _session: SessionWriter, _envelope: Envelope) {}
}

proptest! {
    #[test]
    fn prop_request_ids_strictly_increase(count in 1usize..64) {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        let ids = runtime.block_on(async move {
            let local = LocalConnector::new();
            local.bind("sink", Arc::new(Silent));
            let registry = ConnectorRegistry::new();
            registry.register(Arc::new(local));

            let conversation = ConversationManager::new(Arc::new(registry))
                .start_conversation("client", &ConnectorAddress::local("sink"), "sink")
                .await
                .unwrap();

            let mut ids = Vec::with_capacity(count);
            for _ in 0..count {
                ids.push(conversation.send(Envelope::new(Body::Empty), None).await.unwrap());
            }
            ids
        });

        prop_assert_eq!(ids.len(), count);
        prop_assert!(ids[0] >= 1);
        prop_assert!(ids.windows(2).all(|w| w[0] < w[1]));
    }
}
