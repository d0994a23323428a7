//! Grid Node
//!
//! A standalone execution node: a TCP acceptor whose sessions feed a command
//! dispatcher, the node's context store, and a deployment executor.

pub mod commands;
pub mod deployments;

use anyhow::{Context as _, Result};
use grid_config::GridConfig;
use grid_deployment::AsyncDeploymentJobExecutor;
use grid_network::{
    CommandDispatcher, ConnectorAddress, NodeData, ReceiverAdapter, TcpAcceptor,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::info;

pub use commands::{register_builtin_commands, NodeInfo};
pub use deployments::{NodeDeploymentService, DEPLOYMENTS_KEY};

/// A running grid node
pub struct GridNode {
    config: GridConfig,
    node_data: Arc<NodeData>,
    commands: Arc<CommandDispatcher>,
    executor: Arc<AsyncDeploymentJobExecutor>,
    deployments: Arc<NodeDeploymentService>,
    acceptor: TcpAcceptor,
}

impl GridNode {
    /// Build the node's services and start accepting sessions
    pub async fn start(config: GridConfig) -> Result<Self> {
        let node_data = NodeData::new(&config.node_data);
        let executor = Arc::new(AsyncDeploymentJobExecutor::new(config.deployment.clone()));
        let deployments = Arc::new(NodeDeploymentService::new());
        node_data
            .root()
            .set_shared(DEPLOYMENTS_KEY, deployments.clone());

        let bind_addr = resolve_bind_address(&config.node.address, config.node.port).await?;
        let advertised = format!("{}:{}", config.node.address, config.node.port);

        let commands = Arc::new(CommandDispatcher::new());
        register_builtin_commands(
            &commands,
            &config.node.name,
            &advertised,
            &node_data,
            &executor,
            deployments.clone(),
        );

        let acceptor = TcpAcceptor::bind(
            bind_addr,
            config.transport.clone(),
            Arc::new(ReceiverAdapter::new(commands.clone())),
        )
        .await
        .with_context(|| format!("Failed to start grid node on {}", bind_addr))?;

        info!(
            "Grid node '{}' started on {} ({} commands)",
            config.node.name,
            acceptor.local_addr(),
            commands.names().len()
        );

        Ok(Self {
            config,
            node_data,
            commands,
            executor,
            deployments,
            acceptor,
        })
    }

    pub fn name(&self) -> &str {
        &self.config.node.name
    }

    pub fn config(&self) -> &GridConfig {
        &self.config
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.acceptor.local_addr()
    }

    /// Address clients use to reach this node
    pub fn address(&self) -> ConnectorAddress {
        let local = self.local_addr();
        ConnectorAddress::remote(self.name(), local.ip().to_string(), local.port())
    }

    pub fn connected_clients(&self) -> usize {
        self.acceptor.managed_session_count()
    }

    pub fn node_data(&self) -> &Arc<NodeData> {
        &self.node_data
    }

    pub fn commands(&self) -> &Arc<CommandDispatcher> {
        &self.commands
    }

    pub fn executor(&self) -> &Arc<AsyncDeploymentJobExecutor> {
        &self.executor
    }

    pub fn deployments(&self) -> &Arc<NodeDeploymentService> {
        &self.deployments
    }

    /// Drop expired TEMP entries, returning how many went
    pub fn evict_temp(&self) -> usize {
        self.node_data.evict_temp()
    }

    /// Close every session, drain the deployment queue and clear node data
    pub async fn stop(&self) {
        self.acceptor.stop().await;
        self.executor.shutdown().await;
        self.node_data.shutdown();
        info!("Grid node '{}' stopped", self.name());
    }
}

async fn resolve_bind_address(host: &str, port: u16) -> Result<SocketAddr> {
    tokio::net::lookup_host((host, port))
        .await
        .with_context(|| format!("Failed to resolve node address {}:{}", host, port))?
        .next()
        .with_context(|| format!("No socket address for {}:{}", host, port))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> GridConfig {
        let mut config = GridConfig::default();
        config.node.address = "127.0.0.1".to_string();
        config.node.port = 0;
        config.node.name = "unit-node".to_string();
        config
    }

    #[tokio::test]
    async fn test_start_registers_builtins() {
        let node = GridNode::start(test_config()).await.unwrap();

        let names = node.commands().names();
        for expected in [
            "Context.get",
            "Context.put",
            "Deployment.deploy",
            "Deployment.status",
            "Deployment.undeploy",
            "Node.echo",
            "Node.info",
            "Node.ping",
        ] {
            assert!(names.contains(&expected.to_string()), "missing {}", expected);
        }

        assert_ne!(node.local_addr().port(), 0);
        assert_eq!(node.address().name, "unit-node");
        assert_eq!(node.connected_clients(), 0);

        let published = node
            .node_data()
            .root()
            .get::<NodeDeploymentService>(DEPLOYMENTS_KEY)
            .unwrap();
        assert!(Arc::ptr_eq(&published, node.deployments()));

        node.stop().await;
    }

    #[tokio::test]
    async fn test_unresolvable_address_fails_start() {
        let mut config = test_config();
        config.node.address = "no-such-host.invalid".to_string();

        assert!(GridNode::start(config).await.is_err());
    }
}
