//! End-to-end tests against a running grid node

use std::sync::Arc;
use std::time::Duration;

use grid_config::{ConversationSettings, GridConfig, TransportSettings};
use grid_deployment::{DeploymentJobResult, DeploymentStatus, DeploymentUnit, JobType};
use grid_network::{
    default_registry, Command, ConnectorAddress, ConversationManager, LocalConnector,
    NodeConnector,
};
use grid_node::{GridNode, NodeInfo};

async fn start_node(name: &str) -> GridNode {
    let mut config = GridConfig::default();
    config.node.name = name.to_string();
    config.node.address = "127.0.0.1".to_string();
    config.node.port = 0;
    GridNode::start(config).await.unwrap()
}

fn client_for(address: ConnectorAddress) -> NodeConnector {
    let registry = default_registry(TransportSettings::default(), Arc::new(LocalConnector::new()));
    let manager = ConversationManager::new(Arc::new(registry));
    let settings = ConversationSettings {
        request_timeout_ms: 2_000,
    };
    NodeConnector::new("client", address, manager, &settings)
}

async fn wait_for_status(
    client: &NodeConnector,
    unit_id: &str,
    expected: DeploymentStatus,
) -> DeploymentStatus {
    let mut status = DeploymentStatus::Nonexistent;
    for _ in 0..100 {
        let command = Command::new("Deployment.status").with_arg(&unit_id.to_string()).unwrap();
        status = client.execute(command).await.unwrap().decode().unwrap();
        if status == expected {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    status
}

#[tokio::test]
async fn test_ping_echo_and_info() {
    let node = start_node("node-a").await;
    let client = client_for(node.address());
    client.connect().await.unwrap();

    client.ping().await.unwrap();

    let echoed = client
        .execute(Command::new("Node.echo").with_arg(&vec![1u8, 2, 3]).unwrap())
        .await
        .unwrap();
    assert_eq!(echoed, grid_network::Body::Bytes(vec![1, 2, 3]));

    let info: NodeInfo = client
        .execute(Command::new("Node.info"))
        .await
        .unwrap()
        .decode()
        .unwrap();
    assert_eq!(info.name, "node-a");
    assert!(info.commands.contains(&"Deployment.deploy".to_string()));
    assert!(info.contexts.contains(&"__TEMP__".to_string()));

    // The session is counted while it stays open
    for _ in 0..50 {
        if node.connected_clients() == 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(node.connected_clients(), 1);

    client.disconnect().await;
    node.stop().await;
}

#[tokio::test]
async fn test_remote_deploy_then_status() {
    let node = start_node("node-b").await;
    let client = client_for(node.address());
    client.connect().await.unwrap();

    let unit = DeploymentUnit::new("org.grid", "rules", "1.0");
    let result: DeploymentJobResult = client
        .execute(Command::new("Deployment.deploy").with_arg(&unit).unwrap())
        .await
        .unwrap()
        .decode()
        .unwrap();
    assert!(result.success, "{}", result.message);
    assert_eq!(result.job_type, JobType::Deploy);
    assert_eq!(result.unit, unit);

    let status = wait_for_status(&client, "org.grid:rules:1.0", DeploymentStatus::Deployed).await;
    assert_eq!(status, DeploymentStatus::Deployed);
    assert!(node.deployments().is_deployed("org.grid:rules:1.0"));

    // Undeploying an unknown unit is accepted but fails on the worker
    let unknown = DeploymentUnit::new("org.grid", "missing", "1.0");
    let result: DeploymentJobResult = client
        .execute(Command::new("Deployment.undeploy").with_arg(&unknown).unwrap())
        .await
        .unwrap()
        .decode()
        .unwrap();
    assert!(result.success);
    let status = wait_for_status(
        &client,
        "org.grid:missing:1.0",
        DeploymentStatus::UndeployFailed,
    )
    .await;
    assert_eq!(status, DeploymentStatus::UndeployFailed);

    client.disconnect().await;
    node.stop().await;
}

#[tokio::test]
async fn test_scratch_values_round_trip_through_temp() {
    let node = start_node("node-c").await;
    let client = client_for(node.address());
    client.connect().await.unwrap();

    let put = Command::new("Context.put")
        .with_arg(&"answer".to_string())
        .unwrap()
        .with_arg(&vec![42u8])
        .unwrap();
    client.execute(put).await.unwrap();

    let get = Command::new("Context.get").with_arg(&"answer".to_string()).unwrap();
    let value: Option<Vec<u8>> = client.execute(get).await.unwrap().decode().unwrap();
    assert_eq!(value, Some(vec![42]));

    let missing = Command::new("Context.get").with_arg(&"nothing".to_string()).unwrap();
    let value: Option<Vec<u8>> = client.execute(missing).await.unwrap().decode().unwrap();
    assert_eq!(value, None);

    client.disconnect().await;
    node.stop().await;
}

#[tokio::test]
async fn test_unknown_command_is_a_remote_error() {
    let node = start_node("node-d").await;
    let client = client_for(node.address());
    client.connect().await.unwrap();

    let err = client
        .execute(Command::new("Node.selfDestruct"))
        .await
        .unwrap_err();
    assert_eq!(err.category(), "remote");
    let failure = err.remote_failure().unwrap();
    assert_eq!(failure.kind, "unknown_command");
    assert_eq!(failure.message, "Node.selfDestruct");

    client.disconnect().await;
    node.stop().await;
}

#[tokio::test]
async fn test_connect_failure_names_the_address() {
    let node = start_node("node-e").await;
    let address = node.address();
    node.stop().await;
    drop(node);

    let client = client_for(address.clone());
    let err = client.connect().await.unwrap_err();
    assert_eq!(err.category(), "connector");
    assert!(
        err.to_string().contains(&address.to_string()),
        "{} should name {}",
        err,
        address
    );
}
