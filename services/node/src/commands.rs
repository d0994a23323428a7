//! Built-in node commands
//!
//! | command               | arguments               | reply                         |
//! |-----------------------|-------------------------|-------------------------------|
//! | `Node.ping`           | none                    | empty                         |
//! | `Node.echo`           | `Vec<u8>`               | the bytes                     |
//! | `Node.info`           | none                    | [`NodeInfo`]                  |
//! | `Context.put`         | `String`, `Vec<u8>`     | empty                         |
//! | `Context.get`         | `String`                | `Option<Vec<u8>>`             |
//! | `Deployment.deploy`   | [`DeploymentUnit`]      | [`DeploymentJobResult`]       |
//! | `Deployment.undeploy` | [`DeploymentUnit`]      | [`DeploymentJobResult`]       |
//! | `Deployment.status`   | unit identifier         | [`DeploymentStatus`]          |
//!
//! [`DeploymentJobResult`]: grid_deployment::DeploymentJobResult
//! [`DeploymentStatus`]: grid_deployment::DeploymentStatus

use async_trait::async_trait;
use grid_deployment::{AsyncDeploymentJobExecutor, DeploymentService, DeploymentUnit, JobType};
use grid_network::{Body, Command, CommandDispatcher, CommandExecutor, NodeData, PING_COMMAND};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

pub const ECHO_COMMAND: &str = "Node.echo";
pub const INFO_COMMAND: &str = "Node.info";
pub const CONTEXT_PUT_COMMAND: &str = "Context.put";
pub const CONTEXT_GET_COMMAND: &str = "Context.get";
pub const DEPLOY_COMMAND: &str = "Deployment.deploy";
pub const UNDEPLOY_COMMAND: &str = "Deployment.undeploy";
pub const STATUS_COMMAND: &str = "Deployment.status";

/// Reply to `Node.info`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeInfo {
    pub name: String,
    pub address: String,
    pub commands: Vec<String>,
    pub contexts: Vec<String>,
}

/// Scratch value stored by `Context.put`
#[derive(Debug, Clone)]
pub struct ScratchValue(pub Vec<u8>);

struct SubmitCommand {
    executor: Arc<AsyncDeploymentJobExecutor>,
    service: Arc<dyn DeploymentService>,
    job_type: JobType,
}

#[async_trait]
impl CommandExecutor for SubmitCommand {
    async fn execute(&self, command: Command) -> anyhow::Result<Body> {
        let unit: DeploymentUnit = command.arg(0)?;
        let result = self
            .executor
            .submit_job(self.service.clone(), unit, self.job_type)
            .await;
        Ok(Body::encode(&result)?)
    }
}

struct StatusCommand {
    executor: Arc<AsyncDeploymentJobExecutor>,
}

#[async_trait]
impl CommandExecutor for StatusCommand {
    async fn execute(&self, command: Command) -> anyhow::Result<Body> {
        let unit_id: String = command.arg(0)?;
        Ok(Body::encode(&self.executor.status(&unit_id))?)
    }
}

/// Install every built-in command on `commands`
pub fn register_builtin_commands(
    commands: &Arc<CommandDispatcher>,
    node_name: &str,
    node_address: &str,
    node_data: &Arc<NodeData>,
    executor: &Arc<AsyncDeploymentJobExecutor>,
    service: Arc<dyn DeploymentService>,
) {
    commands.register_fn(PING_COMMAND, |_| Ok(Body::Empty));

    commands.register_fn(ECHO_COMMAND, |command| {
        let payload: Vec<u8> = command.arg(0)?;
        Ok(Body::Bytes(payload))
    });

    {
        let name = node_name.to_string();
        let address = node_address.to_string();
        let data = Arc::downgrade(node_data);
        let dispatcher = Arc::downgrade(commands);
        commands.register_fn(INFO_COMMAND, move |_| {
            let info = NodeInfo {
                name: name.clone(),
                address: address.clone(),
                commands: dispatcher.upgrade().map(|d| d.names()).unwrap_or_default(),
                contexts: data
                    .upgrade()
                    .map(|d| d.contexts().names())
                    .unwrap_or_default(),
            };
            Ok(Body::encode(&info)?)
        });
    }

    {
        let temp = node_data.temp().clone();
        commands.register_fn(CONTEXT_PUT_COMMAND, move |command| {
            let key: String = command.arg(0)?;
            let value: Vec<u8> = command.arg(1)?;
            temp.set(key, ScratchValue(value));
            Ok(Body::Empty)
        });
    }

    {
        let temp = node_data.temp().clone();
        commands.register_fn(CONTEXT_GET_COMMAND, move |command| {
            let key: String = command.arg(0)?;
            let value = temp.get::<ScratchValue>(&key).map(|v| v.0.clone());
            Ok(Body::encode(&value)?)
        });
    }

    commands.register(
        DEPLOY_COMMAND,
        Arc::new(SubmitCommand {
            executor: executor.clone(),
            service: service.clone(),
            job_type: JobType::Deploy,
        }),
    );
    commands.register(
        UNDEPLOY_COMMAND,
        Arc::new(SubmitCommand {
            executor: executor.clone(),
            service,
            job_type: JobType::Undeploy,
        }),
    );
    commands.register(
        STATUS_COMMAND,
        Arc::new(StatusCommand {
            executor: executor.clone(),
        }),
    );
}
