use async_trait::async_trait;
use domain::ClusterTask;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BroadcastError {
    #[error("broadcast failed: {0}")]
    Failed(String),
}

impl BroadcastError {
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }
}

/// 复制任务的集群广播抽象。具体传输（多播、gossip、RPC）
/// 由基础设施层提供。
#[async_trait]
pub trait ClusterBroadcaster: Send + Sync {
    async fn broadcast(&self, task: ClusterTask) -> Result<(), BroadcastError>;
}
