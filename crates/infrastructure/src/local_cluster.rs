//! 进程内回环集群传输
//!
//! 用一条 `tokio::sync::broadcast` 通道模拟集群传输：所有节点
//! 订阅同一通道，任务对每个订阅者至少投递一次。与真实集群一样
//! 不保证全序，节点自己广播的任务也会回流（接收方负责丢弃）。

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use application::broadcaster::{BroadcastError, ClusterBroadcaster};
use application::MucService;
use domain::ClusterTask;

#[derive(Clone)]
pub struct LoopbackClusterBroadcaster {
    sender: broadcast::Sender<ClusterTask>,
}

impl LoopbackClusterBroadcaster {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ClusterTask> {
        self.sender.subscribe()
    }
}

#[async_trait]
impl ClusterBroadcaster for LoopbackClusterBroadcaster {
    async fn broadcast(&self, task: ClusterTask) -> Result<(), BroadcastError> {
        // 单节点集群没有接收方，不算失败
        if self.sender.receiver_count() == 0 {
            return Ok(());
        }
        self.sender
            .send(task)
            .map_err(|err| BroadcastError::failed(err.to_string()))?;
        Ok(())
    }
}

/// 把订阅到的复制任务泵入一个 MUC 服务实例。
///
/// 每个节点启动一个。接收端滞后丢失任务时只告警不退出，
/// 丢失的状态由对端的全量同步任务修复。
pub struct TaskRelay {
    handle: JoinHandle<()>,
}

impl TaskRelay {
    pub fn spawn(
        mut receiver: broadcast::Receiver<ClusterTask>,
        service: Arc<MucService>,
    ) -> Self {
        let handle = tokio::spawn(async move {
            loop {
                match receiver.recv().await {
                    Ok(task) => service.apply_cluster_task(&task).await,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "任务接收滞后，等待全量同步修复");
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        tracing::debug!("集群传输通道关闭，任务中继退出");
                        break;
                    }
                }
            }
        });
        Self { handle }
    }

    pub fn shutdown(&self) {
        self.handle.abort();
    }
}

impl Drop for TaskRelay {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
