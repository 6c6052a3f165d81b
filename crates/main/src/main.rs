//! 主应用程序入口
//!
//! 在单进程内启动两个 MUC 服务节点，用回环集群传输连接，
//! 演示占位者复制、历史回放与主题跟踪的完整流程。

use std::sync::Arc;

use application::{Clock, MucService, MucServiceDependencies, OccupantManager, SystemClock};
use config::{AppConfig, RetentionKind};
use domain::{HistoryPolicy, HistoryRetention, NodeId, UserAddress};
use infrastructure::{InMemoryRoomRepository, LoopbackClusterBroadcaster, TaskRelay};
use tracing_subscriber::EnvFilter;

fn history_policy(config: &AppConfig) -> HistoryPolicy {
    let retention = match config.history.retention {
        RetentionKind::None => HistoryRetention::None,
        RetentionKind::One => HistoryRetention::One,
        RetentionKind::All => HistoryRetention::All,
        RetentionKind::Number => HistoryRetention::Number,
    };
    HistoryPolicy::new(retention, config.history.max_number)
}

fn build_node(
    config: &AppConfig,
    broadcaster: &LoopbackClusterBroadcaster,
) -> Arc<MucService> {
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let occupant_manager = Arc::new(OccupantManager::new(
        &config.service.name,
        &config.service.domain,
        NodeId::random(),
        clock.clone(),
    ));
    Arc::new(MucService::new(
        history_policy(config),
        MucServiceDependencies {
            occupant_manager,
            broadcaster: Arc::new(broadcaster.clone()),
            repository: Arc::new(InMemoryRoomRepository::new()),
            clock,
        },
    ))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 初始化日志
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let config = AppConfig::load()?;
    tracing::info!(
        service = %config.service.name,
        domain = %config.service.domain,
        "启动 MUC 服务"
    );

    let broadcaster = LoopbackClusterBroadcaster::new(config.cluster.broadcast_capacity);
    let node_a = build_node(&config, &broadcaster);
    let node_b = build_node(&config, &broadcaster);
    let _relay_a = TaskRelay::spawn(broadcaster.subscribe(), node_a.clone());
    let _relay_b = TaskRelay::spawn(broadcaster.subscribe(), node_b.clone());
    tracing::info!(node_a = %node_a.local_node(), node_b = %node_b.local_node(), "两节点集群就绪");

    let alice = UserAddress::parse("alice@example.com")?;
    let bob = UserAddress::parse("bob@example.com")?;

    // A 节点：建房、加入、发消息、设主题
    node_a.create_room("lobby", &alice).await?;
    node_a.join_room("lobby", &alice, "Alice", None).await?;
    node_a.send_message("lobby", "Alice", "大家好").await?;
    node_a.change_subject("lobby", "Alice", "今天的话题").await?;

    // 后来者加入时收到按时间顺序的历史回放
    let (occupant, replay) = node_a.join_room("lobby", &bob, "Bob", None).await?;
    tracing::info!(nickname = %occupant.nickname, replayed = replay.len(), "Bob 加入并收到历史回放");

    // 等待复制任务送达后观察集群视图
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    let manager = node_b.occupant_manager();
    tracing::info!(
        unique_users = manager.number_of_unique_users().await,
        lobby_occupants = manager.occupants_for_room("lobby").await.len(),
        "B 节点的集群视图"
    );

    node_a.leave_room("lobby", &alice, "Alice").await?;
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    tracing::info!(
        lobby_occupants = manager.occupants_for_room("lobby").await.len(),
        "Alice 在 A 节点离开后"
    );

    Ok(())
}
