//! 基础设施层实现。
//!
//! 为应用层的抽象提供具体适配器：进程内回环的集群广播（单机
//! 多节点部署与测试用）与内存房间仓储。真实部署可以替换为
//! 多播/RPC 传输与数据库仓储，应用层不感知。

pub mod local_cluster;
pub mod memory_repository;

pub use local_cluster::{LoopbackClusterBroadcaster, TaskRelay};
pub use memory_repository::InMemoryRoomRepository;
