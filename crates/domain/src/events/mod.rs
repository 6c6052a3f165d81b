//! 集群复制任务定义

pub mod cluster_task;

pub use cluster_task::*;
