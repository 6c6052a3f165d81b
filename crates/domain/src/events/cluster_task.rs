//! 节点间广播的复制任务
//!
//! 本地的加入/离开/改名事件发生后，向其余集群节点广播对应任务；
//! 接收方将任务应用到自己的远端占位者视图。传输层只保证至少一次、
//! 无全序投递，因此所有任务的应用都必须幂等。

use serde::{Deserialize, Serialize};

use crate::occupant::Occupant;
use crate::value_objects::{NodeId, UserAddress};

/// 集群复制任务
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ClusterTask {
    /// 某节点上出现了新的占位者
    OccupantAdded {
        service_name: String,
        room_name: String,
        nickname: String,
        user_address: UserAddress,
        origin: NodeId,
    },

    /// 某节点上的占位者离开
    OccupantRemoved {
        service_name: String,
        room_name: String,
        nickname: String,
        user_address: UserAddress,
        origin: NodeId,
    },

    /// 某节点上的占位者改名（未离开房间）
    OccupantUpdated {
        service_name: String,
        room_name: String,
        old_nickname: String,
        new_nickname: String,
        user_address: UserAddress,
        origin: NodeId,
    },

    /// 某节点全量同步它的本地占位者，用于最终一致性修复
    SyncOccupants {
        service_name: String,
        origin: NodeId,
        occupants: Vec<Occupant>,
    },
}

impl ClusterTask {
    /// 创建占位者加入任务
    pub fn occupant_added(
        service_name: impl Into<String>,
        room_name: impl Into<String>,
        nickname: impl Into<String>,
        user_address: UserAddress,
        origin: NodeId,
    ) -> Self {
        Self::OccupantAdded {
            service_name: service_name.into(),
            room_name: room_name.into(),
            nickname: nickname.into(),
            user_address,
            origin,
        }
    }

    /// 创建占位者离开任务
    pub fn occupant_removed(
        service_name: impl Into<String>,
        room_name: impl Into<String>,
        nickname: impl Into<String>,
        user_address: UserAddress,
        origin: NodeId,
    ) -> Self {
        Self::OccupantRemoved {
            service_name: service_name.into(),
            room_name: room_name.into(),
            nickname: nickname.into(),
            user_address,
            origin,
        }
    }

    /// 创建占位者改名任务
    pub fn occupant_updated(
        service_name: impl Into<String>,
        room_name: impl Into<String>,
        old_nickname: impl Into<String>,
        new_nickname: impl Into<String>,
        user_address: UserAddress,
        origin: NodeId,
    ) -> Self {
        Self::OccupantUpdated {
            service_name: service_name.into(),
            room_name: room_name.into(),
            old_nickname: old_nickname.into(),
            new_nickname: new_nickname.into(),
            user_address,
            origin,
        }
    }

    /// 任务所属的聊天服务名
    pub fn service_name(&self) -> &str {
        match self {
            Self::OccupantAdded { service_name, .. }
            | Self::OccupantRemoved { service_name, .. }
            | Self::OccupantUpdated { service_name, .. }
            | Self::SyncOccupants { service_name, .. } => service_name,
        }
    }

    /// 产生该任务的集群节点
    pub fn origin(&self) -> NodeId {
        match self {
            Self::OccupantAdded { origin, .. }
            | Self::OccupantRemoved { origin, .. }
            | Self::OccupantUpdated { origin, .. }
            | Self::SyncOccupants { origin, .. } => *origin,
        }
    }
}
