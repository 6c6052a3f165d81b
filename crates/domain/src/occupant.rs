//! 占位者记录
//!
//! 描述一个 (房间, 真实地址, 昵称) 在场三元组及其最近活跃时间。

use serde::{Deserialize, Serialize};

use crate::value_objects::{Timestamp, UserAddress};

/// 占位者唯一标识：同一键在每个占位者管理器中至多出现一次。
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OccupantKey {
    pub room_name: String,
    pub user_address: UserAddress,
    pub nickname: String,
}

impl OccupantKey {
    pub fn new(
        room_name: impl Into<String>,
        user_address: UserAddress,
        nickname: impl Into<String>,
    ) -> Self {
        Self {
            room_name: room_name.into(),
            user_address,
            nickname: nickname.into(),
        }
    }

    /// 昵称变更后的新键，其余身份信息不变。
    pub fn with_nickname(&self, nickname: impl Into<String>) -> Self {
        Self {
            room_name: self.room_name.clone(),
            user_address: self.user_address.clone(),
            nickname: nickname.into(),
        }
    }
}

/// 一条占位者记录。身份由 [`OccupantKey`] 决定，
/// `last_active` 仅用于本节点的空闲检测，不参与身份比较。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Occupant {
    pub key: OccupantKey,
    pub last_active: Timestamp,
}

impl Occupant {
    pub fn new(key: OccupantKey, now: Timestamp) -> Self {
        Self {
            key,
            last_active: now,
        }
    }

    /// 记录一次活动。时间戳只向前移动，乱序的活动信号被忽略。
    pub fn touch(&mut self, now: Timestamp) {
        if now > self.last_active {
            self.last_active = now;
        }
    }
}
