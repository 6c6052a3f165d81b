//! 领域模型错误定义
//!
//! 定义了占位者与房间协调核心的所有错误类型。"未找到"类错误用于
//! 最终一致的成员视图，属可恢复条件；不变量冲突在变更前校验并拒绝。

use thiserror::Error;

/// 领域模型错误类型
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DomainError {
    /// 资源不存在错误
    #[error("资源不存在: {resource_type} {resource_id}")]
    NotFound {
        resource_type: String,
        resource_id: String,
    },

    /// 资源已存在错误（重复的占位者键、昵称冲突等）
    #[error("资源已存在: {resource_type} {identifier}")]
    AlreadyExists {
        resource_type: String,
        identifier: String,
    },

    /// 权限不足
    #[error("权限不足: {action}")]
    NotAllowed { action: String },

    /// 房间已锁定，等待配置完成
    #[error("房间已锁定: {room}")]
    RoomLocked { room: String },

    /// 房间已销毁，拒绝任何进一步变更
    #[error("房间已销毁: {room}")]
    RoomDestroyed { room: String },

    /// 房间人数已达上限
    #[error("房间人数已达上限: {room} (上限 {limit})")]
    MaxOccupantsReached { room: String, limit: u32 },

    /// 密码验证失败
    #[error("房间密码错误: {room}")]
    Unauthorized { room: String },

    /// 仅限成员的房间要求先注册为成员
    #[error("房间仅限成员加入: {room}")]
    RegistrationRequired { room: String },

    /// 用户在封禁列表中
    #[error("用户已被房间封禁: {room}")]
    Banned { room: String },

    /// 验证错误
    #[error("验证失败: {field}: {message}")]
    InvalidArgument { field: String, message: String },
}

impl DomainError {
    /// 创建资源不存在错误
    pub fn not_found(resource_type: impl Into<String>, resource_id: impl Into<String>) -> Self {
        Self::NotFound {
            resource_type: resource_type.into(),
            resource_id: resource_id.into(),
        }
    }

    /// 创建资源已存在错误
    pub fn already_exists(resource_type: impl Into<String>, identifier: impl Into<String>) -> Self {
        Self::AlreadyExists {
            resource_type: resource_type.into(),
            identifier: identifier.into(),
        }
    }

    /// 创建权限错误
    pub fn not_allowed(action: impl Into<String>) -> Self {
        Self::NotAllowed {
            action: action.into(),
        }
    }

    /// 创建验证错误
    pub fn invalid_argument(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            field: field.into(),
            message: message.into(),
        }
    }

    /// 创建房间已销毁错误
    pub fn room_destroyed(room: impl Into<String>) -> Self {
        Self::RoomDestroyed { room: room.into() }
    }
}

/// 领域模型结果类型
pub type DomainResult<T> = Result<T, DomainError>;
