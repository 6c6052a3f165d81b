//! 应用层错误定义

use domain::DomainError;
use thiserror::Error;

/// 应用层错误类型
#[derive(Debug, Error)]
pub enum ApplicationError {
    /// 领域层错误
    #[error("领域错误: {0}")]
    Domain(#[from] DomainError),

    /// 基础设施层错误
    #[error("基础设施错误: {0}")]
    Infrastructure(String),

    /// 未找到资源
    #[error("资源未找到: {0}")]
    NotFound(String),

    /// 序列化失败。外部化往返必须整体成功，
    /// 绝不产出部分重建的聚合。
    #[error("序列化失败: {0}")]
    Serialization(String),
}

impl ApplicationError {
    pub fn infrastructure(message: impl Into<String>) -> Self {
        Self::Infrastructure(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }

    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization(message.into())
    }
}

/// 应用层结果类型
pub type ApplicationResult<T> = Result<T, ApplicationError>;
