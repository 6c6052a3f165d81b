//! 统一配置中心
//!
//! 提供 MUC 服务的全局配置管理，包括：
//! - 聊天服务标识（服务名与域名）
//! - 集群传输设置
//! - 服务级历史默认策略
//!
//! 配置来源按优先级合并：内置默认值 < `muc.toml` < `MUC_` 前缀的
//! 环境变量（嵌套键用 `__` 分隔，例如 `MUC_HISTORY__MAX_NUMBER`）。

use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};

/// 全局应用配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// 聊天服务标识
    pub service: ServiceConfig,
    /// 集群传输配置
    pub cluster: ClusterConfig,
    /// 服务级历史默认策略
    pub history: HistoryConfig,
}

/// 聊天服务标识
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// 服务名，复制任务按它过滤
    pub name: String,
    /// 服务域名，房间地址的域部分
    pub domain: String,
}

/// 集群传输配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterConfig {
    /// 回环广播通道的容量
    pub broadcast_capacity: usize,
}

/// 历史保留模式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RetentionKind {
    None,
    One,
    All,
    Number,
}

/// 服务级历史默认策略
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryConfig {
    pub retention: RetentionKind,
    /// `number` 模式下的缓冲区容量
    pub max_number: usize,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            service: ServiceConfig {
                name: "conference".to_string(),
                domain: "conference.localhost".to_string(),
            },
            cluster: ClusterConfig {
                broadcast_capacity: 256,
            },
            history: HistoryConfig {
                retention: RetentionKind::Number,
                max_number: 25,
            },
        }
    }
}

impl AppConfig {
    /// 加载并校验配置。
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_figment(
            Figment::from(Serialized::defaults(AppConfig::default()))
                .merge(Toml::file("muc.toml"))
                .merge(Env::prefixed("MUC_").split("__")),
        )
    }

    fn from_figment(figment: Figment) -> Result<Self, ConfigError> {
        let config: AppConfig = figment
            .extract()
            .map_err(|error| ConfigError::Load(error.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// 验证配置有效性。
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.service.name.trim().is_empty() {
            return Err(ConfigError::InvalidServiceConfig(
                "service name cannot be empty".to_string(),
            ));
        }
        if self.service.domain.trim().is_empty() {
            return Err(ConfigError::InvalidServiceConfig(
                "service domain cannot be empty".to_string(),
            ));
        }
        if self.cluster.broadcast_capacity == 0 {
            return Err(ConfigError::InvalidClusterConfig(
                "broadcast capacity must be greater than 0".to_string(),
            ));
        }
        if self.history.retention == RetentionKind::Number && self.history.max_number == 0 {
            return Err(ConfigError::InvalidHistoryConfig(
                "max_number must be greater than 0 for the `number` retention".to_string(),
            ));
        }
        Ok(())
    }
}

/// 配置错误类型
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(String),
    #[error("Invalid service configuration: {0}")]
    InvalidServiceConfig(String),
    #[error("Invalid cluster configuration: {0}")]
    InvalidClusterConfig(String),
    #[error("Invalid history configuration: {0}")]
    InvalidHistoryConfig(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.history.retention, RetentionKind::Number);
        assert_eq!(config.history.max_number, 25);
        assert_eq!(config.cluster.broadcast_capacity, 256);
    }

    #[test]
    fn test_toml_file_overrides_defaults() {
        figment::Jail::expect_with(|jail| {
            jail.create_file(
                "muc.toml",
                r#"
                [service]
                name = "chat"
                domain = "chat.example.com"

                [history]
                retention = "one"
                "#,
            )?;
            let config = AppConfig::from_figment(
                Figment::from(Serialized::defaults(AppConfig::default()))
                    .merge(Toml::file("muc.toml"))
                    .merge(Env::prefixed("MUC_").split("__")),
            )
            .expect("config should load");
            assert_eq!(config.service.name, "chat");
            assert_eq!(config.service.domain, "chat.example.com");
            assert_eq!(config.history.retention, RetentionKind::One);
            // 未覆盖的键保留默认值
            assert_eq!(config.history.max_number, 25);
            Ok(())
        });
    }

    #[test]
    fn test_env_overrides_toml() {
        figment::Jail::expect_with(|jail| {
            jail.create_file("muc.toml", "[cluster]\nbroadcast_capacity = 64\n")?;
            jail.set_env("MUC_CLUSTER__BROADCAST_CAPACITY", "128");
            jail.set_env("MUC_HISTORY__RETENTION", "all");
            let config = AppConfig::from_figment(
                Figment::from(Serialized::defaults(AppConfig::default()))
                    .merge(Toml::file("muc.toml"))
                    .merge(Env::prefixed("MUC_").split("__")),
            )
            .expect("config should load");
            assert_eq!(config.cluster.broadcast_capacity, 128);
            assert_eq!(config.history.retention, RetentionKind::All);
            Ok(())
        });
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let mut config = AppConfig::default();
        config.cluster.broadcast_capacity = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidClusterConfig(_))
        ));

        let mut config = AppConfig::default();
        config.service.name = "  ".to_string();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidServiceConfig(_))
        ));

        let mut config = AppConfig::default();
        config.history.max_number = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidHistoryConfig(_))
        ));

        // `all` 模式不使用 max_number，0 也合法
        let mut config = AppConfig::default();
        config.history.retention = RetentionKind::All;
        config.history.max_number = 0;
        assert!(config.validate().is_ok());
    }
}
