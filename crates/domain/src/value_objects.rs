use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use uuid::Uuid;

use crate::errors::DomainError;

/// 统一的时间戳类型。
pub type Timestamp = DateTime<Utc>;

/// 集群节点唯一标识。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub Uuid);

impl NodeId {
    pub fn new(id: Uuid) -> Self {
        Self(id)
    }

    pub fn random() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for NodeId {
    fn from(value: Uuid) -> Self {
        Self(value)
    }
}

impl From<NodeId> for Uuid {
    fn from(value: NodeId) -> Self {
        value.0
    }
}

/// 用户的真实地址（`user@domain` 形式的稳定身份）。
///
/// 与昵称不同，该地址在会话之间保持不变，是封禁列表、
/// 成员列表等长期关系的键。
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct UserAddress {
    local: String,
    domain: String,
}

impl UserAddress {
    /// 解析并规范化地址，本地部分和域名统一转为小写。
    pub fn parse(value: impl AsRef<str>) -> Result<Self, DomainError> {
        let value = value.as_ref().trim();
        let (local, domain) = value
            .split_once('@')
            .ok_or_else(|| DomainError::invalid_argument("user_address", "missing '@'"))?;
        if local.is_empty() {
            return Err(DomainError::invalid_argument(
                "user_address",
                "local part cannot be empty",
            ));
        }
        if domain.is_empty() {
            return Err(DomainError::invalid_argument(
                "user_address",
                "domain cannot be empty",
            ));
        }
        if value.len() > 1023 {
            return Err(DomainError::invalid_argument("user_address", "too long"));
        }
        Ok(Self {
            local: local.to_lowercase(),
            domain: domain.to_lowercase(),
        })
    }

    pub fn local(&self) -> &str {
        &self.local
    }

    pub fn domain(&self) -> &str {
        &self.domain
    }
}

impl fmt::Display for UserAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.local, self.domain)
    }
}

// 序列化为 "user@domain" 字符串，既保证外部化格式确定性，
// 也允许该类型作为 map 的键参与 JSON 编码。
impl Serialize for UserAddress {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for UserAddress {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        UserAddress::parse(&raw).map_err(serde::de::Error::custom)
    }
}

/// 房间地址：房间名 + 聊天服务域名，资源位可携带占位者昵称。
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RoomAddress {
    pub room_name: String,
    pub service_domain: String,
    pub nickname: Option<String>,
}

impl RoomAddress {
    pub fn new(room_name: impl Into<String>, service_domain: impl Into<String>) -> Self {
        Self {
            room_name: room_name.into(),
            service_domain: service_domain.into(),
            nickname: None,
        }
    }

    pub fn with_nickname(mut self, nickname: impl Into<String>) -> Self {
        self.nickname = Some(nickname.into());
        self
    }
}

impl fmt::Display for RoomAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.room_name, self.service_domain)?;
        if let Some(nickname) = &self.nickname {
            write!(f, "/{}", nickname)?;
        }
        Ok(())
    }
}

/// 长期隶属关系：用户与房间之间的关系，与当前是否在场无关。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Affiliation {
    Owner,
    Admin,
    Member,
    Outcast,
    None,
}

/// 会话级角色：占位者在场期间的权限级别。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Moderator,
    Participant,
    Visitor,
    None,
}
