use async_trait::async_trait;
use domain::Room;

use crate::errors::ApplicationError;

/// 持久房间的外部存储抽象。键为房间名（服务内唯一）。
#[async_trait]
pub trait RoomRepository: Send + Sync {
    async fn save(&self, room: &Room) -> Result<(), ApplicationError>;
    async fn load(&self, room_name: &str) -> Result<Option<Room>, ApplicationError>;
    async fn delete(&self, room_name: &str) -> Result<(), ApplicationError>;
}
