//! 内存房间仓储

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use application::errors::ApplicationError;
use application::RoomRepository;
use domain::Room;

/// 以房间名为键的内存仓储，进程重启后丢失。
#[derive(Default)]
pub struct InMemoryRoomRepository {
    rooms: RwLock<HashMap<String, Room>>,
}

impl InMemoryRoomRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RoomRepository for InMemoryRoomRepository {
    async fn save(&self, room: &Room) -> Result<(), ApplicationError> {
        tracing::debug!(room = %room.name, "保存房间");
        self.rooms
            .write()
            .await
            .insert(room.name.clone(), room.clone());
        Ok(())
    }

    async fn load(&self, room_name: &str) -> Result<Option<Room>, ApplicationError> {
        Ok(self.rooms.read().await.get(room_name).cloned())
    }

    async fn delete(&self, room_name: &str) -> Result<(), ApplicationError> {
        self.rooms.write().await.remove(room_name);
        Ok(())
    }
}
