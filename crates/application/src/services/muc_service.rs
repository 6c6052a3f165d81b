//! 多用户聊天服务
//!
//! 面向调用方的编排层：持有房间聚合，驱动占位者管理器，把本地
//! 变更广播到集群，并把持久房间写入仓储。业务规则全部在领域层
//! 裁决，这里只负责编排与横切关注点。
//!
//! 广播失败不会回滚本地变更：本地视图是权威的，远端视图靠
//! 全量同步任务最终修复。

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use tokio::sync::RwLock;

use domain::{
    Affiliation, ClusterTask, DomainError, HistoryPolicy, HistorySetting, NodeId, Role, Room,
    RoomMessage, RoomOccupant, UserAddress,
};

use crate::broadcaster::ClusterBroadcaster;
use crate::clock::Clock;
use crate::errors::{ApplicationError, ApplicationResult};
use crate::occupant_manager::OccupantManager;
use crate::repository::RoomRepository;

/// 服务的外部协作者，显式注入。
pub struct MucServiceDependencies {
    pub occupant_manager: Arc<OccupantManager>,
    pub broadcaster: Arc<dyn ClusterBroadcaster>,
    pub repository: Arc<dyn RoomRepository>,
    pub clock: Arc<dyn Clock>,
}

/// 一个聊天服务实例（对应一个服务域名）。
pub struct MucService {
    occupant_manager: Arc<OccupantManager>,
    broadcaster: Arc<dyn ClusterBroadcaster>,
    repository: Arc<dyn RoomRepository>,
    clock: Arc<dyn Clock>,
    /// 服务级历史默认值，房间的 Inherited 设置在读取时解析到它
    default_history: RwLock<HistoryPolicy>,
    rooms: RwLock<HashMap<String, Room>>,
    next_room_id: AtomicI64,
}

impl MucService {
    pub fn new(default_history: HistoryPolicy, dependencies: MucServiceDependencies) -> Self {
        Self {
            occupant_manager: dependencies.occupant_manager,
            broadcaster: dependencies.broadcaster,
            repository: dependencies.repository,
            clock: dependencies.clock,
            default_history: RwLock::new(default_history),
            rooms: RwLock::new(HashMap::new()),
            next_room_id: AtomicI64::new(1),
        }
    }

    pub fn service_name(&self) -> &str {
        self.occupant_manager.service_name()
    }

    pub fn local_node(&self) -> NodeId {
        self.occupant_manager.local_node()
    }

    pub fn occupant_manager(&self) -> &Arc<OccupantManager> {
        &self.occupant_manager
    }

    /// 服务级历史默认策略的当前值。
    pub async fn default_history(&self) -> HistoryPolicy {
        *self.default_history.read().await
    }

    /// 调整服务级历史默认策略。Inherited 的房间立即跟随新默认值。
    pub async fn set_history_defaults(&self, policy: HistoryPolicy) {
        tracing::info!(?policy, "更新服务级历史默认策略");
        *self.default_history.write().await = policy;
    }

    /// 创建房间，创建者登记为第一个 owner。房间名在服务内唯一。
    pub async fn create_room(
        &self,
        name: &str,
        creator: &UserAddress,
    ) -> ApplicationResult<Room> {
        let now = self.clock.now();
        let room_id = self.next_room_id.fetch_add(1, Ordering::Relaxed);
        let mut room = Room::new(room_id, name, self.occupant_manager.service_domain(), now)?;
        room.add_first_owner(creator);

        let mut rooms = self.rooms.write().await;
        if rooms.contains_key(&room.name) {
            return Err(DomainError::already_exists("room", &room.name).into());
        }
        tracing::info!(room = %room.name, creator = %creator, "创建房间");
        let snapshot = room.clone();
        rooms.insert(room.name.clone(), room);
        drop(rooms);

        self.persist_if_needed(&snapshot).await?;
        Ok(snapshot)
    }

    /// 房间快照。内存中没有时回退到仓储（持久房间的惰性装载）。
    pub async fn room(&self, room_name: &str) -> ApplicationResult<Option<Room>> {
        self.load_room_if_absent(room_name).await?;
        Ok(self.rooms.read().await.get(room_name).cloned())
    }

    /// 持久房间的惰性装载。所有按名取房间的操作都先经过这里，
    /// 进程重启后持久房间照常可用。
    async fn load_room_if_absent(&self, room_name: &str) -> ApplicationResult<()> {
        if self.rooms.read().await.contains_key(room_name) {
            return Ok(());
        }
        if let Some(room) = self.repository.load(room_name).await? {
            tracing::debug!(room = room_name, "从仓储装载持久房间");
            self.rooms
                .write()
                .await
                .entry(room.name.clone())
                .or_insert(room);
        }
        Ok(())
    }

    /// 加入房间。返回在场条目和按时间顺序排列的历史回放。
    ///
    /// 回放是加入时刻的快照：最旧的消息在前，主题消息（若有）
    /// 排在最后，与缓冲区的后续变化无关。
    pub async fn join_room(
        &self,
        room_name: &str,
        user: &UserAddress,
        nickname: &str,
        password: Option<&str>,
    ) -> ApplicationResult<(RoomOccupant, Vec<RoomMessage>)> {
        let now = self.clock.now();
        self.load_room_if_absent(room_name).await?;
        let (occupant, replay, snapshot) = {
            let mut rooms = self.rooms.write().await;
            let room = rooms
                .get_mut(room_name)
                .ok_or_else(|| ApplicationError::not_found(format!("房间 {room_name}")))?;
            let occupant = room.join(user, nickname, password, now)?;

            let mut replay: Vec<RoomMessage> = room.history.reverse_history();
            replay.reverse();
            if let Some(subject) = room.history.subject_message() {
                replay.push(subject.clone());
            }
            (occupant, replay, room.clone())
        };

        let task = self
            .occupant_manager
            .occupant_joined(room_name, user, &occupant.nickname)
            .await;
        self.broadcast(task).await;
        self.persist_if_needed(&snapshot).await?;
        Ok((occupant, replay))
    }

    /// 离开房间。对不在场的占位者是无害的空操作。
    pub async fn leave_room(
        &self,
        room_name: &str,
        user: &UserAddress,
        nickname: &str,
    ) -> ApplicationResult<()> {
        let now = self.clock.now();
        self.load_room_if_absent(room_name).await?;
        let (snapshot, canonical) = {
            let mut rooms = self.rooms.write().await;
            let room = rooms
                .get_mut(room_name)
                .ok_or_else(|| ApplicationError::not_found(format!("房间 {room_name}")))?;
            // 名册按大小写不敏感匹配，管理器的键是精确字符串，
            // 必须用名册中存储的写法注销，否则留下幽灵登记
            let canonical = room
                .occupants
                .iter()
                .find(|occupant| {
                    &occupant.user_address == user
                        && occupant.nickname.eq_ignore_ascii_case(nickname)
                })
                .map(|occupant| occupant.nickname.clone());
            room.leave(user, nickname, now);
            (room.clone(), canonical)
        };

        let nickname = canonical.as_deref().unwrap_or(nickname);
        let task = self
            .occupant_manager
            .occupant_left(room_name, user, nickname)
            .await;
        self.broadcast(task).await;
        self.persist_if_needed(&snapshot).await?;
        Ok(())
    }

    /// 占位者改名（不离开房间）。
    pub async fn change_nickname(
        &self,
        room_name: &str,
        user: &UserAddress,
        old_nickname: &str,
        new_nickname: &str,
    ) -> ApplicationResult<()> {
        self.load_room_if_absent(room_name).await?;
        let (old_nickname, new_nickname) = {
            let mut rooms = self.rooms.write().await;
            let room = rooms
                .get_mut(room_name)
                .ok_or_else(|| ApplicationError::not_found(format!("房间 {room_name}")))?;
            // 管理器的键必须与名册中存储的写法一致：旧昵称取登记时的
            // 原样，新昵称取校验并修剪后的结果
            let old_canonical = room
                .occupants
                .iter()
                .find(|occupant| {
                    &occupant.user_address == user
                        && occupant.nickname.eq_ignore_ascii_case(old_nickname)
                })
                .map(|occupant| occupant.nickname.clone())
                .ok_or_else(|| DomainError::not_found("occupant", old_nickname))?;
            room.change_nickname(user, old_nickname, new_nickname)?;
            let new_canonical = room
                .occupants
                .iter()
                .find(|occupant| {
                    &occupant.user_address == user
                        && occupant.nickname.eq_ignore_ascii_case(new_nickname.trim())
                })
                .map(|occupant| occupant.nickname.clone())
                .ok_or_else(|| DomainError::not_found("occupant", new_nickname))?;
            (old_canonical, new_canonical)
        };

        let task = self
            .occupant_manager
            .nickname_changed(room_name, user, &old_nickname, &new_nickname)
            .await;
        self.broadcast(task).await;
        Ok(())
    }

    /// 发送聊天消息。消息进入历史缓冲区并刷新发送者的活跃时间。
    pub async fn send_message(
        &self,
        room_name: &str,
        sender_nickname: &str,
        body: &str,
    ) -> ApplicationResult<RoomMessage> {
        let now = self.clock.now();
        let default = self.default_history().await;
        self.load_room_if_absent(room_name).await?;
        let (message, sender, snapshot) = {
            let mut rooms = self.rooms.write().await;
            let room = rooms
                .get_mut(room_name)
                .ok_or_else(|| ApplicationError::not_found(format!("房间 {room_name}")))?;
            if room.is_destroyed() {
                return Err(DomainError::room_destroyed(&room.name).into());
            }
            let sender = room
                .occupants
                .iter()
                .find(|occupant| occupant.nickname.eq_ignore_ascii_case(sender_nickname))
                .cloned()
                .ok_or_else(|| DomainError::not_found("occupant", sender_nickname))?;
            let from = room.address().with_nickname(&sender.nickname);
            let message = RoomMessage::chat(from, body, now);
            room.add_history_message(message.clone(), &default);
            (message, sender, room.clone())
        };

        self.occupant_manager
            .register_activity(&sender.user_address)
            .await;
        self.persist_if_needed(&snapshot).await?;
        Ok(message)
    }

    /// 变更房间主题。主题开放时任何在场者可改，否则仅限主持人。
    pub async fn change_subject(
        &self,
        room_name: &str,
        actor_nickname: &str,
        subject: &str,
    ) -> ApplicationResult<RoomMessage> {
        let now = self.clock.now();
        let default = self.default_history().await;
        self.load_room_if_absent(room_name).await?;
        let (message, snapshot) = {
            let mut rooms = self.rooms.write().await;
            let room = rooms
                .get_mut(room_name)
                .ok_or_else(|| ApplicationError::not_found(format!("房间 {room_name}")))?;
            let actor = room
                .occupants
                .iter()
                .find(|occupant| occupant.nickname.eq_ignore_ascii_case(actor_nickname))
                .ok_or_else(|| DomainError::not_found("occupant", actor_nickname))?;
            if !room.occupants_can_change_subject && actor.role != Role::Moderator {
                return Err(DomainError::not_allowed("仅主持人可以修改房间主题").into());
            }
            let message = room.change_subject(subject, Some(actor_nickname), now, &default)?;
            (message, room.clone())
        };
        self.persist_if_needed(&snapshot).await?;
        Ok(message)
    }

    /// 变更目标用户的隶属关系与角色，经权限规则裁决。
    pub async fn change_affiliation(
        &self,
        room_name: &str,
        actor: &UserAddress,
        target: &UserAddress,
        new_affiliation: Affiliation,
        new_role: Role,
    ) -> ApplicationResult<Vec<RoomOccupant>> {
        let now = self.clock.now();
        self.load_room_if_absent(room_name).await?;
        let (updated, snapshot) = {
            let mut rooms = self.rooms.write().await;
            let room = rooms
                .get_mut(room_name)
                .ok_or_else(|| ApplicationError::not_found(format!("房间 {room_name}")))?;
            let actor_affiliation = room.affiliation_of(actor);
            let actor_role = room
                .occupants
                .iter()
                .find(|occupant| &occupant.user_address == actor)
                .map(|occupant| occupant.role)
                .unwrap_or(Role::None);
            let updated = room.change_affiliation_and_role(
                actor_affiliation,
                actor_role,
                target,
                new_affiliation,
                new_role,
                now,
            )?;
            (updated, room.clone())
        };
        self.persist_if_needed(&snapshot).await?;
        Ok(updated)
    }

    /// 调整单个房间的历史设置。
    pub async fn set_room_history(
        &self,
        room_name: &str,
        setting: HistorySetting,
    ) -> ApplicationResult<()> {
        let default = self.default_history().await;
        self.load_room_if_absent(room_name).await?;
        let mut rooms = self.rooms.write().await;
        let room = rooms
            .get_mut(room_name)
            .ok_or_else(|| ApplicationError::not_found(format!("房间 {room_name}")))?;
        room.history.set_setting(setting, &default);
        Ok(())
    }

    /// 锁定房间，等待配置完成。锁定期间仅 owner 可加入。
    pub async fn lock_room(&self, room_name: &str) -> ApplicationResult<()> {
        let now = self.clock.now();
        self.load_room_if_absent(room_name).await?;
        let mut rooms = self.rooms.write().await;
        let room = rooms
            .get_mut(room_name)
            .ok_or_else(|| ApplicationError::not_found(format!("房间 {room_name}")))?;
        room.lock(now)?;
        Ok(())
    }

    /// 配置完成后解锁。
    pub async fn unlock_room(&self, room_name: &str) -> ApplicationResult<()> {
        let now = self.clock.now();
        self.load_room_if_absent(room_name).await?;
        let mut rooms = self.rooms.write().await;
        let room = rooms
            .get_mut(room_name)
            .ok_or_else(|| ApplicationError::not_found(format!("房间 {room_name}")))?;
        room.unlock(now)?;
        Ok(())
    }

    /// 销毁房间。终态：本地占位者的移除任务广播给集群，
    /// 剩余（远端）登记一并清理，持久记录删除。
    pub async fn destroy_room(&self, room_name: &str) -> ApplicationResult<()> {
        let now = self.clock.now();
        self.load_room_if_absent(room_name).await?;
        let (persistent, evicted) = {
            let mut rooms = self.rooms.write().await;
            let room = rooms
                .get_mut(room_name)
                .ok_or_else(|| ApplicationError::not_found(format!("房间 {room_name}")))?;
            let evicted: Vec<(UserAddress, String)> = room
                .occupants
                .iter()
                .map(|occupant| (occupant.user_address.clone(), occupant.nickname.clone()))
                .collect();
            room.destroy(now);
            (room.persistent, evicted)
        };
        tracing::info!(room = room_name, evicted = evicted.len(), "销毁房间");

        for (user, nickname) in evicted {
            let task = self
                .occupant_manager
                .occupant_left(room_name, &user, &nickname)
                .await;
            self.broadcast(task).await;
        }
        self.occupant_manager.room_destroyed(room_name).await;
        if persistent {
            self.repository.delete(room_name).await?;
        }
        Ok(())
    }

    /// 为用户登记一次活动。
    pub async fn register_activity(&self, user: &UserAddress) {
        self.occupant_manager.register_activity(user).await;
    }

    /// 应用一条来自集群的复制任务。自己广播出去的任务原样回流
    /// 时直接丢弃，避免重复登记。
    pub async fn apply_cluster_task(&self, task: &ClusterTask) {
        if task.origin() == self.local_node() {
            tracing::debug!("忽略回流的本节点任务");
            return;
        }
        self.occupant_manager.apply(task).await;
    }

    /// 本节点全量登记的同步任务，广播给新加入集群的节点。
    pub async fn broadcast_sync(&self) {
        let task = self.occupant_manager.sync_task().await;
        self.broadcast(task).await;
    }

    /// 某节点退出集群后清理其登记。
    pub async fn node_left_cluster(&self, node: NodeId) {
        let removed = self.occupant_manager.left_cluster(node).await;
        tracing::info!(node = %node, count = removed.len(), "清理离开节点的占位者登记");
    }

    /// 把房间聚合外部化为 JSON，供故障转移时整状态迁移。
    /// 往返必须整体成功，失败时不产出部分结果。
    pub async fn export_room(&self, room_name: &str) -> ApplicationResult<String> {
        self.load_room_if_absent(room_name).await?;
        let rooms = self.rooms.read().await;
        let room = rooms
            .get(room_name)
            .ok_or_else(|| ApplicationError::not_found(format!("房间 {room_name}")))?;
        serde_json::to_string(room)
            .map_err(|error| ApplicationError::serialization(error.to_string()))
    }

    /// 从外部化的 JSON 重建房间聚合并接管。
    pub async fn import_room(&self, encoded: &str) -> ApplicationResult<Room> {
        let room: Room = serde_json::from_str(encoded)
            .map_err(|error| ApplicationError::serialization(error.to_string()))?;
        tracing::info!(room = %room.name, "从外部化状态接管房间");
        let snapshot = room.clone();
        self.rooms.write().await.insert(room.name.clone(), room);
        self.persist_if_needed(&snapshot).await?;
        Ok(snapshot)
    }

    async fn persist_if_needed(&self, room: &Room) -> ApplicationResult<()> {
        if room.persistent {
            self.repository.save(room).await?;
        }
        Ok(())
    }

    async fn broadcast(&self, task: ClusterTask) {
        if let Err(error) = self.broadcaster.broadcast(task).await {
            // 本地状态已提交，远端视图靠全量同步修复
            tracing::warn!(%error, "集群广播失败");
        }
    }
}
