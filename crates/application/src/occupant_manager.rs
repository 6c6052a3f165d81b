//! 占位者管理器
//!
//! 维护"谁在哪个房间"的本节点权威视图，覆盖整个集群：本地的
//! 加入/离开直接登记，远端节点的变化通过复制任务对账。管理器
//! 本身只做登记；向其余节点广播任务由调用方负责。
//!
//! 三张索引表必须始终互相一致：`node_by_occupant` 中的每个键
//! 恰好出现在 `occupants_by_node` 的一个桶里，本地节点名下的
//! 键集合等于 `local_occupants` 的键集合。所有变更都在同一把
//! 写锁内完成，读取方得到的是调用时刻的快照副本。

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::RwLock;

use domain::{ClusterTask, NodeId, Occupant, OccupantKey, Timestamp, UserAddress};

use crate::clock::Clock;

#[derive(Default)]
struct OccupantTables {
    /// 本节点拥有的占位者记录（含最近活跃时间）
    local_occupants: HashMap<OccupantKey, Occupant>,
    /// 占位者 -> 拥有它的集群节点（本地与远端一并覆盖）
    node_by_occupant: HashMap<OccupantKey, NodeId>,
    /// 节点 -> 它拥有的占位者集合（上表的反向索引）
    occupants_by_node: HashMap<NodeId, HashSet<OccupantKey>>,
}

impl OccupantTables {
    /// 把占位者登记到指定节点名下。重复登记是空操作；
    /// 该键已属于其他节点时按到达顺序后写胜出，迁移归属。
    fn register(&mut self, key: OccupantKey, node: NodeId, local_node: NodeId, now: Timestamp) {
        if let Some(owner) = self.node_by_occupant.get(&key).copied() {
            if owner == node {
                tracing::debug!(occupant = %key.nickname, room = %key.room_name, "占位者已登记，忽略重复任务");
                return;
            }
            tracing::debug!(
                occupant = %key.nickname,
                room = %key.room_name,
                old_node = %owner,
                new_node = %node,
                "占位者归属冲突，按后写胜出迁移"
            );
            self.unregister(&key);
        }

        self.node_by_occupant.insert(key.clone(), node);
        self.occupants_by_node
            .entry(node)
            .or_default()
            .insert(key.clone());
        if node == local_node {
            self.local_occupants
                .entry(key.clone())
                .or_insert_with(|| Occupant::new(key, now));
        }
    }

    /// 移除一条登记，三张表同步清理，不留空桶。
    /// 键不存在时为空操作。
    fn unregister(&mut self, key: &OccupantKey) {
        if let Some(owner) = self.node_by_occupant.remove(key) {
            if let Some(bucket) = self.occupants_by_node.get_mut(&owner) {
                bucket.remove(key);
                if bucket.is_empty() {
                    self.occupants_by_node.remove(&owner);
                }
            }
        }
        self.local_occupants.remove(key);
    }
}

/// 每个聊天服务一个实例，通过显式依赖注入构造。
pub struct OccupantManager {
    service_name: String,
    service_domain: String,
    local_node: NodeId,
    clock: Arc<dyn Clock>,
    tables: RwLock<OccupantTables>,
}

impl OccupantManager {
    pub fn new(
        service_name: impl Into<String>,
        service_domain: impl Into<String>,
        local_node: NodeId,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let service_name = service_name.into();
        tracing::debug!(service = %service_name, node = %local_node, "创建占位者管理器");
        Self {
            service_name,
            service_domain: service_domain.into(),
            local_node,
            clock,
            tables: RwLock::new(OccupantTables::default()),
        }
    }

    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    pub fn service_domain(&self) -> &str {
        &self.service_domain
    }

    pub fn local_node(&self) -> NodeId {
        self.local_node
    }

    /// 本地占位者加入。登记本地记录并返回应广播给其余节点的任务。
    pub async fn occupant_joined(
        &self,
        room_name: &str,
        user: &UserAddress,
        nickname: &str,
    ) -> ClusterTask {
        tracing::debug!(
            room = room_name,
            user = %user,
            nickname = nickname,
            service = %self.service_name,
            "本地占位者加入"
        );
        let task = ClusterTask::occupant_added(
            &self.service_name,
            room_name,
            nickname,
            user.clone(),
            self.local_node,
        );
        self.apply(&task).await;
        task
    }

    /// 本地占位者离开。没有匹配记录时不报错。
    pub async fn occupant_left(
        &self,
        room_name: &str,
        user: &UserAddress,
        nickname: &str,
    ) -> ClusterTask {
        tracing::debug!(
            room = room_name,
            user = %user,
            nickname = nickname,
            service = %self.service_name,
            "本地占位者离开"
        );
        let task = ClusterTask::occupant_removed(
            &self.service_name,
            room_name,
            nickname,
            user.clone(),
            self.local_node,
        );
        self.apply(&task).await;
        task
    }

    /// 本地占位者改名（未离开房间）。
    pub async fn nickname_changed(
        &self,
        room_name: &str,
        user: &UserAddress,
        old_nickname: &str,
        new_nickname: &str,
    ) -> ClusterTask {
        let task = ClusterTask::occupant_updated(
            &self.service_name,
            room_name,
            old_nickname,
            new_nickname,
            user.clone(),
            self.local_node,
        );
        self.apply(&task).await;
        task
    }

    /// 应用一条复制任务。集群传输只保证至少一次投递，
    /// 因此重复或格式不符的任务都被静默吸收，绝不抛出。
    pub async fn apply(&self, task: &ClusterTask) {
        if task.service_name() != self.service_name {
            tracing::debug!(
                expected = %self.service_name,
                actual = task.service_name(),
                "任务属于其他聊天服务，忽略"
            );
            return;
        }

        let now = self.clock.now();
        match task {
            ClusterTask::OccupantAdded {
                room_name,
                nickname,
                user_address,
                origin,
                ..
            } => {
                let key = OccupantKey::new(room_name, user_address.clone(), nickname);
                let mut tables = self.tables.write().await;
                tables.register(key, *origin, self.local_node, now);
            }
            ClusterTask::OccupantRemoved {
                room_name,
                nickname,
                user_address,
                origin,
                ..
            } => {
                let key = OccupantKey::new(room_name, user_address.clone(), nickname);
                let mut tables = self.tables.write().await;
                if let Some(owner) = tables.node_by_occupant.get(&key) {
                    if owner != origin {
                        tracing::debug!(
                            occupant = nickname,
                            owner = %owner,
                            origin = %origin,
                            "移除任务的来源与登记归属不一致，按后写胜出移除"
                        );
                    }
                }
                tables.unregister(&key);
            }
            ClusterTask::OccupantUpdated {
                room_name,
                old_nickname,
                new_nickname,
                user_address,
                origin,
                ..
            } => {
                let old_key = OccupantKey::new(room_name, user_address.clone(), old_nickname);
                let new_key = old_key.with_nickname(new_nickname);
                let mut tables = self.tables.write().await;
                // 保留本地记录的活跃时间，改名不算一次活动
                let previous = tables.local_occupants.remove(&old_key);
                tables.unregister(&old_key);
                tables.register(new_key.clone(), *origin, self.local_node, now);
                if let (Some(previous), Some(entry)) =
                    (previous, tables.local_occupants.get_mut(&new_key))
                {
                    entry.last_active = previous.last_active;
                }
            }
            ClusterTask::SyncOccupants {
                origin, occupants, ..
            } => {
                if *origin == self.local_node {
                    tracing::debug!("忽略来自本节点的全量同步任务");
                    return;
                }
                let mut tables = self.tables.write().await;
                let stale: Vec<OccupantKey> = tables
                    .occupants_by_node
                    .get(origin)
                    .map(|bucket| bucket.iter().cloned().collect())
                    .unwrap_or_default();
                tracing::debug!(
                    origin = %origin,
                    old = stale.len(),
                    new = occupants.len(),
                    "应用全量同步，替换该节点的全部登记"
                );
                for key in stale {
                    tables.unregister(&key);
                }
                for occupant in occupants {
                    tables.register(occupant.key.clone(), *origin, self.local_node, now);
                }
            }
        }
    }

    /// 为某个用户登记一次活动，刷新其全部本地记录的活跃时间。
    /// 只跟踪本地节点：空闲检测只针对连接到本节点的用户。
    pub async fn register_activity(&self, user: &UserAddress) {
        let now = self.clock.now();
        let mut tables = self.tables.write().await;
        for occupant in tables
            .local_occupants
            .values_mut()
            .filter(|occupant| &occupant.key.user_address == user)
        {
            occupant.touch(now);
        }
    }

    /// 本地占位者记录的快照。
    pub async fn local_occupants(&self) -> Vec<Occupant> {
        self.tables
            .read()
            .await
            .local_occupants
            .values()
            .cloned()
            .collect()
    }

    /// 占位者 -> 节点索引的快照。
    pub async fn node_by_occupant(&self) -> HashMap<OccupantKey, NodeId> {
        self.tables.read().await.node_by_occupant.clone()
    }

    /// 节点 -> 占位者集合索引的快照。
    pub async fn occupants_by_node(&self) -> HashMap<NodeId, HashSet<OccupantKey>> {
        self.tables.read().await.occupants_by_node.clone()
    }

    /// 某用户当前在场的所有房间名（跨节点）。
    pub async fn room_names_for_address(&self, user: &UserAddress) -> BTreeSet<String> {
        self.tables
            .read()
            .await
            .node_by_occupant
            .keys()
            .filter(|key| &key.user_address == user)
            .map(|key| key.room_name.clone())
            .collect()
    }

    /// 某房间当前的全部占位者键（跨节点）。
    pub async fn occupants_for_room(&self, room_name: &str) -> Vec<OccupantKey> {
        self.tables
            .read()
            .await
            .node_by_occupant
            .keys()
            .filter(|key| key.room_name == room_name)
            .cloned()
            .collect()
    }

    /// 至少在一个房间里的去重用户数。
    pub async fn number_of_unique_users(&self) -> usize {
        self.tables
            .read()
            .await
            .node_by_occupant
            .keys()
            .map(|key| &key.user_address)
            .collect::<HashSet<_>>()
            .len()
    }

    pub async fn exists(&self, key: &OccupantKey) -> bool {
        self.tables.read().await.node_by_occupant.contains_key(key)
    }

    /// 某节点退出集群后，移除并返回它名下的全部登记。
    pub async fn left_cluster(&self, node: NodeId) -> Vec<OccupantKey> {
        let mut tables = self.tables.write().await;
        let removed: Vec<OccupantKey> = tables
            .occupants_by_node
            .get(&node)
            .map(|bucket| bucket.iter().cloned().collect())
            .unwrap_or_default();
        for key in &removed {
            tables.unregister(key);
        }
        tracing::debug!(node = %node, count = removed.len(), "节点离开集群，清理其占位者登记");
        removed
    }

    /// 房间销毁后，移除该房间的全部登记（不分节点）。
    pub async fn room_destroyed(&self, room_name: &str) {
        let mut tables = self.tables.write().await;
        let keys: Vec<OccupantKey> = tables
            .node_by_occupant
            .keys()
            .filter(|key| key.room_name == room_name)
            .cloned()
            .collect();
        for key in keys {
            tables.unregister(&key);
        }
    }

    /// 本地登记的全量快照任务，供新加入集群的节点对账。
    pub async fn sync_task(&self) -> ClusterTask {
        ClusterTask::SyncOccupants {
            service_name: self.service_name.clone(),
            origin: self.local_node,
            occupants: self.local_occupants().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;

    fn manager() -> OccupantManager {
        OccupantManager::new(
            "conference",
            "conference.example.com",
            NodeId::random(),
            Arc::new(SystemClock),
        )
    }

    fn address(raw: &str) -> UserAddress {
        UserAddress::parse(raw).unwrap()
    }

    async fn assert_indices_consistent(manager: &OccupantManager) {
        let node_by_occupant = manager.node_by_occupant().await;
        let occupants_by_node = manager.occupants_by_node().await;

        let bucket_total: usize = occupants_by_node.values().map(|bucket| bucket.len()).sum();
        assert_eq!(node_by_occupant.len(), bucket_total);

        for (key, node) in &node_by_occupant {
            assert!(occupants_by_node[node].contains(key));
        }

        let local: HashSet<OccupantKey> = manager
            .local_occupants()
            .await
            .into_iter()
            .map(|occupant| occupant.key)
            .collect();
        let local_in_index: HashSet<OccupantKey> = occupants_by_node
            .get(&manager.local_node())
            .cloned()
            .unwrap_or_default();
        assert_eq!(local, local_in_index);
    }

    #[tokio::test]
    async fn test_local_join_registers_under_local_node() {
        let manager = manager();
        let alice = address("alice@example.com");

        let task = manager.occupant_joined("lobby", &alice, "Alice").await;
        assert_eq!(task.origin(), manager.local_node());

        let locals = manager.local_occupants().await;
        assert_eq!(locals.len(), 1);
        assert_eq!(locals[0].key.nickname, "Alice");
        assert_indices_consistent(&manager).await;
    }

    #[tokio::test]
    async fn test_duplicate_local_join_keeps_single_record() {
        let manager = manager();
        let alice = address("alice@example.com");

        manager.occupant_joined("lobby", &alice, "Alice").await;
        manager.occupant_joined("lobby", &alice, "Alice").await;

        assert_eq!(manager.local_occupants().await.len(), 1);
        assert_eq!(manager.node_by_occupant().await.len(), 1);
        assert_indices_consistent(&manager).await;
    }

    #[tokio::test]
    async fn test_remote_add_is_idempotent() {
        let manager = manager();
        let remote = NodeId::random();
        let task = ClusterTask::occupant_added(
            "conference",
            "lobby",
            "Bob",
            address("bob@example.org"),
            remote,
        );

        manager.apply(&task).await;
        let first = manager.node_by_occupant().await;
        manager.apply(&task).await;
        let second = manager.node_by_occupant().await;

        assert_eq!(first, second);
        assert_eq!(second.len(), 1);
        assert!(manager.local_occupants().await.is_empty());
        assert_indices_consistent(&manager).await;
    }

    #[tokio::test]
    async fn test_removing_unknown_occupant_is_a_noop() {
        let manager = manager();
        let task = ClusterTask::occupant_removed(
            "conference",
            "lobby",
            "Ghost",
            address("ghost@example.org"),
            NodeId::random(),
        );
        manager.apply(&task).await;
        assert!(manager.node_by_occupant().await.is_empty());
        assert_indices_consistent(&manager).await;
    }

    #[tokio::test]
    async fn test_removed_after_added_wins() {
        let manager = manager();
        let remote = NodeId::random();
        let bob = address("bob@example.org");

        let added = ClusterTask::occupant_added("conference", "lobby", "Bob", bob.clone(), remote);
        let removed =
            ClusterTask::occupant_removed("conference", "lobby", "Bob", bob.clone(), remote);

        manager.apply(&added).await;
        manager.apply(&removed).await;
        assert!(manager.node_by_occupant().await.is_empty());

        // 反向顺序：后到的 Added 胜出
        manager.apply(&removed).await;
        manager.apply(&added).await;
        assert_eq!(manager.node_by_occupant().await.len(), 1);
        assert_indices_consistent(&manager).await;
    }

    #[tokio::test]
    async fn test_conflicting_add_moves_ownership() {
        let manager = manager();
        let node_a = NodeId::random();
        let node_b = NodeId::random();
        let bob = address("bob@example.org");

        manager
            .apply(&ClusterTask::occupant_added(
                "conference",
                "lobby",
                "Bob",
                bob.clone(),
                node_a,
            ))
            .await;
        manager
            .apply(&ClusterTask::occupant_added(
                "conference",
                "lobby",
                "Bob",
                bob.clone(),
                node_b,
            ))
            .await;

        let node_by_occupant = manager.node_by_occupant().await;
        assert_eq!(node_by_occupant.len(), 1);
        let key = OccupantKey::new("lobby", bob, "Bob");
        assert_eq!(node_by_occupant[&key], node_b);
        assert!(!manager.occupants_by_node().await.contains_key(&node_a));
        assert_indices_consistent(&manager).await;
    }

    #[tokio::test]
    async fn test_task_for_other_service_is_ignored() {
        let manager = manager();
        let task = ClusterTask::occupant_added(
            "other-service",
            "lobby",
            "Bob",
            address("bob@example.org"),
            NodeId::random(),
        );
        manager.apply(&task).await;
        assert!(manager.node_by_occupant().await.is_empty());
    }

    #[tokio::test]
    async fn test_nickname_change_preserves_last_active() {
        let manager = manager();
        let alice = address("alice@example.com");
        manager.occupant_joined("lobby", &alice, "Alice").await;
        let before = manager.local_occupants().await[0].clone();

        manager
            .nickname_changed("lobby", &alice, "Alice", "Alicia")
            .await;

        let locals = manager.local_occupants().await;
        assert_eq!(locals.len(), 1);
        assert_eq!(locals[0].key.nickname, "Alicia");
        assert_eq!(locals[0].last_active, before.last_active);
        assert_indices_consistent(&manager).await;
    }

    #[tokio::test]
    async fn test_register_activity_is_monotonic() {
        let manager = manager();
        let alice = address("alice@example.com");
        manager.occupant_joined("lobby", &alice, "Alice").await;
        manager.occupant_joined("games", &alice, "Alice").await;
        manager
            .occupant_joined("lobby", &address("bob@example.org"), "Bob")
            .await;

        let before: HashMap<OccupantKey, Timestamp> = manager
            .local_occupants()
            .await
            .into_iter()
            .map(|occupant| (occupant.key.clone(), occupant.last_active))
            .collect();

        manager.register_activity(&alice).await;

        for occupant in manager.local_occupants().await {
            let earlier = before[&occupant.key];
            if occupant.key.user_address == alice {
                assert!(occupant.last_active >= earlier);
            } else {
                assert_eq!(occupant.last_active, earlier);
            }
        }
    }

    #[tokio::test]
    async fn test_room_names_and_unique_users() {
        let manager = manager();
        let alice = address("alice@example.com");
        manager.occupant_joined("lobby", &alice, "Alice").await;
        manager.occupant_joined("games", &alice, "Player1").await;
        manager
            .apply(&ClusterTask::occupant_added(
                "conference",
                "lobby",
                "Bob",
                address("bob@example.org"),
                NodeId::random(),
            ))
            .await;

        let rooms = manager.room_names_for_address(&alice).await;
        assert_eq!(
            rooms.into_iter().collect::<Vec<_>>(),
            vec!["games".to_string(), "lobby".to_string()]
        );
        assert_eq!(manager.number_of_unique_users().await, 2);
        assert_eq!(manager.occupants_for_room("lobby").await.len(), 2);
    }

    #[tokio::test]
    async fn test_sync_replaces_node_registrations() {
        let manager = manager();
        let remote = NodeId::random();
        manager
            .apply(&ClusterTask::occupant_added(
                "conference",
                "lobby",
                "Old",
                address("old@example.org"),
                remote,
            ))
            .await;

        let now = SystemClock.now();
        let sync = ClusterTask::SyncOccupants {
            service_name: "conference".to_string(),
            origin: remote,
            occupants: vec![
                Occupant::new(
                    OccupantKey::new("lobby", address("new@example.org"), "New"),
                    now,
                ),
                Occupant::new(
                    OccupantKey::new("games", address("new@example.org"), "New"),
                    now,
                ),
            ],
        };
        manager.apply(&sync).await;
        // 重复投递同一份快照不改变状态
        manager.apply(&sync).await;

        let keys = manager.occupants_by_node().await[&remote].clone();
        assert_eq!(keys.len(), 2);
        assert!(!manager
            .exists(&OccupantKey::new("lobby", address("old@example.org"), "Old"))
            .await);
        assert_indices_consistent(&manager).await;
    }

    #[tokio::test]
    async fn test_left_cluster_removes_node_entries() {
        let manager = manager();
        let remote = NodeId::random();
        let alice = address("alice@example.com");
        manager.occupant_joined("lobby", &alice, "Alice").await;
        manager
            .apply(&ClusterTask::occupant_added(
                "conference",
                "lobby",
                "Bob",
                address("bob@example.org"),
                remote,
            ))
            .await;

        let removed = manager.left_cluster(remote).await;
        assert_eq!(removed.len(), 1);
        assert_eq!(manager.node_by_occupant().await.len(), 1);
        assert_eq!(manager.local_occupants().await.len(), 1);
        assert_indices_consistent(&manager).await;
    }

    #[tokio::test]
    async fn test_room_destroyed_clears_all_nodes() {
        let manager = manager();
        let alice = address("alice@example.com");
        manager.occupant_joined("lobby", &alice, "Alice").await;
        manager.occupant_joined("games", &alice, "Alice").await;
        manager
            .apply(&ClusterTask::occupant_added(
                "conference",
                "lobby",
                "Bob",
                address("bob@example.org"),
                NodeId::random(),
            ))
            .await;

        manager.room_destroyed("lobby").await;

        assert!(manager.occupants_for_room("lobby").await.is_empty());
        assert_eq!(manager.node_by_occupant().await.len(), 1);
        assert_indices_consistent(&manager).await;
    }
}
