//! 房间聚合
//!
//! 持有一个聊天室的全部状态：在场名单、隶属关系列表、配置与历史
//! 策略。所有变更操作先校验不变量再提交；隶属关系变更须先通过
//! 权限规则。聚合整体可序列化，供集群故障转移时整状态迁移。

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::errors::{DomainError, DomainResult};
use crate::history::{HistoryPolicy, HistoryStrategy, RoomMessage};
use crate::privileges::is_privileged_to_change_affiliation_and_role;
use crate::value_objects::{Affiliation, Role, RoomAddress, Timestamp, UserAddress};

/// 房间生命周期状态。`Destroyed` 为终态，序列化后仍然保留。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoomState {
    /// 刚创建，未锁定，尚无占位者
    Created,
    /// 等待配置完成，仅 owner 可进入
    Locked,
    /// 有占位者在场
    Active,
    /// 持久房间清空后的保留状态
    Empty,
    /// 已销毁，拒绝任何进一步变更
    Destroyed,
}

/// 在场名单中的一个占位者条目。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoomOccupant {
    pub user_address: UserAddress,
    pub nickname: String,
    pub affiliation: Affiliation,
    pub role: Role,
    pub joined_at: Timestamp,
}

/// 房间聚合。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Room {
    /// 持久化使用的数字标识
    pub room_id: i64,
    /// 房间名，在聊天服务内唯一
    pub name: String,
    /// 所属聊天服务的域名
    pub service_domain: String,
    /// 自然语言名称
    pub natural_name: String,
    pub description: String,
    pub state: RoomState,

    // 配置开关
    pub public_room: bool,
    pub persistent: bool,
    pub moderated: bool,
    pub members_only: bool,
    pub registration_enabled: bool,
    pub occupants_can_change_subject: bool,
    pub can_anyone_discover_jid: bool,
    pub login_restricted_to_nickname: bool,
    pub can_change_nickname: bool,
    pub log_enabled: bool,
    pub fmuc_enabled: bool,
    pub fmuc_outbound_node: Option<RoomAddress>,

    /// 并发占位者上限，0 表示不限
    pub max_users: u32,
    pub password: Option<String>,

    pub created_at: Timestamp,
    pub modified_at: Timestamp,
    /// 房间清空的时刻，用于外部的保留期回收
    pub empty_since: Option<Timestamp>,

    // 隶属关系列表：一个地址同一时刻至多出现在其中一个集合里
    pub owners: BTreeSet<UserAddress>,
    pub admins: BTreeSet<UserAddress>,
    /// 成员与其保留昵称
    pub members: BTreeMap<UserAddress, String>,
    pub outcasts: BTreeSet<UserAddress>,

    /// 当前在场名单（区别于隶属关系列表）
    pub occupants: Vec<RoomOccupant>,
    pub history: HistoryStrategy,
}

impl Room {
    pub fn new(
        room_id: i64,
        name: impl Into<String>,
        service_domain: impl Into<String>,
        now: Timestamp,
    ) -> DomainResult<Self> {
        let name = Self::validate_name(name.into())?;
        Ok(Self {
            room_id,
            natural_name: name.clone(),
            name,
            service_domain: service_domain.into(),
            description: String::new(),
            state: RoomState::Created,
            public_room: true,
            persistent: false,
            moderated: false,
            members_only: false,
            registration_enabled: true,
            occupants_can_change_subject: false,
            can_anyone_discover_jid: false,
            login_restricted_to_nickname: false,
            can_change_nickname: true,
            log_enabled: false,
            fmuc_enabled: false,
            fmuc_outbound_node: None,
            max_users: 30,
            password: None,
            created_at: now,
            modified_at: now,
            empty_since: None,
            owners: BTreeSet::new(),
            admins: BTreeSet::new(),
            members: BTreeMap::new(),
            outcasts: BTreeSet::new(),
            occupants: Vec::new(),
            history: HistoryStrategy::inherited(),
        })
    }

    /// 房间自身的地址。
    pub fn address(&self) -> RoomAddress {
        RoomAddress::new(self.name.clone(), self.service_domain.clone())
    }

    pub fn is_destroyed(&self) -> bool {
        self.state == RoomState::Destroyed
    }

    pub fn is_locked(&self) -> bool {
        self.state == RoomState::Locked
    }

    fn ensure_not_destroyed(&self) -> DomainResult<()> {
        if self.is_destroyed() {
            return Err(DomainError::room_destroyed(&self.name));
        }
        Ok(())
    }

    /// 查询用户的长期隶属关系。
    pub fn affiliation_of(&self, user: &UserAddress) -> Affiliation {
        if self.owners.contains(user) {
            Affiliation::Owner
        } else if self.admins.contains(user) {
            Affiliation::Admin
        } else if self.members.contains_key(user) {
            Affiliation::Member
        } else if self.outcasts.contains(user) {
            Affiliation::Outcast
        } else {
            Affiliation::None
        }
    }

    /// 将用户移入指定的隶属关系集合，同时从其余集合中移除，
    /// 维持互斥不变量。
    fn set_affiliation_lists(
        &mut self,
        user: &UserAddress,
        affiliation: Affiliation,
        reserved_nickname: Option<String>,
    ) {
        let previous_reserved = self.members.remove(user);
        self.owners.remove(user);
        self.admins.remove(user);
        self.outcasts.remove(user);

        match affiliation {
            Affiliation::Owner => {
                self.owners.insert(user.clone());
            }
            Affiliation::Admin => {
                self.admins.insert(user.clone());
            }
            Affiliation::Member => {
                let nickname = reserved_nickname
                    .or(previous_reserved)
                    .or_else(|| {
                        self.occupants
                            .iter()
                            .find(|occupant| &occupant.user_address == user)
                            .map(|occupant| occupant.nickname.clone())
                    })
                    .unwrap_or_else(|| user.local().to_string());
                self.members.insert(user.clone(), nickname);
            }
            Affiliation::Outcast => {
                self.outcasts.insert(user.clone());
            }
            Affiliation::None => {}
        }
    }

    /// 房间创建时登记第一个 owner。
    pub fn add_first_owner(&mut self, user: &UserAddress) {
        self.set_affiliation_lists(user, Affiliation::Owner, None);
    }

    fn default_role_for(&self, affiliation: Affiliation) -> Role {
        match affiliation {
            Affiliation::Owner | Affiliation::Admin => Role::Moderator,
            Affiliation::Member => Role::Participant,
            _ if self.moderated => Role::Visitor,
            _ => Role::Participant,
        }
    }

    fn occupant_by_nickname(&self, nickname: &str) -> Option<&RoomOccupant> {
        self.occupants
            .iter()
            .find(|occupant| occupant.nickname.eq_ignore_ascii_case(nickname))
    }

    /// 用户是否已以该昵称在场。
    pub fn already_joined_with_nickname(&self, user: &UserAddress, nickname: &str) -> bool {
        self.occupants.iter().any(|occupant| {
            &occupant.user_address == user && occupant.nickname.eq_ignore_ascii_case(nickname)
        })
    }

    /// 占位者加入。按序校验全部前置条件，任何一条不满足都在
    /// 变更前拒绝。同一用户携带同一昵称重复加入是无害的空操作，
    /// 直接返回既有条目。
    pub fn join(
        &mut self,
        user: &UserAddress,
        nickname: &str,
        password: Option<&str>,
        now: Timestamp,
    ) -> DomainResult<RoomOccupant> {
        self.ensure_not_destroyed()?;
        let nickname = Self::validate_nickname(nickname)?;
        let affiliation = self.affiliation_of(user);

        if self.already_joined_with_nickname(user, &nickname) {
            // 键级别的重复加入：返回既有条目，不产生新记录
            return self
                .occupant_by_nickname(&nickname)
                .cloned()
                .ok_or_else(|| DomainError::not_found("occupant", nickname));
        }

        self.check_join_max_occupants(affiliation)?;
        self.check_join_locked(affiliation)?;
        self.check_join_nickname_in_use(user, &nickname)?;
        self.check_join_password(password)?;
        self.check_join_reserved_nickname(user, &nickname)?;
        self.check_join_restricted_to_nickname(user, &nickname)?;
        self.check_join_outcast(affiliation)?;
        self.check_join_members_only(affiliation)?;

        let occupant = RoomOccupant {
            user_address: user.clone(),
            nickname,
            affiliation,
            role: self.default_role_for(affiliation),
            joined_at: now,
        };
        self.occupants.push(occupant.clone());
        self.state = RoomState::Active;
        self.empty_since = None;
        Ok(occupant)
    }

    fn check_join_max_occupants(&self, affiliation: Affiliation) -> DomainResult<()> {
        let exempt = matches!(affiliation, Affiliation::Owner | Affiliation::Admin);
        if self.max_users > 0 && !exempt && self.occupants.len() as u32 >= self.max_users {
            return Err(DomainError::MaxOccupantsReached {
                room: self.name.clone(),
                limit: self.max_users,
            });
        }
        Ok(())
    }

    fn check_join_locked(&self, affiliation: Affiliation) -> DomainResult<()> {
        if self.is_locked() && affiliation != Affiliation::Owner {
            return Err(DomainError::RoomLocked {
                room: self.name.clone(),
            });
        }
        Ok(())
    }

    fn check_join_nickname_in_use(&self, user: &UserAddress, nickname: &str) -> DomainResult<()> {
        if let Some(existing) = self.occupant_by_nickname(nickname) {
            if &existing.user_address != user {
                return Err(DomainError::already_exists("nickname", nickname));
            }
        }
        Ok(())
    }

    fn check_join_password(&self, password: Option<&str>) -> DomainResult<()> {
        if let Some(expected) = &self.password {
            if password != Some(expected.as_str()) {
                return Err(DomainError::Unauthorized {
                    room: self.name.clone(),
                });
            }
        }
        Ok(())
    }

    fn check_join_reserved_nickname(&self, user: &UserAddress, nickname: &str) -> DomainResult<()> {
        let reserved_by_other = self.members.iter().any(|(address, reserved)| {
            address != user && reserved.eq_ignore_ascii_case(nickname)
        });
        if reserved_by_other {
            return Err(DomainError::already_exists("reserved_nickname", nickname));
        }
        Ok(())
    }

    fn check_join_restricted_to_nickname(
        &self,
        user: &UserAddress,
        nickname: &str,
    ) -> DomainResult<()> {
        if !self.login_restricted_to_nickname {
            return Ok(());
        }
        match self.members.get(user) {
            Some(reserved) if reserved.eq_ignore_ascii_case(nickname) => Ok(()),
            _ => Err(DomainError::not_allowed(
                "房间要求使用保留昵称加入",
            )),
        }
    }

    fn check_join_outcast(&self, affiliation: Affiliation) -> DomainResult<()> {
        if affiliation == Affiliation::Outcast {
            return Err(DomainError::Banned {
                room: self.name.clone(),
            });
        }
        Ok(())
    }

    fn check_join_members_only(&self, affiliation: Affiliation) -> DomainResult<()> {
        let admitted = matches!(
            affiliation,
            Affiliation::Owner | Affiliation::Admin | Affiliation::Member
        );
        if self.members_only && !admitted {
            return Err(DomainError::RegistrationRequired {
                room: self.name.clone(),
            });
        }
        Ok(())
    }

    /// 占位者离开。没有匹配条目时为空操作，重复离开不报错。
    pub fn leave(&mut self, user: &UserAddress, nickname: &str, now: Timestamp) {
        let before = self.occupants.len();
        self.occupants.retain(|occupant| {
            !(&occupant.user_address == user && occupant.nickname.eq_ignore_ascii_case(nickname))
        });
        if self.occupants.len() != before && self.occupants.is_empty() && !self.is_destroyed() {
            self.state = RoomState::Empty;
            self.empty_since = Some(now);
        }
    }

    /// 占位者改名（不离开房间）。
    pub fn change_nickname(
        &mut self,
        user: &UserAddress,
        old_nickname: &str,
        new_nickname: &str,
    ) -> DomainResult<()> {
        self.ensure_not_destroyed()?;
        if !self.can_change_nickname {
            return Err(DomainError::not_allowed("房间不允许修改昵称"));
        }
        let new_nickname = Self::validate_nickname(new_nickname)?;
        if let Some(existing) = self.occupant_by_nickname(&new_nickname) {
            if &existing.user_address != user {
                return Err(DomainError::already_exists("nickname", new_nickname));
            }
        }
        let occupant = self
            .occupants
            .iter_mut()
            .find(|occupant| {
                &occupant.user_address == user
                    && occupant.nickname.eq_ignore_ascii_case(old_nickname)
            })
            .ok_or_else(|| DomainError::not_found("occupant", old_nickname))?;
        occupant.nickname = new_nickname;
        Ok(())
    }

    /// 构造主题变更消息。`subject` 元素始终存在（可为空串）、
    /// 没有正文；已知变更者昵称时置于 `from` 的资源位；给定
    /// 时间戳时附加毫秒精度的 UTC 延迟标注。
    pub fn subject_change_message(
        &self,
        subject: Option<&str>,
        author_nickname: Option<&str>,
        at: Option<Timestamp>,
    ) -> RoomMessage {
        let from = match author_nickname.filter(|nickname| !nickname.is_empty()) {
            Some(nickname) => self.address().with_nickname(nickname),
            None => self.address(),
        };
        RoomMessage {
            from,
            subject: Some(subject.unwrap_or_default().to_string()),
            body: None,
            delay_stamp: at,
        }
    }

    /// 变更房间主题，消息经由历史策略跟踪。
    pub fn change_subject(
        &mut self,
        subject: &str,
        author_nickname: Option<&str>,
        now: Timestamp,
        default: &HistoryPolicy,
    ) -> DomainResult<RoomMessage> {
        self.ensure_not_destroyed()?;
        let message = self.subject_change_message(Some(subject), author_nickname, Some(now));
        self.history.add_message(message.clone(), default);
        self.modified_at = now;
        Ok(message)
    }

    /// 当前主题。
    pub fn subject(&self) -> Option<&str> {
        self.history
            .subject_message()
            .and_then(|message| message.subject.as_deref())
    }

    /// 普通消息进入历史缓冲区。
    pub fn add_history_message(&mut self, message: RoomMessage, default: &HistoryPolicy) {
        self.history.add_message(message, default);
    }

    /// 经权限规则裁决后的隶属关系/角色变更。
    ///
    /// 返回受影响的在场条目（目标可能以多个昵称在场，或不在场）。
    pub fn change_affiliation_and_role(
        &mut self,
        actor_affiliation: Affiliation,
        actor_role: Role,
        target: &UserAddress,
        new_affiliation: Affiliation,
        new_role: Role,
        now: Timestamp,
    ) -> DomainResult<Vec<RoomOccupant>> {
        self.ensure_not_destroyed()?;
        let target_affiliation = self.affiliation_of(target);
        let target_role = self
            .occupants
            .iter()
            .find(|occupant| &occupant.user_address == target)
            .map(|occupant| occupant.role)
            .unwrap_or(Role::None);

        if !is_privileged_to_change_affiliation_and_role(
            actor_affiliation,
            actor_role,
            target_affiliation,
            target_role,
            new_affiliation,
            new_role,
        ) {
            return Err(DomainError::not_allowed(format!(
                "无权将 {target} 的隶属关系改为 {new_affiliation:?}"
            )));
        }

        self.set_affiliation_lists(target, new_affiliation, None);
        self.modified_at = now;

        let mut updated = Vec::new();
        for occupant in self
            .occupants
            .iter_mut()
            .filter(|occupant| &occupant.user_address == target)
        {
            occupant.affiliation = new_affiliation;
            occupant.role = new_role;
            updated.push(occupant.clone());
        }
        Ok(updated)
    }

    /// 锁定房间，等待配置完成。
    pub fn lock(&mut self, now: Timestamp) -> DomainResult<()> {
        self.ensure_not_destroyed()?;
        self.state = RoomState::Locked;
        self.modified_at = now;
        Ok(())
    }

    /// 配置完成后解锁。
    pub fn unlock(&mut self, now: Timestamp) -> DomainResult<()> {
        self.ensure_not_destroyed()?;
        if self.is_locked() {
            self.state = if self.occupants.is_empty() {
                RoomState::Created
            } else {
                RoomState::Active
            };
            self.modified_at = now;
        }
        Ok(())
    }

    /// 销毁房间。终态，幂等。
    pub fn destroy(&mut self, now: Timestamp) {
        if self.is_destroyed() {
            return;
        }
        self.occupants.clear();
        self.state = RoomState::Destroyed;
        self.empty_since = Some(now);
        self.modified_at = now;
    }

    fn validate_name(name: String) -> DomainResult<String> {
        let trimmed = name.trim();
        if trimmed.is_empty() {
            return Err(DomainError::invalid_argument("room_name", "cannot be empty"));
        }
        if trimmed.len() > 60 {
            return Err(DomainError::invalid_argument("room_name", "too long"));
        }
        Ok(trimmed.to_lowercase())
    }

    fn validate_nickname(nickname: &str) -> DomainResult<String> {
        let trimmed = nickname.trim();
        if trimmed.is_empty() {
            return Err(DomainError::invalid_argument("nickname", "cannot be empty"));
        }
        if trimmed.len() > 64 {
            return Err(DomainError::invalid_argument("nickname", "too long"));
        }
        Ok(trimmed.to_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::{HistoryRetention, HistorySetting};
    use chrono::{Duration, TimeZone, Utc};

    fn address(raw: &str) -> UserAddress {
        UserAddress::parse(raw).unwrap()
    }

    fn room() -> Room {
        Room::new(42, "lobby", "conference.example.com", Utc::now()).unwrap()
    }

    #[test]
    fn test_join_and_leave_lifecycle() {
        let now = Utc::now();
        let mut room = room();
        let alice = address("alice@example.com");

        let occupant = room.join(&alice, "Alice", None, now).unwrap();
        assert_eq!(occupant.role, Role::Participant);
        assert_eq!(room.state, RoomState::Active);

        room.leave(&alice, "alice", now + Duration::seconds(1));
        assert!(room.occupants.is_empty());
        assert_eq!(room.state, RoomState::Empty);
        assert!(room.empty_since.is_some());
    }

    #[test]
    fn test_rejoin_with_same_nickname_is_a_noop() {
        let now = Utc::now();
        let mut room = room();
        let alice = address("alice@example.com");

        room.join(&alice, "Alice", None, now).unwrap();
        room.join(&alice, "alice", None, now + Duration::seconds(1))
            .unwrap();
        assert_eq!(room.occupants.len(), 1);
    }

    #[test]
    fn test_nickname_conflict_is_rejected() {
        let now = Utc::now();
        let mut room = room();
        room.join(&address("alice@example.com"), "Echo", None, now)
            .unwrap();

        let result = room.join(&address("bob@example.com"), "echo", None, now);
        assert!(matches!(result, Err(DomainError::AlreadyExists { .. })));
        assert_eq!(room.occupants.len(), 1);
    }

    #[test]
    fn test_outcast_is_barred_unconditionally() {
        let now = Utc::now();
        let mut room = room();
        let banned = address("banned@example.com");
        room.set_affiliation_lists(&banned, Affiliation::Outcast, None);

        let result = room.join(&banned, "Banned", None, now);
        assert!(matches!(result, Err(DomainError::Banned { .. })));
    }

    #[test]
    fn test_members_only_requires_membership() {
        let now = Utc::now();
        let mut room = room();
        room.members_only = true;
        let member = address("member@example.com");
        room.set_affiliation_lists(&member, Affiliation::Member, Some("Mem".into()));

        let outsider = room.join(&address("guest@example.com"), "Guest", None, now);
        assert!(matches!(
            outsider,
            Err(DomainError::RegistrationRequired { .. })
        ));

        assert!(room.join(&member, "Mem", None, now).is_ok());
    }

    #[test]
    fn test_max_users_exempts_owners_and_admins() {
        let now = Utc::now();
        let mut room = room();
        room.max_users = 1;
        let owner = address("owner@example.com");
        room.add_first_owner(&owner);

        room.join(&address("alice@example.com"), "Alice", None, now)
            .unwrap();
        let full = room.join(&address("bob@example.com"), "Bob", None, now);
        assert!(matches!(full, Err(DomainError::MaxOccupantsReached { .. })));

        // owner 不受人数上限约束
        let joined = room.join(&owner, "Boss", None, now).unwrap();
        assert_eq!(joined.role, Role::Moderator);
    }

    #[test]
    fn test_locked_room_admits_only_owners() {
        let now = Utc::now();
        let mut room = room();
        let owner = address("owner@example.com");
        room.add_first_owner(&owner);
        room.lock(now).unwrap();

        let rejected = room.join(&address("alice@example.com"), "Alice", None, now);
        assert!(matches!(rejected, Err(DomainError::RoomLocked { .. })));
        assert!(room.join(&owner, "Boss", None, now).is_ok());
    }

    #[test]
    fn test_password_protected_room() {
        let now = Utc::now();
        let mut room = room();
        room.password = Some("secret".to_string());

        let wrong = room.join(&address("alice@example.com"), "Alice", Some("nope"), now);
        assert!(matches!(wrong, Err(DomainError::Unauthorized { .. })));
        let missing = room.join(&address("alice@example.com"), "Alice", None, now);
        assert!(matches!(missing, Err(DomainError::Unauthorized { .. })));
        assert!(room
            .join(&address("alice@example.com"), "Alice", Some("secret"), now)
            .is_ok());
    }

    #[test]
    fn test_affiliation_exclusivity() {
        let now = Utc::now();
        let mut room = room();
        let owner = address("owner@example.com");
        let user = address("user@example.com");
        room.add_first_owner(&owner);

        room.change_affiliation_and_role(
            Affiliation::Owner,
            Role::Moderator,
            &user,
            Affiliation::Admin,
            Role::Moderator,
            now,
        )
        .unwrap();
        assert!(room.admins.contains(&user));

        room.change_affiliation_and_role(
            Affiliation::Owner,
            Role::Moderator,
            &user,
            Affiliation::Outcast,
            Role::None,
            now,
        )
        .unwrap();
        // 同一地址同一时刻只出现在一个集合里
        assert!(!room.admins.contains(&user));
        assert!(!room.owners.contains(&user));
        assert!(!room.members.contains_key(&user));
        assert!(room.outcasts.contains(&user));
    }

    #[test]
    fn test_affiliation_change_denied_without_privilege() {
        let now = Utc::now();
        let mut room = room();
        let owner = address("owner@example.com");
        room.add_first_owner(&owner);

        let result = room.change_affiliation_and_role(
            Affiliation::Admin,
            Role::Moderator,
            &owner,
            Affiliation::None,
            Role::None,
            now,
        );
        assert!(matches!(result, Err(DomainError::NotAllowed { .. })));
        assert!(room.owners.contains(&owner));
    }

    #[test]
    fn test_affiliation_change_updates_roster_entries() {
        let now = Utc::now();
        let mut room = room();
        let user = address("user@example.com");
        room.join(&user, "User", None, now).unwrap();

        let updated = room
            .change_affiliation_and_role(
                Affiliation::Owner,
                Role::Moderator,
                &user,
                Affiliation::Admin,
                Role::Moderator,
                now,
            )
            .unwrap();
        assert_eq!(updated.len(), 1);
        assert_eq!(updated[0].affiliation, Affiliation::Admin);
        assert_eq!(room.occupants[0].role, Role::Moderator);
    }

    #[test]
    fn test_subject_message_shape() {
        let room = room();

        // 全空参数：subject 元素存在但为空，无正文，from 非空
        let empty = room.subject_change_message(None, None, None);
        assert_eq!(empty.subject.as_deref(), Some(""));
        assert!(empty.body.is_none());
        assert!(empty.is_subject_change());
        assert_eq!(empty.from.room_name, "lobby");
        assert!(empty.from.nickname.is_none());

        let with_subject = room.subject_change_message(Some("Hello"), None, None);
        assert_eq!(with_subject.subject.as_deref(), Some("Hello"));

        let with_author = room.subject_change_message(Some("Hello"), Some("Alice"), None);
        assert_eq!(with_author.from.nickname.as_deref(), Some("Alice"));

        let stamp = Utc.with_ymd_and_hms(1969, 7, 21, 2, 56, 15).unwrap()
            + Duration::milliseconds(123);
        let with_stamp = room.subject_change_message(Some("Hello"), Some("Alice"), Some(stamp));
        assert_eq!(
            crate::history::format_delay_stamp(&with_stamp.delay_stamp.unwrap()),
            "1969-07-21T02:56:15.123Z"
        );
    }

    #[test]
    fn test_change_subject_tracks_current_subject() {
        let now = Utc::now();
        let mut room = room();
        let default = HistoryPolicy::default();

        room.change_subject("第一个主题", Some("Alice"), now, &default)
            .unwrap();
        room.change_subject("第二个主题", Some("Bob"), now + Duration::seconds(1), &default)
            .unwrap();

        assert_eq!(room.subject(), Some("第二个主题"));
        // 主题消息不占用历史缓冲区
        assert!(room.history.is_empty());
    }

    #[test]
    fn test_destroyed_room_rejects_mutation() {
        let now = Utc::now();
        let mut room = room();
        room.join(&address("alice@example.com"), "Alice", None, now)
            .unwrap();
        room.destroy(now);

        assert!(room.occupants.is_empty());
        assert_eq!(room.state, RoomState::Destroyed);

        let join = room.join(&address("bob@example.com"), "Bob", None, now);
        assert!(matches!(join, Err(DomainError::RoomDestroyed { .. })));
        let subject = room.change_subject("x", None, now, &HistoryPolicy::default());
        assert!(matches!(subject, Err(DomainError::RoomDestroyed { .. })));

        // 销毁是幂等的
        room.destroy(now + Duration::seconds(1));
        assert_eq!(room.state, RoomState::Destroyed);
    }

    #[test]
    fn test_full_round_trip_equality() {
        let now = Utc::now();
        let mut room = room();
        room.natural_name = "大厅".to_string();
        room.description = "主聊天室".to_string();
        room.persistent = true;
        room.moderated = true;
        room.members_only = true;
        room.registration_enabled = false;
        room.occupants_can_change_subject = true;
        room.can_anyone_discover_jid = true;
        room.login_restricted_to_nickname = false;
        room.can_change_nickname = false;
        room.log_enabled = true;
        room.fmuc_enabled = true;
        room.fmuc_outbound_node =
            Some(RoomAddress::new("peer-room", "conference.peer.example.org"));
        room.max_users = 150;
        room.password = Some("秘密".to_string());

        let owner = address("owner@example.com");
        let member = address("member@example.com");
        room.add_first_owner(&owner);
        room.set_affiliation_lists(&member, Affiliation::Member, Some("Mem".into()));
        room.set_affiliation_lists(
            &address("banned@example.com"),
            Affiliation::Outcast,
            None,
        );
        room.join(&owner, "Boss", Some("秘密"), now).unwrap();
        room.join(&member, "Mem", Some("秘密"), now).unwrap();

        let default = HistoryPolicy::default();
        room.history.set_setting(
            HistorySetting::Explicit(HistoryPolicy::new(HistoryRetention::Number, 5)),
            &default,
        );
        for i in 0..8 {
            let from = room.address().with_nickname("Boss");
            room.add_history_message(
                RoomMessage::chat(from, format!("message-{i}"), now),
                &default,
            );
        }
        room.change_subject("round trip", Some("Boss"), now, &default)
            .unwrap();
        room.destroy(now + Duration::seconds(5));

        let encoded = serde_json::to_string(&room).unwrap();
        let decoded: Room = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded, room);
        // 销毁标记在序列化后保留
        assert!(decoded.is_destroyed());
        assert_eq!(decoded.subject(), Some("round trip"));
        assert_eq!(decoded.history.reverse_history().len(), 5);
    }
}
