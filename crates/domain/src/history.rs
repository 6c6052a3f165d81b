//! 房间消息历史策略
//!
//! 有界、可回放的历史缓冲区，保留策略可配置。房间可以显式配置
//! 自己的策略，也可以继承聊天服务级默认值；继承关系在读取时解析，
//! 服务默认值的后续变更会立即反映到仍处于继承模式的房间。

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::value_objects::{RoomAddress, Timestamp};

/// `Number` 保留策略的默认容量。
pub const DEFAULT_MAX_NUMBER: usize = 25;

/// 保留策略：互斥的四种模式。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HistoryRetention {
    /// 不保存任何消息
    None,
    /// 只保存最近的一条消息
    One,
    /// 全部保存，不设显式上限
    All,
    /// 保存最近 `max_number` 条，FIFO 淘汰最旧的
    Number,
}

/// 保留策略与容量的组合。聊天服务级默认值就是一个 `HistoryPolicy`。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryPolicy {
    pub retention: HistoryRetention,
    pub max_number: usize,
}

impl HistoryPolicy {
    pub fn new(retention: HistoryRetention, max_number: usize) -> Self {
        Self {
            retention,
            max_number,
        }
    }

    /// 当前策略下缓冲区的有效容量，`All` 无上限。
    fn cap(&self) -> Option<usize> {
        match self.retention {
            HistoryRetention::None => Some(0),
            HistoryRetention::One => Some(1),
            HistoryRetention::All => None,
            HistoryRetention::Number => Some(self.max_number),
        }
    }
}

impl Default for HistoryPolicy {
    fn default() -> Self {
        Self {
            retention: HistoryRetention::Number,
            max_number: DEFAULT_MAX_NUMBER,
        }
    }
}

/// 房间级历史设置：显式策略，或继承服务默认值。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HistorySetting {
    Inherited,
    Explicit(HistoryPolicy),
}

/// 房间内流转的一条消息。
///
/// 主题变更消息的特征：`subject` 元素始终存在（可以为空串）、
/// 没有正文、`from` 为房间地址（资源位可带变更者昵称）。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoomMessage {
    pub from: RoomAddress,
    pub subject: Option<String>,
    pub body: Option<String>,
    /// 延迟投递标注：消息实际产生的时刻（UTC，毫秒精度）。
    pub delay_stamp: Option<Timestamp>,
}

impl RoomMessage {
    /// 普通聊天消息。
    pub fn chat(from: RoomAddress, body: impl Into<String>, sent_at: Timestamp) -> Self {
        Self {
            from,
            subject: None,
            body: Some(body.into()),
            delay_stamp: Some(sent_at),
        }
    }

    /// 是否为主题变更消息。
    pub fn is_subject_change(&self) -> bool {
        self.subject.is_some() && self.body.is_none()
    }
}

/// 把延迟标注格式化为 ISO-8601 UTC 毫秒精度的时间戳，
/// 例如 `1969-07-21T02:56:15.123Z`。
pub fn format_delay_stamp(stamp: &Timestamp) -> String {
    stamp.format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string()
}

/// 每个房间持有一个历史策略实例，缓冲区由房间独占。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryStrategy {
    setting: HistorySetting,
    messages: VecDeque<RoomMessage>,
    /// 当前主题槽位，独立于历史缓冲区维护。
    subject_message: Option<RoomMessage>,
}

impl HistoryStrategy {
    pub fn new(setting: HistorySetting) -> Self {
        Self {
            setting,
            messages: VecDeque::new(),
            subject_message: None,
        }
    }

    /// 继承服务默认值的策略，新建房间的初始形态。
    pub fn inherited() -> Self {
        Self::new(HistorySetting::Inherited)
    }

    pub fn setting(&self) -> HistorySetting {
        self.setting
    }

    /// 解析当前生效的策略：显式设置优先，否则取服务默认值。
    pub fn effective_policy(&self, default: &HistoryPolicy) -> HistoryPolicy {
        match self.setting {
            HistorySetting::Explicit(policy) => policy,
            HistorySetting::Inherited => *default,
        }
    }

    /// 追加一条消息。
    ///
    /// 主题变更消息只更新主题槽位，不进入历史缓冲区，
    /// 因此即使保留策略为 `None` 主题也能被跟踪。
    pub fn add_message(&mut self, message: RoomMessage, default: &HistoryPolicy) {
        if message.is_subject_change() {
            self.subject_message = Some(message);
            return;
        }

        match self.effective_policy(default).cap() {
            Some(0) => {}
            cap => {
                self.messages.push_back(message);
                if let Some(cap) = cap {
                    while self.messages.len() > cap {
                        self.messages.pop_front();
                    }
                }
            }
        }
    }

    /// 按最近优先的顺序产出历史快照。返回值是调用时刻的副本，
    /// 不会被后续追加影响。
    pub fn reverse_history(&self) -> Vec<RoomMessage> {
        self.messages.iter().rev().cloned().collect()
    }

    /// 变更历史设置。新的有效容量小于当前缓冲区大小时，
    /// 立即淘汰最旧的超额条目；其余情况只对后续写入生效。
    pub fn set_setting(&mut self, setting: HistorySetting, default: &HistoryPolicy) {
        self.setting = setting;
        if let Some(cap) = self.effective_policy(default).cap() {
            while self.messages.len() > cap {
                self.messages.pop_front();
            }
        }
    }

    pub fn subject_message(&self) -> Option<&RoomMessage> {
        self.subject_message.as_ref()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

impl Default for HistoryStrategy {
    fn default() -> Self {
        Self::inherited()
    }
}
