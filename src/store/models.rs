//! 领域数据模型
//!
//! 时间戳统一为 UTC 毫秒（i64）；ID 为带前缀的 UUID v4。
//! Connection 永不硬删除，仅作状态迁移；AgentMessage 为追加式日志，
//! 最新一条 proposal 的 payload 是可选槽位的权威来源。

use serde::{Deserialize, Serialize};

/// scope 常量：连接权限按字符串 scope 门控
pub mod scopes {
    pub const AVAILABILITY_READ: &str = "calendar.availability.read";
    pub const EVENTS_PROPOSE: &str = "calendar.events.propose";
    pub const EVENTS_WRITE_CONFIRM: &str = "calendar.events.write.confirm";
    /// 自动写入：确认后无需再次征求即可写双方日历，蕴含 write.confirm
    pub const EVENTS_WRITE_AUTO: &str = "calendar.events.write.auto";
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// 连接权限：scope 列表 + 任意附加约束
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Permissions {
    pub scopes: Vec<String>,
    #[serde(default)]
    pub constraints: Option<serde_json::Value>,
}

impl Permissions {
    pub fn new(scopes: Vec<String>) -> Self {
        Self {
            scopes,
            constraints: None,
        }
    }

    pub fn has_scope(&self, scope: &str) -> bool {
        if self.scopes.iter().any(|s| s == scope) {
            return true;
        }
        // write.auto 蕴含 write.confirm
        scope == scopes::EVENTS_WRITE_CONFIRM
            && self.scopes.iter().any(|s| s == scopes::EVENTS_WRITE_AUTO)
    }

    /// 返回缺失的 scope 列表（全部满足时为空）
    pub fn missing(&self, required: &[&str]) -> Vec<String> {
        required
            .iter()
            .filter(|s| !self.has_scope(s))
            .map(|s| s.to_string())
            .collect()
    }
}

/// 连接状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    Pending,
    Active,
    Revoked,
}

/// 两个用户之间的持久连接关系
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Connection {
    pub id: String,
    pub requester_id: String,
    pub target_id: String,
    /// 对方展示名（resolver 据此打分）
    pub display_name: String,
    pub status: ConnectionStatus,
    pub permissions: Permissions,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Connection {
    pub fn new(
        requester_id: impl Into<String>,
        target_id: impl Into<String>,
        display_name: impl Into<String>,
        permissions: Permissions,
    ) -> Self {
        let now = now_ms();
        Self {
            id: format!("conn_{}", uuid::Uuid::new_v4()),
            requester_id: requester_id.into(),
            target_id: target_id.into(),
            display_name: display_name.into(),
            status: ConnectionStatus::Pending,
            permissions,
            created_at: now,
            updated_at: now,
        }
    }

    /// 连接的另一方
    pub fn peer_of(&self, user_id: &str) -> Option<&str> {
        if self.requester_id == user_id {
            Some(&self.target_id)
        } else if self.target_id == user_id {
            Some(&self.requester_id)
        } else {
            None
        }
    }
}

/// 协商会话状态机的状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Initiated,
    Negotiating,
    Confirmed,
    Failed,
    Expired,
}

impl SessionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionStatus::Confirmed | SessionStatus::Failed | SessionStatus::Expired
        )
    }
}

/// 一个候选 / 已确认的时间槽（UTC 毫秒）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Slot {
    pub start_ms: i64,
    pub end_ms: i64,
}

/// 会话终局信息：确认的槽位与双方日历写入是否成功
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionOutcome {
    pub slot: Slot,
    /// (发起方写入成功, 对方写入成功)——写失败只记录，不回滚确认
    pub initiator_event_written: bool,
    pub counterpart_event_written: bool,
}

/// 一次两方排期协商
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NegotiationSession {
    pub id: String,
    pub session_type: String,
    pub initiator_id: String,
    pub counterpart_id: String,
    pub connection_id: String,
    pub status: SessionStatus,
    pub ttl_expires_at: i64,
    #[serde(default)]
    pub outcome: Option<SessionOutcome>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl NegotiationSession {
    pub fn new(
        initiator_id: impl Into<String>,
        counterpart_id: impl Into<String>,
        connection_id: impl Into<String>,
        ttl_ms: i64,
    ) -> Self {
        let now = now_ms();
        Self {
            id: format!("session_{}", uuid::Uuid::new_v4()),
            session_type: "meeting_scheduling".to_string(),
            initiator_id: initiator_id.into(),
            counterpart_id: counterpart_id.into(),
            connection_id: connection_id.into(),
            status: SessionStatus::Initiated,
            ttl_expires_at: now + ttl_ms,
            outcome: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// TTL 已过且仍在 initiated/negotiating，视为需过期
    pub fn should_expire(&self, now: i64) -> bool {
        !self.status.is_terminal() && now > self.ttl_expires_at
    }
}

/// 协商日志消息类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentMessageType {
    Proposal,
    Confirm,
}

/// 协商日志（追加式）；proposal 的 payload.slots 为权威槽位列表
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentMessage {
    pub id: String,
    pub session_id: String,
    pub from_user_id: String,
    pub to_user_id: String,
    pub message_type: AgentMessageType,
    pub payload: serde_json::Value,
    pub created_at: i64,
}

impl AgentMessage {
    pub fn new(
        session_id: impl Into<String>,
        from_user_id: impl Into<String>,
        to_user_id: impl Into<String>,
        message_type: AgentMessageType,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            id: format!("msg_{}", uuid::Uuid::new_v4()),
            session_id: session_id.into(),
            from_user_id: from_user_id.into(),
            to_user_id: to_user_id.into(),
            message_type,
            payload,
            created_at: now_ms(),
        }
    }
}

/// 每个已连接日历账号一条集成记录；令牌由该记录独占，刷新后原子替换
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalendarIntegration {
    pub id: String,
    pub user_id: String,
    /// 集成标识（如 google_calendar），用于 reauth action 令牌
    pub provider: String,
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    pub token_expires_at: i64,
    pub is_active: bool,
}

impl CalendarIntegration {
    pub fn new(
        user_id: impl Into<String>,
        provider: impl Into<String>,
        access_token: impl Into<String>,
        refresh_token: Option<String>,
        token_expires_at: i64,
    ) -> Self {
        Self {
            id: format!("cal_{}", uuid::Uuid::new_v4()),
            user_id: user_id.into(),
            provider: provider.into(),
            access_token: access_token.into(),
            refresh_token,
            token_expires_at,
            is_active: true,
        }
    }

    pub fn token_expired(&self, now: i64) -> bool {
        now >= self.token_expires_at
    }
}

/// 通知（用于在流之外浮现待处理提案/确认）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub id: String,
    pub user_id: String,
    pub kind: String,
    pub title: String,
    pub body: String,
    #[serde(default)]
    pub data: Option<serde_json::Value>,
    /// 标记为需要行动时引用的 session/message
    #[serde(default)]
    pub actionable_ref: Option<String>,
    pub created_at: i64,
}

impl Notification {
    pub fn new(
        user_id: impl Into<String>,
        kind: impl Into<String>,
        title: impl Into<String>,
        body: impl Into<String>,
        data: Option<serde_json::Value>,
    ) -> Self {
        Self {
            id: format!("notif_{}", uuid::Uuid::new_v4()),
            user_id: user_id.into(),
            kind: kind.into(),
            title: title.into(),
            body: body.into(),
            data,
            actionable_ref: None,
            created_at: now_ms(),
        }
    }
}

/// 委托链接：外部对象无需完整账号即可与 owner 协商的限时、限 scope 通道
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DelegationLink {
    pub token: String,
    pub owner_id: String,
    /// 外部对方的称呼（无账号）
    pub counterpart_label: String,
    pub permissions: Permissions,
    pub expires_at: i64,
    pub used: bool,
    pub created_at: i64,
}

impl DelegationLink {
    pub fn new(
        owner_id: impl Into<String>,
        counterpart_label: impl Into<String>,
        permissions: Permissions,
        ttl_ms: i64,
    ) -> Self {
        let now = now_ms();
        Self {
            token: format!("dlg_{}", uuid::Uuid::new_v4()),
            owner_id: owner_id.into(),
            counterpart_label: counterpart_label.into(),
            permissions,
            expires_at: now + ttl_ms,
            used: false,
            created_at: now,
        }
    }

    pub fn is_expired(&self, now: i64) -> bool {
        now > self.expires_at
    }
}
