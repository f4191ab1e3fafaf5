//! 排期存储（注入式查询接口）
//!
//! 内存实现：RwLock<HashMap> 主表 + 用户索引。持久化引擎不在本引擎范围内，
//! 调用方可在此接口之上替换后端；测试中每个实例完全隔离。
//!
//! 两个关键语义都落在这里：
//! - confirm_if_negotiating：同一把写锁内的条件状态迁移（确认至多一次）
//! - get_session：懒惰过期，TTL 已过的 initiated/negotiating 会话在读取时翻转为 expired

use std::collections::HashMap;

use tokio::sync::RwLock;

use crate::core::AgentError;
use crate::store::models::*;

/// 内存存储：连接、会话、协商日志、日历集成、通知、委托链接
#[derive(Default)]
pub struct SchedulerStore {
    connections: RwLock<HashMap<String, Connection>>,
    /// user_id -> connection ids
    user_connections: RwLock<HashMap<String, Vec<String>>>,
    sessions: RwLock<HashMap<String, NegotiationSession>>,
    /// session_id -> 按追加顺序的消息
    messages: RwLock<HashMap<String, Vec<AgentMessage>>>,
    integrations: RwLock<HashMap<String, CalendarIntegration>>,
    /// user_id -> integration ids
    user_integrations: RwLock<HashMap<String, Vec<String>>>,
    notifications: RwLock<HashMap<String, Notification>>,
    delegations: RwLock<HashMap<String, DelegationLink>>,
}

impl SchedulerStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn now_ms() -> i64 {
        chrono::Utc::now().timestamp_millis()
    }

    // ---- 连接 ----

    /// 登记连接邀请（状态 pending）
    pub async fn insert_connection(&self, conn: Connection) -> Connection {
        let id = conn.id.clone();
        for user in [&conn.requester_id, &conn.target_id] {
            self.user_connections
                .write()
                .await
                .entry(user.clone())
                .or_default()
                .push(id.clone());
        }
        self.connections.write().await.insert(id, conn.clone());
        conn
    }

    pub async fn get_connection(&self, id: &str) -> Result<Connection, AgentError> {
        self.connections
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| AgentError::NotFound(format!("connection {id}")))
    }

    /// 接受邀请：pending -> active；其余状态报冲突
    pub async fn accept_connection(&self, id: &str) -> Result<Connection, AgentError> {
        let mut conns = self.connections.write().await;
        let conn = conns
            .get_mut(id)
            .ok_or_else(|| AgentError::NotFound(format!("connection {id}")))?;
        if conn.status != ConnectionStatus::Pending {
            return Err(AgentError::Conflict(format!(
                "connection {id} is not pending"
            )));
        }
        conn.status = ConnectionStatus::Active;
        conn.updated_at = Self::now_ms();
        Ok(conn.clone())
    }

    /// 撤销连接：仅状态迁移，从不硬删除
    pub async fn revoke_connection(&self, id: &str) -> Result<Connection, AgentError> {
        let mut conns = self.connections.write().await;
        let conn = conns
            .get_mut(id)
            .ok_or_else(|| AgentError::NotFound(format!("connection {id}")))?;
        conn.status = ConnectionStatus::Revoked;
        conn.updated_at = Self::now_ms();
        Ok(conn.clone())
    }

    /// 该用户参与的全部连接
    pub async fn list_connections(&self, user_id: &str) -> Vec<Connection> {
        let ids = self
            .user_connections
            .read()
            .await
            .get(user_id)
            .cloned()
            .unwrap_or_default();
        let conns = self.connections.read().await;
        ids.iter().filter_map(|id| conns.get(id).cloned()).collect()
    }

    /// 该用户的激活连接（resolver 的候选集）
    pub async fn active_connections(&self, user_id: &str) -> Vec<Connection> {
        self.list_connections(user_id)
            .await
            .into_iter()
            .filter(|c| c.status == ConnectionStatus::Active)
            .collect()
    }

    // ---- 协商会话 ----

    pub async fn insert_session(&self, session: NegotiationSession) -> NegotiationSession {
        self.sessions
            .write()
            .await
            .insert(session.id.clone(), session.clone());
        session
    }

    /// 读取会话并应用懒惰过期：TTL 已过且非终态则当场翻转为 expired
    pub async fn get_session(&self, id: &str) -> Result<NegotiationSession, AgentError> {
        let mut sessions = self.sessions.write().await;
        let session = sessions
            .get_mut(id)
            .ok_or_else(|| AgentError::NotFound(format!("session {id}")))?;
        if session.should_expire(Self::now_ms()) {
            session.status = SessionStatus::Expired;
            session.updated_at = Self::now_ms();
        }
        Ok(session.clone())
    }

    /// 该用户参与的全部会话。列表不触发懒惰过期：TTL 已过的 negotiating
    /// 会话在被 get/confirm 触碰之前仍按原状态展示
    pub async fn list_sessions(&self, user_id: &str) -> Vec<NegotiationSession> {
        let mut items: Vec<NegotiationSession> = self
            .sessions
            .read()
            .await
            .values()
            .filter(|s| s.initiator_id == user_id || s.counterpart_id == user_id)
            .cloned()
            .collect();
        items.sort_by_key(|s| s.created_at);
        items
    }

    /// 会话状态迁移（不含确认；确认必须走 confirm_if_negotiating）
    pub async fn set_session_status(
        &self,
        id: &str,
        status: SessionStatus,
    ) -> Result<NegotiationSession, AgentError> {
        let mut sessions = self.sessions.write().await;
        let session = sessions
            .get_mut(id)
            .ok_or_else(|| AgentError::NotFound(format!("session {id}")))?;
        session.status = status;
        session.updated_at = Self::now_ms();
        Ok(session.clone())
    }

    /// 原子条件确认：仅当会话仍为 negotiating 时迁移到 confirmed。
    /// 先判过期（懒惰过期优先于确认），已确认返回 Conflict——并发重试下至多一方成功。
    pub async fn confirm_if_negotiating(&self, id: &str) -> Result<NegotiationSession, AgentError> {
        let mut sessions = self.sessions.write().await;
        let session = sessions
            .get_mut(id)
            .ok_or_else(|| AgentError::NotFound(format!("session {id}")))?;
        let now = Self::now_ms();
        if session.should_expire(now) {
            session.status = SessionStatus::Expired;
            session.updated_at = now;
            return Err(AgentError::SessionExpired(id.to_string()));
        }
        match session.status {
            SessionStatus::Negotiating => {
                session.status = SessionStatus::Confirmed;
                session.updated_at = now;
                Ok(session.clone())
            }
            SessionStatus::Confirmed => Err(AgentError::Conflict(format!(
                "session {id} already confirmed"
            ))),
            other => Err(AgentError::Conflict(format!(
                "session {id} is {other:?}, not negotiating"
            ))),
        }
    }

    /// 写入终局信息（确认槽位 + 双方日历写入结果）
    pub async fn set_session_outcome(
        &self,
        id: &str,
        outcome: SessionOutcome,
    ) -> Result<(), AgentError> {
        let mut sessions = self.sessions.write().await;
        let session = sessions
            .get_mut(id)
            .ok_or_else(|| AgentError::NotFound(format!("session {id}")))?;
        session.outcome = Some(outcome);
        session.updated_at = Self::now_ms();
        Ok(())
    }

    // ---- 协商日志 ----

    pub async fn append_message(&self, message: AgentMessage) -> AgentMessage {
        self.messages
            .write()
            .await
            .entry(message.session_id.clone())
            .or_default()
            .push(message.clone());
        message
    }

    /// 最新一条 proposal（其 payload 是可选槽位的权威来源）
    pub async fn latest_proposal(&self, session_id: &str) -> Option<AgentMessage> {
        self.messages
            .read()
            .await
            .get(session_id)?
            .iter()
            .rev()
            .find(|m| m.message_type == AgentMessageType::Proposal)
            .cloned()
    }

    /// 按追加顺序返回全部协商消息
    pub async fn transcript(&self, session_id: &str) -> Vec<AgentMessage> {
        self.messages
            .read()
            .await
            .get(session_id)
            .cloned()
            .unwrap_or_default()
    }

    // ---- 日历集成 ----

    pub async fn insert_integration(&self, integration: CalendarIntegration) -> CalendarIntegration {
        self.user_integrations
            .write()
            .await
            .entry(integration.user_id.clone())
            .or_default()
            .push(integration.id.clone());
        self.integrations
            .write()
            .await
            .insert(integration.id.clone(), integration.clone());
        integration
    }

    /// 该用户当前激活的集成（多账号时全部返回）
    pub async fn active_integrations(&self, user_id: &str) -> Vec<CalendarIntegration> {
        let ids = self
            .user_integrations
            .read()
            .await
            .get(user_id)
            .cloned()
            .unwrap_or_default();
        let integrations = self.integrations.read().await;
        ids.iter()
            .filter_map(|id| integrations.get(id).cloned())
            .filter(|i| i.is_active)
            .collect()
    }

    /// 原子替换访问令牌与过期时间（幂等覆盖：并发刷新最坏多刷一次）
    pub async fn update_integration_token(
        &self,
        integration_id: &str,
        access_token: String,
        token_expires_at: i64,
    ) -> Result<(), AgentError> {
        let mut integrations = self.integrations.write().await;
        let integration = integrations
            .get_mut(integration_id)
            .ok_or_else(|| AgentError::NotFound(format!("integration {integration_id}")))?;
        integration.access_token = access_token;
        integration.token_expires_at = token_expires_at;
        Ok(())
    }

    // ---- 通知 ----

    pub async fn insert_notification(&self, notification: Notification) -> Notification {
        self.notifications
            .write()
            .await
            .insert(notification.id.clone(), notification.clone());
        notification
    }

    pub async fn mark_notification_actionable(
        &self,
        notification_id: &str,
        actionable_ref: &str,
    ) -> Result<(), AgentError> {
        let mut notifications = self.notifications.write().await;
        let n = notifications
            .get_mut(notification_id)
            .ok_or_else(|| AgentError::NotFound(format!("notification {notification_id}")))?;
        n.actionable_ref = Some(actionable_ref.to_string());
        Ok(())
    }

    pub async fn list_notifications(&self, user_id: &str) -> Vec<Notification> {
        let mut items: Vec<Notification> = self
            .notifications
            .read()
            .await
            .values()
            .filter(|n| n.user_id == user_id)
            .cloned()
            .collect();
        items.sort_by_key(|n| n.created_at);
        items
    }

    // ---- 委托链接 ----

    pub async fn insert_delegation(&self, link: DelegationLink) -> DelegationLink {
        self.delegations
            .write()
            .await
            .insert(link.token.clone(), link.clone());
        link
    }

    pub async fn get_delegation(&self, token: &str) -> Result<DelegationLink, AgentError> {
        self.delegations
            .read()
            .await
            .get(token)
            .cloned()
            .ok_or_else(|| AgentError::NotFound(format!("delegation {token}")))
    }

    /// 标记链接已使用（确认成功后调用，链接一次性）
    pub async fn consume_delegation(&self, token: &str) -> Result<(), AgentError> {
        let mut delegations = self.delegations.write().await;
        let link = delegations
            .get_mut(token)
            .ok_or_else(|| AgentError::NotFound(format!("delegation {token}")))?;
        link.used = true;
        Ok(())
    }
}
