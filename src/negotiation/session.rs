//! 协商会话状态机服务
//!
//! initiated -> negotiating -> {confirmed | failed | expired}。
//! 确认采用两段式：先在存储层做原子条件迁移（仅当仍 negotiating），
//! 成功后才尝试写双方日历——写失败只记录不回滚，协商结果是权威。

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::calendar::{CalendarService, EventDraft};
use crate::config::NegotiationSection;
use crate::core::AgentError;
use crate::negotiation::connection::ConnectionService;
use crate::negotiation::notify::NotificationSink;
use crate::negotiation::slots::{mutual_slots, SlotQuery};
use crate::store::{
    scopes, AgentMessage, AgentMessageType, NegotiationSession, SchedulerStore, SessionOutcome,
    SessionStatus, Slot,
};

/// 提案请求：时长与窗口来自 hint 抽取，缺省由服务补全
#[derive(Debug, Clone)]
pub struct ProposalRequest {
    pub connection_id: String,
    pub duration_minutes: Option<i64>,
    pub window_start_ms: Option<i64>,
    pub window_end_ms: Option<i64>,
    pub title: Option<String>,
}

/// 确认选择：最新提案的序号，或显式起止时间
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfirmSelection {
    Index(usize),
    Custom { start_ms: i64, end_ms: i64 },
}

/// 确认结果：会话、敲定槽位与双方日历写入是否成功
#[derive(Debug, Clone)]
pub struct ConfirmedMeeting {
    pub session: NegotiationSession,
    pub slot: Slot,
    pub initiator_event_written: bool,
    pub counterpart_event_written: bool,
}

/// proposal 消息的 payload 结构（最新一条为权威槽位来源）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProposalPayload {
    pub slots: Vec<Slot>,
    pub duration_ms: i64,
    #[serde(default)]
    pub title: Option<String>,
}

pub struct NegotiationService {
    store: Arc<SchedulerStore>,
    calendar: Arc<CalendarService>,
    connections: Arc<ConnectionService>,
    notifications: Arc<dyn NotificationSink>,
    cfg: NegotiationSection,
}

impl NegotiationService {
    pub fn new(
        store: Arc<SchedulerStore>,
        calendar: Arc<CalendarService>,
        connections: Arc<ConnectionService>,
        notifications: Arc<dyn NotificationSink>,
        cfg: NegotiationSection,
    ) -> Self {
        Self {
            store,
            calendar,
            connections,
            notifications,
            cfg,
        }
    }

    fn now_ms() -> i64 {
        chrono::Utc::now().timestamp_millis()
    }

    /// 发起提案：权限检查 -> 建会话 -> 双方空闲交集 -> 落 proposal 消息 -> 通知对方。
    /// scope 不足时在创建任何状态之前直接返回 ScopesMissing。
    pub async fn propose(
        &self,
        initiator_id: &str,
        request: &ProposalRequest,
    ) -> Result<(NegotiationSession, Vec<Slot>), AgentError> {
        let conn = self
            .connections
            .require_scopes(
                &request.connection_id,
                &[scopes::AVAILABILITY_READ, scopes::EVENTS_PROPOSE],
            )
            .await?;
        let counterpart_id = conn
            .peer_of(initiator_id)
            .ok_or_else(|| {
                AgentError::Unauthorized(format!(
                    "user {initiator_id} is not part of connection {}",
                    conn.id
                ))
            })?
            .to_string();

        let ttl_ms = self.cfg.session_ttl_minutes * 60_000;
        let session = self
            .store
            .insert_session(NegotiationSession::new(
                initiator_id,
                &counterpart_id,
                &conn.id,
                ttl_ms,
            ))
            .await;

        let now = Self::now_ms();
        let window_start = request.window_start_ms.unwrap_or(now);
        let window_end = request
            .window_end_ms
            .unwrap_or(window_start + 7 * 24 * 60 * 60 * 1000);
        let duration_ms = request
            .duration_minutes
            .unwrap_or(self.cfg.default_meeting_minutes)
            * 60_000;

        let busy_initiator = self
            .calendar
            .get_availability(initiator_id, window_start, window_end)
            .await?;
        let busy_counterpart = self
            .calendar
            .get_availability(&counterpart_id, window_start, window_end)
            .await?;

        let query = SlotQuery {
            window_start_ms: window_start.max(now),
            window_end_ms: window_end,
            duration_ms,
            granularity_ms: self.cfg.slot_granularity_minutes * 60_000,
            max_options: self.cfg.max_slot_options,
        };
        let slots = mutual_slots(&busy_initiator, &busy_counterpart, &query);

        if slots.is_empty() {
            let session = self
                .store
                .set_session_status(&session.id, SessionStatus::Failed)
                .await?;
            tracing::info!(session = %session.id, "no mutual availability in window");
            return Ok((session, slots));
        }

        let payload = ProposalPayload {
            slots: slots.clone(),
            duration_ms,
            title: request.title.clone(),
        };
        let message = self
            .store
            .append_message(AgentMessage::new(
                &session.id,
                initiator_id,
                &counterpart_id,
                AgentMessageType::Proposal,
                serde_json::to_value(&payload)
                    .map_err(|e| AgentError::Internal(e.to_string()))?,
            ))
            .await;
        let session = self
            .store
            .set_session_status(&session.id, SessionStatus::Negotiating)
            .await?;

        let notification = self
            .notifications
            .create_notification(
                &counterpart_id,
                "meeting_proposal",
                "New meeting proposal",
                &format!("{} proposed {} time option(s)", initiator_id, slots.len()),
                Some(serde_json::json!({
                    "session_id": session.id,
                    "message_id": message.id,
                })),
            )
            .await?;
        self.notifications
            .mark_actionable(&notification.id, &format!("{}/{}", session.id, message.id))
            .await?;

        Ok((session, slots))
    }

    fn resolve_slot(
        proposal: Option<&AgentMessage>,
        selection: &ConfirmSelection,
    ) -> Result<Slot, AgentError> {
        match selection {
            ConfirmSelection::Index(index) => {
                let message = proposal.ok_or_else(|| {
                    AgentError::Validation("no proposal to confirm against".to_string())
                })?;
                let payload: ProposalPayload = serde_json::from_value(message.payload.clone())
                    .map_err(|e| AgentError::Internal(format!("corrupt proposal payload: {e}")))?;
                payload.slots.get(*index).copied().ok_or_else(|| {
                    AgentError::Validation(format!(
                        "selection index {index} out of range ({} options)",
                        payload.slots.len()
                    ))
                })
            }
            ConfirmSelection::Custom { start_ms, end_ms } => {
                if start_ms >= end_ms {
                    return Err(AgentError::Validation(
                        "custom slot start must precede end".to_string(),
                    ));
                }
                Ok(Slot {
                    start_ms: *start_ms,
                    end_ms: *end_ms,
                })
            }
        }
    }

    /// 确认会议：懒惰过期检查 -> scope 检查 -> 原子 confirm-if-negotiating ->
    /// 双方日历写入（尽力而为，失败仅记录）。并发 / 重复确认恰有一方成功，其余得 Conflict。
    pub async fn confirm(
        &self,
        user_id: &str,
        session_id: &str,
        selection: ConfirmSelection,
    ) -> Result<ConfirmedMeeting, AgentError> {
        let session = self.store.get_session(session_id).await?;
        if session.status == SessionStatus::Expired {
            return Err(AgentError::SessionExpired(session_id.to_string()));
        }
        let conn = self
            .connections
            .require_scopes(&session.connection_id, &[scopes::EVENTS_WRITE_CONFIRM])
            .await?;
        if conn.peer_of(user_id).is_none() {
            return Err(AgentError::Unauthorized(format!(
                "user {user_id} is not part of session {session_id}"
            )));
        }

        let proposal = self.store.latest_proposal(session_id).await;
        let slot = Self::resolve_slot(proposal.as_ref(), &selection)?;

        // 原子条件迁移：这里之后会话已是 confirmed，日历写入不再影响其状态
        let session = self.store.confirm_if_negotiating(session_id).await?;

        self.store
            .append_message(AgentMessage::new(
                session_id,
                user_id,
                conn.peer_of(user_id).unwrap_or_default(),
                AgentMessageType::Confirm,
                serde_json::json!({ "slot": slot }),
            ))
            .await;

        let title = proposal
            .as_ref()
            .and_then(|m| {
                serde_json::from_value::<ProposalPayload>(m.payload.clone())
                    .ok()
                    .and_then(|p| p.title)
            })
            .unwrap_or_else(|| "Meeting".to_string());

        let mut written = [false, false];
        for (i, party) in [&session.initiator_id, &session.counterpart_id]
            .into_iter()
            .enumerate()
        {
            let draft = EventDraft {
                title: title.clone(),
                start_ms: slot.start_ms,
                end_ms: slot.end_ms,
                attendees: vec![session.initiator_id.clone(), session.counterpart_id.clone()],
                description: Some(format!("Confirmed via negotiation {}", session.id)),
            };
            match self.calendar.create_event(party, &draft).await {
                Ok(_) => written[i] = true,
                Err(e) => {
                    // 尽力而为：确认已定，写失败只记录
                    tracing::warn!(session = %session.id, user = %party, error = %e,
                        "calendar write failed after confirmation");
                }
            }
        }

        let outcome = SessionOutcome {
            slot,
            initiator_event_written: written[0],
            counterpart_event_written: written[1],
        };
        self.store
            .set_session_outcome(&session.id, outcome)
            .await?;

        for party in [&session.initiator_id, &session.counterpart_id] {
            let notification = self
                .notifications
                .create_notification(
                    party,
                    "meeting_confirmed",
                    "Meeting confirmed",
                    &format!("Session {} confirmed", session.id),
                    Some(serde_json::json!({ "session_id": session.id, "slot": slot })),
                )
                .await?;
            self.notifications
                .mark_actionable(&notification.id, &session.id)
                .await?;
        }

        Ok(ConfirmedMeeting {
            session,
            slot,
            initiator_event_written: written[0],
            counterpart_event_written: written[1],
        })
    }

    /// 协商全文（追加序）
    pub async fn transcript(&self, session_id: &str) -> Vec<AgentMessage> {
        self.store.transcript(session_id).await
    }
}
