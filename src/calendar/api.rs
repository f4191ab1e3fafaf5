//! 第三方日历 API 抽象
//!
//! 失败在源头分类为类型化错误（Unauthorized / InvalidGrant / Transient），
//! 上层 CalendarService 据此折算为 ReauthRequired 或瞬时错误，不做消息文本匹配。

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// 忙碌区间（UTC 毫秒，半开区间 [start, end)）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BusyInterval {
    pub start_ms: i64,
    pub end_ms: i64,
}

impl BusyInterval {
    pub fn overlaps(&self, start_ms: i64, end_ms: i64) -> bool {
        self.start_ms < end_ms && start_ms < self.end_ms
    }
}

/// 日历事件（读出）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalendarEvent {
    pub id: String,
    pub title: String,
    pub start_ms: i64,
    pub end_ms: i64,
    #[serde(default)]
    pub attendees: Vec<String>,
}

/// 待创建事件
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventDraft {
    pub title: String,
    pub start_ms: i64,
    pub end_ms: i64,
    #[serde(default)]
    pub attendees: Vec<String>,
    #[serde(default)]
    pub description: Option<String>,
}

/// 刷新得到的新访问令牌
#[derive(Debug, Clone)]
pub struct RefreshedToken {
    pub access_token: String,
    pub expires_in_secs: i64,
}

/// 源头分类的 API 错误
#[derive(Error, Debug)]
pub enum CalendarApiError {
    /// API 返回 401/403：当前访问令牌不再被接受
    #[error("calendar API rejected the access token")]
    Unauthorized,
    /// 刷新令牌被拒（OAuth invalid_grant 类）：必须重新授权
    #[error("refresh token no longer valid")]
    InvalidGrant,
    /// 其它（网络、5xx、限流）：调用方可有限重试
    #[error("transient calendar API failure: {0}")]
    Transient(String),
}

/// 日历提供方客户端：每个集成账号的原子操作
#[async_trait]
pub trait CalendarApi: Send + Sync {
    async fn list_events(
        &self,
        access_token: &str,
        from_ms: i64,
        to_ms: i64,
        max: usize,
    ) -> Result<Vec<CalendarEvent>, CalendarApiError>;

    /// 指定窗口内的忙碌区间
    async fn freebusy(
        &self,
        access_token: &str,
        from_ms: i64,
        to_ms: i64,
    ) -> Result<Vec<BusyInterval>, CalendarApiError>;

    async fn create_event(
        &self,
        access_token: &str,
        draft: &EventDraft,
    ) -> Result<CalendarEvent, CalendarApiError>;

    async fn delete_event(&self, access_token: &str, event_id: &str)
        -> Result<(), CalendarApiError>;

    async fn refresh_token(&self, refresh_token: &str)
        -> Result<RefreshedToken, CalendarApiError>;
}
