//! Agent 错误类型与错误码
//!
//! 错误在失败源头构造为类型化变体（而非靠消息文本匹配分类）：
//! ReauthRequired / NotConnected 一路上抛到编排层转为 action 令牌，
//! 其余在工具层就地转为统一信封（ErrorCode + message）。

use thiserror::Error;

/// Agent 运行过程中可能出现的错误（校验、权限、协商冲突、日历集成、LLM 等）
#[derive(Error, Debug)]
pub enum AgentError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// 连接缺少执行该动作所需的 scope（权限检查先于任何状态变更）
    #[error("Missing scopes: {0}")]
    ScopesMissing(String),

    /// 并发 / 重复确认：会话已不再处于 negotiating
    #[error("Conflict: {0}")]
    Conflict(String),

    /// 协商会话 TTL 已过（懒惰过期：读取时判定）
    #[error("Session expired: {0}")]
    SessionExpired(String),

    /// 用户没有任何激活的日历集成
    #[error("Calendar not connected for user {0}")]
    NotConnected(String),

    /// 刷新令牌失效或 API 返回 401/403，需要用户重新授权
    #[error("Reauthorization required for integration {integration}")]
    ReauthRequired { integration: String },

    /// 日历 API 瞬时错误（调用方可有限重试）
    #[error("Calendar API error: {0}")]
    CalendarApi(String),

    #[error("LLM error: {0}")]
    LlmError(String),

    #[error("Tool timeout: {0}")]
    ToolTimeout(String),

    /// 步骤种类未注册：运行级致命错误，不可重试
    #[error("Unknown step kind: {0}")]
    UnknownStepKind(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AgentError {
    /// 是否属于必须上抛到编排层、转为 reauth action 令牌的错误
    pub fn is_reauth_class(&self) -> bool {
        matches!(
            self,
            AgentError::ReauthRequired { .. } | AgentError::NotConnected(_)
        )
    }

    /// 是否可有限重试（仅瞬时错误；权限 / 校验类永不重试）
    pub fn is_transient(&self) -> bool {
        matches!(self, AgentError::CalendarApi(_) | AgentError::LlmError(_))
    }

    /// 映射到信封错误码
    pub fn code(&self) -> ErrorCode {
        match self {
            AgentError::Validation(_) => ErrorCode::ValidationError,
            AgentError::NotFound(_) => ErrorCode::NotFound,
            AgentError::Unauthorized(_) => ErrorCode::Unauthorized,
            AgentError::ScopesMissing(_) => ErrorCode::ScopesMissing,
            AgentError::Conflict(_) | AgentError::SessionExpired(_) => ErrorCode::Conflict,
            AgentError::NotConnected(_) => ErrorCode::NotConnected,
            AgentError::ReauthRequired { .. } => ErrorCode::ReauthRequired,
            _ => ErrorCode::InternalError,
        }
    }
}

/// 工具信封与 step_result 中使用的错误码（wire 层）
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    ValidationError,
    NotFound,
    Unauthorized,
    ScopesMissing,
    Conflict,
    NotConnected,
    ReauthRequired,
    InternalError,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reauth_class_bubbles() {
        assert!(AgentError::ReauthRequired {
            integration: "google_calendar".into()
        }
        .is_reauth_class());
        assert!(AgentError::NotConnected("u1".into()).is_reauth_class());
        assert!(!AgentError::Conflict("double confirm".into()).is_reauth_class());
    }

    #[test]
    fn transient_excludes_permission_errors() {
        assert!(AgentError::CalendarApi("503".into()).is_transient());
        assert!(!AgentError::ScopesMissing("calendar.events.propose".into()).is_transient());
        assert!(!AgentError::Validation("bad args".into()).is_transient());
    }

    #[test]
    fn code_mapping() {
        assert_eq!(
            AgentError::SessionExpired("s1".into()).code(),
            ErrorCode::Conflict
        );
        assert_eq!(
            AgentError::Validation("x".into()).code(),
            ErrorCode::ValidationError
        );
    }
}
