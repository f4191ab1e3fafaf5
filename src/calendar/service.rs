//! 日历韧性层
//!
//! 包装 CalendarApi：每次调用前校验令牌过期并先刷新（恰好一次、原子持久化），
//! 错误折算为 NotConnected / ReauthRequired / 瞬时三类；瞬时错误带退避有限重试。
//! 多账号读操作跨全部激活集成聚合，部分失败静默降级——写操作从不降级。

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use crate::calendar::api::{BusyInterval, CalendarApi, CalendarApiError, CalendarEvent, EventDraft};
use crate::config::CalendarSection;
use crate::core::AgentError;
use crate::store::{CalendarIntegration, SchedulerStore};

pub struct CalendarService {
    api: Arc<dyn CalendarApi>,
    store: Arc<SchedulerStore>,
    cfg: CalendarSection,
}

impl CalendarService {
    pub fn new(api: Arc<dyn CalendarApi>, store: Arc<SchedulerStore>, cfg: CalendarSection) -> Self {
        Self { api, store, cfg }
    }

    fn now_ms() -> i64 {
        chrono::Utc::now().timestamp_millis()
    }

    fn map_api_error(integration: &CalendarIntegration, e: CalendarApiError) -> AgentError {
        match e {
            CalendarApiError::Unauthorized | CalendarApiError::InvalidGrant => {
                AgentError::ReauthRequired {
                    integration: integration.provider.clone(),
                }
            }
            CalendarApiError::Transient(msg) => AgentError::CalendarApi(msg),
        }
    }

    /// 确保令牌未过验证过期：过期则刷新恰好一次并原子持久化，刷新失败归为 ReauthRequired
    async fn fresh_token(&self, integration: &CalendarIntegration) -> Result<String, AgentError> {
        if !integration.token_expired(Self::now_ms()) {
            return Ok(integration.access_token.clone());
        }
        let refresh_token = integration.refresh_token.as_deref().ok_or_else(|| {
            AgentError::ReauthRequired {
                integration: integration.provider.clone(),
            }
        })?;
        let refreshed = self
            .api
            .refresh_token(refresh_token)
            .await
            .map_err(|e| Self::map_api_error(integration, e))?;
        let expires_at = Self::now_ms() + refreshed.expires_in_secs * 1000;
        self.store
            .update_integration_token(&integration.id, refreshed.access_token.clone(), expires_at)
            .await?;
        Ok(refreshed.access_token)
    }

    /// 瞬时错误有限重试（指数退避）；reauth / 校验类立即返回
    async fn retry_transient<T, F, Fut>(&self, mut op: F) -> Result<T, AgentError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, AgentError>>,
    {
        let mut attempt = 0u32;
        loop {
            match op().await {
                Ok(v) => return Ok(v),
                Err(e) if e.is_transient() && attempt < self.cfg.max_retries => {
                    let backoff = self.cfg.backoff_base_ms * (1u64 << attempt);
                    tracing::debug!(attempt, backoff_ms = backoff, error = %e, "retrying calendar call");
                    tokio::time::sleep(Duration::from_millis(backoff)).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn freebusy_one(
        &self,
        integration: &CalendarIntegration,
        from_ms: i64,
        to_ms: i64,
    ) -> Result<Vec<BusyInterval>, AgentError> {
        let token = self.fresh_token(integration).await?;
        self.retry_transient(|| async {
            self.api
                .freebusy(&token, from_ms, to_ms)
                .await
                .map_err(|e| Self::map_api_error(integration, e))
        })
        .await
    }

    /// 聚合读：全部账号都拿不到数据时，优先浮现 reauth；部分成功则静默返回部分结果
    pub async fn get_availability(
        &self,
        user_id: &str,
        from_ms: i64,
        to_ms: i64,
    ) -> Result<Vec<BusyInterval>, AgentError> {
        let integrations = self.store.active_integrations(user_id).await;
        if integrations.is_empty() {
            return Err(AgentError::NotConnected(user_id.to_string()));
        }

        let mut busy = Vec::new();
        let mut ok_count = 0usize;
        let mut reauth_err: Option<AgentError> = None;
        let mut other_err: Option<AgentError> = None;

        for integration in &integrations {
            match self.freebusy_one(integration, from_ms, to_ms).await {
                Ok(mut intervals) => {
                    ok_count += 1;
                    busy.append(&mut intervals);
                }
                Err(e) if e.is_reauth_class() => {
                    tracing::warn!(user = user_id, provider = %integration.provider, "account needs reauth, degrading read");
                    reauth_err = Some(e);
                }
                Err(e) => {
                    tracing::warn!(user = user_id, provider = %integration.provider, error = %e, "account read failed, degrading");
                    other_err = Some(e);
                }
            }
        }

        if ok_count == 0 {
            if let Some(e) = reauth_err {
                return Err(e);
            }
            return Err(other_err.unwrap_or_else(|| AgentError::NotConnected(user_id.to_string())));
        }
        busy.sort_by_key(|b| b.start_ms);
        Ok(busy)
    }

    /// 指定区间是否空闲（跨全部账号无任何重叠忙碌区间）
    pub async fn check_availability(
        &self,
        user_id: &str,
        start_ms: i64,
        end_ms: i64,
    ) -> Result<bool, AgentError> {
        let busy = self.get_availability(user_id, start_ms, end_ms).await?;
        Ok(!busy.iter().any(|b| b.overlaps(start_ms, end_ms)))
    }

    /// 未来 days 天的事件（跨账号聚合，按开始时间排序，截断 max 条）
    pub async fn fetch_events(
        &self,
        user_id: &str,
        days: i64,
        max: usize,
    ) -> Result<Vec<CalendarEvent>, AgentError> {
        let integrations = self.store.active_integrations(user_id).await;
        if integrations.is_empty() {
            return Err(AgentError::NotConnected(user_id.to_string()));
        }
        let from_ms = Self::now_ms();
        let to_ms = from_ms + days * 24 * 60 * 60 * 1000;

        let mut events = Vec::new();
        let mut ok_count = 0usize;
        let mut reauth_err: Option<AgentError> = None;
        let mut other_err: Option<AgentError> = None;

        for integration in &integrations {
            let result = async {
                let token = self.fresh_token(integration).await?;
                self.retry_transient(|| async {
                    self.api
                        .list_events(&token, from_ms, to_ms, max)
                        .await
                        .map_err(|e| Self::map_api_error(integration, e))
                })
                .await
            }
            .await;
            match result {
                Ok(mut items) => {
                    ok_count += 1;
                    events.append(&mut items);
                }
                Err(e) if e.is_reauth_class() => reauth_err = Some(e),
                Err(e) => other_err = Some(e),
            }
        }

        if ok_count == 0 {
            if let Some(e) = reauth_err {
                return Err(e);
            }
            return Err(other_err.unwrap_or_else(|| AgentError::NotConnected(user_id.to_string())));
        }
        events.sort_by_key(|e| e.start_ms);
        events.truncate(max);
        Ok(events)
    }

    /// 写事件：使用第一个激活账号，写操作从不降级
    pub async fn create_event(
        &self,
        user_id: &str,
        draft: &EventDraft,
    ) -> Result<CalendarEvent, AgentError> {
        let integrations = self.store.active_integrations(user_id).await;
        let integration = integrations
            .first()
            .ok_or_else(|| AgentError::NotConnected(user_id.to_string()))?;
        let token = self.fresh_token(integration).await?;
        self.retry_transient(|| async {
            self.api
                .create_event(&token, draft)
                .await
                .map_err(|e| Self::map_api_error(integration, e))
        })
        .await
    }

    pub async fn delete_event(&self, user_id: &str, event_id: &str) -> Result<(), AgentError> {
        let integrations = self.store.active_integrations(user_id).await;
        let integration = integrations
            .first()
            .ok_or_else(|| AgentError::NotConnected(user_id.to_string()))?;
        let token = self.fresh_token(integration).await?;
        self.retry_transient(|| async {
            self.api
                .delete_event(&token, event_id)
                .await
                .map_err(|e| Self::map_api_error(integration, e))
        })
        .await
    }
}
