//! 委托链接
//!
//! 外部对方（无账号）通过限时、限 scope 链接代表自己与 owner 协商。
//! 校验语义与连接权限一致：过期 / 已用 / 缺 scope 都不产生任何副作用。

use std::sync::Arc;

use crate::core::AgentError;
use crate::store::{DelegationLink, Permissions, SchedulerStore};

pub struct DelegationService {
    store: Arc<SchedulerStore>,
}

impl DelegationService {
    pub fn new(store: Arc<SchedulerStore>) -> Self {
        Self { store }
    }

    /// 签发委托链接（owner 决定授予的 scope 与有效期）
    pub async fn issue(
        &self,
        owner_id: &str,
        counterpart_label: &str,
        permissions: Permissions,
        ttl_ms: i64,
    ) -> DelegationLink {
        self.store
            .insert_delegation(DelegationLink::new(
                owner_id,
                counterpart_label,
                permissions,
                ttl_ms,
            ))
            .await
    }

    /// 校验链接可用并返回；过期与缺 scope 的表现等同于连接缺权限
    pub async fn validate(
        &self,
        token: &str,
        required_scopes: &[&str],
    ) -> Result<DelegationLink, AgentError> {
        let link = self.store.get_delegation(token).await?;
        if link.used {
            return Err(AgentError::Conflict(format!(
                "delegation {token} already used"
            )));
        }
        if link.is_expired(chrono::Utc::now().timestamp_millis()) {
            return Err(AgentError::Unauthorized(format!(
                "delegation {token} expired"
            )));
        }
        let missing = link.permissions.missing(required_scopes);
        if !missing.is_empty() {
            return Err(AgentError::ScopesMissing(missing.join(", ")));
        }
        Ok(link)
    }

    /// 确认成功后消费链接（一次性）
    pub async fn consume(&self, token: &str) -> Result<(), AgentError> {
        self.store.consume_delegation(token).await
    }
}
