//! 通知协作方接口
//!
//! 在实时流之外向用户浮现待处理提案 / 确认结果。投递通道（推送、邮件）不在本引擎范围内。

use async_trait::async_trait;

use crate::core::AgentError;
use crate::store::{Notification, SchedulerStore};

/// 通知接收端：创建通知、将通知标记为需要行动（引用 session/message）
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn create_notification(
        &self,
        user_id: &str,
        kind: &str,
        title: &str,
        body: &str,
        data: Option<serde_json::Value>,
    ) -> Result<Notification, AgentError>;

    async fn mark_actionable(
        &self,
        notification_id: &str,
        actionable_ref: &str,
    ) -> Result<(), AgentError>;
}

/// 默认实现：写入 SchedulerStore 的通知表
pub struct StoreNotificationSink {
    store: std::sync::Arc<SchedulerStore>,
}

impl StoreNotificationSink {
    pub fn new(store: std::sync::Arc<SchedulerStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl NotificationSink for StoreNotificationSink {
    async fn create_notification(
        &self,
        user_id: &str,
        kind: &str,
        title: &str,
        body: &str,
        data: Option<serde_json::Value>,
    ) -> Result<Notification, AgentError> {
        let notification = Notification::new(user_id, kind, title, body, data);
        Ok(self.store.insert_notification(notification).await)
    }

    async fn mark_actionable(
        &self,
        notification_id: &str,
        actionable_ref: &str,
    ) -> Result<(), AgentError> {
        self.store
            .mark_notification_actionable(notification_id, actionable_ref)
            .await
    }
}
