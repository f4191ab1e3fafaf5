//! 连接生命周期服务
//!
//! 邀请 -> 接受 -> 撤销，仅状态迁移。scope 检查集中在这里：
//! 任何状态变更动作之前先查权限，缺 scope 返回专门错误且不产生副作用。

use std::sync::Arc;

use crate::core::AgentError;
use crate::store::{Connection, ConnectionStatus, Permissions, SchedulerStore};

pub struct ConnectionService {
    store: Arc<SchedulerStore>,
}

impl ConnectionService {
    pub fn new(store: Arc<SchedulerStore>) -> Self {
        Self { store }
    }

    /// 发出连接邀请（pending）
    pub async fn create(
        &self,
        requester_id: &str,
        target_id: &str,
        display_name: &str,
        permissions: Permissions,
    ) -> Result<Connection, AgentError> {
        if requester_id == target_id {
            return Err(AgentError::Validation(
                "cannot connect a user to themselves".to_string(),
            ));
        }
        Ok(self
            .store
            .insert_connection(Connection::new(
                requester_id,
                target_id,
                display_name,
                permissions,
            ))
            .await)
    }

    /// 目标用户接受邀请
    pub async fn accept(&self, connection_id: &str, user_id: &str) -> Result<Connection, AgentError> {
        let conn = self.store.get_connection(connection_id).await?;
        if conn.target_id != user_id {
            return Err(AgentError::Unauthorized(format!(
                "user {user_id} is not the invite target"
            )));
        }
        self.store.accept_connection(connection_id).await
    }

    /// 任一方撤销
    pub async fn revoke(&self, connection_id: &str, user_id: &str) -> Result<Connection, AgentError> {
        let conn = self.store.get_connection(connection_id).await?;
        if conn.peer_of(user_id).is_none() {
            return Err(AgentError::Unauthorized(format!(
                "user {user_id} is not part of this connection"
            )));
        }
        self.store.revoke_connection(connection_id).await
    }

    pub async fn list(&self, user_id: &str) -> Vec<Connection> {
        self.store.list_connections(user_id).await
    }

    /// 仅激活连接（resolver 的候选集）
    pub async fn active(&self, user_id: &str) -> Vec<Connection> {
        self.store.active_connections(user_id).await
    }

    /// 校验连接激活且具备全部 scope；缺失返回 ScopesMissing，不做任何变更
    pub async fn require_scopes(
        &self,
        connection_id: &str,
        required: &[&str],
    ) -> Result<Connection, AgentError> {
        let conn = self.store.get_connection(connection_id).await?;
        if conn.status != ConnectionStatus::Active {
            return Err(AgentError::Unauthorized(format!(
                "connection {connection_id} is not active"
            )));
        }
        let missing = conn.permissions.missing(required);
        if !missing.is_empty() {
            return Err(AgentError::ScopesMissing(missing.join(", ")));
        }
        Ok(conn)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::scopes;

    #[tokio::test]
    async fn accept_requires_target() {
        let store = Arc::new(SchedulerStore::new());
        let service = ConnectionService::new(store);
        let conn = service
            .create("alice", "bob", "Bob", Permissions::default())
            .await
            .unwrap();
        assert!(service.accept(&conn.id, "alice").await.is_err());
        assert!(service.accept(&conn.id, "bob").await.is_ok());
    }

    #[tokio::test]
    async fn scope_check_reports_missing() {
        let store = Arc::new(SchedulerStore::new());
        let service = ConnectionService::new(store);
        let conn = service
            .create(
                "alice",
                "bob",
                "Bob",
                Permissions::new(vec![scopes::AVAILABILITY_READ.to_string()]),
            )
            .await
            .unwrap();
        service.accept(&conn.id, "bob").await.unwrap();

        let err = service
            .require_scopes(&conn.id, &[scopes::AVAILABILITY_READ, scopes::EVENTS_PROPOSE])
            .await
            .unwrap_err();
        match err {
            AgentError::ScopesMissing(missing) => {
                assert!(missing.contains(scopes::EVENTS_PROPOSE))
            }
            other => panic!("expected ScopesMissing, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn pending_connection_is_not_usable() {
        let store = Arc::new(SchedulerStore::new());
        let service = ConnectionService::new(store);
        let conn = service
            .create("alice", "bob", "Bob", Permissions::default())
            .await
            .unwrap();
        let err = service.require_scopes(&conn.id, &[]).await.unwrap_err();
        assert!(matches!(err, AgentError::Unauthorized(_)));
    }
}
