//! list_connections 工具：列出请求方的代理连接

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::core::AgentError;
use crate::negotiation::ConnectionService;
use crate::tools::{Tool, ToolContext};

pub struct ListConnectionsTool {
    connections: Arc<ConnectionService>,
}

impl ListConnectionsTool {
    pub fn new(connections: Arc<ConnectionService>) -> Self {
        Self { connections }
    }
}

#[async_trait]
impl Tool for ListConnectionsTool {
    fn name(&self) -> &str {
        "list_connections"
    }

    fn description(&self) -> &str {
        "列出当前用户的全部代理连接（含状态与授权 scope）"
    }

    async fn execute(&self, ctx: &ToolContext, _args: Value) -> Result<Value, AgentError> {
        let connections = self.connections.list(&ctx.user_id).await;
        let items: Vec<Value> = connections
            .iter()
            .map(|c| {
                serde_json::json!({
                    "connection_id": c.id,
                    "display_name": c.display_name,
                    "status": c.status,
                    "scopes": c.permissions.scopes,
                })
            })
            .collect();
        Ok(serde_json::json!({ "connections": items }))
    }
}
