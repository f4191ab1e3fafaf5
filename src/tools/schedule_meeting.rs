//! schedule_meeting 工具：通过连接向对方发起会议提案

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;

use crate::core::AgentError;
use crate::negotiation::{NegotiationService, ProposalRequest};
use crate::tools::{Tool, ToolContext};

pub struct ScheduleMeetingTool {
    negotiation: Arc<NegotiationService>,
}

#[derive(Debug, Deserialize)]
struct Args {
    connection_id: String,
    #[serde(default)]
    duration_minutes: Option<i64>,
    #[serde(default)]
    window_start_ms: Option<i64>,
    #[serde(default)]
    window_end_ms: Option<i64>,
    #[serde(default)]
    title: Option<String>,
}

impl ScheduleMeetingTool {
    pub fn new(negotiation: Arc<NegotiationService>) -> Self {
        Self { negotiation }
    }
}

#[async_trait]
impl Tool for ScheduleMeetingTool {
    fn name(&self) -> &str {
        "schedule_meeting"
    }

    fn description(&self) -> &str {
        "向指定连接的对方发起会议提案：计算双方共同空闲并发送候选时间"
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "connection_id": { "type": "string" },
                "duration_minutes": { "type": "integer" },
                "window_start_ms": { "type": "integer" },
                "window_end_ms": { "type": "integer" },
                "title": { "type": "string" }
            },
            "required": ["connection_id"]
        })
    }

    async fn execute(&self, ctx: &ToolContext, args: Value) -> Result<Value, AgentError> {
        let args: Args = serde_json::from_value(args)
            .map_err(|e| AgentError::Validation(format!("invalid schedule_meeting args: {e}")))?;

        let request = ProposalRequest {
            connection_id: args.connection_id,
            duration_minutes: args.duration_minutes,
            window_start_ms: args.window_start_ms,
            window_end_ms: args.window_end_ms,
            title: args.title,
        };
        let (session, slots) = self.negotiation.propose(&ctx.user_id, &request).await?;
        // 窗口内无共同空闲：未发出任何提案，必须作为步骤失败上报，
        // 否则运行会以"已发送时间选项"的收尾消息误导用户
        if slots.is_empty() {
            return Err(AgentError::Conflict(
                "no mutual availability in the requested window".to_string(),
            ));
        }

        Ok(serde_json::json!({
            "session_id": session.id,
            "status": session.status,
            "slots": slots,
        }))
    }
}
