//! confirm_meeting 工具：确认一个协商中的会话

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;

use crate::core::AgentError;
use crate::negotiation::{ConfirmSelection, NegotiationService};
use crate::tools::{Tool, ToolContext};

pub struct ConfirmMeetingTool {
    negotiation: Arc<NegotiationService>,
}

#[derive(Debug, Deserialize)]
struct Args {
    session_id: String,
    /// 最新提案里的槽位序号；与 start_ms/end_ms 二选一
    #[serde(default)]
    selection_index: Option<usize>,
    #[serde(default)]
    start_ms: Option<i64>,
    #[serde(default)]
    end_ms: Option<i64>,
}

impl ConfirmMeetingTool {
    pub fn new(negotiation: Arc<NegotiationService>) -> Self {
        Self { negotiation }
    }
}

#[async_trait]
impl Tool for ConfirmMeetingTool {
    fn name(&self) -> &str {
        "confirm_meeting"
    }

    fn description(&self) -> &str {
        "确认协商中的会议：按提案序号或显式起止时间敲定，并写入双方日历"
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "session_id": { "type": "string" },
                "selection_index": { "type": "integer" },
                "start_ms": { "type": "integer" },
                "end_ms": { "type": "integer" }
            },
            "required": ["session_id"]
        })
    }

    async fn execute(&self, ctx: &ToolContext, args: Value) -> Result<Value, AgentError> {
        let args: Args = serde_json::from_value(args)
            .map_err(|e| AgentError::Validation(format!("invalid confirm_meeting args: {e}")))?;

        let selection = match (args.selection_index, args.start_ms, args.end_ms) {
            (Some(index), _, _) => ConfirmSelection::Index(index),
            (None, Some(start_ms), Some(end_ms)) => ConfirmSelection::Custom { start_ms, end_ms },
            _ => {
                return Err(AgentError::Validation(
                    "confirm_meeting needs selection_index or start_ms+end_ms".to_string(),
                ))
            }
        };

        let confirmed = self
            .negotiation
            .confirm(&ctx.user_id, &args.session_id, selection)
            .await?;

        Ok(serde_json::json!({
            "session_id": confirmed.session.id,
            "status": confirmed.session.status,
            "slot": confirmed.slot,
            "initiator_event_written": confirmed.initiator_event_written,
            "counterpart_event_written": confirmed.counterpart_event_written,
        }))
    }
}
