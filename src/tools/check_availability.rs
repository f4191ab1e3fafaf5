//! check_availability 工具：查询某时间窗内请求方自己的忙闲

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;

use crate::calendar::CalendarService;
use crate::core::AgentError;
use crate::tools::{Tool, ToolContext};

pub struct CheckAvailabilityTool {
    calendar: Arc<CalendarService>,
}

#[derive(Debug, Deserialize)]
struct Args {
    start_ms: i64,
    end_ms: i64,
}

impl CheckAvailabilityTool {
    pub fn new(calendar: Arc<CalendarService>) -> Self {
        Self { calendar }
    }
}

#[async_trait]
impl Tool for CheckAvailabilityTool {
    fn name(&self) -> &str {
        "check_availability"
    }

    fn description(&self) -> &str {
        "检查用户在给定时间窗内是否空闲，并返回该窗口内的忙碌区间"
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "start_ms": { "type": "integer", "description": "窗口起点（epoch 毫秒）" },
                "end_ms": { "type": "integer", "description": "窗口终点（epoch 毫秒）" }
            },
            "required": ["start_ms", "end_ms"]
        })
    }

    async fn execute(&self, ctx: &ToolContext, args: Value) -> Result<Value, AgentError> {
        let args: Args = serde_json::from_value(args)
            .map_err(|e| AgentError::Validation(format!("invalid check_availability args: {e}")))?;
        if args.start_ms >= args.end_ms {
            return Err(AgentError::Validation(
                "start_ms must precede end_ms".to_string(),
            ));
        }

        let busy = self
            .calendar
            .get_availability(&ctx.user_id, args.start_ms, args.end_ms)
            .await?;
        let available = !busy.iter().any(|b| b.overlaps(args.start_ms, args.end_ms));

        Ok(serde_json::json!({
            "available": available,
            "busy": busy,
        }))
    }
}
