//! 工具执行器
//!
//! 持有 ToolRegistry 与全局超时，每次调用在超时内执行并输出结构化审计日志（JSON）。
//! 非重授权类错误统一封装进 ToolEnvelope（ok/err + 错误码），调用方不需要解析字符串；
//! 重授权类错误（ReauthRequired / NotConnected）原样上抛，由上层转成 action 终止信号。

use std::time::{Duration, Instant};

use futures_util::stream::{FuturesUnordered, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::time::timeout;

use crate::core::{AgentError, ErrorCode};
use crate::tools::{ToolContext, ToolRegistry};

/// 工具结果信封：ok 携带 data，失败携带错误码与消息
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolEnvelope {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ToolFailure>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolFailure {
    pub code: ErrorCode,
    pub message: String,
}

impl ToolEnvelope {
    pub fn success(data: serde_json::Value) -> Self {
        Self {
            ok: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn failure(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            ok: false,
            data: None,
            error: Some(ToolFailure {
                code,
                message: message.into(),
            }),
        }
    }
}

/// 工具执行器：对每次调用施加超时，并把结果收敛为信封
pub struct ToolExecutor {
    registry: ToolRegistry,
    timeout: Duration,
}

impl ToolExecutor {
    pub fn new(registry: ToolRegistry, timeout_secs: u64) -> Self {
        Self {
            registry,
            timeout: Duration::from_secs(timeout_secs),
        }
    }

    /// 执行指定工具；只有重授权类错误会以 Err 上抛，其余失败都落进信封
    pub async fn execute(
        &self,
        ctx: &ToolContext,
        tool_name: &str,
        args: serde_json::Value,
    ) -> Result<ToolEnvelope, AgentError> {
        let start = Instant::now();
        let args_preview = args_preview(&args);

        let tool = match self.registry.get(tool_name) {
            Some(tool) => tool,
            None => {
                self.audit(tool_name, false, "unknown_tool", start, &args_preview);
                return Ok(ToolEnvelope::failure(
                    ErrorCode::NotFound,
                    format!("unknown tool: {tool_name}"),
                ));
            }
        };

        let result = timeout(self.timeout, tool.execute(ctx, args)).await;
        let outcome = match &result {
            Ok(Ok(_)) => "ok",
            Ok(Err(e)) if e.is_reauth_class() => "reauth",
            Ok(Err(_)) => "error",
            Err(_) => "timeout",
        };
        self.audit(tool_name, outcome == "ok", outcome, start, &args_preview);

        match result {
            Ok(Ok(data)) => Ok(ToolEnvelope::success(data)),
            Ok(Err(e)) if e.is_reauth_class() => Err(e),
            Ok(Err(e)) => Ok(ToolEnvelope::failure(e.code(), e.to_string())),
            Err(_) => {
                let e = AgentError::ToolTimeout(tool_name.to_string());
                Ok(ToolEnvelope::failure(e.code(), e.to_string()))
            }
        }
    }

    /// 并发执行一批独立调用，结果按提交顺序返回；任一调用触发重授权立即整体上抛
    pub async fn execute_batch(
        &self,
        ctx: &ToolContext,
        calls: Vec<(String, serde_json::Value)>,
    ) -> Result<Vec<ToolEnvelope>, AgentError> {
        let mut pending: FuturesUnordered<_> = calls
            .into_iter()
            .enumerate()
            .map(|(idx, (name, args))| async move {
                (idx, self.execute(ctx, &name, args).await)
            })
            .collect();

        let mut slots: Vec<Option<ToolEnvelope>> = Vec::new();
        while let Some((idx, result)) = pending.next().await {
            let envelope = result?;
            if slots.len() <= idx {
                slots.resize(idx + 1, None);
            }
            slots[idx] = Some(envelope);
        }
        Ok(slots.into_iter().flatten().collect())
    }

    fn audit(&self, tool_name: &str, ok: bool, outcome: &str, start: Instant, args_preview: &str) {
        let audit = serde_json::json!({
            "event": "tool_audit",
            "tool": tool_name,
            "ok": ok,
            "outcome": outcome,
            "duration_ms": start.elapsed().as_millis() as u64,
            "args_preview": args_preview,
        });
        tracing::info!(audit = %audit.to_string(), "tool");
    }

    /// 已注册工具的 schema 描述（Web API 暴露给前端/调用方）
    pub fn schema_json(&self) -> String {
        self.registry.to_schema_json()
    }
}

fn args_preview(args: &serde_json::Value) -> String {
    let s = args.to_string();
    if s.len() > 200 {
        format!("{}...", s.chars().take(200).collect::<String>())
    } else {
        s
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    struct EchoTool;

    #[async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &str {
            "echo"
        }
        fn description(&self) -> &str {
            "echo back the args"
        }
        async fn execute(
            &self,
            _ctx: &ToolContext,
            args: serde_json::Value,
        ) -> Result<serde_json::Value, AgentError> {
            Ok(args)
        }
    }

    struct FailingTool;

    #[async_trait]
    impl Tool for FailingTool {
        fn name(&self) -> &str {
            "failing"
        }
        fn description(&self) -> &str {
            "always fails with a validation error"
        }
        async fn execute(
            &self,
            _ctx: &ToolContext,
            _args: serde_json::Value,
        ) -> Result<serde_json::Value, AgentError> {
            Err(AgentError::Validation("bad input".to_string()))
        }
    }

    struct ReauthTool;

    #[async_trait]
    impl Tool for ReauthTool {
        fn name(&self) -> &str {
            "reauth"
        }
        fn description(&self) -> &str {
            "simulates an expired calendar grant"
        }
        async fn execute(
            &self,
            _ctx: &ToolContext,
            _args: serde_json::Value,
        ) -> Result<serde_json::Value, AgentError> {
            Err(AgentError::ReauthRequired {
                integration: "google_calendar".to_string(),
            })
        }
    }

    struct SlowTool;

    #[async_trait]
    impl Tool for SlowTool {
        fn name(&self) -> &str {
            "slow"
        }
        fn description(&self) -> &str {
            "sleeps longer than the executor timeout"
        }
        async fn execute(
            &self,
            _ctx: &ToolContext,
            _args: serde_json::Value,
        ) -> Result<serde_json::Value, AgentError> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(serde_json::json!({}))
        }
    }

    use crate::tools::Tool;

    fn executor() -> ToolExecutor {
        let mut registry = ToolRegistry::new();
        registry.register(EchoTool);
        registry.register(FailingTool);
        registry.register(ReauthTool);
        registry.register(SlowTool);
        ToolExecutor::new(registry, 1)
    }

    fn ctx() -> ToolContext {
        ToolContext {
            user_id: "user_test".to_string(),
        }
    }

    #[tokio::test]
    async fn success_is_enveloped() {
        let env = executor()
            .execute(&ctx(), "echo", serde_json::json!({"x": 1}))
            .await
            .unwrap();
        assert!(env.ok);
        assert_eq!(env.data, Some(serde_json::json!({"x": 1})));
    }

    #[tokio::test]
    async fn unknown_tool_is_not_found_envelope() {
        let env = executor()
            .execute(&ctx(), "missing", serde_json::json!({}))
            .await
            .unwrap();
        assert!(!env.ok);
        assert_eq!(env.error.unwrap().code, ErrorCode::NotFound);
    }

    #[tokio::test]
    async fn validation_failure_keeps_typed_code() {
        let env = executor()
            .execute(&ctx(), "failing", serde_json::json!({}))
            .await
            .unwrap();
        assert_eq!(env.error.unwrap().code, ErrorCode::ValidationError);
    }

    #[tokio::test]
    async fn reauth_errors_bypass_the_envelope() {
        let err = executor()
            .execute(&ctx(), "reauth", serde_json::json!({}))
            .await
            .unwrap_err();
        assert!(err.is_reauth_class());
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_is_enveloped() {
        let env = executor()
            .execute(&ctx(), "slow", serde_json::json!({}))
            .await
            .unwrap();
        assert!(!env.ok);
        assert_eq!(env.error.unwrap().code, ErrorCode::InternalError);
    }

    #[tokio::test]
    async fn batch_preserves_submission_order() {
        let exec = executor();
        let results = exec
            .execute_batch(
                &ctx(),
                vec![
                    ("echo".to_string(), serde_json::json!({"i": 0})),
                    ("failing".to_string(), serde_json::json!({})),
                    ("echo".to_string(), serde_json::json!({"i": 2})),
                ],
            )
            .await
            .unwrap();
        assert_eq!(results.len(), 3);
        assert_eq!(results[0].data, Some(serde_json::json!({"i": 0})));
        assert!(!results[1].ok);
        assert_eq!(results[2].data, Some(serde_json::json!({"i": 2})));
    }

    #[tokio::test]
    async fn batch_fails_fast_on_reauth() {
        let exec = executor();
        let err = exec
            .execute_batch(
                &ctx(),
                vec![
                    ("echo".to_string(), serde_json::json!({})),
                    ("reauth".to_string(), serde_json::json!({})),
                ],
            )
            .await
            .unwrap_err();
        assert!(err.is_reauth_class());
    }
}
