//! 多步编排器
//!
//! 顺序执行一个步骤计划，全程往流里发控制令牌：
//! initiated -> (step_start/progress/step_result/step_end)* -> 终止。
//! 正常路径终止是 complete + 恰好一条 separate_message；
//! 重授权类错误改为 action 终止，不再发 complete 与 separate_message。

use tokio_util::sync::CancellationToken;

use crate::core::AgentError;
use crate::orchestrator::registry::{StepContext, StepRegistry};
use crate::orchestrator::step::{RunContext, RunStatus, Step, StepOutputs, StepRecord, StepStatus};
use crate::protocol::{StreamEncoder, StreamEvent};

/// 一次运行的计划：推理说明、步骤与成败摘要文案
#[derive(Debug, Clone)]
pub struct RunPlan {
    pub reasoning: String,
    pub confidence: f64,
    pub steps: Vec<Step>,
    pub success_message: String,
    pub failure_message: String,
}

/// 编排器：持有执行器注册表
pub struct Orchestrator {
    registry: StepRegistry,
}

impl Orchestrator {
    pub fn new(registry: StepRegistry) -> Self {
        Self { registry }
    }

    /// 执行计划直至终止令牌发出，返回完整运行留痕；
    /// 留痕只归调用方所有，运行结束后编排器不保留任何状态
    pub async fn run(
        &self,
        user_id: &str,
        plan: RunPlan,
        encoder: &mut StreamEncoder,
        cancel: &CancellationToken,
    ) -> RunContext {
        let mut run = RunContext::new(user_id, plan.steps.clone());
        let run_id = run.id.clone();

        encoder.send(StreamEvent::Initiated {
            reasoning: plan.reasoning.clone(),
            confidence: plan.confidence,
        });

        let mut outputs = StepOutputs::default();
        let mut failed = false;
        let progress = encoder.progress_handle();

        for index in 0..run.steps.len() {
            // 取消只在步骤边界生效，执行中的步骤不被打断
            if cancel.is_cancelled() {
                tracing::info!(run = %run_id, "run cancelled between steps");
                for step in &mut run.steps[index..] {
                    step.status = StepStatus::Skipped;
                }
                failed = true;
                break;
            }

            run.current_step_index = index;
            let step = run.steps[index].clone();
            run.steps[index].status = StepStatus::Running;
            run.touch();

            encoder.send(StreamEvent::StepStart {
                id: step.id.clone(),
                name: step.name.clone(),
            });

            let result = self
                .execute_step(&run_id, user_id, &step, &outputs, &progress)
                .await;

            match result {
                Ok(data) => {
                    run.steps[index].status = StepStatus::Completed;
                    outputs.insert(&step.id, data.clone());
                    run.records.push(StepRecord {
                        step_id: step.id.clone(),
                        status: StepStatus::Completed,
                        error_code: None,
                        detail: None,
                        data: Some(data),
                    });
                    encoder.send(StreamEvent::StepResult {
                        id: step.id.clone(),
                        status: "completed".to_string(),
                        error_code: None,
                        detail: None,
                    });
                    encoder.send(StreamEvent::StepEnd {
                        id: step.id.clone(),
                    });
                }
                Err(e) if e.is_reauth_class() => {
                    run.steps[index].status = StepStatus::Failed;
                    run.records.push(StepRecord {
                        step_id: step.id.clone(),
                        status: StepStatus::Failed,
                        error_code: Some(e.code()),
                        detail: Some(e.to_string()),
                        data: None,
                    });
                    encoder.send(StreamEvent::StepResult {
                        id: step.id.clone(),
                        status: "failed".to_string(),
                        error_code: Some(e.code()),
                        detail: Some(e.to_string()),
                    });
                    encoder.send(StreamEvent::StepEnd {
                        id: step.id.clone(),
                    });
                    // 重授权终止：action 取代 complete，separate_message 也不发
                    encoder.send(StreamEvent::Action {
                        kind: reauth_action_kind(&e),
                    });
                    run.status = RunStatus::Failed;
                    run.touch();
                    return run;
                }
                Err(e) => {
                    run.steps[index].status = StepStatus::Failed;
                    run.records.push(StepRecord {
                        step_id: step.id.clone(),
                        status: StepStatus::Failed,
                        error_code: Some(e.code()),
                        detail: Some(e.to_string()),
                        data: None,
                    });
                    encoder.send(StreamEvent::StepResult {
                        id: step.id.clone(),
                        status: "failed".to_string(),
                        error_code: Some(e.code()),
                        detail: Some(e.to_string()),
                    });
                    encoder.send(StreamEvent::StepEnd {
                        id: step.id.clone(),
                    });

                    let fatal = matches!(e, AgentError::UnknownStepKind(_));
                    if step.required || fatal {
                        tracing::warn!(run = %run_id, step = %step.id, error = %e,
                            "required step failed, aborting run");
                        for rest in &mut run.steps[index + 1..] {
                            rest.status = StepStatus::Skipped;
                        }
                        failed = true;
                        break;
                    }
                    tracing::info!(run = %run_id, step = %step.id, error = %e,
                        "optional step failed, continuing");
                }
            }
            run.touch();
        }

        run.status = if failed {
            RunStatus::Failed
        } else {
            RunStatus::Completed
        };
        run.touch();

        encoder.send(StreamEvent::Complete);
        let text = if failed {
            plan.failure_message
        } else {
            plan.success_message
        };
        encoder.send(StreamEvent::SeparateMessage { text });
        run
    }

    async fn execute_step(
        &self,
        run_id: &str,
        user_id: &str,
        step: &Step,
        outputs: &StepOutputs,
        progress: &crate::protocol::ProgressHandle,
    ) -> Result<serde_json::Value, AgentError> {
        let executor = self.registry.get(&step.kind)?;
        let ctx = StepContext {
            run_id,
            user_id,
            outputs,
        };
        executor.execute(&ctx, &step.args, progress).await
    }

}

/// reauth action 令牌的 kind：{integration}_reauth_required
fn reauth_action_kind(e: &AgentError) -> String {
    match e {
        AgentError::ReauthRequired { integration } => format!("{integration}_reauth_required"),
        _ => "calendar_reauth_required".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{decode_line, ProgressHandle, StreamFrame};
    use async_trait::async_trait;
    use serde_json::Value;
    use std::sync::Arc;

    struct OkStep;

    #[async_trait]
    impl crate::orchestrator::registry::StepExecutor for OkStep {
        fn kind(&self) -> &str {
            "ok"
        }
        async fn execute(
            &self,
            _ctx: &StepContext<'_>,
            args: &Value,
            progress: &ProgressHandle,
        ) -> Result<Value, AgentError> {
            progress.report("working");
            Ok(args.clone())
        }
    }

    struct FailStep;

    #[async_trait]
    impl crate::orchestrator::registry::StepExecutor for FailStep {
        fn kind(&self) -> &str {
            "fail"
        }
        async fn execute(
            &self,
            _ctx: &StepContext<'_>,
            _args: &Value,
            _progress: &ProgressHandle,
        ) -> Result<Value, AgentError> {
            Err(AgentError::Validation("boom".to_string()))
        }
    }

    struct ReauthStep;

    #[async_trait]
    impl crate::orchestrator::registry::StepExecutor for ReauthStep {
        fn kind(&self) -> &str {
            "reauth"
        }
        async fn execute(
            &self,
            _ctx: &StepContext<'_>,
            _args: &Value,
            _progress: &ProgressHandle,
        ) -> Result<Value, AgentError> {
            Err(AgentError::ReauthRequired {
                integration: "google_calendar".to_string(),
            })
        }
    }

    /// 回显上一步输出，用于验证步骤间传值
    struct ChainStep;

    #[async_trait]
    impl crate::orchestrator::registry::StepExecutor for ChainStep {
        fn kind(&self) -> &str {
            "chain"
        }
        async fn execute(
            &self,
            ctx: &StepContext<'_>,
            _args: &Value,
            _progress: &ProgressHandle,
        ) -> Result<Value, AgentError> {
            Ok(ctx.outputs.latest().cloned().unwrap_or(Value::Null))
        }
    }

    fn orchestrator() -> Arc<Orchestrator> {
        let mut registry = StepRegistry::new();
        registry.register(OkStep);
        registry.register(FailStep);
        registry.register(ReauthStep);
        registry.register(ChainStep);
        Arc::new(Orchestrator::new(registry))
    }

    fn plan(steps: Vec<Step>) -> RunPlan {
        RunPlan {
            reasoning: "test plan".to_string(),
            confidence: 0.8,
            steps,
            success_message: "all done".to_string(),
            failure_message: "something went wrong".to_string(),
        }
    }

    async fn run_and_collect(
        orch: &Arc<Orchestrator>,
        steps: Vec<Step>,
    ) -> (RunStatus, Vec<StreamEvent>) {
        let (mut encoder, mut rx) = StreamEncoder::channel();
        let cancel = CancellationToken::new();
        let status = orch
            .run("user_a", plan(steps), &mut encoder, &cancel)
            .await
            .status;
        drop(encoder);

        let mut events = Vec::new();
        while let Ok(line) = rx.try_recv() {
            if let StreamFrame::Token(event) = decode_line(line.trim_end()) {
                events.push(event);
            }
        }
        (status, events)
    }

    #[tokio::test]
    async fn happy_path_ends_with_complete_and_one_message() {
        let orch = orchestrator();
        let steps = vec![
            Step::new("first", "ok", true, serde_json::json!({"n": 1})),
            Step::new("second", "ok", true, serde_json::json!({"n": 2})),
        ];
        let (status, events) = run_and_collect(&orch, steps).await;

        assert_eq!(status, RunStatus::Completed);
        assert!(matches!(events[0], StreamEvent::Initiated { .. }));
        let terminals = events.iter().filter(|e| e.is_terminal()).count();
        assert_eq!(terminals, 1);
        let messages: Vec<_> = events
            .iter()
            .filter_map(|e| match e {
                StreamEvent::SeparateMessage { text } => Some(text.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(messages, vec!["all done".to_string()]);
    }

    #[tokio::test]
    async fn required_failure_skips_rest_and_reports_failure() {
        let orch = orchestrator();
        let steps = vec![
            Step::new("bad", "fail", true, serde_json::json!({})),
            Step::new("never", "ok", true, serde_json::json!({})),
        ];
        let (status, events) = run_and_collect(&orch, steps).await;

        assert_eq!(status, RunStatus::Failed);
        // 第二步从未开始
        let starts = events
            .iter()
            .filter(|e| matches!(e, StreamEvent::StepStart { .. }))
            .count();
        assert_eq!(starts, 1);
        assert!(events.iter().any(|e| matches!(
            e,
            StreamEvent::SeparateMessage { text } if text == "something went wrong"
        )));
    }

    #[tokio::test]
    async fn optional_failure_continues() {
        let orch = orchestrator();
        let steps = vec![
            Step::new("best effort", "fail", false, serde_json::json!({})),
            Step::new("real work", "ok", true, serde_json::json!({})),
        ];
        let (status, events) = run_and_collect(&orch, steps).await;

        assert_eq!(status, RunStatus::Completed);
        let starts = events
            .iter()
            .filter(|e| matches!(e, StreamEvent::StepStart { .. }))
            .count();
        assert_eq!(starts, 2);
    }

    #[tokio::test]
    async fn reauth_terminates_with_action_and_no_message() {
        let orch = orchestrator();
        let steps = vec![
            Step::new("auth", "reauth", true, serde_json::json!({})),
            Step::new("never", "ok", true, serde_json::json!({})),
        ];
        let (status, events) = run_and_collect(&orch, steps).await;

        assert_eq!(status, RunStatus::Failed);
        let last = events.last().unwrap();
        assert_eq!(
            *last,
            StreamEvent::Action {
                kind: "google_calendar_reauth_required".to_string()
            }
        );
        assert!(!events
            .iter()
            .any(|e| matches!(e, StreamEvent::SeparateMessage { .. })));
        assert!(!events.iter().any(|e| matches!(e, StreamEvent::Complete)));
    }

    #[tokio::test]
    async fn unknown_kind_is_fatal() {
        let orch = orchestrator();
        let steps = vec![
            Step::new("mystery", "no_such_kind", false, serde_json::json!({})),
            Step::new("never", "ok", true, serde_json::json!({})),
        ];
        let (status, events) = run_and_collect(&orch, steps).await;

        // kind 未注册时即使标记为可选也不降级
        assert_eq!(status, RunStatus::Failed);
        let starts = events
            .iter()
            .filter(|e| matches!(e, StreamEvent::StepStart { .. }))
            .count();
        assert_eq!(starts, 1);
    }

    #[tokio::test]
    async fn cancellation_stops_between_steps() {
        let orch = orchestrator();
        let steps = vec![Step::new("first", "ok", true, serde_json::json!({}))];
        let (mut encoder, _rx) = StreamEncoder::channel();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let run = orch
            .run("user_a", plan(steps), &mut encoder, &cancel)
            .await;
        assert_eq!(run.status, RunStatus::Failed);
    }

    #[tokio::test]
    async fn later_steps_see_earlier_outputs() {
        let orch = orchestrator();
        let steps = vec![
            Step::new("produce", "ok", true, serde_json::json!({"n": 7})),
            Step::new("consume", "chain", true, serde_json::json!({})),
        ];
        let (mut encoder, _rx) = StreamEncoder::channel();
        let cancel = CancellationToken::new();
        let run = orch.run("user_a", plan(steps), &mut encoder, &cancel).await;

        assert_eq!(
            run.records[1].data.as_ref().unwrap(),
            &serde_json::json!({"n": 7})
        );
    }

    #[tokio::test]
    async fn run_trace_is_returned_and_not_retained() {
        let orch = orchestrator();
        let steps = vec![Step::new("first", "ok", true, serde_json::json!({}))];
        let (mut encoder, _rx) = StreamEncoder::channel();
        let cancel = CancellationToken::new();
        let run = orch.run("user_a", plan(steps), &mut encoder, &cancel).await;

        assert_eq!(run.status, RunStatus::Completed);
        assert_eq!(run.records.len(), 1);
        assert_eq!(run.records[0].status, StepStatus::Completed);
    }
}
