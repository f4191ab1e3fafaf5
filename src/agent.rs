//! Agent 装配与请求入口
//!
//! 把配置、LLM、存储、日历、协商、工具与编排器接在一起。
//! process_message 对一段对话：限流 -> 意图抽取 -> 对方解析与提示抽取 ->
//! 生成步骤计划 -> 编排器异步执行，输出流按控制令牌协议编码。

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio_util::sync::CancellationToken;

use crate::calendar::{CalendarApi, CalendarService};
use crate::config::AppConfig;
use crate::core::{AgentError, ErrorCode, RateLimiter};
use crate::llm::{
    complete_with_retry, IntentExtractor, IntentKind, LlmClient, Message, Role, SchedulingIntent,
};
use crate::negotiation::{
    ConnectionService, DelegationService, NegotiationService, StoreNotificationSink,
};
use crate::orchestrator::{
    Orchestrator, RunPlan, Step, StepContext, StepExecutor, StepRegistry,
};
use crate::protocol::{ProgressHandle, StreamEncoder, StreamEvent};
use crate::resolver::{extract_hints, resolve_counterpart, ResolveOutcome, SchedulingHints};
use crate::store::{scopes, SchedulerStore, SessionStatus};
use crate::tools::{
    CheckAvailabilityTool, ConfirmMeetingTool, ListConnectionsTool, ScheduleMeetingTool,
    ToolContext, ToolExecutor, ToolRegistry,
};

/// 一条待处理的用户请求：对话消息加语气 / 专长定位
#[derive(Debug, Clone, Default)]
pub struct ProcessRequest {
    pub user_id: String,
    /// 对话消息，最后一条 user 消息视为本次输入
    pub messages: Vec<Message>,
    /// 期望回复语气（注入聊天系统提示）
    pub tone: Option<String>,
    /// 助手专长定位（注入聊天系统提示）
    pub specialization: Option<String>,
    /// 外部协作者可凭委托令牌代为排期
    pub delegation_token: Option<String>,
}

impl ProcessRequest {
    /// 单条用户文本的便捷构造（CLI 与测试用）
    pub fn from_text(user_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            messages: vec![Message::user(text)],
            ..Self::default()
        }
    }
}

/// 运行中的流句柄：行接收端与取消令牌
pub struct StreamHandle {
    pub rx: UnboundedReceiver<String>,
    pub cancel: CancellationToken,
}

/// 把一种步骤 kind 映射到一次工具调用
struct ToolCallStep {
    tools: Arc<ToolExecutor>,
    kind: String,
    tool: String,
    progress_text: String,
}

#[async_trait]
impl StepExecutor for ToolCallStep {
    fn kind(&self) -> &str {
        &self.kind
    }

    async fn execute(
        &self,
        ctx: &StepContext<'_>,
        args: &serde_json::Value,
        progress: &ProgressHandle,
    ) -> Result<serde_json::Value, AgentError> {
        progress.report(&self.progress_text);
        let tool_ctx = ToolContext {
            user_id: ctx.user_id.to_string(),
        };
        let envelope = self.tools.execute(&tool_ctx, &self.tool, args.clone()).await?;
        if envelope.ok {
            return Ok(envelope.data.unwrap_or(serde_json::Value::Null));
        }
        Err(match envelope.error {
            Some(failure) => failure_to_error(failure.code, failure.message),
            None => AgentError::Internal("tool failed without error detail".to_string()),
        })
    }
}

/// 信封错误码还原为类型化错误（步骤留痕与 step_result 复用同一套码）
fn failure_to_error(code: ErrorCode, message: String) -> AgentError {
    match code {
        ErrorCode::ValidationError => AgentError::Validation(message),
        ErrorCode::NotFound => AgentError::NotFound(message),
        ErrorCode::Unauthorized => AgentError::Unauthorized(message),
        ErrorCode::ScopesMissing => AgentError::ScopesMissing(message),
        ErrorCode::Conflict => AgentError::Conflict(message),
        ErrorCode::NotConnected => AgentError::NotConnected(message),
        ErrorCode::ReauthRequired => AgentError::ReauthRequired {
            integration: message,
        },
        ErrorCode::InternalError => AgentError::Internal(message),
    }
}

/// 排期协商 Agent
pub struct Agent {
    config: AppConfig,
    store: Arc<SchedulerStore>,
    llm: Arc<dyn LlmClient>,
    extractor: IntentExtractor,
    calendar: Arc<CalendarService>,
    connections: Arc<ConnectionService>,
    negotiation: Arc<NegotiationService>,
    delegations: Arc<DelegationService>,
    tools: Arc<ToolExecutor>,
    orchestrator: Arc<Orchestrator>,
    limiter: RateLimiter,
}

impl Agent {
    /// 装配全部组件；LLM 与日历 API 由调用方注入（生产 OpenAI/Google，测试 mock）
    pub fn new(config: AppConfig, llm: Arc<dyn LlmClient>, api: Arc<dyn CalendarApi>) -> Self {
        let store = Arc::new(SchedulerStore::new());
        let calendar = Arc::new(CalendarService::new(
            api,
            store.clone(),
            config.calendar.clone(),
        ));
        let connections = Arc::new(ConnectionService::new(store.clone()));
        let notifications = Arc::new(StoreNotificationSink::new(store.clone()));
        let negotiation = Arc::new(NegotiationService::new(
            store.clone(),
            calendar.clone(),
            connections.clone(),
            notifications,
            config.negotiation.clone(),
        ));
        let delegations = Arc::new(DelegationService::new(store.clone()));

        let mut tool_registry = ToolRegistry::new();
        tool_registry.register(CheckAvailabilityTool::new(calendar.clone()));
        tool_registry.register(ScheduleMeetingTool::new(negotiation.clone()));
        tool_registry.register(ConfirmMeetingTool::new(negotiation.clone()));
        tool_registry.register(ListConnectionsTool::new(connections.clone()));
        let tools = Arc::new(ToolExecutor::new(
            tool_registry,
            config.tools.tool_timeout_secs,
        ));

        let mut step_registry = StepRegistry::new();
        for (kind, tool, progress_text) in [
            (
                "check_availability",
                "check_availability",
                "Checking your calendar...",
            ),
            (
                "schedule_meeting",
                "schedule_meeting",
                "Finding mutual availability and sending a proposal...",
            ),
            (
                "confirm_meeting",
                "confirm_meeting",
                "Confirming the meeting and writing calendars...",
            ),
            (
                "list_connections",
                "list_connections",
                "Looking up your connections...",
            ),
        ] {
            step_registry.register(ToolCallStep {
                tools: tools.clone(),
                kind: kind.to_string(),
                tool: tool.to_string(),
                progress_text: progress_text.to_string(),
            });
        }
        let orchestrator = Arc::new(Orchestrator::new(step_registry));

        let limiter = RateLimiter::new(
            std::time::Duration::from_secs(60),
            config.limits.requests_per_minute,
        );
        let extractor = IntentExtractor::new(
            llm.clone(),
            config.llm.max_retries,
            config.llm.backoff_base_ms,
        );

        Self {
            config,
            store,
            llm,
            extractor,
            calendar,
            connections,
            negotiation,
            delegations,
            tools,
            orchestrator,
            limiter,
        }
    }

    pub fn store(&self) -> Arc<SchedulerStore> {
        self.store.clone()
    }

    pub fn calendar(&self) -> Arc<CalendarService> {
        self.calendar.clone()
    }

    pub fn connections(&self) -> Arc<ConnectionService> {
        self.connections.clone()
    }

    pub fn negotiation(&self) -> Arc<NegotiationService> {
        self.negotiation.clone()
    }

    pub fn delegations(&self) -> Arc<DelegationService> {
        self.delegations.clone()
    }

    pub fn tools(&self) -> Arc<ToolExecutor> {
        self.tools.clone()
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// 处理一条用户消息，返回输出流句柄；实际执行在后台任务中
    pub async fn process_message(self: &Arc<Self>, request: ProcessRequest) -> StreamHandle {
        let (mut encoder, rx) = StreamEncoder::channel();
        let cancel = CancellationToken::new();

        if !self.limiter.allow(&request.user_id).await {
            encoder.send(StreamEvent::Complete);
            encoder.send(StreamEvent::SeparateMessage {
                text: "You're sending requests faster than I can schedule. Give me a minute and try again.".to_string(),
            });
            return StreamHandle { rx, cancel };
        }

        let agent = self.clone();
        let task_cancel = cancel.clone();
        tokio::spawn(async move {
            agent.handle(request, &mut encoder, &task_cancel).await;
        });
        StreamHandle { rx, cancel }
    }

    /// 最外层边界：任何未被下层收敛的错误都在这里转成终止令牌
    async fn handle(
        &self,
        request: ProcessRequest,
        encoder: &mut StreamEncoder,
        cancel: &CancellationToken,
    ) {
        match self.dispatch(&request, encoder, cancel).await {
            Ok(()) => {}
            Err(e) if e.is_reauth_class() => {
                tracing::warn!(user = %request.user_id, error = %e, "reauth required");
                encoder.send(StreamEvent::Action {
                    kind: match &e {
                        AgentError::ReauthRequired { integration } => {
                            format!("{integration}_reauth_required")
                        }
                        _ => "calendar_reauth_required".to_string(),
                    },
                });
            }
            Err(e) => {
                tracing::error!(user = %request.user_id, error = %e, "request failed");
                encoder.send(StreamEvent::Complete);
                encoder.send(StreamEvent::SeparateMessage {
                    text: "I ran into a problem and couldn't finish that. Nothing was scheduled."
                        .to_string(),
                });
            }
        }
    }

    async fn dispatch(
        &self,
        request: &ProcessRequest,
        encoder: &mut StreamEncoder,
        cancel: &CancellationToken,
    ) -> Result<(), AgentError> {
        // 委托令牌：校验并一次性消费，为外部请求方建立临时连接；
        // 该连接即本次排期的对方，不再走 resolver
        let preresolved = match &request.delegation_token {
            Some(token) => Some(self.bind_delegation(token, &request.user_id).await?),
            None => None,
        };

        // 最后一条 user 消息作为提示抽取 / 对方解析的输入；
        // 意图抽取吃整段对话
        let text = request
            .messages
            .iter()
            .rev()
            .find(|m| matches!(m.role, Role::User))
            .map(|m| m.content.clone())
            .unwrap_or_default();

        let intent = self.extractor.extract(&request.messages).await?;
        let hints = extract_hints(&text, chrono::Utc::now());

        match intent.kind {
            IntentKind::Schedule => {
                self.run_schedule(
                    &request.user_id,
                    &text,
                    &intent,
                    &hints,
                    preresolved,
                    encoder,
                    cancel,
                )
                .await
            }
            IntentKind::Confirm => {
                self.run_confirm(&request.user_id, &intent, encoder, cancel)
                    .await
            }
            IntentKind::Other => self.reply_chat(request, encoder).await,
        }
    }

    /// 校验委托令牌并建立（已接受的）临时连接，令牌即刻作废
    async fn bind_delegation(
        &self,
        token: &str,
        requester_id: &str,
    ) -> Result<crate::store::Connection, AgentError> {
        let link = self
            .delegations
            .validate(token, &[scopes::AVAILABILITY_READ, scopes::EVENTS_PROPOSE])
            .await?;
        self.delegations.consume(token).await?;

        let conn = self
            .connections
            .create(
                &link.owner_id,
                requester_id,
                &link.counterpart_label,
                link.permissions.clone(),
            )
            .await?;
        self.connections.accept(&conn.id, requester_id).await
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_schedule(
        &self,
        user_id: &str,
        text: &str,
        intent: &SchedulingIntent,
        hints: &SchedulingHints,
        preresolved: Option<crate::store::Connection>,
        encoder: &mut StreamEncoder,
        cancel: &CancellationToken,
    ) -> Result<(), AgentError> {
        let connections = self.connections.active(user_id).await;
        let mention = intent
            .counterpart_text
            .as_deref()
            .filter(|s| !s.is_empty())
            .unwrap_or(text);

        let resolved = match preresolved {
            Some(conn) => ResolveOutcome::Resolved(conn),
            None => resolve_counterpart(mention, &connections),
        };
        let connection = match resolved {
            ResolveOutcome::Resolved(conn) => conn,
            ResolveOutcome::Ambiguous(candidates) => {
                let names: Vec<&str> =
                    candidates.iter().map(|c| c.display_name.as_str()).collect();
                encoder.send(StreamEvent::Complete);
                encoder.send(StreamEvent::SeparateMessage {
                    text: format!(
                        "I know more than one person that could be: {}. Who did you mean?",
                        names.join(", ")
                    ),
                });
                return Ok(());
            }
            ResolveOutcome::None => {
                encoder.send(StreamEvent::Complete);
                encoder.send(StreamEvent::SeparateMessage {
                    text: "I couldn't tell who you want to meet with. Name one of your connections and I'll set it up.".to_string(),
                });
                return Ok(());
            }
        };

        let duration = hints.duration_minutes.or(intent.duration_minutes);
        let window_start = hints.window_start_ms.or(intent.window_start_ms);
        let window_end = hints.window_end_ms.or(intent.window_end_ms);

        let schedule_args = serde_json::json!({
            "connection_id": connection.id,
            "duration_minutes": duration,
            "window_start_ms": window_start,
            "window_end_ms": window_end,
            "title": format!("Meeting with {}", connection.display_name),
        });

        let mut steps = Vec::new();
        if let (Some(start_ms), Some(end_ms)) = (window_start, window_end) {
            steps.push(Step::new(
                "check own availability",
                "check_availability",
                false,
                serde_json::json!({ "start_ms": start_ms, "end_ms": end_ms }),
            ));
        }
        steps.push(Step::new(
            "propose meeting",
            "schedule_meeting",
            true,
            schedule_args,
        ));

        let plan = RunPlan {
            reasoning: if intent.reasoning.is_empty() {
                format!("Schedule a meeting with {}", connection.display_name)
            } else {
                intent.reasoning.clone()
            },
            confidence: f64::from(intent.confidence),
            steps,
            success_message: format!(
                "I sent {} a few time options. I'll let you know when they pick one.",
                connection.display_name
            ),
            failure_message: format!(
                "I couldn't set up a meeting with {} right now. Nothing was sent.",
                connection.display_name
            ),
        };

        encoder.narrate(&format!(
            "On it. Checking calendars for you and {}.",
            connection.display_name
        ));
        self.orchestrator.run(user_id, plan, encoder, cancel).await;
        Ok(())
    }

    async fn run_confirm(
        &self,
        user_id: &str,
        intent: &SchedulingIntent,
        encoder: &mut StreamEncoder,
        cancel: &CancellationToken,
    ) -> Result<(), AgentError> {
        // 取该用户最近一个仍在协商中的会话
        let session = self
            .store
            .list_sessions(user_id)
            .await
            .into_iter()
            .filter(|s| s.status == SessionStatus::Negotiating)
            .max_by_key(|s| s.created_at);
        let session = match session {
            Some(session) => session,
            None => {
                encoder.send(StreamEvent::Complete);
                encoder.send(StreamEvent::SeparateMessage {
                    text: "There's no open proposal to confirm right now.".to_string(),
                });
                return Ok(());
            }
        };

        let selection_index = intent.selection_index.unwrap_or(0);
        let plan = RunPlan {
            reasoning: if intent.reasoning.is_empty() {
                "Confirm the pending meeting proposal".to_string()
            } else {
                intent.reasoning.clone()
            },
            confidence: f64::from(intent.confidence),
            steps: vec![Step::new(
                "confirm meeting",
                "confirm_meeting",
                true,
                serde_json::json!({
                    "session_id": session.id,
                    "selection_index": selection_index,
                }),
            )],
            success_message: "Confirmed. The meeting is on both calendars.".to_string(),
            failure_message: "I couldn't confirm that meeting. It may have been confirmed already or expired.".to_string(),
        };

        self.orchestrator.run(user_id, plan, encoder, cancel).await;
        Ok(())
    }

    /// 非排期闲聊：带上完整对话、语气与专长定位，单轮 LLM 回复，无步骤计划
    async fn reply_chat(
        &self,
        request: &ProcessRequest,
        encoder: &mut StreamEncoder,
    ) -> Result<(), AgentError> {
        let mut system = String::from(
            "You are a scheduling assistant. Answer briefly; you can schedule, confirm and check availability when asked.",
        );
        if let Some(specialization) = &request.specialization {
            system.push_str(&format!(" Your specialization: {specialization}."));
        }
        if let Some(tone) = &request.tone {
            system.push_str(&format!(" Respond in a {tone} tone."));
        }
        let mut messages = vec![Message::system(system)];
        messages.extend_from_slice(&request.messages);

        let reply = complete_with_retry(
            self.llm.as_ref(),
            &messages,
            self.config.llm.max_retries,
            self.config.llm.backoff_base_ms,
        )
        .await?;
        encoder.send(StreamEvent::Complete);
        encoder.send(StreamEvent::SeparateMessage { text: reply });
        Ok(())
    }
}
