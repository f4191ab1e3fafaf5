//! 端到端排期协商测试
//!
//! 通过 Agent 入口走完整链路：意图抽取（Mock LLM）-> 对方解析 ->
//! 编排器 -> 工具 -> 协商 -> 日历，校验控制令牌协议与会话状态。

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use oriole::calendar::api::RefreshedToken;
use oriole::calendar::{BusyInterval, CalendarApi, CalendarApiError, CalendarEvent, EventDraft};
use oriole::config::AppConfig;
use oriole::llm::{LlmClient, Message, MockLlmClient, Role};
use oriole::protocol::{decode_line, StreamEvent, StreamFrame};
use oriole::store::{scopes, CalendarIntegration, Permissions, SessionStatus};
use oriole::{Agent, ProcessRequest, StreamHandle};

/// 测试日历：可配置忙碌区间，统计写入次数
#[derive(Default)]
struct TestCalendarApi {
    busy: Vec<BusyInterval>,
    create_count: AtomicUsize,
}

#[async_trait]
impl CalendarApi for TestCalendarApi {
    async fn list_events(
        &self,
        _access_token: &str,
        _from_ms: i64,
        _to_ms: i64,
        _max: usize,
    ) -> Result<Vec<CalendarEvent>, CalendarApiError> {
        Ok(Vec::new())
    }

    async fn freebusy(
        &self,
        _access_token: &str,
        _from_ms: i64,
        _to_ms: i64,
    ) -> Result<Vec<BusyInterval>, CalendarApiError> {
        Ok(self.busy.clone())
    }

    async fn create_event(
        &self,
        _access_token: &str,
        draft: &EventDraft,
    ) -> Result<CalendarEvent, CalendarApiError> {
        self.create_count.fetch_add(1, Ordering::SeqCst);
        Ok(CalendarEvent {
            id: "evt_test".to_string(),
            title: draft.title.clone(),
            start_ms: draft.start_ms,
            end_ms: draft.end_ms,
            attendees: draft.attendees.clone(),
        })
    }

    async fn delete_event(
        &self,
        _access_token: &str,
        _event_id: &str,
    ) -> Result<(), CalendarApiError> {
        Ok(())
    }

    async fn refresh_token(
        &self,
        _refresh_token: &str,
    ) -> Result<RefreshedToken, CalendarApiError> {
        Ok(RefreshedToken {
            access_token: "fresh".to_string(),
            expires_in_secs: 3600,
        })
    }
}

fn all_scopes() -> Permissions {
    Permissions::new(vec![
        scopes::AVAILABILITY_READ.to_string(),
        scopes::EVENTS_PROPOSE.to_string(),
        scopes::EVENTS_WRITE_CONFIRM.to_string(),
    ])
}

/// 装配 Agent：Mock LLM 预置回复队列，TestCalendarApi 注入
fn build_agent(responses: Vec<String>, api: Arc<TestCalendarApi>) -> Arc<Agent> {
    let llm = Arc::new(MockLlmClient::with_responses(responses));
    Arc::new(Agent::new(AppConfig::default(), llm, api))
}

async fn seed_connection(agent: &Agent, me: &str, peer: &str, name: &str) -> String {
    let conn = agent
        .connections()
        .create(me, peer, name, all_scopes())
        .await
        .unwrap();
    agent.connections().accept(&conn.id, peer).await.unwrap();
    conn.id
}

async fn seed_integration(agent: &Agent, user: &str) {
    let future = chrono::Utc::now().timestamp_millis() + 86_400_000;
    agent
        .store()
        .insert_integration(CalendarIntegration::new(
            user,
            "google_calendar",
            format!("token-{user}"),
            Some(format!("refresh-{user}")),
            future,
        ))
        .await;
}

/// 读完整条输出流并解码
async fn collect(mut handle: StreamHandle) -> Vec<StreamFrame> {
    let mut frames = Vec::new();
    while let Some(chunk) = handle.rx.recv().await {
        for line in chunk.lines() {
            frames.push(decode_line(line));
        }
    }
    frames
}

fn tokens(frames: &[StreamFrame]) -> Vec<&StreamEvent> {
    frames
        .iter()
        .filter_map(|f| match f {
            StreamFrame::Token(e) => Some(e),
            StreamFrame::Narrative(_) => None,
        })
        .collect()
}

fn schedule_intent_json(counterpart: &str) -> String {
    format!(
        r#"{{"kind":"schedule","counterpart_text":"{counterpart}","reasoning":"user wants a meeting","confidence":0.9}}"#
    )
}

#[tokio::test]
async fn schedule_round_trip_emits_protocol_and_creates_session() {
    let api = Arc::new(TestCalendarApi::default());
    let agent = build_agent(vec![schedule_intent_json("Aviad")], api.clone());
    seed_connection(&agent, "me", "aviad", "Aviad Cohen").await;
    seed_integration(&agent, "me").await;
    seed_integration(&agent, "aviad").await;

    let handle = agent
        .process_message(ProcessRequest::from_text(
            "me",
            "schedule 30 min with Aviad sunday 1pm to 5pm",
        ))
        .await;
    let frames = collect(handle).await;
    let events = tokens(&frames);

    // initiated 开场，恰好一个终止令牌，恰好一条 separate_message
    assert!(matches!(events[0], StreamEvent::Initiated { .. }));
    assert_eq!(events.iter().filter(|e| e.is_terminal()).count(), 1);
    assert_eq!(
        events
            .iter()
            .filter(|e| matches!(e, StreamEvent::SeparateMessage { .. }))
            .count(),
        1
    );
    assert!(events.iter().any(|e| matches!(e, StreamEvent::Complete)));

    let sessions = agent.store().list_sessions("me").await;
    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions[0].status, SessionStatus::Negotiating);

    // 对方收到提案通知
    let notifications = agent.store().list_notifications("aviad").await;
    assert!(!notifications.is_empty());
}

#[tokio::test]
async fn ambiguous_counterpart_asks_instead_of_guessing() {
    let api = Arc::new(TestCalendarApi::default());
    let agent = build_agent(vec![schedule_intent_json("Dana")], api);
    seed_connection(&agent, "me", "dana1", "Dana Levi").await;
    seed_connection(&agent, "me", "dana2", "Dana Katz").await;
    seed_integration(&agent, "me").await;

    let handle = agent
        .process_message(ProcessRequest::from_text("me", "set something up with Dana"))
        .await;
    let frames = collect(handle).await;
    let events = tokens(&frames);

    let message = events
        .iter()
        .find_map(|e| match e {
            StreamEvent::SeparateMessage { text } => Some(text.clone()),
            _ => None,
        })
        .expect("clarification message");
    assert!(message.contains("Dana Levi"));
    assert!(message.contains("Dana Katz"));
    // 歧义下不建任何会话
    assert!(agent.store().list_sessions("me").await.is_empty());
}

#[tokio::test]
async fn expired_grant_ends_with_action_token() {
    let api = Arc::new(TestCalendarApi::default());
    let agent = build_agent(vec![schedule_intent_json("Aviad")], api);
    seed_connection(&agent, "me", "aviad", "Aviad Cohen").await;
    // 过期令牌且无 refresh token：读取前即触发 reauth
    let past = chrono::Utc::now().timestamp_millis() - 1;
    agent
        .store()
        .insert_integration(CalendarIntegration::new(
            "me",
            "google_calendar",
            "stale",
            None,
            past,
        ))
        .await;
    seed_integration(&agent, "aviad").await;

    let handle = agent
        .process_message(ProcessRequest::from_text("me", "schedule time with Aviad"))
        .await;
    let frames = collect(handle).await;
    let events = tokens(&frames);

    match events.last().unwrap() {
        StreamEvent::Action { kind } => assert_eq!(kind, "google_calendar_reauth_required"),
        other => panic!("expected action terminal, got {other:?}"),
    }
    assert!(!events.iter().any(|e| matches!(e, StreamEvent::Complete)));
    assert!(!events
        .iter()
        .any(|e| matches!(e, StreamEvent::SeparateMessage { .. })));
}

#[tokio::test]
async fn confirm_flow_writes_both_calendars_once() {
    let api = Arc::new(TestCalendarApi::default());
    let agent = build_agent(
        vec![
            schedule_intent_json("Aviad"),
            r#"{"kind":"confirm","selection_index":1,"reasoning":"pick option 2","confidence":0.95}"#
                .to_string(),
        ],
        api.clone(),
    );
    seed_connection(&agent, "me", "aviad", "Aviad Cohen").await;
    seed_integration(&agent, "me").await;
    seed_integration(&agent, "aviad").await;

    let handle = agent
        .process_message(ProcessRequest::from_text("me", "schedule 30 min with Aviad"))
        .await;
    collect(handle).await;

    let handle = agent
        .process_message(ProcessRequest::from_text("aviad", "option 2 works for me"))
        .await;
    let frames = collect(handle).await;
    let events = tokens(&frames);
    assert!(events.iter().any(|e| matches!(e, StreamEvent::Complete)));

    let sessions = agent.store().list_sessions("me").await;
    assert_eq!(sessions[0].status, SessionStatus::Confirmed);
    // 双方各写一条日历事件
    assert_eq!(api.create_count.load(Ordering::SeqCst), 2);

    let outcome = sessions[0].outcome.as_ref().expect("session outcome");
    assert!(outcome.initiator_event_written);
    assert!(outcome.counterpart_event_written);
}

#[tokio::test]
async fn rate_limit_refuses_politely() {
    let api = Arc::new(TestCalendarApi::default());
    let mut config = AppConfig::default();
    config.limits.requests_per_minute = 1;
    let llm = Arc::new(MockLlmClient::with_responses(vec![
        schedule_intent_json("Aviad"),
    ]));
    let agent = Arc::new(Agent::new(config, llm, api));
    seed_connection(&agent, "me", "aviad", "Aviad Cohen").await;
    seed_integration(&agent, "me").await;
    seed_integration(&agent, "aviad").await;

    let first = agent
        .process_message(ProcessRequest::from_text("me", "schedule with Aviad"))
        .await;
    collect(first).await;

    let second = agent
        .process_message(ProcessRequest::from_text("me", "and another one"))
        .await;
    let frames = collect(second).await;
    let events = tokens(&frames);

    // 限流：不开工（无 initiated），只有礼貌拒绝
    assert!(!events
        .iter()
        .any(|e| matches!(e, StreamEvent::Initiated { .. })));
    assert!(events.iter().any(|e| matches!(e, StreamEvent::Complete)));
    assert!(events
        .iter()
        .any(|e| matches!(e, StreamEvent::SeparateMessage { .. })));
}

#[tokio::test]
async fn delegation_token_binds_counterpart_and_burns() {
    let api = Arc::new(TestCalendarApi::default());
    let agent = build_agent(vec![schedule_intent_json("")], api);
    seed_integration(&agent, "owner").await;
    seed_integration(&agent, "eve").await;

    let link = agent
        .delegations()
        .issue("owner", "External Eve", all_scopes(), 3_600_000)
        .await;

    let handle = agent
        .process_message(ProcessRequest {
            delegation_token: Some(link.token.clone()),
            ..ProcessRequest::from_text("eve", "I'd like to find time for a call")
        })
        .await;
    let frames = collect(handle).await;
    let events = tokens(&frames);
    assert!(events.iter().any(|e| matches!(e, StreamEvent::Complete)));

    // 委托令牌绑定出连接并发起了会话
    let sessions = agent.store().list_sessions("owner").await;
    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions[0].status, SessionStatus::Negotiating);

    // 令牌一次性：再次使用被拒
    let err = agent
        .delegations()
        .validate(&link.token, &[])
        .await
        .unwrap_err();
    assert!(matches!(err, oriole::core::AgentError::Conflict(_)));
}

#[tokio::test]
async fn chat_falls_back_to_plain_reply() {
    let api = Arc::new(TestCalendarApi::default());
    let agent = build_agent(
        vec![
            r#"{"kind":"other","reasoning":"not scheduling","confidence":0.2}"#.to_string(),
            "Hi! I can schedule meetings for you.".to_string(),
        ],
        api,
    );

    let handle = agent
        .process_message(ProcessRequest::from_text("me", "hello there"))
        .await;
    let frames = collect(handle).await;
    let events = tokens(&frames);

    assert!(events.iter().any(|e| matches!(
        e,
        StreamEvent::SeparateMessage { text } if text.contains("schedule meetings")
    )));
}

#[tokio::test]
async fn fully_busy_window_fails_the_run_instead_of_claiming_success() {
    // 双方全程忙碌：提案步骤必须失败，收尾消息不得声称已发送时间选项
    let api = Arc::new(TestCalendarApi {
        busy: vec![BusyInterval {
            start_ms: 0,
            end_ms: i64::MAX / 2,
        }],
        create_count: AtomicUsize::new(0),
    });
    let agent = build_agent(vec![schedule_intent_json("Aviad")], api);
    seed_connection(&agent, "me", "aviad", "Aviad Cohen").await;
    seed_integration(&agent, "me").await;
    seed_integration(&agent, "aviad").await;

    let handle = agent
        .process_message(ProcessRequest::from_text(
            "me",
            "schedule 30 min with Aviad sunday 1pm to 5pm",
        ))
        .await;
    let frames = collect(handle).await;
    let events = tokens(&frames);

    assert!(events.iter().any(|e| matches!(
        e,
        StreamEvent::StepResult { status, .. } if status == "failed"
    )));
    let message = events
        .iter()
        .find_map(|e| match e {
            StreamEvent::SeparateMessage { text } => Some(text.clone()),
            _ => None,
        })
        .expect("closing message");
    assert!(message.contains("Nothing was sent"), "got: {message}");
    assert!(!message.contains("time options"), "got: {message}");

    let sessions = agent.store().list_sessions("me").await;
    assert_eq!(sessions[0].status, SessionStatus::Failed);
    // 对方一无所知，不能收到提案通知
    assert!(agent.store().list_notifications("aviad").await.is_empty());
}

/// 记录每次 complete 入参的 LLM 客户端
struct RecordingLlmClient {
    responses: Mutex<Vec<String>>,
    calls: Mutex<Vec<Vec<Message>>>,
}

impl RecordingLlmClient {
    fn with_responses(responses: Vec<String>) -> Self {
        let mut rev = responses;
        rev.reverse();
        Self {
            responses: Mutex::new(rev),
            calls: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl LlmClient for RecordingLlmClient {
    async fn complete(&self, messages: &[Message]) -> Result<String, String> {
        self.calls.lock().unwrap().push(messages.to_vec());
        Ok(self.responses.lock().unwrap().pop().unwrap_or_default())
    }
}

#[tokio::test]
async fn conversation_history_and_tone_reach_the_model() {
    let api = Arc::new(TestCalendarApi::default());
    let llm = Arc::new(RecordingLlmClient::with_responses(vec![
        r#"{"kind":"other","reasoning":"small talk","confidence":0.3}"#.to_string(),
        "Happy to help!".to_string(),
    ]));
    let agent = Arc::new(Agent::new(AppConfig::default(), llm.clone(), api));

    let handle = agent
        .process_message(ProcessRequest {
            user_id: "me".to_string(),
            messages: vec![
                Message::user("hi"),
                Message::assistant("Hello! How can I help?"),
                Message::user("what can you do?"),
            ],
            tone: Some("cheerful".to_string()),
            ..Default::default()
        })
        .await;
    collect(handle).await;

    let calls = llm.calls.lock().unwrap();
    assert_eq!(calls.len(), 2);
    // 意图抽取吃完整对话历史
    assert!(calls[0]
        .iter()
        .any(|m| m.content.contains("Hello! How can I help?")));
    // 聊天回复的系统提示带语气，且携带最后一条用户输入
    assert!(matches!(calls[1][0].role, Role::System));
    assert!(calls[1][0].content.contains("cheerful"));
    assert!(calls[1].iter().any(|m| m.content == "what can you do?"));
}
