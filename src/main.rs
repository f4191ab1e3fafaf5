//! Oriole - Rust 会议排期协商代理
//!
//! 入口：初始化日志与配置，装配 Agent，进入 stdin 对话循环。
//! provider=mock 时注入演示用的 LLM 与日历后端并预置两条连接，便于本地试用。

use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

use oriole::calendar::{
    BusyInterval, CalendarApi, CalendarApiError, CalendarEvent, EventDraft, GoogleCalendarClient,
};
use oriole::calendar::api::RefreshedToken;
use oriole::config::load_config;
use oriole::llm::{LlmClient, MockLlmClient, OpenAiClient};
use oriole::protocol::{decode_line, StreamFrame};
use oriole::store::{scopes, CalendarIntegration, Permissions};
use oriole::{Agent, ProcessRequest};

/// 演示日历：固定一段明天上午的忙碌，事件写入只记日志
struct DemoCalendarApi;

#[async_trait]
impl CalendarApi for DemoCalendarApi {
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
        from_ms: i64,
        _to_ms: i64,
    ) -> Result<Vec<BusyInterval>, CalendarApiError> {
        Ok(vec![BusyInterval {
            start_ms: from_ms + 24 * 3_600_000,
            end_ms: from_ms + 26 * 3_600_000,
        }])
    }

    async fn create_event(
        &self,
        _access_token: &str,
        draft: &EventDraft,
    ) -> Result<CalendarEvent, CalendarApiError> {
        tracing::info!(title = %draft.title, start = draft.start_ms, "demo calendar write");
        Ok(CalendarEvent {
            id: "demo_event".to_string(),
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
            access_token: "demo-token".to_string(),
            expires_in_secs: 3600,
        })
    }
}

/// 预置演示数据：两条已接受的连接 + 双方日历集成
async fn seed_demo(agent: &Agent) -> anyhow::Result<()> {
    let all = Permissions::new(vec![
        scopes::AVAILABILITY_READ.to_string(),
        scopes::EVENTS_PROPOSE.to_string(),
        scopes::EVENTS_WRITE_CONFIRM.to_string(),
    ]);
    let connections = agent.connections();
    for (peer, name) in [("aviad", "Aviad Cohen"), ("dana", "Dana Levi")] {
        let conn = connections.create("me", peer, name, all.clone()).await?;
        connections.accept(&conn.id, peer).await?;
    }
    let future = chrono::Utc::now().timestamp_millis() + 86_400_000;
    for user in ["me", "aviad", "dana"] {
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
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    oriole::observability::init();

    let config = load_config(None).context("Failed to load config")?;
    let demo = config.llm.provider == "mock";

    let llm: Arc<dyn LlmClient> = if demo {
        Arc::new(MockLlmClient::new())
    } else {
        Arc::new(OpenAiClient::new(
            config.llm.base_url.as_deref(),
            &config.llm.model,
            None,
        ))
    };
    let api: Arc<dyn CalendarApi> = if demo {
        Arc::new(DemoCalendarApi)
    } else {
        let client_id = std::env::var("GOOGLE_CLIENT_ID").unwrap_or_default();
        let client_secret = std::env::var("GOOGLE_CLIENT_SECRET").unwrap_or_default();
        Arc::new(GoogleCalendarClient::new(&client_id, &client_secret))
    };

    let agent = Arc::new(Agent::new(config, llm, api));
    if demo {
        seed_demo(&agent).await?;
    }

    let mut stdout = tokio::io::stdout();
    stdout
        .write_all(b"oriole scheduling agent. Type a request, or 'quit'.\n")
        .await?;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        stdout.write_all(b"> ").await?;
        stdout.flush().await?;
        let Some(line) = lines.next_line().await? else {
            break;
        };
        let text = line.trim().to_string();
        if text.is_empty() {
            continue;
        }
        if text == "quit" || text == "exit" {
            break;
        }

        let mut handle = agent
            .process_message(ProcessRequest::from_text("me", text))
            .await;

        while let Some(chunk) = handle.rx.recv().await {
            for line in chunk.lines() {
                match decode_line(line) {
                    StreamFrame::Narrative(text) => {
                        stdout.write_all(format!("{text}\n").as_bytes()).await?;
                    }
                    StreamFrame::Token(event) => {
                        stdout
                            .write_all(format!("[{event:?}]\n").as_bytes())
                            .await?;
                    }
                }
            }
        }
    }

    Ok(())
}
