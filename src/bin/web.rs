//! Oriole Web API
//!
//! 启动: cargo run --bin oriole-web --features web
//! POST /api/chat/stream 返回叙述与控制令牌交错的行流。

#![cfg(feature = "web")]

use std::sync::Arc;

use axum::{
    body::Body,
    extract::{Path, Query, State},
    http::StatusCode,
    response::Response,
    routing::{delete, get, post},
    Json, Router,
};
use bytes::Bytes;
use futures_util::stream;
use serde::{Deserialize, Serialize};

use oriole::calendar::{CalendarApi, CalendarEvent, GoogleCalendarClient};
use oriole::core::AgentError;
use oriole::config::load_config;
use oriole::llm::{LlmClient, Message, MockLlmClient, OpenAiClient};
use oriole::store::{AgentMessage, Notification, Permissions};
use oriole::{Agent, ProcessRequest};

struct AppState {
    agent: Arc<Agent>,
}

#[derive(Debug, Deserialize)]
struct ChatRequest {
    user_id: String,
    /// 对话消息（最后一条 user 消息为本次输入）
    messages: Vec<Message>,
    #[serde(default)]
    tone: Option<String>,
    #[serde(default)]
    specialization: Option<String>,
    #[serde(default)]
    delegation_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CreateConnectionRequest {
    requester_id: String,
    target_id: String,
    display_name: String,
    #[serde(default)]
    scopes: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct AcceptConnectionRequest {
    user_id: String,
}

#[derive(Debug, Deserialize)]
struct IssueDelegationRequest {
    owner_id: String,
    counterpart_label: String,
    #[serde(default)]
    scopes: Vec<String>,
    ttl_minutes: i64,
}

#[derive(Debug, Serialize)]
struct IssueDelegationResponse {
    token: String,
    expires_at: i64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    oriole::observability::init();

    let config = load_config(None)?;
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
    let api: Arc<dyn CalendarApi> = {
        let client_id = std::env::var("GOOGLE_CLIENT_ID").unwrap_or_default();
        let client_secret = std::env::var("GOOGLE_CLIENT_SECRET").unwrap_or_default();
        Arc::new(GoogleCalendarClient::new(&client_id, &client_secret))
    };
    let agent = Arc::new(Agent::new(config, llm, api));
    let state = Arc::new(AppState { agent });

    let app = Router::new()
        .route("/api/chat/stream", post(api_chat_stream))
        .route("/api/connections", post(api_connections_create))
        .route("/api/connections/:id/accept", post(api_connections_accept))
        .route("/api/connections/:id/revoke", post(api_connections_revoke))
        .route("/api/delegations", post(api_delegations_issue))
        .route("/api/events/:user_id", get(api_events_list))
        .route("/api/events/:user_id/:event_id", delete(api_events_delete))
        .route("/api/sessions/:id/transcript", get(api_transcript))
        .route("/api/notifications/:user_id", get(api_notifications))
        .route("/api/tools", get(api_tools))
        .route("/api/health", get(|| async { "OK" }))
        .with_state(state);

    let port = std::env::var("ORIOLE_WEB_PORT")
        .ok()
        .and_then(|s| s.parse::<u16>().ok())
        .unwrap_or(8080);
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!("Oriole Web API: http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

/// POST /api/chat/stream：行流响应，叙述文本与 @@<json> 控制令牌交错
async fn api_chat_stream(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ChatRequest>,
) -> Response {
    let handle = state
        .agent
        .process_message(ProcessRequest {
            user_id: req.user_id,
            messages: req.messages,
            tone: req.tone,
            specialization: req.specialization,
            delegation_token: req.delegation_token,
        })
        .await;

    let body = Body::from_stream(stream::unfold(handle.rx, |mut rx| async move {
        rx.recv()
            .await
            .map(|line| (Ok::<Bytes, std::convert::Infallible>(Bytes::from(line)), rx))
    }));
    Response::builder()
        .status(StatusCode::OK)
        .header("content-type", "text/plain; charset=utf-8")
        .body(body)
        .unwrap_or_else(|_| Response::new(Body::empty()))
}

async fn api_connections_create(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateConnectionRequest>,
) -> Result<Json<serde_json::Value>, (StatusCode, String)> {
    let conn = state
        .agent
        .connections()
        .create(
            &req.requester_id,
            &req.target_id,
            &req.display_name,
            Permissions::new(req.scopes),
        )
        .await
        .map_err(|e| (StatusCode::BAD_REQUEST, e.to_string()))?;
    Ok(Json(serde_json::json!({
        "connection_id": conn.id,
        "status": conn.status,
    })))
}

async fn api_connections_accept(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(req): Json<AcceptConnectionRequest>,
) -> Result<StatusCode, (StatusCode, String)> {
    state
        .agent
        .connections()
        .accept(&id, &req.user_id)
        .await
        .map_err(|e| (StatusCode::BAD_REQUEST, e.to_string()))?;
    Ok(StatusCode::OK)
}

async fn api_connections_revoke(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(req): Json<AcceptConnectionRequest>,
) -> Result<StatusCode, (StatusCode, String)> {
    state
        .agent
        .connections()
        .revoke(&id, &req.user_id)
        .await
        .map_err(|e| (StatusCode::BAD_REQUEST, e.to_string()))?;
    Ok(StatusCode::OK)
}

async fn api_delegations_issue(
    State(state): State<Arc<AppState>>,
    Json(req): Json<IssueDelegationRequest>,
) -> Result<Json<IssueDelegationResponse>, (StatusCode, String)> {
    let link = state
        .agent
        .delegations()
        .issue(
            &req.owner_id,
            &req.counterpart_label,
            Permissions::new(req.scopes),
            req.ttl_minutes * 60_000,
        )
        .await;
    Ok(Json(IssueDelegationResponse {
        token: link.token,
        expires_at: link.expires_at,
    }))
}

#[derive(Debug, Deserialize)]
struct ListEventsQuery {
    #[serde(default = "default_days")]
    days: i64,
    #[serde(default = "default_max")]
    max: usize,
}

fn default_days() -> i64 {
    7
}

fn default_max() -> usize {
    50
}

/// 重授权类错误映射 401，其余按客户端错误处理
fn calendar_status(e: &AgentError) -> StatusCode {
    if e.is_reauth_class() {
        StatusCode::UNAUTHORIZED
    } else {
        StatusCode::BAD_REQUEST
    }
}

async fn api_events_list(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<String>,
    Query(query): Query<ListEventsQuery>,
) -> Result<Json<Vec<CalendarEvent>>, (StatusCode, String)> {
    state
        .agent
        .calendar()
        .fetch_events(&user_id, query.days, query.max)
        .await
        .map(Json)
        .map_err(|e| (calendar_status(&e), e.to_string()))
}

async fn api_events_delete(
    State(state): State<Arc<AppState>>,
    Path((user_id, event_id)): Path<(String, String)>,
) -> Result<StatusCode, (StatusCode, String)> {
    state
        .agent
        .calendar()
        .delete_event(&user_id, &event_id)
        .await
        .map(|_| StatusCode::NO_CONTENT)
        .map_err(|e| (calendar_status(&e), e.to_string()))
}

async fn api_transcript(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Json<Vec<AgentMessage>> {
    Json(state.agent.negotiation().transcript(&id).await)
}

async fn api_notifications(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<String>,
) -> Json<Vec<Notification>> {
    Json(state.agent.store().list_notifications(&user_id).await)
}

/// GET /api/tools：已注册工具的名称、描述与参数 schema
async fn api_tools(State(state): State<Arc<AppState>>) -> Response {
    Response::builder()
        .status(StatusCode::OK)
        .header("content-type", "application/json")
        .body(Body::from(state.agent.tools().schema_json()))
        .unwrap_or_else(|_| Response::new(Body::empty()))
}
