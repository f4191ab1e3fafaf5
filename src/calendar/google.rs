//! Google Calendar 客户端（reqwest）
//!
//! 仅覆盖本引擎用到的子集：events list/insert/delete、freeBusy、OAuth 刷新。
//! HTTP 状态在此处即完成分类：401/403 -> Unauthorized，
//! 刷新端点返回 invalid_grant -> InvalidGrant，其余 -> Transient。

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::Deserialize;

use crate::calendar::api::{
    BusyInterval, CalendarApi, CalendarApiError, CalendarEvent, EventDraft, RefreshedToken,
};

const DEFAULT_API_BASE: &str = "https://www.googleapis.com/calendar/v3";
const DEFAULT_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";

pub struct GoogleCalendarClient {
    http: reqwest::Client,
    api_base: String,
    token_url: String,
    client_id: String,
    client_secret: String,
}

impl GoogleCalendarClient {
    pub fn new(client_id: &str, client_secret: &str) -> Self {
        Self::with_endpoints(client_id, client_secret, DEFAULT_API_BASE, DEFAULT_TOKEN_URL)
    }

    /// 端点可注入（测试指向本地 server）
    pub fn with_endpoints(
        client_id: &str,
        client_secret: &str,
        api_base: &str,
        token_url: &str,
    ) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_base: api_base.trim_end_matches('/').to_string(),
            token_url: token_url.to_string(),
            client_id: client_id.to_string(),
            client_secret: client_secret.to_string(),
        }
    }

    fn classify_status(status: reqwest::StatusCode, body: &str) -> CalendarApiError {
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            CalendarApiError::Unauthorized
        } else {
            CalendarApiError::Transient(format!("{status}: {body}"))
        }
    }
}

fn to_rfc3339(ms: i64) -> String {
    DateTime::<Utc>::from_timestamp_millis(ms)
        .unwrap_or_else(Utc::now)
        .to_rfc3339_opts(SecondsFormat::Secs, true)
}

fn parse_rfc3339(s: &str) -> Option<i64> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| dt.timestamp_millis())
}

#[derive(Deserialize)]
struct EventsResponse {
    #[serde(default)]
    items: Vec<EventItem>,
}

#[derive(Deserialize)]
struct EventItem {
    id: String,
    #[serde(default)]
    summary: Option<String>,
    start: EventTime,
    end: EventTime,
    #[serde(default)]
    attendees: Vec<Attendee>,
}

#[derive(Deserialize)]
struct EventTime {
    #[serde(rename = "dateTime")]
    date_time: Option<String>,
}

#[derive(Deserialize)]
struct Attendee {
    #[serde(default)]
    email: Option<String>,
}

#[derive(Deserialize)]
struct FreeBusyResponse {
    #[serde(default)]
    calendars: std::collections::HashMap<String, FreeBusyCalendar>,
}

#[derive(Deserialize)]
struct FreeBusyCalendar {
    #[serde(default)]
    busy: Vec<FreeBusyInterval>,
}

#[derive(Deserialize)]
struct FreeBusyInterval {
    start: String,
    end: String,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default = "default_expires_in")]
    expires_in: i64,
}

fn default_expires_in() -> i64 {
    3600
}

#[derive(Deserialize)]
struct TokenErrorResponse {
    #[serde(default)]
    error: String,
}

#[async_trait]
impl CalendarApi for GoogleCalendarClient {
    async fn list_events(
        &self,
        access_token: &str,
        from_ms: i64,
        to_ms: i64,
        max: usize,
    ) -> Result<Vec<CalendarEvent>, CalendarApiError> {
        let url = format!("{}/calendars/primary/events", self.api_base);
        let resp = self
            .http
            .get(&url)
            .bearer_auth(access_token)
            .query(&[
                ("timeMin", to_rfc3339(from_ms)),
                ("timeMax", to_rfc3339(to_ms)),
                ("maxResults", max.to_string()),
                ("singleEvents", "true".to_string()),
                ("orderBy", "startTime".to_string()),
            ])
            .send()
            .await
            .map_err(|e| CalendarApiError::Transient(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(Self::classify_status(status, &body));
        }
        let parsed: EventsResponse = resp
            .json()
            .await
            .map_err(|e| CalendarApiError::Transient(e.to_string()))?;

        Ok(parsed
            .items
            .into_iter()
            .filter_map(|item| {
                let start_ms = item.start.date_time.as_deref().and_then(parse_rfc3339)?;
                let end_ms = item.end.date_time.as_deref().and_then(parse_rfc3339)?;
                Some(CalendarEvent {
                    id: item.id,
                    title: item.summary.unwrap_or_default(),
                    start_ms,
                    end_ms,
                    attendees: item.attendees.into_iter().filter_map(|a| a.email).collect(),
                })
            })
            .collect())
    }

    async fn freebusy(
        &self,
        access_token: &str,
        from_ms: i64,
        to_ms: i64,
    ) -> Result<Vec<BusyInterval>, CalendarApiError> {
        let url = format!("{}/freeBusy", self.api_base);
        let body = serde_json::json!({
            "timeMin": to_rfc3339(from_ms),
            "timeMax": to_rfc3339(to_ms),
            "items": [{ "id": "primary" }],
        });
        let resp = self
            .http
            .post(&url)
            .bearer_auth(access_token)
            .json(&body)
            .send()
            .await
            .map_err(|e| CalendarApiError::Transient(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(Self::classify_status(status, &body));
        }
        let parsed: FreeBusyResponse = resp
            .json()
            .await
            .map_err(|e| CalendarApiError::Transient(e.to_string()))?;

        let mut busy = Vec::new();
        for cal in parsed.calendars.values() {
            for interval in &cal.busy {
                if let (Some(start_ms), Some(end_ms)) =
                    (parse_rfc3339(&interval.start), parse_rfc3339(&interval.end))
                {
                    busy.push(BusyInterval { start_ms, end_ms });
                }
            }
        }
        busy.sort_by_key(|b| b.start_ms);
        Ok(busy)
    }

    async fn create_event(
        &self,
        access_token: &str,
        draft: &EventDraft,
    ) -> Result<CalendarEvent, CalendarApiError> {
        let url = format!("{}/calendars/primary/events", self.api_base);
        let attendees: Vec<serde_json::Value> = draft
            .attendees
            .iter()
            .map(|email| serde_json::json!({ "email": email }))
            .collect();
        let body = serde_json::json!({
            "summary": draft.title,
            "description": draft.description,
            "start": { "dateTime": to_rfc3339(draft.start_ms) },
            "end": { "dateTime": to_rfc3339(draft.end_ms) },
            "attendees": attendees,
        });
        let resp = self
            .http
            .post(&url)
            .bearer_auth(access_token)
            .json(&body)
            .send()
            .await
            .map_err(|e| CalendarApiError::Transient(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(Self::classify_status(status, &body));
        }
        let item: EventItem = resp
            .json()
            .await
            .map_err(|e| CalendarApiError::Transient(e.to_string()))?;
        Ok(CalendarEvent {
            id: item.id,
            title: item.summary.unwrap_or_else(|| draft.title.clone()),
            start_ms: draft.start_ms,
            end_ms: draft.end_ms,
            attendees: draft.attendees.clone(),
        })
    }

    async fn delete_event(
        &self,
        access_token: &str,
        event_id: &str,
    ) -> Result<(), CalendarApiError> {
        let url = format!("{}/calendars/primary/events/{}", self.api_base, event_id);
        let resp = self
            .http
            .delete(&url)
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(|e| CalendarApiError::Transient(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() && status != reqwest::StatusCode::NOT_FOUND {
            let body = resp.text().await.unwrap_or_default();
            return Err(Self::classify_status(status, &body));
        }
        Ok(())
    }

    async fn refresh_token(
        &self,
        refresh_token: &str,
    ) -> Result<RefreshedToken, CalendarApiError> {
        let resp = self
            .http
            .post(&self.token_url)
            .form(&[
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
                ("refresh_token", refresh_token),
                ("grant_type", "refresh_token"),
            ])
            .send()
            .await
            .map_err(|e| CalendarApiError::Transient(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            // OAuth 错误码是结构化字段，不靠消息文本
            if let Ok(err) = serde_json::from_str::<TokenErrorResponse>(&body) {
                if err.error == "invalid_grant" {
                    return Err(CalendarApiError::InvalidGrant);
                }
            }
            if status == reqwest::StatusCode::UNAUTHORIZED
                || status == reqwest::StatusCode::FORBIDDEN
            {
                return Err(CalendarApiError::InvalidGrant);
            }
            return Err(CalendarApiError::Transient(format!("{status}: {body}")));
        }

        let token: TokenResponse = resp
            .json()
            .await
            .map_err(|e| CalendarApiError::Transient(e.to_string()))?;
        Ok(RefreshedToken {
            access_token: token.access_token,
            expires_in_secs: token.expires_in,
        })
    }
}
