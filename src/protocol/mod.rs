//! 控制令牌协议与流编码
//!
//! 输出流是叙述文本与控制令牌的交错：每个控制令牌独占一行，形如 `@@<json>`，
//! 叙述文本原样透传。每次运行恰好一个终止令牌（complete 或 action），
//! 编码器在终止之后丢弃一切后续输出并告警。

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

use crate::core::ErrorCode;

/// 控制令牌行前缀
pub const TOKEN_PREFIX: &str = "@@";

/// 过程控制事件（可序列化为 JSON 供前端展示）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    /// 运行开始：编排器的推理说明与意图置信度
    Initiated { reasoning: String, confidence: f64 },
    /// 某一步开始执行
    StepStart { id: String, name: String },
    /// 步骤内的进度播报
    Progress { message: String },
    /// 步骤结果（失败时携带错误码）
    StepResult {
        id: String,
        status: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        error_code: Option<ErrorCode>,
        #[serde(skip_serializing_if = "Option::is_none")]
        detail: Option<String>,
    },
    /// 某一步结束
    StepEnd { id: String },
    /// 正常终止
    Complete,
    /// 终止后单独推送给用户的一条消息（成功或失败摘要，恰好一条）
    SeparateMessage { text: String },
    /// 需要用户侧动作的终止（如 {integration}_reauth_required）
    Action { kind: String },
}

impl StreamEvent {
    /// complete 与 action 是终止令牌；separate_message 跟在 complete 之后
    pub fn is_terminal(&self) -> bool {
        matches!(self, StreamEvent::Complete | StreamEvent::Action { .. })
    }
}

/// 流里的一帧：叙述文本或控制令牌
#[derive(Debug, Clone, PartialEq)]
pub enum StreamFrame {
    Narrative(String),
    Token(StreamEvent),
}

/// 流编码器：把事件与叙述编成行，并守住"恰好一个终止令牌"
pub struct StreamEncoder {
    tx: UnboundedSender<String>,
    terminated: bool,
    message_sent: bool,
}

impl StreamEncoder {
    pub fn channel() -> (Self, UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                tx,
                terminated: false,
                message_sent: false,
            },
            rx,
        )
    }

    /// 发送一个控制令牌。终止之后只放行一条 separate_message，其余丢弃并告警。
    pub fn send(&mut self, event: StreamEvent) {
        if self.terminated {
            let allowed =
                matches!(event, StreamEvent::SeparateMessage { .. }) && !self.message_sent;
            if !allowed {
                tracing::warn!(event = ?event, "dropping event after terminal token");
                return;
            }
            self.message_sent = true;
        } else if event.is_terminal() {
            self.terminated = true;
        }
        let json = match serde_json::to_string(&event) {
            Ok(json) => json,
            Err(e) => {
                tracing::warn!(error = %e, "failed to encode stream event");
                return;
            }
        };
        let _ = self.tx.send(format!("{TOKEN_PREFIX}{json}\n"));
    }

    /// 发送一段叙述文本（原样透传，终止后丢弃）
    pub fn narrate(&mut self, text: &str) {
        if self.terminated {
            tracing::warn!("dropping narrative after terminal token");
            return;
        }
        let _ = self.tx.send(format!("{text}\n"));
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated
    }

    /// 供步骤执行器在运行中播报进度的轻量句柄（progress 永不终止流）
    pub fn progress_handle(&self) -> ProgressHandle {
        ProgressHandle {
            tx: self.tx.clone(),
        }
    }
}

/// 进度播报句柄：只会发 progress 令牌，可安全地塞进步骤执行器
#[derive(Clone)]
pub struct ProgressHandle {
    tx: UnboundedSender<String>,
}

impl ProgressHandle {
    pub fn report(&self, message: impl Into<String>) {
        let event = StreamEvent::Progress {
            message: message.into(),
        };
        if let Ok(json) = serde_json::to_string(&event) {
            let _ = self.tx.send(format!("{TOKEN_PREFIX}{json}\n"));
        }
    }
}

/// 把一行解回帧；CLI 与测试用
pub fn decode_line(line: &str) -> StreamFrame {
    if let Some(json) = line.strip_prefix(TOKEN_PREFIX) {
        match serde_json::from_str(json) {
            Ok(event) => return StreamFrame::Token(event),
            Err(e) => {
                tracing::warn!(error = %e, "unparseable control token, treating as narrative");
            }
        }
    }
    StreamFrame::Narrative(line.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn drain(mut rx: UnboundedReceiver<String>) -> Vec<String> {
        let mut lines = Vec::new();
        while let Ok(line) = rx.try_recv() {
            lines.push(line);
        }
        lines
    }

    #[tokio::test]
    async fn tokens_are_prefixed_lines() {
        let (mut encoder, rx) = StreamEncoder::channel();
        encoder.send(StreamEvent::Initiated {
            reasoning: "scheduling with Bob".to_string(),
            confidence: 0.9,
        });
        encoder.narrate("Looking at calendars...");
        drop(encoder);

        let lines = drain(rx).await;
        assert!(lines[0].starts_with(TOKEN_PREFIX));
        assert!(lines[0].contains("\"type\":\"initiated\""));
        assert_eq!(lines[1], "Looking at calendars...\n");
    }

    #[tokio::test]
    async fn exactly_one_terminal_token() {
        let (mut encoder, rx) = StreamEncoder::channel();
        encoder.send(StreamEvent::Complete);
        encoder.send(StreamEvent::SeparateMessage {
            text: "done".to_string(),
        });
        // 终止后一切都被丢弃
        encoder.send(StreamEvent::Complete);
        encoder.send(StreamEvent::Action {
            kind: "google_calendar_reauth_required".to_string(),
        });
        encoder.send(StreamEvent::SeparateMessage {
            text: "second message".to_string(),
        });
        encoder.narrate("trailing text");
        drop(encoder);

        let lines = drain(rx).await;
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("\"complete\""));
        assert!(lines[1].contains("done"));
    }

    #[tokio::test]
    async fn action_is_terminal_without_separate_message() {
        let (mut encoder, rx) = StreamEncoder::channel();
        encoder.send(StreamEvent::Action {
            kind: "google_calendar_reauth_required".to_string(),
        });
        assert!(encoder.is_terminated());
        drop(encoder);

        let lines = drain(rx).await;
        assert_eq!(lines.len(), 1);
        assert!(lines[0].contains("google_calendar_reauth_required"));
    }

    #[test]
    fn decode_round_trips_tokens_and_narrative() {
        let token = format!(
            "{TOKEN_PREFIX}{}",
            serde_json::to_string(&StreamEvent::StepStart {
                id: "step_1".to_string(),
                name: "resolve counterpart".to_string(),
            })
            .unwrap()
        );
        match decode_line(&token) {
            StreamFrame::Token(StreamEvent::StepStart { id, .. }) => assert_eq!(id, "step_1"),
            other => panic!("unexpected frame: {other:?}"),
        }
        assert_eq!(
            decode_line("plain text"),
            StreamFrame::Narrative("plain text".to_string())
        );
    }

    #[test]
    fn garbled_token_degrades_to_narrative() {
        assert!(matches!(
            decode_line("@@{not json"),
            StreamFrame::Narrative(_)
        ));
    }
}
