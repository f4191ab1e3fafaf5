//! 意图 / 时间抽取服务
//!
//! 将入站自然语言交给 LLM 抽取为结构化排期意图（JSON-only prompt + 解析）。
//! 对本引擎而言抽取质量不在范围内：输出解析失败一律按 Other 处理，由上层追问。

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::core::AgentError;
use crate::llm::{complete_with_retry, LlmClient, Message};

/// 抽取出的意图类别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentKind {
    /// 发起排期（需要检查空闲并提案）
    Schedule,
    /// 确认某个已提案的槽位
    Confirm,
    /// 与排期无关 / 无法判定
    Other,
}

/// 结构化排期意图
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulingIntent {
    pub kind: IntentKind,
    /// 对方称呼原文（交给 resolver 匹配连接）
    #[serde(default)]
    pub counterpart_text: Option<String>,
    /// 会议时长（分钟）
    #[serde(default)]
    pub duration_minutes: Option<i64>,
    /// 期望窗口起止（UTC 毫秒）
    #[serde(default)]
    pub window_start_ms: Option<i64>,
    #[serde(default)]
    pub window_end_ms: Option<i64>,
    /// Confirm 时：选中的提案序号（0 起）
    #[serde(default)]
    pub selection_index: Option<usize>,
    /// 给编排层的说明与置信度（仅供展示）
    #[serde(default)]
    pub reasoning: String,
    #[serde(default = "default_confidence")]
    pub confidence: f32,
}

fn default_confidence() -> f32 {
    0.5
}

impl SchedulingIntent {
    pub fn other(reason: &str) -> Self {
        Self {
            kind: IntentKind::Other,
            counterpart_text: None,
            duration_minutes: None,
            window_start_ms: None,
            window_end_ms: None,
            selection_index: None,
            reasoning: reason.to_string(),
            confidence: 0.0,
        }
    }
}

const EXTRACT_SYSTEM_PROMPT: &str = r#"You extract meeting-scheduling intent from a conversation.
Reply with a single JSON object and nothing else, shaped as:
{"kind":"schedule|confirm|other","counterpart_text":"...","duration_minutes":30,
 "window_start_ms":0,"window_end_ms":0,"selection_index":0,
 "reasoning":"one short sentence","confidence":0.0}
Omit fields you cannot determine. Never invent a time window."#;

/// 意图抽取器：LlmClient 之上的薄封装
pub struct IntentExtractor {
    llm: Arc<dyn LlmClient>,
    max_retries: u32,
    backoff_base_ms: u64,
}

impl IntentExtractor {
    pub fn new(llm: Arc<dyn LlmClient>, max_retries: u32, backoff_base_ms: u64) -> Self {
        Self {
            llm,
            max_retries,
            backoff_base_ms,
        }
    }

    /// 抽取最近对话的排期意图；LLM 瞬时失败有限重试后仍失败则返回 LlmError，
    /// 输出不合法时降级为 Other
    pub async fn extract(&self, conversation: &[Message]) -> Result<SchedulingIntent, AgentError> {
        let mut messages = vec![Message::system(EXTRACT_SYSTEM_PROMPT)];
        messages.extend_from_slice(conversation);

        let output = complete_with_retry(
            self.llm.as_ref(),
            &messages,
            self.max_retries,
            self.backoff_base_ms,
        )
        .await?;

        Ok(parse_intent(&output))
    }
}

/// 从 LLM 输出中取第一个 '{' 到最后一个 '}' 之间的 JSON 并解析；失败降级为 Other
pub fn parse_intent(output: &str) -> SchedulingIntent {
    let json_slice = match (output.find('{'), output.rfind('}')) {
        (Some(start), Some(end)) if end > start => &output[start..=end],
        _ => return SchedulingIntent::other("no JSON object in extractor output"),
    };
    serde_json::from_str::<SchedulingIntent>(json_slice)
        .unwrap_or_else(|_| SchedulingIntent::other("extractor output did not parse"))
}
