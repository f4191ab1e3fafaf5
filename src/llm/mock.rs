//! Mock LLM 客户端（用于测试与 CLI 演示，无需 API）
//!
//! 可预置固定回复队列；默认回显最后一条 User 消息。

use std::sync::Mutex;

use async_trait::async_trait;

use crate::llm::{LlmClient, Message, Role};

/// Mock 客户端：按预置队列出队回复，队列空时回显用户最后一条消息
#[derive(Debug, Default)]
pub struct MockLlmClient {
    responses: Mutex<Vec<String>>,
}

impl MockLlmClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// 预置一批回复（按 push 顺序出队）
    pub fn with_responses(responses: Vec<String>) -> Self {
        let mut rev = responses;
        rev.reverse();
        Self {
            responses: Mutex::new(rev),
        }
    }
}

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn complete(&self, messages: &[Message]) -> Result<String, String> {
        if let Some(next) = self.responses.lock().unwrap().pop() {
            return Ok(next);
        }
        let last_user = messages
            .iter()
            .rev()
            .find(|m| matches!(m.role, Role::User))
            .map(|m| m.content.as_str())
            .unwrap_or("(no input)");
        Ok(format!("Echo from Mock: {}", last_user))
    }
}
