//! LLM 客户端抽象
//!
//! 对本引擎而言 LLM 是不透明服务：文本完成 + 结构化抽取各走 complete。
//! 后端（OpenAI 兼容 / Mock）实现 LlmClient。

use std::time::Duration;

use async_trait::async_trait;

use crate::core::AgentError;
use crate::llm::Message;

/// LLM 客户端 trait：非流式完成
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// 非流式完成，返回首条 content
    async fn complete(&self, messages: &[Message]) -> Result<String, String>;

    /// 获取累计 token 使用统计：(prompt_tokens, completion_tokens, total_tokens)
    /// 默认返回 (0, 0, 0)，具体实现可覆盖
    fn token_usage(&self) -> (u64, u64, u64) {
        (0, 0, 0)
    }
}

/// LLM 瞬时失败有限重试（指数退避），与日历层同一策略
pub async fn complete_with_retry(
    llm: &dyn LlmClient,
    messages: &[Message],
    max_retries: u32,
    backoff_base_ms: u64,
) -> Result<String, AgentError> {
    let mut attempt = 0u32;
    loop {
        match llm.complete(messages).await {
            Ok(output) => return Ok(output),
            Err(e) if attempt < max_retries => {
                let backoff = backoff_base_ms * (1u64 << attempt);
                tracing::debug!(attempt, backoff_ms = backoff, error = %e, "retrying llm call");
                tokio::time::sleep(Duration::from_millis(backoff)).await;
                attempt += 1;
            }
            Err(e) => return Err(AgentError::LlmError(e)),
        }
    }
}
