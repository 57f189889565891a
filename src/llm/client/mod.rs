//! LLM客户端 - 提供统一的LLM服务接口

use anyhow::Result;
use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;

use crate::config::{LLMConfig, ResolvedModel};
use crate::utils::text::clean_thinking_tags;

mod providers;
pub mod types;
pub mod utils;

pub use providers::{ProviderAgent, ProviderClient, RigBackend};
pub use types::{LlmError, LlmReply};

/// 模型后端：发送一段prompt，返回原始文本
#[async_trait]
pub trait CompletionBackend: Send + Sync {
    fn model_name(&self) -> &str;

    async fn complete(&self, prompt: &str) -> Result<String, LlmError>;
}

/// LLM客户端 - 在后端之上提供重试与回复清理
#[derive(Clone)]
pub struct LLMClient {
    config: LLMConfig,
    backend: Arc<dyn CompletionBackend>,
}

impl LLMClient {
    /// 根据已解析的模型配置创建客户端
    pub fn new(model: &ResolvedModel, config: LLMConfig) -> Result<Self> {
        let backend = RigBackend::new(model, config.timeout_seconds)?;
        Ok(Self::with_backend(Arc::new(backend), config))
    }

    pub fn with_backend(backend: Arc<dyn CompletionBackend>, config: LLMConfig) -> Self {
        Self { config, backend }
    }

    pub fn model_name(&self) -> &str {
        self.backend.model_name()
    }

    pub fn config(&self) -> &LLMConfig {
        &self.config
    }

    /// 检查模型连接和功能是否正常
    pub async fn check_connection(&self) -> Result<(), LlmError> {
        self.backend
            .complete("Reply with the single word: ready")
            .await
            .map(|_| ())
    }

    /// 通用重试逻辑：只对瞬时错误重试，间隔指数增长
    async fn retry_with_backoff<T, F, Fut>(&self, tool_name: &str, operation: F) -> Result<T, LlmError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, LlmError>>,
    {
        let max_attempts = self.config.retry_attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;
            match operation().await {
                Ok(result) => return Ok(result),
                Err(err) if err.is_transient() && attempt < max_attempts => {
                    let delay = utils::backoff_delay(
                        attempt,
                        self.config.retry_delay_ms,
                        self.config.max_retry_delay_ms,
                    );
                    tracing::warn!(
                        tool = tool_name,
                        attempt,
                        max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "transient model error, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(err) => {
                    tracing::error!(tool = tool_name, attempt, error = %err, "model call failed");
                    return Err(err);
                }
            }
        }
    }

    /// 发送prompt，返回原始回复和去掉思考段落后的回复
    pub async fn prompt(&self, tool_name: &str, prompt: &str) -> Result<LlmReply, LlmError> {
        let raw = self
            .retry_with_backoff(tool_name, || async {
                let text = self.backend.complete(prompt).await?;
                if text.trim().is_empty() {
                    return Err(LlmError::EmptyResponse);
                }
                Ok(text)
            })
            .await?;

        let cleaned = clean_thinking_tags(&raw);
        Ok(LlmReply { raw, cleaned })
    }
}
