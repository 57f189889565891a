use thiserror::Error;

/// 模型服务错误
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LlmError {
    #[error("rate limited: {0}")]
    RateLimited(String),

    #[error("provider server error: {0}")]
    Server(String),

    #[error("request timed out after {0}s")]
    Timeout(u64),

    #[error("request failed: {0}")]
    Request(String),

    #[error("empty response from model")]
    EmptyResponse,
}

impl LlmError {
    /// 限流、5xx与超时可以重试，其余错误直接返回
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            LlmError::RateLimited(_) | LlmError::Server(_) | LlmError::Timeout(_)
        )
    }
}

/// 一次模型调用的结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LlmReply {
    /// 原始回复
    pub raw: String,
    /// 去掉 `<think>` 段落后的回复
    pub cleaned: String,
}
