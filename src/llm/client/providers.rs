//! LLM Provider支持模块

use anyhow::Result;
use async_trait::async_trait;
use rig::{
    agent::{Agent, AgentBuilder},
    client::CompletionClient,
    completion::{CompletionModel, Prompt},
};
use std::time::Duration;

use super::CompletionBackend;
use super::types::LlmError;
use super::utils::classify_error;
use crate::config::{LLMProvider, ModelConfig, ResolvedModel};

/// 统一的Provider客户端枚举
#[derive(Clone)]
pub enum ProviderClient {
    OpenAI(rig::providers::openai::Client),
    DeepSeek(rig::providers::deepseek::Client),
    OpenRouter(rig::providers::openrouter::Client),
    Anthropic(rig::providers::anthropic::Client),
    Ollama(rig::providers::ollama::Client),
}

/// rig会自己拼接 `/chat/completions`，配置里写了完整路径时去掉它
fn base_url(endpoint: &str) -> &str {
    endpoint
        .trim_end_matches('/')
        .trim_end_matches("/chat/completions")
}

/// 配置了endpoint时才覆盖provider自带的默认地址
fn endpoint_override(endpoint: &str) -> Option<&str> {
    let trimmed = endpoint.trim();
    (!trimmed.is_empty()).then(|| base_url(trimmed))
}

impl ProviderClient {
    /// 根据模型配置创建相应的provider客户端
    pub fn new(model: &ResolvedModel) -> Result<Self> {
        let config = &model.config;
        match config.provider {
            LLMProvider::OpenAI => {
                let client = rig::providers::openai::Client::builder(&model.api_key)
                    .base_url(base_url(&config.api_endpoint))
                    .build();
                Ok(ProviderClient::OpenAI(client))
            }
            LLMProvider::DeepSeek => {
                let client = rig::providers::deepseek::Client::builder(&model.api_key)
                    .base_url(base_url(&config.api_endpoint))
                    .build();
                Ok(ProviderClient::DeepSeek(client))
            }
            LLMProvider::OpenRouter => {
                let mut builder = rig::providers::openrouter::Client::builder(&model.api_key);
                if let Some(url) = endpoint_override(&config.api_endpoint) {
                    builder = builder.base_url(url);
                }
                let client = builder.build();
                Ok(ProviderClient::OpenRouter(client))
            }
            LLMProvider::Anthropic => {
                let client =
                    rig::providers::anthropic::ClientBuilder::new(&model.api_key).build()?;
                Ok(ProviderClient::Anthropic(client))
            }
            LLMProvider::Ollama => {
                let mut builder = rig::providers::ollama::Client::builder();
                if let Some(url) = endpoint_override(&config.api_endpoint) {
                    builder = builder.base_url(url);
                }
                let client = builder.build();
                Ok(ProviderClient::Ollama(client))
            }
        }
    }

    /// 创建Agent
    pub fn create_agent(&self, config: &ModelConfig) -> ProviderAgent {
        let model = config.model.as_str();
        match self {
            ProviderClient::OpenAI(client) => {
                let builder = client
                    .completion_model(model)
                    .completions_api()
                    .into_agent_builder();
                ProviderAgent::OpenAI(configure(builder, config))
            }
            ProviderClient::DeepSeek(client) => {
                ProviderAgent::DeepSeek(configure(client.agent(model), config))
            }
            ProviderClient::OpenRouter(client) => {
                ProviderAgent::OpenRouter(configure(client.agent(model), config))
            }
            ProviderClient::Anthropic(client) => {
                // anthropic 要求显式的 max_tokens
                let builder = client
                    .agent(model)
                    .max_tokens(config.max_tokens.unwrap_or(4096).into());
                ProviderAgent::Anthropic(configure(builder, config))
            }
            ProviderClient::Ollama(client) => {
                ProviderAgent::Ollama(configure(client.agent(model), config))
            }
        }
    }
}

/// 把采样参数写入AgentBuilder
fn configure<M: CompletionModel>(builder: AgentBuilder<M>, config: &ModelConfig) -> Agent<M> {
    let mut builder = builder;
    if let Some(max_tokens) = config.max_tokens {
        builder = builder.max_tokens(max_tokens.into());
    }
    if let Some(temperature) = config.temperature {
        builder = builder.temperature(temperature);
    }

    let mut extra = serde_json::Map::new();
    if let Some(top_p) = config.top_p {
        extra.insert("top_p".to_string(), serde_json::json!(top_p));
    }
    if let Some(top_k) = config.top_k {
        extra.insert("top_k".to_string(), serde_json::json!(top_k));
    }
    if !extra.is_empty() {
        builder = builder.additional_params(serde_json::Value::Object(extra));
    }
    builder.build()
}

/// 统一的Agent枚举
pub enum ProviderAgent {
    OpenAI(Agent<rig::providers::openai::CompletionModel>),
    DeepSeek(Agent<rig::providers::deepseek::CompletionModel>),
    OpenRouter(Agent<rig::providers::openrouter::CompletionModel>),
    Anthropic(Agent<rig::providers::anthropic::completion::CompletionModel>),
    Ollama(Agent<rig::providers::ollama::CompletionModel<reqwest::Client>>),
}

impl ProviderAgent {
    /// 执行prompt，错误统一转换为文本
    pub async fn prompt(&self, prompt: &str) -> Result<String, String> {
        let result = match self {
            ProviderAgent::OpenAI(agent) => agent.prompt(prompt).await,
            ProviderAgent::DeepSeek(agent) => agent.prompt(prompt).await,
            ProviderAgent::OpenRouter(agent) => agent.prompt(prompt).await,
            ProviderAgent::Anthropic(agent) => agent.prompt(prompt).await,
            ProviderAgent::Ollama(agent) => agent.prompt(prompt).await,
        };
        result.map_err(|e| e.to_string())
    }
}

/// 基于rig的模型后端
pub struct RigBackend {
    agent: ProviderAgent,
    model_name: String,
    timeout: Duration,
}

impl RigBackend {
    pub fn new(model: &ResolvedModel, timeout_seconds: u64) -> Result<Self> {
        let client = ProviderClient::new(model)?;
        Ok(Self {
            agent: client.create_agent(&model.config),
            model_name: model.config.model.clone(),
            timeout: Duration::from_secs(timeout_seconds),
        })
    }
}

#[async_trait]
impl CompletionBackend for RigBackend {
    fn model_name(&self) -> &str {
        &self.model_name
    }

    async fn complete(&self, prompt: &str) -> Result<String, LlmError> {
        match tokio::time::timeout(self.timeout, self.agent.prompt(prompt)).await {
            Ok(Ok(text)) => Ok(text),
            Ok(Err(message)) => Err(classify_error(&message)),
            Err(_) => Err(LlmError::Timeout(self.timeout.as_secs())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{base_url, endpoint_override};

    #[test]
    fn test_base_url_strips_completion_path() {
        assert_eq!(
            base_url("https://api.example.com/v1/chat/completions"),
            "https://api.example.com/v1"
        );
        assert_eq!(
            base_url("https://api.example.com/v1/"),
            "https://api.example.com/v1"
        );
    }

    #[test]
    fn test_endpoint_override_only_when_configured() {
        assert_eq!(endpoint_override(""), None);
        assert_eq!(endpoint_override("  "), None);
        assert_eq!(
            endpoint_override("https://proxy.example.com/api/v1/chat/completions"),
            Some("https://proxy.example.com/api/v1")
        );
        assert_eq!(
            endpoint_override("http://gpu-box:11434/"),
            Some("http://gpu-box:11434")
        );
    }
}
