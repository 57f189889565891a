//! 模型配置仓库：模型key到端点/凭据/采样参数的映射，加载时完成校验

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

use super::ConfigError;

/// 未显式指定时使用的模型key
pub const DEFAULT_MODEL_KEY: &str = "default_model";

/// 指定默认模型key的环境变量
pub const DEFAULT_MODEL_ENV: &str = "DEFAULT_MODEL_CONFIG";

/// LLM Provider类型
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Default)]
pub enum LLMProvider {
    #[serde(rename = "openai")]
    #[default]
    OpenAI,
    #[serde(rename = "deepseek")]
    DeepSeek,
    #[serde(rename = "openrouter")]
    OpenRouter,
    #[serde(rename = "anthropic")]
    Anthropic,
    #[serde(rename = "ollama")]
    Ollama,
}

impl std::fmt::Display for LLMProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LLMProvider::OpenAI => write!(f, "openai"),
            LLMProvider::DeepSeek => write!(f, "deepseek"),
            LLMProvider::OpenRouter => write!(f, "openrouter"),
            LLMProvider::Anthropic => write!(f, "anthropic"),
            LLMProvider::Ollama => write!(f, "ollama"),
        }
    }
}

impl std::str::FromStr for LLMProvider {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "openai" => Ok(LLMProvider::OpenAI),
            "deepseek" => Ok(LLMProvider::DeepSeek),
            "openrouter" => Ok(LLMProvider::OpenRouter),
            "anthropic" => Ok(LLMProvider::Anthropic),
            "ollama" => Ok(LLMProvider::Ollama),
            _ => Err(ConfigError::UnknownProvider(s.to_string())),
        }
    }
}

/// 单个模型的配置
#[derive(Deserialize, Serialize, Clone, Default)]
pub struct ModelConfig {
    #[serde(default)]
    pub provider: LLMProvider,

    /// OpenAI兼容接口的基地址（可以带或不带 `/chat/completions`）
    #[serde(default)]
    pub api_endpoint: String,

    /// 明文凭据，优先级高于 `api_key_env`
    #[serde(default)]
    pub api_key: Option<String>,

    /// 存放凭据的环境变量名
    #[serde(default)]
    pub api_key_env: Option<String>,

    pub model: String,

    /// 请求的最大输出token数
    #[serde(default)]
    pub max_tokens: Option<u32>,

    /// 输入预算（token），决定ReportContext的截断
    #[serde(default)]
    pub input_token_limit: Option<usize>,

    #[serde(default)]
    pub temperature: Option<f64>,

    #[serde(default)]
    pub top_p: Option<f64>,

    #[serde(default)]
    pub top_k: Option<u32>,
}

impl std::fmt::Debug for ModelConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelConfig")
            .field("provider", &self.provider)
            .field("api_endpoint", &self.api_endpoint)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("api_key_env", &self.api_key_env)
            .field("model", &self.model)
            .field("max_tokens", &self.max_tokens)
            .field("input_token_limit", &self.input_token_limit)
            .field("temperature", &self.temperature)
            .field("top_p", &self.top_p)
            .field("top_k", &self.top_k)
            .finish()
    }
}

impl ModelConfig {
    /// 没有配置输入预算时退回到max_tokens，再退回到4096
    pub fn input_budget_tokens(&self) -> usize {
        self.input_token_limit
            .or(self.max_tokens.map(|t| t as usize))
            .unwrap_or(4096)
    }

    /// 单条内容送去摘要前的最大字符数
    pub fn summary_input_chars(&self) -> usize {
        let estimated = (self.input_budget_tokens() as f64 * 0.75 * 3.5) as usize;
        estimated.min(150_000)
    }

    fn validate(&self, key: &str) -> Result<(), ConfigError> {
        let invalid = |reason: &str| ConfigError::InvalidModel {
            key: key.to_string(),
            reason: reason.to_string(),
        };

        if self.model.trim().is_empty() {
            return Err(invalid("`model` is empty"));
        }
        if self.api_endpoint.trim().is_empty() && self.provider != LLMProvider::Ollama {
            return Err(invalid("`api_endpoint` is empty"));
        }
        if let Some(t) = self.temperature
            && !(0.0..=2.0).contains(&t)
        {
            return Err(invalid("`temperature` must be within 0..=2"));
        }
        if let Some(p) = self.top_p
            && !(p > 0.0 && p <= 1.0)
        {
            return Err(invalid("`top_p` must be within (0, 1]"));
        }
        if self.max_tokens == Some(0) {
            return Err(invalid("`max_tokens` must be positive"));
        }
        if self.input_token_limit == Some(0) {
            return Err(invalid("`input_token_limit` must be positive"));
        }
        Ok(())
    }

    fn resolve_credential(&self) -> Option<String> {
        if let Some(key) = self.api_key.as_ref().filter(|k| !k.trim().is_empty()) {
            return Some(key.clone());
        }
        self.api_key_env
            .as_ref()
            .and_then(|name| std::env::var(name).ok())
            .filter(|k| !k.trim().is_empty())
    }
}

/// 已解析出凭据、可以直接使用的模型
#[derive(Clone)]
pub struct ResolvedModel {
    pub key: String,
    pub config: ModelConfig,
    pub api_key: String,
}

impl std::fmt::Debug for ResolvedModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolvedModel")
            .field("key", &self.key)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// 模型配置仓库（只读）
#[derive(Debug, Clone, Default)]
pub struct ModelStore {
    models: BTreeMap<String, ModelConfig>,
}

impl ModelStore {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content =
            std::fs::read_to_string(path).map_err(|source| ConfigError::ModelStoreRead {
                path: path.to_path_buf(),
                source,
            })?;
        Self::from_toml_str(&content).map_err(|message| ConfigError::ModelStoreParse {
            path: path.to_path_buf(),
            message,
        })
    }

    pub fn from_toml_str(content: &str) -> Result<Self, String> {
        let models: BTreeMap<String, ModelConfig> =
            toml::from_str(content).map_err(|e| e.to_string())?;
        Ok(Self { models })
    }

    pub fn from_models(models: impl IntoIterator<Item = (String, ModelConfig)>) -> Self {
        Self {
            models: models.into_iter().collect(),
        }
    }

    pub fn keys(&self) -> Vec<&str> {
        self.models.keys().map(String::as_str).collect()
    }

    /// 选择模型key：命令行 > 环境变量 > 默认key
    pub fn select_key(cli_key: Option<&str>) -> String {
        if let Some(key) = cli_key.filter(|k| !k.trim().is_empty()) {
            return key.trim().to_string();
        }
        std::env::var(DEFAULT_MODEL_ENV)
            .ok()
            .filter(|k| !k.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_MODEL_KEY.to_string())
    }

    /// 按key解析模型，完成校验与凭据解析
    pub fn resolve(&self, key: &str) -> Result<ResolvedModel, ConfigError> {
        let config = self
            .models
            .get(key)
            .ok_or_else(|| ConfigError::UnknownModel {
                key: key.to_string(),
                available: self.keys().join(", "),
            })?;
        config.validate(key)?;

        let api_key = match config.resolve_credential() {
            Some(api_key) => api_key,
            // 本地ollama不需要凭据
            None if config.provider == LLMProvider::Ollama => String::new(),
            None => {
                return Err(ConfigError::MissingCredential {
                    key: key.to_string(),
                });
            }
        };

        Ok(ResolvedModel {
            key: key.to_string(),
            config: config.clone(),
            api_key,
        })
    }
}
