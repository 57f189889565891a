use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Read;
use std::path::PathBuf;

mod error;
mod models;
mod request;

pub use error::ConfigError;
pub use models::{DEFAULT_MODEL_ENV, DEFAULT_MODEL_KEY, LLMProvider, ModelConfig, ModelStore, ResolvedModel};
pub use request::{RunRequest, SearchApi};

/// 应用程序配置
#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct Config {
    /// LLM调用策略（重试、超时、并发）
    pub llm: LLMConfig,

    /// 搜索API配置
    pub search: SearchConfig,

    /// 抓取配置
    pub scraper: ScraperConfig,

    /// 缓存配置
    pub cache: CacheConfig,

    /// 归档与输出配置
    pub archive: ArchiveConfig,

    /// 模型配置仓库路径
    pub models_path: PathBuf,

    /// 启动前检查模型连接
    pub check_connection: bool,

    /// 是否启用详细日志
    pub verbose: bool,
}

/// LLM调用策略
#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct LLMConfig {
    /// 瞬时错误的最大尝试次数
    pub retry_attempts: u32,

    /// 指数退避的初始间隔（毫秒）
    pub retry_delay_ms: u64,

    /// 退避间隔上限（毫秒）
    pub max_retry_delay_ms: u64,

    /// 单次调用超时时间（秒）
    pub timeout_seconds: u64,

    /// 跨条目的LLM并发上限
    pub max_parallels: usize,

    /// 回复缺少必需标签时的重新询问次数
    pub parse_retry_attempts: u32,

    /// 重新询问间隔（毫秒）
    pub parse_retry_delay_ms: u64,
}

/// 搜索API配置
#[derive(Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct SearchConfig {
    pub google_api_key: String,
    pub google_cse_id: String,
    pub brave_api_key: String,
    pub google_endpoint: String,
    pub brave_endpoint: String,
    pub timeout_seconds: u64,
    /// 限流或服务端错误时在同一个API上的重试次数
    pub retry_attempts: u32,
    pub retry_delay_ms: u64,
    pub max_retry_delay_ms: u64,
}

/// 抓取配置
#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct ScraperConfig {
    /// 同时进行的文章抓取数量
    pub max_parallels: usize,

    /// 单个页面请求超时（秒）
    pub request_timeout_seconds: u64,

    /// 文章正文最小长度
    pub min_article_chars: usize,

    /// 讨论帖最小长度
    pub min_discussion_chars: usize,

    /// WebDriver服务地址
    pub webdriver_url: String,

    /// 讨论社区站点地址
    pub discussion_base_url: String,

    /// 是否对发现的网站做可达性校验
    pub validate_sources: bool,
}

/// 缓存配置
#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct CacheConfig {
    /// 是否启用缓存
    pub enabled: bool,

    /// 缓存目录
    pub cache_dir: PathBuf,

    /// 缓存过期时间（小时）
    pub expire_hours: u64,
}

/// 归档配置
#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct ArchiveConfig {
    /// 每次运行的归档根目录
    pub archive_dir: PathBuf,

    /// 最终报告的输出目录
    pub output_dir: PathBuf,

    /// PDF渲染工具
    pub pdf_tool: String,

    /// 是否生成PDF
    pub render_pdf: bool,
}

impl Config {
    /// 从文件加载配置
    pub fn from_file(path: &PathBuf) -> Result<Self> {
        let mut file =
            File::open(path).context(format!("Failed to open config file: {:?}", path))?;
        let mut content = String::new();
        file.read_to_string(&mut content)
            .context("Failed to read config file")?;

        let config: Config = toml::from_str(&content).context("Failed to parse config file")?;
        Ok(config)
    }

    /// 加载模型配置仓库
    pub fn load_models(&self) -> Result<ModelStore, ConfigError> {
        ModelStore::from_file(&self.models_path)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            llm: LLMConfig::default(),
            search: SearchConfig::default(),
            scraper: ScraperConfig::default(),
            cache: CacheConfig::default(),
            archive: ArchiveConfig::default(),
            models_path: PathBuf::from("ai_models.toml"),
            check_connection: true,
            verbose: false,
        }
    }
}

impl Default for LLMConfig {
    fn default() -> Self {
        Self {
            retry_attempts: 3,
            retry_delay_ms: 2000,
            max_retry_delay_ms: 30_000,
            timeout_seconds: 300,
            max_parallels: 3,
            parse_retry_attempts: 3,
            parse_retry_delay_ms: 5000,
        }
    }
}

impl SearchConfig {
    pub fn google_ready(&self) -> bool {
        !self.google_api_key.is_empty() && !self.google_cse_id.is_empty()
    }

    pub fn brave_ready(&self) -> bool {
        !self.brave_api_key.is_empty()
    }
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            google_api_key: std::env::var("GOOGLE_API_KEY").unwrap_or_default(),
            google_cse_id: std::env::var("GOOGLE_CSE_ID").unwrap_or_default(),
            brave_api_key: std::env::var("BRAVE_API_KEY").unwrap_or_default(),
            google_endpoint: String::from("https://www.googleapis.com/customsearch/v1"),
            brave_endpoint: String::from("https://api.search.brave.com/res/v1/web/search"),
            timeout_seconds: 20,
            retry_attempts: 2,
            retry_delay_ms: 1000,
            max_retry_delay_ms: 8000,
        }
    }
}

// 凭据不进入日志
impl std::fmt::Debug for SearchConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SearchConfig")
            .field("google", &self.google_ready())
            .field("brave", &self.brave_ready())
            .field("google_endpoint", &self.google_endpoint)
            .field("brave_endpoint", &self.brave_endpoint)
            .field("timeout_seconds", &self.timeout_seconds)
            .field("retry_attempts", &self.retry_attempts)
            .finish()
    }
}

impl Default for ScraperConfig {
    fn default() -> Self {
        Self {
            max_parallels: 4,
            request_timeout_seconds: 30,
            min_article_chars: 150,
            min_discussion_chars: 100,
            webdriver_url: String::from("http://localhost:4444"),
            discussion_base_url: String::from("https://old.reddit.com"),
            validate_sources: true,
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            cache_dir: PathBuf::from(".report-forge/cache"),
            expire_hours: 168,
        }
    }
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            archive_dir: PathBuf::from("archive"),
            output_dir: PathBuf::from("outputs"),
            pdf_tool: String::from("wkhtmltopdf"),
            render_pdf: true,
        }
    }
}
