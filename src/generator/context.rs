use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::cache::CacheManager;
use crate::config::{Config, ModelConfig, RunRequest};
use crate::controller::events::{EventHub, ProgressEvent};
use crate::generator::outlet::Archive;
use crate::generator::retrieval::search::SearchRouter;
use crate::generator::scrape::browser::{BrowserLauncher, WebDriverLauncher};
use crate::generator::scrape::fetcher::{HttpFetcher, PageFetcher};
use crate::llm::client::{LLMClient, LlmError};
use crate::utils::text::parse_tool_response;

/// 取消标记被设置后，各阶段以这个错误退出
#[derive(Debug, Error)]
#[error("run cancelled")]
pub struct RunCancelled;

/// 外部协作方：搜索API、网页获取、浏览器自动化
#[derive(Clone)]
pub struct Services {
    pub search: Arc<SearchRouter>,
    pub fetcher: Arc<dyn PageFetcher>,
    pub browser: Arc<dyn BrowserLauncher>,
}

impl Services {
    /// 根据配置创建真实的网络实现
    pub fn from_config(config: &Config) -> Result<Self> {
        Ok(Self {
            search: Arc::new(SearchRouter::from_config(&config.search)?),
            fetcher: Arc::new(HttpFetcher::new(config.scraper.request_timeout_seconds)?),
            browser: Arc::new(WebDriverLauncher::new(
                &config.scraper.webdriver_url,
                config.scraper.request_timeout_seconds,
            )?),
        })
    }
}

#[derive(Clone)]
pub struct GeneratorContext {
    /// LLM调用器，用于与AI通信。
    pub llm_client: LLMClient,
    /// 配置
    pub config: Config,
    /// 本次Run的请求
    pub request: Arc<RunRequest>,
    /// 选中的模型配置（用于上下文预算）
    pub model: Arc<ModelConfig>,
    pub services: Services,
    /// 缓存管理器
    pub cache_manager: Arc<CacheManager>,
    pub archive: Arc<Archive>,
    pub events: Arc<EventHub>,
    pub cancel: CancellationToken,
}

impl GeneratorContext {
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// 在阶段边界和每个扇出任务之前调用
    pub fn ensure_active(&self) -> Result<()> {
        if self.is_cancelled() {
            return Err(RunCancelled.into());
        }
        Ok(())
    }

    /// 进度输出：写入 run.log 并推送给订阅者
    pub async fn log(&self, line: impl Into<String>) {
        let line = line.into();
        tracing::info!("{}", line);
        if let Err(e) = self.archive.append_log(&line).await {
            tracing::warn!(error = %e, "failed to append run.log");
        }
        self.events.publish(ProgressEvent::Output(line)).await;
    }

    pub async fn warn(&self, line: impl Into<String>) {
        let line = format!("⚠️ {}", line.into());
        // 控制台输出走进度事件
        tracing::debug!("{}", line);
        if let Err(e) = self.archive.append_log(&line).await {
            tracing::warn!(error = %e, "failed to append run.log");
        }
        self.events.publish(ProgressEvent::Output(line)).await;
    }

    /// 记录prompt后调用模型，返回清理后的回复
    pub async fn prompt_llm(&self, tool_name: &str, prompt: &str) -> Result<String, LlmError> {
        if let Err(e) = self.archive.record_prompt(tool_name, prompt).await {
            tracing::warn!(tool = tool_name, error = %e, "failed to archive prompt");
        }
        let reply = self.llm_client.prompt(tool_name, prompt).await?;
        Ok(reply.cleaned)
    }

    /// 带磁盘缓存的调用，缓存分类即工具名
    ///
    /// 只有通过 `accept` 的回复才会写入缓存或从缓存返回
    pub async fn prompt_cached(
        &self,
        tool_name: &str,
        prompt: &str,
        accept: impl Fn(&str) -> bool,
    ) -> Result<String, LlmError> {
        let model = self.llm_client.model_name().to_string();
        if let Some(cached) = self
            .cache_manager
            .get::<String>(tool_name, &model, prompt)
            .await
        {
            if accept(&cached) {
                tracing::debug!(tool = tool_name, "cache hit");
                return Ok(cached);
            }
            tracing::debug!(tool = tool_name, "ignoring unusable cached reply");
        }

        let reply = self.prompt_llm(tool_name, prompt).await?;
        if accept(&reply)
            && let Err(e) = self
                .cache_manager
                .set(tool_name, &model, prompt, reply.clone())
                .await
        {
            tracing::warn!(tool = tool_name, error = %e, "failed to write cache");
        }
        Ok(reply)
    }

    /// 要求回复中包含 `<tag>...</tag>`；缺少时重新询问，次数由 parse_retry_attempts 决定
    ///
    /// 返回 `Ok(None)` 表示多次询问后仍然无法解析；模型调用本身失败时返回错误
    pub async fn ask_tagged(
        &self,
        tool_name: &str,
        prompt: &str,
        tag: &str,
        use_cache: bool,
    ) -> Result<Option<String>, LlmError> {
        let model = self.llm_client.model_name().to_string();
        let category = format!("{}_{}", tool_name, tag);
        if use_cache
            && let Some(cached) = self
                .cache_manager
                .get::<String>(&category, &model, prompt)
                .await
        {
            return Ok(Some(cached));
        }

        let attempts = self.config.llm.parse_retry_attempts.max(1);
        for attempt in 1..=attempts {
            let reply = self.prompt_llm(tool_name, prompt).await?;
            if let Some(content) = parse_tool_response(&reply, tag).found() {
                if use_cache
                    && let Err(e) = self
                        .cache_manager
                        .set(&category, &model, prompt, content.clone())
                        .await
                {
                    tracing::warn!(tool = tool_name, error = %e, "failed to write cache");
                }
                return Ok(Some(content));
            }

            tracing::warn!(tool = tool_name, tag, attempt, attempts, "reply is missing the expected tag");
            if attempt < attempts {
                if self.is_cancelled() {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(self.config.llm.parse_retry_delay_ms)).await;
            }
        }
        Ok(None)
    }
}
