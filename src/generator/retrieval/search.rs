//! 搜索API：Google Custom Search 与 Brave，主备切换

use anyhow::Result;
use async_trait::async_trait;
use chrono::{Local, NaiveDate};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::config::{SearchApi, SearchConfig};
use crate::llm::client::utils::backoff_delay;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SearchError {
    #[error("search quota exhausted: {0}")]
    Quota(String),
    #[error("search service unavailable: {0}")]
    Unavailable(String),
    #[error("search request failed: {0}")]
    Failed(String),
    #[error("search api {0} is not configured")]
    NotConfigured(SearchApi),
}

impl SearchError {
    /// 限流与服务端错误值得重试
    pub fn is_transient(&self) -> bool {
        matches!(self, SearchError::Quota(_) | SearchError::Unavailable(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchQuery {
    /// 例如 `site:example.com keyword`
    pub text: String,
    pub num_results: usize,
    pub from_date: Option<NaiveDate>,
    pub to_date: Option<NaiveDate>,
}

impl SearchQuery {
    fn date_range(&self) -> Option<(NaiveDate, NaiveDate)> {
        let from = self.from_date?;
        let to = self.to_date.unwrap_or_else(|| Local::now().date_naive());
        Some((from, to))
    }
}

#[async_trait]
pub trait SearchProvider: Send + Sync {
    fn name(&self) -> &str;

    /// 返回结果URL，保持API给出的顺序
    async fn search(&self, query: &SearchQuery) -> Result<Vec<String>, SearchError>;
}

fn http_client(timeout_seconds: u64) -> Result<reqwest::Client> {
    Ok(reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_seconds))
        .build()?)
}

fn transport_error(e: reqwest::Error) -> SearchError {
    let status = e.status().map(|s| s.as_u16());
    if status == Some(429) {
        SearchError::Quota(e.to_string())
    } else if e.is_timeout() || e.is_connect() || status.is_some_and(|s| s >= 500) {
        SearchError::Unavailable(e.to_string())
    } else {
        SearchError::Failed(e.to_string())
    }
}

pub struct GoogleSearch {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    cse_id: String,
}

impl GoogleSearch {
    pub fn new(config: &SearchConfig) -> Result<Self> {
        Ok(Self {
            client: http_client(config.timeout_seconds)?,
            endpoint: config.google_endpoint.clone(),
            api_key: config.google_api_key.clone(),
            cse_id: config.google_cse_id.clone(),
        })
    }

    pub fn query_params(&self, query: &SearchQuery) -> Vec<(&'static str, String)> {
        let mut params = vec![
            ("key", self.api_key.clone()),
            ("cx", self.cse_id.clone()),
            ("q", query.text.clone()),
            ("num", query.num_results.clamp(1, 10).to_string()),
        ];
        if let Some((from, to)) = query.date_range() {
            params.push((
                "sort",
                format!("date:r:{}:{}", from.format("%Y%m%d"), to.format("%Y%m%d")),
            ));
        }
        params
    }
}

/// 解析Google返回的JSON；`error.code == 429` 视为配额错误
pub fn parse_google_results(body: &Value) -> Result<Vec<String>, SearchError> {
    if let Some(error) = body.get("error") {
        let message = error
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("unknown error")
            .to_string();
        return match error.get("code").and_then(Value::as_i64) {
            Some(429) => Err(SearchError::Quota(message)),
            Some(code) if code >= 500 => Err(SearchError::Unavailable(message)),
            _ => Err(SearchError::Failed(message)),
        };
    }
    Ok(body
        .get("items")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|item| item.get("link").and_then(Value::as_str))
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default())
}

#[async_trait]
impl SearchProvider for GoogleSearch {
    fn name(&self) -> &str {
        "google"
    }

    async fn search(&self, query: &SearchQuery) -> Result<Vec<String>, SearchError> {
        let response = self
            .client
            .get(&self.endpoint)
            .query(&self.query_params(query))
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        match status.as_u16() {
            429 => return Err(SearchError::Quota("HTTP 429".to_string())),
            code if code >= 500 => return Err(SearchError::Unavailable(format!("HTTP {}", code))),
            _ => {}
        }
        let body: Value = response.json().await.map_err(transport_error)?;
        if !status.is_success() && body.get("error").is_none() {
            return Err(SearchError::Failed(format!("HTTP {}", status)));
        }
        parse_google_results(&body)
    }
}

pub struct BraveSearch {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
}

impl BraveSearch {
    pub fn new(config: &SearchConfig) -> Result<Self> {
        Ok(Self {
            client: http_client(config.timeout_seconds)?,
            endpoint: config.brave_endpoint.clone(),
            api_key: config.brave_api_key.clone(),
        })
    }

    pub fn query_params(query: &SearchQuery) -> Vec<(&'static str, String)> {
        let mut params = vec![
            ("q", query.text.clone()),
            ("count", query.num_results.clamp(1, 20).to_string()),
        ];
        if let Some((from, to)) = query.date_range() {
            params.push((
                "freshness",
                format!("pd:{},{}", from.format("%Y%m%d"), to.format("%Y%m%d")),
            ));
        }
        params
    }
}

pub fn parse_brave_results(body: &Value) -> Vec<String> {
    body.pointer("/web/results")
        .and_then(Value::as_array)
        .map(|results| {
            results
                .iter()
                .filter_map(|r| r.get("url").and_then(Value::as_str))
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

#[async_trait]
impl SearchProvider for BraveSearch {
    fn name(&self) -> &str {
        "brave"
    }

    async fn search(&self, query: &SearchQuery) -> Result<Vec<String>, SearchError> {
        let response = self
            .client
            .get(&self.endpoint)
            .header("Accept", "application/json")
            .header("X-Subscription-Token", &self.api_key)
            .query(&Self::query_params(query))
            .send()
            .await
            .map_err(transport_error)?;

        match response.status().as_u16() {
            429 => Err(SearchError::Quota("HTTP 429".to_string())),
            code if code >= 500 => Err(SearchError::Unavailable(format!("HTTP {}", code))),
            code if code >= 400 => Err(SearchError::Failed(format!("HTTP {}", code))),
            _ => {
                let body: Value = response.json().await.map_err(transport_error)?;
                Ok(parse_brave_results(&body))
            }
        }
    }
}

/// 单个API上限流与服务端错误的重试策略
#[derive(Debug, Clone, Copy, Default)]
pub struct SearchRetry {
    pub attempts: u32,
    pub delay_ms: u64,
    pub max_delay_ms: u64,
}

/// 选定的API作为主API，另一个作为备用
#[derive(Default)]
pub struct SearchRouter {
    google: Option<Arc<dyn SearchProvider>>,
    brave: Option<Arc<dyn SearchProvider>>,
    retry: SearchRetry,
}

impl SearchRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// 只注册配置了凭据的API
    pub fn from_config(config: &SearchConfig) -> Result<Self> {
        let mut router = Self::new().with_retry(SearchRetry {
            attempts: config.retry_attempts,
            delay_ms: config.retry_delay_ms,
            max_delay_ms: config.max_retry_delay_ms,
        });
        if config.google_ready() {
            router = router.with_provider(SearchApi::Google, Arc::new(GoogleSearch::new(config)?));
        }
        if config.brave_ready() {
            router = router.with_provider(SearchApi::Brave, Arc::new(BraveSearch::new(config)?));
        }
        Ok(router)
    }

    pub fn with_provider(mut self, api: SearchApi, provider: Arc<dyn SearchProvider>) -> Self {
        match api {
            SearchApi::Google => self.google = Some(provider),
            SearchApi::Brave => self.brave = Some(provider),
        }
        self
    }

    pub fn with_retry(mut self, retry: SearchRetry) -> Self {
        self.retry = retry;
        self
    }

    /// 在一个API上执行查询，暂时性错误按退避重试
    async fn search_with_retry(
        &self,
        provider: &Arc<dyn SearchProvider>,
        query: &SearchQuery,
    ) -> Result<Vec<String>, SearchError> {
        let mut attempt = 0;
        loop {
            match provider.search(query).await {
                Err(e) if e.is_transient() && attempt < self.retry.attempts => {
                    attempt += 1;
                    let delay = backoff_delay(attempt, self.retry.delay_ms, self.retry.max_delay_ms);
                    tracing::debug!(
                        api = provider.name(),
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "retrying search"
                    );
                    tokio::time::sleep(delay).await;
                }
                result => return result,
            }
        }
    }

    fn provider(&self, api: SearchApi) -> Option<&Arc<dyn SearchProvider>> {
        match api {
            SearchApi::Google => self.google.as_ref(),
            SearchApi::Brave => self.brave.as_ref(),
        }
    }

    pub fn is_configured(&self) -> bool {
        self.google.is_some() || self.brave.is_some()
    }

    /// 先用主API（含重试），仍然失败时切换到备用API
    pub async fn search(
        &self,
        primary: SearchApi,
        query: &SearchQuery,
    ) -> Result<Vec<String>, SearchError> {
        let mut last_error = SearchError::NotConfigured(primary);
        for api in [primary, primary.fallback()] {
            let Some(provider) = self.provider(api) else {
                continue;
            };
            match self.search_with_retry(provider, query).await {
                Ok(urls) => return Ok(urls),
                Err(e) => {
                    tracing::warn!(
                        api = provider.name(),
                        query = %query.text,
                        error = %e,
                        "search failed"
                    );
                    last_error = e;
                }
            }
        }
        Err(last_error)
    }
}
