use anyhow::{Result, bail};
use async_trait::async_trait;
use rand::seq::IndexedRandom;
use std::time::Duration;

const USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.4 Safari/605.1.15",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/123.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:125.0) Gecko/20100101 Firefox/125.0",
];

/// 获取网页的抽象，便于在测试中替换
#[async_trait]
pub trait PageFetcher: Send + Sync {
    /// GET页面，返回HTML正文
    async fn fetch(&self, url: &str) -> Result<String>;

    /// HEAD请求，返回HTTP状态码
    async fn probe(&self, url: &str) -> Result<u16>;
}

pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new(timeout_seconds: u64) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_seconds))
            .build()?;
        Ok(Self { client })
    }

    fn user_agent() -> &'static str {
        USER_AGENTS
            .choose(&mut rand::rng())
            .copied()
            .unwrap_or(USER_AGENTS[0])
    }
}

#[async_trait]
impl PageFetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<String> {
        let response = self
            .client
            .get(url)
            .header("User-Agent", Self::user_agent())
            .header("Accept", "text/html,application/xhtml+xml")
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            bail!("HTTP {} for {}", status, url);
        }
        Ok(response.text().await?)
    }

    async fn probe(&self, url: &str) -> Result<u16> {
        let response = self
            .client
            .head(url)
            .header("User-Agent", Self::user_agent())
            .send()
            .await?;
        Ok(response.status().as_u16())
    }
}
