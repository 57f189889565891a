//! 浏览器自动化：通过WebDriver协议驱动一个无头浏览器会话

use anyhow::{Context, Result, anyhow, bail};
use async_trait::async_trait;
use serde_json::{Value, json};
use std::time::Duration;

/// W3C WebDriver 的元素标识键
const ELEMENT_KEY: &str = "element-6066-11e4-a52e-4f735466cecf";

/// 一个已打开的浏览器会话，由Scraper独占
#[async_trait]
pub trait BrowserSession: Send + Sync {
    async fn navigate(&mut self, url: &str) -> Result<()>;

    /// 匹配CSS选择器的所有元素的可见文本，按页面顺序
    async fn find_texts(&mut self, css: &str) -> Result<Vec<String>>;

    /// 匹配CSS选择器的所有元素的某个DOM属性（如 `href`）
    async fn find_properties(&mut self, css: &str, property: &str) -> Result<Vec<String>>;

    async fn close(&mut self) -> Result<()>;
}

#[async_trait]
pub trait BrowserLauncher: Send + Sync {
    async fn launch(&self) -> Result<Box<dyn BrowserSession>>;
}

pub struct WebDriverLauncher {
    client: reqwest::Client,
    base_url: String,
}

impl WebDriverLauncher {
    pub fn new(base_url: &str, timeout_seconds: u64) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_seconds))
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl BrowserLauncher for WebDriverLauncher {
    async fn launch(&self) -> Result<Box<dyn BrowserSession>> {
        let capabilities = json!({
            "capabilities": {
                "alwaysMatch": {
                    "browserName": "chrome",
                    "goog:chromeOptions": {
                        "args": ["--headless=new", "--no-sandbox", "--disable-dev-shm-usage", "--disable-gpu"]
                    }
                }
            }
        });
        let body = call(
            self.client
                .post(format!("{}/session", self.base_url))
                .json(&capabilities),
        )
        .await
        .context("Failed to start a WebDriver session")?;

        let session_id = body
            .pointer("/value/sessionId")
            .and_then(Value::as_str)
            .ok_or_else(|| anyhow!("WebDriver did not return a session id"))?
            .to_string();
        tracing::debug!(%session_id, "browser session started");

        Ok(Box::new(WebDriverSession {
            client: self.client.clone(),
            session_url: format!("{}/session/{}", self.base_url, session_id),
            closed: false,
        }))
    }
}

/// 发送请求并解出WebDriver的JSON回复，协议错误转换为anyhow错误
async fn call(request: reqwest::RequestBuilder) -> Result<Value> {
    let response = request.send().await?;
    let status = response.status();
    let body: Value = response.json().await.unwrap_or(Value::Null);
    if !status.is_success() {
        let message = body
            .pointer("/value/message")
            .and_then(Value::as_str)
            .unwrap_or("unknown error");
        bail!("WebDriver HTTP {}: {}", status, message);
    }
    Ok(body)
}

pub struct WebDriverSession {
    client: reqwest::Client,
    session_url: String,
    closed: bool,
}

impl WebDriverSession {
    async fn element_ids(&self, css: &str) -> Result<Vec<String>> {
        let body = call(
            self.client
                .post(format!("{}/elements", self.session_url))
                .json(&json!({"using": "css selector", "value": css})),
        )
        .await?;
        Ok(body
            .get("value")
            .and_then(Value::as_array)
            .map(|elements| {
                elements
                    .iter()
                    .filter_map(|e| e.get(ELEMENT_KEY).and_then(Value::as_str))
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn element_value(&self, path: String) -> Result<Option<String>> {
        let body = call(self.client.get(path)).await?;
        Ok(body.get("value").and_then(Value::as_str).map(str::to_string))
    }
}

#[async_trait]
impl BrowserSession for WebDriverSession {
    async fn navigate(&mut self, url: &str) -> Result<()> {
        call(
            self.client
                .post(format!("{}/url", self.session_url))
                .json(&json!({ "url": url })),
        )
        .await
        .with_context(|| format!("Failed to open {}", url))?;
        Ok(())
    }

    async fn find_texts(&mut self, css: &str) -> Result<Vec<String>> {
        let mut texts = Vec::new();
        for id in self.element_ids(css).await? {
            let path = format!("{}/element/{}/text", self.session_url, id);
            if let Some(text) = self.element_value(path).await? {
                texts.push(text);
            }
        }
        Ok(texts)
    }

    async fn find_properties(&mut self, css: &str, property: &str) -> Result<Vec<String>> {
        let mut values = Vec::new();
        for id in self.element_ids(css).await? {
            let path = format!("{}/element/{}/property/{}", self.session_url, id, property);
            if let Some(value) = self.element_value(path).await? {
                values.push(value);
            }
        }
        Ok(values)
    }

    async fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        call(self.client.delete(&self.session_url)).await?;
        tracing::debug!(session = %self.session_url, "browser session closed");
        Ok(())
    }
}
