//! 集成测试用的离线实现：模型、搜索、网页与浏览器都在内存中

#![allow(dead_code)]

use anyhow::{Result, bail};
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio::sync::{Notify, Semaphore};

use report_forge::config::{Config, LLMConfig, ModelStore, ResolvedModel, SearchApi};
use report_forge::controller::RunController;
use report_forge::controller::events::ProgressEvent;
use report_forge::generator::context::Services;
use report_forge::generator::retrieval::search::{SearchError, SearchProvider, SearchQuery, SearchRouter};
use report_forge::generator::scrape::browser::{BrowserLauncher, BrowserSession};
use report_forge::generator::scrape::fetcher::PageFetcher;
use report_forge::llm::client::{CompletionBackend, LLMClient, LlmError};

pub type Responder = dyn Fn(&str) -> Result<String, LlmError> + Send + Sync;

/// 按prompt内容作答的模型，并记录收到的每个prompt
pub struct ScriptedLlm {
    responder: Box<Responder>,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedLlm {
    pub fn new(responder: impl Fn(&str) -> Result<String, LlmError> + Send + Sync + 'static) -> Arc<Self> {
        Arc::new(Self {
            responder: Box::new(responder),
            prompts: Mutex::new(Vec::new()),
        })
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }

    pub fn prompts_containing(&self, needle: &str) -> Vec<String> {
        self.prompts()
            .into_iter()
            .filter(|p| p.contains(needle))
            .collect()
    }
}

#[async_trait]
impl CompletionBackend for ScriptedLlm {
    fn model_name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, prompt: &str) -> Result<String, LlmError> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        (self.responder)(prompt)
    }
}

/// 固定结果的搜索API
#[derive(Default)]
pub struct FakeSearch {
    results: HashMap<String, Vec<String>>,
    queries: Mutex<Vec<SearchQuery>>,
}

impl FakeSearch {
    pub fn with(mut self, query: &str, urls: &[&str]) -> Self {
        self.results
            .insert(query.to_string(), urls.iter().map(|u| u.to_string()).collect());
        self
    }

    pub fn queries(&self) -> Vec<SearchQuery> {
        self.queries.lock().unwrap().clone()
    }
}

#[async_trait]
impl SearchProvider for FakeSearch {
    fn name(&self) -> &str {
        "fake"
    }

    async fn search(&self, query: &SearchQuery) -> Result<Vec<String>, SearchError> {
        self.queries.lock().unwrap().push(query.clone());
        match self.results.get(&query.text) {
            Some(urls) => Ok(urls.clone()),
            None => Err(SearchError::Failed(format!("no results for {}", query.text))),
        }
    }
}

/// 内存中的网页；可以用闸门把抓取卡住
#[derive(Default)]
pub struct FakeFetcher {
    pages: HashMap<String, String>,
    fetched: Mutex<Vec<String>>,
    probed: Mutex<Vec<String>>,
    gate: Option<Arc<Semaphore>>,
    pub entered: Arc<Notify>,
}

impl FakeFetcher {
    pub fn with_page(mut self, url: &str, html: String) -> Self {
        self.pages.insert(url.to_string(), html);
        self
    }

    pub fn gated(mut self, gate: Arc<Semaphore>) -> Self {
        self.gate = Some(gate);
        self
    }

    pub fn fetched(&self) -> Vec<String> {
        self.fetched.lock().unwrap().clone()
    }

    pub fn probed(&self) -> Vec<String> {
        self.probed.lock().unwrap().clone()
    }
}

#[async_trait]
impl PageFetcher for FakeFetcher {
    async fn fetch(&self, url: &str) -> Result<String> {
        self.fetched.lock().unwrap().push(url.to_string());
        self.entered.notify_one();
        if let Some(gate) = &self.gate {
            gate.acquire().await?.forget();
        }
        match self.pages.get(url) {
            Some(html) => Ok(html.clone()),
            None => bail!("404 for {}", url),
        }
    }

    async fn probe(&self, url: &str) -> Result<u16> {
        self.probed.lock().unwrap().push(url.to_string());
        Ok(200)
    }
}

/// 一个帖子页面的内容
#[derive(Clone)]
pub struct FakeThread {
    pub title: String,
    pub body: String,
    pub comments: Vec<String>,
}

/// 按URL返回内容的浏览器
#[derive(Default)]
pub struct FakeBrowser {
    /// 社区搜索页面返回的帖子链接
    search_links: Vec<String>,
    threads: HashMap<String, FakeThread>,
    launches: Mutex<usize>,
    closes: Arc<Mutex<usize>>,
}

impl FakeBrowser {
    pub fn with_thread(mut self, url: &str, thread: FakeThread) -> Self {
        self.search_links.push(url.to_string());
        self.threads.insert(url.to_string(), thread);
        self
    }

    pub fn launches(&self) -> usize {
        *self.launches.lock().unwrap()
    }

    pub fn closes(&self) -> usize {
        *self.closes.lock().unwrap()
    }
}

struct FakeSession {
    search_links: Vec<String>,
    threads: HashMap<String, FakeThread>,
    current: String,
    closes: Arc<Mutex<usize>>,
}

#[async_trait]
impl BrowserSession for FakeSession {
    async fn navigate(&mut self, url: &str) -> Result<()> {
        self.current = url.to_string();
        Ok(())
    }

    async fn find_texts(&mut self, css: &str) -> Result<Vec<String>> {
        let Some(thread) = self.threads.get(&self.current) else {
            return Ok(vec![]);
        };
        Ok(match css {
            c if c.contains("p.title") => vec![thread.title.clone()],
            c if c.contains("expando") => vec![thread.body.clone()],
            c if c.contains("commentarea") => thread.comments.clone(),
            _ => vec![],
        })
    }

    async fn find_properties(&mut self, _css: &str, _property: &str) -> Result<Vec<String>> {
        if self.current.contains("/search/") {
            Ok(self.search_links.clone())
        } else {
            Ok(vec![])
        }
    }

    async fn close(&mut self) -> Result<()> {
        *self.closes.lock().unwrap() += 1;
        Ok(())
    }
}

#[async_trait]
impl BrowserLauncher for FakeBrowser {
    async fn launch(&self) -> Result<Box<dyn BrowserSession>> {
        *self.launches.lock().unwrap() += 1;
        Ok(Box::new(FakeSession {
            search_links: self.search_links.clone(),
            threads: self.threads.clone(),
            current: String::new(),
            closes: self.closes.clone(),
        }))
    }
}

/// 一个足够长、可以被正文提取识别的文章页面
pub fn article_html(title: &str, body: &str) -> String {
    format!(
        "<html><head><title>{}</title></head><body><nav>Home | About</nav>\
         <article><p>{}</p><p>{}</p></article></body></html>",
        title,
        body,
        "Researchers continue to study this topic in depth and publish new findings every year."
    )
}

pub fn model_store(input_token_limit: usize) -> ModelStore {
    ModelStore::from_toml_str(&format!(
        "[default_model]\napi_endpoint = \"https://llm.example.com/v1\"\napi_key = \"sk-test\"\nmodel = \"scripted\"\ninput_token_limit = {}\n",
        input_token_limit
    ))
    .unwrap()
}

pub fn test_config(root: &Path) -> Config {
    let mut config = Config::default();
    config.archive.archive_dir = root.join("archive");
    config.archive.output_dir = root.join("outputs");
    config.archive.render_pdf = false;
    config.cache.enabled = false;
    config.cache.cache_dir = root.join("cache");
    config.check_connection = false;
    config.llm.retry_delay_ms = 1;
    config.llm.max_retry_delay_ms = 2;
    config.llm.parse_retry_attempts = 2;
    config.llm.parse_retry_delay_ms = 1;
    config
}

pub struct Harness {
    pub llm: Arc<ScriptedLlm>,
    pub search: Arc<FakeSearch>,
    pub fetcher: Arc<FakeFetcher>,
    pub browser: Arc<FakeBrowser>,
    pub controller: RunController,
}

impl Harness {
    pub fn new(
        root: &Path,
        llm: Arc<ScriptedLlm>,
        search: FakeSearch,
        fetcher: FakeFetcher,
        browser: FakeBrowser,
        input_token_limit: usize,
    ) -> Self {
        Self::with_config(test_config(root), llm, search, fetcher, browser, input_token_limit)
    }

    pub fn with_config(
        config: Config,
        llm: Arc<ScriptedLlm>,
        search: FakeSearch,
        fetcher: FakeFetcher,
        browser: FakeBrowser,
        input_token_limit: usize,
    ) -> Self {
        let search = Arc::new(search);
        let fetcher = Arc::new(fetcher);
        let browser = Arc::new(browser);
        let services = Services {
            search: Arc::new(SearchRouter::new().with_provider(SearchApi::Google, search.clone())),
            fetcher: fetcher.clone(),
            browser: browser.clone(),
        };

        let backend = llm.clone();
        let controller = RunController::new(config, model_store(input_token_limit), services)
            .with_llm_factory(Arc::new(move |_model: &ResolvedModel, cfg: &LLMConfig| {
                Ok(LLMClient::with_backend(backend.clone(), cfg.clone()))
            }));

        Self {
            llm,
            search,
            fetcher,
            browser,
            controller,
        }
    }
}

/// 读取全部事件直到流结束
pub async fn drain(mut rx: tokio::sync::mpsc::Receiver<ProgressEvent>) -> Vec<ProgressEvent> {
    let mut events = Vec::new();
    while let Some(event) = rx.recv().await {
        events.push(event);
    }
    events
}

/// 唯一的归档目录
pub fn archive_dir(root: &Path) -> PathBuf {
    let mut dirs: Vec<PathBuf> = std::fs::read_dir(root.join("archive"))
        .unwrap()
        .map(|e| e.unwrap().path())
        .collect();
    assert_eq!(dirs.len(), 1, "expected exactly one archive directory");
    dirs.remove(0)
}

pub fn read_manifest(dir: &Path) -> serde_json::Value {
    serde_json::from_str(&std::fs::read_to_string(dir.join("run.json")).unwrap()).unwrap()
}

/// 找出prompt中出现的第一个候选URL
pub fn url_in<'a>(prompt: &str, urls: &[&'a str]) -> Option<&'a str> {
    urls.iter().copied().find(|u| prompt.contains(u))
}
