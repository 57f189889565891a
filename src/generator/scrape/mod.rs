use anyhow::{Result, anyhow};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{Mutex, MutexGuard};

use crate::generator::context::{GeneratorContext, RunCancelled, Services};
use crate::generator::types::{Item, ItemKind};
use crate::utils::threads::do_parallel_with_limit;

pub mod article;
pub mod browser;
pub mod discussion;
pub mod fetcher;

use browser::{BrowserLauncher, BrowserSession};
use fetcher::PageFetcher;

/// Retriever给出的一个待抓取目标
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScrapeTarget {
    pub kind: ItemKind,
    pub url: String,
    /// 讨论帖所属社区
    pub community: Option<String>,
}

impl ScrapeTarget {
    pub fn article(url: impl Into<String>) -> Self {
        Self {
            kind: ItemKind::Article,
            url: url.into(),
            community: None,
        }
    }

    pub fn thread(community: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            kind: ItemKind::Discussion,
            url: url.into(),
            community: Some(community.into()),
        }
    }
}

type SessionSlot = Option<Box<dyn BrowserSession>>;

/// 抓取器。浏览器会话在首次需要时启动，由本结构独占，Run结束时必须调用 `shutdown`
pub struct Scraper {
    fetcher: Arc<dyn PageFetcher>,
    launcher: Arc<dyn BrowserLauncher>,
    session: Mutex<SessionSlot>,
    launch_failed: AtomicBool,
}

impl Scraper {
    pub fn new(services: &Services) -> Self {
        Self {
            fetcher: services.fetcher.clone(),
            launcher: services.browser.clone(),
            session: Mutex::new(None),
            launch_failed: AtomicBool::new(false),
        }
    }

    /// 取得（必要时启动）浏览器会话
    async fn session(&self) -> Result<MutexGuard<'_, SessionSlot>> {
        let mut guard = self.session.lock().await;
        if guard.is_none() {
            if self.launch_failed.load(Ordering::SeqCst) {
                return Err(anyhow!("browser session is unavailable"));
            }
            match self.launcher.launch().await {
                Ok(session) => *guard = Some(session),
                Err(e) => {
                    self.launch_failed.store(true, Ordering::SeqCst);
                    return Err(e.context("Failed to launch browser session"));
                }
            }
        }
        Ok(guard)
    }

    /// 在社区内搜索帖子链接，最多返回 `limit` 个
    pub async fn find_threads(
        &self,
        context: &GeneratorContext,
        community: &str,
        query: &str,
        limit: usize,
    ) -> Result<Vec<String>> {
        let url = discussion::search_url(&context.config.scraper.discussion_base_url, community, query)?;
        let mut guard = self.session().await?;
        let session = guard
            .as_mut()
            .ok_or_else(|| anyhow!("browser session is unavailable"))?;
        session.navigate(&url).await?;
        let links = session
            .find_properties(discussion::THREAD_LINK_SELECTOR, "href")
            .await?;
        Ok(discussion::filter_thread_links(&links, community, limit))
    }

    async fn scrape_article(&self, context: &GeneratorContext, url: &str) -> Option<Item> {
        let min_chars = context.config.scraper.min_article_chars;
        let html = match self.fetcher.fetch(url).await {
            Ok(html) => html,
            Err(e) => {
                context.warn(format!("抓取失败，跳过 {}: {}", url, e)).await;
                return None;
            }
        };

        match article::extract_with_fallback(&html, min_chars) {
            Some(article) if article.body.chars().count() >= min_chars => {
                context.log(format!("   📄 已抓取文章: {}", url)).await;
                Some(Item::new(url, ItemKind::Article, article.to_item_text(url)))
            }
            _ => {
                context
                    .warn(format!("页面正文过短或无法提取，跳过 {}", url))
                    .await;
                None
            }
        }
    }

    async fn scrape_thread(
        &self,
        context: &GeneratorContext,
        community: &str,
        url: &str,
    ) -> Option<Item> {
        let max_comments = context.request.max_discussion_comments;
        let result = async {
            let mut guard = self.session().await?;
            let session = guard
                .as_mut()
                .ok_or_else(|| anyhow!("browser session is unavailable"))?;
            discussion::read_thread(&mut **session, community, url, max_comments).await
        }
        .await;

        match result {
            Ok(thread) => {
                let text = thread.to_item_text();
                if text.chars().count() < context.config.scraper.min_discussion_chars {
                    context.warn(format!("帖子内容过短，跳过 {}", url)).await;
                    return None;
                }
                context
                    .log(format!(
                        "   💬 已抓取帖子: {} ({} 条评论)",
                        url,
                        thread.comments.len()
                    ))
                    .await;
                Some(Item::new(url, ItemKind::Discussion, text))
            }
            Err(e) => {
                context.warn(format!("帖子抓取失败，跳过 {}: {}", url, e)).await;
                None
            }
        }
    }

    /// 抓取所有目标。文章并发抓取，帖子在唯一的浏览器会话上依次抓取
    ///
    /// 每个目标开始前检查取消标记；已发出的请求允许自然完成
    pub async fn execute(
        &self,
        context: &GeneratorContext,
        targets: &[ScrapeTarget],
    ) -> Result<Vec<Item>> {
        context.ensure_active()?;

        let article_futures: Vec<_> = targets
            .iter()
            .enumerate()
            .filter(|(_, t)| t.kind == ItemKind::Article)
            .map(|(index, target)| {
                Box::pin(async move {
                    if context.is_cancelled() {
                        return (index, None);
                    }
                    (index, self.scrape_article(context, &target.url).await)
                })
            })
            .collect();

        let mut scraped =
            do_parallel_with_limit(article_futures, context.config.scraper.max_parallels).await;

        for (index, target) in targets.iter().enumerate() {
            if target.kind != ItemKind::Discussion {
                continue;
            }
            if context.is_cancelled() {
                break;
            }
            let community = target.community.as_deref().unwrap_or_default();
            scraped.push((index, self.scrape_thread(context, community, &target.url).await));
        }

        if context.is_cancelled() {
            return Err(RunCancelled.into());
        }

        scraped.sort_by_key(|(index, _)| *index);
        Ok(scraped.into_iter().filter_map(|(_, item)| item).collect())
    }

    /// 关闭浏览器会话（若已启动）。可重复调用
    pub async fn shutdown(&self) {
        let mut guard = self.session.lock().await;
        if let Some(mut session) = guard.take()
            && let Err(e) = session.close().await
        {
            tracing::warn!(error = %e, "failed to close browser session");
        }
    }
}
