use anyhow::{Context, Result};
use std::collections::HashSet;

use crate::config::RunRequest;
use crate::generator::context::GeneratorContext;
use crate::generator::discovery::site_domain;
use crate::generator::scrape::{ScrapeTarget, Scraper, discussion};
use crate::generator::types::{Source, SourceKind};

pub mod search;

use search::SearchQuery;

/// 用于去重的URL形式：去掉fragment与末尾斜杠，主机名小写
pub fn normalize_url(url: &str) -> String {
    let trimmed = url.trim();
    match reqwest::Url::parse(trimmed) {
        Ok(mut parsed) => {
            parsed.set_fragment(None);
            parsed.as_str().trim_end_matches('/').to_string()
        }
        Err(_) => trimmed.trim_end_matches('/').to_string(),
    }
}

/// 直接给出的URL：命令行参数在前，文件中以 http(s) 开头的行在后
pub async fn load_direct_urls(request: &RunRequest) -> Result<Vec<String>> {
    let mut urls = request.direct_urls.clone();
    if let Some(path) = &request.direct_articles {
        let content = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read direct articles file {}", path.display()))?;
        urls.extend(
            content
                .lines()
                .map(str::trim)
                .filter(|l| l.starts_with("http://") || l.starts_with("https://"))
                .map(str::to_string),
        );
    }
    Ok(urls)
}

/// 全局去重集合：同一个URL在一次Run中只会被抓取一次
#[derive(Default)]
struct SeenUrls(HashSet<String>);

impl SeenUrls {
    /// 帖子按ID去重，其余URL按规范化形式去重
    fn key(url: &str) -> String {
        match discussion::thread_id(url) {
            Some(id) => format!("thread:{}", id),
            None => normalize_url(url),
        }
    }

    fn contains(&self, url: &str) -> bool {
        self.0.contains(&Self::key(url))
    }

    fn insert(&mut self, url: &str) -> bool {
        self.0.insert(Self::key(url))
    }
}

/// 检索器：把来源解析为有限数量、互不重复的抓取目标
#[derive(Default)]
pub struct Retriever;

impl Retriever {
    pub async fn execute(
        &self,
        context: &GeneratorContext,
        sources: &[Source],
        scraper: &Scraper,
    ) -> Result<Vec<ScrapeTarget>> {
        context.ensure_active()?;
        let request = &context.request;
        let mut seen = SeenUrls::default();
        let mut targets = Vec::new();

        // 直接URL优先，不经过搜索
        let direct = match load_direct_urls(request).await {
            Ok(urls) => urls,
            Err(e) if request.no_search => return Err(e),
            Err(e) => {
                context.warn(format!("{:#}", e)).await;
                vec![]
            }
        };
        for url in direct {
            if seen.insert(&url) {
                targets.push(ScrapeTarget::article(url));
            }
        }
        if !targets.is_empty() {
            context.log(format!("🔗 直接抓取 {} 个URL", targets.len())).await;
        }

        let websites: Vec<&Source> = sources.iter().filter(|s| s.kind == SourceKind::Website).collect();
        if !websites.is_empty() && !context.services.search.is_configured() {
            context.warn("未配置任何搜索API，跳过网站搜索").await;
        } else {
            for source in websites {
                let urls = self.search_website(context, source, &mut seen).await?;
                targets.extend(urls.into_iter().map(ScrapeTarget::article));
            }
        }

        for source in sources.iter().filter(|s| s.kind == SourceKind::Discussion) {
            let Some(community) = source.community_name() else {
                context.warn(format!("无法识别的社区: {}", source.identifier)).await;
                continue;
            };
            let threads = self
                .search_community(context, scraper, community, &mut seen)
                .await?;
            targets.extend(threads.into_iter().map(|url| ScrapeTarget::thread(community, url)));
        }

        if let Some(max_items) = request.max_items
            && targets.len() > max_items
        {
            context
                .log(format!("✂️ 条目数超过上限，保留前 {} 个", max_items))
                .await;
            targets.truncate(max_items);
        }

        context.log(format!("✓ 共得到 {} 个待抓取目标", targets.len())).await;
        Ok(targets)
    }

    /// 对一个网站按关键词逐个搜索，合并去重后截断到 max_web_results（保持API返回顺序）
    async fn search_website(
        &self,
        context: &GeneratorContext,
        source: &Source,
        seen: &mut SeenUrls,
    ) -> Result<Vec<String>> {
        let request = &context.request;
        let Some(domain) = site_domain(&source.identifier) else {
            context.warn(format!("无法识别的网站: {}", source.identifier)).await;
            return Ok(vec![]);
        };

        context.log(format!("🔍 搜索 {}...", domain)).await;
        let mut domain_urls: Vec<String> = Vec::new();
        let mut domain_keys: HashSet<String> = HashSet::new();

        for keyword in request.search_queries() {
            context.ensure_active()?;
            let query = SearchQuery {
                text: format!("site:{} {}", domain, keyword),
                num_results: request.results_per_query(),
                from_date: request.from_date,
                to_date: request.to_date,
            };
            match context.services.search.search(request.search_api, &query).await {
                Ok(urls) => {
                    for url in urls {
                        let key = normalize_url(&url);
                        if !seen.contains(&url) && domain_keys.insert(key) {
                            domain_urls.push(url);
                        }
                    }
                }
                Err(e) => {
                    context.warn(format!("搜索失败 ({}): {}", query.text, e)).await;
                }
            }
        }

        domain_urls.truncate(request.max_web_results);
        for url in &domain_urls {
            seen.insert(url);
        }
        context
            .log(format!("   {} 个结果来自 {}", domain_urls.len(), domain))
            .await;
        Ok(domain_urls)
    }

    /// 在讨论社区内按关键词查找帖子，最多 max_discussion_results 个
    async fn search_community(
        &self,
        context: &GeneratorContext,
        scraper: &Scraper,
        community: &str,
        seen: &mut SeenUrls,
    ) -> Result<Vec<String>> {
        let limit = context.request.max_discussion_results;
        context.log(format!("💬 搜索社区 r/{}...", community)).await;

        let mut threads: Vec<String> = Vec::new();
        for keyword in context.request.search_queries() {
            if threads.len() >= limit {
                break;
            }
            context.ensure_active()?;
            match scraper.find_threads(context, community, &keyword, limit).await {
                Ok(links) => {
                    for link in links {
                        if threads.len() >= limit {
                            break;
                        }
                        if seen.insert(&link) {
                            threads.push(link);
                        }
                    }
                }
                Err(e) => {
                    context
                        .warn(format!("社区搜索失败 r/{} ({}): {:#}", community, keyword, e))
                        .await;
                }
            }
        }

        context
            .log(format!("   {} 个帖子来自 r/{}", threads.len(), community))
            .await;
        Ok(threads)
    }
}
