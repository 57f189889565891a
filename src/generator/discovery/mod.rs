use anyhow::Result;
use regex::Regex;
use std::sync::LazyLock;

use crate::generator::context::GeneratorContext;
use crate::generator::types::{Source, SourceKind, SourceOrigin};

static LIST_MARKER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*(?:[-*•]+|\d+[.)])\s*").expect("static regex"));
static TRAILING_NOTE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s*[(（\[].*$").expect("static regex"));
static COMMUNITY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^/?r/([A-Za-z0-9_]+)/?$").expect("static regex"));
static BARE_DOMAIN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:www\.)?[A-Za-z0-9-]+(?:\.[A-Za-z0-9-]+)+(?:/\S*)?$").expect("static regex")
});

const TOOL_NAME: &str = "discover_sources";
const TAG: &str = "toolWebsites";

/// 把模型列出的一行解析为来源；无法识别的行返回 None
pub fn parse_source_line(line: &str) -> Option<Source> {
    let line = LIST_MARKER.replace(line.trim(), "");
    let line = TRAILING_NOTE.replace(&line, "");
    let entry = line.trim().trim_end_matches([',', ';']).trim();
    if entry.is_empty() {
        return None;
    }

    if let Some(caps) = COMMUNITY.captures(entry) {
        return Some(Source::new(
            SourceKind::Discussion,
            format!("r/{}", &caps[1]),
            SourceOrigin::Discovered,
        ));
    }

    let url = if entry.starts_with("http://") || entry.starts_with("https://") {
        entry.to_string()
    } else if BARE_DOMAIN.is_match(entry) {
        format!("https://{}", entry)
    } else {
        return None;
    };

    let kind = if url.to_ascii_lowercase().contains("reddit.com/r/") {
        SourceKind::Discussion
    } else {
        SourceKind::Website
    };
    Some(Source::new(kind, url, SourceOrigin::Discovered))
}

/// 解析 `<toolWebsites>` 中的全部来源，去重并保持顺序
pub fn parse_sources(block: &str) -> Vec<Source> {
    let mut sources: Vec<Source> = Vec::new();
    for source in block.lines().filter_map(parse_source_line) {
        if !sources.iter().any(|s| s.identifier == source.identifier) {
            sources.push(source);
        }
    }
    sources
}

/// 是否为讨论社区（用于 exclude-discussion-sources）
pub fn is_discussion_source(source: &Source) -> bool {
    source.kind == SourceKind::Discussion
        || source.identifier.starts_with("r/")
        || source.identifier.to_ascii_lowercase().contains("reddit.com/r/")
}

/// 网站根地址，用于可达性检查
pub fn base_url(url: &str) -> Option<String> {
    let parsed = reqwest::Url::parse(url).ok()?;
    let host = parsed.host_str()?;
    Some(format!("{}://{}/", parsed.scheme(), host))
}

/// 网站的域名（用于 `site:` 搜索）
pub fn site_domain(url: &str) -> Option<String> {
    let parsed = reqwest::Url::parse(url).ok()?;
    parsed
        .host_str()
        .map(|h| h.trim_start_matches("www.").to_ascii_lowercase())
}

fn build_prompt(context: &GeneratorContext) -> String {
    let request = &context.request;
    let mut prompt = format!(
        "You are a research assistant. Suggest the most authoritative and relevant online sources for researching the topic below.\n\n\
         Topic: {}\nKeywords: {}\n",
        request.topic,
        request.keywords.join(", ")
    );
    if let Some(guidance) = request.guidance.as_deref().filter(|g| !g.trim().is_empty()) {
        prompt.push_str(&format!("Guidance: {}\n", guidance));
    }
    prompt.push_str(
        "\nList up to 10 websites (full URLs) with high-quality articles on this topic",
    );
    if request.exclude_discussion_sources {
        prompt.push_str(". Do not include discussion forums or subreddits.");
    } else {
        prompt.push_str(", plus up to 3 relevant subreddits written as r/<name>.");
    }
    prompt.push_str(
        "\nPut one source per line, with no commentary, inside <toolWebsites></toolWebsites> tags.\n\
         Example:\n<toolWebsites>\nhttps://www.example.com\nr/example\n</toolWebsites>",
    );
    prompt
}

/// 来源发现：让模型提出候选网站与讨论社区
#[derive(Default)]
pub struct SourceDiscoverer;

impl SourceDiscoverer {
    pub async fn execute(&self, context: &GeneratorContext) -> Result<Vec<Source>> {
        context.ensure_active()?;
        context.log("🔭 正在让模型推荐信息来源...").await;

        let block = match context
            .ask_tagged(TOOL_NAME, &build_prompt(context), TAG, false)
            .await
        {
            Ok(Some(block)) => block,
            Ok(None) => {
                context.warn("模型没有给出可解析的来源列表").await;
                return Ok(vec![]);
            }
            Err(e) => {
                context.warn(format!("来源发现失败: {}", e)).await;
                return Ok(vec![]);
            }
        };

        let mut sources = parse_sources(&block);
        if context.request.exclude_discussion_sources {
            sources.retain(|s| !is_discussion_source(s));
        }

        let mut accepted = Vec::new();
        for source in sources {
            context.ensure_active()?;
            if source.kind == SourceKind::Discussion || !context.config.scraper.validate_sources {
                context.log(format!("   ✓ {}", source.identifier)).await;
                accepted.push(source);
                continue;
            }
            let Some(base) = base_url(&source.identifier) else {
                continue;
            };
            match context.services.fetcher.probe(&base).await {
                Ok(status) if status < 400 => {
                    context.log(format!("   ✓ {}", source.identifier)).await;
                    accepted.push(source);
                }
                Ok(status) => {
                    context
                        .warn(format!("来源不可访问 (HTTP {})，已忽略: {}", status, source.identifier))
                        .await;
                }
                Err(e) => {
                    context
                        .warn(format!("来源不可访问，已忽略: {} ({})", source.identifier, e))
                        .await;
                }
            }
        }

        context.log(format!("✓ 发现 {} 个可用来源", accepted.len())).await;
        Ok(accepted)
    }
}
