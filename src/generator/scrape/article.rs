//! 文章正文提取：先做结构化提取，失败时退回到通用的HTML转文本

use regex::Regex;
use std::sync::LazyLock;

static NOISE_BLOCKS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<(script|style|noscript|nav|header|footer|aside|form)\b[^>]*>.*?</(script|style|noscript|nav|header|footer|aside|form)>")
        .expect("static regex")
});
static ARTICLE_BLOCK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<article\b[^>]*>(.*?)</article>").expect("static regex"));
static PARAGRAPH: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<(p|h[1-4]|li)\b[^>]*>(.*?)</(p|h[1-4]|li)>").expect("static regex"));
static TITLE_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<title\b[^>]*>(.*?)</title>").expect("static regex"));
static META_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<meta\b[^>]*>").expect("static regex"));
static ATTRIBUTE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?is)([a-z:_-]+)\s*=\s*(?:"([^"]*)"|'([^']*)')"#).expect("static regex")
});
static TIME_TAG: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?is)<time\b[^>]*datetime\s*=\s*["']([^"']+)["']"#).expect("static regex")
});
static ANY_TAG: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?s)<[^>]*>").expect("static regex"));
static NUMERIC_ENTITY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"&#(?:[xX]([0-9a-fA-F]{1,6})|([0-9]{1,7}));").expect("static regex"));
static SPACES: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[ \t\r\n]+").expect("static regex"));

const TITLE_META: &[&str] = &["og:title", "twitter:title"];
const PUBLISHED_META: &[&str] = &[
    "article:published_time",
    "og:published_time",
    "date",
    "pubdate",
    "publishdate",
    "dc.date",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Article {
    pub title: Option<String>,
    pub published: Option<String>,
    pub body: String,
}

impl Article {
    /// 条目文本格式：来源、标题、发布时间、正文
    pub fn to_item_text(&self, url: &str) -> String {
        format!(
            "Source URL: {}\nTitle: {}\nPublished: {}\n\nBody:\n{}",
            url,
            self.title.as_deref().unwrap_or("N/A"),
            self.published.as_deref().unwrap_or("N/A"),
            self.body.trim()
        )
    }
}

fn decode_entities(text: &str) -> String {
    let numeric = NUMERIC_ENTITY.replace_all(text, |caps: &regex::Captures| {
        let code = match caps.get(1) {
            Some(hex) => u32::from_str_radix(hex.as_str(), 16).ok(),
            None => caps[2].parse::<u32>().ok(),
        };
        code.and_then(char::from_u32)
            .map(String::from)
            .unwrap_or_else(|| caps[0].to_string())
    });
    numeric
        .replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&rsquo;", "\u{2019}")
        .replace("&lsquo;", "\u{2018}")
        .replace("&ldquo;", "\u{201C}")
        .replace("&rdquo;", "\u{201D}")
        .replace("&mdash;", "\u{2014}")
        .replace("&ndash;", "\u{2013}")
        .replace("&hellip;", "\u{2026}")
        .replace("&amp;", "&")
}

fn inner_text(fragment: &str) -> String {
    let stripped = ANY_TAG.replace_all(fragment, " ");
    SPACES
        .replace_all(&decode_entities(&stripped), " ")
        .trim()
        .to_string()
}

/// 在所有 `<meta>` 中按name/property查找content
fn meta_content(html: &str, names: &[&str]) -> Option<String> {
    for tag in META_TAG.find_iter(html) {
        let mut key = None;
        let mut content = None;
        for cap in ATTRIBUTE.captures_iter(tag.as_str()) {
            let value = cap.get(2).or_else(|| cap.get(3)).map(|m| m.as_str());
            match cap[1].to_ascii_lowercase().as_str() {
                "name" | "property" | "itemprop" => key = value.map(str::to_ascii_lowercase),
                "content" => content = value,
                _ => {}
            }
        }
        if let (Some(key), Some(content)) = (key, content)
            && names.contains(&key.as_str())
            && !content.trim().is_empty()
        {
            return Some(decode_entities(content.trim()));
        }
    }
    None
}

/// 结构化提取。没有找到正文段落时返回 None
pub fn extract_article(html: &str) -> Option<Article> {
    let cleaned = NOISE_BLOCKS.replace_all(html, " ");

    let title = meta_content(&cleaned, TITLE_META).or_else(|| {
        TITLE_TAG
            .captures(&cleaned)
            .map(|c| inner_text(&c[1]))
            .filter(|t| !t.is_empty())
    });
    let published = meta_content(&cleaned, PUBLISHED_META)
        .or_else(|| TIME_TAG.captures(&cleaned).map(|c| c[1].trim().to_string()));

    let scope = ARTICLE_BLOCK
        .captures(&cleaned)
        .map(|c| c[1].to_string())
        .unwrap_or_else(|| cleaned.to_string());
    let paragraphs: Vec<String> = PARAGRAPH
        .captures_iter(&scope)
        .map(|c| inner_text(&c[2]))
        .filter(|p| !p.is_empty())
        .collect();

    if paragraphs.is_empty() {
        return None;
    }
    Some(Article {
        title,
        published,
        body: paragraphs.join("\n\n"),
    })
}

/// 通用的HTML转文本
pub fn fallback_article(html: &str) -> Option<Article> {
    let text = html2text::from_read(html.as_bytes(), 120).ok()?;
    let body = text.trim();
    if body.is_empty() {
        return None;
    }
    let title = TITLE_TAG
        .captures(html)
        .map(|c| inner_text(&c[1]))
        .filter(|t| !t.is_empty());
    Some(Article {
        title,
        published: None,
        body: body.to_string(),
    })
}

/// 分层提取：结构化提取结果过短时使用通用回退
pub fn extract_with_fallback(html: &str, min_chars: usize) -> Option<Article> {
    match extract_article(html) {
        Some(article) if article.body.chars().count() >= min_chars => Some(article),
        structured => fallback_article(html)
            .filter(|a| a.body.chars().count() >= min_chars)
            .or(structured),
    }
}
