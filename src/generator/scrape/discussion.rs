//! 讨论社区（old.reddit 页面布局）的线程查找与内容拼接

use anyhow::{Context, Result};
use std::collections::HashSet;

use super::browser::BrowserSession;

pub const THREAD_LINK_SELECTOR: &str = "a.search-title, p.title a.title";
pub const TITLE_SELECTOR: &str = "p.title a.title";
pub const BODY_SELECTOR: &str = "div.entry div.expando div.md";
pub const COMMENT_SELECTOR: &str = "div.commentarea .comment .md p";

const REMOVED_MARKERS: &[&str] = &["[deleted]", "[removed]"];

/// 社区内搜索页面的URL
pub fn search_url(base_url: &str, community: &str, query: &str) -> Result<String> {
    let url = reqwest::Url::parse_with_params(
        &format!("{}/r/{}/search/", base_url.trim_end_matches('/'), community),
        &[
            ("q", query),
            ("restrict_sr", "1"),
            ("sort", "relevance"),
            ("t", "all"),
        ],
    )
    .with_context(|| format!("Invalid discussion base url: {}", base_url))?;
    Ok(url.into())
}

/// 帖子ID：`/comments/<id>/` 中的 `<id>`，小写
pub fn thread_id(link: &str) -> Option<String> {
    let lowered = link.to_ascii_lowercase();
    let (_, rest) = lowered.split_once("/comments/")?;
    let id = rest.split(['/', '?', '#']).next()?;
    (!id.is_empty()).then(|| id.to_string())
}

/// 只保留指向本社区帖子的链接，按帖子ID去重并保持页面顺序
pub fn filter_thread_links(links: &[String], community: &str, limit: usize) -> Vec<String> {
    let marker = format!("/r/{}/", community.to_ascii_lowercase());
    let mut seen = HashSet::new();
    let mut threads: Vec<String> = Vec::new();
    for link in links {
        if threads.len() >= limit {
            break;
        }
        if !link.to_ascii_lowercase().contains(&marker) {
            continue;
        }
        let Some(id) = thread_id(link) else {
            continue;
        };
        if seen.insert(id) {
            threads.push(link.split('#').next().unwrap_or(link).to_string());
        }
    }
    threads
}

/// 抓取到的一个帖子
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Thread {
    pub community: String,
    pub permalink: String,
    pub title: String,
    pub body: String,
    pub comments: Vec<String>,
}

impl Thread {
    pub fn to_item_text(&self) -> String {
        let mut text = format!(
            "Source: Reddit (r/{})\nPermalink: {}\nTitle: {}\n\nBody:\n{}",
            self.community,
            self.permalink,
            self.title,
            if self.body.trim().is_empty() {
                "N/A"
            } else {
                self.body.trim()
            }
        );
        if !self.comments.is_empty() {
            text.push_str(&format!(
                "\n\n--- Comments ({} scraped) ---\n{}",
                self.comments.len(),
                self.comments.join("\n\n---\n\n")
            ));
        }
        text
    }
}

/// 按页面显示顺序取前 `limit` 条评论，跳过已删除的内容
pub fn select_comments(raw: Vec<String>, limit: usize) -> Vec<String> {
    raw.into_iter()
        .map(|c| c.trim().to_string())
        .filter(|c| !c.is_empty() && !REMOVED_MARKERS.contains(&c.as_str()))
        .take(limit)
        .collect()
}

/// 打开帖子页面并读取标题、正文与评论
pub async fn read_thread(
    session: &mut dyn BrowserSession,
    community: &str,
    url: &str,
    max_comments: usize,
) -> Result<Thread> {
    session.navigate(url).await?;
    let title = session
        .find_texts(TITLE_SELECTOR)
        .await?
        .into_iter()
        .next()
        .unwrap_or_default();
    let body = session.find_texts(BODY_SELECTOR).await?.join("\n\n");
    let comments = select_comments(session.find_texts(COMMENT_SELECTOR).await?, max_comments);

    Ok(Thread {
        community: community.to_string(),
        permalink: url.to_string(),
        title: title.trim().to_string(),
        body,
        comments,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_search_url() {
        assert_eq!(
            search_url("https://old.reddit.com/", "cats", "sleep & naps").unwrap(),
            "https://old.reddit.com/r/cats/search/?q=sleep+%26+naps&restrict_sr=1&sort=relevance&t=all"
        );
    }

    #[test]
    fn test_filter_thread_links() {
        let links: Vec<String> = [
            "https://old.reddit.com/r/cats/comments/1/a/",
            "https://old.reddit.com/r/dogs/comments/2/b/",
            "https://old.reddit.com/r/cats/about/",
            "https://old.reddit.com/r/Cats/comments/1/a/#c",
            "https://old.reddit.com/r/cats/comments/3/c/",
            "https://old.reddit.com/r/cats/comments/4/d/",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();

        let threads = filter_thread_links(&links, "cats", 2);
        assert_eq!(
            threads,
            vec![
                "https://old.reddit.com/r/cats/comments/1/a/",
                "https://old.reddit.com/r/cats/comments/3/c/",
            ]
        );
    }

    #[test]
    fn test_same_thread_with_different_case_and_fragment_is_kept_once() {
        let links: Vec<String> = [
            "https://old.reddit.com/r/cats/comments/1/a/",
            "https://old.reddit.com/r/Cats/comments/1/a/#c",
            "https://old.reddit.com/r/cats/comments/1/A/?sort=top",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();

        assert_eq!(
            filter_thread_links(&links, "cats", 5),
            vec!["https://old.reddit.com/r/cats/comments/1/a/"]
        );
        assert_eq!(thread_id("https://x/r/c/comments/AbC/t/").as_deref(), Some("abc"));
        assert_eq!(thread_id("https://x/r/c/about/"), None);
    }

    #[test]
    fn test_comments_skip_removed_and_cap() {
        let raw = vec!["[deleted]".into(), " first ".into(), "".into(), "second".into(), "third".into()];
        assert_eq!(select_comments(raw, 2), vec!["first", "second"]);
    }

    #[test]
    fn test_thread_item_text() {
        let thread = Thread {
            community: "cats".into(),
            permalink: "https://old.reddit.com/r/cats/comments/1/a/".into(),
            title: "Sleepy".into(),
            body: "".into(),
            comments: vec!["a".into(), "b".into()],
        };
        let text = thread.to_item_text();
        assert!(text.starts_with("Source: Reddit (r/cats)\nPermalink: "));
        assert!(text.contains("Body:\nN/A"));
        assert!(text.ends_with("--- Comments (2 scraped) ---\na\n\n---\n\nb"));
    }
}
