//! LLM回复与文件名相关的文本处理

use regex::Regex;
use std::sync::LazyLock;

static THINK_BLOCK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<think>.*?</think>").expect("static regex"));

static NON_WORD: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\W+").expect("static regex"));

static UNSAFE_FILE_CHARS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"[\\/*?:"<>|\s]+"#).expect("static regex"));

/// 标签解析结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TagParse {
    /// 找到了完整的标签对
    Found(String),
    /// 没有找到标签，附带清理后的完整回复
    Missing(String),
}

impl TagParse {
    pub fn found(self) -> Option<String> {
        match self {
            TagParse::Found(content) => Some(content),
            TagParse::Missing(_) => None,
        }
    }
}

/// 反复移除 `<think>...</think>`，直到文本不再变化
pub fn clean_thinking_tags(text: &str) -> String {
    let mut current = text.to_string();
    loop {
        let next = THINK_BLOCK.replace_all(&current, "").into_owned();
        if next == current {
            return next.trim().to_string();
        }
        current = next;
    }
}

/// 取最后一个开标签与其后第一个闭标签之间的内容（大小写不敏感）
pub fn parse_tool_response(response: &str, tag: &str) -> TagParse {
    let cleaned = clean_thinking_tags(response);
    let open = format!("<{}>", tag.to_lowercase());
    let close = format!("</{}>", tag.to_lowercase());
    // 只做ASCII小写，保证字节下标与原文一致
    let lowered = cleaned.to_ascii_lowercase();

    let Some(open_at) = lowered.rfind(&open) else {
        return TagParse::Missing(cleaned);
    };
    let start = open_at + open.len();
    match lowered[start..].find(&close) {
        Some(offset) => TagParse::Found(cleaned[start..start + offset].trim().to_string()),
        None => TagParse::Missing(cleaned),
    }
}

/// 用于目录名的主题缩写：非单词字符合并为 `_`，最多50个字符
pub fn topic_slug(topic: &str) -> String {
    NON_WORD
        .replace_all(topic, "_")
        .chars()
        .take(50)
        .collect()
}

/// 把任意来源标识变成安全的文件名片段
pub fn file_component(raw: &str, max_chars: usize) -> String {
    let replaced = UNSAFE_FILE_CHARS.replace_all(raw, "_");
    let trimmed = replaced.trim_matches('_');
    let component: String = trimmed.chars().take(max_chars).collect();
    if component.is_empty() {
        "item".to_string()
    } else {
        component
    }
}

/// 按字符数截断（不会切断UTF-8字符）
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}
