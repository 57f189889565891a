use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// 来源的类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    /// 在站内做搜索的网站
    Website,
    /// 讨论社区（r/xxx）
    Discussion,
    /// 直接抓取的文章URL
    DirectUrl,
    /// 本地文档
    Document,
}

/// 来源是LLM建议的还是用户给出的
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceOrigin {
    Discovered,
    UserSupplied,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Source {
    pub kind: SourceKind,
    /// 域名/URL/社区名/路径
    pub identifier: String,
    pub origin: SourceOrigin,
}

impl Source {
    pub fn new(kind: SourceKind, identifier: impl Into<String>, origin: SourceOrigin) -> Self {
        Self {
            kind,
            identifier: identifier.into(),
            origin,
        }
    }

    /// 讨论社区的名字（去掉 `r/` 前缀与链接部分）
    pub fn community_name(&self) -> Option<&str> {
        if self.kind != SourceKind::Discussion {
            return None;
        }
        let id = self.identifier.trim_end_matches('/');
        let name = match id.find("/r/") {
            Some(idx) => &id[idx + 3..],
            None => id.strip_prefix("r/").unwrap_or(id),
        };
        name.split('/').next().filter(|n| !n.is_empty())
    }
}

/// 条目内容的类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemKind {
    Article,
    Discussion,
    Reference,
}

impl std::fmt::Display for ItemKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ItemKind::Article => write!(f, "article"),
            ItemKind::Discussion => write!(f, "discussion"),
            ItemKind::Reference => write!(f, "reference"),
        }
    }
}

/// 一份原始内容：网页、讨论串或本地文档
#[derive(Debug, Clone)]
pub struct Item {
    /// URL或文件路径
    pub source_id: String,
    pub kind: ItemKind,
    pub text: String,
    pub retrieved_at: DateTime<Local>,
}

impl Item {
    pub fn new(source_id: impl Into<String>, kind: ItemKind, text: impl Into<String>) -> Self {
        Self {
            source_id: source_id.into(),
            kind,
            text: text.into(),
            retrieved_at: Local::now(),
        }
    }
}

/// 本地参考文档
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReferenceDoc {
    pub path: PathBuf,
    pub text: String,
}

impl ReferenceDoc {
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| self.path.display().to_string())
    }

    pub fn into_item(self) -> Item {
        Item::new(self.path.display().to_string(), ItemKind::Reference, self.text)
    }
}

/// 评分解析结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScoreParse {
    Score(u8),
    ParseError(String),
}

/// 一个条目完整处理（摘要+评分）之后的记录，逐条写入归档
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SummaryRecord {
    /// 条目在本阶段的序号（从1开始）
    pub index: usize,
    pub source_id: String,
    pub kind: ItemKind,
    pub summary: Option<String>,
    pub score: Option<u8>,
    pub retained: bool,
    pub error: Option<String>,
}

impl SummaryRecord {
    pub fn failed(index: usize, item: &Item, error: impl Into<String>) -> Self {
        Self {
            index,
            source_id: item.source_id.clone(),
            kind: item.kind,
            summary: None,
            score: None,
            retained: false,
            error: Some(error.into()),
        }
    }
}

/// 保留下来、进入综合阶段的摘要
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Summary {
    pub source_id: String,
    pub kind: ItemKind,
    pub text: String,
    pub score: u8,
    /// 在评分阶段的原始顺序，用于稳定排序
    pub order: usize,
}

impl SummaryRecord {
    /// 只有保留下来的记录才会变成Summary
    pub fn to_summary(&self) -> Option<Summary> {
        match (self.retained, &self.summary, self.score) {
            (true, Some(text), Some(score)) => Some(Summary {
                source_id: self.source_id.clone(),
                kind: self.kind,
                text: text.clone(),
                score,
                order: self.index,
            }),
            _ => None,
        }
    }
}
