use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use super::ConfigError;

/// 搜索API选择
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum SearchApi {
    #[default]
    Google,
    Brave,
}

impl SearchApi {
    /// 主API失败时使用的另一家
    pub fn fallback(self) -> Self {
        match self {
            SearchApi::Google => SearchApi::Brave,
            SearchApi::Brave => SearchApi::Google,
        }
    }
}

impl std::fmt::Display for SearchApi {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SearchApi::Google => write!(f, "google"),
            SearchApi::Brave => write!(f, "brave"),
        }
    }
}

impl std::str::FromStr for SearchApi {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "google" => Ok(SearchApi::Google),
            "brave" => Ok(SearchApi::Brave),
            _ => Err(ConfigError::UnknownSearchApi(s.to_string())),
        }
    }
}

/// 一次报告生成请求。创建后除取消标记外不再变化
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRequest {
    pub topic: String,
    pub keywords: Vec<String>,
    pub guidance: Option<String>,
    pub search_api: SearchApi,
    pub model_key: Option<String>,
    pub from_date: Option<NaiveDate>,
    pub to_date: Option<NaiveDate>,

    /// 每个网站最多抓取的结果数
    pub max_web_results: usize,
    /// 每个关键词每次搜索请求的结果数，缺省等于 `max_web_results`
    pub per_keyword_results: Option<usize>,
    /// 每个讨论社区最多抓取的帖子数
    pub max_discussion_results: usize,
    /// 每个帖子最多抓取的评论数
    pub max_discussion_comments: usize,
    /// 整个Run的条目上限
    pub max_items: Option<usize>,
    pub score_threshold: u8,

    pub no_search: bool,
    pub combine_keywords: bool,
    pub summarize_reference_docs: bool,
    pub skip_refinement: bool,
    pub exclude_discussion_sources: bool,

    pub reference_docs: Vec<PathBuf>,
    pub reference_docs_folder: Option<PathBuf>,
    /// 每行一个URL的文件
    pub direct_articles: Option<PathBuf>,
    /// 直接给出的URL（与文件中的URL合并）
    pub direct_urls: Vec<String>,
}

impl Default for RunRequest {
    fn default() -> Self {
        Self {
            topic: String::new(),
            keywords: vec![],
            guidance: None,
            search_api: SearchApi::default(),
            model_key: None,
            from_date: None,
            to_date: None,
            max_web_results: 3,
            per_keyword_results: None,
            max_discussion_results: 5,
            max_discussion_comments: 5,
            max_items: None,
            score_threshold: 5,
            no_search: false,
            combine_keywords: false,
            summarize_reference_docs: false,
            skip_refinement: false,
            exclude_discussion_sources: false,
            reference_docs: vec![],
            reference_docs_folder: None,
            direct_articles: None,
            direct_urls: vec![],
        }
    }
}

impl RunRequest {
    pub fn new(topic: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            ..Default::default()
        }
    }

    /// 按逗号切分关键词，去掉空白项
    pub fn split_keywords(raw: &str) -> Vec<String> {
        raw.split(',')
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .map(str::to_string)
            .collect()
    }

    pub fn parse_date(field: &'static str, value: &str) -> Result<NaiveDate, ConfigError> {
        NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d").map_err(|_| {
            ConfigError::InvalidDate {
                field,
                value: value.to_string(),
            }
        })
    }

    /// 实际发出的搜索词：合并模式下是一个用空格拼接的查询
    pub fn search_queries(&self) -> Vec<String> {
        if self.combine_keywords && !self.keywords.is_empty() {
            vec![self.keywords.join(" ")]
        } else {
            self.keywords.clone()
        }
    }

    /// 单次搜索请求的结果数
    pub fn results_per_query(&self) -> usize {
        if self.combine_keywords {
            self.max_web_results
        } else {
            self.per_keyword_results.unwrap_or(self.max_web_results)
        }
    }

    pub fn has_offline_sources(&self) -> bool {
        self.direct_articles.is_some()
            || !self.direct_urls.is_empty()
            || !self.reference_docs.is_empty()
            || self.reference_docs_folder.is_some()
    }

    pub fn has_reference_docs(&self) -> bool {
        !self.reference_docs.is_empty() || self.reference_docs_folder.is_some()
    }

    /// 在任何阶段开始之前校验请求
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.topic.trim().is_empty() {
            return Err(ConfigError::MissingTopic);
        }
        if self.no_search {
            if !self.has_offline_sources() {
                return Err(ConfigError::NoSources);
            }
        } else if self.keywords.is_empty() {
            return Err(ConfigError::MissingKeywords);
        }

        if let (Some(from), Some(to)) = (self.from_date, self.to_date)
            && from > to
        {
            return Err(ConfigError::InvertedDateRange {
                from: from.to_string(),
                to: to.to_string(),
            });
        }

        if self.max_web_results == 0 {
            return Err(ConfigError::InvalidLimit("max-web-results"));
        }
        if self.per_keyword_results == Some(0) {
            return Err(ConfigError::InvalidLimit("per-keyword-results"));
        }
        if self.max_discussion_results == 0 {
            return Err(ConfigError::InvalidLimit("max-discussion-results"));
        }
        if self.max_discussion_comments == 0 {
            return Err(ConfigError::InvalidLimit("max-discussion-comments"));
        }
        if self.max_items == Some(0) {
            return Err(ConfigError::InvalidLimit("max-items"));
        }
        if self.score_threshold > 10 {
            return Err(ConfigError::InvalidThreshold(self.score_threshold));
        }
        Ok(())
    }
}
