use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;

use crate::config::{Config, ConfigError, RunRequest, SearchApi};

/// 默认配置文件名，位于当前工作目录
pub const DEFAULT_CONFIG_FILE: &str = "report-forge.toml";

/// report-forge - 由搜索、抓取与LLM驱动的调研报告生成工具
#[derive(Parser, Debug)]
#[command(name = "report-forge")]
#[command(
    about = "Generates an archived research report from a topic: discovers and scrapes sources, scores them for relevance with an LLM and synthesizes the survivors into a Markdown/PDF report."
)]
#[command(version)]
pub struct Args {
    /// 报告主题
    #[arg(short, long)]
    pub topic: String,

    /// 关键词，逗号分隔
    #[arg(short, long)]
    pub keywords: Option<String>,

    /// 额外的写作指导
    #[arg(short, long)]
    pub guidance: Option<String>,

    /// 搜索API (google, brave)
    #[arg(long, default_value = "google")]
    pub api: String,

    /// 模型配置仓库中的key
    #[arg(long)]
    pub llm_model: Option<String>,

    /// 搜索起始日期 (YYYY-MM-DD)
    #[arg(long)]
    pub from_date: Option<String>,

    /// 搜索结束日期 (YYYY-MM-DD)
    #[arg(long)]
    pub to_date: Option<String>,

    /// 每个网站最多抓取的结果数
    #[arg(long, default_value_t = 3)]
    pub max_web_results: usize,

    /// 每个关键词每次搜索请求的结果数
    #[arg(long)]
    pub per_keyword_results: Option<usize>,

    /// 每个讨论社区最多抓取的帖子数
    #[arg(long, default_value_t = 5)]
    pub max_discussion_results: usize,

    /// 每个帖子最多抓取的评论数
    #[arg(long, default_value_t = 5)]
    pub max_discussion_comments: usize,

    /// 整个Run的条目上限
    #[arg(long)]
    pub max_items: Option<usize>,

    /// 相关性阈值 (0-10)
    #[arg(long, default_value_t = 5)]
    pub score_threshold: u8,

    /// 不做来源发现与搜索，只使用直接给出的URL与本地文档
    #[arg(long)]
    pub no_search: bool,

    /// 把全部关键词合并成一个搜索词
    #[arg(long)]
    pub combine_keywords: bool,

    /// 参考文档也走摘要与评分
    #[arg(long)]
    pub summarize_reference_docs: bool,

    /// 跳过精炼，直接使用草稿
    #[arg(long)]
    pub skip_refinement: bool,

    /// 不使用讨论社区来源
    #[arg(long)]
    pub exclude_discussion_sources: bool,

    /// 参考文档路径或glob，逗号分隔
    #[arg(long)]
    pub reference_docs: Option<String>,

    /// 参考文档目录（只读取第一层）
    #[arg(long)]
    pub reference_docs_folder: Option<PathBuf>,

    /// 每行一个URL的文件
    #[arg(long)]
    pub direct_articles: Option<PathBuf>,

    /// 配置文件路径
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// 模型配置仓库路径
    #[arg(long)]
    pub models: Option<PathBuf>,

    /// 最终报告的输出目录
    #[arg(long)]
    pub output_dir: Option<PathBuf>,

    /// 归档根目录
    #[arg(long)]
    pub archive_dir: Option<PathBuf>,

    /// 不生成PDF
    #[arg(long)]
    pub no_pdf: bool,

    /// 是否禁用缓存
    #[arg(long)]
    pub no_cache: bool,

    /// 跳过启动前的模型连接检查
    #[arg(long)]
    pub skip_connection_check: bool,

    /// 是否启用详细日志
    #[arg(short, long)]
    pub verbose: bool,
}

fn split_paths(raw: Option<&str>) -> Vec<PathBuf> {
    raw.map(RunRequest::split_keywords)
        .unwrap_or_default()
        .into_iter()
        .map(PathBuf::from)
        .collect()
}

impl Args {
    /// 将CLI参数转换为配置：默认值 < 配置文件 < 命令行
    pub fn into_config(self) -> Result<Config> {
        let mut config = match &self.config {
            Some(path) => Config::from_file(path)?,
            None => {
                let default_path = std::env::current_dir()
                    .unwrap_or_else(|_| PathBuf::from("."))
                    .join(DEFAULT_CONFIG_FILE);
                if default_path.exists() {
                    Config::from_file(&default_path)?
                } else {
                    Config::default()
                }
            }
        };

        if let Some(models) = self.models {
            config.models_path = models;
        }
        if let Some(output_dir) = self.output_dir {
            config.archive.output_dir = output_dir;
        }
        if let Some(archive_dir) = self.archive_dir {
            config.archive.archive_dir = archive_dir;
        }
        if self.no_pdf {
            config.archive.render_pdf = false;
        }
        if self.no_cache {
            config.cache.enabled = false;
        }
        if self.skip_connection_check {
            config.check_connection = false;
        }
        config.verbose = config.verbose || self.verbose;

        Ok(config)
    }

    /// 构建Run请求。这里只做解析，完整校验由 `RunRequest::validate` 负责
    pub fn to_request(&self) -> Result<RunRequest, ConfigError> {
        let from_date = self
            .from_date
            .as_deref()
            .map(|d| RunRequest::parse_date("from-date", d))
            .transpose()?;
        let to_date = self
            .to_date
            .as_deref()
            .map(|d| RunRequest::parse_date("to-date", d))
            .transpose()?;

        Ok(RunRequest {
            topic: self.topic.trim().to_string(),
            keywords: self
                .keywords
                .as_deref()
                .map(RunRequest::split_keywords)
                .unwrap_or_default(),
            guidance: self.guidance.clone().filter(|g| !g.trim().is_empty()),
            search_api: self.api.parse::<SearchApi>()?,
            model_key: self.llm_model.clone(),
            from_date,
            to_date,
            max_web_results: self.max_web_results,
            per_keyword_results: self.per_keyword_results,
            max_discussion_results: self.max_discussion_results,
            max_discussion_comments: self.max_discussion_comments,
            max_items: self.max_items,
            score_threshold: self.score_threshold,
            no_search: self.no_search,
            combine_keywords: self.combine_keywords,
            summarize_reference_docs: self.summarize_reference_docs,
            skip_refinement: self.skip_refinement,
            exclude_discussion_sources: self.exclude_discussion_sources,
            reference_docs: split_paths(self.reference_docs.as_deref()),
            reference_docs_folder: self.reference_docs_folder.clone(),
            direct_articles: self.direct_articles.clone(),
            direct_urls: vec![],
        })
    }
}
