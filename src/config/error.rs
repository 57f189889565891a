use std::path::PathBuf;

use thiserror::Error;

/// 配置类错误：一旦出现，Run不会启动
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("topic is required")]
    MissingTopic,

    #[error("keywords are required unless --no-search is set")]
    MissingKeywords,

    #[error(
        "--no-search requires at least one of --direct-articles, --reference-docs or --reference-docs-folder"
    )]
    NoSources,

    #[error("invalid {field} '{value}': expected YYYY-MM-DD")]
    InvalidDate { field: &'static str, value: String },

    #[error("from-date {from} is after to-date {to}")]
    InvertedDateRange { from: String, to: String },

    #[error("{0} must be a positive integer")]
    InvalidLimit(&'static str),

    #[error("score threshold {0} is outside 0..=10")]
    InvalidThreshold(u8),

    #[error("unknown search api '{0}' (expected google or brave)")]
    UnknownSearchApi(String),

    #[error("unknown provider '{0}'")]
    UnknownProvider(String),

    #[error("failed to read model store {path:?}: {source}")]
    ModelStoreRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse model store {path:?}: {message}")]
    ModelStoreParse { path: PathBuf, message: String },

    #[error("model key '{key}' not found in model store (available: {available})")]
    UnknownModel { key: String, available: String },

    #[error("model '{key}' is invalid: {reason}")]
    InvalidModel { key: String, reason: String },

    #[error("model '{key}' has no usable credential")]
    MissingCredential { key: String },
}
