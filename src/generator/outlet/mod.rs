use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::cache::CacheStats;
use crate::generator::types::SummaryRecord;
use crate::generator::workflow::state::RunState;
use crate::utils::text::{file_component, topic_slug};

pub mod pdf;

pub use pdf::PdfRenderer;

pub const RUN_LOG: &str = "run.log";
pub const SUMMARIES_LOG: &str = "summaries.jsonl";
pub const DRAFT_FILE: &str = "report_draft.md";
pub const REPORT_FILE: &str = "report.md";
pub const REPORT_HTML: &str = "report.html";
pub const REPORT_PDF: &str = "report.pdf";
pub const MANIFEST_FILE: &str = "run.json";

/// 一次Run的归档目录。Run开始时创建，之后只追加
pub struct Archive {
    dir: PathBuf,
    stem: String,
    prompt_seq: AtomicUsize,
    /// 串行化对追加型文件的写入，保证单条记录不会交错
    append_lock: Mutex<()>,
}

/// 数量统计，写入 run.json
#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq, Eq)]
pub struct RunCounts {
    pub sources: usize,
    pub items: usize,
    pub documents: usize,
    pub summarized: usize,
    pub retained: usize,
    pub dropped: usize,
}

/// run.json 的内容
#[derive(Debug, Serialize)]
pub struct RunManifest {
    pub run_id: Uuid,
    pub topic: String,
    pub model_key: String,
    pub started_at: String,
    pub finished_at: String,
    pub outcome: RunState,
    pub message: Option<String>,
    pub total_seconds: f64,
    pub timings: BTreeMap<String, f64>,
    pub counts: RunCounts,
    /// 保留下来的摘要来源（未完成的Run也会记录）
    pub retained_sources: Vec<String>,
    pub files: Vec<PathBuf>,
    pub cache: CacheStats,
}

impl Archive {
    /// 创建 `<root>/<YYYYmmdd_HHMMSS>_<slug>` 目录
    ///
    /// 目录已存在时依次尝试 `_2`、`_3`... 后缀，已有的归档永远不会被复用
    pub async fn create(root: &Path, started_at: DateTime<Local>, topic: &str) -> Result<Self> {
        let base = format!("{}_{}", started_at.format("%Y%m%d_%H%M%S"), topic_slug(topic));
        fs::create_dir_all(root)
            .await
            .with_context(|| format!("Failed to create archive root {}", root.display()))?;

        let mut suffix = 1;
        let (dir, stem) = loop {
            let stem = if suffix == 1 {
                base.clone()
            } else {
                format!("{}_{}", base, suffix)
            };
            let dir = root.join(&stem);
            match fs::create_dir(&dir).await {
                Ok(()) => break (dir, stem),
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => suffix += 1,
                Err(e) => {
                    return Err(e).with_context(|| {
                        format!("Failed to create archive directory {}", dir.display())
                    });
                }
            }
        };

        fs::create_dir_all(dir.join("prompts"))
            .await
            .with_context(|| format!("Failed to create archive directory {}", dir.display()))?;
        fs::create_dir_all(dir.join("summaries"))
            .await
            .with_context(|| format!("Failed to create archive directory {}", dir.display()))?;

        Ok(Self {
            dir,
            stem,
            prompt_seq: AtomicUsize::new(0),
            append_lock: Mutex::new(()),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path(&self, name: &str) -> PathBuf {
        self.dir.join(name)
    }

    /// 输出目录中使用的文件名前缀，与归档目录同名
    pub fn output_stem(&self) -> String {
        self.stem.clone()
    }

    async fn append(&self, name: &str, content: &str) -> Result<()> {
        let _guard = self.append_lock.lock().await;
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.path(name))
            .await
            .with_context(|| format!("Failed to open {}", name))?;
        file.write_all(content.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }

    /// 追加一行带时间戳的执行日志
    pub async fn append_log(&self, line: &str) -> Result<()> {
        let stamp = Local::now().format("%Y-%m-%d %H:%M:%S");
        let mut text = String::new();
        for l in line.lines() {
            text.push_str(&format!("[{}] {}\n", stamp, l));
        }
        if text.is_empty() {
            text.push('\n');
        }
        self.append(RUN_LOG, &text).await
    }

    /// 原样追加到 run.log（计时报告等多行块）
    pub async fn append_log_block(&self, block: &str) -> Result<()> {
        self.append(RUN_LOG, &format!("\n{}\n", block.trim_end())).await
    }

    /// 按发出顺序记录每一个prompt
    pub async fn record_prompt(&self, tool_name: &str, prompt: &str) -> Result<PathBuf> {
        let seq = self.prompt_seq.fetch_add(1, Ordering::SeqCst) + 1;
        let path = self
            .dir
            .join("prompts")
            .join(format!("{:03}_{}.txt", seq, file_component(tool_name, 40)));
        fs::write(&path, prompt)
            .await
            .with_context(|| format!("Failed to write prompt {}", path.display()))?;
        Ok(path)
    }

    pub fn prompt_count(&self) -> usize {
        self.prompt_seq.load(Ordering::SeqCst)
    }

    /// 写入一个条目的完整记录：JSONL一行，外加一份可读的摘要文本
    pub async fn record_summary(&self, record: &SummaryRecord) -> Result<()> {
        let line = serde_json::to_string(record)?;
        self.append(SUMMARIES_LOG, &format!("{}\n", line)).await?;

        if let Some(summary) = &record.summary {
            let name = format!(
                "{:03}_{}_{}.txt",
                record.index,
                record.kind,
                file_component(&record.source_id, 60)
            );
            let score = record
                .score
                .map(|s| s.to_string())
                .unwrap_or_else(|| "n/a".to_string());
            let body = format!(
                "Source: {}\nScore: {}\nRetained: {}\n\n{}\n",
                record.source_id, score, record.retained, summary
            );
            fs::write(self.dir.join("summaries").join(name), body).await?;
        }
        Ok(())
    }

    pub async fn write_text(&self, name: &str, content: &str) -> Result<PathBuf> {
        let path = self.path(name);
        fs::write(&path, content)
            .await
            .with_context(|| format!("Failed to write {}", path.display()))?;
        Ok(path)
    }

    pub async fn write_manifest(&self, manifest: &RunManifest) -> Result<PathBuf> {
        let content = serde_json::to_string_pretty(manifest)?;
        self.write_text(MANIFEST_FILE, &content).await
    }
}

/// 把最终报告复制到输出目录，返回复制后的路径
pub async fn publish(archive: &Archive, output_dir: &Path, produced: &[PathBuf]) -> Result<Vec<PathBuf>> {
    fs::create_dir_all(output_dir)
        .await
        .with_context(|| format!("Failed to create output directory {}", output_dir.display()))?;

    let mut published = Vec::new();
    for source in produced {
        let Some(ext) = source.extension().and_then(|e| e.to_str()) else {
            continue;
        };
        let target = output_dir.join(format!("{}_report.{}", archive.output_stem(), ext));
        fs::copy(source, &target)
            .await
            .with_context(|| format!("Failed to copy {} to outputs", source.display()))?;
        published.push(target);
    }
    Ok(published)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generator::types::ItemKind;
    use chrono::TimeZone;
    use tempfile::TempDir;

    fn started() -> DateTime<Local> {
        Local.with_ymd_and_hms(2024, 3, 9, 14, 5, 7).single().unwrap()
    }

    #[tokio::test]
    async fn test_archive_layout() {
        let root = TempDir::new().unwrap();
        let archive = Archive::create(root.path(), started(), "Cats & Dogs?").await.unwrap();

        assert!(archive.dir().ends_with("20240309_140507_Cats_Dogs_"));
        assert!(archive.path("prompts").is_dir());
        assert!(archive.path("summaries").is_dir());
    }

    #[tokio::test]
    async fn test_same_second_runs_get_separate_directories() {
        let root = TempDir::new().unwrap();
        let first = Archive::create(root.path(), started(), "Cats").await.unwrap();
        first.record_prompt("draft", "first run").await.unwrap();
        let second = Archive::create(root.path(), started(), "Cats").await.unwrap();
        let third = Archive::create(root.path(), started(), "Cats").await.unwrap();

        assert!(first.dir().ends_with("20240309_140507_Cats"));
        assert!(second.dir().ends_with("20240309_140507_Cats_2"));
        assert!(third.dir().ends_with("20240309_140507_Cats_3"));
        assert_eq!(second.output_stem(), "20240309_140507_Cats_2");
        assert!(first.path("prompts/001_draft.txt").is_file());
        assert!(!second.path("prompts/001_draft.txt").exists());
    }

    #[tokio::test]
    async fn test_prompts_are_numbered_in_order() {
        let root = TempDir::new().unwrap();
        let archive = Archive::create(root.path(), started(), "t").await.unwrap();

        let first = archive.record_prompt("summarize", "a").await.unwrap();
        let second = archive.record_prompt("score", "b").await.unwrap();
        assert!(first.ends_with("001_summarize.txt"));
        assert!(second.ends_with("002_score.txt"));
        assert_eq!(archive.prompt_count(), 2);
    }

    #[tokio::test]
    async fn test_summary_records_are_appended() {
        let root = TempDir::new().unwrap();
        let archive = Archive::create(root.path(), started(), "t").await.unwrap();

        let record = SummaryRecord {
            index: 1,
            source_id: "https://example.com/a".into(),
            kind: ItemKind::Article,
            summary: Some("short".into()),
            score: Some(7),
            retained: true,
            error: None,
        };
        archive.record_summary(&record).await.unwrap();
        archive
            .record_summary(&SummaryRecord {
                index: 2,
                summary: None,
                score: None,
                retained: false,
                error: Some("bad score".into()),
                ..record.clone()
            })
            .await
            .unwrap();

        let log = std::fs::read_to_string(archive.path(SUMMARIES_LOG)).unwrap();
        let parsed: Vec<SummaryRecord> = log
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[0], record);
        assert_eq!(std::fs::read_dir(archive.path("summaries")).unwrap().count(), 1);
    }

    #[tokio::test]
    async fn test_publish_copies_with_stem() {
        let root = TempDir::new().unwrap();
        let archive = Archive::create(root.path(), started(), "Cats").await.unwrap();
        let report = archive.write_text(REPORT_FILE, "# Cats").await.unwrap();

        let outputs = root.path().join("outputs");
        let published = publish(&archive, &outputs, &[report]).await.unwrap();
        assert_eq!(published, vec![outputs.join("20240309_140507_Cats_report.md")]);
        assert_eq!(std::fs::read_to_string(&published[0]).unwrap(), "# Cats");
    }
}
