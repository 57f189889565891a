use anyhow::{Result, anyhow, bail};
use chrono::{DateTime, Local};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;
use uuid::Uuid;

use crate::generator::context::{GeneratorContext, RunCancelled};
use crate::generator::discovery::SourceDiscoverer;
use crate::generator::loader::DocumentLoader;
use crate::generator::outlet::{self, PdfRenderer, RunCounts, RunManifest};
use crate::generator::relevance::RelevanceEngine;
use crate::generator::retrieval::Retriever;
use crate::generator::scrape::Scraper;
use crate::generator::synthesis::{Synthesizer, with_references};
use crate::generator::types::{Item, Summary};

pub mod state;

use state::{RunState, StateTracker};

/// 时间跟踪作用域
pub struct TimingScope {
    start_time: std::time::Instant,
    phase_start_times: HashMap<String, std::time::Instant>,
    phase_durations: Vec<(String, Duration)>,
}

impl Default for TimingScope {
    fn default() -> Self {
        Self::new()
    }
}

impl TimingScope {
    pub fn new() -> Self {
        Self {
            start_time: std::time::Instant::now(),
            phase_start_times: HashMap::new(),
            phase_durations: Vec::new(),
        }
    }

    /// 开始一个新的阶段计时
    pub fn start_phase(&mut self, phase_name: &str) {
        self.phase_start_times
            .insert(phase_name.to_string(), std::time::Instant::now());
    }

    /// 结束一个阶段的计时
    pub fn end_phase(&mut self, phase_name: &str) -> Option<Duration> {
        let start_time = self.phase_start_times.remove(phase_name)?;
        let duration = start_time.elapsed();
        self.phase_durations.push((phase_name.to_string(), duration));
        Some(duration)
    }

    /// 结束所有尚未结束的阶段（失败或取消时）
    pub fn end_open_phases(&mut self) {
        let mut open: Vec<String> = self.phase_start_times.keys().cloned().collect();
        open.sort();
        for phase in open {
            self.end_phase(&phase);
        }
    }

    pub fn get_total_duration(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// 按结束顺序返回各阶段耗时
    pub fn get_phase_durations(&self) -> &[(String, Duration)] {
        &self.phase_durations
    }

    /// 获取格式化的执行时间报告
    pub fn generate_timing_report(&self) -> String {
        let mut report = format!(
            "总执行时间: {:.2}秒\n",
            self.get_total_duration().as_secs_f64()
        );

        if !self.phase_durations.is_empty() {
            report.push_str("\n各阶段执行时间:\n");
            for (phase, duration) in &self.phase_durations {
                report.push_str(&format!("- {}: {:.3}秒\n", phase, duration.as_secs_f64()));
            }
        }

        report
    }
}

/// 时间跟踪常量
pub struct TimingKeys;

impl TimingKeys {
    pub const GATHER: &'static str = "gather";
    pub const SCORING: &'static str = "scoring";
    pub const SYNTHESIS: &'static str = "synthesis";
    pub const REFINEMENT: &'static str = "refinement";
    pub const ARCHIVING: &'static str = "archiving";
}

/// 一次Run的身份信息，写入 run.json
#[derive(Debug, Clone)]
pub struct RunMeta {
    pub run_id: Uuid,
    pub model_key: String,
    pub started_at: DateTime<Local>,
}

/// 工作流的最终结果。终止状态由调用方发布
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOutcome {
    pub state: RunState,
    pub message: Option<String>,
    pub files: Vec<PathBuf>,
}

struct Workflow<'a> {
    context: &'a GeneratorContext,
    tracker: &'a StateTracker,
    scraper: Scraper,
    timing: TimingScope,
    counts: RunCounts,
    retained: Vec<Summary>,
}

/// 网页侧的收集：来源发现 -> 检索 -> 抓取
async fn gather_web(
    context: &GeneratorContext,
    tracker: &StateTracker,
    scraper: &Scraper,
    source_count: &mut usize,
) -> Result<Vec<Item>> {
    context.ensure_active()?;
    let sources = if context.request.no_search {
        vec![]
    } else {
        tracker.advance(RunState::Discovering)?;
        SourceDiscoverer.execute(context).await?
    };
    *source_count = sources.len();

    context.ensure_active()?;
    tracker.advance(RunState::Retrieving)?;
    let targets = Retriever.execute(context, &sources, scraper).await?;

    context.ensure_active()?;
    tracker.advance(RunState::Scraping)?;
    if targets.is_empty() {
        return Ok(vec![]);
    }
    context
        .log(format!("🕸️ 开始抓取 {} 个目标...", targets.len()))
        .await;
    let items = scraper.execute(context, &targets).await?;
    context
        .log(format!("✓ 抓取完成，得到 {} 个条目", items.len()))
        .await;
    Ok(items)
}

impl<'a> Workflow<'a> {
    fn new(context: &'a GeneratorContext, tracker: &'a StateTracker) -> Self {
        Self {
            context,
            tracker,
            scraper: Scraper::new(&context.services),
            timing: TimingScope::new(),
            counts: RunCounts::default(),
            retained: Vec::new(),
        }
    }

    async fn run_stages(&mut self) -> Result<Vec<PathBuf>> {
        let context = self.context;
        let request = &context.request;
        context
            .log(format!("🚀 开始生成报告: {}", request.topic))
            .await;

        if context.config.check_connection {
            context.log("🔄 正在检查模型连接...").await;
            context
                .llm_client
                .check_connection()
                .await
                .map_err(|e| anyhow!("model connection check failed: {}", e))?;
            context.log("✅ 模型连接正常").await;
        }

        // 本地文档加载与网页收集并行
        self.timing.start_phase(TimingKeys::GATHER);
        let mut source_count = 0;
        let (docs, items) = tokio::join!(
            DocumentLoader.execute(context),
            gather_web(context, self.tracker, &self.scraper, &mut source_count)
        );
        self.counts.sources = source_count;
        let docs = docs?;
        let items = items?;
        self.timing.end_phase(TimingKeys::GATHER);
        self.counts.items = items.len();
        self.counts.documents = docs.len();

        if items.is_empty() && docs.is_empty() {
            bail!("no content could be gathered from any source");
        }

        context.ensure_active()?;
        self.tracker.advance(RunState::Scoring)?;
        self.timing.start_phase(TimingKeys::SCORING);
        let relevance = RelevanceEngine.execute(context, items, docs).await?;
        self.timing.end_phase(TimingKeys::SCORING);
        self.counts.summarized = relevance.records.len();
        self.counts.retained = relevance.retained.len();
        self.counts.dropped = relevance.records.len() - relevance.retained.len();
        self.retained = relevance.retained.clone();

        context.ensure_active()?;
        self.tracker.advance(RunState::Synthesizing)?;
        self.timing.start_phase(TimingKeys::SYNTHESIS);
        let synthesizer = Synthesizer::new();
        let report_context = synthesizer
            .build_context(context, relevance.retained, relevance.passthrough)
            .await?;
        let draft = synthesizer.draft(context, &report_context).await?;
        context
            .archive
            .write_text(
                outlet::DRAFT_FILE,
                &format!("{}\n\n{}", draft.trim_end(), report_context.summary_sources()),
            )
            .await?;
        self.timing.end_phase(TimingKeys::SYNTHESIS);

        let report = if request.skip_refinement {
            context.log("⏭️ 跳过精炼").await;
            with_references(&draft, &report_context.references_section())
        } else {
            context.ensure_active()?;
            self.tracker.advance(RunState::Refining)?;
            self.timing.start_phase(TimingKeys::REFINEMENT);
            let refined = synthesizer.refine(context, &report_context, &draft).await?;
            self.timing.end_phase(TimingKeys::REFINEMENT);
            refined
        };

        context.ensure_active()?;
        self.tracker.advance(RunState::Archiving)?;
        self.timing.start_phase(TimingKeys::ARCHIVING);
        let files = self.archive_report(&report).await?;
        self.timing.end_phase(TimingKeys::ARCHIVING);
        Ok(files)
    }

    /// 写出最终报告（markdown + PDF）并复制到输出目录
    async fn archive_report(&self, report: &str) -> Result<Vec<PathBuf>> {
        let context = self.context;
        let archive = &context.archive;
        context.log("🖊️ 报告存储中...").await;

        let mut produced = vec![archive.write_text(outlet::REPORT_FILE, report).await?];

        let archive_config = &context.config.archive;
        if archive_config.render_pdf {
            let html = PdfRenderer::to_html(report, &context.request.topic)?;
            let html_path = archive.write_text(outlet::REPORT_HTML, &html).await?;
            let pdf_path = archive.path(outlet::REPORT_PDF);
            match PdfRenderer::new(&archive_config.pdf_tool)
                .render(&html_path, &pdf_path)
                .await
            {
                Ok(true) => produced.push(pdf_path),
                Ok(false) => {
                    context
                        .warn(format!(
                            "{} 未安装或不可用，跳过PDF生成",
                            archive_config.pdf_tool
                        ))
                        .await
                }
                Err(e) => context.warn(format!("PDF生成失败: {}", e)).await,
            }
        }

        let mut files = produced.clone();
        match outlet::publish(archive, &archive_config.output_dir, &produced).await {
            Ok(published) => files.extend(published),
            Err(e) => context.warn(format!("复制到输出目录失败: {:#}", e)).await,
        }

        for file in &files {
            context.log(format!("💾 已保存: {}", file.display())).await;
        }
        Ok(files)
    }

    /// 无论结果如何都写入 run.json，并把计时报告追加到 run.log
    async fn finalize(&mut self, outcome: &RunOutcome, meta: &RunMeta) {
        let context = self.context;
        self.timing.end_open_phases();

        let manifest = RunManifest {
            run_id: meta.run_id,
            topic: context.request.topic.clone(),
            model_key: meta.model_key.clone(),
            started_at: meta.started_at.to_rfc3339(),
            finished_at: Local::now().to_rfc3339(),
            outcome: outcome.state,
            message: outcome.message.clone(),
            total_seconds: self.timing.get_total_duration().as_secs_f64(),
            timings: self
                .timing
                .get_phase_durations()
                .iter()
                .map(|(phase, d)| (phase.clone(), d.as_secs_f64()))
                .collect(),
            counts: self.counts,
            retained_sources: self.retained.iter().map(|s| s.source_id.clone()).collect(),
            files: outcome.files.clone(),
            cache: context.cache_manager.stats(),
        };

        if let Err(e) = context.archive.write_manifest(&manifest).await {
            tracing::error!(error = %e, "failed to write run manifest");
        }
        if let Err(e) = context
            .archive
            .append_log_block(&self.timing.generate_timing_report())
            .await
        {
            tracing::warn!(error = %e, "failed to append timing report");
        }
    }
}

/// 执行一次完整的报告生成
///
/// 浏览器会话在任何退出路径上都会关闭；归档在任何结果下都会写入 run.json
pub async fn execute(context: &GeneratorContext, tracker: &StateTracker, meta: &RunMeta) -> RunOutcome {
    let mut workflow = Workflow::new(context, tracker);
    let result = workflow.run_stages().await;
    workflow.scraper.shutdown().await;

    let outcome = match result {
        Ok(files) => RunOutcome {
            state: RunState::Completed,
            message: None,
            files,
        },
        Err(e) if e.is::<RunCancelled>() || context.is_cancelled() => {
            context.log("🛑 Run已取消，保留已完成的部分归档").await;
            RunOutcome {
                state: RunState::Cancelled,
                message: Some("run cancelled".to_string()),
                files: vec![],
            }
        }
        Err(e) => {
            let message = format!("{:#}", e);
            context.log(format!("❌ Run失败: {}", message)).await;
            RunOutcome {
                state: RunState::Failed,
                message: Some(message),
                files: vec![],
            }
        }
    };

    workflow.finalize(&outcome, meta).await;
    outcome
}
