use anyhow::{Result, anyhow, bail};

use crate::generator::context::GeneratorContext;
use crate::generator::types::{ReferenceDoc, Summary};
use crate::utils::token_estimator::TokenEstimator;

pub mod context;

pub use context::ReportContext;

const DRAFT_TAG: &str = "reportContent";
const REFINED_TAG: &str = "refinedReport";
/// 为模型的回复与提示词模板之外的内容留出的余量
const BUDGET_RESERVE_TOKENS: usize = 256;

fn guidance(context: &GeneratorContext) -> &str {
    context
        .request
        .guidance
        .as_deref()
        .filter(|g| !g.trim().is_empty())
        .unwrap_or("None")
}

fn draft_prompt(context: &GeneratorContext, material: &str) -> String {
    let request = &context.request;
    format!(
        "You are an expert research analyst. Write a comprehensive, well-structured research report in Markdown.\n\n\
         Topic: {}\nKeywords: {}\nGuidance: {}\n\n\
         Use only the source material below. Each summary is labelled Summary_N; cite it inline as [Summary_N] where you use it. \
         Reference documents were supplied by the user and are trusted. Highlight key facts, figures, trends and disagreements \
         between sources, and end with conclusions.\n\
         Put the entire report inside <{tag}></{tag}> tags.\n\n\
         Source material:\n{}",
        request.topic,
        request.keywords.join(", "),
        guidance(context),
        material,
        tag = DRAFT_TAG
    )
}

fn refine_prompt(context: &GeneratorContext, material: &str, draft: &str, references: &str) -> String {
    format!(
        "You are a senior editor. Review the draft research report below against the source material for coherence, \
         completeness and accuracy, and return an improved final version in Markdown.\n\n\
         Topic: {}\nGuidance: {}\n\n\
         Requirements:\n\
         - Start with an executive summary.\n\
         - Use clear headings, bullet lists and tables where they help.\n\
         - Remove the inline [Summary_N] citations.\n\
         - Do not add facts that are not supported by the source material.\n\
         - End with this references section exactly as given:\n\n{}\n\
         Put the entire report inside <{tag}></{tag}> tags.\n\n\
         Draft report:\n{}\n\n\
         Source material:\n{}",
        context.request.topic,
        guidance(context),
        references,
        draft,
        material,
        tag = REFINED_TAG
    )
}

/// 报告末尾没有参考文献章节时补上
pub fn with_references(report: &str, references: &str) -> String {
    if report.to_ascii_lowercase().contains("## references") {
        report.trim_end().to_string()
    } else {
        format!("{}\n\n{}", report.trim_end(), references.trim_end())
    }
}

/// 综合器：构建有预算的上下文，生成草稿并（可选）精炼
pub struct Synthesizer {
    estimator: TokenEstimator,
}

impl Default for Synthesizer {
    fn default() -> Self {
        Self::new()
    }
}

impl Synthesizer {
    pub fn new() -> Self {
        Self {
            estimator: TokenEstimator::new(),
        }
    }

    /// 上下文可用的token数：模型输入上限减去提示词模板与余量
    fn budget_for(&self, context: &GeneratorContext, template: &str) -> usize {
        context
            .model
            .input_budget_tokens()
            .saturating_sub(self.estimator.estimate(template))
            .saturating_sub(BUDGET_RESERVE_TOKENS)
    }

    pub async fn build_context(
        &self,
        context: &GeneratorContext,
        summaries: Vec<Summary>,
        references: Vec<ReferenceDoc>,
    ) -> Result<ReportContext> {
        let mut report_context = ReportContext::new(summaries, references);
        if report_context.is_empty() {
            bail!("no relevant material left for synthesis");
        }

        let budget = self.budget_for(context, &draft_prompt(context, ""));
        let dropped = report_context.fit_to_budget(budget, &self.estimator);
        if !dropped.is_empty() {
            context
                .warn(format!(
                    "上下文超出模型输入预算，已去掉 {} 条评分最低的摘要",
                    dropped.len()
                ))
                .await;
        }
        if report_context.is_empty() {
            bail!("report context is empty after fitting the model input budget");
        }

        context
            .log(format!(
                "🧩 报告上下文: {} 条摘要, {} 份参考文档, 约 {} tokens",
                report_context.summaries.len(),
                report_context.references.len(),
                report_context.estimate_tokens(&self.estimator)
            ))
            .await;
        Ok(report_context)
    }

    /// 生成草稿。模型调用失败或多次询问后仍无法解析都是致命错误
    pub async fn draft(&self, context: &GeneratorContext, report_context: &ReportContext) -> Result<String> {
        context.ensure_active()?;
        context.log("✍️ 正在生成报告草稿...").await;

        let prompt = draft_prompt(context, &report_context.render());
        match context.ask_tagged("draft_report", &prompt, DRAFT_TAG, false).await {
            Ok(Some(draft)) if !draft.trim().is_empty() => {
                context.log("✓ 报告草稿已生成").await;
                Ok(draft)
            }
            Ok(_) => Err(anyhow!("draft report could not be parsed from the model reply")),
            Err(e) => Err(anyhow!("draft report generation failed: {}", e)),
        }
    }

    /// 精炼报告。无法解析时退回到草稿；模型调用失败是致命错误
    pub async fn refine(
        &self,
        context: &GeneratorContext,
        report_context: &ReportContext,
        draft: &str,
    ) -> Result<String> {
        context.ensure_active()?;
        context.log("🪄 正在精炼报告...").await;

        // 完整来源列表是参考文献长度的上限
        let template = refine_prompt(context, "", draft, &report_context.references_section());
        let refine_context = report_context.fitted(self.budget_for(context, &template), &self.estimator);
        let references = refine_context.references_section();

        let prompt = refine_prompt(context, &refine_context.render(), draft, &references);
        match context.ask_tagged("refine_report", &prompt, REFINED_TAG, false).await {
            Ok(Some(refined)) if !refined.trim().is_empty() => {
                context.log("✓ 报告精炼完成").await;
                Ok(with_references(&refined, &references))
            }
            Ok(_) => {
                context.warn("精炼结果无法解析，使用草稿作为最终报告").await;
                Ok(with_references(draft, &report_context.references_section()))
            }
            Err(e) => Err(anyhow!("report refinement failed: {}", e)),
        }
    }
}
