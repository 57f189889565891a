use anyhow::Result;
use regex::Regex;
use std::sync::LazyLock;

use crate::generator::context::{GeneratorContext, RunCancelled};
use crate::generator::types::{Item, ReferenceDoc, ScoreParse, Summary, SummaryRecord};
use crate::utils::text::{TagParse, parse_tool_response, truncate_chars};
use crate::utils::threads::do_parallel_with_limit;

static OUT_OF_TEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(-?\d+)\s*/\s*10\b").expect("static regex"));
static BARE_INTEGER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*(-?\d+)\s*\.?\s*$").expect("static regex"));

const SUMMARY_TAG: &str = "toolScrapeSummary";
const SCORE_TAG: &str = "summaryScore";
/// 短于此长度的文本不做摘要
pub const MIN_SUMMARY_INPUT_CHARS: usize = 100;

fn check_range(raw: &str) -> ScoreParse {
    match raw.trim().parse::<i64>() {
        Ok(value) if (0..=10).contains(&value) => ScoreParse::Score(value as u8),
        Ok(value) => ScoreParse::ParseError(format!("score {} is outside 0-10", value)),
        Err(_) => ScoreParse::ParseError(format!("score {:?} is not an integer", raw.trim())),
    }
}

/// 解析评分回复，按顺序尝试：
/// 1. `<summaryScore>N</summaryScore>`（标签内允许 `N/10`）
/// 2. 回复中第一个 `N/10`
/// 3. 整个回复就是一个整数
///
/// 只解析一次；超出 0..=10 或无法解析都返回 ParseError
pub fn parse_score(reply: &str) -> ScoreParse {
    let (tagged, rest) = match parse_tool_response(reply, SCORE_TAG) {
        TagParse::Found(content) => (Some(content), String::new()),
        TagParse::Missing(cleaned) => (None, cleaned),
    };

    if let Some(content) = tagged {
        return match OUT_OF_TEN.captures(&content) {
            Some(caps) => check_range(&caps[1]),
            None => check_range(&content),
        };
    }
    if let Some(caps) = OUT_OF_TEN.captures(&rest) {
        return check_range(&caps[1]);
    }
    if let Some(caps) = BARE_INTEGER.captures(&rest) {
        return check_range(&caps[1]);
    }
    ScoreParse::ParseError(format!(
        "no score found in reply: {:?}",
        truncate_chars(rest.trim(), 80)
    ))
}

fn summary_prompt(context: &GeneratorContext, item: &Item) -> String {
    let request = &context.request;
    let max_chars = context.model.summary_input_chars();
    let text = truncate_chars(&item.text, max_chars);
    let guidance = request
        .guidance
        .as_deref()
        .filter(|g| !g.trim().is_empty())
        .unwrap_or("None");
    format!(
        "You are summarizing source material for a research report.\n\n\
         Topic: {}\nGuidance: {}\n\n\
         Summarize the content below, keeping only facts, figures, quotes and arguments that matter for the topic and guidance. \
         Ignore navigation text, advertisements and unrelated material. Keep the summary under 400 words.\n\
         Wrap the summary in <{tag}></{tag}> tags.\n\n\
         Content:\n{}",
        request.topic,
        guidance,
        text,
        tag = SUMMARY_TAG
    )
}

fn score_prompt(context: &GeneratorContext, summary: &str) -> String {
    let request = &context.request;
    format!(
        "Rate how relevant the following summary is to the research topic on a scale from 0 (irrelevant) to 10 (highly relevant).\n\n\
         Topic: {}\nKeywords: {}\n\n\
         Summary:\n{}\n\n\
         Respond with only the integer score inside <{tag}></{tag}> tags, for example <{tag}>7</{tag}>.",
        request.topic,
        request.keywords.join(", "),
        summary,
        tag = SCORE_TAG
    )
}

/// 评分阶段的结果
#[derive(Debug, Default)]
pub struct RelevanceOutcome {
    /// 每个完整处理过的条目一条记录，按条目顺序
    pub records: Vec<SummaryRecord>,
    /// 达到阈值的摘要
    pub retained: Vec<Summary>,
    /// 不做摘要、原样进入报告上下文的参考文档
    pub passthrough: Vec<ReferenceDoc>,
}

/// 相关性引擎：逐条目 摘要 -> 评分 -> 过滤
#[derive(Default)]
pub struct RelevanceEngine;

impl RelevanceEngine {
    pub async fn execute(
        &self,
        context: &GeneratorContext,
        mut items: Vec<Item>,
        docs: Vec<ReferenceDoc>,
    ) -> Result<RelevanceOutcome> {
        context.ensure_active()?;
        let request = &context.request;

        let passthrough = if request.summarize_reference_docs {
            items.extend(docs.into_iter().map(ReferenceDoc::into_item));
            vec![]
        } else {
            if !docs.is_empty() {
                context
                    .log(format!("📎 {} 份参考文档将原样进入报告上下文", docs.len()))
                    .await;
            }
            docs
        };

        context
            .log(format!("🧮 对 {} 个条目进行摘要与相关性评分...", items.len()))
            .await;

        let futures: Vec<_> = items
            .iter()
            .enumerate()
            .map(|(i, item)| Box::pin(async move { self.process_item(context, i + 1, item).await }))
            .collect();
        let records: Vec<SummaryRecord> =
            do_parallel_with_limit(futures, context.config.llm.max_parallels)
                .await
                .into_iter()
                .flatten()
                .collect();

        if context.is_cancelled() {
            return Err(RunCancelled.into());
        }

        let retained: Vec<Summary> = records.iter().filter_map(SummaryRecord::to_summary).collect();
        context
            .log(format!(
                "✓ 评分完成: {} 个条目中保留 {} 个 (阈值 {})",
                records.len(),
                retained.len(),
                request.score_threshold
            ))
            .await;

        Ok(RelevanceOutcome {
            records,
            retained,
            passthrough,
        })
    }

    /// 处理一个条目。取消后尚未开始的条目返回 None，不留下记录
    async fn process_item(
        &self,
        context: &GeneratorContext,
        index: usize,
        item: &Item,
    ) -> Option<SummaryRecord> {
        if context.is_cancelled() {
            return None;
        }

        let record = self.summarize_and_score(context, index, item).await;
        match (&record.error, record.score) {
            (Some(error), _) => {
                context
                    .warn(format!("条目已丢弃 [{}] {}: {}", index, item.source_id, error))
                    .await
            }
            (None, Some(score)) => {
                let mark = if record.retained { "✅" } else { "➖" };
                context
                    .log(format!("   {} [{}] 评分 {}/10: {}", mark, index, score, item.source_id))
                    .await
            }
            (None, None) => {}
        }

        // 完整的摘要+评分之后才写入归档
        if let Err(e) = context.archive.record_summary(&record).await {
            context.warn(format!("写入摘要记录失败: {}", e)).await;
        }
        Some(record)
    }

    async fn summarize_and_score(
        &self,
        context: &GeneratorContext,
        index: usize,
        item: &Item,
    ) -> SummaryRecord {
        if item.text.trim().chars().count() < MIN_SUMMARY_INPUT_CHARS {
            return SummaryRecord::failed(index, item, "text too short to summarize");
        }

        let summary = match context
            .ask_tagged("summarize", &summary_prompt(context, item), SUMMARY_TAG, true)
            .await
        {
            Ok(Some(summary)) if !summary.trim().is_empty() => summary,
            Ok(_) => return SummaryRecord::failed(index, item, "summary could not be parsed"),
            Err(e) => return SummaryRecord::failed(index, item, format!("summarize failed: {}", e)),
        };

        let mut record = SummaryRecord {
            summary: Some(summary.clone()),
            error: None,
            ..SummaryRecord::failed(index, item, "")
        };

        let score_reply = context
            .prompt_cached("score", &score_prompt(context, &summary), |reply| {
                matches!(parse_score(reply), ScoreParse::Score(_))
            })
            .await;
        match score_reply {
            Ok(reply) => match parse_score(&reply) {
                ScoreParse::Score(score) => {
                    record.score = Some(score);
                    record.retained = score >= context.request.score_threshold;
                }
                ScoreParse::ParseError(message) => record.error = Some(message),
            },
            Err(e) => record.error = Some(format!("score failed: {}", e)),
        }
        record
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tagged_scores() {
        assert_eq!(parse_score("<summaryScore>8</summaryScore>"), ScoreParse::Score(8));
        assert_eq!(parse_score("<SummaryScore> 7/10 </SummaryScore>"), ScoreParse::Score(7));
        assert_eq!(
            parse_score("<think>maybe 2</think><summaryScore>0</summaryScore>"),
            ScoreParse::Score(0)
        );
    }

    #[test]
    fn test_textual_scores() {
        assert_eq!(parse_score("I would rate this 6/10."), ScoreParse::Score(6));
        assert_eq!(parse_score(" 10 "), ScoreParse::Score(10));
        assert_eq!(parse_score("9."), ScoreParse::Score(9));
    }

    #[test]
    fn test_out_of_range_is_an_error() {
        assert!(matches!(parse_score("<summaryScore>11</summaryScore>"), ScoreParse::ParseError(_)));
        assert!(matches!(parse_score("<summaryScore>-1</summaryScore>"), ScoreParse::ParseError(_)));
        assert!(matches!(parse_score("12/10"), ScoreParse::ParseError(_)));
    }

    #[test]
    fn test_unparsable_is_an_error() {
        assert!(matches!(parse_score("<summaryScore>high</summaryScore>"), ScoreParse::ParseError(_)));
        assert!(matches!(parse_score("<summaryScore>7.5</summaryScore>"), ScoreParse::ParseError(_)));
        assert!(matches!(parse_score("quite relevant"), ScoreParse::ParseError(_)));
        // 文本中的其他数字不会被当作评分
        assert!(matches!(parse_score("Scale 0 to 10, I'd say relevant"), ScoreParse::ParseError(_)));
    }
}
