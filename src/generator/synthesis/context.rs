use crate::generator::types::{ReferenceDoc, Summary};
use crate::utils::text::truncate_chars;
use crate::utils::token_estimator::TokenEstimator;

/// 送入综合阶段的上下文：按评分降序的摘要 + 原样传入的参考文档
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReportContext {
    pub summaries: Vec<Summary>,
    pub references: Vec<ReferenceDoc>,
}

impl ReportContext {
    /// 评分降序；同分时保持评分阶段的原始顺序
    pub fn new(mut summaries: Vec<Summary>, references: Vec<ReferenceDoc>) -> Self {
        summaries.sort_by(|a, b| b.score.cmp(&a.score).then(a.order.cmp(&b.order)));
        Self {
            summaries,
            references,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.summaries.is_empty() && self.references.is_empty()
    }

    /// `Summary_i` 的编号就是在上下文中的位置
    pub fn render(&self) -> String {
        let mut blocks = Vec::new();
        for (i, summary) in self.summaries.iter().enumerate() {
            blocks.push(format!(
                "Summary_{} (source: {}, relevance {}/10):\n{}",
                i + 1,
                summary.source_id,
                summary.score,
                summary.text.trim()
            ));
        }
        for doc in &self.references {
            blocks.push(format!(
                "Reference document ({}):\n{}",
                doc.file_name(),
                doc.text.trim()
            ));
        }
        blocks.join("\n\n")
    }

    pub fn estimate_tokens(&self, estimator: &TokenEstimator) -> usize {
        estimator.estimate(&self.render())
    }

    /// 去掉当前评分最低的一条摘要（同分时去掉原始顺序靠后的那条）
    pub fn truncate_step(&mut self) -> Option<Summary> {
        self.summaries.pop()
    }

    /// 逐条去掉最低分摘要直到满足预算；摘要全部去掉后仍超出时才截短参考文档
    ///
    /// 返回被去掉的摘要
    pub fn fit_to_budget(&mut self, budget_tokens: usize, estimator: &TokenEstimator) -> Vec<Summary> {
        let mut dropped = Vec::new();
        while self.estimate_tokens(estimator) > budget_tokens {
            match self.truncate_step() {
                Some(summary) => dropped.push(summary),
                None => break,
            }
        }

        if self.estimate_tokens(estimator) > budget_tokens {
            self.shrink_references(budget_tokens, estimator);
        }
        dropped
    }

    /// 满足预算的副本，原上下文不变
    pub fn fitted(&self, budget_tokens: usize, estimator: &TokenEstimator) -> Self {
        let mut fitted = self.clone();
        fitted.fit_to_budget(budget_tokens, estimator);
        fitted
    }

    /// 按顺序给参考文档分配字符预算，靠前的文档优先保留完整内容
    fn shrink_references(&mut self, budget_tokens: usize, estimator: &TokenEstimator) {
        let originals: Vec<String> = self.references.iter().map(|d| d.text.clone()).collect();
        let mut allowed = estimator.chars_for_tokens(budget_tokens);

        loop {
            let mut remaining = allowed;
            for (doc, original) in self.references.iter_mut().zip(&originals) {
                let kept = truncate_chars(original, remaining);
                remaining -= kept.chars().count();
                doc.text = kept.to_string();
            }
            if self.estimate_tokens(estimator) <= budget_tokens || allowed == 0 {
                break;
            }
            allowed = allowed * 9 / 10;
        }
        self.references.retain(|d| !d.text.trim().is_empty());
    }

    /// 草稿中使用的来源对照表
    pub fn summary_sources(&self) -> String {
        let mut list = String::from("References:\n");
        for (i, summary) in self.summaries.iter().enumerate() {
            list.push_str(&format!("Summary_{} = {}\n", i + 1, summary.source_id));
        }
        list
    }

    /// 最终报告的参考文献：摘要来源在前，参考文档文件名在后
    pub fn references_section(&self) -> String {
        let mut entries: Vec<String> = self.summaries.iter().map(|s| s.source_id.clone()).collect();
        entries.extend(self.references.iter().map(ReferenceDoc::file_name));
        let mut section = String::from("## References\n");
        for (i, entry) in entries.iter().enumerate() {
            section.push_str(&format!("{}. {}\n", i + 1, entry));
        }
        section
    }
}
