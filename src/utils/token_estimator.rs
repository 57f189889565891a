use serde::{Deserialize, Serialize};

/// Token估算器，用于在没有分词器的情况下给上下文预算做近似
pub struct TokenEstimator {
    rules: TokenCalculationRules,
}

/// Token计算规则
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenCalculationRules {
    /// 英文字符的平均token比例（字符数/token数）
    pub english_char_per_token: f64,
    /// 中日韩字符的平均token比例
    pub cjk_char_per_token: f64,
    /// 每段文本的固定开销
    pub base_token_overhead: usize,
}

impl Default for TokenCalculationRules {
    fn default() -> Self {
        Self {
            english_char_per_token: 4.0,
            cjk_char_per_token: 1.5,
            base_token_overhead: 50,
        }
    }
}

impl Default for TokenEstimator {
    fn default() -> Self {
        Self::new()
    }
}

impl TokenEstimator {
    pub fn new() -> Self {
        Self {
            rules: TokenCalculationRules::default(),
        }
    }

    pub fn with_rules(rules: TokenCalculationRules) -> Self {
        Self { rules }
    }

    /// 估算文本的token数量
    pub fn estimate(&self, text: &str) -> usize {
        let (cjk, other) = text.chars().fold((0usize, 0usize), |(cjk, other), c| {
            if is_cjk_char(c) {
                (cjk + 1, other)
            } else {
                (cjk, other + 1)
            }
        });

        let cjk_tokens = (cjk as f64 / self.rules.cjk_char_per_token).ceil() as usize;
        let other_tokens = (other as f64 / self.rules.english_char_per_token).ceil() as usize;
        cjk_tokens + other_tokens + self.rules.base_token_overhead
    }

    /// 多段文本作为一个上下文时的估算（只计一次固定开销）
    pub fn estimate_joined<'a>(&self, texts: impl IntoIterator<Item = &'a str>) -> usize {
        let body: usize = texts
            .into_iter()
            .map(|t| self.estimate(t) - self.rules.base_token_overhead)
            .sum();
        body + self.rules.base_token_overhead
    }

    /// 给定token预算时，英文文本大约能容纳的字符数
    pub fn chars_for_tokens(&self, tokens: usize) -> usize {
        let usable = tokens.saturating_sub(self.rules.base_token_overhead);
        (usable as f64 * self.rules.english_char_per_token) as usize
    }
}

fn is_cjk_char(c: char) -> bool {
    matches!(c as u32,
        0x4E00..=0x9FFF |
        0x3400..=0x4DBF |
        0x3040..=0x30FF |
        0xAC00..=0xD7AF |
        0x20000..=0x2A6DF
    )
}
