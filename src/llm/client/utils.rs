use rand::Rng;
use regex::Regex;
use std::sync::LazyLock;
use std::time::Duration;

use super::types::LlmError;

static STATUS_CODE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(?:status(?: code)?|http)[^0-9]{0,4}(\d{3})\b").expect("static regex")
});

/// 把provider返回的错误文本归类。rig的错误只暴露文本，所以按状态码和关键词识别
pub fn classify_error(message: &str) -> LlmError {
    let lowered = message.to_lowercase();

    let status = STATUS_CODE
        .captures(message)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse::<u16>().ok());

    match status {
        Some(429) => return LlmError::RateLimited(message.to_string()),
        Some(code) if (500..600).contains(&code) => return LlmError::Server(message.to_string()),
        Some(code) if (400..500).contains(&code) => return LlmError::Request(message.to_string()),
        _ => {}
    }

    if lowered.contains("rate limit") || lowered.contains("too many requests") {
        LlmError::RateLimited(message.to_string())
    } else if lowered.contains("overloaded")
        || lowered.contains("bad gateway")
        || lowered.contains("service unavailable")
        || lowered.contains("internal server error")
    {
        LlmError::Server(message.to_string())
    } else {
        LlmError::Request(message.to_string())
    }
}

/// 第 `attempt` 次重试前的等待：指数增长、封顶，并叠加最多25%的随机抖动
pub fn backoff_delay(attempt: u32, base_ms: u64, max_ms: u64) -> Duration {
    let exp = base_ms.saturating_mul(1u64 << attempt.saturating_sub(1).min(16));
    let capped = exp.min(max_ms);
    let jitter = if capped >= 4 {
        rand::rng().random_range(0..=capped / 4)
    } else {
        0
    };
    Duration::from_millis(capped + jitter)
}
