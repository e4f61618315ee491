use regex::Regex;
use serde_json::Value;
use std::sync::LazyLock;

use crate::llm::client::types::{Message, Role};

static JSON_FENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)```json\s*(.*?)\s*```").expect("valid json fence regex")
});

static ANY_FENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)```[a-zA-Z]*\s*(.*?)\s*```").expect("valid fence regex")
});

/// 已知模型的上下文窗口（tokens），按名称前缀匹配，更具体的前缀在前
const MODEL_TOKEN_LIMITS: &[(&str, usize)] = &[
    ("gpt-4.1", 1_047_576),
    ("gpt-4o", 128_000),
    ("gpt-4-turbo", 128_000),
    ("gpt-4", 8_192),
    ("gpt-3.5-turbo", 16_385),
    ("o4-mini", 200_000),
    ("o3", 200_000),
    ("o1", 200_000),
    ("claude", 200_000),
    ("deepseek", 64_000),
    ("moonshot-v1-128k", 128_000),
    ("moonshot-v1-32k", 32_000),
    ("moonshot-v1-8k", 8_000),
    ("kimi", 128_000),
    ("mistral-large", 128_000),
    ("qwen", 32_768),
];

/// 上下文超限的错误特征
const CONTEXT_OVERFLOW_MARKERS: &[&str] = &[
    "context_length_exceeded",
    "maximum context length",
    "context window",
    "prompt is too long",
    "input is too long",
    "too many tokens",
    "token limit",
    "reduce the length",
];

/// 查询模型的上下文窗口，支持 `provider:model` 形式的名称
pub fn model_token_limit(model: &str) -> Option<usize> {
    let name = model
        .rsplit([':', '/'])
        .next()
        .unwrap_or(model)
        .to_lowercase();
    MODEL_TOKEN_LIMITS
        .iter()
        .find(|(prefix, _)| name.starts_with(prefix))
        .map(|(_, limit)| *limit)
}

/// 根据服务端错误信息判断是否为上下文超限
pub fn is_context_overflow_message(message: &str) -> bool {
    let message = message.to_lowercase();
    CONTEXT_OVERFLOW_MARKERS
        .iter()
        .any(|marker| message.contains(marker))
}

/// 将对话渲染为纯文本，用于填充提示词模板
pub fn buffer_string(messages: &[Message]) -> String {
    messages
        .iter()
        .map(|message| {
            let prefix = match message.role {
                Role::System => "System",
                Role::User => "Human",
                Role::Assistant => "AI",
                Role::Tool => "Tool",
            };
            format!("{}: {}", prefix, message.content())
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// 今天的日期，格式为 `%Y-%m-%d`
pub fn today_str() -> String {
    chrono::Local::now().format("%Y-%m-%d").to_string()
}

/// 按字符截断
pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((index, _)) => text[..index].to_string(),
        None => text.to_string(),
    }
}

/// 从模型回复中解析JSON：依次尝试整体解析、```json代码块、任意代码块、首个对象或数组
pub fn parse_json_response(response: &str) -> Option<Value> {
    let trimmed = response.trim();
    if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
        return Some(value);
    }

    for fence in [&*JSON_FENCE, &*ANY_FENCE] {
        for captures in fence.captures_iter(trimmed) {
            if let Some(body) = captures.get(1)
                && let Ok(value) = serde_json::from_str::<Value>(body.as_str())
            {
                return Some(value);
            }
        }
    }

    for (open, close) in [('{', '}'), ('[', ']')] {
        if let (Some(start), Some(end)) = (trimmed.find(open), trimmed.rfind(close))
            && start < end
            && let Ok(value) = serde_json::from_str::<Value>(&trimmed[start..=end])
        {
            return Some(value);
        }
    }

    None
}
