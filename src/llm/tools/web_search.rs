//! 网页搜索工具

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use super::{Tool, WEB_SEARCH};
use crate::config::{ModelSettings, SearchConfig, render_template};
use crate::error::ModelError;
use crate::llm::client::utils::{parse_json_response, today_str, truncate_chars};
use crate::llm::client::{ChatModel, Message, ModelCallSettings, ToolDefinition};
use crate::search::{FetchProvider, SearchFilters, SearchHit, SearchProvider, SearchTopic};

/// 搜索结果为空时返回的错误信息
pub const NO_RESULTS_MESSAGE: &str = "No valid search results found. Please try different search queries or use a different search API.";

/// 网页搜索参数
#[derive(Debug, Deserialize)]
pub struct WebSearchArgs {
    #[serde(deserialize_with = "one_or_many")]
    pub queries: Vec<String>,
    #[serde(default)]
    pub max_results: Option<usize>,
    #[serde(default)]
    pub topic: SearchTopic,
    #[serde(default)]
    pub include_domains: Vec<String>,
    #[serde(default)]
    pub exclude_domains: Vec<String>,
}

fn one_or_many<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
    }

    Ok(match OneOrMany::deserialize(deserializer)? {
        OneOrMany::One(query) => vec![query],
        OneOrMany::Many(queries) => queries,
    })
}

/// 返回给模型的单条结果
#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct WebSearchResult {
    pub query: String,
    pub title: String,
    pub url: String,
    pub summary: String,
}

/// 带来源查询的搜索结果
#[derive(Debug, Clone)]
struct QueriedHit {
    query: String,
    hit: SearchHit,
}

/// 网页搜索工具：并发搜索、按URL去重、补抓正文、摘要
pub struct WebSearchTool {
    search: Arc<dyn SearchProvider>,
    fetch: Arc<dyn FetchProvider>,
    summarizer: Arc<dyn ChatModel>,
    config: SearchConfig,
    summarization: ModelSettings,
    summarize_prompt: String,
}

impl WebSearchTool {
    pub fn new(
        search: Arc<dyn SearchProvider>,
        fetch: Arc<dyn FetchProvider>,
        summarizer: Arc<dyn ChatModel>,
        config: SearchConfig,
        summarization: ModelSettings,
        summarize_prompt: String,
    ) -> Self {
        Self {
            search,
            fetch,
            summarizer,
            config,
            summarization,
            summarize_prompt,
        }
    }

    /// 并发执行所有查询，全部失败时返回第一个错误
    async fn search_all(&self, args: &WebSearchArgs) -> Result<Vec<QueriedHit>> {
        let max_results = args.max_results.unwrap_or(self.config.max_results);
        let filters = SearchFilters {
            topic: args.topic,
            include_domains: args.include_domains.clone(),
            exclude_domains: args.exclude_domains.clone(),
        };

        let searches = args.queries.iter().map(|query| {
            let filters = &filters;
            async move {
                self.search
                    .search(query, max_results, filters)
                    .await
                    .map(|hits| (query.clone(), hits))
            }
        });

        let mut merged = Vec::new();
        let mut first_error = None;
        let mut succeeded = 0;
        for outcome in join_all(searches).await {
            match outcome {
                Ok((query, hits)) => {
                    succeeded += 1;
                    merged.extend(hits.into_iter().map(|hit| QueriedHit {
                        query: query.clone(),
                        hit,
                    }));
                }
                Err(e) => {
                    warn!("{} 搜索失败: {:#}", self.search.name(), e);
                    first_error.get_or_insert(e);
                }
            }
        }

        match first_error {
            Some(e) if succeeded == 0 => Err(e),
            _ => Ok(dedupe_by_url(merged)),
        }
    }

    /// 为正文缺失或过短的结果抓取完整网页
    async fn fill_missing_content(&self, hits: &mut [QueriedHit]) {
        let min_chars = self.config.min_content_chars;
        let needs_fetch: Vec<usize> = hits
            .iter()
            .enumerate()
            .filter(|(_, item)| {
                item.hit
                    .raw_content
                    .as_deref()
                    .is_none_or(|raw| raw.chars().count() < min_chars)
            })
            .map(|(index, _)| index)
            .collect();
        if needs_fetch.is_empty() {
            return;
        }

        let urls: Vec<String> = needs_fetch
            .iter()
            .map(|index| hits[*index].hit.url.clone())
            .collect();
        debug!("抓取 {} 个网页正文", urls.len());
        let pages = self.fetch.fetch(&urls).await;

        for page in pages {
            if !page.success || page.content.trim().is_empty() {
                continue;
            }
            if let Some(index) = needs_fetch
                .iter()
                .find(|index| hits[**index].hit.url == page.url)
            {
                hits[*index].hit.raw_content = Some(page.content);
            }
        }
    }

    /// 摘要网页正文，超时或出错时返回原始正文
    async fn summarize(&self, raw_content: &str) -> String {
        let content = truncate_chars(raw_content, self.config.max_content_chars);
        let date = today_str();
        let prompt = render_template(
            &self.summarize_prompt,
            &[("date", date.as_str()), ("webpage_content", content.as_str())],
        );
        let settings =
            ModelCallSettings::new(&self.summarization.model, self.summarization.max_tokens);
        let messages = [Message::user(prompt)];
        let timeout = Duration::from_secs(self.config.summarization_timeout_secs);

        let response = tokio::time::timeout(timeout, self.summarizer.send(&messages, &settings))
            .await
            .unwrap_or(Err(ModelError::Timeout(self.config.summarization_timeout_secs)));

        match response {
            Ok(response) => match format_summary(&response.text()) {
                Some(summary) => summary,
                None => {
                    debug!("摘要结果无法解析，使用原始内容");
                    content
                }
            },
            Err(e) => {
                warn!("网页摘要失败，使用原始内容: {}", e);
                content
            }
        }
    }

    pub async fn run(&self, args: WebSearchArgs) -> Result<String> {
        let mut hits = self.search_all(&args).await?;
        if hits.is_empty() {
            return Ok(failure_envelope(&args.queries));
        }

        self.fill_missing_content(&mut hits).await;

        let summaries = hits.iter().map(|item| async move {
            let summary = match item.hit.raw_content.as_deref() {
                Some(raw) => self.summarize(raw).await,
                None => item.hit.content.clone().unwrap_or_default(),
            };
            WebSearchResult {
                query: item.query.clone(),
                title: item.hit.title.clone(),
                url: item.hit.url.clone(),
                summary,
            }
        });
        let results = join_all(summaries).await;

        let envelope = json!({
            "success": true,
            "query": args.queries,
            "results": results,
        });
        Ok(serde_json::to_string_pretty(&envelope)?)
    }
}

#[async_trait]
impl Tool for WebSearchTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: WEB_SEARCH.to_string(),
            description: "A search engine optimized for comprehensive, accurate, and trusted results. Useful for when you need to answer questions about current events.".to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "queries": {
                        "type": "array",
                        "items": {"type": "string"},
                        "description": "List of search queries to execute"
                    },
                    "max_results": {
                        "type": "integer",
                        "description": "Maximum number of results to return per query",
                        "default": self.config.max_results
                    },
                    "topic": {
                        "type": "string",
                        "enum": ["general", "news", "finance"],
                        "description": "Topic to filter results by",
                        "default": "general"
                    },
                    "include_domains": {
                        "type": "array",
                        "items": {"type": "string"},
                        "description": "Only return results from these domains"
                    },
                    "exclude_domains": {
                        "type": "array",
                        "items": {"type": "string"},
                        "description": "Never return results from these domains"
                    }
                },
                "required": ["queries"]
            }),
        }
    }

    async fn call(&self, arguments: Value) -> Result<String> {
        let args: WebSearchArgs = serde_json::from_value(arguments)
            .map_err(|e| anyhow!("invalid web_search arguments: {}", e))?;
        if args.queries.is_empty() {
            return Ok(failure_envelope(&args.queries));
        }
        self.run(args).await
    }
}

/// 按URL去重，保留首次出现的结果及其来源查询
fn dedupe_by_url(hits: Vec<QueriedHit>) -> Vec<QueriedHit> {
    let mut seen = HashSet::new();
    hits.into_iter()
        .filter(|item| seen.insert(item.hit.url.clone()))
        .collect()
}

fn failure_envelope(queries: &[String]) -> String {
    json!({
        "success": false,
        "query": queries,
        "error": NO_RESULTS_MESSAGE,
    })
    .to_string()
}

fn excerpt_text(value: &Value) -> Option<String> {
    match value {
        Value::String(text) => Some(text.clone()),
        Value::Array(items) => Some(
            items
                .iter()
                .map(|item| match item {
                    Value::String(text) => text.clone(),
                    other => other.to_string(),
                })
                .collect::<Vec<_>>()
                .join("\n"),
        ),
        _ => None,
    }
}

/// 将摘要模型输出的 `{summary, key_excerpts}` 渲染为带标签的文本
fn format_summary(response: &str) -> Option<String> {
    let value = parse_json_response(response)?;
    let summary = value.get("summary").and_then(Value::as_str)?;
    let key_excerpts = value
        .get("key_excerpts")
        .and_then(excerpt_text)
        .unwrap_or_default();
    Some(format!(
        "<summary>\n{}\n</summary>\n\n<key_excerpts>\n{}\n</key_excerpts>",
        summary, key_excerpts
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hit(url: &str) -> SearchHit {
        SearchHit {
            url: url.to_string(),
            title: format!("title of {}", url),
            content: None,
            raw_content: None,
        }
    }

    #[test]
    fn test_dedupe_keeps_first_occurrence_and_query() {
        let hits = vec![
            QueriedHit { query: "a".to_string(), hit: hit("https://x.dev") },
            QueriedHit { query: "a".to_string(), hit: hit("https://y.dev") },
            QueriedHit { query: "b".to_string(), hit: hit("https://x.dev") },
        ];
        let deduped = dedupe_by_url(hits);
        assert_eq!(deduped.len(), 2);
        assert_eq!(deduped[0].query, "a");
        assert_eq!(deduped[0].hit.url, "https://x.dev");
        assert_eq!(deduped[1].hit.url, "https://y.dev");
    }

    #[test]
    fn test_format_summary() {
        let formatted = format_summary(
            "```json\n{\"summary\": \"Rust is fast.\", \"key_excerpts\": [\"zero-cost\", \"safe\"]}\n```",
        )
        .unwrap();
        assert_eq!(
            formatted,
            "<summary>\nRust is fast.\n</summary>\n\n<key_excerpts>\nzero-cost\nsafe\n</key_excerpts>"
        );
        assert!(format_summary("not json at all").is_none());
        assert!(format_summary("{\"key_excerpts\": \"only\"}").is_none());
    }

    #[test]
    fn test_args_accept_single_query_string() {
        let args: WebSearchArgs =
            serde_json::from_value(json!({"queries": "rust async", "topic": "news"})).unwrap();
        assert_eq!(args.queries, vec!["rust async"]);
        assert_eq!(args.topic, SearchTopic::News);
        assert_eq!(args.max_results, None);
    }

    #[test]
    fn test_failure_envelope() {
        let envelope: Value =
            serde_json::from_str(&failure_envelope(&["q".to_string()])).unwrap();
        assert_eq!(envelope["success"], json!(false));
        assert_eq!(envelope["query"], json!(["q"]));
        assert_eq!(envelope["error"], json!(NO_RESULTS_MESSAGE));
    }
}
