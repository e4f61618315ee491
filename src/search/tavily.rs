use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;

use super::{SearchFilters, SearchHit, SearchProvider};
use crate::config::SearchConfig;

/// Tavily 搜索服务
pub struct TavilySearchProvider {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct TavilyResponse {
    #[serde(default)]
    results: Vec<TavilyResult>,
}

#[derive(Debug, Deserialize)]
struct TavilyResult {
    #[serde(default)]
    url: String,
    #[serde(default)]
    title: String,
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    raw_content: Option<String>,
}

impl TavilySearchProvider {
    pub fn new(config: &SearchConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.fetch_timeout_secs))
            .build()
            .context("Failed to build search http client")?;
        Ok(Self {
            client,
            api_key: config.api_key.clone(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl SearchProvider for TavilySearchProvider {
    fn name(&self) -> &str {
        "Tavily"
    }

    async fn search(
        &self,
        query: &str,
        max_results: usize,
        filters: &SearchFilters,
    ) -> Result<Vec<SearchHit>> {
        let mut body = json!({
            "api_key": self.api_key,
            "query": query,
            "max_results": max_results,
            "topic": filters.topic.as_str(),
            "include_answer": false,
            "include_raw_content": true,
        });
        if !filters.include_domains.is_empty() {
            body["include_domains"] = json!(filters.include_domains);
        }
        if !filters.exclude_domains.is_empty() {
            body["exclude_domains"] = json!(filters.exclude_domains);
        }

        let response = self
            .client
            .post(format!("{}/search", self.base_url))
            .json(&body)
            .send()
            .await
            .context("Tavily request failed")?;

        let status = response.status();
        if !status.is_success() {
            let err_body = response.text().await.unwrap_or_default();
            bail!("Tavily API error ({}): {}", status.as_u16(), err_body);
        }

        let data: TavilyResponse = response
            .json()
            .await
            .context("Failed to parse Tavily response")?;

        Ok(data
            .results
            .into_iter()
            .filter(|item| !item.url.is_empty())
            .map(|item| SearchHit {
                url: item.url,
                title: item.title,
                content: item.content,
                raw_content: item.raw_content.filter(|raw| !raw.trim().is_empty()),
            })
            .collect())
    }
}
