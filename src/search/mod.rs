//! 搜索与网页抓取服务

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

mod fetch;
mod tavily;

pub use fetch::{HttpFetchProvider, html_to_text};
pub use tavily::TavilySearchProvider;

/// 搜索主题
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchTopic {
    #[default]
    General,
    News,
    Finance,
}

impl SearchTopic {
    pub fn as_str(&self) -> &'static str {
        match self {
            SearchTopic::General => "general",
            SearchTopic::News => "news",
            SearchTopic::Finance => "finance",
        }
    }
}

/// 搜索过滤条件
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchFilters {
    pub topic: SearchTopic,
    pub include_domains: Vec<String>,
    pub exclude_domains: Vec<String>,
}

/// 单条搜索结果
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchHit {
    pub url: String,
    pub title: String,
    /// 搜索服务返回的摘要片段
    pub content: Option<String>,
    /// 网页正文
    pub raw_content: Option<String>,
}

/// 网页抓取结果
#[derive(Debug, Clone, PartialEq)]
pub struct FetchedPage {
    pub url: String,
    pub success: bool,
    /// 成功时为网页正文，失败时为失败原因
    pub content: String,
}

/// 可插拔的搜索服务
#[async_trait]
pub trait SearchProvider: Send + Sync {
    fn name(&self) -> &str;

    async fn search(
        &self,
        query: &str,
        max_results: usize,
        filters: &SearchFilters,
    ) -> Result<Vec<SearchHit>>;
}

/// 可插拔的网页抓取服务，按输入顺序返回每个URL的结果
#[async_trait]
pub trait FetchProvider: Send + Sync {
    async fn fetch(&self, urls: &[String]) -> Vec<FetchedPage>;
}
