use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use futures::future::join_all;
use regex::Regex;
use std::sync::LazyLock;
use std::time::Duration;
use tracing::debug;

use super::{FetchProvider, FetchedPage};

static SCRIPT_OR_STYLE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<(script|style|noscript)[^>]*>.*?</(script|style|noscript)>")
        .expect("valid script regex")
});
static BLOCK_END: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)<br\s*/?>|</(p|div|h[1-6]|li|tr|section|article)>").expect("valid block regex")
});
static TAG: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?s)<[^>]*>").expect("valid tag regex"));
static NUMERIC_ENTITY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"&#(\d+);").expect("valid entity regex"));

/// 基于HTTP GET的网页抓取
pub struct HttpFetchProvider {
    client: reqwest::Client,
}

impl HttpFetchProvider {
    pub fn new(timeout_secs: u64) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .user_agent("Mozilla/5.0 (compatible; deep-researcher/0.1)")
            .build()
            .context("Failed to build fetch http client")?;
        Ok(Self { client })
    }

    async fn fetch_one(&self, url: &str) -> Result<String> {
        let response = self.client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            bail!("HTTP {}", status.as_u16());
        }
        let is_html = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(|value| value.contains("html"))
            .unwrap_or(true);
        let body = response.text().await?;
        Ok(if is_html { html_to_text(&body) } else { body })
    }
}

#[async_trait]
impl FetchProvider for HttpFetchProvider {
    async fn fetch(&self, urls: &[String]) -> Vec<FetchedPage> {
        let pages = urls.iter().map(|url| async move {
            match self.fetch_one(url).await {
                Ok(content) => FetchedPage {
                    url: url.clone(),
                    success: !content.is_empty(),
                    content,
                },
                Err(e) => {
                    debug!("网页抓取失败 {}: {}", url, e);
                    FetchedPage {
                        url: url.clone(),
                        success: false,
                        content: e.to_string(),
                    }
                }
            }
        });
        join_all(pages).await
    }
}

/// 从HTML中提取纯文本
pub fn html_to_text(html: &str) -> String {
    let without_scripts = SCRIPT_OR_STYLE.replace_all(html, " ");
    let with_breaks = BLOCK_END.replace_all(&without_scripts, "\n");
    let stripped = TAG.replace_all(&with_breaks, " ");
    let decoded = NUMERIC_ENTITY.replace_all(&stripped, |captures: &regex::Captures| {
        captures[1]
            .parse::<u32>()
            .ok()
            .and_then(char::from_u32)
            .map(String::from)
            .unwrap_or_default()
    });
    let decoded = decoded
        .replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&amp;", "&");

    decoded
        .lines()
        .map(|line| line.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_html_to_text() {
        let html = r#"
        <html>
        <head><title>Test</title><style>body { color: red; }</style></head>
        <body>
            <h1>Hello World</h1>
            <p>This is a <b>test</b> paragraph.</p>
            <script>var x = 1;</script>
            <p>Second paragraph with &amp; entity&#33;</p>
        </body>
        </html>
        "#;

        let text = html_to_text(html);
        assert!(text.contains("Hello World"));
        assert!(text.contains("This is a test paragraph."));
        assert!(text.contains("Second paragraph with & entity!"));
        assert!(!text.contains("var x"));
        assert!(!text.contains("color: red"));
    }

    #[test]
    fn test_html_to_text_plain_input() {
        assert_eq!(html_to_text("just   text"), "just text");
    }
}
