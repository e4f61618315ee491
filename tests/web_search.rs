mod common;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Result, bail};
use async_trait::async_trait;
use serde_json::{Value, json};

use common::*;
use deep_researcher::ModelError;
use deep_researcher::config::{ModelSettings, SearchConfig};
use deep_researcher::llm::client::ToolCall;
use deep_researcher::llm::tools::web_search::NO_RESULTS_MESSAGE;
use deep_researcher::llm::tools::{ToolRegistry, WEB_SEARCH, WebSearchTool};
use deep_researcher::search::{
    FetchProvider, FetchedPage, SearchFilters, SearchHit, SearchProvider,
};

struct FakeSearch {
    results: HashMap<String, Vec<SearchHit>>,
    failing: Vec<String>,
}

#[async_trait]
impl SearchProvider for FakeSearch {
    fn name(&self) -> &str {
        "fake"
    }

    async fn search(
        &self,
        query: &str,
        _max_results: usize,
        _filters: &SearchFilters,
    ) -> Result<Vec<SearchHit>> {
        if self.failing.iter().any(|failing| failing == query) {
            bail!("search backend rejected '{}'", query);
        }
        Ok(self.results.get(query).cloned().unwrap_or_default())
    }
}

#[derive(Default)]
struct FakeFetch {
    pages: HashMap<String, String>,
    requested: Mutex<Vec<String>>,
}

#[async_trait]
impl FetchProvider for FakeFetch {
    async fn fetch(&self, urls: &[String]) -> Vec<FetchedPage> {
        self.requested.lock().unwrap().extend(urls.iter().cloned());
        urls.iter()
            .map(|url| match self.pages.get(url) {
                Some(content) => FetchedPage {
                    url: url.clone(),
                    success: true,
                    content: content.clone(),
                },
                None => FetchedPage {
                    url: url.clone(),
                    success: false,
                    content: "404".to_string(),
                },
            })
            .collect()
    }
}

fn hit(url: &str, raw: Option<&str>) -> SearchHit {
    SearchHit {
        url: url.to_string(),
        title: format!("title {url}"),
        content: Some(format!("snippet {url}")),
        raw_content: raw.map(str::to_string),
    }
}

fn long_text(tag: &str) -> String {
    format!("{tag} ").repeat(40)
}

fn tool(
    search: FakeSearch,
    fetch: Arc<FakeFetch>,
    summarizer: Arc<ScriptedModel>,
    config: SearchConfig,
) -> WebSearchTool {
    WebSearchTool::new(
        Arc::new(search),
        fetch,
        summarizer,
        config,
        ModelSettings::new(SUMMARY_MODEL, 512),
        "Summarize: {webpage_content}".to_string(),
    )
}

async fn run(tool: WebSearchTool, arguments: Value) -> String {
    let mut registry = ToolRegistry::new();
    registry.register(tool);
    registry
        .execute(&ToolCall::new("s1", WEB_SEARCH, arguments))
        .await
}

fn summary_for(call: &ModelCall) -> Reply {
    let prompt = call.last_user_text();
    if prompt.contains("alpha") {
        Reply::text(r#"```json
{"summary": "alpha summary", "key_excerpts": ["alpha quote"]}
```"#)
    } else {
        Reply::error(ModelError::Provider("summarizer down".to_string()))
    }
}

#[tokio::test]
async fn dedupes_fetches_and_summarizes() {
    let alpha = long_text("alpha");
    let search = FakeSearch {
        results: HashMap::from([
            (
                "q1".to_string(),
                vec![hit("https://a.example", Some(&alpha)), hit("https://b.example", None)],
            ),
            (
                "q2".to_string(),
                vec![hit("https://a.example", Some("other")), hit("https://c.example", Some("tiny"))],
            ),
        ]),
        failing: Vec::new(),
    };
    let fetch = Arc::new(FakeFetch {
        pages: HashMap::from([("https://b.example".to_string(), long_text("beta"))]),
        ..FakeFetch::default()
    });
    let summarizer = ScriptedModel::new(summary_for);

    let output = run(
        tool(search, fetch.clone(), summarizer.clone(), SearchConfig::default()),
        json!({"queries": ["q1", "q2"]}),
    )
    .await;
    let envelope: Value = serde_json::from_str(&output).unwrap();

    assert_eq!(envelope["success"], json!(true));
    assert_eq!(envelope["query"], json!(["q1", "q2"]));
    let results = envelope["results"].as_array().unwrap();
    let urls: Vec<&str> = results.iter().map(|r| r["url"].as_str().unwrap()).collect();
    assert_eq!(urls, vec!["https://a.example", "https://b.example", "https://c.example"]);
    assert_eq!(results[0]["query"], json!("q1"));
    assert_eq!(results[2]["query"], json!("q2"));

    // a 的正文足够长，不需要抓取
    let mut requested = fetch.requested.lock().unwrap().clone();
    requested.sort();
    assert_eq!(requested, vec!["https://b.example", "https://c.example"]);

    assert_eq!(
        results[0]["summary"],
        json!("<summary>\nalpha summary\n</summary>\n\n<key_excerpts>\nalpha quote\n</key_excerpts>")
    );
    // 摘要失败时回退为原始正文
    assert_eq!(results[1]["summary"], json!(long_text("beta")));
    // 抓取失败时保留原始短正文
    assert_eq!(results[2]["summary"], json!("tiny"));
    assert_eq!(summarizer.calls().len(), 3);
}

#[tokio::test]
async fn summarization_timeout_falls_back_to_raw_content() {
    let search = FakeSearch {
        results: HashMap::from([(
            "slow".to_string(),
            vec![hit("https://slow.example", Some(&long_text("gamma")))],
        )]),
        failing: Vec::new(),
    };
    let summarizer =
        ScriptedModel::new(|_| Reply::text("{\"summary\": \"late\"}").after(Duration::from_secs(10)));
    let config = SearchConfig {
        summarization_timeout_secs: 1,
        ..SearchConfig::default()
    };

    let output = run(
        tool(search, Arc::new(FakeFetch::default()), summarizer, config),
        json!({"queries": "slow"}),
    )
    .await;
    let envelope: Value = serde_json::from_str(&output).unwrap();

    assert_eq!(envelope["results"][0]["summary"], json!(long_text("gamma")));
}

#[tokio::test]
async fn empty_results_produce_failure_envelope() {
    let search = FakeSearch {
        results: HashMap::new(),
        failing: Vec::new(),
    };
    let output = run(
        tool(
            search,
            Arc::new(FakeFetch::default()),
            ScriptedModel::new(|_| Reply::text("unused")),
            SearchConfig::default(),
        ),
        json!({"queries": ["nothing"]}),
    )
    .await;
    let envelope: Value = serde_json::from_str(&output).unwrap();

    assert_eq!(envelope["success"], json!(false));
    assert_eq!(envelope["error"], json!(NO_RESULTS_MESSAGE));
}

#[tokio::test]
async fn partial_search_failure_keeps_successful_queries() {
    let search = FakeSearch {
        results: HashMap::from([(
            "good".to_string(),
            vec![hit("https://good.example", Some(&long_text("alpha")))],
        )]),
        failing: vec!["bad".to_string()],
    };
    let output = run(
        tool(
            search,
            Arc::new(FakeFetch::default()),
            ScriptedModel::new(summary_for),
            SearchConfig::default(),
        ),
        json!({"queries": ["bad", "good"]}),
    )
    .await;
    let envelope: Value = serde_json::from_str(&output).unwrap();

    assert_eq!(envelope["success"], json!(true));
    assert_eq!(envelope["results"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn total_search_failure_becomes_error_result() {
    let search = FakeSearch {
        results: HashMap::new(),
        failing: vec!["bad".to_string()],
    };
    let output = run(
        tool(
            search,
            Arc::new(FakeFetch::default()),
            ScriptedModel::new(|_| Reply::text("unused")),
            SearchConfig::default(),
        ),
        json!({"queries": ["bad"]}),
    )
    .await;

    assert!(output.starts_with("Error executing tool:"));
    assert!(output.contains("search backend rejected"));
}

#[tokio::test]
async fn invalid_arguments_become_error_result() {
    let search = FakeSearch {
        results: HashMap::new(),
        failing: Vec::new(),
    };
    let output = run(
        tool(
            search,
            Arc::new(FakeFetch::default()),
            ScriptedModel::new(|_| Reply::text("unused")),
            SearchConfig::default(),
        ),
        json!({"topic": "general"}),
    )
    .await;

    assert!(output.starts_with("Error executing tool: invalid web_search arguments"));
}
