//! 网页搜索动作：调用 Exa search API，返回结果标题、链接、摘要与正文
//!
//! 需要 API Key（`[actions] web_search_api_key`），未配置时不注册；
//! 正文超过 max_result_chars 时截断并追加 ...[truncated]。

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::dialog::ActionKind;
use crate::tools::schema::parameters_schema;
use crate::tools::{parse_args, ActionError, ActionHandler, CallerContext};

pub const EXA_SEARCH_URL: &str = "https://api.exa.ai/search";

#[derive(Debug, Deserialize, JsonSchema)]
pub struct SearchAndContentsArgs {
    /// What to search the web for.
    pub query: String,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    results: Vec<SearchResult>,
}

#[derive(Debug, Deserialize)]
struct SearchResult {
    #[serde(default)]
    title: Option<String>,
    url: String,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    highlights: Vec<String>,
}

/// search_and_contents：检索网页并取回内容（取第一条结果）
pub struct WebSearch {
    client: Client,
    endpoint: String,
    api_key: String,
    max_result_chars: usize,
}

impl WebSearch {
    pub fn new(endpoint: &str, api_key: &str, timeout: Duration, max_result_chars: usize) -> Self {
        let client = Client::builder().timeout(timeout).build().unwrap_or_default();
        Self {
            client,
            endpoint: endpoint.to_string(),
            api_key: api_key.to_string(),
            max_result_chars,
        }
    }

    fn request_body(query: &str) -> Value {
        json!({
            "query": query,
            "useAutoprompt": true,
            "numResults": 1,
            "contents": {"text": true, "highlights": true},
        })
    }

    fn render(&self, response: SearchResponse) -> String {
        if response.results.is_empty() {
            return "No results found.".to_string();
        }
        let mut out = String::new();
        for r in response.results {
            out.push_str(&format!("Title: {}\nURL: {}\n", r.title.as_deref().unwrap_or("(untitled)"), r.url));
            if !r.highlights.is_empty() {
                out.push_str(&format!("Highlights: {}\n", r.highlights.join(" ... ")));
            }
            if let Some(text) = r.text {
                out.push_str(&truncate(&text, self.max_result_chars));
                out.push('\n');
            }
        }
        out.trim_end().to_string()
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() > max_chars {
        text.chars().take(max_chars).collect::<String>() + "\n...[truncated]"
    } else {
        text.to_string()
    }
}

#[async_trait]
impl ActionHandler for WebSearch {
    fn kind(&self) -> ActionKind {
        ActionKind::SearchAndContents
    }

    fn description(&self) -> &str {
        "Search for webpages based on the query and retrieve their contents."
    }

    fn parameters_schema(&self) -> Value {
        parameters_schema::<SearchAndContentsArgs>()
    }

    async fn invoke(&self, args: Value, _caller: &CallerContext) -> Result<String, ActionError> {
        let args: SearchAndContentsArgs = parse_args(args)?;
        let resp = self
            .client
            .post(&self.endpoint)
            .header("x-api-key", &self.api_key)
            .json(&Self::request_body(&args.query))
            .send()
            .await
            .map_err(|e| ActionError::Failed(format!("Request failed: {e}")))?;
        if !resp.status().is_success() {
            return Err(ActionError::Failed(format!("HTTP {}", resp.status())));
        }
        let response: SearchResponse = resp
            .json()
            .await
            .map_err(|e| ActionError::Failed(format!("Read body: {e}")))?;
        Ok(self.render(response))
    }
}
