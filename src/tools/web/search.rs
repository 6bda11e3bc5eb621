use std::time::Duration;

use async_trait::async_trait;
use log::{debug, info, warn};
use scraper::{ElementRef, Html, Selector};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::core::config::SearchConfig;
use crate::core::ToolError;
use crate::tools::types::{str_arg, usize_arg};
use crate::tools::{Tool, ToolDefinition};

use super::{read_capped, USER_AGENT};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchResult {
    pub title: String,
    pub snippet: String,
    pub url: String,
}

/// A source of web search results.
#[async_trait]
pub trait SearchBackend: Send + Sync {
    fn name(&self) -> &str;

    /// At most `max_results` results, in the order the source ranks them.
    async fn search(&self, query: &str, max_results: usize)
        -> Result<Vec<SearchResult>, ToolError>;
}

/// Brave Search web API. Needs a subscription token.
pub struct BraveSearch {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    max_body_bytes: usize,
}

#[derive(Debug, Deserialize)]
struct BraveResponse {
    #[serde(default)]
    web: Option<BraveWebResults>,
}

#[derive(Debug, Deserialize)]
struct BraveWebResults {
    #[serde(default)]
    results: Vec<BraveWebResult>,
}

#[derive(Debug, Deserialize)]
struct BraveWebResult {
    #[serde(default)]
    title: String,
    #[serde(default)]
    url: String,
    #[serde(default)]
    description: String,
}

impl BraveSearch {
    pub fn new(
        client: reqwest::Client,
        base_url: &str,
        api_key: impl Into<String>,
        max_body_bytes: usize,
    ) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            max_body_bytes,
        }
    }
}

#[async_trait]
impl SearchBackend for BraveSearch {
    fn name(&self) -> &str {
        "brave"
    }

    async fn search(
        &self,
        query: &str,
        max_results: usize,
    ) -> Result<Vec<SearchResult>, ToolError> {
        let count = max_results.to_string();
        let response = self
            .client
            .get(format!("{}/res/v1/web/search", self.base_url))
            .query(&[("q", query), ("count", count.as_str())])
            .header("Accept", "application/json")
            .header("X-Subscription-Token", &self.api_key)
            .send()
            .await?;
        let body = read_capped(response, self.max_body_bytes).await?;
        let response: BraveResponse = serde_json::from_slice(&body)
            .map_err(|e| ToolError::ExecutionError(format!("unreadable Brave response: {e}")))?;

        Ok(response
            .web
            .map(|web| web.results)
            .unwrap_or_default()
            .into_iter()
            .map(|r| SearchResult {
                title: r.title,
                snippet: r.description,
                url: r.url,
            })
            .take(max_results)
            .collect())
    }
}

/// DuckDuckGo's HTML endpoint, scraped.
pub struct DuckDuckGoSearch {
    client: reqwest::Client,
    base_url: String,
    max_body_bytes: usize,
}

impl DuckDuckGoSearch {
    pub fn new(client: reqwest::Client, base_url: &str, max_body_bytes: usize) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            max_body_bytes,
        }
    }
}

#[async_trait]
impl SearchBackend for DuckDuckGoSearch {
    fn name(&self) -> &str {
        "duckduckgo"
    }

    async fn search(
        &self,
        query: &str,
        max_results: usize,
    ) -> Result<Vec<SearchResult>, ToolError> {
        let response = self
            .client
            .get(format!("{}/html/", self.base_url))
            .query(&[("q", query)])
            .send()
            .await?;
        let body = read_capped(response, self.max_body_bytes).await?;
        parse_duckduckgo_html(&String::from_utf8_lossy(&body), max_results)
    }
}

fn selector(css: &str) -> Result<Selector, ToolError> {
    Selector::parse(css).map_err(|e| ToolError::ExecutionError(format!("bad selector {css}: {e}")))
}

fn element_text(element: ElementRef<'_>) -> String {
    element.text().collect::<String>().trim().to_string()
}

/// Extracts results from a DuckDuckGo HTML results page.
///
/// Entries without a title or link are skipped; protocol-relative links get
/// an `https:` scheme.
pub fn parse_duckduckgo_html(html: &str, max_results: usize) -> Result<Vec<SearchResult>, ToolError> {
    let document = Html::parse_document(html);
    let body_sel = selector(".result__body")?;
    let title_sel = selector(".result__title")?;
    let snippet_sel = selector(".result__snippet")?;
    let link_sel = selector(".result__url")?;

    let results = document
        .select(&body_sel)
        .take(max_results)
        .filter_map(|result| {
            let title = result.select(&title_sel).next().map(element_text)?;
            let snippet = result
                .select(&snippet_sel)
                .next()
                .map(element_text)
                .unwrap_or_default();
            let url = result
                .select(&link_sel)
                .next()
                .and_then(|a| a.value().attr("href"))
                .unwrap_or_default();
            if title.is_empty() || url.is_empty() {
                return None;
            }
            let url = match url.strip_prefix("//") {
                Some(rest) => format!("https://{rest}"),
                None => url.to_string(),
            };
            Some(SearchResult {
                title,
                snippet,
                url,
            })
        })
        .collect();
    Ok(results)
}

/// Tries each backend in order and returns the first success.
pub struct FallbackSearch {
    backends: Vec<Box<dyn SearchBackend>>,
}

impl FallbackSearch {
    pub fn new(backends: Vec<Box<dyn SearchBackend>>) -> Self {
        Self { backends }
    }

    /// Brave first when a key is configured, DuckDuckGo always.
    pub fn from_config(config: &SearchConfig) -> Result<Self, ToolError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(USER_AGENT)
            .build()?;

        let mut backends: Vec<Box<dyn SearchBackend>> = Vec::new();
        match &config.brave_api_key {
            Some(key) => backends.push(Box::new(BraveSearch::new(
                client.clone(),
                &config.brave_base_url,
                key.clone(),
                config.max_body_bytes,
            ))),
            None => info!("[WebSearch] No Brave API key, using DuckDuckGo only"),
        }
        backends.push(Box::new(DuckDuckGoSearch::new(
            client,
            &config.duckduckgo_base_url,
            config.max_body_bytes,
        )));
        Ok(Self::new(backends))
    }
}

#[async_trait]
impl SearchBackend for FallbackSearch {
    fn name(&self) -> &str {
        "fallback"
    }

    async fn search(
        &self,
        query: &str,
        max_results: usize,
    ) -> Result<Vec<SearchResult>, ToolError> {
        let mut failures = Vec::new();
        for backend in &self.backends {
            match backend.search(query, max_results).await {
                Ok(mut results) => {
                    results.truncate(max_results);
                    debug!(
                        "[WebSearch] {} returned {} results",
                        backend.name(),
                        results.len()
                    );
                    return Ok(results);
                }
                Err(e) => {
                    warn!("[WebSearch] {} failed: {e}", backend.name());
                    failures.push(format!("{}: {e}", backend.name()));
                }
            }
        }
        Err(ToolError::ExecutionError(format!(
            "Search failed ({})",
            failures.join("; ")
        )))
    }
}

/// Numbered list used as the tool's text output.
pub fn format_results(query: &str, results: &[SearchResult]) -> String {
    if results.is_empty() {
        return "No search results found.".to_string();
    }
    let list = results
        .iter()
        .enumerate()
        .map(|(i, r)| format!("{}. **{}**\n   {}\n   URL: {}", i + 1, r.title, r.snippet, r.url))
        .collect::<Vec<_>>()
        .join("\n\n");
    format!("Search results for \"{query}\":\n\n{list}")
}

pub struct SearchWebTool {
    backend: Box<dyn SearchBackend>,
    default_max_results: usize,
}

impl SearchWebTool {
    pub fn new(backend: Box<dyn SearchBackend>, default_max_results: usize) -> Self {
        Self {
            backend,
            default_max_results,
        }
    }
}

#[async_trait]
impl Tool for SearchWebTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "search_web".to_string(),
            description: "Search the web. Returns results with titles, snippets, and URLs. \
                Use this to find current information, news, or answers to questions."
                .to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "query": {
                        "type": "string",
                        "description": "The search query"
                    },
                    "max_results": {
                        "type": "number",
                        "description": format!(
                            "Maximum number of results to return (default: {})",
                            self.default_max_results
                        )
                    }
                },
                "required": ["query"]
            }),
        }
    }

    async fn execute(&self, arguments: &Value) -> Result<String, ToolError> {
        let query = str_arg(arguments, "query")?.trim();
        if query.is_empty() {
            return Err(ToolError::InvalidArgument("'query' is empty".to_string()));
        }
        let max_results = usize_arg(arguments, "max_results").unwrap_or(self.default_max_results);

        info!("[WebSearch] Searching for \"{query}\"");
        let results = self.backend.search(query, max_results).await?;
        Ok(format_results(query, &results))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    const DDG_PAGE: &str = r#"
        <html><body>
          <div class="result"><div class="result__body">
            <h2 class="result__title"><a href="x">  First result </a></h2>
            <a class="result__snippet">Snippet one</a>
            <a class="result__url" href="//example.com/one">example.com/one</a>
          </div></div>
          <div class="result"><div class="result__body">
            <h2 class="result__title"></h2>
            <a class="result__url" href="https://skipped.example">skipped</a>
          </div></div>
          <div class="result"><div class="result__body">
            <h2 class="result__title">Third</h2>
            <a class="result__url" href="https://example.org/three">example.org</a>
          </div></div>
        </body></html>"#;

    #[test]
    fn test_parse_duckduckgo_html() {
        let results = parse_duckduckgo_html(DDG_PAGE, 10).unwrap();
        assert_eq!(
            results,
            vec![
                SearchResult {
                    title: "First result".to_string(),
                    snippet: "Snippet one".to_string(),
                    url: "https://example.com/one".to_string(),
                },
                SearchResult {
                    title: "Third".to_string(),
                    snippet: String::new(),
                    url: "https://example.org/three".to_string(),
                },
            ]
        );
    }

    #[test]
    fn test_parse_duckduckgo_html_caps_results() {
        let results = parse_duckduckgo_html(DDG_PAGE, 1).unwrap();
        assert_eq!(results.len(), 1);
    }

    #[test]
    fn test_format_results() {
        let results = vec![SearchResult {
            title: "Rust".to_string(),
            snippet: "A language".to_string(),
            url: "https://rust-lang.org".to_string(),
        }];
        assert_eq!(
            format_results("rust", &results),
            "Search results for \"rust\":\n\n1. **Rust**\n   A language\n   URL: https://rust-lang.org"
        );
        assert_eq!(format_results("rust", &[]), "No search results found.");
    }

    struct Scripted {
        name: &'static str,
        results: Option<usize>,
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl SearchBackend for Scripted {
        fn name(&self) -> &str {
            self.name
        }

        async fn search(&self, _q: &str, _max: usize) -> Result<Vec<SearchResult>, ToolError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match self.results {
                Some(n) => Ok((0..n)
                    .map(|i| SearchResult {
                        title: format!("{} {i}", self.name),
                        snippet: String::new(),
                        url: format!("https://{}.example/{i}", self.name),
                    })
                    .collect()),
                None => Err(ToolError::Transport(format!("{} is down", self.name))),
            }
        }
    }

    fn scripted(name: &'static str, results: Option<usize>) -> (Box<dyn SearchBackend>, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let backend = Scripted {
            name,
            results,
            calls: Arc::clone(&calls),
        };
        (Box::new(backend), calls)
    }

    #[tokio::test]
    async fn test_fallback_uses_secondary_on_failure() {
        let (brave, _) = scripted("brave", None);
        let (ddg, ddg_calls) = scripted("ddg", Some(3));
        let search = FallbackSearch::new(vec![brave, ddg]);

        let results = search.search("q", 2).await.unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].title, "ddg 0");
        assert_eq!(ddg_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_fallback_skips_secondary_on_success() {
        let (brave, _) = scripted("brave", Some(1));
        let (ddg, ddg_calls) = scripted("ddg", Some(1));
        let search = FallbackSearch::new(vec![brave, ddg]);

        assert_eq!(search.search("q", 5).await.unwrap()[0].title, "brave 0");
        assert_eq!(ddg_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_fallback_aggregates_failures() {
        let (brave, _) = scripted("brave", None);
        let (ddg, _) = scripted("ddg", None);
        let search = FallbackSearch::new(vec![brave, ddg]);

        let message = search.search("q", 5).await.unwrap_err().to_string();
        assert!(message.contains("brave is down"));
        assert!(message.contains("ddg is down"));
    }

    #[tokio::test]
    async fn test_tool_requires_query() {
        let (backend, calls) = scripted("ddg", Some(1));
        let tool = SearchWebTool::new(backend, 10);
        assert!(matches!(
            tool.execute(&json!({"query": "  "})).await,
            Err(ToolError::InvalidArgument(_))
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }
}
