use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, info};
use scraper::{Html, Selector};
use serde_json::{json, Value};
use url::Url;

use crate::core::config::FetchConfig;
use crate::core::ToolError;
use crate::tools::types::{str_arg, usize_arg};
use crate::tools::{Tool, ToolDefinition};

use super::{read_capped, USER_AGENT};

/// Elements that never hold page content.
const STRIPPED: &str = "script, style, nav, header, footer, aside, .advertisement";

/// Content containers, most specific first.
const CONTENT_SELECTORS: [&str; 7] = [
    "main",
    "article",
    "[role=\"main\"]",
    ".content",
    "#content",
    ".post-content",
    ".article-content",
];

const SUMMARY_MAX_LENGTH: usize = 3000;

/// Thresholds applied when pulling readable text out of a page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExtractOptions {
    /// Output is cut to this many characters
    pub max_length: usize,
    /// A container qualifies only with more text than this
    pub min_candidate_chars: usize,
    /// Less text than this is treated as an empty page
    pub min_content_chars: usize,
}

impl ExtractOptions {
    #[must_use]
    pub const fn with_max_length(mut self, max_length: usize) -> Self {
        self.max_length = max_length;
        self
    }
}

impl From<&FetchConfig> for ExtractOptions {
    fn from(config: &FetchConfig) -> Self {
        Self {
            max_length: config.max_length,
            min_candidate_chars: config.min_candidate_chars,
            min_content_chars: config.min_content_chars,
        }
    }
}

fn selector(css: &str) -> Result<Selector, ToolError> {
    Selector::parse(css).map_err(|e| ToolError::ExecutionError(format!("bad selector {css}: {e}")))
}

/// Extracts the main readable text of an HTML document.
///
/// Non-content elements are dropped first. The first content container whose
/// text is long enough wins, otherwise the whole body is used. Whitespace runs
/// collapse to single spaces and the result is cut to `max_length` characters.
pub fn extract_main_text(html: &str, options: &ExtractOptions) -> Result<String, ToolError> {
    let mut document = Html::parse_document(html);

    let stripped = selector(STRIPPED)?;
    let ids: Vec<_> = document.select(&stripped).map(|element| element.id()).collect();
    for id in ids {
        if let Some(mut node) = document.tree.get_mut(id) {
            node.detach();
        }
    }

    let mut content = None;
    for css in CONTENT_SELECTORS {
        let Some(candidate) = document.select(&selector(css)?).next() else {
            continue;
        };
        let text = candidate.text().collect::<String>();
        let text = text.trim();
        if text.chars().count() > options.min_candidate_chars {
            debug!("[Fetch] Using content container '{css}'");
            content = Some(text.to_string());
            break;
        }
    }
    let content = match content {
        Some(content) => content,
        None => document
            .select(&selector("body")?)
            .next()
            .map(|body| body.text().collect::<String>())
            .unwrap_or_default(),
    };

    let text: String = content
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .chars()
        .take(options.max_length)
        .collect();

    let length = text.chars().count();
    if length < options.min_content_chars {
        return Err(ToolError::EmptyContent(format!(
            "{length} characters of text"
        )));
    }
    Ok(text)
}

/// Only absolute `http`/`https` URLs are fetched.
pub fn parse_http_url(raw: &str) -> Result<Url, ToolError> {
    let url = Url::parse(raw.trim())
        .map_err(|e| ToolError::InvalidArgument(format!("invalid URL '{raw}': {e}")))?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        scheme => Err(ToolError::InvalidArgument(format!(
            "unsupported URL scheme '{scheme}'"
        ))),
    }
}

/// Downloads pages with a timeout and a body size cap.
pub struct PageFetcher {
    client: reqwest::Client,
    max_body_bytes: usize,
    options: ExtractOptions,
}

impl PageFetcher {
    pub fn new(config: &FetchConfig) -> Result<Self, ToolError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(USER_AGENT)
            .build()?;
        Ok(Self {
            client,
            max_body_bytes: config.max_body_bytes,
            options: ExtractOptions::from(config),
        })
    }

    pub const fn default_max_length(&self) -> usize {
        self.options.max_length
    }

    /// Fetches `url` and returns at most `max_length` characters of its main text.
    pub async fn fetch_text(&self, url: &str, max_length: usize) -> Result<String, ToolError> {
        let url = parse_http_url(url)?;
        info!("[Fetch] Fetching {url}");
        let html = self.download(url).await?;
        let text = extract_main_text(&html, &self.options.with_max_length(max_length))?;
        info!("[Fetch] Extracted {} characters", text.chars().count());
        Ok(text)
    }

    async fn download(&self, url: Url) -> Result<String, ToolError> {
        let response = self.client.get(url).send().await?;
        let body = read_capped(response, self.max_body_bytes).await?;
        Ok(String::from_utf8_lossy(&body).into_owned())
    }
}

pub struct FetchWebpageTool {
    fetcher: Arc<PageFetcher>,
}

impl FetchWebpageTool {
    pub fn new(fetcher: Arc<PageFetcher>) -> Self {
        Self { fetcher }
    }
}

#[async_trait]
impl Tool for FetchWebpageTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "fetch_webpage".to_string(),
            description: "Fetch and extract the main content from a webpage. Returns the text \
                content of the page. Use this to read articles, documentation, or any web page."
                .to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "url": {"type": "string", "description": "The URL to fetch"},
                    "max_length": {
                        "type": "number",
                        "description": format!(
                            "Maximum content length in characters (default: {})",
                            self.fetcher.default_max_length()
                        )
                    }
                },
                "required": ["url"]
            }),
        }
    }

    async fn execute(&self, arguments: &Value) -> Result<String, ToolError> {
        let url = str_arg(arguments, "url")?;
        let max_length =
            usize_arg(arguments, "max_length").unwrap_or(self.fetcher.default_max_length());
        let text = self.fetcher.fetch_text(url, max_length).await?;
        Ok(format!("Content from {url}:\n\n{text}"))
    }
}

pub struct SummarizeUrlTool {
    fetcher: Arc<PageFetcher>,
}

impl SummarizeUrlTool {
    pub fn new(fetcher: Arc<PageFetcher>) -> Self {
        Self { fetcher }
    }
}

#[async_trait]
impl Tool for SummarizeUrlTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "summarize_url".to_string(),
            description: "Fetch a URL and return content for summarization. Use this when a \
                user asks you to summarize a webpage or article."
                .to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "url": {"type": "string", "description": "The URL to fetch and summarize"}
                },
                "required": ["url"]
            }),
        }
    }

    async fn execute(&self, arguments: &Value) -> Result<String, ToolError> {
        let url = str_arg(arguments, "url")?;
        let text = self.fetcher.fetch_text(url, SUMMARY_MAX_LENGTH).await?;
        Ok(format!(
            "Content from {url} (please provide a concise summary):\n\n{text}"
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const OPTIONS: ExtractOptions = ExtractOptions {
        max_length: 5000,
        min_candidate_chars: 200,
        min_content_chars: 50,
    };

    fn words(count: usize) -> String {
        (0..count).map(|i| format!("word{i}")).collect::<Vec<_>>().join("   \n ")
    }

    #[test]
    fn test_prefers_first_qualifying_container() {
        let article = words(60);
        let html = format!(
            "<html><body><nav>{}</nav><main>short</main><article>{article}</article></body></html>",
            words(80)
        );
        let text = extract_main_text(&html, &OPTIONS).unwrap();
        assert_eq!(text, article.split_whitespace().collect::<Vec<_>>().join(" "));
    }

    #[test]
    fn test_falls_back_to_body_without_noise() {
        let html = format!(
            "<html><head><title>t</title></head><body>\
             <script>var x = 1;</script><header>Site header</header>\
             <p>{}</p><footer>footer text</footer></body></html>",
            words(12)
        );
        let text = extract_main_text(&html, &OPTIONS).unwrap();
        assert!(text.starts_with("word0 word1"));
        assert!(!text.contains("var x"));
        assert!(!text.contains("Site header"));
        assert!(!text.contains("footer text"));
    }

    #[test]
    fn test_short_page_is_empty_content() {
        let html = "<html><body><p>Only thirty characters of text</p></body></html>";
        assert!(matches!(
            extract_main_text(html, &OPTIONS),
            Err(ToolError::EmptyContent(_))
        ));
    }

    #[test]
    fn test_truncates_to_max_length() {
        let html = format!("<html><body><main>{}</main></body></html>", "é".repeat(400));
        let text = extract_main_text(&html, &OPTIONS.with_max_length(100)).unwrap();
        assert_eq!(text.chars().count(), 100);
    }

    #[test]
    fn test_advertisement_is_removed() {
        let html = format!(
            "<html><body><main><div class=\"advertisement\">BUY NOW</div>{}</main></body></html>",
            words(60)
        );
        assert!(!extract_main_text(&html, &OPTIONS).unwrap().contains("BUY NOW"));
    }

    #[test]
    fn test_rejects_non_http_urls() {
        assert!(parse_http_url("https://example.com/a").is_ok());
        assert!(matches!(
            parse_http_url("file:///etc/passwd"),
            Err(ToolError::InvalidArgument(_))
        ));
        assert!(matches!(
            parse_http_url("not a url"),
            Err(ToolError::InvalidArgument(_))
        ));
    }
}
