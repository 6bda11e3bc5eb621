//! Web search and page fetching tools.

pub mod fetch;
pub mod search;

use std::sync::Arc;

use crate::core::{Config, ToolError};
use crate::tools::LocalToolProvider;

pub use fetch::{extract_main_text, ExtractOptions, FetchWebpageTool, PageFetcher, SummarizeUrlTool};
pub use search::{
    format_results, BraveSearch, DuckDuckGoSearch, FallbackSearch, SearchBackend, SearchResult,
    SearchWebTool,
};

pub(crate) const USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// Reads a successful response body, refusing anything over `max_bytes`.
///
/// The declared length is checked up front; the streamed size is checked as
/// chunks arrive, so an unannounced oversized body is cut off early.
pub(crate) async fn read_capped(
    response: reqwest::Response,
    max_bytes: usize,
) -> Result<Vec<u8>, ToolError> {
    let mut response = response.error_for_status()?;
    let too_large =
        || ToolError::ExecutionError(format!("response body exceeds {max_bytes} bytes"));

    if response
        .content_length()
        .is_some_and(|length| length > max_bytes as u64)
    {
        return Err(too_large());
    }

    let mut body = Vec::new();
    while let Some(chunk) = response.chunk().await? {
        if body.len() + chunk.len() > max_bytes {
            return Err(too_large());
        }
        body.extend_from_slice(&chunk);
    }
    Ok(body)
}

/// `search_web`, `fetch_webpage` and `summarize_url` as one provider.
pub fn web_tools(config: &Config) -> Result<LocalToolProvider, ToolError> {
    let search = FallbackSearch::from_config(&config.search)?;
    let fetcher = Arc::new(PageFetcher::new(&config.fetch)?);

    Ok(LocalToolProvider::new("websearch")
        .with_tool(SearchWebTool::new(
            Box::new(search),
            config.search.max_results,
        ))
        .with_tool(FetchWebpageTool::new(Arc::clone(&fetcher)))
        .with_tool(SummarizeUrlTool::new(fetcher)))
}
