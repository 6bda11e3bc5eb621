use std::sync::Arc;

use axum::{response::Html, routing::get, Router};
use chat_relay::core::{Config, ToolError};
use chat_relay::tools::web::{
    BraveSearch, DuckDuckGoSearch, FetchWebpageTool, PageFetcher, SearchBackend,
};
use chat_relay::tools::Tool;
use serde_json::json;

fn article(chars: usize) -> String {
    "x".repeat(chars)
}

async fn pages() -> String {
    let short = format!("<html><body><p>{}</p></body></html>", article(30));
    let container = format!(
        "<html><body><nav>menu</nav><article>{}</article><aside>ads</aside></body></html>",
        article(250)
    );
    let huge = format!("<html><body><main>{}</main></body></html>", article(4096));

    let app = Router::new()
        .route("/short", get(move || async move { Html(short) }))
        .route("/container", get(move || async move { Html(container) }))
        .route("/huge", get(move || async move { Html(huge) }))
        .route("/html/", get(|| async { Html(results_page(2000)) }))
        .route(
            "/res/v1/web/search",
            get(|| async {
                axum::Json(json!({"web": {"results": [
                    {"title": "t", "url": "https://example.com", "description": "x".repeat(4096)}
                ]}}))
            }),
        );
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base = format!("http://{}", listener.local_addr().unwrap());
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    base
}

fn results_page(count: usize) -> String {
    let entry = r#"<div class="result__body"><h2 class="result__title">Title</h2>
        <a class="result__snippet">Snippet</a>
        <a class="result__url" href="https://example.com/">example.com</a></div>"#;
    format!("<html><body>{}</body></html>", entry.repeat(count))
}

fn fetcher(max_body_bytes: usize) -> Arc<PageFetcher> {
    let mut config = Config::default();
    config.fetch.max_body_bytes = max_body_bytes;
    Arc::new(PageFetcher::new(&config.fetch).unwrap())
}

#[tokio::test]
async fn test_short_page_has_no_content() {
    let base = pages().await;
    let result = fetcher(1024 * 1024)
        .fetch_text(&format!("{base}/short"), 5000)
        .await;
    assert!(matches!(result, Err(ToolError::EmptyContent(_))));
}

#[tokio::test]
async fn test_container_text_is_returned() {
    let base = pages().await;
    let tool = FetchWebpageTool::new(fetcher(1024 * 1024));
    let url = format!("{base}/container");

    let output = tool.execute(&json!({"url": url})).await.unwrap();
    assert_eq!(output, format!("Content from {url}:\n\n{}", article(250)));

    let truncated = tool
        .execute(&json!({"url": url, "max_length": 100}))
        .await
        .unwrap();
    assert!(truncated.ends_with(&format!("\n\n{}", article(100))));
}

#[tokio::test]
async fn test_body_over_cap_is_rejected() {
    let base = pages().await;
    let result = fetcher(1024)
        .fetch_text(&format!("{base}/huge"), 5000)
        .await;
    assert!(matches!(result, Err(ToolError::ExecutionError(_))));
}

#[tokio::test]
async fn test_non_http_url_is_rejected() {
    let result = fetcher(1024).fetch_text("file:///etc/passwd", 5000).await;
    assert!(matches!(result, Err(ToolError::InvalidArgument(_))));
}

#[tokio::test]
async fn test_oversized_search_pages_are_rejected() {
    let base = pages().await;
    let client = reqwest::Client::new();

    let duckduckgo = DuckDuckGoSearch::new(client.clone(), &base, 4096);
    let result = duckduckgo.search("rust", 10).await;
    assert!(matches!(result, Err(ToolError::ExecutionError(_))));

    let brave = BraveSearch::new(client, &base, "key", 1024);
    let result = brave.search("rust", 10).await;
    assert!(matches!(result, Err(ToolError::ExecutionError(_))));
}

#[tokio::test]
async fn test_search_page_within_cap_is_parsed() {
    let base = pages().await;
    let duckduckgo = DuckDuckGoSearch::new(reqwest::Client::new(), &base, 5 * 1024 * 1024);
    let results = duckduckgo.search("rust", 3).await.unwrap();
    assert_eq!(results.len(), 3);
    assert_eq!(results[0].url, "https://example.com/");
}
