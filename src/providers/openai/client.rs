use std::time::Duration;

use crate::core::{Config, LLMError};
use crate::eventsource::EventSourceExt;
use crate::providers::llm::{BoxStream, Completion, LLMClient};
use crate::providers::Message as LLMMessage;
use crate::tools::ToolDefinition as LLMToolDefinition;
use log::debug;
use reqwest::{Client, Response};

use super::stream::reassemble;
use super::types::{ChatCompletionObject, ChatCompletionRequest, Tool, ToolChoice};

/// Client for an OpenAI-compatible chat completions endpoint
///
/// Manages API key, configuration, and provides methods for sending messages
/// and streaming responses.
pub struct OpenAIClient {
    api_key: Option<String>,
    client: Client,
    config: Config,
}

impl OpenAIClient {
    /// Creates a new client from the loaded configuration
    ///
    /// # Arguments
    /// * `config` - Configuration settings; `config.api_key` is sent as a
    ///   bearer token when present
    pub fn new(config: Config) -> Result<Self, LLMError> {
        // The read timeout bounds silence between bytes, which also covers a
        // stalled streaming body.
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(config.openai.connect_timeout_secs))
            .read_timeout(Duration::from_secs(config.openai.timeout_secs))
            .build()?;
        Ok(Self {
            api_key: config.api_key.clone(),
            client,
            config,
        })
    }

    fn request<'a>(
        &'a self,
        messages: &'a [LLMMessage],
        tools: Option<&'a [LLMToolDefinition]>,
        stream: bool,
    ) -> ChatCompletionRequest<'a> {
        let tools: Option<Vec<Tool<'a>>> = tools
            .filter(|tools| !tools.is_empty())
            .map(|tools| tools.iter().map(Tool::from).collect());
        ChatCompletionRequest {
            model: self.config.get_model(),
            messages,
            temperature: Some(self.config.openai.temperature),
            stream,
            tool_choice: tools.as_ref().map(|_| ToolChoice::Auto),
            tools,
        }
    }

    /// Sends a chat completion request
    ///
    /// A non-2xx answer is returned as [`LLMError::Upstream`] with the status
    /// and body untouched.
    ///
    /// # Arguments
    /// * `request` - The chat completion request configuration
    /// * `timeout` - Whole-request timeout; streaming requests pass `None` and
    ///   are bounded only while waiting for the response headers
    pub async fn create_chat_completion<'a>(
        &self,
        request: &'a ChatCompletionRequest<'a>,
        timeout: Option<Duration>,
    ) -> Result<Response, LLMError> {
        debug!(
            "[OpenAI] POST {} (stream: {}, messages: {}, tools: {})",
            self.config.completions_url(),
            request.stream,
            request.messages.len(),
            request.tools.as_ref().map_or(0, Vec::len)
        );

        let mut builder = self.client.post(self.config.completions_url()).json(request);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }

        let wait = Duration::from_secs(self.config.openai.timeout_secs);
        let response = tokio::time::timeout(wait, builder.send())
            .await
            .map_err(|_| {
                LLMError::Timeout(format!(
                    "no response from the completion endpoint within {}s",
                    wait.as_secs()
                ))
            })??;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        Err(LLMError::Upstream {
            status: status.as_u16(),
            body,
        })
    }
}

#[async_trait::async_trait]
impl LLMClient for OpenAIClient {
    async fn query(
        &self,
        messages: &[LLMMessage],
        tools: Option<&[LLMToolDefinition]>,
    ) -> Result<Completion, LLMError> {
        let request = self.request(messages, tools, false);
        let timeout = Duration::from_secs(self.config.openai.timeout_secs);

        let response = self.create_chat_completion(&request, Some(timeout)).await?;
        let response_text = response
            .text()
            .await
            .map_err(|e| LLMError::ResponseFormat(format!("Failed to get response text: {e}")))?;
        let chat_response: ChatCompletionObject =
            serde_json::from_str(&response_text).map_err(|e| {
                LLMError::ResponseFormat(format!("Failed to parse completion response: {e}"))
            })?;

        if let Some(usage) = &chat_response.usage {
            debug!(
                "[OpenAI] {} used {} prompt + {} completion tokens",
                chat_response.model, usage.prompt_tokens, usage.completion_tokens
            );
        }

        let choice = chat_response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| LLMError::ResponseFormat("Response has no choices".to_string()))?;

        let message = LLMMessage::from(choice.message);
        let finish_reason = match choice.finish_reason {
            Some(reason) => reason.into(),
            None if message.tool_calls().is_some() => crate::providers::FinishReason::ToolCalls,
            None => crate::providers::FinishReason::Stop,
        };

        Ok(Completion {
            message,
            finish_reason,
        })
    }

    async fn query_streaming(
        &self,
        messages: &[LLMMessage],
        tools: Option<&[LLMToolDefinition]>,
    ) -> Result<BoxStream, LLMError> {
        let request = self.request(messages, tools, true);
        let response = self.create_chat_completion(&request, None).await?;
        Ok(reassemble(response.bytes_stream().events()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::FinishReason;
    use crate::providers::MessageChunk;
    use axum::{http::StatusCode, routing::post, Json, Router};
    use futures::StreamExt;
    use serde_json::{json, Value};

    async fn serve(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    fn client_for(base_url: String) -> OpenAIClient {
        let mut config = Config::default();
        config.openai.base_url = base_url;
        config.api_key = Some("test-key".to_string());
        OpenAIClient::new(config).unwrap()
    }

    #[tokio::test]
    async fn test_query_reads_tool_calls() {
        let app = Router::new().route(
            "/v1/chat/completions",
            post(|Json(body): Json<Value>| async move {
                assert_eq!(body["stream"], false);
                assert_eq!(body["tool_choice"], "auto");
                Json(json!({
                    "id": "x",
                    "choices": [{
                        "index": 0,
                        "finish_reason": "tool_calls",
                        "message": {
                            "role": "assistant",
                            "content": null,
                            "tool_calls": [{"id": "c1", "type": "function",
                                "function": {"name": "search_web", "arguments": "{\"query\":\"rust\"}"}}]
                        }
                    }]
                }))
            }),
        );
        let client = client_for(serve(app).await);
        let tools = vec![LLMToolDefinition {
            name: "search_web".to_string(),
            description: String::new(),
            parameters: json!({"type": "object"}),
        }];

        let completion = client
            .query(&[LLMMessage::user("search rust")], Some(&tools))
            .await
            .unwrap();
        assert!(completion.wants_tools());
        assert_eq!(completion.message.tool_calls().unwrap()[0].name, "search_web");
    }

    #[tokio::test]
    async fn test_upstream_error_is_passed_through() {
        let app = Router::new().route(
            "/v1/chat/completions",
            post(|| async { (StatusCode::TOO_MANY_REQUESTS, "{\"error\":\"slow down\"}") }),
        );
        let client = client_for(serve(app).await);

        match client.query(&[LLMMessage::user("hi")], None).await {
            Err(LLMError::Upstream { status, body }) => {
                assert_eq!(status, 429);
                assert_eq!(body, "{\"error\":\"slow down\"}");
            }
            other => panic!("expected upstream error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_query_streaming_yields_text() {
        let app = Router::new().route(
            "/v1/chat/completions",
            post(|Json(body): Json<Value>| async move {
                assert_eq!(body["stream"], true);
                assert!(body.get("tools").is_none());
                let sse = "data: {\"choices\":[{\"index\":0,\"delta\":{\"content\":\"Hi\"}}]}\n\n\
                           data: {\"choices\":[{\"index\":0,\"delta\":{\"content\":\" there\"},\"finish_reason\":\"stop\"}]}\n\n\
                           data: [DONE]\n\n";
                ([("content-type", "text/event-stream")], sse)
            }),
        );
        let client = client_for(serve(app).await);

        let chunks: Vec<_> = client
            .query_streaming(&[LLMMessage::user("hi")], None)
            .await
            .unwrap()
            .map(Result::unwrap)
            .collect()
            .await;
        assert_eq!(
            chunks,
            vec![
                MessageChunk::Text("Hi".to_string()),
                MessageChunk::Text(" there".to_string()),
                MessageChunk::End(FinishReason::Stop),
            ]
        );
    }

    #[tokio::test]
    async fn test_silent_upstream_times_out() {
        let app = Router::new().route(
            "/v1/chat/completions",
            post(|| async {
                tokio::time::sleep(std::time::Duration::from_secs(5)).await;
                "too late"
            }),
        );
        let mut config = Config::default();
        config.openai.base_url = serve(app).await;
        config.openai.timeout_secs = 1;
        let client = OpenAIClient::new(config).unwrap();

        let started = std::time::Instant::now();
        let result = client.query_streaming(&[LLMMessage::user("hi")], None).await;
        let err = match result {
            Ok(_) => panic!("expected a timeout"),
            Err(err) => err,
        };
        assert!(started.elapsed() < std::time::Duration::from_secs(4));
        assert_eq!(err.status_code(), 504);

        let started = std::time::Instant::now();
        let err = client.query(&[LLMMessage::user("hi")], None).await.unwrap_err();
        assert!(started.elapsed() < std::time::Duration::from_secs(4));
        assert_eq!(err.status_code(), 504);
    }
}
