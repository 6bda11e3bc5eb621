//! Reassembly of a streamed chat completion.
//!
//! Decoded event-stream frames are turned into [`StreamEvent`]s and folded
//! into [`MessageChunk`]s: text is passed on as soon as it arrives, tool-call
//! fragments are accumulated and released in one piece when the upstream
//! stream ends.

use std::fmt::Display;

use async_stream::try_stream;
use futures::{Stream, StreamExt};
use log::{debug, warn};

use super::types::ChatCompletionChunk;
use crate::core::LLMError;
use crate::eventsource::Event;
use crate::providers::llm::BoxStream;
use crate::providers::{FinishReason, MessageChunk};
use crate::tools::ToolCall;

/// Payload the upstream sends as its last frame.
const DONE_SENTINEL: &str = "[DONE]";

/// A partial tool call as carried by one delta.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolCallFragment {
    pub index: u32,
    pub id: Option<String>,
    pub name: Option<String>,
    pub arguments: Option<String>,
}

/// One application-level unit decoded from a frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    Content(String),
    ToolCall(ToolCallFragment),
    Finish(FinishReason),
    Done,
}

/// Decodes one frame. Only the first choice is considered.
pub fn parse_event(event: &Event) -> Result<Vec<StreamEvent>, LLMError> {
    let data = event.data.trim();
    if data == DONE_SENTINEL {
        return Ok(vec![StreamEvent::Done]);
    }

    let chunk: ChatCompletionChunk =
        serde_json::from_str(data).map_err(|e| LLMError::MalformedFrame(format!("{e}: {data}")))?;

    let mut events = Vec::new();
    let Some(choice) = chunk.choices.into_iter().next() else {
        return Ok(events);
    };

    if let Some(content) = choice.delta.content.filter(|c| !c.is_empty()) {
        events.push(StreamEvent::Content(content));
    }
    for delta in choice.delta.tool_calls.unwrap_or_default() {
        let (name, arguments) = delta
            .function
            .map(|f| (f.name, f.arguments))
            .unwrap_or_default();
        events.push(StreamEvent::ToolCall(ToolCallFragment {
            index: delta.index,
            id: delta.id,
            name,
            arguments,
        }));
    }
    if let Some(reason) = choice.finish_reason {
        events.push(StreamEvent::Finish(reason.into()));
    }

    Ok(events)
}

/// Folds tool-call fragments into complete calls.
///
/// Calls live in an ordered arena; `open` addresses the slot currently being
/// filled together with the stream index it belongs to. A fragment carrying a
/// different index closes that slot and opens the next one.
#[derive(Debug, Default)]
pub struct ToolCallAccumulator {
    calls: Vec<ToolCall>,
    open: Option<(u32, usize)>,
}

impl ToolCallAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, fragment: ToolCallFragment) {
        let slot = match self.open {
            Some((index, slot)) if index == fragment.index => slot,
            _ => {
                self.flush();
                self.calls.push(ToolCall::new(String::new(), String::new(), String::new()));
                let slot = self.calls.len() - 1;
                self.open = Some((fragment.index, slot));
                slot
            }
        };

        let call = &mut self.calls[slot];
        if let Some(id) = fragment.id.filter(|id| !id.is_empty()) {
            if call.id.is_empty() {
                call.id = id;
            }
        }
        if let Some(name) = fragment.name {
            call.name.push_str(&name);
        }
        if let Some(arguments) = fragment.arguments {
            call.arguments.push_str(&arguments);
        }
    }

    /// Closes the open slot, if any.
    fn flush(&mut self) {
        if let Some((index, slot)) = self.open.take() {
            let call = &mut self.calls[slot];
            if call.id.is_empty() {
                call.id = format!("call_{index}");
            }
            debug!("[Stream] Tool call complete: {call}");
        }
    }

    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }

    /// Flushes whatever is still open and returns the calls in arrival order.
    pub fn finish(mut self) -> Vec<ToolCall> {
        self.flush();
        self.calls
    }
}

/// Turns decoded frames into message chunks.
///
/// Malformed frames are logged and skipped. `[DONE]` ends the stream; so does
/// the underlying stream closing. Accumulated tool calls are yielded right
/// before the closing [`MessageChunk::End`].
pub fn reassemble<S, E>(events: S) -> BoxStream
where
    S: Stream<Item = Result<Event, E>> + Send + 'static,
    E: Display + Send + 'static,
{
    Box::pin(try_stream! {
        let mut events = Box::pin(events);
        let mut tool_calls = ToolCallAccumulator::new();
        let mut finish_reason = None;

        'frames: while let Some(event) = events.next().await {
            let event = event.map_err(|e| LLMError::StreamError(e.to_string()))?;
            let parsed = match parse_event(&event) {
                Ok(parsed) => parsed,
                Err(e) => {
                    warn!("[Stream] Skipping frame: {e}");
                    continue;
                }
            };

            for item in parsed {
                match item {
                    StreamEvent::Content(text) => yield MessageChunk::Text(text),
                    StreamEvent::ToolCall(fragment) => tool_calls.push(fragment),
                    StreamEvent::Finish(reason) => finish_reason = Some(reason),
                    StreamEvent::Done => break 'frames,
                }
            }
        }

        let tool_calls = tool_calls.finish();
        let finish_reason = finish_reason.unwrap_or(if tool_calls.is_empty() {
            FinishReason::Stop
        } else {
            FinishReason::ToolCalls
        });
        if !tool_calls.is_empty() {
            yield MessageChunk::ToolCalls(tool_calls);
        }
        yield MessageChunk::End(finish_reason);
    })
}

/// A whole streamed turn, drained.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Turn {
    pub content: String,
    pub tool_calls: Vec<ToolCall>,
    pub finish_reason: FinishReason,
}

impl Turn {
    /// Any observed tool call makes this a tool-call turn.
    pub fn is_tool_call(&self) -> bool {
        !self.tool_calls.is_empty()
    }
}

/// Drains a chunk stream into a [`Turn`].
pub async fn collect_turn(mut stream: BoxStream) -> Result<Turn, LLMError> {
    let mut turn = Turn {
        content: String::new(),
        tool_calls: Vec::new(),
        finish_reason: FinishReason::Stop,
    };
    while let Some(chunk) = stream.next().await {
        match chunk? {
            MessageChunk::Text(text) => turn.content.push_str(&text),
            MessageChunk::ToolCalls(calls) => turn.tool_calls.extend(calls),
            MessageChunk::End(reason) => turn.finish_reason = reason,
        }
    }
    Ok(turn)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eventsource::EventSourceExt;
    use futures::executor::block_on;
    use futures::stream;
    use proptest::prelude::*;
    use serde_json::json;

    fn frame(value: serde_json::Value) -> String {
        format!("data: {value}\n\n")
    }

    fn content_frame(text: &str) -> String {
        frame(json!({"choices": [{"index": 0, "delta": {"content": text}}]}))
    }

    fn tool_frame(index: u32, id: Option<&str>, name: Option<&str>, arguments: &str) -> String {
        let mut function = json!({"arguments": arguments});
        if let Some(name) = name {
            function["name"] = json!(name);
        }
        let mut call = json!({"index": index, "function": function});
        if let Some(id) = id {
            call["id"] = json!(id);
            call["type"] = json!("function");
        }
        frame(json!({"choices": [{"index": 0, "delta": {"tool_calls": [call]}}]}))
    }

    fn finish_frame(reason: &str) -> String {
        frame(json!({"choices": [{"index": 0, "delta": {}, "finish_reason": reason}]}))
    }

    fn run(chunks: Vec<Vec<u8>>) -> Turn {
        let events = stream::iter(chunks.into_iter().map(Ok::<_, std::io::Error>)).events();
        block_on(collect_turn(reassemble(events))).unwrap()
    }

    fn run_str(body: &str) -> Turn {
        run(vec![body.as_bytes().to_vec()])
    }

    #[test]
    fn test_text_is_forwarded_in_order() {
        let body = [content_frame("Hel"), content_frame("lo"), finish_frame("stop")].concat()
            + "data: [DONE]\n\n";
        let turn = run_str(&body);
        assert_eq!(turn.content, "Hello");
        assert!(!turn.is_tool_call());
        assert_eq!(turn.finish_reason, FinishReason::Stop);
    }

    #[test]
    fn test_text_is_yielded_before_stream_ends() {
        let events = stream::iter(vec![Ok::<_, std::io::Error>(content_frame("first").into_bytes())])
            .chain(stream::pending())
            .events();
        let mut chunks = reassemble(events);
        let first = block_on(chunks.next()).unwrap().unwrap();
        assert_eq!(first, MessageChunk::Text("first".to_string()));
    }

    #[test]
    fn test_done_stops_reading() {
        let body = content_frame("a") + "data: [DONE]\n\n" + &content_frame("ignored");
        assert_eq!(run_str(&body).content, "a");
    }

    #[test]
    fn test_malformed_frame_is_skipped() {
        let body = content_frame("one") + "data: {not json\n\n" + &content_frame("two");
        let turn = run_str(&body);
        assert_eq!(turn.content, "onetwo");
    }

    #[test]
    fn test_tool_call_fragments_are_concatenated() {
        let body = [
            tool_frame(0, Some("call_a"), Some("fetch_"), ""),
            tool_frame(0, None, Some("webpage"), "{\"url\":"),
            tool_frame(0, None, None, "\"https://example.com\"}"),
            finish_frame("tool_calls"),
        ]
        .concat()
            + "data: [DONE]\n\n";
        let turn = run_str(&body);
        assert_eq!(
            turn.tool_calls,
            vec![ToolCall::new(
                "call_a",
                "fetch_webpage",
                "{\"url\":\"https://example.com\"}"
            )]
        );
        assert_eq!(turn.finish_reason, FinishReason::ToolCalls);
    }

    #[test]
    fn test_index_change_starts_new_call() {
        let body = [
            tool_frame(0, Some("a"), Some("search_web"), "{\"query\":"),
            tool_frame(0, None, None, "\"rust\"}"),
            tool_frame(1, Some("b"), Some("fetch_webpage"), "{}"),
        ]
        .concat();
        let turn = run_str(&body);
        let names: Vec<_> = turn.tool_calls.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, ["search_web", "fetch_webpage"]);
        assert_eq!(turn.tool_calls[0].arguments, "{\"query\":\"rust\"}");
        // No finish reason was sent, but tool calls were seen.
        assert_eq!(turn.finish_reason, FinishReason::ToolCalls);
    }

    #[test]
    fn test_missing_id_gets_placeholder() {
        let mut accumulator = ToolCallAccumulator::new();
        accumulator.push(ToolCallFragment {
            index: 3,
            id: None,
            name: Some("read_file".to_string()),
            arguments: None,
        });
        let calls = accumulator.finish();
        assert_eq!(calls[0].id, "call_3");
        assert_eq!(calls[0].arguments, "");
    }

    #[test]
    fn test_transport_error_is_terminal() {
        let chunks: Vec<Result<Vec<u8>, std::io::Error>> = vec![
            Ok(content_frame("partial").into_bytes()),
            Err(std::io::Error::other("reset")),
        ];
        let mut stream = reassemble(stream::iter(chunks).events());
        block_on(async {
            assert!(matches!(stream.next().await, Some(Ok(MessageChunk::Text(_)))));
            assert!(matches!(stream.next().await, Some(Err(LLMError::StreamError(_)))));
        });
    }

    #[test]
    fn test_parse_event_rejects_garbage() {
        let event = Event::message("garbage");
        assert!(matches!(parse_event(&event), Err(LLMError::MalformedFrame(_))));
    }

    fn split_at(bytes: &[u8], cuts: &[prop::sample::Index]) -> Vec<Vec<u8>> {
        let mut points: Vec<usize> = cuts.iter().map(|i| i.index(bytes.len() + 1)).collect();
        points.sort_unstable();
        points.dedup();
        let mut chunks = Vec::new();
        let mut start = 0;
        for point in points {
            chunks.push(bytes[start..point].to_vec());
            start = point;
        }
        chunks.push(bytes[start..].to_vec());
        chunks
    }

    proptest! {
        #[test]
        fn arguments_survive_any_chunking(
            fragments in prop::collection::vec("[a-z0-9{}\":, é→\\\\]{0,8}", 1..8),
            cuts in prop::collection::vec(any::<prop::sample::Index>(), 0..12),
        ) {
            let mut body = tool_frame(0, Some("call_0"), Some("search_web"), "");
            for fragment in &fragments {
                body.push_str(&tool_frame(0, None, None, fragment));
            }
            body.push_str(&content_frame("after"));
            body.push_str("data: [DONE]\n\n");

            let turn = run(split_at(body.as_bytes(), &cuts));
            prop_assert_eq!(turn.tool_calls.len(), 1);
            prop_assert_eq!(&turn.tool_calls[0].arguments, &fragments.concat());
            prop_assert_eq!(turn.content, "after");
        }
    }
}
