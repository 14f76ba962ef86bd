//! Server-Sent Events (SSE) parsing for streamed chat completions.
//!
//! A streamed completion arrives as `data:` lines, each a JSON chunk whose
//! first choice carries a `delta` with a content fragment, a function-call
//! fragment, or both. [`SseParser`] turns raw body bytes into
//! [`StreamEvent`]s and [`assemble`] folds the events into the final
//! assistant [`Message`].

use crate::error::ProviderError;
use crate::{FunctionCall, Message, Role};
use serde::Deserialize;
use tracing::{trace, warn};

/// A single event from an SSE stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    /// An incremental text content delta.
    TextDelta(String),
    /// A function call fragment. The name arrives once; arguments arrive in
    /// pieces to be concatenated.
    FunctionCallDelta {
        name: Option<String>,
        arguments_delta: String,
    },
    /// The stream is complete.
    Done,
}

#[derive(Deserialize, Debug)]
struct StreamChunk {
    choices: Option<Vec<StreamChoice>>,
}

#[derive(Deserialize, Debug)]
struct StreamChoice {
    delta: Option<StreamDelta>,
    finish_reason: Option<String>,
}

#[derive(Deserialize, Debug)]
struct StreamDelta {
    content: Option<String>,
    function_call: Option<StreamFunctionDelta>,
}

#[derive(Deserialize, Debug)]
struct StreamFunctionDelta {
    name: Option<String>,
    arguments: Option<String>,
}

/// Incremental line splitter for an SSE body.
///
/// Bytes are buffered until a full line arrives, so a multi-byte character
/// split across two network chunks is decoded intact.
#[derive(Debug, Default)]
pub struct SseParser {
    buffer: Vec<u8>,
    done: bool,
}

impl SseParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `data: [DONE]` has been seen.
    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Feed a body chunk, appending every event completed by it.
    pub fn feed(&mut self, chunk: &[u8], events: &mut Vec<StreamEvent>) {
        if self.done {
            return;
        }
        self.buffer.extend_from_slice(chunk);

        while let Some(newline_pos) = self.buffer.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=newline_pos).collect();
            self.line(String::from_utf8_lossy(&line).trim(), events);
            if self.done {
                self.buffer.clear();
                break;
            }
        }
    }

    /// Flush an unterminated final line and make sure the stream ends in `Done`.
    pub fn finish(&mut self, events: &mut Vec<StreamEvent>) {
        let remaining = std::mem::take(&mut self.buffer);
        self.line(String::from_utf8_lossy(&remaining).trim(), events);
        if !self.done {
            self.done = true;
            events.push(StreamEvent::Done);
        }
    }

    fn line(&mut self, line: &str, events: &mut Vec<StreamEvent>) {
        if self.done || line.is_empty() || line.starts_with(':') {
            return;
        }
        if line == "data: [DONE]" {
            self.done = true;
            events.push(StreamEvent::Done);
            return;
        }
        if let Some(data) = line.strip_prefix("data:") {
            parse_sse_data(data.trim_start(), events);
        }
    }
}

/// Parse a single SSE `data:` payload into stream events.
fn parse_sse_data(data: &str, events: &mut Vec<StreamEvent>) {
    let chunk = match serde_json::from_str::<StreamChunk>(data) {
        Ok(chunk) => chunk,
        Err(e) => {
            warn!("Failed to parse SSE chunk: {e} (data: {data})");
            return;
        }
    };
    let Some(choice) = chunk.choices.and_then(|c| c.into_iter().next()) else {
        return;
    };
    if let Some(delta) = choice.delta {
        if let Some(content) = delta.content
            && !content.is_empty()
        {
            events.push(StreamEvent::TextDelta(content));
        }
        if let Some(call) = delta.function_call {
            events.push(StreamEvent::FunctionCallDelta {
                name: call.name,
                arguments_delta: call.arguments.unwrap_or_default(),
            });
        }
    }
    if choice.finish_reason.is_some() {
        trace!("Stream finish_reason: {:?}", choice.finish_reason);
    }
}

/// Assemble a complete text string from a sequence of stream events.
pub fn collect_text(events: &[StreamEvent]) -> String {
    let mut text = String::new();
    for event in events {
        if let StreamEvent::TextDelta(delta) = event {
            text.push_str(delta);
        }
    }
    text
}

/// Fold stream events into the assistant's reply.
pub fn assemble(events: &[StreamEvent]) -> Result<Message, ProviderError> {
    let text = collect_text(events);

    let mut call_name = String::new();
    let mut call_args = String::new();
    let mut saw_call = false;
    for event in events {
        if let StreamEvent::FunctionCallDelta {
            name,
            arguments_delta,
        } = event
        {
            saw_call = true;
            if let Some(name) = name {
                call_name.push_str(name);
            }
            call_args.push_str(arguments_delta);
        }
    }

    let call = saw_call.then(|| FunctionCall::new(call_name, call_args));
    let content = match (&call, text.is_empty()) {
        (Some(_), true) => None,
        _ => Some(text),
    };
    Message::new(Role::Assistant, content, call, None)
        .map_err(|e| ProviderError::Decode(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_all(body: &str) -> Vec<StreamEvent> {
        let mut parser = SseParser::new();
        let mut events = Vec::new();
        parser.feed(body.as_bytes(), &mut events);
        parser.finish(&mut events);
        events
    }

    #[test]
    fn collects_text_deltas() {
        let body = concat!(
            "data: {\"choices\":[{\"delta\":{\"role\":\"assistant\",\"content\":\"Hel\"}}]}\n\n",
            ": keep-alive\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"lo\"},\"finish_reason\":null}]}\n\n",
            "data: [DONE]\n\n",
        );
        let events = parse_all(body);
        assert_eq!(
            events,
            [
                StreamEvent::TextDelta("Hel".into()),
                StreamEvent::TextDelta("lo".into()),
                StreamEvent::Done
            ]
        );
        assert_eq!(assemble(&events).unwrap(), Message::assistant("Hello"));
    }

    #[test]
    fn lines_split_across_chunks() {
        let mut parser = SseParser::new();
        let mut events = Vec::new();
        parser.feed(b"data: {\"choices\":[{\"delta\":{\"cont", &mut events);
        assert!(events.is_empty());
        parser.feed(b"ent\":\"x\"}}]}\ndata: [DO", &mut events);
        assert_eq!(events, [StreamEvent::TextDelta("x".into())]);
        parser.feed(b"NE]\n", &mut events);
        assert!(parser.is_done());
        parser.finish(&mut events);
        assert_eq!(events.len(), 2);
    }

    #[test]
    fn multibyte_character_split_across_chunks() {
        let body = "data: {\"choices\":[{\"delta\":{\"content\":\"café\"}}]}\n".as_bytes();
        // Cut between the two bytes of 'é'.
        let cut = body.iter().position(|&b| b == 0xC3).unwrap() + 1;

        let mut parser = SseParser::new();
        let mut events = Vec::new();
        parser.feed(&body[..cut], &mut events);
        assert!(events.is_empty());
        parser.feed(&body[cut..], &mut events);
        parser.finish(&mut events);

        assert_eq!(assemble(&events).unwrap(), Message::assistant("café"));
    }

    #[test]
    fn function_call_fragments_are_joined() {
        let body = concat!(
            "data: {\"choices\":[{\"delta\":{\"function_call\":{\"name\":\"get_current_weather\",\"arguments\":\"\"}}}]}\n",
            "data: {\"choices\":[{\"delta\":{\"function_call\":{\"arguments\":\"{\\\"location\\\":\"}}}]}\n",
            "data: {\"choices\":[{\"delta\":{\"function_call\":{\"arguments\":\"\\\"Paris\\\"}\"}}}]}\n",
            "data: {\"choices\":[{\"delta\":{},\"finish_reason\":\"function_call\"}]}\n",
        );
        let msg = assemble(&parse_all(body)).unwrap();
        let call = msg.call().unwrap();
        assert_eq!(call.name, "get_current_weather");
        assert_eq!(call.arguments, r#"{"location":"Paris"}"#);
        assert!(msg.content().is_none());
    }

    #[test]
    fn unterminated_last_line_is_flushed() {
        let events = parse_all("data: {\"choices\":[{\"delta\":{\"content\":\"tail\"}}]}");
        assert_eq!(collect_text(&events), "tail");
        assert_eq!(events.last(), Some(&StreamEvent::Done));
    }

    #[test]
    fn malformed_chunks_are_skipped() {
        let events = parse_all("data: {oops\ndata: {\"choices\":[{\"delta\":{\"content\":\"ok\"}}]}\n");
        assert_eq!(collect_text(&events), "ok");
    }

    #[test]
    fn empty_stream_assembles_empty_reply() {
        let msg = assemble(&parse_all("")).unwrap();
        assert_eq!(msg, Message::assistant(""));
    }

    #[test]
    fn call_without_name_is_a_decode_error() {
        let events = vec![StreamEvent::FunctionCallDelta {
            name: None,
            arguments_delta: "{}".into(),
        }];
        assert!(matches!(assemble(&events), Err(ProviderError::Decode(_))));
    }
}
