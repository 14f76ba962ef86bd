//! HTTP client for OpenAI-compatible `/chat/completions` endpoints.
//!
//! Works against hosted APIs and local servers (llama.cpp, vLLM, Ollama's
//! OpenAI shim) alike. Requests either a single JSON body or an SSE stream,
//! depending on [`ChatClient::with_streaming`].

use crate::api::provider::{CompletionFuture, DeltaSink, Provider};
use crate::api::streaming::{SseParser, StreamEvent, assemble};
use crate::config::Config;
use crate::error::ProviderError;
use crate::functions::FunctionDef;
use crate::{FunctionCall, Message, Role};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::{debug, trace};

// ── Request types ──────────────────────────────────────────────────

/// Body of a chat completion request.
#[derive(Serialize, Debug)]
pub struct ChatRequest<'a> {
    pub model: &'a str,
    pub messages: &'a [Message],
    pub max_tokens: usize,
    pub temperature: f32,
    #[serde(skip_serializing_if = "no_functions")]
    pub functions: &'a [FunctionDef],
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub stream: bool,
}

fn no_functions(functions: &&[FunctionDef]) -> bool {
    functions.is_empty()
}

// ── Response types ─────────────────────────────────────────────────

#[derive(Deserialize, Debug)]
struct RawChatResponse {
    choices: Option<Vec<RawChoice>>,
    error: Option<ApiErrorResponse>,
}

#[derive(Deserialize, Debug)]
struct RawChoice {
    message: RawResponseMessage,
    finish_reason: Option<String>,
}

#[derive(Deserialize, Debug)]
struct RawResponseMessage {
    content: Option<String>,
    function_call: Option<FunctionCall>,
}

#[derive(Deserialize, Debug)]
struct ApiErrorResponse {
    message: String,
}

/// Turn a non-streamed response body into the assistant's reply.
fn parse_completion(text: &str) -> Result<Message, ProviderError> {
    let parsed: RawChatResponse =
        serde_json::from_str(text).map_err(|e| ProviderError::Decode(e.to_string()))?;
    if let Some(err) = parsed.error {
        return Err(ProviderError::Decode(err.message));
    }
    let choice = parsed
        .choices
        .and_then(|c| c.into_iter().next())
        .ok_or(ProviderError::NoChoices)?;
    trace!("Completion finish_reason: {:?}", choice.finish_reason);

    let RawResponseMessage {
        content,
        function_call,
    } = choice.message;
    let content = match (&function_call, content) {
        (None, None) => Some(String::new()),
        (_, content) => content,
    };
    Message::new(Role::Assistant, content, function_call, None)
        .map_err(|e| ProviderError::Decode(e.to_string()))
}

// ── Client ─────────────────────────────────────────────────────────

/// Async client for an OpenAI-compatible chat completions API.
pub struct ChatClient {
    client: reqwest::Client,
    url: String,
    api_key: Option<String>,
    model: String,
    max_tokens: usize,
    temperature: f32,
    stream: bool,
    functions: Vec<FunctionDef>,
}

impl ChatClient {
    /// Client for `<base_url>/chat/completions` with a 120 s timeout.
    pub fn new(base_url: &str, model: impl Into<String>) -> Result<Self, ProviderError> {
        Self::with_timeout(base_url, model, Duration::from_secs(120))
    }

    pub fn with_timeout(
        base_url: &str,
        model: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, ProviderError> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("sequin/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()?;
        Ok(Self {
            client,
            url: format!("{}/chat/completions", base_url.trim_end_matches('/')),
            api_key: None,
            model: model.into(),
            max_tokens: crate::config::DEFAULT_MAX_TOKENS,
            temperature: 0.7,
            stream: false,
            functions: Vec::new(),
        })
    }

    /// Build from the `provider` and `chat_completions` config sections.
    pub fn from_config(config: &Config) -> Result<Self, ProviderError> {
        let provider = &config.provider;
        let mut client = Self::with_timeout(
            &provider.base_url,
            &provider.model,
            Duration::from_secs(provider.timeout_secs),
        )?
        .with_max_tokens(config.chat_completions.max_tokens)
        .with_temperature(provider.temperature)
        .with_streaming(provider.stream);
        client.api_key = provider.api_key();
        Ok(client)
    }

    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: usize) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_streaming(mut self, stream: bool) -> Self {
        self.stream = stream;
        self
    }

    /// Advertise these functions on every request.
    pub fn with_functions(mut self, functions: Vec<FunctionDef>) -> Self {
        self.functions = functions;
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    fn request<'a>(&'a self, messages: &'a [Message]) -> ChatRequest<'a> {
        ChatRequest {
            model: &self.model,
            messages,
            max_tokens: self.max_tokens,
            temperature: self.temperature,
            functions: &self.functions,
            stream: self.stream,
        }
    }

    async fn send(&self, body: &ChatRequest<'_>) -> Result<reqwest::Response, ProviderError> {
        debug!(
            "LLM request: model={}, messages={}, functions={}, max_tokens={}, temp={}, stream={}",
            body.model,
            body.messages.len(),
            body.functions.len(),
            body.max_tokens,
            body.temperature,
            body.stream,
        );
        trace!(
            "Request payload size: {} bytes",
            serde_json::to_string(body).map_or(0, |s| s.len())
        );

        let mut req = self.client.post(&self.url).json(body);
        if let Some(ref key) = self.api_key {
            req = req.bearer_auth(key);
        }
        let resp = req.send().await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(ProviderError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(resp)
    }

    /// Send a non-streamed request and parse the single JSON body.
    pub async fn chat(&self, messages: &[Message]) -> Result<Message, ProviderError> {
        let body = ChatRequest {
            stream: false,
            ..self.request(messages)
        };
        let start = Instant::now();
        let text = self.send(&body).await?.text().await?;
        debug!(
            "LLM response in {:.1}s ({} bytes)",
            start.elapsed().as_secs_f64(),
            text.len()
        );
        parse_completion(&text)
    }

    /// Send a streamed request, invoking `on_delta` for each content
    /// fragment as it arrives off the wire.
    pub async fn chat_stream_live(
        &self,
        messages: &[Message],
        mut on_delta: impl FnMut(&str),
    ) -> Result<Message, ProviderError> {
        let body = ChatRequest {
            stream: true,
            ..self.request(messages)
        };
        let start = Instant::now();
        let mut resp = self.send(&body).await?;

        let mut parser = SseParser::new();
        let mut events = Vec::new();
        while let Some(chunk) = resp.chunk().await? {
            let before = events.len();
            parser.feed(&chunk, &mut events);
            for ev in &events[before..] {
                if let StreamEvent::TextDelta(delta) = ev {
                    on_delta(delta);
                }
            }
            if parser.is_done() {
                break;
            }
        }
        let before = events.len();
        parser.finish(&mut events);
        for ev in &events[before..] {
            if let StreamEvent::TextDelta(delta) = ev {
                on_delta(delta);
            }
        }

        debug!(
            "Live stream completed in {:.1}s with {} events",
            start.elapsed().as_secs_f64(),
            events.len()
        );
        assemble(&events)
    }
}

impl Provider for ChatClient {
    fn complete<'a>(&'a self, messages: &'a [Message], on_delta: DeltaSink<'a>) -> CompletionFuture<'a> {
        Box::pin(async move {
            if messages.is_empty() {
                return Err(ProviderError::EmptySequence);
            }
            if self.stream {
                self.chat_stream_live(messages, |d| on_delta(d)).await
            } else {
                let reply = self.chat(messages).await?;
                if let Some(content) = reply.content()
                    && !content.is_empty()
                {
                    on_delta(content);
                }
                Ok(reply)
            }
        })
    }
}
