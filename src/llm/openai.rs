use eventsource_stream::{EventStreamError, Eventsource};
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use std::fmt::Display;

use super::provider::{
    ChatMessage, LlmError, LlmProvider, LlmResult, MAX_OUTPUT_TOKENS, TEMPERATURE, TextStream,
};
use crate::http::client::HttpClient;

const ERROR_BODY_LIMIT: usize = 400;

#[derive(Debug, Clone)]
pub struct OpenAiProvider {
    http: HttpClient,
    api_key: String,
    model: String,
    base_url: String,
}

impl OpenAiProvider {
    pub fn new(
        http: HttpClient,
        api_key: Option<String>,
        model: String,
        base_url: String,
    ) -> LlmResult<Self> {
        let api_key = api_key
            .filter(|v| !v.trim().is_empty())
            .ok_or(LlmError::MissingApiKey)?;

        Ok(Self {
            http,
            api_key,
            model,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn endpoint(&self) -> String {
        format!("{}/v1/chat/completions", self.base_url)
    }

    fn build_request<'a>(&'a self, messages: &'a [ChatMessage], stream: bool) -> ChatRequest<'a> {
        ChatRequest {
            model: &self.model,
            messages,
            temperature: TEMPERATURE,
            max_tokens: MAX_OUTPUT_TOKENS,
            stream: stream.then_some(true),
        }
    }

    fn extract_text(resp: ChatResponse) -> LlmResult<String> {
        let text = resp
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .map(|content| content.trim().to_string())
            .unwrap_or_default();

        if text.is_empty() {
            Err(LlmError::EmptyResponse)
        } else {
            Ok(text)
        }
    }
}

impl LlmProvider for OpenAiProvider {
    async fn complete(&self, messages: &[ChatMessage]) -> LlmResult<String> {
        let payload = self.build_request(messages, false);
        let resp = self
            .http
            .post_json(&self.endpoint(), &self.api_key, &payload)
            .await
            .map_err(|err| LlmError::Transport(err.to_string()))?;

        if !resp.is_success() {
            return Err(LlmError::HttpStatus {
                status: resp.status,
                body: truncate_error_body(&resp.body),
            });
        }

        let parsed = serde_json::from_str::<ChatResponse>(&resp.body)
            .map_err(|err| LlmError::Parse(err.to_string()))?;
        Self::extract_text(parsed)
    }

    async fn complete_streaming(&self, messages: &[ChatMessage]) -> LlmResult<TextStream> {
        let payload = self.build_request(messages, true);
        let resp = self
            .http
            .post_json_streaming(&self.endpoint(), &self.api_key, &payload)
            .await
            .map_err(|err| LlmError::Transport(err.to_string()))?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp
                .text()
                .await
                .unwrap_or_else(|_| "<failed to read body>".to_string());
            return Err(LlmError::HttpStatus {
                status,
                body: truncate_error_body(&body),
            });
        }

        Ok(text_stream(resp.bytes_stream()))
    }
}

const DONE_MARKER: &str = "[DONE]";

/// Turns a raw event-stream body into reply fragments. The stream ends at
/// `[DONE]`, at the end of the body, or right after the first error it yields.
pub fn text_stream<S, B, E>(body: S) -> TextStream
where
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: Display + Send + 'static,
{
    Box::pin(async_stream::stream! {
        let mut events = Box::pin(body.eventsource());

        while let Some(event) = events.next().await {
            let step = match event {
                Ok(message) => decode_event(&message.data),
                Err(EventStreamError::Transport(err)) => {
                    StreamStep::Failed(LlmError::Transport(err.to_string()))
                }
                Err(err) => StreamStep::Failed(LlmError::Parse(err.to_string())),
            };

            match step {
                StreamStep::Text(text) => yield Ok(text),
                StreamStep::Skip => {}
                StreamStep::Done => break,
                StreamStep::Failed(err) => {
                    yield Err(err);
                    break;
                }
            }
        }
    })
}

#[derive(Debug, PartialEq, Eq)]
enum StreamStep {
    Text(String),
    Skip,
    Done,
    Failed(LlmError),
}

fn decode_event(data: &str) -> StreamStep {
    if data == DONE_MARKER {
        return StreamStep::Done;
    }
    if data.trim().is_empty() {
        return StreamStep::Skip;
    }

    let chunk = match serde_json::from_str::<ChatChunk>(data) {
        Ok(chunk) => chunk,
        Err(err) => return StreamStep::Failed(LlmError::Parse(err.to_string())),
    };

    if let Some(error) = chunk.error {
        return StreamStep::Failed(LlmError::Api(error.message));
    }

    let text: String = chunk
        .choices
        .into_iter()
        .filter_map(|choice| choice.delta.content)
        .collect();
    if text.is_empty() {
        StreamStep::Skip
    } else {
        StreamStep::Text(text)
    }
}

fn truncate_error_body(body: &str) -> String {
    body.chars().take(ERROR_BODY_LIMIT).collect()
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    temperature: f32,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    stream: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatChunk {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
    error: Option<ApiError>,
}

#[derive(Debug, Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: ChunkDelta,
}

#[derive(Debug, Default, Deserialize)]
struct ChunkDelta {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    message: String,
}
